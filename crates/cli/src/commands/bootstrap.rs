use foundation_core::Config;
use foundation_orchestrate::{
    run_bootstrap_foundation, run_bootstrap_organization, FoundationOptions, RunContext,
    TokioClock,
};

use super::{emit, exit_code, failed, session};
use crate::summary::render_bootstrap;
use crate::OutputFormat;

pub(crate) fn cmd_bootstrap_organization(config: &Config, output: OutputFormat) -> i32 {
    let (rt, provider) = session(config, output);
    let clock = TokioClock::new();
    let ctx = RunContext::new(config, provider.as_ref(), &clock);

    match rt.block_on(run_bootstrap_organization(&ctx)) {
        Ok(report) => {
            emit(&report, || render_bootstrap("bootstrap-organization", &report), output);
            exit_code(report.succeeded())
        }
        Err(e) => failed(&e, output),
    }
}

pub(crate) fn cmd_bootstrap_foundation(
    config: &Config,
    skip_verification: bool,
    output: OutputFormat,
) -> i32 {
    let (rt, provider) = session(config, output);
    let clock = TokioClock::new();
    let ctx = RunContext::new(config, provider.as_ref(), &clock);
    let options = FoundationOptions { skip_verification };

    match rt.block_on(run_bootstrap_foundation(&ctx, options)) {
        Ok(report) => {
            emit(&report, || render_bootstrap("bootstrap-foundation", &report), output);
            exit_code(report.succeeded())
        }
        Err(e) => failed(&e, output),
    }
}
