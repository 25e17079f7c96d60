use foundation_core::Config;
use foundation_orchestrate::{run_verify, RunContext, TokioClock};

use super::{emit, exit_code, failed, session};
use crate::summary::render_bootstrap;
use crate::OutputFormat;

pub(crate) fn cmd_verify(config: &Config, output: OutputFormat) -> i32 {
    let (rt, provider) = session(config, output);
    let clock = TokioClock::new();
    let ctx = RunContext::new(config, provider.as_ref(), &clock);

    match rt.block_on(run_verify(&ctx)) {
        Ok(report) => {
            emit(&report.checks, || render_bootstrap("verify", &report), output);
            exit_code(report.succeeded())
        }
        Err(e) => failed(&e, output),
    }
}
