use std::process;
use std::time::Duration;

use foundation_core::Config;
use foundation_orchestrate::{run_destroy, DestroyOptions, DestroyScope, RunContext, TokioClock};

use super::{emit, exit_code, failed, session};
use crate::confirm::confirm;
use crate::summary::render_destroy;
use crate::{exit_codes, report_error, DestroyArgs, OutputFormat};

pub(crate) fn cmd_destroy(config: &Config, args: &DestroyArgs, output: OutputFormat) -> i32 {
    let options = destroy_options(args);

    if !args.force && !config.dry_run {
        let short_name = &config.project.short_name;
        let prompt = format!(
            "This removes the {} foundation resources of project '{}'.",
            options.scope.as_str(),
            short_name
        );
        if !confirm(&prompt, short_name) {
            report_error("destroy-foundation aborted", output);
            process::exit(exit_codes::FAILURE);
        }
        if args.close_accounts
            && !confirm(
                "Closing member accounts cannot be undone from this tool.",
                "close",
            )
        {
            report_error("destroy-foundation aborted", output);
            process::exit(exit_codes::FAILURE);
        }
    }

    let (rt, provider) = session(config, output);
    let clock = TokioClock::new();
    let ctx = RunContext::new(config, provider.as_ref(), &clock);

    match rt.block_on(run_destroy(&ctx, &options)) {
        Ok(report) => {
            emit(&report, || render_destroy(&report), output);
            exit_code(report.succeeded())
        }
        Err(e) => failed(&e, output),
    }
}

fn destroy_options(args: &DestroyArgs) -> DestroyOptions {
    let scope = if args.backends_only {
        DestroyScope::Backends
    } else if args.roles_only {
        DestroyScope::Roles
    } else if args.oidc_only {
        DestroyScope::Oidc
    } else if args.central_bucket_only {
        DestroyScope::CentralBucket
    } else {
        DestroyScope::All
    };
    let mut options = DestroyOptions::new(scope);
    if !args.accounts.is_empty() {
        options.environments = Some(args.accounts.clone());
    }
    options.close_accounts = args.close_accounts;
    if let Some(secs) = args.empty_timeout_secs {
        options.empty_timeout = Duration::from_secs(secs);
    }
    options
}
