//! One module per subcommand. Each returns the process exit code.

pub(crate) mod bootstrap;
pub(crate) mod destroy;
pub(crate) mod policy;
pub(crate) mod verify;

use std::process;

use foundation_core::Config;
use foundation_orchestrate::OrchestrationError;
use foundation_provider::{CloudProvider, ProviderError};
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::{exit_codes, report_error, OutputFormat};

/// The async runtime and provider every command drives its phases with.
pub(crate) fn session(config: &Config, output: OutputFormat) -> (Runtime, Box<dyn CloudProvider>) {
    let provider = match crate::provider::build(config) {
        Ok(p) => p,
        Err(e) => {
            report_error(&format!("provider error: {}", e), output);
            let code = match e {
                ProviderError::Validation(_) => exit_codes::USAGE,
                _ => exit_codes::FAILURE,
            };
            process::exit(code);
        }
    };
    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), output);
            process::exit(exit_codes::FAILURE);
        }
    };
    (rt, provider)
}

/// Print a run result: pretty JSON of `value`, or the rendered text summary.
pub(crate) fn emit<T: Serialize>(value: &T, text: impl FnOnce() -> String, output: OutputFormat) {
    match output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)
                .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
            println!("{}", json);
        }
        OutputFormat::Text => print!("{}", text()),
    }
}

/// Report a command-stopping error and pick its exit code.
pub(crate) fn failed(err: &OrchestrationError, output: OutputFormat) -> i32 {
    report_error(&format!("error: {}", err), output);
    match err {
        OrchestrationError::Precondition(_) => exit_codes::USAGE,
        _ => exit_codes::FAILURE,
    }
}

pub(crate) fn exit_code(succeeded: bool) -> i32 {
    if succeeded {
        exit_codes::SUCCESS
    } else {
        exit_codes::FAILURE
    }
}
