use std::path::PathBuf;

use foundation_core::TemplateError;
use foundation_provider::ProviderError;
use thiserror::Error;

use crate::artifacts::ArtifactError;

/// Failures that stop a whole command.
///
/// Per-account and per-resource failures never surface here; phases record
/// them in the run report and carry on with the remaining targets.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("policy template rejected before any provider call: {0}")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("{what}: {source}")]
    Provider {
        what: String,
        #[source]
        source: ProviderError,
    },

    #[error("no account IDs recorded in '{}'; run bootstrap-organization first", .0.display())]
    NoAccounts(PathBuf),

    #[error("{0}")]
    Precondition(String),
}

impl OrchestrationError {
    pub(crate) fn provider(what: impl Into<String>, source: ProviderError) -> Self {
        OrchestrationError::Provider {
            what: what.into(),
            source,
        }
    }
}
