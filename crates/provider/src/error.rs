/// All errors a `CloudProvider` implementation can return.
///
/// Only [`ProviderError::Transient`] is ever retried. `AlreadyExists` is a
/// signal rather than a failure: callers switch to their lookup/update path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Rate limiting or propagation delay; safe to retry with backoff.
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The object-store namespace is global; another tenant owns this name.
    #[error(
        "object-store name '{name}' is already owned by another tenant; choose a different project.short_name"
    )]
    NamingCollision { name: String },

    /// The resource is in a state that forbids the call (e.g. deleting a
    /// non-empty bucket or a role with attached policies).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rejected by provider: {0}")]
    Validation(String),

    /// Transport, serialization, or persistence failure inside the provider.
    #[error("provider backend error: {0}")]
    Backend(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Stable machine-readable kind, shared with the gateway wire format.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Transient(_) => "transient",
            ProviderError::AlreadyExists(_) => "already_exists",
            ProviderError::NotFound(_) => "not_found",
            ProviderError::PermissionDenied(_) => "permission_denied",
            ProviderError::NamingCollision { .. } => "naming_collision",
            ProviderError::Conflict(_) => "conflict",
            ProviderError::Validation(_) => "validation",
            ProviderError::Backend(_) => "backend",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ProviderError::Transient("throttled".into()).is_retryable());
        for err in [
            ProviderError::AlreadyExists("x".into()),
            ProviderError::PermissionDenied("x".into()),
            ProviderError::NamingCollision { name: "x".into() },
            ProviderError::Validation("x".into()),
        ] {
            assert!(!err.is_retryable(), "{err} should not be retried");
        }
    }

    #[test]
    fn naming_collision_carries_remediation_hint() {
        let err = ProviderError::NamingCollision {
            name: "acme-site-state-dev-822529998967".into(),
        };
        assert!(err.to_string().contains("project.short_name"));
    }
}
