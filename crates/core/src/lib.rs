//! foundation-core: the pure, I/O-free layer of the foundation orchestrator.
//!
//! Everything every phase needs to agree on lives here so that bootstrap,
//! verification, destroy, and the policy updater derive identical values:
//!
//! - [`config`] -- the validated, immutable run configuration
//! - [`naming`] -- deterministic identifiers for accounts, roles, and backends
//! - [`template`] -- typed, fail-closed policy template rendering
//! - [`roles`] -- the built-in trust/permission templates per role purpose
//! - [`backoff`] -- retry and polling policies
//! - [`report`] -- the bootstrap/destroy report model

pub mod backoff;
pub mod config;
pub mod model;
pub mod naming;
pub mod report;
pub mod roles;
pub mod template;

pub use backoff::BackoffPolicy;
pub use config::{
    AccountConfig, Config, ConfigProblem, ConfigurationError, Overrides, ProviderKind,
    Repository, SubjectScope,
};
pub use model::{
    AccountId, AccountMap, AccountStatus, BackendIdentifiers, RolePurpose, CENTRAL, MANAGEMENT,
};
pub use report::{
    now_rfc3339, AccountSummary, ActionRecord, ActionStatus, BootstrapReport, CheckResult,
    CheckStatus, DestroyReport, Phase,
};
pub use roles::{render_role, RoleDefinition, RoleTemplates};
pub use template::{Placeholder, Placeholders, PolicyTemplate, RenderedPolicy, TemplateError};
