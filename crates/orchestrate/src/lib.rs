//! foundation-orchestrate: the phases of a foundation run.
//!
//! Control flow for a full bootstrap is
//! `bootstrap_organization` → `provision_identity` → `provision_backends` →
//! `verify_foundation`, with [`pipeline`] sequencing them and persisting the
//! account map, backend files, console links, and reports. The destroyer and
//! the policy updater consume the same configuration and account map.
//!
//! Every phase talks to the control plane through
//! [`foundation_provider::CloudProvider`] and waits only through the
//! [`Clock`] in its [`RunContext`].

pub mod artifacts;
pub mod backend;
pub mod context;
pub mod destroy;
pub mod diff;
pub mod ensure;
pub mod error;
pub mod identity;
pub mod organization;
pub mod pipeline;
pub mod policy_update;
pub mod retry;
pub mod verify;

pub use artifacts::{ArtifactError, ArtifactStore};
pub use backend::{plan_backends, provision_backends, BackendOutcome};
pub use context::{Clock, FakeClock, RunContext, TokioClock};
pub use destroy::{destroy_foundation, DestroyOptions, DestroyOutcome, DestroyScope};
pub use diff::{DiffLine, PolicyDiff};
pub use ensure::{Ensured, TornDown};
pub use error::OrchestrationError;
pub use identity::{plan_roles, provision_identity, IdentityOutcome};
pub use organization::bootstrap_organization;
pub use pipeline::{
    run_bootstrap_foundation, run_bootstrap_organization, run_destroy, run_policy_update,
    run_verify, FoundationOptions,
};
pub use policy_update::{update_role_policies, PolicyUpdateOptions, RoleSelector, RoleUpdate};
pub use retry::{poll_until, retry_transient, WaitError};
pub use verify::verify_foundation;
