//! Generic existence-check-before-create upsert, shared by bootstrap and
//! destroy.
//!
//! Each resource kind implements [`Resource`] once: how to find it, how to
//! create it, how to delete it. [`ensure`] and [`teardown`] wrap those with
//! transient retries, the `AlreadyExists`/`NotFound` convergence rules, and
//! the dry-run gate, so no phase issues a mutating call on its own path
//! around them.

use async_trait::async_trait;
use foundation_core::ActionStatus;
use foundation_provider::{CloudProvider, ProviderError};

use crate::context::RunContext;
use crate::retry::retry_transient;

/// Placeholder for identifiers that only exist once a planned change is made.
pub const PLANNED_ID: &str = "(planned)";

#[async_trait]
pub trait Resource: Send + Sync {
    type Record: Send + Sync;

    /// Human-readable label, e.g. `role acme-site-deploy-dev`.
    fn label(&self) -> String;

    async fn lookup(
        &self,
        provider: &dyn CloudProvider,
    ) -> Result<Option<Self::Record>, ProviderError>;

    async fn create(&self, provider: &dyn CloudProvider) -> Result<Self::Record, ProviderError>;

    async fn delete(
        &self,
        provider: &dyn CloudProvider,
        record: &Self::Record,
    ) -> Result<(), ProviderError>;
}

/// Result of [`ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured<R> {
    Existing(R),
    Created(R),
    /// Dry run: the resource is absent and would have been created.
    Planned,
}

impl<R> Ensured<R> {
    pub fn status(&self) -> ActionStatus {
        match self {
            Ensured::Existing(_) => ActionStatus::Existing,
            Ensured::Created(_) => ActionStatus::Created,
            Ensured::Planned => ActionStatus::Planned,
        }
    }

    pub fn record(&self) -> Option<&R> {
        match self {
            Ensured::Existing(r) | Ensured::Created(r) => Some(r),
            Ensured::Planned => None,
        }
    }

    pub fn into_record(self) -> Option<R> {
        match self {
            Ensured::Existing(r) | Ensured::Created(r) => Some(r),
            Ensured::Planned => None,
        }
    }
}

/// Result of [`teardown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TornDown {
    Removed,
    Absent,
    Planned,
}

impl TornDown {
    pub fn status(self) -> ActionStatus {
        match self {
            TornDown::Removed => ActionStatus::Removed,
            TornDown::Absent => ActionStatus::Absent,
            TornDown::Planned => ActionStatus::Planned,
        }
    }
}

/// Find `resource`, creating it when absent.
///
/// An `AlreadyExists` answer to the create call (another run got there
/// first) is treated as success after re-reading the resource.
pub async fn ensure<R: Resource>(
    ctx: &RunContext<'_>,
    target: &str,
    resource: &R,
) -> Result<Ensured<R::Record>, ProviderError> {
    let label = resource.label();
    if let Some(found) = lookup(ctx, &label, resource).await? {
        tracing::debug!(env = target, resource = %label, "exists");
        return Ok(Ensured::Existing(found));
    }
    if ctx.dry_run() {
        tracing::info!(env = target, resource = %label, dry_run = true, "would create");
        return Ok(Ensured::Planned);
    }
    let created = retry_transient(ctx.clock, &ctx.config.retry, &label, || {
        resource.create(ctx.provider)
    })
    .await;
    match created {
        Ok(record) => {
            tracing::info!(env = target, resource = %label, "created");
            Ok(Ensured::Created(record))
        }
        Err(ProviderError::AlreadyExists(_)) => match lookup(ctx, &label, resource).await? {
            Some(found) => {
                tracing::debug!(env = target, resource = %label, "created concurrently");
                Ok(Ensured::Existing(found))
            }
            None => Err(ProviderError::Conflict(format!(
                "{} reported as existing but cannot be found",
                label
            ))),
        },
        Err(e) => Err(e),
    }
}

/// Remove `resource` if present.
pub async fn teardown<R: Resource>(
    ctx: &RunContext<'_>,
    target: &str,
    resource: &R,
) -> Result<TornDown, ProviderError> {
    let label = resource.label();
    let Some(found) = lookup(ctx, &label, resource).await? else {
        tracing::debug!(env = target, resource = %label, "already absent");
        return Ok(TornDown::Absent);
    };
    if ctx.dry_run() {
        tracing::info!(env = target, resource = %label, dry_run = true, "would delete");
        return Ok(TornDown::Planned);
    }
    let deleted = retry_transient(ctx.clock, &ctx.config.retry, &label, || {
        resource.delete(ctx.provider, &found)
    })
    .await;
    match deleted {
        Ok(()) => {
            tracing::info!(env = target, resource = %label, "deleted");
            Ok(TornDown::Removed)
        }
        Err(ProviderError::NotFound(_)) => Ok(TornDown::Absent),
        Err(e) => Err(e),
    }
}

async fn lookup<R: Resource>(
    ctx: &RunContext<'_>,
    label: &str,
    resource: &R,
) -> Result<Option<R::Record>, ProviderError> {
    retry_transient(ctx.clock, &ctx.config.retry, label, || {
        resource.lookup(ctx.provider)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FakeClock;
    use crate::identity::{ensure_role, RoleResource};
    use foundation_core::{render_role, BackoffPolicy, Config, RoleDefinition, RolePurpose, MANAGEMENT};
    use foundation_provider::{MemoryProvider, RoleRecord};

    const DRIFTED: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"ec2:TerminateInstances","Resource":"*"}]}"#;

    fn config() -> Config {
        let mut config = Config::from_toml_str(
            r#"
[project]
short_name = "acme-site"
full_name = "Acme Site"
repository = "acme/acme-site"

[accounts.dev]
email = "aws-dev@acme.example"
"#,
        )
        .unwrap();
        config.retry = BackoffPolicy::immediate(3);
        config
    }

    fn central_role(config: &Config, provider: &MemoryProvider) -> RoleDefinition {
        let management = provider.management_account_id();
        render_role(config, RolePurpose::CentralBootstrap, MANAGEMENT, &management, &management).unwrap()
    }

    /// Another run creates the role (with a stale permission document)
    /// between our lookup and our create.
    struct Raced<'a>(RoleResource<'a>);

    #[async_trait]
    impl<'a> Resource for Raced<'a> {
        type Record = RoleRecord;

        fn label(&self) -> String {
            self.0.label()
        }

        async fn lookup(&self, provider: &dyn CloudProvider) -> Result<Option<RoleRecord>, ProviderError> {
            self.0.lookup(provider).await
        }

        async fn create(&self, provider: &dyn CloudProvider) -> Result<RoleRecord, ProviderError> {
            let def = self.0.definition;
            self.0.create(provider).await?;
            provider
                .put_role_policy(&def.account_id, &def.name, &def.policy_name, DRIFTED)
                .await?;
            Err(ProviderError::AlreadyExists(def.name.clone()))
        }

        async fn delete(&self, provider: &dyn CloudProvider, record: &RoleRecord) -> Result<(), ProviderError> {
            self.0.delete(provider, record).await
        }
    }

    #[tokio::test]
    async fn already_exists_on_create_rereads_and_converges() {
        let config = config();
        let provider = MemoryProvider::new();
        let clock = FakeClock::new();
        let ctx = RunContext::new(&config, &provider, &clock);
        let role = central_role(&config, &provider);

        let ensured = ensure(&ctx, MANAGEMENT, &Raced(RoleResource { definition: &role }))
            .await
            .unwrap();
        let Ensured::Existing(record) = &ensured else {
            panic!("expected existing, got {:?}", ensured.status());
        };
        assert_eq!(record.name, role.name);

        let actions = ensure_role(&ctx, MANAGEMENT, &role).await.unwrap();
        let status = |prefix: &str| {
            actions
                .iter()
                .find(|(resource, _)| resource.starts_with(prefix))
                .map(|(_, status)| status.clone())
                .unwrap()
        };
        assert_eq!(status("role "), ActionStatus::Existing);
        assert_eq!(status("trust policy of "), ActionStatus::Existing);
        assert_eq!(status("permission policy "), ActionStatus::Updated);

        let stored = provider
            .get_role_policy(&role.account_id, &role.name, &role.policy_name)
            .await
            .unwrap()
            .unwrap();
        assert!(role.permission.matches(&stored));
    }

    #[tokio::test]
    async fn already_exists_without_a_record_is_a_conflict() {
        struct Phantom;

        #[async_trait]
        impl Resource for Phantom {
            type Record = ();

            fn label(&self) -> String {
                "phantom".to_string()
            }

            async fn lookup(&self, _: &dyn CloudProvider) -> Result<Option<()>, ProviderError> {
                Ok(None)
            }

            async fn create(&self, _: &dyn CloudProvider) -> Result<(), ProviderError> {
                Err(ProviderError::AlreadyExists("phantom".into()))
            }

            async fn delete(&self, _: &dyn CloudProvider, _: &()) -> Result<(), ProviderError> {
                Ok(())
            }
        }

        let config = config();
        let provider = MemoryProvider::new();
        let clock = FakeClock::new();
        let ctx = RunContext::new(&config, &provider, &clock);
        let err = ensure(&ctx, MANAGEMENT, &Phantom).await.unwrap_err();
        assert!(matches!(err, ProviderError::Conflict(_)), "{:?}", err);
    }
}
