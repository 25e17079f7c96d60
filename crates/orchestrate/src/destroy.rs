//! Destroyer: inverse teardown in strict reverse dependency order.
//!
//! lock table → bucket contents → bucket → key alias and key → roles →
//! identity providers → organizational units → (opt-in) account closure.
//!
//! Every step is best effort. A failure is recorded against its target and
//! the remaining categories are still attempted.

use std::time::Duration;

use foundation_core::{
    AccountId, AccountMap, ActionRecord, ActionStatus, BackendIdentifiers, DestroyReport, Phase,
    RoleDefinition, CENTRAL, MANAGEMENT,
};
use foundation_provider::ProviderError;
use futures::future::join_all;

use crate::backend::{plan_backends, BucketResource, KeyResource, TableResource};
use crate::context::RunContext;
use crate::ensure::{teardown, Resource, TornDown};
use crate::error::OrchestrationError;
use crate::identity::{plan_roles, targets, OidcResource, RoleResource};
use crate::organization::{resolve_unit_path, UnitResource};
use crate::retry::retry_transient;

/// Versions removed per listing while emptying a bucket.
const EMPTY_BATCH: usize = 1000;

/// Default bound on emptying one bucket.
pub const DEFAULT_EMPTY_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyScope {
    All,
    Backends,
    Roles,
    Oidc,
    CentralBucket,
}

impl DestroyScope {
    pub fn as_str(self) -> &'static str {
        match self {
            DestroyScope::All => "all",
            DestroyScope::Backends => "backends",
            DestroyScope::Roles => "roles",
            DestroyScope::Oidc => "oidc",
            DestroyScope::CentralBucket => "central-bucket",
        }
    }

    fn workload_backends(self) -> bool {
        matches!(self, DestroyScope::All | DestroyScope::Backends)
    }

    fn central_backend(self) -> bool {
        matches!(self, DestroyScope::All | DestroyScope::CentralBucket)
    }

    fn roles(self) -> bool {
        matches!(self, DestroyScope::All | DestroyScope::Roles)
    }

    fn oidc(self) -> bool {
        matches!(self, DestroyScope::All | DestroyScope::Oidc)
    }
}

#[derive(Debug, Clone)]
pub struct DestroyOptions {
    pub scope: DestroyScope,
    /// Restrict teardown to these environments (`management` and `central`
    /// included). `None` means every environment.
    pub environments: Option<Vec<String>>,
    /// Close member accounts after teardown. Irreversible for the provider's
    /// post-closure period.
    pub close_accounts: bool,
    pub empty_timeout: Duration,
}

impl DestroyOptions {
    pub fn new(scope: DestroyScope) -> Self {
        DestroyOptions {
            scope,
            environments: None,
            close_accounts: false,
            empty_timeout: DEFAULT_EMPTY_TIMEOUT,
        }
    }

    fn selects(&self, environment: &str) -> bool {
        self.environments
            .as_ref()
            .map_or(true, |envs| envs.iter().any(|e| e == environment))
    }
}

/// What the caller must reflect in the persisted artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyOutcome {
    /// Environments whose backend is gone, so their backend file is stale.
    pub removed_backends: Vec<String>,
    /// Environments whose account was closed.
    pub closed_accounts: Vec<String>,
}

pub async fn destroy_foundation(
    ctx: &RunContext<'_>,
    accounts: &AccountMap,
    options: &DestroyOptions,
    report: &mut DestroyReport,
) -> Result<DestroyOutcome, OrchestrationError> {
    if let Some(envs) = &options.environments {
        for env in envs {
            let known = env == MANAGEMENT || env == CENTRAL || ctx.config.account(env).is_some();
            if !known {
                return Err(OrchestrationError::Precondition(format!(
                    "unknown environment '{}'",
                    env
                )));
            }
        }
    }
    let roles = plan_roles(ctx.config, accounts)?;
    let mut outcome = DestroyOutcome::default();

    // ── backends ──
    let backends: Vec<BackendIdentifiers> = plan_backends(ctx.config, accounts)
        .into_iter()
        .filter(|b| {
            let in_scope = if b.is_central() {
                options.scope.central_backend()
            } else {
                options.scope.workload_backends()
            };
            in_scope && options.selects(&b.environment)
        })
        .collect();
    let results = join_all(backends.iter().map(|b| destroy_backend(ctx, b, options))).await;
    for (backend, actions) in backends.iter().zip(results) {
        let clean = actions.iter().all(|a| !a.status.is_failure());
        for action in actions {
            report.record(action);
        }
        if clean {
            outcome.removed_backends.push(backend.environment.clone());
        }
    }

    // ── identity ──
    let in_scope: Vec<(&str, &AccountId)> = targets(ctx.config, accounts)
        .into_iter()
        .filter(|(env, _)| options.selects(env))
        .collect();
    if options.scope.roles() {
        let selected: Vec<&RoleDefinition> = roles
            .iter()
            .filter(|r| options.selects(&r.environment))
            .collect();
        let results = join_all(selected.iter().map(|role| destroy_role(ctx, role))).await;
        for action in results {
            report.record(action);
        }
    }
    if options.scope.oidc() {
        let results = join_all(in_scope.iter().map(|(env, id)| async move {
            let oidc = OidcResource::new(id);
            let label = oidc.label();
            let status = teardown(ctx, env, &oidc).await;
            record(Phase::Destroy, env, &label, status)
        }))
        .await;
        for action in results {
            report.record(action);
        }
    }

    // ── organization ──
    if options.scope == DestroyScope::All && options.environments.is_none() {
        destroy_units(ctx, report).await;
    }
    if options.close_accounts {
        outcome.closed_accounts = close_accounts(ctx, accounts, options, report).await;
    }
    Ok(outcome)
}

fn record(
    phase: Phase,
    target: &str,
    label: &str,
    result: Result<TornDown, ProviderError>,
) -> ActionRecord {
    let status = match result {
        Ok(done) => done.status(),
        Err(e) => {
            tracing::error!(env = target, resource = label, error = %e, "teardown failed");
            ActionStatus::Failed {
                reason: e.to_string(),
            }
        }
    };
    ActionRecord::new(phase, target, label, status)
}

// ── Backends ─────────────────────────────────────────────────────────────────

async fn destroy_backend(
    ctx: &RunContext<'_>,
    backend: &BackendIdentifiers,
    options: &DestroyOptions,
) -> Vec<ActionRecord> {
    let env = backend.environment.as_str();
    let mut actions = Vec::new();

    let table = TableResource::new(backend);
    actions.push(record(Phase::Destroy, env, &table.label(), teardown(ctx, env, &table).await));

    let bucket = BucketResource::new(backend);
    let contents_label = format!("objects in bucket {}", backend.bucket);
    match empty_bucket(ctx, backend, options.empty_timeout).await {
        Ok(contents) => {
            actions.push(ActionRecord::new(Phase::Destroy, env, contents_label, contents));
            actions.push(record(
                Phase::Destroy,
                env,
                &bucket.label(),
                teardown(ctx, env, &bucket).await,
            ));
        }
        Err(ProviderError::NamingCollision { .. }) => {
            let reason = "bucket name belongs to another tenant".to_string();
            actions.push(ActionRecord::new(
                Phase::Destroy,
                env,
                bucket.label(),
                ActionStatus::Skipped { reason },
            ));
        }
        Err(e) => {
            tracing::error!(env, bucket = %backend.bucket, error = %e, "emptying failed");
            actions.push(ActionRecord::new(
                Phase::Destroy,
                env,
                contents_label,
                ActionStatus::Failed {
                    reason: e.to_string(),
                },
            ));
            actions.push(ActionRecord::new(
                Phase::Destroy,
                env,
                bucket.label(),
                ActionStatus::Skipped {
                    reason: "bucket could not be emptied".to_string(),
                },
            ));
        }
    }

    let key = KeyResource::new(ctx.config, backend);
    actions.push(record(Phase::Destroy, env, &key.label(), teardown(ctx, env, &key).await));
    actions
}

/// Delete every object version and delete marker, batch by batch, until the
/// bucket is empty or `timeout` has passed.
pub async fn empty_bucket(
    ctx: &RunContext<'_>,
    backend: &BackendIdentifiers,
    timeout: Duration,
) -> Result<ActionStatus, ProviderError> {
    let provider = ctx.provider;
    let retry = &ctx.config.retry;
    let (account, bucket) = (&backend.account_id, backend.bucket.as_str());
    let present = retry_transient(ctx.clock, retry, "checking bucket", move || {
        provider.head_bucket(account, bucket)
    })
    .await?;
    if !present {
        return Ok(ActionStatus::Absent);
    }

    let started = ctx.clock.elapsed();
    let mut removed = 0usize;
    loop {
        let batch = retry_transient(ctx.clock, retry, "listing object versions", move || {
            provider.list_object_versions(account, bucket, EMPTY_BATCH)
        })
        .await?;
        if batch.is_empty() {
            break;
        }
        if ctx.dry_run() {
            tracing::info!(bucket, versions = batch.len(), dry_run = true, "would delete object versions");
            return Ok(ActionStatus::Planned);
        }
        for version in &batch {
            if ctx.clock.elapsed().saturating_sub(started) > timeout {
                return Err(ProviderError::Conflict(format!(
                    "timed out after {:?} emptying {} ({} versions removed)",
                    timeout, bucket, removed
                )));
            }
            let (key, version_id) = (version.key.as_str(), version.version_id.as_str());
            let deleted = retry_transient(ctx.clock, retry, "deleting object version", move || {
                provider.delete_object_version(account, bucket, key, version_id)
            })
            .await;
            match deleted {
                Ok(()) | Err(ProviderError::NotFound(_)) => removed += 1,
                Err(e) => return Err(e),
            }
        }
    }
    if removed == 0 {
        return Ok(ActionStatus::Absent);
    }
    tracing::info!(env = %backend.environment, bucket, versions = removed, "bucket emptied");
    Ok(ActionStatus::Removed)
}

// ── Identity ─────────────────────────────────────────────────────────────────

async fn destroy_role(ctx: &RunContext<'_>, role: &RoleDefinition) -> ActionRecord {
    let resource = RoleResource { definition: role };
    let label = resource.label();
    let result = teardown(ctx, &role.environment, &resource).await;
    record(Phase::Destroy, &role.environment, &label, result)
}

// ── Organization ─────────────────────────────────────────────────────────────

/// Remove configured units, deepest first. Units that still hold accounts
/// are left in place.
async fn destroy_units(ctx: &RunContext<'_>, report: &mut DestroyReport) {
    let provider = ctx.provider;
    let retry = &ctx.config.retry;
    let org = match retry_transient(ctx.clock, retry, "describing organization", move || {
        provider.describe_organization()
    })
    .await
    {
        Ok(Some(org)) => org,
        Ok(None) => return,
        Err(e) => {
            report.record(ActionRecord::new(
                Phase::Destroy,
                MANAGEMENT,
                "organizational units",
                ActionStatus::Failed {
                    reason: e.to_string(),
                },
            ));
            return;
        }
    };

    let mut paths: Vec<String> = Vec::new();
    for account in &ctx.config.accounts {
        let mut prefix = String::new();
        for segment in account.unit_segments() {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if !paths.contains(&prefix) {
                paths.push(prefix.clone());
            }
        }
    }
    // Deepest first; siblings in reverse name order for a stable report.
    paths.sort_by(|a, b| {
        let depth = |p: &str| p.matches('/').count();
        depth(b).cmp(&depth(a)).then_with(|| b.cmp(a))
    });

    for path in paths {
        let (parent_path, name) = match path.rsplit_once('/') {
            Some((parent, name)) => (Some(parent), name),
            None => (None, path.as_str()),
        };
        let parent_id = match parent_path {
            None => Some(org.root_id.clone()),
            Some(parent) => match resolve_unit_path(ctx, &org.root_id, parent).await {
                Ok(found) => found,
                Err(e) => {
                    report.record(ActionRecord::new(
                        Phase::Destroy,
                        MANAGEMENT,
                        format!("organizational unit {}", path),
                        ActionStatus::Failed {
                            reason: e.to_string(),
                        },
                    ));
                    continue;
                }
            },
        };
        let label = format!("organizational unit {}", path);
        let Some(parent_id) = parent_id else {
            report.record(ActionRecord::new(Phase::Destroy, MANAGEMENT, label, ActionStatus::Absent));
            continue;
        };
        let unit = UnitResource {
            parent_id,
            name: name.to_string(),
        };
        let action = match teardown(ctx, MANAGEMENT, &unit).await {
            Err(ProviderError::Conflict(_)) => {
                tracing::warn!(unit = %path, "unit still contains accounts; kept");
                ActionRecord::new(
                    Phase::Destroy,
                    MANAGEMENT,
                    label,
                    ActionStatus::Skipped {
                        reason: "still contains accounts or units".to_string(),
                    },
                )
            }
            result => record(Phase::Destroy, MANAGEMENT, &label, result),
        };
        report.record(action);
    }
}

/// Close selected member accounts. The management account is never closed.
async fn close_accounts(
    ctx: &RunContext<'_>,
    accounts: &AccountMap,
    options: &DestroyOptions,
    report: &mut DestroyReport,
) -> Vec<String> {
    let provider = ctx.provider;
    let mut closed = Vec::new();
    for env in ctx.config.environments() {
        if !options.selects(env) {
            continue;
        }
        let Some(id) = accounts.get(env) else {
            report.record(ActionRecord::new(
                Phase::Destroy,
                env,
                "account",
                ActionStatus::Skipped {
                    reason: "no account ID recorded".to_string(),
                },
            ));
            continue;
        };
        let label = format!("account {}", id);
        if ctx.dry_run() {
            tracing::info!(env, account = %id, dry_run = true, "would close account");
            report.record(ActionRecord::new(Phase::Destroy, env, label, ActionStatus::Planned));
            continue;
        }
        let result = retry_transient(ctx.clock, &ctx.config.retry, "closing account", move || {
            provider.close_account(id)
        })
        .await;
        let status = match result {
            Ok(()) => {
                tracing::warn!(env, account = %id, "account closure started; irreversible during the post-closure period");
                closed.push(env.to_string());
                ActionStatus::Removed
            }
            Err(e) => {
                tracing::error!(env, account = %id, error = %e, "closing failed");
                ActionStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };
        report.record(ActionRecord::new(Phase::Destroy, env, label, status));
    }
    closed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_select_categories() {
        assert!(DestroyScope::All.workload_backends() && DestroyScope::All.central_backend());
        assert!(DestroyScope::Backends.workload_backends());
        assert!(!DestroyScope::Backends.central_backend());
        assert!(DestroyScope::CentralBucket.central_backend());
        assert!(!DestroyScope::CentralBucket.roles());
        assert!(DestroyScope::Roles.roles() && !DestroyScope::Roles.oidc());
        assert_eq!(DestroyScope::CentralBucket.as_str(), "central-bucket");
    }

    #[test]
    fn environment_subset() {
        let mut options = DestroyOptions::new(DestroyScope::All);
        assert!(options.selects("dev"));
        options.environments = Some(vec!["dev".into()]);
        assert!(options.selects("dev"));
        assert!(!options.selects("prod"));
        assert!(!options.selects(MANAGEMENT));
    }
}
