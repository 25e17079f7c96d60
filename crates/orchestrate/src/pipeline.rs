//! Top-level commands: phase sequencing, report assembly, and artifact writes.
//!
//! Phases run one after another; within a phase, targets fan out. Nothing is
//! written to the output directory in a dry run.

use foundation_core::{
    naming, AccountMap, AccountSummary, ActionRecord, ActionStatus, BootstrapReport, CheckResult,
    DestroyReport, Phase, RoleDefinition, RolePurpose, MANAGEMENT,
};

use crate::artifacts::ArtifactStore;
use crate::backend::{plan_backends, provision_backends, BackendOutcome};
use crate::context::RunContext;
use crate::destroy::{destroy_foundation, DestroyOptions};
use crate::error::OrchestrationError;
use crate::identity::{plan_roles, provision_identity, IdentityOutcome};
use crate::organization::bootstrap_organization;
use crate::policy_update::{update_role_policies, PolicyUpdateOptions, RoleUpdate};
use crate::verify::verify_foundation;

#[derive(Debug, Clone, Copy, Default)]
pub struct FoundationOptions {
    pub skip_verification: bool,
}

fn store(ctx: &RunContext<'_>) -> ArtifactStore {
    ArtifactStore::new(&ctx.config.output_dir)
}

/// The persisted account map, which must at least know the management account.
fn recorded_accounts(store: &ArtifactStore) -> Result<AccountMap, OrchestrationError> {
    let accounts = store.load_accounts()?;
    if accounts.management().is_none() {
        return Err(OrchestrationError::NoAccounts(store.accounts_path()));
    }
    Ok(accounts)
}

// ── bootstrap-organization ───────────────────────────────────────────────────

pub async fn run_bootstrap_organization(
    ctx: &RunContext<'_>,
) -> Result<BootstrapReport, OrchestrationError> {
    let mut report = BootstrapReport::new(ctx.project(), ctx.dry_run());
    tracing::info!(phase = %Phase::Organization, provider = ctx.provider.name(), "phase started");
    let accounts = bootstrap_organization(ctx, &mut report).await?;
    report.finish();

    let store = store(ctx);
    if ctx.dry_run() {
        tracing::info!(path = %store.accounts_path().display(), dry_run = true, "would write account map");
    } else {
        let merged = store.merge_accounts(&accounts)?;
        tracing::info!(path = %store.accounts_path().display(), accounts = merged.len(), "account map written");
        store.write_bootstrap_report(&report)?;
    }
    Ok(report)
}

// ── bootstrap-foundation ─────────────────────────────────────────────────────

pub async fn run_bootstrap_foundation(
    ctx: &RunContext<'_>,
    options: FoundationOptions,
) -> Result<BootstrapReport, OrchestrationError> {
    let store = store(ctx);
    let accounts = recorded_accounts(&store)?;
    let mut report = BootstrapReport::new(ctx.project(), ctx.dry_run());

    // Rendered up front: a template defect stops the run before any call.
    let roles = plan_roles(ctx.config, &accounts)?;

    for env in ctx.config.environments() {
        if accounts.get(env).is_none() {
            tracing::error!(env, "no account recorded");
            report.record(ActionRecord::new(
                Phase::Identity,
                env,
                "account",
                ActionStatus::Failed {
                    reason: "no account ID recorded; run bootstrap-organization".to_string(),
                },
            ));
        }
    }

    tracing::info!(phase = %Phase::Identity, provider = ctx.provider.name(), "phase started");
    let identity = provision_identity(ctx, &accounts, &roles).await;
    for outcome in &identity {
        for action in &outcome.actions {
            report.record(action.clone());
        }
    }

    tracing::info!(phase = %Phase::Backend, "phase started");
    let backends = plan_backends(ctx.config, &accounts);
    let backend_outcomes = provision_backends(ctx, &backends).await;
    for outcome in &backend_outcomes {
        for action in &outcome.actions {
            report.record(action.clone());
        }
    }

    report.accounts = summarize(ctx, &accounts, &roles, &identity, &backend_outcomes);

    if options.skip_verification {
        report
            .checks
            .push(CheckResult::skipped(MANAGEMENT, "verification", "skipped on request"));
    } else if ctx.dry_run() {
        report.checks.push(CheckResult::skipped(
            MANAGEMENT,
            "verification",
            "dry run: planned resources do not exist yet",
        ));
    } else {
        tracing::info!(phase = %Phase::Verification, "phase started");
        report.checks = verify_foundation(ctx, &accounts, &roles, &backends).await;
    }
    report.finish();

    if ctx.dry_run() {
        for outcome in &backend_outcomes {
            tracing::info!(
                path = %store.backend_path(&outcome.identifiers.environment).display(),
                dry_run = true,
                "would write backend configuration"
            );
        }
        return Ok(report);
    }
    for outcome in backend_outcomes.iter().filter(|o| o.failure.is_none()) {
        let path = store.write_backend(&outcome.identifiers, outcome.kms_key_arn.as_deref())?;
        tracing::info!(env = %outcome.identifiers.environment, path = %path.display(), "backend configuration written");
    }
    store.write_console_links(&ctx.config.project.full_name, &report.accounts)?;
    store.write_bootstrap_report(&report)?;
    Ok(report)
}

fn summarize(
    ctx: &RunContext<'_>,
    accounts: &AccountMap,
    roles: &[RoleDefinition],
    identity: &[IdentityOutcome],
    backends: &[BackendOutcome],
) -> Vec<AccountSummary> {
    let mut environments = vec![MANAGEMENT];
    environments.extend(ctx.config.environments());

    environments
        .into_iter()
        .map(|env| {
            let account_id = accounts.get(env).cloned();
            let id_outcome = identity.iter().find(|o| o.environment == env);
            let backend = backends
                .iter()
                .find(|b| b.identifiers.environment == env && b.failure.is_none())
                .map(|b| b.identifiers.clone());
            let failure = id_outcome
                .and_then(|o| o.failure.clone())
                .or_else(|| {
                    backends
                        .iter()
                        .find(|b| b.identifiers.environment == env)
                        .and_then(|b| b.failure.clone())
                })
                .or_else(|| account_id.is_none().then(|| "no account ID recorded".to_string()));
            let console_link = account_id.as_ref().and_then(|id| {
                roles
                    .iter()
                    .find(|r| r.environment == env && r.purpose == RolePurpose::ReadOnly)
                    .map(|r| {
                        naming::console_link(
                            id,
                            &r.name,
                            &format!("{} {}", ctx.config.project.full_name, env),
                        )
                    })
            });
            AccountSummary {
                environment: env.to_string(),
                account_id,
                roles: id_outcome.map(|o| o.roles.clone()).unwrap_or_default(),
                backend,
                console_link,
                failure,
            }
        })
        .collect()
}

// ── verify ───────────────────────────────────────────────────────────────────

/// Run the Verification Engine alone against the persisted account map.
pub async fn run_verify(ctx: &RunContext<'_>) -> Result<BootstrapReport, OrchestrationError> {
    let accounts = recorded_accounts(&store(ctx))?;
    let roles = plan_roles(ctx.config, &accounts)?;
    let backends = plan_backends(ctx.config, &accounts);
    let mut report = BootstrapReport::new(ctx.project(), ctx.dry_run());
    tracing::info!(phase = %Phase::Verification, provider = ctx.provider.name(), "phase started");
    report.checks = verify_foundation(ctx, &accounts, &roles, &backends).await;
    report.finish();
    Ok(report)
}

// ── destroy-foundation ───────────────────────────────────────────────────────

pub async fn run_destroy(
    ctx: &RunContext<'_>,
    options: &DestroyOptions,
) -> Result<DestroyReport, OrchestrationError> {
    let store = store(ctx);
    let accounts = recorded_accounts(&store)?;
    let mut report = DestroyReport::new(ctx.project(), options.scope.as_str(), ctx.dry_run());
    tracing::info!(phase = %Phase::Destroy, scope = options.scope.as_str(), "phase started");
    let outcome = destroy_foundation(ctx, &accounts, options, &mut report).await?;
    report.finish();

    if ctx.dry_run() {
        return Ok(report);
    }
    for env in &outcome.removed_backends {
        store.remove_backend(env)?;
    }
    if !outcome.closed_accounts.is_empty() {
        store.forget_accounts(&outcome.closed_accounts)?;
    }
    store.write_destroy_report(&report)?;
    tracing::info!(removed = report.removed(), failed = report.failures().count(), "destroy finished");
    Ok(report)
}

// ── update-role-policy ───────────────────────────────────────────────────────

pub async fn run_policy_update(
    ctx: &RunContext<'_>,
    options: &PolicyUpdateOptions,
) -> Result<Vec<RoleUpdate>, OrchestrationError> {
    let accounts = recorded_accounts(&store(ctx))?;
    let roles = plan_roles(ctx.config, &accounts)?;
    tracing::info!(phase = %Phase::PolicyUpdate, roles = %options.selector, "phase started");
    update_role_policies(ctx, &roles, options).await
}
