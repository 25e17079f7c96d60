//! Organization Manager: organization root, unit hierarchy, member accounts.
//!
//! Accounts are independent of one another. Each is reconciled in its own
//! future and a failure (a rejected creation request, a poll that never
//! settles) is recorded against that environment only.

use std::collections::BTreeMap;

use async_trait::async_trait;
use foundation_core::{
    naming, AccountConfig, AccountId, AccountMap, AccountSummary, ActionRecord, ActionStatus,
    BootstrapReport, Phase, MANAGEMENT,
};
use foundation_provider::{
    AccountRecord, CloudProvider, CreationState, Organization, OrganizationalUnit, ProviderError,
};
use futures::future::join_all;

use crate::context::RunContext;
use crate::ensure::{ensure, Ensured, Resource};
use crate::error::OrchestrationError;
use crate::retry::{poll_until, retry_transient};

// ── Resources ────────────────────────────────────────────────────────────────

pub(crate) struct OrganizationResource;

#[async_trait]
impl Resource for OrganizationResource {
    type Record = Organization;

    fn label(&self) -> String {
        "organization".to_string()
    }

    async fn lookup(&self, provider: &dyn CloudProvider) -> Result<Option<Organization>, ProviderError> {
        provider.describe_organization().await
    }

    async fn create(&self, provider: &dyn CloudProvider) -> Result<Organization, ProviderError> {
        provider.create_organization().await
    }

    async fn delete(&self, _: &dyn CloudProvider, _: &Organization) -> Result<(), ProviderError> {
        Err(ProviderError::Validation(
            "the organization itself is never deleted".to_string(),
        ))
    }
}

pub(crate) struct UnitResource {
    pub parent_id: String,
    pub name: String,
}

#[async_trait]
impl Resource for UnitResource {
    type Record = OrganizationalUnit;

    fn label(&self) -> String {
        format!("organizational unit {}", self.name)
    }

    async fn lookup(
        &self,
        provider: &dyn CloudProvider,
    ) -> Result<Option<OrganizationalUnit>, ProviderError> {
        let units = provider.list_organizational_units(&self.parent_id).await?;
        Ok(units.into_iter().find(|u| u.name == self.name))
    }

    async fn create(&self, provider: &dyn CloudProvider) -> Result<OrganizationalUnit, ProviderError> {
        provider
            .create_organizational_unit(&self.parent_id, &self.name)
            .await
    }

    async fn delete(
        &self,
        provider: &dyn CloudProvider,
        unit: &OrganizationalUnit,
    ) -> Result<(), ProviderError> {
        provider.delete_organizational_unit(&unit.id).await
    }
}

// ── Phase ────────────────────────────────────────────────────────────────────

/// Where an account's unit stands after the hierarchy pass.
#[derive(Debug, Clone)]
enum UnitState {
    Ready(String),
    Planned,
    Failed(String),
}

struct AccountResult {
    environment: String,
    account_id: Option<AccountId>,
    actions: Vec<ActionRecord>,
    failure: Option<String>,
}

/// Ensure the organization, its unit hierarchy, and every configured member
/// account. Returns the account map of this run (management included).
///
/// Only a failure to establish the organization itself is fatal; everything
/// below it is recorded per environment in `report`.
pub async fn bootstrap_organization(
    ctx: &RunContext<'_>,
    report: &mut BootstrapReport,
) -> Result<AccountMap, OrchestrationError> {
    let org = ensure(ctx, MANAGEMENT, &OrganizationResource)
        .await
        .map_err(|e| OrchestrationError::provider("ensuring the organization", e))?;
    report.record(ActionRecord::new(
        Phase::Organization,
        MANAGEMENT,
        "organization",
        org.status(),
    ));

    let mut accounts = AccountMap::new();
    let org = match org.into_record() {
        Some(org) => org,
        None => {
            // Dry run against an account that has no organization yet.
            if let Some(id) = &ctx.config.organization.management_account_id {
                accounts.insert(MANAGEMENT, id.clone());
            }
            plan_without_organization(ctx, report);
            return Ok(accounts);
        }
    };

    if let Some(configured) = &ctx.config.organization.management_account_id {
        if *configured != org.management_account_id {
            return Err(OrchestrationError::Precondition(format!(
                "organization.management_account_id is {} but the organization is managed by {}",
                configured, org.management_account_id
            )));
        }
    }
    accounts.insert(MANAGEMENT, org.management_account_id.clone());
    tracing::info!(account = %org.management_account_id, organization = %org.id, "organization ready");

    let units = ensure_units(ctx, &org, report).await;

    let provider = ctx.provider;
    let existing = retry_transient(ctx.clock, &ctx.config.retry, "listing accounts", move || {
        provider.list_accounts()
    })
    .await
    .map_err(|e| OrchestrationError::provider("listing member accounts", e))?;

    let results = join_all(ctx.config.accounts.iter().map(|account| {
        let unit = units
            .get(&account.unit)
            .cloned()
            .unwrap_or_else(|| UnitState::Failed(format!("unit {} was not reconciled", account.unit)));
        reconcile_account(ctx, account, &existing, unit)
    }))
    .await;

    for result in results {
        if let Some(id) = &result.account_id {
            accounts.insert(result.environment.clone(), id.clone());
        }
        if let Some(reason) = &result.failure {
            tracing::error!(env = %result.environment, reason = %reason, "account not ready");
        }
        for action in result.actions {
            report.record(action);
        }
        report.accounts.push(AccountSummary {
            environment: result.environment,
            account_id: result.account_id,
            roles: Vec::new(),
            backend: None,
            console_link: None,
            failure: result.failure,
        });
    }
    Ok(accounts)
}

fn plan_without_organization(ctx: &RunContext<'_>, report: &mut BootstrapReport) {
    let mut planned_units: Vec<&str> = ctx.config.accounts.iter().map(|a| a.unit.as_str()).collect();
    planned_units.sort_unstable();
    planned_units.dedup();
    for unit in planned_units {
        report.record(ActionRecord::new(
            Phase::Organization,
            MANAGEMENT,
            format!("organizational unit {}", unit),
            ActionStatus::Planned,
        ));
    }
    for account in &ctx.config.accounts {
        let status = if account.adopted_id.is_some() {
            ActionStatus::Skipped {
                reason: "adopted account is validated once the organization exists".to_string(),
            }
        } else {
            ActionStatus::Planned
        };
        report.record(ActionRecord::new(
            Phase::Organization,
            &account.environment,
            account_label(ctx, account),
            status,
        ));
        report.accounts.push(AccountSummary {
            environment: account.environment.clone(),
            account_id: account.adopted_id.clone(),
            roles: Vec::new(),
            backend: None,
            console_link: None,
            failure: None,
        });
    }
}

/// Walk every configured unit path from the root, creating missing units.
async fn ensure_units(
    ctx: &RunContext<'_>,
    org: &Organization,
    report: &mut BootstrapReport,
) -> BTreeMap<String, UnitState> {
    let mut resolved: BTreeMap<String, UnitState> = BTreeMap::new();
    let mut paths: Vec<&AccountConfig> = ctx.config.accounts.iter().collect();
    paths.sort_by(|a, b| a.unit.cmp(&b.unit));

    for account in paths {
        if resolved.contains_key(&account.unit) {
            continue;
        }
        let mut parent = UnitState::Ready(org.root_id.clone());
        let mut prefix = String::new();
        for segment in account.unit_segments() {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if let Some(known) = resolved.get(&prefix) {
                parent = known.clone();
                continue;
            }
            let state = match &parent {
                UnitState::Ready(parent_id) => {
                    let unit = UnitResource {
                        parent_id: parent_id.clone(),
                        name: segment.to_string(),
                    };
                    let label = unit.label();
                    match ensure(ctx, MANAGEMENT, &unit).await {
                        Ok(ensured) => {
                            report.record(ActionRecord::new(
                                Phase::Organization,
                                MANAGEMENT,
                                &label,
                                ensured.status(),
                            ));
                            match ensured {
                                Ensured::Existing(u) | Ensured::Created(u) => UnitState::Ready(u.id),
                                Ensured::Planned => UnitState::Planned,
                            }
                        }
                        Err(e) => {
                            tracing::error!(resource = %label, error = %e, "unit not ready");
                            let reason = format!("{}: {}", label, e);
                            report.record(ActionRecord::new(
                                Phase::Organization,
                                MANAGEMENT,
                                &label,
                                ActionStatus::Failed {
                                    reason: e.to_string(),
                                },
                            ));
                            UnitState::Failed(reason)
                        }
                    }
                }
                UnitState::Planned => {
                    report.record(ActionRecord::new(
                        Phase::Organization,
                        MANAGEMENT,
                        format!("organizational unit {}", segment),
                        ActionStatus::Planned,
                    ));
                    UnitState::Planned
                }
                UnitState::Failed(reason) => UnitState::Failed(reason.clone()),
            };
            resolved.insert(prefix.clone(), state.clone());
            parent = state;
        }
    }
    resolved
}

/// Walk a `/`-separated unit path from the root without creating anything.
/// `None` when any segment is missing.
pub(crate) async fn resolve_unit_path(
    ctx: &RunContext<'_>,
    root_id: &str,
    path: &str,
) -> Result<Option<String>, ProviderError> {
    let provider = ctx.provider;
    let mut parent = root_id.to_string();
    for segment in path.split('/') {
        let parent_id = parent.as_str();
        let units = retry_transient(ctx.clock, &ctx.config.retry, "listing units", move || {
            provider.list_organizational_units(parent_id)
        })
        .await?;
        match units.into_iter().find(|u| u.name == segment) {
            Some(unit) => parent = unit.id,
            None => return Ok(None),
        }
    }
    Ok(Some(parent))
}

fn account_label(ctx: &RunContext<'_>, account: &AccountConfig) -> String {
    format!(
        "account {}",
        naming::account_name(&ctx.config.project.full_name, &account.environment)
    )
}

async fn reconcile_account(
    ctx: &RunContext<'_>,
    account: &AccountConfig,
    existing: &[AccountRecord],
    unit: UnitState,
) -> AccountResult {
    let env = account.environment.as_str();
    let label = account_label(ctx, account);
    let mut result = AccountResult {
        environment: env.to_string(),
        account_id: None,
        actions: Vec::new(),
        failure: None,
    };

    let (id, status) = match resolve_account(ctx, account, existing).await {
        Ok(resolved) => resolved,
        Err(reason) => {
            result.actions.push(ActionRecord::new(
                Phase::Organization,
                env,
                &label,
                ActionStatus::Failed {
                    reason: reason.clone(),
                },
            ));
            result.failure = Some(reason);
            return result;
        }
    };
    result
        .actions
        .push(ActionRecord::new(Phase::Organization, env, &label, status));
    let Some(id) = id else {
        return result;
    };
    result.account_id = Some(id.clone());

    let placement = place_account(ctx, &id, &account.unit, unit).await;
    let failure = match &placement {
        ActionStatus::Failed { reason } => Some(reason.clone()),
        _ => None,
    };
    result.actions.push(ActionRecord::new(
        Phase::Organization,
        env,
        format!("{} placement in {}", label, account.unit),
        placement,
    ));
    result.failure = failure;
    result
}

/// Adopt, reuse, or create the account. `Ok((None, Planned))` in dry runs.
async fn resolve_account(
    ctx: &RunContext<'_>,
    account: &AccountConfig,
    existing: &[AccountRecord],
) -> Result<(Option<AccountId>, ActionStatus), String> {
    if let Some(adopted) = &account.adopted_id {
        let record = existing
            .iter()
            .find(|a| a.id == *adopted)
            .ok_or_else(|| format!("adopted account {} is not a member of the organization", adopted))?;
        if !record.status.is_usable() {
            return Err(format!("adopted account {} is {}", adopted, record.status));
        }
        tracing::info!(env = %account.environment, account = %adopted, "adopted existing account");
        return Ok((Some(adopted.clone()), ActionStatus::Existing));
    }

    let name = naming::account_name(&ctx.config.project.full_name, &account.environment);
    let email = account
        .email
        .as_deref()
        .ok_or_else(|| "no contact email configured".to_string())?;

    if let Some(record) = existing
        .iter()
        .find(|a| a.email.eq_ignore_ascii_case(email) || a.name == name)
    {
        if !record.status.is_usable() {
            return Err(format!("account {} exists but is {}", record.id, record.status));
        }
        tracing::debug!(env = %account.environment, account = %record.id, "reusing existing account");
        return Ok((Some(record.id.clone()), ActionStatus::Existing));
    }

    if ctx.dry_run() {
        tracing::info!(env = %account.environment, account_name = %name, dry_run = true, "would create account");
        return Ok((None, ActionStatus::Planned));
    }

    let provider = ctx.provider;
    let (name_ref, email_ref) = (name.as_str(), email);
    let request_id = retry_transient(ctx.clock, &ctx.config.retry, &name, move || {
        provider.create_account(name_ref, email_ref)
    })
    .await
    .map_err(|e| format!("creation request rejected: {}", e))?;
    tracing::info!(env = %account.environment, request = %request_id, "account creation requested");

    let request = request_id.as_str();
    let status = poll_until(
        ctx.clock,
        &ctx.config.polling,
        &format!("account creation for {}", account.environment),
        move || async move {
            let status = provider.describe_create_account_status(request).await?;
            Ok::<_, ProviderError>((status.state != CreationState::InProgress).then_some(status))
        },
    )
    .await
    .map_err(|e| e.to_string())?;

    match (status.state, status.account_id) {
        (CreationState::Succeeded, Some(id)) => {
            tracing::info!(env = %account.environment, account = %id, "account created");
            Ok((Some(id), ActionStatus::Created))
        }
        (_, _) => Err(format!(
            "creation failed: {}",
            status
                .failure_reason
                .unwrap_or_else(|| "no reason given".to_string())
        )),
    }
}

/// Move the account under its configured unit unless it is already there.
async fn place_account(
    ctx: &RunContext<'_>,
    id: &AccountId,
    unit_path: &str,
    unit: UnitState,
) -> ActionStatus {
    let unit_id = match unit {
        UnitState::Ready(unit_id) => unit_id,
        UnitState::Planned => return ActionStatus::Planned,
        UnitState::Failed(reason) => return ActionStatus::Failed { reason },
    };
    let provider = ctx.provider;
    let parent = match retry_transient(ctx.clock, &ctx.config.retry, "listing parent", move || {
        provider.list_parent(id)
    })
    .await
    {
        Ok(parent) => parent,
        Err(e) => {
            return ActionStatus::Failed {
                reason: format!("looking up parent: {}", e),
            }
        }
    };
    if parent == unit_id {
        return ActionStatus::Existing;
    }
    if ctx.dry_run() {
        tracing::info!(account = %id, unit = unit_path, dry_run = true, "would move account");
        return ActionStatus::Planned;
    }
    let (source, destination) = (parent.as_str(), unit_id.as_str());
    match retry_transient(ctx.clock, &ctx.config.retry, "moving account", move || {
        provider.move_account(id, source, destination)
    })
    .await
    {
        Ok(()) => {
            tracing::info!(account = %id, unit = unit_path, "moved account");
            ActionStatus::Updated
        }
        Err(e) => ActionStatus::Failed {
            reason: format!("moving into {}: {}", unit_path, e),
        },
    }
}
