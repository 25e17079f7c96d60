//! Identity & Trust Provisioner: the federated identity provider and the
//! roles of every account.
//!
//! Every role document is rendered by [`plan_roles`] before the first provider
//! call, so a template defect stops the run while nothing has been touched.

use async_trait::async_trait;
use foundation_core::{
    naming, render_role, AccountId, AccountMap, ActionRecord, ActionStatus, Config, Phase,
    RoleDefinition, RolePurpose, TemplateError, MANAGEMENT,
};
use foundation_provider::{
    CloudProvider, OidcProvider, OidcProviderSpec, ProviderError, RoleRecord, RoleSpec,
};
use futures::future::join_all;

use crate::context::RunContext;
use crate::ensure::{ensure, Ensured, Resource};
use crate::retry::retry_transient;

// ── Resources ────────────────────────────────────────────────────────────────

pub(crate) fn oidc_spec() -> OidcProviderSpec {
    OidcProviderSpec {
        url: naming::OIDC_ISSUER_URL.to_string(),
        audiences: vec![naming::OIDC_AUDIENCE.to_string()],
        thumbprints: naming::OIDC_THUMBPRINTS
            .iter()
            .map(|t| t.to_string())
            .collect(),
    }
}

pub(crate) struct OidcResource {
    pub account: AccountId,
    pub spec: OidcProviderSpec,
}

impl OidcResource {
    pub fn new(account: &AccountId) -> Self {
        OidcResource {
            account: account.clone(),
            spec: oidc_spec(),
        }
    }
}

#[async_trait]
impl Resource for OidcResource {
    type Record = OidcProvider;

    fn label(&self) -> String {
        format!("identity provider {}", self.spec.url)
    }

    async fn lookup(&self, provider: &dyn CloudProvider) -> Result<Option<OidcProvider>, ProviderError> {
        provider.get_oidc_provider(&self.account, &self.spec.url).await
    }

    async fn create(&self, provider: &dyn CloudProvider) -> Result<OidcProvider, ProviderError> {
        provider.create_oidc_provider(&self.account, &self.spec).await
    }

    async fn delete(
        &self,
        provider: &dyn CloudProvider,
        record: &OidcProvider,
    ) -> Result<(), ProviderError> {
        provider.delete_oidc_provider(&self.account, &record.arn).await
    }
}

/// A role identified by name. `definition` is only needed to create it.
pub(crate) struct RoleResource<'a> {
    pub definition: &'a RoleDefinition,
}

#[async_trait]
impl<'a> Resource for RoleResource<'a> {
    type Record = RoleRecord;

    fn label(&self) -> String {
        format!("role {}", self.definition.name)
    }

    async fn lookup(&self, provider: &dyn CloudProvider) -> Result<Option<RoleRecord>, ProviderError> {
        provider
            .get_role(&self.definition.account_id, &self.definition.name)
            .await
    }

    async fn create(&self, provider: &dyn CloudProvider) -> Result<RoleRecord, ProviderError> {
        let def = self.definition;
        let record = provider
            .create_role(
                &def.account_id,
                &RoleSpec {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    trust_policy: def.trust.pretty(),
                },
            )
            .await?;
        provider
            .put_role_policy(
                &def.account_id,
                &def.name,
                &def.policy_name,
                &def.permission.pretty(),
            )
            .await?;
        Ok(record)
    }

    /// Inline policies first: a role cannot be deleted while any remain.
    async fn delete(&self, provider: &dyn CloudProvider, _: &RoleRecord) -> Result<(), ProviderError> {
        let account = &self.definition.account_id;
        let role = &self.definition.name;
        for policy in provider.list_role_policies(account, role).await? {
            provider.delete_role_policy(account, role, &policy).await?;
        }
        provider.delete_role(account, role).await
    }
}

// ── Planning ─────────────────────────────────────────────────────────────────

/// The roles one account carries.
pub fn purposes_for(environment: &str) -> &'static [RolePurpose] {
    if environment == MANAGEMENT {
        &[RolePurpose::CentralBootstrap]
    } else {
        &[RolePurpose::Deployment, RolePurpose::ReadOnly]
    }
}

/// Render every role for every known account of a configured environment
/// (plus the management account).
pub fn plan_roles(config: &Config, accounts: &AccountMap) -> Result<Vec<RoleDefinition>, TemplateError> {
    let Some(management) = accounts.management() else {
        return Ok(Vec::new());
    };
    let mut roles = Vec::new();
    for (environment, account_id) in targets(config, accounts) {
        for purpose in purposes_for(environment) {
            roles.push(render_role(
                config,
                *purpose,
                environment,
                account_id,
                management,
            )?);
        }
    }
    Ok(roles)
}

/// `(environment, account)` pairs in scope: the management account followed
/// by every configured environment that has a recorded account.
pub fn targets<'a>(config: &'a Config, accounts: &'a AccountMap) -> Vec<(&'a str, &'a AccountId)> {
    let mut out = Vec::new();
    if let Some(management) = accounts.management() {
        out.push((MANAGEMENT, management));
    }
    for env in config.environments() {
        if let Some(id) = accounts.get(env) {
            out.push((env, id));
        }
    }
    out
}

// ── Phase ────────────────────────────────────────────────────────────────────

/// What the identity phase achieved in one account.
#[derive(Debug, Clone)]
pub struct IdentityOutcome {
    pub environment: String,
    pub account_id: AccountId,
    /// Roles that exist in the desired shape (or would, in a dry run).
    pub roles: Vec<String>,
    pub actions: Vec<ActionRecord>,
    pub failure: Option<String>,
}

/// Ensure the identity provider and roles in every target account,
/// concurrently across accounts.
pub async fn provision_identity(
    ctx: &RunContext<'_>,
    accounts: &AccountMap,
    roles: &[RoleDefinition],
) -> Vec<IdentityOutcome> {
    let futures = targets(ctx.config, accounts)
        .into_iter()
        .map(|(env, id)| {
            let account_roles: Vec<&RoleDefinition> =
                roles.iter().filter(|r| r.environment == env).collect();
            provision_account(ctx, env, id, account_roles)
        });
    join_all(futures).await
}

async fn provision_account(
    ctx: &RunContext<'_>,
    environment: &str,
    account_id: &AccountId,
    roles: Vec<&RoleDefinition>,
) -> IdentityOutcome {
    let mut outcome = IdentityOutcome {
        environment: environment.to_string(),
        account_id: account_id.clone(),
        roles: Vec::new(),
        actions: Vec::new(),
        failure: None,
    };

    let oidc = OidcResource::new(account_id);
    let label = oidc.label();
    let oidc_ready = match ensure_oidc(ctx, environment, &oidc).await {
        Ok(status) => {
            outcome.push(&label, status);
            true
        }
        Err(e) => {
            outcome.fail(&label, e);
            false
        }
    };

    for role in roles {
        let label = format!("role {}", role.name);
        if !oidc_ready && role.purpose.is_federated() {
            // Trusting a missing provider would leave the role unassumable.
            outcome.push(
                &label,
                ActionStatus::Skipped {
                    reason: "identity provider not ready".to_string(),
                },
            );
            continue;
        }
        match ensure_role(ctx, environment, role).await {
            Ok(actions) => {
                for (resource, status) in actions {
                    outcome.push(&resource, status);
                }
                outcome.roles.push(role.name.clone());
            }
            Err(e) => outcome.fail(&label, e),
        }
    }
    outcome
}

impl IdentityOutcome {
    fn push(&mut self, resource: &str, status: ActionStatus) {
        self.actions.push(ActionRecord::new(
            Phase::Identity,
            &self.environment,
            resource,
            status,
        ));
    }

    fn fail(&mut self, resource: &str, error: ProviderError) {
        tracing::error!(env = %self.environment, account = %self.account_id, resource, error = %error, "failed");
        let reason = error.to_string();
        if self.failure.is_none() {
            self.failure = Some(format!("{}: {}", resource, reason));
        }
        self.push(resource, ActionStatus::Failed { reason });
    }
}

/// Ensure the provider exists and trusts the CI audience and thumbprints.
async fn ensure_oidc(
    ctx: &RunContext<'_>,
    environment: &str,
    oidc: &OidcResource,
) -> Result<ActionStatus, ProviderError> {
    let ensured = ensure(ctx, environment, oidc).await?;
    let Ensured::Existing(existing) = &ensured else {
        return Ok(ensured.status());
    };
    if existing.satisfies(&oidc.spec) {
        return Ok(ActionStatus::Existing);
    }
    tracing::warn!(env = environment, arn = %existing.arn, "identity provider configuration drifted");
    if ctx.dry_run() {
        return Ok(ActionStatus::Planned);
    }
    let provider = ctx.provider;
    let (account, arn, spec) = (&oidc.account, existing.arn.as_str(), &oidc.spec);
    retry_transient(ctx.clock, &ctx.config.retry, "updating identity provider", move || {
        provider.update_oidc_provider(account, arn, spec)
    })
    .await?;
    Ok(ActionStatus::Updated)
}

/// Ensure one role, then converge its trust and permission documents.
///
/// Returns one `(resource, status)` entry for the role and one for each
/// document that was checked.
pub(crate) async fn ensure_role(
    ctx: &RunContext<'_>,
    environment: &str,
    role: &RoleDefinition,
) -> Result<Vec<(String, ActionStatus)>, ProviderError> {
    let resource = RoleResource { definition: role };
    let label = resource.label();
    let ensured = ensure(ctx, environment, &resource).await?;
    let mut actions = vec![(label, ensured.status())];
    let Ensured::Existing(record) = ensured else {
        // Created with both documents, or planned.
        return Ok(actions);
    };

    let trust_label = format!("trust policy of {}", role.name);
    if role.trust.matches(&record.trust_policy) {
        actions.push((trust_label, ActionStatus::Existing));
    } else {
        tracing::warn!(env = environment, role = %role.name, "trust policy drifted, re-applying");
        let status = if ctx.dry_run() {
            ActionStatus::Planned
        } else {
            let provider = ctx.provider;
            let document = role.trust.pretty();
            let (account, name, doc) = (&role.account_id, role.name.as_str(), document.as_str());
            retry_transient(ctx.clock, &ctx.config.retry, &trust_label, move || {
                provider.update_trust_policy(account, name, doc)
            })
            .await?;
            ActionStatus::Updated
        };
        actions.push((trust_label, status));
    }

    let permission_label = format!("permission policy {}", role.policy_name);
    let status = converge_permission(ctx, role).await?;
    actions.push((permission_label, status));
    Ok(actions)
}

/// Put the rendered permission document if the attached one differs by hash.
pub(crate) async fn converge_permission(
    ctx: &RunContext<'_>,
    role: &RoleDefinition,
) -> Result<ActionStatus, ProviderError> {
    let current = current_permission(ctx, role).await?;
    if current.as_deref().is_some_and(|doc| role.permission.matches(doc)) {
        return Ok(ActionStatus::Existing);
    }
    if ctx.dry_run() {
        tracing::info!(role = %role.name, dry_run = true, "would update permission policy");
        return Ok(ActionStatus::Planned);
    }
    let provider = ctx.provider;
    let document = role.permission.pretty();
    let (account, name, policy, doc) = (
        &role.account_id,
        role.name.as_str(),
        role.policy_name.as_str(),
        document.as_str(),
    );
    retry_transient(ctx.clock, &ctx.config.retry, "putting permission policy", move || {
        provider.put_role_policy(account, name, policy, doc)
    })
    .await?;
    tracing::info!(role = %role.name, policy = %role.policy_name, "permission policy updated");
    Ok(if current.is_some() {
        ActionStatus::Updated
    } else {
        ActionStatus::Created
    })
}

pub(crate) async fn current_permission(
    ctx: &RunContext<'_>,
    role: &RoleDefinition,
) -> Result<Option<String>, ProviderError> {
    let provider = ctx.provider;
    let (account, name, policy) = (
        &role.account_id,
        role.name.as_str(),
        role.policy_name.as_str(),
    );
    retry_transient(ctx.clock, &ctx.config.retry, "reading permission policy", move || {
        provider.get_role_policy(account, name, policy)
    })
    .await
}
