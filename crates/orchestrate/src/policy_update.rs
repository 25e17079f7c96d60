//! Policy Updater: refresh permission documents of already-provisioned roles.
//!
//! Only the permission document is ever written. With `validate_trust` the
//! trust document is compared as well, and drift is reported as a failure
//! for the operator to resolve through a full bootstrap run.

use std::fmt;

use foundation_core::{template, ActionRecord, ActionStatus, Phase, RoleDefinition, MANAGEMENT};
use futures::future::join_all;

use crate::context::RunContext;
use crate::diff::PolicyDiff;
use crate::error::OrchestrationError;
use crate::identity::{converge_permission, current_permission};
use crate::retry::retry_transient;

/// Which roles an update run touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSelector {
    All,
    Management,
    Environment(String),
}

impl RoleSelector {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "all" => RoleSelector::All,
            MANAGEMENT => RoleSelector::Management,
            env => RoleSelector::Environment(env.to_string()),
        }
    }

    pub fn selects(&self, environment: &str) -> bool {
        match self {
            RoleSelector::All => true,
            RoleSelector::Management => environment == MANAGEMENT,
            RoleSelector::Environment(env) => env == environment,
        }
    }
}

impl fmt::Display for RoleSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleSelector::All => f.write_str("all"),
            RoleSelector::Management => f.write_str(MANAGEMENT),
            RoleSelector::Environment(env) => f.write_str(env),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyUpdateOptions {
    pub selector: RoleSelector,
    pub validate_trust: bool,
}

/// Outcome for one role.
#[derive(Debug, Clone)]
pub struct RoleUpdate {
    pub environment: String,
    pub role: String,
    /// Diff of the permission document; `None` when nothing changed.
    pub permission_diff: Option<PolicyDiff>,
    pub permission: ActionStatus,
    /// Trust drift found in `validate_trust` mode.
    pub trust_diff: Option<PolicyDiff>,
    pub trust: Option<ActionStatus>,
}

impl RoleUpdate {
    pub fn failed(&self) -> bool {
        self.permission.is_failure() || self.trust.as_ref().is_some_and(|t| t.is_failure())
    }

    pub fn actions(&self) -> Vec<ActionRecord> {
        let mut out = vec![ActionRecord::new(
            Phase::PolicyUpdate,
            &self.environment,
            format!("permission policy of {}", self.role),
            self.permission.clone(),
        )];
        if let Some(trust) = &self.trust {
            out.push(ActionRecord::new(
                Phase::PolicyUpdate,
                &self.environment,
                format!("trust policy of {}", self.role),
                trust.clone(),
            ));
        }
        out
    }
}

/// Diff and refresh every selected role's permission document.
pub async fn update_role_policies(
    ctx: &RunContext<'_>,
    roles: &[RoleDefinition],
    options: &PolicyUpdateOptions,
) -> Result<Vec<RoleUpdate>, OrchestrationError> {
    let selected: Vec<&RoleDefinition> = roles
        .iter()
        .filter(|r| options.selector.selects(&r.environment))
        .collect();
    if selected.is_empty() {
        return Err(OrchestrationError::Precondition(format!(
            "no provisioned roles match '{}'",
            options.selector
        )));
    }
    Ok(join_all(
        selected
            .into_iter()
            .map(|role| update_role(ctx, role, options.validate_trust)),
    )
    .await)
}

async fn update_role(ctx: &RunContext<'_>, role: &RoleDefinition, validate_trust: bool) -> RoleUpdate {
    let mut update = RoleUpdate {
        environment: role.environment.clone(),
        role: role.name.clone(),
        permission_diff: None,
        permission: ActionStatus::Existing,
        trust_diff: None,
        trust: None,
    };
    let provider = ctx.provider;
    let (account, name) = (&role.account_id, role.name.as_str());
    let record = match retry_transient(ctx.clock, &ctx.config.retry, "reading role", move || {
        provider.get_role(account, name)
    })
    .await
    {
        Ok(Some(record)) => record,
        Ok(None) => {
            update.permission = ActionStatus::Failed {
                reason: "role does not exist; run bootstrap-foundation first".to_string(),
            };
            return update;
        }
        Err(e) => {
            update.permission = ActionStatus::Failed {
                reason: e.to_string(),
            };
            return update;
        }
    };

    if validate_trust {
        if role.trust.matches(&record.trust_policy) {
            update.trust = Some(ActionStatus::Existing);
        } else {
            tracing::error!(env = %role.environment, role = %role.name, "trust policy drifted");
            update.trust_diff = Some(PolicyDiff::compute(
                &format!("trust policy of {}", role.name),
                &normalized(&record.trust_policy),
                &role.trust.pretty(),
            ));
            update.trust = Some(ActionStatus::Failed {
                reason: "trust policy drifted; re-run bootstrap-foundation to re-apply it"
                    .to_string(),
            });
        }
    }

    let current = match current_permission(ctx, role).await {
        Ok(current) => current,
        Err(e) => {
            update.permission = ActionStatus::Failed {
                reason: e.to_string(),
            };
            return update;
        }
    };
    if current.as_deref().is_some_and(|doc| role.permission.matches(doc)) {
        tracing::info!(env = %role.environment, role = %role.name, "permission policy up to date");
        return update;
    }
    update.permission_diff = Some(PolicyDiff::compute(
        &role.policy_name,
        &current.as_deref().map(normalized).unwrap_or_default(),
        &role.permission.pretty(),
    ));
    update.permission = match converge_permission(ctx, role).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(env = %role.environment, role = %role.name, error = %e, "failed");
            ActionStatus::Failed {
                reason: e.to_string(),
            }
        }
    };
    update
}

/// Pretty form of a stored document so diffs line up with rendered output.
fn normalized(raw: &str) -> String {
    template::pretty_document(raw).unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parsing() {
        assert_eq!(RoleSelector::parse("all"), RoleSelector::All);
        assert_eq!(RoleSelector::parse("management"), RoleSelector::Management);
        assert_eq!(
            RoleSelector::parse("dev"),
            RoleSelector::Environment("dev".into())
        );
        assert!(RoleSelector::All.selects("prod"));
        assert!(RoleSelector::Management.selects(MANAGEMENT));
        assert!(!RoleSelector::Management.selects("dev"));
        assert!(!RoleSelector::parse("dev").selects("prod"));
    }

    #[test]
    fn unparseable_documents_are_diffed_verbatim() {
        assert_eq!(normalized("not json"), "not json");
        assert!(normalized("{\"b\":1,\"a\":2}").contains('\n'));
    }
}
