//! Deterministic identifiers.
//!
//! This module is the single source of truth for every name the orchestrator
//! derives. Bootstrap, verification, destroy, and the policy updater all call
//! these functions; none of them re-derive identifiers on their own.

use crate::model::{AccountId, RolePurpose};

/// Issuer URL of the CI system's OIDC tokens.
pub const OIDC_ISSUER_URL: &str = "https://token.actions.githubusercontent.com";

/// Audience CI requests when exchanging its token.
pub const OIDC_AUDIENCE: &str = "sts.amazonaws.com";

/// Certificate thumbprints pinned on the federated identity provider.
pub const OIDC_THUMBPRINTS: &[&str] = &[
    "6938fd4d98bab03faadb97b34396831e3780aea1",
    "1c58a3a8518e8759bf075b76b750d4f2df264fcd",
];

/// Hash key of every lock table (the infrastructure engine's convention).
pub const LOCK_TABLE_HASH_KEY: &str = "LockID";

/// Upper bound on object-store names.
pub const MAX_BUCKET_NAME_LEN: usize = 63;

/// Length of the non-variable part of [`state_bucket`]: `-state-` + `-` + 12 digits.
pub const STATE_BUCKET_FIXED_LEN: usize = "-state-".len() + 1 + 12;

pub fn state_bucket(project: &str, environment: &str, account_id: &AccountId) -> String {
    format!("{}-state-{}-{}", project, environment, account_id)
}

pub fn lock_table(project: &str, environment: &str) -> String {
    format!("{}-locks-{}", project, environment)
}

pub fn key_alias(project: &str, environment: &str) -> String {
    format!("alias/{}-state-{}", project, environment)
}

/// Object key under which the infrastructure engine stores its state.
pub fn state_key(project: &str, environment: &str) -> String {
    format!("{}/{}/terraform.tfstate", project, environment)
}

pub fn role_name(project: &str, purpose: RolePurpose, environment: &str) -> String {
    match purpose {
        RolePurpose::Deployment => format!("{}-deploy-{}", project, environment),
        RolePurpose::ReadOnly => format!("{}-readonly-{}", project, environment),
        RolePurpose::CentralBootstrap => format!("{}-bootstrap-central", project),
    }
}

/// Name of the inline permission policy attached to a role.
pub fn permission_policy_name(role_name: &str) -> String {
    format!("{}-permissions", role_name)
}

pub fn role_arn(account_id: &AccountId, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account_id, role_name)
}

pub fn oidc_provider_arn(account_id: &AccountId) -> String {
    format!(
        "arn:aws:iam::{}:oidc-provider/{}",
        account_id,
        OIDC_ISSUER_URL.trim_start_matches("https://")
    )
}

pub fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{}", bucket)
}

pub fn lock_table_arn(region: &str, account_id: &AccountId, table: &str) -> String {
    format!("arn:aws:dynamodb:{}:{}:table/{}", region, account_id, table)
}

/// Display name of a member account, e.g. `Acme Site (dev)`.
pub fn account_name(project_full_name: &str, environment: &str) -> String {
    format!("{} ({})", project_full_name, environment)
}

/// Fallback contact email when an account has none configured.
pub fn account_email(project: &str, environment: &str, domain: &str) -> String {
    format!("{}-{}@{}", project, environment, domain)
}

/// Switch-role console link for an operator.
pub fn console_link(account_id: &AccountId, role_name: &str, display_name: &str) -> String {
    format!(
        "https://signin.aws.amazon.com/switchrole?roleName={}&account={}&displayName={}",
        urlencoding::encode(role_name),
        account_id,
        urlencoding::encode(display_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct() -> AccountId {
        AccountId::parse("822529998967").unwrap()
    }

    #[test]
    fn state_bucket_matches_reference_scenario() {
        assert_eq!(
            state_bucket("acme-site", "dev", &acct()),
            "acme-site-state-dev-822529998967"
        );
    }

    #[test]
    fn identifiers_are_pure_functions_of_inputs() {
        for env in ["dev", "staging", "prod", "central"] {
            assert_eq!(
                state_bucket("acme-site", env, &acct()),
                state_bucket("acme-site", env, &acct())
            );
            assert_eq!(lock_table("acme-site", env), lock_table("acme-site", env));
            assert_eq!(key_alias("acme-site", env), key_alias("acme-site", env));
        }
        assert_eq!(
            STATE_BUCKET_FIXED_LEN + "acme-site".len() + "dev".len(),
            state_bucket("acme-site", "dev", &acct()).len()
        );
    }

    #[test]
    fn role_names_are_environment_scoped() {
        assert_eq!(
            role_name("acme-site", RolePurpose::Deployment, "dev"),
            "acme-site-deploy-dev"
        );
        assert_eq!(
            role_name("acme-site", RolePurpose::ReadOnly, "prod"),
            "acme-site-readonly-prod"
        );
        assert_eq!(
            role_name("acme-site", RolePurpose::CentralBootstrap, "management"),
            "acme-site-bootstrap-central"
        );
    }

    #[test]
    fn console_link_encodes_display_name() {
        let link = console_link(&acct(), "acme-site-readonly-dev", "Acme Site (dev)");
        assert_eq!(
            link,
            "https://signin.aws.amazon.com/switchrole?roleName=acme-site-readonly-dev\
             &account=822529998967&displayName=Acme%20Site%20%28dev%29"
        );
    }

    #[test]
    fn oidc_provider_arn_strips_scheme() {
        assert_eq!(
            oidc_provider_arn(&acct()),
            "arn:aws:iam::822529998967:oidc-provider/token.actions.githubusercontent.com"
        );
    }
}
