//! Built-in role templates and the placeholder set each role is rendered with.

use crate::config::{Config, SubjectScope};
use crate::model::{AccountId, RolePurpose, CENTRAL};
use crate::naming;
use crate::template::{Placeholder, Placeholders, PolicyTemplate, RenderedPolicy, TemplateError};

const CI_TRUST: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Sid": "ContinuousIntegrationFederation",
      "Effect": "Allow",
      "Principal": { "Federated": "{{oidc_provider_arn}}" },
      "Action": "sts:AssumeRoleWithWebIdentity",
      "Condition": {
        "StringEquals": { "token.actions.githubusercontent.com:aud": "sts.amazonaws.com" },
        "StringLike": { "token.actions.githubusercontent.com:sub": "repo:{{repository}}:{{subject_filter}}" }
      }
    }
  ]
}"#;

const READ_ONLY_TRUST: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Sid": "ManagementConsoleAccess",
      "Effect": "Allow",
      "Principal": { "AWS": "arn:aws:iam::{{management_account_id}}:root" },
      "Action": "sts:AssumeRole",
      "Condition": {
        "StringEquals": { "sts:ExternalId": "{{external_id}}" }
      }
    }
  ]
}"#;

const DEPLOYMENT_PERMISSIONS: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Sid": "StateBucket",
      "Effect": "Allow",
      "Action": ["s3:ListBucket", "s3:GetBucketVersioning"],
      "Resource": "arn:aws:s3:::{{state_bucket}}"
    },
    {
      "Sid": "StateObjects",
      "Effect": "Allow",
      "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
      "Resource": "arn:aws:s3:::{{state_bucket}}/*"
    },
    {
      "Sid": "StateLocking",
      "Effect": "Allow",
      "Action": ["dynamodb:DescribeTable", "dynamodb:GetItem", "dynamodb:PutItem", "dynamodb:DeleteItem"],
      "Resource": "arn:aws:dynamodb:{{region}}:{{account_id}}:table/{{lock_table}}"
    },
    {
      "Sid": "StateEncryption",
      "Effect": "Allow",
      "Action": ["kms:Encrypt", "kms:Decrypt", "kms:GenerateDataKey", "kms:DescribeKey"],
      "Resource": "*",
      "Condition": {
        "ForAnyValue:StringEquals": { "kms:ResourceAliases": "alias/{{project}}-state-{{environment}}" }
      }
    },
    {
      "Sid": "SiteWorkloads",
      "Effect": "Allow",
      "Action": ["s3:*", "cloudfront:*", "wafv2:*", "acm:*", "route53:*", "logs:*", "cloudwatch:*"],
      "Resource": "*",
      "Condition": {
        "StringEquals": { "aws:ResourceAccount": "{{account_id}}" }
      }
    }
  ]
}"#;

const READ_ONLY_PERMISSIONS: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Sid": "ReadOnlyInspection",
      "Effect": "Allow",
      "Action": [
        "s3:Get*", "s3:List*",
        "cloudfront:Get*", "cloudfront:List*",
        "cloudwatch:Describe*", "cloudwatch:Get*", "cloudwatch:List*",
        "logs:Describe*", "logs:Get*", "logs:FilterLogEvents"
      ],
      "Resource": "*",
      "Condition": {
        "StringEquals": { "aws:ResourceAccount": "{{account_id}}" }
      }
    }
  ]
}"#;

const CENTRAL_BOOTSTRAP_PERMISSIONS: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Sid": "OrganizationInspection",
      "Effect": "Allow",
      "Action": ["organizations:Describe*", "organizations:List*"],
      "Resource": "*"
    },
    {
      "Sid": "MemberAccountAccess",
      "Effect": "Allow",
      "Action": "sts:AssumeRole",
      "Resource": "arn:aws:iam::*:role/OrganizationAccountAccessRole",
      "Condition": {
        "StringEquals": { "aws:PrincipalAccount": "{{management_account_id}}" }
      }
    },
    {
      "Sid": "CentralState",
      "Effect": "Allow",
      "Action": ["s3:ListBucket", "s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
      "Resource": ["arn:aws:s3:::{{state_bucket}}", "arn:aws:s3:::{{state_bucket}}/*"]
    },
    {
      "Sid": "CentralLocking",
      "Effect": "Allow",
      "Action": ["dynamodb:DescribeTable", "dynamodb:GetItem", "dynamodb:PutItem", "dynamodb:DeleteItem"],
      "Resource": "arn:aws:dynamodb:{{region}}:{{account_id}}:table/{{lock_table}}"
    }
  ]
}"#;

/// The trust and permission templates for one role purpose.
#[derive(Debug, Clone)]
pub struct RoleTemplates {
    pub trust: PolicyTemplate,
    pub permission: PolicyTemplate,
}

impl RoleTemplates {
    /// The built-in templates for `purpose`. Construction validates them, so a
    /// defective template surfaces before any provider call.
    pub fn builtin(purpose: RolePurpose) -> Result<Self, TemplateError> {
        let (trust_name, trust, permission_name, permission) = match purpose {
            RolePurpose::Deployment => (
                "deployment-trust",
                CI_TRUST,
                "deployment-permissions",
                DEPLOYMENT_PERMISSIONS,
            ),
            RolePurpose::ReadOnly => (
                "read-only-trust",
                READ_ONLY_TRUST,
                "read-only-permissions",
                READ_ONLY_PERMISSIONS,
            ),
            RolePurpose::CentralBootstrap => (
                "central-bootstrap-trust",
                CI_TRUST,
                "central-bootstrap-permissions",
                CENTRAL_BOOTSTRAP_PERMISSIONS,
            ),
        };
        Ok(RoleTemplates {
            trust: PolicyTemplate::trust(trust_name, trust)?,
            permission: PolicyTemplate::permission(permission_name, permission)?,
        })
    }
}

/// A role fully resolved for one account: names plus rendered documents.
#[derive(Debug, Clone)]
pub struct RoleDefinition {
    pub purpose: RolePurpose,
    pub environment: String,
    pub account_id: AccountId,
    pub name: String,
    pub policy_name: String,
    pub description: String,
    pub trust: RenderedPolicy,
    pub permission: RenderedPolicy,
    /// Set for roles assumed cross-account from the management account.
    pub external_id: Option<String>,
}

impl RoleDefinition {
    pub fn arn(&self) -> String {
        naming::role_arn(&self.account_id, &self.name)
    }

    /// The CI token subject that must be allowed to assume this role.
    pub fn expected_subject(&self, config: &Config) -> Option<String> {
        if !self.purpose.is_federated() {
            return None;
        }
        Some(match config.project.subject_scope {
            SubjectScope::Repository => {
                format!("repo:{}:ref:refs/heads/main", config.project.repository)
            }
            SubjectScope::Environment => format!(
                "repo:{}:environment:{}",
                config.project.repository, self.environment
            ),
        })
    }
}

/// Resolve and render one role.
///
/// `environment` is the workload environment for deployment/read-only roles
/// and [`crate::MANAGEMENT`] for the central bootstrap role.
pub fn render_role(
    config: &Config,
    purpose: RolePurpose,
    environment: &str,
    account_id: &AccountId,
    management_account_id: &AccountId,
) -> Result<RoleDefinition, TemplateError> {
    let templates = RoleTemplates::builtin(purpose)?;
    let project = &config.project;
    let name = naming::role_name(&project.short_name, purpose, environment);

    // The central role guards the central backend; workload roles their own.
    let backend_env = if purpose == RolePurpose::CentralBootstrap {
        CENTRAL
    } else {
        environment
    };
    let subject_filter = match project.subject_scope {
        SubjectScope::Repository => "*".to_string(),
        SubjectScope::Environment => format!("environment:{}", environment),
    };

    let values = Placeholders::new()
        .with(Placeholder::AccountId, account_id.as_str())
        .with(Placeholder::Repository, project.repository.to_string())
        .with(Placeholder::ExternalId, project.external_id.as_str())
        .with(Placeholder::Project, project.short_name.as_str())
        .with(Placeholder::Environment, backend_env)
        .with(Placeholder::Region, project.region.as_str())
        .with(
            Placeholder::ManagementAccountId,
            management_account_id.as_str(),
        )
        .with(
            Placeholder::OidcProviderArn,
            naming::oidc_provider_arn(account_id),
        )
        .with(Placeholder::SubjectFilter, subject_filter)
        .with(
            Placeholder::StateBucket,
            naming::state_bucket(&project.short_name, backend_env, account_id),
        )
        .with(
            Placeholder::LockTable,
            naming::lock_table(&project.short_name, backend_env),
        );

    Ok(RoleDefinition {
        purpose,
        environment: environment.to_string(),
        account_id: account_id.clone(),
        policy_name: naming::permission_policy_name(&name),
        description: format!(
            "{} role for {} ({})",
            purpose.label(),
            project.full_name,
            environment
        ),
        trust: templates.trust.render(&values)?,
        permission: templates.permission.render(&values)?,
        external_id: (!purpose.is_federated()).then(|| project.external_id.clone()),
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::MANAGEMENT;

    fn config(scope: &str) -> Config {
        Config::from_toml_str(&format!(
            r#"
[project]
short_name = "acme-site"
full_name = "Acme Site"
repository = "acme/acme-site"
enforce_repo_scope = {scope}

[accounts.dev]
email = "aws-dev@acme.example"
"#
        ))
        .unwrap()
    }

    fn ids() -> (AccountId, AccountId) {
        (
            AccountId::parse("822529998967").unwrap(),
            AccountId::parse("111111111111").unwrap(),
        )
    }

    #[test]
    fn builtin_templates_are_valid() {
        for purpose in [
            RolePurpose::Deployment,
            RolePurpose::ReadOnly,
            RolePurpose::CentralBootstrap,
        ] {
            RoleTemplates::builtin(purpose).unwrap();
        }
    }

    #[test]
    fn deployment_role_binds_subject_to_repository() {
        let (dev, mgmt) = ids();
        let role =
            render_role(&config("true"), RolePurpose::Deployment, "dev", &dev, &mgmt).unwrap();
        assert_eq!(role.name, "acme-site-deploy-dev");
        assert_eq!(role.trust.subjects(), vec!["repo:acme/acme-site:*"]);
        assert!(role
            .permission
            .canonical
            .contains("arn:aws:s3:::acme-site-state-dev-822529998967"));
        assert!(role.external_id.is_none());
    }

    #[test]
    fn environment_scope_narrows_subject() {
        let (dev, mgmt) = ids();
        let cfg = config("false");
        let role = render_role(&cfg, RolePurpose::Deployment, "dev", &dev, &mgmt).unwrap();
        assert_eq!(
            role.trust.subjects(),
            vec!["repo:acme/acme-site:environment:dev"]
        );
        assert_eq!(
            role.expected_subject(&cfg).as_deref(),
            Some("repo:acme/acme-site:environment:dev")
        );
    }

    #[test]
    fn read_only_role_uses_external_id() {
        let (dev, mgmt) = ids();
        let role =
            render_role(&config("true"), RolePurpose::ReadOnly, "dev", &dev, &mgmt).unwrap();
        assert_eq!(role.external_id.as_deref(), Some("acme-site-foundation"));
        assert!(role.trust.canonical.contains("arn:aws:iam::111111111111:root"));
        assert!(role.trust.subjects().is_empty());
    }

    #[test]
    fn central_role_guards_central_backend() {
        let (_, mgmt) = ids();
        let role = render_role(
            &config("true"),
            RolePurpose::CentralBootstrap,
            MANAGEMENT,
            &mgmt,
            &mgmt,
        )
        .unwrap();
        assert_eq!(role.name, "acme-site-bootstrap-central");
        assert!(role
            .permission
            .canonical
            .contains("acme-site-state-central-111111111111"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let (dev, mgmt) = ids();
        let cfg = config("true");
        let a = render_role(&cfg, RolePurpose::Deployment, "dev", &dev, &mgmt).unwrap();
        let b = render_role(&cfg, RolePurpose::Deployment, "dev", &dev, &mgmt).unwrap();
        assert_eq!(a.trust.hash, b.trust.hash);
        assert_eq!(a.permission.hash, b.permission.hash);
    }
}
