use std::future::Future;

use foundation_core::{naming, AccountId};

use super::{expect, organization_ready, TestResult};
use crate::records::{AssumeRoleRequest, OidcProviderSpec, RoleSpec, WebIdentityToken};
use crate::CloudProvider;

pub(super) async fn run_trust_tests<P, F, Fut>(factory: &F) -> Vec<TestResult>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    vec![
        TestResult::from_result(
            "trust",
            "external_id_must_match",
            external_id_must_match(factory).await,
        ),
        TestResult::from_result(
            "trust",
            "web_identity_subject_must_match_repository",
            web_identity_subject_must_match_repository(factory).await,
        ),
        TestResult::from_result(
            "trust",
            "web_identity_requires_registered_provider",
            web_identity_requires_registered_provider(factory).await,
        ),
    ]
}

fn external_id_trust(caller: &AccountId) -> String {
    format!(
        r#"{{"Version":"2012-10-17","Statement":[{{"Effect":"Allow","Principal":{{"AWS":"arn:aws:iam::{}:root"}},"Action":"sts:AssumeRole","Condition":{{"StringEquals":{{"sts:ExternalId":"conformance-external-id"}}}}}}]}}"#,
        caller
    )
}

fn web_identity_trust(account: &AccountId) -> String {
    format!(
        r#"{{"Version":"2012-10-17","Statement":[{{"Effect":"Allow","Principal":{{"Federated":"{}"}},"Action":"sts:AssumeRoleWithWebIdentity","Condition":{{"StringEquals":{{"token.actions.githubusercontent.com:aud":"{}"}},"StringLike":{{"token.actions.githubusercontent.com:sub":"repo:acme/acme-site:*"}}}}}}]}}"#,
        naming::oidc_provider_arn(account),
        naming::OIDC_AUDIENCE
    )
}

fn token(subject: &str) -> WebIdentityToken {
    WebIdentityToken {
        issuer: naming::OIDC_ISSUER_URL.to_string(),
        subject: subject.to_string(),
        audience: naming::OIDC_AUDIENCE.to_string(),
    }
}

async fn external_id_must_match<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    let role = p
        .create_role(
            &mgmt,
            &RoleSpec {
                name: "console".to_string(),
                description: "conformance".to_string(),
                trust_policy: external_id_trust(&mgmt),
            },
        )
        .await
        .map_err(|e| e.to_string())?;
    let request = |external_id: Option<&str>| AssumeRoleRequest {
        role_arn: role.arn.clone(),
        caller_account: mgmt.clone(),
        external_id: external_id.map(str::to_string),
        session_name: "conformance".to_string(),
    };
    let session = p
        .assume_role(&request(Some("conformance-external-id")))
        .await
        .map_err(|e| format!("matching external ID denied: {}", e))?;
    if session.account_id != mgmt {
        return Err(format!("session landed in {}", session.account_id));
    }
    expect(
        "assume_role (wrong external ID)",
        p.assume_role(&request(Some("guess"))).await,
        "permission_denied",
    )?;
    expect(
        "assume_role (no external ID)",
        p.assume_role(&request(None)).await,
        "permission_denied",
    )
}

async fn web_identity_subject_must_match_repository<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    p.create_oidc_provider(
        &mgmt,
        &OidcProviderSpec {
            url: naming::OIDC_ISSUER_URL.to_string(),
            audiences: vec![naming::OIDC_AUDIENCE.to_string()],
            thumbprints: naming::OIDC_THUMBPRINTS.iter().map(|t| t.to_string()).collect(),
        },
    )
    .await
    .map_err(|e| e.to_string())?;
    let role = p
        .create_role(
            &mgmt,
            &RoleSpec {
                name: "deploy".to_string(),
                description: "conformance".to_string(),
                trust_policy: web_identity_trust(&mgmt),
            },
        )
        .await
        .map_err(|e| e.to_string())?;
    p.assume_role_with_web_identity(&role.arn, &token("repo:acme/acme-site:ref:refs/heads/main"))
        .await
        .map_err(|e| format!("repository subject denied: {}", e))?;
    expect(
        "assume_role_with_web_identity (foreign repository)",
        p.assume_role_with_web_identity(&role.arn, &token("repo:mallory/acme-site:ref:refs/heads/main"))
            .await,
        "permission_denied",
    )
}

async fn web_identity_requires_registered_provider<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    let role = p
        .create_role(
            &mgmt,
            &RoleSpec {
                name: "deploy".to_string(),
                description: "conformance".to_string(),
                trust_policy: web_identity_trust(&mgmt),
            },
        )
        .await
        .map_err(|e| e.to_string())?;
    expect(
        "assume_role_with_web_identity (no provider)",
        p.assume_role_with_web_identity(&role.arn, &token("repo:acme/acme-site:ref:refs/heads/main"))
            .await,
        "permission_denied",
    )
}
