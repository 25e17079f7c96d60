use std::future::Future;

use foundation_core::naming;

use super::{expect, organization_ready, TestResult};
use crate::records::{OidcProviderSpec, RoleSpec};
use crate::CloudProvider;

const TRUST: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"AWS":"arn:aws:iam::100000000000:root"},"Action":"sts:AssumeRole"}]}"#;
const PERMISSIONS: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"s3:ListBucket","Resource":"*"}]}"#;

fn oidc_spec() -> OidcProviderSpec {
    OidcProviderSpec {
        url: naming::OIDC_ISSUER_URL.to_string(),
        audiences: vec![naming::OIDC_AUDIENCE.to_string()],
        thumbprints: naming::OIDC_THUMBPRINTS.iter().map(|t| t.to_string()).collect(),
    }
}

fn role_spec(name: &str) -> RoleSpec {
    RoleSpec {
        name: name.to_string(),
        description: "conformance".to_string(),
        trust_policy: TRUST.to_string(),
    }
}

pub(super) async fn run_identity_tests<P, F, Fut>(factory: &F) -> Vec<TestResult>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    vec![
        TestResult::from_result(
            "identity",
            "oidc_provider_lookup_and_duplicate",
            oidc_provider_lookup_and_duplicate(factory).await,
        ),
        TestResult::from_result(
            "identity",
            "absent_role_is_none",
            absent_role_is_none(factory).await,
        ),
        TestResult::from_result(
            "identity",
            "duplicate_role_already_exists",
            duplicate_role_already_exists(factory).await,
        ),
        TestResult::from_result(
            "identity",
            "inline_policy_round_trip",
            inline_policy_round_trip(factory).await,
        ),
        TestResult::from_result(
            "identity",
            "role_with_policies_cannot_be_deleted",
            role_with_policies_cannot_be_deleted(factory).await,
        ),
    ]
}

async fn oidc_provider_lookup_and_duplicate<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    let spec = oidc_spec();
    if p.get_oidc_provider(&mgmt, &spec.url)
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("identity provider present before creation".into());
    }
    let created = p
        .create_oidc_provider(&mgmt, &spec)
        .await
        .map_err(|e| e.to_string())?;
    if !created.satisfies(&spec) {
        return Err("created provider does not carry the requested audiences".into());
    }
    expect(
        "create_oidc_provider",
        p.create_oidc_provider(&mgmt, &spec).await,
        "already_exists",
    )?;
    p.delete_oidc_provider(&mgmt, &created.arn)
        .await
        .map_err(|e| e.to_string())?;
    expect(
        "delete_oidc_provider (absent)",
        p.delete_oidc_provider(&mgmt, &created.arn).await,
        "not_found",
    )
}

async fn absent_role_is_none<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    match p.get_role(&mgmt, "absent").await {
        Ok(None) => Ok(()),
        other => Err(format!("expected Ok(None), got {:?}", other)),
    }
}

async fn duplicate_role_already_exists<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    let created = p
        .create_role(&mgmt, &role_spec("conformance-role"))
        .await
        .map_err(|e| e.to_string())?;
    if created.arn != naming::role_arn(&mgmt, "conformance-role") {
        return Err(format!("unexpected role ARN {}", created.arn));
    }
    expect(
        "create_role",
        p.create_role(&mgmt, &role_spec("conformance-role")).await,
        "already_exists",
    )
}

async fn inline_policy_round_trip<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    p.create_role(&mgmt, &role_spec("r"))
        .await
        .map_err(|e| e.to_string())?;
    if p.get_role_policy(&mgmt, "r", "r-permissions")
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("policy present before put".into());
    }
    p.put_role_policy(&mgmt, "r", "r-permissions", PERMISSIONS)
        .await
        .map_err(|e| e.to_string())?;
    let stored = p
        .get_role_policy(&mgmt, "r", "r-permissions")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("policy missing after put")?;
    let same = serde_json::from_str::<serde_json::Value>(&stored).ok()
        == serde_json::from_str::<serde_json::Value>(PERMISSIONS).ok();
    if !same {
        return Err(format!("stored policy differs: {}", stored));
    }
    let names = p
        .list_role_policies(&mgmt, "r")
        .await
        .map_err(|e| e.to_string())?;
    if names != vec!["r-permissions".to_string()] {
        return Err(format!("unexpected policy names {:?}", names));
    }
    Ok(())
}

async fn role_with_policies_cannot_be_deleted<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    p.create_role(&mgmt, &role_spec("r"))
        .await
        .map_err(|e| e.to_string())?;
    p.put_role_policy(&mgmt, "r", "r-permissions", PERMISSIONS)
        .await
        .map_err(|e| e.to_string())?;
    expect("delete_role", p.delete_role(&mgmt, "r").await, "conflict")?;
    p.delete_role_policy(&mgmt, "r", "r-permissions")
        .await
        .map_err(|e| e.to_string())?;
    p.delete_role(&mgmt, "r").await.map_err(|e| e.to_string())?;
    match p.get_role(&mgmt, "r").await {
        Ok(None) => Ok(()),
        other => Err(format!("role still present after delete: {:?}", other)),
    }
}
