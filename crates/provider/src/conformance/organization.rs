use std::future::Future;

use super::{expect, organization_ready, TestResult};
use crate::records::CreationState;
use crate::CloudProvider;

pub(super) async fn run_organization_tests<P, F, Fut>(factory: &F) -> Vec<TestResult>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    vec![
        TestResult::from_result(
            "organization",
            "absent_organization_describes_as_none",
            absent_organization_describes_as_none(factory).await,
        ),
        TestResult::from_result(
            "organization",
            "second_create_organization_already_exists",
            second_create_organization_already_exists(factory).await,
        ),
        TestResult::from_result(
            "organization",
            "duplicate_unit_already_exists",
            duplicate_unit_already_exists(factory).await,
        ),
        TestResult::from_result(
            "organization",
            "account_creation_resolves_by_polling",
            account_creation_resolves_by_polling(factory).await,
        ),
        TestResult::from_result(
            "organization",
            "account_can_move_into_unit",
            account_can_move_into_unit(factory).await,
        ),
    ]
}

async fn absent_organization_describes_as_none<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    match p.describe_organization().await.map_err(|e| e.to_string())? {
        None => Ok(()),
        Some(org) => Err(format!("expected no organization, found {}", org.id)),
    }
}

async fn second_create_organization_already_exists<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    organization_ready(&p).await?;
    expect(
        "create_organization",
        p.create_organization().await,
        "already_exists",
    )
}

async fn duplicate_unit_already_exists<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    organization_ready(&p).await?;
    let root = p
        .describe_organization()
        .await
        .map_err(|e| e.to_string())?
        .ok_or("organization vanished")?
        .root_id;
    p.create_organizational_unit(&root, "Workloads")
        .await
        .map_err(|e| e.to_string())?;
    expect(
        "create_organizational_unit",
        p.create_organizational_unit(&root, "Workloads").await,
        "already_exists",
    )?;
    let units = p
        .list_organizational_units(&root)
        .await
        .map_err(|e| e.to_string())?;
    if units.len() != 1 {
        return Err(format!("expected 1 unit under root, got {}", units.len()));
    }
    Ok(())
}

async fn account_creation_resolves_by_polling<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    organization_ready(&p).await?;
    let request = p
        .create_account("Conformance (dev)", "conformance-dev@example.test")
        .await
        .map_err(|e| e.to_string())?;
    for _ in 0..100 {
        let status = p
            .describe_create_account_status(&request)
            .await
            .map_err(|e| e.to_string())?;
        match status.state {
            CreationState::InProgress => continue,
            CreationState::Failed => {
                return Err(format!("creation failed: {:?}", status.failure_reason))
            }
            CreationState::Succeeded => {
                let id = status.account_id.ok_or("succeeded without an account ID")?;
                let accounts = p.list_accounts().await.map_err(|e| e.to_string())?;
                if !accounts.iter().any(|a| a.id == id && a.status.is_usable()) {
                    return Err(format!("account {} not listed as active", id));
                }
                return Ok(());
            }
        }
    }
    Err("account creation did not resolve within 100 polls".to_string())
}

async fn account_can_move_into_unit<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    organization_ready(&p).await?;
    let org = p
        .describe_organization()
        .await
        .map_err(|e| e.to_string())?
        .ok_or("organization vanished")?;
    let request = p
        .create_account("Conformance (prod)", "conformance-prod@example.test")
        .await
        .map_err(|e| e.to_string())?;
    let mut account = None;
    for _ in 0..100 {
        let status = p
            .describe_create_account_status(&request)
            .await
            .map_err(|e| e.to_string())?;
        if status.state != CreationState::InProgress {
            account = status.account_id;
            break;
        }
    }
    let account = account.ok_or("account was not created")?;
    let unit = p
        .create_organizational_unit(&org.root_id, "Production")
        .await
        .map_err(|e| e.to_string())?;
    let parent = p.list_parent(&account).await.map_err(|e| e.to_string())?;
    p.move_account(&account, &parent, &unit.id)
        .await
        .map_err(|e| e.to_string())?;
    let moved = p.list_parent(&account).await.map_err(|e| e.to_string())?;
    if moved != unit.id {
        return Err(format!("expected parent {}, got {}", unit.id, moved));
    }
    expect(
        "delete_organizational_unit (non-empty)",
        p.delete_organizational_unit(&unit.id).await,
        "conflict",
    )
}
