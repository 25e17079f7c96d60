use std::future::Future;

use foundation_core::naming;

use super::{expect, organization_ready, TestResult};
use crate::records::KeyState;
use crate::CloudProvider;

pub(super) async fn run_storage_tests<P, F, Fut>(factory: &F) -> Vec<TestResult>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    vec![
        TestResult::from_result(
            "storage",
            "key_alias_lifecycle",
            key_alias_lifecycle(factory).await,
        ),
        TestResult::from_result(
            "storage",
            "absent_bucket_heads_false",
            absent_bucket_heads_false(factory).await,
        ),
        TestResult::from_result(
            "storage",
            "versioned_bucket_must_be_emptied_before_delete",
            versioned_bucket_must_be_emptied_before_delete(factory).await,
        ),
        TestResult::from_result(
            "storage",
            "bucket_settings_round_trip",
            bucket_settings_round_trip(factory).await,
        ),
        TestResult::from_result(
            "storage",
            "lock_table_items",
            lock_table_items(factory).await,
        ),
    ]
}

async fn key_alias_lifecycle<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    let alias = "alias/conformance-state-central";
    if p.find_key_by_alias(&mgmt, alias)
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("alias resolved before creation".into());
    }
    let key = p
        .create_key(&mgmt, "conformance")
        .await
        .map_err(|e| e.to_string())?;
    p.create_alias(&mgmt, alias, &key.key_id)
        .await
        .map_err(|e| e.to_string())?;
    expect(
        "create_alias",
        p.create_alias(&mgmt, alias, &key.key_id).await,
        "already_exists",
    )?;
    let found = p
        .find_key_by_alias(&mgmt, alias)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("alias did not resolve")?;
    if found.key_id != key.key_id || found.state != KeyState::Enabled {
        return Err(format!("alias resolved to {:?}", found));
    }
    p.delete_alias(&mgmt, alias).await.map_err(|e| e.to_string())?;
    p.schedule_key_deletion(&mgmt, &key.key_id, 7)
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

async fn absent_bucket_heads_false<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    let bucket = naming::state_bucket("conformance", "central", &mgmt);
    match p.head_bucket(&mgmt, &bucket).await {
        Ok(false) => Ok(()),
        other => Err(format!("expected Ok(false), got {:?}", other)),
    }
}

async fn versioned_bucket_must_be_emptied_before_delete<P, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    let bucket = naming::state_bucket("conformance", "central", &mgmt);
    p.create_bucket(&mgmt, &bucket, "us-east-1")
        .await
        .map_err(|e| e.to_string())?;
    expect(
        "create_bucket",
        p.create_bucket(&mgmt, &bucket, "us-east-1").await,
        "already_exists",
    )?;
    p.put_bucket_versioning(&mgmt, &bucket, true)
        .await
        .map_err(|e| e.to_string())?;
    p.put_object(&mgmt, &bucket, "state", b"v1")
        .await
        .map_err(|e| e.to_string())?;
    p.put_object(&mgmt, &bucket, "state", b"v2")
        .await
        .map_err(|e| e.to_string())?;
    p.delete_object(&mgmt, &bucket, "state")
        .await
        .map_err(|e| e.to_string())?;
    if p.get_object(&mgmt, &bucket, "state")
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("object readable after delete marker".into());
    }
    expect(
        "delete_bucket (non-empty)",
        p.delete_bucket(&mgmt, &bucket).await,
        "conflict",
    )?;

    let versions = p
        .list_object_versions(&mgmt, &bucket, 1000)
        .await
        .map_err(|e| e.to_string())?;
    if versions.len() != 3 || versions.iter().filter(|v| v.is_delete_marker).count() != 1 {
        return Err(format!(
            "expected 2 versions and 1 delete marker, got {:?}",
            versions
        ));
    }
    for v in &versions {
        p.delete_object_version(&mgmt, &bucket, &v.key, &v.version_id)
            .await
            .map_err(|e| e.to_string())?;
    }
    p.delete_bucket(&mgmt, &bucket)
        .await
        .map_err(|e| e.to_string())?;
    match p.head_bucket(&mgmt, &bucket).await {
        Ok(false) => Ok(()),
        other => Err(format!("bucket still present: {:?}", other)),
    }
}

async fn bucket_settings_round_trip<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    let bucket = naming::state_bucket("conformance", "central", &mgmt);
    let key = p
        .create_key(&mgmt, "conformance")
        .await
        .map_err(|e| e.to_string())?;
    p.create_bucket(&mgmt, &bucket, "us-east-1")
        .await
        .map_err(|e| e.to_string())?;
    p.put_bucket_versioning(&mgmt, &bucket, true)
        .await
        .map_err(|e| e.to_string())?;
    p.put_bucket_encryption(&mgmt, &bucket, &key.arn)
        .await
        .map_err(|e| e.to_string())?;
    p.put_public_access_block(&mgmt, &bucket)
        .await
        .map_err(|e| e.to_string())?;
    let settings = p
        .get_bucket_settings(&mgmt, &bucket)
        .await
        .map_err(|e| e.to_string())?;
    if !settings.versioning
        || !settings.public_access_blocked
        || settings.kms_key_arn.as_deref() != Some(key.arn.as_str())
    {
        return Err(format!("settings not applied: {:?}", settings));
    }
    Ok(())
}

async fn lock_table_items<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let p = factory().await;
    let mgmt = organization_ready(&p).await?;
    let table = naming::lock_table("conformance", "central");
    if p.describe_table(&mgmt, &table)
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("table present before creation".into());
    }
    p.create_table(&mgmt, &table, naming::LOCK_TABLE_HASH_KEY)
        .await
        .map_err(|e| e.to_string())?;
    expect(
        "create_table",
        p.create_table(&mgmt, &table, naming::LOCK_TABLE_HASH_KEY)
            .await,
        "already_exists",
    )?;
    p.put_item(&mgmt, &table, "probe", "1")
        .await
        .map_err(|e| e.to_string())?;
    let value = p
        .get_item(&mgmt, &table, "probe")
        .await
        .map_err(|e| e.to_string())?;
    if value.as_deref() != Some("1") {
        return Err(format!("expected item value 1, got {:?}", value));
    }
    p.delete_item(&mgmt, &table, "probe")
        .await
        .map_err(|e| e.to_string())?;
    p.delete_table(&mgmt, &table)
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}
