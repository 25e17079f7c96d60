mod common;

use std::time::Duration;

use common::Harness;
use foundation_core::{ActionStatus, BackoffPolicy, CENTRAL};
use foundation_orchestrate::{
    run_bootstrap_foundation, run_destroy, DestroyOptions, DestroyScope, FoundationOptions,
    OrchestrationError,
};
use foundation_provider::{CloudProvider, Fault, Operation, ProviderError};

#[tokio::test]
async fn destroy_then_recreate_is_equivalent() {
    let h = Harness::new();
    h.bootstrap().await;
    let dev = h.account("dev");
    let bucket = format!("acme-site-state-dev-{}", dev);
    let before = h.provider.get_role(&dev, "acme-site-deploy-dev").await.unwrap().unwrap();
    let backend_before = std::fs::read_to_string(h.store().backend_path("dev")).unwrap();

    // State history: two versions and a delete marker.
    h.provider.put_object(&dev, &bucket, "acme-site/dev/terraform.tfstate", b"v1").await.unwrap();
    h.provider.put_object(&dev, &bucket, "acme-site/dev/terraform.tfstate", b"v2").await.unwrap();
    h.provider.delete_object(&dev, &bucket, "acme-site/dev/terraform.tfstate").await.unwrap();
    assert_eq!(h.provider.object_version_count(&bucket), 3);

    let report = run_destroy(&h.ctx(), &DestroyOptions::new(DestroyScope::All))
        .await
        .unwrap();
    assert!(report.succeeded(), "{:?}", report.failures().collect::<Vec<_>>());
    assert!(report.removed() > 0);

    assert!(!h.provider.head_bucket(&dev, &bucket).await.unwrap());
    assert!(h.provider.describe_table(&dev, "acme-site-locks-dev").await.unwrap().is_none());
    assert!(h.provider.find_key_by_alias(&dev, "alias/acme-site-state-dev").await.unwrap().is_none());
    assert!(h.provider.get_role(&dev, "acme-site-deploy-dev").await.unwrap().is_none());
    assert!(h
        .provider
        .get_oidc_provider(&dev, foundation_core::naming::OIDC_ISSUER_URL)
        .await
        .unwrap()
        .is_none());
    assert!(!h.store().backend_path("dev").exists());
    assert!(!h.store().backend_path(CENTRAL).exists());
    assert!(h.dir.path().join("destroy-report.json").exists());

    // Units still hold active accounts and are kept.
    assert!(report.actions.iter().any(|a| {
        a.resource == "organizational unit Workloads"
            && matches!(a.status, ActionStatus::Skipped { .. })
    }));

    let report = run_bootstrap_foundation(&h.ctx(), FoundationOptions::default())
        .await
        .unwrap();
    assert!(report.succeeded());
    let after = h.provider.get_role(&dev, "acme-site-deploy-dev").await.unwrap().unwrap();
    assert_eq!(after.name, before.name);
    assert_eq!(after.trust_policy, before.trust_policy);
    assert_eq!(
        std::fs::read_to_string(h.store().backend_path("dev")).unwrap()
            .lines()
            .filter(|l| !l.starts_with("kms_key_id"))
            .collect::<Vec<_>>(),
        backend_before
            .lines()
            .filter(|l| !l.starts_with("kms_key_id"))
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn scoped_destroy_touches_only_its_category() {
    let h = Harness::new();
    h.bootstrap().await;
    let dev = h.account("dev");
    let prod = h.account("prod");

    let mut options = DestroyOptions::new(DestroyScope::Roles);
    options.environments = Some(vec!["dev".to_string()]);
    let report = run_destroy(&h.ctx(), &options).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.scope, "roles");

    assert!(h.provider.get_role(&dev, "acme-site-deploy-dev").await.unwrap().is_none());
    assert!(h.provider.get_role(&dev, "acme-site-readonly-dev").await.unwrap().is_none());
    assert!(h.provider.get_role(&prod, "acme-site-deploy-prod").await.unwrap().is_some());
    let bucket = format!("acme-site-state-dev-{}", dev);
    assert!(h.provider.head_bucket(&dev, &bucket).await.unwrap());
    assert!(h.store().backend_path("dev").exists());
}

#[tokio::test]
async fn central_bucket_scope_leaves_workload_backends() {
    let h = Harness::new();
    h.bootstrap().await;
    let report = run_destroy(&h.ctx(), &DestroyOptions::new(DestroyScope::CentralBucket))
        .await
        .unwrap();
    assert!(report.succeeded());
    assert!(report.actions.iter().all(|a| a.target == CENTRAL));
    assert!(!h.store().backend_path(CENTRAL).exists());
    assert!(h.store().backend_path("dev").exists());
}

#[tokio::test]
async fn one_failing_category_does_not_block_the_rest() {
    let h = Harness::new();
    h.bootstrap().await;
    let dev = h.account("dev");
    h.provider.inject(
        Fault::new(
            Operation::DeleteTable,
            ProviderError::PermissionDenied("dynamodb:DeleteTable denied".into()),
        )
        .in_account(&dev)
        .always(),
    );

    let report = run_destroy(&h.ctx(), &DestroyOptions::new(DestroyScope::All))
        .await
        .unwrap();

    assert!(!report.succeeded());
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].resource, "lock table acme-site-locks-dev");
    // Everything after the table in dev, and every other target, still went.
    let bucket = format!("acme-site-state-dev-{}", dev);
    assert!(!h.provider.head_bucket(&dev, &bucket).await.unwrap());
    assert!(h.provider.get_role(&dev, "acme-site-deploy-dev").await.unwrap().is_none());
    // Dev's backend is not fully gone, so its file stays.
    assert!(h.store().backend_path("dev").exists());
    assert!(!h.store().backend_path("prod").exists());
}

#[tokio::test]
async fn dry_run_destroy_is_pure() {
    let h = Harness::new();
    h.bootstrap().await;
    h.provider.clear_calls();

    let mut options = DestroyOptions::new(DestroyScope::All);
    options.close_accounts = true;
    let report = run_destroy(&h.dry_ctx(), &options).await.unwrap();

    assert!(h.provider.mutating_calls().is_empty(), "{:?}", h.provider.mutating_calls());
    assert!(report.dry_run);
    assert!(report.actions.iter().any(|a| a.status == ActionStatus::Planned));
    assert!(h.store().backend_path("dev").exists());
    assert!(!h.dir.path().join("destroy-report.json").exists());
}

#[tokio::test]
async fn closing_accounts_forgets_them() {
    let h = Harness::new();
    h.bootstrap().await;
    let dev = h.account("dev");

    let mut options = DestroyOptions::new(DestroyScope::All);
    options.environments = Some(vec!["dev".to_string()]);
    options.close_accounts = true;
    let report = run_destroy(&h.ctx(), &options).await.unwrap();

    assert!(report.succeeded(), "{:?}", report.failures().collect::<Vec<_>>());
    assert!(report
        .actions
        .iter()
        .any(|a| a.resource == format!("account {}", dev) && a.status == ActionStatus::Removed));
    let accounts = h.accounts();
    assert!(accounts.get("dev").is_none());
    assert!(accounts.get("prod").is_some());
    assert_eq!(h.provider.call_count(Operation::CloseAccount), 1);
}

#[tokio::test]
async fn emptying_respects_its_timeout() {
    let mut h = Harness::new();
    h.bootstrap().await;
    let dev = h.account("dev");
    let bucket = format!("acme-site-state-dev-{}", dev);
    h.provider.put_object(&dev, &bucket, "a", b"1").await.unwrap();
    h.provider.put_object(&dev, &bucket, "b", b"2").await.unwrap();

    // A throttled first deletion costs one second of (fake) retry backoff,
    // which exceeds a zero budget before the second version.
    h.config.retry = BackoffPolicy {
        max_attempts: 3,
        initial_interval: Duration::from_secs(1),
        multiplier: 1.0,
        max_interval: Duration::from_secs(1),
        jitter: Duration::ZERO,
    };
    h.provider.inject(
        Fault::new(Operation::DeleteObjectVersion, ProviderError::Transient("slow down".into()))
            .times(1),
    );
    let mut options = DestroyOptions::new(DestroyScope::Backends);
    options.environments = Some(vec!["dev".to_string()]);
    options.empty_timeout = Duration::ZERO;
    let report = run_destroy(&h.ctx(), &options).await.unwrap();

    let emptied = report
        .actions
        .iter()
        .find(|a| a.resource == format!("objects in bucket {}", bucket))
        .unwrap();
    assert!(emptied.status.is_failure(), "{:?}", emptied.status);
    assert!(emptied.status.to_string().contains("timed out"));
    assert_eq!(h.provider.object_version_count(&bucket), 1);
    assert!(h.provider.head_bucket(&dev, &bucket).await.unwrap());
}

#[tokio::test]
async fn unknown_environment_is_rejected_before_any_call() {
    let h = Harness::new();
    h.bootstrap().await;
    h.provider.clear_calls();
    let mut options = DestroyOptions::new(DestroyScope::All);
    options.environments = Some(vec!["staging".to_string()]);
    let err = run_destroy(&h.ctx(), &options).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Precondition(_)));
    assert!(h.provider.calls().is_empty());
}
