mod common;

use common::Harness;
use foundation_core::ActionStatus;
use foundation_orchestrate::{
    run_policy_update, run_verify, OrchestrationError, PolicyUpdateOptions, RoleSelector,
};
use foundation_provider::CloudProvider;

const DRIFTED: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"ec2:TerminateInstances","Resource":"*"}]}"#;

fn options(selector: &str) -> PolicyUpdateOptions {
    PolicyUpdateOptions {
        selector: RoleSelector::parse(selector),
        validate_trust: false,
    }
}

#[tokio::test]
async fn drifted_permission_policy_is_diffed_and_restored() {
    let h = Harness::new();
    h.bootstrap().await;
    let dev = h.account("dev");
    h.provider
        .put_role_policy(&dev, "acme-site-deploy-dev", "acme-site-deploy-dev-permissions", DRIFTED)
        .await
        .unwrap();

    let updates = run_policy_update(&h.ctx(), &options("dev")).await.unwrap();
    assert_eq!(updates.len(), 2);

    let deploy = updates.iter().find(|u| u.role == "acme-site-deploy-dev").unwrap();
    assert_eq!(deploy.permission, ActionStatus::Updated);
    let diff = deploy.permission_diff.as_ref().unwrap();
    assert!(diff.removed() > 0);
    assert!(diff.to_text().contains("ec2:TerminateInstances"));

    let readonly = updates.iter().find(|u| u.role == "acme-site-readonly-dev").unwrap();
    assert_eq!(readonly.permission, ActionStatus::Existing);
    assert!(readonly.permission_diff.is_none());

    let stored = h
        .provider
        .get_role_policy(&dev, "acme-site-deploy-dev", "acme-site-deploy-dev-permissions")
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.contains("ec2:TerminateInstances"));

    // Converged: a second pass has nothing to do.
    let again = run_policy_update(&h.ctx(), &options("dev")).await.unwrap();
    assert!(again.iter().all(|u| u.permission == ActionStatus::Existing));
}

#[tokio::test]
async fn trust_drift_is_reported_and_never_applied() {
    let h = Harness::new();
    h.bootstrap().await;
    let prod = h.account("prod");
    let tampered = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"AWS":"*"},"Action":"sts:AssumeRole"}]}"#;
    h.provider
        .update_trust_policy(&prod, "acme-site-deploy-prod", tampered)
        .await
        .unwrap();

    let updates = run_policy_update(
        &h.ctx(),
        &PolicyUpdateOptions {
            selector: RoleSelector::parse("prod"),
            validate_trust: true,
        },
    )
    .await
    .unwrap();

    let deploy = updates.iter().find(|u| u.role == "acme-site-deploy-prod").unwrap();
    assert!(deploy.failed());
    assert!(deploy.trust.as_ref().unwrap().is_failure());
    assert!(!deploy.trust_diff.as_ref().unwrap().is_empty());
    assert_eq!(deploy.permission, ActionStatus::Existing);

    let readonly = updates.iter().find(|u| u.role == "acme-site-readonly-prod").unwrap();
    assert_eq!(readonly.trust, Some(ActionStatus::Existing));

    let role = h
        .provider
        .get_role(&prod, "acme-site-deploy-prod")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(role.trust_policy, tampered);
}

#[tokio::test]
async fn dry_run_update_only_reads() {
    let h = Harness::new();
    h.bootstrap().await;
    let dev = h.account("dev");
    h.provider
        .put_role_policy(&dev, "acme-site-deploy-dev", "acme-site-deploy-dev-permissions", DRIFTED)
        .await
        .unwrap();
    h.provider.clear_calls();

    let updates = run_policy_update(&h.dry_ctx(), &options("all")).await.unwrap();

    assert!(h.provider.mutating_calls().is_empty(), "{:?}", h.provider.mutating_calls());
    let deploy = updates.iter().find(|u| u.role == "acme-site-deploy-dev").unwrap();
    assert_eq!(deploy.permission, ActionStatus::Planned);
    assert!(deploy.permission_diff.is_some());
    // Management carries the central bootstrap role.
    assert!(updates.iter().any(|u| u.role == "acme-site-bootstrap-central"));
}

#[tokio::test]
async fn unknown_selector_is_a_precondition_failure() {
    let h = Harness::new();
    h.bootstrap().await;
    let err = run_policy_update(&h.ctx(), &options("staging")).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Precondition(_)));
}

#[tokio::test]
async fn verify_alone_reports_every_check() {
    let h = Harness::new();
    h.bootstrap().await;
    let report = run_verify(&h.ctx()).await.unwrap();
    assert!(report.failed_checks().next().is_none(), "{:?}", report.failed_checks().collect::<Vec<_>>());
    for check in ["identity-provider", "assume-role", "foreign-subject-denied", "bucket", "read-write"] {
        assert!(
            report.checks.iter().any(|c| c.check == check && c.environment == "prod"),
            "missing {}",
            check
        );
    }
    assert!(!h.dir.path().join("verify-report.json").exists());
}
