mod common;

use common::Harness;
use foundation_core::{ActionStatus, CheckStatus, Phase, CENTRAL, MANAGEMENT};
use foundation_orchestrate::{run_bootstrap_foundation, run_bootstrap_organization, FoundationOptions};
use foundation_provider::{CloudProvider, Fault, MemoryProvider, Operation, ProviderError};

const ADOPTED: &str = r#"
[project]
short_name = "acme-site"
full_name = "Acme Site"
repository = "acme/acme-site"
enforce_repo_scope = true

[accounts.dev]
id = "822529998967"
"#;

#[tokio::test]
async fn full_bootstrap_produces_artifacts_and_passes_verification() {
    let h = Harness::new();
    h.bootstrap().await;

    let accounts = h.accounts();
    assert_eq!(accounts.len(), 3);
    assert!(accounts.management().is_some());

    let dev = h.account("dev");
    let backend = std::fs::read_to_string(h.store().backend_path("dev")).unwrap();
    assert!(backend.contains(&format!("bucket         = \"acme-site-state-dev-{}\"", dev)));
    assert!(backend.contains("dynamodb_table = \"acme-site-locks-dev\""));
    assert!(h.store().backend_path(CENTRAL).exists());

    let links = std::fs::read_to_string(h.dir.path().join("console-links.md")).unwrap();
    assert!(links.contains("acme-site-readonly-dev"));
    assert!(links.contains("acme-site-readonly-prod"));

    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(h.dir.path().join("bootstrap-report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report["project"], "acme-site");
    assert!(report["checks"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c["check"] == "assume-role" && c["environment"] == "dev" && c["status"] == "pass"));

    // Probes leave nothing behind.
    let bucket = format!("acme-site-state-dev-{}", dev);
    assert_eq!(h.provider.object_version_count(&bucket), 0);
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let h = Harness::new();
    h.bootstrap().await;
    let first_accounts = h.accounts();
    let first_backend = std::fs::read_to_string(h.store().backend_path("prod")).unwrap();

    h.provider.clear_calls();
    let org = run_bootstrap_organization(&h.ctx()).await.unwrap();
    let foundation = run_bootstrap_foundation(
        &h.ctx(),
        FoundationOptions {
            skip_verification: true,
        },
    )
    .await
    .unwrap();

    assert!(h.provider.mutating_calls().is_empty(), "{:?}", h.provider.mutating_calls());
    assert!(org
        .actions
        .iter()
        .chain(foundation.actions.iter())
        .all(|a| a.status == ActionStatus::Existing));
    assert_eq!(h.accounts(), first_accounts);
    assert_eq!(
        std::fs::read_to_string(h.store().backend_path("prod")).unwrap(),
        first_backend
    );
}

#[tokio::test]
async fn dry_run_issues_no_mutating_calls() {
    let h = Harness::new();

    let planned = run_bootstrap_organization(&h.dry_ctx()).await.unwrap();
    assert!(h.provider.mutating_calls().is_empty());
    assert!(planned
        .actions
        .iter()
        .any(|a| a.status == ActionStatus::Planned));
    assert!(!h.store().accounts_path().exists());

    run_bootstrap_organization(&h.ctx()).await.unwrap();
    h.provider.clear_calls();

    let planned = run_bootstrap_foundation(&h.dry_ctx(), FoundationOptions::default())
        .await
        .unwrap();
    assert!(h.provider.mutating_calls().is_empty(), "{:?}", h.provider.mutating_calls());
    assert!(planned
        .actions
        .iter()
        .any(|a| a.phase == Phase::Identity && a.status == ActionStatus::Planned));
    assert!(planned
        .actions
        .iter()
        .any(|a| a.phase == Phase::Backend && a.status == ActionStatus::Planned));
    assert_eq!(planned.checks[0].status, CheckStatus::Skipped);
    assert!(!h.store().backend_path("dev").exists());
}

#[tokio::test]
async fn role_failure_in_one_account_leaves_siblings_intact() {
    let h = Harness::new();
    run_bootstrap_organization(&h.ctx()).await.unwrap();
    let dev = h.account("dev");
    let prod = h.account("prod");
    h.provider.inject(
        Fault::new(
            Operation::CreateRole,
            ProviderError::PermissionDenied("iam:CreateRole denied".into()),
        )
        .in_account(&dev)
        .always(),
    );

    let report = run_bootstrap_foundation(&h.ctx(), FoundationOptions::default())
        .await
        .unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.failed_environments(), vec!["dev".to_string()]);
    let prod_summary = report.accounts.iter().find(|a| a.environment == "prod").unwrap();
    assert!(prod_summary.failure.is_none());
    assert_eq!(prod_summary.roles.len(), 2);
    let dev_summary = report.accounts.iter().find(|a| a.environment == "dev").unwrap();
    assert!(dev_summary.failure.as_deref().unwrap().contains("denied"));

    assert!(h
        .provider
        .get_role(&prod, "acme-site-deploy-prod")
        .await
        .unwrap()
        .is_some());
    // The backend does not depend on the roles.
    assert!(h.store().backend_path("dev").exists());
}

#[tokio::test]
async fn account_creation_poll_gives_up_after_its_budget() {
    let h = Harness::with(MemoryProvider::new().with_creation_polls(100), common::CONFIG);

    let report = run_bootstrap_organization(&h.ctx()).await.unwrap();

    assert!(!report.succeeded());
    assert_eq!(
        report.failed_environments(),
        vec!["dev".to_string(), "prod".to_string()]
    );
    let reason = report.failures().next().unwrap().status.to_string();
    assert!(reason.contains("did not settle"), "{}", reason);
    assert_eq!(h.clock.sleeps().len(), 2 * 4);
    // The management account is still recorded.
    let accounts = h.accounts();
    assert!(accounts.management().is_some());
    assert!(accounts.get("dev").is_none());
}

#[tokio::test]
async fn slow_account_creation_settles_within_budget() {
    let h = Harness::with(MemoryProvider::new().with_creation_polls(2), common::CONFIG);
    let report = run_bootstrap_organization(&h.ctx()).await.unwrap();
    assert!(report.succeeded());
    assert!(h.accounts().get("prod").is_some());
    assert!(!h.clock.sleeps().is_empty());
}

#[tokio::test]
async fn adopted_account_end_to_end() {
    let dev = foundation_core::AccountId::parse("822529998967").unwrap();
    let provider =
        MemoryProvider::new().with_existing_account(&dev, "Acme Site (dev)", "aws-dev@acme.example");
    let h = Harness::with(provider, ADOPTED);
    h.bootstrap().await;

    assert_eq!(h.account("dev"), dev);
    assert_eq!(h.provider.call_count(Operation::CreateAccount), 0);
    let backend = std::fs::read_to_string(h.store().backend_path("dev")).unwrap();
    assert!(backend.contains("bucket         = \"acme-site-state-dev-822529998967\""));

    let role = h
        .provider
        .get_role(&dev, "acme-site-deploy-dev")
        .await
        .unwrap()
        .unwrap();
    assert!(role.trust_policy.contains("repo:acme/acme-site:*"));
}

#[tokio::test]
async fn bucket_name_collision_is_fatal_for_that_environment_only() {
    let h = Harness::new();
    run_bootstrap_organization(&h.ctx()).await.unwrap();
    let dev = h.account("dev");
    let h = {
        // Reserve dev's bucket for someone else, keeping the same control plane.
        let Harness {
            provider,
            clock,
            config,
            dry,
            dir,
        } = h;
        Harness {
            provider: provider.with_foreign_bucket(&format!("acme-site-state-dev-{}", dev)),
            clock,
            config,
            dry,
            dir,
        }
    };

    let report = run_bootstrap_foundation(
        &h.ctx(),
        FoundationOptions {
            skip_verification: true,
        },
    )
    .await
    .unwrap();

    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].target, "dev");
    assert!(failed[0].status.to_string().contains("short_name"));
    assert!(h.store().backend_path("prod").exists());
    assert!(!h.store().backend_path("dev").exists());
    assert!(report
        .actions
        .iter()
        .any(|a| a.target == MANAGEMENT && a.status == ActionStatus::Created));
}

#[tokio::test]
async fn identity_provider_failure_skips_only_federated_roles() {
    let h = Harness::new();
    run_bootstrap_organization(&h.ctx()).await.unwrap();
    let dev = h.account("dev");
    let prod = h.account("prod");
    h.provider.inject(
        Fault::new(
            Operation::CreateOidcProvider,
            ProviderError::PermissionDenied("iam:CreateOpenIDConnectProvider denied".into()),
        )
        .in_account(&dev)
        .always(),
    );

    let report = run_bootstrap_foundation(
        &h.ctx(),
        FoundationOptions {
            skip_verification: true,
        },
    )
    .await
    .unwrap();

    assert_eq!(report.failed_environments(), vec!["dev".to_string()]);
    let deploy = report
        .actions
        .iter()
        .find(|a| a.target == "dev" && a.resource == "role acme-site-deploy-dev")
        .unwrap();
    assert!(
        matches!(&deploy.status, ActionStatus::Skipped { reason } if reason.contains("identity provider")),
        "{:?}",
        deploy.status
    );
    let readonly = report
        .actions
        .iter()
        .find(|a| a.target == "dev" && a.resource == "role acme-site-readonly-dev")
        .unwrap();
    assert_eq!(readonly.status, ActionStatus::Created);

    assert!(h.provider.get_role(&dev, "acme-site-deploy-dev").await.unwrap().is_none());
    assert!(h.provider.get_role(&dev, "acme-site-readonly-dev").await.unwrap().is_some());
    assert!(h.provider.get_role(&prod, "acme-site-deploy-prod").await.unwrap().is_some());
}

#[tokio::test]
async fn rejected_account_request_leaves_its_sibling_recorded() {
    let h = Harness::new();
    h.provider.inject(
        Fault::new(
            Operation::CreateAccount,
            ProviderError::PermissionDenied("organizations:CreateAccount denied".into()),
        )
        .on_target("Acme Site (dev)")
        .always(),
    );

    let report = run_bootstrap_organization(&h.ctx()).await.unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.failed_environments(), vec!["dev".to_string()]);
    let accounts = h.accounts();
    assert!(accounts.get("dev").is_none());
    assert!(accounts.get("prod").is_some());
    assert!(accounts.management().is_some());
}

#[tokio::test]
async fn lock_table_left_creating_by_an_earlier_run_is_reported_existing() {
    let h = Harness::with(MemoryProvider::new().with_table_polls(2), common::CONFIG);
    run_bootstrap_organization(&h.ctx()).await.unwrap();
    let dev = h.account("dev");
    // An interrupted run issued the create but never waited for it.
    h.provider
        .create_table(&dev, "acme-site-locks-dev", "LockID")
        .await
        .unwrap();

    let report = run_bootstrap_foundation(
        &h.ctx(),
        FoundationOptions {
            skip_verification: true,
        },
    )
    .await
    .unwrap();

    assert!(report.succeeded(), "{:?}", report.failures().collect::<Vec<_>>());
    let status = |env: &str| {
        report
            .actions
            .iter()
            .find(|a| a.target == env && a.resource == format!("lock table acme-site-locks-{}", env))
            .map(|a| a.status.clone())
            .unwrap()
    };
    assert_eq!(status("dev"), ActionStatus::Existing);
    assert_eq!(status("prod"), ActionStatus::Created);
}
