//! Human-readable end-of-run summaries.

use std::fmt::Write;

use foundation_core::{ActionRecord, BootstrapReport, CheckStatus, DestroyReport};
use foundation_orchestrate::RoleUpdate;

const DRY_RUN_BANNER: &str = "DRY RUN: nothing was changed";

pub(crate) fn render_bootstrap(title: &str, report: &BootstrapReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} for {}", title, report.project);
    if report.dry_run {
        let _ = writeln!(out, "{}", DRY_RUN_BANNER);
    }
    render_actions(&mut out, &report.actions);

    if !report.accounts.is_empty() {
        let _ = writeln!(out, "\nAccounts:");
        for account in &report.accounts {
            let id = account
                .account_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            let state = match &account.failure {
                Some(reason) => format!("FAILED ({})", reason),
                None => "ok".to_string(),
            };
            let _ = writeln!(out, "  {:<12} {:<14} {}", account.environment, id, state);
            if let Some(backend) = &account.backend {
                let _ = writeln!(
                    out,
                    "  {:<12} bucket {}, lock table {}",
                    "", backend.bucket, backend.lock_table
                );
            }
            if let Some(link) = &account.console_link {
                let _ = writeln!(out, "  {:<12} {}", "", link);
            }
        }
    }

    if !report.checks.is_empty() {
        let _ = writeln!(out, "\nChecks:");
        for check in &report.checks {
            let mark = match check.status {
                CheckStatus::Pass => "pass",
                CheckStatus::Fail => "FAIL",
                CheckStatus::Skipped => "skip",
            };
            let _ = writeln!(
                out,
                "  [{}] {:<12} {:<24} {}",
                mark, check.environment, check.check, check.detail
            );
        }
    }

    let failed = report.failed_environments();
    if failed.is_empty() {
        let _ = writeln!(out, "\n{}: ok", title);
    } else {
        let _ = writeln!(out, "\n{}: failed in {}", title, failed.join(", "));
    }
    out
}

pub(crate) fn render_destroy(report: &DestroyReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "destroy-foundation ({}) for {}",
        report.scope, report.project
    );
    if report.dry_run {
        let _ = writeln!(out, "{}", DRY_RUN_BANNER);
    }
    render_actions(&mut out, &report.actions);
    let failed = report.failures().count();
    let _ = writeln!(
        out,
        "\ndestroy-foundation: {} removed, {} failed",
        report.removed(),
        failed
    );
    out
}

pub(crate) fn render_policy_updates(updates: &[RoleUpdate], dry_run: bool) -> String {
    let mut out = String::new();
    if dry_run {
        let _ = writeln!(out, "{}", DRY_RUN_BANNER);
    }
    for update in updates {
        for action in update.actions() {
            let _ = writeln!(out, "  [{}] {}: {}", action.target, action.resource, action.status);
        }
        for diff in [&update.permission_diff, &update.trust_diff].into_iter().flatten() {
            let _ = writeln!(out, "{}", diff.to_text());
        }
    }
    let failed = updates.iter().filter(|u| u.failed()).count();
    let _ = writeln!(
        out,
        "\nupdate-role-policy: {} roles, {} failed",
        updates.len(),
        failed
    );
    out
}

fn render_actions(out: &mut String, actions: &[ActionRecord]) {
    let mut phase = None;
    for action in actions {
        if phase != Some(action.phase) {
            let _ = writeln!(out, "\n{}:", action.phase);
            phase = Some(action.phase);
        }
        let _ = writeln!(out, "  [{}] {}: {}", action.target, action.resource, action.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundation_core::{ActionStatus, CheckResult, Phase};

    #[test]
    fn bootstrap_summary_groups_actions_by_phase() {
        let mut report = BootstrapReport::new("acme-site", false);
        report.record(ActionRecord::new(
            Phase::Identity,
            "dev",
            "role acme-site-deploy-dev",
            ActionStatus::Created,
        ));
        report.record(ActionRecord::new(
            Phase::Backend,
            "dev",
            "bucket acme-site-state-dev-200000000001",
            ActionStatus::Existing,
        ));
        report.checks.push(CheckResult::pass("dev", "assume-role", "ok"));

        let text = render_bootstrap("bootstrap-foundation", &report);
        assert!(text.contains("identity:\n  [dev] role acme-site-deploy-dev: created"));
        assert!(text.contains("backend:\n"));
        assert!(text.contains("[pass] dev"));
        assert!(text.ends_with("bootstrap-foundation: ok\n"));
        assert!(!text.contains(DRY_RUN_BANNER));
    }

    #[test]
    fn failures_name_their_environments() {
        let mut report = BootstrapReport::new("acme-site", true);
        report.record(ActionRecord::new(
            Phase::Identity,
            "prod",
            "role acme-site-deploy-prod",
            ActionStatus::Failed {
                reason: "permission denied".into(),
            },
        ));
        let text = render_bootstrap("bootstrap-foundation", &report);
        assert!(text.contains(DRY_RUN_BANNER));
        assert!(text.contains("FAILED (permission denied)"));
        assert!(text.contains("failed in prod"));
    }

    #[test]
    fn destroy_summary_counts() {
        let mut report = DestroyReport::new("acme-site", "all", false);
        report.record(ActionRecord::new(
            Phase::Destroy,
            "dev",
            "lock table acme-site-locks-dev",
            ActionStatus::Removed,
        ));
        let text = render_destroy(&report);
        assert!(text.starts_with("destroy-foundation (all) for acme-site"));
        assert!(text.contains("1 removed, 0 failed"));
    }
}
