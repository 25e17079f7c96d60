//! Run reports: what each phase did, per resource, per environment.
//!
//! Reports are plain serde data. Orchestration fills them in; the CLI renders
//! them and the artifact writer persists them as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{AccountId, BackendIdentifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Organization,
    Identity,
    Backend,
    Verification,
    Destroy,
    PolicyUpdate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Organization => "organization",
            Phase::Identity => "identity",
            Phase::Backend => "backend",
            Phase::Verification => "verification",
            Phase::Destroy => "destroy",
            Phase::PolicyUpdate => "policy-update",
        };
        f.write_str(s)
    }
}

/// Outcome of reconciling a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    /// Already present in the desired shape; nothing was changed.
    Existing,
    Created,
    Updated,
    /// Dry run: this change would have been made.
    Planned,
    Removed,
    /// Destroy found nothing to remove.
    Absent,
    Skipped { reason: String },
    Failed { reason: String },
}

impl ActionStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, ActionStatus::Failed { .. })
    }

    pub fn is_change(&self) -> bool {
        matches!(
            self,
            ActionStatus::Created | ActionStatus::Updated | ActionStatus::Removed
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Existing => f.write_str("exists"),
            ActionStatus::Created => f.write_str("created"),
            ActionStatus::Updated => f.write_str("updated"),
            ActionStatus::Planned => f.write_str("planned"),
            ActionStatus::Removed => f.write_str("removed"),
            ActionStatus::Absent => f.write_str("absent"),
            ActionStatus::Skipped { reason } => write!(f, "skipped ({})", reason),
            ActionStatus::Failed { reason } => write!(f, "FAILED ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub phase: Phase,
    /// Environment (or `management` / `central`) the resource belongs to.
    pub target: String,
    /// Human-readable resource, e.g. `role acme-site-deploy-dev`.
    pub resource: String,
    #[serde(flatten)]
    pub status: ActionStatus,
}

impl ActionRecord {
    pub fn new(
        phase: Phase,
        target: impl Into<String>,
        resource: impl Into<String>,
        status: ActionStatus,
    ) -> Self {
        ActionRecord {
            phase,
            target: target.into(),
            resource: resource.into(),
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

/// One verification check against one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub environment: String,
    pub check: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    pub fn pass(environment: &str, check: &str, detail: impl Into<String>) -> Self {
        Self::new(environment, check, CheckStatus::Pass, detail)
    }

    pub fn fail(environment: &str, check: &str, detail: impl Into<String>) -> Self {
        Self::new(environment, check, CheckStatus::Fail, detail)
    }

    pub fn skipped(environment: &str, check: &str, detail: impl Into<String>) -> Self {
        Self::new(environment, check, CheckStatus::Skipped, detail)
    }

    fn new(environment: &str, check: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        CheckResult {
            environment: environment.to_string(),
            check: check.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

/// Per-environment summary rendered at the end of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub environment: String,
    pub account_id: Option<AccountId>,
    pub roles: Vec<String>,
    pub backend: Option<BackendIdentifiers>,
    pub console_link: Option<String>,
    /// First failure in this environment, if any.
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    pub project: String,
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub accounts: Vec<AccountSummary>,
    pub actions: Vec<ActionRecord>,
    pub checks: Vec<CheckResult>,
}

impl BootstrapReport {
    pub fn new(project: &str, dry_run: bool) -> Self {
        BootstrapReport {
            project: project.to_string(),
            started_at: now_rfc3339(),
            dry_run,
            ..Default::default()
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = now_rfc3339();
    }

    pub fn record(&mut self, action: ActionRecord) {
        self.actions.push(action);
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionRecord> {
        self.actions.iter().filter(|a| a.status.is_failure())
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
    }

    /// Environments with at least one failed action or check, in order.
    pub fn failed_environments(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let targets = self
            .failures()
            .map(|a| a.target.as_str())
            .chain(self.failed_checks().map(|c| c.environment.as_str()));
        for target in targets {
            if !out.iter().any(|t| t == target) {
                out.push(target.to_string());
            }
        }
        out
    }

    pub fn succeeded(&self) -> bool {
        self.failures().next().is_none() && self.failed_checks().next().is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyReport {
    pub project: String,
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub scope: String,
    pub actions: Vec<ActionRecord>,
}

impl DestroyReport {
    pub fn new(project: &str, scope: &str, dry_run: bool) -> Self {
        DestroyReport {
            project: project.to_string(),
            started_at: now_rfc3339(),
            dry_run,
            scope: scope.to_string(),
            ..Default::default()
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = now_rfc3339();
    }

    pub fn record(&mut self, action: ActionRecord) {
        self.actions.push(action);
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionRecord> {
        self.actions.iter().filter(|a| a.status.is_failure())
    }

    pub fn removed(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.status == ActionStatus::Removed)
            .count()
    }

    pub fn succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Current UTC time as RFC 3339.
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_environments_are_deduplicated_in_order() {
        let mut report = BootstrapReport::new("acme-site", false);
        report.record(ActionRecord::new(
            Phase::Identity,
            "staging",
            "role acme-site-deploy-staging",
            ActionStatus::Failed {
                reason: "throttled".into(),
            },
        ));
        report.record(ActionRecord::new(
            Phase::Backend,
            "dev",
            "bucket acme-site-state-dev-822529998967",
            ActionStatus::Created,
        ));
        report.checks.push(CheckResult::fail("prod", "trust", "subject mismatch"));
        report.checks.push(CheckResult::fail("staging", "trust", "missing"));
        assert_eq!(report.failed_environments(), vec!["staging", "prod"]);
        assert!(!report.succeeded());
    }

    #[test]
    fn skipped_checks_do_not_fail_a_run() {
        let mut report = BootstrapReport::new("acme-site", true);
        report
            .checks
            .push(CheckResult::skipped("dev", "state read/write", "dry run"));
        assert!(report.succeeded());
    }

    #[test]
    fn action_status_serializes_flat() {
        let record = ActionRecord::new(
            Phase::Destroy,
            "dev",
            "lock table acme-site-locks-dev",
            ActionStatus::Skipped {
                reason: "out of scope".into(),
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "out of scope");
        assert_eq!(json["phase"], "destroy");
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let ts = now_rfc3339();
        assert!(time::OffsetDateTime::parse(
            &ts,
            &time::format_description::well_known::Rfc3339
        )
        .is_ok());
    }
}
