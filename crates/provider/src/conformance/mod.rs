//! Conformance test suite for `CloudProvider` implementations.
//!
//! Every phase of the orchestrator relies on a small set of provider
//! behaviors: lookups report absence as `None`, creates report duplicates as
//! `AlreadyExists`, assume-role calls evaluate trust policies, and versioned
//! buckets refuse deletion until every version is gone. This suite checks
//! those behaviors against any implementation:
//!
//! - **organization**: organization/unit creation signals, account creation
//!   and status polling, account moves
//! - **identity**: identity-provider and role idempotency signals, inline
//!   policy lifecycle, delete ordering
//! - **trust**: external-ID and web-identity assumption, including denials
//! - **storage**: keys, versioned bucket emptying, lock tables
//!
//! # Usage
//!
//! ```ignore
//! use foundation_provider::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn memory_conformance() {
//!     let report = run_conformance_suite(|| async { MemoryProvider::new() }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod identity;
mod organization;
mod storage;
mod trust;

use std::fmt;
use std::future::Future;

use foundation_core::AccountId;

use crate::CloudProvider;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub category: String,
    pub name: String,
    pub passed: bool,
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        TestResult {
            category: category.to_string(),
            name: name.to_string(),
            passed: result.is_ok(),
            message: result.err(),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in self.results.iter().filter(|r| !r.passed) {
            writeln!(
                f,
                "  FAIL [{}/{}]: {}",
                r.category,
                r.name,
                r.message.as_deref().unwrap_or("(no message)")
            )?;
        }
        Ok(())
    }
}

/// Run the full conformance suite.
///
/// `factory` is called once per test and must return a fresh control plane
/// whose organization does not exist yet.
pub async fn run_conformance_suite<P, F, Fut>(factory: F) -> ConformanceReport
where
    P: CloudProvider,
    F: Fn() -> Fut,
    Fut: Future<Output = P>,
{
    let mut results = Vec::new();

    results.extend(organization::run_organization_tests(&factory).await);
    results.extend(identity::run_identity_tests(&factory).await);
    results.extend(trust::run_trust_tests(&factory).await);
    results.extend(storage::run_storage_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();
    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Create the organization and return the management account ID.
async fn organization_ready<P: CloudProvider>(p: &P) -> Result<AccountId, String> {
    let org = p.create_organization().await.map_err(|e| e.to_string())?;
    Ok(org.management_account_id)
}

fn expect<T: fmt::Debug>(
    what: &str,
    got: Result<T, crate::ProviderError>,
    want: &str,
) -> Result<(), String> {
    match got {
        Err(e) if e.kind() == want => Ok(()),
        other => Err(format!("{}: expected {} error, got {:?}", what, want, other)),
    }
}
