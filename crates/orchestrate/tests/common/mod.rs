#![allow(dead_code)]

use foundation_core::{AccountId, AccountMap, BackoffPolicy, Config};
use foundation_orchestrate::{ArtifactStore, FakeClock, RunContext};
use foundation_provider::MemoryProvider;
use tempfile::TempDir;

pub const CONFIG: &str = r#"
[project]
short_name = "acme-site"
full_name = "Acme Site"
repository = "acme/acme-site"

[organization]
email_domain = "acme.example"

[accounts.dev]
unit = "Workloads/NonProd"

[accounts.prod]
unit = "Workloads/Prod"
"#;

/// A simulated control plane, a fake clock, and a scratch output directory.
pub struct Harness {
    pub provider: MemoryProvider,
    pub clock: FakeClock,
    pub config: Config,
    pub dry: Config,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(MemoryProvider::new(), CONFIG)
    }

    pub fn with(provider: MemoryProvider, text: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::from_toml_str(text).unwrap();
        config.output_dir = dir.path().to_path_buf();
        config.retry = BackoffPolicy::immediate(3);
        config.polling = BackoffPolicy::immediate(5);
        let mut dry = config.clone();
        dry.dry_run = true;
        Harness {
            provider,
            clock: FakeClock::new(),
            config,
            dry,
            dir,
        }
    }

    pub fn ctx(&self) -> RunContext<'_> {
        RunContext::new(&self.config, &self.provider, &self.clock)
    }

    pub fn dry_ctx(&self) -> RunContext<'_> {
        RunContext::new(&self.dry, &self.provider, &self.clock)
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.dir.path())
    }

    pub fn accounts(&self) -> AccountMap {
        self.store().load_accounts().unwrap()
    }

    pub fn account(&self, env: &str) -> AccountId {
        self.accounts().get(env).cloned().unwrap()
    }

    /// Organization and foundation, both expected to succeed.
    pub async fn bootstrap(&self) {
        let org = foundation_orchestrate::run_bootstrap_organization(&self.ctx())
            .await
            .unwrap();
        assert!(org.succeeded(), "organization: {:?}", org.failures().collect::<Vec<_>>());
        let foundation = foundation_orchestrate::run_bootstrap_foundation(
            &self.ctx(),
            foundation_orchestrate::FoundationOptions::default(),
        )
        .await
        .unwrap();
        assert!(
            foundation.succeeded(),
            "foundation: {:?} {:?}",
            foundation.failures().collect::<Vec<_>>(),
            foundation.failed_checks().collect::<Vec<_>>()
        );
    }
}
