//! Files handed to downstream CI and the infrastructure engine.
//!
//! Layout under the output directory:
//!
//! ```text
//! accounts.json              environment -> account ID (merged across runs)
//! backends/<env>.tfbackend   backend configuration for the infrastructure engine
//! bootstrap-report.json
//! destroy-report.json
//! console-links.md
//! ```

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use foundation_core::{AccountMap, AccountSummary, BackendIdentifiers, BootstrapReport, DestroyReport};
use serde::Serialize;
use thiserror::Error;

pub const ACCOUNTS_FILE: &str = "accounts.json";
pub const BACKENDS_DIR: &str = "backends";
pub const BOOTSTRAP_REPORT_FILE: &str = "bootstrap-report.json";
pub const DESTROY_REPORT_FILE: &str = "destroy-report.json";
pub const CONSOLE_LINKS_FILE: &str = "console-links.md";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("could not write '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("'{}' is not valid: {message}", .path.display())]
    Corrupt { path: PathBuf, message: String },
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn accounts_path(&self) -> PathBuf {
        self.root.join(ACCOUNTS_FILE)
    }

    pub fn backend_path(&self, environment: &str) -> PathBuf {
        self.root
            .join(BACKENDS_DIR)
            .join(format!("{}.tfbackend", environment))
    }

    // ── Account map ──────────────────────────────────────────────────────────

    /// The persisted account map; empty if nothing has been written yet.
    pub fn load_accounts(&self) -> Result<AccountMap, ArtifactError> {
        let path = self.accounts_path();
        if !path.exists() {
            return Ok(AccountMap::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ArtifactError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| ArtifactError::Corrupt {
            path,
            message: e.to_string(),
        })
    }

    /// Merge `accounts` into the persisted map. IDs already on disk are kept
    /// unless `accounts` supersedes them, so a partial run never loses any.
    pub fn merge_accounts(&self, accounts: &AccountMap) -> Result<AccountMap, ArtifactError> {
        let mut merged = self.load_accounts()?;
        merged.merge(accounts);
        self.write_json(&self.accounts_path(), &merged)?;
        Ok(merged)
    }

    /// Drop closed accounts from the persisted map.
    pub fn forget_accounts(&self, environments: &[String]) -> Result<AccountMap, ArtifactError> {
        let mut accounts = self.load_accounts()?;
        for env in environments {
            accounts.remove(env);
        }
        self.write_json(&self.accounts_path(), &accounts)?;
        Ok(accounts)
    }

    // ── Backends ─────────────────────────────────────────────────────────────

    pub fn write_backend(
        &self,
        backend: &BackendIdentifiers,
        kms_key_arn: Option<&str>,
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.backend_path(&backend.environment);
        self.write_text(&path, &render_backend_config(backend, kms_key_arn))?;
        Ok(path)
    }

    pub fn remove_backend(&self, environment: &str) -> Result<(), ArtifactError> {
        let path = self.backend_path(environment);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ArtifactError::Write { path, source }),
        }
    }

    // ── Reports ──────────────────────────────────────────────────────────────

    pub fn write_bootstrap_report(&self, report: &BootstrapReport) -> Result<PathBuf, ArtifactError> {
        let path = self.root.join(BOOTSTRAP_REPORT_FILE);
        self.write_json(&path, report)?;
        Ok(path)
    }

    pub fn write_destroy_report(&self, report: &DestroyReport) -> Result<PathBuf, ArtifactError> {
        let path = self.root.join(DESTROY_REPORT_FILE);
        self.write_json(&path, report)?;
        Ok(path)
    }

    pub fn write_console_links(
        &self,
        project_full_name: &str,
        accounts: &[AccountSummary],
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.root.join(CONSOLE_LINKS_FILE);
        self.write_text(&path, &render_console_links(project_full_name, accounts))?;
        Ok(path)
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), ArtifactError> {
        let json = serde_json::to_string_pretty(value).map_err(|e| ArtifactError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        self.write_text(path, &format!("{}\n", json))
    }

    fn write_text(&self, path: &Path, content: &str) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ArtifactError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ArtifactError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Backend configuration in the infrastructure engine's `-backend-config` format.
pub fn render_backend_config(backend: &BackendIdentifiers, kms_key_arn: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "bucket         = \"{}\"", backend.bucket);
    let _ = writeln!(out, "key            = \"{}\"", backend.state_key);
    let _ = writeln!(out, "region         = \"{}\"", backend.region);
    let _ = writeln!(out, "dynamodb_table = \"{}\"", backend.lock_table);
    let _ = writeln!(out, "encrypt        = true");
    if let Some(arn) = kms_key_arn {
        let _ = writeln!(out, "kms_key_id     = \"{}\"", arn);
    }
    out
}

pub fn render_console_links(project_full_name: &str, accounts: &[AccountSummary]) -> String {
    let mut out = format!("# {} console access\n\n", project_full_name);
    out.push_str("| Environment | Account | Read-only console |\n");
    out.push_str("|---|---|---|\n");
    for summary in accounts {
        let (Some(id), Some(link)) = (&summary.account_id, &summary.console_link) else {
            continue;
        };
        let _ = writeln!(
            out,
            "| {} | {} | [switch role]({}) |",
            summary.environment, id, link
        );
    }
    out
}
