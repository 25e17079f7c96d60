//! Run configuration: TOML file + command-line overrides → one validated [`Config`].
//!
//! Loading is the single gate in front of every phase. It never stops at the
//! first problem: every missing or malformed field is collected into
//! [`ConfigurationError::Invalid`] so the operator can fix them in one pass.
//!
//! # Example
//!
//! ```toml
//! [project]
//! short_name = "acme-site"
//! full_name = "Acme Site"
//! repository = "acme/acme-site"
//!
//! [organization]
//! email_domain = "acme.example"
//!
//! [accounts.dev]
//! [accounts.prod]
//! unit = "Workloads/Production"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::BackoffPolicy;
use crate::model::{AccountId, CENTRAL, MANAGEMENT};
use crate::naming;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_UNIT: &str = "Workloads";
pub const DEFAULT_OUTPUT_DIR: &str = ".foundation";
pub const DEFAULT_STATE_FILE: &str = ".foundation/control-plane.json";

// ── Validated configuration ─────────────────────────────────────────────────

/// The immutable configuration every phase receives by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub project: ProjectConfig,
    pub organization: OrganizationConfig,
    /// Workload accounts, ordered by environment name.
    pub accounts: Vec<AccountConfig>,
    pub backend: BackendConfig,
    pub retry: BackoffPolicy,
    pub polling: BackoffPolicy,
    pub provider: ProviderKind,
    pub output_dir: PathBuf,
    pub dry_run: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// Lowercase prefix of every derived resource name.
    pub short_name: String,
    pub full_name: String,
    pub repository: Repository,
    pub region: String,
    pub external_id: String,
    pub subject_scope: SubjectScope,
}

/// How narrowly CI trust subjects are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectScope {
    /// `repo:<owner/name>:*` (`enforce_repo_scope = true`).
    Repository,
    /// `repo:<owner/name>:environment:<env>` (`enforce_repo_scope = false`).
    Environment,
}

#[derive(Debug, Clone)]
pub struct OrganizationConfig {
    pub management_account_id: Option<AccountId>,
    pub default_unit: String,
}

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub environment: String,
    /// `None` only for adopted accounts.
    pub email: Option<String>,
    pub adopted_id: Option<AccountId>,
    /// `/`-separated organizational-unit path below the root.
    pub unit: String,
}

impl AccountConfig {
    pub fn unit_segments(&self) -> Vec<&str> {
        self.unit.split('/').collect()
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub central: bool,
    pub key_deletion_window_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    /// Persistent simulated control plane stored in a JSON file.
    Local { state_file: PathBuf },
    /// JSON-over-HTTP control-plane gateway.
    Gateway { endpoint: String },
}

/// Execution-mode flags supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub dry_run: bool,
    pub verbose: bool,
    pub output_dir: Option<PathBuf>,
}

impl Config {
    /// Read, parse, and validate the configuration file at `path`.
    pub fn load(path: &Path, overrides: &Overrides) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content, &path.display().to_string(), overrides)
    }

    /// Parse and validate configuration text with default overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        Self::parse(content, "<inline>", &Overrides::default())
    }

    pub fn parse(
        content: &str,
        origin: &str,
        overrides: &Overrides,
    ) -> Result<Self, ConfigurationError> {
        let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigurationError::Parse {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;
        validate(raw, overrides)
    }

    pub fn account(&self, environment: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.environment == environment)
    }

    pub fn environments(&self) -> impl Iterator<Item = &str> {
        self.accounts.iter().map(|a| a.environment.as_str())
    }
}

// ── Repository ───────────────────────────────────────────────────────────────

/// A CI repository identifier in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    owner: String,
    name: String,
}

impl Repository {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (owner, name) = raw
            .split_once('/')
            .ok_or_else(|| format!("'{}' is not in owner/name form", raw))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(format!("'{}' is not in owner/name form", raw));
        }
        let owner_ok = owner.len() <= 39
            && owner.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !owner.starts_with('-')
            && !owner.ends_with('-');
        if !owner_ok {
            return Err(format!(
                "owner '{}' may only contain letters, digits, and inner hyphens",
                owner
            ));
        }
        let name_ok = name.len() <= 100
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && name != "."
            && name != "..";
        if !name_ok {
            return Err(format!(
                "name '{}' may only contain letters, digits, '-', '_' and '.'",
                name
            ));
        }
        Ok(Repository {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// One invalid or missing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigProblem {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("could not read '{}': {message}", .path.display())]
    Read { path: PathBuf, message: String },

    #[error("could not parse '{origin}': {message}")]
    Parse { origin: String, message: String },

    #[error("{}", format_problems(.0))]
    Invalid(Vec<ConfigProblem>),
}

impl ConfigurationError {
    pub fn problems(&self) -> &[ConfigProblem] {
        match self {
            ConfigurationError::Invalid(problems) => problems,
            _ => &[],
        }
    }
}

fn format_problems(problems: &[ConfigProblem]) -> String {
    let mut out = format!("invalid configuration ({} problem(s)):", problems.len());
    for p in problems {
        out.push_str(&format!("\n  - {}", p));
    }
    out
}

// ── Raw TOML shape ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    project: Option<RawProject>,
    organization: Option<RawOrganization>,
    #[serde(default)]
    accounts: BTreeMap<String, RawAccount>,
    backend: Option<RawBackend>,
    retry: Option<RawBackoff>,
    polling: Option<RawBackoff>,
    provider: Option<RawProvider>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProject {
    short_name: Option<String>,
    full_name: Option<String>,
    repository: Option<String>,
    region: Option<String>,
    external_id: Option<String>,
    enforce_repo_scope: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOrganization {
    management_account_id: Option<String>,
    email_domain: Option<String>,
    default_unit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAccount {
    email: Option<String>,
    id: Option<String>,
    unit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBackend {
    central: Option<bool>,
    key_deletion_window_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBackoff {
    max_attempts: Option<u32>,
    #[serde(alias = "initial_interval_ms")]
    interval_ms: Option<u64>,
    multiplier: Option<f64>,
    max_interval_ms: Option<u64>,
    jitter_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProvider {
    kind: Option<String>,
    state_file: Option<PathBuf>,
    endpoint: Option<String>,
}

// ── Validation ───────────────────────────────────────────────────────────────

struct Problems(Vec<ConfigProblem>);

impl Problems {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(ConfigProblem {
            field: field.into(),
            message: message.into(),
        });
    }

    fn required(&mut self, field: &str, value: Option<String>, hint: &str) -> Option<String> {
        match value.map(|v| v.trim().to_string()) {
            Some(v) if !v.is_empty() => Some(v),
            _ => {
                self.push(field, format!("is required ({})", hint));
                None
            }
        }
    }
}

fn validate(raw: RawConfig, overrides: &Overrides) -> Result<Config, ConfigurationError> {
    let mut problems = Problems(Vec::new());

    // [project]
    let project = raw.project.unwrap_or_default();
    let short_name = problems.required(
        "project.short_name",
        project.short_name,
        "e.g. short_name = \"acme-site\"",
    );
    if let Some(name) = &short_name {
        if let Err(msg) = check_short_name(name) {
            problems.push("project.short_name", msg);
        }
    }
    let full_name = problems.required(
        "project.full_name",
        project.full_name,
        "e.g. full_name = \"Acme Site\"",
    );
    let repository = problems
        .required(
            "project.repository",
            project.repository,
            "the CI repository in owner/name form",
        )
        .and_then(|raw| match Repository::parse(&raw) {
            Ok(repo) => Some(repo),
            Err(msg) => {
                problems.push("project.repository", msg);
                None
            }
        });
    let region = project
        .region
        .unwrap_or_else(|| DEFAULT_REGION.to_string());
    if !is_region(&region) {
        problems.push(
            "project.region",
            format!("'{}' is not a region name like us-east-1", region),
        );
    }
    let external_id = project.external_id.unwrap_or_else(|| {
        format!("{}-foundation", short_name.as_deref().unwrap_or("project"))
    });
    if !is_external_id(&external_id) {
        problems.push(
            "project.external_id",
            "must be 2-1224 characters from [A-Za-z0-9+=,.@:/_-]",
        );
    }
    let subject_scope = if project.enforce_repo_scope.unwrap_or(true) {
        SubjectScope::Repository
    } else {
        SubjectScope::Environment
    };

    // [organization]
    let organization = raw.organization.unwrap_or_default();
    let management_account_id =
        organization
            .management_account_id
            .and_then(|raw| match AccountId::parse(&raw) {
                Ok(id) => Some(id),
                Err(msg) => {
                    problems.push("organization.management_account_id", msg);
                    None
                }
            });
    let default_unit = organization
        .default_unit
        .unwrap_or_else(|| DEFAULT_UNIT.to_string());
    if let Err(msg) = check_unit_path(&default_unit) {
        problems.push("organization.default_unit", msg);
    }
    if let Some(domain) = &organization.email_domain {
        if !is_email(&format!("x@{}", domain)) {
            problems.push(
                "organization.email_domain",
                format!("'{}' is not a mail domain", domain),
            );
        }
    }

    // [backend]
    let backend = raw.backend.unwrap_or_default();
    let backend = BackendConfig {
        central: backend.central.unwrap_or(true),
        key_deletion_window_days: backend.key_deletion_window_days.unwrap_or(7),
    };
    if !(7..=30).contains(&backend.key_deletion_window_days) {
        problems.push(
            "backend.key_deletion_window_days",
            "must be between 7 and 30",
        );
    }

    // [accounts.*]
    if raw.accounts.is_empty() {
        problems.push(
            "accounts",
            "at least one account is required, e.g. [accounts.dev]",
        );
    }
    let mut accounts = Vec::new();
    let mut seen_ids = BTreeSet::new();
    for (environment, account) in raw.accounts {
        let field = |f: &str| format!("accounts.{}.{}", environment, f);
        if let Err(msg) = check_environment(&environment) {
            problems.push(format!("accounts.{}", environment), msg);
        }
        if let Some(name) = &short_name {
            check_bucket_length(&mut problems, name, &environment);
        }
        let adopted_id = account.id.and_then(|raw| match AccountId::parse(&raw) {
            Ok(id) => {
                if !seen_ids.insert(id.clone()) {
                    problems.push(field("id"), format!("{} is used by another account", id));
                }
                Some(id)
            }
            Err(msg) => {
                problems.push(field("id"), msg);
                None
            }
        });
        let email = match (account.email, &organization.email_domain) {
            (Some(email), _) => {
                if !is_email(&email) {
                    problems.push(field("email"), format!("'{}' is not an email address", email));
                }
                Some(email)
            }
            (None, Some(domain)) => Some(naming::account_email(
                short_name.as_deref().unwrap_or("project"),
                &environment,
                domain,
            )),
            (None, None) => {
                if adopted_id.is_none() {
                    problems.push(
                        field("email"),
                        "is required unless accounts.<env>.id or organization.email_domain is set",
                    );
                }
                None
            }
        };
        let unit = account.unit.unwrap_or_else(|| default_unit.clone());
        if let Err(msg) = check_unit_path(&unit) {
            problems.push(field("unit"), msg);
        }
        accounts.push(AccountConfig {
            environment,
            email,
            adopted_id,
            unit,
        });
    }
    if backend.central {
        if let Some(name) = &short_name {
            check_bucket_length(&mut problems, name, CENTRAL);
        }
    }

    // [retry] / [polling]
    let retry = backoff(
        &mut problems,
        "retry",
        raw.retry.unwrap_or_default(),
        BackoffPolicy::retry_default(),
    );
    let polling = backoff(
        &mut problems,
        "polling",
        raw.polling.unwrap_or_default(),
        BackoffPolicy::poll_default(),
    );

    // [provider]
    let provider = raw.provider.unwrap_or_default();
    let provider = match provider.kind.as_deref().unwrap_or("local") {
        "local" => Some(ProviderKind::Local {
            state_file: provider
                .state_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
        }),
        "gateway" => match provider.endpoint {
            Some(endpoint)
                if endpoint.starts_with("https://") || endpoint.starts_with("http://") =>
            {
                Some(ProviderKind::Gateway { endpoint })
            }
            Some(endpoint) => {
                problems.push(
                    "provider.endpoint",
                    format!("'{}' is not an http(s) URL", endpoint),
                );
                None
            }
            None => {
                problems.push("provider.endpoint", "is required when provider.kind = \"gateway\"");
                None
            }
        },
        other => {
            problems.push(
                "provider.kind",
                format!("unknown provider kind '{}' (expected \"local\" or \"gateway\")", other),
            );
            None
        }
    };

    if !problems.0.is_empty() {
        return Err(ConfigurationError::Invalid(problems.0));
    }

    // Every `None` above pushed a problem, so these are all present.
    match (short_name, full_name, repository, provider) {
        (Some(short_name), Some(full_name), Some(repository), Some(provider)) => Ok(Config {
            project: ProjectConfig {
                short_name,
                full_name,
                repository,
                region,
                external_id,
                subject_scope,
            },
            organization: OrganizationConfig {
                management_account_id,
                default_unit,
            },
            accounts,
            backend,
            retry,
            polling,
            provider,
            output_dir: overrides
                .output_dir
                .clone()
                .or(raw.output_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            dry_run: overrides.dry_run,
            verbose: overrides.verbose,
        }),
        _ => Err(ConfigurationError::Invalid(vec![ConfigProblem {
            field: "project".to_string(),
            message: "incomplete project section".to_string(),
        }])),
    }
}

fn backoff(
    problems: &mut Problems,
    section: &str,
    raw: RawBackoff,
    default: BackoffPolicy,
) -> BackoffPolicy {
    let policy = BackoffPolicy {
        max_attempts: raw.max_attempts.unwrap_or(default.max_attempts),
        initial_interval: raw
            .interval_ms
            .map(Duration::from_millis)
            .unwrap_or(default.initial_interval),
        multiplier: raw.multiplier.unwrap_or(default.multiplier),
        max_interval: raw
            .max_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(default.max_interval),
        jitter: raw
            .jitter_ms
            .map(Duration::from_millis)
            .unwrap_or(default.jitter),
    };
    if policy.max_attempts == 0 {
        problems.push(format!("{}.max_attempts", section), "must be at least 1");
    }
    if !(policy.multiplier >= 1.0 && policy.multiplier.is_finite()) {
        problems.push(format!("{}.multiplier", section), "must be >= 1.0");
    }
    if policy.max_interval < policy.initial_interval {
        problems.push(
            format!("{}.max_interval_ms", section),
            "must not be smaller than interval_ms",
        );
    }
    policy
}

fn check_short_name(name: &str) -> Result<(), String> {
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let charset_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !(3..=32).contains(&name.len()) {
        return Err(format!("'{}' must be 3-32 characters long", name));
    }
    if !starts_with_letter || !charset_ok || name.ends_with('-') || name.contains("--") {
        return Err(format!(
            "'{}' cannot prefix a bucket name: use lowercase letters, digits and single inner hyphens, starting with a letter",
            name
        ));
    }
    Ok(())
}

fn check_environment(environment: &str) -> Result<(), String> {
    if environment == MANAGEMENT || environment == CENTRAL {
        return Err(format!("'{}' is a reserved name", environment));
    }
    let ok = environment
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase())
        && environment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !environment.ends_with('-')
        && environment.len() <= 16;
    if ok {
        Ok(())
    } else {
        Err(format!(
            "environment name '{}' must be a lowercase label of at most 16 characters",
            environment
        ))
    }
}

fn check_bucket_length(problems: &mut Problems, short_name: &str, environment: &str) {
    let len = short_name.len() + environment.len() + naming::STATE_BUCKET_FIXED_LEN;
    if len > naming::MAX_BUCKET_NAME_LEN {
        problems.push(
            format!("accounts.{}", environment),
            format!(
                "state bucket name for '{}' would be {} characters (max {}); shorten project.short_name or the environment name",
                environment,
                len,
                naming::MAX_BUCKET_NAME_LEN
            ),
        );
    }
}

fn check_unit_path(path: &str) -> Result<(), String> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() > 5 {
        return Err(format!("'{}' is nested deeper than 5 levels", path));
    }
    for segment in segments {
        let ok = !segment.trim().is_empty()
            && segment.len() <= 128
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'));
        if !ok {
            return Err(format!(
                "'{}' is not a valid organizational-unit path (segments of letters, digits, spaces, '-', '_')",
                path
            ));
        }
    }
    Ok(())
}

fn is_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn is_region(value: &str) -> bool {
    !value.is_empty()
        && value.contains('-')
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_external_id(value: &str) -> bool {
    (2..=1224).contains(&value.len())
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '+' | '=' | ',' | '.' | '@' | ':' | '/' | '_' | '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[project]
short_name = "acme-site"
full_name = "Acme Site"
repository = "acme/acme-site"

[accounts.dev]
email = "aws-dev@acme.example"
"#;

    fn fields(err: &ConfigurationError) -> Vec<String> {
        err.problems().iter().map(|p| p.field.clone()).collect()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.project.short_name, "acme-site");
        assert_eq!(config.project.repository.to_string(), "acme/acme-site");
        assert_eq!(config.project.region, "us-east-1");
        assert_eq!(config.project.external_id, "acme-site-foundation");
        assert_eq!(config.project.subject_scope, SubjectScope::Repository);
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.accounts[0].unit, "Workloads");
        assert!(config.backend.central);
        assert_eq!(
            config.provider,
            ProviderKind::Local {
                state_file: PathBuf::from(DEFAULT_STATE_FILE)
            }
        );
        assert!(!config.dry_run);
    }

    #[test]
    fn every_missing_field_is_reported_at_once() {
        let err = Config::from_toml_str("").unwrap_err();
        let fields = fields(&err);
        assert!(fields.contains(&"project.short_name".to_string()));
        assert!(fields.contains(&"project.full_name".to_string()));
        assert!(fields.contains(&"project.repository".to_string()));
        assert!(fields.contains(&"accounts".to_string()));
        assert!(err.to_string().contains("problem(s)"));
    }

    #[test]
    fn rejects_repository_without_owner() {
        let err = Config::from_toml_str(&MINIMAL.replace("acme/acme-site", "acme-site"))
            .unwrap_err();
        assert_eq!(fields(&err), vec!["project.repository".to_string()]);
    }

    #[test]
    fn rejects_wildcard_repository() {
        let err =
            Config::from_toml_str(&MINIMAL.replace("acme/acme-site", "acme/*")).unwrap_err();
        assert_eq!(fields(&err), vec!["project.repository".to_string()]);
    }

    #[test]
    fn rejects_short_names_that_cannot_prefix_buckets() {
        for bad in ["Acme", "acme_site", "-acme", "acme-", "ac", "acme--site"] {
            let text = MINIMAL.replace("short_name = \"acme-site\"", &format!("short_name = \"{}\"", bad));
            let err = Config::from_toml_str(&text).unwrap_err();
            assert!(
                fields(&err).contains(&"project.short_name".to_string()),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn rejects_names_that_overflow_bucket_length() {
        let text = format!(
            "{}\n[accounts.very-long-envname]\nemail = \"x@acme.example\"\n",
            MINIMAL.replace("acme-site\"\nfull", "acme-site-with-a-long-name-abcde\"\nfull")
        );
        let err = Config::from_toml_str(&text).unwrap_err();
        assert!(fields(&err).contains(&"accounts.very-long-envname".to_string()));
    }

    #[test]
    fn adopted_accounts_need_no_email() {
        let text = MINIMAL.replace(
            "email = \"aws-dev@acme.example\"",
            "id = \"822529998967\"",
        );
        let config = Config::from_toml_str(&text).unwrap();
        assert_eq!(
            config.accounts[0].adopted_id.as_ref().map(|id| id.as_str()),
            Some("822529998967")
        );
        assert!(config.accounts[0].email.is_none());
    }

    #[test]
    fn email_domain_derives_missing_emails() {
        let text = r#"
[project]
short_name = "acme-site"
full_name = "Acme Site"
repository = "acme/acme-site"

[organization]
email_domain = "acme.example"

[accounts.prod]
unit = "Workloads/Production"
"#;
        let config = Config::from_toml_str(text).unwrap();
        assert_eq!(
            config.accounts[0].email.as_deref(),
            Some("acme-site-prod@acme.example")
        );
        assert_eq!(config.accounts[0].unit_segments(), vec!["Workloads", "Production"]);
    }

    #[test]
    fn rejects_malformed_ids_emails_and_reserved_names() {
        let text = r#"
[project]
short_name = "acme-site"
full_name = "Acme Site"
repository = "acme/acme-site"

[accounts.dev]
id = "1234"

[accounts.management]
email = "not-an-email"
"#;
        let err = Config::from_toml_str(text).unwrap_err();
        let fields = fields(&err);
        assert!(fields.contains(&"accounts.dev.id".to_string()));
        assert!(fields.contains(&"accounts.management".to_string()));
        assert!(fields.contains(&"accounts.management.email".to_string()));
    }

    #[test]
    fn gateway_provider_requires_endpoint() {
        let text = format!("{}\n[provider]\nkind = \"gateway\"\n", MINIMAL);
        let err = Config::from_toml_str(&text).unwrap_err();
        assert_eq!(fields(&err), vec!["provider.endpoint".to_string()]);
    }

    #[test]
    fn unknown_fields_are_parse_errors() {
        let text = format!("{}\n[backend]\nbucket = \"x\"\n", MINIMAL);
        assert!(matches!(
            Config::from_toml_str(&text).unwrap_err(),
            ConfigurationError::Parse { .. }
        ));
    }

    #[test]
    fn load_applies_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let overrides = Overrides {
            dry_run: true,
            verbose: true,
            output_dir: Some(PathBuf::from("out")),
        };
        let config = Config::load(file.path(), &overrides).unwrap();
        assert!(config.dry_run);
        assert!(config.verbose);
        assert_eq!(config.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/foundation.toml"), &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Read { .. }));
    }
}
