//! Typed, fail-closed policy template rendering.
//!
//! Templates are JSON documents containing `{{name}}` placeholders inside
//! string literals. A template is checked when it is constructed (unknown
//! placeholders, malformed JSON, unscoped CI subjects) and again when it is
//! rendered (missing or empty values, rendered subjects not bound to the
//! configured repository). Rendering never produces a partially substituted
//! document: any problem is an error.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Condition-key suffix carrying the CI token's subject.
const SUBJECT_CONDITION_SUFFIX: &str = ":sub";

// ── Placeholder ──────────────────────────────────────────────────────────────

/// Every value a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Placeholder {
    AccountId,
    Repository,
    ExternalId,
    Project,
    Environment,
    Region,
    ManagementAccountId,
    OidcProviderArn,
    SubjectFilter,
    StateBucket,
    LockTable,
}

impl Placeholder {
    pub const ALL: [Placeholder; 11] = [
        Placeholder::AccountId,
        Placeholder::Repository,
        Placeholder::ExternalId,
        Placeholder::Project,
        Placeholder::Environment,
        Placeholder::Region,
        Placeholder::ManagementAccountId,
        Placeholder::OidcProviderArn,
        Placeholder::SubjectFilter,
        Placeholder::StateBucket,
        Placeholder::LockTable,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Placeholder::AccountId => "account_id",
            Placeholder::Repository => "repository",
            Placeholder::ExternalId => "external_id",
            Placeholder::Project => "project",
            Placeholder::Environment => "environment",
            Placeholder::Region => "region",
            Placeholder::ManagementAccountId => "management_account_id",
            Placeholder::OidcProviderArn => "oidc_provider_arn",
            Placeholder::SubjectFilter => "subject_filter",
            Placeholder::StateBucket => "state_bucket",
            Placeholder::LockTable => "lock_table",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Placeholder::ALL.into_iter().find(|p| p.token() == token)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{{}}}}}", self.token())
    }
}

/// The value set a template is rendered with.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<Placeholder, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, placeholder: Placeholder, value: impl Into<String>) -> Self {
        self.values.insert(placeholder, value.into());
        self
    }

    pub fn get(&self, placeholder: Placeholder) -> Option<&str> {
        self.values.get(&placeholder).map(|s| s.as_str())
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template '{template}' is malformed: {detail}")]
    Malformed { template: String, detail: String },

    #[error("template '{template}' references unknown placeholder '{{{{{token}}}}}'")]
    UnknownPlaceholder { template: String, token: String },

    #[error("template '{template}' requires {placeholder} but no value was supplied")]
    MissingPlaceholder {
        template: String,
        placeholder: Placeholder,
    },

    #[error("template '{template}' requires {placeholder} but the supplied value is empty")]
    EmptyPlaceholder {
        template: String,
        placeholder: Placeholder,
    },

    #[error("template '{template}': value for {placeholder} is invalid: {reason}")]
    InvalidValue {
        template: String,
        placeholder: Placeholder,
        reason: String,
    },

    #[error("template '{template}' is not valid JSON: {detail}")]
    InvalidJson { template: String, detail: String },

    #[error("template '{template}' federates CI identities without a subject condition")]
    MissingSubjectCondition { template: String },

    #[error(
        "template '{template}' has subject condition '{subject}' that is not bound to a specific repository"
    )]
    UnscopedSubject { template: String, subject: String },
}

// ── PolicyTemplate ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Trust,
    Permission,
}

/// An immutable policy document template, versioned by content hash.
#[derive(Debug, Clone)]
pub struct PolicyTemplate {
    name: String,
    kind: TemplateKind,
    body: String,
    placeholders: BTreeSet<Placeholder>,
    content_hash: String,
}

enum Segment<'a> {
    Text(&'a str),
    Slot(Placeholder),
}

impl PolicyTemplate {
    pub fn trust(name: &str, body: &str) -> Result<Self, TemplateError> {
        Self::new(name, TemplateKind::Trust, body)
    }

    pub fn permission(name: &str, body: &str) -> Result<Self, TemplateError> {
        Self::new(name, TemplateKind::Permission, body)
    }

    fn new(name: &str, kind: TemplateKind, body: &str) -> Result<Self, TemplateError> {
        let segments = scan(name, body)?;
        let placeholders = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Slot(p) => Some(*p),
                Segment::Text(_) => None,
            })
            .collect();

        // Placeholders only ever appear inside string literals, so the raw
        // template must already be valid JSON.
        let parsed: Value = serde_json::from_str(body).map_err(|e| TemplateError::InvalidJson {
            template: name.to_string(),
            detail: e.to_string(),
        })?;

        if kind == TemplateKind::Trust {
            let bound_prefix = format!("repo:{}:", Placeholder::Repository);
            check_subjects(name, &parsed, |subject| {
                subject
                    .strip_prefix(&bound_prefix)
                    .is_some_and(|rest| !rest.is_empty())
            })?;
        }

        Ok(PolicyTemplate {
            name: name.to_string(),
            kind,
            body: body.to_string(),
            placeholders,
            content_hash: sha256_hex(canonical_json(&parsed).as_bytes()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn placeholders(&self) -> &BTreeSet<Placeholder> {
        &self.placeholders
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Render the template. Fails closed on any missing, empty, or invalid value.
    pub fn render(&self, values: &Placeholders) -> Result<RenderedPolicy, TemplateError> {
        for placeholder in &self.placeholders {
            let value = values
                .get(*placeholder)
                .ok_or_else(|| TemplateError::MissingPlaceholder {
                    template: self.name.clone(),
                    placeholder: *placeholder,
                })?;
            if value.trim().is_empty() {
                return Err(TemplateError::EmptyPlaceholder {
                    template: self.name.clone(),
                    placeholder: *placeholder,
                });
            }
            if *placeholder == Placeholder::Repository {
                validate_repository_value(&self.name, value)?;
            }
        }

        let mut out = String::with_capacity(self.body.len());
        for segment in scan(&self.name, &self.body)? {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot(p) => {
                    // Presence was checked above.
                    let value = values.get(p).unwrap_or_default();
                    out.push_str(&escape_json_fragment(value));
                }
            }
        }

        let document: Value =
            serde_json::from_str(&out).map_err(|e| TemplateError::InvalidJson {
                template: self.name.clone(),
                detail: e.to_string(),
            })?;

        if self.kind == TemplateKind::Trust {
            let repository = values.get(Placeholder::Repository).unwrap_or_default();
            let bound_prefix = format!("repo:{}:", repository);
            check_subjects(&self.name, &document, |subject| {
                !repository.is_empty()
                    && subject
                        .strip_prefix(&bound_prefix)
                        .is_some_and(|rest| !rest.is_empty())
            })?;
        }

        Ok(RenderedPolicy::from_document(&self.name, document))
    }
}

/// A fully rendered policy document plus its canonical form and hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPolicy {
    pub template: String,
    pub document: Value,
    pub canonical: String,
    pub hash: String,
}

impl RenderedPolicy {
    fn from_document(template: &str, document: Value) -> Self {
        let canonical = canonical_json(&document);
        RenderedPolicy {
            template: template.to_string(),
            hash: sha256_hex(canonical.as_bytes()),
            canonical,
            document,
        }
    }

    /// Pretty, key-sorted JSON suitable for diffing and display.
    pub fn pretty(&self) -> String {
        pretty_canonical(&self.document)
    }

    /// Whether an already-attached raw document is semantically identical.
    pub fn matches(&self, raw: &str) -> bool {
        document_hash(raw).is_ok_and(|h| h == self.hash)
    }

    /// Every CI subject condition in the document.
    pub fn subjects(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_subjects(&self.document, &mut out);
        out
    }
}

/// Hash of a raw JSON document in canonical form.
pub fn document_hash(raw: &str) -> Result<String, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    Ok(sha256_hex(canonical_json(&value).as_bytes()))
}

/// Re-serialize a raw JSON document as pretty, key-sorted JSON.
pub fn pretty_document(raw: &str) -> Result<String, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    Ok(pretty_canonical(&value))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn scan<'a>(template: &str, body: &'a str) -> Result<Vec<Segment<'a>>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| TemplateError::Malformed {
            template: template.to_string(),
            detail: "unterminated '{{'".to_string(),
        })?;
        let token = &after[..end];
        let placeholder =
            Placeholder::from_token(token).ok_or_else(|| TemplateError::UnknownPlaceholder {
                template: template.to_string(),
                token: token.to_string(),
            })?;
        segments.push(Segment::Slot(placeholder));
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

fn validate_repository_value(template: &str, value: &str) -> Result<(), TemplateError> {
    let invalid = |reason: &str| TemplateError::InvalidValue {
        template: template.to_string(),
        placeholder: Placeholder::Repository,
        reason: reason.to_string(),
    };
    if value.contains('*') || value.contains('?') {
        return Err(invalid("wildcards are not allowed"));
    }
    match value.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(())
        }
        _ => Err(invalid("expected owner/name")),
    }
}

/// Walk every statement and check each subject condition with `is_bound`.
/// Statements federating a CI identity must carry at least one subject.
fn check_subjects(
    template: &str,
    document: &Value,
    is_bound: impl Fn(&str) -> bool,
) -> Result<(), TemplateError> {
    for statement in statements(document) {
        let mut subjects = Vec::new();
        if let Some(condition) = statement.get("Condition") {
            collect_subjects(condition, &mut subjects);
        }
        let federated = statement
            .get("Principal")
            .and_then(|p| p.get("Federated"))
            .is_some();
        if federated && subjects.is_empty() {
            return Err(TemplateError::MissingSubjectCondition {
                template: template.to_string(),
            });
        }
        for subject in subjects {
            if !is_bound(&subject) {
                return Err(TemplateError::UnscopedSubject {
                    template: template.to_string(),
                    subject,
                });
            }
        }
    }
    Ok(())
}

fn statements(document: &Value) -> Vec<&Value> {
    match document.get("Statement") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    }
}

fn collect_subjects(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                if key.ends_with(SUBJECT_CONDITION_SUFFIX) {
                    match inner {
                        Value::String(s) => out.push(s.clone()),
                        Value::Array(items) => out.extend(
                            items
                                .iter()
                                .map(|v| v.as_str().unwrap_or_default().to_string()),
                        ),
                        _ => out.push(String::new()),
                    }
                } else {
                    collect_subjects(inner, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_subjects(v, out)),
        _ => {}
    }
}

/// Escape a value for inclusion inside an existing JSON string literal.
fn escape_json_fragment(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Key-sorted, whitespace-free JSON independent of map ordering features.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

fn pretty_canonical(value: &Value) -> String {
    let sorted: Value = serde_json::from_str(&canonical_json(value)).unwrap_or(Value::Null);
    serde_json::to_string_pretty(&sorted).unwrap_or_default()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRUST: &str = r#"{
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Federated": "{{oidc_provider_arn}}"},
            "Action": "sts:AssumeRoleWithWebIdentity",
            "Condition": {
                "StringEquals": {"token.actions.githubusercontent.com:aud": "sts.amazonaws.com"},
                "StringLike": {"token.actions.githubusercontent.com:sub": "repo:{{repository}}:{{subject_filter}}"}
            }
        }]
    }"#;

    fn values(repository: &str) -> Placeholders {
        Placeholders::new()
            .with(
                Placeholder::OidcProviderArn,
                "arn:aws:iam::822529998967:oidc-provider/token.actions.githubusercontent.com",
            )
            .with(Placeholder::Repository, repository)
            .with(Placeholder::SubjectFilter, "*")
    }

    #[test]
    fn renders_repository_scoped_subject() {
        let template = PolicyTemplate::trust("deploy-trust", TRUST).unwrap();
        let rendered = template.render(&values("acme/acme-site")).unwrap();
        assert_eq!(rendered.subjects(), vec!["repo:acme/acme-site:*".to_string()]);
    }

    #[test]
    fn rejects_empty_repository() {
        let template = PolicyTemplate::trust("deploy-trust", TRUST).unwrap();
        let err = template.render(&values("")).unwrap_err();
        assert_eq!(
            err,
            TemplateError::EmptyPlaceholder {
                template: "deploy-trust".to_string(),
                placeholder: Placeholder::Repository,
            }
        );
    }

    #[test]
    fn rejects_wildcard_repository_value() {
        let template = PolicyTemplate::trust("deploy-trust", TRUST).unwrap();
        let err = template.render(&values("acme/*")).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidValue { .. }), "{err}");
    }

    #[test]
    fn missing_placeholder_fails_closed() {
        let template = PolicyTemplate::trust("deploy-trust", TRUST).unwrap();
        let partial = Placeholders::new()
            .with(Placeholder::Repository, "acme/acme-site")
            .with(Placeholder::SubjectFilter, "*");
        let err = template.render(&partial).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::MissingPlaceholder {
                placeholder: Placeholder::OidcProviderArn,
                ..
            }
        ));
    }

    #[test]
    fn wildcard_subject_template_is_rejected_at_construction() {
        let body = TRUST.replace("repo:{{repository}}:{{subject_filter}}", "repo:*");
        let err = PolicyTemplate::trust("bad", &body).unwrap_err();
        assert!(matches!(err, TemplateError::UnscopedSubject { .. }));
    }

    #[test]
    fn federated_template_without_subject_is_rejected() {
        let body = r#"{"Statement": [{"Effect": "Allow",
            "Principal": {"Federated": "{{oidc_provider_arn}}"},
            "Condition": {"StringEquals": {"token.actions.githubusercontent.com:aud": "sts.amazonaws.com"}}}]}"#;
        let err = PolicyTemplate::trust("aud-only", body).unwrap_err();
        assert!(matches!(err, TemplateError::MissingSubjectCondition { .. }));
    }

    #[test]
    fn unknown_and_unterminated_placeholders_are_rejected() {
        let err = PolicyTemplate::permission("p", r#"{"a": "{{nope}}"}"#).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownPlaceholder { .. }));
        let err = PolicyTemplate::permission("p", r#"{"a": "{{account_id"}"#).unwrap_err();
        assert!(matches!(err, TemplateError::Malformed { .. }));
    }

    #[test]
    fn values_are_escaped_not_injected() {
        let template =
            PolicyTemplate::permission("p", r#"{"Resource": "{{state_bucket}}"}"#).unwrap();
        let rendered = template
            .render(&Placeholders::new().with(Placeholder::StateBucket, r#"x", "y": "z"#))
            .unwrap();
        assert_eq!(rendered.document["Resource"], r#"x", "y": "z"#);
        assert!(rendered.document.get("y").is_none());
    }

    #[test]
    fn hash_ignores_whitespace_and_key_order() {
        let template = PolicyTemplate::permission("p", r#"{"b": 1, "a": [1, 2]}"#).unwrap();
        let rendered = template.render(&Placeholders::new()).unwrap();
        assert!(rendered.matches("{\n  \"a\": [1,2],\n  \"b\": 1\n}"));
        assert!(!rendered.matches(r#"{"a": [2, 1], "b": 1}"#));
        assert!(!rendered.matches("not json"));
        assert_eq!(template.content_hash(), rendered.hash);
    }
}
