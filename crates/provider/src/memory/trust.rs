//! Trust-policy evaluation for simulated role assumption.
//!
//! Supports the subset of the policy language the built-in templates use:
//! `Allow` statements, `AWS`/`Federated` principals, and `StringEquals` /
//! `StringLike` conditions. Anything else fails closed.

use std::collections::BTreeMap;

use serde_json::Value;

pub(super) enum Principal<'a> {
    Aws(&'a str),
    Federated(&'a str),
}

pub(super) struct Request<'a> {
    pub action: &'a str,
    pub principal: Principal<'a>,
    /// Condition keys available to the evaluation, e.g. `sts:ExternalId`.
    pub context: BTreeMap<String, String>,
}

pub(super) fn allows(policy: &str, request: &Request<'_>) -> bool {
    let Ok(document) = serde_json::from_str::<Value>(policy) else {
        return false;
    };
    let statements: Vec<&Value> = match document.get("Statement") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    };
    statements.into_iter().any(|s| statement_allows(s, request))
}

fn statement_allows(statement: &Value, request: &Request<'_>) -> bool {
    statement.get("Effect").and_then(Value::as_str) == Some("Allow")
        && strings(statement.get("Action"))
            .iter()
            .any(|action| glob_match(action, request.action))
        && principal_matches(statement.get("Principal"), &request.principal)
        && conditions_hold(statement.get("Condition"), &request.context)
}

fn strings(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn principal_matches(principal: Option<&Value>, requested: &Principal<'_>) -> bool {
    let (key, id) = match requested {
        Principal::Aws(id) => ("AWS", *id),
        Principal::Federated(id) => ("Federated", *id),
    };
    principal
        .and_then(|p| p.get(key))
        .is_some_and(|v| strings(Some(v)).contains(&id))
}

fn conditions_hold(condition: Option<&Value>, context: &BTreeMap<String, String>) -> bool {
    let Some(condition) = condition else {
        return true;
    };
    let Some(operators) = condition.as_object() else {
        return false;
    };
    operators.iter().all(|(operator, clauses)| {
        let Some(clauses) = clauses.as_object() else {
            return false;
        };
        clauses.iter().all(|(key, expected)| {
            let Some(actual) = context.get(key) else {
                return false;
            };
            let expected = strings(Some(expected));
            match operator.as_str() {
                "StringEquals" => expected.iter().any(|e| *e == actual.as_str()),
                "StringLike" => expected.iter().any(|e| glob_match(e, actual)),
                _ => false,
            }
        })
    })
}

/// `*` matches any run of characters, `?` exactly one.
pub(super) fn glob_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let (mut pi, mut vi) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, vi));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            vi = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CI_TRUST: &str = r#"{
      "Statement": [{
        "Effect": "Allow",
        "Principal": {"Federated": "arn:aws:iam::822529998967:oidc-provider/token.actions.githubusercontent.com"},
        "Action": "sts:AssumeRoleWithWebIdentity",
        "Condition": {
          "StringEquals": {"token.actions.githubusercontent.com:aud": "sts.amazonaws.com"},
          "StringLike": {"token.actions.githubusercontent.com:sub": "repo:acme/acme-site:*"}
        }
      }]
    }"#;

    fn web_identity(subject: &str) -> Request<'static> {
        Request {
            action: "sts:AssumeRoleWithWebIdentity",
            principal: Principal::Federated(
                "arn:aws:iam::822529998967:oidc-provider/token.actions.githubusercontent.com",
            ),
            context: BTreeMap::from([
                (
                    "token.actions.githubusercontent.com:aud".to_string(),
                    "sts.amazonaws.com".to_string(),
                ),
                (
                    "token.actions.githubusercontent.com:sub".to_string(),
                    subject.to_string(),
                ),
            ]),
        }
    }

    #[test]
    fn glob_semantics() {
        assert!(glob_match("repo:acme/acme-site:*", "repo:acme/acme-site:ref:refs/heads/main"));
        assert!(!glob_match("repo:acme/acme-site:*", "repo:acme/other:ref:refs/heads/main"));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("abc", "abcd"));
        assert!(glob_match("a*b*c", "axxbyyc"));
    }

    #[test]
    fn federated_subject_is_enforced() {
        assert!(allows(CI_TRUST, &web_identity("repo:acme/acme-site:ref:refs/heads/main")));
        assert!(!allows(CI_TRUST, &web_identity("repo:evil/acme-site:ref:refs/heads/main")));
    }

    #[test]
    fn external_id_condition_is_enforced() {
        let policy = r#"{"Statement": {
            "Effect": "Allow",
            "Principal": {"AWS": "arn:aws:iam::111111111111:root"},
            "Action": "sts:AssumeRole",
            "Condition": {"StringEquals": {"sts:ExternalId": "acme-site-foundation"}}
        }}"#;
        let request = |external_id: Option<&str>| Request {
            action: "sts:AssumeRole",
            principal: Principal::Aws("arn:aws:iam::111111111111:root"),
            context: external_id
                .map(|id| BTreeMap::from([("sts:ExternalId".to_string(), id.to_string())]))
                .unwrap_or_default(),
        };
        assert!(allows(policy, &request(Some("acme-site-foundation"))));
        assert!(!allows(policy, &request(Some("guess"))));
        assert!(!allows(policy, &request(None)));
    }

    #[test]
    fn unknown_operators_fail_closed() {
        let policy = r#"{"Statement": [{
            "Effect": "Allow",
            "Principal": {"AWS": "arn:aws:iam::111111111111:root"},
            "Action": "sts:AssumeRole",
            "Condition": {"IpAddress": {"aws:SourceIp": "10.0.0.0/8"}}
        }]}"#;
        let request = Request {
            action: "sts:AssumeRole",
            principal: Principal::Aws("arn:aws:iam::111111111111:root"),
            context: BTreeMap::from([("aws:SourceIp".to_string(), "10.0.0.1".to_string())]),
        };
        assert!(!allows(policy, &request));
    }
}
