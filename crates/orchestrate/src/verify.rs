//! Verification Engine: a read-only battery of checks over the organization,
//! the identity layer, and every state backend.
//!
//! Roles are not just looked up: each one is assumed through its real trust
//! chain, and a foreign repository subject must be refused. Backends are
//! exercised with a throwaway object and lock record, which are removed
//! again (down to the object version) before the check reports.

use foundation_core::{
    naming, AccountId, AccountMap, BackendIdentifiers, CheckResult, RoleDefinition, MANAGEMENT,
};
use foundation_provider::{
    AccountRecord, AssumeRoleRequest, KeyState, ProviderError, TableStatus,
    WebIdentityToken,
};
use futures::future::join_all;

use crate::context::RunContext;
use crate::identity::{oidc_spec, targets};
use crate::organization::resolve_unit_path;
use crate::retry::retry_transient;

const SESSION_NAME: &str = "foundation-verify";

/// Run every check. The result lists organization checks first, then one
/// block per account, then one block per backend.
pub async fn verify_foundation(
    ctx: &RunContext<'_>,
    accounts: &AccountMap,
    roles: &[RoleDefinition],
    backends: &[BackendIdentifiers],
) -> Vec<CheckResult> {
    let mut checks = verify_organization(ctx, accounts).await;

    let identity = targets(ctx.config, accounts).into_iter().map(|(env, id)| {
        let account_roles: Vec<&RoleDefinition> =
            roles.iter().filter(|r| r.environment == env).collect();
        verify_identity(ctx, env, id, accounts, account_roles)
    });
    for block in join_all(identity).await {
        checks.extend(block);
    }

    for block in join_all(backends.iter().map(|b| verify_backend(ctx, b))).await {
        checks.extend(block);
    }

    let failed = checks
        .iter()
        .filter(|c| c.status == foundation_core::CheckStatus::Fail)
        .count();
    if failed == 0 {
        tracing::info!(checks = checks.len(), "verification passed");
    } else {
        tracing::error!(checks = checks.len(), failed, "verification failed");
    }
    checks
}

fn check(environment: &str, name: &str, result: Result<String, String>) -> CheckResult {
    match result {
        Ok(detail) => CheckResult::pass(environment, name, detail),
        Err(reason) => {
            tracing::warn!(env = environment, check = name, reason = %reason, "check failed");
            CheckResult::fail(environment, name, reason)
        }
    }
}

// ── Organization ─────────────────────────────────────────────────────────────

async fn verify_organization(ctx: &RunContext<'_>, accounts: &AccountMap) -> Vec<CheckResult> {
    let provider = ctx.provider;
    let retry = &ctx.config.retry;
    let mut checks = Vec::new();

    let org = match retry_transient(ctx.clock, retry, "describing organization", move || {
        provider.describe_organization()
    })
    .await
    {
        Ok(Some(org)) => org,
        Ok(None) => {
            checks.push(check(MANAGEMENT, "organization", Err("no organization exists".into())));
            return checks;
        }
        Err(e) => {
            checks.push(check(MANAGEMENT, "organization", Err(e.to_string())));
            return checks;
        }
    };
    checks.push(check(
        MANAGEMENT,
        "organization",
        match accounts.management() {
            Some(id) if *id != org.management_account_id => Err(format!(
                "organization {} is managed by {}, but the account map records {}",
                org.id, org.management_account_id, id
            )),
            _ => Ok(format!(
                "{} managed by {}",
                org.id, org.management_account_id
            )),
        },
    ));

    let listed = match retry_transient(ctx.clock, retry, "listing accounts", move || {
        provider.list_accounts()
    })
    .await
    {
        Ok(listed) => listed,
        Err(e) => {
            checks.push(check(MANAGEMENT, "accounts", Err(e.to_string())));
            return checks;
        }
    };

    for account in &ctx.config.accounts {
        let env = account.environment.as_str();
        let Some(id) = accounts.get(env) else {
            checks.push(check(env, "account", Err("no account ID recorded".into())));
            continue;
        };
        checks.push(check(env, "account", account_usable(&listed, id)));
        let placement = match resolve_unit_path(ctx, &org.root_id, &account.unit).await {
            Ok(Some(unit_id)) => {
                match retry_transient(ctx.clock, retry, "listing parent", move || {
                    provider.list_parent(id)
                })
                .await
                {
                    Ok(parent) if parent == unit_id => Ok(format!("in {}", account.unit)),
                    Ok(parent) => Err(format!("in {} instead of {}", parent, account.unit)),
                    Err(e) => Err(e.to_string()),
                }
            }
            Ok(None) => Err(format!("organizational unit {} is missing", account.unit)),
            Err(e) => Err(e.to_string()),
        };
        checks.push(check(env, "organizational-unit", placement));
    }
    checks
}

fn account_usable(listed: &[AccountRecord], id: &AccountId) -> Result<String, String> {
    match listed.iter().find(|a| a.id == *id) {
        Some(record) if record.status.is_usable() => Ok(format!("{} ({})", id, record.name)),
        Some(record) => Err(format!("{} is {}", id, record.status)),
        None => Err(format!("{} is not a member of the organization", id)),
    }
}

// ── Identity ─────────────────────────────────────────────────────────────────

async fn verify_identity(
    ctx: &RunContext<'_>,
    environment: &str,
    account_id: &AccountId,
    accounts: &AccountMap,
    roles: Vec<&RoleDefinition>,
) -> Vec<CheckResult> {
    let provider = ctx.provider;
    let spec = oidc_spec();
    let mut checks = Vec::new();

    let url = spec.url.as_str();
    let oidc = retry_transient(ctx.clock, &ctx.config.retry, "reading identity provider", move || {
        provider.get_oidc_provider(account_id, url)
    })
    .await;
    checks.push(check(
        environment,
        "identity-provider",
        match oidc {
            Ok(Some(p)) if p.satisfies(&spec) => Ok(p.arn),
            Ok(Some(p)) => Err(format!("{} does not trust the CI audience and thumbprints", p.arn)),
            Ok(None) => Err(format!("no provider for {} in {}", spec.url, account_id)),
            Err(e) => Err(e.to_string()),
        },
    ));

    for role in roles {
        checks.extend(verify_role(ctx, role, accounts).await);
    }
    checks
}

async fn verify_role(
    ctx: &RunContext<'_>,
    role: &RoleDefinition,
    accounts: &AccountMap,
) -> Vec<CheckResult> {
    let provider = ctx.provider;
    let env = role.environment.as_str();
    let retry = &ctx.config.retry;
    let (account, name, policy) = (&role.account_id, role.name.as_str(), role.policy_name.as_str());
    let mut checks = Vec::new();

    let record = match retry_transient(ctx.clock, retry, "reading role", move || {
        provider.get_role(account, name)
    })
    .await
    {
        Ok(Some(record)) => record,
        Ok(None) => {
            checks.push(check(env, "role", Err(format!("{} does not exist", name))));
            return checks;
        }
        Err(e) => {
            checks.push(check(env, "role", Err(e.to_string())));
            return checks;
        }
    };
    checks.push(check(env, "role", Ok(record.arn.clone())));

    checks.push(check(
        env,
        "trust-policy",
        if role.trust.matches(&record.trust_policy) {
            Ok(format!("{} matches {}", name, &role.trust.hash[..12]))
        } else {
            Err(format!("trust policy of {} has drifted", name))
        },
    ));

    let attached = retry_transient(ctx.clock, retry, "reading permission policy", move || {
        provider.get_role_policy(account, name, policy)
    })
    .await;
    checks.push(check(
        env,
        "permission-policy",
        match attached {
            Ok(Some(doc)) if role.permission.matches(&doc) => {
                Ok(format!("{} matches {}", policy, &role.permission.hash[..12]))
            }
            Ok(Some(_)) => Err(format!("{} has drifted; run update-role-policy", policy)),
            Ok(None) => Err(format!("{} is not attached", policy)),
            Err(e) => Err(e.to_string()),
        },
    ));

    if role.purpose.is_federated() {
        checks.extend(probe_federated(ctx, role).await);
    } else if let Some(management) = accounts.management() {
        checks.extend(probe_cross_account(ctx, role, management).await);
    }
    checks
}

/// The configured repository must get in; a look-alike repository must not.
async fn probe_federated(ctx: &RunContext<'_>, role: &RoleDefinition) -> Vec<CheckResult> {
    let env = role.environment.as_str();
    let Some(subject) = role.expected_subject(ctx.config) else {
        return Vec::new();
    };
    let arn = role.arn();
    let allowed = assume_web_identity(ctx, &arn, subject.clone()).await;
    let repository = &ctx.config.project.repository;
    let foreign = format!(
        "repo:{}/{}-fork:ref:refs/heads/main",
        repository.owner(),
        repository.name()
    );
    let refused = assume_web_identity(ctx, &arn, foreign.clone()).await;

    vec![
        check(
            env,
            "assume-role",
            allowed
                .map(|_| format!("{} assumable by {}", role.name, subject))
                .map_err(|e| format!("{} not assumable by {}: {}", role.name, subject, e)),
        ),
        check(env, "foreign-subject-denied", expect_denied(refused, &foreign)),
    ]
}

async fn assume_web_identity(
    ctx: &RunContext<'_>,
    arn: &str,
    subject: String,
) -> Result<(), ProviderError> {
    let provider = ctx.provider;
    let token = WebIdentityToken {
        issuer: naming::OIDC_ISSUER_URL.to_string(),
        subject,
        audience: naming::OIDC_AUDIENCE.to_string(),
    };
    let token = &token;
    retry_transient(ctx.clock, &ctx.config.retry, "assuming role", move || {
        provider.assume_role_with_web_identity(arn, token)
    })
    .await
    .map(|_| ())
}

/// The management account gets in with the external ID and not without it.
async fn probe_cross_account(
    ctx: &RunContext<'_>,
    role: &RoleDefinition,
    management: &AccountId,
) -> Vec<CheckResult> {
    let env = role.environment.as_str();
    let with_id = assume_cross_account(ctx, role, management, role.external_id.clone()).await;
    let mut checks = vec![check(
        env,
        "assume-role",
        with_id
            .map(|_| format!("{} assumable from {}", role.name, management))
            .map_err(|e| format!("{} not assumable from {}: {}", role.name, management, e)),
    )];
    if role.external_id.is_some() {
        let without = assume_cross_account(ctx, role, management, None).await;
        checks.push(check(
            env,
            "external-id-required",
            expect_denied(without, "a request without the external ID"),
        ));
    }
    checks
}

async fn assume_cross_account(
    ctx: &RunContext<'_>,
    role: &RoleDefinition,
    caller: &AccountId,
    external_id: Option<String>,
) -> Result<(), ProviderError> {
    let provider = ctx.provider;
    let request = AssumeRoleRequest {
        role_arn: role.arn(),
        caller_account: caller.clone(),
        external_id,
        session_name: SESSION_NAME.to_string(),
    };
    let request = &request;
    retry_transient(ctx.clock, &ctx.config.retry, "assuming role", move || {
        provider.assume_role(request)
    })
    .await
    .map(|_| ())
}

fn expect_denied(result: Result<(), ProviderError>, who: &str) -> Result<String, String> {
    match result {
        Err(ProviderError::PermissionDenied(_)) => Ok(format!("{} was refused", who)),
        Ok(()) => Err(format!("{} was allowed to assume the role", who)),
        Err(e) => Err(format!("probe for {} failed: {}", who, e)),
    }
}

// ── Backends ─────────────────────────────────────────────────────────────────

async fn verify_backend(ctx: &RunContext<'_>, backend: &BackendIdentifiers) -> Vec<CheckResult> {
    let provider = ctx.provider;
    let retry = &ctx.config.retry;
    let env = backend.environment.as_str();
    let (account, bucket, table, alias) = (
        &backend.account_id,
        backend.bucket.as_str(),
        backend.lock_table.as_str(),
        backend.key_alias.as_str(),
    );
    let mut checks = Vec::new();

    let key = retry_transient(ctx.clock, retry, "reading key", move || {
        provider.find_key_by_alias(account, alias)
    })
    .await;
    let key_arn = match key {
        Ok(Some(k)) if k.state == KeyState::Enabled => {
            checks.push(check(env, "encryption-key", Ok(k.arn.clone())));
            Some(k.arn)
        }
        Ok(Some(k)) => {
            checks.push(check(env, "encryption-key", Err(format!("{} is pending deletion", k.arn))));
            None
        }
        Ok(None) => {
            checks.push(check(env, "encryption-key", Err(format!("{} not found", alias))));
            None
        }
        Err(e) => {
            checks.push(check(env, "encryption-key", Err(e.to_string())));
            None
        }
    };

    let settings = retry_transient(ctx.clock, retry, "reading bucket settings", move || {
        provider.get_bucket_settings(account, bucket)
    })
    .await;
    let bucket_ok = match settings {
        Ok(s) => {
            let mut problems = Vec::new();
            if !s.versioning {
                problems.push("versioning is off".to_string());
            }
            match (&s.kms_key_arn, &key_arn) {
                (Some(actual), Some(expected)) if actual == expected => {}
                (None, _) => problems.push("default encryption is off".to_string()),
                (Some(actual), _) => problems.push(format!("encrypted with {}", actual)),
            }
            if !s.public_access_blocked {
                problems.push("public access is not blocked".to_string());
            }
            let ok = problems.is_empty();
            checks.push(check(
                env,
                "bucket",
                if ok {
                    Ok(format!("{} versioned, encrypted, private", bucket))
                } else {
                    Err(format!("{}: {}", bucket, problems.join(", ")))
                },
            ));
            ok
        }
        Err(e) => {
            checks.push(check(env, "bucket", Err(e.to_string())));
            false
        }
    };

    let described = retry_transient(ctx.clock, retry, "describing lock table", move || {
        provider.describe_table(account, table)
    })
    .await;
    let table_ok = match described {
        Ok(Some(t)) if t.status == TableStatus::Active && t.hash_key == naming::LOCK_TABLE_HASH_KEY => {
            checks.push(check(env, "lock-table", Ok(t.arn)));
            true
        }
        Ok(Some(t)) => {
            checks.push(check(
                env,
                "lock-table",
                Err(format!("{} is {:?} with hash key {}", t.name, t.status, t.hash_key)),
            ));
            false
        }
        Ok(None) => {
            checks.push(check(env, "lock-table", Err(format!("{} not found", table))));
            false
        }
        Err(e) => {
            checks.push(check(env, "lock-table", Err(e.to_string())));
            false
        }
    };

    if ctx.dry_run() {
        checks.push(CheckResult::skipped(env, "read-write", "dry run performs no writes"));
    } else if !(bucket_ok && table_ok) {
        checks.push(CheckResult::skipped(env, "read-write", "backend is not in place"));
    } else {
        checks.push(check(env, "read-write", probe_read_write(ctx, backend).await));
    }
    checks
}

/// Write, read back, and remove one object version and one lock record.
async fn probe_read_write(
    ctx: &RunContext<'_>,
    backend: &BackendIdentifiers,
) -> Result<String, String> {
    let provider = ctx.provider;
    let retry = &ctx.config.retry;
    let nonce = format!("{:08x}", rand::random::<u32>());
    let object_key = format!("{}.verify-{}", backend.state_key, nonce);
    let body = format!("foundation verification {}", nonce);
    let (account, bucket, table) = (
        &backend.account_id,
        backend.bucket.as_str(),
        backend.lock_table.as_str(),
    );
    let (key, bytes) = (object_key.as_str(), body.as_bytes());

    let version = retry_transient(ctx.clock, retry, "writing probe object", move || {
        provider.put_object(account, bucket, key, bytes)
    })
    .await
    .map_err(|e| format!("write to {}: {}", bucket, e))?;
    let read = retry_transient(ctx.clock, retry, "reading probe object", move || {
        provider.get_object(account, bucket, key)
    })
    .await;
    let version_id = version.as_str();
    let cleanup = retry_transient(ctx.clock, retry, "removing probe object", move || {
        provider.delete_object_version(account, bucket, key, version_id)
    })
    .await;
    match read {
        Ok(Some(found)) if found == bytes => {}
        Ok(_) => return Err(format!("probe object in {} did not read back", bucket)),
        Err(e) => return Err(format!("read from {}: {}", bucket, e)),
    }
    cleanup.map_err(|e| format!("remove probe object from {}: {}", bucket, e))?;

    let (item, value) = (object_key.as_str(), nonce.as_str());
    retry_transient(ctx.clock, retry, "writing probe record", move || {
        provider.put_item(account, table, item, value)
    })
    .await
    .map_err(|e| format!("write to {}: {}", table, e))?;
    let read = retry_transient(ctx.clock, retry, "reading probe record", move || {
        provider.get_item(account, table, item)
    })
    .await;
    let cleanup = retry_transient(ctx.clock, retry, "removing probe record", move || {
        provider.delete_item(account, table, item)
    })
    .await;
    match read {
        Ok(Some(found)) if found == value => {}
        Ok(_) => return Err(format!("probe record in {} did not read back", table)),
        Err(e) => return Err(format!("read from {}: {}", table, e)),
    }
    cleanup.map_err(|e| format!("remove probe record from {}: {}", table, e))?;

    Ok(format!("{} and {} accept reads and writes", bucket, table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundation_core::AccountStatus;

    fn id(raw: &str) -> AccountId {
        AccountId::parse(raw).unwrap()
    }

    #[test]
    fn suspended_and_foreign_accounts_are_unusable() {
        let listed = vec![
            AccountRecord {
                id: id("822529998967"),
                name: "Acme Site (dev)".into(),
                email: "dev@acme.example".into(),
                status: AccountStatus::Active,
            },
            AccountRecord {
                id: id("333333333333"),
                name: "Acme Site (prod)".into(),
                email: "prod@acme.example".into(),
                status: AccountStatus::Suspended,
            },
        ];
        assert!(account_usable(&listed, &id("822529998967")).is_ok());
        assert!(account_usable(&listed, &id("333333333333")).is_err());
        assert!(account_usable(&listed, &id("444444444444"))
            .unwrap_err()
            .contains("not a member"));
    }

    #[test]
    fn only_permission_denied_counts_as_refused() {
        assert!(expect_denied(Err(ProviderError::PermissionDenied("no".into())), "x").is_ok());
        assert!(expect_denied(Ok(()), "x").is_err());
        assert!(expect_denied(Err(ProviderError::Transient("slow".into())), "x").is_err());
    }
}
