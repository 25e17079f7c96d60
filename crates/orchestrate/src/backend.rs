//! State Backend Provisioner: per-environment key, versioned encrypted
//! bucket, and lock table.

use async_trait::async_trait;
use foundation_core::{
    naming, AccountId, AccountMap, ActionRecord, ActionStatus, BackendIdentifiers, Config, Phase,
    CENTRAL,
};
use foundation_provider::{
    CloudProvider, KeyRecord, KeyState, ProviderError, TableRecord, TableStatus,
};
use futures::future::join_all;

use crate::context::RunContext;
use crate::ensure::{ensure, Ensured, Resource};
use crate::retry::{poll_until, retry_transient};

// ── Resources ────────────────────────────────────────────────────────────────

pub(crate) struct KeyResource {
    pub account: AccountId,
    pub alias: String,
    pub description: String,
    pub deletion_window_days: u32,
}

impl KeyResource {
    pub fn new(config: &Config, backend: &BackendIdentifiers) -> Self {
        KeyResource {
            account: backend.account_id.clone(),
            alias: backend.key_alias.clone(),
            description: format!(
                "{} state encryption ({})",
                config.project.full_name, backend.environment
            ),
            deletion_window_days: config.backend.key_deletion_window_days,
        }
    }
}

#[async_trait]
impl Resource for KeyResource {
    type Record = KeyRecord;

    fn label(&self) -> String {
        format!("key {}", self.alias)
    }

    async fn lookup(&self, provider: &dyn CloudProvider) -> Result<Option<KeyRecord>, ProviderError> {
        provider.find_key_by_alias(&self.account, &self.alias).await
    }

    async fn create(&self, provider: &dyn CloudProvider) -> Result<KeyRecord, ProviderError> {
        let key = provider.create_key(&self.account, &self.description).await?;
        provider
            .create_alias(&self.account, &self.alias, &key.key_id)
            .await?;
        Ok(key)
    }

    async fn delete(&self, provider: &dyn CloudProvider, key: &KeyRecord) -> Result<(), ProviderError> {
        provider.delete_alias(&self.account, &self.alias).await?;
        provider
            .schedule_key_deletion(&self.account, &key.key_id, self.deletion_window_days)
            .await
    }
}

pub(crate) struct BucketResource {
    pub account: AccountId,
    pub bucket: String,
    pub region: String,
}

impl BucketResource {
    pub fn new(backend: &BackendIdentifiers) -> Self {
        BucketResource {
            account: backend.account_id.clone(),
            bucket: backend.bucket.clone(),
            region: backend.region.clone(),
        }
    }
}

#[async_trait]
impl Resource for BucketResource {
    type Record = String;

    fn label(&self) -> String {
        format!("bucket {}", self.bucket)
    }

    async fn lookup(&self, provider: &dyn CloudProvider) -> Result<Option<String>, ProviderError> {
        let present = provider.head_bucket(&self.account, &self.bucket).await?;
        Ok(present.then(|| self.bucket.clone()))
    }

    async fn create(&self, provider: &dyn CloudProvider) -> Result<String, ProviderError> {
        provider
            .create_bucket(&self.account, &self.bucket, &self.region)
            .await?;
        Ok(self.bucket.clone())
    }

    /// The bucket must already be empty; see `destroy::empty_bucket`.
    async fn delete(&self, provider: &dyn CloudProvider, _: &String) -> Result<(), ProviderError> {
        provider.delete_bucket(&self.account, &self.bucket).await
    }
}

pub(crate) struct TableResource {
    pub account: AccountId,
    pub table: String,
}

impl TableResource {
    pub fn new(backend: &BackendIdentifiers) -> Self {
        TableResource {
            account: backend.account_id.clone(),
            table: backend.lock_table.clone(),
        }
    }
}

#[async_trait]
impl Resource for TableResource {
    type Record = TableRecord;

    fn label(&self) -> String {
        format!("lock table {}", self.table)
    }

    async fn lookup(&self, provider: &dyn CloudProvider) -> Result<Option<TableRecord>, ProviderError> {
        provider.describe_table(&self.account, &self.table).await
    }

    async fn create(&self, provider: &dyn CloudProvider) -> Result<TableRecord, ProviderError> {
        provider
            .create_table(&self.account, &self.table, naming::LOCK_TABLE_HASH_KEY)
            .await
    }

    async fn delete(&self, provider: &dyn CloudProvider, _: &TableRecord) -> Result<(), ProviderError> {
        provider.delete_table(&self.account, &self.table).await
    }
}

// ── Planning ─────────────────────────────────────────────────────────────────

/// Backend identifiers for every configured environment with a recorded
/// account, plus the central backend when enabled.
pub fn plan_backends(config: &Config, accounts: &AccountMap) -> Vec<BackendIdentifiers> {
    let project = &config.project;
    let mut out: Vec<BackendIdentifiers> = config
        .environments()
        .filter_map(|env| {
            accounts
                .get(env)
                .map(|id| BackendIdentifiers::derive(&project.short_name, env, id, &project.region))
        })
        .collect();
    if config.backend.central {
        if let Some(management) = accounts.management() {
            out.push(BackendIdentifiers::derive(
                &project.short_name,
                CENTRAL,
                management,
                &project.region,
            ));
        }
    }
    out
}

// ── Phase ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BackendOutcome {
    pub identifiers: BackendIdentifiers,
    /// `None` in a dry run where the key does not exist yet.
    pub kms_key_arn: Option<String>,
    pub actions: Vec<ActionRecord>,
    pub failure: Option<String>,
}

impl BackendOutcome {
    fn push(&mut self, resource: &str, status: ActionStatus) {
        self.actions.push(ActionRecord::new(
            Phase::Backend,
            &self.identifiers.environment,
            resource,
            status,
        ));
    }

    fn fail(&mut self, resource: &str, error: &ProviderError) {
        tracing::error!(env = %self.identifiers.environment, resource, error = %error, "failed");
        let reason = error.to_string();
        self.failure = Some(format!("{}: {}", resource, reason));
        self.push(resource, ActionStatus::Failed { reason });
    }
}

/// Provision every backend in `backends`, concurrently across environments.
pub async fn provision_backends(
    ctx: &RunContext<'_>,
    backends: &[BackendIdentifiers],
) -> Vec<BackendOutcome> {
    join_all(backends.iter().map(|b| provision_backend(ctx, b))).await
}

/// Key, then bucket (encrypted with the key), then lock table.
async fn provision_backend(ctx: &RunContext<'_>, backend: &BackendIdentifiers) -> BackendOutcome {
    let env = backend.environment.as_str();
    let mut outcome = BackendOutcome {
        identifiers: backend.clone(),
        kms_key_arn: None,
        actions: Vec::new(),
        failure: None,
    };

    let key = KeyResource::new(ctx.config, backend);
    let key_label = key.label();
    match ensure(ctx, env, &key).await {
        Ok(Ensured::Existing(record)) if record.state == KeyState::PendingDeletion => {
            outcome.fail(
                &key_label,
                &ProviderError::Conflict(
                    "key is pending deletion; cancel the deletion before bootstrapping".to_string(),
                ),
            );
            return outcome;
        }
        Ok(ensured) => {
            outcome.push(&key_label, ensured.status());
            outcome.kms_key_arn = ensured.into_record().map(|k| k.arn);
        }
        Err(e) => {
            outcome.fail(&key_label, &e);
            return outcome;
        }
    }

    let bucket = BucketResource::new(backend);
    let bucket_label = bucket.label();
    let bucket_status = match ensure(ctx, env, &bucket).await {
        Ok(ensured) => ensured.status(),
        Err(e) => {
            if matches!(e, ProviderError::NamingCollision { .. }) {
                tracing::error!(env, bucket = %backend.bucket, "bucket name is taken outside this organization");
            }
            outcome.fail(&bucket_label, &e);
            return outcome;
        }
    };
    outcome.push(&bucket_label, bucket_status.clone());

    let settings_label = format!("{} settings", bucket_label);
    match configure_bucket(ctx, backend, outcome.kms_key_arn.as_deref(), &bucket_status).await {
        Ok(status) => outcome.push(&settings_label, status),
        Err(e) => {
            outcome.fail(&settings_label, &e);
            return outcome;
        }
    }

    let table = TableResource::new(backend);
    let table_label = table.label();
    match ensure(ctx, env, &table).await {
        Ok(ensured)
            if ensured
                .record()
                .is_some_and(|record| record.status == TableStatus::Creating) =>
        {
            match wait_for_table(ctx, &table).await {
                Ok(()) => outcome.push(&table_label, ensured.status()),
                Err(reason) => {
                    outcome.fail(&table_label, &ProviderError::Conflict(reason));
                }
            }
        }
        Ok(ensured) => outcome.push(&table_label, ensured.status()),
        Err(e) => {
            outcome.fail(&table_label, &e);
        }
    }
    outcome
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketSetting {
    Versioning,
    Encryption,
    PublicAccessBlock,
}

/// Versioning on, default encryption with the backend key, public access
/// blocked. Applies only what differs.
async fn configure_bucket(
    ctx: &RunContext<'_>,
    backend: &BackendIdentifiers,
    kms_key_arn: Option<&str>,
    bucket_status: &ActionStatus,
) -> Result<ActionStatus, ProviderError> {
    if *bucket_status == ActionStatus::Planned {
        return Ok(ActionStatus::Planned);
    }
    let provider = ctx.provider;
    let (account, bucket) = (&backend.account_id, backend.bucket.as_str());
    let retry = &ctx.config.retry;
    let settings = retry_transient(ctx.clock, retry, "reading bucket settings", move || {
        provider.get_bucket_settings(account, bucket)
    })
    .await?;

    let mut pending = Vec::new();
    if !settings.versioning {
        pending.push(BucketSetting::Versioning);
    }
    if kms_key_arn.is_none() || settings.kms_key_arn.as_deref() != kms_key_arn {
        pending.push(BucketSetting::Encryption);
    }
    if !settings.public_access_blocked {
        pending.push(BucketSetting::PublicAccessBlock);
    }
    if pending.is_empty() {
        return Ok(ActionStatus::Existing);
    }
    if *bucket_status == ActionStatus::Existing {
        tracing::warn!(env = %backend.environment, bucket, drifted = ?pending, "bucket settings drifted");
    }
    if ctx.dry_run() {
        tracing::info!(bucket, settings = ?pending, dry_run = true, "would configure bucket");
        return Ok(ActionStatus::Planned);
    }

    for setting in pending.iter().copied() {
        match setting {
            BucketSetting::Versioning => {
                retry_transient(ctx.clock, retry, "enabling versioning", move || {
                    provider.put_bucket_versioning(account, bucket, true)
                })
                .await?
            }
            BucketSetting::Encryption => {
                let Some(arn) = kms_key_arn else {
                    return Err(ProviderError::Validation(
                        "no encryption key available for the bucket".to_string(),
                    ));
                };
                retry_transient(ctx.clock, retry, "setting default encryption", move || {
                    provider.put_bucket_encryption(account, bucket, arn)
                })
                .await?
            }
            BucketSetting::PublicAccessBlock => {
                retry_transient(ctx.clock, retry, "blocking public access", move || {
                    provider.put_public_access_block(account, bucket)
                })
                .await?
            }
        }
    }
    tracing::info!(bucket, settings = ?pending, "bucket configured");
    Ok(if *bucket_status == ActionStatus::Created {
        ActionStatus::Created
    } else {
        ActionStatus::Updated
    })
}

async fn wait_for_table(ctx: &RunContext<'_>, table: &TableResource) -> Result<(), String> {
    let provider = ctx.provider;
    let (account, name) = (&table.account, table.table.as_str());
    poll_until(
        ctx.clock,
        &ctx.config.polling,
        &format!("lock table {}", name),
        move || async move {
            let record = provider.describe_table(account, name).await?;
            Ok::<_, ProviderError>(record.filter(|t| t.status == TableStatus::Active).map(|_| ()))
        },
    )
    .await
    .map_err(|e| e.to_string())
}
