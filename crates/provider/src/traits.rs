use async_trait::async_trait;
use foundation_core::AccountId;

use crate::error::ProviderError;
use crate::records::{
    AccountRecord, AssumeRoleRequest, AssumedSession, BucketSettings, CreationStatus, KeyRecord,
    ObjectVersion, OidcProvider, OidcProviderSpec, Organization, OrganizationalUnit, RoleRecord,
    RoleSpec, TableRecord, WebIdentityToken,
};

/// The cloud control-plane seam every phase talks through.
///
/// Calls that act inside one account take that account's ID first; the
/// implementation is responsible for reaching it (e.g. through the
/// organization's cross-account access role). Organization calls act on the
/// management account implicitly.
///
/// ## Existence and creation
///
/// Lookups return `Ok(None)` (or `Ok(false)`) for absent resources and never
/// `NotFound`. Create calls return `Err(ProviderError::AlreadyExists)` when the
/// resource is already there, so callers can converge by re-reading. Deletes
/// of absent resources return `Err(ProviderError::NotFound)`.
///
/// ## Thread safety
///
/// Implementations must be `Send + Sync` so phases can fan out across
/// accounts concurrently.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short implementation name for logs.
    fn name(&self) -> &str;

    // ── Organizations ────────────────────────────────────────────────────────

    async fn describe_organization(&self) -> Result<Option<Organization>, ProviderError>;

    async fn create_organization(&self) -> Result<Organization, ProviderError>;

    async fn list_organizational_units(
        &self,
        parent_id: &str,
    ) -> Result<Vec<OrganizationalUnit>, ProviderError>;

    async fn create_organizational_unit(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<OrganizationalUnit, ProviderError>;

    /// Fails with `Conflict` while the unit still contains accounts or units.
    async fn delete_organizational_unit(&self, unit_id: &str) -> Result<(), ProviderError>;

    async fn list_accounts(&self) -> Result<Vec<AccountRecord>, ProviderError>;

    /// Request a new member account. Returns the creation request ID; the
    /// account materializes asynchronously.
    async fn create_account(&self, name: &str, email: &str) -> Result<String, ProviderError>;

    async fn describe_create_account_status(
        &self,
        request_id: &str,
    ) -> Result<CreationStatus, ProviderError>;

    /// ID of the root or unit that directly contains `account`.
    async fn list_parent(&self, account: &AccountId) -> Result<String, ProviderError>;

    async fn move_account(
        &self,
        account: &AccountId,
        source_parent_id: &str,
        destination_parent_id: &str,
    ) -> Result<(), ProviderError>;

    /// Begin closing a member account. Irreversible for the provider's
    /// post-closure period.
    async fn close_account(&self, account: &AccountId) -> Result<(), ProviderError>;

    // ── Identity ─────────────────────────────────────────────────────────────

    async fn get_oidc_provider(
        &self,
        account: &AccountId,
        url: &str,
    ) -> Result<Option<OidcProvider>, ProviderError>;

    async fn create_oidc_provider(
        &self,
        account: &AccountId,
        spec: &OidcProviderSpec,
    ) -> Result<OidcProvider, ProviderError>;

    /// Replace the audiences and thumbprints of an existing provider.
    async fn update_oidc_provider(
        &self,
        account: &AccountId,
        arn: &str,
        spec: &OidcProviderSpec,
    ) -> Result<(), ProviderError>;

    async fn delete_oidc_provider(&self, account: &AccountId, arn: &str)
        -> Result<(), ProviderError>;

    async fn get_role(
        &self,
        account: &AccountId,
        name: &str,
    ) -> Result<Option<RoleRecord>, ProviderError>;

    async fn create_role(
        &self,
        account: &AccountId,
        spec: &RoleSpec,
    ) -> Result<RoleRecord, ProviderError>;

    async fn update_trust_policy(
        &self,
        account: &AccountId,
        role: &str,
        document: &str,
    ) -> Result<(), ProviderError>;

    /// Fails with `Conflict` while inline policies are still attached.
    async fn delete_role(&self, account: &AccountId, role: &str) -> Result<(), ProviderError>;

    async fn get_role_policy(
        &self,
        account: &AccountId,
        role: &str,
        policy: &str,
    ) -> Result<Option<String>, ProviderError>;

    async fn put_role_policy(
        &self,
        account: &AccountId,
        role: &str,
        policy: &str,
        document: &str,
    ) -> Result<(), ProviderError>;

    async fn list_role_policies(
        &self,
        account: &AccountId,
        role: &str,
    ) -> Result<Vec<String>, ProviderError>;

    async fn delete_role_policy(
        &self,
        account: &AccountId,
        role: &str,
        policy: &str,
    ) -> Result<(), ProviderError>;

    /// Cross-account assumption evaluated against the role's trust policy.
    /// Denials surface as `PermissionDenied`.
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedSession, ProviderError>;

    /// Federated assumption with a CI identity token.
    async fn assume_role_with_web_identity(
        &self,
        role_arn: &str,
        token: &WebIdentityToken,
    ) -> Result<AssumedSession, ProviderError>;

    // ── Key management ───────────────────────────────────────────────────────

    async fn find_key_by_alias(
        &self,
        account: &AccountId,
        alias: &str,
    ) -> Result<Option<KeyRecord>, ProviderError>;

    async fn create_key(
        &self,
        account: &AccountId,
        description: &str,
    ) -> Result<KeyRecord, ProviderError>;

    async fn create_alias(
        &self,
        account: &AccountId,
        alias: &str,
        key_id: &str,
    ) -> Result<(), ProviderError>;

    async fn delete_alias(&self, account: &AccountId, alias: &str) -> Result<(), ProviderError>;

    async fn schedule_key_deletion(
        &self,
        account: &AccountId,
        key_id: &str,
        window_days: u32,
    ) -> Result<(), ProviderError>;

    // ── Object store ─────────────────────────────────────────────────────────

    /// `Ok(false)` when no bucket of that name exists anywhere.
    /// `Err(NamingCollision)` when the name belongs to someone else.
    async fn head_bucket(&self, account: &AccountId, bucket: &str)
        -> Result<bool, ProviderError>;

    async fn create_bucket(
        &self,
        account: &AccountId,
        bucket: &str,
        region: &str,
    ) -> Result<(), ProviderError>;

    /// Fails with `Conflict` while any object version or delete marker remains.
    async fn delete_bucket(&self, account: &AccountId, bucket: &str) -> Result<(), ProviderError>;

    async fn put_bucket_versioning(
        &self,
        account: &AccountId,
        bucket: &str,
        enabled: bool,
    ) -> Result<(), ProviderError>;

    async fn put_bucket_encryption(
        &self,
        account: &AccountId,
        bucket: &str,
        kms_key_arn: &str,
    ) -> Result<(), ProviderError>;

    async fn put_public_access_block(
        &self,
        account: &AccountId,
        bucket: &str,
    ) -> Result<(), ProviderError>;

    async fn get_bucket_settings(
        &self,
        account: &AccountId,
        bucket: &str,
    ) -> Result<BucketSettings, ProviderError>;

    /// Returns the new version ID.
    async fn put_object(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
        body: &[u8],
    ) -> Result<String, ProviderError>;

    async fn get_object(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError>;

    /// On a versioned bucket this writes a delete marker.
    async fn delete_object(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
    ) -> Result<(), ProviderError>;

    /// Up to `max_keys` versions and delete markers, oldest first.
    async fn list_object_versions(
        &self,
        account: &AccountId,
        bucket: &str,
        max_keys: usize,
    ) -> Result<Vec<ObjectVersion>, ProviderError>;

    async fn delete_object_version(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<(), ProviderError>;

    // ── Lock tables ──────────────────────────────────────────────────────────

    async fn describe_table(
        &self,
        account: &AccountId,
        table: &str,
    ) -> Result<Option<TableRecord>, ProviderError>;

    async fn create_table(
        &self,
        account: &AccountId,
        table: &str,
        hash_key: &str,
    ) -> Result<TableRecord, ProviderError>;

    async fn delete_table(&self, account: &AccountId, table: &str) -> Result<(), ProviderError>;

    async fn put_item(
        &self,
        account: &AccountId,
        table: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ProviderError>;

    async fn get_item(
        &self,
        account: &AccountId,
        table: &str,
        key: &str,
    ) -> Result<Option<String>, ProviderError>;

    async fn delete_item(
        &self,
        account: &AccountId,
        table: &str,
        key: &str,
    ) -> Result<(), ProviderError>;
}
