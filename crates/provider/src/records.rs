//! Records exchanged with the control plane.
//!
//! All types are serde-serializable: the gateway provider sends them over the
//! wire and the simulated provider persists them in its state file.

use foundation_core::{AccountId, AccountStatus};
use serde::{Deserialize, Serialize};

// ── Organizations ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub root_id: String,
    pub management_account_id: AccountId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationalUnit {
    pub id: String,
    pub name: String,
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub name: String,
    pub email: String,
    pub status: AccountStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationState {
    InProgress,
    Succeeded,
    Failed,
}

/// Status of an asynchronous account-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationStatus {
    pub request_id: String,
    pub state: CreationState,
    pub account_id: Option<AccountId>,
    pub failure_reason: Option<String>,
}

// ── Identity ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcProviderSpec {
    pub url: String,
    pub audiences: Vec<String>,
    pub thumbprints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcProvider {
    pub arn: String,
    pub url: String,
    pub audiences: Vec<String>,
    pub thumbprints: Vec<String>,
}

impl OidcProvider {
    /// Whether this provider already trusts the given audiences and thumbprints.
    pub fn satisfies(&self, spec: &OidcProviderSpec) -> bool {
        spec.audiences.iter().all(|a| self.audiences.contains(a))
            && spec.thumbprints.iter().all(|t| self.thumbprints.contains(t))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    pub description: String,
    pub trust_policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub name: String,
    pub arn: String,
    pub description: String,
    /// Raw JSON as stored by the provider.
    pub trust_policy: String,
}

/// A cross-account `AssumeRole` request made from `caller_account`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub caller_account: AccountId,
    pub external_id: Option<String>,
    pub session_name: String,
}

/// The claims of a CI identity token presented to `AssumeRoleWithWebIdentity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebIdentityToken {
    pub issuer: String,
    pub subject: String,
    pub audience: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssumedSession {
    pub role_arn: String,
    pub account_id: AccountId,
    pub session_name: String,
}

// ── Key management ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Enabled,
    PendingDeletion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: String,
    pub arn: String,
    pub state: KeyState,
}

// ── Object store ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSettings {
    pub region: String,
    pub versioning: bool,
    /// ARN of the key used for default encryption, if any.
    pub kms_key_arn: Option<String>,
    pub public_access_blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub is_delete_marker: bool,
}

// ── Lock tables ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Creating,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub name: String,
    pub arn: String,
    pub hash_key: String,
    pub status: TableStatus,
}
