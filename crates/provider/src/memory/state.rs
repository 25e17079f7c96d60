//! The serializable state of the simulated control plane.

use std::collections::{BTreeMap, BTreeSet};

use foundation_core::AccountId;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::records::{
    AccountRecord, BucketSettings, CreationStatus, KeyRecord, OidcProvider, Organization,
    OrganizationalUnit, RoleRecord, TableRecord,
};

pub(super) const DEFAULT_MANAGEMENT_ACCOUNT: &str = "100000000000";
pub(super) const DEFAULT_REGION: &str = "us-east-1";
const FIRST_MEMBER_ACCOUNT: u64 = 200_000_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct ControlPlane {
    pub management_account_id: AccountId,
    pub region: String,
    /// Status polls an account-creation request answers `in_progress` to.
    pub creation_polls: u32,
    /// Describe calls a new lock table answers `creating` to.
    #[serde(default)]
    pub table_polls: u32,
    pub sequence: u64,
    pub organization: Option<Organization>,
    #[serde(default)]
    pub units: BTreeMap<String, OrganizationalUnit>,
    #[serde(default)]
    pub accounts: BTreeMap<String, MemberAccount>,
    #[serde(default)]
    pub requests: BTreeMap<String, CreationRequest>,
    #[serde(default)]
    pub identity: BTreeMap<String, AccountIdentity>,
    #[serde(default)]
    pub keys: BTreeMap<String, AccountKeys>,
    #[serde(default)]
    pub buckets: BTreeMap<String, Bucket>,
    /// Names held by tenants outside this organization.
    #[serde(default)]
    pub foreign_buckets: BTreeSet<String>,
    #[serde(default)]
    pub tables: BTreeMap<String, BTreeMap<String, Table>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct MemberAccount {
    pub record: AccountRecord,
    pub parent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct CreationRequest {
    pub name: String,
    pub email: String,
    pub polls_remaining: u32,
    pub status: CreationStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct AccountIdentity {
    /// Keyed by ARN.
    pub oidc_providers: BTreeMap<String, OidcProvider>,
    pub roles: BTreeMap<String, Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct Role {
    pub record: RoleRecord,
    pub policies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct AccountKeys {
    pub keys: BTreeMap<String, KeyRecord>,
    /// Alias → key ID.
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct Bucket {
    pub owner: AccountId,
    pub settings: BucketSettings,
    /// Oldest first. `body == None` is a delete marker.
    pub versions: Vec<StoredVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct StoredVersion {
    pub key: String,
    pub version_id: String,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct Table {
    pub record: TableRecord,
    #[serde(default)]
    pub polls_remaining: u32,
    pub items: BTreeMap<String, String>,
}

impl ControlPlane {
    pub fn new(management_account_id: AccountId) -> Self {
        ControlPlane {
            management_account_id,
            region: DEFAULT_REGION.to_string(),
            creation_polls: 2,
            table_polls: 0,
            sequence: 0,
            organization: None,
            units: BTreeMap::new(),
            accounts: BTreeMap::new(),
            requests: BTreeMap::new(),
            identity: BTreeMap::new(),
            keys: BTreeMap::new(),
            buckets: BTreeMap::new(),
            foreign_buckets: BTreeSet::new(),
            tables: BTreeMap::new(),
        }
    }

    pub fn next(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn allocate_account_id(&mut self) -> Result<AccountId, ProviderError> {
        let n = self.next();
        AccountId::parse(&format!("{:012}", FIRST_MEMBER_ACCOUNT + n)).map_err(ProviderError::Backend)
    }

    pub fn require_organization(&self) -> Result<&Organization, ProviderError> {
        self.organization
            .as_ref()
            .ok_or_else(|| ProviderError::Validation("the organization does not exist".into()))
    }

    /// Whether `id` names the organization root or an existing unit.
    pub fn is_container(&self, id: &str) -> bool {
        self.organization.as_ref().is_some_and(|o| o.root_id == id) || self.units.contains_key(id)
    }

    /// Account-local calls need an operational account to land in.
    pub fn ensure_reachable(&self, account: &AccountId) -> Result<(), ProviderError> {
        if *account == self.management_account_id {
            return Ok(());
        }
        match self.accounts.get(account.as_str()) {
            Some(member) if member.record.status.is_usable() => Ok(()),
            Some(member) => Err(ProviderError::PermissionDenied(format!(
                "account {} is {}",
                account, member.record.status
            ))),
            None => Err(ProviderError::PermissionDenied(format!(
                "no access to account {}",
                account
            ))),
        }
    }

    pub fn identity_mut(&mut self, account: &AccountId) -> &mut AccountIdentity {
        self.identity.entry(account.to_string()).or_default()
    }

    pub fn role(&self, account: &AccountId, name: &str) -> Option<&Role> {
        self.identity
            .get(account.as_str())
            .and_then(|i| i.roles.get(name))
    }

    pub fn role_mut(&mut self, account: &AccountId, name: &str) -> Result<&mut Role, ProviderError> {
        self.identity_mut(account)
            .roles
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(format!("role {} in {}", name, account)))
    }

    pub fn keys_mut(&mut self, account: &AccountId) -> &mut AccountKeys {
        self.keys.entry(account.to_string()).or_default()
    }

    /// A bucket owned by `account`. Any other owner reads as absent.
    pub fn owned_bucket_mut(
        &mut self,
        account: &AccountId,
        name: &str,
    ) -> Result<&mut Bucket, ProviderError> {
        match self.buckets.get_mut(name) {
            Some(bucket) if bucket.owner == *account => Ok(bucket),
            _ => Err(ProviderError::NotFound(format!("bucket {}", name))),
        }
    }

    pub fn table_mut(&mut self, account: &AccountId, name: &str) -> Result<&mut Table, ProviderError> {
        self.tables
            .get_mut(account.as_str())
            .and_then(|t| t.get_mut(name))
            .ok_or_else(|| ProviderError::NotFound(format!("table {} in {}", name, account)))
    }
}

/// Parse `arn:aws:iam::<account>:role/<name>`.
pub(super) fn parse_role_arn(arn: &str) -> Option<(AccountId, &str)> {
    let rest = arn.strip_prefix("arn:aws:iam::")?;
    let (account, resource) = rest.split_once(':')?;
    let name = resource.strip_prefix("role/")?;
    Some((AccountId::parse(account).ok()?, name))
}

pub(super) fn is_valid_bucket_name(name: &str) -> bool {
    (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric())
}

pub(super) fn check_json(document: &str) -> Result<(), ProviderError> {
    serde_json::from_str::<serde_json::Value>(document)
        .map(|_| ())
        .map_err(|e| ProviderError::Validation(format!("malformed policy document: {}", e)))
}
