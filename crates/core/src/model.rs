//! Domain types shared by every phase.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::naming;

/// Logical name of the management account in the account map.
pub const MANAGEMENT: &str = "management";

/// Logical environment name of the management-account ("central") state backend.
pub const CENTRAL: &str = "central";

// ── AccountId ────────────────────────────────────────────────────────────────

/// A 12-digit cloud account ID. Immutable once assigned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Parse an account ID, accepting exactly twelve ASCII digits.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("account ID is empty".to_string());
        }
        if trimmed.len() != 12 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!(
                "account ID '{}' is not 12 digits",
                trimmed
            ));
        }
        Ok(AccountId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccountId::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

// ── AccountStatus ────────────────────────────────────────────────────────────

/// Provider-driven lifecycle of a member account.
///
/// Only `Requested` (on create) and `PendingClosure` (on close) are ever
/// asserted by this tool; every other transition is observed by polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Requested,
    Creating,
    Active,
    Suspended,
    PendingClosure,
}

impl AccountStatus {
    pub fn is_usable(self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountStatus::Requested => "requested",
            AccountStatus::Creating => "creating",
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::PendingClosure => "pending_closure",
        };
        f.write_str(s)
    }
}

// ── AccountMap ───────────────────────────────────────────────────────────────

/// Logical environment name → account ID, persisted as `accounts.json`.
///
/// The management account is stored under [`MANAGEMENT`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountMap(BTreeMap<String, AccountId>);

impl AccountMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, environment: &str) -> Option<&AccountId> {
        self.0.get(environment)
    }

    pub fn insert(&mut self, environment: impl Into<String>, id: AccountId) {
        self.0.insert(environment.into(), id);
    }

    pub fn remove(&mut self, environment: &str) -> Option<AccountId> {
        self.0.remove(environment)
    }

    pub fn management(&self) -> Option<&AccountId> {
        self.0.get(MANAGEMENT)
    }

    /// Workload accounts only (everything except the management entry).
    pub fn workloads(&self) -> impl Iterator<Item = (&str, &AccountId)> {
        self.0
            .iter()
            .filter(|(env, _)| env.as_str() != MANAGEMENT)
            .map(|(env, id)| (env.as_str(), id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AccountId)> {
        self.0.iter().map(|(env, id)| (env.as_str(), id))
    }

    /// Overlay `other` onto this map; entries in `other` win.
    pub fn merge(&mut self, other: &AccountMap) {
        for (env, id) in &other.0 {
            self.0.insert(env.clone(), id.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── RolePurpose ──────────────────────────────────────────────────────────────

/// The three role kinds provisioned per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolePurpose {
    /// Assumed by CI through the federated identity provider.
    Deployment,
    /// Assumed by operators from the management account for console access.
    ReadOnly,
    /// Management-account role CI uses to bootstrap member accounts.
    CentralBootstrap,
}

impl RolePurpose {
    pub fn label(self) -> &'static str {
        match self {
            RolePurpose::Deployment => "deployment",
            RolePurpose::ReadOnly => "read-only",
            RolePurpose::CentralBootstrap => "central bootstrap",
        }
    }

    /// Whether CI assumes this role via web identity (as opposed to an
    /// external-ID cross-account assumption).
    pub fn is_federated(self) -> bool {
        matches!(self, RolePurpose::Deployment | RolePurpose::CentralBootstrap)
    }
}

// ── BackendIdentifiers ───────────────────────────────────────────────────────

/// Every identifier of one environment's state backend.
///
/// All fields are pure functions of (project, environment, account ID, region),
/// so re-running against the same account recomputes identical values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendIdentifiers {
    pub environment: String,
    pub account_id: AccountId,
    pub bucket: String,
    pub lock_table: String,
    pub key_alias: String,
    pub state_key: String,
    pub region: String,
}

impl BackendIdentifiers {
    pub fn derive(project: &str, environment: &str, account_id: &AccountId, region: &str) -> Self {
        BackendIdentifiers {
            environment: environment.to_string(),
            account_id: account_id.clone(),
            bucket: naming::state_bucket(project, environment, account_id),
            lock_table: naming::lock_table(project, environment),
            key_alias: naming::key_alias(project, environment),
            state_key: naming::state_key(project, environment),
            region: region.to_string(),
        }
    }

    pub fn is_central(&self) -> bool {
        self.environment == CENTRAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_accepts_twelve_digits() {
        let id = AccountId::parse("822529998967").unwrap();
        assert_eq!(id.as_str(), "822529998967");
        assert_eq!(AccountId::parse(" 822529998967 ").unwrap(), id);
    }

    #[test]
    fn account_id_rejects_malformed_values() {
        assert!(AccountId::parse("").unwrap_err().contains("empty"));
        assert!(AccountId::parse("12345").is_err());
        assert!(AccountId::parse("82252999896x").is_err());
        assert!(AccountId::parse("8225299989671").is_err());
    }

    #[test]
    fn account_map_serializes_as_flat_object() {
        let mut map = AccountMap::new();
        map.insert(MANAGEMENT, AccountId::parse("111111111111").unwrap());
        map.insert("dev", AccountId::parse("822529998967").unwrap());
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"dev": "822529998967", "management": "111111111111"})
        );
        let back: AccountMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
        assert_eq!(back.workloads().count(), 1);
    }

    #[test]
    fn account_map_rejects_malformed_ids_on_load() {
        let err = serde_json::from_str::<AccountMap>(r#"{"dev": "abc"}"#).unwrap_err();
        assert!(err.to_string().contains("not 12 digits"));
    }
}
