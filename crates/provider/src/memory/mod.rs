//! A deterministic, in-process control plane.
//!
//! `MemoryProvider` behaves like the real control plane in every way the
//! orchestrator depends on: asynchronous account creation, trust-policy
//! evaluation on role assumption, versioned buckets that refuse deletion
//! while non-empty, and a global bucket namespace shared with other tenants.
//!
//! It records every call it receives, which is what dry-run purity tests
//! assert against, and it supports fault injection for failure-isolation
//! tests. With [`MemoryProvider::open`] its state is persisted to a JSON file
//! after every mutating call, which backs the `local` provider kind.

mod state;
mod trust;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use foundation_core::{naming, AccountId, AccountStatus};

use crate::error::ProviderError;
use crate::operation::Operation;
use crate::records::{
    AccountRecord, AssumeRoleRequest, AssumedSession, BucketSettings, CreationState,
    CreationStatus, KeyRecord, KeyState, ObjectVersion, OidcProvider, OidcProviderSpec,
    Organization, OrganizationalUnit, RoleRecord, RoleSpec, TableRecord, TableStatus,
    WebIdentityToken,
};
use crate::traits::CloudProvider;

use state::{
    check_json, is_valid_bucket_name, parse_role_arn, Bucket, ControlPlane, CreationRequest,
    MemberAccount, Role, StoredVersion, Table,
};

/// One call received by a [`MemoryProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub account: Option<AccountId>,
    /// The resource acted on (role name, bucket name, account name, ...).
    pub target: String,
}

/// An injected failure, matched against incoming calls.
#[derive(Debug, Clone)]
pub struct Fault {
    operation: Operation,
    account: Option<AccountId>,
    target: Option<String>,
    error: ProviderError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

impl Fault {
    /// Fail the next matching call once.
    pub fn new(operation: Operation, error: ProviderError) -> Self {
        Fault {
            operation,
            account: None,
            target: None,
            error,
            remaining: Some(1),
        }
    }

    pub fn in_account(mut self, account: &AccountId) -> Self {
        self.account = Some(account.clone());
        self
    }

    pub fn on_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    pub fn always(mut self) -> Self {
        self.remaining = None;
        self
    }

    fn matches(&self, call: &Call) -> bool {
        self.operation == call.operation
            && self
                .account
                .as_ref()
                .map_or(true, |a| call.account.as_ref() == Some(a))
            && self.target.as_ref().map_or(true, |t| call.target == *t)
    }
}

pub struct MemoryProvider {
    state: Mutex<ControlPlane>,
    path: Option<PathBuf>,
    calls: Mutex<Vec<Call>>,
    faults: Mutex<Vec<Fault>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// A fresh control plane with the default management account.
    pub fn new() -> Self {
        let management = AccountId::parse(state::DEFAULT_MANAGEMENT_ACCOUNT)
            .expect("default management account ID is well-formed");
        Self::from_state(ControlPlane::new(management), None)
    }

    /// Load the control plane persisted at `path`, or start a fresh one that
    /// will be written there on the first mutation. `management` only applies
    /// to a fresh control plane.
    pub fn open(path: &Path, management: Option<&AccountId>) -> Result<Self, ProviderError> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ProviderError::Backend(format!("reading {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                ProviderError::Backend(format!("parsing {}: {}", path.display(), e))
            })?
        } else {
            let mut fresh = Self::new().into_state();
            if let Some(id) = management {
                fresh.management_account_id = id.clone();
            }
            fresh
        };
        Ok(Self::from_state(state, Some(path.to_path_buf())))
    }

    fn from_state(state: ControlPlane, path: Option<PathBuf>) -> Self {
        MemoryProvider {
            state: Mutex::new(state),
            path,
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
        }
    }

    fn into_state(self) -> ControlPlane {
        self.state.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    // ── Builders ─────────────────────────────────────────────────────────────

    pub fn with_management_account(self, id: AccountId) -> Self {
        self.state_guard().management_account_id = id;
        self
    }

    /// Number of `in_progress` answers before an account request resolves.
    pub fn with_creation_polls(self, polls: u32) -> Self {
        self.state_guard().creation_polls = polls;
        self
    }

    /// Number of describe calls a new lock table stays `creating` for.
    pub fn with_table_polls(self, polls: u32) -> Self {
        self.state_guard().table_polls = polls;
        self
    }

    /// Reserve a bucket name for a tenant outside the organization.
    pub fn with_foreign_bucket(self, name: &str) -> Self {
        self.state_guard().foreign_buckets.insert(name.to_string());
        self
    }

    /// Register an already-active member account, as if created out of band.
    pub fn with_existing_account(self, id: &AccountId, name: &str, email: &str) -> Self {
        {
            let mut state = self.state_guard();
            let parent_id = state
                .organization
                .as_ref()
                .map(|o| o.root_id.clone())
                .unwrap_or_default();
            state.accounts.insert(
                id.to_string(),
                MemberAccount {
                    record: AccountRecord {
                        id: id.clone(),
                        name: name.to_string(),
                        email: email.to_string(),
                        status: AccountStatus::Active,
                    },
                    parent_id,
                },
            );
        }
        self
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    pub fn management_account_id(&self) -> AccountId {
        self.state_guard().management_account_id.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls_guard().clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls_guard()
            .iter()
            .filter(|c| c.operation.is_mutating())
            .cloned()
            .collect()
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.calls_guard()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls_guard().clear();
    }

    pub fn inject(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(fault);
    }

    /// Fail the next `operation` (optionally only in `account`) with `error`.
    pub fn fail_next(&self, operation: Operation, account: Option<&AccountId>, error: ProviderError) {
        let mut fault = Fault::new(operation, error);
        if let Some(account) = account {
            fault = fault.in_account(account);
        }
        self.inject(fault);
    }

    /// Number of bucket versions and delete markers in `bucket`.
    pub fn object_version_count(&self, bucket: &str) -> usize {
        self.state_guard()
            .buckets
            .get(bucket)
            .map_or(0, |b| b.versions.len())
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    fn state_guard(&self) -> MutexGuard<'_, ControlPlane> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn calls_guard(&self) -> MutexGuard<'_, Vec<Call>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_fault(&self, call: &Call) -> Option<ProviderError> {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        let index = faults.iter().position(|f| f.matches(call))?;
        let error = faults[index].error.clone();
        match &mut faults[index].remaining {
            Some(n) if *n <= 1 => {
                faults.remove(index);
            }
            Some(n) => *n -= 1,
            None => {}
        }
        Some(error)
    }

    /// Record the call, apply injected faults, then run `f` against the state.
    fn call<T>(
        &self,
        operation: Operation,
        account: Option<&AccountId>,
        target: &str,
        f: impl FnOnce(&mut ControlPlane) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let call = Call {
            operation,
            account: account.cloned(),
            target: target.to_string(),
        };
        self.calls_guard().push(call.clone());
        if let Some(error) = self.take_fault(&call) {
            tracing::debug!(%operation, resource = target, %error, "injected fault");
            return Err(error);
        }
        let mut state = self.state_guard();
        if let Some(account) = account {
            state.ensure_reachable(account)?;
        }
        let out = f(&mut *state)?;
        // Status polls advance simulated creation, so they persist too.
        if operation.is_mutating()
            || matches!(
                operation,
                Operation::DescribeCreateAccountStatus | Operation::DescribeTable
            )
        {
            self.persist(&*state)?;
        }
        Ok(out)
    }

    fn persist(&self, state: &ControlPlane) -> Result<(), ProviderError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ProviderError::Backend(format!("creating {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| ProviderError::Backend(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| ProviderError::Backend(format!("writing {}: {}", path.display(), e)))
    }
}

fn resolve_creation(state: &mut ControlPlane, request_id: &str) -> Result<CreationStatus, ProviderError> {
    let request = state
        .requests
        .get(request_id)
        .cloned()
        .ok_or_else(|| ProviderError::NotFound(format!("account request {}", request_id)))?;
    if request.status.state != CreationState::InProgress {
        return Ok(request.status);
    }
    if request.polls_remaining > 0 {
        if let Some(r) = state.requests.get_mut(request_id) {
            r.polls_remaining -= 1;
        }
        return Ok(request.status);
    }

    let duplicate = state
        .accounts
        .values()
        .any(|a| a.record.email.eq_ignore_ascii_case(&request.email));
    let status = if duplicate {
        CreationStatus {
            request_id: request_id.to_string(),
            state: CreationState::Failed,
            account_id: None,
            failure_reason: Some("EMAIL_ALREADY_EXISTS".to_string()),
        }
    } else {
        let id = state.allocate_account_id()?;
        let root_id = state.require_organization()?.root_id.clone();
        state.accounts.insert(
            id.to_string(),
            MemberAccount {
                record: AccountRecord {
                    id: id.clone(),
                    name: request.name.clone(),
                    email: request.email.clone(),
                    status: AccountStatus::Active,
                },
                parent_id: root_id,
            },
        );
        CreationStatus {
            request_id: request_id.to_string(),
            state: CreationState::Succeeded,
            account_id: Some(id),
            failure_reason: None,
        }
    };
    if let Some(r) = state.requests.get_mut(request_id) {
        r.status = status.clone();
    }
    Ok(status)
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    // ── Organizations ────────────────────────────────────────────────────────

    async fn describe_organization(&self) -> Result<Option<Organization>, ProviderError> {
        self.call(Operation::DescribeOrganization, None, "", |s| {
            Ok(s.organization.clone())
        })
    }

    async fn create_organization(&self) -> Result<Organization, ProviderError> {
        self.call(Operation::CreateOrganization, None, "", |s| {
            if s.organization.is_some() {
                return Err(ProviderError::AlreadyExists("organization".into()));
            }
            let n = s.next();
            let organization = Organization {
                id: format!("o-{:010x}", n),
                root_id: format!("r-{:04x}", n),
                management_account_id: s.management_account_id.clone(),
            };
            let management = s.management_account_id.clone();
            s.accounts.insert(
                management.to_string(),
                MemberAccount {
                    record: AccountRecord {
                        id: management,
                        name: "management".to_string(),
                        email: "management@organization.invalid".to_string(),
                        status: AccountStatus::Active,
                    },
                    parent_id: organization.root_id.clone(),
                },
            );
            // Accounts registered before the organization existed join its root.
            for account in s.accounts.values_mut() {
                if account.parent_id.is_empty() {
                    account.parent_id = organization.root_id.clone();
                }
            }
            s.organization = Some(organization.clone());
            Ok(organization)
        })
    }

    async fn list_organizational_units(
        &self,
        parent_id: &str,
    ) -> Result<Vec<OrganizationalUnit>, ProviderError> {
        self.call(Operation::ListOrganizationalUnits, None, parent_id, |s| {
            s.require_organization()?;
            if !s.is_container(parent_id) {
                return Err(ProviderError::NotFound(format!("parent {}", parent_id)));
            }
            Ok(s.units
                .values()
                .filter(|u| u.parent_id == parent_id)
                .cloned()
                .collect())
        })
    }

    async fn create_organizational_unit(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<OrganizationalUnit, ProviderError> {
        self.call(Operation::CreateOrganizationalUnit, None, name, |s| {
            s.require_organization()?;
            if !s.is_container(parent_id) {
                return Err(ProviderError::NotFound(format!("parent {}", parent_id)));
            }
            if s.units
                .values()
                .any(|u| u.parent_id == parent_id && u.name == name)
            {
                return Err(ProviderError::AlreadyExists(format!("unit {}", name)));
            }
            let n = s.next();
            let unit = OrganizationalUnit {
                id: format!("ou-{:04x}-{:08x}", n % 0x10000, n),
                name: name.to_string(),
                parent_id: parent_id.to_string(),
            };
            s.units.insert(unit.id.clone(), unit.clone());
            Ok(unit)
        })
    }

    async fn delete_organizational_unit(&self, unit_id: &str) -> Result<(), ProviderError> {
        self.call(Operation::DeleteOrganizationalUnit, None, unit_id, |s| {
            if !s.units.contains_key(unit_id) {
                return Err(ProviderError::NotFound(format!("unit {}", unit_id)));
            }
            let has_units = s.units.values().any(|u| u.parent_id == unit_id);
            let has_accounts = s
                .accounts
                .values()
                .any(|a| a.parent_id == unit_id && a.record.status.is_usable());
            if has_units || has_accounts {
                return Err(ProviderError::Conflict(format!(
                    "unit {} still contains accounts or units",
                    unit_id
                )));
            }
            s.units.remove(unit_id);
            Ok(())
        })
    }

    async fn list_accounts(&self) -> Result<Vec<AccountRecord>, ProviderError> {
        self.call(Operation::ListAccounts, None, "", |s| {
            if s.organization.is_none() {
                return Ok(Vec::new());
            }
            Ok(s.accounts.values().map(|a| a.record.clone()).collect())
        })
    }

    async fn create_account(&self, name: &str, email: &str) -> Result<String, ProviderError> {
        self.call(Operation::CreateAccount, None, name, |s| {
            s.require_organization()?;
            if !email.contains('@') {
                return Err(ProviderError::Validation(format!("invalid email '{}'", email)));
            }
            let request_id = format!("car-{:016x}", s.next());
            let polls = s.creation_polls;
            s.requests.insert(
                request_id.clone(),
                CreationRequest {
                    name: name.to_string(),
                    email: email.to_string(),
                    polls_remaining: polls,
                    status: CreationStatus {
                        request_id: request_id.clone(),
                        state: CreationState::InProgress,
                        account_id: None,
                        failure_reason: None,
                    },
                },
            );
            Ok(request_id)
        })
    }

    async fn describe_create_account_status(
        &self,
        request_id: &str,
    ) -> Result<CreationStatus, ProviderError> {
        self.call(
            Operation::DescribeCreateAccountStatus,
            None,
            request_id,
            |s| resolve_creation(s, request_id),
        )
    }

    async fn list_parent(&self, account: &AccountId) -> Result<String, ProviderError> {
        self.call(Operation::ListParent, None, account.as_str(), |s| {
            s.accounts
                .get(account.as_str())
                .map(|a| a.parent_id.clone())
                .filter(|p| !p.is_empty())
                .ok_or_else(|| ProviderError::NotFound(format!("account {}", account)))
        })
    }

    async fn move_account(
        &self,
        account: &AccountId,
        source_parent_id: &str,
        destination_parent_id: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::MoveAccount, None, account.as_str(), |s| {
            if !s.is_container(destination_parent_id) {
                return Err(ProviderError::NotFound(format!(
                    "parent {}",
                    destination_parent_id
                )));
            }
            let member = s
                .accounts
                .get_mut(account.as_str())
                .ok_or_else(|| ProviderError::NotFound(format!("account {}", account)))?;
            if member.parent_id != source_parent_id {
                return Err(ProviderError::Validation(format!(
                    "account {} is not in {}",
                    account, source_parent_id
                )));
            }
            member.parent_id = destination_parent_id.to_string();
            Ok(())
        })
    }

    async fn close_account(&self, account: &AccountId) -> Result<(), ProviderError> {
        self.call(Operation::CloseAccount, None, account.as_str(), |s| {
            if *account == s.management_account_id {
                return Err(ProviderError::Validation(
                    "the management account cannot be closed".into(),
                ));
            }
            let member = s
                .accounts
                .get_mut(account.as_str())
                .ok_or_else(|| ProviderError::NotFound(format!("account {}", account)))?;
            if member.record.status == AccountStatus::PendingClosure {
                return Err(ProviderError::Conflict(format!(
                    "account {} is already closing",
                    account
                )));
            }
            member.record.status = AccountStatus::PendingClosure;
            Ok(())
        })
    }

    // ── Identity ─────────────────────────────────────────────────────────────

    async fn get_oidc_provider(
        &self,
        account: &AccountId,
        url: &str,
    ) -> Result<Option<OidcProvider>, ProviderError> {
        self.call(Operation::GetOidcProvider, Some(account), url, |s| {
            Ok(s.identity
                .get(account.as_str())
                .and_then(|i| i.oidc_providers.values().find(|p| p.url == url))
                .cloned())
        })
    }

    async fn create_oidc_provider(
        &self,
        account: &AccountId,
        spec: &OidcProviderSpec,
    ) -> Result<OidcProvider, ProviderError> {
        self.call(Operation::CreateOidcProvider, Some(account), &spec.url, |s| {
            let identity = s.identity_mut(account);
            if identity.oidc_providers.values().any(|p| p.url == spec.url) {
                return Err(ProviderError::AlreadyExists(format!(
                    "identity provider {}",
                    spec.url
                )));
            }
            let provider = OidcProvider {
                arn: format!(
                    "arn:aws:iam::{}:oidc-provider/{}",
                    account,
                    spec.url.trim_start_matches("https://")
                ),
                url: spec.url.clone(),
                audiences: spec.audiences.clone(),
                thumbprints: spec.thumbprints.clone(),
            };
            identity
                .oidc_providers
                .insert(provider.arn.clone(), provider.clone());
            Ok(provider)
        })
    }

    async fn update_oidc_provider(
        &self,
        account: &AccountId,
        arn: &str,
        spec: &OidcProviderSpec,
    ) -> Result<(), ProviderError> {
        self.call(Operation::UpdateOidcProvider, Some(account), arn, |s| {
            let provider = s
                .identity_mut(account)
                .oidc_providers
                .get_mut(arn)
                .ok_or_else(|| ProviderError::NotFound(format!("identity provider {}", arn)))?;
            provider.audiences = spec.audiences.clone();
            provider.thumbprints = spec.thumbprints.clone();
            Ok(())
        })
    }

    async fn delete_oidc_provider(
        &self,
        account: &AccountId,
        arn: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::DeleteOidcProvider, Some(account), arn, |s| {
            s.identity_mut(account)
                .oidc_providers
                .remove(arn)
                .map(|_| ())
                .ok_or_else(|| ProviderError::NotFound(format!("identity provider {}", arn)))
        })
    }

    async fn get_role(
        &self,
        account: &AccountId,
        name: &str,
    ) -> Result<Option<RoleRecord>, ProviderError> {
        self.call(Operation::GetRole, Some(account), name, |s| {
            Ok(s.role(account, name).map(|r| r.record.clone()))
        })
    }

    async fn create_role(
        &self,
        account: &AccountId,
        spec: &RoleSpec,
    ) -> Result<RoleRecord, ProviderError> {
        self.call(Operation::CreateRole, Some(account), &spec.name, |s| {
            check_json(&spec.trust_policy)?;
            let identity = s.identity_mut(account);
            if identity.roles.contains_key(&spec.name) {
                return Err(ProviderError::AlreadyExists(format!("role {}", spec.name)));
            }
            let record = RoleRecord {
                name: spec.name.clone(),
                arn: naming::role_arn(account, &spec.name),
                description: spec.description.clone(),
                trust_policy: spec.trust_policy.clone(),
            };
            identity.roles.insert(
                spec.name.clone(),
                Role {
                    record: record.clone(),
                    policies: BTreeMap::new(),
                },
            );
            Ok(record)
        })
    }

    async fn update_trust_policy(
        &self,
        account: &AccountId,
        role: &str,
        document: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::UpdateTrustPolicy, Some(account), role, |s| {
            check_json(document)?;
            s.role_mut(account, role)?.record.trust_policy = document.to_string();
            Ok(())
        })
    }

    async fn delete_role(&self, account: &AccountId, role: &str) -> Result<(), ProviderError> {
        self.call(Operation::DeleteRole, Some(account), role, |s| {
            if !s.role_mut(account, role)?.policies.is_empty() {
                return Err(ProviderError::Conflict(format!(
                    "role {} still has inline policies attached",
                    role
                )));
            }
            s.identity_mut(account).roles.remove(role);
            Ok(())
        })
    }

    async fn get_role_policy(
        &self,
        account: &AccountId,
        role: &str,
        policy: &str,
    ) -> Result<Option<String>, ProviderError> {
        self.call(Operation::GetRolePolicy, Some(account), role, |s| {
            Ok(s.role_mut(account, role)?.policies.get(policy).cloned())
        })
    }

    async fn put_role_policy(
        &self,
        account: &AccountId,
        role: &str,
        policy: &str,
        document: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::PutRolePolicy, Some(account), role, |s| {
            check_json(document)?;
            s.role_mut(account, role)?
                .policies
                .insert(policy.to_string(), document.to_string());
            Ok(())
        })
    }

    async fn list_role_policies(
        &self,
        account: &AccountId,
        role: &str,
    ) -> Result<Vec<String>, ProviderError> {
        self.call(Operation::ListRolePolicies, Some(account), role, |s| {
            Ok(s.role_mut(account, role)?.policies.keys().cloned().collect())
        })
    }

    async fn delete_role_policy(
        &self,
        account: &AccountId,
        role: &str,
        policy: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::DeleteRolePolicy, Some(account), role, |s| {
            s.role_mut(account, role)?
                .policies
                .remove(policy)
                .map(|_| ())
                .ok_or_else(|| ProviderError::NotFound(format!("policy {} on {}", policy, role)))
        })
    }

    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedSession, ProviderError> {
        let denied = || {
            ProviderError::PermissionDenied(format!(
                "{} is not authorized to assume {}",
                request.caller_account, request.role_arn
            ))
        };
        let (account, role) = parse_role_arn(&request.role_arn).ok_or_else(denied)?;
        self.call(Operation::AssumeRole, Some(&account), role, |s| {
            let role = s.role(&account, role).ok_or_else(denied)?;
            let caller = format!("arn:aws:iam::{}:root", request.caller_account);
            let mut context = BTreeMap::new();
            if let Some(external_id) = &request.external_id {
                context.insert("sts:ExternalId".to_string(), external_id.clone());
            }
            let allowed = trust::allows(
                &role.record.trust_policy,
                &trust::Request {
                    action: "sts:AssumeRole",
                    principal: trust::Principal::Aws(&caller),
                    context,
                },
            );
            if !allowed {
                return Err(denied());
            }
            Ok(AssumedSession {
                role_arn: request.role_arn.clone(),
                account_id: account.clone(),
                session_name: request.session_name.clone(),
            })
        })
    }

    async fn assume_role_with_web_identity(
        &self,
        role_arn: &str,
        token: &WebIdentityToken,
    ) -> Result<AssumedSession, ProviderError> {
        let denied = || {
            ProviderError::PermissionDenied(format!(
                "subject '{}' is not authorized to assume {}",
                token.subject, role_arn
            ))
        };
        let (account, role) = parse_role_arn(role_arn).ok_or_else(denied)?;
        self.call(
            Operation::AssumeRoleWithWebIdentity,
            Some(&account),
            role,
            |s| {
                let role = s.role(&account, role).ok_or_else(denied)?;
                let provider = s
                    .identity
                    .get(account.as_str())
                    .and_then(|i| i.oidc_providers.values().find(|p| p.url == token.issuer))
                    .filter(|p| p.audiences.contains(&token.audience))
                    .ok_or_else(|| {
                        ProviderError::PermissionDenied(format!(
                            "no identity provider for {} trusts audience {} in {}",
                            token.issuer, token.audience, account
                        ))
                    })?;
                let host = token.issuer.trim_start_matches("https://");
                let context = BTreeMap::from([
                    (format!("{}:sub", host), token.subject.clone()),
                    (format!("{}:aud", host), token.audience.clone()),
                ]);
                let allowed = trust::allows(
                    &role.record.trust_policy,
                    &trust::Request {
                        action: "sts:AssumeRoleWithWebIdentity",
                        principal: trust::Principal::Federated(&provider.arn),
                        context,
                    },
                );
                if !allowed {
                    return Err(denied());
                }
                Ok(AssumedSession {
                    role_arn: role_arn.to_string(),
                    account_id: account.clone(),
                    session_name: "web-identity".to_string(),
                })
            },
        )
    }

    // ── Key management ───────────────────────────────────────────────────────

    async fn find_key_by_alias(
        &self,
        account: &AccountId,
        alias: &str,
    ) -> Result<Option<KeyRecord>, ProviderError> {
        self.call(Operation::FindKeyByAlias, Some(account), alias, |s| {
            let keys = s.keys_mut(account);
            Ok(keys
                .aliases
                .get(alias)
                .and_then(|id| keys.keys.get(id))
                .cloned())
        })
    }

    async fn create_key(
        &self,
        account: &AccountId,
        description: &str,
    ) -> Result<KeyRecord, ProviderError> {
        self.call(Operation::CreateKey, Some(account), description, |s| {
            let n = s.next();
            let key_id = format!("{:08x}-0000-4000-8000-{:012x}", n, n);
            let record = KeyRecord {
                arn: format!("arn:aws:kms:{}:{}:key/{}", s.region, account, key_id),
                key_id: key_id.clone(),
                state: KeyState::Enabled,
            };
            s.keys_mut(account).keys.insert(key_id, record.clone());
            Ok(record)
        })
    }

    async fn create_alias(
        &self,
        account: &AccountId,
        alias: &str,
        key_id: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::CreateAlias, Some(account), alias, |s| {
            let keys = s.keys_mut(account);
            if keys.aliases.contains_key(alias) {
                return Err(ProviderError::AlreadyExists(format!("alias {}", alias)));
            }
            match keys.keys.get(key_id) {
                None => return Err(ProviderError::NotFound(format!("key {}", key_id))),
                Some(key) if key.state != KeyState::Enabled => {
                    return Err(ProviderError::Validation(format!(
                        "key {} is pending deletion",
                        key_id
                    )))
                }
                Some(_) => {}
            }
            keys.aliases.insert(alias.to_string(), key_id.to_string());
            Ok(())
        })
    }

    async fn delete_alias(&self, account: &AccountId, alias: &str) -> Result<(), ProviderError> {
        self.call(Operation::DeleteAlias, Some(account), alias, |s| {
            s.keys_mut(account)
                .aliases
                .remove(alias)
                .map(|_| ())
                .ok_or_else(|| ProviderError::NotFound(format!("alias {}", alias)))
        })
    }

    async fn schedule_key_deletion(
        &self,
        account: &AccountId,
        key_id: &str,
        window_days: u32,
    ) -> Result<(), ProviderError> {
        self.call(Operation::ScheduleKeyDeletion, Some(account), key_id, |s| {
            if !(7..=30).contains(&window_days) {
                return Err(ProviderError::Validation(format!(
                    "deletion window {} is outside 7-30 days",
                    window_days
                )));
            }
            let key = s
                .keys_mut(account)
                .keys
                .get_mut(key_id)
                .ok_or_else(|| ProviderError::NotFound(format!("key {}", key_id)))?;
            if key.state == KeyState::PendingDeletion {
                return Err(ProviderError::Conflict(format!(
                    "key {} is already pending deletion",
                    key_id
                )));
            }
            key.state = KeyState::PendingDeletion;
            Ok(())
        })
    }

    // ── Object store ─────────────────────────────────────────────────────────

    async fn head_bucket(&self, account: &AccountId, bucket: &str) -> Result<bool, ProviderError> {
        self.call(Operation::HeadBucket, Some(account), bucket, |s| {
            if s.foreign_buckets.contains(bucket) {
                return Err(ProviderError::NamingCollision {
                    name: bucket.to_string(),
                });
            }
            match s.buckets.get(bucket) {
                Some(b) if b.owner == *account => Ok(true),
                Some(_) => Err(ProviderError::NamingCollision {
                    name: bucket.to_string(),
                }),
                None => Ok(false),
            }
        })
    }

    async fn create_bucket(
        &self,
        account: &AccountId,
        bucket: &str,
        region: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::CreateBucket, Some(account), bucket, |s| {
            if !is_valid_bucket_name(bucket) {
                return Err(ProviderError::Validation(format!(
                    "'{}' is not a valid bucket name",
                    bucket
                )));
            }
            if s.foreign_buckets.contains(bucket) {
                return Err(ProviderError::NamingCollision {
                    name: bucket.to_string(),
                });
            }
            match s.buckets.get(bucket) {
                Some(b) if b.owner == *account => {
                    Err(ProviderError::AlreadyExists(format!("bucket {}", bucket)))
                }
                Some(_) => Err(ProviderError::NamingCollision {
                    name: bucket.to_string(),
                }),
                None => {
                    s.buckets.insert(
                        bucket.to_string(),
                        Bucket {
                            owner: account.clone(),
                            settings: BucketSettings {
                                region: region.to_string(),
                                ..Default::default()
                            },
                            versions: Vec::new(),
                        },
                    );
                    Ok(())
                }
            }
        })
    }

    async fn delete_bucket(&self, account: &AccountId, bucket: &str) -> Result<(), ProviderError> {
        self.call(Operation::DeleteBucket, Some(account), bucket, |s| {
            if !s.owned_bucket_mut(account, bucket)?.versions.is_empty() {
                return Err(ProviderError::Conflict(format!(
                    "bucket {} is not empty",
                    bucket
                )));
            }
            s.buckets.remove(bucket);
            Ok(())
        })
    }

    async fn put_bucket_versioning(
        &self,
        account: &AccountId,
        bucket: &str,
        enabled: bool,
    ) -> Result<(), ProviderError> {
        self.call(Operation::PutBucketVersioning, Some(account), bucket, |s| {
            s.owned_bucket_mut(account, bucket)?.settings.versioning = enabled;
            Ok(())
        })
    }

    async fn put_bucket_encryption(
        &self,
        account: &AccountId,
        bucket: &str,
        kms_key_arn: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::PutBucketEncryption, Some(account), bucket, |s| {
            let key_known = s
                .keys_mut(account)
                .keys
                .values()
                .any(|k| k.arn == kms_key_arn && k.state == KeyState::Enabled);
            if !key_known {
                return Err(ProviderError::Validation(format!(
                    "key {} is not usable in {}",
                    kms_key_arn, account
                )));
            }
            s.owned_bucket_mut(account, bucket)?.settings.kms_key_arn =
                Some(kms_key_arn.to_string());
            Ok(())
        })
    }

    async fn put_public_access_block(
        &self,
        account: &AccountId,
        bucket: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::PutPublicAccessBlock, Some(account), bucket, |s| {
            s.owned_bucket_mut(account, bucket)?
                .settings
                .public_access_blocked = true;
            Ok(())
        })
    }

    async fn get_bucket_settings(
        &self,
        account: &AccountId,
        bucket: &str,
    ) -> Result<BucketSettings, ProviderError> {
        self.call(Operation::GetBucketSettings, Some(account), bucket, |s| {
            Ok(s.owned_bucket_mut(account, bucket)?.settings.clone())
        })
    }

    async fn put_object(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
        body: &[u8],
    ) -> Result<String, ProviderError> {
        self.call(Operation::PutObject, Some(account), bucket, |s| {
            let n = s.next();
            let b = s.owned_bucket_mut(account, bucket)?;
            let version_id = if b.settings.versioning {
                format!("v{:08}", n)
            } else {
                b.versions.retain(|v| v.key != key);
                "null".to_string()
            };
            b.versions.push(StoredVersion {
                key: key.to_string(),
                version_id: version_id.clone(),
                body: Some(body.to_vec()),
            });
            Ok(version_id)
        })
    }

    async fn get_object(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        self.call(Operation::GetObject, Some(account), bucket, |s| {
            Ok(s.owned_bucket_mut(account, bucket)?
                .versions
                .iter()
                .rev()
                .find(|v| v.key == key)
                .and_then(|v| v.body.clone()))
        })
    }

    async fn delete_object(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::DeleteObject, Some(account), bucket, |s| {
            let n = s.next();
            let b = s.owned_bucket_mut(account, bucket)?;
            if b.settings.versioning {
                b.versions.push(StoredVersion {
                    key: key.to_string(),
                    version_id: format!("v{:08}", n),
                    body: None,
                });
            } else {
                b.versions.retain(|v| v.key != key);
            }
            Ok(())
        })
    }

    async fn list_object_versions(
        &self,
        account: &AccountId,
        bucket: &str,
        max_keys: usize,
    ) -> Result<Vec<ObjectVersion>, ProviderError> {
        self.call(Operation::ListObjectVersions, Some(account), bucket, |s| {
            Ok(s.owned_bucket_mut(account, bucket)?
                .versions
                .iter()
                .take(max_keys)
                .map(|v| ObjectVersion {
                    key: v.key.clone(),
                    version_id: v.version_id.clone(),
                    is_delete_marker: v.body.is_none(),
                })
                .collect())
        })
    }

    async fn delete_object_version(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::DeleteObjectVersion, Some(account), bucket, |s| {
            let b = s.owned_bucket_mut(account, bucket)?;
            let before = b.versions.len();
            b.versions
                .retain(|v| !(v.key == key && v.version_id == version_id));
            if b.versions.len() == before {
                return Err(ProviderError::NotFound(format!(
                    "version {} of {}",
                    version_id, key
                )));
            }
            Ok(())
        })
    }

    // ── Lock tables ──────────────────────────────────────────────────────────

    async fn describe_table(
        &self,
        account: &AccountId,
        table: &str,
    ) -> Result<Option<TableRecord>, ProviderError> {
        self.call(Operation::DescribeTable, Some(account), table, |s| {
            let Some(found) = s.tables.get_mut(account.as_str()).and_then(|t| t.get_mut(table))
            else {
                return Ok(None);
            };
            if found.record.status == TableStatus::Creating {
                if found.polls_remaining == 0 {
                    found.record.status = TableStatus::Active;
                } else {
                    found.polls_remaining -= 1;
                }
            }
            Ok(Some(found.record.clone()))
        })
    }

    async fn create_table(
        &self,
        account: &AccountId,
        table: &str,
        hash_key: &str,
    ) -> Result<TableRecord, ProviderError> {
        self.call(Operation::CreateTable, Some(account), table, |s| {
            let arn = naming::lock_table_arn(&s.region, account, table);
            let polls = s.table_polls;
            let tables = s.tables.entry(account.to_string()).or_default();
            if tables.contains_key(table) {
                return Err(ProviderError::AlreadyExists(format!("table {}", table)));
            }
            let record = TableRecord {
                name: table.to_string(),
                arn,
                hash_key: hash_key.to_string(),
                status: if polls > 0 {
                    TableStatus::Creating
                } else {
                    TableStatus::Active
                },
            };
            tables.insert(
                table.to_string(),
                Table {
                    record: record.clone(),
                    polls_remaining: polls,
                    items: BTreeMap::new(),
                },
            );
            Ok(record)
        })
    }

    async fn delete_table(&self, account: &AccountId, table: &str) -> Result<(), ProviderError> {
        self.call(Operation::DeleteTable, Some(account), table, |s| {
            s.tables
                .get_mut(account.as_str())
                .and_then(|t| t.remove(table))
                .map(|_| ())
                .ok_or_else(|| ProviderError::NotFound(format!("table {}", table)))
        })
    }

    async fn put_item(
        &self,
        account: &AccountId,
        table: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::PutItem, Some(account), table, |s| {
            s.table_mut(account, table)?
                .items
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn get_item(
        &self,
        account: &AccountId,
        table: &str,
        key: &str,
    ) -> Result<Option<String>, ProviderError> {
        self.call(Operation::GetItem, Some(account), table, |s| {
            Ok(s.table_mut(account, table)?.items.get(key).cloned())
        })
    }

    async fn delete_item(
        &self,
        account: &AccountId,
        table: &str,
        key: &str,
    ) -> Result<(), ProviderError> {
        self.call(Operation::DeleteItem, Some(account), table, |s| {
            s.table_mut(account, table)?.items.remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(id: &str) -> AccountId {
        AccountId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn account_creation_resolves_after_configured_polls() {
        let p = MemoryProvider::new().with_creation_polls(2);
        p.create_organization().await.unwrap();
        let request = p.create_account("Acme Site (dev)", "dev@acme.example").await.unwrap();
        for _ in 0..2 {
            let status = p.describe_create_account_status(&request).await.unwrap();
            assert_eq!(status.state, CreationState::InProgress);
        }
        let status = p.describe_create_account_status(&request).await.unwrap();
        assert_eq!(status.state, CreationState::Succeeded);
        assert!(status.account_id.is_some());
    }

    #[tokio::test]
    async fn duplicate_email_fails_creation() {
        let p = MemoryProvider::new().with_creation_polls(0);
        p.create_organization().await.unwrap();
        let first = p.create_account("a", "dup@acme.example").await.unwrap();
        p.describe_create_account_status(&first).await.unwrap();
        let second = p.create_account("b", "dup@acme.example").await.unwrap();
        let status = p.describe_create_account_status(&second).await.unwrap();
        assert_eq!(status.state, CreationState::Failed);
        assert_eq!(status.failure_reason.as_deref(), Some("EMAIL_ALREADY_EXISTS"));
    }

    #[tokio::test]
    async fn unknown_accounts_are_unreachable() {
        let p = MemoryProvider::new();
        let err = p.get_role(&acct("999999999999"), "x").await.unwrap_err();
        assert!(matches!(err, ProviderError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn injected_faults_fire_once_per_match() {
        let p = MemoryProvider::new();
        let mgmt = p.management_account_id();
        p.fail_next(
            Operation::GetRole,
            Some(&mgmt),
            ProviderError::Transient("throttled".into()),
        );
        assert!(p.get_role(&mgmt, "r").await.is_err());
        assert!(p.get_role(&mgmt, "r").await.unwrap().is_none());
        assert_eq!(p.call_count(Operation::GetRole), 2);
        assert!(p.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn state_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plane.json");
        let mgmt = acct("111111111111");
        {
            let p = MemoryProvider::open(&path, Some(&mgmt)).unwrap();
            p.create_organization().await.unwrap();
            p.create_bucket(&mgmt, "acme-site-state-central-111111111111", "us-east-1")
                .await
                .unwrap();
        }
        let p = MemoryProvider::open(&path, None).unwrap();
        assert_eq!(p.management_account_id(), mgmt);
        assert!(p
            .head_bucket(&mgmt, "acme-site-state-central-111111111111")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn closed_accounts_cannot_be_reached() {
        let dev = acct("822529998967");
        let p = MemoryProvider::new().with_existing_account(&dev, "dev", "dev@acme.example");
        p.create_organization().await.unwrap();
        p.close_account(&dev).await.unwrap();
        assert!(matches!(
            p.get_role(&dev, "x").await.unwrap_err(),
            ProviderError::PermissionDenied(_)
        ));
    }
}
