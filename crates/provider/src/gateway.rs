//! JSON-over-HTTP control-plane gateway.
//!
//! Each `CloudProvider` call becomes `POST {endpoint}/v1/{operation}` with a
//! body of `{"account": <id or null>, "args": {...}}`. A 2xx response carries
//! the JSON-encoded result (`null` for unit results and absent lookups).
//! Error responses carry `{"error": {"kind": ..., "message": ...}}`.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` so the async
//! runtime is never blocked on network I/O.

use std::time::Duration;

use async_trait::async_trait;
use foundation_core::AccountId;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::operation::Operation;
use crate::records::{
    AccountRecord, AssumeRoleRequest, AssumedSession, BucketSettings, CreationStatus, KeyRecord,
    ObjectVersion, OidcProvider, OidcProviderSpec, Organization, OrganizationalUnit, RoleRecord,
    RoleSpec, TableRecord, WebIdentityToken,
};
use crate::traits::CloudProvider;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GatewayProvider {
    endpoint: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl GatewayProvider {
    pub fn new(endpoint: &str, token: Option<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        GatewayProvider {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            agent,
        }
    }

    async fn invoke<T>(
        &self,
        operation: Operation,
        account: Option<&AccountId>,
        args: Value,
    ) -> Result<T, ProviderError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let url = format!("{}/v1/{}", self.endpoint, operation.as_str());
        let body = json!({ "account": account, "args": args });
        let agent = self.agent.clone();
        let token = self.token.clone();

        tracing::debug!(%operation, account = ?account.map(|a| a.as_str()), "gateway call");

        tokio::task::spawn_blocking(move || {
            let mut request = agent.post(&url);
            if let Some(ref token) = token {
                request = request.header("Authorization", &format!("Bearer {}", token));
            }
            let response = request
                .send_json(&body)
                .map_err(|e| ProviderError::Transient(format!("{}: {}", url, e)))?;
            let status = response.status().as_u16();
            let text = response
                .into_body()
                .read_to_string()
                .map_err(|e| ProviderError::Transient(format!("reading response: {}", e)))?;

            if !(200..300).contains(&status) {
                return Err(map_status(status, &text));
            }
            let text = if text.trim().is_empty() { "null" } else { &text };
            serde_json::from_str(text).map_err(|e| {
                ProviderError::Backend(format!(
                    "unexpected {} response: {}",
                    operation.as_str(),
                    e
                ))
            })
        })
        .await
        .map_err(|e| ProviderError::Backend(format!("task join error: {}", e)))?
    }
}

/// Map an error response to the provider error taxonomy.
pub(crate) fn map_status(status: u16, body: &str) -> ProviderError {
    let error = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").cloned());
    let kind = error
        .as_ref()
        .and_then(|e| e.get("kind"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let message = error
        .as_ref()
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status));

    match (status, kind) {
        (409, "conflict") => ProviderError::Conflict(message),
        (409, _) => ProviderError::AlreadyExists(message),
        (403, _) => ProviderError::PermissionDenied(message),
        (404, _) => ProviderError::NotFound(message),
        (422, "naming_collision") => ProviderError::NamingCollision { name: message },
        (429, _) | (500..=599, _) => ProviderError::Transient(message),
        _ => ProviderError::Validation(message),
    }
}

#[async_trait]
impl CloudProvider for GatewayProvider {
    fn name(&self) -> &str {
        "gateway"
    }

    // ── Organizations ────────────────────────────────────────────────────────

    async fn describe_organization(&self) -> Result<Option<Organization>, ProviderError> {
        self.invoke(Operation::DescribeOrganization, None, json!({}))
            .await
    }

    async fn create_organization(&self) -> Result<Organization, ProviderError> {
        self.invoke(Operation::CreateOrganization, None, json!({}))
            .await
    }

    async fn list_organizational_units(
        &self,
        parent_id: &str,
    ) -> Result<Vec<OrganizationalUnit>, ProviderError> {
        self.invoke(
            Operation::ListOrganizationalUnits,
            None,
            json!({ "parent_id": parent_id }),
        )
        .await
    }

    async fn create_organizational_unit(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<OrganizationalUnit, ProviderError> {
        self.invoke(
            Operation::CreateOrganizationalUnit,
            None,
            json!({ "parent_id": parent_id, "name": name }),
        )
        .await
    }

    async fn delete_organizational_unit(&self, unit_id: &str) -> Result<(), ProviderError> {
        self.invoke(
            Operation::DeleteOrganizationalUnit,
            None,
            json!({ "unit_id": unit_id }),
        )
        .await
    }

    async fn list_accounts(&self) -> Result<Vec<AccountRecord>, ProviderError> {
        self.invoke(Operation::ListAccounts, None, json!({})).await
    }

    async fn create_account(&self, name: &str, email: &str) -> Result<String, ProviderError> {
        self.invoke(
            Operation::CreateAccount,
            None,
            json!({ "name": name, "email": email }),
        )
        .await
    }

    async fn describe_create_account_status(
        &self,
        request_id: &str,
    ) -> Result<CreationStatus, ProviderError> {
        self.invoke(
            Operation::DescribeCreateAccountStatus,
            None,
            json!({ "request_id": request_id }),
        )
        .await
    }

    async fn list_parent(&self, account: &AccountId) -> Result<String, ProviderError> {
        self.invoke(
            Operation::ListParent,
            None,
            json!({ "account_id": account }),
        )
        .await
    }

    async fn move_account(
        &self,
        account: &AccountId,
        source_parent_id: &str,
        destination_parent_id: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::MoveAccount,
            None,
            json!({
                "account_id": account,
                "source_parent_id": source_parent_id,
                "destination_parent_id": destination_parent_id,
            }),
        )
        .await
    }

    async fn close_account(&self, account: &AccountId) -> Result<(), ProviderError> {
        self.invoke(
            Operation::CloseAccount,
            None,
            json!({ "account_id": account }),
        )
        .await
    }

    // ── Identity ─────────────────────────────────────────────────────────────

    async fn get_oidc_provider(
        &self,
        account: &AccountId,
        url: &str,
    ) -> Result<Option<OidcProvider>, ProviderError> {
        self.invoke(Operation::GetOidcProvider, Some(account), json!({ "url": url }))
            .await
    }

    async fn create_oidc_provider(
        &self,
        account: &AccountId,
        spec: &OidcProviderSpec,
    ) -> Result<OidcProvider, ProviderError> {
        self.invoke(Operation::CreateOidcProvider, Some(account), json!(spec))
            .await
    }

    async fn update_oidc_provider(
        &self,
        account: &AccountId,
        arn: &str,
        spec: &OidcProviderSpec,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::UpdateOidcProvider,
            Some(account),
            json!({ "arn": arn, "spec": spec }),
        )
        .await
    }

    async fn delete_oidc_provider(
        &self,
        account: &AccountId,
        arn: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(Operation::DeleteOidcProvider, Some(account), json!({ "arn": arn }))
            .await
    }

    async fn get_role(
        &self,
        account: &AccountId,
        name: &str,
    ) -> Result<Option<RoleRecord>, ProviderError> {
        self.invoke(Operation::GetRole, Some(account), json!({ "role": name }))
            .await
    }

    async fn create_role(
        &self,
        account: &AccountId,
        spec: &RoleSpec,
    ) -> Result<RoleRecord, ProviderError> {
        self.invoke(Operation::CreateRole, Some(account), json!(spec))
            .await
    }

    async fn update_trust_policy(
        &self,
        account: &AccountId,
        role: &str,
        document: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::UpdateTrustPolicy,
            Some(account),
            json!({ "role": role, "document": document }),
        )
        .await
    }

    async fn delete_role(&self, account: &AccountId, role: &str) -> Result<(), ProviderError> {
        self.invoke(Operation::DeleteRole, Some(account), json!({ "role": role }))
            .await
    }

    async fn get_role_policy(
        &self,
        account: &AccountId,
        role: &str,
        policy: &str,
    ) -> Result<Option<String>, ProviderError> {
        self.invoke(
            Operation::GetRolePolicy,
            Some(account),
            json!({ "role": role, "policy": policy }),
        )
        .await
    }

    async fn put_role_policy(
        &self,
        account: &AccountId,
        role: &str,
        policy: &str,
        document: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::PutRolePolicy,
            Some(account),
            json!({ "role": role, "policy": policy, "document": document }),
        )
        .await
    }

    async fn list_role_policies(
        &self,
        account: &AccountId,
        role: &str,
    ) -> Result<Vec<String>, ProviderError> {
        self.invoke(Operation::ListRolePolicies, Some(account), json!({ "role": role }))
            .await
    }

    async fn delete_role_policy(
        &self,
        account: &AccountId,
        role: &str,
        policy: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::DeleteRolePolicy,
            Some(account),
            json!({ "role": role, "policy": policy }),
        )
        .await
    }

    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedSession, ProviderError> {
        self.invoke(Operation::AssumeRole, None, json!(request))
            .await
    }

    async fn assume_role_with_web_identity(
        &self,
        role_arn: &str,
        token: &WebIdentityToken,
    ) -> Result<AssumedSession, ProviderError> {
        self.invoke(
            Operation::AssumeRoleWithWebIdentity,
            None,
            json!({ "role_arn": role_arn, "token": token }),
        )
        .await
    }

    // ── Key management ───────────────────────────────────────────────────────

    async fn find_key_by_alias(
        &self,
        account: &AccountId,
        alias: &str,
    ) -> Result<Option<KeyRecord>, ProviderError> {
        self.invoke(Operation::FindKeyByAlias, Some(account), json!({ "alias": alias }))
            .await
    }

    async fn create_key(
        &self,
        account: &AccountId,
        description: &str,
    ) -> Result<KeyRecord, ProviderError> {
        self.invoke(
            Operation::CreateKey,
            Some(account),
            json!({ "description": description }),
        )
        .await
    }

    async fn create_alias(
        &self,
        account: &AccountId,
        alias: &str,
        key_id: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::CreateAlias,
            Some(account),
            json!({ "alias": alias, "key_id": key_id }),
        )
        .await
    }

    async fn delete_alias(&self, account: &AccountId, alias: &str) -> Result<(), ProviderError> {
        self.invoke(Operation::DeleteAlias, Some(account), json!({ "alias": alias }))
            .await
    }

    async fn schedule_key_deletion(
        &self,
        account: &AccountId,
        key_id: &str,
        window_days: u32,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::ScheduleKeyDeletion,
            Some(account),
            json!({ "key_id": key_id, "window_days": window_days }),
        )
        .await
    }

    // ── Object store ─────────────────────────────────────────────────────────

    async fn head_bucket(&self, account: &AccountId, bucket: &str) -> Result<bool, ProviderError> {
        self.invoke(Operation::HeadBucket, Some(account), json!({ "bucket": bucket }))
            .await
    }

    async fn create_bucket(
        &self,
        account: &AccountId,
        bucket: &str,
        region: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::CreateBucket,
            Some(account),
            json!({ "bucket": bucket, "region": region }),
        )
        .await
    }

    async fn delete_bucket(&self, account: &AccountId, bucket: &str) -> Result<(), ProviderError> {
        self.invoke(Operation::DeleteBucket, Some(account), json!({ "bucket": bucket }))
            .await
    }

    async fn put_bucket_versioning(
        &self,
        account: &AccountId,
        bucket: &str,
        enabled: bool,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::PutBucketVersioning,
            Some(account),
            json!({ "bucket": bucket, "enabled": enabled }),
        )
        .await
    }

    async fn put_bucket_encryption(
        &self,
        account: &AccountId,
        bucket: &str,
        kms_key_arn: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::PutBucketEncryption,
            Some(account),
            json!({ "bucket": bucket, "kms_key_arn": kms_key_arn }),
        )
        .await
    }

    async fn put_public_access_block(
        &self,
        account: &AccountId,
        bucket: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::PutPublicAccessBlock,
            Some(account),
            json!({ "bucket": bucket }),
        )
        .await
    }

    async fn get_bucket_settings(
        &self,
        account: &AccountId,
        bucket: &str,
    ) -> Result<BucketSettings, ProviderError> {
        self.invoke(
            Operation::GetBucketSettings,
            Some(account),
            json!({ "bucket": bucket }),
        )
        .await
    }

    async fn put_object(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
        body: &[u8],
    ) -> Result<String, ProviderError> {
        self.invoke(
            Operation::PutObject,
            Some(account),
            json!({ "bucket": bucket, "key": key, "body": body }),
        )
        .await
    }

    async fn get_object(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        self.invoke(
            Operation::GetObject,
            Some(account),
            json!({ "bucket": bucket, "key": key }),
        )
        .await
    }

    async fn delete_object(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::DeleteObject,
            Some(account),
            json!({ "bucket": bucket, "key": key }),
        )
        .await
    }

    async fn list_object_versions(
        &self,
        account: &AccountId,
        bucket: &str,
        max_keys: usize,
    ) -> Result<Vec<ObjectVersion>, ProviderError> {
        self.invoke(
            Operation::ListObjectVersions,
            Some(account),
            json!({ "bucket": bucket, "max_keys": max_keys }),
        )
        .await
    }

    async fn delete_object_version(
        &self,
        account: &AccountId,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::DeleteObjectVersion,
            Some(account),
            json!({ "bucket": bucket, "key": key, "version_id": version_id }),
        )
        .await
    }

    // ── Lock tables ──────────────────────────────────────────────────────────

    async fn describe_table(
        &self,
        account: &AccountId,
        table: &str,
    ) -> Result<Option<TableRecord>, ProviderError> {
        self.invoke(Operation::DescribeTable, Some(account), json!({ "table": table }))
            .await
    }

    async fn create_table(
        &self,
        account: &AccountId,
        table: &str,
        hash_key: &str,
    ) -> Result<TableRecord, ProviderError> {
        self.invoke(
            Operation::CreateTable,
            Some(account),
            json!({ "table": table, "hash_key": hash_key }),
        )
        .await
    }

    async fn delete_table(&self, account: &AccountId, table: &str) -> Result<(), ProviderError> {
        self.invoke(Operation::DeleteTable, Some(account), json!({ "table": table }))
            .await
    }

    async fn put_item(
        &self,
        account: &AccountId,
        table: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::PutItem,
            Some(account),
            json!({ "table": table, "key": key, "value": value }),
        )
        .await
    }

    async fn get_item(
        &self,
        account: &AccountId,
        table: &str,
        key: &str,
    ) -> Result<Option<String>, ProviderError> {
        self.invoke(
            Operation::GetItem,
            Some(account),
            json!({ "table": table, "key": key }),
        )
        .await
    }

    async fn delete_item(
        &self,
        account: &AccountId,
        table: &str,
        key: &str,
    ) -> Result<(), ProviderError> {
        self.invoke(
            Operation::DeleteItem,
            Some(account),
            json!({ "table": table, "key": key }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_statuses_distinguish_duplicates_from_state_conflicts() {
        assert!(matches!(
            map_status(409, r#"{"error":{"kind":"already_exists","message":"role x"}}"#),
            ProviderError::AlreadyExists(m) if m == "role x"
        ));
        assert!(matches!(
            map_status(409, r#"{"error":{"kind":"conflict","message":"bucket not empty"}}"#),
            ProviderError::Conflict(_)
        ));
    }

    #[test]
    fn naming_collisions_are_not_retryable() {
        let err = map_status(
            422,
            r#"{"error":{"kind":"naming_collision","message":"acme-site-state-dev-822529998967"}}"#,
        );
        assert_eq!(
            err,
            ProviderError::NamingCollision {
                name: "acme-site-state-dev-822529998967".into()
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        assert!(map_status(429, "").is_retryable());
        assert!(map_status(503, "<html>").is_retryable());
        assert!(!map_status(403, "").is_retryable());
        assert!(matches!(map_status(404, ""), ProviderError::NotFound(m) if m == "HTTP 404"));
        assert!(matches!(map_status(400, ""), ProviderError::Validation(_)));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_transient() {
        let gateway = GatewayProvider::new("http://127.0.0.1:9", None);
        let err = gateway.describe_organization().await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
