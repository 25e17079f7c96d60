use std::fmt;

/// Every control-plane call a `CloudProvider` exposes.
///
/// The classification into mutating and read-only calls is what dry-run
/// purity is measured against: a dry run must issue no call for which
/// [`Operation::is_mutating`] is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    // organizations
    DescribeOrganization,
    CreateOrganization,
    ListOrganizationalUnits,
    CreateOrganizationalUnit,
    DeleteOrganizationalUnit,
    ListAccounts,
    CreateAccount,
    DescribeCreateAccountStatus,
    ListParent,
    MoveAccount,
    CloseAccount,
    // identity
    GetOidcProvider,
    CreateOidcProvider,
    UpdateOidcProvider,
    DeleteOidcProvider,
    GetRole,
    CreateRole,
    UpdateTrustPolicy,
    DeleteRole,
    GetRolePolicy,
    PutRolePolicy,
    ListRolePolicies,
    DeleteRolePolicy,
    AssumeRole,
    AssumeRoleWithWebIdentity,
    // key management
    FindKeyByAlias,
    CreateKey,
    CreateAlias,
    DeleteAlias,
    ScheduleKeyDeletion,
    // object store
    HeadBucket,
    CreateBucket,
    DeleteBucket,
    PutBucketVersioning,
    PutBucketEncryption,
    PutPublicAccessBlock,
    GetBucketSettings,
    PutObject,
    GetObject,
    DeleteObject,
    ListObjectVersions,
    DeleteObjectVersion,
    // lock tables
    DescribeTable,
    CreateTable,
    DeleteTable,
    PutItem,
    GetItem,
    DeleteItem,
}

impl Operation {
    /// Whether the call changes control-plane state.
    ///
    /// Assume-role calls mint credentials but change nothing, so they count
    /// as read-only.
    pub fn is_mutating(self) -> bool {
        use Operation::*;
        !matches!(
            self,
            DescribeOrganization
                | ListOrganizationalUnits
                | ListAccounts
                | DescribeCreateAccountStatus
                | ListParent
                | GetOidcProvider
                | GetRole
                | GetRolePolicy
                | ListRolePolicies
                | AssumeRole
                | AssumeRoleWithWebIdentity
                | FindKeyByAlias
                | HeadBucket
                | GetBucketSettings
                | GetObject
                | ListObjectVersions
                | DescribeTable
                | GetItem
        )
    }

    /// Wire name, used as the gateway route and in logs.
    pub fn as_str(self) -> &'static str {
        use Operation::*;
        match self {
            DescribeOrganization => "describe_organization",
            CreateOrganization => "create_organization",
            ListOrganizationalUnits => "list_organizational_units",
            CreateOrganizationalUnit => "create_organizational_unit",
            DeleteOrganizationalUnit => "delete_organizational_unit",
            ListAccounts => "list_accounts",
            CreateAccount => "create_account",
            DescribeCreateAccountStatus => "describe_create_account_status",
            ListParent => "list_parent",
            MoveAccount => "move_account",
            CloseAccount => "close_account",
            GetOidcProvider => "get_oidc_provider",
            CreateOidcProvider => "create_oidc_provider",
            UpdateOidcProvider => "update_oidc_provider",
            DeleteOidcProvider => "delete_oidc_provider",
            GetRole => "get_role",
            CreateRole => "create_role",
            UpdateTrustPolicy => "update_trust_policy",
            DeleteRole => "delete_role",
            GetRolePolicy => "get_role_policy",
            PutRolePolicy => "put_role_policy",
            ListRolePolicies => "list_role_policies",
            DeleteRolePolicy => "delete_role_policy",
            AssumeRole => "assume_role",
            AssumeRoleWithWebIdentity => "assume_role_with_web_identity",
            FindKeyByAlias => "find_key_by_alias",
            CreateKey => "create_key",
            CreateAlias => "create_alias",
            DeleteAlias => "delete_alias",
            ScheduleKeyDeletion => "schedule_key_deletion",
            HeadBucket => "head_bucket",
            CreateBucket => "create_bucket",
            DeleteBucket => "delete_bucket",
            PutBucketVersioning => "put_bucket_versioning",
            PutBucketEncryption => "put_bucket_encryption",
            PutPublicAccessBlock => "put_public_access_block",
            GetBucketSettings => "get_bucket_settings",
            PutObject => "put_object",
            GetObject => "get_object",
            DeleteObject => "delete_object",
            ListObjectVersions => "list_object_versions",
            DeleteObjectVersion => "delete_object_version",
            DescribeTable => "describe_table",
            CreateTable => "create_table",
            DeleteTable => "delete_table",
            PutItem => "put_item",
            GetItem => "get_item",
            DeleteItem => "delete_item",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_assumptions_are_not_mutating() {
        assert!(!Operation::GetRole.is_mutating());
        assert!(!Operation::AssumeRoleWithWebIdentity.is_mutating());
        assert!(!Operation::DescribeCreateAccountStatus.is_mutating());
    }

    #[test]
    fn writes_are_mutating() {
        assert!(Operation::CreateAccount.is_mutating());
        assert!(Operation::PutRolePolicy.is_mutating());
        assert!(Operation::PutObject.is_mutating());
        assert!(Operation::DeleteObjectVersion.is_mutating());
    }
}
