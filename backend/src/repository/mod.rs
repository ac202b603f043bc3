//! Persistence boundary for the authorization and billing services
//!
//! Repositories return fully materialized data. Every mutating method is a
//! single transaction in the backing store.

mod memory;
mod postgres;

pub use memory::{InMemoryBillingRepository, InMemoryPermissionRepository};
pub use postgres::{PgBillingRepository, PgPermissionRepository};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    Bill, BillItem, BillSnapshot, InsuranceProvider, PatientInsurance, Payment, Permission,
    PermissionDependency, PrincipalGrants, Role, TemporaryPermission, User,
};
use uuid::Uuid;

use crate::error::AppResult;

/// Users, roles, permissions and grants
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> AppResult<Option<User>>;

    async fn find_role(&self, role_id: Uuid) -> AppResult<Option<Role>>;

    /// Everything needed to resolve the user's permissions at `now`.
    ///
    /// The role comes from `role_id`, or from the legacy `role` slug when no
    /// `role_id` is set. Returns `None` for an unknown user.
    async fn load_principal_grants(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PrincipalGrants>>;

    async fn all_permissions(&self) -> AppResult<Vec<Permission>>;

    async fn find_permissions_by_name(&self, names: &[String]) -> AppResult<Vec<Permission>>;

    async fn permission_dependencies(&self) -> AppResult<Vec<PermissionDependency>>;

    /// Insert or replace the user's override for a permission
    async fn upsert_user_override(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
        allowed: bool,
    ) -> AppResult<()>;

    /// Drop the user's override and deactivate their temporary grants for a permission
    async fn revoke_user_permission(&self, user_id: Uuid, permission_id: Uuid) -> AppResult<()>;

    async fn insert_temporary_permission(&self, grant: &TemporaryPermission) -> AppResult<()>;

    /// Point the user at a role (both `role_id` and the legacy slug), or clear both
    async fn set_user_role(&self, user_id: Uuid, role: Option<&Role>) -> AppResult<()>;

    async fn replace_role_permissions(&self, role_id: Uuid, permission_ids: &[Uuid]) -> AppResult<()>;

    /// Users holding the role or any role that inherits from it
    async fn users_affected_by_role(&self, role_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// Deactivate temporary grants expired at `now`; returns the affected users
    async fn deactivate_expired_temporary_permissions(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>>;
}

/// Outcome of an optimistic bill commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The bill's version moved since it was loaded; nothing was written
    Conflict,
}

/// Everything one billing operation writes, applied atomically
#[derive(Debug, Clone)]
pub struct BillCommit {
    /// New header; its `version` is `expected_version + 1`
    pub bill: Bill,
    pub expected_version: i64,
    pub new_item: Option<BillItem>,
    pub new_payment: Option<Payment>,
}

/// Bills with their items, payments and the insurance they are billed against
#[async_trait]
pub trait BillingRepository: Send + Sync {
    async fn insert_bill(&self, bill: &Bill) -> AppResult<()>;

    /// Bill header, items and payments read from one consistent snapshot
    async fn load_bill(&self, bill_id: Uuid) -> AppResult<Option<BillSnapshot>>;

    async fn load_insurance(
        &self,
        insurance_id: Uuid,
    ) -> AppResult<Option<(PatientInsurance, InsuranceProvider)>>;

    /// Write `commit` only if the bill is still at `expected_version`
    async fn commit(&self, commit: &BillCommit) -> AppResult<CommitOutcome>;
}
