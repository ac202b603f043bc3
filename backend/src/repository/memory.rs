//! In-memory repositories for tests and local tooling

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    Bill, BillItem, BillSnapshot, InsuranceProvider, PatientInsurance, Payment, Permission,
    PermissionDependency, PrincipalGrants, Role, TemporaryPermission, User,
};
use shared::permissions::{role_descendants, role_lineage};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BillCommit, BillingRepository, CommitOutcome, PermissionRepository};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct PermissionStore {
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: HashSet<(Uuid, Uuid)>,
    /// (role slug, permission name)
    legacy_role_permissions: HashSet<(String, String)>,
    overrides: HashMap<(Uuid, Uuid), bool>,
    temporary: Vec<TemporaryPermission>,
    dependencies: Vec<PermissionDependency>,
}

impl PermissionStore {
    fn role_of(&self, user: &User) -> Option<&Role> {
        user.role_id
            .and_then(|id| self.roles.get(&id))
            .or_else(|| {
                let slug = user.role.as_deref()?;
                self.roles.values().find(|r| r.slug == slug)
            })
    }

    fn permission_name(&self, permission_id: &Uuid) -> Option<String> {
        self.permissions.get(permission_id).map(|p| p.name.clone())
    }
}

/// Permission repository backed by process memory
#[derive(Clone, Default)]
pub struct InMemoryPermissionRepository {
    store: Arc<RwLock<PermissionStore>>,
}

impl InMemoryPermissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.store.write().await.users.insert(user.id, user);
    }

    pub async fn insert_role(&self, role: Role) {
        self.store.write().await.roles.insert(role.id, role);
    }

    pub async fn insert_permission(&self, permission: Permission) {
        self.store
            .write()
            .await
            .permissions
            .insert(permission.id, permission);
    }

    pub async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) {
        self.store
            .write()
            .await
            .role_permissions
            .insert((role_id, permission_id));
    }

    pub async fn insert_legacy_role_permission(&self, role_slug: &str, permission: &str) {
        self.store
            .write()
            .await
            .legacy_role_permissions
            .insert((role_slug.to_string(), permission.to_string()));
    }

    pub async fn add_dependency(&self, permission_id: Uuid, depends_on_permission_id: Uuid) {
        self.store
            .write()
            .await
            .dependencies
            .push(PermissionDependency {
                permission_id,
                depends_on_permission_id,
            });
    }

    pub async fn user(&self, user_id: Uuid) -> Option<User> {
        self.store.read().await.users.get(&user_id).cloned()
    }

    pub async fn temporary_permissions(&self, user_id: Uuid) -> Vec<TemporaryPermission> {
        self.store
            .read()
            .await
            .temporary
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PermissionRepository for InMemoryPermissionRepository {
    async fn find_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        Ok(self.store.read().await.users.get(&user_id).cloned())
    }

    async fn find_role(&self, role_id: Uuid) -> AppResult<Option<Role>> {
        Ok(self.store.read().await.roles.get(&role_id).cloned())
    }

    async fn load_principal_grants(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PrincipalGrants>> {
        let store = self.store.read().await;
        let Some(user) = store.users.get(&user_id) else {
            return Ok(None);
        };

        let mut grants = PrincipalGrants::new(user_id);
        let role = store.role_of(user);

        if let Some(role) = role {
            grants.role_id = Some(role.id);
            grants.role_slug = Some(role.slug.clone());
            grants.role_priority = Some(role.priority);
            grants.is_super_admin = role.is_super_admin;
            grants.module_access = role.module_access.clone();

            let lineage = role_lineage(role.id, &store.roles);
            grants.role_permissions = store
                .role_permissions
                .iter()
                .filter(|(role_id, _)| lineage.contains(role_id))
                .filter_map(|(_, permission_id)| store.permission_name(permission_id))
                .collect();
        }

        let legacy_slug = user.role.clone().or_else(|| role.map(|r| r.slug.clone()));
        if let Some(slug) = legacy_slug {
            grants.legacy_role_permissions = store
                .legacy_role_permissions
                .iter()
                .filter(|(role_slug, _)| *role_slug == slug)
                .map(|(_, permission)| permission.clone())
                .collect();
        }

        grants.overrides = store
            .overrides
            .iter()
            .filter(|((owner, _), _)| *owner == user_id)
            .filter_map(|((_, permission_id), &allowed)| {
                store.permission_name(permission_id).map(|name| (name, allowed))
            })
            .collect();

        for grant in store
            .temporary
            .iter()
            .filter(|t| t.user_id == user_id && t.is_valid_at(now))
        {
            if let Some(name) = store.permission_name(&grant.permission_id) {
                grants.add_temporary(&name, grant.expires_at);
            }
        }

        Ok(Some(grants))
    }

    async fn all_permissions(&self) -> AppResult<Vec<Permission>> {
        let mut permissions: Vec<Permission> =
            self.store.read().await.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn find_permissions_by_name(&self, names: &[String]) -> AppResult<Vec<Permission>> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        Ok(self
            .store
            .read()
            .await
            .permissions
            .values()
            .filter(|p| wanted.contains(p.name.as_str()))
            .cloned()
            .collect())
    }

    async fn permission_dependencies(&self) -> AppResult<Vec<PermissionDependency>> {
        Ok(self.store.read().await.dependencies.clone())
    }

    async fn upsert_user_override(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
        allowed: bool,
    ) -> AppResult<()> {
        self.store
            .write()
            .await
            .overrides
            .insert((user_id, permission_id), allowed);
        Ok(())
    }

    async fn revoke_user_permission(&self, user_id: Uuid, permission_id: Uuid) -> AppResult<()> {
        let mut store = self.store.write().await;
        store.overrides.remove(&(user_id, permission_id));
        for grant in store
            .temporary
            .iter_mut()
            .filter(|t| t.user_id == user_id && t.permission_id == permission_id)
        {
            grant.active = false;
        }
        Ok(())
    }

    async fn insert_temporary_permission(&self, grant: &TemporaryPermission) -> AppResult<()> {
        self.store.write().await.temporary.push(grant.clone());
        Ok(())
    }

    async fn set_user_role(&self, user_id: Uuid, role: Option<&Role>) -> AppResult<()> {
        let mut store = self.store.write().await;
        let user = store
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        user.role_id = role.map(|r| r.id);
        user.role = role.map(|r| r.slug.clone());
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn replace_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> AppResult<()> {
        let mut store = self.store.write().await;
        store.role_permissions.retain(|(owner, _)| *owner != role_id);
        store
            .role_permissions
            .extend(permission_ids.iter().map(|&permission_id| (role_id, permission_id)));
        Ok(())
    }

    async fn users_affected_by_role(&self, role_id: Uuid) -> AppResult<Vec<Uuid>> {
        let store = self.store.read().await;
        let affected = role_descendants(role_id, &store.roles);

        Ok(store
            .users
            .values()
            .filter(|user| {
                store
                    .role_of(user)
                    .map(|role| affected.contains(&role.id))
                    .unwrap_or(false)
            })
            .map(|user| user.id)
            .collect())
    }

    async fn deactivate_expired_temporary_permissions(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let mut store = self.store.write().await;
        let mut affected = BTreeSet::new();

        for grant in store
            .temporary
            .iter_mut()
            .filter(|t| t.active && t.expires_at <= now)
        {
            grant.active = false;
            affected.insert(grant.user_id);
        }

        Ok(affected.into_iter().collect())
    }
}

#[derive(Default)]
struct BillingStore {
    bills: HashMap<Uuid, Bill>,
    items: Vec<BillItem>,
    payments: Vec<Payment>,
    insurances: HashMap<Uuid, PatientInsurance>,
    providers: HashMap<Uuid, InsuranceProvider>,
}

/// Billing repository backed by process memory
#[derive(Clone, Default)]
pub struct InMemoryBillingRepository {
    store: Arc<RwLock<BillingStore>>,
}

impl InMemoryBillingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_provider(&self, provider: InsuranceProvider) {
        self.store
            .write()
            .await
            .providers
            .insert(provider.id, provider);
    }

    pub async fn insert_insurance(&self, insurance: PatientInsurance) {
        self.store
            .write()
            .await
            .insurances
            .insert(insurance.id, insurance);
    }

    pub async fn bill(&self, bill_id: Uuid) -> Option<Bill> {
        self.store.read().await.bills.get(&bill_id).cloned()
    }
}

#[async_trait]
impl BillingRepository for InMemoryBillingRepository {
    async fn insert_bill(&self, bill: &Bill) -> AppResult<()> {
        self.store.write().await.bills.insert(bill.id, bill.clone());
        Ok(())
    }

    async fn load_bill(&self, bill_id: Uuid) -> AppResult<Option<BillSnapshot>> {
        let store = self.store.read().await;
        let Some(bill) = store.bills.get(&bill_id) else {
            return Ok(None);
        };

        Ok(Some(BillSnapshot {
            bill: bill.clone(),
            items: store
                .items
                .iter()
                .filter(|i| i.bill_id == bill_id)
                .cloned()
                .collect(),
            payments: store
                .payments
                .iter()
                .filter(|p| p.bill_id == bill_id)
                .cloned()
                .collect(),
        }))
    }

    async fn load_insurance(
        &self,
        insurance_id: Uuid,
    ) -> AppResult<Option<(PatientInsurance, InsuranceProvider)>> {
        let store = self.store.read().await;
        let Some(insurance) = store.insurances.get(&insurance_id) else {
            return Ok(None);
        };
        Ok(store
            .providers
            .get(&insurance.provider_id)
            .map(|provider| (insurance.clone(), provider.clone())))
    }

    async fn commit(&self, commit: &BillCommit) -> AppResult<CommitOutcome> {
        let mut store = self.store.write().await;
        let current = store
            .bills
            .get_mut(&commit.bill.id)
            .ok_or_else(|| AppError::NotFound("Bill".to_string()))?;

        if current.version != commit.expected_version {
            return Ok(CommitOutcome::Conflict);
        }
        *current = commit.bill.clone();

        if let Some(item) = &commit.new_item {
            store.items.push(item.clone());
        }
        if let Some(payment) = &commit.new_payment {
            store.payments.push(payment.clone());
        }

        Ok(CommitOutcome::Committed)
    }
}
