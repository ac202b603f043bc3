//! User, role and permission models

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DataVisibilityScope, ModuleAccess};

/// A staff account on the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    /// Legacy role slug kept for rows created before roles were normalized
    pub role: Option<String>,
    pub role_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named bundle of permissions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    /// Higher is more privileged
    pub priority: i32,
    pub is_super_admin: bool,
    pub parent_role_id: Option<Uuid>,
    pub module_access: ModuleAccess,
    pub data_visibility_scope: DataVisibilityScope,
    pub created_at: DateTime<Utc>,
}

/// A named capability such as `edit-patients`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    pub module: Option<String>,
    pub action: Option<String>,
}

/// `permission_id` cannot be held without `depends_on_permission_id`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PermissionDependency {
    pub permission_id: Uuid,
    pub depends_on_permission_id: Uuid,
}

/// Explicit per-user allow or deny
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPermission {
    pub user_id: Uuid,
    pub permission_id: Uuid,
    pub allowed: bool,
    pub updated_at: DateTime<Utc>,
}

/// Time-bounded grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporaryPermission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub permission_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub granted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TemporaryPermission {
    /// Valid only while active and not yet expired
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.expires_at
    }
}

/// Which role lookup strategy produced a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleGrantSource {
    /// Role → Permission join, including inherited roles
    Normalized,
    /// String-keyed role/permission table kept for backward compatibility
    Legacy,
}

/// Everything needed to resolve a principal's permissions, fully loaded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrincipalGrants {
    pub user_id: Uuid,
    pub role_id: Option<Uuid>,
    pub role_slug: Option<String>,
    pub role_priority: Option<i32>,
    pub is_super_admin: bool,
    pub module_access: ModuleAccess,
    /// Permissions of the role and every ancestor role
    pub role_permissions: BTreeSet<String>,
    pub legacy_role_permissions: BTreeSet<String>,
    /// Permission name → allowed
    pub overrides: BTreeMap<String, bool>,
    /// Names of temporary grants valid at load time
    pub temporary_permissions: BTreeSet<String>,
    /// Latest expiry among the valid temporary grants of each name
    #[serde(default)]
    pub temporary_expires_at: BTreeMap<String, DateTime<Utc>>,
}

impl PrincipalGrants {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    /// Role lookup: normalized tables first, legacy table as fallback
    pub fn role_grant(&self, permission: &str) -> Option<RoleGrantSource> {
        if self.role_permissions.contains(permission) {
            Some(RoleGrantSource::Normalized)
        } else if self.legacy_role_permissions.contains(permission) {
            Some(RoleGrantSource::Legacy)
        } else {
            None
        }
    }

    /// Record a temporary grant valid at load time
    pub fn add_temporary(&mut self, permission: &str, expires_at: DateTime<Utc>) {
        self.temporary_permissions.insert(permission.to_string());
        let latest = self
            .temporary_expires_at
            .entry(permission.to_string())
            .or_insert(expires_at);
        if expires_at > *latest {
            *latest = expires_at;
        }
    }
}
