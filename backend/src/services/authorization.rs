//! Authorization engine: permission checks, effective permissions and
//! administrative grant mutations.
//!
//! Decisions are cached per principal. Every mutation writes the store first,
//! then invalidates the principal's cache entries before returning, so a
//! revoke is visible to the very next check.
//!
//! A per-principal generation counter guards against a check that read the
//! store before a mutation and tries to cache its result after the mutation
//! invalidated the entry. A principal whose entries could not be dropped
//! bypasses the cache until a later invalidation succeeds.
//!
//! Entries that rest on a temporary grant live no longer than the grant.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use shared::escalation::{EscalationRequest, TargetRole};
use shared::models::{Permission, PrincipalGrants, Role, TemporaryPermission};
use shared::permissions::{
    decision_expiry, effective_expiry, effective_permissions, resolve_permission, DependencyError,
    DependencyGraph,
};
use shared::validation::validate_permission_name;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent, AuditLogger, AuditTarget};
use crate::cache::{effective_key, permission_key, CachedAccess, PermissionCache};
use crate::config::AuthorizationConfig;
use crate::error::{AppError, AppResult};
use crate::policy::{RoleSessionPolicy, SecurityPolicy};
use crate::repository::PermissionRepository;
use crate::services::escalation::EscalationGuard;

/// Authorization service
#[derive(Clone)]
pub struct AuthorizationService {
    repo: Arc<dyn PermissionRepository>,
    cache: Arc<dyn PermissionCache>,
    audit: Arc<dyn AuditLogger>,
    escalation: EscalationGuard,
    policy: SecurityPolicy,
    cache_ttl: Duration,
    epochs: Arc<RwLock<CacheEpochs>>,
}

/// Per-principal cache bookkeeping
#[derive(Debug, Default)]
struct CacheEpochs {
    generations: HashMap<Uuid, u64>,
    /// Principals whose last invalidation failed
    bypass: HashSet<Uuid>,
}

impl CacheEpochs {
    fn generation(&self, user_id: Uuid) -> u64 {
        self.generations.get(&user_id).copied().unwrap_or(0)
    }
}

impl AuthorizationService {
    pub fn new(
        repo: Arc<dyn PermissionRepository>,
        cache: Arc<dyn PermissionCache>,
        audit: Arc<dyn AuditLogger>,
        config: &AuthorizationConfig,
    ) -> Self {
        Self {
            escalation: EscalationGuard::new(repo.clone()),
            repo,
            cache,
            audit,
            policy: SecurityPolicy::default(),
            cache_ttl: config.cache_ttl(),
            epochs: Arc::new(RwLock::new(CacheEpochs::default())),
        }
    }

    pub fn with_security_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn escalation_guard(&self) -> &EscalationGuard {
        &self.escalation
    }

    // ========================================================================
    // Checks
    // ========================================================================

    /// Check a single permission.
    ///
    /// Never fails: unknown principals and permissions resolve to `false`,
    /// store failures are logged and deny.
    #[instrument(skip(self))]
    pub async fn has_permission(&self, user_id: Uuid, permission: &str) -> bool {
        let key = permission_key(user_id, permission);
        let Some(generation) = self.cacheable_generation(user_id).await else {
            return self.resolve_uncached(user_id, permission).await;
        };

        match self.cache.get(&key).await {
            Ok(Some(CachedAccess::Decision(allowed))) => {
                tracing::debug!(allowed, "Permission cache hit");
                return allowed;
            }
            Ok(_) => tracing::debug!("Permission cache miss"),
            Err(e) => tracing::warn!(error = %e, "Permission cache read failed, resolving from store"),
        }

        let now = Utc::now();
        let grants = match self.repo.load_principal_grants(user_id, now).await {
            Ok(Some(grants)) => grants,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load grants, denying");
                return false;
            }
        };

        let allowed = resolve_permission(&grants, permission);
        let expires_at = if allowed {
            decision_expiry(&grants, permission)
        } else {
            None
        };
        self.store_in_cache(
            user_id,
            generation,
            &key,
            CachedAccess::Decision(allowed),
            self.ttl_until(expires_at, now),
        )
        .await;
        allowed
    }

    /// True as soon as one of `permissions` is held
    pub async fn has_any_permission(&self, user_id: Uuid, permissions: &[&str]) -> bool {
        for permission in permissions {
            if self.has_permission(user_id, permission).await {
                return true;
            }
        }
        false
    }

    /// False as soon as one of `permissions` is missing
    pub async fn has_all_permissions(&self, user_id: Uuid, permissions: &[&str]) -> bool {
        for permission in permissions {
            if !self.has_permission(user_id, permission).await {
                return false;
            }
        }
        true
    }

    /// Like [`has_permission`](Self::has_permission) but fails with `Forbidden`
    pub async fn authorize(&self, user_id: Uuid, permission: &str) -> AppResult<()> {
        if self.has_permission(user_id, permission).await {
            Ok(())
        } else {
            Err(AppError::Forbidden {
                permission: permission.to_string(),
            })
        }
    }

    /// Every permission the principal holds; empty for an unknown principal
    #[instrument(skip(self))]
    pub async fn effective_permissions(&self, user_id: Uuid) -> AppResult<BTreeSet<String>> {
        let key = effective_key(user_id);
        let generation = self.cacheable_generation(user_id).await;

        if generation.is_some() {
            match self.cache.get(&key).await {
                Ok(Some(CachedAccess::Effective(permissions))) => {
                    tracing::debug!("Effective permission cache hit");
                    return Ok(permissions);
                }
                Ok(_) => tracing::debug!("Effective permission cache miss"),
                Err(e) => tracing::warn!(error = %e, "Permission cache read failed, resolving from store"),
            }
        }

        let now = Utc::now();
        let Some(grants) = self.repo.load_principal_grants(user_id, now).await? else {
            return Ok(BTreeSet::new());
        };

        let universe = if grants.is_super_admin {
            self.repo.all_permissions().await?
        } else {
            Vec::new()
        };
        let effective = effective_permissions(&grants, universe.iter().map(|p| p.name.as_str()));

        if let Some(generation) = generation {
            self.store_in_cache(
                user_id,
                generation,
                &key,
                CachedAccess::Effective(effective.clone()),
                self.ttl_until(effective_expiry(&grants), now),
            )
            .await;
        }
        Ok(effective)
    }

    /// Whether the principal's role opens `module`
    pub async fn has_module_access(&self, user_id: Uuid, module: &str) -> bool {
        match self.repo.load_principal_grants(user_id, Utc::now()).await {
            Ok(Some(grants)) => grants.is_super_admin || grants.module_access.allows(module),
            Ok(None) => false,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to load grants, denying module access");
                false
            }
        }
    }

    /// Session, MFA and rate-limit policy of the principal's role, `None` without a role
    pub async fn session_policy(&self, user_id: Uuid) -> AppResult<Option<RoleSessionPolicy>> {
        let grants = self.principal(user_id).await?;
        Ok(grants
            .role_slug
            .as_deref()
            .zip(grants.role_priority)
            .map(|(slug, priority)| self.policy.for_role(slug, priority)))
    }

    /// Check candidate permissions against each other's prerequisites
    pub async fn validate_permission_dependencies(
        &self,
        candidate_ids: &[Uuid],
    ) -> AppResult<Vec<DependencyError>> {
        let graph = self.dependency_graph().await?;
        Ok(graph.validate(candidate_ids))
    }

    /// Drop every cached decision for the principal.
    ///
    /// If the cache refuses, the principal's checks skip the cache until a
    /// later call succeeds, so a failed invalidation never serves a stale allow.
    #[instrument(skip(self))]
    pub async fn clear_permission_cache(&self, user_id: Uuid) {
        let generation = {
            let mut epochs = self.epochs.write().await;
            let generation = epochs.generations.entry(user_id).or_insert(0);
            *generation += 1;
            *generation
        };

        match self.cache.invalidate_principal(user_id).await {
            Ok(()) => {
                let mut epochs = self.epochs.write().await;
                // A newer clear may still owe its own invalidation
                if epochs.generation(user_id) == generation {
                    epochs.bypass.remove(&user_id);
                }
                tracing::debug!(user_id = %user_id, "Permission cache cleared");
            }
            Err(e) => {
                self.epochs.write().await.bypass.insert(user_id);
                tracing::error!(
                    user_id = %user_id,
                    error = %e,
                    "Failed to invalidate permission cache, bypassing it for this principal"
                );
            }
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Allow a permission for a user regardless of their role
    #[instrument(skip(self))]
    pub async fn grant(&self, actor_id: Uuid, user_id: Uuid, permission: &str) -> AppResult<()> {
        let result = self.set_override(actor_id, user_id, permission, true).await;
        self.audited(
            actor_id,
            AuditAction::PermissionGranted,
            AuditTarget::User(user_id),
            json!({ "permission": permission }),
            result,
        )
        .await
    }

    /// Remove the user's own grants for a permission so the role decides again
    #[instrument(skip(self))]
    pub async fn revoke(&self, actor_id: Uuid, user_id: Uuid, permission: &str) -> AppResult<()> {
        let result = self.revoke_inner(actor_id, user_id, permission).await;
        self.audited(
            actor_id,
            AuditAction::PermissionRevoked,
            AuditTarget::User(user_id),
            json!({ "permission": permission }),
            result,
        )
        .await
    }

    /// Explicitly allow or deny a permission for a user
    #[instrument(skip(self))]
    pub async fn override_permission(
        &self,
        actor_id: Uuid,
        user_id: Uuid,
        permission: &str,
        allowed: bool,
    ) -> AppResult<()> {
        let result = self.set_override(actor_id, user_id, permission, allowed).await;
        self.audited(
            actor_id,
            AuditAction::PermissionOverridden,
            AuditTarget::User(user_id),
            json!({ "permission": permission, "allowed": allowed }),
            result,
        )
        .await
    }

    /// Grant a permission until `expires_at`
    #[instrument(skip(self))]
    pub async fn grant_temporary(
        &self,
        actor_id: Uuid,
        user_id: Uuid,
        permission: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<TemporaryPermission> {
        let result = self
            .grant_temporary_inner(actor_id, user_id, permission, expires_at)
            .await;
        self.audited(
            actor_id,
            AuditAction::TemporaryPermissionGranted,
            AuditTarget::User(user_id),
            json!({ "permission": permission, "expires_at": expires_at }),
            result,
        )
        .await
    }

    /// Point a user at a role
    #[instrument(skip(self))]
    pub async fn assign_role(&self, actor_id: Uuid, user_id: Uuid, role_id: Uuid) -> AppResult<()> {
        let result = self.assign_role_inner(actor_id, user_id, role_id).await;
        self.audited(
            actor_id,
            AuditAction::RoleAssigned,
            AuditTarget::User(user_id),
            json!({ "role_id": role_id }),
            result,
        )
        .await
    }

    /// Leave a user without any role
    #[instrument(skip(self))]
    pub async fn remove_role(&self, actor_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let result = self.remove_role_inner(actor_id, user_id).await;
        self.audited(
            actor_id,
            AuditAction::RoleRemoved,
            AuditTarget::User(user_id),
            json!({}),
            result,
        )
        .await
    }

    /// Replace a role's permission set; returns how many principals were affected
    #[instrument(skip(self))]
    pub async fn sync_role_permissions(
        &self,
        actor_id: Uuid,
        role_id: Uuid,
        permissions: &[String],
    ) -> AppResult<usize> {
        let result = self.sync_role_inner(actor_id, role_id, permissions).await;
        self.audited(
            actor_id,
            AuditAction::RolePermissionsSynced,
            AuditTarget::Role(role_id),
            json!({ "permissions": permissions }),
            result,
        )
        .await
    }

    /// Deactivate temporary grants that expired by `now`; returns affected principals
    #[instrument(skip(self))]
    pub async fn sweep_expired_temporary_permissions(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let result = self.sweep_inner(now).await;
        self.audited(
            Uuid::nil(),
            AuditAction::TemporaryPermissionsSwept,
            AuditTarget::System,
            json!({ "as_of": now }),
            result,
        )
        .await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn set_override(
        &self,
        actor_id: Uuid,
        user_id: Uuid,
        name: &str,
        allowed: bool,
    ) -> AppResult<()> {
        let permission = self.lookup_permission(name).await?;
        let target = self.principal(user_id).await?;

        let granted = if allowed { vec![permission.name.clone()] } else { Vec::new() };
        self.escalation
            .ensure_allowed(
                actor_id,
                &EscalationRequest {
                    target_user_priority: target.role_priority,
                    target_role: None,
                    permissions: granted,
                },
            )
            .await?;

        if allowed {
            self.ensure_grant_dependencies(&target, &permission).await?;
        }

        self.repo
            .upsert_user_override(user_id, permission.id, allowed)
            .await?;
        self.clear_permission_cache(user_id).await;

        tracing::info!(
            actor_id = %actor_id,
            user_id = %user_id,
            permission = %permission.name,
            allowed,
            "Permission override set"
        );
        Ok(())
    }

    async fn revoke_inner(&self, actor_id: Uuid, user_id: Uuid, name: &str) -> AppResult<()> {
        let permission = self.lookup_permission(name).await?;
        let target = self.principal(user_id).await?;

        self.escalation
            .ensure_allowed(
                actor_id,
                &EscalationRequest {
                    target_user_priority: target.role_priority,
                    ..Default::default()
                },
            )
            .await?;

        self.repo
            .revoke_user_permission(user_id, permission.id)
            .await?;
        self.clear_permission_cache(user_id).await;

        tracing::info!(
            actor_id = %actor_id,
            user_id = %user_id,
            permission = %permission.name,
            "Permission revoked"
        );
        Ok(())
    }

    async fn grant_temporary_inner(
        &self,
        actor_id: Uuid,
        user_id: Uuid,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<TemporaryPermission> {
        let now = Utc::now();
        if expires_at <= now {
            return Err(AppError::validation(
                "expires_at",
                "Expiry must be in the future",
            ));
        }

        let permission = self.lookup_permission(name).await?;
        let target = self.principal(user_id).await?;

        self.escalation
            .ensure_allowed(
                actor_id,
                &EscalationRequest {
                    target_user_priority: target.role_priority,
                    target_role: None,
                    permissions: vec![permission.name.clone()],
                },
            )
            .await?;
        self.ensure_grant_dependencies(&target, &permission).await?;

        let grant = TemporaryPermission {
            id: Uuid::new_v4(),
            user_id,
            permission_id: permission.id,
            expires_at,
            active: true,
            granted_by: Some(actor_id),
            created_at: now,
        };
        self.repo.insert_temporary_permission(&grant).await?;
        self.clear_permission_cache(user_id).await;

        tracing::info!(
            actor_id = %actor_id,
            user_id = %user_id,
            permission = %permission.name,
            expires_at = %expires_at,
            "Temporary permission granted"
        );
        Ok(grant)
    }

    async fn assign_role_inner(&self, actor_id: Uuid, user_id: Uuid, role_id: Uuid) -> AppResult<()> {
        let role = self.lookup_role(role_id).await?;
        let target = self.principal(user_id).await?;

        self.escalation
            .ensure_allowed(
                actor_id,
                &EscalationRequest {
                    target_user_priority: target.role_priority,
                    target_role: Some(target_role(&role)),
                    permissions: Vec::new(),
                },
            )
            .await?;

        self.repo.set_user_role(user_id, Some(&role)).await?;
        self.clear_permission_cache(user_id).await;

        tracing::info!(
            actor_id = %actor_id,
            user_id = %user_id,
            role = %role.slug,
            "Role assigned"
        );
        Ok(())
    }

    async fn remove_role_inner(&self, actor_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let target = self.principal(user_id).await?;

        self.escalation
            .ensure_allowed(
                actor_id,
                &EscalationRequest {
                    target_user_priority: target.role_priority,
                    ..Default::default()
                },
            )
            .await?;

        self.repo.set_user_role(user_id, None).await?;
        self.clear_permission_cache(user_id).await;

        tracing::info!(actor_id = %actor_id, user_id = %user_id, "Role removed");
        Ok(())
    }

    async fn sync_role_inner(
        &self,
        actor_id: Uuid,
        role_id: Uuid,
        names: &[String],
    ) -> AppResult<usize> {
        let role = self.lookup_role(role_id).await?;

        for name in names {
            validate_permission_name(name).map_err(|msg| AppError::validation("permissions", msg))?;
        }
        let requested: BTreeSet<&str> = names.iter().map(String::as_str).collect();

        let permissions = self.repo.find_permissions_by_name(names).await?;
        let found: HashSet<&str> = permissions.iter().map(|p| p.name.as_str()).collect();
        let unknown: Vec<&str> = requested
            .iter()
            .copied()
            .filter(|name| !found.contains(name))
            .collect();
        if !unknown.is_empty() {
            return Err(AppError::validation(
                "permissions",
                format!("Unknown permissions: {}", unknown.join(", ")),
            ));
        }

        self.escalation
            .ensure_allowed(
                actor_id,
                &EscalationRequest {
                    target_user_priority: None,
                    target_role: Some(target_role(&role)),
                    permissions: requested.iter().map(|name| name.to_string()).collect(),
                },
            )
            .await?;

        let ids: Vec<Uuid> = permissions.iter().map(|p| p.id).collect();
        let errors = self.dependency_graph().await?.validate(&ids);
        if !errors.is_empty() {
            return Err(AppError::DependencyMissing { errors });
        }

        self.repo.replace_role_permissions(role_id, &ids).await?;

        let affected = self.repo.users_affected_by_role(role_id).await?;
        for user_id in &affected {
            self.clear_permission_cache(*user_id).await;
        }

        tracing::info!(
            actor_id = %actor_id,
            role = %role.slug,
            permissions = ids.len(),
            affected_users = affected.len(),
            "Role permissions synced"
        );
        Ok(affected.len())
    }

    async fn sweep_inner(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let affected = self.repo.deactivate_expired_temporary_permissions(now).await?;
        for user_id in &affected {
            self.clear_permission_cache(*user_id).await;
        }

        if !affected.is_empty() {
            tracing::info!(affected_users = affected.len(), "Expired temporary permissions swept");
        }
        Ok(affected.len())
    }

    /// Allowing `permission` must not leave the user without one of its prerequisites
    async fn ensure_grant_dependencies(
        &self,
        target: &PrincipalGrants,
        permission: &Permission,
    ) -> AppResult<()> {
        let universe = self.repo.all_permissions().await?;
        let dependencies = self.repo.permission_dependencies().await?;

        let effective = effective_permissions(target, universe.iter().map(|p| p.name.as_str()));
        let mut present: HashSet<Uuid> = universe
            .iter()
            .filter(|p| effective.contains(&p.name))
            .map(|p| p.id)
            .collect();
        present.insert(permission.id);

        let errors = DependencyGraph::new(&universe, &dependencies)
            .missing_prerequisites(&[permission.id], &present);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::DependencyMissing { errors })
        }
    }

    async fn dependency_graph(&self) -> AppResult<DependencyGraph> {
        let universe = self.repo.all_permissions().await?;
        let dependencies = self.repo.permission_dependencies().await?;
        Ok(DependencyGraph::new(&universe, &dependencies))
    }

    async fn lookup_permission(&self, name: &str) -> AppResult<Permission> {
        validate_permission_name(name).map_err(|msg| AppError::validation("permission", msg))?;

        self.repo
            .find_permissions_by_name(&[name.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::validation("permission", format!("Unknown permission '{}'", name)))
    }

    async fn lookup_role(&self, role_id: Uuid) -> AppResult<Role> {
        self.repo
            .find_role(role_id)
            .await?
            .ok_or_else(|| AppError::validation("role_id", "Unknown role"))
    }

    async fn principal(&self, user_id: Uuid) -> AppResult<PrincipalGrants> {
        self.repo
            .load_principal_grants(user_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    /// Current generation, `None` while the principal bypasses the cache
    async fn cacheable_generation(&self, user_id: Uuid) -> Option<u64> {
        let epochs = self.epochs.read().await;
        if epochs.bypass.contains(&user_id) {
            None
        } else {
            Some(epochs.generation(user_id))
        }
    }

    async fn resolve_uncached(&self, user_id: Uuid, permission: &str) -> bool {
        tracing::debug!("Principal bypasses the permission cache");
        match self.repo.load_principal_grants(user_id, Utc::now()).await {
            Ok(Some(grants)) => resolve_permission(&grants, permission),
            Ok(None) => false,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load grants, denying");
                false
            }
        }
    }

    /// Cache lifetime, cut short by `expires_at`. `None` once it has passed.
    fn ttl_until(&self, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
        match expires_at {
            None => Some(self.cache_ttl),
            Some(expires_at) => (expires_at - now)
                .to_std()
                .ok()
                .filter(|remaining| !remaining.is_zero())
                .map(|remaining| remaining.min(self.cache_ttl)),
        }
    }

    /// Cache `value` unless the principal was invalidated since `generation` was read
    async fn store_in_cache(
        &self,
        user_id: Uuid,
        generation: u64,
        key: &str,
        value: CachedAccess,
        ttl: Option<Duration>,
    ) {
        let Some(ttl) = ttl else {
            tracing::debug!(key = %key, "Skipping cache write for an already lapsed grant");
            return;
        };

        let epochs = self.epochs.read().await;
        if epochs.bypass.contains(&user_id) || epochs.generation(user_id) != generation {
            tracing::debug!(key = %key, "Skipping cache write for invalidated principal");
            return;
        }

        if let Err(e) = self.cache.set(key, value, ttl).await {
            tracing::warn!(key = %key, error = %e, "Failed to write permission cache");
        }
    }

    async fn audited<T>(
        &self,
        actor_id: Uuid,
        action: AuditAction,
        target: AuditTarget,
        detail: serde_json::Value,
        result: AppResult<T>,
    ) -> AppResult<T> {
        self.audit
            .record(AuditEvent::from_result(actor_id, action, target, &result, detail))
            .await;
        result
    }
}

fn target_role(role: &Role) -> TargetRole {
    TargetRole {
        slug: role.slug.clone(),
        priority: role.priority,
        is_super_admin: role.is_super_admin,
    }
}
