//! Escalation guard for administrative access mutations

use std::sync::Arc;

use chrono::Utc;
use shared::escalation::{check_escalation, ActorAuthority, EscalationReport, EscalationRequest};
use shared::permissions::effective_permissions;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::repository::PermissionRepository;

/// Loads an actor's authority and checks requested changes against it
#[derive(Clone)]
pub struct EscalationGuard {
    repo: Arc<dyn PermissionRepository>,
}

impl EscalationGuard {
    pub fn new(repo: Arc<dyn PermissionRepository>) -> Self {
        Self { repo }
    }

    /// What the actor holds right now, read from the store rather than the cache
    pub async fn authority_of(&self, actor_id: Uuid) -> AppResult<ActorAuthority> {
        let grants = self
            .repo
            .load_principal_grants(actor_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        // Super-admins bypass the permission check, so no universe is needed
        let permissions = effective_permissions(&grants, std::iter::empty::<&str>());

        Ok(ActorAuthority {
            user_id: actor_id,
            priority: grants.role_priority,
            is_super_admin: grants.is_super_admin,
            permissions,
        })
    }

    pub async fn check(
        &self,
        actor_id: Uuid,
        request: &EscalationRequest,
    ) -> AppResult<EscalationReport> {
        let authority = self.authority_of(actor_id).await?;
        Ok(check_escalation(&authority, request))
    }

    /// Fail with `EscalationDenied` unless the request is within the actor's authority
    pub async fn ensure_allowed(&self, actor_id: Uuid, request: &EscalationRequest) -> AppResult<()> {
        let report = self.check(actor_id, request).await?;
        if report.allowed {
            return Ok(());
        }

        tracing::warn!(
            actor_id = %actor_id,
            violations = ?report.violations,
            "Escalation attempt rejected"
        );
        Err(AppError::EscalationDenied {
            violations: report.violations,
        })
    }
}
