//! Audit events for administrative and billing mutations.
//!
//! The core never stores audit records itself; it hands every event to an
//! [`AuditLogger`]. [`TracingAuditLogger`] emits structured `tracing` events
//! on the `audit` target, [`InMemoryAuditLogger`] keeps them for tests.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;

/// Mutation being audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PermissionGranted,
    PermissionRevoked,
    PermissionOverridden,
    TemporaryPermissionGranted,
    TemporaryPermissionsSwept,
    RoleAssigned,
    RoleRemoved,
    RolePermissionsSynced,
    BillCreated,
    BillTotalsCalculated,
    DiscountApplied,
    TaxCalculated,
    BalanceUpdated,
    InsuranceCoverageCalculated,
    BillItemAdded,
    PaymentRecorded,
    BillVoided,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PermissionGranted => "permission_granted",
            AuditAction::PermissionRevoked => "permission_revoked",
            AuditAction::PermissionOverridden => "permission_overridden",
            AuditAction::TemporaryPermissionGranted => "temporary_permission_granted",
            AuditAction::TemporaryPermissionsSwept => "temporary_permissions_swept",
            AuditAction::RoleAssigned => "role_assigned",
            AuditAction::RoleRemoved => "role_removed",
            AuditAction::RolePermissionsSynced => "role_permissions_synced",
            AuditAction::BillCreated => "bill_created",
            AuditAction::BillTotalsCalculated => "bill_totals_calculated",
            AuditAction::DiscountApplied => "discount_applied",
            AuditAction::TaxCalculated => "tax_calculated",
            AuditAction::BalanceUpdated => "balance_updated",
            AuditAction::InsuranceCoverageCalculated => "insurance_coverage_calculated",
            AuditAction::BillItemAdded => "bill_item_added",
            AuditAction::PaymentRecorded => "payment_recorded",
            AuditAction::BillVoided => "bill_voided",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the mutation touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AuditTarget {
    User(Uuid),
    Role(Uuid),
    Bill(Uuid),
    System,
}

impl fmt::Display for AuditTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditTarget::User(id) => write!(f, "user:{}", id),
            AuditTarget::Role(id) => write!(f, "role:{}", id),
            AuditTarget::Bill(id) => write!(f, "bill:{}", id),
            AuditTarget::System => f.write_str("system"),
        }
    }
}

/// How the mutation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Succeeded,
    /// Rejected by an access-control rule
    Denied,
    /// Rejected by validation or a business rule
    Rejected,
    /// Infrastructure failure
    Failed,
}

impl AuditOutcome {
    pub fn of<T>(result: &Result<T, AppError>) -> Self {
        match result {
            Ok(_) => AuditOutcome::Succeeded,
            Err(err) if err.is_denial() => AuditOutcome::Denied,
            Err(err) if err.is_business_rule() => AuditOutcome::Rejected,
            Err(_) => AuditOutcome::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Succeeded => "succeeded",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Rejected => "rejected",
            AuditOutcome::Failed => "failed",
        }
    }
}

/// A single audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub action: AuditAction,
    pub target: AuditTarget,
    pub outcome: AuditOutcome,
    pub detail: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        actor_id: Uuid,
        action: AuditAction,
        target: AuditTarget,
        outcome: AuditOutcome,
        detail: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            action,
            target,
            outcome,
            detail,
            occurred_at: Utc::now(),
        }
    }

    /// Build an event from the result of the audited operation.
    ///
    /// Failures get the error code and message merged into `detail`.
    pub fn from_result<T>(
        actor_id: Uuid,
        action: AuditAction,
        target: AuditTarget,
        result: &Result<T, AppError>,
        detail: serde_json::Value,
    ) -> Self {
        let detail = match result {
            Ok(_) => detail,
            Err(err) => serde_json::json!({
                "request": detail,
                "error": err.detail(),
            }),
        };
        Self::new(actor_id, action, target, AuditOutcome::of(result), Some(detail))
    }
}

/// Audit sink owned by the embedding application
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Emits each event as a structured `tracing` record
#[derive(Debug, Clone, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn record(&self, event: AuditEvent) {
        let detail = event
            .detail
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        tracing::info!(
            target: "audit",
            event_id = %event.id,
            actor_id = %event.actor_id,
            action = event.action.as_str(),
            audit_target = %event.target,
            outcome = event.outcome.as_str(),
            detail = %detail,
            "audit event"
        );
    }
}

/// Keeps events in memory for tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditLogger {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditLogger for InMemoryAuditLogger {
    async fn record(&self, event: AuditEvent) {
        self.events.write().await.push(event);
    }
}
