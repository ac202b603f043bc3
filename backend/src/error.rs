//! Error handling for the hospital management core
//!
//! Errors carry a stable code and the offending field or permission so the
//! HTTP layer can build access-denied and field-level responses.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{BillingRuleViolation, DependencyError};
use thiserror::Error;
use uuid::Uuid;

use crate::cache::CacheError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authorization errors
    #[error("Permission denied: requires {permission}")]
    Forbidden { permission: String },

    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Privilege escalation denied: {}", .violations.join("; "))]
    EscalationDenied { violations: Vec<String> },

    #[error("Missing permission dependencies: {}", join_dependency_errors(.errors))]
    DependencyMissing { errors: Vec<DependencyError> },

    // Billing errors
    #[error("Invalid argument: {message}")]
    InvalidArgument { field: String, message: String },

    #[error("Discount {discount} exceeds subtotal {sub_total}")]
    ExceedsSubtotal { discount: Decimal, sub_total: Decimal },

    #[error("Insurance policy is not active")]
    InsuranceInactive,

    #[error("Insurance coverage ended on {0}")]
    InsuranceExpired(NaiveDate),

    #[error("Insurance provider is not active")]
    ProviderInactive,

    #[error("Bill {bill_id} was modified concurrently")]
    ConcurrentModification { bill_id: Uuid },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Infrastructure errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

fn join_dependency_errors(errors: &[DependencyError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Forbidden { .. } => "FORBIDDEN",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::EscalationDenied { .. } => "ESCALATION_DENIED",
            AppError::DependencyMissing { .. } => "DEPENDENCY_MISSING",
            AppError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            AppError::ExceedsSubtotal { .. } => "EXCEEDS_SUBTOTAL",
            AppError::InsuranceInactive => "INSURANCE_INACTIVE",
            AppError::InsuranceExpired(_) => "INSURANCE_EXPIRED",
            AppError::ProviderInactive => "PROVIDER_INACTIVE",
            AppError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            AppError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Cache(_) => "CACHE_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Field or permission the error refers to, if any
    pub fn field(&self) -> Option<String> {
        match self {
            AppError::Forbidden { permission } => Some(permission.clone()),
            AppError::Validation { field, .. } | AppError::InvalidArgument { field, .. } => {
                Some(field.clone())
            }
            AppError::ExceedsSubtotal { .. } => Some("discount".to_string()),
            AppError::InsuranceInactive | AppError::InsuranceExpired(_) => {
                Some("insurance_id".to_string())
            }
            AppError::ProviderInactive => Some("provider_id".to_string()),
            _ => None,
        }
    }

    /// Access-control rejections, as opposed to malformed requests
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AppError::Forbidden { .. } | AppError::EscalationDenied { .. }
        )
    }

    /// Expected business-rule outcomes; everything else is infrastructure
    pub fn is_business_rule(&self) -> bool {
        !matches!(
            self,
            AppError::Cache(_)
                | AppError::Configuration(_)
                | AppError::DatabaseError(_)
                | AppError::InternalError(_)
        )
    }

    /// Structured detail for the HTTP layer
    pub fn detail(&self) -> ErrorDetail {
        let message = if self.is_business_rule() {
            self.to_string()
        } else {
            "An internal error occurred".to_string()
        };

        ErrorDetail {
            code: self.code().to_string(),
            message,
            field: self.field(),
        }
    }
}

impl From<BillingRuleViolation> for AppError {
    fn from(violation: BillingRuleViolation) -> Self {
        match violation {
            BillingRuleViolation::InvalidArgument { field, message } => {
                AppError::invalid_argument(field, message)
            }
            BillingRuleViolation::ExceedsSubtotal {
                discount,
                sub_total,
            } => AppError::ExceedsSubtotal {
                discount,
                sub_total,
            },
            BillingRuleViolation::InsuranceInactive => AppError::InsuranceInactive,
            BillingRuleViolation::InsuranceExpired { ended_on } => {
                AppError::InsuranceExpired(ended_on)
            }
            BillingRuleViolation::ProviderInactive => AppError::ProviderInactive,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .min()
            .map(|field| field.to_string())
            .unwrap_or_else(|| "input".to_string());
        AppError::validation(field, errors.to_string())
    }
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Outcome envelope for callers that prefer a success flag over `Err`.
///
/// Business-rule failures become `success = false` with a message;
/// infrastructure failures stay errors.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl<T> OperationResult<T> {
    pub fn capture(result: AppResult<T>, success_message: impl Into<String>) -> AppResult<Self> {
        match result {
            Ok(data) => Ok(Self {
                success: true,
                data: Some(data),
                message: success_message.into(),
                error: None,
            }),
            Err(err) if err.is_business_rule() => Ok(Self {
                success: false,
                data: None,
                message: err.to_string(),
                error: Some(err.detail()),
            }),
            Err(err) => Err(err),
        }
    }
}

/// Result type alias for services
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_violation_maps_to_app_error() {
        let err: AppError = BillingRuleViolation::invalid("discount", "too large").into();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert_eq!(err.field().as_deref(), Some("discount"));
    }

    #[test]
    fn test_forbidden_detail_carries_permission() {
        let err = AppError::Forbidden {
            permission: "void-bills".to_string(),
        };
        let detail = err.detail();
        assert_eq!(detail.code, "FORBIDDEN");
        assert_eq!(detail.field.as_deref(), Some("void-bills"));
        assert!(err.is_denial());
    }

    #[test]
    fn test_capture_keeps_infrastructure_errors() {
        let business: AppResult<()> = Err(AppError::ProviderInactive);
        let captured = OperationResult::capture(business, "ok").unwrap();
        assert!(!captured.success);
        assert_eq!(captured.error.unwrap().code, "PROVIDER_INACTIVE");

        let infra: AppResult<()> = Err(AppError::Configuration("missing".to_string()));
        assert!(OperationResult::capture(infra, "ok").is_err());
    }
}
