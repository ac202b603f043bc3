//! Hospital management core: authorization and billing engines
//!
//! The crate is a library first. `hms-worker` is a thin binary that runs the
//! periodic maintenance jobs against PostgreSQL.

pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod policy;
pub mod repository;
pub mod services;

pub use audit::{AuditAction, AuditEvent, AuditLogger, AuditOutcome, AuditTarget};
pub use cache::{CachedAccess, MokaPermissionCache, PermissionCache};
pub use config::Config;
pub use error::{AppError, AppResult, OperationResult};
pub use policy::SecurityPolicy;
pub use services::{AuthorizationService, BillingService, EscalationGuard};
