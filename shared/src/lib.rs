//! Shared types and pure algorithms for the hospital management core
//!
//! This crate holds the domain models and every computation that needs no
//! I/O: permission resolution, dependency checks, escalation checks and bill
//! arithmetic. It is used by the backend services and by the WASM bill
//! preview calculator.

pub mod billing;
pub mod escalation;
pub mod models;
pub mod permissions;
pub mod types;
pub mod validation;

pub use billing::*;
pub use escalation::*;
pub use models::*;
pub use permissions::*;
pub use types::*;
pub use validation::*;
