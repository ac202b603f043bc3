//! Authorization and billing engines

pub mod authorization;
pub mod billing;
pub mod escalation;

pub use authorization::AuthorizationService;
pub use billing::{
    BalanceResult, BillingService, CoverageResult, DiscountResult, NewBillItem, NewPayment,
    TaxResult,
};
pub use escalation::EscalationGuard;
