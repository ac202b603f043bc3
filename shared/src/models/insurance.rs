//! Patient insurance models

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An insurer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceProvider {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
}

/// A patient's policy with a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientInsurance {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub policy_number: String,
    pub deductible_amount: Decimal,
    pub deductible_met: Decimal,
    /// Flat co-pay; takes precedence over the percentage when positive
    pub co_pay_amount: Option<Decimal>,
    pub co_pay_percentage: Option<Decimal>,
    /// `None` means the policy has no annual cap
    pub annual_max_coverage: Option<Decimal>,
    pub annual_used_amount: Decimal,
    pub is_active: bool,
    pub coverage_end_date: Option<NaiveDate>,
}

impl PatientInsurance {
    /// Deductible still owed by the patient this year, never negative
    pub fn deductible_remaining(&self) -> Decimal {
        (self.deductible_amount - self.deductible_met).max(Decimal::ZERO)
    }

    /// Coverage left before the annual cap, `None` when uncapped
    pub fn annual_remaining(&self) -> Option<Decimal> {
        self.annual_max_coverage
            .map(|max| (max - self.annual_used_amount).max(Decimal::ZERO))
    }
}

/// How a bill total splits between insurer and patient
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoverageBreakdown {
    pub total_amount: Decimal,
    pub deductible_applied: Decimal,
    pub amount_after_deductible: Decimal,
    pub co_pay: Decimal,
    pub insurance_coverage: Decimal,
    pub patient_responsibility: Decimal,
    pub annual_remaining: Option<Decimal>,
    /// True when the annual cap reduced the coverage
    pub capped_by_annual_max: bool,
}
