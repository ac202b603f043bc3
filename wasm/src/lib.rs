//! WebAssembly module for the hospital billing desk
//!
//! Lets the front desk preview a bill before it is saved:
//! - Totals, discount and tax
//! - Discount validation against a subtotal
//! - Insurance coverage estimate
//!
//! Amounts cross the JS boundary as decimal strings so nothing is lost to
//! floating point. The backend recomputes everything on commit.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::billing::{
    calculate_insurance_coverage, calculate_totals, line_total, resolve_bill_discount,
    resolve_discount, BillingRuleViolation,
};
use shared::models::{
    Bill, BillItem, BillSnapshot, BillTotals, CoverageBreakdown, InsuranceProvider,
    PatientInsurance, Payment, PaymentRecordStatus, PaymentStatus,
};
use shared::validation::{
    parse_discount_type, validate_item_amounts, validate_payment_amount, validate_tax_rate,
};
use uuid::Uuid;
use wasm_bindgen::prelude::*;

/// A bill as typed into the desk form
#[derive(Debug, Deserialize)]
pub struct BillDraft {
    pub items: Vec<DraftItem>,
    #[serde(default)]
    pub discount_type: Option<String>,
    #[serde(default)]
    pub discount_value: Decimal,
    #[serde(default)]
    pub tax_rate: Option<Decimal>,
    /// Completed payment amounts
    #[serde(default)]
    pub payments: Vec<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct DraftItem {
    #[serde(default)]
    pub description: String,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
}

/// Policy terms needed for an estimate
#[derive(Debug, Deserialize)]
pub struct PolicyTerms {
    #[serde(default)]
    pub deductible_amount: Decimal,
    #[serde(default)]
    pub deductible_met: Decimal,
    #[serde(default)]
    pub co_pay_amount: Option<Decimal>,
    #[serde(default)]
    pub co_pay_percentage: Option<Decimal>,
    #[serde(default)]
    pub annual_max_coverage: Option<Decimal>,
    #[serde(default)]
    pub annual_used_amount: Decimal,
    #[serde(default = "active")]
    pub is_active: bool,
    #[serde(default)]
    pub coverage_end_date: Option<NaiveDate>,
    #[serde(default = "active")]
    pub provider_is_active: bool,
}

fn active() -> bool {
    true
}

/// Preview the totals of a draft bill. Returns `BillTotals` as JSON.
#[wasm_bindgen]
pub fn preview_bill_totals(draft_json: &str, default_tax_rate: &str) -> Result<String, JsValue> {
    let draft: BillDraft = serde_json::from_str(draft_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid bill JSON: {}", e)))?;
    let default_tax_rate = parse_amount("default_tax_rate", default_tax_rate).map_err(to_js)?;

    let totals = preview_totals(&draft, default_tax_rate).map_err(to_js)?;
    serde_json::to_string(&totals).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Resolve a bill-level discount against a subtotal. Returns the amount.
#[wasm_bindgen]
pub fn check_bill_discount(discount_type: &str, value: &str, sub_total: &str) -> Result<String, JsValue> {
    discount_amount(discount_type, value, sub_total)
        .map(|amount| amount.to_string())
        .map_err(to_js)
}

/// Estimate the insurer's share of a bill total. Returns `CoverageBreakdown` as JSON.
#[wasm_bindgen]
pub fn estimate_insurance_coverage(
    total_amount: &str,
    terms_json: &str,
    today: &str,
) -> Result<String, JsValue> {
    let terms: PolicyTerms = serde_json::from_str(terms_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid policy JSON: {}", e)))?;
    let total_amount = parse_amount("total_amount", total_amount).map_err(to_js)?;
    let today = NaiveDate::from_str(today)
        .map_err(|e| JsValue::from_str(&format!("Invalid date: {}", e)))?;

    let coverage = estimate_coverage(total_amount, &terms, today).map_err(to_js)?;
    serde_json::to_string(&coverage).map_err(|e| JsValue::from_str(&e.to_string()))
}

// ============================================================================
// Calculations
// ============================================================================

fn preview_totals(draft: &BillDraft, default_tax_rate: Decimal) -> Result<BillTotals, String> {
    validate_tax_rate(default_tax_rate).map_err(describe)?;
    if let Some(rate) = draft.tax_rate {
        validate_tax_rate(rate).map_err(describe)?;
    }

    // Nothing here is persisted, so nil ids and epoch timestamps are enough
    let bill_id = Uuid::nil();
    let mut items = Vec::with_capacity(draft.items.len());
    for item in &draft.items {
        validate_item_amounts(
            item.unit_price,
            item.quantity,
            item.discount_amount,
            item.discount_percentage,
        )
        .map_err(describe)?;

        items.push(BillItem {
            id: Uuid::nil(),
            bill_id,
            description: item.description.clone(),
            unit_price: item.unit_price,
            quantity: item.quantity,
            discount_amount: item.discount_amount,
            discount_percentage: item.discount_percentage,
            total_price: line_total(item.unit_price, item.quantity),
        });
    }

    let discount_type = match draft.discount_type.as_deref() {
        Some(raw) => {
            let discount_type = parse_discount_type(raw).map_err(describe)?;
            resolve_bill_discount(discount_type, draft.discount_value, &items).map_err(describe)?;
            Some(discount_type)
        }
        None => None,
    };

    let mut payments = Vec::with_capacity(draft.payments.len());
    for &amount in &draft.payments {
        validate_payment_amount(amount).map_err(describe)?;
        payments.push(Payment {
            id: Uuid::nil(),
            bill_id,
            amount,
            method: "preview".to_string(),
            reference: None,
            status: PaymentRecordStatus::Completed,
            paid_at: DateTime::<Utc>::default(),
        });
    }

    let snapshot = BillSnapshot {
        bill: Bill {
            id: bill_id,
            patient_id: Uuid::nil(),
            bill_number: String::new(),
            sub_total: Decimal::ZERO,
            discount_type,
            discount_value: draft.discount_value,
            total_discount: Decimal::ZERO,
            tax_rate: draft.tax_rate,
            total_tax: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
            balance_due: Decimal::ZERO,
            payment_status: PaymentStatus::Draft,
            primary_insurance_id: None,
            insurance_claim_amount: Decimal::ZERO,
            patient_responsibility: Decimal::ZERO,
            version: 0,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
        },
        items,
        payments,
    };

    Ok(calculate_totals(&snapshot, default_tax_rate))
}

fn discount_amount(discount_type: &str, value: &str, sub_total: &str) -> Result<Decimal, String> {
    let discount_type = parse_discount_type(discount_type).map_err(describe)?;
    let value = parse_amount("discount", value)?;
    let sub_total = parse_amount("sub_total", sub_total)?;
    resolve_discount(discount_type, value, sub_total).map_err(describe)
}

fn estimate_coverage(
    total_amount: Decimal,
    terms: &PolicyTerms,
    today: NaiveDate,
) -> Result<CoverageBreakdown, String> {
    let provider = InsuranceProvider {
        id: Uuid::nil(),
        name: String::new(),
        is_active: terms.provider_is_active,
    };
    let insurance = PatientInsurance {
        id: Uuid::nil(),
        patient_id: Uuid::nil(),
        provider_id: provider.id,
        policy_number: String::new(),
        deductible_amount: terms.deductible_amount,
        deductible_met: terms.deductible_met,
        co_pay_amount: terms.co_pay_amount,
        co_pay_percentage: terms.co_pay_percentage,
        annual_max_coverage: terms.annual_max_coverage,
        annual_used_amount: terms.annual_used_amount,
        is_active: terms.is_active,
        coverage_end_date: terms.coverage_end_date,
    };

    calculate_insurance_coverage(total_amount, &insurance, &provider, today).map_err(describe)
}

fn parse_amount(field: &str, raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw.trim()).map_err(|e| format!("invalid {}: {}", field, e))
}

fn describe(violation: BillingRuleViolation) -> String {
    violation.to_string()
}

fn to_js(message: String) -> JsValue {
    JsValue::from_str(&message)
}
