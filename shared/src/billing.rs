//! Bill arithmetic: totals, discounts, tax, balance and insurance split
//!
//! All functions here are pure. The backend loads a [`BillSnapshot`], runs
//! these functions, and commits the result in a single transaction.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{
    BalanceSettlement, Bill, BillItem, BillSnapshot, BillTotals, CoverageBreakdown, DiscountType,
    InsuranceProvider, PatientInsurance, Payment, PaymentStatus,
};
use crate::types::{percent_of, round_currency};
use crate::validation::{validate_discount, validate_tax_rate};

/// A billing business rule that rejected an operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingRuleViolation {
    #[error("invalid {field}: {message}")]
    InvalidArgument { field: &'static str, message: String },

    #[error("discount of {discount} exceeds the subtotal of {sub_total}")]
    ExceedsSubtotal { discount: Decimal, sub_total: Decimal },

    #[error("insurance policy is not active")]
    InsuranceInactive,

    #[error("insurance coverage ended on {ended_on}")]
    InsuranceExpired { ended_on: NaiveDate },

    #[error("insurance provider is not active")]
    ProviderInactive,
}

impl BillingRuleViolation {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        BillingRuleViolation::InvalidArgument {
            field,
            message: message.into(),
        }
    }
}

// ============================================================================
// Line and bill amounts
// ============================================================================

/// Gross amount of a line, `unit_price × quantity`
pub fn line_total(unit_price: Decimal, quantity: Decimal) -> Decimal {
    round_currency(unit_price * quantity)
}

/// Flat plus percentage discount of a single line
pub fn item_discount(item: &BillItem) -> Decimal {
    let gross = item.unit_price * item.quantity;
    round_currency(item.discount_amount + gross * item.discount_percentage / Decimal::ONE_HUNDRED)
}

/// Sum of line totals
pub fn sub_total(items: &[BillItem]) -> Decimal {
    round_currency(items.iter().map(|item| item.total_price).sum())
}

/// Sum of per-line discounts
pub fn item_discounts(items: &[BillItem]) -> Decimal {
    items.iter().map(item_discount).sum()
}

/// Resolve a bill-level discount request into an amount.
///
/// Fixed discounts are taken as-is; percentage discounts apply to `sub_total`.
/// The resolved amount may not exceed `sub_total`.
pub fn resolve_discount(
    discount_type: DiscountType,
    value: Decimal,
    sub_total: Decimal,
) -> Result<Decimal, BillingRuleViolation> {
    validate_discount(discount_type, value)?;

    let amount = match discount_type {
        DiscountType::Fixed => round_currency(value),
        DiscountType::Percentage => percent_of(sub_total, value),
    };

    if amount > sub_total {
        return Err(BillingRuleViolation::ExceedsSubtotal {
            discount: amount,
            sub_total,
        });
    }

    Ok(amount)
}

/// Resolve a bill-level discount against the bill's own items.
///
/// Line discounts and the bill discount together may not exceed the subtotal.
pub fn resolve_bill_discount(
    discount_type: DiscountType,
    value: Decimal,
    items: &[BillItem],
) -> Result<Decimal, BillingRuleViolation> {
    let sub_total = sub_total(items);
    let amount = resolve_discount(discount_type, value, sub_total)?;

    let combined = item_discounts(items) + amount;
    if combined > sub_total {
        return Err(BillingRuleViolation::ExceedsSubtotal {
            discount: combined,
            sub_total,
        });
    }

    Ok(amount)
}

/// Tax on `taxable_amount` at `rate` percent
pub fn tax_amount(taxable_amount: Decimal, rate: Decimal) -> Result<Decimal, BillingRuleViolation> {
    validate_tax_rate(rate)?;
    Ok(percent_of(taxable_amount, rate))
}

// ============================================================================
// Balance
// ============================================================================

/// Sum of completed payments
pub fn completed_payments_total(payments: &[Payment]) -> Decimal {
    round_currency(
        payments
            .iter()
            .filter(|p| p.is_completed())
            .map(|p| p.amount)
            .sum(),
    )
}

/// Paid when nothing is owed, partial once something was paid, else pending
pub fn derive_payment_status(amount_paid: Decimal, balance_due: Decimal) -> PaymentStatus {
    if balance_due <= Decimal::ZERO {
        PaymentStatus::Paid
    } else if amount_paid > Decimal::ZERO {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Pending
    }
}

/// The one place where paid amount, balance and status are derived.
///
/// Used both by a full recalculation and by a balance-only refresh.
pub fn settle_balance(total_amount: Decimal, payments: &[Payment]) -> BalanceSettlement {
    let amount_paid = completed_payments_total(payments);
    let balance_due = (total_amount - amount_paid).max(Decimal::ZERO);

    BalanceSettlement {
        amount_paid,
        balance_due,
        payment_status: derive_payment_status(amount_paid, balance_due),
    }
}

// ============================================================================
// Full recalculation
// ============================================================================

/// Recompute every derived amount of a bill from its items and payments.
///
/// `default_tax_rate` applies unless the bill carries its own rate.
pub fn calculate_totals(snapshot: &BillSnapshot, default_tax_rate: Decimal) -> BillTotals {
    let bill = &snapshot.bill;
    let sub_total = sub_total(&snapshot.items);
    let item_discount = item_discounts(&snapshot.items);

    let bill_discount = match bill.discount_type {
        Some(DiscountType::Fixed) => round_currency(bill.discount_value),
        Some(DiscountType::Percentage) => percent_of(sub_total, bill.discount_value),
        None => Decimal::ZERO,
    };

    // A stored discount can outlive the items it was validated against
    let total_discount = (item_discount + bill_discount).min(sub_total);
    let taxable_amount = sub_total - total_discount;

    let tax_rate = bill.tax_rate.unwrap_or(default_tax_rate);
    let total_tax = percent_of(taxable_amount, tax_rate);
    let total_amount = round_currency(taxable_amount + total_tax);

    let settlement = settle_balance(total_amount, &snapshot.payments);
    let payment_status = if bill.is_voided() {
        PaymentStatus::Voided
    } else {
        settlement.payment_status
    };

    BillTotals {
        sub_total,
        item_discount,
        bill_discount,
        total_discount,
        taxable_amount,
        tax_rate,
        total_tax,
        total_amount,
        amount_paid: settlement.amount_paid,
        balance_due: settlement.balance_due,
        payment_status,
    }
}

/// Copy recalculated totals onto the bill header
pub fn apply_totals(bill: &mut Bill, totals: &BillTotals) {
    bill.sub_total = totals.sub_total;
    bill.total_discount = totals.total_discount;
    bill.total_tax = totals.total_tax;
    bill.total_amount = totals.total_amount;
    apply_settlement(
        bill,
        &BalanceSettlement {
            amount_paid: totals.amount_paid,
            balance_due: totals.balance_due,
            payment_status: totals.payment_status,
        },
    );
}

/// Copy a balance settlement onto the bill header, leaving voided bills voided
pub fn apply_settlement(bill: &mut Bill, settlement: &BalanceSettlement) {
    bill.amount_paid = settlement.amount_paid;
    bill.balance_due = settlement.balance_due;
    if !bill.is_voided() {
        bill.payment_status = settlement.payment_status;
    }
}

// ============================================================================
// Insurance
// ============================================================================

/// Check that a policy can be billed on `today`
pub fn check_insurance_eligibility(
    insurance: &PatientInsurance,
    provider: &InsuranceProvider,
    today: NaiveDate,
) -> Result<(), BillingRuleViolation> {
    if !insurance.is_active {
        return Err(BillingRuleViolation::InsuranceInactive);
    }
    if let Some(ended_on) = insurance.coverage_end_date {
        if today > ended_on {
            return Err(BillingRuleViolation::InsuranceExpired { ended_on });
        }
    }
    if !provider.is_active {
        return Err(BillingRuleViolation::ProviderInactive);
    }
    Ok(())
}

/// Split `total_amount` between insurer and patient.
///
/// Deductible first, then co-pay (flat when positive, else percentage), then
/// the annual cap. The insurer never pays more than what is left of the annual
/// maximum and the patient never owes a negative amount.
pub fn calculate_insurance_coverage(
    total_amount: Decimal,
    insurance: &PatientInsurance,
    provider: &InsuranceProvider,
    today: NaiveDate,
) -> Result<CoverageBreakdown, BillingRuleViolation> {
    check_insurance_eligibility(insurance, provider, today)?;

    let total_amount = round_currency(total_amount.max(Decimal::ZERO));
    let deductible_remaining = insurance.deductible_remaining();
    let amount_after_deductible = (total_amount - deductible_remaining).max(Decimal::ZERO);
    let deductible_applied = total_amount - amount_after_deductible;

    let co_pay = match insurance.co_pay_amount {
        Some(flat) if flat > Decimal::ZERO => round_currency(flat),
        _ => insurance
            .co_pay_percentage
            .map(|pct| percent_of(amount_after_deductible, pct))
            .unwrap_or(Decimal::ZERO),
    };

    let uncapped = (amount_after_deductible - co_pay).max(Decimal::ZERO);
    let annual_remaining = insurance.annual_remaining();
    let insurance_coverage = match annual_remaining {
        Some(remaining) => uncapped.min(remaining),
        None => uncapped,
    };
    let insurance_coverage = round_currency(insurance_coverage);

    Ok(CoverageBreakdown {
        total_amount,
        deductible_applied,
        amount_after_deductible,
        co_pay,
        insurance_coverage,
        patient_responsibility: total_amount - insurance_coverage,
        annual_remaining,
        capped_by_annual_max: insurance_coverage < uncapped,
    })
}
