//! Validation utilities for the hospital management core
//!
//! Billing validators run before any state is touched and report a
//! [`BillingRuleViolation`] naming the offending field.

use rust_decimal::Decimal;

use crate::billing::BillingRuleViolation;
use crate::models::DiscountType;

// ============================================================================
// Billing Validations
// ============================================================================

/// Validate a bill-level discount request
pub fn validate_discount(
    discount_type: DiscountType,
    value: Decimal,
) -> Result<(), BillingRuleViolation> {
    if value < Decimal::ZERO {
        return Err(BillingRuleViolation::invalid(
            "discount",
            "discount cannot be negative",
        ));
    }
    if discount_type == DiscountType::Percentage && value > Decimal::ONE_HUNDRED {
        return Err(BillingRuleViolation::invalid(
            "discount",
            "percentage discount cannot exceed 100",
        ));
    }
    Ok(())
}

/// Parse a discount type name coming from the outside
pub fn parse_discount_type(raw: &str) -> Result<DiscountType, BillingRuleViolation> {
    raw.trim()
        .to_lowercase()
        .parse()
        .map_err(|message: String| BillingRuleViolation::invalid("discount_type", message))
}

/// Tax rates are percentages and cannot be negative
pub fn validate_tax_rate(rate: Decimal) -> Result<(), BillingRuleViolation> {
    if rate < Decimal::ZERO {
        return Err(BillingRuleViolation::invalid(
            "tax_rate",
            "tax rate cannot be negative",
        ));
    }
    Ok(())
}

/// Validate a percentage is between 0 and 100
pub fn validate_percentage(field: &'static str, value: Decimal) -> Result<(), BillingRuleViolation> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(BillingRuleViolation::invalid(
            field,
            "must be between 0 and 100",
        ));
    }
    Ok(())
}

/// Validate the amounts of a new bill line
pub fn validate_item_amounts(
    unit_price: Decimal,
    quantity: Decimal,
    discount_amount: Decimal,
    discount_percentage: Decimal,
) -> Result<(), BillingRuleViolation> {
    if unit_price < Decimal::ZERO {
        return Err(BillingRuleViolation::invalid(
            "unit_price",
            "unit price cannot be negative",
        ));
    }
    if quantity <= Decimal::ZERO {
        return Err(BillingRuleViolation::invalid(
            "quantity",
            "quantity must be greater than zero",
        ));
    }
    if discount_amount < Decimal::ZERO {
        return Err(BillingRuleViolation::invalid(
            "discount_amount",
            "discount amount cannot be negative",
        ));
    }
    validate_percentage("discount_percentage", discount_percentage)?;

    let gross = unit_price * quantity;
    let discount = discount_amount + gross * discount_percentage / Decimal::ONE_HUNDRED;
    if discount > gross {
        return Err(BillingRuleViolation::invalid(
            "discount_amount",
            "line discount cannot exceed the line amount",
        ));
    }
    Ok(())
}

/// Payments must move money
pub fn validate_payment_amount(amount: Decimal) -> Result<(), BillingRuleViolation> {
    if amount <= Decimal::ZERO {
        return Err(BillingRuleViolation::invalid(
            "amount",
            "payment amount must be greater than zero",
        ));
    }
    Ok(())
}

// ============================================================================
// Access Control Validations
// ============================================================================

/// Validate permission name format: lowercase kebab-case, e.g. `edit-patients`
pub fn validate_permission_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Permission name cannot be empty");
    }
    if name.len() > 100 {
        return Err("Permission name must be at most 100 characters");
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err("Permission name must not start, end or repeat '-'");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err("Permission name must be lowercase alphanumeric with '-' separators");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    // ========================================================================
    // Billing Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_discount() {
        assert!(validate_discount(DiscountType::Fixed, dec("150")).is_ok());
        assert!(validate_discount(DiscountType::Percentage, dec("100")).is_ok());
        assert!(validate_discount(DiscountType::Percentage, dec("100.01")).is_err());
        assert!(validate_discount(DiscountType::Fixed, dec("-0.01")).is_err());
    }

    #[test]
    fn test_parse_discount_type() {
        assert_eq!(parse_discount_type("fixed"), Ok(DiscountType::Fixed));
        assert_eq!(parse_discount_type(" Percentage "), Ok(DiscountType::Percentage));
        assert!(matches!(
            parse_discount_type("coupon"),
            Err(BillingRuleViolation::InvalidArgument {
                field: "discount_type",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_tax_rate() {
        assert!(validate_tax_rate(Decimal::ZERO).is_ok());
        assert!(validate_tax_rate(dec("7.5")).is_ok());
        assert!(validate_tax_rate(dec("-1")).is_err());
    }

    #[test]
    fn test_validate_item_amounts() {
        assert!(validate_item_amounts(dec("50"), dec("2"), dec("0"), dec("0")).is_ok());
        assert!(validate_item_amounts(dec("-1"), dec("2"), dec("0"), dec("0")).is_err());
        assert!(validate_item_amounts(dec("50"), dec("0"), dec("0"), dec("0")).is_err());
        assert!(validate_item_amounts(dec("50"), dec("1"), dec("0"), dec("120")).is_err());
        assert!(validate_item_amounts(dec("50"), dec("1"), dec("60"), dec("0")).is_err());
    }

    #[test]
    fn test_validate_payment_amount() {
        assert!(validate_payment_amount(dec("0.01")).is_ok());
        assert!(validate_payment_amount(Decimal::ZERO).is_err());
    }

    // ========================================================================
    // Access Control Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_permission_name_valid() {
        assert!(validate_permission_name("edit-patients").is_ok());
        assert!(validate_permission_name("view-lab-results").is_ok());
        assert!(validate_permission_name("billing.void").is_ok());
    }

    #[test]
    fn test_validate_permission_name_invalid() {
        assert!(validate_permission_name("").is_err());
        assert!(validate_permission_name("Edit-Patients").is_err());
        assert!(validate_permission_name("edit patients").is_err());
        assert!(validate_permission_name("-edit").is_err());
        assert!(validate_permission_name("edit--patients").is_err());
    }
}
