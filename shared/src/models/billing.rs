//! Bill, bill item and payment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Settlement state of a bill
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Draft,
    Pending,
    Partial,
    Paid,
    Voided,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Draft => "draft",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Voided => "voided",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PaymentStatus::Draft),
            "pending" => Ok(PaymentStatus::Pending),
            "partial" => Ok(PaymentStatus::Partial),
            "paid" => Ok(PaymentStatus::Paid),
            "voided" => Ok(PaymentStatus::Voided),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// Status of a single payment record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRecordStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordStatus::Pending => "pending",
            PaymentRecordStatus::Completed => "completed",
            PaymentRecordStatus::Failed => "failed",
            PaymentRecordStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentRecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentRecordStatus::Pending),
            "completed" => Ok(PaymentRecordStatus::Completed),
            "failed" => Ok(PaymentRecordStatus::Failed),
            "refunded" => Ok(PaymentRecordStatus::Refunded),
            other => Err(format!("unknown payment record status: {}", other)),
        }
    }
}

/// How a bill-level discount value is interpreted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Fixed,
    Percentage,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Fixed => "fixed",
            DiscountType::Percentage => "percentage",
        }
    }
}

impl FromStr for DiscountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(DiscountType::Fixed),
            "percentage" => Ok(DiscountType::Percentage),
            other => Err(format!("discount type must be 'fixed' or 'percentage', got '{}'", other)),
        }
    }
}

/// Bill header. Totals are derived; see `billing::calculate_totals`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bill {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub bill_number: String,
    pub sub_total: Decimal,
    pub discount_type: Option<DiscountType>,
    pub discount_value: Decimal,
    pub total_discount: Decimal,
    /// Overrides the configured default rate when set
    pub tax_rate: Option<Decimal>,
    pub total_tax: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub payment_status: PaymentStatus,
    pub primary_insurance_id: Option<Uuid>,
    pub insurance_claim_amount: Decimal,
    pub patient_responsibility: Decimal,
    /// Optimistic concurrency counter, bumped on every commit
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bill {
    /// A fresh draft bill with every amount at zero
    pub fn draft(patient_id: Uuid, bill_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            patient_id,
            bill_number: bill_number.into(),
            sub_total: Decimal::ZERO,
            discount_type: None,
            discount_value: Decimal::ZERO,
            total_discount: Decimal::ZERO,
            tax_rate: None,
            total_tax: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
            balance_due: Decimal::ZERO,
            payment_status: PaymentStatus::Draft,
            primary_insurance_id: None,
            insurance_claim_amount: Decimal::ZERO,
            patient_responsibility: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_voided(&self) -> bool {
        self.payment_status == PaymentStatus::Voided
    }
}

/// A billed line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillItem {
    pub id: Uuid,
    pub bill_id: Uuid,
    pub description: String,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub discount_amount: Decimal,
    pub discount_percentage: Decimal,
    /// Gross line amount, `unit_price × quantity`
    pub total_price: Decimal,
}

/// Money received against a bill
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub bill_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub reference: Option<String>,
    pub status: PaymentRecordStatus,
    pub paid_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_completed(&self) -> bool {
        self.status == PaymentRecordStatus::Completed
    }
}

/// A bill loaded together with its items and payments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillSnapshot {
    pub bill: Bill,
    pub items: Vec<BillItem>,
    pub payments: Vec<Payment>,
}

/// Output of a full recalculation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillTotals {
    pub sub_total: Decimal,
    pub item_discount: Decimal,
    pub bill_discount: Decimal,
    pub total_discount: Decimal,
    pub taxable_amount: Decimal,
    pub tax_rate: Decimal,
    pub total_tax: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub payment_status: PaymentStatus,
}

/// Paid amount, balance and status derived from a total and its payments
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceSettlement {
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub payment_status: PaymentStatus,
}
