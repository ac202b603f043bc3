//! Billing calculation engine
//!
//! Every mutating operation follows the same cycle: load the bill snapshot,
//! validate and compute with the pure functions in [`shared::billing`], then
//! commit against the version that was loaded. A version conflict reloads and
//! recomputes; validation failures never reach the store.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::billing::{
    apply_settlement, apply_totals, calculate_insurance_coverage, calculate_totals, line_total,
    resolve_bill_discount, settle_balance,
};
use shared::models::{
    Bill, BillItem, BillSnapshot, BillTotals, CoverageBreakdown, DiscountType,
    InsuranceProvider, PatientInsurance, Payment, PaymentRecordStatus, PaymentStatus,
};
use shared::validation::{
    parse_discount_type, validate_discount, validate_item_amounts, validate_payment_amount,
    validate_tax_rate,
};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::audit::{AuditAction, AuditEvent, AuditLogger, AuditTarget};
use crate::config::BillingConfig;
use crate::error::{AppError, AppResult};
use crate::repository::{BillCommit, BillingRepository, CommitOutcome};

/// Billing service
#[derive(Clone)]
pub struct BillingService {
    repo: Arc<dyn BillingRepository>,
    audit: Arc<dyn AuditLogger>,
    default_tax_rate: Decimal,
    max_commit_retries: u32,
}

/// Input for adding a line to a bill
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewBillItem {
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
}

/// Input for recording a payment
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPayment {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 50))]
    pub method: String,
    #[validate(length(max = 100))]
    pub reference: Option<String>,
    #[serde(default = "completed")]
    pub status: PaymentRecordStatus,
}

fn completed() -> PaymentRecordStatus {
    PaymentRecordStatus::Completed
}

/// Outcome of applying a bill-level discount
#[derive(Debug, Clone, Serialize)]
pub struct DiscountResult {
    pub bill_id: Uuid,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    /// Bill-level discount resolved against the subtotal
    pub discount_amount: Decimal,
    pub total_discount: Decimal,
    pub totals: BillTotals,
}

/// Outcome of a tax calculation
#[derive(Debug, Clone, Serialize)]
pub struct TaxResult {
    pub bill_id: Uuid,
    pub tax_rate: Decimal,
    pub taxable_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

/// Outcome of a balance refresh
#[derive(Debug, Clone, Serialize)]
pub struct BalanceResult {
    pub bill_id: Uuid,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub payment_status: PaymentStatus,
}

/// Outcome of an insurance coverage calculation
#[derive(Debug, Clone, Serialize)]
pub struct CoverageResult {
    pub bill_id: Uuid,
    pub insurance_id: Uuid,
    pub coverage: CoverageBreakdown,
}

/// What one planned operation writes, before versioning
struct BillChange {
    bill: Bill,
    new_item: Option<BillItem>,
    new_payment: Option<Payment>,
}

impl BillChange {
    fn header(bill: Bill) -> Self {
        Self {
            bill,
            new_item: None,
            new_payment: None,
        }
    }
}

impl BillingService {
    pub fn new(
        repo: Arc<dyn BillingRepository>,
        audit: Arc<dyn AuditLogger>,
        config: &BillingConfig,
    ) -> Self {
        Self {
            repo,
            audit,
            default_tax_rate: config.default_tax_rate,
            max_commit_retries: config.max_commit_retries,
        }
    }

    /// Bill with its items and payments
    pub async fn get_bill(&self, bill_id: Uuid) -> AppResult<BillSnapshot> {
        self.repo
            .load_bill(bill_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Bill".to_string()))
    }

    /// Open an empty draft bill for a patient
    #[instrument(skip(self))]
    pub async fn create_bill(
        &self,
        actor_id: Uuid,
        patient_id: Uuid,
        bill_number: &str,
    ) -> AppResult<Bill> {
        let result = async {
            let bill_number = bill_number.trim();
            if bill_number.is_empty() || bill_number.len() > 50 {
                return Err(AppError::validation(
                    "bill_number",
                    "Bill number must be 1 to 50 characters",
                ));
            }

            let bill = Bill::draft(patient_id, bill_number);
            self.repo.insert_bill(&bill).await?;

            tracing::info!(bill_id = %bill.id, patient_id = %patient_id, "Bill created");
            Ok(bill)
        }
        .await;

        let target = result
            .as_ref()
            .map(|bill| AuditTarget::Bill(bill.id))
            .unwrap_or(AuditTarget::System);
        self.audited(
            actor_id,
            AuditAction::BillCreated,
            target,
            json!({ "patient_id": patient_id, "bill_number": bill_number }),
            result,
        )
        .await
    }

    /// Recompute and persist every derived amount of the bill
    #[instrument(skip(self))]
    pub async fn calculate_totals(&self, actor_id: Uuid, bill_id: Uuid) -> AppResult<BillTotals> {
        let default_tax_rate = self.default_tax_rate;
        let result = self
            .commit_with_retry(bill_id, |snapshot| {
                let totals = calculate_totals(snapshot, default_tax_rate);
                let mut bill = snapshot.bill.clone();
                apply_totals(&mut bill, &totals);
                Ok((BillChange::header(bill), totals))
            })
            .await;

        self.audited(
            actor_id,
            AuditAction::BillTotalsCalculated,
            AuditTarget::Bill(bill_id),
            json!({}),
            result,
        )
        .await
    }

    /// Store a bill-level discount and recompute totals
    #[instrument(skip(self))]
    pub async fn apply_discount(
        &self,
        actor_id: Uuid,
        bill_id: Uuid,
        amount: Decimal,
        discount_type: &str,
    ) -> AppResult<DiscountResult> {
        let result = self.apply_discount_inner(bill_id, amount, discount_type).await;
        self.audited(
            actor_id,
            AuditAction::DiscountApplied,
            AuditTarget::Bill(bill_id),
            json!({ "amount": amount, "discount_type": discount_type }),
            result,
        )
        .await
    }

    /// Store the bill's tax rate and recompute totals
    #[instrument(skip(self))]
    pub async fn calculate_tax(
        &self,
        actor_id: Uuid,
        bill_id: Uuid,
        tax_rate: Decimal,
    ) -> AppResult<TaxResult> {
        let result = self.calculate_tax_inner(bill_id, tax_rate).await;
        self.audited(
            actor_id,
            AuditAction::TaxCalculated,
            AuditTarget::Bill(bill_id),
            json!({ "tax_rate": tax_rate }),
            result,
        )
        .await
    }

    /// Refresh paid amount, balance and status from the payments on file
    #[instrument(skip(self))]
    pub async fn update_balance_due(&self, actor_id: Uuid, bill_id: Uuid) -> AppResult<BalanceResult> {
        let result = self
            .commit_with_retry(bill_id, |snapshot| {
                let settlement = settle_balance(snapshot.bill.total_amount, &snapshot.payments);
                let mut bill = snapshot.bill.clone();
                apply_settlement(&mut bill, &settlement);

                let balance = BalanceResult {
                    bill_id,
                    amount_paid: bill.amount_paid,
                    balance_due: bill.balance_due,
                    payment_status: bill.payment_status,
                };
                Ok((BillChange::header(bill), balance))
            })
            .await;

        self.audited(
            actor_id,
            AuditAction::BalanceUpdated,
            AuditTarget::Bill(bill_id),
            json!({}),
            result,
        )
        .await
    }

    /// Split the bill between the patient's insurer and the patient
    #[instrument(skip(self))]
    pub async fn calculate_insurance_coverage(
        &self,
        actor_id: Uuid,
        bill_id: Uuid,
        insurance_id: Uuid,
    ) -> AppResult<CoverageResult> {
        let today = Utc::now().date_naive();
        let result = self.coverage_inner(bill_id, insurance_id, today).await;
        self.audited(
            actor_id,
            AuditAction::InsuranceCoverageCalculated,
            AuditTarget::Bill(bill_id),
            json!({ "insurance_id": insurance_id, "as_of": today }),
            result,
        )
        .await
    }

    /// Add a line and recompute totals
    #[instrument(skip(self, item), fields(description = %item.description))]
    pub async fn add_item(
        &self,
        actor_id: Uuid,
        bill_id: Uuid,
        item: NewBillItem,
    ) -> AppResult<BillItem> {
        let detail = json!({
            "description": item.description,
            "unit_price": item.unit_price,
            "quantity": item.quantity,
        });
        let result = self.add_item_inner(bill_id, item).await;
        self.audited(
            actor_id,
            AuditAction::BillItemAdded,
            AuditTarget::Bill(bill_id),
            detail,
            result,
        )
        .await
    }

    /// Record a payment and recompute totals
    #[instrument(skip(self, payment), fields(amount = %payment.amount))]
    pub async fn record_payment(
        &self,
        actor_id: Uuid,
        bill_id: Uuid,
        payment: NewPayment,
    ) -> AppResult<Payment> {
        let detail = json!({
            "amount": payment.amount,
            "method": payment.method,
            "status": payment.status.as_str(),
        });
        let result = self.record_payment_inner(bill_id, payment).await;
        self.audited(
            actor_id,
            AuditAction::PaymentRecorded,
            AuditTarget::Bill(bill_id),
            detail,
            result,
        )
        .await
    }

    /// Void a bill that has not collected any money
    #[instrument(skip(self))]
    pub async fn void_bill(&self, actor_id: Uuid, bill_id: Uuid) -> AppResult<Bill> {
        let result = self
            .commit_with_retry(bill_id, |snapshot| {
                ensure_open(&snapshot.bill)?;
                if snapshot.payments.iter().any(Payment::is_completed) {
                    return Err(AppError::InvalidStateTransition(
                        "bill has completed payments and cannot be voided".to_string(),
                    ));
                }

                let mut bill = snapshot.bill.clone();
                bill.payment_status = PaymentStatus::Voided;
                Ok((BillChange::header(bill.clone()), bill))
            })
            .await;

        self.audited(
            actor_id,
            AuditAction::BillVoided,
            AuditTarget::Bill(bill_id),
            json!({}),
            result,
        )
        .await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn apply_discount_inner(
        &self,
        bill_id: Uuid,
        amount: Decimal,
        discount_type: &str,
    ) -> AppResult<DiscountResult> {
        let discount_type = parse_discount_type(discount_type)?;
        validate_discount(discount_type, amount)?;

        let default_tax_rate = self.default_tax_rate;
        self.commit_with_retry(bill_id, |snapshot| {
            ensure_open(&snapshot.bill)?;
            let discount_amount = resolve_bill_discount(discount_type, amount, &snapshot.items)?;

            let mut updated = snapshot.clone();
            updated.bill.discount_type = Some(discount_type);
            updated.bill.discount_value = amount;
            let totals = calculate_totals(&updated, default_tax_rate);
            apply_totals(&mut updated.bill, &totals);

            let discount = DiscountResult {
                bill_id,
                discount_type,
                discount_value: amount,
                discount_amount,
                total_discount: totals.total_discount,
                totals,
            };
            Ok((BillChange::header(updated.bill), discount))
        })
        .await
    }

    async fn calculate_tax_inner(&self, bill_id: Uuid, tax_rate: Decimal) -> AppResult<TaxResult> {
        validate_tax_rate(tax_rate)?;

        let default_tax_rate = self.default_tax_rate;
        self.commit_with_retry(bill_id, |snapshot| {
            ensure_open(&snapshot.bill)?;

            let mut updated = snapshot.clone();
            updated.bill.tax_rate = Some(tax_rate);
            let totals = calculate_totals(&updated, default_tax_rate);
            apply_totals(&mut updated.bill, &totals);

            let tax = TaxResult {
                bill_id,
                tax_rate,
                taxable_amount: totals.taxable_amount,
                tax_amount: totals.total_tax,
                total_amount: totals.total_amount,
            };
            Ok((BillChange::header(updated.bill), tax))
        })
        .await
    }

    async fn coverage_inner(
        &self,
        bill_id: Uuid,
        insurance_id: Uuid,
        today: NaiveDate,
    ) -> AppResult<CoverageResult> {
        let (insurance, provider): (PatientInsurance, InsuranceProvider) = self
            .repo
            .load_insurance(insurance_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Insurance".to_string()))?;

        let default_tax_rate = self.default_tax_rate;
        self.commit_with_retry(bill_id, |snapshot| {
            ensure_open(&snapshot.bill)?;
            if insurance.patient_id != snapshot.bill.patient_id {
                return Err(AppError::invalid_argument(
                    "insurance_id",
                    "insurance policy does not belong to the bill's patient",
                ));
            }

            let totals = calculate_totals(snapshot, default_tax_rate);
            let coverage =
                calculate_insurance_coverage(totals.total_amount, &insurance, &provider, today)?;

            let mut bill = snapshot.bill.clone();
            apply_totals(&mut bill, &totals);
            bill.primary_insurance_id = Some(insurance.id);
            bill.insurance_claim_amount = coverage.insurance_coverage;
            bill.patient_responsibility = coverage.patient_responsibility;

            let result = CoverageResult {
                bill_id,
                insurance_id,
                coverage,
            };
            Ok((BillChange::header(bill), result))
        })
        .await
    }

    async fn add_item_inner(&self, bill_id: Uuid, input: NewBillItem) -> AppResult<BillItem> {
        input.validate()?;
        validate_item_amounts(
            input.unit_price,
            input.quantity,
            input.discount_amount,
            input.discount_percentage,
        )?;

        let item = BillItem {
            id: Uuid::new_v4(),
            bill_id,
            description: input.description.trim().to_string(),
            unit_price: input.unit_price,
            quantity: input.quantity,
            discount_amount: input.discount_amount,
            discount_percentage: input.discount_percentage,
            total_price: line_total(input.unit_price, input.quantity),
        };

        let default_tax_rate = self.default_tax_rate;
        self.commit_with_retry(bill_id, |snapshot| {
            ensure_open(&snapshot.bill)?;

            let mut updated = snapshot.clone();
            updated.items.push(item.clone());
            let totals = calculate_totals(&updated, default_tax_rate);
            apply_totals(&mut updated.bill, &totals);

            let change = BillChange {
                bill: updated.bill,
                new_item: Some(item.clone()),
                new_payment: None,
            };
            Ok((change, item.clone()))
        })
        .await
    }

    async fn record_payment_inner(&self, bill_id: Uuid, input: NewPayment) -> AppResult<Payment> {
        input.validate()?;
        validate_payment_amount(input.amount)?;

        let payment = Payment {
            id: Uuid::new_v4(),
            bill_id,
            amount: input.amount,
            method: input.method,
            reference: input.reference,
            status: input.status,
            paid_at: Utc::now(),
        };

        let default_tax_rate = self.default_tax_rate;
        self.commit_with_retry(bill_id, |snapshot| {
            ensure_open(&snapshot.bill)?;

            let mut updated = snapshot.clone();
            updated.payments.push(payment.clone());
            let totals = calculate_totals(&updated, default_tax_rate);
            apply_totals(&mut updated.bill, &totals);

            let change = BillChange {
                bill: updated.bill,
                new_item: None,
                new_payment: Some(payment.clone()),
            };
            Ok((change, payment.clone()))
        })
        .await
    }

    /// Load, plan and commit against the loaded version, reloading on conflict
    async fn commit_with_retry<T, F>(&self, bill_id: Uuid, mut plan: F) -> AppResult<T>
    where
        F: FnMut(&BillSnapshot) -> AppResult<(BillChange, T)> + Send,
        T: Send,
    {
        let attempts = self.max_commit_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let snapshot = self.get_bill(bill_id).await?;
            let expected_version = snapshot.bill.version;
            let (change, output) = plan(&snapshot)?;

            let mut bill = change.bill;
            bill.version = expected_version + 1;
            bill.updated_at = Utc::now();

            let commit = BillCommit {
                bill,
                expected_version,
                new_item: change.new_item,
                new_payment: change.new_payment,
            };

            match self.repo.commit(&commit).await? {
                CommitOutcome::Committed => {
                    tracing::debug!(bill_id = %bill_id, version = commit.bill.version, "Bill committed");
                    return Ok(output);
                }
                CommitOutcome::Conflict => {
                    tracing::warn!(
                        bill_id = %bill_id,
                        attempt,
                        attempts,
                        "Bill changed concurrently, retrying"
                    );
                }
            }
        }

        tracing::error!(bill_id = %bill_id, attempts, "Giving up on contended bill");
        Err(AppError::ConcurrentModification { bill_id })
    }

    async fn audited<T>(
        &self,
        actor_id: Uuid,
        action: AuditAction,
        target: AuditTarget,
        detail: serde_json::Value,
        result: AppResult<T>,
    ) -> AppResult<T> {
        if let Err(e) = &result {
            if !e.is_business_rule() {
                tracing::error!(action = action.as_str(), error = %e, "Billing operation failed");
            }
        }
        self.audit
            .record(AuditEvent::from_result(actor_id, action, target, &result, detail))
            .await;
        result
    }
}

fn ensure_open(bill: &Bill) -> AppResult<()> {
    if bill.is_voided() {
        return Err(AppError::InvalidStateTransition(
            "bill is voided".to_string(),
        ));
    }
    Ok(())
}
