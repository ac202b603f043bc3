//! PostgreSQL repositories

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::models::{
    Bill, BillItem, BillSnapshot, InsuranceProvider, PatientInsurance, Payment, Permission,
    PermissionDependency, PrincipalGrants, Role, TemporaryPermission, User,
};
use shared::permissions::MAX_ROLE_DEPTH;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{BillCommit, BillingRepository, CommitOutcome, PermissionRepository};
use crate::error::{AppError, AppResult};

fn corrupt_column(column: &str, message: impl std::fmt::Display) -> AppError {
    AppError::InternalError(anyhow::anyhow!("invalid {} in database: {}", column, message))
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: Option<String>,
    role: Option<String>,
    role_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            name: row.name,
            email: row.email,
            role: row.role,
            role_id: row.role_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    slug: String,
    priority: i32,
    is_super_admin: bool,
    parent_role_id: Option<Uuid>,
    module_access: Json<Vec<String>>,
    data_visibility_scope: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RoleRow> for Role {
    type Error = AppError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        Ok(Role {
            id: row.id,
            name: row.name,
            slug: row.slug,
            priority: row.priority,
            is_super_admin: row.is_super_admin,
            parent_role_id: row.parent_role_id,
            module_access: row.module_access.0.into(),
            data_visibility_scope: row
                .data_visibility_scope
                .parse()
                .map_err(|e: String| corrupt_column("roles.data_visibility_scope", e))?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PermissionRow {
    id: Uuid,
    name: String,
    module: Option<String>,
    action: Option<String>,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission {
            id: row.id,
            name: row.name,
            module: row.module,
            action: row.action,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BillRow {
    id: Uuid,
    patient_id: Uuid,
    bill_number: String,
    sub_total: Decimal,
    discount_type: Option<String>,
    discount_value: Decimal,
    total_discount: Decimal,
    tax_rate: Option<Decimal>,
    total_tax: Decimal,
    total_amount: Decimal,
    amount_paid: Decimal,
    balance_due: Decimal,
    payment_status: String,
    primary_insurance_id: Option<Uuid>,
    insurance_claim_amount: Decimal,
    patient_responsibility: Decimal,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BillRow> for Bill {
    type Error = AppError;

    fn try_from(row: BillRow) -> Result<Self, Self::Error> {
        let discount_type = row
            .discount_type
            .map(|raw| raw.parse())
            .transpose()
            .map_err(|e: String| corrupt_column("bills.discount_type", e))?;

        Ok(Bill {
            id: row.id,
            patient_id: row.patient_id,
            bill_number: row.bill_number,
            sub_total: row.sub_total,
            discount_type,
            discount_value: row.discount_value,
            total_discount: row.total_discount,
            tax_rate: row.tax_rate,
            total_tax: row.total_tax,
            total_amount: row.total_amount,
            amount_paid: row.amount_paid,
            balance_due: row.balance_due,
            payment_status: row
                .payment_status
                .parse()
                .map_err(|e: String| corrupt_column("bills.payment_status", e))?,
            primary_insurance_id: row.primary_insurance_id,
            insurance_claim_amount: row.insurance_claim_amount,
            patient_responsibility: row.patient_responsibility,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BillItemRow {
    id: Uuid,
    bill_id: Uuid,
    description: String,
    unit_price: Decimal,
    quantity: Decimal,
    discount_amount: Decimal,
    discount_percentage: Decimal,
    total_price: Decimal,
}

impl From<BillItemRow> for BillItem {
    fn from(row: BillItemRow) -> Self {
        BillItem {
            id: row.id,
            bill_id: row.bill_id,
            description: row.description,
            unit_price: row.unit_price,
            quantity: row.quantity,
            discount_amount: row.discount_amount,
            discount_percentage: row.discount_percentage,
            total_price: row.total_price,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    bill_id: Uuid,
    amount: Decimal,
    method: String,
    reference: Option<String>,
    status: String,
    paid_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = AppError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            bill_id: row.bill_id,
            amount: row.amount,
            method: row.method,
            reference: row.reference,
            status: row
                .status
                .parse()
                .map_err(|e: String| corrupt_column("payments.status", e))?,
            paid_at: row.paid_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InsuranceRow {
    id: Uuid,
    patient_id: Uuid,
    provider_id: Uuid,
    policy_number: String,
    deductible_amount: Decimal,
    deductible_met: Decimal,
    co_pay_amount: Option<Decimal>,
    co_pay_percentage: Option<Decimal>,
    annual_max_coverage: Option<Decimal>,
    annual_used_amount: Decimal,
    is_active: bool,
    coverage_end_date: Option<NaiveDate>,
    provider_name: String,
    provider_is_active: bool,
}

const ROLE_COLUMNS: &str = "id, name, slug, priority, is_super_admin, parent_role_id, \
     module_access, data_visibility_scope, created_at";

// ============================================================================
// Permissions
// ============================================================================

/// Permission repository over the normalized RBAC tables
#[derive(Clone)]
pub struct PgPermissionRepository {
    db: PgPool,
}

impl PgPermissionRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn role_for(conn: &mut PgConnection, user: &UserRow) -> AppResult<Option<Role>> {
        let row = match (user.role_id, user.role.as_deref()) {
            (Some(role_id), _) => {
                sqlx::query_as::<_, RoleRow>(&format!(
                    "SELECT {} FROM roles WHERE id = $1",
                    ROLE_COLUMNS
                ))
                .bind(role_id)
                .fetch_optional(&mut *conn)
                .await?
            }
            (None, Some(slug)) => {
                sqlx::query_as::<_, RoleRow>(&format!(
                    "SELECT {} FROM roles WHERE slug = $1",
                    ROLE_COLUMNS
                ))
                .bind(slug)
                .fetch_optional(&mut *conn)
                .await?
            }
            (None, None) => None,
        };

        row.map(Role::try_from).transpose()
    }
}

#[async_trait]
impl PermissionRepository for PgPermissionRepository {
    async fn find_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, email, role, role_id, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(user.map(User::from))
    }

    async fn find_role(&self, role_id: Uuid) -> AppResult<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {} FROM roles WHERE id = $1",
            ROLE_COLUMNS
        ))
        .bind(role_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(Role::try_from).transpose()
    }

    async fn load_principal_grants(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PrincipalGrants>> {
        // Role, overrides and temporary grants must come from the same snapshot
        let mut tx = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let Some(user) = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, email, role, role_id, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let mut grants = PrincipalGrants::new(user_id);
        let role = Self::role_for(&mut *tx, &user).await?;

        if let Some(role) = &role {
            grants.role_id = Some(role.id);
            grants.role_slug = Some(role.slug.clone());
            grants.role_priority = Some(role.priority);
            grants.is_super_admin = role.is_super_admin;
            grants.module_access = role.module_access.clone();

            // Walk parent links, stopping on cycles and at the depth limit
            let names = sqlx::query_scalar::<_, String>(
                r#"
                WITH RECURSIVE lineage AS (
                    SELECT id, parent_role_id, 0 AS depth, ARRAY[id] AS path
                    FROM roles
                    WHERE id = $1
                    UNION ALL
                    SELECT r.id, r.parent_role_id, l.depth + 1, l.path || r.id
                    FROM roles r
                    JOIN lineage l ON r.id = l.parent_role_id
                    WHERE l.depth < $2 AND NOT r.id = ANY(l.path)
                )
                SELECT DISTINCT p.name
                FROM lineage l
                JOIN role_permissions rp ON rp.role_id = l.id
                JOIN permissions p ON p.id = rp.permission_id
                "#,
            )
            .bind(role.id)
            .bind(MAX_ROLE_DEPTH as i32)
            .fetch_all(&mut *tx)
            .await?;
            grants.role_permissions = names.into_iter().collect();
        }

        let legacy_slug = user.role.clone().or_else(|| role.map(|r| r.slug));
        if let Some(slug) = legacy_slug {
            let names = sqlx::query_scalar::<_, String>(
                "SELECT permission_name FROM legacy_role_permissions WHERE role_name = $1",
            )
            .bind(slug)
            .fetch_all(&mut *tx)
            .await?;
            grants.legacy_role_permissions = names.into_iter().collect();
        }

        let overrides = sqlx::query_as::<_, (String, bool)>(
            r#"
            SELECT p.name, up.allowed
            FROM user_permissions up
            JOIN permissions p ON p.id = up.permission_id
            WHERE up.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
        grants.overrides = overrides.into_iter().collect();

        let temporary = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            r#"
            SELECT p.name, MAX(tp.expires_at)
            FROM temporary_permissions tp
            JOIN permissions p ON p.id = tp.permission_id
            WHERE tp.user_id = $1 AND tp.active AND tp.expires_at > $2
            GROUP BY p.name
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        for (name, expires_at) in temporary {
            grants.add_temporary(&name, expires_at);
        }

        tx.commit().await?;
        Ok(Some(grants))
    }

    async fn all_permissions(&self) -> AppResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            "SELECT id, name, module, action FROM permissions ORDER BY name",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn find_permissions_by_name(&self, names: &[String]) -> AppResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            "SELECT id, name, module, action FROM permissions WHERE name = ANY($1)",
        )
        .bind(names)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Permission::from).collect())
    }

    async fn permission_dependencies(&self) -> AppResult<Vec<PermissionDependency>> {
        let edges = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT permission_id, depends_on_permission_id FROM permission_dependencies",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(edges
            .into_iter()
            .map(|(permission_id, depends_on_permission_id)| PermissionDependency {
                permission_id,
                depends_on_permission_id,
            })
            .collect())
    }

    async fn upsert_user_override(
        &self,
        user_id: Uuid,
        permission_id: Uuid,
        allowed: bool,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_permissions (user_id, permission_id, allowed, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, permission_id)
            DO UPDATE SET allowed = EXCLUDED.allowed, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(permission_id)
        .bind(allowed)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn revoke_user_permission(&self, user_id: Uuid, permission_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM user_permissions WHERE user_id = $1 AND permission_id = $2")
            .bind(user_id)
            .bind(permission_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE temporary_permissions
            SET active = false
            WHERE user_id = $1 AND permission_id = $2 AND active
            "#,
        )
        .bind(user_id)
        .bind(permission_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_temporary_permission(&self, grant: &TemporaryPermission) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO temporary_permissions
                (id, user_id, permission_id, expires_at, active, granted_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(grant.id)
        .bind(grant.user_id)
        .bind(grant.permission_id)
        .bind(grant.expires_at)
        .bind(grant.active)
        .bind(grant.granted_by)
        .bind(grant.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn set_user_role(&self, user_id: Uuid, role: Option<&Role>) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE users SET role_id = $2, role = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(role.map(|r| r.id))
        .bind(role.map(|r| r.slug.as_str()))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User".to_string()));
        }
        Ok(())
    }

    async fn replace_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            SELECT $1, UNNEST($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn users_affected_by_role(&self, role_id: Uuid) -> AppResult<Vec<Uuid>> {
        let users = sqlx::query_scalar::<_, Uuid>(
            r#"
            WITH RECURSIVE descendants AS (
                SELECT id, slug, 0 AS depth, ARRAY[id] AS path
                FROM roles
                WHERE id = $1
                UNION ALL
                SELECT r.id, r.slug, d.depth + 1, d.path || r.id
                FROM roles r
                JOIN descendants d ON r.parent_role_id = d.id
                WHERE d.depth < $2 AND NOT r.id = ANY(d.path)
            )
            SELECT DISTINCT u.id
            FROM users u
            JOIN descendants d
              ON u.role_id = d.id
              OR (u.role_id IS NULL AND u.role = d.slug)
            "#,
        )
        .bind(role_id)
        .bind(MAX_ROLE_DEPTH as i32)
        .fetch_all(&self.db)
        .await?;

        Ok(users)
    }

    async fn deactivate_expired_temporary_permissions(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let users = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE temporary_permissions
            SET active = false
            WHERE active AND expires_at <= $1
            RETURNING user_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.db)
        .await?;

        Ok(users
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }
}

// ============================================================================
// Billing
// ============================================================================

/// Billing repository with version-checked commits
#[derive(Clone)]
pub struct PgBillingRepository {
    db: PgPool,
}

impl PgBillingRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BillingRepository for PgBillingRepository {
    async fn insert_bill(&self, bill: &Bill) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bills (
                id, patient_id, bill_number, sub_total, discount_type, discount_value,
                total_discount, tax_rate, total_tax, total_amount, amount_paid, balance_due,
                payment_status, primary_insurance_id, insurance_claim_amount,
                patient_responsibility, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(bill.id)
        .bind(bill.patient_id)
        .bind(&bill.bill_number)
        .bind(bill.sub_total)
        .bind(bill.discount_type.map(|t| t.as_str()))
        .bind(bill.discount_value)
        .bind(bill.total_discount)
        .bind(bill.tax_rate)
        .bind(bill.total_tax)
        .bind(bill.total_amount)
        .bind(bill.amount_paid)
        .bind(bill.balance_due)
        .bind(bill.payment_status.as_str())
        .bind(bill.primary_insurance_id)
        .bind(bill.insurance_claim_amount)
        .bind(bill.patient_responsibility)
        .bind(bill.version)
        .bind(bill.created_at)
        .bind(bill.updated_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn load_bill(&self, bill_id: Uuid) -> AppResult<Option<BillSnapshot>> {
        // Header, items and payments must come from the same snapshot
        let mut tx = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let Some(bill) = sqlx::query_as::<_, BillRow>(
            r#"
            SELECT id, patient_id, bill_number, sub_total, discount_type, discount_value,
                   total_discount, tax_rate, total_tax, total_amount, amount_paid, balance_due,
                   payment_status, primary_insurance_id, insurance_claim_amount,
                   patient_responsibility, version, created_at, updated_at
            FROM bills
            WHERE id = $1
            "#,
        )
        .bind(bill_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, BillItemRow>(
            r#"
            SELECT id, bill_id, description, unit_price, quantity,
                   discount_amount, discount_percentage, total_price
            FROM bill_items
            WHERE bill_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(bill_id)
        .fetch_all(&mut *tx)
        .await?;

        let payments = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, bill_id, amount, method, reference, status, paid_at
            FROM payments
            WHERE bill_id = $1
            ORDER BY paid_at, id
            "#,
        )
        .bind(bill_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(BillSnapshot {
            bill: bill.try_into()?,
            items: items.into_iter().map(BillItem::from).collect(),
            payments: payments
                .into_iter()
                .map(Payment::try_from)
                .collect::<AppResult<Vec<_>>>()?,
        }))
    }

    async fn load_insurance(
        &self,
        insurance_id: Uuid,
    ) -> AppResult<Option<(PatientInsurance, InsuranceProvider)>> {
        let row = sqlx::query_as::<_, InsuranceRow>(
            r#"
            SELECT pi.id, pi.patient_id, pi.provider_id, pi.policy_number,
                   pi.deductible_amount, pi.deductible_met, pi.co_pay_amount,
                   pi.co_pay_percentage, pi.annual_max_coverage, pi.annual_used_amount,
                   pi.is_active, pi.coverage_end_date,
                   ip.name AS provider_name, ip.is_active AS provider_is_active
            FROM patient_insurances pi
            JOIN insurance_providers ip ON ip.id = pi.provider_id
            WHERE pi.id = $1
            "#,
        )
        .bind(insurance_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|row| {
            let provider = InsuranceProvider {
                id: row.provider_id,
                name: row.provider_name,
                is_active: row.provider_is_active,
            };
            let insurance = PatientInsurance {
                id: row.id,
                patient_id: row.patient_id,
                provider_id: row.provider_id,
                policy_number: row.policy_number,
                deductible_amount: row.deductible_amount,
                deductible_met: row.deductible_met,
                co_pay_amount: row.co_pay_amount,
                co_pay_percentage: row.co_pay_percentage,
                annual_max_coverage: row.annual_max_coverage,
                annual_used_amount: row.annual_used_amount,
                is_active: row.is_active,
                coverage_end_date: row.coverage_end_date,
            };
            (insurance, provider)
        }))
    }

    async fn commit(&self, commit: &BillCommit) -> AppResult<CommitOutcome> {
        let bill = &commit.bill;
        let mut tx = self.db.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE bills SET
                sub_total = $3,
                discount_type = $4,
                discount_value = $5,
                total_discount = $6,
                tax_rate = $7,
                total_tax = $8,
                total_amount = $9,
                amount_paid = $10,
                balance_due = $11,
                payment_status = $12,
                primary_insurance_id = $13,
                insurance_claim_amount = $14,
                patient_responsibility = $15,
                version = $16,
                updated_at = $17
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(bill.id)
        .bind(commit.expected_version)
        .bind(bill.sub_total)
        .bind(bill.discount_type.map(|t| t.as_str()))
        .bind(bill.discount_value)
        .bind(bill.total_discount)
        .bind(bill.tax_rate)
        .bind(bill.total_tax)
        .bind(bill.total_amount)
        .bind(bill.amount_paid)
        .bind(bill.balance_due)
        .bind(bill.payment_status.as_str())
        .bind(bill.primary_insurance_id)
        .bind(bill.insurance_claim_amount)
        .bind(bill.patient_responsibility)
        .bind(bill.version)
        .bind(bill.updated_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::Conflict);
        }

        if let Some(item) = &commit.new_item {
            sqlx::query(
                r#"
                INSERT INTO bill_items (
                    id, bill_id, description, unit_price, quantity,
                    discount_amount, discount_percentage, total_price
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id)
            .bind(item.bill_id)
            .bind(&item.description)
            .bind(item.unit_price)
            .bind(item.quantity)
            .bind(item.discount_amount)
            .bind(item.discount_percentage)
            .bind(item.total_price)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(payment) = &commit.new_payment {
            sqlx::query(
                r#"
                INSERT INTO payments (id, bill_id, amount, method, reference, status, paid_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(payment.id)
            .bind(payment.bill_id)
            .bind(payment.amount)
            .bind(&payment.method)
            .bind(&payment.reference)
            .bind(payment.status.as_str())
            .bind(payment.paid_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }
}
