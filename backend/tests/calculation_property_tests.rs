//! Property tests for the pure permission and billing functions
//!
//! - Property 1: overrides beat role grants, role grants beat temporary grants
//! - Property 2: super-admins hold every permission
//! - Property 4: dependency validation follows the whole prerequisite chain
//! - Property 5: total, balance and status stay consistent
//! - Property 7: insurance coverage never exceeds the annual remaining amount
//! - Property 8: recalculating totals is idempotent

use std::collections::BTreeSet;

use chrono::{NaiveDate, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::billing::{apply_totals, calculate_insurance_coverage, calculate_totals, line_total};
use shared::models::{
    Bill, BillItem, BillSnapshot, DiscountType, InsuranceProvider, PatientInsurance, Payment,
    PaymentRecordStatus, PaymentStatus, Permission, PermissionDependency, PrincipalGrants,
};
use shared::permissions::{effective_permissions, resolve_permission, DependencyGraph};
use shared::types::round_currency;
use uuid::Uuid;

const PERMISSIONS: &[&str] = &[
    "view-patients",
    "edit-patients",
    "prescribe-medication",
    "view-bills",
    "void-bills",
];

// =============================================================================
// Strategies
// =============================================================================

/// Currency amount between 0.00 and `max_units`.99
fn money(max_units: i64) -> impl Strategy<Value = Decimal> {
    (0i64..=max_units * 100).prop_map(|cents| Decimal::new(cents, 2))
}

fn percentage() -> impl Strategy<Value = Decimal> {
    (0i64..=10_000).prop_map(|basis_points| Decimal::new(basis_points, 2))
}

/// How one permission is granted to a principal
#[derive(Debug, Clone)]
struct GrantSources {
    role: bool,
    legacy: bool,
    temporary: bool,
    user_override: Option<bool>,
}

fn grant_sources() -> impl Strategy<Value = GrantSources> {
    (any::<bool>(), any::<bool>(), any::<bool>(), proptest::option::of(any::<bool>())).prop_map(
        |(role, legacy, temporary, user_override)| GrantSources {
            role,
            legacy,
            temporary,
            user_override,
        },
    )
}

fn grants_from(sources: &[GrantSources], is_super_admin: bool) -> PrincipalGrants {
    let mut grants = PrincipalGrants::new(Uuid::new_v4());
    grants.is_super_admin = is_super_admin;

    for (name, source) in PERMISSIONS.iter().zip(sources) {
        let name = name.to_string();
        if source.role {
            grants.role_permissions.insert(name.clone());
        }
        if source.legacy {
            grants.legacy_role_permissions.insert(name.clone());
        }
        if source.temporary {
            grants.temporary_permissions.insert(name.clone());
        }
        if let Some(allowed) = source.user_override {
            grants.overrides.insert(name, allowed);
        }
    }
    grants
}

fn line(bill_id: Uuid) -> impl Strategy<Value = BillItem> {
    (money(500), 1i64..=10, percentage(), 0i64..=100).prop_map(
        move |(unit_price, quantity, discount_percentage, flat_share)| {
            let quantity = Decimal::from(quantity);
            let gross = line_total(unit_price, quantity);
            BillItem {
                id: Uuid::new_v4(),
                bill_id,
                description: "Line".to_string(),
                unit_price,
                quantity,
                // flat part stays within the line's gross amount
                discount_amount: round_currency(gross * Decimal::from(flat_share) / Decimal::ONE_HUNDRED),
                discount_percentage,
                total_price: gross,
            }
        },
    )
}

fn payment(bill_id: Uuid) -> impl Strategy<Value = Payment> {
    (
        money(2_000),
        prop_oneof![
            Just(PaymentRecordStatus::Completed),
            Just(PaymentRecordStatus::Pending),
            Just(PaymentRecordStatus::Failed),
            Just(PaymentRecordStatus::Refunded),
        ],
    )
        .prop_map(move |(amount, status)| Payment {
            id: Uuid::new_v4(),
            bill_id,
            amount,
            method: "cash".to_string(),
            reference: None,
            status,
            paid_at: Utc::now(),
        })
}

fn snapshot() -> impl Strategy<Value = BillSnapshot> {
    let bill_id = Uuid::new_v4();
    (
        proptest::collection::vec(line(bill_id), 0..6),
        proptest::collection::vec(payment(bill_id), 0..4),
        proptest::option::of(percentage()),
        proptest::option::of((0i64..=3_000).prop_map(|rate| Decimal::new(rate, 2))),
    )
        .prop_map(move |(items, payments, bill_discount, tax_rate)| {
            let mut bill = Bill::draft(Uuid::new_v4(), "INV-PROP");
            bill.id = bill_id;
            if let Some(value) = bill_discount {
                bill.discount_type = Some(DiscountType::Percentage);
                bill.discount_value = value;
            }
            bill.tax_rate = tax_rate;
            BillSnapshot {
                bill,
                items,
                payments,
            }
        })
}

fn policy() -> impl Strategy<Value = PatientInsurance> {
    (
        money(1_000),
        money(1_000),
        proptest::option::of(money(200)),
        proptest::option::of(percentage()),
        proptest::option::of(money(10_000)),
        money(12_000),
    )
        .prop_map(
            |(deductible_amount, deductible_met, co_pay_amount, co_pay_percentage, annual_max, used)| {
                PatientInsurance {
                    id: Uuid::new_v4(),
                    patient_id: Uuid::new_v4(),
                    provider_id: Uuid::new_v4(),
                    policy_number: "POL-PROP".to_string(),
                    deductible_amount,
                    deductible_met,
                    co_pay_amount,
                    co_pay_percentage,
                    annual_max_coverage: annual_max,
                    annual_used_amount: used,
                    is_active: true,
                    coverage_end_date: None,
                }
            },
        )
}

// =============================================================================
// Properties 1 & 2: Permission resolution precedence
// =============================================================================

mod resolution {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property 1: override, then role or legacy grant, then temporary grant
        #[test]
        fn prop_precedence_is_respected(
            sources in proptest::collection::vec(grant_sources(), PERMISSIONS.len())
        ) {
            let grants = grants_from(&sources, false);

            for (name, source) in PERMISSIONS.iter().zip(&sources) {
                let expected = match source.user_override {
                    Some(allowed) => allowed,
                    None => source.role || source.legacy || source.temporary,
                };
                prop_assert_eq!(resolve_permission(&grants, name), expected, "permission {}", name);
            }
        }

        /// Property 1: the effective set agrees with single checks
        #[test]
        fn prop_effective_set_matches_single_checks(
            sources in proptest::collection::vec(grant_sources(), PERMISSIONS.len())
        ) {
            let grants = grants_from(&sources, false);
            let effective = effective_permissions(&grants, PERMISSIONS.iter().copied());

            for name in PERMISSIONS {
                prop_assert_eq!(effective.contains(*name), resolve_permission(&grants, name));
            }
        }

        /// Property 2: denies and missing grants do not limit a super-admin
        #[test]
        fn prop_super_admin_holds_everything(
            sources in proptest::collection::vec(grant_sources(), PERMISSIONS.len()),
            unknown in "[a-z]{3,12}-[a-z]{3,12}"
        ) {
            let grants = grants_from(&sources, true);

            prop_assert!(resolve_permission(&grants, &unknown));
            for name in PERMISSIONS {
                prop_assert!(resolve_permission(&grants, name));
            }

            let effective = effective_permissions(&grants, PERMISSIONS.iter().copied());
            let universe: BTreeSet<String> = PERMISSIONS.iter().map(|p| p.to_string()).collect();
            prop_assert_eq!(effective, universe);
        }
    }
}

// =============================================================================
// Property 4: Dependency transitivity
// =============================================================================

mod dependencies {
    use super::*;

    /// `chain[i]` requires `chain[i - 1]`
    fn chain(len: usize) -> (Vec<Permission>, DependencyGraph) {
        let permissions: Vec<Permission> = (0..len)
            .map(|i| Permission {
                id: Uuid::new_v4(),
                name: format!("level-{}", i),
                module: None,
                action: None,
            })
            .collect();
        let edges: Vec<PermissionDependency> = permissions
            .windows(2)
            .map(|pair| PermissionDependency {
                permission_id: pair[1].id,
                depends_on_permission_id: pair[0].id,
            })
            .collect();

        let graph = DependencyGraph::new(&permissions, &edges);
        (permissions, graph)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property 4: the top of a chain alone misses every level below it
        #[test]
        fn prop_top_alone_misses_every_prerequisite(len in 2usize..8) {
            let (permissions, graph) = chain(len);
            let top = permissions[len - 1].id;

            let errors = graph.validate(&[top]);
            prop_assert_eq!(errors.len(), len - 1);

            let missing: BTreeSet<Uuid> = errors.iter().map(|e| e.missing_id).collect();
            let below: BTreeSet<Uuid> = permissions[..len - 1].iter().map(|p| p.id).collect();
            prop_assert_eq!(missing, below);
        }

        /// Property 4: a set validates exactly when it is closed under prerequisites
        #[test]
        fn prop_valid_iff_closed(
            len in 2usize..8,
            mask in proptest::collection::vec(any::<bool>(), 8)
        ) {
            let (permissions, graph) = chain(len);
            let selected: Vec<Uuid> = permissions
                .iter()
                .zip(&mask)
                .filter(|(_, keep)| **keep)
                .map(|(p, _)| p.id)
                .collect();

            let selected_levels: Vec<usize> = (0..len).filter(|&i| mask[i]).collect();
            let closed = selected_levels.iter().enumerate().all(|(pos, &level)| pos == level);

            prop_assert_eq!(graph.validate(&selected).is_empty(), closed);
        }
    }
}

// =============================================================================
// Properties 5 & 8: Bill totals
// =============================================================================

mod totals {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property 5: total, balance and status derive from each other
        #[test]
        fn prop_totals_are_consistent(
            snapshot in snapshot(),
            default_rate in (0i64..=2_500).prop_map(|rate| Decimal::new(rate, 2))
        ) {
            let totals = calculate_totals(&snapshot, default_rate);

            prop_assert!(totals.total_discount <= totals.sub_total);
            prop_assert!(totals.total_amount >= Decimal::ZERO);
            prop_assert_eq!(
                totals.total_amount,
                round_currency(totals.sub_total - totals.total_discount + totals.total_tax)
            );
            prop_assert_eq!(
                totals.balance_due,
                (totals.total_amount - totals.amount_paid).max(Decimal::ZERO)
            );

            let expected_status = if totals.balance_due <= Decimal::ZERO {
                PaymentStatus::Paid
            } else if totals.amount_paid > Decimal::ZERO {
                PaymentStatus::Partial
            } else {
                PaymentStatus::Pending
            };
            prop_assert_eq!(totals.payment_status, expected_status);
        }

        /// Property 8: recomputing from the updated bill changes nothing
        #[test]
        fn prop_recalculation_is_idempotent(
            snapshot in snapshot(),
            default_rate in (0i64..=2_500).prop_map(|rate| Decimal::new(rate, 2))
        ) {
            let first = calculate_totals(&snapshot, default_rate);

            let mut updated = snapshot.clone();
            apply_totals(&mut updated.bill, &first);
            let second = calculate_totals(&updated, default_rate);

            prop_assert_eq!(first, second);
        }
    }
}

// =============================================================================
// Property 7: Insurance split
// =============================================================================

mod coverage {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property 7: insurer share is bounded and the split adds up
        #[test]
        fn prop_coverage_is_bounded(total in money(20_000), insurance in policy()) {
            let provider = InsuranceProvider {
                id: insurance.provider_id,
                name: "Provider".to_string(),
                is_active: true,
            };
            let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();

            let coverage = calculate_insurance_coverage(total, &insurance, &provider, today).unwrap();

            prop_assert!(coverage.insurance_coverage >= Decimal::ZERO);
            prop_assert!(coverage.patient_responsibility >= Decimal::ZERO);
            prop_assert!(coverage.insurance_coverage <= coverage.total_amount);
            prop_assert_eq!(
                coverage.insurance_coverage + coverage.patient_responsibility,
                coverage.total_amount
            );
            if let Some(remaining) = insurance.annual_remaining() {
                prop_assert!(coverage.insurance_coverage <= remaining);
            }
        }
    }
}
