//! Common types used across the platform

use std::collections::BTreeSet;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of decimal places kept on every derived currency amount
pub const CURRENCY_SCALE: u32 = 2;

/// Round a currency amount half-up to two decimal places.
///
/// Every derived monetary value goes through this function so totals
/// computed on different paths never drift apart.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount × percentage / 100`, rounded as currency
pub fn percent_of(amount: Decimal, percentage: Decimal) -> Decimal {
    round_currency(amount * percentage / Decimal::ONE_HUNDRED)
}

/// Modules a role may open. `*` in storage means every module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum ModuleAccess {
    All,
    Modules(BTreeSet<String>),
}

impl ModuleAccess {
    pub const WILDCARD: &'static str = "*";

    pub fn none() -> Self {
        ModuleAccess::Modules(BTreeSet::new())
    }

    /// Check whether the given module is reachable
    pub fn allows(&self, module: &str) -> bool {
        match self {
            ModuleAccess::All => true,
            ModuleAccess::Modules(modules) => modules.contains(module),
        }
    }
}

impl Default for ModuleAccess {
    fn default() -> Self {
        ModuleAccess::none()
    }
}

impl From<Vec<String>> for ModuleAccess {
    fn from(entries: Vec<String>) -> Self {
        if entries.iter().any(|e| e == ModuleAccess::WILDCARD) {
            ModuleAccess::All
        } else {
            ModuleAccess::Modules(entries.into_iter().collect())
        }
    }
}

impl From<ModuleAccess> for Vec<String> {
    fn from(access: ModuleAccess) -> Self {
        match access {
            ModuleAccess::All => vec![ModuleAccess::WILDCARD.to_string()],
            ModuleAccess::Modules(modules) => modules.into_iter().collect(),
        }
    }
}

/// Which records a role can see inside the modules it may open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataVisibilityScope {
    #[default]
    Own,
    Department,
    All,
}

impl DataVisibilityScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataVisibilityScope::Own => "own",
            DataVisibilityScope::Department => "department",
            DataVisibilityScope::All => "all",
        }
    }
}

impl std::str::FromStr for DataVisibilityScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "own" => Ok(DataVisibilityScope::Own),
            "department" => Ok(DataVisibilityScope::Department),
            "all" => Ok(DataVisibilityScope::All),
            other => Err(format!("unknown data visibility scope: {}", other)),
        }
    }
}
