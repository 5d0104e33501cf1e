use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

// The five account classes of the double-entry ledger
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    // Debits increase Asset and Expense accounts; credits increase the rest
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

// Fully-qualified ledger account: (type, name, sub).
// `sub` carries the per-entity leg (a user name, a node alias, an
// exchange name) and may be empty for singleton accounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub account_type: AccountType,
    pub name: String,
    pub sub: String,
}

impl Account {
    pub fn new(
        account_type: AccountType,
        name: impl Into<String>,
        sub: impl Into<String>,
    ) -> Self {
        Self {
            account_type,
            name: name.into(),
            sub: sub.into(),
        }
    }

    // Well-known accounts used by the conversion flows

    pub fn treasury_hive(sub: impl Into<String>) -> Self {
        Self::new(AccountType::Asset, "Treasury Hive", sub)
    }

    pub fn user_balance(user: impl Into<String>) -> Self {
        Self::new(AccountType::Liability, "User Balance", user)
    }

    pub fn ln_holdings(node: impl Into<String>) -> Self {
        Self::new(AccountType::Asset, "LN Holdings", node)
    }

    pub fn external_ln_payments() -> Self {
        Self::new(AccountType::Asset, "External LN Payments", "")
    }

    pub fn conversion_fees() -> Self {
        Self::new(AccountType::Revenue, "Conversion Fees", "")
    }

    pub fn ln_routing_fees() -> Self {
        Self::new(AccountType::Expense, "LN Routing Fees", "")
    }

    pub fn exchange_holdings(exchange: impl Into<String>) -> Self {
        Self::new(AccountType::Asset, "Exchange Holdings", exchange)
    }

    pub fn exchange_fees() -> Self {
        Self::new(AccountType::Expense, "Exchange Fees", "")
    }

    pub fn owner_loans(owner: impl Into<String>) -> Self {
        Self::new(AccountType::Equity, "Owner Loans", owner)
    }

    // Offset account absorbing the two legs of a cross-unit conversion;
    // reports show its per-unit columns netted against each other
    pub fn conversion_offset() -> Self {
        Self::new(AccountType::Equity, "Conversion Offset", "")
    }

    // Stable textual form used for index keys and display
    pub fn qualified_name(&self) -> String {
        format!("{}:{}/{}", self.account_type, self.name, self.sub)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sub.is_empty() {
            write!(f, "{}: {}", self.account_type, self.name)
        } else {
            write!(f, "{}: {} / {}", self.account_type, self.name, self.sub)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_balance_sides() {
        assert!(AccountType::Asset.is_debit_normal());
        assert!(AccountType::Expense.is_debit_normal());
        assert!(!AccountType::Liability.is_debit_normal());
        assert!(!AccountType::Revenue.is_debit_normal());
        assert!(!AccountType::Equity.is_debit_normal());
    }

    #[test]
    fn qualified_names_are_stable() {
        let account = Account::user_balance("alice");
        assert_eq!(account.qualified_name(), "Liability:User Balance/alice");
        assert_eq!(
            Account::external_ln_payments().qualified_name(),
            "Asset:External LN Payments/"
        );
    }
}
