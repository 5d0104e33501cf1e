use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

use v4vapp_common::account::Account;
use v4vapp_common::currency::{ConvSnapshot, Unit};
use v4vapp_common::time::TimestampMillis;

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("Entry amount must be positive")]
    ZeroAmount,
    #[error("Entry {group_id}:{ledger_type} already exists")]
    DuplicateEntry {
        group_id: String,
        ledger_type: LedgerType,
    },
}

// Exhaustive set of entry slots. A single business action may post
// several entries under one group id, one per ledger type.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LedgerType {
    DepositHive,
    DepositLn,
    WithdrawHive,
    WithdrawLn,
    ConvHiveToSats,
    ConvSatsToHive,
    ConvContra,
    InternalTransfer,
    FeeConversion,
    FeeLnRouting,
    FeeExpense,
    ExcConv,
    ExcFee,
    OwnerLoan,
    ReclassifySats,
    ReclassifyHive,
    BalanceAdjustmentNoop,
}

// One balanced double-entry row. Inserted once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub group_id: String,
    pub ledger_type: LedgerType,
    pub timestamp: TimestampMillis,
    pub description: String,
    pub debit: Account,
    pub credit: Account,
    // Integer in the smallest unit of `unit`
    pub amount: u64,
    pub unit: Unit,
    pub conv: ConvSnapshot,
    pub notes: Option<String>,
}

impl LedgerEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group_id: impl Into<String>,
        ledger_type: LedgerType,
        timestamp: TimestampMillis,
        description: impl Into<String>,
        debit: Account,
        credit: Account,
        amount: u64,
        unit: Unit,
        conv: ConvSnapshot,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            ledger_type,
            timestamp,
            description: description.into(),
            debit,
            credit,
            amount,
            unit,
            conv,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<(), EntryError> {
        if self.amount == 0 {
            return Err(EntryError::ZeroAmount);
        }
        Ok(())
    }

    // Uniqueness key: one slot per (group id, ledger type)
    pub fn entry_key(&self) -> String {
        entry_key(&self.group_id, self.ledger_type)
    }

    // Signed effect of this entry on `account` in its native unit.
    // Debits increase debit-normal accounts, credits increase the rest.
    pub fn signed_amount_for(&self, account: &Account) -> Option<i64> {
        let amount = self.amount as i64;
        if self.debit == *account {
            Some(if account.account_type.is_debit_normal() {
                amount
            } else {
                -amount
            })
        } else if self.credit == *account {
            Some(if account.account_type.is_debit_normal() {
                -amount
            } else {
                amount
            })
        } else {
            None
        }
    }
}

pub fn entry_key(group_id: &str, ledger_type: LedgerType) -> String {
    format!("{}:{}", group_id, ledger_type)
}
