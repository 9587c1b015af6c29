//! # Value Ledger
//!
//! Native balances for every identity the escrow touches. Earnest money and
//! lender financing flow from the payer to the coordinator's address, and
//! the purchase price flows from the coordinator to the seller at
//! settlement.
//!
//! A transfer is validated in full before either side is touched, so a
//! failed transfer never leaves a half-applied debit behind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Address;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Attempted to move more than the payer holds.
    #[error("insufficient funds: {account} holds {available}, requested {requested}")]
    InsufficientFunds {
        /// The account being debited.
        account: Address,
        /// Its current balance.
        available: u64,
        /// The amount that was requested.
        requested: u64,
    },

    /// A credit would push a balance past `u64::MAX`.
    #[error("balance overflow: {account} holds {current}, credit {credit}")]
    Overflow {
        /// The account being credited.
        account: Address,
        /// Its balance before the failed credit.
        current: u64,
        /// The amount that caused the overflow.
        credit: u64,
    },
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The value-transfer capability the escrow coordinator consumes.
pub trait ValueLedger {
    /// Balance held by `account`. Unknown accounts hold zero.
    fn balance_of(&self, account: &str) -> u64;

    /// Moves `amount` from `from` to `to`. All-or-nothing.
    fn transfer(&mut self, from: &str, to: &str, amount: u64) -> Result<(), LedgerError>;
}

/// In-memory ledger keyed by account address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryLedger {
    balances: BTreeMap<Address, u64>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints `amount` into `account`. Used to seed genesis balances.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Overflow`] if the credit would exceed `u64::MAX`.
    pub fn credit(&mut self, account: &str, amount: u64) -> Result<u64, LedgerError> {
        let current = self.balance_of(account);
        let updated = current.checked_add(amount).ok_or(LedgerError::Overflow {
            account: account.to_string(),
            current,
            credit: amount,
        })?;
        self.balances.insert(account.to_string(), updated);
        Ok(updated)
    }

    /// All non-zero balances, ordered by address.
    pub fn all_balances(&self) -> Vec<(Address, u64)> {
        self.balances
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(account, amount)| (account.clone(), *amount))
            .collect()
    }

    /// Sum of every balance. Constant across transfers.
    pub fn total_supply(&self) -> u128 {
        self.balances.values().map(|v| u128::from(*v)).sum()
    }
}

impl ValueLedger for InMemoryLedger {
    fn balance_of(&self, account: &str) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn transfer(&mut self, from: &str, to: &str, amount: u64) -> Result<(), LedgerError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                account: from.to_string(),
                available,
                requested: amount,
            });
        }
        if from == to {
            return Ok(());
        }

        let current = self.balance_of(to);
        let credited = current.checked_add(amount).ok_or(LedgerError::Overflow {
            account: to.to_string(),
            current,
            credit: amount,
        })?;

        self.balances.insert(from.to_string(), available - amount);
        self.balances.insert(to.to_string(), credited);
        Ok(())
    }
}
