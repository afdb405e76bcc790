//! collateral register and valuation

use crate::chain::{Address, Amount, Chain, TxRef};
use crate::identity::IdentityDirectory;
use crate::ledger::AccountLedger;
use crate::price::{max_borrowable_usd, PriceSnapshot};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CollateralRecord {
    pub tx_ref: TxRef,
    pub amount: Amount,
    pub chain: Chain,
    /// address that made the deposit
    pub owner: Address,
    pub deposited_at: DateTime<Utc>,
}

/// usd value of one collateral record at given prices
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Valuation {
    pub value_usd: f64,
    pub max_borrowable_usd: f64,
    pub chain: Chain,
    pub amount: Amount,
}

/// a record as shown to its owner
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollateralView {
    #[serde(flatten)]
    pub record: CollateralRecord,
    pub locked: bool,
}

#[derive(Debug, Default)]
pub struct CollateralRegister {
    records: HashMap<TxRef, CollateralRecord>,
}

impl CollateralRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tx: &str) -> Option<&CollateralRecord> {
        self.records.get(tx)
    }

    pub fn contains(&self, tx: &str) -> bool {
        self.records.contains_key(tx)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// store a verified deposit and credit the owner
    pub fn record_deposit(
        &mut self,
        ledger: &mut AccountLedger,
        tx: &str,
        chain: Chain,
        owner: &Address,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<CollateralRecord> {
        if self.records.contains_key(tx) {
            return Err(Error::Conflict(format!("collateral {} already recorded", tx)));
        }
        if amount == 0 {
            return Err(Error::Validation("deposit amount must be positive".into()));
        }

        let record = CollateralRecord {
            tx_ref: tx.to_string(),
            amount,
            chain,
            owner: owner.clone(),
            deposited_at: now,
        };
        ledger.credit_collateral(owner, chain, amount, tx)?;
        self.records.insert(tx.to_string(), record.clone());
        info!("collateral {} recorded: {} {} from {}", tx, amount, chain, owner);
        Ok(record)
    }

    pub fn valuate(&self, tx: &str, prices: &PriceSnapshot) -> Option<Valuation> {
        let record = self.records.get(tx)?;
        let value_usd = prices.usd_value(record.chain, record.amount);
        Some(Valuation {
            value_usd,
            max_borrowable_usd: max_borrowable_usd(value_usd),
            chain: record.chain,
            amount: record.amount,
        })
    }

    /// delete an unlocked record on behalf of its owner's identity
    pub fn withdraw(
        &mut self,
        ledger: &mut AccountLedger,
        identities: &IdentityDirectory,
        tx: &str,
        requester: &Address,
    ) -> Result<CollateralRecord> {
        let record = self
            .records
            .get(tx)
            .ok_or_else(|| Error::NotFound(format!("collateral {}", tx)))?;

        if !identities.can_access(requester, &record.owner) {
            return Err(Error::Forbidden(format!(
                "{} may not withdraw collateral owned by {}",
                requester, record.owner
            )));
        }
        let locked = ledger
            .get(&record.owner)
            .is_some_and(|a| a.locked_collateral.contains(tx));
        if locked {
            return Err(Error::Locked(format!("collateral {}", tx)));
        }

        let record = self
            .records
            .remove(tx)
            .ok_or_else(|| Error::NotFound(format!("collateral {}", tx)))?;
        ledger.debit_collateral(&record.owner, record.chain, record.amount, tx);
        info!("collateral {} withdrawn by {}", tx, requester);
        Ok(record)
    }

    /// records owned by any address of `address`'s identity, in deposit order
    pub fn user_collaterals(
        &self,
        ledger: &AccountLedger,
        identities: &IdentityDirectory,
        address: &Address,
    ) -> Vec<CollateralView> {
        identities
            .resolve_all_addresses(address)
            .iter()
            .filter_map(|a| ledger.get(a))
            .flat_map(|account| {
                account.collaterals.iter().filter_map(|tx| {
                    self.records.get(tx).map(|record| CollateralView {
                        record: record.clone(),
                        locked: account.locked_collateral.contains(tx),
                    })
                })
            })
            .collect()
    }
}
