//! lending pool: lend records, per-record locks and pool aggregates
//!
//! a loan draws liquidity by locking parts of individual lend records, oldest
//! deposit first. the unlocked part of a record is never stored; it is always
//! `record.amount - sum(locks on record)`.
//!
//! ```text
//!   L1 (30) ──lock 30──┐
//!   L2 (40) ──lock 20──┼──► loan (50)
//!   L3 (25)            │    L2 keeps 20 free, L3 untouched
//! ```

use crate::chain::{Address, Amount, Chain, PerChain, TxRef};
use crate::ledger::AccountLedger;
use crate::loan::{lend_interest, LoanTable};
use crate::price::PriceSnapshot;
use crate::{new_id, Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

pub type LockId = String;

/// one lender deposit; amount never changes
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LendRecord {
    pub tx_ref: TxRef,
    pub amount: Amount,
    pub chain: Chain,
    pub lender: Address,
    pub timestamp: DateTime<Utc>,
}

/// claim of one loan on part of one lend record
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LendLock {
    pub id: LockId,
    pub lend_tx: TxRef,
    pub loan_id: String,
    pub amount: Amount,
    pub chain: Chain,
    pub lender: Address,
}

/// lend records in deposit order plus the active lock table
#[derive(Debug, Default)]
pub struct LendBook {
    records: HashMap<TxRef, LendRecord>,
    order: PerChain<Vec<TxRef>>,
    locks: HashMap<LockId, LendLock>,
}

impl LendBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tx: &str) -> Option<&LendRecord> {
        self.records.get(tx)
    }

    pub fn contains(&self, tx: &str) -> bool {
        self.records.contains_key(tx)
    }

    /// records of `chain`, oldest first
    pub fn records(&self, chain: Chain) -> impl Iterator<Item = &LendRecord> {
        self.order[chain].iter().filter_map(|tx| self.records.get(tx))
    }

    pub fn locks(&self) -> impl Iterator<Item = &LendLock> {
        self.locks.values()
    }

    pub fn lock(&self, id: &str) -> Option<&LendLock> {
        self.locks.get(id)
    }

    pub fn locks_for_loan<'a>(&'a self, loan_id: &'a str) -> impl Iterator<Item = &'a LendLock> {
        self.locks.values().filter(move |l| l.loan_id == loan_id)
    }

    /// sum of active locks drawing on one record
    pub fn locked_on(&self, tx: &str) -> Amount {
        self.locks
            .values()
            .filter(|l| l.lend_tx == tx)
            .fold(0, |sum: Amount, l| sum.saturating_add(l.amount))
    }

    pub fn unlocked_on(&self, record: &LendRecord) -> Amount {
        record.amount.saturating_sub(self.locked_on(&record.tx_ref))
    }

    /// sum of active locks on `chain`
    pub fn locked_total(&self, chain: Chain) -> Amount {
        self.locks
            .values()
            .filter(|l| l.chain == chain)
            .fold(0, |sum: Amount, l| sum.saturating_add(l.amount))
    }

    /// per-record draws that cover `amount`, oldest record first
    ///
    /// read-only. fails with InsufficientLiquidity when the records of
    /// `chain` cannot cover the demand.
    pub fn plan(&self, chain: Chain, amount: Amount) -> Result<Vec<(&LendRecord, Amount)>> {
        let mut remaining = amount;
        let mut draws = Vec::new();

        for record in self.records(chain) {
            if remaining == 0 {
                break;
            }
            let free = self.unlocked_on(record);
            if free == 0 {
                continue;
            }
            let take = free.min(remaining);
            draws.push((record, take));
            remaining -= take;
        }

        if remaining > 0 {
            return Err(Error::InsufficientLiquidity {
                chain,
                requested: amount,
                available: amount - remaining,
            });
        }
        Ok(draws)
    }
}

/// mutating side of the pool
pub struct PoolAllocator<'a> {
    lends: &'a mut LendBook,
    ledger: &'a mut AccountLedger,
}

impl<'a> PoolAllocator<'a> {
    pub fn new(lends: &'a mut LendBook, ledger: &'a mut AccountLedger) -> Self {
        Self { lends, ledger }
    }

    /// store a verified lend deposit; it joins the back of the fifo queue
    pub fn record_lend(
        &mut self,
        tx: &str,
        chain: Chain,
        lender: &Address,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<LendRecord> {
        if self.lends.records.contains_key(tx) {
            return Err(Error::Conflict(format!("lend {} already recorded", tx)));
        }
        if amount == 0 {
            return Err(Error::Validation("lend amount must be positive".into()));
        }

        let record = LendRecord {
            tx_ref: tx.to_string(),
            amount,
            chain,
            lender: lender.clone(),
            timestamp: now,
        };
        self.ledger.credit_lent(lender, chain, amount, tx)?;
        self.lends.order[chain].push(tx.to_string());
        self.lends.records.insert(tx.to_string(), record.clone());
        info!("lend {} recorded: {} {} from {}", tx, amount, chain, lender);
        Ok(record)
    }

    /// lock `amount` of `chain` liquidity for a loan, fifo over lend records
    ///
    /// the full allocation is planned before any lock is written, so a
    /// failure leaves the lock table and the ledger exactly as they were.
    pub fn lock_funds_for_loan(
        &mut self,
        loan_id: &str,
        amount: Amount,
        chain: Chain,
    ) -> Result<Vec<LockId>> {
        let locks: Vec<LendLock> = self
            .lends
            .plan(chain, amount)?
            .into_iter()
            .map(|(record, take)| LendLock {
                id: new_id("lock"),
                lend_tx: record.tx_ref.clone(),
                loan_id: loan_id.to_string(),
                amount: take,
                chain,
                lender: record.lender.clone(),
            })
            .collect();

        let mut ids = Vec::with_capacity(locks.len());
        for lock in locks {
            debug!("lock {}: {} of {} for loan {}", lock.id, lock.amount, lock.lend_tx, loan_id);
            self.ledger.mark_lend_locked(&lock.lender, &lock.lend_tx);
            ids.push(lock.id.clone());
            self.lends.locks.insert(lock.id.clone(), lock);
        }
        info!("locked {} {} across {} lend records for loan {}", amount, chain, ids.len(), loan_id);
        Ok(ids)
    }

    /// drop every lock of `loan_id`; a second call finds nothing and is a no-op
    pub fn unlock_funds_for_loan(&mut self, loan_id: &str) -> Vec<LendLock> {
        let ids: Vec<LockId> = self
            .lends
            .locks_for_loan(loan_id)
            .map(|l| l.id.clone())
            .collect();

        let mut released = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(lock) = self.lends.locks.remove(&id) {
                released.push(lock);
            }
        }
        for lock in &released {
            let still_locked = self.lends.locks.values().any(|l| l.lend_tx == lock.lend_tx);
            if !still_locked {
                self.ledger.clear_lend_locked(&lock.lender, &lock.lend_tx);
            }
        }
        if !released.is_empty() {
            info!("released {} locks for loan {}", released.len(), loan_id);
        }
        released
    }
}

/// pool totals for one chain, in minor units
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoolStats {
    pub chain: Chain,
    pub total: Amount,
    pub locked: Amount,
    pub available: Amount,
    /// percent
    pub utilization: f64,
}

/// one chain of the pool overview
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChainPool {
    #[serde(flatten)]
    pub stats: PoolStats,
    pub price_usd: f64,
    pub total_usd: f64,
    pub locked_usd: f64,
    pub available_usd: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoolOverview {
    pub eth: ChainPool,
    pub near: ChainPool,
    pub total_usd: f64,
    pub locked_usd: f64,
    pub available_usd: f64,
    /// locked over total by usd value, percent
    pub utilization: f64,
    pub prices: PriceSnapshot,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Liquidity {
    pub chain: Chain,
    pub available: Amount,
    pub can_borrow: bool,
    pub max_borrowable: Amount,
}

/// one lender's position on one chain
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LenderPosition {
    pub address: Address,
    pub chain: Chain,
    pub lent: Amount,
    pub available: Amount,
    pub locked: Amount,
    /// interest over one loan term on the full lent balance
    pub projected_interest: Amount,
}

/// read side of the pool
pub struct PoolView<'a> {
    lends: &'a LendBook,
    ledger: &'a AccountLedger,
    loans: &'a LoanTable,
}

impl<'a> PoolView<'a> {
    pub fn new(lends: &'a LendBook, ledger: &'a AccountLedger, loans: &'a LoanTable) -> Self {
        Self { lends, ledger, loans }
    }

    /// every address's lent balance on `chain`
    pub fn total_pool(&self, chain: Chain) -> Amount {
        self.ledger.total_lent(chain)
    }

    /// borrow amounts of active loans on `chain`
    pub fn locked_pool(&self, chain: Chain) -> Amount {
        self.loans.active_borrowed(chain)
    }

    pub fn available_pool(&self, chain: Chain) -> Amount {
        self.total_pool(chain).saturating_sub(self.locked_pool(chain))
    }

    pub fn utilization(&self, chain: Chain) -> f64 {
        percent(
            chain.to_tokens(self.locked_pool(chain)),
            chain.to_tokens(self.total_pool(chain)),
        )
    }

    pub fn stats(&self, chain: Chain) -> PoolStats {
        PoolStats {
            chain,
            total: self.total_pool(chain),
            locked: self.locked_pool(chain),
            available: self.available_pool(chain),
            utilization: self.utilization(chain),
        }
    }

    pub fn liquidity(&self, chain: Chain) -> Liquidity {
        let available = self.available_pool(chain);
        Liquidity {
            chain,
            available,
            can_borrow: available > 0,
            max_borrowable: available,
        }
    }

    pub fn overview(&self, prices: &PriceSnapshot) -> PoolOverview {
        let chain_pool = |chain: Chain| {
            let stats = self.stats(chain);
            ChainPool {
                price_usd: prices.price(chain),
                total_usd: prices.usd_value(chain, stats.total),
                locked_usd: prices.usd_value(chain, stats.locked),
                available_usd: prices.usd_value(chain, stats.available),
                stats,
            }
        };
        let eth = chain_pool(Chain::Eth);
        let near = chain_pool(Chain::Near);
        let total_usd = eth.total_usd + near.total_usd;
        let locked_usd = eth.locked_usd + near.locked_usd;

        PoolOverview {
            total_usd,
            locked_usd,
            available_usd: eth.available_usd + near.available_usd,
            utilization: percent(locked_usd, total_usd),
            eth,
            near,
            prices: prices.clone(),
        }
    }

    fn lender_locked(&self, address: &Address, chain: Chain) -> Amount {
        self.lends
            .locks()
            .filter(|l| l.chain == chain && &l.lender == address)
            .fold(0, |sum: Amount, l| sum.saturating_add(l.amount))
    }

    /// lent balance not currently drawn by a loan
    pub fn available_lend_balance(&self, address: &Address, chain: Chain) -> Amount {
        self.ledger
            .lent_balance(address, chain)
            .saturating_sub(self.lender_locked(address, chain))
    }

    pub fn locked_lend_balance(&self, address: &Address, chain: Chain) -> Amount {
        self.lender_locked(address, chain)
    }

    pub fn lender_position(&self, address: &Address, chain: Chain) -> LenderPosition {
        let lent = self.ledger.lent_balance(address, chain);
        LenderPosition {
            address: address.clone(),
            chain,
            lent,
            available: self.available_lend_balance(address, chain),
            locked: self.locked_lend_balance(address, chain),
            projected_interest: lend_interest(lent),
        }
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lender(n: u8) -> Address {
        Address::new(format!("lender{}.near", n))
    }

    fn book_with(amounts: &[Amount]) -> (LendBook, AccountLedger) {
        let mut lends = LendBook::new();
        let mut ledger = AccountLedger::new();
        let mut pool = PoolAllocator::new(&mut lends, &mut ledger);
        for (i, amount) in amounts.iter().enumerate() {
            let tx = format!("L{}", i + 1);
            pool.record_lend(&tx, Chain::Eth, &lender(i as u8 + 1), *amount, Utc::now())
                .unwrap();
        }
        (lends, ledger)
    }

    fn locked_by_record(lends: &LendBook) -> Vec<(TxRef, Amount)> {
        let mut v: Vec<_> = lends
            .records(Chain::Eth)
            .map(|r| (r.tx_ref.clone(), lends.locked_on(&r.tx_ref)))
            .collect();
        v.sort();
        v
    }

    #[test]
    fn test_single_lender_lock() {
        let (mut lends, mut ledger) = book_with(&[100]);
        let ids = PoolAllocator::new(&mut lends, &mut ledger)
            .lock_funds_for_loan("loan_a", 50, Chain::Eth)
            .unwrap();

        assert_eq!(ids.len(), 1);
        assert_eq!(lends.locked_on("L1"), 50);
        assert!(ledger.get(&lender(1)).unwrap().locked_lends.contains("L1"));

        let loans = LoanTable::new();
        let view = PoolView::new(&lends, &ledger, &loans);
        assert_eq!(view.available_lend_balance(&lender(1), Chain::Eth), 50);
        assert_eq!(view.locked_lend_balance(&lender(1), Chain::Eth), 50);
    }

    #[test]
    fn test_fifo_across_lenders() {
        let (mut lends, mut ledger) = book_with(&[30, 40, 25]);
        PoolAllocator::new(&mut lends, &mut ledger)
            .lock_funds_for_loan("loan_a", 50, Chain::Eth)
            .unwrap();

        assert_eq!(
            locked_by_record(&lends),
            vec![("L1".into(), 30), ("L2".into(), 20), ("L3".into(), 0)]
        );
        assert_eq!(lends.unlocked_on(lends.get("L2").unwrap()), 20);
        assert!(ledger.get(&lender(3)).unwrap().locked_lends.is_empty());
    }

    #[test]
    fn test_fifo_skips_exhausted_records() {
        let (mut lends, mut ledger) = book_with(&[30, 40]);
        let mut pool = PoolAllocator::new(&mut lends, &mut ledger);
        pool.lock_funds_for_loan("loan_a", 30, Chain::Eth).unwrap();
        pool.lock_funds_for_loan("loan_b", 15, Chain::Eth).unwrap();

        let b: Vec<_> = lends.locks_for_loan("loan_b").collect();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].lend_tx, "L2");
    }

    #[test]
    fn test_insufficient_liquidity_leaves_no_trace() {
        let (mut lends, mut ledger) = book_with(&[30, 40]);
        let mut pool = PoolAllocator::new(&mut lends, &mut ledger);
        pool.lock_funds_for_loan("loan_a", 20, Chain::Eth).unwrap();

        let before: Vec<LockId> = {
            let mut ids: Vec<_> = lends.locks().map(|l| l.id.clone()).collect();
            ids.sort();
            ids
        };
        let ledger_before = ledger.get(&lender(2)).cloned();

        let err = PoolAllocator::new(&mut lends, &mut ledger)
            .lock_funds_for_loan("loan_b", 51, Chain::Eth)
            .unwrap_err();
        match err {
            Error::InsufficientLiquidity { requested, available, .. } => {
                assert_eq!((requested, available), (51, 50));
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut after: Vec<_> = lends.locks().map(|l| l.id.clone()).collect();
        after.sort();
        assert_eq!(before, after);
        assert_eq!(ledger.get(&lender(2)).cloned(), ledger_before);
    }

    #[test]
    fn test_unlock_is_idempotent() {
        let (mut lends, mut ledger) = book_with(&[30, 40]);
        let mut pool = PoolAllocator::new(&mut lends, &mut ledger);
        pool.lock_funds_for_loan("loan_a", 50, Chain::Eth).unwrap();
        pool.lock_funds_for_loan("loan_b", 10, Chain::Eth).unwrap();

        assert_eq!(pool.unlock_funds_for_loan("loan_a").len(), 2);
        assert!(pool.unlock_funds_for_loan("loan_a").is_empty());

        // L2 is still drawn by loan_b, L1 is free again
        let account1 = ledger.get(&lender(1)).unwrap();
        let account2 = ledger.get(&lender(2)).unwrap();
        assert!(account1.locked_lends.is_empty());
        assert!(account2.locked_lends.contains("L2"));
        assert_eq!(lends.locked_on("L2"), 10);
    }

    #[test]
    fn test_duplicate_lend_rejected() {
        let (mut lends, mut ledger) = book_with(&[30]);
        let dup = PoolAllocator::new(&mut lends, &mut ledger).record_lend(
            "L1",
            Chain::Eth,
            &lender(9),
            5,
            Utc::now(),
        );
        assert!(matches!(dup, Err(Error::Conflict(_))));
        assert_eq!(ledger.total_lent(Chain::Eth), 30);
    }

    #[test]
    fn test_oversized_lend_rejected_without_trace() {
        let half = Amount::MAX / 2 + 1;
        let (mut lends, mut ledger) = book_with(&[half]);

        // a second lender: each balance fits, the pool total does not
        let err = PoolAllocator::new(&mut lends, &mut ledger)
            .record_lend("L2", Chain::Eth, &lender(2), half, Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!lends.contains("L2"));
        assert_eq!(lends.records(Chain::Eth).count(), 1);
        assert!(ledger.get(&lender(2)).is_none());

        let loans = LoanTable::new();
        let view = PoolView::new(&lends, &ledger, &loans);
        assert_eq!(view.total_pool(Chain::Eth), half);
        assert_eq!(view.available_pool(Chain::Eth), half);

        PoolAllocator::new(&mut lends, &mut ledger)
            .lock_funds_for_loan("loan_a", half, Chain::Eth)
            .unwrap();
        assert_eq!(lends.locked_total(Chain::Eth), half);
    }

    #[test]
    fn test_empty_pool_stats() {
        let lends = LendBook::new();
        let ledger = AccountLedger::new();
        let loans = LoanTable::new();
        let view = PoolView::new(&lends, &ledger, &loans);
        let stats = view.stats(Chain::Near);
        assert_eq!((stats.total, stats.locked, stats.available), (0, 0, 0));
        assert_eq!(stats.utilization, 0.0);
        assert!(!view.liquidity(Chain::Near).can_borrow);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Lock(u8, Amount),
        Unlock(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6, 1u128..120).prop_map(|(loan, amount)| Op::Lock(loan, amount)),
            (0u8..6).prop_map(Op::Unlock),
        ]
    }

    proptest! {
        #[test]
        fn prop_locks_never_exceed_records(
            amounts in prop::collection::vec(1u128..100, 1..6),
            ops in prop::collection::vec(op(), 1..40),
        ) {
            let (mut lends, mut ledger) = book_with(&amounts);

            for op in ops {
                let locked_before = lends.locked_total(Chain::Eth);
                let mut pool = PoolAllocator::new(&mut lends, &mut ledger);
                match op {
                    Op::Lock(loan, amount) => {
                        let loan_id = format!("loan_{}", loan);
                        let result = pool.lock_funds_for_loan(&loan_id, amount, Chain::Eth);
                        let locked_after = lends.locked_total(Chain::Eth);
                        match result {
                            Ok(_) => prop_assert_eq!(locked_after, locked_before + amount),
                            Err(_) => prop_assert_eq!(locked_after, locked_before),
                        }
                    }
                    Op::Unlock(loan) => {
                        pool.unlock_funds_for_loan(&format!("loan_{}", loan));
                    }
                }

                for record in lends.records(Chain::Eth) {
                    prop_assert!(lends.locked_on(&record.tx_ref) <= record.amount);
                    let marked = ledger
                        .get(&record.lender)
                        .is_some_and(|a| a.locked_lends.contains(&record.tx_ref));
                    prop_assert_eq!(marked, lends.locked_on(&record.tx_ref) > 0);
                }
                let sum: Amount = lends.records(Chain::Eth).map(|r| r.amount).sum();
                prop_assert_eq!(ledger.total_lent(Chain::Eth), sum);
            }
        }
    }
}
