//! account ledger
//!
//! per-address balances, keyed by raw address. callers that need a user's
//! whole position resolve the identity first and read each address; the
//! ledger itself never merges addresses, so balances are never counted twice.
//!
//! debits saturate at zero instead of failing: an account is never left
//! negative, at the cost of silently absorbing an over-debit. credits are
//! checked and fail before touching the account.

use crate::chain::{Address, Amount, Chain, PerChain, TxRef};
use crate::loan::LoanId;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AccountState {
    pub collateral_remaining: PerChain<Amount>,
    pub lent_balance: PerChain<Amount>,
    pub borrowed: PerChain<Amount>,
    /// collateral deposits owned by this address
    pub collaterals: Vec<TxRef>,
    /// lend deposits owned by this address
    pub lends: Vec<TxRef>,
    /// loans taken by this address
    pub loans: Vec<LoanId>,
    /// subset of `collaterals` backing an active loan
    pub locked_collateral: BTreeSet<TxRef>,
    /// subset of `lends` with at least one active lock
    pub locked_lends: BTreeSet<TxRef>,
}

/// `balance + amount`, or a validation error when it does not fit
pub fn checked_credit(balance: Amount, amount: Amount) -> Result<Amount> {
    balance
        .checked_add(amount)
        .ok_or_else(|| Error::Validation("amount out of range".into()))
}

#[derive(Debug, Default)]
pub struct AccountLedger {
    accounts: HashMap<Address, AccountState>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<&AccountState> {
        self.accounts.get(address)
    }

    /// zeroed record on first touch
    pub fn ensure(&mut self, address: &Address) -> &mut AccountState {
        self.accounts.entry(address.clone()).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &AccountState)> {
        self.accounts.iter()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn credit_collateral(
        &mut self,
        owner: &Address,
        chain: Chain,
        amount: Amount,
        tx: &str,
    ) -> Result<()> {
        let balance = self.get(owner).map_or(0, |a| a.collateral_remaining[chain]);
        let balance = checked_credit(balance, amount)?;
        let account = self.ensure(owner);
        account.collateral_remaining[chain] = balance;
        account.collaterals.push(tx.to_string());
        Ok(())
    }

    /// remove a withdrawn deposit; the remaining balance clamps at zero
    pub fn debit_collateral(&mut self, owner: &Address, chain: Chain, amount: Amount, tx: &str) {
        let account = self.ensure(owner);
        account.collateral_remaining[chain] =
            account.collateral_remaining[chain].saturating_sub(amount);
        account.collaterals.retain(|t| t != tx);
    }

    /// the chain-wide total is checked too, so `total_lent` always fits
    pub fn credit_lent(
        &mut self,
        lender: &Address,
        chain: Chain,
        amount: Amount,
        tx: &str,
    ) -> Result<()> {
        checked_credit(self.total_lent(chain), amount)?;
        let balance = checked_credit(self.lent_balance(lender, chain), amount)?;
        let account = self.ensure(lender);
        account.lent_balance[chain] = balance;
        account.lends.push(tx.to_string());
        Ok(())
    }

    /// fails when `amount` more would not fit in the borrowed balance
    pub fn check_borrow(&self, borrower: &Address, chain: Chain, amount: Amount) -> Result<()> {
        let borrowed = self.get(borrower).map_or(0, |a| a.borrowed[chain]);
        checked_credit(borrowed, amount).map(|_| ())
    }

    pub fn add_borrow(
        &mut self,
        borrower: &Address,
        chain: Chain,
        amount: Amount,
        loan_id: &str,
    ) -> Result<()> {
        let borrowed = self.get(borrower).map_or(0, |a| a.borrowed[chain]);
        let borrowed = checked_credit(borrowed, amount)?;
        let account = self.ensure(borrower);
        account.borrowed[chain] = borrowed;
        account.loans.push(loan_id.to_string());
        Ok(())
    }

    /// clamps at zero
    pub fn settle_borrow(&mut self, borrower: &Address, chain: Chain, amount: Amount) {
        let account = self.ensure(borrower);
        account.borrowed[chain] = account.borrowed[chain].saturating_sub(amount);
    }

    pub fn lock_collateral(&mut self, owner: &Address, tx: &str) {
        self.ensure(owner).locked_collateral.insert(tx.to_string());
    }

    /// address whose locked set currently holds `tx`
    pub fn collateral_lock_holder(&self, tx: &str) -> Option<&Address> {
        self.accounts
            .iter()
            .find(|(_, account)| account.locked_collateral.contains(tx))
            .map(|(address, _)| address)
    }

    /// release `tx` from whichever account holds it
    pub fn unlock_collateral(&mut self, tx: &str) -> Option<Address> {
        let holder = self.collateral_lock_holder(tx)?.clone();
        if let Some(account) = self.accounts.get_mut(&holder) {
            account.locked_collateral.remove(tx);
        }
        Some(holder)
    }

    pub fn is_collateral_locked(&self, tx: &str) -> bool {
        self.collateral_lock_holder(tx).is_some()
    }

    pub fn mark_lend_locked(&mut self, lender: &Address, tx: &str) {
        self.ensure(lender).locked_lends.insert(tx.to_string());
    }

    pub fn clear_lend_locked(&mut self, lender: &Address, tx: &str) {
        if let Some(account) = self.accounts.get_mut(lender) {
            account.locked_lends.remove(tx);
        }
    }

    /// sum of every address's lent balance on `chain`
    pub fn total_lent(&self, chain: Chain) -> Amount {
        self.accounts
            .values()
            .fold(0, |sum: Amount, a| sum.saturating_add(a.lent_balance[chain]))
    }

    pub fn lent_balance(&self, address: &Address, chain: Chain) -> Amount {
        self.get(address).map_or(0, |a| a.lent_balance[chain])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    #[test]
    fn test_lazy_zeroed_account() {
        let mut ledger = AccountLedger::new();
        assert!(ledger.get(&addr("a.near")).is_none());
        assert_eq!(ledger.ensure(&addr("a.near")), &mut AccountState::default());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_debits_clamp_at_zero() {
        let mut ledger = AccountLedger::new();
        let a = addr("a.near");
        ledger.credit_collateral(&a, Chain::Near, 10, "tx1").unwrap();
        ledger.debit_collateral(&a, Chain::Near, 25, "tx1");
        assert_eq!(ledger.get(&a).unwrap().collateral_remaining.near, 0);
        assert!(ledger.get(&a).unwrap().collaterals.is_empty());

        ledger.add_borrow(&a, Chain::Eth, 5, "loan_1").unwrap();
        ledger.settle_borrow(&a, Chain::Eth, 6);
        assert_eq!(ledger.get(&a).unwrap().borrowed.eth, 0);
        assert_eq!(ledger.get(&a).unwrap().loans, vec!["loan_1".to_string()]);
    }

    #[test]
    fn test_collateral_lock_found_by_membership() {
        let mut ledger = AccountLedger::new();
        let owner = addr("owner.near");
        ledger.credit_collateral(&owner, Chain::Near, 10, "tx1").unwrap();
        ledger.lock_collateral(&owner, "tx1");
        ledger.ensure(&addr("someone.near"));

        assert!(ledger.is_collateral_locked("tx1"));
        assert_eq!(ledger.unlock_collateral("tx1"), Some(owner.clone()));
        assert!(!ledger.is_collateral_locked("tx1"));
        assert_eq!(ledger.unlock_collateral("tx1"), None);
    }

    #[test]
    fn test_total_lent() {
        let mut ledger = AccountLedger::new();
        ledger.credit_lent(&addr("a.near"), Chain::Eth, 30, "l1").unwrap();
        ledger.credit_lent(&addr("b.near"), Chain::Eth, 40, "l2").unwrap();
        ledger.credit_lent(&addr("b.near"), Chain::Near, 7, "l3").unwrap();
        assert_eq!(ledger.total_lent(Chain::Eth), 70);
        assert_eq!(ledger.total_lent(Chain::Near), 7);
        assert_eq!(ledger.lent_balance(&addr("b.near"), Chain::Eth), 40);
        assert_eq!(ledger.lent_balance(&addr("c.near"), Chain::Eth), 0);
    }

    #[test]
    fn test_credit_overflow_leaves_account_untouched() {
        let mut ledger = AccountLedger::new();
        let a = addr("a.near");
        let half = Amount::MAX / 2 + 1;

        ledger.credit_lent(&a, Chain::Near, half, "l1").unwrap();
        let before = ledger.get(&a).cloned();
        assert!(matches!(
            ledger.credit_lent(&a, Chain::Near, half, "l2"),
            Err(Error::Validation(_))
        ));
        assert_eq!(ledger.get(&a).cloned(), before);

        // fits each account but not the chain total
        let b = addr("b.near");
        assert!(ledger.credit_lent(&b, Chain::Near, half, "l3").is_err());
        assert!(ledger.get(&b).is_none());
        assert_eq!(ledger.total_lent(Chain::Near), half);

        ledger.credit_collateral(&a, Chain::Eth, Amount::MAX, "c1").unwrap();
        assert!(ledger.credit_collateral(&a, Chain::Eth, 1, "c2").is_err());
        assert_eq!(ledger.get(&a).unwrap().collaterals, vec!["c1".to_string()]);

        ledger.add_borrow(&a, Chain::Eth, Amount::MAX, "loan_1").unwrap();
        assert!(ledger.check_borrow(&a, Chain::Eth, 1).is_err());
        assert!(ledger.add_borrow(&a, Chain::Eth, 1, "loan_2").is_err());
        assert_eq!(ledger.get(&a).unwrap().loans.len(), 1);
    }
}
