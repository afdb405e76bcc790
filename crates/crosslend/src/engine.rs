//! composite ledger operations
//!
//! `Book` owns every store. each method validates everything it needs before
//! its first write, so an `Err` always means nothing changed.

use crate::chain::{Address, Amount, Chain};
use crate::collateral::{CollateralRecord, CollateralRegister, CollateralView};
use crate::config::TermMode;
use crate::identity::IdentityDirectory;
use crate::ledger::AccountLedger;
use crate::loan::{
    self, loan_health, summarize, Loan, LoanId, LoanReport, LoanStatus, LoanTable, UserLoans,
};
use crate::pool::{LendBook, LendRecord, PoolAllocator, PoolView};
use crate::price::PriceSnapshot;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use tracing::info;

#[derive(Debug, Default)]
pub struct Book {
    pub identities: IdentityDirectory,
    pub ledger: AccountLedger,
    pub collateral: CollateralRegister,
    pub lends: LendBook,
    pub loans: LoanTable,
    term: TermMode,
}

impl Book {
    pub fn new(term: TermMode) -> Self {
        Self {
            term,
            ..Default::default()
        }
    }

    pub fn term(&self) -> TermMode {
        self.term
    }

    pub fn pool(&self) -> PoolView<'_> {
        PoolView::new(&self.lends, &self.ledger, &self.loans)
    }

    pub fn allocator(&mut self) -> PoolAllocator<'_> {
        PoolAllocator::new(&mut self.lends, &mut self.ledger)
    }

    fn ensure_unseen(&self, tx: &str) -> Result<()> {
        if self.collateral.contains(tx) || self.lends.contains(tx) {
            return Err(Error::Conflict(format!("transaction {} already recorded", tx)));
        }
        Ok(())
    }

    pub fn record_collateral(
        &mut self,
        tx: &str,
        chain: Chain,
        owner: &Address,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<CollateralRecord> {
        self.ensure_unseen(tx)?;
        self.collateral
            .record_deposit(&mut self.ledger, tx, chain, owner, amount, now)
    }

    pub fn record_lend(
        &mut self,
        tx: &str,
        chain: Chain,
        lender: &Address,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<LendRecord> {
        self.ensure_unseen(tx)?;
        self.allocator().record_lend(tx, chain, lender, amount, now)
    }

    pub fn withdraw_collateral(
        &mut self,
        tx: &str,
        requester: &Address,
    ) -> Result<CollateralRecord> {
        self.collateral
            .withdraw(&mut self.ledger, &self.identities, tx, requester)
    }

    /// borrow against one collateral record
    ///
    /// checks run in a fixed order: amount, collateral, access, lock,
    /// liquidity, collateral limit. the loan is only stored once its lend
    /// locks are in place.
    pub fn open_loan(
        &mut self,
        borrower: &Address,
        collateral_tx: &str,
        chain: Chain,
        amount: Amount,
        prices: &PriceSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        if amount == 0 {
            return Err(Error::Validation("borrow amount must be positive".into()));
        }
        let record = self
            .collateral
            .get(collateral_tx)
            .ok_or_else(|| Error::NotFound(format!("collateral {}", collateral_tx)))?;
        let owner = record.owner.clone();
        if !self.identities.can_access(borrower, &owner) {
            return Err(Error::Forbidden(format!(
                "{} may not borrow against collateral owned by {}",
                borrower, owner
            )));
        }
        if self.ledger.is_collateral_locked(collateral_tx) {
            return Err(Error::Locked(format!("collateral {}", collateral_tx)));
        }
        let available = self.pool().available_pool(chain);
        if amount > available {
            return Err(Error::InsufficientLiquidity {
                chain,
                requested: amount,
                available,
            });
        }

        let loan = loan::create_loan(
            &self.collateral,
            prices,
            borrower,
            collateral_tx,
            chain,
            amount,
            self.term,
            now,
        )?;
        self.ledger.check_borrow(borrower, chain, amount)?;
        // last fallible step; on failure the loan is simply dropped
        self.allocator().lock_funds_for_loan(&loan.id, amount, chain)?;

        self.ledger.add_borrow(borrower, chain, amount, &loan.id)?;
        self.ledger.lock_collateral(&owner, collateral_tx);
        self.loans.insert(loan.clone());
        info!(
            "loan {} opened: {} borrows {} {} against {}, due {}",
            loan.id, borrower, amount, chain, collateral_tx, loan.due_date
        );
        Ok(loan)
    }

    /// settle an active loan and release everything it held
    pub fn repay_loan(
        &mut self,
        loan_id: &str,
        repayment_tx: &str,
        chain: Chain,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        let loan = self
            .loans
            .get(loan_id)
            .ok_or_else(|| Error::NotFound(format!("loan {}", loan_id)))?;
        if !loan.is_active() {
            return Err(Error::InvalidState(format!("loan {} is not active", loan_id)));
        }
        if chain != loan.borrow_chain {
            return Err(Error::ChainMismatch {
                expected: loan.borrow_chain,
                got: chain,
            });
        }

        let loan = self
            .loans
            .get_mut(loan_id)
            .ok_or_else(|| Error::NotFound(format!("loan {}", loan_id)))?;
        loan.transition(LoanStatus::Repaid, now)?;
        loan.repayment_tx = Some(repayment_tx.to_string());
        let loan = loan.clone();

        self.ledger
            .settle_borrow(&loan.borrower, loan.borrow_chain, loan.borrow_amount);
        let holder = self.ledger.unlock_collateral(&loan.collateral_tx);
        let released = self.allocator().unlock_funds_for_loan(loan_id);
        info!(
            "loan {} repaid via {}: collateral {} released from {}, {} lend locks dropped",
            loan_id,
            repayment_tx,
            loan.collateral_tx,
            holder.as_ref().map_or("nobody", |a| a.as_str()),
            released.len()
        );
        Ok(loan)
    }

    pub fn loan_report(
        &self,
        loan_id: &str,
        prices: &PriceSnapshot,
        now: DateTime<Utc>,
    ) -> Result<LoanReport> {
        let loan = self
            .loans
            .get(loan_id)
            .ok_or_else(|| Error::NotFound(format!("loan {}", loan_id)))?;
        Ok(LoanReport {
            summary: summarize(loan, now),
            health_factor: loan_health(loan, prices),
        })
    }

    /// loans of every address of `address`'s identity
    pub fn user_loans(&self, address: &Address, now: DateTime<Utc>) -> UserLoans {
        let ids: Vec<LoanId> = self
            .identities
            .resolve_all_addresses(address)
            .iter()
            .filter_map(|a| self.ledger.get(a))
            .flat_map(|account| account.loans.iter().cloned())
            .collect();
        let loans: Vec<_> = ids
            .iter()
            .filter_map(|id| self.loans.get(id))
            .map(|l| summarize(l, now))
            .collect();
        let active = loans.iter().filter(|s| s.loan.is_active()).count();
        UserLoans {
            total: loans.len(),
            active,
            loans,
        }
    }

    pub fn user_collaterals(&self, address: &Address) -> Vec<CollateralView> {
        self.collateral
            .user_collaterals(&self.ledger, &self.identities, address)
    }
}
