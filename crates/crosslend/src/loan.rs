//! loan lifecycle
//!
//! a loan is created fully populated in `active` status and only ever moves
//! to `repaid` or `liquidated`. it is never deleted.

use crate::chain::{Address, Amount, Chain, TxRef};
use crate::collateral::CollateralRegister;
use crate::config::TermMode;
use crate::ledger::checked_credit;
use crate::price::{borrowable_tokens, health_factor, PriceSnapshot};
use crate::{
    new_id, Error, Result, ACCELERATED_TERM_MINUTES, BORROW_APY, COLLATERAL_RATIO, LEND_APY,
    LOAN_TERM_MONTHS,
};
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type LoanId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Active,
    Repaid,
    Liquidated,
}

impl LoanStatus {
    /// only active loans move, and only to a terminal state
    pub fn can_transition_to(self, next: LoanStatus) -> bool {
        matches!(
            (self, next),
            (LoanStatus::Active, LoanStatus::Repaid) | (LoanStatus::Active, LoanStatus::Liquidated)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: Address,

    // collateral at origination
    pub collateral_tx: TxRef,
    pub collateral_chain: Chain,
    pub collateral_amount: Amount,
    pub collateral_value_usd: f64,

    // borrow at origination
    pub borrow_chain: Chain,
    pub borrow_amount: Amount,
    pub borrow_value_usd: f64,

    /// fixed apy, percent
    pub interest_rate: u128,
    pub term_months: u32,
    pub collateral_ratio: u32,
    pub interest_amount: Amount,
    pub total_repayment: Amount,

    pub start_time: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub status: LoanStatus,
    pub repayment_tx: Option<TxRef>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    pub fn transition(&mut self, next: LoanStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "loan {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.closed_at = Some(now);
        Ok(())
    }
}

/// floor(amount * apy% * term / 12), computed without overflowing u128
fn term_share(amount: Amount, apy: u128) -> Amount {
    let num = apy * LOAN_TERM_MONTHS as u128;
    let den = 1200;
    (amount / den) * num + (amount % den) * num / den
}

/// borrower interest over one term
pub fn interest(amount: Amount) -> Amount {
    term_share(amount, BORROW_APY)
}

/// lender interest projected over one term
pub fn lend_interest(amount: Amount) -> Amount {
    term_share(amount, LEND_APY)
}

pub fn due_date(start: DateTime<Utc>, term: TermMode) -> Result<DateTime<Utc>> {
    match term {
        TermMode::Production => start
            .checked_add_months(Months::new(LOAN_TERM_MONTHS))
            .ok_or_else(|| Error::Internal(format!("due date out of range for {}", start))),
        TermMode::Accelerated => Ok(start + Duration::minutes(ACCELERATED_TERM_MINUTES)),
    }
}

/// value the collateral, check the borrow against it and build an active
/// loan. liquidity is not checked here and nothing is stored.
#[allow(clippy::too_many_arguments)]
pub fn create_loan(
    register: &CollateralRegister,
    prices: &PriceSnapshot,
    borrower: &Address,
    collateral_tx: &str,
    borrow_chain: Chain,
    borrow_amount: Amount,
    term: TermMode,
    now: DateTime<Utc>,
) -> Result<Loan> {
    let valuation = register.valuate(collateral_tx, prices).ok_or_else(|| {
        Error::InvalidCollateral(format!("no collateral record {}", collateral_tx))
    })?;

    let borrow_value_usd = prices.usd_value(borrow_chain, borrow_amount);
    if borrow_value_usd > valuation.max_borrowable_usd {
        return Err(Error::ExceedsCollateralLimit {
            chain: borrow_chain,
            max_usd: valuation.max_borrowable_usd,
            max_tokens: borrowable_tokens(valuation.max_borrowable_usd, borrow_chain, prices),
        });
    }

    let interest_amount = interest(borrow_amount);
    let total_repayment = checked_credit(borrow_amount, interest_amount)?;
    Ok(Loan {
        id: new_id("loan"),
        borrower: borrower.clone(),
        collateral_tx: collateral_tx.to_string(),
        collateral_chain: valuation.chain,
        collateral_amount: valuation.amount,
        collateral_value_usd: valuation.value_usd,
        borrow_chain,
        borrow_amount,
        borrow_value_usd,
        interest_rate: BORROW_APY,
        term_months: LOAN_TERM_MONTHS,
        collateral_ratio: COLLATERAL_RATIO,
        interest_amount,
        total_repayment,
        start_time: now,
        due_date: due_date(now, term)?,
        status: LoanStatus::Active,
        repayment_tx: None,
        closed_at: None,
    })
}

/// read-side view of a loan at a point in time
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoanSummary {
    #[serde(flatten)]
    pub loan: Loan,
    pub is_overdue: bool,
    pub days_until_due: i64,
}

const DAY_MS: i64 = 86_400_000;

pub fn summarize(loan: &Loan, now: DateTime<Utc>) -> LoanSummary {
    let remaining_ms = (loan.due_date - now).num_milliseconds();
    let days_until_due = if remaining_ms <= 0 {
        0
    } else {
        (remaining_ms + DAY_MS - 1) / DAY_MS
    };
    LoanSummary {
        loan: loan.clone(),
        is_overdue: loan.is_active() && now > loan.due_date,
        days_until_due,
    }
}

/// health of a loan at current prices
pub fn loan_health(loan: &Loan, prices: &PriceSnapshot) -> f64 {
    health_factor(
        prices.usd_value(loan.collateral_chain, loan.collateral_amount),
        prices.usd_value(loan.borrow_chain, loan.borrow_amount),
    )
}

/// loan summary plus health at current prices
#[derive(Clone, Debug, Serialize)]
pub struct LoanReport {
    #[serde(flatten)]
    pub summary: LoanSummary,
    pub health_factor: f64,
}

/// every loan of one identity
#[derive(Clone, Debug, Serialize)]
pub struct UserLoans {
    pub loans: Vec<LoanSummary>,
    pub total: usize,
    pub active: usize,
}

/// loan table, in origination order
#[derive(Debug, Default)]
pub struct LoanTable {
    loans: HashMap<LoanId, Loan>,
    order: Vec<LoanId>,
}

impl LoanTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, loan: Loan) {
        self.order.push(loan.id.clone());
        self.loans.insert(loan.id.clone(), loan);
    }

    pub fn get(&self, id: &str) -> Option<&Loan> {
        self.loans.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Loan> {
        self.loans.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Loan> {
        self.order.iter().filter_map(|id| self.loans.get(id))
    }

    pub fn len(&self) -> usize {
        self.loans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }

    /// sum of borrow amounts of active loans on `chain`
    pub fn active_borrowed(&self, chain: Chain) -> Amount {
        self.loans
            .values()
            .filter(|l| l.is_active() && l.borrow_chain == chain)
            .fold(0, |sum: Amount, l| sum.saturating_add(l.borrow_amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::PerChain;
    use crate::ledger::AccountLedger;
    use chrono::TimeZone;

    fn prices() -> PriceSnapshot {
        PriceSnapshot::new(PerChain::new(2000.0, 5.0), Utc::now())
    }

    fn register_with_collateral() -> CollateralRegister {
        let mut register = CollateralRegister::new();
        let mut ledger = AccountLedger::new();
        register
            .record_deposit(
                &mut ledger,
                "near_tx",
                Chain::Near,
                &Address::new("bob.near"),
                Chain::Near.units(200),
                Utc::now(),
            )
            .unwrap();
        register
    }

    #[test]
    fn test_interest() {
        // 7% apy over 3 months = 1.75%
        assert_eq!(interest(Chain::Eth.units(100)), Chain::Eth.one() * 7 / 4);
        assert_eq!(interest(1200), 21);
        assert_eq!(interest(1199), 20);
        assert_eq!(lend_interest(1200), 15);
        assert!(interest(u128::MAX / 2) > 0);
    }

    #[test]
    fn test_due_dates() {
        let start = Utc.with_ymd_and_hms(2024, 11, 30, 12, 0, 0).unwrap();
        assert_eq!(
            due_date(start, TermMode::Production).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap()
        );
        assert_eq!(
            due_date(start, TermMode::Accelerated).unwrap(),
            start + Duration::minutes(3)
        );
    }

    #[test]
    fn test_create_loan() {
        let register = register_with_collateral();
        let borrower = Address::new("bob.near");
        let now = Utc::now();
        let loan = create_loan(
            &register,
            &prices(),
            &borrower,
            "near_tx",
            Chain::Eth,
            Chain::Eth.one() / 4,
            TermMode::Production,
            now,
        )
        .unwrap();

        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.collateral_value_usd, 1000.0);
        assert_eq!(loan.borrow_value_usd, 500.0);
        assert_eq!(loan.total_repayment, loan.borrow_amount + loan.interest_amount);
        assert_eq!(loan.interest_rate, 7);
        assert!(loan.id.starts_with("loan_"));
    }

    #[test]
    fn test_create_loan_rejections() {
        let register = register_with_collateral();
        let borrower = Address::new("bob.near");
        let err = create_loan(
            &register,
            &prices(),
            &borrower,
            "missing",
            Chain::Eth,
            1,
            TermMode::Production,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidCollateral(_)));

        // $1000 collateral allows $800, i.e. 0.4 eth
        let err = create_loan(
            &register,
            &prices(),
            &borrower,
            "near_tx",
            Chain::Eth,
            Chain::Eth.one() / 2,
            TermMode::Production,
            Utc::now(),
        )
        .unwrap_err();
        match err {
            Error::ExceedsCollateralLimit { chain, max_usd, max_tokens } => {
                assert_eq!(chain, Chain::Eth);
                assert_eq!(max_usd, 800.0);
                assert_eq!(max_tokens, 0.4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_transitions() {
        assert!(LoanStatus::Active.can_transition_to(LoanStatus::Repaid));
        assert!(LoanStatus::Active.can_transition_to(LoanStatus::Liquidated));
        assert!(!LoanStatus::Repaid.can_transition_to(LoanStatus::Active));
        assert!(!LoanStatus::Liquidated.can_transition_to(LoanStatus::Repaid));
        assert!(!LoanStatus::Active.can_transition_to(LoanStatus::Active));
    }

    #[test]
    fn test_summary_days_and_overdue() {
        let register = register_with_collateral();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut loan = create_loan(
            &register,
            &prices(),
            &Address::new("bob.near"),
            "near_tx",
            Chain::Near,
            Chain::Near.units(10),
            TermMode::Production,
            start,
        )
        .unwrap();

        // 91 days to 2024-04-01; half a day in rounds up
        let s = summarize(&loan, start + Duration::hours(12));
        assert_eq!(s.days_until_due, 91);
        assert!(!s.is_overdue);

        let late = loan.due_date + Duration::seconds(1);
        let s = summarize(&loan, late);
        assert!(s.is_overdue);
        assert_eq!(s.days_until_due, 0);

        loan.transition(LoanStatus::Repaid, late).unwrap();
        assert!(!summarize(&loan, late).is_overdue);
        assert!(loan.transition(LoanStatus::Liquidated, late).is_err());
    }

    #[test]
    fn test_active_borrowed() {
        let register = register_with_collateral();
        let mut table = LoanTable::new();
        let make = |amount| {
            create_loan(
                &register,
                &prices(),
                &Address::new("bob.near"),
                "near_tx",
                Chain::Near,
                amount,
                TermMode::Accelerated,
                Utc::now(),
            )
            .unwrap()
        };
        table.insert(make(10));
        let mut repaid = make(20);
        repaid.transition(LoanStatus::Repaid, Utc::now()).unwrap();
        table.insert(repaid);

        assert_eq!(table.active_borrowed(Chain::Near), 10);
        assert_eq!(table.active_borrowed(Chain::Eth), 0);
        assert_eq!(table.iter().count(), 2);
    }
}
