//! lending service
//!
//! wires the book to its collaborators. the book sits behind one rwlock:
//! every mutation takes the write half, and nothing is awaited while it is
//! held. prices and deposit proofs are fetched first.

use crate::chain::{Address, Amount, Chain};
use crate::collateral::{CollateralRecord, CollateralView};
use crate::config::LendingConfig;
use crate::deposit::{verified_deposit, DepositVerifier, StaticVerifier};
use crate::engine::Book;
use crate::identity::{Identity, Profile};
use crate::ledger::AccountState;
use crate::loan::{Loan, LoanReport, UserLoans};
use crate::pool::{LendRecord, LenderPosition, Liquidity, PoolOverview, PoolStats};
use crate::price::{PriceCache, PriceFeed, PriceSnapshot};
use crate::proof::{
    link_challenge, validate_link_request, FormatProofVerifier, LinkChallenge, LinkRequest,
    ProofVerifier,
};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

pub struct Protocol {
    config: LendingConfig,
    prices: PriceCache,
    deposits: Arc<dyn DepositVerifier>,
    proofs: Arc<dyn ProofVerifier>,
    book: RwLock<Book>,
}

pub struct ProtocolBuilder {
    config: LendingConfig,
    feed: Option<Arc<dyn PriceFeed>>,
    deposits: Option<Arc<dyn DepositVerifier>>,
    proofs: Option<Arc<dyn ProofVerifier>>,
}

impl ProtocolBuilder {
    pub fn price_feed(mut self, feed: Arc<dyn PriceFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn deposit_verifier(mut self, verifier: Arc<dyn DepositVerifier>) -> Self {
        self.deposits = Some(verifier);
        self
    }

    pub fn proof_verifier(mut self, verifier: Arc<dyn ProofVerifier>) -> Self {
        self.proofs = Some(verifier);
        self
    }

    pub fn build(self) -> Result<Protocol> {
        self.config.validate()?;

        let feed = match self.feed {
            Some(feed) => feed,
            None => default_feed(&self.config)?,
        };
        let max_age = Duration::from_secs(self.config.linking.proof_max_age_secs);

        Ok(Protocol {
            prices: PriceCache::new(feed, &self.config.prices),
            deposits: self
                .deposits
                .unwrap_or_else(|| Arc::new(StaticVerifier::new())),
            proofs: self
                .proofs
                .unwrap_or_else(|| Arc::new(FormatProofVerifier::new(max_age))),
            book: RwLock::new(Book::new(self.config.loans.term)),
            config: self.config,
        })
    }
}

#[cfg(feature = "coingecko")]
fn default_feed(config: &LendingConfig) -> Result<Arc<dyn PriceFeed>> {
    Ok(Arc::new(crate::coingecko::CoingeckoFeed::new(&config.prices)?))
}

#[cfg(not(feature = "coingecko"))]
fn default_feed(_config: &LendingConfig) -> Result<Arc<dyn PriceFeed>> {
    Ok(Arc::new(crate::price::StaticFeed::failing()))
}

impl Protocol {
    pub fn builder(config: LendingConfig) -> ProtocolBuilder {
        ProtocolBuilder {
            config,
            feed: None,
            deposits: None,
            proofs: None,
        }
    }

    pub fn config(&self) -> &LendingConfig {
        &self.config
    }

    pub async fn prices(&self) -> PriceSnapshot {
        self.prices.current().await
    }

    /// run `f` against a consistent view of the book
    pub async fn read<R>(&self, f: impl FnOnce(&Book) -> R) -> R {
        f(&*self.book.read().await)
    }

    // === deposits ===

    async fn ensure_unseen(&self, tx: &str) -> Result<()> {
        let book = self.book.read().await;
        if book.collateral.contains(tx) || book.lends.contains(tx) {
            return Err(Error::Conflict(format!("transaction {} already recorded", tx)));
        }
        Ok(())
    }

    /// verify a collateral transaction on its chain and record it
    pub async fn deposit_collateral(&self, chain: Chain, tx: &str) -> Result<CollateralRecord> {
        self.ensure_unseen(tx).await?;
        let deposit = verified_deposit(self.deposits.as_ref(), chain, tx).await?;
        self.book
            .write()
            .await
            .record_collateral(tx, chain, &deposit.depositor, deposit.amount, Utc::now())
    }

    /// verify a lend transaction on its chain and add it to the pool
    pub async fn deposit_lend(&self, chain: Chain, tx: &str) -> Result<LendRecord> {
        self.ensure_unseen(tx).await?;
        let deposit = verified_deposit(self.deposits.as_ref(), chain, tx).await?;
        self.book
            .write()
            .await
            .record_lend(tx, chain, &deposit.depositor, deposit.amount, Utc::now())
    }

    /// record an already-verified collateral deposit
    pub async fn record_collateral(
        &self,
        tx: &str,
        chain: Chain,
        owner: &Address,
        amount: Amount,
    ) -> Result<CollateralRecord> {
        self.book
            .write()
            .await
            .record_collateral(tx, chain, owner, amount, Utc::now())
    }

    /// record an already-verified lend deposit
    pub async fn record_lend(
        &self,
        tx: &str,
        chain: Chain,
        lender: &Address,
        amount: Amount,
    ) -> Result<LendRecord> {
        self.book
            .write()
            .await
            .record_lend(tx, chain, lender, amount, Utc::now())
    }

    pub async fn withdraw_collateral(
        &self,
        tx: &str,
        requester: &Address,
    ) -> Result<CollateralRecord> {
        self.book.write().await.withdraw_collateral(tx, requester)
    }

    // === loans ===

    pub async fn borrow(
        &self,
        borrower: &Address,
        collateral_tx: &str,
        chain: Chain,
        amount: Amount,
    ) -> Result<Loan> {
        let prices = self.prices.current().await;
        self.book
            .write()
            .await
            .open_loan(borrower, collateral_tx, chain, amount, &prices, Utc::now())
    }

    pub async fn repay(&self, loan_id: &str, repayment_tx: &str, chain: Chain) -> Result<Loan> {
        self.book
            .write()
            .await
            .repay_loan(loan_id, repayment_tx, chain, Utc::now())
    }

    pub async fn loan_status(&self, loan_id: &str) -> Result<LoanReport> {
        let prices = self.prices.current().await;
        self.book.read().await.loan_report(loan_id, &prices, Utc::now())
    }

    pub async fn user_loans(&self, address: &Address) -> UserLoans {
        self.book.read().await.user_loans(address, Utc::now())
    }

    pub async fn user_collaterals(&self, address: &Address) -> Vec<CollateralView> {
        self.book.read().await.user_collaterals(address)
    }

    pub async fn account(&self, address: &Address) -> Option<AccountState> {
        self.book.read().await.ledger.get(address).cloned()
    }

    // === pool ===

    pub async fn pool_overview(&self) -> PoolOverview {
        let prices = self.prices.current().await;
        self.book.read().await.pool().overview(&prices)
    }

    pub async fn pool_status(&self, chain: Chain) -> PoolStats {
        self.book.read().await.pool().stats(chain)
    }

    pub async fn liquidity(&self, chain: Chain) -> Liquidity {
        self.book.read().await.pool().liquidity(chain)
    }

    pub async fn lender_position(&self, address: &Address, chain: Chain) -> LenderPosition {
        self.book.read().await.pool().lender_position(address, chain)
    }

    // === identity ===

    /// message both wallets have to sign to link `eth` and `near`
    pub fn link_message(&self, eth: &Address, near: &Address) -> Result<LinkChallenge> {
        link_challenge(eth, near, Utc::now())
    }

    /// link an eth and a near address after checking both signatures
    pub async fn link_addresses(&self, req: &LinkRequest) -> Result<Identity> {
        let now = Utc::now();
        let max_age = Duration::from_secs(self.config.linking.proof_max_age_secs);
        validate_link_request(req, now, max_age)?;

        let proof = self.proofs.verify(req, now);
        if !proof.is_valid {
            return Err(Error::Validation("cross-chain proof verification failed".into()));
        }

        self.record_link(&Address::new(&req.eth_address), &Address::new(&req.near_address))
            .await
    }

    /// link an eth and a near address whose proof was already checked;
    /// the eth address becomes primary
    pub async fn record_link(&self, eth: &Address, near: &Address) -> Result<Identity> {
        if eth.chain() != Some(Chain::Eth) || near.chain() != Some(Chain::Near) {
            return Err(Error::Validation(format!(
                "expected an eth and a near address, got {} and {}",
                eth, near
            )));
        }
        let identity = self
            .book
            .write()
            .await
            .identities
            .link(eth, near, Some(eth), Utc::now())?;
        info!("addresses {} and {} resolve to {}", eth, near, identity.id);
        Ok(identity)
    }

    pub async fn profile(&self, address: &Address) -> Profile {
        self.book.read().await.identities.profile(address)
    }

    pub async fn linked_address(&self, address: &Address, chain: Chain) -> Option<Address> {
        self.book
            .read()
            .await
            .identities
            .linked_address(address, chain)
            .cloned()
    }

    pub async fn profiles(&self) -> Vec<Identity> {
        self.book
            .read()
            .await
            .identities
            .all()
            .into_iter()
            .cloned()
            .collect()
    }
}
