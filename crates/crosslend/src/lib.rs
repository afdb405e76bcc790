//! # crosslend
//!
//! in-memory ledger for a cross-chain collateralized lending pool.
//!
//! borrowers lock collateral on eth or near and draw from a shared pool that
//! lenders fund on either chain. addresses on the two chains can be linked
//! into one identity, so collateral deposited on near can back a loan taken
//! from the linked eth address.
//!
//! ## data flow
//!
//! ```text
//!   deposit tx ──► DepositVerifier ──► CollateralRegister / LendBook
//!                                              │
//!   borrow ──► IdentityDirectory (access)      │
//!          ──► PriceCache (valuation)          ▼
//!          ──► PoolAllocator (liquidity) ──► LendLocks ──► Loan (active)
//!                                                              │
//!   repay  ──► unlock collateral + lend locks ◄────────────────┘
//! ```
//!
//! every mutation runs inside one write section of [`Protocol`]; prices and
//! deposit proofs are fetched before the section is entered.
//!
//! ## usage
//!
//! ```rust,ignore
//! use crosslend::{Chain, Protocol, LendingConfig};
//!
//! let protocol = Protocol::builder(LendingConfig::default()).build()?;
//! protocol.record_lend("0xlend", Chain::Eth, &lender, Chain::Eth.units(100)).await?;
//! protocol.record_collateral("near_tx", Chain::Near, &borrower, Chain::Near.units(200)).await?;
//! let loan = protocol.borrow(&borrower, "near_tx", Chain::Eth, Chain::Eth.units(50)).await?;
//! ```

pub mod chain;
pub mod collateral;
pub mod config;
pub mod deposit;
pub mod engine;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod loan;
pub mod pool;
pub mod price;
pub mod proof;
pub mod protocol;
pub mod response;

#[cfg(feature = "coingecko")]
pub mod coingecko;

pub use chain::{Address, Amount, Chain, PerChain, TxRef};
pub use config::{LendingConfig, TermMode};
pub use engine::Book;
pub use error::{Error, ErrorKind, Result};
pub use identity::{Identity, IdentityDirectory};
pub use loan::{Loan, LoanStatus, LoanSummary};
pub use price::{PriceCache, PriceFeed, PriceSnapshot, StaticFeed};
pub use protocol::Protocol;
pub use response::Response;

/// borrow apy, percent
pub const BORROW_APY: u128 = 7;

/// lender apy, percent
pub const LEND_APY: u128 = 5;

/// loan term in calendar months
pub const LOAN_TERM_MONTHS: u32 = 3;

/// share of collateral usd value that may be borrowed, percent
pub const COLLATERAL_RATIO: u32 = 80;

/// loan term under `TermMode::Accelerated`
pub const ACCELERATED_TERM_MINUTES: i64 = 3;

/// used when the price feed never answered
pub const FALLBACK_ETH_USD: f64 = 2000.0;
pub const FALLBACK_NEAR_USD: f64 = 5.0;

/// generate a record id like `loan_1718000000000_9f2c01ab33de`
pub fn new_id(prefix: &str) -> String {
    format!(
        "{}_{}_{}",
        prefix,
        chrono::Utc::now().timestamp_millis(),
        hex::encode(rand::random::<[u8; 6]>())
    )
}
