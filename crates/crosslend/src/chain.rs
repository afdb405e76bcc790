//! chains, addresses and fixed-point amounts
//!
//! every amount is an integer in the chain's minor unit (wei for eth,
//! yoctoNEAR for near). usd values are floats and only ever derived.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// amount in a chain's minor unit
pub type Amount = u128;

/// supported chains
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Eth,
    Near,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::Eth, Chain::Near];

    /// wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Eth => "eth",
            Chain::Near => "near",
        }
    }

    /// decimals of the native token
    pub fn decimals(&self) -> u32 {
        match self {
            Chain::Eth => 18,
            Chain::Near => 24,
        }
    }

    /// one whole token in minor units
    pub fn one(&self) -> Amount {
        10u128.pow(self.decimals())
    }

    /// whole tokens to minor units
    pub fn units(&self, whole: u64) -> Amount {
        whole as u128 * self.one()
    }

    /// minor units to a float token amount (display / valuation only)
    pub fn to_tokens(&self, amount: Amount) -> f64 {
        let one = self.one();
        (amount / one) as f64 + (amount % one) as f64 / one as f64
    }

    /// parse a decimal token string ("1.25") into minor units, exactly
    pub fn parse_amount(&self, s: &str) -> Result<Amount> {
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(Error::Validation(format!("empty amount for {}", self)));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Validation(format!("malformed amount '{}'", s)));
        }
        if frac.len() > self.decimals() as usize {
            return Err(Error::Validation(format!(
                "amount '{}' has more than {} decimals",
                s,
                self.decimals()
            )));
        }

        let overflow = || Error::Validation(format!("amount '{}' out of range", s));
        let whole: Amount = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let mut scaled_frac: Amount = if frac.is_empty() {
            0
        } else {
            frac.parse().map_err(|_| overflow())?
        };
        scaled_frac = scaled_frac
            .checked_mul(10u128.pow(self.decimals() - frac.len() as u32))
            .ok_or_else(overflow)?;

        whole
            .checked_mul(self.one())
            .and_then(|w| w.checked_add(scaled_frac))
            .ok_or_else(overflow)
    }

    /// parse an integer minor-unit string as reported by explorers
    pub fn parse_minor(&self, s: &str) -> Result<Amount> {
        s.trim()
            .parse::<Amount>()
            .map_err(|_| Error::Validation(format!("invalid {} amount '{}'", self, s)))
    }

    /// whether `address` is well formed for this chain
    pub fn is_valid_address(&self, address: &str) -> bool {
        match self {
            Chain::Eth => is_eth_address(address),
            Chain::Near => is_near_named(address) || is_near_implicit(address),
        }
    }

    /// chain whose address format matches, eth checked first
    pub fn detect(address: &str) -> Option<Chain> {
        Chain::ALL.into_iter().find(|c| c.is_valid_address(address))
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eth" => Ok(Chain::Eth),
            "near" => Ok(Chain::Near),
            other => Err(Error::Validation(format!(
                "chain must be 'eth' or 'near', got '{}'",
                other
            ))),
        }
    }
}

fn is_eth_address(s: &str) -> bool {
    match s.strip_prefix("0x") {
        Some(hex) => hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

fn is_near_named(s: &str) -> bool {
    let prefix = s
        .strip_suffix(".near")
        .or_else(|| s.strip_suffix(".testnet"));
    match prefix {
        Some(p) => {
            !p.is_empty()
                && p.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        }
        None => false,
    }
}

fn is_near_implicit(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// one value per chain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerChain<T> {
    pub eth: T,
    pub near: T,
}

impl<T> PerChain<T> {
    pub fn new(eth: T, near: T) -> Self {
        Self { eth, near }
    }

    /// build by evaluating `f` for each chain
    pub fn from_fn(mut f: impl FnMut(Chain) -> T) -> Self {
        Self {
            eth: f(Chain::Eth),
            near: f(Chain::Near),
        }
    }
}

impl<T> Index<Chain> for PerChain<T> {
    type Output = T;

    fn index(&self, chain: Chain) -> &T {
        match chain {
            Chain::Eth => &self.eth,
            Chain::Near => &self.near,
        }
    }
}

impl<T> IndexMut<Chain> for PerChain<T> {
    fn index_mut(&mut self, chain: Chain) -> &mut T {
        match chain {
            Chain::Eth => &mut self.eth,
            Chain::Near => &mut self.near,
        }
    }
}

/// raw chain address; eth addresses are lowercased so checksummed and plain
/// spellings land on the same account
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref().trim();
        if is_eth_address(raw) {
            Self(raw.to_ascii_lowercase())
        } else {
            Self(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// chain inferred from the address format
    pub fn chain(&self) -> Option<Chain> {
        Chain::detect(&self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::new(s)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address::new(s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

/// deposit / repayment transaction reference (tx hash)
pub type TxRef = String;
