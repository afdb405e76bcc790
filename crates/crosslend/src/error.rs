//! error types for crosslend

use crate::chain::{Amount, Chain};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// malformed or missing input
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} is locked by an active loan")]
    Locked(String),

    #[error("invalid collateral: {0}")]
    InvalidCollateral(String),

    #[error("insufficient liquidity: need {requested} {chain} minor units, only {available} available")]
    InsufficientLiquidity {
        chain: Chain,
        requested: Amount,
        available: Amount,
    },

    #[error("borrow amount exceeds collateral limit: maximum borrowable is {max_tokens:.6} {chain} (${max_usd:.2})")]
    ExceedsCollateralLimit {
        chain: Chain,
        max_usd: f64,
        max_tokens: f64,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("repayment must be made on {expected}, got {got}")]
    ChainMismatch { expected: Chain, got: Chain },

    // === collaborator / io errors ===
    #[error("price feed error: {0}")]
    PriceFeed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// coarse classification for the routing layer's status mapping
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    Locked,
    InsufficientLiquidity,
    ExceedsCollateralLimit,
    InvalidState,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::ChainMismatch { .. } => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Locked(_) => ErrorKind::Locked,
            Error::InvalidCollateral(_) => ErrorKind::Validation,
            Error::InsufficientLiquidity { .. } => ErrorKind::InsufficientLiquidity,
            Error::ExceedsCollateralLimit { .. } => ErrorKind::ExceedsCollateralLimit,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::PriceFeed(_) | Error::Config(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::NotFound("loan x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::ChainMismatch { expected: Chain::Eth, got: Chain::Near }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::PriceFeed("timeout".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_messages() {
        let e = Error::InsufficientLiquidity { chain: Chain::Eth, requested: 10, available: 4 };
        assert_eq!(
            e.to_string(),
            "insufficient liquidity: need 10 eth minor units, only 4 available"
        );
        assert_eq!(Error::NotFound("loan loan_1".into()).to_string(), "loan loan_1 not found");
    }
}
