//! cross-chain link proofs
//!
//! both wallets sign the same link message. cryptographic recovery lives
//! behind `ProofVerifier`; the bundled verifier only checks signature shape
//! and timestamp freshness.

use crate::chain::{Address, Chain};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// request to link an eth and a near address
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkRequest {
    pub eth_address: String,
    pub near_address: String,
    pub eth_signature: String,
    pub near_signature: String,
    /// unix millis the message was generated at
    pub timestamp: i64,
}

/// verifier outcome
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CrossChainProof {
    pub eth_address: String,
    pub near_address: String,
    pub message: String,
    pub is_valid: bool,
}

/// the exact text both wallets must sign
pub fn link_message(eth_address: &str, near_address: &str, timestamp_ms: i64) -> String {
    format!(
        "Link addresses: ETH {} <-> NEAR {} at {}",
        eth_address, near_address, timestamp_ms
    )
}

/// message + timestamp a client should sign now
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkChallenge {
    pub message: String,
    pub timestamp: i64,
}

pub fn link_challenge(eth: &Address, near: &Address, now: DateTime<Utc>) -> Result<LinkChallenge> {
    if !Chain::Eth.is_valid_address(eth.as_str()) {
        return Err(Error::Validation("Invalid Ethereum address format".into()));
    }
    if !Chain::Near.is_valid_address(near.as_str()) {
        return Err(Error::Validation("Invalid NEAR address format".into()));
    }
    let timestamp = now.timestamp_millis();
    Ok(LinkChallenge {
        message: link_message(eth.as_str(), near.as_str(), timestamp),
        timestamp,
    })
}

/// timestamp lies within `max_age` of `now`, either direction
pub fn is_timestamp_fresh(timestamp_ms: i64, now: DateTime<Utc>, max_age: Duration) -> bool {
    let skew = (now.timestamp_millis() - timestamp_ms).unsigned_abs();
    skew <= max_age.as_millis() as u64
}

pub fn is_eth_signature(sig: &str) -> bool {
    match sig.strip_prefix("0x") {
        Some(hex) => hex.len() == 130 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

pub fn is_near_signature(sig: &str) -> bool {
    let body = sig.strip_prefix("ed25519:").unwrap_or(sig);
    let data = body.trim_end_matches('=');
    !data.is_empty() && data.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/')
}

/// check every field of a link request, reporting all problems at once
pub fn validate_link_request(
    req: &LinkRequest,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<()> {
    let mut errors = Vec::new();

    if !Chain::Eth.is_valid_address(&req.eth_address) {
        errors.push("Invalid Ethereum address format");
    }
    if !Chain::Near.is_valid_address(&req.near_address) {
        errors.push("Invalid NEAR address format");
    }
    if !is_eth_signature(&req.eth_signature) {
        errors.push("Invalid Ethereum signature format");
    }
    if !is_near_signature(&req.near_signature) {
        errors.push("Invalid NEAR signature format");
    }
    if !is_timestamp_fresh(req.timestamp, now, max_age) {
        errors.push("Timestamp is too old or invalid");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors.join("; ")))
    }
}

/// signature / proof checking collaborator
pub trait ProofVerifier: Send + Sync {
    fn verify(&self, req: &LinkRequest, now: DateTime<Utc>) -> CrossChainProof;
}

/// accepts any well-formed signature pair with a fresh timestamp
#[derive(Clone, Debug)]
pub struct FormatProofVerifier {
    max_age: Duration,
}

impl FormatProofVerifier {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

impl ProofVerifier for FormatProofVerifier {
    fn verify(&self, req: &LinkRequest, now: DateTime<Utc>) -> CrossChainProof {
        let is_valid = is_timestamp_fresh(req.timestamp, now, self.max_age)
            && is_eth_signature(&req.eth_signature)
            && is_near_signature(&req.near_signature);

        CrossChainProof {
            eth_address: req.eth_address.clone(),
            near_address: req.near_address.clone(),
            message: link_message(&req.eth_address, &req.near_address, req.timestamp),
            is_valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_MIN: Duration = Duration::from_secs(600);

    fn request(now: DateTime<Utc>) -> LinkRequest {
        LinkRequest {
            eth_address: format!("0x{}", "ab".repeat(20)),
            near_address: "alice.testnet".into(),
            eth_signature: format!("0x{}", "1f".repeat(65)),
            near_signature: "ed25519:3Jd8fQ+/x0Ab==".into(),
            timestamp: now.timestamp_millis(),
        }
    }

    #[test]
    fn test_message_format() {
        assert_eq!(
            link_message("0xabc", "a.near", 42),
            "Link addresses: ETH 0xabc <-> NEAR a.near at 42"
        );
    }

    #[test]
    fn test_timestamp_window() {
        let now = Utc::now();
        let ms = now.timestamp_millis();
        assert!(is_timestamp_fresh(ms - 599_000, now, TEN_MIN));
        assert!(is_timestamp_fresh(ms + 599_000, now, TEN_MIN));
        assert!(!is_timestamp_fresh(ms - 601_000, now, TEN_MIN));
    }

    #[test]
    fn test_signature_shapes() {
        assert!(is_near_signature("c2lnbmF0dXJl"));
        assert!(is_near_signature("ed25519:c2lnbmF0dXJl=="));
        assert!(!is_near_signature("ed25519:"));
        assert!(!is_near_signature("not base64!"));
        assert!(!is_eth_signature("0x1234"));
    }

    #[test]
    fn test_verify_valid_request() {
        let now = Utc::now();
        let req = request(now);
        assert!(validate_link_request(&req, now, TEN_MIN).is_ok());
        let proof = FormatProofVerifier::new(TEN_MIN).verify(&req, now);
        assert!(proof.is_valid);
        assert!(proof.message.contains("alice.testnet"));
    }

    #[test]
    fn test_collects_all_errors() {
        let now = Utc::now();
        let mut req = request(now);
        req.eth_address = "0x12".into();
        req.near_signature = "!!".into();
        req.timestamp -= 3_600_000;

        let err = validate_link_request(&req, now, TEN_MIN).unwrap_err().to_string();
        assert!(err.contains("Invalid Ethereum address format"));
        assert!(err.contains("Invalid NEAR signature format"));
        assert!(err.contains("Timestamp is too old"));
        assert!(!FormatProofVerifier::new(TEN_MIN).verify(&req, now).is_valid);
    }

    #[test]
    fn test_challenge_rejects_bad_addresses() {
        let now = Utc::now();
        assert!(link_challenge(&Address::new("x"), &Address::new("a.near"), now).is_err());
        let c = link_challenge(
            &Address::new(format!("0x{}", "ab".repeat(20))),
            &Address::new("a.near"),
            now,
        )
        .unwrap();
        assert_eq!(c.timestamp, now.timestamp_millis());
    }
}
