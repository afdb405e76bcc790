//! deposit intake
//!
//! the verifier looks a transaction up on the chain's explorer; this module
//! only turns its payload into a depositor and an amount.

use crate::chain::{Address, Amount, Chain};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// what the explorer said about a transaction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerifierReport {
    pub success: bool,
    pub message: String,
    pub data: Option<Value>,
}

#[async_trait]
pub trait DepositVerifier: Send + Sync {
    async fn verify(&self, chain: Chain, tx: &str) -> Result<VerifierReport>;
}

/// depositor and amount pulled from a verified transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Deposit {
    pub depositor: Address,
    pub amount: Amount,
}

// near explorer: receipts[0].receipt_tree.{predecessor_account_id, actions[0].args.deposit}

#[derive(Deserialize)]
struct NearTx {
    #[serde(default)]
    receipts: Vec<NearReceipt>,
}

#[derive(Deserialize)]
struct NearReceipt {
    receipt_tree: Option<NearReceiptTree>,
}

#[derive(Deserialize)]
struct NearReceiptTree {
    predecessor_account_id: Option<String>,
    #[serde(default)]
    actions: Vec<NearAction>,
}

#[derive(Deserialize)]
struct NearAction {
    args: Option<NearArgs>,
}

#[derive(Deserialize)]
struct NearArgs {
    deposit: Option<MinorUnits>,
}

// eth explorer: from.hash, value

#[derive(Deserialize)]
struct EthTx {
    from: Option<EthSender>,
    value: Option<MinorUnits>,
}

#[derive(Deserialize)]
struct EthSender {
    hash: Option<String>,
}

/// explorers send big integers as strings, small ones sometimes as numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum MinorUnits {
    Text(String),
    Number(u64),
}

impl MinorUnits {
    fn parse(&self, chain: Chain) -> Result<Amount> {
        match self {
            MinorUnits::Text(s) => chain.parse_minor(s),
            MinorUnits::Number(n) => Ok(*n as Amount),
        }
    }
}

fn malformed(msg: &str) -> Error {
    Error::Validation(msg.to_string())
}

/// pull `{depositor, amount}` out of a verifier payload
pub fn extract_deposit(chain: Chain, data: &Value) -> Result<Deposit> {
    let (depositor, amount) = match chain {
        Chain::Near => {
            let tx = NearTx::deserialize(data)
                .map_err(|e| malformed(&format!("invalid transaction structure: {}", e)))?;
            let tree = tx
                .receipts
                .into_iter()
                .next()
                .ok_or_else(|| malformed("no receipts found in transaction"))?
                .receipt_tree
                .ok_or_else(|| malformed("invalid transaction structure"))?;
            let depositor = tree
                .predecessor_account_id
                .ok_or_else(|| malformed("invalid transaction structure"))?;
            let amount = tree
                .actions
                .first()
                .and_then(|a| a.args.as_ref())
                .and_then(|args| args.deposit.as_ref())
                .ok_or_else(|| malformed("no deposit amount found in transaction"))?
                .parse(chain)?;
            (depositor, amount)
        }
        Chain::Eth => {
            let tx = EthTx::deserialize(data)
                .map_err(|e| malformed(&format!("invalid eth transaction structure: {}", e)))?;
            let depositor = tx
                .from
                .and_then(|f| f.hash)
                .ok_or_else(|| malformed("invalid eth transaction structure"))?;
            let amount = tx
                .value
                .ok_or_else(|| malformed("invalid eth transaction structure"))?
                .parse(chain)?;
            (depositor, amount)
        }
    };

    if amount == 0 {
        return Err(malformed("deposit amount must be positive"));
    }
    Ok(Deposit {
        depositor: Address::new(depositor),
        amount,
    })
}

/// run the verifier and extract the deposit it reports
pub async fn verified_deposit(
    verifier: &dyn DepositVerifier,
    chain: Chain,
    tx: &str,
) -> Result<Deposit> {
    let report = verifier.verify(chain, tx).await?;
    if !report.success {
        return Err(Error::Validation(report.message));
    }
    let data = report
        .data
        .ok_or_else(|| Error::Internal("no transaction data received".into()))?;
    extract_deposit(chain, &data)
}

/// canned explorer answers keyed by chain and tx; unknown txs fail verification
#[derive(Default)]
pub struct StaticVerifier {
    reports: RwLock<HashMap<(Chain, String), VerifierReport>>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, chain: Chain, tx: &str, data: Value) {
        let report = VerifierReport {
            success: true,
            message: "transaction verified".into(),
            data: Some(data),
        };
        self.reports.write().await.insert((chain, tx.to_string()), report);
    }
}

#[async_trait]
impl DepositVerifier for StaticVerifier {
    async fn verify(&self, chain: Chain, tx: &str) -> Result<VerifierReport> {
        let reports = self.reports.read().await;
        Ok(reports
            .get(&(chain, tx.to_string()))
            .cloned()
            .unwrap_or_else(|| VerifierReport {
                success: false,
                message: format!("transaction {} not found on {}", tx, chain),
                data: None,
            }))
    }
}

/// explorer payload shapes, for tests and replays
pub fn near_payload(sender: &str, deposit: Amount) -> Value {
    serde_json::json!({
        "receipts": [{
            "receipt_tree": {
                "predecessor_account_id": sender,
                "actions": [{ "args": { "deposit": deposit.to_string() } }]
            }
        }]
    })
}

pub fn eth_payload(sender: &str, value: Amount) -> Value {
    serde_json::json!({
        "from": { "hash": sender },
        "value": value.to_string()
    })
}
