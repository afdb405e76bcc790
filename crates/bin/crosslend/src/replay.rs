//! scripted replays
//!
//! a script is a list of steps run in order against a fresh protocol. every
//! step prints one json response line; a failing step does not stop the run.
//!
//! ```toml
//! [prices]
//! eth = 2000.0
//! near = 5.0
//!
//! [[step]]
//! op = "lend"
//! tx = "L1"
//! chain = "near"
//! from = "lender.near"
//! amount = "100"
//! ```

use anyhow::{Context, Result};
use crosslend::{Address, Chain, ErrorKind, LendingConfig, Protocol, Response, StaticFeed};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct Script {
    /// pin prices instead of asking coingecko
    pub prices: Option<FixedPrices>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct FixedPrices {
    pub eth: f64,
    pub near: f64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Lend {
        tx: String,
        chain: Chain,
        from: String,
        amount: String,
    },
    Collateral {
        tx: String,
        chain: Chain,
        from: String,
        amount: String,
    },
    Link {
        eth: String,
        near: String,
    },
    Borrow {
        /// name later steps use to refer to the loan
        label: Option<String>,
        borrower: String,
        collateral: String,
        chain: Chain,
        amount: String,
    },
    Repay {
        loan: String,
        tx: String,
        chain: Chain,
    },
    Withdraw {
        tx: String,
        requester: String,
    },
    Pool,
    Lender {
        address: String,
        chain: Chain,
    },
    Loans {
        address: String,
    },
}

impl Script {
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing replay script")
    }
}

/// how one step ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub step: usize,
    pub success: bool,
    pub error: Option<ErrorKind>,
}

fn line<T: Serialize>(
    outcomes: &mut Vec<Outcome>,
    step: usize,
    response: Response<T>,
) -> Result<()> {
    let out = serde_json::json!({ "step": step, "response": &response });
    println!("{}", serde_json::to_string(&out)?);
    outcomes.push(Outcome {
        step,
        success: response.success,
        error: response.error,
    });
    Ok(())
}

/// run every step, printing its response; returns one outcome per step
pub async fn run(config: LendingConfig, script: Script) -> Result<Vec<Outcome>> {
    let mut builder = Protocol::builder(config);
    if let Some(p) = &script.prices {
        builder = builder.price_feed(Arc::new(StaticFeed::new(p.eth, p.near)));
    }
    let protocol = builder.build()?;
    // script labels -> loan ids
    let mut labels: HashMap<String, String> = HashMap::new();
    let mut outcomes = Vec::with_capacity(script.steps.len());

    for (i, step) in script.steps.into_iter().enumerate() {
        match step {
            Step::Lend { tx, chain, from, amount } => {
                let result = match chain.parse_amount(&amount) {
                    Ok(amount) => {
                        protocol
                            .record_lend(&tx, chain, &Address::new(from), amount)
                            .await
                    }
                    Err(e) => Err(e),
                };
                line(&mut outcomes, i, Response::from_result(result, "lend recorded"))?;
            }
            Step::Collateral { tx, chain, from, amount } => {
                let result = match chain.parse_amount(&amount) {
                    Ok(amount) => {
                        protocol
                            .record_collateral(&tx, chain, &Address::new(from), amount)
                            .await
                    }
                    Err(e) => Err(e),
                };
                line(&mut outcomes, i, Response::from_result(result, "collateral recorded"))?;
            }
            Step::Link { eth, near } => {
                let result = protocol.record_link(&Address::new(eth), &Address::new(near)).await;
                line(&mut outcomes, i, Response::from_result(result, "addresses linked"))?;
            }
            Step::Borrow { label, borrower, collateral, chain, amount } => {
                let result = match chain.parse_amount(&amount) {
                    Ok(amount) => {
                        protocol
                            .borrow(&Address::new(borrower), &collateral, chain, amount)
                            .await
                    }
                    Err(e) => Err(e),
                };
                if let (Some(label), Ok(loan)) = (label, &result) {
                    labels.insert(label, loan.id.clone());
                }
                line(&mut outcomes, i, Response::from_result(result, "loan created"))?;
            }
            Step::Repay { loan, tx, chain } => {
                let id = labels.get(&loan).cloned().unwrap_or(loan);
                let result = protocol.repay(&id, &tx, chain).await;
                line(&mut outcomes, i, Response::from_result(result, "loan repaid"))?;
            }
            Step::Withdraw { tx, requester } => {
                let result = protocol
                    .withdraw_collateral(&tx, &Address::new(requester))
                    .await;
                line(&mut outcomes, i, Response::from_result(result, "collateral withdrawn"))?;
            }
            Step::Pool => {
                let overview = protocol.pool_overview().await;
                line(&mut outcomes, i, Response::ok("pool overview", overview))?;
            }
            Step::Lender { address, chain } => {
                let position = protocol.lender_position(&Address::new(address), chain).await;
                line(&mut outcomes, i, Response::ok("lender position", position))?;
            }
            Step::Loans { address } => {
                let loans = protocol.user_loans(&Address::new(address)).await;
                line(&mut outcomes, i, Response::ok("user loans", loans))?;
            }
        }
    }
    Ok(outcomes)
}
