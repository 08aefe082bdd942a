// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Two-phase deposit screening.
//!
//! ```text
//!   events ──► Ingestor (pass 1) ──► screener queue ──► Arbiter (pass 2) ──► fulfillment queue[asset]
//!                  │ reject                 (delay)          │ reject
//!                  ▼                                         ▼
//!             FailedScreen                              FailedScreen
//! ```

pub mod arbiter;
pub mod delay;
pub mod ingestion;

pub use arbiter::Arbiter;
pub use delay::{FixedDelayCalculator, ScreenerDelayCalculator, VerdictDelayCalculator};
pub use ingestion::{IngestOutcome, Ingestor};

use crate::error::ScreenerResult;
use crate::metrics::ScreenerMetrics;
use crate::queue::JobQueue;
use crate::rules::{RuleSet, ScreeningVerdict};
use crate::types::{Asset, DepositHash, DepositRequest, StealthAddress};
use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// One fulfillment queue per supported asset, keyed by token address
pub type FulfillmentQueues = HashMap<Address, Arc<dyn JobQueue>>;

pub const SCREENER_QUEUE_NAME: &str = "screener";

pub fn fulfillment_queue_name(ticker: &str) -> String {
    format!("fulfiller-{}", ticker)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreeningPass {
    First,
    Second,
}

impl ScreeningPass {
    pub fn label(&self) -> &'static str {
        match self {
            ScreeningPass::First => "first",
            ScreeningPass::Second => "second",
        }
    }

    pub(crate) fn record(
        &self,
        metrics: &ScreenerMetrics,
        hash: &DepositHash,
        verdict: &ScreeningVerdict,
    ) {
        info!(
            "[Screener] pass={} deposit={} verdict={:?}",
            self.label(),
            hash,
            verdict
        );
        metrics
            .screening_verdicts
            .with_label_values(&[self.label(), verdict.label()])
            .inc();
    }
}

/// Read-only screening entry point for callers outside the pipeline
#[derive(Clone)]
pub struct DepositScreener {
    rule_set: Arc<RuleSet>,
}

impl DepositScreener {
    pub fn new(rule_set: Arc<RuleSet>) -> Self {
        Self { rule_set }
    }

    pub async fn screen(&self, deposit: &DepositRequest) -> ScreenerResult<ScreeningVerdict> {
        self.rule_set.check(deposit).await
    }

    /// Screen a deposit that has not been made yet. Only the fields a
    /// depositor commits to up front are known; the rest are zero.
    pub async fn screen_prospective(
        &self,
        spender: Address,
        asset: Address,
        value: U256,
    ) -> ScreenerResult<ScreeningVerdict> {
        self.screen(&prospective_deposit(spender, asset, value)).await
    }
}

pub fn prospective_deposit(spender: Address, asset: Address, value: U256) -> DepositRequest {
    DepositRequest {
        spender,
        asset: Asset::erc20(asset),
        value,
        deposit_addr: StealthAddress::default(),
        nonce: U256::zero(),
        gas_compensation: U256::zero(),
    }
}
