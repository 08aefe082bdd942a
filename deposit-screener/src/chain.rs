// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Narrow views of the deposit manager contract and the event stream.

use crate::error::ScreenerResult;
use crate::types::{DepositEventBatch, DepositHash};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

/// On-chain rate limit bookkeeping of one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalCapState {
    /// Value completed since `last_reset_ms`
    pub running_total: U256,
    pub last_reset_ms: u64,
}

#[async_trait]
pub trait DepositManagerReader: Send + Sync {
    /// Whether the deposit is still waiting to be completed or retrieved
    async fn is_outstanding(&self, hash: DepositHash) -> ScreenerResult<bool>;

    async fn global_cap_state(&self, asset: Address) -> ScreenerResult<GlobalCapState>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCall {
    pub to: Address,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedTx {
    pub tx_hash: H256,
    pub block_number: u64,
    pub block_timestamp_ms: u64,
}

#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    async fn estimate_gas(&self, call: &CompletionCall) -> ScreenerResult<U256>;

    /// Broadcast and wait for inclusion
    async fn submit(&self, call: &CompletionCall, gas_limit: U256) -> ScreenerResult<SubmittedTx>;
}

/// Totally ordered, resumable stream of deposit manager events
#[async_trait]
pub trait DepositEventSource: Send + Sync {
    /// Next batch strictly after `after_checkpoint`, or `None` if nothing new
    /// is available yet. `None` as input means start from the beginning.
    async fn fetch_batch(
        &self,
        after_checkpoint: Option<u64>,
    ) -> ScreenerResult<Option<DepositEventBatch>>;
}
