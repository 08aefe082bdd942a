// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Deposit manager events read from logs in confirmed block ranges.
//!
//! The checkpoint of a batch is the last block of its range, so resuming
//! after a checkpoint never skips or repeats a block.

use crate::chain::DepositEventSource;
use crate::error::{ScreenerError, ScreenerResult};
use crate::types::{DepositEvent, DepositEventBatch, DepositEventKind, DepositRequest};
use async_trait::async_trait;
use ethers::abi::decode;
use ethers::providers::Middleware;
use ethers::types::{Address, Filter, Log, H256};
use ethers::utils::keccak256;
use std::sync::Arc;
use tap::TapFallible;
use tracing::{debug, warn};

const DEPOSIT_REQUEST_TUPLE: &str =
    "(address,(address,uint256),uint256,(uint256,uint256),uint256,uint256)";

pub fn event_signature(kind: DepositEventKind) -> String {
    let name = match kind {
        DepositEventKind::Instantiated => "DepositInstantiated",
        DepositEventKind::Retrieved => "DepositRetrieved",
        DepositEventKind::Completed => "DepositCompleted",
    };
    format!("{}(bytes32,{})", name, DEPOSIT_REQUEST_TUPLE)
}

pub fn event_topic(kind: DepositEventKind) -> H256 {
    H256::from(keccak256(event_signature(kind)))
}

const EVENT_KINDS: [DepositEventKind; 3] = [
    DepositEventKind::Instantiated,
    DepositEventKind::Retrieved,
    DepositEventKind::Completed,
];

pub struct EthDepositEventSource<M> {
    client: Arc<M>,
    deposit_manager: Address,
    start_block: u64,
    block_range: u64,
    confirmations: u64,
}

impl<M> EthDepositEventSource<M>
where
    M: Middleware + 'static,
{
    pub fn new(
        client: Arc<M>,
        deposit_manager: Address,
        start_block: u64,
        block_range: u64,
        confirmations: u64,
    ) -> Self {
        Self {
            client,
            deposit_manager,
            start_block,
            block_range: block_range.max(1),
            confirmations,
        }
    }

    fn parse_log(log: &Log) -> ScreenerResult<Option<DepositEvent>> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let Some(kind) = EVENT_KINDS.into_iter().find(|k| event_topic(*k) == *topic0) else {
            return Ok(None);
        };
        let request = decode(&[DepositRequest::param_type()], &log.data)
            .ok()
            .and_then(|tokens| tokens.into_iter().next())
            .and_then(DepositRequest::from_token)
            .ok_or_else(|| {
                ScreenerError::Serialization(format!(
                    "undecodable {:?} event in tx {:?}",
                    kind, log.transaction_hash
                ))
            })?;
        if let Some(indexed_hash) = log.topics.get(1) {
            if *indexed_hash != request.hash().0 {
                warn!(
                    "[EthEventSource] Indexed hash {:?} differs from computed {} in tx {:?}",
                    indexed_hash,
                    request.hash(),
                    log.transaction_hash
                );
            }
        }
        let block_number = log
            .block_number
            .ok_or_else(|| ScreenerError::ChainRead("log without block number".to_string()))?;
        Ok(Some(DepositEvent {
            kind,
            request,
            block_number: block_number.as_u64(),
            tx_hash: log.transaction_hash,
        }))
    }
}

#[async_trait]
impl<M> DepositEventSource for EthDepositEventSource<M>
where
    M: Middleware + 'static,
{
    async fn fetch_batch(
        &self,
        after_checkpoint: Option<u64>,
    ) -> ScreenerResult<Option<DepositEventBatch>> {
        let from = after_checkpoint
            .map(|c| c + 1)
            .unwrap_or(self.start_block)
            .max(self.start_block);
        let latest = self
            .client
            .get_block_number()
            .await
            .map_err(|e| ScreenerError::ChainRead(e.to_string()))?
            .as_u64();
        let confirmed = latest.saturating_sub(self.confirmations);
        if from > confirmed {
            return Ok(None);
        }
        let to = confirmed.min(from + self.block_range - 1);
        let filter = Filter::new()
            .address(self.deposit_manager)
            .from_block(from)
            .to_block(to)
            .events(EVENT_KINDS.map(event_signature));
        let mut logs = self
            .client
            .get_logs(&filter)
            .await
            .map_err(|e| ScreenerError::ChainRead(e.to_string()))
            .tap_err(|e| {
                tracing::error!(
                    "[EthEventSource] get_logs failed for blocks {}..={}: {:?}",
                    from,
                    to,
                    e
                )
            })?;
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            if log.address != self.deposit_manager {
                return Err(ScreenerError::ChainRead(format!(
                    "provider returned a log from {:?}",
                    log.address
                )));
            }
            if let Some(event) = Self::parse_log(log)? {
                events.push(event);
            }
        }
        debug!(
            "[EthEventSource] Blocks {}..={} yielded {} events",
            from,
            to,
            events.len()
        );
        Ok(Some(DepositEventBatch {
            checkpoint: to,
            events,
        }))
    }
}
