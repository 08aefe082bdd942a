// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::ScreenerResult;
use crate::types::{DepositHash, DepositRequest, DepositRequestStatus};
use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FulfilledTotals {
    pub count: u64,
    pub value: U256,
}

/// Deposit records, statuses and the ingestion checkpoint.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn store_deposit_request(&self, deposit: &DepositRequest) -> ScreenerResult<()>;

    async fn get_deposit_request(&self, hash: DepositHash)
        -> ScreenerResult<Option<DepositRequest>>;

    /// `DoesNotExist` for unknown hashes
    async fn get_status(&self, hash: DepositHash) -> ScreenerResult<DepositRequestStatus>;

    /// Returns false and leaves the record untouched when the write would
    /// move the status backwards or out of a terminal state.
    async fn set_status(
        &self,
        hash: DepositHash,
        status: DepositRequestStatus,
    ) -> ScreenerResult<bool>;

    async fn get_checkpoint(&self) -> ScreenerResult<Option<u64>>;

    async fn set_checkpoint(&self, checkpoint: u64) -> ScreenerResult<()>;

    async fn record_fulfilled(&self, asset: Address, value: U256) -> ScreenerResult<()>;

    async fn get_fulfilled(&self, asset: Address) -> ScreenerResult<FulfilledTotals>;
}

#[derive(Default)]
struct Inner {
    requests: HashMap<DepositHash, DepositRequest>,
    statuses: HashMap<DepositHash, DepositRequestStatus>,
    checkpoint: Option<u64>,
    fulfilled: HashMap<Address, FulfilledTotals>,
}

#[derive(Default)]
pub struct InMemoryStatusStore {
    inner: RwLock<Inner>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn store_deposit_request(&self, deposit: &DepositRequest) -> ScreenerResult<()> {
        self.inner
            .write()
            .await
            .requests
            .insert(deposit.hash(), deposit.clone());
        Ok(())
    }

    async fn get_deposit_request(
        &self,
        hash: DepositHash,
    ) -> ScreenerResult<Option<DepositRequest>> {
        Ok(self.inner.read().await.requests.get(&hash).cloned())
    }

    async fn get_status(&self, hash: DepositHash) -> ScreenerResult<DepositRequestStatus> {
        Ok(self
            .inner
            .read()
            .await
            .statuses
            .get(&hash)
            .copied()
            .unwrap_or(DepositRequestStatus::DoesNotExist))
    }

    async fn set_status(
        &self,
        hash: DepositHash,
        status: DepositRequestStatus,
    ) -> ScreenerResult<bool> {
        let mut inner = self.inner.write().await;
        let current = inner
            .statuses
            .get(&hash)
            .copied()
            .unwrap_or(DepositRequestStatus::DoesNotExist);
        if !current.can_transition_to(status) {
            warn!(
                "[StatusStore] Refusing status change {} -> {} for deposit {}",
                current, status, hash
            );
            return Ok(false);
        }
        inner.statuses.insert(hash, status);
        Ok(true)
    }

    async fn get_checkpoint(&self) -> ScreenerResult<Option<u64>> {
        Ok(self.inner.read().await.checkpoint)
    }

    async fn set_checkpoint(&self, checkpoint: u64) -> ScreenerResult<()> {
        self.inner.write().await.checkpoint = Some(checkpoint);
        Ok(())
    }

    async fn record_fulfilled(&self, asset: Address, value: U256) -> ScreenerResult<()> {
        let mut inner = self.inner.write().await;
        let totals = inner.fulfilled.entry(asset).or_default();
        totals.count += 1;
        totals.value = totals.value.saturating_add(value);
        Ok(())
    }

    async fn get_fulfilled(&self, asset: Address) -> ScreenerResult<FulfilledTotals> {
        Ok(self
            .inner
            .read()
            .await
            .fulfilled
            .get(&asset)
            .copied()
            .unwrap_or_default())
    }
}
