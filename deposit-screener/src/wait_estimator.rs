// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Completion ETA from queue occupancy.
//!
//! A deposit waits for its own remaining delay plus the time the asset's
//! rate limit needs to drain the value queued ahead of it:
//!
//! ```text
//!   eta = value_ahead * period / global_cap + remaining_delay
//! ```
//!
//! Estimates only read queue state and never mutate it.

use crate::error::{ScreenerError, ScreenerResult};
use crate::queue::{JobQueue, JobState, QueueJob};
use crate::rules::ScreeningVerdict;
use crate::screener::{
    prospective_deposit, DepositScreener, FulfillmentQueues, ScreenerDelayCalculator,
};
use crate::types::{DepositHash, DepositRequestStatus, SupportedAsset, SupportedAssets};
use crate::utils::{now_ms, u256_to_u64_saturating};
use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::debug;

pub struct WaitEstimator {
    screener: DepositScreener,
    delay_calculator: Arc<dyn ScreenerDelayCalculator>,
    screener_queue: Arc<dyn JobQueue>,
    fulfillment_queues: Arc<FulfillmentQueues>,
    supported_assets: Arc<SupportedAssets>,
}

impl WaitEstimator {
    pub fn new(
        screener: DepositScreener,
        delay_calculator: Arc<dyn ScreenerDelayCalculator>,
        screener_queue: Arc<dyn JobQueue>,
        fulfillment_queues: Arc<FulfillmentQueues>,
        supported_assets: Arc<SupportedAssets>,
    ) -> Self {
        Self {
            screener,
            delay_calculator,
            screener_queue,
            fulfillment_queues,
            supported_assets,
        }
    }

    /// Seconds until a known deposit is expected to complete
    pub async fn estimate_wait_existing(
        &self,
        hash: DepositHash,
        status: DepositRequestStatus,
    ) -> ScreenerResult<u64> {
        let now = now_ms();
        match status {
            DepositRequestStatus::Completed => Ok(0),
            DepositRequestStatus::PassedFirstScreen => {
                let job = self
                    .screener_queue
                    .get_job(hash)
                    .await?
                    .filter(is_unfinished)
                    .ok_or(ScreenerError::JobNotFound(hash))?;
                let asset = self.asset_of(&job)?;
                let ahead = self
                    .value_ahead(self.screener_queue.as_ref(), &job, asset.address)
                    .await?
                    .saturating_add(self.fulfillment_backlog(asset.address).await?);
                Ok(value_to_seconds(ahead, asset)?
                    .saturating_add(ms_to_secs_ceil(job.remaining_delay_ms(now))))
            }
            DepositRequestStatus::AwaitingFulfillment => {
                let (queue, job) = self.find_fulfillment_job(hash).await?;
                let asset = self.asset_of(&job)?;
                let ahead = self.value_ahead(queue.as_ref(), &job, asset.address).await?;
                Ok(value_to_seconds(ahead, asset)?
                    .saturating_add(ms_to_secs_ceil(job.remaining_delay_ms(now))))
            }
            status => Err(ScreenerError::InvalidDepositStatus { hash, status }),
        }
    }

    /// Seconds a deposit made now would wait. Fails with `Rejected` if the
    /// deposit would not pass screening.
    pub async fn estimate_wait_prospective(
        &self,
        spender: Address,
        asset: Address,
        value: U256,
    ) -> ScreenerResult<u64> {
        let supported = self
            .supported_assets
            .get(&asset)
            .ok_or(ScreenerError::UnsupportedAsset(asset))?;
        let verdict = self.screener.screen_prospective(spender, asset, value).await?;
        let delay_seconds = match verdict {
            ScreeningVerdict::Rejection { reason } => return Err(ScreenerError::Rejected(reason)),
            ScreeningVerdict::Delay { time_seconds } => time_seconds,
        };
        let delay_ms = self
            .delay_calculator
            .calculate_delay_ms(&prospective_deposit(spender, asset, value), delay_seconds);

        // the queued job with the largest delay not above ours sits just
        // ahead of where this deposit would be inserted
        let mut closest: Option<QueueJob> = None;
        for job in self.pending_jobs(self.screener_queue.as_ref()).await? {
            if job.opts.delay_ms > delay_ms || job.deposit()?.asset_address() != asset {
                continue;
            }
            let replace = match &closest {
                Some(c) => (job.opts.delay_ms, job.order_key()) > (c.opts.delay_ms, c.order_key()),
                None => true,
            };
            if replace {
                closest = Some(job);
            }
        }

        let screened_ahead = match closest {
            Some(job) => {
                self.value_ahead(self.screener_queue.as_ref(), &job, asset)
                    .await?
            }
            None => U256::zero(),
        };
        let ahead = screened_ahead.saturating_add(self.fulfillment_backlog(asset).await?);
        debug!(
            "[WaitEstimator] Prospective deposit of {} {}: delay {}ms, {} ahead",
            value, supported.ticker, delay_ms, ahead
        );
        Ok(value_to_seconds(ahead, supported)?.saturating_add(ms_to_secs_ceil(delay_ms)))
    }

    fn asset_of(&self, job: &QueueJob) -> ScreenerResult<&SupportedAsset> {
        let address = job.deposit()?.asset_address();
        self.supported_assets
            .get(&address)
            .ok_or(ScreenerError::UnsupportedAsset(address))
    }

    async fn find_fulfillment_job(
        &self,
        hash: DepositHash,
    ) -> ScreenerResult<(Arc<dyn JobQueue>, QueueJob)> {
        for queue in self.fulfillment_queues.values() {
            if let Some(job) = queue.get_job(hash).await?.filter(is_unfinished) {
                return Ok((queue.clone(), job));
            }
        }
        Err(ScreenerError::JobNotFound(hash))
    }

    /// Waiting then delayed jobs, in delivery order
    async fn pending_jobs(&self, queue: &dyn JobQueue) -> ScreenerResult<Vec<QueueJob>> {
        let mut jobs = queue.get_waiting().await?;
        jobs.extend(queue.get_delayed().await?);
        jobs.sort_by_key(|j| j.order_key());
        Ok(jobs)
    }

    /// Same-asset value delivered before `target`, plus `target` itself
    async fn value_ahead(
        &self,
        queue: &dyn JobQueue,
        target: &QueueJob,
        asset: Address,
    ) -> ScreenerResult<U256> {
        let mut total = target.deposit()?.value;
        for job in self.pending_jobs(queue).await? {
            if job.id == target.id || job.order_key() >= target.order_key() {
                continue;
            }
            let deposit = job.deposit()?;
            if deposit.asset_address() == asset {
                total = total.saturating_add(deposit.value);
            }
        }
        Ok(total)
    }

    /// Total value queued for fulfillment of `asset`
    async fn fulfillment_backlog(&self, asset: Address) -> ScreenerResult<U256> {
        let Some(queue) = self.fulfillment_queues.get(&asset) else {
            return Ok(U256::zero());
        };
        let mut total = U256::zero();
        for job in self.pending_jobs(queue.as_ref()).await? {
            total = total.saturating_add(job.deposit()?.value);
        }
        Ok(total)
    }
}

// A completed or failed job no longer holds a queue position
fn is_unfinished(job: &QueueJob) -> bool {
    matches!(job.state, JobState::Pending | JobState::Active)
}

/// `value * period / cap`, the time the rate limit needs to admit `value`
pub fn value_to_seconds(value: U256, asset: &SupportedAsset) -> ScreenerResult<u64> {
    if asset.global_cap.is_zero() {
        return Err(ScreenerError::Internal(format!(
            "asset {} has a zero global cap",
            asset.ticker
        )));
    }
    let seconds = value.saturating_mul(U256::from(asset.period_secs())) / asset.global_cap;
    Ok(u256_to_u64_saturating(seconds))
}

fn ms_to_secs_ceil(ms: u64) -> u64 {
    ms.div_ceil(1000)
}
