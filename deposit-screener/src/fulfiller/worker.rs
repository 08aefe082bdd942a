// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::SignerLock;
use crate::chain::{DepositManagerReader, SubmittedTx, TransactionSubmitter};
use crate::error::{JobError, ScreenerError, ScreenerResult};
use crate::metrics::ScreenerMetrics;
use crate::queue::{JobProcessor, QueueJob};
use crate::rate_limit::{RateLimitWindow, RateLimitWindowEntry};
use crate::signer::DepositCompletionSigner;
use crate::store::StatusStore;
use crate::types::{DepositHash, DepositRequest, DepositRequestStatus, SupportedAsset};
use crate::utils::{apply_multiplier, now_ms, u256_to_u64_saturating};
use async_trait::async_trait;
use ethers::types::U256;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FulfillerConfig {
    /// Attempts of the whole sign and submit step before the job attempt fails
    pub submit_attempts: u32,
    /// Safety margin applied to the gas estimate
    pub gas_multiplier: f64,
}

impl Default for FulfillerConfig {
    fn default() -> Self {
        Self {
            submit_attempts: 3,
            gas_multiplier: 1.5,
        }
    }
}

pub struct FulfillerWorker {
    asset: SupportedAsset,
    window: Mutex<RateLimitWindow>,
    chain: Arc<dyn DepositManagerReader>,
    submitter: Arc<dyn TransactionSubmitter>,
    signer: SignerLock,
    store: Arc<dyn StatusStore>,
    /// Landed on-chain but not yet recorded in the store
    unrecorded: Mutex<HashSet<DepositHash>>,
    config: FulfillerConfig,
    metrics: Arc<ScreenerMetrics>,
}

impl FulfillerWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        asset: SupportedAsset,
        window: RateLimitWindow,
        chain: Arc<dyn DepositManagerReader>,
        submitter: Arc<dyn TransactionSubmitter>,
        signer: SignerLock,
        store: Arc<dyn StatusStore>,
        config: FulfillerConfig,
        metrics: Arc<ScreenerMetrics>,
    ) -> Self {
        Self {
            asset,
            window: Mutex::new(window),
            chain,
            submitter,
            signer,
            store,
            unrecorded: Mutex::new(HashSet::new()),
            config,
            metrics,
        }
    }

    pub fn asset(&self) -> &SupportedAsset {
        &self.asset
    }

    pub async fn window_snapshot(&self) -> RateLimitWindow {
        self.window.lock().await.clone()
    }

    async fn sign_and_submit(
        &self,
        signer: &DepositCompletionSigner,
        deposit: &DepositRequest,
    ) -> ScreenerResult<SubmittedTx> {
        self.metrics
            .submission_attempts
            .with_label_values(&[&self.asset.ticker])
            .inc();
        let signature = signer.sign(deposit)?;
        let call = signer.completion_call(deposit, &signature);
        let gas = self.submitter.estimate_gas(&call).await?;
        let gas_limit = apply_multiplier(gas, self.config.gas_multiplier);
        self.submitter.submit(&call, gas_limit).await
    }

    async fn record_completion(&self, deposit: &DepositRequest) -> ScreenerResult<()> {
        self.store
            .set_status(deposit.hash(), DepositRequestStatus::Completed)
            .await?;
        self.store
            .record_fulfilled(self.asset.address, deposit.value)
            .await
    }
}

/// Time until evictions free `amount`. Eviction is strict, an entry still
/// counts at exactly `timestamp + period`, so wake one ms after that.
fn rate_limit_delay_ms(window: &RateLimitWindow, amount: U256, now_ms: u64) -> u64 {
    window
        .time_when_amount_available(amount)
        .map_or(1, |available_at| {
            available_at.saturating_add(1).saturating_sub(now_ms)
        })
        .max(1)
}

#[async_trait]
impl JobProcessor for FulfillerWorker {
    async fn process(&self, job: &QueueJob) -> Result<(), JobError> {
        let ticker = self.asset.ticker.as_str();
        let deposit = job.deposit()?;
        let hash = deposit.hash();
        if deposit.asset_address() != self.asset.address {
            return Err(JobError::Fatal(ScreenerError::UnsupportedAsset(
                deposit.asset_address(),
            )));
        }

        if !self.chain.is_outstanding(hash).await? {
            if self.unrecorded.lock().await.contains(&hash) {
                info!(
                    "[Fulfiller:{}] Deposit {} landed earlier, recording completion",
                    ticker, hash
                );
                self.record_completion(&deposit).await?;
                self.unrecorded.lock().await.remove(&hash);
                return Ok(());
            }
            info!(
                "[Fulfiller:{}] Deposit {} no longer outstanding, skipping",
                ticker, hash
            );
            self.metrics
                .deposits_skipped
                .with_label_values(&["fulfiller", "not_outstanding"])
                .inc();
            return Ok(());
        }

        let mut window = self.window.lock().await;
        let now = now_ms();
        window.remove_old_entries(now);
        if deposit.value > window.capacity() {
            error!(
                "[Fulfiller:{}] Deposit {} value {} exceeds capacity {}",
                ticker,
                hash,
                deposit.value,
                window.capacity()
            );
            return Err(JobError::Failed(ScreenerError::ExceedsCapacity { hash }));
        }
        if window.would_exceed_rate_limit(deposit.value) {
            let delay_ms = rate_limit_delay_ms(&window, deposit.value, now);
            self.metrics
                .rate_limit_delay_seconds
                .with_label_values(&[ticker])
                .observe(delay_ms as f64 / 1000.0);
            info!(
                "[Fulfiller:{}] Deposit {} rate limited for {}ms ({} of {} in use)",
                ticker,
                hash,
                delay_ms,
                window.window_sum(),
                window.capacity()
            );
            return Err(JobError::RateLimited { delay_ms });
        }

        let submitted = {
            let signer = self.signer.lock().await;
            let signer: &DepositCompletionSigner = &signer;
            crate::retry_with_max_attempts!(
                self.sign_and_submit(signer, &deposit),
                self.config.submit_attempts
            )
        };
        let submitted = match submitted {
            Ok(tx) => tx,
            Err(e) => {
                self.metrics
                    .err_submission
                    .with_label_values(&[ticker])
                    .inc();
                error!(
                    "[Fulfiller:{}] Failed to complete deposit {} after {} attempts: {:?}, deposit: {:?}",
                    ticker, hash, self.config.submit_attempts, e, deposit
                );
                return Err(JobError::Failed(e));
            }
        };
        info!(
            "[Fulfiller:{}] Completed deposit {} in tx {:?} at block {}",
            ticker, hash, submitted.tx_hash, submitted.block_number
        );

        // charged when the deposit landed, not when it was sent
        window.add(RateLimitWindowEntry {
            timestamp_ms: submitted.block_timestamp_ms,
            amount: deposit.value,
        });
        self.metrics
            .rate_limit_window_usage
            .with_label_values(&[ticker])
            .set(u256_to_u64_saturating(window.window_sum()).min(i64::MAX as u64) as i64);
        drop(window);

        self.metrics
            .fulfilled_deposits
            .with_label_values(&[ticker])
            .inc();
        self.metrics
            .fulfilled_value
            .with_label_values(&[ticker])
            .inc_by(u256_to_u64_saturating(deposit.value));
        if let Err(e) = self.record_completion(&deposit).await {
            warn!(
                "[Fulfiller:{}] Deposit {} landed but recording it failed: {:?}",
                ticker, hash, e
            );
            self.unrecorded.lock().await.insert(hash);
            return Err(JobError::Failed(e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobOptions;
    use crate::store::{FulfilledTotals, InMemoryStatusStore};
    use crate::test_utils::{deposit_for_asset, supported_asset, test_signer, MockChain};
    use ethers::types::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINUTE_MS: u64 = 60_000;

    struct Harness {
        worker: FulfillerWorker,
        chain: Arc<MockChain>,
        store: Arc<InMemoryStatusStore>,
        asset: SupportedAsset,
    }

    fn harness(window: Option<RateLimitWindow>) -> Harness {
        let asset = supported_asset("TEST", 100, 3600);
        let window = window.unwrap_or_else(|| {
            RateLimitWindow::new(&asset.ticker, asset.global_cap, asset.period_ms)
        });
        let chain = Arc::new(MockChain::default());
        let store = Arc::new(InMemoryStatusStore::new());
        let worker = FulfillerWorker::new(
            asset.clone(),
            window,
            chain.clone(),
            chain.clone(),
            Arc::new(Mutex::new(test_signer())),
            store.clone(),
            FulfillerConfig::default(),
            Arc::new(ScreenerMetrics::new_for_testing()),
        );
        Harness {
            worker,
            chain,
            store,
            asset,
        }
    }

    // Delegates to an in-memory store, failing the first status writes
    #[derive(Default)]
    struct FlakyStatusStore {
        inner: InMemoryStatusStore,
        set_status_failures: AtomicUsize,
    }

    #[async_trait]
    impl StatusStore for FlakyStatusStore {
        async fn store_deposit_request(&self, deposit: &DepositRequest) -> ScreenerResult<()> {
            self.inner.store_deposit_request(deposit).await
        }

        async fn get_deposit_request(
            &self,
            hash: DepositHash,
        ) -> ScreenerResult<Option<DepositRequest>> {
            self.inner.get_deposit_request(hash).await
        }

        async fn get_status(&self, hash: DepositHash) -> ScreenerResult<DepositRequestStatus> {
            self.inner.get_status(hash).await
        }

        async fn set_status(
            &self,
            hash: DepositHash,
            status: DepositRequestStatus,
        ) -> ScreenerResult<bool> {
            let failing = self
                .set_status_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ScreenerError::Store("connection reset".to_string()));
            }
            self.inner.set_status(hash, status).await
        }

        async fn get_checkpoint(&self) -> ScreenerResult<Option<u64>> {
            self.inner.get_checkpoint().await
        }

        async fn set_checkpoint(&self, checkpoint: u64) -> ScreenerResult<()> {
            self.inner.set_checkpoint(checkpoint).await
        }

        async fn record_fulfilled(&self, asset: Address, value: U256) -> ScreenerResult<()> {
            self.inner.record_fulfilled(asset, value).await
        }

        async fn get_fulfilled(&self, asset: Address) -> ScreenerResult<FulfilledTotals> {
            self.inner.get_fulfilled(asset).await
        }
    }

    fn job(deposit: &DepositRequest) -> QueueJob {
        QueueJob::new(deposit.hash(), deposit, JobOptions::default(), now_ms(), 0).unwrap()
    }

    #[tokio::test]
    async fn test_admitted_deposit_is_completed() {
        let h = harness(None);
        let deposit = deposit_for_asset(h.asset.address, 40);
        h.chain.add_outstanding(deposit.hash());
        h.chain.set_block_timestamp_ms(1_234);

        h.worker.process(&job(&deposit)).await.unwrap();

        let submissions = h.chain.submissions();
        assert_eq!(submissions.len(), 1);
        // 1.5x the estimate
        assert_eq!(
            submissions[0].gas_limit,
            apply_multiplier(h.chain.gas_estimate(), 1.5)
        );
        assert_eq!(
            h.store.get_status(deposit.hash()).await.unwrap(),
            DepositRequestStatus::Completed
        );
        assert_eq!(
            h.store.get_fulfilled(h.asset.address).await.unwrap().value,
            U256::from(40u64)
        );
        let window = h.worker.window_snapshot().await;
        let entries: Vec<_> = window.entries().copied().collect();
        assert_eq!(
            entries,
            vec![RateLimitWindowEntry {
                timestamp_ms: 1_234,
                amount: U256::from(40u64)
            }]
        );
    }

    #[tokio::test]
    async fn test_full_window_rate_limits() {
        let asset = supported_asset("TEST", 100, 3600);
        let now = now_ms();
        let mut window = RateLimitWindow::new(&asset.ticker, asset.global_cap, asset.period_ms);
        window.add(RateLimitWindowEntry {
            timestamp_ms: now - 30 * MINUTE_MS,
            amount: U256::from(80u64),
        });
        let h = harness(Some(window));
        let deposit = deposit_for_asset(h.asset.address, 30);
        h.chain.add_outstanding(deposit.hash());

        let err = h.worker.process(&job(&deposit)).await.unwrap_err();
        let JobError::RateLimited { delay_ms } = err else {
            panic!("expected rate limit, got {:?}", err);
        };
        // available once the 80 entry ages out, about 30 minutes from now
        assert!(delay_ms <= 30 * MINUTE_MS + 1);
        assert!(delay_ms > 29 * MINUTE_MS);
        assert!(h.chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_not_outstanding_skips_submission() {
        let h = harness(None);
        let deposit = deposit_for_asset(h.asset.address, 10);
        h.worker.process(&job(&deposit)).await.unwrap();
        assert!(h.chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_transient_submit_failures_are_retried() {
        let h = harness(None);
        let deposit = deposit_for_asset(h.asset.address, 10);
        h.chain.add_outstanding(deposit.hash());
        h.chain.fail_next_submissions(2);

        h.worker.process(&job(&deposit)).await.unwrap();
        assert_eq!(h.chain.submission_attempts(), 3);
        assert_eq!(h.chain.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_submit_retries_fail_the_attempt() {
        let h = harness(None);
        let deposit = deposit_for_asset(h.asset.address, 10);
        h.chain.add_outstanding(deposit.hash());
        h.chain.fail_next_submissions(3);

        let err = h.worker.process(&job(&deposit)).await.unwrap_err();
        assert!(matches!(err, JobError::Failed(ScreenerError::Submission(_))));
        assert_eq!(h.chain.submission_attempts(), 3);
        assert!(h.worker.window_snapshot().await.is_empty());
        assert_eq!(
            h.store.get_status(deposit.hash()).await.unwrap(),
            DepositRequestStatus::DoesNotExist
        );
    }

    #[tokio::test]
    async fn test_value_above_capacity_fails() {
        let h = harness(None);
        let deposit = deposit_for_asset(h.asset.address, 101);
        h.chain.add_outstanding(deposit.hash());
        let err = h.worker.process(&job(&deposit)).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::Failed(ScreenerError::ExceedsCapacity { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_asset_is_fatal() {
        let h = harness(None);
        let deposit = deposit_for_asset(Address::repeat_byte(0x77), 10);
        h.chain.add_outstanding(deposit.hash());
        assert!(matches!(
            h.worker.process(&job(&deposit)).await.unwrap_err(),
            JobError::Fatal(_)
        ));
    }

    #[tokio::test]
    async fn test_deposit_gone_before_fulfillment_is_untouched() {
        let h = harness(None);
        let deposit = deposit_for_asset(h.asset.address, 10);
        h.store
            .set_status(deposit.hash(), DepositRequestStatus::AwaitingFulfillment)
            .await
            .unwrap();
        // completed or retrieved by someone else after arbitration
        h.chain.add_outstanding(deposit.hash());
        h.chain.remove_outstanding(deposit.hash());

        h.worker.process(&job(&deposit)).await.unwrap();
        assert!(h.chain.submissions().is_empty());
        assert_eq!(h.chain.submission_attempts(), 0);
        assert!(h.worker.window_snapshot().await.is_empty());
        assert_eq!(
            h.store.get_status(deposit.hash()).await.unwrap(),
            DepositRequestStatus::AwaitingFulfillment
        );
        assert_eq!(
            h.store.get_fulfilled(h.asset.address).await.unwrap(),
            FulfilledTotals::default()
        );
    }

    #[tokio::test]
    async fn test_landed_completion_is_recorded_on_retry() {
        let asset = supported_asset("TEST", 100, 3600);
        let chain = Arc::new(MockChain::default());
        let store = Arc::new(FlakyStatusStore::default());
        let worker = FulfillerWorker::new(
            asset.clone(),
            RateLimitWindow::new(&asset.ticker, asset.global_cap, asset.period_ms),
            chain.clone(),
            chain.clone(),
            Arc::new(Mutex::new(test_signer())),
            store.clone(),
            FulfillerConfig::default(),
            Arc::new(ScreenerMetrics::new_for_testing()),
        );
        let deposit = deposit_for_asset(asset.address, 10);
        store
            .set_status(deposit.hash(), DepositRequestStatus::AwaitingFulfillment)
            .await
            .unwrap();
        // the Completed write after submission fails once
        store.set_status_failures.store(1, Ordering::SeqCst);
        chain.add_outstanding(deposit.hash());

        let err = worker.process(&job(&deposit)).await.unwrap_err();
        assert!(matches!(err, JobError::Failed(ScreenerError::Store(_))));
        assert_eq!(chain.submissions().len(), 1);
        assert_eq!(worker.window_snapshot().await.window_sum(), U256::from(10u64));

        // the retried job finds the deposit gone and records it without resubmitting
        worker.process(&job(&deposit)).await.unwrap();
        assert_eq!(chain.submission_attempts(), 1);
        assert_eq!(
            store.get_status(deposit.hash()).await.unwrap(),
            DepositRequestStatus::Completed
        );
        assert_eq!(
            store.get_fulfilled(asset.address).await.unwrap().value,
            U256::from(10u64)
        );
        assert_eq!(worker.window_snapshot().await.len(), 1);
    }

    #[test]
    fn test_rate_limit_delay_wakes_after_eviction() {
        let mut window = RateLimitWindow::new("TEST", U256::from(100u64), 60 * MINUTE_MS);
        window.add(RateLimitWindowEntry {
            timestamp_ms: 0,
            amount: U256::from(80u64),
        });
        let now = 30 * MINUTE_MS;
        let delay_ms = rate_limit_delay_ms(&window, U256::from(30u64), now);
        assert_eq!(delay_ms, 30 * MINUTE_MS + 1);

        // at exactly the expiry instant the entry still counts
        let mut at_expiry = window.clone();
        at_expiry.remove_old_entries(now + delay_ms - 1);
        assert!(at_expiry.would_exceed_rate_limit(U256::from(30u64)));
        window.remove_old_entries(now + delay_ms);
        assert!(!window.would_exceed_rate_limit(U256::from(30u64)));

        // nothing to wait for still re-delays by a tick
        let empty = RateLimitWindow::new("TEST", U256::from(100u64), 60 * MINUTE_MS);
        assert_eq!(rate_limit_delay_ms(&empty, U256::from(30u64), now), 1);
    }
}
