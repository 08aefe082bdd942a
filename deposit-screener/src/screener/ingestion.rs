// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! First screening pass.
//!
//! Consumes deposit manager events batch by batch. Each `Instantiated`
//! deposit is stored, checked against the on-chain outstanding set, screened
//! and either marked `FailedScreen` or scheduled on the screener queue with
//! the computed delay. The checkpoint only moves once a whole batch is
//! handled, so a crash re-delivers at most one batch; every step below is
//! idempotent for that reason.

use super::delay::ScreenerDelayCalculator;
use super::ScreeningPass;
use crate::chain::{DepositEventSource, DepositManagerReader};
use crate::error::ScreenerResult;
use crate::metrics::ScreenerMetrics;
use crate::queue::{JobOptions, JobQueue};
use crate::rules::{RuleSet, ScreeningVerdict};
use crate::store::StatusStore;
use crate::types::{
    DepositEvent, DepositEventBatch, DepositEventKind, DepositRequest, DepositRequestStatus,
    SupportedAssets,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What ingestion did with one instantiated deposit
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Scheduled { delay_ms: u64 },
    Rejected { reason: String },
    /// Already seen by a previous delivery of this batch
    AlreadyProcessed,
    NotOutstanding,
    UnsupportedAsset,
}

pub struct Ingestor {
    rule_set: Arc<RuleSet>,
    chain: Arc<dyn DepositManagerReader>,
    store: Arc<dyn StatusStore>,
    screener_queue: Arc<dyn JobQueue>,
    supported_assets: Arc<SupportedAssets>,
    delay_calculator: Arc<dyn ScreenerDelayCalculator>,
    job_options: JobOptions,
    metrics: Arc<ScreenerMetrics>,
}

impl Ingestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule_set: Arc<RuleSet>,
        chain: Arc<dyn DepositManagerReader>,
        store: Arc<dyn StatusStore>,
        screener_queue: Arc<dyn JobQueue>,
        supported_assets: Arc<SupportedAssets>,
        delay_calculator: Arc<dyn ScreenerDelayCalculator>,
        job_options: JobOptions,
        metrics: Arc<ScreenerMetrics>,
    ) -> Self {
        Self {
            rule_set,
            chain,
            store,
            screener_queue,
            supported_assets,
            delay_calculator,
            job_options,
            metrics,
        }
    }

    pub async fn run(
        self: Arc<Self>,
        source: Arc<dyn DepositEventSource>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> ScreenerResult<()> {
        let mut checkpoint = self.store.get_checkpoint().await?;
        info!("[Screener] Ingestion started after checkpoint {:?}", checkpoint);
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = source.fetch_batch(checkpoint) => next,
            };
            match next {
                Ok(Some(batch)) => match self.handle_batch(&batch).await {
                    Ok(()) => {
                        self.store.set_checkpoint(batch.checkpoint).await?;
                        self.metrics
                            .last_processed_checkpoint
                            .set(batch.checkpoint as i64);
                        checkpoint = Some(batch.checkpoint);
                        debug!(
                            "[Screener] Processed {} events up to checkpoint {}",
                            batch.events.len(),
                            batch.checkpoint
                        );
                        // more may already be available
                        continue;
                    }
                    Err(e) => {
                        self.metrics
                            .err_batch_processing
                            .with_label_values(&[e.error_type()])
                            .inc();
                        warn!(
                            "[Screener] Batch ending at {} failed, will retry: {:?}",
                            batch.checkpoint, e
                        );
                    }
                },
                Ok(None) => {}
                Err(e) => warn!("[Screener] Failed to fetch events: {:?}", e),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
        info!("[Screener] Ingestion stopped at checkpoint {:?}", checkpoint);
        Ok(())
    }

    pub async fn handle_batch(&self, batch: &DepositEventBatch) -> ScreenerResult<()> {
        for event in &batch.events {
            self.handle_event(event).await?;
        }
        Ok(())
    }

    async fn handle_event(&self, event: &DepositEvent) -> ScreenerResult<()> {
        let label = match event.kind {
            DepositEventKind::Instantiated => "instantiated",
            DepositEventKind::Retrieved => "retrieved",
            DepositEventKind::Completed => "completed",
        };
        self.metrics
            .deposit_events_observed
            .with_label_values(&[label])
            .inc();
        match event.kind {
            DepositEventKind::Instantiated => {
                let outcome = self.handle_instantiated(&event.request).await?;
                debug!(
                    "[Screener] Deposit {} at block {}: {:?}",
                    event.request.hash(),
                    event.block_number,
                    outcome
                );
            }
            // Completions by this screener already carry the status; this
            // covers completions observed after a restart.
            DepositEventKind::Completed => {
                self.store
                    .set_status(event.request.hash(), DepositRequestStatus::Completed)
                    .await?;
            }
            DepositEventKind::Retrieved => {
                info!(
                    "[Screener] Deposit {} retrieved by its spender",
                    event.request.hash()
                );
            }
        }
        Ok(())
    }

    pub async fn handle_instantiated(
        &self,
        deposit: &DepositRequest,
    ) -> ScreenerResult<IngestOutcome> {
        let hash = deposit.hash();
        if !self.supported_assets.contains(&deposit.asset_address()) {
            warn!(
                "[Screener] Skipping deposit {} of unsupported asset {:?}",
                hash,
                deposit.asset_address()
            );
            self.skip("unsupported_asset");
            return Ok(IngestOutcome::UnsupportedAsset);
        }

        self.store.store_deposit_request(deposit).await?;

        if self.store.get_status(hash).await? != DepositRequestStatus::DoesNotExist {
            self.skip("already_processed");
            return Ok(IngestOutcome::AlreadyProcessed);
        }

        if !self.chain.is_outstanding(hash).await? {
            info!(
                "[Screener] Deposit {} no longer outstanding, skipping",
                hash
            );
            self.skip("not_outstanding");
            return Ok(IngestOutcome::NotOutstanding);
        }

        let verdict = self.rule_set.check(deposit).await?;
        ScreeningPass::First.record(&self.metrics, &hash, &verdict);
        match verdict {
            ScreeningVerdict::Rejection { reason } => {
                self.store
                    .set_status(hash, DepositRequestStatus::FailedScreen)
                    .await?;
                Ok(IngestOutcome::Rejected { reason })
            }
            ScreeningVerdict::Delay { time_seconds } => {
                let delay_ms = self
                    .delay_calculator
                    .calculate_delay_ms(deposit, time_seconds);
                self.metrics
                    .first_pass_delay_seconds
                    .observe(delay_ms as f64 / 1000.0);
                // enqueue before the status write: a crash in between is
                // healed by the re-delivered batch, the queue dedups by hash
                self.screener_queue
                    .enqueue(hash, deposit, self.job_options.with_delay(delay_ms))
                    .await?;
                self.store
                    .set_status(hash, DepositRequestStatus::PassedFirstScreen)
                    .await?;
                Ok(IngestOutcome::Scheduled { delay_ms })
            }
        }
    }

    fn skip(&self, reason: &str) {
        self.metrics
            .deposits_skipped
            .with_label_values(&["ingestion", reason])
            .inc();
    }
}
