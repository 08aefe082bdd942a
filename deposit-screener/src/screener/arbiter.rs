// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Second screening pass, run when a deposit's first-pass delay has elapsed.

use super::{FulfillmentQueues, ScreeningPass};
use crate::chain::DepositManagerReader;
use crate::error::{JobError, ScreenerError};
use crate::metrics::ScreenerMetrics;
use crate::queue::{JobOptions, JobProcessor, QueueJob};
use crate::rules::{RuleSet, ScreeningVerdict};
use crate::store::StatusStore;
use crate::types::{DepositRequestStatus, SupportedAssets};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

pub struct Arbiter {
    rule_set: Arc<RuleSet>,
    chain: Arc<dyn DepositManagerReader>,
    store: Arc<dyn StatusStore>,
    fulfillment_queues: Arc<FulfillmentQueues>,
    supported_assets: Arc<SupportedAssets>,
    fulfillment_job_options: JobOptions,
    metrics: Arc<ScreenerMetrics>,
}

impl Arbiter {
    pub fn new(
        rule_set: Arc<RuleSet>,
        chain: Arc<dyn DepositManagerReader>,
        store: Arc<dyn StatusStore>,
        fulfillment_queues: Arc<FulfillmentQueues>,
        supported_assets: Arc<SupportedAssets>,
        fulfillment_job_options: JobOptions,
        metrics: Arc<ScreenerMetrics>,
    ) -> Self {
        Self {
            rule_set,
            chain,
            store,
            fulfillment_queues,
            supported_assets,
            fulfillment_job_options,
            metrics,
        }
    }
}

#[async_trait]
impl JobProcessor for Arbiter {
    async fn process(&self, job: &QueueJob) -> Result<(), JobError> {
        let deposit = job.deposit()?;
        let hash = deposit.hash();
        let asset = deposit.asset_address();

        // ingestion only schedules supported assets
        let queue = match (
            self.supported_assets.get(&asset),
            self.fulfillment_queues.get(&asset),
        ) {
            (Some(_), Some(queue)) => queue.clone(),
            _ => {
                error!(
                    "[Arbiter] Deposit {} has unsupported asset {:?}",
                    hash, asset
                );
                return Err(JobError::Fatal(ScreenerError::UnsupportedAsset(asset)));
            }
        };

        if !self.chain.is_outstanding(hash).await? {
            info!("[Arbiter] Deposit {} no longer outstanding, skipping", hash);
            self.metrics
                .deposits_skipped
                .with_label_values(&["arbiter", "not_outstanding"])
                .inc();
            return Ok(());
        }

        let verdict = self.rule_set.check(&deposit).await?;
        ScreeningPass::Second.record(&self.metrics, &hash, &verdict);
        match verdict {
            ScreeningVerdict::Rejection { .. } => {
                self.store
                    .set_status(hash, DepositRequestStatus::FailedScreen)
                    .await?;
            }
            ScreeningVerdict::Delay { .. } => {
                queue
                    .enqueue(hash, &deposit, self.fulfillment_job_options)
                    .await?;
                self.store
                    .set_status(hash, DepositRequestStatus::AwaitingFulfillment)
                    .await?;
            }
        }
        Ok(())
    }
}
