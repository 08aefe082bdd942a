// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Full pipeline over in-memory queues, a mock deposit manager and a
//! scripted event stream.

use crate::error::{ScreenerError, ScreenerResult};
use crate::fulfiller::FulfillerConfig;
use crate::metrics::ScreenerMetrics;
use crate::node::{start_pipeline, Pipeline, PipelineComponents};
use crate::queue::{flatten_join_result, BackoffPolicy, JobOptions};
use crate::rules::{DataSourceKey, RiskDataFetcher, Rule, RuleAction, RuleSet};
use crate::screener::VerdictDelayCalculator;
use crate::store::{InMemoryStatusStore, StatusStore};
use crate::test_utils::{test_signer, MockChain, ScriptedEventSource};
use crate::types::{
    DepositHash, DepositRequest, DepositRequestStatus, SupportedAsset, SupportedAssets,
};
use async_trait::async_trait;
use ethers::types::Address;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SANCTIONS_SOURCE: &str = "sanctions";

/// Flags spenders on a block list; can be switched offline
#[derive(Default)]
pub struct SanctionsList {
    blocked: Mutex<HashSet<Address>>,
    offline: AtomicBool,
}

impl SanctionsList {
    pub fn block(&self, spender: Address) {
        self.blocked.lock().unwrap().insert(spender);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl RiskDataFetcher for SanctionsList {
    async fn fetch(
        &self,
        source: &DataSourceKey,
        deposit: &DepositRequest,
    ) -> ScreenerResult<Value> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ScreenerError::RiskDataFetch {
                source_key: source.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let blocked = self.blocked.lock().unwrap().contains(&deposit.spender);
        Ok(json!({ "sanctioned": blocked }))
    }
}

#[derive(Deserialize)]
struct Sanctions {
    sanctioned: bool,
}

pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub chain: Arc<MockChain>,
    pub events: Arc<ScriptedEventSource>,
    pub store: Arc<InMemoryStatusStore>,
    pub sanctions: Arc<SanctionsList>,
    pub metrics: Arc<ScreenerMetrics>,
}

impl TestPipeline {
    pub async fn start(assets: Vec<SupportedAsset>) -> Self {
        let metrics = Arc::new(ScreenerMetrics::new_for_testing());
        let chain = Arc::new(MockChain::default());
        let events = Arc::new(ScriptedEventSource::new(vec![]));
        let store = Arc::new(InMemoryStatusStore::new());
        let sanctions = Arc::new(SanctionsList::default());
        let rule_set = RuleSet::new(sanctions.clone(), metrics.clone()).with_rule(Rule::new(
            "REJECT_SANCTIONED",
            SANCTIONS_SOURCE,
            |s: &Sanctions| s.sanctioned,
            RuleAction::reject("spender is sanctioned"),
        ));
        let pipeline = start_pipeline(PipelineComponents {
            rule_set: Arc::new(rule_set),
            chain: chain.clone(),
            submitter: chain.clone(),
            events: events.clone(),
            signer: test_signer(),
            store: store.clone(),
            supported_assets: Arc::new(SupportedAssets::new(assets)),
            delay_calculator: Arc::new(VerdictDelayCalculator::default()),
            job_options: JobOptions::new(5, BackoffPolicy::Exponential { delay_ms: 10 }),
            fulfiller_config: FulfillerConfig::default(),
            event_poll_interval: Duration::from_millis(10),
            queue_poll_interval: Duration::from_millis(10),
            metrics: metrics.clone(),
        })
        .await
        .unwrap();
        Self {
            pipeline,
            chain,
            events,
            store,
            sanctions,
            metrics,
        }
    }

    /// Poll until `hash` reaches `status`, panicking after a few seconds
    pub async fn wait_for_status(&self, hash: DepositHash, status: DepositRequestStatus) {
        let store = self.store.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            loop {
                if store.get_status(hash).await.unwrap() == status {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("deposit {} never reached {}", hash, status));
    }

    pub async fn wait_for_checkpoint(&self, checkpoint: u64) {
        let store = self.store.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            while store.get_checkpoint().await.unwrap() < Some(checkpoint) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("checkpoint {} never reached", checkpoint));
    }

    /// Cancel every loop and check none of them died with an error
    pub async fn shutdown(self) {
        self.pipeline.cancel.cancel();
        for handle in self.pipeline.handles {
            let result = tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("worker did not stop");
            flatten_join_result(result).unwrap();
        }
    }
}
