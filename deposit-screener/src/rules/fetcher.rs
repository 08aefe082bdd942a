// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::rule::DataSourceKey;
use crate::error::{ScreenerError, ScreenerResult};
use crate::metrics::ScreenerMetrics;
use crate::types::DepositRequest;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Fetches the risk payload a source key names for one deposit.
/// The rule set calls this at most once per source per evaluation.
#[async_trait]
pub trait RiskDataFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &DataSourceKey,
        deposit: &DepositRequest,
    ) -> ScreenerResult<Value>;
}

#[derive(Serialize)]
struct RiskDataQuery<'a> {
    source: &'a str,
    deposit: &'a DepositRequest,
}

/// POSTs `{source, deposit}` to the endpoint configured for the source key
/// and returns the response body as JSON.
pub struct HttpRiskDataFetcher {
    client: reqwest::Client,
    endpoints: BTreeMap<DataSourceKey, String>,
    metrics: Arc<ScreenerMetrics>,
}

impl HttpRiskDataFetcher {
    pub fn new(
        endpoints: BTreeMap<DataSourceKey, String>,
        timeout: Duration,
        metrics: Arc<ScreenerMetrics>,
    ) -> ScreenerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScreenerError::Internal(format!("Failed to build http client: {e}")))?;
        Ok(Self {
            client,
            endpoints,
            metrics,
        })
    }

    async fn fetch_inner(&self, url: &str, query: &RiskDataQuery<'_>) -> reqwest::Result<Value> {
        self.client
            .post(url)
            .json(query)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    }
}

#[async_trait]
impl RiskDataFetcher for HttpRiskDataFetcher {
    async fn fetch(
        &self,
        source: &DataSourceKey,
        deposit: &DepositRequest,
    ) -> ScreenerResult<Value> {
        let url = self
            .endpoints
            .get(source)
            .ok_or_else(|| ScreenerError::RiskDataFetch {
                source_key: source.to_string(),
                reason: "no endpoint configured".to_string(),
            })?;
        let query = RiskDataQuery {
            source: source.as_str(),
            deposit,
        };
        let _timer = self
            .metrics
            .risk_data_fetch_latency
            .with_label_values(&[source.as_str()])
            .start_timer();
        match self.fetch_inner(url, &query).await {
            Ok(value) => {
                debug!("[RiskData] Fetched {} for deposit {}", source, deposit.hash());
                self.metrics
                    .risk_data_fetches
                    .with_label_values(&[source.as_str(), "ok"])
                    .inc();
                Ok(value)
            }
            Err(e) => {
                self.metrics
                    .risk_data_fetches
                    .with_label_values(&[source.as_str(), "error"])
                    .inc();
                Err(ScreenerError::RiskDataFetch {
                    source_key: source.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
