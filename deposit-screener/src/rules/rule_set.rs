// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ordered rule chain evaluation.
//!
//! ```text
//!  deposit ──► rule 0 ──► rule 1 ──► ... ──► rule n ──► Delay { total }
//!                │          │                  │
//!                │  fetch(source) memoized per evaluation
//!                ▼          ▼                  ▼
//!           Rejection  (short-circuits, later rules never run or fetch)
//! ```
//!
//! Delay actions fold into a running total in rule order, so an `Add`
//! followed by a `Multiply` is not the same as the reverse.

use super::fetcher::RiskDataFetcher;
use super::rule::{DataSourceKey, Rule, RuleResult, ScreeningVerdict};
use crate::error::ScreenerResult;
use crate::metrics::ScreenerMetrics;
use crate::types::DepositRequest;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    fetcher: Arc<dyn RiskDataFetcher>,
    base_delay_seconds: f64,
    metrics: Arc<ScreenerMetrics>,
}

impl RuleSet {
    pub fn new(fetcher: Arc<dyn RiskDataFetcher>, metrics: Arc<ScreenerMetrics>) -> Self {
        Self {
            rules: vec![],
            fetcher,
            base_delay_seconds: 0.0,
            metrics,
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn with_base_delay(mut self, seconds: f64) -> Self {
        self.base_delay_seconds = seconds;
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub async fn check(&self, deposit: &DepositRequest) -> ScreenerResult<ScreeningVerdict> {
        self.check_with_base(deposit, self.base_delay_seconds).await
    }

    /// Evaluate the chain starting from `base_delay_seconds`. A fetch or
    /// decode error aborts the whole evaluation; no partial verdict is returned.
    pub async fn check_with_base(
        &self,
        deposit: &DepositRequest,
        base_delay_seconds: f64,
    ) -> ScreenerResult<ScreeningVerdict> {
        let hash = deposit.hash();
        let mut cache: HashMap<DataSourceKey, Value> = HashMap::new();
        let mut total_delay = base_delay_seconds;

        for rule in &self.rules {
            if !cache.contains_key(rule.source()) {
                let data = self.fetcher.fetch(rule.source(), deposit).await?;
                cache.insert(rule.source().clone(), data);
            }
            let data = &cache[rule.source()];
            let result = rule.evaluate(data)?;
            info!(
                "[RuleSet] deposit={} rule={} result={:?}",
                hash,
                rule.name(),
                result
            );
            self.metrics
                .rule_results
                .with_label_values(&[rule.name(), result.label()])
                .inc();

            match result {
                RuleResult::Rejection { reason } => {
                    return Ok(ScreeningVerdict::Rejection { reason });
                }
                RuleResult::Delay(action) => {
                    total_delay = action.apply(total_delay);
                }
                RuleResult::ActionNotTriggered => {}
            }
        }

        Ok(ScreeningVerdict::Delay {
            time_seconds: total_delay,
        })
    }
}
