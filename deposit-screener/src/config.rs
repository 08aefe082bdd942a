// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::fulfiller::FulfillerConfig;
use crate::queue::{BackoffPolicy, JobOptions};
use crate::rules::{DataSourceKey, Rule, RuleConfig};
use crate::signer::Eip712Domain;
use crate::types::{SupportedAsset, SupportedAssets};
use crate::utils::whole_tokens_to_base_units;
use anyhow::{anyhow, ensure};
use deposit_screener_config::Config;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssetConfig {
    // ERC-20 token address
    pub address: Address,
    // Rolling cap per period in whole tokens, as configured on the contract
    pub global_cap_whole_tokens: u64,
    // Token decimals
    pub precision: u32,
    pub period_secs: u64,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DepositScreenerConfig {
    // Rpc url of the Ethereum node hosting the deposit manager
    pub eth_rpc_url: String,
    pub chain_id: u64,
    pub deposit_manager_address: Address,
    #[serde(default = "default_eip712_name")]
    pub eip712_name: String,
    #[serde(default = "default_eip712_version")]
    pub eip712_version: String,
    // Key whose signature the deposit manager accepts for completions
    pub attestation_key_path: PathBuf,
    // Key paying gas for completion transactions
    pub tx_signer_key_path: PathBuf,
    pub metrics_port: u16,

    #[serde(default)]
    pub start_block: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_event_poll_interval", rename = "event-poll-interval-ms")]
    pub event_poll_interval: Duration,
    #[serde(default = "default_event_block_range")]
    pub event_block_range: u64,
    #[serde(default)]
    pub confirmations: u64,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_queue_poll_interval", rename = "queue-poll-interval-ms")]
    pub queue_poll_interval: Duration,
    #[serde(default = "default_job_attempts")]
    pub job_attempts: u32,
    #[serde(default = "default_job_backoff_ms")]
    pub job_backoff_ms: u64,

    #[serde(default = "default_submit_attempts")]
    pub submit_attempts: u32,
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: f64,

    // Delay every accepted deposit starts from before rules apply
    #[serde(default)]
    pub base_delay_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_secs: Option<u64>,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_risk_data_timeout", rename = "risk-data-timeout-ms")]
    pub risk_data_timeout: Duration,
    #[serde(default)]
    pub risk_data_endpoints: BTreeMap<String, String>,

    // Keyed by ticker
    pub supported_assets: BTreeMap<String, AssetConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

fn default_eip712_name() -> String {
    "DepositManager".to_string()
}

fn default_eip712_version() -> String {
    "v1".to_string()
}

fn default_event_poll_interval() -> Duration {
    Duration::from_secs(12)
}

fn default_event_block_range() -> u64 {
    1000
}

fn default_queue_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_job_attempts() -> u32 {
    5
}

fn default_job_backoff_ms() -> u64 {
    1000
}

fn default_submit_attempts() -> u32 {
    FulfillerConfig::default().submit_attempts
}

fn default_gas_multiplier() -> f64 {
    FulfillerConfig::default().gas_multiplier
}

fn default_risk_data_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Config for DepositScreenerConfig {
    fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.supported_assets.is_empty(),
            "at least one supported asset is required"
        );
        let mut seen = HashSet::new();
        for (ticker, asset) in &self.supported_assets {
            ensure!(
                seen.insert(asset.address),
                "asset {} reuses address {:?}",
                ticker,
                asset.address
            );
            ensure!(
                asset.global_cap_whole_tokens > 0,
                "asset {} must have a positive global cap",
                ticker
            );
            ensure!(
                asset.period_secs > 0,
                "asset {} must have a positive period",
                ticker
            );
        }
        ensure!(
            self.gas_multiplier >= 1.0,
            "gas-multiplier must be at least 1, got {}",
            self.gas_multiplier
        );
        ensure!(self.job_attempts >= 1, "job-attempts must be at least 1");
        ensure!(self.submit_attempts >= 1, "submit-attempts must be at least 1");
        ensure!(self.event_block_range >= 1, "event-block-range must be at least 1");
        ensure!(
            self.base_delay_secs.is_finite() && self.base_delay_secs >= 0.0,
            "base-delay-secs must be a non-negative number"
        );
        for rule in &self.rules {
            if !self.risk_data_endpoints.contains_key(&rule.source) {
                return Err(anyhow!(
                    "rule {} reads source {} which has no risk data endpoint",
                    rule.name,
                    rule.source
                ));
            }
        }
        Ok(())
    }
}

impl DepositScreenerConfig {
    pub fn supported_assets(&self) -> SupportedAssets {
        SupportedAssets::new(self.supported_assets.iter().map(|(ticker, asset)| {
            SupportedAsset {
                ticker: ticker.clone(),
                address: asset.address,
                global_cap: whole_tokens_to_base_units(
                    asset.global_cap_whole_tokens,
                    asset.precision,
                ),
                period_ms: asset.period_secs.saturating_mul(1000),
            }
        }))
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.rules.iter().map(RuleConfig::compile).collect()
    }

    pub fn risk_data_endpoints(&self) -> BTreeMap<DataSourceKey, String> {
        self.risk_data_endpoints
            .iter()
            .map(|(k, v)| (DataSourceKey::new(k), v.clone()))
            .collect()
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions::new(
            self.job_attempts,
            BackoffPolicy::Exponential {
                delay_ms: self.job_backoff_ms,
            },
        )
    }

    pub fn fulfiller_config(&self) -> FulfillerConfig {
        FulfillerConfig {
            submit_attempts: self.submit_attempts,
            gas_multiplier: self.gas_multiplier,
        }
    }

    pub fn eip712_domain(&self) -> Eip712Domain {
        Eip712Domain {
            name: self.eip712_name.clone(),
            version: self.eip712_version.clone(),
            chain_id: self.chain_id,
            verifying_contract: self.deposit_manager_address,
        }
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_secs.map(Duration::from_secs)
    }
}
