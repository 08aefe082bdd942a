// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain::{
    CompletionCall, DepositEventSource, DepositManagerReader, GlobalCapState, SubmittedTx,
    TransactionSubmitter,
};
use crate::error::{ScreenerError, ScreenerResult};
use crate::rules::{DataSourceKey, RiskDataFetcher};
use crate::signer::{DepositCompletionSigner, Eip712Domain};
use crate::types::{
    Asset, DepositEvent, DepositEventBatch, DepositEventKind, DepositHash, DepositRequest,
    StealthAddress, SupportedAsset,
};
use crate::utils::now_ms;
use async_trait::async_trait;
use ethers::abi::ParamType;
use ethers::providers::{JsonRpcClient, MockError};
use ethers::types::{Address, H256, U256};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const TEST_SIGNER_KEY: &str =
    "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub fn random_address() -> Address {
    Address::from(rand::random::<[u8; 20]>())
}

pub fn deposit_for_asset(asset: Address, value: u64) -> DepositRequest {
    DepositRequest {
        spender: random_address(),
        asset: Asset::erc20(asset),
        value: U256::from(value),
        deposit_addr: StealthAddress {
            h1: U256::from(rand::random::<u64>()),
            h2: U256::from(rand::random::<u64>()),
        },
        nonce: U256::from(rand::random::<u64>()),
        gas_compensation: U256::zero(),
    }
}

pub fn random_deposit(value: u64) -> DepositRequest {
    deposit_for_asset(random_address(), value)
}

/// `global_cap` is in base units
pub fn supported_asset(ticker: &str, global_cap: u64, period_secs: u64) -> SupportedAsset {
    SupportedAsset {
        ticker: ticker.to_string(),
        address: random_address(),
        global_cap: U256::from(global_cap),
        period_ms: period_secs * 1000,
    }
}

pub fn instantiated(deposit: &DepositRequest, block_number: u64) -> DepositEvent {
    DepositEvent {
        kind: DepositEventKind::Instantiated,
        request: deposit.clone(),
        block_number,
        tx_hash: Some(H256::from(rand::random::<[u8; 32]>())),
    }
}

pub fn test_signer() -> DepositCompletionSigner {
    let wallet = TEST_SIGNER_KEY
        .parse()
        .expect("test key must be a valid secp256k1 key");
    DepositCompletionSigner::new(
        wallet,
        Eip712Domain {
            name: "DepositManager".to_string(),
            version: "v1".to_string(),
            chain_id: 31337,
            verifying_contract: Address::repeat_byte(0xdd),
        },
    )
}

/// Inverse of `DepositCompletionSigner::completion_call`
pub fn decode_completion_call(call: &CompletionCall) -> DepositRequest {
    let tokens = ethers::abi::decode(
        &[DepositRequest::param_type(), ParamType::Bytes],
        &call.data[4..],
    )
    .expect("valid completion calldata");
    let deposit = tokens.into_iter().next().expect("deposit tuple");
    DepositRequest::from_token(deposit).expect("deposit layout")
}

/// Serves fixed payloads per source and counts every fetch
#[derive(Default)]
pub struct CountingRiskDataFetcher {
    payloads: Mutex<HashMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
    counts: Mutex<HashMap<String, usize>>,
}

impl CountingRiskDataFetcher {
    pub fn set_payload(&self, source: &str, payload: Value) {
        self.payloads
            .lock()
            .unwrap()
            .insert(source.to_string(), payload);
    }

    pub fn fail_source(&self, source: &str) {
        self.failing.lock().unwrap().insert(source.to_string());
    }

    pub fn recover_source(&self, source: &str) {
        self.failing.lock().unwrap().remove(source);
    }

    pub fn fetch_count(&self, source: &str) -> usize {
        self.counts
            .lock()
            .unwrap()
            .get(source)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_fetches(&self) -> usize {
        self.counts.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl RiskDataFetcher for CountingRiskDataFetcher {
    async fn fetch(
        &self,
        source: &DataSourceKey,
        _deposit: &DepositRequest,
    ) -> ScreenerResult<Value> {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(source.to_string())
            .or_default() += 1;
        if self.failing.lock().unwrap().contains(source.as_str()) {
            return Err(ScreenerError::RiskDataFetch {
                source_key: source.to_string(),
                reason: "provider unavailable".to_string(),
            });
        }
        self.payloads
            .lock()
            .unwrap()
            .get(source.as_str())
            .cloned()
            .ok_or_else(|| ScreenerError::RiskDataFetch {
                source_key: source.to_string(),
                reason: "no payload configured".to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    pub deposit: DepositRequest,
    pub call: CompletionCall,
    pub gas_limit: U256,
}

/// In-memory deposit manager. A successful submission completes the
/// deposit, removing it from the outstanding set like the contract does.
pub struct MockChain {
    outstanding: Mutex<HashSet<DepositHash>>,
    cap_states: Mutex<HashMap<Address, GlobalCapState>>,
    submissions: Mutex<Vec<RecordedSubmission>>,
    submission_attempts: AtomicUsize,
    failures_remaining: AtomicUsize,
    // zero means wall clock
    block_timestamp_ms: AtomicU64,
    next_block: AtomicU64,
    gas_estimate: U256,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            outstanding: Mutex::new(HashSet::new()),
            cap_states: Mutex::new(HashMap::new()),
            submissions: Mutex::new(vec![]),
            submission_attempts: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            block_timestamp_ms: AtomicU64::new(0),
            next_block: AtomicU64::new(1),
            gas_estimate: U256::from(100_000u64),
        }
    }
}

impl MockChain {
    pub fn add_outstanding(&self, hash: DepositHash) {
        self.outstanding.lock().unwrap().insert(hash);
    }

    pub fn remove_outstanding(&self, hash: DepositHash) {
        self.outstanding.lock().unwrap().remove(&hash);
    }

    pub fn set_global_cap_state(&self, asset: Address, state: GlobalCapState) {
        self.cap_states.lock().unwrap().insert(asset, state);
    }

    pub fn set_block_timestamp_ms(&self, timestamp_ms: u64) {
        self.block_timestamp_ms.store(timestamp_ms, Ordering::SeqCst);
    }

    pub fn fail_next_submissions(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn gas_estimate(&self) -> U256 {
        self.gas_estimate
    }

    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submission_attempts(&self) -> usize {
        self.submission_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DepositManagerReader for MockChain {
    async fn is_outstanding(&self, hash: DepositHash) -> ScreenerResult<bool> {
        Ok(self.outstanding.lock().unwrap().contains(&hash))
    }

    async fn global_cap_state(&self, asset: Address) -> ScreenerResult<GlobalCapState> {
        Ok(self
            .cap_states
            .lock()
            .unwrap()
            .get(&asset)
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait]
impl TransactionSubmitter for MockChain {
    async fn estimate_gas(&self, _call: &CompletionCall) -> ScreenerResult<U256> {
        Ok(self.gas_estimate)
    }

    async fn submit(&self, call: &CompletionCall, gas_limit: U256) -> ScreenerResult<SubmittedTx> {
        self.submission_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ScreenerError::Submission("nonce too low".to_string()));
        }
        let deposit = decode_completion_call(call);
        let hash = deposit.hash();
        if !self.outstanding.lock().unwrap().remove(&hash) {
            return Err(ScreenerError::Submission(format!(
                "execution reverted: deposit {} not outstanding",
                hash
            )));
        }
        self.submissions.lock().unwrap().push(RecordedSubmission {
            deposit,
            call: call.clone(),
            gas_limit,
        });
        let block_timestamp_ms = match self.block_timestamp_ms.load(Ordering::SeqCst) {
            0 => now_ms(),
            ts => ts,
        };
        Ok(SubmittedTx {
            tx_hash: H256::from(rand::random::<[u8; 32]>()),
            block_number: self.next_block.fetch_add(1, Ordering::SeqCst),
            block_timestamp_ms,
        })
    }
}

/// Replays a fixed list of batches by checkpoint
pub struct ScriptedEventSource {
    batches: Mutex<Vec<DepositEventBatch>>,
}

impl ScriptedEventSource {
    pub fn new(batches: Vec<DepositEventBatch>) -> Self {
        Self {
            batches: Mutex::new(batches),
        }
    }

    pub fn push(&self, batch: DepositEventBatch) {
        self.batches.lock().unwrap().push(batch);
    }
}

#[async_trait]
impl DepositEventSource for ScriptedEventSource {
    async fn fetch_batch(
        &self,
        after_checkpoint: Option<u64>,
    ) -> ScreenerResult<Option<DepositEventBatch>> {
        Ok(self
            .batches
            .lock()
            .unwrap()
            .iter()
            .find(|b| after_checkpoint.map_or(true, |after| b.checkpoint > after))
            .cloned())
    }
}

/// JSON-RPC transport answering by method name. Queued responses for a
/// method are served in order, after which the last one keeps being served.
#[derive(Debug, Clone, Default)]
pub struct EthMockProvider {
    queued: std::sync::Arc<Mutex<HashMap<String, VecDeque<Value>>>>,
    last_served: std::sync::Arc<Mutex<HashMap<String, Value>>>,
    requests: std::sync::Arc<Mutex<Vec<(String, Value)>>>,
}

impl EthMockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response<R: Serialize>(&self, method: &str, response: R) {
        let value = serde_json::to_value(response).expect("serializable response");
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(value);
    }

    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl JsonRpcClient for EthMockProvider {
    type Error = MockError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, MockError> {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), serde_json::to_value(params)?));
        let next = self
            .queued
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        let mut last_served = self.last_served.lock().unwrap();
        let value = match next {
            Some(value) => {
                last_served.insert(method.to_string(), value.clone());
                value
            }
            None => last_served
                .get(method)
                .cloned()
                .ok_or(MockError::EmptyResponses)?,
        };
        Ok(serde_json::from_value(value)?)
    }
}
