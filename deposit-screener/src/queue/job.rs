// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{ScreenerError, ScreenerResult};
use crate::types::{DepositHash, DepositRequest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BackoffPolicy {
    Fixed { delay_ms: u64 },
    /// `delay_ms * 2^(attempts_made - 1)`
    Exponential { delay_ms: u64 },
}

impl BackoffPolicy {
    /// Delay before the next try, given how many attempts have already failed
    pub fn delay_for(&self, attempts_made: u32) -> u64 {
        match self {
            BackoffPolicy::Fixed { delay_ms } => *delay_ms,
            BackoffPolicy::Exponential { delay_ms } => {
                let exponent = attempts_made.saturating_sub(1).min(63);
                delay_ms.saturating_mul(1u64 << exponent)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Initial visibility delay
    pub delay_ms: u64,
    pub attempts: u32,
    pub backoff: BackoffPolicy,
}

impl JobOptions {
    pub fn new(attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            delay_ms: 0,
            attempts,
            backoff,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::new(1, BackoffPolicy::Fixed { delay_ms: 0 })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for `process_after_ms`, or waiting to be picked up
    Pending,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct QueueJob {
    pub id: DepositHash,
    /// JSON-encoded `DepositRequest`
    pub payload: String,
    pub opts: JobOptions,
    pub timestamp_ms: u64,
    pub process_after_ms: u64,
    pub attempts_made: u32,
    pub state: JobState,
    pub failed_reason: Option<String>,
    /// Insertion order, breaks ties between jobs due at the same instant
    pub(crate) seq: u64,
}

impl QueueJob {
    pub fn new(
        id: DepositHash,
        deposit: &DepositRequest,
        opts: JobOptions,
        now_ms: u64,
        seq: u64,
    ) -> ScreenerResult<Self> {
        Ok(Self {
            id,
            payload: serde_json::to_string(deposit)?,
            opts,
            timestamp_ms: now_ms,
            process_after_ms: now_ms.saturating_add(opts.delay_ms),
            attempts_made: 0,
            state: JobState::Pending,
            failed_reason: None,
            seq,
        })
    }

    pub fn deposit(&self) -> ScreenerResult<DepositRequest> {
        serde_json::from_str(&self.payload).map_err(|e| {
            ScreenerError::Serialization(format!("job {} payload: {}", self.id, e))
        })
    }

    /// Explicit delay still left before the job becomes visible
    pub fn remaining_delay_ms(&self, now_ms: u64) -> u64 {
        self.process_after_ms.saturating_sub(now_ms)
    }

    pub fn is_delayed(&self, now_ms: u64) -> bool {
        self.state == JobState::Pending && self.process_after_ms > now_ms
    }

    pub fn is_waiting(&self, now_ms: u64) -> bool {
        self.state == JobState::Pending && self.process_after_ms <= now_ms
    }

    /// Delivery order among pending jobs
    pub fn order_key(&self) -> (u64, u64) {
        (self.process_after_ms, self.seq)
    }
}

/// What `fail` did with the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { retry_at_ms: u64, attempts_made: u32 },
    Failed { attempts_made: u32 },
}
