// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::{DepositHash, DepositRequestStatus};
use ethers::types::Address;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScreenerError {
    // A risk data provider call failed; the screening outcome is indeterminate
    #[error("Risk data fetch from source {source_key} failed: {reason}")]
    RiskDataFetch { source_key: String, reason: String },
    // Provider payload did not match what the rule expects; also indeterminate
    #[error("Rule {rule} could not evaluate data from {source_key}: {reason}")]
    RiskDataDecode {
        rule: String,
        source_key: String,
        reason: String,
    },
    // The deposit would be rejected by screening
    #[error("Deposit rejected: {0}")]
    Rejected(String),
    // Asset is not in the supported set. Logic error when seen past ingestion.
    #[error("Unsupported asset {0:?}")]
    UnsupportedAsset(Address),
    // Wait estimate asked for a deposit in a status that has no queue position
    #[error("Cannot estimate wait for deposit {hash} in status {status}")]
    InvalidDepositStatus {
        hash: DepositHash,
        status: DepositRequestStatus,
    },
    #[error("No queued job for deposit {0}")]
    JobNotFound(DepositHash),
    // Deposit value alone is larger than the asset's rate-limit capacity
    #[error("Deposit {hash} value exceeds the rate limit capacity of its asset")]
    ExceedsCapacity { hash: DepositHash },
    #[error("Chain read error: {0}")]
    ChainRead(String),
    #[error("Transaction submission failed: {0}")]
    Submission(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Queue error: {0}")]
    Queue(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScreenerError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            ScreenerError::RiskDataFetch { .. } => "risk_data_fetch",
            ScreenerError::RiskDataDecode { .. } => "risk_data_decode",
            ScreenerError::Rejected(_) => "rejected",
            ScreenerError::UnsupportedAsset(_) => "unsupported_asset",
            ScreenerError::InvalidDepositStatus { .. } => "invalid_deposit_status",
            ScreenerError::JobNotFound(_) => "job_not_found",
            ScreenerError::ExceedsCapacity { .. } => "exceeds_capacity",
            ScreenerError::ChainRead(_) => "chain_read",
            ScreenerError::Submission(_) => "submission",
            ScreenerError::Signing(_) => "signing",
            ScreenerError::Queue(_) => "queue",
            ScreenerError::Store(_) => "store",
            ScreenerError::Serialization(_) => "serialization",
            ScreenerError::Internal(_) => "internal",
        }
    }

    /// Errors meaning "we could not decide", as opposed to a decision
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            ScreenerError::RiskDataFetch { .. } | ScreenerError::RiskDataDecode { .. }
        )
    }
}

impl From<serde_json::Error> for ScreenerError {
    fn from(e: serde_json::Error) -> Self {
        ScreenerError::Serialization(e.to_string())
    }
}

pub type ScreenerResult<T> = Result<T, ScreenerError>;

/// Outcome of a queue job handler that did not complete the job
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Backpressure, not a failure: make the job visible again after `delay_ms`
    /// without spending one of its attempts.
    #[error("Rate limited, retry in {delay_ms}ms")]
    RateLimited { delay_ms: u64 },
    /// Counts against the job's attempts and is retried with backoff
    #[error(transparent)]
    Failed(ScreenerError),
    /// Logic error. Stops the consuming loop.
    #[error("Fatal: {0}")]
    Fatal(ScreenerError),
}

impl From<ScreenerError> for JobError {
    fn from(e: ScreenerError) -> Self {
        JobError::Failed(e)
    }
}
