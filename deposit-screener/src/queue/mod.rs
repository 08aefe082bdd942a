// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Delayed job queues.
//!
//! Jobs are keyed by deposit hash, so enqueueing the same deposit twice is a
//! no-op. Delivery is at-least-once: a job handed out by `next_ready` stays
//! active until the consumer reports `complete`, `rate_limit` or `fail`.
//!
//! ```text
//!   enqueue ──► Pending(delayed) ──► Pending(waiting) ──► Active ──► Completed
//!                    ▲                                      │
//!                    └──────── rate_limit / fail(retry) ────┤
//!                                                           └──► Failed
//! ```

pub mod job;
pub mod memory;
pub mod worker;

pub use job::{BackoffPolicy, FailOutcome, JobOptions, JobState, QueueJob};
pub use memory::InMemoryJobQueue;
pub use worker::{flatten_join_result, run_job_worker, JobProcessor};

use crate::error::ScreenerResult;
use crate::types::{DepositHash, DepositRequest};
use async_trait::async_trait;

#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Returns false if a job with this id already exists, in any state.
    async fn enqueue(
        &self,
        id: DepositHash,
        deposit: &DepositRequest,
        opts: JobOptions,
    ) -> ScreenerResult<bool>;

    /// Hand out the earliest due pending job and mark it active
    async fn next_ready(&self) -> ScreenerResult<Option<QueueJob>>;

    async fn complete(&self, id: DepositHash) -> ScreenerResult<()>;

    /// Make an active job visible again after `delay_ms` without spending an attempt
    async fn rate_limit(&self, id: DepositHash, delay_ms: u64) -> ScreenerResult<()>;

    /// Record a failed attempt. The job is rescheduled with its backoff
    /// until its attempts are used up, then marked failed.
    async fn fail(&self, id: DepositHash, reason: &str) -> ScreenerResult<FailOutcome>;

    /// Mark a job failed regardless of remaining attempts
    async fn discard(&self, id: DepositHash, reason: &str) -> ScreenerResult<()>;

    /// Pending jobs not yet due, in delivery order
    async fn get_delayed(&self) -> ScreenerResult<Vec<QueueJob>>;

    /// Pending jobs that are due, in delivery order
    async fn get_waiting(&self) -> ScreenerResult<Vec<QueueJob>>;

    async fn get_job(&self, id: DepositHash) -> ScreenerResult<Option<QueueJob>>;
}
