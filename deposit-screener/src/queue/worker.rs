// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Generic consumer loop shared by the arbiter and the fulfillers.
//!
//! Cancellation is only observed between jobs: a job that has been handed to
//! its processor always runs to an outcome.

use super::{FailOutcome, JobQueue, QueueJob};
use crate::error::{JobError, ScreenerError, ScreenerResult};
use crate::metrics::ScreenerMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &QueueJob) -> Result<(), JobError>;
}

pub async fn run_job_worker(
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn JobProcessor>,
    poll_interval: Duration,
    cancel: CancellationToken,
    metrics: Arc<ScreenerMetrics>,
) -> ScreenerResult<()> {
    let name = queue.name().to_string();
    info!("[JobQueue:{}] Worker started", name);
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let job = match queue.next_ready().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => continue,
                }
            }
            Err(e) => {
                warn!("[JobQueue:{}] Failed to poll queue: {:?}", name, e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => continue,
                }
            }
        };

        let outcome = processor.process(&job).await;
        if let Err(fatal) = apply_outcome(queue.as_ref(), &job, outcome, &metrics).await {
            error!(
                "[JobQueue:{}] Stopping worker on fatal error for job {}: {:?}",
                name, job.id, fatal
            );
            return Err(fatal);
        }
    }
    info!("[JobQueue:{}] Worker stopped", name);
    Ok(())
}

// Returns Err only for errors that must stop the loop. A failure to record
// the outcome leaves the job active and is logged, the loop keeps going.
async fn apply_outcome(
    queue: &dyn JobQueue,
    job: &QueueJob,
    outcome: Result<(), JobError>,
    metrics: &ScreenerMetrics,
) -> ScreenerResult<()> {
    let name = queue.name();
    let (operation, recorded) = match outcome {
        Ok(()) => ("complete", queue.complete(job.id).await),
        Err(JobError::RateLimited { delay_ms }) => {
            info!(
                "[JobQueue:{}] Job {} rate limited, visible again in {}ms",
                name, job.id, delay_ms
            );
            ("rate_limit", queue.rate_limit(job.id, delay_ms).await)
        }
        Err(JobError::Failed(e)) => {
            let recorded = queue.fail(job.id, &e.to_string()).await.map(|outcome| {
                match outcome {
                    FailOutcome::Retrying {
                        retry_at_ms,
                        attempts_made,
                    } => {
                        warn!(
                            "[JobQueue:{}] Job {} attempt {}/{} failed, retrying at {}: {:?}",
                            name, job.id, attempts_made, job.opts.attempts, retry_at_ms, e
                        );
                    }
                    FailOutcome::Failed { attempts_made } => {
                        metrics
                            .jobs_failed
                            .with_label_values(&[name, e.error_type()])
                            .inc();
                        error!(
                            "[JobQueue:{}] Job {} failed permanently after {} attempts: {:?}, deposit: {}",
                            name, job.id, attempts_made, e, job.payload
                        );
                    }
                }
            });
            ("fail", recorded)
        }
        Err(JobError::Fatal(e)) => {
            metrics
                .jobs_failed
                .with_label_values(&[name, e.error_type()])
                .inc();
            if let Err(discard_err) = queue.discard(job.id, &e.to_string()).await {
                warn!(
                    "[JobQueue:{}] Failed to discard job {}: {:?}",
                    name, job.id, discard_err
                );
            }
            return Err(e);
        }
    };
    if let Err(e) = recorded {
        metrics
            .err_job_bookkeeping
            .with_label_values(&[name, operation])
            .inc();
        error!(
            "[JobQueue:{}] Failed to {} job {}: {:?}",
            name, operation, job.id, e
        );
    }
    Ok(())
}

/// Flattens a spawned worker's join result
pub fn flatten_join_result(
    result: Result<ScreenerResult<()>, tokio::task::JoinError>,
) -> ScreenerResult<()> {
    result.map_err(|e| ScreenerError::Internal(format!("worker task panicked: {e}")))?
}
