// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::job::{FailOutcome, JobOptions, JobState, QueueJob};
use super::JobQueue;
use crate::error::{ScreenerError, ScreenerResult};
use crate::metrics::ScreenerMetrics;
use crate::types::{DepositHash, DepositRequest};
use crate::utils::now_ms;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Finished jobs kept whole for inspection through `get_job`
pub const DEFAULT_FINISHED_RETENTION: usize = 1024;

#[derive(Default)]
struct Inner {
    /// Pending and active jobs
    live: HashMap<DepositHash, QueueJob>,
    /// Pending jobs by delivery order
    pending: BTreeMap<(u64, u64), DepositHash>,
    /// Most recently finished jobs, oldest first
    finished: VecDeque<QueueJob>,
    /// Every id that reached Completed or Failed, for enqueue dedup
    finished_ids: HashSet<DepositHash>,
    next_seq: u64,
}

impl Inner {
    fn schedule(&mut self, job: &QueueJob) {
        self.pending.insert(job.order_key(), job.id);
    }

    fn finish(&mut self, mut job: QueueJob, state: JobState, retention: usize) {
        self.pending.remove(&job.order_key());
        job.state = state;
        self.finished_ids.insert(job.id);
        self.finished.push_back(job);
        while self.finished.len() > retention {
            self.finished.pop_front();
        }
    }

    fn finished_job(&self, id: DepositHash) -> Option<&QueueJob> {
        self.finished.iter().rev().find(|j| j.id == id)
    }
}

pub struct InMemoryJobQueue {
    name: String,
    inner: Mutex<Inner>,
    finished_retention: usize,
    metrics: Arc<ScreenerMetrics>,
}

impl InMemoryJobQueue {
    pub fn new(name: &str, metrics: Arc<ScreenerMetrics>) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(Inner::default()),
            finished_retention: DEFAULT_FINISHED_RETENTION,
            metrics,
        }
    }

    pub fn with_finished_retention(mut self, finished_retention: usize) -> Self {
        self.finished_retention = finished_retention;
        self
    }

    fn update_depth(&self, inner: &Inner, now: u64) {
        let waiting = inner.pending.range(..=(now, u64::MAX)).count();
        let delayed = inner.pending.len() - waiting;
        let active = inner.live.len() - inner.pending.len();
        for (state, count) in [("delayed", delayed), ("waiting", waiting), ("active", active)] {
            self.metrics
                .queue_depth
                .with_label_values(&[&self.name, state])
                .set(count as i64);
        }
    }

    fn pending_sorted(&self, inner: &Inner, filter: impl Fn(&QueueJob) -> bool) -> Vec<QueueJob> {
        inner
            .pending
            .values()
            .filter_map(|id| inner.live.get(id))
            .filter(|j| filter(j))
            .cloned()
            .collect()
    }

    fn active_job<'a>(&self, inner: &'a mut Inner, id: DepositHash) -> ScreenerResult<&'a mut QueueJob> {
        let name = &self.name;
        if inner.finished_ids.contains(&id) {
            return Err(ScreenerError::Queue(format!(
                "[JobQueue:{}] job {} already finished, expected Active",
                name, id
            )));
        }
        match inner.live.get_mut(&id) {
            Some(job) if job.state == JobState::Active => Ok(job),
            Some(job) => Err(ScreenerError::Queue(format!(
                "[JobQueue:{}] job {} is {:?}, expected Active",
                name, id, job.state
            ))),
            None => Err(ScreenerError::JobNotFound(id)),
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(
        &self,
        id: DepositHash,
        deposit: &DepositRequest,
        opts: JobOptions,
    ) -> ScreenerResult<bool> {
        let now = now_ms();
        let mut inner = self.inner.lock().await;
        if inner.live.contains_key(&id) || inner.finished_ids.contains(&id) {
            debug!("[JobQueue:{}] Job {} already exists, skipping", self.name, id);
            return Ok(false);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let job = QueueJob::new(id, deposit, opts, now, seq)?;
        info!(
            "[JobQueue:{}] Enqueued job {} with delay {}ms",
            self.name, id, opts.delay_ms
        );
        inner.schedule(&job);
        inner.live.insert(id, job);
        self.metrics
            .jobs_enqueued
            .with_label_values(&[&self.name])
            .inc();
        self.update_depth(&inner, now);
        Ok(true)
    }

    async fn next_ready(&self) -> ScreenerResult<Option<QueueJob>> {
        let now = now_ms();
        let mut inner = self.inner.lock().await;
        let id = match inner.pending.first_key_value() {
            Some((&(process_after_ms, _), &id)) if process_after_ms <= now => id,
            _ => return Ok(None),
        };
        inner.pending.pop_first();
        let job = inner
            .live
            .get_mut(&id)
            .ok_or(ScreenerError::JobNotFound(id))?;
        job.state = JobState::Active;
        let job = job.clone();
        self.update_depth(&inner, now);
        Ok(Some(job))
    }

    async fn complete(&self, id: DepositHash) -> ScreenerResult<()> {
        let now = now_ms();
        let mut inner = self.inner.lock().await;
        self.active_job(&mut inner, id)?;
        let finished = inner.live.remove(&id);
        if let Some(job) = finished {
            inner.finish(job, JobState::Completed, self.finished_retention);
        }
        self.metrics
            .jobs_completed
            .with_label_values(&[&self.name])
            .inc();
        self.update_depth(&inner, now);
        Ok(())
    }

    async fn rate_limit(&self, id: DepositHash, delay_ms: u64) -> ScreenerResult<()> {
        let now = now_ms();
        let mut inner = self.inner.lock().await;
        let job = self.active_job(&mut inner, id)?;
        job.state = JobState::Pending;
        job.process_after_ms = now.saturating_add(delay_ms);
        let job = job.clone();
        inner.schedule(&job);
        self.metrics
            .jobs_rate_limited
            .with_label_values(&[&self.name])
            .inc();
        self.update_depth(&inner, now);
        Ok(())
    }

    async fn fail(&self, id: DepositHash, reason: &str) -> ScreenerResult<FailOutcome> {
        let now = now_ms();
        let mut inner = self.inner.lock().await;
        let job = self.active_job(&mut inner, id)?;
        job.attempts_made += 1;
        job.failed_reason = Some(reason.to_string());
        let outcome = if job.attempts_made < job.opts.attempts {
            let retry_at_ms = now.saturating_add(job.opts.backoff.delay_for(job.attempts_made));
            job.state = JobState::Pending;
            job.process_after_ms = retry_at_ms;
            let attempts_made = job.attempts_made;
            let job = job.clone();
            inner.schedule(&job);
            self.metrics
                .jobs_retried
                .with_label_values(&[&self.name])
                .inc();
            FailOutcome::Retrying {
                retry_at_ms,
                attempts_made,
            }
        } else {
            let attempts_made = job.attempts_made;
            warn!(
                "[JobQueue:{}] Job {} failed after {} attempts: {}",
                self.name, id, attempts_made, reason
            );
            let finished = inner.live.remove(&id);
            if let Some(job) = finished {
                inner.finish(job, JobState::Failed, self.finished_retention);
            }
            FailOutcome::Failed { attempts_made }
        };
        self.update_depth(&inner, now);
        Ok(outcome)
    }

    async fn discard(&self, id: DepositHash, reason: &str) -> ScreenerResult<()> {
        let now = now_ms();
        let mut inner = self.inner.lock().await;
        if inner.finished_ids.contains(&id) {
            debug!("[JobQueue:{}] Job {} already finished, not discarding", self.name, id);
            return Ok(());
        }
        let mut job = inner
            .live
            .remove(&id)
            .ok_or(ScreenerError::JobNotFound(id))?;
        job.failed_reason = Some(reason.to_string());
        inner.finish(job, JobState::Failed, self.finished_retention);
        self.update_depth(&inner, now);
        Ok(())
    }

    async fn get_delayed(&self) -> ScreenerResult<Vec<QueueJob>> {
        let now = now_ms();
        let inner = self.inner.lock().await;
        Ok(self.pending_sorted(&inner, |j| j.is_delayed(now)))
    }

    async fn get_waiting(&self) -> ScreenerResult<Vec<QueueJob>> {
        let now = now_ms();
        let inner = self.inner.lock().await;
        Ok(self.pending_sorted(&inner, |j| j.is_waiting(now)))
    }

    async fn get_job(&self, id: DepositHash) -> ScreenerResult<Option<QueueJob>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .live
            .get(&id)
            .or_else(|| inner.finished_job(id))
            .cloned())
    }
}
