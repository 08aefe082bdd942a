// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_histogram_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramVec, IntCounterVec, IntGauge,
    IntGaugeVec, Registry,
};

const FETCH_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

// Delays span from zero (admitted right away) up to a full rate-limit period
const DELAY_SEC_BUCKETS: &[f64] = &[
    0., 1., 5., 10., 30., 60., 120., 300., 600., 900., 1800., 3600., 7200., 14400., 43200., 86400.,
];

#[derive(Clone, Debug)]
pub struct ScreenerMetrics {
    pub(crate) screening_verdicts: IntCounterVec,
    pub(crate) rule_results: IntCounterVec,
    pub(crate) risk_data_fetches: IntCounterVec,
    pub(crate) risk_data_fetch_latency: HistogramVec,
    pub(crate) first_pass_delay_seconds: Histogram,

    pub(crate) deposit_events_observed: IntCounterVec,
    pub(crate) deposits_skipped: IntCounterVec,
    pub(crate) last_processed_checkpoint: IntGauge,
    pub(crate) err_batch_processing: IntCounterVec,

    pub(crate) jobs_enqueued: IntCounterVec,
    pub(crate) jobs_completed: IntCounterVec,
    pub(crate) jobs_retried: IntCounterVec,
    pub(crate) jobs_failed: IntCounterVec,
    pub(crate) jobs_rate_limited: IntCounterVec,
    pub(crate) err_job_bookkeeping: IntCounterVec,
    pub(crate) queue_depth: IntGaugeVec,

    pub(crate) rate_limit_delay_seconds: HistogramVec,
    pub(crate) rate_limit_window_usage: IntGaugeVec,
    pub(crate) submission_attempts: IntCounterVec,
    pub(crate) err_submission: IntCounterVec,
    pub(crate) fulfilled_deposits: IntCounterVec,
    pub(crate) fulfilled_value: IntCounterVec,

    pub(crate) requests_received: IntCounterVec,
    pub(crate) requests_ok: IntCounterVec,
    pub(crate) err_requests: IntCounterVec,
    pub(crate) requests_inflight: IntGaugeVec,
}

impl ScreenerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            screening_verdicts: register_int_counter_vec_with_registry!(
                "screener_screening_verdicts",
                "Total screening verdicts, by pass and verdict",
                &["pass", "verdict"],
                registry,
            )
            .unwrap(),
            rule_results: register_int_counter_vec_with_registry!(
                "screener_rule_results",
                "Total per-rule evaluation results, by rule name and result",
                &["rule", "result"],
                registry,
            )
            .unwrap(),
            risk_data_fetches: register_int_counter_vec_with_registry!(
                "screener_risk_data_fetches",
                "Total risk data fetches, by source and outcome",
                &["source", "outcome"],
                registry,
            )
            .unwrap(),
            risk_data_fetch_latency: register_histogram_vec_with_registry!(
                "screener_risk_data_fetch_latency",
                "Latency of risk data fetches, by source",
                &["source"],
                FETCH_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            first_pass_delay_seconds: register_histogram_with_registry!(
                "screener_first_pass_delay_seconds",
                "Delay assigned to deposits that passed the first screen",
                DELAY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            deposit_events_observed: register_int_counter_vec_with_registry!(
                "screener_deposit_events_observed",
                "Total deposit manager events observed, by event kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            deposits_skipped: register_int_counter_vec_with_registry!(
                "screener_deposits_skipped",
                "Total deposits skipped without screening, by stage and reason",
                &["stage", "reason"],
                registry,
            )
            .unwrap(),
            last_processed_checkpoint: register_int_gauge_with_registry!(
                "screener_last_processed_checkpoint",
                "Checkpoint of the last fully processed event batch",
                registry,
            )
            .unwrap(),
            err_batch_processing: register_int_counter_vec_with_registry!(
                "screener_err_batch_processing",
                "Total event batches that failed and will be retried, by error type",
                &["error_type"],
                registry,
            )
            .unwrap(),
            jobs_enqueued: register_int_counter_vec_with_registry!(
                "screener_jobs_enqueued",
                "Total jobs enqueued, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            jobs_completed: register_int_counter_vec_with_registry!(
                "screener_jobs_completed",
                "Total jobs completed, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            jobs_retried: register_int_counter_vec_with_registry!(
                "screener_jobs_retried",
                "Total job attempts that failed and were rescheduled, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            jobs_failed: register_int_counter_vec_with_registry!(
                "screener_jobs_failed",
                "Total jobs that exhausted their attempts, by queue and error type",
                &["queue", "error_type"],
                registry,
            )
            .unwrap(),
            jobs_rate_limited: register_int_counter_vec_with_registry!(
                "screener_jobs_rate_limited",
                "Total jobs re-delayed by rate limiting, by queue",
                &["queue"],
                registry,
            )
            .unwrap(),
            err_job_bookkeeping: register_int_counter_vec_with_registry!(
                "screener_err_job_bookkeeping",
                "Total errors recording a job outcome on its queue, by queue and operation",
                &["queue", "operation"],
                registry,
            )
            .unwrap(),
            queue_depth: register_int_gauge_vec_with_registry!(
                "screener_queue_depth",
                "Jobs not yet completed or failed, by queue and visibility",
                &["queue", "state"],
                registry,
            )
            .unwrap(),
            rate_limit_delay_seconds: register_histogram_vec_with_registry!(
                "screener_rate_limit_delay_seconds",
                "Delay imposed on fulfillment jobs by the rate limit window, by asset",
                &["asset"],
                DELAY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            rate_limit_window_usage: register_int_gauge_vec_with_registry!(
                "screener_rate_limit_window_usage",
                "Value currently counted in the rate limit window, saturated to i64, by asset",
                &["asset"],
                registry,
            )
            .unwrap(),
            submission_attempts: register_int_counter_vec_with_registry!(
                "screener_submission_attempts",
                "Total completion transaction submission attempts, by asset",
                &["asset"],
                registry,
            )
            .unwrap(),
            err_submission: register_int_counter_vec_with_registry!(
                "screener_err_submission",
                "Total completion transaction submissions that failed after retries, by asset",
                &["asset"],
                registry,
            )
            .unwrap(),
            fulfilled_deposits: register_int_counter_vec_with_registry!(
                "screener_fulfilled_deposits",
                "Total deposits completed on-chain, by asset",
                &["asset"],
                registry,
            )
            .unwrap(),
            fulfilled_value: register_int_counter_vec_with_registry!(
                "screener_fulfilled_value",
                "Total value of deposits completed on-chain in base units saturated to u64, by asset",
                &["asset"],
                registry,
            )
            .unwrap(),
            requests_received: register_int_counter_vec_with_registry!(
                "screener_requests_received",
                "Total number of requests received by the server, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            requests_ok: register_int_counter_vec_with_registry!(
                "screener_requests_ok",
                "Total number of ok requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            err_requests: register_int_counter_vec_with_registry!(
                "screener_err_requests",
                "Total number of erred requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            requests_inflight: register_int_gauge_vec_with_registry!(
                "screener_requests_inflight",
                "Total number of inflight requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
