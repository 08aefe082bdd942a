// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod chain;
pub mod config;
pub mod error;
pub mod eth_client;
pub mod eth_event_source;
pub mod fulfiller;
pub mod metrics;
pub mod node;
pub mod queue;
pub mod rate_limit;
pub mod rules;
pub mod screener;
pub mod server;
pub mod signer;
pub mod store;
pub mod types;
pub mod utils;
pub mod wait_estimator;

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
pub mod e2e_tests;

/// Retry `$func` with exponential backoff until it succeeds or has been
/// attempted `$max_attempts` times. Evaluates to the last result.
#[macro_export]
macro_rules! retry_with_max_attempts {
    ($func:expr, $max_attempts:expr) => {{
        // 0.1, 0.2, 0.4, 0.8 ... capped at 10 secs, applied with jitter
        let backoff = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(100),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: std::time::Duration::from_secs(10),
            max_elapsed_time: None,
            ..Default::default()
        };
        let max_attempts: u32 = std::cmp::max($max_attempts as u32, 1);
        let attempt = std::sync::atomic::AtomicU32::new(0);
        backoff::future::retry(backoff, || {
            let fut = async {
                let current = attempt.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                match $func.await {
                    Ok(v) => Ok(v),
                    Err(e) if current >= max_attempts => Err(backoff::Error::permanent(e)),
                    Err(e) => {
                        tracing::debug!(
                            "Retrying after attempt {}/{} failed: {:?}",
                            current,
                            max_attempts,
                            e
                        );
                        Err(backoff::Error::transient(e))
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}
