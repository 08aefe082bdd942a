// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Rate-limited completion of screened deposits.
//!
//! There is one [`FulfillerWorker`] per supported asset, each consuming its
//! own fulfillment queue and owning that asset's [`RateLimitWindow`].
//! Throttling happens per job by re-delaying it on the queue, so a full
//! window for one asset never blocks another.
//!
//! All workers share a single signing key. The sign, estimate gas and submit
//! sequence runs under [`SignerLock`] so nonces are never raced, while
//! admission checks and queue consumption stay concurrent.

pub mod worker;

pub use worker::{FulfillerConfig, FulfillerWorker};

use crate::chain::DepositManagerReader;
use crate::error::ScreenerResult;
use crate::rate_limit::{RateLimitWindow, RateLimitWindowEntry};
use crate::signer::DepositCompletionSigner;
use crate::types::SupportedAsset;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub type SignerLock = Arc<Mutex<DepositCompletionSigner>>;

/// Seed the window from the contract's running total so a restart does not
/// forget value completed earlier in the current period.
pub async fn bootstrap_window(
    asset: &SupportedAsset,
    chain: &dyn DepositManagerReader,
    now_ms: u64,
) -> ScreenerResult<RateLimitWindow> {
    let state = chain.global_cap_state(asset.address).await?;
    let mut window = RateLimitWindow::new(&asset.ticker, asset.global_cap, asset.period_ms);
    if !state.running_total.is_zero() {
        window.add(RateLimitWindowEntry {
            timestamp_ms: state.last_reset_ms,
            amount: state.running_total,
        });
    }
    window.remove_old_entries(now_ms);
    info!(
        "[Fulfiller:{}] Window bootstrapped with {} in use of {}",
        asset.ticker,
        window.window_sum(),
        window.capacity()
    );
    Ok(window)
}
