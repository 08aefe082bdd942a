// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, Context};
use ethers::signers::LocalWallet;
use ethers::types::U256;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock in unix milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Clamp a U256 into u64 range. Token amounts and gas values above u64::MAX
/// only appear in metrics and ETA math, where saturation is acceptable.
pub fn u256_to_u64_saturating(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

/// `whole_tokens * 10^precision`
pub fn whole_tokens_to_base_units(whole_tokens: u64, precision: u32) -> U256 {
    U256::from(whole_tokens) * U256::exp10(precision as usize)
}

/// Scale `value` by a decimal multiplier using basis points, rounding down.
/// Used for the gas-limit safety margin.
pub fn apply_multiplier(value: U256, multiplier: f64) -> U256 {
    let bps = (multiplier * 10_000.0).round() as u64;
    value * U256::from(bps) / U256::from(10_000u64)
}

// Read a hex-encoded secp256k1 private key (optionally 0x prefixed) from a file.
pub fn read_wallet(path: &Path) -> anyhow::Result<LocalWallet> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {:?}", path))?;
    contents
        .trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .map_err(|e| anyhow!("Invalid private key in {:?}: {:?}", path, e))
}
