// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Rolling per-asset admission window.
//!
//! Each entry records value that landed on-chain at a given time. An entry
//! counts against the capacity until `period_ms` has passed since its
//! timestamp. Entries are appended in non-decreasing timestamp order, so
//! eviction only ever drops a prefix.

use ethers::types::U256;
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindowEntry {
    pub timestamp_ms: u64,
    pub amount: U256,
}

#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    /// Label for logging
    asset: String,
    capacity: U256,
    period_ms: u64,
    entries: VecDeque<RateLimitWindowEntry>,
    /// Always equal to the sum of `entries[].amount`
    running_sum: U256,
}

impl RateLimitWindow {
    pub fn new(asset: &str, capacity: U256, period_ms: u64) -> Self {
        Self {
            asset: asset.to_string(),
            capacity,
            period_ms,
            entries: VecDeque::new(),
            running_sum: U256::zero(),
        }
    }

    pub fn capacity(&self) -> U256 {
        self.capacity
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn window_sum(&self) -> U256 {
        self.running_sum
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry. A timestamp older than the newest entry is raised to
    /// it so the window stays sorted.
    pub fn add(&mut self, mut entry: RateLimitWindowEntry) {
        if let Some(last) = self.entries.back() {
            if entry.timestamp_ms < last.timestamp_ms {
                debug!(
                    "[RateLimit:{}] Out-of-order entry at {} raised to {}",
                    self.asset, entry.timestamp_ms, last.timestamp_ms
                );
                entry.timestamp_ms = last.timestamp_ms;
            }
        }
        self.running_sum += entry.amount;
        self.entries.push_back(entry);
    }

    /// Evict every entry with `timestamp < now - period`. Must run before an
    /// admission decision, otherwise expired value still counts.
    pub fn remove_old_entries(&mut self, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.period_ms);
        let mut removed = 0;
        while let Some(front) = self.entries.front() {
            if front.timestamp_ms >= cutoff {
                break;
            }
            self.running_sum -= front.amount;
            self.entries.pop_front();
            removed += 1;
        }
        if removed > 0 {
            debug!(
                "[RateLimit:{}] Evicted {} entries, window sum now {}",
                self.asset, removed, self.running_sum
            );
        }
        removed
    }

    /// `running_sum + amount > capacity`. Landing exactly on the capacity is allowed.
    pub fn would_exceed_rate_limit(&self, amount: U256) -> bool {
        match self.running_sum.checked_add(amount) {
            Some(total) => total > self.capacity,
            None => true,
        }
    }

    /// Earliest time at which evictions alone free `amount` of capacity.
    ///
    /// Entries are scanned oldest-first until their cumulative amount reaches
    /// `amount`; the answer is the moment that entry ages out. If all entries
    /// together are less than `amount`, the newest entry's expiry is returned
    /// since the window is empty from then on. `None` if there are no entries.
    pub fn time_when_amount_available(&self, amount: U256) -> Option<u64> {
        let mut scanned = U256::zero();
        for entry in &self.entries {
            scanned = scanned.saturating_add(entry.amount);
            if scanned >= amount {
                return Some(entry.timestamp_ms + self.period_ms);
            }
        }
        self.entries
            .back()
            .map(|newest| newest.timestamp_ms + self.period_ms)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RateLimitWindowEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: u64 = 60 * 1000;
    const HOUR: u64 = 60 * MINUTE;

    fn entry(timestamp_ms: u64, amount: u64) -> RateLimitWindowEntry {
        RateLimitWindowEntry {
            timestamp_ms,
            amount: U256::from(amount),
        }
    }

    #[test]
    fn test_would_exceed_boundary() {
        let mut window = RateLimitWindow::new("TEST", U256::from(100u64), HOUR);
        window.add(entry(0, 60));
        assert!(!window.would_exceed_rate_limit(U256::from(39u64)));
        // landing exactly on the capacity is allowed
        assert!(!window.would_exceed_rate_limit(U256::from(40u64)));
        assert!(window.would_exceed_rate_limit(U256::from(41u64)));
        assert!(window.would_exceed_rate_limit(U256::MAX));
    }

    #[test]
    fn test_remove_old_entries_keeps_sum_consistent() {
        let now = 10 * HOUR;
        let mut window = RateLimitWindow::new("TEST", U256::from(1_000u64), HOUR);
        let timestamps = [
            now - 3 * HOUR,
            now - 2 * HOUR,
            now - HOUR - 1,
            now - HOUR,
            now - 30 * MINUTE,
            now,
        ];
        for (i, ts) in timestamps.iter().enumerate() {
            window.add(entry(*ts, (i as u64 + 1) * 10));
        }
        assert_eq!(window.window_sum(), U256::from(210u64));

        let removed = window.remove_old_entries(now);
        assert_eq!(removed, 3);

        let expected: U256 = timestamps
            .iter()
            .enumerate()
            .filter(|(_, ts)| **ts >= now - HOUR)
            .map(|(i, _)| U256::from((i as u64 + 1) * 10))
            .fold(U256::zero(), |acc, v| acc + v);
        assert_eq!(window.window_sum(), expected);
        assert_eq!(window.window_sum(), U256::from(150u64));
        let recomputed = window
            .entries()
            .fold(U256::zero(), |acc, e| acc + e.amount);
        assert_eq!(recomputed, window.window_sum());

        // idempotent at the same instant
        assert_eq!(window.remove_old_entries(now), 0);
    }

    #[test]
    fn test_time_when_amount_available_scans_oldest_first() {
        let now = 10 * HOUR;
        let mut window = RateLimitWindow::new("TEST", U256::from(100u64), HOUR);
        window.add(entry(now - 30 * MINUTE, 80));
        window.remove_old_entries(now);

        assert!(window.would_exceed_rate_limit(U256::from(30u64)));
        assert_eq!(
            window.time_when_amount_available(U256::from(30u64)),
            Some(now + 30 * MINUTE)
        );
    }

    #[test]
    fn test_time_when_amount_available_accumulates() {
        let mut window = RateLimitWindow::new("TEST", U256::from(100u64), HOUR);
        window.add(entry(1_000, 20));
        window.add(entry(2_000, 20));
        window.add(entry(3_000, 20));
        assert_eq!(
            window.time_when_amount_available(U256::from(20u64)),
            Some(1_000 + HOUR)
        );
        assert_eq!(
            window.time_when_amount_available(U256::from(21u64)),
            Some(2_000 + HOUR)
        );
        assert_eq!(
            window.time_when_amount_available(U256::from(60u64)),
            Some(3_000 + HOUR)
        );
    }

    #[test]
    fn test_time_when_amount_available_past_end_is_bounded() {
        let mut window = RateLimitWindow::new("TEST", U256::from(100u64), HOUR);
        assert_eq!(window.time_when_amount_available(U256::from(1u64)), None);

        window.add(entry(1_000, 10));
        window.add(entry(5_000, 10));
        // more than everything tracked: clamps to the newest entry's expiry
        assert_eq!(
            window.time_when_amount_available(U256::from(500u64)),
            Some(5_000 + HOUR)
        );
    }

    #[test]
    fn test_out_of_order_entry_is_raised() {
        let mut window = RateLimitWindow::new("TEST", U256::from(100u64), HOUR);
        window.add(entry(5_000, 10));
        window.add(entry(4_000, 10));
        let timestamps: Vec<u64> = window.entries().map(|e| e.timestamp_ms).collect();
        assert_eq!(timestamps, vec![5_000, 5_000]);
        assert_eq!(window.window_sum(), U256::from(20u64));
    }
}
