// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::DepositRequest;
use std::time::Duration;

/// Turns a first-pass verdict into the delay before the second pass.
pub trait ScreenerDelayCalculator: Send + Sync {
    fn calculate_delay_ms(&self, deposit: &DepositRequest, verdict_delay_seconds: f64) -> u64;
}

/// Uses the rule chain's delay as is, optionally capped
#[derive(Debug, Clone, Default)]
pub struct VerdictDelayCalculator {
    max_delay: Option<Duration>,
}

impl VerdictDelayCalculator {
    pub fn new(max_delay: Option<Duration>) -> Self {
        Self { max_delay }
    }
}

impl ScreenerDelayCalculator for VerdictDelayCalculator {
    fn calculate_delay_ms(&self, _deposit: &DepositRequest, verdict_delay_seconds: f64) -> u64 {
        // negative or NaN totals (a Multiply by a negative value) mean no delay
        let seconds = if verdict_delay_seconds.is_finite() {
            verdict_delay_seconds.max(0.0)
        } else if verdict_delay_seconds == f64::INFINITY {
            f64::MAX
        } else {
            0.0
        };
        let delay_ms = (seconds * 1000.0).round().min(u64::MAX as f64) as u64;
        match self.max_delay {
            Some(max) => delay_ms.min(max.as_millis() as u64),
            None => delay_ms,
        }
    }
}

/// Ignores the verdict and always waits the same time
#[derive(Debug, Clone)]
pub struct FixedDelayCalculator(pub Duration);

impl ScreenerDelayCalculator for FixedDelayCalculator {
    fn calculate_delay_ms(&self, _deposit: &DepositRequest, _verdict_delay_seconds: f64) -> u64 {
        self.0.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::random_deposit;

    #[test]
    fn test_verdict_delay() {
        let deposit = random_deposit(1);
        let calc = VerdictDelayCalculator::default();
        assert_eq!(calc.calculate_delay_ms(&deposit, 50.0), 50_000);
        assert_eq!(calc.calculate_delay_ms(&deposit, 0.0015), 2);
        assert_eq!(calc.calculate_delay_ms(&deposit, -3.0), 0);
        assert_eq!(calc.calculate_delay_ms(&deposit, f64::NAN), 0);

        let capped = VerdictDelayCalculator::new(Some(Duration::from_secs(60)));
        assert_eq!(capped.calculate_delay_ms(&deposit, 10_000_000.0), 60_000);
        assert_eq!(capped.calculate_delay_ms(&deposit, f64::INFINITY), 60_000);
    }

    #[test]
    fn test_fixed_delay() {
        let calc = FixedDelayCalculator(Duration::from_secs(5));
        assert_eq!(calc.calculate_delay_ms(&random_deposit(1), 50.0), 5_000);
    }
}
