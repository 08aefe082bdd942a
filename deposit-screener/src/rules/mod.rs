// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod declarative;
pub mod fetcher;
pub mod rule;
pub mod rule_set;

pub use declarative::{Comparator, RuleConfig};
pub use fetcher::{HttpRiskDataFetcher, RiskDataFetcher};
pub use rule::{
    DataSourceKey, DelayAction, DelayOperation, Rule, RuleAction, RuleResult, ScreeningVerdict,
};
pub use rule_set::RuleSet;
