// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A single named policy check and the values it produces.

use crate::error::{ScreenerError, ScreenerResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Identifies one risk data source. Rules sharing a key share one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSourceKey(String);

impl DataSourceKey {
    pub fn new(key: &str) -> Self {
        Self(key.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DataSourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl fmt::Display for DataSourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelayOperation {
    Add,
    Multiply,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayAction {
    pub operation: DelayOperation,
    pub value: f64,
}

impl DelayAction {
    pub fn add(value: f64) -> Self {
        Self {
            operation: DelayOperation::Add,
            value,
        }
    }

    pub fn multiply(value: f64) -> Self {
        Self {
            operation: DelayOperation::Multiply,
            value,
        }
    }

    pub fn apply(&self, total_seconds: f64) -> f64 {
        match self.operation {
            DelayOperation::Add => total_seconds + self.value,
            DelayOperation::Multiply => total_seconds * self.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuleAction {
    Reject { reason: String },
    Delay(DelayAction),
}

impl RuleAction {
    pub fn reject(reason: &str) -> Self {
        RuleAction::Reject {
            reason: reason.to_string(),
        }
    }
}

/// Per-rule outcome, recorded for every evaluated rule
#[derive(Debug, Clone, PartialEq)]
pub enum RuleResult {
    Rejection { reason: String },
    Delay(DelayAction),
    ActionNotTriggered,
}

impl RuleResult {
    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            RuleResult::Rejection { .. } => "rejection",
            RuleResult::Delay(_) => "delay",
            RuleResult::ActionNotTriggered => "not_triggered",
        }
    }
}

/// Terminal output of a rule chain evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScreeningVerdict {
    Rejection {
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    Delay {
        time_seconds: f64,
    },
}

impl ScreeningVerdict {
    pub fn is_rejection(&self) -> bool {
        matches!(self, ScreeningVerdict::Rejection { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScreeningVerdict::Rejection { .. } => "rejection",
            ScreeningVerdict::Delay { .. } => "delay",
        }
    }
}

type Threshold = Arc<dyn Fn(&Value) -> Result<bool, String> + Send + Sync>;

/// `threshold(data)` decides whether `action` applies. The data is the
/// payload of `source`, fetched at most once per evaluation by the rule set.
#[derive(Clone)]
pub struct Rule {
    name: String,
    source: DataSourceKey,
    threshold: Threshold,
    action: RuleAction,
}

impl Rule {
    /// Build a rule whose threshold reads the source payload as `T`.
    /// A payload that does not deserialize into `T` makes the evaluation fail.
    pub fn new<T, F>(
        name: &str,
        source: impl Into<DataSourceKey>,
        threshold: F,
        action: RuleAction,
    ) -> Self
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::from_json_threshold(
            name,
            source,
            move |value: &Value| {
                let data = T::deserialize(value).map_err(|e| e.to_string())?;
                Ok(threshold(&data))
            },
            action,
        )
    }

    /// Build a rule over the raw JSON payload
    pub fn from_json_threshold<F>(
        name: &str,
        source: impl Into<DataSourceKey>,
        threshold: F,
        action: RuleAction,
    ) -> Self
    where
        F: Fn(&Value) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            source: source.into(),
            threshold: Arc::new(threshold),
            action,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &DataSourceKey {
        &self.source
    }

    pub fn action(&self) -> &RuleAction {
        &self.action
    }

    pub fn evaluate(&self, data: &Value) -> ScreenerResult<RuleResult> {
        let triggered = (self.threshold)(data).map_err(|reason| ScreenerError::RiskDataDecode {
            rule: self.name.clone(),
            source_key: self.source.to_string(),
            reason,
        })?;
        if !triggered {
            return Ok(RuleResult::ActionNotTriggered);
        }
        Ok(match &self.action {
            RuleAction::Reject { reason } => RuleResult::Rejection {
                reason: reason.clone(),
            },
            RuleAction::Delay(delay) => RuleResult::Delay(*delay),
        })
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("action", &self.action)
            .finish()
    }
}
