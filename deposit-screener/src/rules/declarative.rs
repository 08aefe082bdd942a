// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Rules loaded from configuration.
//!
//! A declarative rule names a field inside its source payload (JSON pointer)
//! and compares it against a constant:
//!
//! ```yaml
//! - name: REJECT_IF_RISK_OVER_HALF
//!   source: trm
//!   field: /risk
//!   comparator: gt
//!   value: 0.5
//!   action:
//!     type: reject
//!     reason: risk score too high
//! ```

use super::rule::{DataSourceKey, Rule, RuleAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Comparator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
    /// Array field holds `value`, or string field contains it as a substring
    Contains,
    Always,
    Never,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuleConfig {
    pub name: String,
    pub source: String,
    /// JSON pointer into the source payload. Unused by `always`/`never`.
    #[serde(default)]
    pub field: String,
    pub comparator: Comparator,
    #[serde(default)]
    pub value: Value,
    pub action: RuleAction,
}

impl RuleConfig {
    pub fn compile(&self) -> Rule {
        let comparator = self.comparator;
        let field = self.field.clone();
        let expected = self.value.clone();
        Rule::from_json_threshold(
            &self.name,
            DataSourceKey::new(&self.source),
            move |data: &Value| compare(comparator, &field, &expected, data),
            self.action.clone(),
        )
    }
}

fn compare(
    comparator: Comparator,
    field: &str,
    expected: &Value,
    data: &Value,
) -> Result<bool, String> {
    let actual = match comparator {
        Comparator::Always => return Ok(true),
        Comparator::Never => return Ok(false),
        _ => data
            .pointer(field)
            .ok_or_else(|| format!("field {} missing from payload", field))?,
    };
    match comparator {
        Comparator::Eq => Ok(json_eq(actual, expected)),
        Comparator::Ne => Ok(!json_eq(actual, expected)),
        Comparator::Contains => match actual {
            Value::Array(items) => Ok(items.iter().any(|item| json_eq(item, expected))),
            Value::String(s) => expected
                .as_str()
                .map(|needle| s.contains(needle))
                .ok_or_else(|| format!("cannot search string field {} for {}", field, expected)),
            other => Err(format!("field {} is not searchable: {}", field, other)),
        },
        ordering => {
            let (a, b) = match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(format!(
                        "cannot compare {} with {} numerically",
                        actual, expected
                    ))
                }
            };
            Ok(match ordering {
                Comparator::Gt => a > b,
                Comparator::Gte => a >= b,
                Comparator::Lt => a < b,
                Comparator::Lte => a <= b,
                _ => unreachable!("non-ordering comparators handled above"),
            })
        }
    }
}

// Numbers compare by value so `0` matches `0.0`
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
