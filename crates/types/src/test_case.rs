//! Test-case object graph consumed by the engine.
//!
//! The shapes map one-to-one onto the YAML authoring format so a test file can
//! be deserialized straight into a [`TestCase`]. Field order is preserved via
//! `IndexMap` wherever authors expect declaration order (variables, options).

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A complete test: variables plus setup, main and teardown phases.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Seed values loaded into the variable store before any step runs.
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    #[serde(default)]
    pub setup: Vec<Step>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub teardown: Vec<Step>,
}

/// One node of the test tree.
///
/// A step either invokes a single `action` or groups child `steps`; either
/// form may be wrapped in `if`, `for`/`while`, and `retry`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub options: IndexMap<String, Value>,
    /// Variable that receives the (possibly extracted) action data.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default, rename = "if")]
    pub r#if: Option<String>,
    /// `start..end`, `[a, b, c]`, a bare count, or a `${var}` array reference.
    #[serde(default, rename = "for", deserialize_with = "deserialize_optional_scalar")]
    pub r#for: Option<String>,
    #[serde(default, rename = "while")]
    pub r#while: Option<String>,
    /// Per-step iteration cap for `while`; never above the executor's cap.
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub extract: Option<ExtractSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Keep going with the next sibling when this step fails.
    #[serde(default, rename = "continue")]
    pub continue_on_failure: bool,
    /// In setup, a failing critical step prevents the main phase from running.
    #[serde(default)]
    pub critical: bool,
}

impl Step {
    /// Convenience constructor for a plain action step.
    pub fn action(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: Some(action.into()),
            ..Default::default()
        }
    }

    /// Convenience constructor for a nested group.
    pub fn group(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            ..Default::default()
        }
    }

    pub fn has_children(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Action name shown in reports.
    pub fn action_label(&self) -> &str {
        match &self.action {
            Some(action) => action.as_str(),
            None if self.has_children() => NESTED_STEPS_ACTION,
            None => "",
        }
    }
}

/// Action label recorded for the aggregate row of a nested group.
pub const NESTED_STEPS_ACTION: &str = "nested_steps";

/// Retry policy of a single step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Duration string such as `500ms`, `1s`, `1.5s`, `2m`; empty means no delay.
    #[serde(default, deserialize_with = "deserialize_scalar_string")]
    pub delay: String,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Condition evaluated after a non-passing attempt; `false` stops retrying.
    #[serde(default)]
    pub retry_if: Option<String>,
    #[serde(default)]
    pub retry_on: Vec<RetryOn>,
    /// `None` means the default (`true`).
    #[serde(default)]
    pub stop_on_success: Option<bool>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay: String::new(),
            backoff: BackoffStrategy::Fixed,
            retry_if: None,
            retry_on: Vec::new(),
            stop_on_success: None,
        }
    }
}

impl RetryConfig {
    pub fn stops_on_success(&self) -> bool {
        self.stop_on_success.unwrap_or(true)
    }
}

fn default_attempts() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

/// Coarse error tags a retry can be limited to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    HttpError,
    Timeout,
    ConnectionError,
    AssertionFailed,
    All,
}

/// Post-processing applied to a passed action's data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExtractSpec {
    #[serde(rename = "type")]
    pub kind: ExtractKind,
    /// jq/xpath expression or regex pattern; unused for csv.
    #[serde(default)]
    pub path: String,
    /// Regex capture group; defaults to 1.
    #[serde(default)]
    pub group: Option<usize>,
    #[serde(default)]
    pub row: Option<usize>,
    #[serde(default)]
    pub column: Option<String>,
    /// Single clause such as `age > 25`.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub delimiter: Option<char>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractKind {
    #[default]
    Jq,
    Xpath,
    Regex,
    Csv,
}

impl ExtractKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractKind::Jq => "jq",
            ExtractKind::Xpath => "xpath",
            ExtractKind::Regex => "regex",
            ExtractKind::Csv => "csv",
        }
    }
}

fn scalar_to_string(value: Value) -> Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Bool(flag) => Ok(Some(flag.to_string())),
        other => Err(format!("expected a string or number, found {other}")),
    }
}

/// Accepts `for: 3` as well as `for: "1..3"`.
fn deserialize_optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_to_string(value).map_err(serde::de::Error::custom)
}

/// Accepts `delay: 2` as well as `delay: "2s"`.
fn deserialize_scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_to_string(value)
        .map(Option::unwrap_or_default)
        .map_err(serde::de::Error::custom)
}
