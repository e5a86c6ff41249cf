//! Structured outcome types shared by every execution path.
//!
//! Two taxonomies live side by side:
//!
//! - [`ErrorInfo`] describes a *technical* failure: the framework could not do
//!   what the step asked (unknown action, malformed loop spec, network error).
//! - [`FailureInfo`] describes a *logical* failure: the framework worked, but
//!   the system under test did not meet an expectation (assertion mismatch).
//!
//! [`ActionResult`] ties them together. Its [`Outcome`] owns the info value for
//! the `failed` and `error` statuses, so a passed or skipped result can never
//! carry stale diagnostics.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse status of an action or step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl ActionStatus {
    /// Severity used when folding many statuses into one (`error > failed > passed > skipped`).
    pub fn severity(self) -> u8 {
        match self {
            ActionStatus::Skipped => 0,
            ActionStatus::Passed => 1,
            ActionStatus::Failed => 2,
            ActionStatus::Error => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Passed => "passed",
            ActionStatus::Failed => "failed",
            ActionStatus::Error => "error",
            ActionStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a technical error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input: unknown action, bad loop/retry spec, invalid condition.
    Validation,
    /// The action or engine failed while running.
    Execution,
    Network,
    Database,
    Timeout,
    /// Variable resolution problems.
    Variable,
    System,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Network => "network",
            ErrorCategory::Database => "database",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Variable => "variable",
            ErrorCategory::System => "system",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a logical test failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Assertion,
    Response,
    Validation,
}

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::Assertion => "assertion",
            FailureCategory::Response => "response",
            FailureCategory::Validation => "validation",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Technical failure details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub category: ErrorCategory,
    /// Machine-readable code, e.g. `UNKNOWN_ACTION`.
    pub code: String,
    pub message: String,
    /// Free-form key/values describing where the error happened.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub context: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorInfo {
    /// Starts a builder with an already formatted message.
    pub fn builder(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> ErrorInfoBuilder {
        ErrorInfoBuilder {
            info: ErrorInfo {
                category,
                code: code.into(),
                message: message.into(),
                context: IndexMap::new(),
                suggestions: Vec::new(),
                timestamp: Utc::now(),
            },
        }
    }

    /// Shorthand for a builder without context or suggestions.
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::builder(category, code, message).build()
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Builder stamping context and suggestions onto an [`ErrorInfo`].
#[derive(Debug, Clone)]
pub struct ErrorInfoBuilder {
    info: ErrorInfo,
}

impl ErrorInfoBuilder {
    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.info.context.insert(key.into(), value.into());
        self
    }

    pub fn suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.info.suggestions.push(suggestion.into());
        self
    }

    pub fn suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.info.suggestions.extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> ErrorInfo {
        self.info
    }
}

/// Logical failure details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureInfo {
    pub category: FailureCategory,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    /// Comparison operator used to decide the failure (`==`, `contains`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl FailureInfo {
    pub fn builder(category: FailureCategory, code: impl Into<String>, message: impl Into<String>) -> FailureInfoBuilder {
        FailureInfoBuilder {
            info: FailureInfo {
                category,
                code: code.into(),
                message: message.into(),
                expected: None,
                actual: None,
                operator: None,
                suggestions: Vec::new(),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn new(category: FailureCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::builder(category, code, message).build()
    }
}

impl fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[derive(Debug, Clone)]
pub struct FailureInfoBuilder {
    info: FailureInfo,
}

impl FailureInfoBuilder {
    pub fn expected(mut self, expected: impl Into<Value>) -> Self {
        self.info.expected = Some(expected.into());
        self
    }

    pub fn actual(mut self, actual: impl Into<Value>) -> Self {
        self.info.actual = Some(actual.into());
        self
    }

    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.info.operator = Some(operator.into());
        self
    }

    pub fn suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.info.suggestions.push(suggestion.into());
        self
    }

    pub fn build(self) -> FailureInfo {
        self.info
    }
}

/// Status plus the diagnostics that status requires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "info", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed(FailureInfo),
    Error(ErrorInfo),
    Skipped,
}

/// Uniform outcome of an action, a step, or a whole group of steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Untyped payload used for extraction and result-variable storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActionResult {
    pub fn passed() -> Self {
        Self {
            outcome: Outcome::Passed,
            data: None,
        }
    }

    pub fn passed_with(data: impl Into<Value>) -> Self {
        Self {
            outcome: Outcome::Passed,
            data: Some(data.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            outcome: Outcome::Skipped,
            data: None,
        }
    }

    pub fn error(info: ErrorInfo) -> Self {
        Self {
            outcome: Outcome::Error(info),
            data: None,
        }
    }

    pub fn failed(info: FailureInfo) -> Self {
        Self {
            outcome: Outcome::Failed(info),
            data: None,
        }
    }

    /// Attaches a payload, keeping the outcome.
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn status(&self) -> ActionStatus {
        match self.outcome {
            Outcome::Passed => ActionStatus::Passed,
            Outcome::Failed(_) => ActionStatus::Failed,
            Outcome::Error(_) => ActionStatus::Error,
            Outcome::Skipped => ActionStatus::Skipped,
        }
    }

    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match &self.outcome {
            Outcome::Error(info) => Some(info),
            _ => None,
        }
    }

    pub fn failure_info(&self) -> Option<&FailureInfo> {
        match &self.outcome {
            Outcome::Failed(info) => Some(info),
            _ => None,
        }
    }

    /// Human message of whichever info is present.
    pub fn message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Error(info) => Some(info.message.as_str()),
            Outcome::Failed(info) => Some(info.message.as_str()),
            _ => None,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self.outcome, Outcome::Passed)
    }
}

impl Default for ActionResult {
    fn default() -> Self {
        Self::skipped()
    }
}
