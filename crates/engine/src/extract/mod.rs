//! Post-processing of a passed action's `data`.
//!
//! `regex` and `csv` are implemented here. `jq` and `xpath` are delegated to
//! the actions registered under those names, invoked with `[data, path]`, so
//! a catalog can bring its own query engine.

use indexmap::IndexMap;
use serde_json::Value;
use testflow_types::{ErrorCategory, ErrorInfo, ExtractKind, ExtractSpec, MessageTemplates, Outcome, codes};
use thiserror::Error;
use tracing::debug;

use crate::actions::ActionRegistry;
use crate::variables::VariableStore;

mod pattern;
mod tabular;

pub use pattern::extract_regex;
pub use tabular::{Table, extract_csv, load_table};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("regex pattern '{pattern}' did not match")]
    NoMatch { pattern: String },
    #[error("invalid capture group {group}: pattern '{pattern}' has {available} capture group(s)")]
    InvalidCaptureGroup { group: usize, pattern: String, available: usize },
    #[error("failed to parse CSV data: {0}")]
    CsvParse(String),
    #[error("CSV selection failed: {0}")]
    CsvSelection(String),
    #[error("no action registered for {kind} extraction")]
    MissingExtractor { kind: &'static str },
    #[error("{kind} extraction failed: {message}")]
    Delegated { kind: &'static str, message: String },
}

impl ExtractionError {
    pub fn code(&self) -> &'static str {
        match self {
            ExtractionError::InvalidPattern { .. } => codes::INVALID_REGEX,
            ExtractionError::NoMatch { .. } => codes::REGEX_NO_MATCH,
            ExtractionError::InvalidCaptureGroup { .. } => codes::INVALID_CAPTURE_GROUP,
            ExtractionError::CsvParse(_) => codes::CSV_PARSE_FAILED,
            ExtractionError::CsvSelection(_) => codes::CSV_SELECTION_FAILED,
            ExtractionError::MissingExtractor { .. } | ExtractionError::Delegated { .. } => codes::EXTRACTION_FAILED,
        }
    }

    /// Converts into the step-level error, rendering the message from `templates`.
    pub fn to_error_info(&self, kind: ExtractKind, templates: &MessageTemplates) -> ErrorInfo {
        let code = self.code();
        let builder = match self {
            ExtractionError::InvalidPattern { pattern, message } => {
                templates.error(ErrorCategory::Validation, code, &[pattern, message])
            }
            ExtractionError::NoMatch { pattern } => templates
                .error(ErrorCategory::Execution, code, &[pattern])
                .suggestion("check the action output or loosen the pattern"),
            ExtractionError::InvalidCaptureGroup {
                group,
                pattern,
                available,
            } => templates
                .error(ErrorCategory::Validation, code, &[group, pattern, available])
                .suggestion(format!("use a group between 0 and {available}")),
            ExtractionError::CsvParse(message) | ExtractionError::CsvSelection(message) => {
                templates.error(ErrorCategory::Execution, code, &[message])
            }
            ExtractionError::MissingExtractor { kind: missing } => templates
                .error(ErrorCategory::Validation, code, &[missing, &self])
                .suggestion(format!("register an action named '{missing}'")),
            ExtractionError::Delegated { kind: delegated, message } => {
                templates.error(ErrorCategory::Execution, code, &[delegated, message])
            }
        };
        builder.context("extract_type", kind.as_str()).build()
    }
}

/// Applies `spec` to `data`.
pub fn extract(
    spec: &ExtractSpec,
    data: &Value,
    registry: &ActionRegistry,
    variables: &mut VariableStore,
) -> Result<Value, ExtractionError> {
    debug!(kind = spec.kind.as_str(), path = %spec.path, "extracting from action data");
    match spec.kind {
        ExtractKind::Jq | ExtractKind::Xpath => delegate(spec.kind, data, &spec.path, registry, variables),
        ExtractKind::Regex => extract_regex(data, &spec.path, spec.group),
        ExtractKind::Csv => extract_csv(data, spec),
    }
}

fn delegate(
    kind: ExtractKind,
    data: &Value,
    path: &str,
    registry: &ActionRegistry,
    variables: &mut VariableStore,
) -> Result<Value, ExtractionError> {
    let name = kind.as_str();
    let action = registry.get(name).ok_or(ExtractionError::MissingExtractor { kind: name })?;
    let result = action.execute(&[data.clone(), Value::String(path.to_string())], &IndexMap::new(), variables);
    match result.outcome {
        Outcome::Passed => Ok(result.data.unwrap_or(Value::Null)),
        Outcome::Error(info) => Err(ExtractionError::Delegated {
            kind: name,
            message: info.message,
        }),
        Outcome::Failed(info) => Err(ExtractionError::Delegated {
            kind: name,
            message: info.message,
        }),
        Outcome::Skipped => Err(ExtractionError::Delegated {
            kind: name,
            message: "extractor was skipped".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use testflow_types::ActionResult;

    #[test]
    fn jq_is_delegated_with_data_and_path() {
        let mut registry = ActionRegistry::new();
        registry.register_fn("jq", |args, _, _| {
            ActionResult::passed_with(json!(format!("{}|{}", args[0]["id"], args[1].as_str().unwrap_or(""))))
        });
        let spec = ExtractSpec {
            kind: ExtractKind::Jq,
            path: ".id".to_string(),
            ..Default::default()
        };
        let mut variables = VariableStore::new();
        let value = extract(&spec, &json!({"id": 9}), &registry, &mut variables).expect("extracted");
        assert_eq!(value, json!("9|.id"));
    }

    #[test]
    fn xpath_without_registered_action_is_an_error() {
        let spec = ExtractSpec {
            kind: ExtractKind::Xpath,
            path: "//id".to_string(),
            ..Default::default()
        };
        let mut variables = VariableStore::new();
        let error = extract(&spec, &json!("<a/>"), &ActionRegistry::new(), &mut variables).unwrap_err();
        assert_eq!(error, ExtractionError::MissingExtractor { kind: "xpath" });
        assert_eq!(error.code(), codes::EXTRACTION_FAILED);
    }

    #[test]
    fn capture_group_errors_render_through_templates() {
        let error = ExtractionError::InvalidCaptureGroup {
            group: 5,
            pattern: r"id=(\d+)".to_string(),
            available: 1,
        };
        let info = error.to_error_info(ExtractKind::Regex, &MessageTemplates::default());
        assert_eq!(info.code, codes::INVALID_CAPTURE_GROUP);
        assert_eq!(info.message, r"invalid capture group 5: pattern 'id=(\d+)' has 1 capture group(s)");
        assert_eq!(info.context.get("extract_type"), Some(&json!("regex")));
    }
}
