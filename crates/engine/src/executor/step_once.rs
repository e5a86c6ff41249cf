//! Single-attempt action execution.

use std::time::Instant;

use serde_json::Value;
use testflow_types::{ActionResult, ErrorCategory, Outcome, Step, StepResult, codes};
use tracing::{debug, info, warn};

use super::{LoopFrame, StepExecutor, annotate, elapsed_ms, error_row};
use crate::{extract, variables::VariableStore, variables::suggest_names};

impl StepExecutor {
    /// Runs the step's action once: substitute, invoke, extract, store.
    ///
    /// Always returns exactly one row with `attempts = 1`. A non-passing
    /// action keeps its full `ActionResult` in the row.
    pub(crate) fn execute_once(&self, step: &Step, variables: &mut VariableStore, frame: Option<&LoopFrame>) -> StepResult {
        let started = Instant::now();
        let mut row = self.run_action(step, variables, frame);
        row.duration_ms = elapsed_ms(started);
        row.attempts = 1;
        row
    }

    fn run_action(&self, step: &Step, variables: &mut VariableStore, frame: Option<&LoopFrame>) -> StepResult {
        let Some(action_name) = step.action.as_deref() else {
            let mut info = self
                .templates
                .error(ErrorCategory::Validation, codes::EMPTY_STEP, &[&step.name])
                .suggestion("add an 'action' or nested 'steps'")
                .build();
            annotate(&mut info, step, frame);
            return error_row(step, info);
        };
        let Some(action) = self.registry.get(action_name) else {
            let mut builder = self
                .templates
                .error(ErrorCategory::Validation, codes::UNKNOWN_ACTION, &[&action_name])
                .context(
                    "available_actions",
                    self.registry.names().map(|name| Value::String(name.to_string())).collect::<Vec<_>>(),
                );
            for candidate in suggest_names(action_name, self.registry.names()) {
                builder = builder.suggestion(format!("did you mean '{candidate}'?"));
            }
            let mut info = builder.build();
            annotate(&mut info, step, frame);
            warn!(step = %step.name, action = %action_name, "unknown action");
            return error_row(step, info);
        };

        let args = variables.substitute_args(&step.args);
        let options = variables.substitute_options(&step.options);
        debug!(step = %step.name, action = %action_name, args = args.len(), "invoking action");
        let mut result = action.execute(&args, &options, variables);
        let mut row = StepResult::new(&step.name, action_name, ActionResult::skipped());

        if result.is_passed()
            && let Some(spec) = &step.extract
        {
            let data = result.data.take().unwrap_or(Value::Null);
            match extract::extract(spec, &data, &self.registry, variables) {
                Ok(extracted) => {
                    row.logs.push(format!("extracted value with {}", spec.kind.as_str()));
                    result.data = Some(extracted);
                }
                Err(error) => {
                    warn!(step = %step.name, kind = spec.kind.as_str(), error = %error, "extraction failed");
                    result = ActionResult::error(error.to_error_info(spec.kind, &self.templates)).with_data(data);
                }
            }
        }

        match &mut result.outcome {
            Outcome::Passed => {
                if let Some(name) = &step.result {
                    variables.set(name.as_str(), result.data.clone().unwrap_or(Value::Null));
                    row.logs.push(format!("stored result in '{name}'"));
                }
                info!(step = %step.name, action = %action_name, "step passed");
            }
            Outcome::Error(info) => {
                annotate(info, step, frame);
                if let Some(diagnostics) = variables.diagnose_values(step.args.iter().chain(step.options.values())) {
                    info.context.insert("variable_context".to_string(), diagnostics.to_value());
                    info.suggestions.extend(diagnostics.suggestions());
                }
                warn!(step = %step.name, action = %action_name, code = %info.code, "step errored");
            }
            Outcome::Failed(info) => {
                if let Some(diagnostics) = variables.diagnose_values(step.args.iter().chain(step.options.values())) {
                    row.logs.push(format!("unresolved references: {}", diagnostics.summary()));
                    info.suggestions.extend(diagnostics.suggestions());
                }
                warn!(step = %step.name, action = %action_name, code = %info.code, "step failed");
            }
            Outcome::Skipped => debug!(step = %step.name, action = %action_name, "action reported skipped"),
        }

        row.result = result;
        row
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use testflow_types::{ActionStatus, ExtractKind, ExtractSpec};

    use crate::executor::tests::executor;
    use crate::variables::VariableStore;

    use super::*;

    #[test]
    fn unknown_action_suggests_near_names() {
        let step = Step::action("typo", "ecko");
        let row = executor().execute_once(&step, &mut VariableStore::new(), None);
        let info = row.result.error_info().expect("error info");
        assert_eq!(info.code, codes::UNKNOWN_ACTION);
        assert_eq!(info.message, "unknown action 'ecko'");
        assert_eq!(info.suggestions, vec!["did you mean 'echo'?".to_string()]);
        assert_eq!(row.attempts, 1);
    }

    #[test]
    fn empty_step_is_rejected() {
        let step = Step {
            name: "nothing".into(),
            ..Default::default()
        };
        let row = executor().execute_once(&step, &mut VariableStore::new(), None);
        assert_eq!(row.result.error_info().map(|info| info.code.as_str()), Some(codes::EMPTY_STEP));
    }

    #[test]
    fn extraction_replaces_data_before_storing_result() {
        let mut step = Step::action("fetch", "echo");
        step.args = vec![json!("order id=42 created")];
        step.extract = Some(ExtractSpec {
            kind: ExtractKind::Regex,
            path: r#"id=(\d+)"#.into(),
            ..Default::default()
        });
        step.result = Some("order_id".into());
        let mut variables = VariableStore::new();

        let row = executor().execute_once(&step, &mut variables, None);
        assert_eq!(row.status(), ActionStatus::Passed);
        assert_eq!(row.result.data, Some(json!("42")));
        assert_eq!(variables.get("order_id"), Some(&json!("42")));
    }

    #[test]
    fn extraction_failure_turns_into_error_and_skips_storage() {
        let mut step = Step::action("fetch", "echo");
        step.args = vec![json!("no ids here")];
        step.extract = Some(ExtractSpec {
            kind: ExtractKind::Regex,
            path: r#"id=(\d+)"#.into(),
            group: Some(5),
            ..Default::default()
        });
        step.result = Some("order_id".into());
        let mut variables = VariableStore::new();

        let row = executor().execute_once(&step, &mut variables, None);
        let info = row.result.error_info().expect("error info");
        assert_eq!(info.code, codes::INVALID_CAPTURE_GROUP);
        assert_eq!(info.context.get("step"), Some(&json!("fetch")));
        assert!(!variables.contains("order_id"));
    }

    #[test]
    fn errors_carry_variable_diagnostics() {
        let mut step = Step::action("call", "boom");
        step.args = vec![json!("${usr_name}")];
        let mut variables = VariableStore::new();
        variables.set("user_name", "ada");

        let row = executor().execute_once(&step, &mut variables, None);
        let info = row.result.error_info().expect("error info");
        assert!(info.context.contains_key("variable_context"));
        assert!(info.suggestions.iter().any(|hint| hint.contains("user_name")));
        assert_eq!(info.context.get("action"), Some(&json!("boom")));
    }

    #[test]
    fn failures_keep_the_full_result() {
        let step = Step::action("check", "fail");
        let row = executor().execute_once(&step, &mut VariableStore::new(), None);
        assert_eq!(row.status(), ActionStatus::Failed);
        assert_eq!(row.result.failure_info().map(|info| info.code.as_str()), Some("ASSERTION_FAILED"));
    }
}
