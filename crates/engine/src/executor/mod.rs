//! Step execution engine: routes each step through loops, conditions, nested
//! groups and retries before running its action.
//!
//! - [`StepExecutor::execute_step_with_control_flow`] is the single entry point
//! - [`classify`] picks the strategy from [`DISPATCH_ORDER`], most specific first
//! - `loops` runs `for`/`while`, `retry` wraps an action in the retry policy,
//!   `step_once` performs the substitution → action → extraction sequence
//!
//! Delegation never mutates the step. Once a loop or condition has been
//! applied, the recursive call carries a [`Handled`] flag instead, so the same
//! modifier is not evaluated twice.

use std::{fmt, sync::Arc, time::Duration, time::Instant};

use serde_json::Value;
use testflow_types::{
    ActionResult, ActionStatus, ErrorCategory, ErrorInfo, MessageTemplates, NESTED_STEPS_ACTION, Outcome, Step, StepResult, codes,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{actions::ActionRegistry, condition, config::ExecutorConfig, variables::VariableStore};

mod loops;
mod retry;
mod step_once;

pub use loops::{ForSpec, ForSpecError, LoopFrame};
pub use retry::calculate_delay;

/// Blocking sleep used between retry attempts.
pub type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

/// Technical error that stops the enclosing loop, group or phase.
///
/// Logical failures never become a `StepError`: they are recorded in their
/// row and counted, but execution moves on.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct StepError(pub ErrorInfo);

impl StepError {
    /// The error a result stands for; `None` unless the result is an error.
    pub fn from_result(result: &ActionResult) -> Option<Self> {
        result.error_info().cloned().map(StepError)
    }

    pub fn info(&self) -> &ErrorInfo {
        &self.0
    }

    pub fn code(&self) -> &str {
        &self.0.code
    }
}

/// Rows produced by one step plus the error, if any, that should stop the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepRun {
    pub results: Vec<StepResult>,
    pub error: Option<StepError>,
}

impl StepRun {
    fn from_row(row: StepResult) -> Self {
        let error = StepError::from_result(&row.result);
        Self {
            results: vec![row],
            error,
        }
    }
}

/// Modifiers already applied by an enclosing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Handled {
    pub looping: bool,
    pub condition: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    ForLoop,
    WhileLoop,
    Conditional,
    Group,
    RetryingAction,
    Action,
}

/// Dispatch precedence; the first kind whose predicate holds wins.
pub const DISPATCH_ORDER: [StepKind; 6] = [
    StepKind::ForLoop,
    StepKind::WhileLoop,
    StepKind::Conditional,
    StepKind::Group,
    StepKind::RetryingAction,
    StepKind::Action,
];

impl StepKind {
    fn applies(self, step: &Step, handled: Handled) -> bool {
        match self {
            StepKind::ForLoop => step.r#for.is_some() && !handled.looping,
            StepKind::WhileLoop => step.r#while.is_some() && !handled.looping,
            StepKind::Conditional => step.r#if.is_some() && !handled.condition,
            StepKind::Group => step.has_children(),
            StepKind::RetryingAction => step.retry.is_some(),
            StepKind::Action => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::ForLoop => "for_loop",
            StepKind::WhileLoop => "while_loop",
            StepKind::Conditional => "conditional",
            StepKind::Group => "group",
            StepKind::RetryingAction => "retrying_action",
            StepKind::Action => "action",
        }
    }
}

pub fn classify(step: &Step, handled: Handled) -> StepKind {
    DISPATCH_ORDER
        .into_iter()
        .find(|kind| kind.applies(step, handled))
        .unwrap_or(StepKind::Action)
}

/// Executes steps against an action registry.
pub struct StepExecutor {
    registry: ActionRegistry,
    templates: Arc<MessageTemplates>,
    config: ExecutorConfig,
    sleeper: Sleeper,
}

impl fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepExecutor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StepExecutor {
    pub fn new(registry: ActionRegistry) -> Self {
        Self {
            registry,
            templates: Arc::new(MessageTemplates::default()),
            config: ExecutorConfig::default(),
            sleeper: Box::new(std::thread::sleep),
        }
    }

    pub fn with_templates(mut self, templates: Arc<MessageTemplates>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the blocking sleep between retry attempts.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn templates(&self) -> &MessageTemplates {
        &self.templates
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs `step` with every control-flow modifier applied.
    ///
    /// `step_number` is the 1-based position of the step in its phase or group
    /// and only appears in logs.
    pub fn execute_step_with_control_flow(&self, step: &Step, step_number: usize, variables: &mut VariableStore) -> StepRun {
        self.dispatch(step, step_number, variables, Handled::default(), None)
    }

    fn dispatch(
        &self,
        step: &Step,
        step_number: usize,
        variables: &mut VariableStore,
        handled: Handled,
        frame: Option<&LoopFrame>,
    ) -> StepRun {
        let kind = classify(step, handled);
        debug!(step = %step.name, step_number, kind = kind.as_str(), "dispatching step");
        match kind {
            StepKind::ForLoop => self.execute_for(step, step_number, variables),
            StepKind::WhileLoop => self.execute_while(step, step_number, variables),
            StepKind::Conditional => self.execute_conditional(step, step_number, variables, handled, frame),
            StepKind::Group => self.execute_group(step, variables, frame),
            StepKind::RetryingAction => StepRun::from_row(self.execute_with_retry(step, variables, frame)),
            StepKind::Action => StepRun::from_row(self.execute_once(step, variables, frame)),
        }
    }

    fn execute_conditional(
        &self,
        step: &Step,
        step_number: usize,
        variables: &mut VariableStore,
        handled: Handled,
        frame: Option<&LoopFrame>,
    ) -> StepRun {
        let Some(raw_condition) = step.r#if.as_deref() else {
            return self.dispatch(step, step_number, variables, Handled { condition: true, ..handled }, frame);
        };
        match self.check_condition(step, raw_condition, variables, frame) {
            Ok(true) => self.dispatch(step, step_number, variables, Handled { condition: true, ..handled }, frame),
            Ok(false) => StepRun::from_row(self.skipped_row(step, raw_condition, variables)),
            Err(row) => StepRun::from_row(*row),
        }
    }

    /// Evaluates an `if`, turning evaluation errors into an error row.
    pub(crate) fn check_condition(
        &self,
        step: &Step,
        raw_condition: &str,
        variables: &VariableStore,
        frame: Option<&LoopFrame>,
    ) -> Result<bool, Box<StepResult>> {
        condition::evaluate(raw_condition, variables).map_err(|error| {
            let mut builder = self
                .templates
                .error(ErrorCategory::Validation, codes::INVALID_CONDITION, &[&raw_condition, &error])
                .context("condition", raw_condition)
                .suggestion("use a literal (true/false) or one comparison such as '${count} >= 3'");
            if let Some(diagnostics) = variables.diagnose(raw_condition) {
                builder = builder
                    .context("variable_context", diagnostics.to_value())
                    .suggestions(diagnostics.suggestions());
            }
            let mut info = builder.build();
            annotate(&mut info, step, frame);
            Box::new(error_row(step, info))
        })
    }

    pub(crate) fn skipped_row(&self, step: &Step, raw_condition: &str, variables: &VariableStore) -> StepResult {
        let mut row = StepResult::new(&step.name, step.action_label(), ActionResult::skipped());
        row.logs.push(format!(
            "step '{}' skipped: condition '{}' evaluated to false",
            step.name,
            variables.substitute(raw_condition)
        ));
        if let Some(diagnostics) = variables.diagnose(raw_condition) {
            row.logs.push(format!("unresolved condition references: {}", diagnostics.summary()));
        }
        info!(step = %step.name, condition = %raw_condition, "step skipped by condition");
        row
    }

    fn execute_group(&self, step: &Step, variables: &mut VariableStore, frame: Option<&LoopFrame>) -> StepRun {
        let started = Instant::now();
        info!(step = %step.name, children = step.steps.len(), "nested steps started");

        let mut children = Vec::new();
        let mut first_error: Option<StepError> = None;
        let mut outcome: Option<Outcome> = None;
        for (position, child) in step.steps.iter().enumerate() {
            let mut run = self.dispatch(child, position + 1, variables, Handled::default(), frame);
            if outcome.is_none() {
                outcome = first_non_passing(&run.results).map(|row| row.result.outcome.clone());
            }
            for row in &mut run.results {
                prefix_names(row, &step.name);
            }
            children.append(&mut run.results);
            let Some(error) = run.error else {
                continue;
            };
            let stop = !child.continue_on_failure;
            if stop {
                warn!(step = %step.name, child = %child.name, code = error.code(), "child step errored; stopping nested steps");
            } else {
                info!(step = %step.name, child = %child.name, code = error.code(), "child step errored; continuing");
            }
            first_error.get_or_insert(error);
            if stop {
                break;
            }
        }

        let result = ActionResult {
            outcome: outcome.unwrap_or(Outcome::Passed),
            data: None,
        };
        let row = StepResult {
            name: step.name.clone(),
            action: NESTED_STEPS_ACTION.to_string(),
            duration_ms: elapsed_ms(started),
            result,
            logs: vec![format!("executed {} of {} nested step(s)", children.len(), step.steps.len())],
            attempts: 1,
            children,
        };
        StepRun {
            results: vec![row],
            error: first_error,
        }
    }
}

/// First failed or errored row; skipped rows do not count.
pub(crate) fn first_non_passing(rows: &[StepResult]) -> Option<&StepResult> {
    rows.iter()
        .find(|row| matches!(row.status(), ActionStatus::Failed | ActionStatus::Error))
}

/// Prefixes `parent -> ` onto a row and every row nested below it.
fn prefix_names(row: &mut StepResult, parent: &str) {
    row.name = format!("{parent} -> {}", row.name);
    for child in &mut row.children {
        prefix_names(child, parent);
    }
}

fn error_row(step: &Step, info: ErrorInfo) -> StepResult {
    StepResult::new(&step.name, step.action_label(), ActionResult::error(info))
}

/// Adds step identity and loop position to an error's context.
fn annotate(info: &mut ErrorInfo, step: &Step, frame: Option<&LoopFrame>) {
    info.context
        .entry("step".to_string())
        .or_insert_with(|| Value::String(step.name.clone()));
    if let Some(action) = &step.action {
        info.context
            .entry("action".to_string())
            .or_insert_with(|| Value::String(action.clone()));
    }
    if let Some(frame) = frame {
        frame.annotate(&mut info.context);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;
    use testflow_types::{FailureCategory, FailureInfo};

    /// Registry with `echo` (passes with its args), `fail` (fails) and `boom` (errors).
    pub(crate) fn test_registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register_fn("echo", |args, _, _| ActionResult::passed_with(json!(args)));
        registry.register_fn("fail", |_, _, _| {
            ActionResult::failed(FailureInfo::new(FailureCategory::Assertion, "ASSERTION_FAILED", "assertion failed"))
        });
        registry.register_fn("boom", |_, _, _| {
            ActionResult::error(ErrorInfo::new(ErrorCategory::Execution, "BOOM", "boom"))
        });
        registry
    }

    pub(crate) fn executor() -> StepExecutor {
        StepExecutor::new(test_registry()).with_sleeper(|_| {})
    }

    fn echo(name: &str) -> Step {
        Step::action(name, "echo")
    }

    #[test]
    fn classify_follows_dispatch_order() {
        let mut step = echo("s");
        assert_eq!(classify(&step, Handled::default()), StepKind::Action);

        step.retry = Some(Default::default());
        assert_eq!(classify(&step, Handled::default()), StepKind::RetryingAction);

        step.r#if = Some("true".into());
        assert_eq!(classify(&step, Handled::default()), StepKind::Conditional);
        let condition_done = Handled {
            condition: true,
            ..Handled::default()
        };
        assert_eq!(classify(&step, condition_done), StepKind::RetryingAction);

        step.r#while = Some("false".into());
        assert_eq!(classify(&step, Handled::default()), StepKind::WhileLoop);

        step.r#for = Some("3".into());
        assert_eq!(classify(&step, Handled::default()), StepKind::ForLoop);
        let all_done = Handled {
            looping: true,
            condition: true,
        };
        assert_eq!(classify(&step, all_done), StepKind::RetryingAction);

        let group = Step::group("g", vec![echo("a")]);
        assert_eq!(classify(&group, Handled::default()), StepKind::Group);
    }

    #[test]
    fn false_condition_yields_single_skipped_row() {
        let mut step = echo("gated");
        step.r#if = Some("${enabled} == yes".into());
        let mut variables = VariableStore::new();
        variables.set("enabled", "no");

        let run = executor().execute_step_with_control_flow(&step, 1, &mut variables);
        assert!(run.error.is_none());
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].status(), ActionStatus::Skipped);

        variables.set("enabled", "yes");
        let run = executor().execute_step_with_control_flow(&step, 1, &mut variables);
        assert_eq!(run.results[0].status(), ActionStatus::Passed);
    }

    #[test]
    fn unevaluable_condition_is_a_validation_error() {
        let mut step = echo("gated");
        step.r#if = Some("not_an_operator_string".into());
        let run = executor().execute_step_with_control_flow(&step, 1, &mut VariableStore::new());
        let info = run.error.as_ref().map(StepError::info).expect("technical error");
        assert_eq!(info.code, codes::INVALID_CONDITION);
        assert_eq!(info.category, ErrorCategory::Validation);
        assert_eq!(run.results[0].status(), ActionStatus::Error);
    }

    #[test]
    fn group_stops_at_erroring_child() {
        let group = Step::group("checkout", vec![echo("one"), Step::action("two", "boom"), echo("three")]);
        let run = executor().execute_step_with_control_flow(&group, 1, &mut VariableStore::new());

        assert_eq!(run.results.len(), 1);
        let aggregate = &run.results[0];
        assert_eq!(aggregate.action, NESTED_STEPS_ACTION);
        assert_eq!(aggregate.status(), ActionStatus::Error);
        let names: Vec<_> = aggregate.children.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, vec!["checkout -> one", "checkout -> two"]);
        assert_eq!(run.error.as_ref().map(StepError::code), Some("BOOM"));
    }

    #[test]
    fn failing_child_is_recorded_without_stopping_the_group() {
        let group = Step::group("checkout", vec![echo("one"), Step::action("two", "fail"), echo("three")]);
        let run = executor().execute_step_with_control_flow(&group, 1, &mut VariableStore::new());

        let aggregate = &run.results[0];
        assert_eq!(aggregate.children.len(), 3);
        assert_eq!(aggregate.status(), ActionStatus::Failed);
        assert_eq!(aggregate.result.failure_info().map(|info| info.code.as_str()), Some("ASSERTION_FAILED"));
        assert!(run.error.is_none());
    }

    #[test]
    fn group_continues_past_child_marked_continue() {
        let mut erroring = Step::action("two", "boom");
        erroring.continue_on_failure = true;
        let group = Step::group("checkout", vec![Step::action("one", "fail"), erroring, echo("three")]);
        let run = executor().execute_step_with_control_flow(&group, 1, &mut VariableStore::new());

        let aggregate = &run.results[0];
        assert_eq!(aggregate.children.len(), 3);
        assert_eq!(aggregate.status(), ActionStatus::Failed);
        assert_eq!(run.error.as_ref().map(StepError::code), Some("BOOM"));
    }

    #[test]
    fn nested_groups_prefix_names_at_each_level() {
        let inner = Step::group("inner", vec![echo("leaf")]);
        let outer = Step::group("outer", vec![inner]);
        let run = executor().execute_step_with_control_flow(&outer, 1, &mut VariableStore::new());
        let inner_row = &run.results[0].children[0];
        assert_eq!(inner_row.name, "outer -> inner");
        assert_eq!(inner_row.children[0].name, "outer -> inner -> leaf");
        assert_eq!(run.results[0].status(), ActionStatus::Passed);
    }

    #[test]
    fn conditional_group_runs_children_when_true() {
        let mut group = Step::group("maybe", vec![echo("a"), echo("b")]);
        group.r#if = Some("1".into());
        let run = executor().execute_step_with_control_flow(&group, 1, &mut VariableStore::new());
        assert_eq!(run.results[0].children.len(), 2);
    }

    #[test]
    fn args_are_substituted_before_the_action_runs() {
        let mut step = echo("greet");
        step.args = vec![json!("hello ${name}"), json!("${ids}")];
        step.options = IndexMap::from([("mode".to_string(), json!("${mode}"))]);
        step.result = Some("greeting".into());
        let mut variables = VariableStore::new();
        variables.set("name", "ada");
        variables.set("ids", json!([1, 2]));

        let run = executor().execute_step_with_control_flow(&step, 1, &mut variables);
        assert_eq!(run.results[0].result.data, Some(json!(["hello ada", [1, 2]])));
        assert_eq!(variables.get("greeting"), Some(&json!(["hello ada", [1, 2]])));
    }
}
