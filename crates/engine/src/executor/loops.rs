//! `for` and `while` loops.
//!
//! Each iteration binds `iteration` (1-based) and `index` (0-based); `for`
//! also binds `item`. Whatever those names held before the loop is restored
//! afterwards, so nested loops and later steps see their own values.

use std::time::Instant;

use indexmap::IndexMap;
use serde_json::Value;
use testflow_types::{ActionResult, ErrorCategory, Step, StepResult, codes};
use thiserror::Error;
use tracing::{info, warn};

use super::{Handled, StepError, StepExecutor, StepRun, annotate, elapsed_ms, error_row};
use crate::variables::{VariableStore, format_value, value_kind};

const LOOP_VARIABLES: [&str; 3] = ["iteration", "index", "item"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForSpecError {
    #[error("loop specification is empty")]
    Empty,
    #[error("'{0}' is not a range of integers (expected start..end)")]
    InvalidRange(String),
    #[error("'{0}' is not a range, a list or a count")]
    Unrecognized(String),
    #[error("iteration count {0} is negative")]
    NegativeCount(i64),
    #[error("variable reference '{0}' does not resolve")]
    Unresolved(String),
    #[error("'{expression}' resolves to a {kind}, not an array or count")]
    NotIterable { expression: String, kind: &'static str },
}

/// Parsed `for` specification.
#[derive(Debug, Clone, PartialEq)]
pub enum ForSpec {
    /// `start..end`, inclusive; empty when `start > end`.
    Range { start: i64, end: i64 },
    /// `[a, b, c]` or an array variable.
    Items(Vec<Value>),
    /// Bare `n`, same as `1..n`.
    Count(u64),
}

impl ForSpec {
    /// Parses `raw` after substituting variables.
    ///
    /// A spec that is exactly one `${var}` reference to an array iterates that
    /// array's values with their JSON types intact.
    pub fn parse(raw: &str, variables: &VariableStore) -> Result<Self, ForSpecError> {
        let trimmed = raw.trim();
        if let Some(expression) = trimmed.strip_prefix("${").and_then(|rest| rest.strip_suffix('}'))
            && !expression.contains("${")
        {
            let value = variables
                .resolve(expression)
                .map_err(|_| ForSpecError::Unresolved(trimmed.to_string()))?;
            return match &*value {
                Value::Array(items) => Ok(ForSpec::Items(items.clone())),
                Value::Number(_) | Value::String(_) => Self::parse_text(&format_value(&value)),
                other => Err(ForSpecError::NotIterable {
                    expression: trimmed.to_string(),
                    kind: value_kind(other),
                }),
            };
        }
        Self::parse_text(&variables.substitute(trimmed))
    }

    fn parse_text(text: &str) -> Result<Self, ForSpecError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ForSpecError::Empty);
        }
        if let Some(inner) = text.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let items = inner
                .split(',')
                .map(|item| item.trim().trim_matches(['"', '\'']))
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect();
            return Ok(ForSpec::Items(items));
        }
        if let Some((start, end)) = text.split_once("..") {
            let parse = |bound: &str| {
                bound
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ForSpecError::InvalidRange(text.to_string()))
            };
            return Ok(ForSpec::Range {
                start: parse(start)?,
                end: parse(end)?,
            });
        }
        match text.parse::<i64>() {
            Ok(count) if count < 0 => Err(ForSpecError::NegativeCount(count)),
            Ok(count) => Ok(ForSpec::Count(count.unsigned_abs())),
            Err(_) => Err(ForSpecError::Unrecognized(text.to_string())),
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            ForSpec::Range { start, end } if start > end => 0,
            ForSpec::Range { start, end } => end.abs_diff(*start).saturating_add(1),
            ForSpec::Items(items) => items.len() as u64,
            ForSpec::Count(count) => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value bound to `item` for the 0-based `index`.
    pub fn item_at(&self, index: u64) -> Value {
        match self {
            ForSpec::Range { start, .. } => Value::from(start.saturating_add_unsigned(index)),
            ForSpec::Items(items) => usize::try_from(index)
                .ok()
                .and_then(|position| items.get(position))
                .cloned()
                .unwrap_or(Value::Null),
            ForSpec::Count(_) => Value::from(index + 1),
        }
    }
}

/// Position inside the innermost loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopFrame {
    pub kind: &'static str,
    pub iteration: u64,
    pub index: u64,
    pub item: Option<Value>,
    /// Substituted `for` spec or `while` condition.
    pub condition: Option<String>,
    /// Iteration bound of a `while` loop.
    pub max_iterations: Option<u32>,
}

impl LoopFrame {
    fn bind(&self, variables: &mut VariableStore) {
        variables.set("iteration", self.iteration);
        variables.set("index", self.index);
        if let Some(item) = &self.item {
            variables.set("item", item.clone());
        }
    }

    /// Adds loop metadata to an error context.
    pub(crate) fn annotate(&self, context: &mut IndexMap<String, Value>) {
        context.insert("loop_type".to_string(), Value::from(self.kind));
        context.insert("iteration".to_string(), Value::from(self.iteration));
        context.insert("index".to_string(), Value::from(self.index));
        if let Some(item) = &self.item {
            context.insert("item".to_string(), item.clone());
        }
        if let Some(condition) = &self.condition {
            context.insert("loop_condition".to_string(), Value::from(condition.as_str()));
        }
        if let Some(limit) = self.max_iterations {
            context.insert("max_iterations".to_string(), Value::from(limit));
        }
    }
}

/// Values the loop variables held before a loop started.
struct SavedLoopVariables(Vec<(&'static str, Option<Value>)>);

impl SavedLoopVariables {
    fn capture(variables: &VariableStore) -> Self {
        Self(
            LOOP_VARIABLES
                .iter()
                .map(|name| (*name, variables.get(name).cloned()))
                .collect(),
        )
    }

    fn restore(self, variables: &mut VariableStore) {
        for (name, previous) in self.0 {
            match previous {
                Some(value) => variables.set(name, value),
                None => {
                    variables.remove(name);
                }
            }
        }
    }
}

impl StepExecutor {
    pub(super) fn execute_for(&self, step: &Step, step_number: usize, variables: &mut VariableStore) -> StepRun {
        let raw = step.r#for.as_deref().unwrap_or_default();
        let spec = match ForSpec::parse(raw, variables) {
            Ok(spec) => spec,
            Err(error) => {
                let mut info = self
                    .templates
                    .error(ErrorCategory::Validation, codes::INVALID_FOR_SPEC, &[&raw, &error])
                    .suggestion("use start..end, [a, b, c], a count, or ${array_variable}")
                    .build();
                annotate(&mut info, step, None);
                return StepRun::from_row(error_row(step, info));
            }
        };

        let iterations = spec.len();
        info!(step = %step.name, iterations, "for loop started");
        if spec.is_empty() {
            return StepRun::from_row(empty_loop_row(step, "for"));
        }

        let condition = variables.substitute(raw);
        let saved = SavedLoopVariables::capture(variables);
        let mut run = StepRun::default();
        for index in 0..iterations {
            let frame = LoopFrame {
                kind: "for",
                iteration: index + 1,
                index,
                item: Some(spec.item_at(index)),
                condition: Some(condition.clone()),
                max_iterations: None,
            };
            let iteration_run = self.run_iteration(step, step_number, variables, &frame);
            run.results.extend(iteration_run.results);
            if let Some(error) = iteration_run.error {
                warn!(step = %step.name, iteration = frame.iteration, code = error.code(), "for loop aborted");
                run.error = Some(error);
                break;
            }
        }
        saved.restore(variables);
        run
    }

    pub(super) fn execute_while(&self, step: &Step, step_number: usize, variables: &mut VariableStore) -> StepRun {
        let raw_condition = step.r#while.as_deref().unwrap_or_default();
        let limit = self.config.loop_limit(step.max_iterations);
        let started = Instant::now();
        info!(step = %step.name, limit, "while loop started");

        let saved = SavedLoopVariables::capture(variables);
        let mut run = StepRun::default();
        let mut completed = 0u64;
        loop {
            let last_frame = (completed > 0).then(|| LoopFrame {
                kind: "while",
                iteration: completed,
                index: completed - 1,
                item: None,
                condition: Some(variables.substitute(raw_condition)),
                max_iterations: Some(limit),
            });
            match self.check_condition(step, raw_condition, variables, last_frame.as_ref()) {
                Ok(true) => {}
                Ok(false) => break,
                Err(row) => {
                    run.error = StepError::from_result(&row.result);
                    run.results.push(*row);
                    break;
                }
            }
            if completed >= u64::from(limit) {
                let mut info = self
                    .templates
                    .error(ErrorCategory::Execution, codes::MAX_ITERATIONS_EXCEEDED, &[&limit, &raw_condition])
                    .context("max_iterations", limit)
                    .context("condition", raw_condition)
                    .suggestion("make sure the loop body changes the condition, or raise max_iterations")
                    .build();
                annotate(&mut info, step, last_frame.as_ref());
                let mut row = error_row(step, info);
                row.duration_ms = elapsed_ms(started);
                warn!(step = %step.name, limit, "while loop exceeded maximum iterations");
                run.error = StepError::from_result(&row.result);
                run.results.push(row);
                break;
            }

            completed += 1;
            let frame = LoopFrame {
                kind: "while",
                iteration: completed,
                index: completed - 1,
                item: None,
                condition: Some(variables.substitute(raw_condition)),
                max_iterations: Some(limit),
            };
            let iteration_run = self.run_iteration(step, step_number, variables, &frame);
            run.results.extend(iteration_run.results);
            if let Some(error) = iteration_run.error {
                warn!(step = %step.name, iteration = completed, code = error.code(), "while loop aborted");
                run.error = Some(error);
                break;
            }
        }
        saved.restore(variables);

        info!(step = %step.name, iterations = completed, "while loop finished");
        if completed == 0 && run.results.is_empty() {
            return StepRun::from_row(empty_loop_row(step, "while"));
        }
        run
    }

    /// One loop pass: binds loop variables, applies `if`, then runs the body.
    fn run_iteration(&self, step: &Step, step_number: usize, variables: &mut VariableStore, frame: &LoopFrame) -> StepRun {
        frame.bind(variables);
        let suffix = format!(" (iteration {})", frame.iteration);

        if let Some(raw_condition) = step.r#if.as_deref() {
            match self.check_condition(step, raw_condition, variables, Some(frame)) {
                Ok(true) => {}
                Ok(false) => {
                    let mut row = self.skipped_row(step, raw_condition, variables);
                    row.name.push_str(&suffix);
                    return StepRun::from_row(row);
                }
                Err(mut row) => {
                    row.name.push_str(&suffix);
                    return StepRun::from_row(*row);
                }
            }
        }

        let handled = Handled {
            looping: true,
            condition: true,
        };
        let mut run = self.dispatch(step, step_number, variables, handled, Some(frame));
        for row in &mut run.results {
            row.name.push_str(&suffix);
        }
        run
    }
}

fn empty_loop_row(step: &Step, kind: &str) -> StepResult {
    let mut row = StepResult::new(&step.name, step.action_label(), ActionResult::skipped());
    row.logs.push(format!("{kind} loop produced no iterations"));
    row
}
