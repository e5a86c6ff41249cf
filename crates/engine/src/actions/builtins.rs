//! Framework-level actions available without an external catalog.
//!
//! | name           | args                          | result data            |
//! |----------------|-------------------------------|------------------------|
//! | `log`          | any values                    | the joined line        |
//! | `assert`       | `[actual, op, expected]` or `[condition]` | `true`     |
//! | `set_variable` | `[name, value]`               | the stored value       |
//! | `sleep`        | `[duration]`                  | `{"slept_ms": n}`      |
//! | `fail`         | `[message]`                   | (failed)               |
//! | `jq`           | `[data, expression]`          | the selected value     |
//!
//! `jq` understands the subset most checks need: `.`, `.a.b`, `.items[0].id`,
//! `.items.length`, and `| length` stages.

use std::{sync::Arc, thread};

use indexmap::IndexMap;
use serde_json::{Value, json};
use testflow_types::{ActionResult, ErrorCategory, FailureCategory, MessageTemplates, codes};
use tracing::info;

use super::{Action, ActionRegistry};
use crate::{
    condition::{self, Operator},
    duration::parse_duration,
    variables::{VariableStore, format_value, resolve_path, split_path},
};

/// Registers every builtin, rendering their messages with `templates`.
pub fn register_all(registry: &mut ActionRegistry, templates: Arc<MessageTemplates>) {
    registry.register("log", Log);
    registry.register("assert", Assert {
        templates: Arc::clone(&templates),
    });
    registry.register("set_variable", SetVariable {
        templates: Arc::clone(&templates),
    });
    registry.register("sleep", Sleep {
        templates: Arc::clone(&templates),
    });
    registry.register("fail", Fail {
        templates: Arc::clone(&templates),
    });
    registry.register("jq", Jq { templates });
}

fn invalid_arguments(templates: &MessageTemplates, action: &str, reason: &str) -> ActionResult {
    ActionResult::error(
        templates
            .error(ErrorCategory::Validation, codes::INVALID_ARGUMENTS, &[&action, &reason])
            .context("action", action)
            .build(),
    )
}

/// Writes its arguments to the log.
pub struct Log;

impl Action for Log {
    fn execute(&self, args: &[Value], _options: &IndexMap<String, Value>, _variables: &mut VariableStore) -> ActionResult {
        let line = args.iter().map(format_value).collect::<Vec<_>>().join(" ");
        info!(message = %line, "log");
        ActionResult::passed_with(line)
    }
}

/// Checks a comparison or a condition; the `message` option replaces the failure message.
pub struct Assert {
    templates: Arc<MessageTemplates>,
}

impl Action for Assert {
    fn execute(&self, args: &[Value], options: &IndexMap<String, Value>, _variables: &mut VariableStore) -> ActionResult {
        let (holds, builder) = match args {
            [actual, operator, expected] => {
                let symbol = format_value(operator);
                let Some(operator) = Operator::parse(&symbol) else {
                    return invalid_arguments(&self.templates, "assert", &format!("unknown operator '{symbol}'"));
                };
                let left = format_value(actual);
                let right = format_value(expected);
                let builder = self
                    .templates
                    .failure(FailureCategory::Assertion, codes::ASSERTION_FAILED, &[&left, &symbol, &right])
                    .expected(expected.clone())
                    .actual(actual.clone())
                    .operator(symbol.clone());
                (operator.apply(&left, &right), builder)
            }
            [single] => {
                let holds = match single {
                    Value::Bool(flag) => *flag,
                    other => match condition::evaluate_substituted(&format_value(other)) {
                        Ok(holds) => holds,
                        Err(error) => return invalid_arguments(&self.templates, "assert", &error.to_string()),
                    },
                };
                let text = format_value(single);
                let builder = self
                    .templates
                    .failure(FailureCategory::Assertion, codes::ASSERTION_FAILED, &[&text, &"==", &true])
                    .expected(true)
                    .actual(single.clone());
                (holds, builder)
            }
            _ => {
                return invalid_arguments(
                    &self.templates,
                    "assert",
                    &format!("expected [actual, operator, expected] or [condition], got {} argument(s)", args.len()),
                );
            }
        };
        if holds {
            return ActionResult::passed_with(true);
        }
        let mut failure = builder.build();
        if let Some(message) = options.get("message") {
            failure.message = format_value(message);
        }
        ActionResult::failed(failure)
    }
}

/// Stores `args[1]` under the name `args[0]`.
pub struct SetVariable {
    templates: Arc<MessageTemplates>,
}

impl Action for SetVariable {
    fn execute(&self, args: &[Value], _options: &IndexMap<String, Value>, variables: &mut VariableStore) -> ActionResult {
        let [Value::String(name), value] = args else {
            return invalid_arguments(&self.templates, "set_variable", "expected [name, value]");
        };
        if name.trim().is_empty() {
            return invalid_arguments(&self.templates, "set_variable", "variable name is empty");
        }
        variables.set(name.trim(), value.clone());
        ActionResult::passed_with(value.clone())
    }
}

pub struct Sleep {
    templates: Arc<MessageTemplates>,
}

impl Action for Sleep {
    fn execute(&self, args: &[Value], _options: &IndexMap<String, Value>, _variables: &mut VariableStore) -> ActionResult {
        let [duration] = args else {
            return invalid_arguments(&self.templates, "sleep", "expected [duration]");
        };
        match parse_duration(&format_value(duration)) {
            Ok(duration) => {
                thread::sleep(duration);
                ActionResult::passed_with(json!({"slept_ms": duration.as_millis() as u64}))
            }
            Err(error) => invalid_arguments(&self.templates, "sleep", &error.to_string()),
        }
    }
}

/// Always fails, with `args[0]` as the message.
pub struct Fail {
    templates: Arc<MessageTemplates>,
}

impl Action for Fail {
    fn execute(&self, args: &[Value], _options: &IndexMap<String, Value>, _variables: &mut VariableStore) -> ActionResult {
        let message = args
            .first()
            .map(format_value)
            .unwrap_or_else(|| "step failed explicitly".to_string());
        ActionResult::failed(
            self.templates
                .failure(FailureCategory::Validation, codes::EXPLICIT_FAILURE, &[&message])
                .build(),
        )
    }
}

pub struct Jq {
    templates: Arc<MessageTemplates>,
}

impl Action for Jq {
    fn execute(&self, args: &[Value], _options: &IndexMap<String, Value>, _variables: &mut VariableStore) -> ActionResult {
        let [data, Value::String(expression)] = args else {
            return invalid_arguments(&self.templates, "jq", "expected [data, expression]");
        };
        // Action output often carries JSON as text.
        let parsed;
        let data = match data {
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => {
                    parsed = value;
                    &parsed
                }
                Err(_) => data,
            },
            other => other,
        };
        match query(data, expression) {
            Ok(value) => ActionResult::passed_with(value),
            Err(reason) => ActionResult::error(
                self.templates
                    .error(ErrorCategory::Execution, codes::EXTRACTION_FAILED, &[&"jq", &reason])
                    .context("expression", expression.as_str())
                    .build(),
            ),
        }
    }
}

fn query(data: &Value, expression: &str) -> Result<Value, String> {
    let mut current = data.clone();
    for stage in expression.split('|').map(str::trim) {
        current = match stage {
            "" | "." => current,
            "length" => match &current {
                Value::Array(items) => Value::from(items.len()),
                Value::Object(map) => Value::from(map.len()),
                Value::String(text) => Value::from(text.chars().count()),
                Value::Null => Value::from(0),
                other => return Err(format!("cannot take the length of {other}")),
            },
            path => {
                let Some(path) = path.strip_prefix('.') else {
                    return Err(format!("unsupported expression '{stage}'"));
                };
                let segments = split_path(path);
                resolve_path(&current, &segments)
                    .map(|value| value.into_owned())
                    .map_err(|failure| format!("{} at '{}'", failure.reason, failure.failed_segment))?
            }
        };
    }
    Ok(current)
}
