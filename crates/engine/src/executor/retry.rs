//! Retry policy around a single action.

use std::time::{Duration, Instant};

use serde_json::Value;
use testflow_types::{ActionResult, BackoffStrategy, ErrorCategory, ErrorInfo, RetryConfig, RetryOn, Step, StepResult, codes};
use tracing::{info, warn};

use super::{LoopFrame, StepExecutor, annotate, elapsed_ms, error_row};
use crate::{condition, duration::parse_duration, variables::VariableStore};

/// Delay before the attempt that follows `attempt_index` (0-based index of
/// the attempt that just finished).
pub fn calculate_delay(base: Duration, attempt_index: u32, backoff: BackoffStrategy) -> Duration {
    match backoff {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base.saturating_mul(attempt_index.saturating_add(1)),
        BackoffStrategy::Exponential => base.saturating_mul(2u32.saturating_pow(attempt_index)),
    }
}

/// What to do after an attempt.
#[derive(Debug)]
enum Decision {
    Retry,
    Stop(&'static str),
}

impl StepExecutor {
    /// Runs the action up to `retry.attempts` times.
    ///
    /// The returned row holds the last attempt's result, the number of
    /// attempts made, and every attempt's logs.
    pub(crate) fn execute_with_retry(&self, step: &Step, variables: &mut VariableStore, frame: Option<&LoopFrame>) -> StepResult {
        let retry = step.retry.clone().unwrap_or_default();
        let base_delay = match parse_duration(&retry.delay) {
            Ok(delay) => delay,
            Err(error) => {
                let mut info = self
                    .templates
                    .error(ErrorCategory::Validation, codes::INVALID_RETRY_DELAY, &[&retry.delay, &error])
                    .suggestion("use a duration such as 500ms, 1s, 1.5s or 2m")
                    .build();
                annotate(&mut info, step, frame);
                return error_row(step, info);
            }
        };
        let max_attempts = retry.attempts.max(1);
        let started = Instant::now();
        let mut logs = Vec::new();
        let mut attempt = 0u32;

        let mut last = loop {
            attempt += 1;
            let mut row = self.execute_once(step, variables, frame);
            logs.append(&mut row.logs);
            logs.push(format!("attempt {attempt}/{max_attempts}: {}", row.status()));

            let decision = match self.decide(&retry, &row.result, variables) {
                Ok(decision) => decision,
                Err(mut info) => {
                    annotate(&mut info, step, frame);
                    row.result = ActionResult::error(info);
                    break row;
                }
            };
            match decision {
                Decision::Stop(reason) => {
                    info!(step = %step.name, attempt, reason, "retry stopped");
                    break row;
                }
                Decision::Retry if attempt >= max_attempts => {
                    warn!(step = %step.name, attempts = attempt, "retry attempts exhausted");
                    logs.push(format!("retry attempts exhausted after {attempt}"));
                    break row;
                }
                Decision::Retry => {
                    let delay = calculate_delay(base_delay, attempt - 1, retry.backoff);
                    info!(step = %step.name, attempt, delay_ms = delay.as_millis() as u64, "retrying step");
                    (self.sleeper)(delay);
                }
            }
        };

        last.attempts = attempt;
        last.logs = logs;
        last.duration_ms = elapsed_ms(started);
        last
    }

    /// Stop rules, in order: success, `retry_if`, `retry_on`, then retry.
    fn decide(&self, retry: &RetryConfig, result: &ActionResult, variables: &VariableStore) -> Result<Decision, ErrorInfo> {
        if result.is_passed() && retry.stops_on_success() {
            return Ok(Decision::Stop("passed"));
        }

        if let Some(raw_condition) = retry.retry_if.as_deref() {
            let mut scope = variables.clone();
            seed_error_variables(&mut scope, result);
            match condition::evaluate(raw_condition, &scope) {
                Ok(false) => return Ok(Decision::Stop("retry_if evaluated to false")),
                Ok(true) => {}
                Err(error) => {
                    return Err(self
                        .templates
                        .error(ErrorCategory::Validation, codes::INVALID_RETRY_CONDITION, &[&raw_condition, &error])
                        .context("retry_if", raw_condition)
                        .build());
                }
            }
        }

        if !retry.retry_on.is_empty()
            && let Some(message) = result.message()
        {
            let code = result
                .error_info()
                .map(|info| info.code.as_str())
                .or_else(|| result.failure_info().map(|info| info.code.as_str()))
                .unwrap_or_default();
            let haystack = format!("{} {}", code, message).to_lowercase();
            if !retry.retry_on.iter().any(|tag| matches_retry_tag(*tag, &haystack)) {
                return Ok(Decision::Stop("error does not match retry_on"));
            }
        }

        Ok(Decision::Retry)
    }
}

fn matches_retry_tag(tag: RetryOn, haystack: &str) -> bool {
    match tag {
        RetryOn::HttpError => haystack.contains("http"),
        RetryOn::Timeout => haystack.contains("timeout") || haystack.contains("timed out"),
        RetryOn::ConnectionError => ["connection", "dial", "network"].iter().any(|word| haystack.contains(word)),
        RetryOn::AssertionFailed => haystack.contains("assertion"),
        RetryOn::All => true,
    }
}

/// Publishes the attempt's outcome as `_has_error`, `_error_category`,
/// `_error_code`, `_error_message` and `_status_code`.
fn seed_error_variables(scope: &mut VariableStore, result: &ActionResult) {
    let (category, code, message) = match (result.error_info(), result.failure_info()) {
        (Some(info), _) => (info.category.as_str(), info.code.as_str(), info.message.as_str()),
        (None, Some(info)) => (info.category.as_str(), info.code.as_str(), info.message.as_str()),
        (None, None) => ("", "", ""),
    };
    let status_code = result
        .data
        .as_ref()
        .and_then(|data| data.get("status_code"))
        .or_else(|| result.error_info().and_then(|info| info.context.get("status_code")))
        .cloned()
        .unwrap_or(Value::from(0));

    scope.set("_has_error", result.error_info().is_some() || result.failure_info().is_some());
    scope.set("_error_category", category);
    scope.set("_error_code", code);
    scope.set("_error_message", message);
    scope.set("_status_code", status_code);
}
