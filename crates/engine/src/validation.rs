//! Structural checks run on a loaded test case before any step executes.
//!
//! Only properties that can be decided without running anything are checked:
//! names, the action/group split, retry budgets, and `for` specs or retry
//! delays that contain no `${...}` references.

use anyhow::{Result, bail};
use testflow_types::{Step, TestCase};

use crate::{duration::parse_duration, executor::ForSpec, variables::VariableStore};

/// Validate `test_case`, reporting every problem found in one error.
pub fn validate_test_case(test_case: &TestCase) -> Result<()> {
    let mut problems = Vec::new();
    if test_case.name.trim().is_empty() {
        problems.push("test case name must not be empty".to_string());
    }
    if test_case.steps.is_empty() {
        problems.push("test case must declare at least one step".to_string());
    }
    for (phase, steps) in [("setup", &test_case.setup), ("steps", &test_case.steps), ("teardown", &test_case.teardown)] {
        for (position, step) in steps.iter().enumerate() {
            validate_step(step, &format!("{phase}[{position}]"), &mut problems);
        }
    }

    if problems.is_empty() {
        return Ok(());
    }
    bail!("test case '{}' is invalid:\n  - {}", test_case.name, problems.join("\n  - "))
}

fn validate_step(step: &Step, location: &str, problems: &mut Vec<String>) {
    let label = if step.name.trim().is_empty() {
        problems.push(format!("{location}: step name must not be empty"));
        location.to_string()
    } else {
        format!("{location} '{}'", step.name)
    };

    match (step.action.as_deref(), step.has_children()) {
        (Some(_), true) => problems.push(format!("{label}: a step cannot declare both 'action' and nested 'steps'")),
        (None, false) => problems.push(format!("{label}: step needs an 'action' or nested 'steps'")),
        (Some(action), false) if action.trim().is_empty() => problems.push(format!("{label}: action name must not be empty")),
        _ => {}
    }

    if step.r#for.is_some() && step.r#while.is_some() {
        problems.push(format!("{label}: 'for' and 'while' cannot be combined"));
    }
    if let Some(raw) = step.r#for.as_deref()
        && !raw.contains("${")
        && let Err(error) = ForSpec::parse(raw, &VariableStore::new())
    {
        problems.push(format!("{label}: {error}"));
    }
    if let Some(condition) = step.r#while.as_deref()
        && condition.trim().is_empty()
    {
        problems.push(format!("{label}: 'while' condition must not be empty"));
    }
    if step.max_iterations == Some(0) {
        problems.push(format!("{label}: 'max_iterations' must be at least 1"));
    }

    if let Some(retry) = &step.retry {
        if retry.attempts == 0 {
            problems.push(format!("{label}: retry attempts must be at least 1"));
        }
        if !retry.delay.contains("${")
            && let Err(error) = parse_duration(&retry.delay)
        {
            problems.push(format!("{label}: {error}"));
        }
        if retry.retry_if.as_deref().is_some_and(|condition| condition.trim().is_empty()) {
            problems.push(format!("{label}: 'retry_if' must not be empty"));
        }
    }

    for (position, child) in step.steps.iter().enumerate() {
        validate_step(child, &format!("{location}.steps[{position}]"), problems);
    }
}

#[cfg(test)]
mod tests {
    use testflow_types::RetryConfig;

    use super::*;

    fn case(steps: Vec<Step>) -> TestCase {
        TestCase {
            name: "login".into(),
            steps,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_a_well_formed_case() {
        let mut looped = Step::action("each", "log");
        looped.r#for = Some("1..3".into());
        let mut dynamic = Step::action("dynamic", "log");
        dynamic.r#for = Some("${users}".into());
        let group = Step::group("group", vec![looped, dynamic]);
        assert!(validate_test_case(&case(vec![group])).is_ok());
    }

    #[test]
    fn rejects_empty_case() {
        let error = validate_test_case(&TestCase::default()).unwrap_err().to_string();
        assert!(error.contains("name must not be empty"));
        assert!(error.contains("at least one step"));
    }

    #[test]
    fn rejects_step_with_action_and_children() {
        let mut step = Step::group("both", vec![Step::action("child", "log")]);
        step.action = Some("log".into());
        let error = validate_test_case(&case(vec![step])).unwrap_err().to_string();
        assert!(error.contains("steps[0] 'both': a step cannot declare both"));
    }

    #[test]
    fn reports_nested_problems_with_their_location() {
        let child = Step {
            name: "empty".into(),
            ..Default::default()
        };
        let error = validate_test_case(&case(vec![Step::group("outer", vec![child])]))
            .unwrap_err()
            .to_string();
        assert!(error.contains("steps[0].steps[0] 'empty': step needs an 'action' or nested 'steps'"));
    }

    #[test]
    fn rejects_static_bad_for_spec_and_retry_settings() {
        let mut looped = Step::action("loop", "log");
        looped.r#for = Some("1..x".into());
        let mut retried = Step::action("retry", "log");
        retried.retry = Some(RetryConfig {
            attempts: 0,
            delay: "soon".into(),
            ..Default::default()
        });
        let error = validate_test_case(&case(vec![looped, retried])).unwrap_err().to_string();
        assert!(error.contains("steps[0] 'loop'"));
        assert!(error.contains("retry attempts must be at least 1"));
        assert!(error.contains("soon"));
    }
}
