//! Test-case runner: setup → main → teardown over one fresh variable store.

use std::time::Instant;

use indexmap::IndexMap;
use serde_json::Value;
use testflow_types::{ActionStatus, ErrorCategory, ErrorInfo, Step, StepResult, TestCase, TestResult, codes};
use tracing::{info, warn};

use crate::{
    executor::{StepExecutor, first_non_passing},
    variables::VariableStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Setup,
    Main,
    Teardown,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Main => "main",
            Phase::Teardown => "teardown",
        }
    }
}

/// The step that stopped a phase and why.
struct PhaseStop {
    step: String,
    critical: bool,
    code: String,
    detail: String,
}

/// Outcome of running one phase.
struct PhaseRun {
    results: Vec<StepResult>,
    stop: Option<PhaseStop>,
}

impl StepExecutor {
    /// Runs `test_case` with its declared variables loaded into a new store.
    pub fn run_test_case(&self, test_case: &TestCase) -> TestResult {
        let mut variables = VariableStore::new();
        self.run_test_case_with(test_case, &mut variables)
    }

    /// Runs `test_case` against a caller-provided store (for example one
    /// pre-seeded with command-line overrides). Declared variables are loaded
    /// first and never replace a name the store already holds.
    pub fn run_test_case_with(&self, test_case: &TestCase, variables: &mut VariableStore) -> TestResult {
        let started = Instant::now();
        let declared: IndexMap<String, Value> = test_case
            .variables
            .iter()
            .filter(|(name, _)| !variables.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        variables.load(&declared);
        info!(test = %test_case.name, steps = test_case.steps.len(), "test case started");

        let setup = self.run_phase(Phase::Setup, &test_case.setup, variables);
        let mut first_error = None;
        let setup_aborted = match &setup.stop {
            Some(stop) if stop.critical => {
                warn!(test = %test_case.name, step = %stop.step, code = %stop.code, "critical setup step failed; skipping main steps");
                first_error = Some(
                    self.templates()
                        .error(ErrorCategory::Execution, codes::SETUP_FAILED, &[&stop.step, &stop.detail])
                        .context("step", stop.step.as_str())
                        .context("cause_code", stop.code.as_str())
                        .build(),
                );
                true
            }
            Some(stop) => {
                warn!(test = %test_case.name, step = %stop.step, code = %stop.code, "setup step errored; continuing with main steps");
                false
            }
            None => false,
        };

        let main = if setup_aborted {
            PhaseRun {
                results: Vec::new(),
                stop: None,
            }
        } else {
            self.run_phase(Phase::Main, &test_case.steps, variables)
        };

        let teardown = self.run_phase(Phase::Teardown, &test_case.teardown, variables);

        let status = if setup_aborted {
            ActionStatus::Error
        } else {
            overall_status(&main.results)
        };
        if first_error.is_none() {
            first_error = first_error_in(&main.results).cloned();
        }

        let result = TestResult {
            name: test_case.name.clone(),
            status,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            setup_steps: setup.results,
            steps: main.results,
            teardown_steps: teardown.results,
            first_error,
        };
        info!(
            test = %result.name,
            status = %result.status,
            passed = result.count(ActionStatus::Passed),
            failed = result.count(ActionStatus::Failed),
            errors = result.count(ActionStatus::Error),
            duration_ms = result.duration_ms,
            "test case finished"
        );
        result
    }

    /// Runs `steps` in order. A technical error stops the phase unless the
    /// step sets `continue`; in setup a critical step also stops it on a
    /// logical failure. Teardown never stops.
    fn run_phase(&self, phase: Phase, steps: &[Step], variables: &mut VariableStore) -> PhaseRun {
        let mut results = Vec::new();
        for (position, step) in steps.iter().enumerate() {
            let run = self.execute_step_with_control_flow(step, position + 1, variables);
            let critical = phase == Phase::Setup && step.critical;
            let stop = match (&run.error, first_non_passing(&run.results)) {
                (Some(error), _) => Some((error.code().to_string(), error.to_string())),
                (None, Some(row)) if critical => row
                    .result
                    .failure_info()
                    .map(|info| (info.code.clone(), info.to_string())),
                _ => None,
            };
            results.extend(run.results);
            let Some((code, detail)) = stop else {
                continue;
            };
            if phase == Phase::Teardown || step.continue_on_failure {
                info!(phase = phase.as_str(), step = %step.name, code = %code, "step did not pass; continuing");
                continue;
            }
            warn!(phase = phase.as_str(), step = %step.name, code = %code, "step did not pass; stopping phase");
            return PhaseRun {
                results,
                stop: Some(PhaseStop {
                    step: step.name.clone(),
                    critical,
                    code,
                    detail,
                }),
            };
        }
        PhaseRun { results, stop: None }
    }
}

/// Most severe status among `results`; an empty phase counts as passed.
fn overall_status(results: &[StepResult]) -> ActionStatus {
    results
        .iter()
        .map(StepResult::status)
        .filter(|status| *status != ActionStatus::Skipped)
        .max_by_key(|status| status.severity())
        .unwrap_or(ActionStatus::Passed)
}

fn first_error_in(results: &[StepResult]) -> Option<&ErrorInfo> {
    results.iter().find_map(|row| {
        row.result
            .error_info()
            .or_else(|| first_error_in(&row.children))
    })
}
