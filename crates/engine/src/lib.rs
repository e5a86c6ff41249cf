//! # Testflow Engine
//!
//! The Testflow Engine loads YAML test cases and runs their steps: variable
//! substitution, conditions, loops, retries, nested groups and data
//! extraction, all against one mutable variable store per test case.
//!
//! ## Key Features
//!
//! - **Variables**: `${name}`, `${ENV:NAME}` and nested `${a.b[0].c}` paths with
//!   diagnostics for references that do not resolve
//! - **Control Flow**: `if`, `for`, `while`, nested `steps` and `retry` wrappers
//!   composed in a fixed priority order
//! - **Extraction**: jq, xpath, regex and csv extraction of action results
//! - **Error Model**: technical errors kept apart from logical test failures
//!
//! ## Usage
//!
//! ```rust
//! use testflow_engine::{ActionRegistry, StepExecutor, parse_test_file};
//!
//! let temp_dir = tempfile::tempdir()?;
//! let test_path = temp_dir.path().join("smoke.yaml");
//! std::fs::write(&test_path, r#"
//! name: "smoke"
//! variables:
//!   user: "ada"
//! steps:
//!   - name: "greet"
//!     action: "log"
//!     args: ["hello ${user}"]
//! "#)?;
//!
//! let test_case = parse_test_file(&test_path)?;
//! let executor = StepExecutor::new(ActionRegistry::with_builtins());
//! let result = executor.run_test_case(&test_case);
//! assert!(result.is_success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`variables`**: the variable store, path access and resolution diagnostics
//! - **`condition`**: comparison and truthiness evaluation over substituted text
//! - **`executor`**: control-flow dispatch, retries, loops and single attempts
//! - **`extract`**: jq/xpath delegation plus built-in regex and csv extraction
//! - **`actions`**: the `Action` trait, the registry and built-in actions
//! - **`runner`**: setup, main and teardown phases folded into a `TestResult`
//! - **`validation`**: structural checks run before execution

use std::{fs, path::Path};

use anyhow::{Context, Result};

pub mod actions;
pub mod condition;
pub mod config;
pub mod duration;
pub mod executor;
pub mod extract;
pub mod runner;
pub mod validation;
pub mod variables;

// Re-export commonly used types for convenience
pub use actions::{Action, ActionRegistry};
pub use condition::{ConditionError, Operator, evaluate};
pub use config::ExecutorConfig;
pub use executor::{Handled, StepError, StepExecutor, StepKind, StepRun, classify};
pub use testflow_types as types;
pub use validation::validate_test_case;
pub use variables::VariableStore;

/// Loads a test case from a YAML file.
///
/// # Errors
///
/// This function will return an error if:
/// - The file cannot be read from the filesystem
/// - The content is not valid YAML or does not match the test-case shape
///
/// # Examples
///
/// ```rust
/// use testflow_engine::parse_test_file;
///
/// let temp_dir = tempfile::tempdir()?;
/// let test_path = temp_dir.path().join("login.yaml");
/// std::fs::write(&test_path, r#"
/// name: "login"
/// steps:
///   - name: "open"
///     action: "log"
/// "#)?;
///
/// let test_case = parse_test_file(&test_path)?;
/// assert_eq!(test_case.steps.len(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_test_file(file_path: impl AsRef<Path>) -> Result<testflow_types::TestCase> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read test file: {}", file_path.display()))?;
    parse_test_str(&content).with_context(|| format!("Failed to parse test file: {}", file_path.display()))
}

/// Parses a test case from YAML text.
pub fn parse_test_str(content: &str) -> Result<testflow_types::TestCase> {
    serde_yaml::from_str(content).context("test document does not match the expected test-case format")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_test_file_reads_phases() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_path = temp_dir.path().join("checkout.yaml");

        let content = r#"
name: "checkout"
variables:
  items: [1, 2]
setup:
  - name: "seed"
    action: "set_variable"
    args: ["cart", "empty"]
    critical: true
steps:
  - name: "add"
    for: "${items}"
    action: "log"
    args: ["${item}"]
teardown:
  - name: "cleanup"
    action: "log"
"#;
        fs::write(&test_path, content).unwrap();

        let test_case = parse_test_file(&test_path).expect("parse test file");
        assert_eq!(test_case.name, "checkout");
        assert_eq!(test_case.setup.len(), 1);
        assert!(test_case.setup[0].critical);
        assert_eq!(test_case.steps[0].r#for.as_deref(), Some("${items}"));
        assert_eq!(test_case.teardown.len(), 1);
        validate_test_case(&test_case).expect("valid test case");
    }

    #[test]
    fn test_parse_test_file_reports_path_on_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing.yaml");
        let error = parse_test_file(&missing).unwrap_err();
        assert!(error.to_string().contains("missing.yaml"));

        let broken = temp_dir.path().join("broken.yaml");
        fs::write(&broken, "steps: [").unwrap();
        let error = parse_test_file(&broken).unwrap_err();
        assert!(format!("{error:#}").contains("broken.yaml"));
    }
}
