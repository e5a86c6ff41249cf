use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use testflow_engine::{
    ActionRegistry, ExecutorConfig, StepExecutor, VariableStore, parse_test_file,
    types::{ActionStatus, StepResult, TestResult},
    validate_test_case,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Exit status used when the run is interrupted with Ctrl-C.
const INTERRUPTED_EXIT: i32 = 130;

/// Run YAML test cases through the testflow engine.
#[derive(Parser, Debug)]
#[command(name = "testflow", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a test file and print its report
    Run {
        /// Path to the test case YAML file
        file: PathBuf,

        /// Variable override as KEY=VALUE; JSON values are parsed, anything else is text
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_variable)]
        vars: Vec<(String, Value)>,

        /// Report format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Check a test file without running it
    Validate {
        /// Path to the test case YAML file
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    match Cli::parse().command {
        Command::Run { file, vars, format } => run(file, vars, format).await,
        Command::Validate { file } => {
            let test_case = parse_test_file(&file)?;
            validate_test_case(&test_case)?;
            println!("{}: ok ({} steps)", file.display(), test_case.steps.len());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Filter from `RUST_LOG`, `info` when unset or unparsable.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

async fn run(file: PathBuf, vars: Vec<(String, Value)>, format: Format) -> Result<ExitCode> {
    let test_case = parse_test_file(&file)?;
    validate_test_case(&test_case)?;

    let executor = StepExecutor::new(ActionRegistry::with_builtins()).with_config(ExecutorConfig::from_env());
    let mut variables = VariableStore::new();
    for (name, value) in vars {
        variables.set(name, value);
    }

    let handle = tokio::task::spawn_blocking(move || executor.run_test_case_with(&test_case, &mut variables));
    let result = tokio::select! {
        joined = handle => joined.context("test run panicked")?,
        _ = tokio::signal::ctrl_c() => {
            warn!(file = %file.display(), "interrupted; abandoning the step in flight");
            // The runtime would otherwise wait for the blocking task on shutdown.
            std::process::exit(INTERRUPTED_EXIT);
        }
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_report(&result),
    }
    Ok(if result.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn parse_variable(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw.split_once('=').ok_or_else(|| anyhow!("expected KEY=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("variable name must not be empty in '{raw}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn print_report(result: &TestResult) {
    println!("{} [{}] in {}ms", result.name, result.status, result.duration_ms);
    for (phase, rows) in [("setup", &result.setup_steps), ("steps", &result.steps), ("teardown", &result.teardown_steps)] {
        if rows.is_empty() {
            continue;
        }
        println!("  {phase}:");
        print_rows(rows, 2);
    }
    println!(
        "  passed: {}, failed: {}, errors: {}, skipped: {}",
        result.count(ActionStatus::Passed),
        result.count(ActionStatus::Failed),
        result.count(ActionStatus::Error),
        result.count(ActionStatus::Skipped),
    );
    if let Some(error) = &result.first_error {
        println!("  first error: {error}");
        for suggestion in &error.suggestions {
            println!("    hint: {suggestion}");
        }
    }
}

fn print_rows(rows: &[StepResult], depth: usize) {
    let indent = "  ".repeat(depth);
    for row in rows {
        let attempts = if row.attempts > 1 {
            format!(", {} attempts", row.attempts)
        } else {
            String::new()
        };
        match row.result.message() {
            Some(message) => println!("{indent}- {} [{}{}] {}", row.name, row.status(), attempts, message),
            None => println!("{indent}- {} [{}{}]", row.name, row.status(), attempts),
        }
        print_rows(&row.children, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn parses_variable_overrides() {
        assert_eq!(parse_variable("host=staging").unwrap(), ("host".to_string(), json!("staging")));
        assert_eq!(parse_variable("retries=3").unwrap(), ("retries".to_string(), json!(3)));
        assert_eq!(parse_variable("ids=[1,2]").unwrap(), ("ids".to_string(), json!([1, 2])));
        assert_eq!(parse_variable("query=a=b").unwrap(), ("query".to_string(), json!("a=b")));
        assert!(parse_variable("novalue").is_err());
        assert!(parse_variable("=x").is_err());
    }

    #[test]
    fn log_filter_follows_rust_log() {
        temp_env::with_var("RUST_LOG", Some("debug"), || {
            assert_eq!(env_filter().max_level_hint(), Some(LevelFilter::DEBUG));
        });
        temp_env::with_var_unset("RUST_LOG", || {
            assert_eq!(env_filter().max_level_hint(), Some(LevelFilter::INFO));
        });
    }

    #[test]
    fn cli_parses_run_arguments() {
        let cli = Cli::try_parse_from(["testflow", "run", "case.yaml", "--var", "a=1", "--var", "b=x", "--format", "json"]).unwrap();
        match cli.command {
            Command::Run { file, vars, format } => {
                assert_eq!(file, PathBuf::from("case.yaml"));
                assert_eq!(vars.len(), 2);
                assert!(matches!(format, Format::Json));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
