//! Shared type definitions for the testflow engine and CLI.
//!
//! - [`test_case`]: the authored test tree (steps, retry, extraction)
//! - [`outcome`]: `ActionResult` with the `ErrorInfo` / `FailureInfo` taxonomy
//! - [`report`]: `StepResult` rows and the `TestResult` aggregate
//! - [`templates`]: validated message templates used by the error builders

pub mod outcome;
pub mod report;
pub mod templates;
pub mod test_case;

pub use outcome::{
    ActionResult, ActionStatus, ErrorCategory, ErrorInfo, ErrorInfoBuilder, FailureCategory, FailureInfo, FailureInfoBuilder, Outcome,
};
pub use report::{StepResult, TestResult, TestStatus};
pub use templates::{MessageTemplates, TemplateError, codes};
pub use test_case::{BackoffStrategy, ExtractKind, ExtractSpec, NESTED_STEPS_ACTION, RetryConfig, RetryOn, Step, TestCase};
