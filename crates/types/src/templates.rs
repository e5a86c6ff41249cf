//! Message templates for error and failure builders.
//!
//! Templates use a small printf-like vocabulary: `%s`, `%d`, `%v` insert the
//! next positional argument, `%q` inserts it quoted, and `%%` emits a literal
//! percent sign. Every other verb (`%n`, `%*`, `%#`, width flags, ...) is
//! rejected when the template is registered, so a template can never be
//! coaxed into consuming arguments it was not written for. Arguments are
//! always inserted verbatim and never re-interpreted as templates.
//!
//! The table is an explicit value: build it once at start-up (usually through
//! [`MessageTemplates::default`]) and lend it to whoever builds errors.

use std::{collections::HashMap, fmt::Display};

use thiserror::Error;

use crate::outcome::{ErrorCategory, ErrorInfoBuilder, FailureCategory, FailureInfoBuilder};
use crate::{ErrorInfo, FailureInfo};

/// Machine-readable codes emitted by the engine.
pub mod codes {
    pub const UNKNOWN_ACTION: &str = "UNKNOWN_ACTION";
    pub const INVALID_CONDITION: &str = "INVALID_CONDITION";
    pub const INVALID_FOR_SPEC: &str = "INVALID_FOR_SPEC";
    pub const INVALID_RETRY_DELAY: &str = "INVALID_RETRY_DELAY";
    pub const INVALID_RETRY_CONDITION: &str = "INVALID_RETRY_CONDITION";
    pub const MAX_ITERATIONS_EXCEEDED: &str = "MAX_ITERATIONS_EXCEEDED";
    pub const EMPTY_STEP: &str = "EMPTY_STEP";
    pub const EXTRACTION_FAILED: &str = "EXTRACTION_FAILED";
    pub const INVALID_REGEX: &str = "INVALID_REGEX";
    pub const REGEX_NO_MATCH: &str = "REGEX_NO_MATCH";
    pub const INVALID_CAPTURE_GROUP: &str = "INVALID_CAPTURE_GROUP";
    pub const CSV_PARSE_FAILED: &str = "CSV_PARSE_FAILED";
    pub const CSV_SELECTION_FAILED: &str = "CSV_SELECTION_FAILED";
    pub const INVALID_ARGUMENTS: &str = "INVALID_ARGUMENTS";
    pub const ASSERTION_FAILED: &str = "ASSERTION_FAILED";
    pub const EXPLICIT_FAILURE: &str = "EXPLICIT_FAILURE";
    pub const SETUP_FAILED: &str = "SETUP_FAILED";
}

/// Reasons a template is refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template for '{code}' uses unsupported verb '%{verb}' at byte {position}")]
    UnsupportedVerb { code: String, verb: char, position: usize },
    #[error("template for '{code}' ends with a dangling '%'")]
    DanglingPercent { code: String },
}

/// Code → template lookup table.
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    templates: HashMap<String, String>,
}

const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (codes::UNKNOWN_ACTION, "unknown action %q"),
    (codes::INVALID_CONDITION, "cannot evaluate condition %q: %s"),
    (codes::INVALID_FOR_SPEC, "invalid for loop specification %q: %s"),
    (codes::INVALID_RETRY_DELAY, "invalid retry delay %q: %s"),
    (codes::INVALID_RETRY_CONDITION, "cannot evaluate retry_if condition %q: %s"),
    (codes::MAX_ITERATIONS_EXCEEDED, "while loop exceeded maximum iterations (%d) for condition %q"),
    (codes::EMPTY_STEP, "step %q has no action or nested steps to execute"),
    (codes::EXTRACTION_FAILED, "%s extraction failed: %s"),
    (codes::INVALID_REGEX, "invalid regex pattern %q: %s"),
    (codes::REGEX_NO_MATCH, "regex pattern %q did not match"),
    (codes::INVALID_CAPTURE_GROUP, "invalid capture group %d: pattern %q has %d capture group(s)"),
    (codes::CSV_PARSE_FAILED, "failed to parse CSV data: %s"),
    (codes::CSV_SELECTION_FAILED, "CSV selection failed: %s"),
    (codes::INVALID_ARGUMENTS, "action %q received invalid arguments: %s"),
    (codes::ASSERTION_FAILED, "assertion failed: expected %v %s %v"),
    (codes::EXPLICIT_FAILURE, "%s"),
    (codes::SETUP_FAILED, "critical setup step %q failed: %s"),
];

impl Default for MessageTemplates {
    fn default() -> Self {
        let mut table = Self::empty();
        for (code, template) in DEFAULT_TEMPLATES {
            table.templates.insert((*code).to_string(), (*template).to_string());
        }
        table
    }
}

impl MessageTemplates {
    /// A table without any templates; every lookup falls back to the code.
    pub fn empty() -> Self {
        Self { templates: HashMap::new() }
    }

    /// Registers (or overrides) the template for `code` after validating it.
    pub fn insert(&mut self, code: impl Into<String>, template: impl Into<String>) -> Result<(), TemplateError> {
        let code = code.into();
        let template = template.into();
        validate_template(&code, &template)?;
        self.templates.insert(code, template);
        Ok(())
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.templates.get(code).map(String::as_str)
    }

    /// Renders the template for `code`. Unknown codes render as the code followed by the arguments.
    pub fn render(&self, code: &str, args: &[&dyn Display]) -> String {
        match self.get(code) {
            Some(template) => render_template(template, args),
            None if args.is_empty() => code.to_string(),
            None => {
                let joined = args.iter().map(|arg| arg.to_string()).collect::<Vec<_>>().join(", ");
                format!("{code}: {joined}")
            }
        }
    }

    pub fn error(&self, category: ErrorCategory, code: &str, args: &[&dyn Display]) -> ErrorInfoBuilder {
        ErrorInfo::builder(category, code, self.render(code, args))
    }

    pub fn failure(&self, category: FailureCategory, code: &str, args: &[&dyn Display]) -> FailureInfoBuilder {
        FailureInfo::builder(category, code, self.render(code, args))
    }
}

fn validate_template(code: &str, template: &str) -> Result<(), TemplateError> {
    let mut characters = template.char_indices();
    while let Some((position, character)) = characters.next() {
        if character != '%' {
            continue;
        }
        match characters.next() {
            Some((_, 's' | 'd' | 'v' | 'q' | '%')) => {}
            Some((_, verb)) => {
                return Err(TemplateError::UnsupportedVerb {
                    code: code.to_string(),
                    verb,
                    position,
                });
            }
            None => return Err(TemplateError::DanglingPercent { code: code.to_string() }),
        }
    }
    Ok(())
}

fn render_template(template: &str, args: &[&dyn Display]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut remaining_args = args.iter();
    let mut characters = template.chars();
    while let Some(character) = characters.next() {
        if character != '%' {
            output.push(character);
            continue;
        }
        match characters.next() {
            Some('%') => output.push('%'),
            Some('q') => match remaining_args.next() {
                Some(arg) => output.push_str(&format!("'{arg}'")),
                None => output.push_str("<missing>"),
            },
            Some(_) => match remaining_args.next() {
                Some(arg) => output.push_str(&arg.to_string()),
                None => output.push_str("<missing>"),
            },
            None => output.push('%'),
        }
    }
    output
}
