//! # Variable Store
//!
//! Named values shared by every step of one test-case run, plus the `${...}`
//! substitution that injects them into arguments, options and conditions.
//!
//! ## Reference syntax
//!
//! - `${name}`: a stored variable
//! - `${user.profile.email}`, `${items.0}`, `${items[0].id}`, `${items.length}`:
//!   nested access into objects and arrays
//! - `${ENV:HOME}`: a process environment variable
//!
//! A full dotted name that was stored as-is (for example `set("a.b", ..)`) wins
//! over path navigation. References that cannot be resolved are left in the
//! output verbatim; callers that need to explain the miss ask for
//! [`VariableStore::diagnose`].
//!
//! ```rust
//! use testflow_engine::variables::VariableStore;
//! use serde_json::json;
//!
//! let mut store = VariableStore::new();
//! store.set("user", json!({"name": "ada", "roles": ["admin", "dev"]}));
//! assert_eq!(store.substitute("hi ${user.name} (${user.roles.length})"), "hi ada (2)");
//! assert_eq!(store.substitute("${missing}"), "${missing}");
//! ```

use std::borrow::Cow;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

pub mod access;
pub mod diagnostics;

pub use access::{AccessFailure, PathAccess, PathFailure, resolve_path, split_path, value_kind};
pub use diagnostics::{ResolutionStatus, VariableAttempt, VariableContext, suggest_names};

static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^{}]*)\}").expect("reference regex should compile"));
static WHOLE_REFERENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{([^{}]*)\}$").expect("whole reference regex should compile"));

/// Why a single reference expression did not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveFailure {
    EmptyExpression,
    MissingEnvironment { name: String },
    UnknownVariable { name: String },
    Path { root: String, failure: PathFailure },
}

/// Mutable bag of named values for one test-case run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableStore {
    values: IndexMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Stores a structured record; its fields become reachable by name.
    pub fn set_record<T: Serialize>(&mut self, name: impl Into<String>, record: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(record)?;
        self.set(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bulk-seeds variables in declaration order.
    ///
    /// String values are substituted against the variables loaded so far, so a
    /// later entry may reference an earlier one or `${ENV:...}`.
    pub fn load(&mut self, variables: &IndexMap<String, Value>) {
        for (name, value) in variables {
            let resolved = self.substitute_value(value);
            self.values.insert(name.clone(), resolved);
        }
        debug!(count = variables.len(), "loaded test variables");
    }

    /// Resolves the inside of a `${...}` reference.
    pub fn resolve(&self, expression: &str) -> Result<Cow<'_, Value>, ResolveFailure> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(ResolveFailure::EmptyExpression);
        }
        if let Some(name) = expression.strip_prefix("ENV:").or_else(|| expression.strip_prefix("env:")) {
            return std::env::var(name)
                .map(|value| Cow::Owned(Value::String(value)))
                .map_err(|_| ResolveFailure::MissingEnvironment { name: name.to_string() });
        }
        if let Some(value) = self.values.get(expression) {
            return Ok(Cow::Borrowed(value));
        }

        let segments = split_path(expression);
        let Some((root, rest)) = segments.split_first() else {
            return Err(ResolveFailure::EmptyExpression);
        };
        let Some(root_value) = self.values.get(*root) else {
            return Err(ResolveFailure::UnknownVariable { name: root.to_string() });
        };
        resolve_path(root_value, rest).map_err(|failure| ResolveFailure::Path {
            root: root.to_string(),
            failure,
        })
    }

    /// Replaces every resolvable reference in `template`; the rest stays verbatim.
    pub fn substitute(&self, template: &str) -> String {
        if !template.contains("${") {
            return template.to_string();
        }
        REFERENCE_PATTERN
            .replace_all(template, |captures: &regex::Captures<'_>| match self.resolve(&captures[1]) {
                Ok(value) => format_value(&value),
                Err(_) => captures[0].to_string(),
            })
            .into_owned()
    }

    /// Substitutes strings inside `value`, recursing through arrays and objects.
    ///
    /// A string that consists of exactly one resolvable reference is replaced
    /// by the referenced value itself, keeping its JSON type.
    pub fn substitute_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => {
                if let Some(captures) = WHOLE_REFERENCE_PATTERN.captures(text)
                    && let Ok(resolved) = self.resolve(&captures[1])
                {
                    return resolved.into_owned();
                }
                Value::String(self.substitute(text))
            }
            Value::Array(items) => Value::Array(items.iter().map(|item| self.substitute_value(item)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.substitute_value(item)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn substitute_args(&self, args: &[Value]) -> Vec<Value> {
        args.iter().map(|arg| self.substitute_value(arg)).collect()
    }

    pub fn substitute_options(&self, options: &IndexMap<String, Value>) -> IndexMap<String, Value> {
        options
            .iter()
            .map(|(key, value)| (key.clone(), self.substitute_value(value)))
            .collect()
    }

    /// Explains why `template` does not fully resolve; `None` when it does.
    pub fn diagnose(&self, template: &str) -> Option<VariableContext> {
        if !template.contains("${") {
            return None;
        }
        let mut attempts = Vec::new();
        let mut covered = Vec::new();
        for captures in REFERENCE_PATTERN.captures_iter(template) {
            let whole = captures.get(0).expect("capture group 0 always exists");
            covered.push(whole.start());
            attempts.push(self.attempt(&captures[1]));
        }
        for (position, _) in template.match_indices("${") {
            if !covered.contains(&position) {
                attempts.push(VariableAttempt {
                    expression: template[position + 2..].to_string(),
                    status: ResolutionStatus::ExpressionError,
                    reason: Some("unterminated or nested reference".to_string()),
                    access_path: Vec::new(),
                    available_keys: Vec::new(),
                    suggestions: Vec::new(),
                });
            }
        }

        let context = VariableContext {
            template: template.to_string(),
            attempts,
        };
        if context.failures().next().is_some() { Some(context) } else { None }
    }

    /// Diagnoses every string inside `values`, merging the attempts.
    pub fn diagnose_values<'a, I>(&self, values: I) -> Option<VariableContext>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut merged: Option<VariableContext> = None;
        for value in values {
            let mut templates = Vec::new();
            collect_strings(value, &mut templates);
            for template in templates {
                if let Some(context) = self.diagnose(template) {
                    match merged.as_mut() {
                        Some(existing) => existing.attempts.extend(context.attempts),
                        None => merged = Some(context),
                    }
                }
            }
        }
        merged
    }

    fn attempt(&self, expression: &str) -> VariableAttempt {
        let failure = match self.resolve(expression) {
            Ok(_) => return VariableAttempt::resolved(expression),
            Err(failure) => failure,
        };
        let mut attempt = VariableAttempt::resolved(expression);
        match failure {
            ResolveFailure::EmptyExpression => {
                attempt.status = ResolutionStatus::ExpressionError;
                attempt.reason = Some("empty reference".to_string());
            }
            ResolveFailure::MissingEnvironment { name } => {
                attempt.status = ResolutionStatus::Unresolved;
                attempt.reason = Some(format!("environment variable '{name}' is not set"));
                attempt.access_path = vec![format!("ENV:{name}")];
            }
            ResolveFailure::UnknownVariable { name } => {
                attempt.status = ResolutionStatus::Unresolved;
                attempt.reason = Some(format!("variable '{name}' not found"));
                attempt.access_path = vec![name.clone()];
                attempt.available_keys = self.names().map(str::to_string).collect();
                attempt.suggestions = suggest_names(&name, self.names());
            }
            ResolveFailure::Path { root, failure } => {
                attempt.status = ResolutionStatus::Partial;
                attempt.reason = Some(format!("{} ({})", failure.reason, failure.reason.kind()));
                attempt.access_path = std::iter::once(root)
                    .chain(failure.resolved)
                    .chain(std::iter::once(failure.failed_segment.clone()))
                    .collect();
                attempt.suggestions = suggest_names(&failure.failed_segment, failure.available_keys.iter().map(String::as_str));
                attempt.available_keys = failure.available_keys;
            }
        }
        attempt
    }
}

fn collect_strings<'a>(value: &'a Value, output: &mut Vec<&'a str>) {
    match value {
        Value::String(text) => output.push(text),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, output)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, output)),
        _ => {}
    }
}

/// Renders a value the way it appears inside a substituted string.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitute_round_trips_stored_values() {
        let mut store = VariableStore::new();
        store.set("token", "abc123");
        let substituted = store.substitute("${token}");
        assert_eq!(substituted, "abc123");
        assert_eq!(store.substitute(&substituted), "abc123");
        assert_eq!(store.get("token"), Some(&json!("abc123")));
    }

    #[test]
    fn substitute_handles_nested_paths_and_leaves_unknowns() {
        let mut store = VariableStore::new();
        store.set("user", json!({"profile": {"email": "ada@example.com"}, "tags": ["a", "b", "c"]}));
        assert_eq!(store.substitute("mail=${user.profile.email}"), "mail=ada@example.com");
        assert_eq!(store.substitute("${user.tags.0}/${user.tags[2]}"), "a/c");
        assert_eq!(store.substitute("${user.tags.length}"), "3");
        assert_eq!(store.substitute("${user.missing} ${nope}"), "${user.missing} ${nope}");
    }

    #[test]
    fn exact_dotted_name_wins_over_navigation() {
        let mut store = VariableStore::new();
        store.set("a.b", "flat");
        store.set("a", json!({"b": "nested"}));
        assert_eq!(store.substitute("${a.b}"), "flat");
    }

    #[test]
    fn substitutes_environment_variables() {
        temp_env::with_var("TESTFLOW_SAMPLE_HOST", Some("db.internal"), || {
            let store = VariableStore::new();
            assert_eq!(store.substitute("host=${ENV:TESTFLOW_SAMPLE_HOST}"), "host=db.internal");
        });
        temp_env::with_var("TESTFLOW_SAMPLE_HOST", None::<&str>, || {
            let store = VariableStore::new();
            assert_eq!(store.substitute("${ENV:TESTFLOW_SAMPLE_HOST}"), "${ENV:TESTFLOW_SAMPLE_HOST}");
        });
    }

    #[test]
    fn substitute_value_keeps_type_of_whole_references() {
        let mut store = VariableStore::new();
        store.set("ids", json!([1, 2]));
        store.set("n", 5);
        let args = store.substitute_args(&[json!("${ids}"), json!("n=${n}"), json!(7), json!({"nested": "${n}"})]);
        assert_eq!(args, vec![json!([1, 2]), json!("n=5"), json!(7), json!({"nested": 5})]);
    }

    #[test]
    fn load_resolves_earlier_entries() {
        let mut variables = IndexMap::new();
        variables.insert("host".to_string(), json!("localhost"));
        variables.insert("url".to_string(), json!("http://${host}:8080"));
        let mut store = VariableStore::new();
        store.load(&variables);
        assert_eq!(store.get("url"), Some(&json!("http://localhost:8080")));
    }

    #[test]
    fn set_record_exposes_fields() {
        #[derive(Serialize)]
        struct Account {
            id: u32,
            owner: String,
        }
        let mut store = VariableStore::new();
        store
            .set_record("account", &Account { id: 7, owner: "ada".into() })
            .expect("serializable record");
        assert_eq!(store.substitute("${account.owner}#${account.id}"), "ada#7");
    }

    #[test]
    fn clone_is_isolated() {
        let mut store = VariableStore::new();
        store.set("x", 1);
        let mut sandbox = store.clone();
        sandbox.set("x", 2);
        sandbox.set("_has_error", true);
        assert_eq!(store.get("x"), Some(&json!(1)));
        assert!(!store.contains("_has_error"));
    }

    #[test]
    fn diagnose_reports_status_and_suggestions() {
        let mut store = VariableStore::new();
        store.set("username", "ada");
        store.set("response", json!({"body": {"id": 1}}));

        assert!(store.diagnose("${username}").is_none());

        let context = store.diagnose("${usrname} ${response.body.idd} ${}").expect("diagnostics");
        let statuses: Vec<_> = context.attempts.iter().map(|attempt| attempt.status).collect();
        assert_eq!(
            statuses,
            vec![
                ResolutionStatus::Unresolved,
                ResolutionStatus::Partial,
                ResolutionStatus::ExpressionError
            ]
        );
        assert_eq!(context.attempts[0].suggestions, vec!["username".to_string()]);
        assert_eq!(context.attempts[1].access_path, vec!["response", "body", "idd"]);
        assert_eq!(context.attempts[1].available_keys, vec!["id".to_string()]);
        assert_eq!(context.attempts[1].suggestions, vec!["id".to_string()]);
        assert!(context.summary().contains("variable 'usrname' not found"));
    }

    #[test]
    fn diagnose_flags_unterminated_reference() {
        let store = VariableStore::new();
        let context = store.diagnose("value ${broken").expect("diagnostics");
        assert_eq!(context.attempts[0].status, ResolutionStatus::ExpressionError);
    }
}
