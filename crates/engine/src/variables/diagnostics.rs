//! Diagnostics for variable references that failed to resolve.
//!
//! A [`VariableContext`] is only built after substitution left something
//! unresolved; it explains the single error it is attached to and is never
//! stored anywhere else.

use serde::Serialize;
use serde_json::Value;

/// Maximum edit distance for a name to count as a near match.
const MAX_SUGGESTION_DISTANCE: usize = 2;
/// Upper bound on suggestions reported per reference.
const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Resolved,
    /// The root variable does not exist.
    Unresolved,
    /// The root exists but a nested segment failed.
    Partial,
    /// The reference itself is malformed (`${}`, unterminated `${`).
    ExpressionError,
}

/// One `${...}` reference found in a template.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VariableAttempt {
    pub expression: String,
    pub status: ResolutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub access_path: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available_keys: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl VariableAttempt {
    pub(crate) fn resolved(expression: &str) -> Self {
        Self {
            expression: expression.to_string(),
            status: ResolutionStatus::Resolved,
            reason: None,
            access_path: Vec::new(),
            available_keys: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

/// Every reference attempted while substituting one template.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VariableContext {
    pub template: String,
    pub attempts: Vec<VariableAttempt>,
}

impl VariableContext {
    /// References that did not resolve.
    pub fn failures(&self) -> impl Iterator<Item = &VariableAttempt> {
        self.attempts
            .iter()
            .filter(|attempt| attempt.status != ResolutionStatus::Resolved)
    }

    /// One line per failing reference, e.g. `${usr.name}: variable 'usr' not found`.
    pub fn summary(&self) -> String {
        self.failures()
            .map(|attempt| match &attempt.reason {
                Some(reason) => format!("${{{}}}: {}", attempt.expression, reason),
                None => format!("${{{}}}", attempt.expression),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Flattened "did you mean" hints across all failing references.
    pub fn suggestions(&self) -> Vec<String> {
        self.failures()
            .flat_map(|attempt| {
                attempt
                    .suggestions
                    .iter()
                    .map(move |name| format!("did you mean '{}' instead of '{}'?", name, attempt.expression))
            })
            .collect()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Candidates that look like `target`: case-insensitive containment either
/// way, or an edit distance of at most two.
pub fn suggest_names<'a, I>(target: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let target_lower = target.to_lowercase();
    if target_lower.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(usize, String)> = candidates
        .into_iter()
        .filter(|candidate| *candidate != target)
        .filter_map(|candidate| {
            let candidate_lower = candidate.to_lowercase();
            let distance = edit_distance(&target_lower, &candidate_lower);
            let contains = candidate_lower.contains(&target_lower) || target_lower.contains(&candidate_lower);
            if distance <= MAX_SUGGESTION_DISTANCE || (contains && !candidate_lower.is_empty()) {
                Some((distance, candidate.to_string()))
            } else {
                None
            }
        })
        .collect();
    scored.sort();
    scored.dedup_by(|left, right| left.1 == right.1);
    scored.into_iter().take(MAX_SUGGESTIONS).map(|(_, name)| name).collect()
}

/// Levenshtein distance over chars.
fn edit_distance(left: &str, right: &str) -> usize {
    let right_chars: Vec<char> = right.chars().collect();
    let mut previous: Vec<usize> = (0..=right_chars.len()).collect();
    let mut current = vec![0; right_chars.len() + 1];
    for (row, left_char) in left.chars().enumerate() {
        current[0] = row + 1;
        for (column, right_char) in right_chars.iter().enumerate() {
            let substitution = previous[column] + usize::from(left_char != *right_char);
            current[column + 1] = substitution.min(previous[column + 1] + 1).min(current[column] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right_chars.len()]
}
