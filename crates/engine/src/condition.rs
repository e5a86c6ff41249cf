//! Condition evaluation for `if`, `while` and `retry_if`.
//!
//! The syntax is deliberately tiny: after variable substitution a condition is
//! either a literal (`true`, `false`, `1`, `0`) or exactly one binary
//! comparison. Operators are scanned in a fixed order so that `>=` is never
//! mistaken for `>` followed by a stray `=`:
//!
//! 1. numeric: `>=`, `<=`, `>`, `<`
//! 2. equality: `==`, `!=`
//! 3. string: `contains`, `starts_with`, `ends_with`
//!
//! Numeric operators compare as `f64` when both operands parse and fall back
//! to byte-wise string comparison otherwise.

use std::cmp::Ordering;

use thiserror::Error;

use crate::variables::VariableStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,
    #[error("unevaluable condition '{0}': no supported operator found")]
    Unevaluable(String),
    #[error("operator '{operator}' in '{condition}' needs a left and a right operand")]
    MissingOperand { operator: &'static str, condition: String },
}

/// Comparison operators, in scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    GreaterOrEqual,
    LessOrEqual,
    Greater,
    Less,
    Equal,
    NotEqual,
    Contains,
    StartsWith,
    EndsWith,
}

/// The order matters: longer symbols that contain shorter ones come first.
pub const OPERATOR_SCAN_ORDER: [Operator; 9] = [
    Operator::GreaterOrEqual,
    Operator::LessOrEqual,
    Operator::Greater,
    Operator::Less,
    Operator::Equal,
    Operator::NotEqual,
    Operator::Contains,
    Operator::StartsWith,
    Operator::EndsWith,
];

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::Less => "<",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
        }
    }

    /// Parses a symbol as written by authors (`==`, `contains`, ...).
    pub fn parse(symbol: &str) -> Option<Self> {
        OPERATOR_SCAN_ORDER.into_iter().find(|operator| operator.symbol() == symbol.trim())
    }

    fn is_word(self) -> bool {
        matches!(self, Operator::Contains | Operator::StartsWith | Operator::EndsWith)
    }

    /// Byte offset and length of this operator inside `condition`, if present.
    pub(crate) fn find_in(self, condition: &str) -> Option<(usize, usize)> {
        if self.is_word() {
            let padded = format!(" {} ", self.symbol());
            return condition.find(&padded).map(|position| (position, padded.len()));
        }
        condition.find(self.symbol()).map(|position| (position, self.symbol().len()))
    }

    /// Applies the operator to two already trimmed operands.
    pub fn apply(self, left: &str, right: &str) -> bool {
        match self {
            Operator::GreaterOrEqual => compare(left, right) != Ordering::Less,
            Operator::LessOrEqual => compare(left, right) != Ordering::Greater,
            Operator::Greater => compare(left, right) == Ordering::Greater,
            Operator::Less => compare(left, right) == Ordering::Less,
            Operator::Equal => left == right,
            Operator::NotEqual => left != right,
            Operator::Contains => left.contains(right),
            Operator::StartsWith => left.starts_with(right),
            Operator::EndsWith => left.ends_with(right),
        }
    }
}

/// Numeric ordering when both sides parse as `f64`, byte order otherwise.
pub fn compare(left: &str, right: &str) -> Ordering {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(left_number), Ok(right_number)) => left_number.partial_cmp(&right_number).unwrap_or(Ordering::Equal),
        _ => left.as_bytes().cmp(right.as_bytes()),
    }
}

/// Substitutes variables into `raw` and evaluates the result.
pub fn evaluate(raw: &str, variables: &VariableStore) -> Result<bool, ConditionError> {
    let substituted = variables.substitute(raw);
    evaluate_substituted(&substituted)
}

/// Evaluates a condition whose variables are already substituted.
pub fn evaluate_substituted(condition: &str) -> Result<bool, ConditionError> {
    let condition = condition.trim();
    if condition.is_empty() {
        return Err(ConditionError::Empty);
    }
    match condition.to_ascii_lowercase().as_str() {
        "true" | "1" => return Ok(true),
        "false" | "0" => return Ok(false),
        _ => {}
    }

    for operator in OPERATOR_SCAN_ORDER {
        let Some((position, length)) = operator.find_in(condition) else {
            continue;
        };
        let left = unquote(condition[..position].trim());
        let right = unquote(condition[position + length..].trim());
        if left.is_empty() && right.is_empty() {
            return Err(ConditionError::MissingOperand {
                operator: operator.symbol(),
                condition: condition.to_string(),
            });
        }
        return Ok(operator.apply(left, right));
    }

    Err(ConditionError::Unevaluable(condition.to_string()))
}

/// Strips one pair of matching surrounding quotes.
fn unquote(operand: &str) -> &str {
    for quote in ['"', '\''] {
        if operand.len() >= 2
            && operand.starts_with(quote)
            && operand.ends_with(quote)
        {
            return &operand[1..operand.len() - 1];
        }
    }
    operand
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literals_short_circuit() {
        assert_eq!(evaluate_substituted("true"), Ok(true));
        assert_eq!(evaluate_substituted(" 1 "), Ok(true));
        assert_eq!(evaluate_substituted("FALSE"), Ok(false));
        assert_eq!(evaluate_substituted("0"), Ok(false));
    }

    #[test]
    fn numeric_comparisons_parse_floats() {
        assert_eq!(evaluate_substituted("5 >= 3"), Ok(true));
        assert_eq!(evaluate_substituted("3 >= 3"), Ok(true));
        assert_eq!(evaluate_substituted("2.5 <= 2"), Ok(false));
        assert_eq!(evaluate_substituted("10 > 9"), Ok(true));
        assert_eq!(evaluate_substituted("-1 < 0"), Ok(true));
    }

    #[test]
    fn numeric_operators_fall_back_to_string_order() {
        assert_eq!(evaluate_substituted("b > a"), Ok(true));
        assert_eq!(evaluate_substituted("10 > abc"), Ok(false));
    }

    #[test]
    fn equality_and_string_operators() {
        assert_eq!(evaluate_substituted("ok == ok"), Ok(true));
        assert_eq!(evaluate_substituted("\"ok\" == ok"), Ok(true));
        assert_eq!(evaluate_substituted("ok != ko"), Ok(true));
        assert_eq!(evaluate_substituted("abc contains b"), Ok(true));
        assert_eq!(evaluate_substituted("abc starts_with ab"), Ok(true));
        assert_eq!(evaluate_substituted("abc ends_with ab"), Ok(false));
    }

    #[test]
    fn greater_or_equal_wins_over_greater() {
        let (position, length) = Operator::GreaterOrEqual.find_in("4 >= 4").expect("found");
        assert_eq!((position, length), (2, 2));
        assert_eq!(evaluate_substituted("4 >= 4"), Ok(true));
    }

    #[test]
    fn unknown_shapes_are_errors() {
        assert!(matches!(
            evaluate_substituted("not_an_operator_string"),
            Err(ConditionError::Unevaluable(_))
        ));
        assert_eq!(evaluate_substituted("   "), Err(ConditionError::Empty));
        assert!(matches!(evaluate_substituted("=="), Err(ConditionError::MissingOperand { .. })));
    }

    #[test]
    fn evaluate_substitutes_variables_first() {
        let mut variables = VariableStore::new();
        variables.set("count", 3);
        variables.set("status", json!("healthy"));
        assert_eq!(evaluate("${count} < 5", &variables), Ok(true));
        assert_eq!(evaluate("${status} == healthy", &variables), Ok(true));
        assert_eq!(evaluate("${status} contains sick", &variables), Ok(false));
    }

    #[test]
    fn parse_recognizes_symbols() {
        assert_eq!(Operator::parse("=="), Some(Operator::Equal));
        assert_eq!(Operator::parse(" contains "), Some(Operator::Contains));
        assert_eq!(Operator::parse("~="), None);
    }
}
