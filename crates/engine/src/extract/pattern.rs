use regex::Regex;
use serde_json::Value;

use super::ExtractionError;
use crate::variables::format_value;

/// First match of `pattern` in `data`, returning capture `group` (default 1).
///
/// Non-string data is matched against its JSON text. A group that exists in
/// the pattern but did not participate in the match yields an empty string.
pub fn extract_regex(data: &Value, pattern: &str, group: Option<usize>) -> Result<Value, ExtractionError> {
    let regex = Regex::new(pattern).map_err(|error| ExtractionError::InvalidPattern {
        pattern: pattern.to_string(),
        message: error.to_string(),
    })?;
    let group = group.unwrap_or(1);
    let available = regex.captures_len() - 1;
    if group > available {
        return Err(ExtractionError::InvalidCaptureGroup {
            group,
            pattern: pattern.to_string(),
            available,
        });
    }

    let text = format_value(data);
    let captures = regex.captures(&text).ok_or_else(|| ExtractionError::NoMatch {
        pattern: pattern.to_string(),
    })?;
    let matched = captures.get(group).map(|capture| capture.as_str()).unwrap_or_default();
    Ok(Value::String(matched.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn returns_first_group_by_default() {
        let value = extract_regex(&json!("user id=42 ok"), r"id=(\d+)", None).expect("match");
        assert_eq!(value, json!("42"));
    }

    #[test]
    fn group_zero_is_the_whole_match() {
        let value = extract_regex(&json!("user id=42 ok"), r"id=(\d+)", Some(0)).expect("match");
        assert_eq!(value, json!("id=42"));
    }

    #[test]
    fn matches_against_json_text_of_structured_data() {
        let value = extract_regex(&json!({"token": "abc"}), r#""token":"(\w+)""#, None).expect("match");
        assert_eq!(value, json!("abc"));
    }

    #[test]
    fn distinguishes_failure_kinds() {
        assert!(matches!(
            extract_regex(&json!("x"), "(", None),
            Err(ExtractionError::InvalidPattern { .. })
        ));
        assert_eq!(
            extract_regex(&json!("nothing here"), r"id=(\d+)", None),
            Err(ExtractionError::NoMatch {
                pattern: r"id=(\d+)".to_string()
            })
        );
        assert_eq!(
            extract_regex(&json!("user id=42 ok"), r"id=(\d+)", Some(5)),
            Err(ExtractionError::InvalidCaptureGroup {
                group: 5,
                pattern: r"id=(\d+)".to_string(),
                available: 1
            })
        );
    }
}
