use serde_json::{Map, Value};
use testflow_types::ExtractSpec;

use super::ExtractionError;
use crate::condition::{OPERATOR_SCAN_ORDER, Operator};
use crate::variables::{format_value, value_kind};

/// Header row plus data rows aligned with it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    fn column_position(&self, column: &str) -> Result<usize, ExtractionError> {
        self.headers.iter().position(|header| header == column).ok_or_else(|| {
            ExtractionError::CsvSelection(format!(
                "column '{column}' not found (available: {})",
                self.headers.join(", ")
            ))
        })
    }

    fn cell(&self, row: usize, position: usize) -> Value {
        self.rows
            .get(row)
            .and_then(|values| values.get(position))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn row_object(&self, row: usize) -> Value {
        let object: Map<String, Value> = self
            .headers
            .iter()
            .enumerate()
            .map(|(position, header)| (header.clone(), self.cell(row, position)))
            .collect();
        Value::Object(object)
    }

    fn all_objects(&self, rows: impl Iterator<Item = usize>) -> Value {
        Value::Array(rows.map(|row| self.row_object(row)).collect())
    }
}

/// Loads CSV text or structured tabular data into a [`Table`].
///
/// Accepted shapes: CSV text, an array of objects, an array of arrays whose
/// first entry is the header row, `{headers, records}` (or `rows`), and
/// `{content: "<csv text>"}`.
pub fn load_table(data: &Value, delimiter: Option<char>) -> Result<Table, ExtractionError> {
    match data {
        Value::String(text) => parse_text(text, delimiter),
        Value::Array(items) => table_from_items(items),
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("content") {
                return parse_text(text, delimiter);
            }
            if let Some(Value::Array(headers)) = map.get("headers") {
                let records: &[Value] = match map.get("records").or_else(|| map.get("rows")) {
                    Some(Value::Array(records)) => records.as_slice(),
                    Some(other) => {
                        return Err(ExtractionError::CsvParse(format!(
                            "records must be an array, got {}",
                            value_kind(other)
                        )));
                    }
                    None => &[],
                };
                return table_from_arrays(headers.iter().map(format_value).collect(), records);
            }
            match map.get("rows").or_else(|| map.get("records")) {
                Some(Value::Array(items)) => table_from_items(items),
                _ => Err(ExtractionError::CsvParse(
                    "object data needs 'content', 'headers' with 'records', or 'rows'".to_string(),
                )),
            }
        }
        other => Err(ExtractionError::CsvParse(format!(
            "unsupported data of type {}",
            value_kind(other)
        ))),
    }
}

fn parse_text(text: &str, delimiter: Option<char>) -> Result<Table, ExtractionError> {
    let delimiter = match delimiter {
        None => b',',
        Some(character) if character.is_ascii() => character as u8,
        Some(character) => {
            return Err(ExtractionError::CsvParse(format!(
                "delimiter '{character}' is not a single-byte character"
            )));
        }
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|error| ExtractionError::CsvParse(error.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();
    let mut rows: Vec<Vec<Value>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|error| ExtractionError::CsvParse(error.to_string()))?;
        rows.push(record.iter().map(|field| Value::String(field.to_string())).collect());
    }
    Ok(Table { headers, rows })
}

fn table_from_items(items: &[Value]) -> Result<Table, ExtractionError> {
    match items.first() {
        None => Ok(Table::default()),
        Some(Value::Array(header_row)) => table_from_arrays(header_row.iter().map(format_value).collect(), &items[1..]),
        Some(Value::Object(_)) => {
            let mut headers: Vec<String> = Vec::new();
            for item in items {
                let Value::Object(object) = item else {
                    return Err(ExtractionError::CsvParse(format!(
                        "expected every row to be an object, found {}",
                        value_kind(item)
                    )));
                };
                for key in object.keys() {
                    if !headers.contains(key) {
                        headers.push(key.clone());
                    }
                }
            }
            let rows: Vec<Vec<Value>> = items
                .iter()
                .map(|item| {
                    headers
                        .iter()
                        .map(|header| item.get(header).cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .collect();
            Ok(Table { headers, rows })
        }
        Some(other) => Err(ExtractionError::CsvParse(format!(
            "rows must be objects or arrays, found {}",
            value_kind(other)
        ))),
    }
}

fn table_from_arrays(headers: Vec<String>, records: &[Value]) -> Result<Table, ExtractionError> {
    let rows = records
        .iter()
        .map(|record| match record {
            Value::Array(values) => Ok(values.clone()),
            other => Err(ExtractionError::CsvParse(format!(
                "expected an array record, found {}",
                value_kind(other)
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Table { headers, rows })
}

/// Loads the data and applies at most one selection, in this order: a cell
/// or whole row, a column projection, a filter, or every row as objects.
pub fn extract_csv(data: &Value, spec: &ExtractSpec) -> Result<Value, ExtractionError> {
    let table = load_table(data, spec.delimiter)?;

    if let Some(row) = spec.row {
        if row >= table.rows.len() {
            return Err(ExtractionError::CsvSelection(format!(
                "row {row} out of range ({} row(s))",
                table.rows.len()
            )));
        }
        return match &spec.column {
            Some(column) => Ok(table.cell(row, table.column_position(column)?)),
            None => Ok(table.row_object(row)),
        };
    }

    if let Some(column) = &spec.column {
        let position = table.column_position(column)?;
        return Ok(Value::Array(
            (0..table.rows.len()).map(|row| table.cell(row, position)).collect(),
        ));
    }

    if let Some(filter) = &spec.filter {
        let clause = FilterClause::parse(filter)?;
        let position = table.column_position(&clause.column)?;
        let matching = (0..table.rows.len()).filter(|row| clause.matches(&table.cell(*row, position)));
        return Ok(table.all_objects(matching));
    }

    Ok(table.all_objects(0..table.rows.len()))
}

/// `column op value`, e.g. `age > 25`.
#[derive(Debug, Clone, PartialEq)]
struct FilterClause {
    column: String,
    operator: Operator,
    value: String,
}

impl FilterClause {
    fn parse(filter: &str) -> Result<Self, ExtractionError> {
        let trimmed = filter.trim();
        for operator in OPERATOR_SCAN_ORDER {
            let Some((position, length)) = operator.find_in(trimmed) else {
                continue;
            };
            let column = trimmed[..position].trim();
            let value = trimmed[position + length..].trim().trim_matches(['"', '\'']);
            if column.is_empty() {
                break;
            }
            return Ok(Self {
                column: column.to_string(),
                operator,
                value: value.to_string(),
            });
        }
        Err(ExtractionError::CsvSelection(format!(
            "filter '{filter}' must look like 'column op value'"
        )))
    }

    /// Numeric comparison when both sides are numbers, string comparison otherwise.
    fn matches(&self, cell: &Value) -> bool {
        let text = format_value(cell);
        if let (Ok(left), Ok(right)) = (text.parse::<f64>(), self.value.parse::<f64>()) {
            match self.operator {
                Operator::Equal => return left == right,
                Operator::NotEqual => return left != right,
                _ => {}
            }
        }
        self.operator.apply(&text, &self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PEOPLE: &str = "name,age\nalice,30\nbob,20\n";

    fn spec() -> ExtractSpec {
        ExtractSpec {
            kind: testflow_types::ExtractKind::Csv,
            ..Default::default()
        }
    }

    #[test]
    fn filter_keeps_matching_rows_numerically() {
        let spec = ExtractSpec {
            filter: Some("age > 25".to_string()),
            ..spec()
        };
        let value = extract_csv(&json!(PEOPLE), &spec).expect("filtered");
        assert_eq!(value, json!([{"name": "alice", "age": "30"}]));
    }

    #[test]
    fn cell_row_and_column_selection() {
        let cell = ExtractSpec {
            row: Some(1),
            column: Some("name".to_string()),
            ..spec()
        };
        assert_eq!(extract_csv(&json!(PEOPLE), &cell).expect("cell"), json!("bob"));

        let row = ExtractSpec { row: Some(0), ..spec() };
        assert_eq!(
            extract_csv(&json!(PEOPLE), &row).expect("row"),
            json!({"name": "alice", "age": "30"})
        );

        let column = ExtractSpec {
            column: Some("age".to_string()),
            ..spec()
        };
        assert_eq!(extract_csv(&json!(PEOPLE), &column).expect("column"), json!(["30", "20"]));
    }

    #[test]
    fn accepts_structured_shapes() {
        let objects = json!([{"name": "alice", "age": 30}, {"name": "bob", "age": 20}]);
        let arrays = json!([["name", "age"], ["alice", 30], ["bob", 20]]);
        let headed = json!({"headers": ["name", "age"], "records": [["alice", 30], ["bob", 20]]});
        let content = json!({"content": "name;age\nalice;30\nbob;20"});

        let filter = ExtractSpec {
            filter: Some("age >= 30".to_string()),
            ..spec()
        };
        for data in [&objects, &arrays, &headed] {
            assert_eq!(
                extract_csv(data, &filter).expect("filtered"),
                json!([{"name": "alice", "age": 30}])
            );
        }

        let semicolon = ExtractSpec {
            delimiter: Some(';'),
            column: Some("name".to_string()),
            ..spec()
        };
        assert_eq!(extract_csv(&content, &semicolon).expect("column"), json!(["alice", "bob"]));
    }

    #[test]
    fn string_filters_and_equality() {
        let contains = ExtractSpec {
            filter: Some("name contains li".to_string()),
            ..spec()
        };
        assert_eq!(
            extract_csv(&json!(PEOPLE), &contains).expect("filtered"),
            json!([{"name": "alice", "age": "30"}])
        );

        let equal = ExtractSpec {
            filter: Some("age == 20.0".to_string()),
            ..spec()
        };
        assert_eq!(
            extract_csv(&json!(PEOPLE), &equal).expect("filtered"),
            json!([{"name": "bob", "age": "20"}])
        );
    }

    #[test]
    fn selection_errors() {
        let missing_column = ExtractSpec {
            column: Some("email".to_string()),
            ..spec()
        };
        assert!(matches!(
            extract_csv(&json!(PEOPLE), &missing_column),
            Err(ExtractionError::CsvSelection(message)) if message.contains("email")
        ));

        let out_of_range = ExtractSpec { row: Some(9), ..spec() };
        assert!(matches!(
            extract_csv(&json!(PEOPLE), &out_of_range),
            Err(ExtractionError::CsvSelection(_))
        ));

        let bad_filter = ExtractSpec {
            filter: Some("age".to_string()),
            ..spec()
        };
        assert!(matches!(
            extract_csv(&json!(PEOPLE), &bad_filter),
            Err(ExtractionError::CsvSelection(_))
        ));

        assert!(matches!(extract_csv(&json!(42), &spec()), Err(ExtractionError::CsvParse(_))));
    }

    #[test]
    fn no_selection_returns_all_rows() {
        let value = extract_csv(&json!(PEOPLE), &spec()).expect("rows");
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }
}
