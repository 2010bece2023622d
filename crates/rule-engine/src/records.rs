//! Conversions between sheet-shaped rows and JSON records.
//!
//! Data snapshots exported from spreadsheets arrive as rows of cells with a
//! header row. These helpers turn them into objects the gate can check
//! against, and turn records back into cell-friendly values for storage.

use serde_json::{Map, Number, Value};

use crate::expression::is_truthy;

/// Column added to every record with its 1-based row number in the sheet.
pub const ROW_COLUMN: &str = "_row";

/// Turn rows of cells into records.
///
/// Unless `no_header` is set, the first row names the columns; cells without
/// a column name (and every cell when there is no header) are stored as
/// `value1`, `value2`, ... by position. Falsy cells are skipped and rows left
/// empty are dropped. Every record gets its sheet row number under `_row`.
pub fn translate_range_values(values: Vec<Vec<Value>>, no_header: bool) -> Vec<Map<String, Value>> {
    let mut rows = values.into_iter();
    let headers: Vec<Option<String>> = if no_header {
        Vec::new()
    } else {
        rows.next()
            .unwrap_or_default()
            .iter()
            .map(header_name)
            .collect()
    };
    let first_row = if no_header { 1 } else { 2 };

    rows.enumerate()
        .filter_map(|(i, cells)| {
            let mut record = Map::new();
            for (j, cell) in cells.into_iter().enumerate() {
                if !is_truthy(&cell) {
                    continue;
                }
                let column = headers
                    .get(j)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| format!("value{}", j + 1));
                record.insert(column, cell);
            }
            if record.is_empty() {
                return None;
            }
            record.insert(ROW_COLUMN.to_string(), Value::from(i + first_row));
            Some(record)
        })
        .collect()
}

fn header_name(cell: &Value) -> Option<String> {
    if !is_truthy(cell) {
        return None;
    }
    Some(match cell {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Restore typed values from cell text.
///
/// Empty and `null` fields are removed, `"true"`/`"false"` (any case) become
/// booleans, numeric text becomes a number and text holding JSON is parsed.
/// Anything else is kept as is.
pub fn parse_record(record: Map<String, Value>) -> Map<String, Value> {
    record
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some((key, parse_cell(s))),
            other => Some((key, other)),
        })
        .collect()
}

fn parse_cell(text: String) -> Value {
    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Some(number) = parse_number(&text) {
        return Value::Number(number);
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

fn parse_number(text: &str) -> Option<Number> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let n: f64 = trimmed.parse().ok()?;
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Some(Number::from(n as i64));
    }
    Number::from_f64(n)
}

/// Prepare a record for storage: object and array fields are serialised to
/// JSON text, everything else is left alone.
pub fn stringify_record(record: Map<String, Value>) -> Map<String, Value> {
    record
        .into_iter()
        .map(|(key, value)| match value {
            Value::Object(_) | Value::Array(_) => {
                let text = value.to_string();
                (key, Value::String(text))
            }
            other => (key, other),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Vec<Value>> {
        serde_json::from_value(value).unwrap()
    }

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn header_row_names_columns() {
        let records = translate_range_values(
            rows(json!([
                ["key", "name", ""],
                ["u1", "Ada", "extra"],
                [],
                ["u2", "", 0]
            ])),
            false,
        );
        assert_eq!(
            records,
            vec![
                record(json!({ "key": "u1", "name": "Ada", "value3": "extra", "_row": 2 })),
                record(json!({ "key": "u2", "_row": 4 })),
            ]
        );
    }

    #[test]
    fn without_header_columns_are_positional() {
        let records = translate_range_values(rows(json!([["a", "b"], [null, "c"]])), true);
        assert_eq!(
            records,
            vec![
                record(json!({ "value1": "a", "value2": "b", "_row": 1 })),
                record(json!({ "value2": "c", "_row": 2 })),
            ]
        );
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(translate_range_values(Vec::new(), false).is_empty());
        assert!(translate_range_values(rows(json!([["only", "header"]])), false).is_empty());
    }

    #[test]
    fn parse_restores_types() {
        let parsed = parse_record(record(json!({
            "empty": "",
            "missing": null,
            "yes": "TRUE",
            "no": "False",
            "count": "42",
            "ratio": "0.5",
            "tags": "[\"a\",\"b\"]",
            "profile": "{\"age\":3}",
            "name": "Ada",
            "already": 7
        })));
        assert_eq!(
            Value::Object(parsed),
            json!({
                "yes": true,
                "no": false,
                "count": 42,
                "ratio": 0.5,
                "tags": ["a", "b"],
                "profile": { "age": 3 },
                "name": "Ada",
                "already": 7
            })
        );
    }

    #[test]
    fn stringify_serialises_nested_values() {
        let stored = stringify_record(record(json!({
            "profile": { "age": 3 },
            "tags": ["a"],
            "name": "Ada",
            "count": 1
        })));
        assert_eq!(
            Value::Object(stored),
            json!({
                "profile": "{\"age\":3}",
                "tags": "[\"a\"]",
                "name": "Ada",
                "count": 1
            })
        );
    }
}
