//! In-memory data store backed by a single JSON document.

use serde_json::{Map, Value};

use crate::context::DataAccessor;
use crate::records::{parse_record, translate_range_values, ROW_COLUMN};

/// Column whose value keys a sheet record; rows without it are keyed by
/// their row number.
pub const KEY_COLUMN: &str = "key";

/// A whole data tree held in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonData {
    root: Value,
}

impl JsonData {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Build a data tree from sheet snapshots: one top-level collection per
    /// sheet, each holding that sheet's parsed records by key.
    pub fn from_sheets<I>(sheets: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<Vec<Value>>)>,
    {
        let root = sheets
            .into_iter()
            .map(|(name, rows)| {
                let collection: Map<String, Value> = translate_range_values(rows, false)
                    .into_iter()
                    .map(parse_record)
                    .map(|record| (record_key(&record), Value::Object(record)))
                    .collect();
                (name, Value::Object(collection))
            })
            .collect();
        Self::new(Value::Object(root))
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// View of the store positioned at `path`.
    pub fn at<S: AsRef<str>>(&self, path: &[S]) -> DataAt<'_> {
        let current = path
            .iter()
            .try_fold(&self.root, |value, segment| child(value, segment.as_ref()));
        DataAt {
            root: &self.root,
            current,
        }
    }
}

fn record_key(record: &Map<String, Value>) -> String {
    match record.get(KEY_COLUMN) {
        Some(Value::String(key)) => key.clone(),
        Some(Value::Number(key)) => key.to_string(),
        _ => record
            .get(ROW_COLUMN)
            .map(Value::to_string)
            .unwrap_or_default(),
    }
}

fn child<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// A [`JsonData`] positioned at one path.
#[derive(Debug, Clone, Copy)]
pub struct DataAt<'a> {
    root: &'a Value,
    current: Option<&'a Value>,
}

impl DataAccessor for DataAt<'_> {
    fn root(&self) -> &Value {
        self.root
    }

    fn current(&self) -> Option<&Value> {
        self.current.filter(|value| !value.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn at_walks_objects_and_arrays() {
        let store = JsonData::new(json!({
            "users": { "u1": { "tags": ["a", "b"] } },
            "gone": null
        }));

        assert_eq!(
            store.at(&["users", "u1", "tags", "1"]).current(),
            Some(&json!("b"))
        );
        assert_eq!(store.at(&["users", "u2"]).current(), None);
        assert_eq!(store.at(&["users", "u1", "tags", "x"]).current(), None);
        assert_eq!(store.at(&["gone"]).current(), None);
        assert_eq!(store.at(&["users", "u2"]).root(), store.root());
    }

    #[test]
    fn empty_path_is_the_root() {
        let store = JsonData::new(json!({ "a": 1 }));
        assert_eq!(store.at::<&str>(&[]).current(), Some(&json!({ "a": 1 })));
    }

    #[test]
    fn sheets_become_keyed_collections() {
        let store = JsonData::from_sheets([
            (
                "users".to_string(),
                serde_json::from_value(json!([
                    ["key", "name", "admin"],
                    ["u1", "Ada", "TRUE"],
                    ["", "Anonymous", ""]
                ]))
                .unwrap(),
            ),
            (
                "scores".to_string(),
                serde_json::from_value(json!([["key", "points"], [7, "12"]])).unwrap(),
            ),
        ]);

        assert_eq!(
            store.at(&["users", "u1"]).current(),
            Some(&json!({ "key": "u1", "name": "Ada", "admin": true, "_row": 2 }))
        );
        assert_eq!(
            store.at(&["users", "3", "name"]).current(),
            Some(&json!("Anonymous"))
        );
        assert_eq!(store.at(&["scores", "7", "points"]).current(), Some(&json!(12)));
    }
}
