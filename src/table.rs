//! In-memory tabular results.
//!
//! A [`Table`] is what the database layer hands back for any procedure or
//! query, and what the CSV exporter consumes. Cells are JSON values so rows
//! can flow into API payloads unchanged.

use serde::Serialize;
use serde_json::{Map, Value};

/// One row viewed as column -> value.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble a table from a result set. `None` columns means the
    /// statement produced no result set at all, which yields an empty table.
    pub fn from_parts(columns: Option<Vec<String>>, rows: Vec<Vec<Value>>) -> Self {
        match columns {
            Some(columns) => Self { columns, rows },
            None => Self::empty(),
        }
    }

    /// Build a table from homogeneous records. Column order follows the
    /// first occurrence of each key.
    pub fn from_records(records: &[Record]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn record(&self, index: usize) -> Option<Record> {
        let row = self.rows.get(index)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect(),
        )
    }

    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        (0..self.rows.len()).filter_map(|i| self.record(i))
    }
}

/// First non-null cell among `names`, so a row can use any accepted spelling
/// of a column.
pub fn lookup<'a>(record: &'a Record, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| record.get(*name))
        .find(|value| !value.is_null())
}

/// Interpret a cell as an integer. Accepts JSON integers, floats without a
/// fractional part, and strings holding either.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| whole_float(n.as_f64()?)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| whole_float(s.parse::<f64>().ok()?))
        }
        _ => None,
    }
}

/// Render a cell as text the way it should appear in exports and logs.
pub fn as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn whole_float(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_result_set_is_empty_table() {
        let table = Table::from_parts(None, Vec::new());
        assert!(table.is_empty());
        assert!(table.columns.is_empty());
    }

    #[test]
    fn result_set_without_rows_keeps_columns() {
        let table = Table::from_parts(Some(vec!["sku".into(), "qty".into()]), Vec::new());
        assert_eq!(table.len(), 0);
        assert_eq!(table.columns, vec!["sku", "qty"]);
    }

    #[test]
    fn records_zip_columns_and_cells() {
        let table = Table::from_parts(
            Some(vec!["sku".into(), "qty".into()]),
            vec![vec![json!("A-1"), json!(4)], vec![json!("B-2"), Value::Null]],
        );
        let records: Vec<Record> = table.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["sku"], json!("A-1"));
        assert_eq!(records[1]["qty"], Value::Null);
    }

    #[test]
    fn from_records_unions_columns() {
        let a: Record = serde_json::from_value(json!({ "id": 1, "sku": "A" })).unwrap();
        let b: Record = serde_json::from_value(json!({ "id": 2, "extra": true })).unwrap();
        let table = Table::from_records(&[a, b]);
        assert_eq!(table.columns.len(), 3);
        assert_eq!(table.rows[1][1], Value::Null);
    }

    #[test]
    fn integer_coercion() {
        assert_eq!(as_integer(&json!(7)), Some(7));
        assert_eq!(as_integer(&json!(7.0)), Some(7));
        assert_eq!(as_integer(&json!("12")), Some(12));
        assert_eq!(as_integer(&json!("12.00")), Some(12));
        assert_eq!(as_integer(&json!(1.5)), None);
        assert_eq!(as_integer(&json!("abc")), None);
        assert_eq!(as_integer(&Value::Null), None);
    }

    #[test]
    fn lookup_takes_first_present_spelling() {
        let record: Record = serde_json::from_value(serde_json::json!({
            "api_url": null,
            "ApiCliente": "https://a.example",
            "AppKey": "k",
        }))
        .unwrap();
        assert_eq!(
            lookup(&record, &["api_url", "ApiCliente"]),
            Some(&Value::from("https://a.example"))
        );
        assert_eq!(lookup(&record, &["app_token", "AppToken"]), None);
    }
}
