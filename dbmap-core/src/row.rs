//! Driver-neutral result rows.

use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::value::{FieldValue, Value};

/// One result row: column names shared across the result set, plus values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row. `columns` and `values` must have equal length.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value by position.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value by column name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// Convert the named column into a Rust type.
    pub fn get_as<V: FieldValue>(&self, name: &str) -> DbResult<V> {
        let value = self
            .get(name)
            .ok_or_else(|| DbError::mapping(format!("no column named '{}' in row", name)))?;
        V::from_value(value.clone()).map_err(|e| e.with_field(name))
    }

    /// Iterate `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Take the values, in column order.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec!["id".to_string(), "email".to_string()].into(),
            vec![Value::Int(4), Value::Text("a@b.c".into())],
        )
    }

    #[test]
    fn test_row_access() {
        let row = sample();
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("email"), Some(&Value::Text("a@b.c".into())));
        assert_eq!(row.value(0), Some(&Value::Int(4)));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_row_get_as() {
        let row = sample();
        let id: i32 = row.get_as("id").unwrap();
        assert_eq!(id, 4);
        assert!(row.get_as::<i32>("email").is_err());
        assert!(row.get_as::<i32>("missing").unwrap_err().is_mapping());
    }
}
