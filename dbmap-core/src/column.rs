//! Column metadata and field descriptors.
//!
//! A field descriptor has the grammar `name,flag[,flag...]`:
//!
//! | Flag | Meaning |
//! |------|---------|
//! | `pk` | primary key |
//! | `auto` / `serial` | value generated by the database, returned after insert |
//! | `readonly` | never written |
//! | `nullable` | documentation only |
//! | `json` | value round-trips through JSON text |
//!
//! A descriptor of exactly `-` excludes the field. An empty descriptor, or one
//! starting with a comma, keeps the inferred column name (the lower-cased
//! field name).
//!
//! ```rust
//! use dbmap_core::FieldDescriptor;
//!
//! let desc = FieldDescriptor::parse("PrimaryKeyCol", "primary_key_column,pk,serial").unwrap();
//! assert_eq!(desc.column_name, "primary_key_column");
//! assert!(desc.is_primary_key && desc.is_auto);
//!
//! let desc = FieldDescriptor::parse("InferredWithFlags", ",readonly").unwrap();
//! assert_eq!(desc.column_name, "inferredwithflags");
//! assert!(desc.is_read_only);
//!
//! assert!(FieldDescriptor::parse("Excluded", "-").is_none());
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{DbError, DbResult};
use crate::value::{FieldValue, Value};

/// The parsed form of a field descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Column name.
    pub column_name: String,
    /// `pk` flag.
    pub is_primary_key: bool,
    /// `auto` or `serial` flag.
    pub is_auto: bool,
    /// `nullable` flag.
    pub is_nullable: bool,
    /// `readonly` flag.
    pub is_read_only: bool,
    /// `json` flag.
    pub is_json: bool,
}

impl FieldDescriptor {
    /// Parse a descriptor for the named field.
    ///
    /// Returns `None` when the descriptor excludes the field.
    pub fn parse(field_name: &str, descriptor: &str) -> Option<Self> {
        if descriptor == "-" {
            return None;
        }

        let mut desc = FieldDescriptor {
            column_name: field_name.to_lowercase(),
            ..Default::default()
        };

        if descriptor.is_empty() {
            return Some(desc);
        }

        let mut pieces = descriptor.split(',');
        if let Some(name) = pieces.next() {
            let name = name.trim();
            if !name.is_empty() {
                desc.column_name = name.to_string();
            }
        }

        for flag in pieces {
            match flag.trim().to_lowercase().as_str() {
                "pk" => desc.is_primary_key = true,
                "auto" | "serial" => desc.is_auto = true,
                "readonly" => desc.is_read_only = true,
                "nullable" => desc.is_nullable = true,
                "json" => desc.is_json = true,
                "" => {}
                other => trace!(field = field_name, flag = other, "ignoring unknown descriptor flag"),
            }
        }

        Some(desc)
    }
}

/// A pending write of one converted value into one field.
///
/// Conversion happens when the assignment is built; applying it cannot fail.
pub struct Assignment<T>(Box<dyn FnOnce(&mut T) + Send>);

impl<T> Assignment<T> {
    fn new(apply: impl FnOnce(&mut T) + Send + 'static) -> Self {
        Self(Box::new(apply))
    }

    /// Write the value into `target`.
    pub fn apply(self, target: &mut T) {
        (self.0)(target)
    }
}

type Getter<T> = Box<dyn Fn(&T) -> DbResult<Value> + Send + Sync>;
type Setter<T> = Box<dyn Fn(Value) -> DbResult<Assignment<T>> + Send + Sync>;

/// Typed get/set pair for one field, built once per mapped type.
pub(crate) struct Accessor<T> {
    get: Getter<T>,
    set: Option<Setter<T>>,
}

impl<T: 'static> Accessor<T> {
    pub(crate) fn scalar<V, G, M>(get: G, get_mut: M) -> Self
    where
        V: FieldValue,
        G: Fn(&T) -> &V + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut V + Send + Sync + 'static,
    {
        let get_mut = Arc::new(get_mut);
        Self {
            get: Box::new(move |obj: &T| -> DbResult<Value> { Ok(get(obj).to_value()) }),
            set: Some(Box::new(move |value: Value| -> DbResult<Assignment<T>> {
                let converted = V::from_value(value)?;
                let get_mut = Arc::clone(&get_mut);
                Ok(Assignment::new(move |obj: &mut T| {
                    *(*get_mut)(obj) = converted;
                }))
            })),
        }
    }

    pub(crate) fn json<V, G, M>(get: G, get_mut: M) -> Self
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        G: Fn(&T) -> &V + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut V + Send + Sync + 'static,
    {
        let get_mut = Arc::new(get_mut);
        Self {
            get: Box::new(move |obj: &T| -> DbResult<Value> {
                serde_json::to_value(get(obj))
                    .map(Value::Json)
                    .map_err(|e| DbError::mapping("cannot encode JSON column").with_source(e))
            }),
            set: Some(Box::new(move |value: Value| -> DbResult<Assignment<T>> {
                let decoded: V = match value {
                    Value::Text(text) => serde_json::from_str(&text),
                    Value::Bytes(bytes) => serde_json::from_slice(&bytes),
                    Value::Json(json) => serde_json::from_value(json),
                    other => {
                        return Err(DbError::mapping(format!(
                            "JSON column expects text, got {}",
                            other.type_name()
                        )));
                    }
                }
                .map_err(|e| DbError::mapping("malformed JSON column").with_source(e))?;
                let get_mut = Arc::clone(&get_mut);
                Ok(Assignment::new(move |obj: &mut T| {
                    *(*get_mut)(obj) = decoded;
                }))
            })),
        }
    }

    pub(crate) fn computed<F>(get: F) -> Self
    where
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        Self {
            get: Box::new(move |obj: &T| -> DbResult<Value> { Ok(get(obj)) }),
            set: None,
        }
    }
}

/// Metadata for one mapped field.
pub struct Column<T> {
    /// Table the owning type maps to.
    pub table_name: String,
    /// Rust field name.
    pub field_name: &'static str,
    /// Rust field type name.
    pub field_type: &'static str,
    /// Column name.
    pub column_name: String,
    /// Zero-based declaration position of the field within its type.
    pub index: usize,
    /// Primary key.
    pub is_primary_key: bool,
    /// Generated by the database.
    pub is_auto: bool,
    /// Documentation only.
    pub is_nullable: bool,
    /// Excluded from writes.
    pub is_read_only: bool,
    /// Stored as JSON text.
    pub is_json: bool,
    access: Arc<Accessor<T>>,
}

impl<T: 'static> Column<T> {
    pub(crate) fn new(
        table_name: &str,
        field_name: &'static str,
        field_type: &'static str,
        index: usize,
        desc: FieldDescriptor,
        access: Accessor<T>,
    ) -> Self {
        Self {
            table_name: table_name.to_string(),
            field_name,
            field_type,
            column_name: desc.column_name,
            index,
            is_primary_key: desc.is_primary_key,
            is_auto: desc.is_auto,
            is_nullable: desc.is_nullable,
            is_read_only: desc.is_read_only,
            is_json: desc.is_json,
            access: Arc::new(access),
        }
    }

    /// Check if the field can be written through [`Column::set_value`].
    pub fn is_settable(&self) -> bool {
        self.access.set.is_some()
    }

    /// Read the field's current value.
    pub fn get_value(&self, object: &T) -> DbResult<Value> {
        (self.access.get)(object).map_err(|e| e.with_field(self.field_name))
    }

    /// Convert `value` for this field without touching any object.
    ///
    /// Returns `Ok(None)` when the write is a no-op: a NULL source, or an
    /// empty text source for a JSON column.
    pub fn prepare_value(&self, value: Value) -> DbResult<Option<Assignment<T>>> {
        let Some(ref set) = self.access.set else {
            return Err(DbError::mapping(format!(
                "field '{}' cannot be set",
                self.field_name
            ))
            .with_field(self.field_name)
            .with_model(&self.table_name));
        };

        match value {
            Value::Null => Ok(None),
            Value::Text(ref text) if self.is_json && text.is_empty() => Ok(None),
            value => set(value)
                .map(Some)
                .map_err(|e| e.with_field(self.field_name).with_model(&self.table_name)),
        }
    }

    /// Write `value` into the field.
    pub fn set_value(&self, object: &mut T, value: Value) -> DbResult<()> {
        if let Some(assignment) = self.prepare_value(value)? {
            assignment.apply(object);
        }
        Ok(())
    }
}

impl<T> Clone for Column<T> {
    fn clone(&self) -> Self {
        Self {
            table_name: self.table_name.clone(),
            field_name: self.field_name,
            field_type: self.field_type,
            column_name: self.column_name.clone(),
            index: self.index,
            is_primary_key: self.is_primary_key,
            is_auto: self.is_auto,
            is_nullable: self.is_nullable,
            is_read_only: self.is_read_only,
            is_json: self.is_json,
            access: Arc::clone(&self.access),
        }
    }
}

impl<T> fmt::Debug for Column<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("table_name", &self.table_name)
            .field("field_name", &self.field_name)
            .field("field_type", &self.field_type)
            .field("column_name", &self.column_name)
            .field("index", &self.index)
            .field("is_primary_key", &self.is_primary_key)
            .field("is_auto", &self.is_auto)
            .field("is_nullable", &self.is_nullable)
            .field("is_read_only", &self.is_read_only)
            .field("is_json", &self.is_json)
            .finish()
    }
}
