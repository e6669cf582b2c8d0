//! Ordered column sets with memoized subsets.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::column::{Assignment, Column};
use crate::error::{DbError, DbResult};
use crate::row::Row;
use crate::value::Value;

type Subset<T> = OnceLock<Box<ColumnCollection<T>>>;

/// Lazily computed subsets, owned by one collection instance.
struct Subsets<T> {
    primary_keys: Subset<T>,
    not_primary_keys: Subset<T>,
    autos: Subset<T>,
    not_autos: Subset<T>,
    read_only: Subset<T>,
    not_read_only: Subset<T>,
    write: Subset<T>,
    update: Subset<T>,
}

impl<T> Default for Subsets<T> {
    fn default() -> Self {
        Self {
            primary_keys: OnceLock::new(),
            not_primary_keys: OnceLock::new(),
            autos: OnceLock::new(),
            not_autos: OnceLock::new(),
            read_only: OnceLock::new(),
            not_read_only: OnceLock::new(),
            write: OnceLock::new(),
            update: OnceLock::new(),
        }
    }
}

/// The column metadata for one mapped type.
///
/// Columns keep declaration order. The name lookup is keyed by the
/// unprefixed column name; when a name is added twice the later column wins
/// the lookup.
///
/// Subset accessors ([`primary_keys`](Self::primary_keys),
/// [`write_columns`](Self::write_columns), ...) are computed on first call and
/// memoized on this instance. [`copy`](Self::copy) and
/// [`copy_with_prefix`](Self::copy_with_prefix) return a collection with
/// fresh memos.
pub struct ColumnCollection<T> {
    columns: Vec<Column<T>>,
    lookup: HashMap<String, usize>,
    prefix: Option<String>,
    subsets: Subsets<T>,
}

impl<T: 'static> ColumnCollection<T> {
    /// Create a collection from columns in declaration order.
    pub fn new(columns: Vec<Column<T>>) -> Self {
        Self::with_prefix(None, columns)
    }

    fn with_prefix(prefix: Option<String>, columns: Vec<Column<T>>) -> Self {
        let mut collection = Self {
            columns,
            lookup: HashMap::new(),
            prefix,
            subsets: Subsets::default(),
        };
        collection.rebuild_lookup();
        collection
    }

    fn rebuild_lookup(&mut self) {
        self.lookup = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.column_name.clone(), i))
            .collect();
    }

    fn filtered(&self, keep: impl Fn(&Column<T>) -> bool) -> Box<Self> {
        let columns = self.columns.iter().filter(|c| keep(c)).cloned().collect();
        Box::new(Self::with_prefix(self.prefix.clone(), columns))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the collection has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Append a column.
    pub fn add(&mut self, column: Column<T>) {
        self.lookup
            .insert(column.column_name.clone(), self.columns.len());
        self.columns.push(column);
        self.subsets = Subsets::default();
    }

    /// Remove every column with the given name. Returns whether any was removed.
    pub fn remove(&mut self, column_name: &str) -> bool {
        let before = self.columns.len();
        self.columns.retain(|c| c.column_name != column_name);
        if self.columns.len() == before {
            return false;
        }
        self.rebuild_lookup();
        self.subsets = Subsets::default();
        true
    }

    /// Check if a column with the given (unprefixed) name is present.
    pub fn has_column(&self, column_name: &str) -> bool {
        self.lookup.contains_key(column_name)
    }

    /// Find a column by its (unprefixed) name.
    pub fn get(&self, column_name: &str) -> Option<&Column<T>> {
        self.lookup.get(column_name).map(|&i| &self.columns[i])
    }

    /// The columns, in order.
    pub fn columns(&self) -> &[Column<T>] {
        &self.columns
    }

    /// Iterate the columns in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Column<T>> {
        self.columns.iter()
    }

    /// The first column, if any.
    pub fn first(&self) -> Option<&Column<T>> {
        self.columns.first()
    }

    /// The column prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Replace the column prefix of this instance.
    pub fn set_prefix(&mut self, prefix: Option<String>) {
        self.prefix = prefix;
        self.subsets = Subsets::default();
    }

    /// Name lookup keyed by rendered (prefixed) column name.
    pub fn lookup(&self) -> HashMap<String, &Column<T>> {
        self.lookup
            .iter()
            .map(|(name, &i)| (self.prefixed(name), &self.columns[i]))
            .collect()
    }

    fn prefixed(&self, name: &str) -> String {
        match self.prefix {
            Some(ref prefix) => format!("{}{}", prefix, name),
            None => name.to_string(),
        }
    }

    /// An independent copy that keeps this collection's prefix.
    pub fn copy(&self) -> Self {
        Self::with_prefix(self.prefix.clone(), self.columns.clone())
    }

    /// An independent copy with a new column prefix.
    pub fn copy_with_prefix(&self, prefix: impl Into<String>) -> Self {
        Self::with_prefix(Some(prefix.into()), self.columns.clone())
    }

    /// This collection's columns followed by `other`'s. The result has no prefix.
    pub fn concat_with(&self, other: &ColumnCollection<T>) -> Self {
        let mut columns = Vec::with_capacity(self.len() + other.len());
        columns.extend(self.columns.iter().cloned());
        columns.extend(other.columns.iter().cloned());
        Self::new(columns)
    }

    /// Primary key columns.
    pub fn primary_keys(&self) -> &Self {
        self.subsets
            .primary_keys
            .get_or_init(|| self.filtered(|c| c.is_primary_key))
    }

    /// Columns that are not primary keys.
    pub fn not_primary_keys(&self) -> &Self {
        self.subsets
            .not_primary_keys
            .get_or_init(|| self.filtered(|c| !c.is_primary_key))
    }

    /// Database-generated columns.
    pub fn autos(&self) -> &Self {
        self.subsets.autos.get_or_init(|| self.filtered(|c| c.is_auto))
    }

    /// Columns that are not database-generated.
    pub fn not_autos(&self) -> &Self {
        self.subsets
            .not_autos
            .get_or_init(|| self.filtered(|c| !c.is_auto))
    }

    /// Read-only columns.
    pub fn read_only(&self) -> &Self {
        self.subsets
            .read_only
            .get_or_init(|| self.filtered(|c| c.is_read_only))
    }

    /// Writable columns.
    pub fn not_read_only(&self) -> &Self {
        self.subsets
            .not_read_only
            .get_or_init(|| self.filtered(|c| !c.is_read_only))
    }

    /// Columns that are neither read-only nor primary keys.
    pub fn write_columns(&self) -> &Self {
        self.subsets
            .write
            .get_or_init(|| Box::new(self.not_read_only().not_primary_keys().copy()))
    }

    /// Write columns followed by primary keys.
    pub fn update_columns(&self) -> &Self {
        self.subsets
            .update
            .get_or_init(|| Box::new(self.write_columns().concat_with(self.primary_keys())))
    }

    /// Column names, prefixed if a prefix is set.
    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| self.prefixed(&c.column_name))
            .collect()
    }

    /// Column names joined with commas.
    pub fn column_names_csv(&self) -> String {
        self.column_names().join(",")
    }

    /// Column names qualified by a table alias, for joined projections.
    ///
    /// With a prefix set, each name is aliased: `alias.name as prefixname`.
    pub fn column_names_from_alias(&self, table_alias: &str) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| match self.prefix {
                Some(ref prefix) => format!(
                    "{}.{} as {}{}",
                    table_alias, c.column_name, prefix, c.column_name
                ),
                None => format!("{}.{}", table_alias, c.column_name),
            })
            .collect()
    }

    /// [`column_names_from_alias`](Self::column_names_from_alias) joined with commas.
    pub fn column_names_csv_from_alias(&self, table_alias: &str) -> String {
        self.column_names_from_alias(table_alias).join(",")
    }

    /// The ordered values of `instance`, matching [`column_names`](Self::column_names).
    ///
    /// JSON columns are rendered as JSON text; a JSON null renders as SQL NULL.
    pub fn column_values(&self, instance: &T) -> DbResult<Vec<Value>> {
        self.columns
            .iter()
            .map(|c| {
                let value = c.get_value(instance)?;
                if !c.is_json {
                    return Ok(value);
                }
                Ok(match value.to_json() {
                    serde_json::Value::Null => Value::Null,
                    json => Value::Text(json.to_string()),
                })
            })
            .collect()
    }

    /// Assign `values` to the columns, positionally.
    ///
    /// Every value is converted before any field is written, so a failure
    /// leaves `instance` unchanged.
    pub fn set_values(&self, instance: &mut T, values: Vec<Value>) -> DbResult<()> {
        let assignments = self.prepare_values(values)?;
        apply(instance, assignments);
        Ok(())
    }

    /// Convert `values` for the columns, positionally, without applying them.
    pub(crate) fn prepare_values(&self, values: Vec<Value>) -> DbResult<Vec<Option<Assignment<T>>>> {
        if values.len() != self.columns.len() {
            return Err(DbError::mapping(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        self.columns
            .iter()
            .zip(values)
            .map(|(c, v)| c.prepare_value(v))
            .collect()
    }

    /// Assign the columns of `row` whose names match this collection.
    ///
    /// Row columns are matched by rendered (prefixed) name first, then by bare
    /// name. Unmatched row columns are ignored.
    pub fn set_by_name(&self, instance: &mut T, row: &Row) -> DbResult<()> {
        let mut assignments = Vec::with_capacity(row.len());
        for (name, value) in row.iter() {
            let bare = match self.prefix {
                Some(ref prefix) => name.strip_prefix(prefix.as_str()).unwrap_or(name),
                None => name,
            };
            if let Some(column) = self.get(bare) {
                assignments.push(column.prepare_value(value.clone())?);
            }
        }

        apply(instance, assignments);
        Ok(())
    }
}

pub(crate) fn apply<T>(instance: &mut T, assignments: Vec<Option<Assignment<T>>>) {
    for assignment in assignments.into_iter().flatten() {
        assignment.apply(instance);
    }
}

impl<T: 'static> Clone for ColumnCollection<T> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl<T: 'static> fmt::Display for ColumnCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column_names().join(", "))
    }
}

impl<T> fmt::Debug for ColumnCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnCollection")
            .field("prefix", &self.prefix)
            .field("columns", &self.columns)
            .finish()
    }
}
