//! Statement rendering for mapped operations.
//!
//! Statements use `$n` positional parameters and quote identifiers only when
//! they collide with a reserved word or contain characters outside
//! `[A-Za-z0-9_]`.

use crate::collection::ColumnCollection;

/// Escape an identifier.
pub fn escape_identifier(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Check if an identifier needs quoting.
pub fn needs_quoting(name: &str) -> bool {
    let reserved = [
        "user", "order", "group", "select", "from", "where", "table", "index", "key", "primary",
        "foreign", "check", "default", "null", "not", "and", "or", "in", "is", "like", "between",
        "case", "when", "then", "else", "end", "as", "on", "join", "limit", "offset", "all",
        "distinct", "having", "create", "alter", "drop", "insert", "update", "delete", "into",
        "values", "set", "returning", "references", "column", "constraint",
    ];

    if reserved.contains(&name.to_lowercase().as_str()) {
        return true;
    }

    name.is_empty()
        || name.starts_with(|c: char| c.is_ascii_digit())
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote an identifier if needed.
pub fn quote_identifier(name: &str) -> String {
    if needs_quoting(name) {
        escape_identifier(name)
    } else {
        name.to_string()
    }
}

/// Quote a possibly schema-qualified table name, part by part.
pub fn quote_table(name: &str) -> String {
    name.split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

/// The `$n` placeholder for a one-based parameter index.
pub fn placeholder(index: usize) -> String {
    format!("${}", index)
}

fn quoted_names<T: 'static>(cc: &ColumnCollection<T>) -> Vec<String> {
    cc.iter().map(|c| quote_identifier(&c.column_name)).collect()
}

/// `a = $n AND b = $n+1 ...`, numbering from `start`.
fn key_predicate<T: 'static>(keys: &ColumnCollection<T>, start: usize) -> String {
    keys.iter()
        .enumerate()
        .map(|(i, c)| format!("{} = {}", quote_identifier(&c.column_name), placeholder(start + i)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn returning<T: 'static>(autos: &ColumnCollection<T>) -> String {
    if autos.is_empty() {
        String::new()
    } else {
        format!(" RETURNING {}", quoted_names(autos).join(", "))
    }
}

/// `(…), (…)` value groups for `rows` rows of `width` parameters.
fn value_groups(width: usize, rows: usize) -> String {
    (0..rows)
        .map(|row| {
            let params = (1..=width)
                .map(|i| placeholder(row * width + i))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", params)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT <all> FROM t WHERE <pks>`.
pub fn select_by_keys<T: 'static>(table: &str, cc: &ColumnCollection<T>) -> String {
    format!(
        "SELECT {} FROM {} WHERE {}",
        quoted_names(cc).join(", "),
        quote_table(table),
        key_predicate(cc.primary_keys(), 1)
    )
}

/// `SELECT <all> FROM t`.
pub fn select_all<T: 'static>(table: &str, cc: &ColumnCollection<T>) -> String {
    format!(
        "SELECT {} FROM {}",
        quoted_names(cc).join(", "),
        quote_table(table)
    )
}

/// `INSERT` of the write columns for `rows` rows, returning autos.
///
/// With no write columns a single row is inserted with `DEFAULT VALUES`.
pub fn insert<T: 'static>(table: &str, cc: &ColumnCollection<T>, rows: usize) -> String {
    let write = cc.write_columns();
    let body = if write.is_empty() {
        "DEFAULT VALUES".to_string()
    } else {
        format!(
            "({}) VALUES {}",
            quoted_names(write).join(", "),
            value_groups(write.len(), rows)
        )
    };
    format!(
        "INSERT INTO {} {}{}",
        quote_table(table),
        body,
        returning(cc.autos())
    )
}

/// `INSERT` that leaves an existing row with the same primary key untouched.
pub fn insert_if_not_exists<T: 'static>(table: &str, cc: &ColumnCollection<T>) -> String {
    let write = cc.write_columns();
    let body = if write.is_empty() {
        "DEFAULT VALUES".to_string()
    } else {
        format!(
            "({}) VALUES {}",
            quoted_names(write).join(", "),
            value_groups(write.len(), 1)
        )
    };
    let conflict = if cc.primary_keys().is_empty() {
        String::new()
    } else {
        format!(" ({})", quoted_names(cc.primary_keys()).join(", "))
    };
    format!(
        "INSERT INTO {} {} ON CONFLICT{} DO NOTHING{}",
        quote_table(table),
        body,
        conflict,
        returning(cc.autos())
    )
}

/// `UPDATE t SET <write> WHERE <pks>`.
pub fn update<T: 'static>(table: &str, cc: &ColumnCollection<T>) -> String {
    let write = cc.write_columns();
    let set = write
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = {}", quote_identifier(&c.column_name), placeholder(i + 1)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {}",
        quote_table(table),
        set,
        key_predicate(cc.primary_keys(), write.len() + 1)
    )
}

/// `DELETE FROM t WHERE <pks>`.
pub fn delete<T: 'static>(table: &str, cc: &ColumnCollection<T>) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        quote_table(table),
        key_predicate(cc.primary_keys(), 1)
    )
}

/// `SELECT 1 FROM t WHERE <pks> LIMIT 1`.
pub fn exists<T: 'static>(table: &str, cc: &ColumnCollection<T>) -> String {
    format!(
        "SELECT 1 FROM {} WHERE {} LIMIT 1",
        quote_table(table),
        key_predicate(cc.primary_keys(), 1)
    )
}

/// `TRUNCATE t`.
pub fn truncate(table: &str) -> String {
    format!("TRUNCATE {}", quote_table(table))
}

/// Renders an insert-or-update statement.
///
/// Parameters bind to `insert` in order. `update` lists the columns an
/// existing row takes from the new row; `returning` lists generated columns.
pub trait UpsertStrategy: Send + Sync {
    /// Render the statement.
    fn render(
        &self,
        table: &str,
        insert: &[String],
        conflict: &[String],
        update: &[String],
        returning: &[String],
    ) -> String;
}

/// `INSERT ... ON CONFLICT (keys) DO UPDATE SET c = EXCLUDED.c`.
///
/// Falls back to `DO NOTHING` when there is nothing to update.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnConflict;

impl UpsertStrategy for OnConflict {
    fn render(
        &self,
        table: &str,
        insert: &[String],
        conflict: &[String],
        update: &[String],
        returning: &[String],
    ) -> String {
        let quote = |names: &[String]| {
            names
                .iter()
                .map(|n| quote_identifier(n))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) ",
            quote_table(table),
            quote(insert),
            value_groups(insert.len(), 1),
            quote(conflict)
        );

        if update.is_empty() {
            sql.push_str("DO NOTHING");
        } else {
            sql.push_str("DO UPDATE SET ");
            let assignments = update
                .iter()
                .map(|c| {
                    let c = quote_identifier(c);
                    format!("{} = EXCLUDED.{}", c, c)
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&assignments);
        }

        if !returning.is_empty() {
            sql.push_str(" RETURNING ");
            sql.push_str(&quote(returning));
        }
        sql
    }
}

/// Render an upsert of `cc` keyed by its primary keys.
///
/// The inserted columns are the update columns (write columns followed by
/// primary keys); on conflict every write column is overwritten.
pub fn upsert<T: 'static>(
    strategy: &dyn UpsertStrategy,
    table: &str,
    cc: &ColumnCollection<T>,
) -> String {
    let names = |cc: &ColumnCollection<T>| {
        cc.iter()
            .map(|c| c.column_name.clone())
            .collect::<Vec<_>>()
    };
    strategy.render(
        table,
        &names(cc.update_columns()),
        &names(cc.primary_keys()),
        &names(cc.write_columns()),
        &names(cc.autos()),
    )
}
