//! Conversion of PostgreSQL rows into [`Row`]s.

use std::sync::Arc;

use dbmap_core::{DbError, DbResult, Row};
use tokio_postgres::Statement;

use crate::types::SqlColumn;

/// The column names a statement returns, shared by all of its rows.
pub(crate) fn column_names(statement: &Statement) -> Arc<[String]> {
    statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect()
}

/// Decode every column of `row`.
pub(crate) fn convert(columns: &Arc<[String]>, row: &tokio_postgres::Row) -> DbResult<Row> {
    let values = (0..row.len())
        .map(|i| {
            row.try_get::<_, SqlColumn>(i).map(|c| c.0).map_err(|e| {
                DbError::mapping(format!("cannot decode column '{}'", columns[i]))
                    .with_field(columns[i].clone())
                    .with_source(e)
            })
        })
        .collect::<DbResult<Vec<_>>>()?;
    Ok(Row::new(Arc::clone(columns), values))
}
