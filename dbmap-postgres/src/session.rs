//! A pooled PostgreSQL session.

use async_trait::async_trait;
use dbmap_core::{DbError, DbResult, Row, Session, Value};
use deadpool_postgres::Object;
use tokio_postgres::Statement;
use tokio_postgres::types::ToSql;
use tracing::debug;

use crate::error::{self, pg_error};
use crate::row;
use crate::types::SqlParam;

/// One checked-out connection. Dropping it returns the connection to the
/// pool.
pub struct PgSession {
    client: Object,
}

impl PgSession {
    pub(crate) fn new(client: Object) -> Self {
        Self { client }
    }

    /// The underlying pooled client.
    pub fn client(&self) -> &Object {
        &self.client
    }
}

fn bind(params: &[Value]) -> Vec<SqlParam<'_>> {
    params.iter().map(SqlParam).collect()
}

fn refs<'a>(params: &'a [SqlParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Session for PgSession {
    type Statement = Statement;

    async fn prepare(&self, sql: &str) -> DbResult<Statement> {
        debug!(sql, "preparing statement");
        self.client
            .prepare(sql)
            .await
            .map_err(|e| pg_error(error::prepare, e))
    }

    async fn execute(&self, statement: &Statement, params: &[Value]) -> DbResult<u64> {
        let bound = bind(params);
        self.client
            .execute(statement, &refs(&bound))
            .await
            .map_err(|e| pg_error(error::execution, e))
    }

    async fn query(&self, statement: &Statement, params: &[Value]) -> DbResult<Vec<Row>> {
        let bound = bind(params);
        let rows = self
            .client
            .query(statement, &refs(&bound))
            .await
            .map_err(|e| pg_error(error::execution, e))?;

        let columns = row::column_names(statement);
        rows.iter().map(|r| row::convert(&columns, r)).collect()
    }

    async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| pg_error(error::execution, e))
    }

    /// Statements are prepared with `Client::prepare`, so the server frees
    /// each one when its last `Statement` handle drops. By the time this runs
    /// the statement cache has dropped its handles; all that is left is to
    /// report a connection that died first.
    async fn close(&self) -> DbResult<()> {
        if self.client.is_closed() {
            return Err(DbError::connection("connection closed before its statements were released"));
        }
        Ok(())
    }

    fn abandon(self) {
        debug!("detaching connection from the pool");
        drop(Object::take(self.client));
    }
}
