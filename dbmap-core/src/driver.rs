//! The seam between the mapping layer and a database driver.
//!
//! A driver opens a [`Pool`]; a pool hands out [`Session`]s; a session
//! prepares and runs statements. A statement is only valid on the session
//! that prepared it.

use async_trait::async_trait;

use crate::config::Config;
use crate::error::DbResult;
use crate::row::Row;
use crate::value::Value;

/// A database driver.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// The pool this driver opens.
    type Pool: Pool;

    /// Engine name reported in events.
    fn name(&self) -> &'static str;

    /// Open a pool sized by `config.pool`.
    ///
    /// Per-connection settings such as the search path are applied here.
    async fn open(&self, config: &Config) -> DbResult<Self::Pool>;
}

/// A pool of sessions.
#[async_trait]
pub trait Pool: Send + Sync + 'static {
    /// The session type.
    type Session: Session;

    /// Check out a session. Dropping the session returns it to the pool.
    async fn acquire(&self) -> DbResult<Self::Session>;

    /// Close the pool. Checked-out sessions are closed when dropped.
    fn close(&self);
}

/// One checked-out database connection.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// A prepared statement handle.
    type Statement: Clone + Send + Sync + 'static;

    /// Prepare `sql`.
    async fn prepare(&self, sql: &str) -> DbResult<Self::Statement>;

    /// Run a statement for its effect; returns the affected row count.
    async fn execute(&self, statement: &Self::Statement, params: &[Value]) -> DbResult<u64>;

    /// Run a statement and collect its rows.
    async fn query(&self, statement: &Self::Statement, params: &[Value]) -> DbResult<Vec<Row>>;

    /// Run one or more statements without parameters.
    async fn batch_execute(&self, sql: &str) -> DbResult<()>;

    /// Release server-side resources held by this session.
    async fn close(&self) -> DbResult<()>;

    /// Discard the session instead of returning it to the pool.
    fn abandon(self);
}

/// The session type of a driver.
pub type SessionOf<D> = <<D as Driver>::Pool as Pool>::Session;

/// The statement type of a driver.
pub type StatementOf<D> = <SessionOf<D> as Session>::Statement;
