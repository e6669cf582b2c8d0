//! An in-memory driver for tests.
//!
//! [`MockDriver`] records every statement it is asked to prepare or run and
//! answers from a queue of scripted results. With nothing queued, `execute`
//! reports one affected row and `query` returns no rows.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::Config;
use crate::driver::{Driver, Pool, Session};
use crate::error::{DbError, DbResult};
use crate::row::Row;
use crate::value::Value;

/// A scripted answer to the next `execute` or `query`.
#[derive(Debug, Clone)]
pub enum MockResult {
    /// Rows for a query; their count for an execute.
    Rows(Vec<Row>),
    /// An affected row count for an execute; no rows for a query.
    Affected(u64),
    /// An execution error with this message.
    Error(String),
}

#[derive(Default)]
struct MockState {
    opens: AtomicUsize,
    acquires: AtomicUsize,
    prepares: AtomicUsize,
    abandons: AtomicUsize,
    pool_closes: AtomicUsize,
    session_closes: AtomicUsize,
    releases: AtomicUsize,
    next_statement: AtomicUsize,
    results: Mutex<VecDeque<MockResult>>,
    executed: Mutex<Vec<(String, Vec<Value>)>>,
    batches: Mutex<Vec<String>>,
    fail_open: Mutex<Option<String>>,
    fail_prepare: Mutex<Option<String>>,
    fail_close: Mutex<Option<String>>,
    latency: Mutex<Option<Duration>>,
    dead: Mutex<HashSet<usize>>,
}

/// A driver that talks to nothing.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    /// Create a driver with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result set.
    pub fn push_rows(&self, columns: &[&str], rows: Vec<Vec<Value>>) -> &Self {
        let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&columns), values))
            .collect();
        self.push(MockResult::Rows(rows))
    }

    /// Queue an affected row count.
    pub fn push_affected(&self, n: u64) -> &Self {
        self.push(MockResult::Affected(n))
    }

    /// Queue an execution error.
    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        self.push(MockResult::Error(message.into()))
    }

    /// Queue any result.
    pub fn push(&self, result: MockResult) -> &Self {
        self.state.results.lock().push_back(result);
        self
    }

    /// Fail the next pool open.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        *self.state.fail_open.lock() = Some(message.into());
    }

    /// Fail the next prepare.
    pub fn fail_next_prepare(&self, message: impl Into<String>) {
        *self.state.fail_prepare.lock() = Some(message.into());
    }

    /// Fail the next session close.
    pub fn fail_session_close(&self, message: impl Into<String>) {
        *self.state.fail_close.lock() = Some(message.into());
    }

    /// Delay every execute and query by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = Some(latency);
    }

    /// Break the session with checkout order `id`. Everything it is asked
    /// to do afterwards fails with a connection error.
    pub fn kill_session(&self, id: usize) {
        self.state.dead.lock().insert(id);
    }

    /// Number of pools opened.
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of sessions checked out.
    pub fn acquire_count(&self) -> usize {
        self.state.acquires.load(Ordering::SeqCst)
    }

    /// Number of statements prepared.
    pub fn prepare_count(&self) -> usize {
        self.state.prepares.load(Ordering::SeqCst)
    }

    /// Number of sessions abandoned.
    pub fn abandon_count(&self) -> usize {
        self.state.abandons.load(Ordering::SeqCst)
    }

    /// Number of pool closes.
    pub fn pool_close_count(&self) -> usize {
        self.state.pool_closes.load(Ordering::SeqCst)
    }

    /// Number of session closes.
    pub fn session_close_count(&self) -> usize {
        self.state.session_closes.load(Ordering::SeqCst)
    }

    /// Number of sessions dropped, whether returned to the pool or abandoned.
    pub fn release_count(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    /// Every executed statement with its parameters, in order.
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state.executed.lock().clone()
    }

    /// The SQL of every executed statement, in order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.state
            .executed
            .lock()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// Every unparameterized batch, in order.
    pub fn batches(&self) -> Vec<String> {
        self.state.batches.lock().clone()
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Pool = MockPool;

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn open(&self, _config: &Config) -> DbResult<MockPool> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.state.fail_open.lock().take() {
            return Err(DbError::connection(message));
        }
        Ok(MockPool {
            state: Arc::clone(&self.state),
        })
    }
}

/// The mock pool.
pub struct MockPool {
    state: Arc<MockState>,
}

#[async_trait]
impl Pool for MockPool {
    type Session = MockSession;

    async fn acquire(&self) -> DbResult<MockSession> {
        let id = self.state.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            state: Arc::clone(&self.state),
            id,
        })
    }

    fn close(&self) {
        self.state.pool_closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A mock session.
pub struct MockSession {
    state: Arc<MockState>,
    id: usize,
}

impl MockSession {
    /// The order in which this session was checked out.
    pub fn id(&self) -> usize {
        self.id
    }

    fn check_alive(&self) -> DbResult<()> {
        if self.state.dead.lock().contains(&self.id) {
            return Err(DbError::connection("server closed the connection unexpectedly"));
        }
        Ok(())
    }

    async fn next_result(&self, statement: &MockStatement, params: &[Value]) -> Option<MockResult> {
        let latency = *self.state.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.state
            .executed
            .lock()
            .push((statement.sql.to_string(), params.to_vec()));
        self.state.results.lock().pop_front()
    }
}

/// A mock prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockStatement {
    /// Unique per prepare.
    pub id: usize,
    /// The prepared SQL.
    pub sql: Arc<str>,
}

#[async_trait]
impl Session for MockSession {
    type Statement = MockStatement;

    async fn prepare(&self, sql: &str) -> DbResult<MockStatement> {
        self.check_alive()?;
        if let Some(message) = self.state.fail_prepare.lock().take() {
            return Err(DbError::prepare(message));
        }
        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(MockStatement {
            id: self.state.next_statement.fetch_add(1, Ordering::SeqCst),
            sql: Arc::from(sql),
        })
    }

    async fn execute(&self, statement: &MockStatement, params: &[Value]) -> DbResult<u64> {
        self.check_alive()?;
        match self.next_result(statement, params).await {
            None => Ok(1),
            Some(MockResult::Affected(n)) => Ok(n),
            Some(MockResult::Rows(rows)) => Ok(rows.len() as u64),
            Some(MockResult::Error(message)) => Err(DbError::execution(message)),
        }
    }

    async fn query(&self, statement: &MockStatement, params: &[Value]) -> DbResult<Vec<Row>> {
        self.check_alive()?;
        match self.next_result(statement, params).await {
            None | Some(MockResult::Affected(_)) => Ok(Vec::new()),
            Some(MockResult::Rows(rows)) => Ok(rows),
            Some(MockResult::Error(message)) => Err(DbError::execution(message)),
        }
    }

    async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        self.check_alive()?;
        self.state.batches.lock().push(sql.to_string());
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        self.state.session_closes.fetch_add(1, Ordering::SeqCst);
        match self.state.fail_close.lock().take() {
            Some(message) => Err(DbError::connection(message)),
            None => Ok(()),
        }
    }

    fn abandon(self) {
        self.state.abandons.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.releases.fetch_add(1, Ordering::SeqCst);
    }
}
