//! The connection: configuration, a lazily opened pool and a statement cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::driver::{Driver, Pool, Session, SessionOf};
use crate::error::{DbError, DbResult};
use crate::event::{self, EventKind, Observer, QueryEvent};
use crate::invocation::Invocation;
use crate::meta::Mapped;
use crate::row::Row;
use crate::sql::{OnConflict, UpsertStrategy};
use crate::statement::{Prepared, StatementCache};
use crate::transaction::Transaction;
use crate::value::Value;

struct Opened<D: Driver> {
    pool: D::Pool,
    statements: StatementCache<SessionOf<D>>,
}

/// A configured database handle.
///
/// The pool is opened on first use, or explicitly with [`open`](Self::open),
/// exactly once. The statement cache is bound to a session checked out when
/// the pool opens and is closed before the pool by [`close`](Self::close).
/// If that session fails with a connection error, the cache moves to a fresh
/// checkout and its statements are prepared again on next use.
pub struct Connection<D: Driver> {
    driver: D,
    config: Config,
    opened: OnceCell<Opened<D>>,
    closed: AtomicBool,
    use_statement_cache: AtomicBool,
    observer: RwLock<Option<Arc<dyn Observer>>>,
    upsert: Arc<dyn UpsertStrategy>,
}

impl<D: Driver> Connection<D> {
    /// Create a connection. Nothing is opened until first use.
    pub fn new(driver: D, config: Config) -> Self {
        let use_statement_cache = config.use_statement_cache;
        Self {
            driver,
            config,
            opened: OnceCell::new(),
            closed: AtomicBool::new(false),
            use_statement_cache: AtomicBool::new(use_statement_cache),
            observer: RwLock::new(None),
            upsert: Arc::new(OnConflict),
        }
    }

    /// Attach an event observer.
    pub fn with_observer(self, observer: impl Observer + 'static) -> Self {
        self.set_observer(observer);
        self
    }

    /// Replace the upsert rendering strategy.
    pub fn with_upsert_strategy(mut self, strategy: impl UpsertStrategy + 'static) -> Self {
        self.upsert = Arc::new(strategy);
        self
    }

    /// Attach or replace the event observer.
    pub fn set_observer(&self, observer: impl Observer + 'static) {
        *self.observer.write() = Some(Arc::new(observer));
    }

    /// Attach a closure as the event observer.
    pub fn on_event<F>(&self, f: F)
    where
        F: Fn(&QueryEvent<'_>) + Send + Sync + 'static,
    {
        self.set_observer(f);
    }

    /// Detach the event observer.
    pub fn clear_observer(&self) {
        *self.observer.write() = None;
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The pool, if it has been opened.
    pub fn pool(&self) -> Option<&D::Pool> {
        self.opened.get().map(|o| &o.pool)
    }

    /// The statement cache, if the pool has been opened.
    pub fn statement_cache(&self) -> Option<&StatementCache<SessionOf<D>>> {
        self.opened.get().map(|o| &o.statements)
    }

    /// Cache statements prepared through [`prepare_cached`](Self::prepare_cached).
    pub fn enable_statement_cache(&self) {
        self.use_statement_cache.store(true, Ordering::Relaxed);
    }

    /// Prepare every statement afresh.
    pub fn disable_statement_cache(&self) {
        self.use_statement_cache.store(false, Ordering::Relaxed);
    }

    /// Check if the statement cache is in use.
    pub fn is_statement_cache_enabled(&self) -> bool {
        self.use_statement_cache.load(Ordering::Relaxed)
    }

    pub(crate) fn upsert_strategy(&self) -> &dyn UpsertStrategy {
        self.upsert.as_ref()
    }

    /// Open the pool if it is not open yet.
    ///
    /// Applies pool sizing, then checks liveness on the session that will
    /// hold the statement cache. Later calls return immediately.
    pub async fn open(&self) -> DbResult<&Self> {
        self.opened().await?;
        Ok(self)
    }

    async fn opened(&self) -> DbResult<&Opened<D>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::connection("connection is closed"));
        }
        if let Some(opened) = self.opened.get() {
            return Ok(opened);
        }
        self.opened.get_or_try_init(|| self.open_pool()).await
    }

    async fn open_pool(&self) -> DbResult<Opened<D>> {
        self.config.validate()?;

        let pool = self.driver.open(&self.config).await?;
        let session = match pool.acquire().await {
            Ok(session) => session,
            Err(e) => {
                pool.close();
                return Err(e);
            }
        };

        if let Err(e) = session.batch_execute("select 'ok!'").await {
            pool.close();
            return Err(DbError::connection("liveness check failed").with_source(e));
        }

        info!(
            engine = self.driver.name(),
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            max_connections = self.config.pool.max_connections,
            "connection pool opened"
        );

        Ok(Opened {
            pool,
            statements: StatementCache::new(session),
        })
    }

    /// Close the statement cache, then the pool.
    ///
    /// A failure closing the statement cache is returned and the pool is
    /// left open.
    pub async fn close(&self) -> DbResult<()> {
        self.closed.store(true, Ordering::Release);
        let Some(opened) = self.opened.get() else {
            return Ok(());
        };

        opened.statements.close().await?;
        opened.pool.close();
        info!(engine = self.driver.name(), "connection closed");
        Ok(())
    }

    /// Start a transaction, opening the pool if needed.
    pub async fn begin(&self) -> DbResult<Transaction<SessionOf<D>>> {
        let opened = self.opened().await?;
        let session = opened.pool.acquire().await?;
        Transaction::begin(session).await
    }

    /// Prepare `sql` without caching it.
    ///
    /// With a transaction the statement is prepared on the transaction's
    /// session; otherwise a session is checked out for the statement's
    /// lifetime.
    pub async fn prepare<'a>(
        &'a self,
        sql: &str,
        tx: Option<&'a Transaction<SessionOf<D>>>,
    ) -> DbResult<Prepared<'a, SessionOf<D>>> {
        if let Some(tx) = tx {
            return tx.prepare(sql).await;
        }

        let opened = self.opened().await?;
        let session = opened.pool.acquire().await?;
        debug!(sql, "preparing statement");
        let statement = session.prepare(sql).await.map_err(|e| e.with_sql(sql))?;
        Ok(Prepared::owned(session, statement))
    }

    /// Prepare `sql`, cached under `id` unless a transaction is given or the
    /// cache is disabled.
    pub async fn prepare_cached<'a>(
        &'a self,
        id: &str,
        sql: &str,
        tx: Option<&'a Transaction<SessionOf<D>>>,
    ) -> DbResult<Prepared<'a, SessionOf<D>>> {
        if tx.is_some() || !self.is_statement_cache_enabled() {
            return self.prepare(sql, tx).await;
        }
        let opened = self.opened().await?;
        let generation = opened.statements.generation();
        match opened.statements.prepare(id, sql).await {
            Err(e) if e.is_connection() => {
                self.replace_cache_session(generation).await;
                Err(e)
            }
            other => other,
        }
    }

    /// Move the statement cache off a dead session.
    ///
    /// A no-op when the cache already left `stale_generation` or the
    /// connection is closed. The failed call is not retried.
    pub(crate) async fn replace_cache_session(&self, stale_generation: u64) {
        let Some(opened) = self.opened.get() else {
            return;
        };
        if self.closed.load(Ordering::Acquire)
            || opened.statements.generation() != stale_generation
        {
            return;
        }
        match opened.pool.acquire().await {
            Ok(session) => {
                opened.statements.replace_session(session, stale_generation);
            }
            Err(e) => warn!(error = %e, "could not replace statement cache session"),
        }
    }

    /// Run unparameterized SQL on a transaction or a pooled session.
    pub(crate) async fn batch_execute(
        &self,
        sql: &str,
        tx: Option<&Transaction<SessionOf<D>>>,
    ) -> DbResult<()> {
        if let Some(tx) = tx {
            return tx.batch_execute(sql).await;
        }
        let opened = self.opened().await?;
        let session = opened.pool.acquire().await?;
        session.batch_execute(sql).await
    }

    pub(crate) fn fire_event(
        &self,
        kind: EventKind,
        statement: &str,
        label: &str,
        elapsed: Duration,
        error: Option<&DbError>,
    ) {
        if let Some(err) = error {
            warn!(label, sql = statement, error = %err, "statement failed");
        }

        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            event::emit(
                observer.as_ref(),
                &QueryEvent {
                    kind,
                    engine: self.driver.name(),
                    database: &self.config.database,
                    statement,
                    label,
                    elapsed,
                    error,
                },
            );
        }
    }

    /// Start a non-transactional invocation.
    pub fn invoke(&self) -> Invocation<'_, D> {
        Invocation::new(self, None)
    }

    /// Start an invocation inside `tx`.
    pub fn in_tx<'a>(&'a self, tx: &'a Transaction<SessionOf<D>>) -> Invocation<'a, D> {
        Invocation::new(self, Some(tx))
    }

    /// Run a statement for its effect.
    pub async fn exec(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.invoke().exec(sql, params).await
    }

    /// Run a statement and collect its rows.
    pub async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.invoke().query(sql, params).await
    }

    /// Load `object` by primary key. Returns whether a row was found.
    pub async fn get<T: Mapped>(&self, object: &mut T, ids: &[Value]) -> DbResult<bool> {
        self.invoke().get(object, ids).await
    }

    /// Load every row of `T`'s table.
    pub async fn get_all<T: Mapped + Default>(&self) -> DbResult<Vec<T>> {
        self.invoke().get_all().await
    }

    /// Insert `object`, reading generated columns back into it.
    pub async fn create<T: Mapped>(&self, object: &mut T) -> DbResult<()> {
        self.invoke().create(object).await
    }

    /// Insert `objects` with one statement.
    pub async fn create_many<T: Mapped>(&self, objects: &mut [T]) -> DbResult<()> {
        self.invoke().create_many(objects).await
    }

    /// Insert `object` unless its primary key exists. Returns whether it was inserted.
    pub async fn create_if_not_exists<T: Mapped>(&self, object: &mut T) -> DbResult<bool> {
        self.invoke().create_if_not_exists(object).await
    }

    /// Update `object` by primary key. Returns the affected row count.
    pub async fn update<T: Mapped>(&self, object: &T) -> DbResult<u64> {
        self.invoke().update(object).await
    }

    /// Insert `object`, or overwrite the row with the same primary key.
    pub async fn upsert<T: Mapped>(&self, object: &mut T) -> DbResult<()> {
        self.invoke().upsert(object).await
    }

    /// Delete `object` by primary key. Returns the affected row count.
    pub async fn delete<T: Mapped>(&self, object: &T) -> DbResult<u64> {
        self.invoke().delete(object).await
    }

    /// Check whether a row with `object`'s primary key exists.
    pub async fn exists<T: Mapped>(&self, object: &T) -> DbResult<bool> {
        self.invoke().exists(object).await
    }

    /// Remove every row of `T`'s table.
    pub async fn truncate<T: Mapped>(&self) -> DbResult<()> {
        self.invoke().truncate::<T>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDriver, MockSession};

    fn connection(driver: &MockDriver) -> Connection<MockDriver> {
        Connection::new(driver.clone(), Config::default())
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let driver = MockDriver::new();
        let conn = connection(&driver);

        conn.open().await.unwrap();
        conn.open().await.unwrap();

        assert_eq!(driver.open_count(), 1);
        assert_eq!(driver.batches(), vec!["select 'ok!'".to_string()]);
        assert!(conn.statement_cache().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_open_opens_once() {
        let driver = MockDriver::new();
        let conn = Arc::new(connection(&driver));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move { conn.open().await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(driver.open_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_can_be_retried() {
        let driver = MockDriver::new();
        let conn = connection(&driver);
        driver.fail_next_open("connection refused");

        let err = conn.open().await.err().unwrap();
        assert!(err.is_connection());
        assert!(conn.pool().is_none());

        conn.open().await.unwrap();
        assert_eq!(driver.open_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_dialing() {
        let driver = MockDriver::new();
        let config = Config {
            database: String::new(),
            ..Config::default()
        };
        let conn = Connection::new(driver.clone(), config);

        assert!(conn.open().await.err().unwrap().is_configuration());
        assert_eq!(driver.open_count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_cached_uses_cache() {
        let driver = MockDriver::new();
        let conn = connection(&driver);

        conn.prepare_cached("q", "SELECT 1", None).await.unwrap();
        conn.prepare_cached("q", "SELECT 1", None).await.unwrap();
        assert_eq!(driver.prepare_count(), 1);

        conn.disable_statement_cache();
        conn.prepare_cached("q", "SELECT 1", None).await.unwrap();
        assert_eq!(driver.prepare_count(), 2);
    }

    #[tokio::test]
    async fn test_prepare_in_transaction_bypasses_cache() {
        let driver = MockDriver::new();
        let conn = connection(&driver);
        let tx = conn.begin().await.unwrap();

        let prepared = conn.prepare_cached("q", "SELECT 1", Some(&tx)).await.unwrap();
        assert!(!prepared.is_cached());
        drop(prepared);
        assert!(conn.statement_cache().unwrap().is_empty());

        tx.commit().await.unwrap();
        assert_eq!(
            driver.batches(),
            vec!["select 'ok!'".to_string(), "BEGIN".to_string(), "COMMIT".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dropped_transaction_abandons_session() {
        let driver = MockDriver::new();
        let conn = connection(&driver);
        {
            let _tx = conn.begin().await.unwrap();
        }
        assert_eq!(driver.abandon_count(), 1);

        let tx = conn.begin().await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(driver.abandon_count(), 1);
    }

    #[tokio::test]
    async fn test_dead_cache_session_is_replaced() {
        let driver = MockDriver::new();
        let conn = connection(&driver);
        conn.prepare_cached("q", "SELECT 1", None).await.unwrap();
        driver.kill_session(0);

        let err = conn.prepare_cached("r", "SELECT 2", None).await.err().unwrap();
        assert!(err.is_connection());

        let cache = conn.statement_cache().unwrap();
        assert_eq!(cache.generation(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.session().id(), 1);

        let prepared = conn.prepare_cached("r", "SELECT 2", None).await.unwrap();
        assert_eq!(prepared.query(&[]).await.unwrap().len(), 0);
        assert_eq!(driver.abandon_count(), 1);
    }

    #[tokio::test]
    async fn test_close_closes_cache_before_pool() {
        let driver = MockDriver::new();
        let conn = connection(&driver);
        conn.prepare_cached("q", "SELECT 1", None).await.unwrap();

        conn.close().await.unwrap();
        assert_eq!(driver.pool_close_count(), 1);
        assert!(conn.statement_cache().unwrap().is_empty());
        assert!(conn.open().await.err().unwrap().is_connection());
    }

    #[tokio::test]
    async fn test_close_short_circuits_on_cache_error() {
        let driver = MockDriver::new();
        let conn = connection(&driver);
        conn.open().await.unwrap();
        driver.fail_session_close("server closed the connection");

        assert!(conn.close().await.is_err());
        assert_eq!(driver.pool_close_count(), 0);
    }

    #[tokio::test]
    async fn test_close_before_open_is_noop() {
        let driver = MockDriver::new();
        let conn = connection(&driver);
        conn.close().await.unwrap();
        assert_eq!(driver.open_count(), 0);
    }

    #[allow(dead_code)]
    fn assert_send_sync() {
        fn check<T: Send + Sync>() {}
        check::<Connection<MockDriver>>();
        check::<Transaction<MockSession>>();
    }
}
