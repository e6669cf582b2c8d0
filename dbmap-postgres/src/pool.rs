//! The PostgreSQL driver and its connection pool.

use std::time::Duration;

use async_trait::async_trait;
use dbmap_core::{Config, Connection, DbError, DbResult, Driver, Pool};
use deadpool_postgres::{Manager, ManagerConfig, Object, RecyclingMethod, Runtime};
use futures::future::try_join_all;
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::config::to_pg_config;
use crate::error::pool_error;
use crate::session::PgSession;

/// The PostgreSQL driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgDriver;

impl PgDriver {
    /// A connection using this driver.
    pub fn connect(config: Config) -> Connection<PgDriver> {
        Connection::new(PgDriver, config)
    }
}

#[async_trait]
impl Driver for PgDriver {
    type Pool = PgPool;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn open(&self, config: &Config) -> DbResult<PgPool> {
        PgPool::open(config).await
    }
}

/// A `deadpool-postgres` pool.
#[derive(Clone)]
pub struct PgPool {
    inner: deadpool_postgres::Pool,
    max_lifetime: Option<Duration>,
}

impl PgPool {
    /// Build the pool and open `config.pool.idle_connections` connections.
    pub async fn open(config: &Config) -> DbResult<Self> {
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(to_pg_config(config), NoTls, mgr_config);

        let inner = deadpool_postgres::Pool::builder(mgr)
            .max_size(config.pool.max_connections)
            .wait_timeout(config.pool.connection_timeout)
            .create_timeout(config.pool.connection_timeout)
            .recycle_timeout(config.pool.idle_timeout)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| {
                DbError::configuration(format!("failed to create pool: {}", e)).with_source(e)
            })?;

        let pool = Self {
            inner,
            max_lifetime: config.pool.max_lifetime,
        };

        let warm = try_join_all((0..config.pool.idle_connections).map(|_| pool.inner.get())).await;
        if let Err(e) = warm {
            pool.inner.close();
            return Err(pool_error(e));
        }

        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_connections = config.pool.max_connections,
            idle_connections = config.pool.idle_connections,
            "PostgreSQL connection pool created"
        );
        Ok(pool)
    }

    /// Current pool status.
    pub fn status(&self) -> PoolStatus {
        let status = self.inner.status();
        PoolStatus {
            available: status.available,
            size: status.size,
            max_size: status.max_size,
            waiting: status.waiting,
        }
    }

    fn expired(&self, client: &Object) -> bool {
        match self.max_lifetime {
            Some(max) => Object::metrics(client).age() > max,
            None => false,
        }
    }
}

#[async_trait]
impl Pool for PgPool {
    type Session = PgSession;

    async fn acquire(&self) -> DbResult<PgSession> {
        loop {
            let client = self.inner.get().await.map_err(pool_error)?;
            if self.expired(&client) {
                debug!("discarding connection past its max lifetime");
                drop(Object::take(client));
                continue;
            }
            return Ok(PgSession::new(client));
        }
    }

    fn close(&self) {
        self.inner.close();
        info!("PostgreSQL connection pool closed");
    }
}

/// Pool status information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Idle connections.
    pub available: usize,
    /// Open connections.
    pub size: usize,
    /// Maximum size of the pool.
    pub max_size: usize,
    /// Tasks waiting for a connection.
    pub waiting: usize,
}
