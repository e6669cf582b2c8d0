//! # dbmap-postgres
//!
//! PostgreSQL driver for dbmap, built on `tokio-postgres` with
//! `deadpool-postgres` pooling.
//!
//! This crate provides:
//! - [`PgDriver`], opening a [`PgPool`] sized by the connection configuration
//! - Per-connection search path and statement timeout
//! - Parameter binding by server-declared type and column decoding into
//!   [`Value`](dbmap_core::Value)
//! - SQLSTATE codes on every database error
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbmap_core::Config;
//! use dbmap_postgres::PgDriver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = PgDriver::connect(Config::from_url("postgresql://app@localhost/app?search_path=billing")?);
//!     conn.open().await?;
//!
//!     let rows = conn.query("SELECT now() AS ts", &[]).await?;
//!     println!("{:?}", rows[0].get("ts"));
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
mod error;
pub mod pool;
mod row;
pub mod session;
pub mod types;

pub use config::to_pg_config;
pub use pool::{PgDriver, PgPool, PoolStatus};
pub use session::PgSession;
pub use types::{SqlColumn, SqlParam};

/// A connection backed by PostgreSQL.
pub type PgConnection = dbmap_core::Connection<PgDriver>;

/// A transaction on a PostgreSQL connection.
pub type PgTransaction = dbmap_core::Transaction<PgSession>;
