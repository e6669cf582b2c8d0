//! # dbmap-core
//!
//! Core of the dbmap mapping layer: field descriptors, column collections,
//! the metadata cache, statement caching and mapped CRUD invocations.
//!
//! This crate provides:
//! - [`Mapped`] and [`TableBuilder`] to describe how a type maps to a table
//! - [`ColumnCollection`] with memoized key, auto and write subsets
//! - [`MetaCache`], resolving each mapped type's columns exactly once
//! - [`Connection`], opening a pool lazily and caching prepared statements
//! - [`Invocation`] for `get`, `create`, `update`, `upsert`, `delete`,
//!   `exists`, `get_all` and `truncate`, each reporting a [`QueryEvent`]
//!
//! Database access goes through the [`Driver`] traits; the PostgreSQL
//! driver lives in `dbmap-postgres`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbmap_core::{Config, Connection, Mapped, TableBuilder};
//! use dbmap_postgres::PgDriver;
//!
//! #[derive(Default)]
//! struct User {
//!     id: i64,
//!     email: String,
//! }
//!
//! impl Mapped for User {
//!     fn table_name() -> Option<&'static str> {
//!         Some("users")
//!     }
//!
//!     fn describe(table: &mut TableBuilder<Self>) {
//!         table
//!             .field("id", "id,pk,serial", |u| &u.id, |u| &mut u.id)
//!             .field("email", "", |u| &u.email, |u| &mut u.email);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = Connection::new(PgDriver, Config::from_env()?);
//!
//!     let mut user = User { email: "ada@example.com".into(), ..Default::default() };
//!     conn.create(&mut user).await?;
//!     assert!(user.id > 0);
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod column;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod event;
pub mod invocation;
pub mod logging;
pub mod meta;
pub mod row;
pub mod sql;
pub mod statement;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transaction;
pub mod value;

pub use collection::ColumnCollection;
pub use column::{Assignment, Column, FieldDescriptor};
pub use config::{Config, ConfigBuilder, EnvSource, MapEnvSource, PoolConfig, SslMode, StdEnvSource};
pub use connection::Connection;
pub use driver::{Driver, Pool, Session, SessionOf, StatementOf};
pub use error::{BoxError, DbError, DbResult, ErrorContext, ErrorKind};
pub use event::{EventKind, Observer, QueryEvent, TracingObserver};
pub use invocation::{Invocation, statement_id};
pub use meta::{Mapped, MetaCache, TableBuilder, column_names_csv, columns, table_name_of};
pub use row::Row;
pub use sql::{OnConflict, UpsertStrategy};
pub use statement::{Prepared, StatementCache};
pub use transaction::Transaction;
pub use value::{FieldValue, Value};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::connection::Connection;
    pub use crate::error::{DbError, DbResult};
    pub use crate::meta::{Mapped, TableBuilder};
    pub use crate::row::Row;
    pub use crate::value::{FieldValue, Value};
}
