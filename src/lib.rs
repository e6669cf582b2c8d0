//! # dbmap
//!
//! Struct-to-table mapping for PostgreSQL with cached column metadata and
//! cached prepared statements.
//!
//! dbmap provides:
//! - `#[derive(Mapped)]` to describe a struct's columns with field descriptors
//! - A process-wide metadata cache, built once per type
//! - A [`Connection`] that opens its pool lazily and caches prepared
//!   statements by id
//! - Mapped `get`, `get_all`, `create`, `update`, `upsert`, `delete`,
//!   `exists` and `truncate`, each reporting a [`QueryEvent`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dbmap::prelude::*;
//!
//! #[derive(Debug, Default, Mapped)]
//! #[db(table = "users")]
//! pub struct User {
//!     #[db("id,pk,serial")]
//!     pub id: i64,
//!     pub email: String,
//!     #[db(",readonly")]
//!     pub created_at: Option<chrono::DateTime<chrono::Utc>>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dbmap::DbError> {
//!     let conn = PgConnection::new(PgDriver, Config::from_env()?)
//!         .with_observer(TracingObserver::new());
//!
//!     let mut user = User { email: "ada@example.com".into(), ..Default::default() };
//!     conn.create(&mut user).await?;
//!
//!     let mut found = User::default();
//!     assert!(conn.get(&mut found, &[user.id.into()]).await?);
//!
//!     conn.close().await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

pub use dbmap_core::*;

// The derive macro and the trait share a name, in different namespaces
pub use dbmap_core::Mapped;
pub use dbmap_derive::Mapped;

/// The PostgreSQL driver.
#[cfg(feature = "postgres")]
pub mod postgres {
    pub use dbmap_postgres::*;
}

#[cfg(feature = "postgres")]
pub use dbmap_postgres::{PgConnection, PgDriver, PgTransaction};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use dbmap_core::prelude::*;
    pub use dbmap_core::{Invocation, Observer, QueryEvent, TracingObserver};
    pub use dbmap_derive::Mapped;

    #[cfg(feature = "postgres")]
    pub use dbmap_postgres::{PgConnection, PgDriver};
}
