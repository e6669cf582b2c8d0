//! Conversion of driver and pool failures into [`DbError`].

use dbmap_core::DbError;

/// Map a `tokio-postgres` error, recording its SQLSTATE.
///
/// `kind` builds the error for the phase that failed; a closed connection
/// is always reported as a connection error.
pub(crate) fn pg_error(kind: fn(String) -> DbError, err: tokio_postgres::Error) -> DbError {
    let code = err.code().map(|c| c.code().to_string());
    let message = match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    };

    let mapped = if err.is_closed() {
        DbError::connection(message)
    } else {
        kind(message)
    };

    let mapped = match code {
        Some(code) => mapped.with_sqlstate(code),
        None => mapped,
    };
    mapped.with_source(err)
}

/// Map a pool checkout failure.
pub(crate) fn pool_error(err: deadpool_postgres::PoolError) -> DbError {
    use deadpool_postgres::PoolError;

    let message = match &err {
        PoolError::Timeout(kind) => format!("timed out waiting for a connection ({:?})", kind),
        PoolError::Closed => "pool is closed".to_string(),
        PoolError::Backend(e) => format!("cannot connect: {}", e),
        other => other.to_string(),
    };
    DbError::connection(message).with_source(err)
}

pub(crate) fn prepare(message: String) -> DbError {
    DbError::prepare(message)
}

pub(crate) fn execution(message: String) -> DbError {
    DbError::execution(message)
}
