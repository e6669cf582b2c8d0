//! Prepared statements and the per-connection statement cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::driver::Session;
use crate::error::{DbError, DbResult};
use crate::row::Row;
use crate::value::Value;

enum SessionRef<'a, S> {
    Borrowed(&'a S),
    Owned(S),
    Shared(Arc<S>),
}

/// A statement together with the session it must run on.
///
/// Statements prepared on a pooled checkout own that checkout and return it
/// to the pool when dropped. Cached statements share the cache's session and
/// keep it alive if the cache moves to a new one mid-call.
pub struct Prepared<'a, S: Session> {
    session: SessionRef<'a, S>,
    statement: S::Statement,
    generation: Option<u64>,
}

impl<'a, S: Session> Prepared<'a, S> {
    pub(crate) fn borrowed(session: &'a S, statement: S::Statement) -> Self {
        Self {
            session: SessionRef::Borrowed(session),
            statement,
            generation: None,
        }
    }

    pub(crate) fn owned(session: S, statement: S::Statement) -> Self {
        Self {
            session: SessionRef::Owned(session),
            statement,
            generation: None,
        }
    }

    fn shared(session: Arc<S>, statement: S::Statement, generation: u64) -> Self {
        Self {
            session: SessionRef::Shared(session),
            statement,
            generation: Some(generation),
        }
    }

    fn session(&self) -> &S {
        match self.session {
            SessionRef::Borrowed(s) => s,
            SessionRef::Owned(ref s) => s,
            SessionRef::Shared(ref s) => s,
        }
    }

    /// Whether the statement came from the statement cache.
    pub fn is_cached(&self) -> bool {
        self.generation.is_some()
    }

    /// The cache session generation the statement was prepared on, if cached.
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// The driver's statement handle.
    pub fn statement(&self) -> &S::Statement {
        &self.statement
    }

    /// Run the statement for its effect.
    pub async fn execute(&self, params: &[Value]) -> DbResult<u64> {
        self.session().execute(&self.statement, params).await
    }

    /// Run the statement and collect its rows.
    pub async fn query(&self, params: &[Value]) -> DbResult<Vec<Row>> {
        self.session().query(&self.statement, params).await
    }
}

struct Bound<S: Session> {
    session: Arc<S>,
    statements: HashMap<String, S::Statement>,
    generation: u64,
}

/// Prepared statements keyed by a caller-chosen id, bound to one session.
///
/// The id is not the SQL text: callers with dynamic SQL pick an id that is
/// stable for each distinct statement. The lock is never held while the
/// driver prepares; when two callers race on a new id, the first insert wins
/// and the other statement is dropped.
///
/// When the bound session dies, [`replace_session`](Self::replace_session)
/// moves the cache onto a fresh one and forgets every statement. Each move
/// bumps the generation.
pub struct StatementCache<S: Session> {
    bound: Mutex<Bound<S>>,
    closed: AtomicBool,
}

impl<S: Session> StatementCache<S> {
    /// Create a cache bound to `session`.
    pub fn new(session: S) -> Self {
        Self {
            bound: Mutex::new(Bound {
                session: Arc::new(session),
                statements: HashMap::new(),
                generation: 0,
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// The session cached statements currently run on.
    pub fn session(&self) -> Arc<S> {
        Arc::clone(&self.bound.lock().session)
    }

    /// How many times the cache has moved to a new session.
    pub fn generation(&self) -> u64 {
        self.bound.lock().generation
    }

    /// The statement cached under `id`, preparing `sql` on a miss.
    pub async fn prepare(&self, id: &str, sql: &str) -> DbResult<Prepared<'_, S>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::prepare("statement cache is closed").with_sql(sql));
        }

        let (session, generation, cached) = {
            let bound = self.bound.lock();
            (
                Arc::clone(&bound.session),
                bound.generation,
                bound.statements.get(id).cloned(),
            )
        };
        if let Some(statement) = cached {
            trace!(id, "statement cache hit");
            return Ok(Prepared::shared(session, statement, generation));
        }

        let statement = session.prepare(sql).await.map_err(|e| e.with_sql(sql))?;
        let statement = {
            let mut bound = self.bound.lock();
            if bound.generation != generation {
                // the session was replaced while preparing
                statement
            } else {
                bound
                    .statements
                    .entry(id.to_string())
                    .or_insert(statement)
                    .clone()
            }
        };
        debug!(id, sql, "cached prepared statement");
        Ok(Prepared::shared(session, statement, generation))
    }

    /// Check if a statement is cached under `id`.
    pub fn has_statement(&self, id: &str) -> bool {
        self.bound.lock().statements.contains_key(id)
    }

    /// Number of cached statements.
    pub fn len(&self) -> usize {
        self.bound.lock().statements.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.bound.lock().statements.is_empty()
    }

    /// Drop the statement cached under `id`, so the next use re-prepares.
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self.bound.lock().statements.remove(id).is_some();
        if removed {
            debug!(id, "invalidated cached statement");
        }
        removed
    }

    /// Bind the cache to `session` if it is still on `stale_generation`.
    ///
    /// Every cached statement is dropped. The old session is abandoned once
    /// no in-flight statement holds it. Returns `false`, dropping `session`,
    /// when another caller already moved the cache or it is closed.
    pub fn replace_session(&self, session: S, stale_generation: u64) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let (old, dropped, generation) = {
            let mut bound = self.bound.lock();
            if bound.generation != stale_generation {
                return false;
            }
            let dropped = bound.statements.len();
            bound.statements.clear();
            bound.generation += 1;
            let old = std::mem::replace(&mut bound.session, Arc::new(session));
            (old, dropped, bound.generation)
        };
        warn!(
            generation,
            statements = dropped,
            "statement cache moved to a new session"
        );
        if let Ok(old) = Arc::try_unwrap(old) {
            old.abandon();
        }
        true
    }

    /// Drop every statement and release the session's server-side resources.
    pub async fn close(&self) -> DbResult<()> {
        self.closed.store(true, Ordering::Release);
        let (session, dropped) = {
            let mut bound = self.bound.lock();
            let n = bound.statements.len();
            bound.statements.clear();
            (Arc::clone(&bound.session), n)
        };
        debug!(statements = dropped, "closing statement cache");
        session.close().await
    }
}
