//! Transactions.

use tracing::{debug, warn};

use crate::driver::Session;
use crate::error::{DbError, DbResult};
use crate::statement::Prepared;

/// A transaction holding one pooled session until it finishes.
///
/// Statements prepared through a transaction never enter the statement
/// cache. Dropping an unfinished transaction abandons its session, which the
/// server treats as a rollback.
pub struct Transaction<S: Session> {
    session: Option<S>,
}

impl<S: Session> Transaction<S> {
    pub(crate) async fn begin(session: S) -> DbResult<Self> {
        let tx = Self {
            session: Some(session),
        };
        tx.batch_execute("BEGIN").await?;
        debug!("transaction started");
        Ok(tx)
    }

    /// The session statements run on.
    pub fn session(&self) -> DbResult<&S> {
        self.session
            .as_ref()
            .ok_or_else(|| DbError::execution("transaction already finished"))
    }

    /// Prepare `sql` on the transaction's session.
    pub async fn prepare(&self, sql: &str) -> DbResult<Prepared<'_, S>> {
        let session = self.session()?;
        let statement = session.prepare(sql).await.map_err(|e| e.with_sql(sql))?;
        Ok(Prepared::borrowed(session, statement))
    }

    /// Run unparameterized SQL inside the transaction.
    pub async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        self.session()?.batch_execute(sql).await
    }

    /// Commit.
    pub async fn commit(mut self) -> DbResult<()> {
        self.finish("COMMIT").await
    }

    /// Roll back.
    pub async fn rollback(mut self) -> DbResult<()> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&mut self, sql: &'static str) -> DbResult<()> {
        let result = self.session()?.batch_execute(sql).await;
        match result {
            Ok(()) => {
                self.session.take();
                debug!(statement = sql, "transaction finished");
                Ok(())
            }
            Err(e) => {
                if let Some(session) = self.session.take() {
                    session.abandon();
                }
                Err(e.with_sql(sql))
            }
        }
    }
}

impl<S: Session> Drop for Transaction<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("transaction dropped without commit or rollback; abandoning its connection");
            session.abandon();
        }
    }
}
