//! Structured execution events.
//!
//! One [`QueryEvent`] is emitted per executed statement to the observer
//! attached to a [`Connection`](crate::Connection). Emission is
//! best-effort: an observer that panics is logged and otherwise ignored.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::DbError;

/// Whether the statement returned rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A statement that returns rows.
    Query,
    /// A statement executed for its effect.
    Exec,
}

impl EventKind {
    /// Event flag name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "db.query",
            Self::Exec => "db.exec",
        }
    }
}

/// One executed statement.
#[derive(Debug, Clone, Copy)]
pub struct QueryEvent<'a> {
    /// Query or exec.
    pub kind: EventKind,
    /// Driver name.
    pub engine: &'static str,
    /// Database name from the connection configuration.
    pub database: &'a str,
    /// Statement text.
    pub statement: &'a str,
    /// Invocation label.
    pub label: &'a str,
    /// Wall time spent on the statement.
    pub elapsed: Duration,
    /// The failure, if the statement failed.
    pub error: Option<&'a DbError>,
}

/// Receives query events.
pub trait Observer: Send + Sync {
    /// Handle one event. Called synchronously on the executing task.
    fn on_event(&self, event: &QueryEvent<'_>);
}

impl<F> Observer for F
where
    F: Fn(&QueryEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &QueryEvent<'_>) {
        self(event)
    }
}

/// Deliver `event`, isolating the caller from observer panics.
pub(crate) fn emit(observer: &dyn Observer, event: &QueryEvent<'_>) {
    if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
        warn!(label = event.label, "query observer panicked; event dropped");
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    slow_threshold: Option<Duration>,
}

impl TracingObserver {
    /// Create an observer that logs every event at debug level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log statements slower than `threshold` at warn level.
    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = Some(threshold);
        self
    }
}

impl Observer for TracingObserver {
    fn on_event(&self, event: &QueryEvent<'_>) {
        let elapsed_ms = event.elapsed.as_secs_f64() * 1000.0;

        if let Some(err) = event.error {
            error!(
                flag = event.kind.as_str(),
                engine = event.engine,
                database = event.database,
                label = event.label,
                sql = event.statement,
                elapsed_ms,
                error = %err,
                "statement failed"
            );
            return;
        }

        match self.slow_threshold {
            Some(threshold) if event.elapsed >= threshold => warn!(
                flag = event.kind.as_str(),
                label = event.label,
                sql = event.statement,
                elapsed_ms,
                "slow statement"
            ),
            _ => debug!(
                flag = event.kind.as_str(),
                engine = event.engine,
                label = event.label,
                sql = event.statement,
                elapsed_ms,
                "statement"
            ),
        }
    }
}
