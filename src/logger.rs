//! Injected publish logging.
//!
//! Components that publish on behalf of a caller report each publish through a
//! [`Logger`] handed to them at construction. There is no process-wide logger:
//! the default is [`NullLogger`], which discards everything, and
//! [`TracingLogger`] forwards to `tracing` for applications that already
//! install a subscriber.

use std::sync::{Arc, Mutex};

/// A sink for informational messages.
pub trait Logger: Send + Sync {
    /// Record an informational message.
    fn info(&self, message: &str);
}

/// Shared logger pointer.
pub type LoggerPtr = Arc<dyn Logger>;

/// Logger that drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn info(&self, _message: &str) {}
}

/// Logger that forwards messages to `tracing` at `INFO` level.
///
/// Without the `logging` feature this behaves like [`NullLogger`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, _message: &str) {
        #[cfg(feature = "logging")]
        tracing::info!(target: "mom_messaging::publish", "{_message}");
    }
}

/// Logger that keeps every message in memory.
///
/// Useful in tests that assert on the publish trail.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogger {
    /// Create an empty logger behind an `Arc`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of the messages recorded so far.
    pub fn lines(&self) -> Vec<String> {
        // ---
        match self.lines.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Logger for MemoryLogger {
    fn info(&self, message: &str) {
        // ---
        let mut guard = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(message.to_owned());
    }
}

pub(crate) fn null_logger() -> LoggerPtr {
    Arc::new(NullLogger)
}
