//! Pluggable per-item trace sink.

use parking_lot::Mutex;

/// Sink for human-readable trace lines attached to an item (or to the
/// whole conveyor).
///
/// Implementations must be cheap to call from many workers at once.
pub trait Trace: Send + Sync {
    /// Append one trace line.
    fn record(&self, line: String);

    /// Mark the trace as failed.
    fn set_error(&self);

    /// Emit buffered lines. Called when an item leaves the pipeline and
    /// periodically for the conveyor-level tracer.
    fn flush(&self);
}

/// Trace sink that buffers lines and emits them as a single `tracing`
/// event per flush.
#[derive(Debug, Default)]
pub struct LogTrace {
    inner: Mutex<LogTraceInner>,
}

#[derive(Debug, Default)]
struct LogTraceInner {
    lines: Vec<String>,
    is_error: bool,
}

impl LogTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the buffered output without emitting it.
    ///
    /// Returns `None` when nothing was recorded since the last flush.
    pub fn take(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        if inner.lines.is_empty() {
            return None;
        }

        let mut out = inner.lines.join(" #-# ");
        if inner.is_error {
            out = format!("ERROR: {}", out);
        }
        inner.lines.clear();
        Some(out)
    }
}

impl Trace for LogTrace {
    fn record(&self, line: String) {
        self.inner.lock().lines.push(line);
    }

    fn set_error(&self) {
        self.inner.lock().is_error = true;
    }

    fn flush(&self) {
        if let Some(out) = self.take() {
            tracing::info!(target: "conveyor::trace", "{}", out);
        }
    }
}
