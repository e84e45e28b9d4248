//! Submission input.

use super::{SkipTarget, Trace};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a caller hands to `Conveyor::run` / `run_res`.
///
/// ```ignore
/// let input = Input::new(payload)
///     .with_cancel(token)
///     .with_priority(5)
///     .with_skip_to("fourth");
/// ```
pub struct Input<T> {
    pub(crate) payload: T,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) trace: Option<Arc<dyn Trace>>,
    pub(crate) priority: Option<i64>,
    pub(crate) skip_to: Option<SkipTarget>,
    pub(crate) skip_names: Vec<String>,
}

impl<T> Input<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            cancel: None,
            trace: None,
            priority: None,
            skip_to: None,
            skip_names: Vec::new(),
        }
    }

    /// Caller's cancellation token. The item gets a child of it.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn Trace>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Explicit priority; the conveyor's default priority is used otherwise.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_skip_to(mut self, target: impl Into<SkipTarget>) -> Self {
        self.skip_to = Some(target.into());
        self
    }

    pub fn with_skip_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }
}
