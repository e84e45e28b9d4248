//! Items: the units of work flowing through the conveyor.
//!
//! An item is created by the orchestrator on submission, parked in the
//! workbench while in flight, and mutated by whichever worker currently
//! holds it. State sits behind a `parking_lot::RwLock` because statistics
//! and tracing may read it concurrently.

mod input;
mod skip;
mod trace;

pub use input::Input;
pub use skip::{SKIP_ALL_NAME, SkipTarget};
pub use trace::{LogTrace, Trace};

use crate::handler::TestMode;
use conveyor_shared::ConveyorError;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// One unit of work.
pub struct Item<T> {
    id: u64,
    cancel: CancellationToken,
    trace: Option<Arc<dyn Trace>>,
    test_mode: Option<TestMode>,
    state: RwLock<ItemState<T>>,
}

struct ItemState<T> {
    payload: T,
    priority: i64,
    error: Option<ConveyorError>,

    skip_to: Option<SkipTarget>,
    skip_names: Vec<String>,
    stopped: bool,

    last_handler: Option<String>,
    error_handler: Option<String>,

    started_at: Instant,
    stage_started_at: Instant,
}

impl<T> std::fmt::Debug for Item<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Item")
            .field("id", &self.id)
            .field("priority", &state.priority)
            .field("error", &state.error)
            .field("skip_to", &state.skip_to)
            .field("last_handler", &state.last_handler)
            .finish()
    }
}

impl<T> Item<T> {
    /// Build an item from a submission.
    ///
    /// The item's token is a child of the caller's, so cancelling the caller
    /// aborts the item but cancelling the item leaves the caller alone.
    pub(crate) fn from_input(id: u64, input: Input<T>, default_priority: i64) -> Self {
        let now = Instant::now();
        let Input {
            payload,
            cancel,
            trace,
            priority,
            skip_to,
            skip_names,
        } = input;

        Self {
            id,
            cancel: cancel.map(|c| c.child_token()).unwrap_or_default(),
            trace,
            test_mode: None,
            state: RwLock::new(ItemState {
                payload,
                priority: priority.unwrap_or(default_priority),
                error: None,
                skip_to,
                skip_names,
                stopped: false,
                last_handler: None,
                error_handler: None,
                started_at: now,
                stage_started_at: now,
            }),
        }
    }

    /// Standalone item, mostly useful for handler unit tests.
    pub fn new(id: u64, payload: T) -> Self {
        Self::from_input(id, Input::new(payload), 0)
    }

    pub(crate) fn with_test_mode(mut self, mode: Option<TestMode>) -> Self {
        self.test_mode = mode;
        self
    }

    /// Pipeline-unique, monotonically increasing identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancellation token scoped to this item.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Abort processing of this item only.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn test_mode(&self) -> Option<&TestMode> {
        self.test_mode.as_ref()
    }

    // ------------------------------------------------------------------
    // payload
    // ------------------------------------------------------------------

    /// Shared access to the payload.
    ///
    /// Do not hold the guard across an `.await`.
    pub fn payload(&self) -> MappedRwLockReadGuard<'_, T> {
        RwLockReadGuard::map(self.state.read(), |s| &s.payload)
    }

    /// Exclusive access to the payload.
    ///
    /// Do not hold the guard across an `.await`.
    pub fn payload_mut(&self) -> MappedRwLockWriteGuard<'_, T> {
        RwLockWriteGuard::map(self.state.write(), |s| &mut s.payload)
    }

    /// Replace the payload, returning the previous one.
    pub fn set_payload(&self, payload: T) -> T {
        std::mem::replace(&mut self.state.write().payload, payload)
    }

    pub fn payload_cloned(&self) -> T
    where
        T: Clone,
    {
        self.state.read().payload.clone()
    }

    // ------------------------------------------------------------------
    // priority
    // ------------------------------------------------------------------

    pub fn priority(&self) -> i64 {
        self.state.read().priority
    }

    /// Only meaningful for the priority queue, and only for pushes made
    /// after the change.
    pub fn set_priority(&self, priority: i64) {
        self.state.write().priority = priority;
    }

    // ------------------------------------------------------------------
    // errors
    // ------------------------------------------------------------------

    /// Last recorded error, if any.
    pub fn error(&self) -> Option<ConveyorError> {
        self.state.read().error.clone()
    }

    pub fn set_error(&self, err: ConveyorError) {
        if let Some(trace) = &self.trace {
            trace.set_error();
            trace.record(err.to_string());
        }
        self.state.write().error = Some(err);
    }

    pub fn clean_error(&self) {
        self.state.write().error = None;
    }

    /// Name of the stage whose handler produced the current error.
    pub fn error_handler(&self) -> Option<String> {
        self.state.read().error_handler.clone()
    }

    pub(crate) fn set_error_handler(&self, stage: &str) {
        self.state.write().error_handler = Some(stage.to_string());
    }

    /// Name of the last stage that picked this item up.
    pub fn last_handler(&self) -> Option<String> {
        self.state.read().last_handler.clone()
    }

    pub(crate) fn set_last_handler(&self, stage: &str) {
        self.state.write().last_handler = Some(stage.to_string());
    }

    // ------------------------------------------------------------------
    // routing
    // ------------------------------------------------------------------

    /// Pending resume target, if any.
    pub fn skip_to(&self) -> Option<SkipTarget> {
        self.state.read().skip_to.clone()
    }

    /// Skip every worker stage until the named one. Cleared once the item
    /// reaches it; if no later worker stage has that name the item is
    /// routed to the error chain.
    pub fn set_skip_to(&self, target: impl Into<SkipTarget>) {
        self.state.write().skip_to = Some(target.into());
    }

    pub fn clear_skip_to(&self) {
        self.state.write().skip_to = None;
    }

    /// Stages this item always bypasses.
    pub fn skip_names(&self) -> Vec<String> {
        self.state.read().skip_names.clone()
    }

    pub fn add_skip_names<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .write()
            .skip_names
            .extend(names.into_iter().map(Into::into));
    }

    /// Bypass every remaining worker stage. Error and final stages still
    /// see the item.
    pub fn stop_processing(&self) {
        self.state.write().stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.state.read().stopped
    }

    // ------------------------------------------------------------------
    // tracing
    // ------------------------------------------------------------------

    pub fn has_trace(&self) -> bool {
        self.trace.is_some()
    }

    /// Record a line in the item's trace sink, if it has one.
    pub fn log_trace(&self, line: impl FnOnce() -> String) {
        if let Some(trace) = &self.trace {
            trace.record(line());
        }
    }

    /// Record a line prefixed with the time spent since the previous
    /// timed line, and restart the stage timer.
    pub(crate) fn log_trace_elapsed(&self, line: impl FnOnce() -> String) {
        if let Some(trace) = &self.trace {
            let elapsed = {
                let mut state = self.state.write();
                let elapsed = state.stage_started_at.elapsed();
                state.stage_started_at = Instant::now();
                elapsed
            };
            trace.record(format!("{:?} : {}", elapsed, line()));
        }
    }

    /// Mark submission time; restarts both timers.
    pub(crate) fn mark_started(&self) {
        let mut state = self.state.write();
        let now = Instant::now();
        state.started_at = now;
        state.stage_started_at = now;
    }

    /// Record the total time and flush the trace sink.
    pub(crate) fn finish(&self) {
        if let Some(trace) = &self.trace {
            let total = self.state.read().started_at.elapsed();
            trace.record(format!("{:?} : total", total));
            trace.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_input() {
        let item = Item::from_input(7, Input::new("payload".to_string()), 3);
        assert_eq!(item.id(), 7);
        assert_eq!(item.priority(), 3);
        assert!(item.error().is_none());
        assert!(item.skip_to().is_none());
        assert!(item.last_handler().is_none());
        assert!(!item.is_stopped());
        assert_eq!(*item.payload(), "payload");
    }

    #[test]
    fn test_explicit_priority_wins() {
        let item = Item::from_input(1, Input::new(()).with_priority(-4), 10);
        assert_eq!(item.priority(), -4);
    }

    #[test]
    fn test_payload_mutation() {
        let item = Item::new(1, vec![1, 2]);
        item.payload_mut().push(3);
        assert_eq!(*item.payload(), vec![1, 2, 3]);

        let old = item.set_payload(vec![9]);
        assert_eq!(old, vec![1, 2, 3]);
        assert_eq!(item.payload_cloned(), vec![9]);
    }

    #[test]
    fn test_error_roundtrip_marks_trace() {
        let trace = Arc::new(LogTrace::new());
        let item = Item::from_input(1, Input::new(()).with_trace(trace.clone()), 0);

        item.set_error(ConveyorError::handler("bad"));
        assert_eq!(item.error(), Some(ConveyorError::handler("bad")));
        assert_eq!(
            trace.take().as_deref(),
            Some("ERROR: handler error: bad")
        );

        item.clean_error();
        assert!(item.error().is_none());
    }

    #[test]
    fn test_item_token_is_child_of_caller() {
        let caller = CancellationToken::new();
        let item = Item::from_input(1, Input::new(()).with_cancel(caller.clone()), 0);

        item.cancel();
        assert!(item.is_canceled());
        assert!(!caller.is_cancelled());

        let caller = CancellationToken::new();
        let item = Item::from_input(2, Input::new(()).with_cancel(caller.clone()), 0);
        caller.cancel();
        assert!(item.is_canceled());
    }

    #[test]
    fn test_elapsed_line_format() {
        let trace = Arc::new(LogTrace::new());
        let item = Item::from_input(1, Input::new(()).with_trace(trace.clone()), 0);
        item.mark_started();
        item.log_trace_elapsed(|| "[first] success".to_string());
        let out = trace.take().unwrap_or_default();
        assert!(out.ends_with(" : [first] success"), "{}", out);
    }
}
