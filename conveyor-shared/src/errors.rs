//! Error taxonomy for the conveyor engine.
//!
//! Errors are cloneable: they are recorded on items as they travel through
//! the pipeline and handed back to synchronous callers.

use thiserror::Error;

/// Result alias used throughout the engine and by handlers.
pub type ConveyorResult<T> = Result<T, ConveyorError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConveyorError {
    /// Invalid registration or options (empty/duplicate names, bad bounds).
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation not allowed in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Workbench index outside of the arena.
    #[error("index {index} is out of range (capacity {capacity})")]
    OutOfRange { index: usize, capacity: usize },

    /// A handler returned an error while processing an item.
    #[error("handler error: {0}")]
    Handler(String),

    /// A handler panicked; the panic was caught and converted.
    #[error("handler panicked: {0}")]
    Panic(String),

    /// Processing was interrupted by a cancellation token.
    #[error("canceled: {0}")]
    Canceled(String),

    /// The requested skip target was never reached by the worker chain.
    #[error("skip target '{0}' is unreachable: no more worker stages")]
    UnreachableSkip(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Push into a queue whose input side is already closed.
    #[error("queue is closed: {0}")]
    QueueClosed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConveyorError {
    /// Shorthand for handler code: `Err(ConveyorError::handler("bad input"))`.
    pub fn handler(msg: impl Into<String>) -> Self {
        ConveyorError::Handler(msg.into())
    }

    /// True for errors caused by a cancellation token firing.
    pub fn is_canceled(&self) -> bool {
        matches!(self, ConveyorError::Canceled(_))
    }
}

impl From<anyhow::Error> for ConveyorError {
    fn from(err: anyhow::Error) -> Self {
        ConveyorError::Handler(format!("{:#}", err))
    }
}

impl From<std::io::Error> for ConveyorError {
    fn from(err: std::io::Error) -> Self {
        ConveyorError::Internal(err.to_string())
    }
}
