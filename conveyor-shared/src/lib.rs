//! Types shared between the conveyor engine and the crates that plug
//! handlers into it.

pub mod errors;

pub use errors::{ConveyorError, ConveyorResult};
