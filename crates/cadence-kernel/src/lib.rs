//! Action, execution and status model for the Cadence scheduled actions engine.

pub mod kernel;

pub use kernel::*;
