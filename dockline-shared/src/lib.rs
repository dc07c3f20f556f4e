//! Dockline Shared - common types for the engine client
//!
//! This crate contains the error taxonomy, transport description and wire
//! constants used by the `dockline` client and its test utilities.

pub mod constants;
pub mod errors;
pub mod transport;

pub use errors::{DocklineError, DocklineResult};
pub use transport::Transport;
