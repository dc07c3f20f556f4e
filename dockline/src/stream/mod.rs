//! Decoders for the engine's streaming response bodies.

pub mod frame;
pub mod json_lines;

pub use frame::{FrameHeader, LogLine, LogLines, StreamKind, decode_log_lines};
pub use json_lines::{JsonLines, decode_json_lines};
