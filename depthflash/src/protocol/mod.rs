//! Protocol implementations.

pub mod command;

// Re-export common types
pub use command::{Command, DeviceStatus, Opcode, decode_response};
