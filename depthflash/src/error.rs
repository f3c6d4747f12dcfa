//! Error types for depthflash.

use crate::protocol::command::{DeviceStatus, Opcode};
use std::io;
use thiserror::Error;

/// Result type for depthflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for depthflash operations.
///
/// A failed backup or update leaves flash in whatever state the last
/// successful write produced. Sector programming is not transactional, so
/// callers must not assume a half-finished update was rolled back.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (channel, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The byte channel returned no data, timed out or went away.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The device answered with a status code instead of the opcode echo.
    #[error("Device rejected {opcode}: {status}")]
    Device {
        /// Opcode that was sent.
        opcode: Opcode,
        /// Status reported by the firmware.
        status: DeviceStatus,
    },

    /// A response or image violates a length or format contract.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unrecognized update mode, or a mode the device family does not speak.
    #[error("Invalid update mode: {0}")]
    InvalidMode(i32),

    /// Candidate firmware image cannot be used for the requested operation.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// The block-streaming engine observed a fault sentinel while polling.
    #[error("Device fault during update (code {0:#04x}), please try again")]
    DeviceFault(u8),

    /// A bounded wait ran out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The embedding application requested cancellation.
    #[error("Operation interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a bounded retry loop may try the same command again.
    ///
    /// Channel failures and firmware status rejections are transient;
    /// protocol violations and caller errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Transport(_) | Self::Device { .. } => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transport("stall".into()).is_transient());
        assert!(
            Error::Device {
                opcode: Opcode::Frb,
                status: DeviceStatus::HwNotReady,
            }
            .is_transient()
        );
        assert!(!Error::Protocol("short".into()).is_transient());
        assert!(!Error::InvalidMode(7).is_transient());
        assert!(!Error::Interrupted.is_transient());
    }

    #[test]
    fn test_device_error_message() {
        let err = Error::Device {
            opcode: Opcode::Fwb,
            status: DeviceStatus::SpiWriteFailed,
        };
        let msg = err.to_string();
        assert!(msg.contains("FWB"));
        assert!(msg.contains("SPI write failed"));
    }
}
