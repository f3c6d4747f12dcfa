//! Byte channel abstraction.
//!
//! The firmware is reached through an opaque request/response channel. The
//! core never opens one itself; an implementation is injected into
//! [`CommandTransport`](crate::transport::CommandTransport).
//!
//! ```text
//! +------------------------+
//! |  Update / backup logic |
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+
//! |    CommandTransport    |   (one in-flight command per device)
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+     +------------------------+
//! |     Channel trait      | <-- |  SerialChannel / mocks |
//! +------------------------+     +------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust
//! use depthflash::port::Channel;
//!
//! struct Loopback;
//!
//! impl Channel for Loopback {
//!     fn send(&mut self, request: &[u8]) -> depthflash::Result<Vec<u8>> {
//!         Ok(request.to_vec())
//!     }
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::time::Duration;

use crate::error::Result;

/// Request/response byte channel to one physical device.
pub trait Channel: Send {
    /// Send one request and return the device's raw response.
    ///
    /// Fails when the channel returns no data, times out or the device is
    /// gone.
    fn send(&mut self, request: &[u8]) -> Result<Vec<u8>>;

    /// Power the device link up or down.
    ///
    /// Channels without power management keep the default no-op.
    fn set_power(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }

    /// Human-readable endpoint name.
    fn name(&self) -> &str {
        "channel"
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        (**self).send(request)
    }

    fn set_power(&mut self, on: bool) -> Result<()> {
        (**self).set_power(on)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Serial bridge configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout for a single round trip.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(5000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::{SerialChannel, list_ports};
