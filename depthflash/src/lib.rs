//! # depthflash
//!
//! A library for reprogramming depth-camera firmware.
//!
//! This crate talks to the camera's hardware-monitor command set over an
//! injected byte channel and provides:
//!
//! - Command framing and response validation
//! - Flash image parsing (info header, sections, tables)
//! - Backup, merge and sector write for the legacy family
//! - Fixed-block streaming for the stream family
//! - Identity block decoding and firmware compatibility checks
//! - Update-mode entry with disconnect detection
//!
//! ## Supported Devices
//!
//! - **Legacy** family: FES/FWB sector programming with calibration preserved
//! - **Stream** family: 512-byte block upload, burned by the device itself
//!
//! ## Features
//!
//! - `native` (default): serial channel via the `serialport` crate
//! - `serde`: serialization support for configuration and identity types
//!
//! ## Example
//!
//! ```rust,no_run
//! use depthflash::{Device, DeviceFamily, DeviceOptions, UpdateMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = std::fs::read("firmware.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         use depthflash::port::{SerialChannel, SerialConfig};
//!
//!         let channel = SerialChannel::open(&SerialConfig::new("/dev/ttyACM0", 115200))?;
//!         let device = Device::new(channel, DeviceFamily::Legacy, DeviceOptions::default())?;
//!
//!         if !device.check_firmware_compatibility(&image)? {
//!             eprintln!("image firmware is older than the family minimum");
//!         }
//!         device.update_flash(&image, UpdateMode::Update, Some(&mut |p| {
//!             println!("{:.0}%", p * 100.0);
//!         }))?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod identity;
pub mod image;
pub mod port;
pub mod progress;
pub mod protocol;
pub mod target;
pub mod transport;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Fail with [`Error::Interrupted`] once interruption was requested.
pub(crate) fn check_interrupted() -> Result<()> {
    if is_interrupted_requested() {
        return Err(Error::Interrupted);
    }
    Ok(())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::SerialChannel;
pub use {
    device::{
        Device, DeviceOptions, RegionOfInterest,
        entry::{EntryConfig, EntryState, UpdateHost},
    },
    error::{Error, Result},
    identity::{Capabilities, FirmwareVersion, Identity, ImuChip, ShutterType},
    image::{FlashImageInfo, FlashLayout, SectionKind, merge},
    port::{Channel, PortInfo, SerialConfig},
    progress::Progress,
    protocol::{Command, DeviceStatus, Opcode},
    target::{
        DeviceFamily, FlashUpdater, UpdateMode,
        legacy::{BackupConfig, LegacyUpdater},
        stream::{StreamConfig, StreamUpdater, UpdateUnit},
    },
    transport::CommandTransport,
};
