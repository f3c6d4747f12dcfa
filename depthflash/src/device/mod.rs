//! Device handle.
//!
//! A [`Device`] owns the command transport of one camera and the family
//! decided when it was opened. Every operation that differs per family
//! dispatches on that value; nothing re-checks the product ID later.
//!
//! ## Example
//!
//! ```rust,no_run
//! use depthflash::{Device, DeviceFamily, DeviceOptions, UpdateMode};
//! use depthflash::port::{SerialChannel, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channel = SerialChannel::open(&SerialConfig::new("/dev/ttyACM0", 115200))?;
//!     let device = Device::new(channel, DeviceFamily::Legacy, DeviceOptions::default())?;
//!
//!     let image = std::fs::read("firmware.bin")?;
//!     device.update_flash(&image, UpdateMode::Update, Some(&mut |p| println!("{:.0}%", p * 100.0)))?;
//!     Ok(())
//! }
//! ```

pub mod entry;

use crate::error::{Error, Result};
use crate::identity::{IDENTITY_BLOCK_SIZE, Identity, check_firmware_compatibility, serial_ready};
use crate::image::layout::FlashLayout;
use crate::port::Channel;
use crate::progress::Progress;
use crate::protocol::command::{Command, Opcode};
use crate::target::legacy::{BackupConfig, LegacyUpdater, backup_flash};
use crate::target::stream::{StreamConfig, StreamUpdater};
use crate::target::{DeviceFamily, FlashUpdater, UpdateMode};
use crate::transport::CommandTransport;
use byteorder::{ByteOrder, LittleEndian};
use entry::{EntryConfig, EntryState, UpdateHost, enter_update_state};
use log::{debug, info, warn};
use std::thread;
use std::time::Duration;

/// First byte of the device clock register.
pub const REGISTER_CLOCK_0: u32 = 0x0090_100C;

/// Device clock ticks per millisecond.
const CLOCK_TICKS_PER_MS: f64 = 1000.0;

/// Bytes of firmware log requested by GLD.
pub const FIRMWARE_LOG_SIZE: u32 = 0x1F4;

/// Flash offset of the persisted log.
pub const FLASH_LOG_OFFSET: u32 = 0x17_A000;

/// Bytes of persisted log requested by FRB.
pub const FLASH_LOG_SIZE: u32 = 0x3F8;

/// Tunables of a [`Device`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOptions {
    /// Flash geometry.
    pub layout: FlashLayout,
    /// Backup retry policy.
    pub backup: BackupConfig,
    /// Streaming poll timing.
    pub stream: StreamConfig,
    /// Update-entry wait timing.
    pub entry: EntryConfig,
    /// Identity re-reads while the serial EEPROM is not ready.
    pub identity_retries: u32,
    /// Delay between identity re-reads.
    pub identity_retry_delay: Duration,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            layout: FlashLayout::default(),
            backup: BackupConfig::default(),
            stream: StreamConfig::default(),
            entry: EntryConfig::default(),
            identity_retries: 6,
            identity_retry_delay: Duration::from_secs(2),
        }
    }
}

impl DeviceOptions {
    /// Set the flash layout.
    #[must_use]
    pub fn with_layout(mut self, layout: FlashLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the backup policy.
    #[must_use]
    pub fn with_backup(mut self, backup: BackupConfig) -> Self {
        self.backup = backup;
        self
    }

    /// Set the streaming timing.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Set the update-entry timing.
    #[must_use]
    pub fn with_entry(mut self, entry: EntryConfig) -> Self {
        self.entry = entry;
        self
    }

    /// Set the identity retry policy.
    #[must_use]
    pub fn with_identity_retry(mut self, retries: u32, delay: Duration) -> Self {
        self.identity_retries = retries;
        self.identity_retry_delay = delay;
        self
    }
}

/// Auto-exposure region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionOfInterest {
    /// Left edge.
    pub min_x: u16,
    /// Top edge.
    pub min_y: u16,
    /// Right edge.
    pub max_x: u16,
    /// Bottom edge.
    pub max_y: u16,
}

/// One connected camera.
pub struct Device<C: Channel> {
    transport: CommandTransport<C>,
    family: DeviceFamily,
    options: DeviceOptions,
}

impl<C: Channel> Device<C> {
    /// Wrap a channel to a device of a known family.
    pub fn new(channel: C, family: DeviceFamily, options: DeviceOptions) -> Result<Self> {
        options.layout.validate()?;
        info!("Opened {family} device on {}", channel.name());
        Ok(Self {
            transport: CommandTransport::new(channel),
            family,
            options,
        })
    }

    /// Wrap a channel, deriving the family from the USB product ID.
    pub fn with_pid(channel: C, pid: u16, options: DeviceOptions) -> Result<Self> {
        Self::new(channel, DeviceFamily::from_pid(pid), options)
    }

    /// Device family.
    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Options in effect.
    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    /// The command transport.
    pub fn transport(&self) -> &CommandTransport<C> {
        &self.transport
    }

    /// Consume the device and return its channel.
    pub fn into_channel(self) -> C {
        self.transport.into_inner()
    }

    /// Updater for this device's family.
    pub fn updater(&self) -> Box<dyn FlashUpdater + '_> {
        match self.family {
            DeviceFamily::Legacy => Box::new(LegacyUpdater::new(
                &self.transport,
                &self.options.layout,
                &self.options.backup,
            )),
            DeviceFamily::Stream => Box::new(StreamUpdater::new(&self.transport, &self.options.stream)),
        }
    }

    /// Write a firmware image.
    ///
    /// `mode` must belong to this device's family. Updates are not atomic:
    /// on failure flash keeps whatever the last successful write produced.
    pub fn update_flash(
        &self,
        image: &[u8],
        mode: UpdateMode,
        progress: Option<&mut dyn FnMut(f32)>,
    ) -> Result<()> {
        if !self.family.supports(mode) {
            return Err(Error::InvalidMode(mode.raw()));
        }
        self.updater()
            .update_flash(image, mode, &mut Progress::new(progress))
    }

    /// Read the whole flash.
    pub fn backup_flash(&self, progress: Option<&mut dyn FnMut(f32)>) -> Result<Vec<u8>> {
        backup_flash(
            &self.transport,
            &self.options.layout,
            &self.options.backup,
            &mut Progress::new(progress),
        )
    }

    /// Read the identity block.
    ///
    /// Stream-family devices are re-read while their serial EEPROM is not
    /// ready; the last block is returned either way.
    pub fn read_identity_block(&self) -> Result<Vec<u8>> {
        let mut block = self.transport.read_identity_block(IDENTITY_BLOCK_SIZE)?;
        if self.family != DeviceFamily::Stream {
            return Ok(block);
        }

        let retries = self.options.identity_retries;
        for attempt in 1..=retries {
            if serial_ready(&block, self.family) {
                break;
            }
            debug!("Serial EEPROM not ready, re-reading identity ({attempt}/{retries})");
            thread::sleep(self.options.identity_retry_delay);
            crate::check_interrupted()?;
            block = self.transport.read_identity_block(IDENTITY_BLOCK_SIZE)?;
        }

        if !serial_ready(&block, self.family) {
            warn!("Serial number still unreadable after {retries} re-reads");
        }
        Ok(block)
    }

    /// Read and decode the identity block.
    pub fn identity(&self) -> Result<Identity> {
        Identity::decode(&self.read_identity_block()?, self.family)
    }

    /// Whether `image` is new enough for this family.
    pub fn check_firmware_compatibility(&self, image: &[u8]) -> Result<bool> {
        check_firmware_compatibility(image, &self.options.layout, self.family)
    }

    /// Reset the device.
    pub fn hardware_reset(&self) -> Result<()> {
        info!("Resetting device");
        self.transport
            .send(&Command::new(Opcode::Hwrst))
            .map(|_| ())
    }

    /// Device clock in milliseconds.
    pub fn device_time_ms(&self) -> Result<f64> {
        let cmd = Command::new(Opcode::Mrd)
            .param1(REGISTER_CLOCK_0)
            .param2(REGISTER_CLOCK_0 + 4);
        let data = self.transport.send(&cmd)?;
        if data.len() < 4 {
            return Err(Error::Protocol(format!(
                "clock register read returned {} bytes, expected 4",
                data.len()
            )));
        }
        Ok(f64::from(LittleEndian::read_u32(&data[..4])) / CLOCK_TICKS_PER_MS)
    }

    /// Current auto-exposure region of interest.
    pub fn ae_roi(&self) -> Result<RegionOfInterest> {
        let data = self.transport.send(&Command::new(Opcode::GetAeRoi))?;
        if data.len() < 8 {
            return Err(Error::Protocol(format!(
                "ROI response has {} bytes, expected 8",
                data.len()
            )));
        }
        Ok(RegionOfInterest {
            min_y: LittleEndian::read_u16(&data[0..2]),
            max_y: LittleEndian::read_u16(&data[2..4]),
            min_x: LittleEndian::read_u16(&data[4..6]),
            max_x: LittleEndian::read_u16(&data[6..8]),
        })
    }

    /// Set the auto-exposure region of interest.
    pub fn set_ae_roi(&self, roi: RegionOfInterest) -> Result<()> {
        let cmd = Command::new(Opcode::SetAeRoi)
            .param1(u32::from(roi.min_y))
            .param2(u32::from(roi.max_y))
            .param3(u32::from(roi.min_x))
            .param4(u32::from(roi.max_x));
        self.transport.send(&cmd).map(|_| ())
    }

    /// Command that fetches the firmware log.
    pub fn firmware_logs_command() -> Command {
        Command::new(Opcode::Gld).param1(FIRMWARE_LOG_SIZE)
    }

    /// Command that fetches the log persisted in flash.
    pub fn flash_logs_command() -> Command {
        Command::new(Opcode::Frb)
            .param1(FLASH_LOG_OFFSET)
            .param2(FLASH_LOG_SIZE)
    }

    /// Raw pass-through.
    pub fn send_receive_raw(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.transport.send_receive_raw(request)
    }

    /// Switch to update mode and wait for the device to disconnect.
    pub fn enter_update_state<H: UpdateHost + ?Sized>(&self, host: &H) -> EntryState {
        enter_update_state(&self.transport, host, &self.options.entry)
    }
}
