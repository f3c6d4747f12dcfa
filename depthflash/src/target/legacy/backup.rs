//! Full-flash backup.

use crate::check_interrupted;
use crate::error::{Error, Result};
use crate::image::layout::FlashLayout;
use crate::port::Channel;
use crate::progress::Progress;
use crate::protocol::command::{Command, Opcode};
use crate::transport::CommandTransport;
use log::{debug, info, warn};
use std::thread;
use std::time::Duration;

/// Attempts per chunk, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay between attempts of the same chunk.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retry policy for backup reads.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BackupConfig {
    /// Attempts per chunk, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl BackupConfig {
    /// Set the attempts per chunk.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the retry delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Read the entire flash.
///
/// Each chunk is an FRB of `read_chunk_size` bytes, the last one clamped to
/// what is left. Transient failures are retried per [`BackupConfig`]; a short
/// or long response is a protocol error and fails at once. No partial image
/// is ever returned.
pub fn backup_flash<C: Channel>(
    transport: &CommandTransport<C>,
    layout: &FlashLayout,
    config: &BackupConfig,
    progress: &mut Progress<'_>,
) -> Result<Vec<u8>> {
    let flash_size = layout.flash_size;
    let chunk_size = layout.read_chunk_size;
    let total = layout.read_chunk_count();

    info!("Backing up {flash_size} bytes of flash in {total} chunks");
    let _power = transport.powered()?;

    let mut flash = Vec::with_capacity(flash_size as usize);
    for index in 0..total {
        check_interrupted()?;

        let offset = index * chunk_size;
        let size = chunk_size.min(flash_size - offset);
        let chunk = read_chunk(transport, config, offset, size)?;
        flash.extend_from_slice(&chunk);

        debug!("Flash backup: {}/{flash_size} bytes", flash.len());
        progress.report((index + 1) as f32 / total as f32);
    }

    progress.finish();
    Ok(flash)
}

fn read_chunk<C: Channel>(
    transport: &CommandTransport<C>,
    config: &BackupConfig,
    offset: u32,
    size: u32,
) -> Result<Vec<u8>> {
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        // Fresh command per attempt
        let cmd = Command::new(Opcode::Frb).param1(offset).param2(size);

        match transport.send(&cmd) {
            Ok(data) => {
                if data.len() != size as usize {
                    return Err(Error::Protocol(format!(
                        "FRB at {offset:#x} returned {} bytes, expected {size}",
                        data.len()
                    )));
                }
                return Ok(data);
            },
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!("Flash read at {offset:#x} failed (attempt {attempt}/{max_attempts}): {e}");
                thread::sleep(config.retry_delay);
                check_interrupted()?;
            },
            Err(e) => return Err(e),
        }
    }

    Err(Error::Transport(format!(
        "flash read at {offset:#x} failed after {max_attempts} attempts"
    )))
}
