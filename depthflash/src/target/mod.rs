//! Update engines for the supported device families.
//!
//! - [`legacy`]: backup, merge and sector erase/write over FES/FWB.
//! - [`stream`]: fixed 512-byte block transfer with a start/poll handshake.

pub mod family;
pub mod legacy;
pub mod stream;

pub use family::{DeviceFamily, STREAM_FAMILY_PIDS, UpdateMode};

use crate::error::Result;
use crate::port::Channel;
use crate::progress::Progress;
use crate::protocol::command::{Command, Opcode};
use crate::transport::CommandTransport;
use log::{info, warn};

/// Firmware update entry point shared by both families.
pub trait FlashUpdater {
    /// Family this updater drives.
    fn family(&self) -> DeviceFamily;

    /// Write `image` to the device.
    ///
    /// Modes of another family fail with [`Error::InvalidMode`](crate::Error::InvalidMode)
    /// before the device is touched.
    fn update_flash(
        &self,
        image: &[u8],
        mode: UpdateMode,
        progress: &mut Progress<'_>,
    ) -> Result<()>;
}

/// Run `body` as one powered update session.
///
/// Power-saving features are switched off first and the device is always
/// reset afterwards. A failure of `body` wins over a failure of the reset,
/// which is then only logged.
pub(crate) fn update_session<C, F>(
    transport: &CommandTransport<C>,
    progress: &mut Progress<'_>,
    body: F,
) -> Result<()>
where
    C: Channel,
    F: FnOnce(&mut Progress<'_>) -> Result<()>,
{
    let _power = transport.powered()?;

    let result = transport
        .send(&Command::new(Opcode::Pfd).param1(0).without_response())
        .and_then(|_| body(progress));

    if result.is_ok() {
        progress.finish();
    }

    info!("Resetting device");
    let reset = transport
        .send(&Command::new(Opcode::Hwrst))
        .map(|_| ());

    match (result, reset) {
        (Err(e), Err(reset_err)) => {
            warn!("Reset after failed update also failed: {reset_err}");
            Err(e)
        },
        (Err(e), Ok(())) => Err(e),
        (Ok(()), reset) => reset,
    }
}
