//! Update-mode entry.
//!
//! ```text
//! Streaming --stop_activity--> Quiesced --DFU(1)--> AwaitingDisconnect
//!                                                      |          |
//!                                               not present    polls used up
//!                                                      v          v
//!                                               Disconnected   TimedOut
//! ```
//!
//! Entering update mode is best-effort: the device may vanish mid-call, so
//! nothing here returns an error. The state reached is returned instead.

use crate::port::Channel;
use crate::protocol::command::{Command, Opcode};
use crate::transport::CommandTransport;
use crate::{Result, is_interrupted_requested};
use log::{debug, info, warn};
use std::thread;
use std::time::Duration;

/// Progress of an update-mode entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Device is exchanging data.
    Streaming,
    /// Host-side activity stopped.
    Quiesced,
    /// DFU sent; waiting for the device to drop off the bus.
    AwaitingDisconnect,
    /// Device left the bus.
    Disconnected,
    /// Device still present after the wait window.
    TimedOut,
}

/// Timing of the disconnect wait.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EntryConfig {
    /// Delay between presence polls.
    pub poll_interval: Duration,
    /// How long device removal takes to become visible to the host.
    pub detection_window: Duration,
    /// Extra wait on top of the detection window.
    pub margin: Duration,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            detection_window: Duration::from_millis(5000),
            margin: Duration::from_millis(1000),
        }
    }
}

impl EntryConfig {
    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the detection window.
    #[must_use]
    pub fn with_detection_window(mut self, window: Duration) -> Self {
        self.detection_window = window;
        self
    }

    /// Set the margin.
    #[must_use]
    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Number of presence polls.
    pub fn max_polls(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        ((self.detection_window + self.margin).as_millis() / interval) as u32
    }
}

/// Host-side collaborators of the entry sequence.
pub trait UpdateHost {
    /// Stop every stream and pipe to the device.
    fn stop_activity(&self) -> Result<()>;

    /// Whether the device is still attached.
    fn is_present(&self) -> Result<bool>;

    /// Whether device-change notifications are being delivered.
    fn notifications_active(&self) -> bool {
        true
    }
}

/// Put the device into update mode and wait for it to disconnect.
pub fn enter_update_state<C: Channel, H: UpdateHost + ?Sized>(
    transport: &CommandTransport<C>,
    host: &H,
    config: &EntryConfig,
) -> EntryState {
    let mut state = EntryState::Streaming;

    if let Err(e) = host.stop_activity() {
        warn!("Failed to stop device activity: {e}");
    }
    state = advance(state, EntryState::Quiesced);

    info!("Entering update state, device disconnect is expected");
    let dfu = Command::new(Opcode::Dfu).param1(1).without_response();
    if let Err(e) = transport.send(&dfu) {
        warn!("DFU command failed: {e}");
        return state;
    }
    state = advance(state, EntryState::AwaitingDisconnect);

    let max_polls = config.max_polls();
    for poll in 1..=max_polls {
        if is_interrupted_requested() {
            warn!("Interrupted while waiting for device disconnect");
            return state;
        }

        match host.is_present() {
            Ok(false) => {
                debug!("Device gone after {poll} polls");
                return advance(state, EntryState::Disconnected);
            },
            Ok(true) => {},
            Err(e) => {
                warn!("Presence check failed: {e}");
                return state;
            },
        }

        thread::sleep(config.poll_interval);
    }

    if host.notifications_active() {
        warn!("Timeout waiting for device disconnect after DFU command");
    }
    advance(state, EntryState::TimedOut)
}

fn advance(from: EntryState, to: EntryState) -> EntryState {
    debug!("Update entry: {from:?} -> {to:?}");
    to
}
