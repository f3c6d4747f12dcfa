//! Command transport.
//!
//! [`CommandTransport`] owns the byte channel of one device and serializes
//! every round trip through an internal mutex, so commands issued from
//! different threads never interleave on the wire. The transport never
//! retries; retry budgets belong to the engines built on top of it.

use crate::error::{Error, Result};
use crate::port::Channel;
use crate::protocol::command::{Command, MAX_RESPONSE_DATA, Opcode, decode_response};
use log::{trace, warn};
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Inner<C> {
    channel: C,
    power_refs: usize,
}

/// Serialized command/response access to one device.
pub struct CommandTransport<C: Channel> {
    inner: Mutex<Inner<C>>,
}

impl<C: Channel> CommandTransport<C> {
    /// Wrap a channel.
    pub fn new(channel: C) -> Self {
        Self {
            inner: Mutex::new(Inner {
                channel,
                power_refs: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<C>> {
        // Inner holds no invariant a panicked round trip can break
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the underlying channel.
    pub fn channel_name(&self) -> String {
        self.lock().channel.name().to_string()
    }

    /// Send a command and return the response data without the opcode echo.
    ///
    /// For fire-and-forget commands the raw response is returned unchecked;
    /// channel failures are reported either way.
    pub fn send(&self, command: &Command) -> Result<Vec<u8>> {
        let request = command.encode()?;
        let opcode = command.opcode();

        let response = {
            let mut inner = self.lock();
            trace!("{opcode}: params {:x?}", command.params());
            inner.channel.send(&request)?
        };

        if !command.requires_response() {
            return Ok(response);
        }

        if response.is_empty() {
            return Err(Error::Transport(format!("{opcode}: device returned no data")));
        }

        decode_response(opcode, &response)
    }

    /// Send raw bytes and return the raw response, bypassing the codec.
    pub fn send_receive_raw(&self, request: &[u8]) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        trace!("raw: {} bytes", request.len());
        inner.channel.send(request)
    }

    /// Read `size` bytes of the vendor-data (identity) block.
    ///
    /// A block shorter than `size` is a protocol error.
    pub fn read_identity_block(&self, size: usize) -> Result<Vec<u8>> {
        if size > MAX_RESPONSE_DATA {
            return Err(Error::Protocol(format!(
                "identity block of {size} bytes exceeds the {MAX_RESPONSE_DATA}-byte response limit"
            )));
        }

        let mut block = self.send(&Command::new(Opcode::Gvd))?;
        if block.len() < size {
            return Err(Error::Protocol(format!(
                "identity block is {} bytes, expected {size}",
                block.len()
            )));
        }
        block.truncate(size);
        Ok(block)
    }

    /// Keep the device powered for the lifetime of the returned guard.
    ///
    /// Guards nest; power is dropped when the outermost guard goes away.
    pub fn powered(&self) -> Result<PowerGuard<'_, C>> {
        let mut inner = self.lock();
        if inner.power_refs == 0 {
            inner.channel.set_power(true)?;
        }
        inner.power_refs += 1;
        Ok(PowerGuard { transport: self })
    }

    /// Consume the transport and return the channel.
    pub fn into_inner(self) -> C {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .channel
    }
}

/// Scoped device power, released on drop.
pub struct PowerGuard<'a, C: Channel> {
    transport: &'a CommandTransport<C>,
}

impl<C: Channel> Drop for PowerGuard<'_, C> {
    fn drop(&mut self) {
        let mut inner = self.transport.lock();
        inner.power_refs = inner.power_refs.saturating_sub(1);
        if inner.power_refs == 0 {
            if let Err(e) = inner.channel.set_power(false) {
                warn!("Failed to power down {}: {e}", inner.channel.name());
            }
        }
    }
}
