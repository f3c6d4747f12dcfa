//! Native serial channel using the `serialport` crate.
//!
//! The serial bridge forwards request frames to the firmware unchanged. Each
//! response comes back prefixed with its length as a little-endian `u16`, so
//! a round trip is: write the request, read two bytes, read that many bytes.

use {
    crate::{
        error::{Error, Result},
        port::{Channel, PortInfo, SerialConfig},
    },
    byteorder::{LittleEndian, ReadBytesExt},
    log::trace,
    serialport::ClearBuffer,
    std::io::{Read, Write},
};

/// Channel over a USB CDC / UART bridge.
pub struct SerialChannel {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialChannel {
    /// Open a serial channel with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .open()?;

        Ok(Self {
            port,
            name: config.port_name.clone(),
        })
    }

    fn read_frame(&mut self) -> Result<Vec<u8>> {
        let len = self
            .port
            .read_u16::<LittleEndian>()
            .map_err(|e| map_read_error(&e))? as usize;

        let mut frame = vec![0u8; len];
        self.port
            .read_exact(&mut frame)
            .map_err(|e| map_read_error(&e))?;
        Ok(frame)
    }
}

fn map_read_error(e: &std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::TimedOut => Error::Transport("timeout waiting for response".into()),
        std::io::ErrorKind::UnexpectedEof => Error::Transport("device returned no data".into()),
        _ => Error::Transport(format!("read failed: {e}")),
    }
}

impl Channel for SerialChannel {
    fn send(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.port.clear(ClearBuffer::Input)?;

        trace!("-> {} bytes: {:02x?}", request.len(), &request[..request.len().min(32)]);
        self.port
            .write_all(request)
            .map_err(|e| Error::Transport(format!("write failed: {e}")))?;
        self.port.flush()?;

        let response = self.read_frame()?;
        trace!("<- {} bytes", response.len());
        Ok(response)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// List serial ports with their USB identifiers.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let mut info = PortInfo {
                name: p.port_name,
                vid: None,
                pid: None,
                serial_number: None,
            };
            if let serialport::SerialPortType::UsbPort(usb) = p.port_type {
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.serial_number = usb.serial_number;
            }
            info
        })
        .collect())
}
