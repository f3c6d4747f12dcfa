//! Hardware-monitor command codec.
//!
//! Every structured request to the camera firmware uses the same frame:
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+-----------+
//! | Length | Magic  | Opcode | Param1 | Param2 | Param3 | Param4 |  Payload  |
//! +--------+--------+--------+--------+--------+--------+--------+-----------+
//! | 2 bytes| 2 bytes| 4 bytes| 4 bytes| 4 bytes| 4 bytes| 4 bytes| 0..=1000  |
//! +--------+--------+--------+--------+--------+--------+--------+-----------+
//! | len-4  | 0xCDAB |  code  |                 little-endian                 |
//! +--------+--------+--------+--------+--------+--------+--------+-----------+
//! ```
//!
//! The response starts with a 4-byte echo of the opcode followed by the
//! returned data. When the firmware refuses a command the echo slot carries
//! a negative status code instead.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fmt;

/// Magic number following the length field of every request.
pub const MONITOR_MAGIC: u16 = 0xCDAB;

/// Size of the fixed request header (length, magic, opcode, 4 params).
pub const HEADER_SIZE: usize = 24;

/// Largest payload a single request may carry.
pub const MAX_PAYLOAD: usize = 1000;

/// Size of the firmware's command buffer.
pub const BUFFER_SIZE: usize = 1024;

/// Largest data block a single response may carry (buffer minus opcode echo).
pub const MAX_RESPONSE_DATA: usize = BUFFER_SIZE - 4;

/// Size of the opcode echo at the start of every response.
const ECHO_SIZE: usize = 4;

/// Firmware command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// Memory read (0x01).
    Mrd = 0x01,
    /// Flash read block (0x09).
    Frb = 0x09,
    /// Flash write block (0x0A).
    Fwb = 0x0A,
    /// Flash erase sector (0x0B).
    Fes = 0x0B,
    /// Flash erase full (0x0C).
    Fef = 0x0C,
    /// Get firmware log data (0x0F).
    Gld = 0x0F,
    /// Get vendor data, the identity block (0x10).
    Gvd = 0x10,
    /// Enter firmware update mode (0x1E).
    Dfu = 0x1E,
    /// Hardware reset (0x20).
    Hwrst = 0x20,
    /// Power features disable/enable (0x3B).
    Pfd = 0x3B,
    /// Set auto-exposure region of interest (0x44).
    SetAeRoi = 0x44,
    /// Get auto-exposure region of interest (0x45).
    GetAeRoi = 0x45,
}

impl Opcode {
    /// Decode a raw opcode value.
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0x01 => Self::Mrd,
            0x09 => Self::Frb,
            0x0A => Self::Fwb,
            0x0B => Self::Fes,
            0x0C => Self::Fef,
            0x0F => Self::Gld,
            0x10 => Self::Gvd,
            0x1E => Self::Dfu,
            0x20 => Self::Hwrst,
            0x3B => Self::Pfd,
            0x44 => Self::SetAeRoi,
            0x45 => Self::GetAeRoi,
            _ => return None,
        })
    }

    /// Short mnemonic used by the firmware documentation.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Mrd => "MRD",
            Self::Frb => "FRB",
            Self::Fwb => "FWB",
            Self::Fes => "FES",
            Self::Fef => "FEF",
            Self::Gld => "GLD",
            Self::Gvd => "GVD",
            Self::Dfu => "DFU",
            Self::Hwrst => "HWRST",
            Self::Pfd => "PFD",
            Self::SetAeRoi => "SETAEROI",
            Self::GetAeRoi => "GETAEROI",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.mnemonic(), *self as u32)
    }
}

/// Status codes the firmware places in the echo slot when it refuses a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Unknown opcode.
    WrongCommand,
    /// Start/end address mismatch.
    StartNgEndAddr,
    /// Address space not aligned.
    AddressSpaceNotAligned,
    /// Address space too small.
    AddressSpaceTooSmall,
    /// Target is read-only.
    ReadOnly,
    /// Bad parameter.
    WrongParameter,
    /// Hardware not ready, try again later.
    HwNotReady,
    /// I2C access failed.
    I2cAccessFailed,
    /// No expected user action.
    NoExpectedUserAction,
    /// Integrity error.
    IntegrityError,
    /// Illegal address.
    IllegalAddress,
    /// Illegal size.
    IllegalSize,
    /// CRC mismatch.
    WrongCrc,
    /// Flash write is not authorised.
    NotAuthorisedFlashWrite,
    /// Nothing to return.
    NoDataToReturn,
    /// SPI read failed.
    SpiReadFailed,
    /// SPI write failed.
    SpiWriteFailed,
    /// SPI sector erase failed.
    SpiEraseSectorFailed,
    /// Table is empty.
    TableIsEmpty,
    /// Command is locked.
    CommandIsLocked,
    /// Echo that is neither the opcode nor a documented status.
    Unknown(i32),
}

impl From<i32> for DeviceStatus {
    fn from(value: i32) -> Self {
        match value {
            -1 => Self::WrongCommand,
            -2 => Self::StartNgEndAddr,
            -3 => Self::AddressSpaceNotAligned,
            -4 => Self::AddressSpaceTooSmall,
            -5 => Self::ReadOnly,
            -6 => Self::WrongParameter,
            -7 => Self::HwNotReady,
            -8 => Self::I2cAccessFailed,
            -9 => Self::NoExpectedUserAction,
            -10 => Self::IntegrityError,
            -14 => Self::IllegalAddress,
            -15 => Self::IllegalSize,
            -19 => Self::WrongCrc,
            -20 => Self::NotAuthorisedFlashWrite,
            -21 => Self::NoDataToReturn,
            -22 => Self::SpiReadFailed,
            -23 => Self::SpiWriteFailed,
            -24 => Self::SpiEraseSectorFailed,
            -25 => Self::TableIsEmpty,
            -27 => Self::CommandIsLocked,
            v => Self::Unknown(v),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::WrongCommand => "wrong command",
            Self::StartNgEndAddr => "start/end address mismatch",
            Self::AddressSpaceNotAligned => "address space not aligned",
            Self::AddressSpaceTooSmall => "address space too small",
            Self::ReadOnly => "read-only",
            Self::WrongParameter => "wrong parameter",
            Self::HwNotReady => "hardware not ready",
            Self::I2cAccessFailed => "I2C access failed",
            Self::NoExpectedUserAction => "no expected user action",
            Self::IntegrityError => "integrity error",
            Self::IllegalAddress => "illegal address",
            Self::IllegalSize => "illegal size",
            Self::WrongCrc => "wrong CRC",
            Self::NotAuthorisedFlashWrite => "flash write not authorised",
            Self::NoDataToReturn => "no data to return",
            Self::SpiReadFailed => "SPI read failed",
            Self::SpiWriteFailed => "SPI write failed",
            Self::SpiEraseSectorFailed => "SPI sector erase failed",
            Self::TableIsEmpty => "table is empty",
            Self::CommandIsLocked => "command is locked",
            Self::Unknown(v) => return write!(f, "unknown status {v}"),
        };
        f.write_str(text)
    }
}

/// A single firmware command.
///
/// Built per call; retries construct a fresh command with the same fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    params: [u32; 4],
    payload: Vec<u8>,
    requires_response: bool,
}

impl Command {
    /// Create a command with zero parameters and no payload.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            params: [0; 4],
            payload: Vec::new(),
            requires_response: true,
        }
    }

    /// Set the first parameter.
    #[must_use]
    pub fn param1(mut self, value: u32) -> Self {
        self.params[0] = value;
        self
    }

    /// Set the second parameter.
    #[must_use]
    pub fn param2(mut self, value: u32) -> Self {
        self.params[1] = value;
        self
    }

    /// Set the third parameter.
    #[must_use]
    pub fn param3(mut self, value: u32) -> Self {
        self.params[2] = value;
        self
    }

    /// Set the fourth parameter.
    #[must_use]
    pub fn param4(mut self, value: u32) -> Self {
        self.params[3] = value;
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn payload(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.payload = data.into();
        self
    }

    /// Mark the command as fire-and-forget.
    ///
    /// Channel failures are still reported; only the response content is
    /// left unchecked.
    #[must_use]
    pub fn without_response(mut self) -> Self {
        self.requires_response = false;
        self
    }

    /// Opcode of this command.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The four parameters.
    pub fn params(&self) -> [u32; 4] {
        self.params
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the response is decoded and validated.
    pub fn requires_response(&self) -> bool {
        self.requires_response
    }

    /// Encode the command into a request frame.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(Error::Protocol(format!(
                "{} payload of {} bytes exceeds {MAX_PAYLOAD}",
                self.opcode,
                self.payload.len()
            )));
        }

        let total_len = HEADER_SIZE + self.payload.len();
        let mut buf = Vec::with_capacity(total_len);

        // Length excludes the length and magic fields themselves
        buf.write_u16::<LittleEndian>((total_len - 4) as u16).unwrap();
        buf.write_u16::<LittleEndian>(MONITOR_MAGIC).unwrap();
        buf.write_u32::<LittleEndian>(self.opcode as u32).unwrap();
        for param in self.params {
            buf.write_u32::<LittleEndian>(param).unwrap();
        }
        buf.extend_from_slice(&self.payload);

        Ok(buf)
    }

    /// Parse a request frame back into a command.
    ///
    /// Used by device simulators and wire logging.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_SIZE {
            return Err(Error::Protocol(format!(
                "request frame of {} bytes is shorter than the {HEADER_SIZE}-byte header",
                frame.len()
            )));
        }

        let declared = LittleEndian::read_u16(&frame[0..2]) as usize + 4;
        if declared != frame.len() {
            return Err(Error::Protocol(format!(
                "request length field says {declared} bytes, frame has {}",
                frame.len()
            )));
        }

        let magic = LittleEndian::read_u16(&frame[2..4]);
        if magic != MONITOR_MAGIC {
            return Err(Error::Protocol(format!("bad request magic {magic:#06x}")));
        }

        let raw_opcode = LittleEndian::read_u32(&frame[4..8]);
        let opcode = Opcode::from_u32(raw_opcode)
            .ok_or_else(|| Error::Protocol(format!("unknown opcode {raw_opcode:#x}")))?;

        let mut params = [0u32; 4];
        for (i, param) in params.iter_mut().enumerate() {
            let at = 8 + i * 4;
            *param = LittleEndian::read_u32(&frame[at..at + 4]);
        }

        Ok(Self {
            opcode,
            params,
            payload: frame[HEADER_SIZE..].to_vec(),
            requires_response: true,
        })
    }
}

/// Validate a response for `opcode` and strip the opcode echo.
pub fn decode_response(opcode: Opcode, response: &[u8]) -> Result<Vec<u8>> {
    if response.len() < ECHO_SIZE {
        return Err(Error::Protocol(format!(
            "{opcode} response of {} bytes has no opcode echo",
            response.len()
        )));
    }

    let echo = LittleEndian::read_u32(&response[..ECHO_SIZE]);
    if echo != opcode as u32 {
        return Err(Error::Device {
            opcode,
            status: DeviceStatus::from(echo as i32),
        });
    }

    Ok(response[ECHO_SIZE..].to_vec())
}

/// Build a successful response frame for `opcode` (device side).
pub fn encode_response(opcode: Opcode, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ECHO_SIZE + data.len());
    buf.extend_from_slice(&(opcode as u32).to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Build a rejection frame carrying `status` (device side).
pub fn encode_status(status: i32) -> Vec<u8> {
    status.to_le_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = Command::new(Opcode::Frb)
            .param1(0x0010_0000)
            .param2(1016)
            .encode()
            .unwrap();

        assert_eq!(frame.len(), HEADER_SIZE);
        // Length excludes the 4-byte length+magic prefix
        assert_eq!(&frame[0..2], &[20, 0]);
        assert_eq!(&frame[2..4], &[0xAB, 0xCD]);
        assert_eq!(&frame[4..8], &[0x09, 0, 0, 0]);
        assert_eq!(&frame[8..12], &[0x00, 0x00, 0x10, 0x00]);
        assert_eq!(&frame[12..16], &1016u32.to_le_bytes());
        assert_eq!(&frame[16..24], &[0; 8]);
    }

    #[test]
    fn test_payload_is_appended_and_counted() {
        let frame = Command::new(Opcode::Fwb)
            .param1(4096)
            .param2(3)
            .payload(vec![1, 2, 3])
            .encode()
            .unwrap();
        assert_eq!(frame.len(), HEADER_SIZE + 3);
        assert_eq!(u16::from_le_bytes([frame[0], frame[1]]), 23);
        assert_eq!(&frame[HEADER_SIZE..], &[1, 2, 3]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let err = Command::new(Opcode::Fwb)
            .payload(vec![0; MAX_PAYLOAD + 1])
            .encode()
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_parse_recovers_fields() {
        let cmd = Command::new(Opcode::Fes).param1(17).param2(1);
        let parsed = Command::parse(&cmd.encode().unwrap()).unwrap();
        assert_eq!(parsed.opcode(), Opcode::Fes);
        assert_eq!(parsed.params(), [17, 1, 0, 0]);
        assert!(parsed.data().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut frame = Command::new(Opcode::Gvd).encode().unwrap();
        frame[2] = 0;
        assert!(matches!(Command::parse(&frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_response_strips_echo() {
        let data = decode_response(Opcode::Gvd, &encode_response(Opcode::Gvd, &[9, 8])).unwrap();
        assert_eq!(data, vec![9, 8]);
    }

    #[test]
    fn test_decode_response_status() {
        let err = decode_response(Opcode::Fwb, &encode_status(-23)).unwrap_err();
        assert!(matches!(
            err,
            Error::Device {
                opcode: Opcode::Fwb,
                status: DeviceStatus::SpiWriteFailed
            }
        ));
    }

    #[test]
    fn test_decode_response_too_short() {
        let err = decode_response(Opcode::Mrd, &[0x01, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_unknown_status_keeps_value() {
        assert_eq!(DeviceStatus::from(-99), DeviceStatus::Unknown(-99));
        assert_eq!(DeviceStatus::from(-7), DeviceStatus::HwNotReady);
    }
}
