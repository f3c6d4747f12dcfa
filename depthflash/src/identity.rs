//! Identity (vendor data) block decoding.
//!
//! GVD returns a fixed-layout block, at most one response payload long.
//! Only the leading bytes up to the lock status are interpreted. Every field
//! is read through a bounds check; a block too short for a field is a
//! protocol error.
//!
//! | Offset | Width | Field                                  |
//! |-------:|------:|----------------------------------------|
//! |     12 |     4 | Firmware version, printed b3.b2.b1.b0  |
//! |     48 | 6/32  | Optic (module) serial                  |
//! |     64 |     6 | ASIC serial (legacy family)            |
//! |    112 |     1 | Fisheye sensor, low byte               |
//! |    113 |     1 | Fisheye sensor, high byte              |
//! |    124 |     1 | IMU accelerometer chip ID              |
//! |    166 |     1 | Depth sensor shutter type              |
//! |    170 |     1 | Active projector                       |
//! |    174 |     1 | RGB sensor                             |
//! |    178 |     1 | IMU sensor                             |
//! |    216 |     1 | Lock status                            |

use crate::error::{Error, Result};
use crate::image::flash::INFO_HEADER_SIZE;
use crate::image::layout::FlashLayout;
use crate::target::DeviceFamily;
use std::cmp::Ordering;
use std::fmt;

/// Bytes of the identity block covered by the decoders.
pub const IDENTITY_BLOCK_SIZE: usize = LOCK_STATUS_OFFSET + 1;

/// Firmware version offset.
pub const FW_VERSION_OFFSET: usize = 12;
/// Module serial offset.
pub const MODULE_SERIAL_OFFSET: usize = 48;
/// ASIC serial offset.
pub const ASIC_SERIAL_OFFSET: usize = 64;
/// Fisheye presence, low byte.
pub const FISHEYE_LB_OFFSET: usize = 112;
/// Fisheye presence, high byte.
pub const FISHEYE_HB_OFFSET: usize = 113;
/// IMU accelerometer chip ID.
pub const IMU_ACC_CHIP_ID_OFFSET: usize = 124;
/// Depth sensor shutter type.
pub const DEPTH_SENSOR_TYPE_OFFSET: usize = 166;
/// Active projector presence.
pub const ACTIVE_PROJECTOR_OFFSET: usize = 170;
/// RGB sensor presence.
pub const RGB_SENSOR_OFFSET: usize = 174;
/// IMU presence.
pub const IMU_SENSOR_OFFSET: usize = 178;
/// Lock status.
pub const LOCK_STATUS_OFFSET: usize = 216;

/// BMI055 accelerometer chip ID.
pub const BMI055_ACC_ID: u8 = 0xFA;
/// BMI085 accelerometer chip ID.
pub const BMI085_ACC_ID: u8 = 0x1F;

/// Byte value of an unprogrammed EEPROM cell.
pub const EEPROM_UNREADY: u8 = 0xFF;

/// Offset/length pair of one identity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Byte offset.
    pub offset: usize,
    /// Byte length.
    pub len: usize,
}

impl Field {
    const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// Slice this field out of `block`.
    pub fn read<'a>(&self, block: &'a [u8], name: &str) -> Result<&'a [u8]> {
        block
            .get(self.offset..self.offset + self.len)
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "identity block of {} bytes has no {name} at {}+{}",
                    block.len(),
                    self.offset,
                    self.len
                ))
            })
    }
}

/// Family-specific serial number fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialLayout {
    /// Optic (module) serial.
    pub optic: Field,
    /// ASIC serial.
    pub asic: Field,
}

impl SerialLayout {
    /// Serial fields of `family`.
    pub fn for_family(family: DeviceFamily) -> Self {
        match family {
            DeviceFamily::Legacy => Self {
                optic: Field::new(MODULE_SERIAL_OFFSET, 6),
                asic: Field::new(ASIC_SERIAL_OFFSET, 6),
            },
            // Both serials come from the module serial on this family
            DeviceFamily::Stream => Self {
                optic: Field::new(MODULE_SERIAL_OFFSET, 32),
                asic: Field::new(MODULE_SERIAL_OFFSET, 32),
            },
        }
    }
}

/// Four-part firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FirmwareVersion {
    /// Major.
    pub major: u8,
    /// Minor.
    pub minor: u8,
    /// Patch.
    pub patch: u8,
    /// Build.
    pub build: u8,
}

impl FirmwareVersion {
    /// Decode the four on-device bytes, most significant last.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            major: bytes[3],
            minor: bytes[2],
            patch: bytes[1],
            build: bytes[0],
        }
    }

    /// Parse a dotted version such as `5.12.7.100`.
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.trim().split('.').collect();
        if parts.len() != 4 {
            return Err(Error::Protocol(format!("malformed firmware version '{text}'")));
        }

        let mut numbers = [0u8; 4];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| Error::Protocol(format!("malformed firmware version '{text}'")))?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            build: numbers[3],
        })
    }

    fn key(&self) -> [u8; 4] {
        [self.major, self.minor, self.patch, self.build]
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.build
        )
    }
}

/// IMU variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ImuChip {
    /// Bosch BMI055.
    Bmi055,
    /// Bosch BMI085.
    Bmi085,
    /// Unrecognized accelerometer chip ID.
    Unknown(u8),
}

/// Depth sensor shutter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ShutterType {
    /// Rolling shutter.
    Rolling,
    /// Global shutter.
    Global,
    /// Not reported.
    Unknown(u8),
}

/// Hardware capabilities advertised by the identity block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Capabilities {
    /// Active IR projector.
    pub active_projector: bool,
    /// Color sensor.
    pub rgb_sensor: bool,
    /// IMU, with its variant.
    pub imu: Option<ImuChip>,
    /// Fisheye sensor.
    pub fisheye_sensor: bool,
    /// Depth shutter type.
    pub shutter: ShutterType,
}

/// Decoded identity block.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Identity {
    /// Running firmware.
    pub firmware_version: FirmwareVersion,
    /// Optic (module) serial, uppercase hex.
    pub optic_serial: String,
    /// ASIC serial, uppercase hex.
    pub asic_serial: String,
    /// Capabilities.
    pub capabilities: Capabilities,
    /// Flash writes are locked.
    pub locked: bool,
}

fn byte(block: &[u8], offset: usize, name: &str) -> Result<u8> {
    Ok(Field::new(offset, 1).read(block, name)?[0])
}

fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect()
}

impl Identity {
    /// Decode a block read from a device of `family`.
    pub fn decode(block: &[u8], family: DeviceFamily) -> Result<Self> {
        let version = Field::new(FW_VERSION_OFFSET, 4).read(block, "firmware version")?;
        let firmware_version =
            FirmwareVersion::from_bytes([version[0], version[1], version[2], version[3]]);

        let serials = SerialLayout::for_family(family);
        let optic_serial = hex_string(serials.optic.read(block, "optic serial")?);
        let asic_serial = hex_string(serials.asic.read(block, "ASIC serial")?);

        Ok(Self {
            firmware_version,
            optic_serial,
            asic_serial,
            capabilities: Capabilities::decode(block)?,
            locked: byte(block, LOCK_STATUS_OFFSET, "lock status")? != 0,
        })
    }
}

impl Capabilities {
    /// Decode the capability bytes.
    pub fn decode(block: &[u8]) -> Result<Self> {
        let imu = if byte(block, IMU_SENSOR_OFFSET, "IMU sensor")? != 0 {
            Some(match byte(block, IMU_ACC_CHIP_ID_OFFSET, "IMU chip ID")? {
                BMI055_ACC_ID => ImuChip::Bmi055,
                BMI085_ACC_ID => ImuChip::Bmi085,
                other => ImuChip::Unknown(other),
            })
        } else {
            None
        };

        let fisheye = byte(block, FISHEYE_LB_OFFSET, "fisheye sensor")?
            & byte(block, FISHEYE_HB_OFFSET, "fisheye sensor")?;

        let shutter = match byte(block, DEPTH_SENSOR_TYPE_OFFSET, "depth sensor type")? {
            1 => ShutterType::Rolling,
            2 => ShutterType::Global,
            other => ShutterType::Unknown(other),
        };

        Ok(Self {
            active_projector: byte(block, ACTIVE_PROJECTOR_OFFSET, "active projector")? != 0,
            rgb_sensor: byte(block, RGB_SENSOR_OFFSET, "RGB sensor")? != 0,
            imu,
            fisheye_sensor: fisheye != 0xFF,
            shutter,
        })
    }
}

/// Whether the serial EEPROM has been read out yet.
///
/// Stream-family devices report `0xFF` at the serial offset until then.
pub fn serial_ready(block: &[u8], family: DeviceFamily) -> bool {
    let serials = SerialLayout::for_family(family);
    block
        .get(serials.optic.offset)
        .is_some_and(|&b| b != EEPROM_UNREADY)
}

/// Firmware version embedded in a flash image, right after its info header.
pub fn image_firmware_version(image: &[u8], layout: &FlashLayout) -> Result<FirmwareVersion> {
    let at = layout.header_offset as usize + INFO_HEADER_SIZE;
    let bytes = image
        .get(at..at + 4)
        .ok_or_else(|| Error::InvalidImage(format!("no firmware version at {at:#x}")))?;
    Ok(FirmwareVersion::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Whether `image` carries firmware new enough for `family`.
pub fn check_firmware_compatibility(
    image: &[u8],
    layout: &FlashLayout,
    family: DeviceFamily,
) -> Result<bool> {
    let version = image_firmware_version(image, layout)?;
    let minimum = FirmwareVersion::parse(family.minimum_firmware())?;
    Ok(version >= minimum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Vec<u8> {
        let mut block = vec![0u8; IDENTITY_BLOCK_SIZE];
        block[FW_VERSION_OFFSET..FW_VERSION_OFFSET + 4].copy_from_slice(&[100, 7, 12, 5]);
        block[MODULE_SERIAL_OFFSET..MODULE_SERIAL_OFFSET + 6]
            .copy_from_slice(&[0x84, 0x31, 0x22, 0x0A, 0xBC, 0x01]);
        block[ASIC_SERIAL_OFFSET..ASIC_SERIAL_OFFSET + 6]
            .copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        block[FISHEYE_LB_OFFSET] = 0xFF;
        block[FISHEYE_HB_OFFSET] = 0xFF;
        block[IMU_SENSOR_OFFSET] = 1;
        block[IMU_ACC_CHIP_ID_OFFSET] = BMI085_ACC_ID;
        block[DEPTH_SENSOR_TYPE_OFFSET] = 2;
        block[ACTIVE_PROJECTOR_OFFSET] = 1;
        block
    }

    #[test]
    fn test_decode_legacy_block() {
        let identity = Identity::decode(&block(), DeviceFamily::Legacy).unwrap();
        assert_eq!(identity.firmware_version.to_string(), "5.12.7.100");
        assert_eq!(identity.optic_serial, "8431220ABC01");
        assert_eq!(identity.asic_serial, "001122334455");
        assert!(!identity.locked);

        let caps = identity.capabilities;
        assert!(caps.active_projector);
        assert!(!caps.rgb_sensor);
        assert_eq!(caps.imu, Some(ImuChip::Bmi085));
        assert!(!caps.fisheye_sensor);
        assert_eq!(caps.shutter, ShutterType::Global);
    }

    #[test]
    fn test_stream_family_uses_module_serial_twice() {
        let identity = Identity::decode(&block(), DeviceFamily::Stream).unwrap();
        assert_eq!(identity.optic_serial.len(), 64);
        assert_eq!(identity.optic_serial, identity.asic_serial);
        assert!(identity.optic_serial.starts_with("8431220ABC01"));
    }

    #[test]
    fn test_truncated_block_is_protocol_error() {
        let block = block();
        let err = Identity::decode(&block[..200], DeviceFamily::Legacy).unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.contains("lock status")));
        assert!(Identity::decode(&block[..10], DeviceFamily::Legacy).is_err());
    }

    #[test]
    fn test_serial_ready() {
        let mut block = block();
        assert!(serial_ready(&block, DeviceFamily::Stream));
        block[MODULE_SERIAL_OFFSET] = EEPROM_UNREADY;
        assert!(!serial_ready(&block, DeviceFamily::Stream));
    }

    #[test]
    fn test_version_ordering() {
        let a = FirmwareVersion::parse("5.8.15.0").unwrap();
        let b = FirmwareVersion::parse("5.12.7.100").unwrap();
        assert!(a < b);
        assert!(FirmwareVersion::parse("5.12").is_err());
        assert!(FirmwareVersion::parse("5.x.1.0").is_err());
    }

    #[test]
    fn test_image_compatibility() {
        let layout = FlashLayout::default();
        let mut image = vec![0u8; layout.flash_size as usize];
        let at = layout.header_offset as usize + INFO_HEADER_SIZE;

        image[at..at + 4].copy_from_slice(&[0, 0, 9, 5]);
        assert!(check_firmware_compatibility(&image, &layout, DeviceFamily::Legacy).unwrap());

        image[at..at + 4].copy_from_slice(&[0, 0, 1, 5]);
        assert!(!check_firmware_compatibility(&image, &layout, DeviceFamily::Legacy).unwrap());
    }
}
