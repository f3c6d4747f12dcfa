//! Flash image model.
//!
//! A flash image (a firmware file or a live backup) has two sections, each
//! an application blob followed by metadata tables:
//!
//! ```text
//! +---------------------+  read_write_start_address
//! |   RW application    |
//! +---------------------+  first RW table
//! |   RW tables + TOC   |
//! +---------------------+  read_only_start_address
//! |   RO application    |
//! +---------------------+  first RO table
//! | RO tables, TOC, hdr |
//! +---------------------+
//! ```
//!
//! The info header sits at a fixed offset. Each section's table of contents
//! is itself a table whose data is a list of `{type: u16, offset_256: u16}`
//! links. Every table starts with a 16-byte header:
//!
//! ```text
//! +--------+---------+--------+----------+--------+
//! |  type  | version |  size  | reserved | crc32  |
//! +--------+---------+--------+----------+--------+
//! | u16 LE |  u16 LE | u32 LE |  u32 LE  | u32 LE |
//! +--------+---------+--------+----------+--------+
//! ```

use crate::error::{Error, Result};
use crate::image::layout::FlashLayout;
use byteorder::{ByteOrder, LittleEndian};
use crc::{CRC_32_ISO_HDLC, Crc};
use log::debug;
use std::fmt;

/// CRC used by table headers.
pub const TABLE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Size of a table header.
pub const TABLE_HEADER_SIZE: usize = 16;

/// Size of the info header.
pub const INFO_HEADER_SIZE: usize = 20;

/// Size of one TOC link.
pub const TOC_LINK_SIZE: usize = 4;

/// Link type marking an unused TOC slot.
pub const UNUSED_TABLE_TYPE: u16 = 0xFFFF;

/// Which section of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SectionKind {
    /// User-updatable section (configuration, calibration).
    ReadWrite,
    /// Factory section (firmware).
    ReadOnly,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadWrite => write!(f, "read-write"),
            Self::ReadOnly => write!(f, "read-only"),
        }
    }
}

/// Fixed info header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InfoHeader {
    /// Image code.
    pub code: u32,
    /// Start of the read-write section.
    pub read_write_start_address: u32,
    /// Size of the read-write section.
    pub read_write_size: u32,
    /// Start of the read-only section.
    pub read_only_start_address: u32,
    /// Size of the read-only section.
    pub read_only_size: u32,
}

impl InfoHeader {
    /// Decode the header from its 20 bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < INFO_HEADER_SIZE {
            return Err(Error::Protocol(format!(
                "info header needs {INFO_HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }

        Ok(Self {
            code: LittleEndian::read_u32(&data[0..4]),
            read_write_start_address: LittleEndian::read_u32(&data[4..8]),
            read_write_size: LittleEndian::read_u32(&data[8..12]),
            read_only_start_address: LittleEndian::read_u32(&data[12..16]),
            read_only_size: LittleEndian::read_u32(&data[16..20]),
        })
    }

    /// Byte range `(start, size)` of a section.
    pub fn section_range(&self, kind: SectionKind) -> (u32, u32) {
        match kind {
            SectionKind::ReadWrite => (self.read_write_start_address, self.read_write_size),
            SectionKind::ReadOnly => (self.read_only_start_address, self.read_only_size),
        }
    }
}

/// One metadata table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlashTable {
    /// Absolute offset of the table header.
    pub offset: u32,
    /// Header plus data size.
    pub size: u32,
    /// Table type.
    pub table_type: u16,
    /// Table version.
    pub version: u16,
    /// CRC32 from the header.
    pub crc32: u32,
    /// Whether the data matches `crc32`.
    pub crc_ok: bool,
}

impl FlashTable {
    /// One past the last byte.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

/// Application blob plus tables.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlashSection {
    /// Which section this is.
    pub kind: SectionKind,
    /// Start of the application blob (and of the section).
    pub offset: u32,
    /// Section size from the info header.
    pub size: u32,
    /// Application blob length.
    pub app_size: u32,
    /// Tables, sorted by offset. Never empty; the TOC is one of them.
    pub tables: Vec<FlashTable>,
}

impl FlashSection {
    /// One past the last byte of the section.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Start of the tables region.
    pub fn first_table_offset(&self) -> u32 {
        self.tables
            .first()
            .map_or(self.end(), |t| t.offset)
    }

    /// Distance from the first table to the end of the section.
    pub fn tables_size(&self) -> u32 {
        self.end() - self.first_table_offset()
    }

    /// Find a table by type.
    pub fn table(&self, table_type: u16) -> Option<&FlashTable> {
        self.tables
            .iter()
            .find(|t| t.table_type == table_type)
    }
}

/// Parsed layout of one flash image.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlashImageInfo {
    /// Info header.
    pub header: InfoHeader,
    /// Read-write section.
    pub read_write_section: FlashSection,
    /// Read-only section.
    pub read_only_section: FlashSection,
}

impl FlashImageInfo {
    /// Parse an image according to `layout`.
    ///
    /// Every offset and size is checked against the buffer.
    pub fn parse(image: &[u8], layout: &FlashLayout) -> Result<Self> {
        let header_at = layout.header_offset as usize;
        let header_bytes = image
            .get(header_at..header_at + INFO_HEADER_SIZE)
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "image of {} bytes has no info header at {header_at:#x}",
                    image.len()
                ))
            })?;
        let header = InfoHeader::parse(header_bytes)?;
        debug!("Image code {:#010x}", header.code);

        let read_write_section =
            parse_section(image, &header, SectionKind::ReadWrite, layout.rw_toc_offset)?;
        let read_only_section =
            parse_section(image, &header, SectionKind::ReadOnly, layout.ro_toc_offset)?;

        Ok(Self {
            header,
            read_write_section,
            read_only_section,
        })
    }

    /// Section by kind.
    pub fn section(&self, kind: SectionKind) -> &FlashSection {
        match kind {
            SectionKind::ReadWrite => &self.read_write_section,
            SectionKind::ReadOnly => &self.read_only_section,
        }
    }

    /// Both sections, read-write first.
    pub fn sections(&self) -> [&FlashSection; 2] {
        [&self.read_write_section, &self.read_only_section]
    }
}

struct TableHeader {
    table_type: u16,
    version: u16,
    size: u32,
    crc32: u32,
}

fn read_table_header(image: &[u8], offset: u32, section_end: u32) -> Result<TableHeader> {
    let at = offset as usize;
    if at + TABLE_HEADER_SIZE > section_end as usize {
        return Err(Error::Protocol(format!(
            "table header at {offset:#x} runs past section end {section_end:#x}"
        )));
    }

    let raw = &image[at..at + TABLE_HEADER_SIZE];
    Ok(TableHeader {
        table_type: LittleEndian::read_u16(&raw[0..2]),
        version: LittleEndian::read_u16(&raw[2..4]),
        size: LittleEndian::read_u32(&raw[4..8]),
        crc32: LittleEndian::read_u32(&raw[12..16]),
    })
}

fn read_table(image: &[u8], offset: u32, section_end: u32) -> Result<FlashTable> {
    let header = read_table_header(image, offset, section_end)?;

    let data_start = offset as u64 + TABLE_HEADER_SIZE as u64;
    let data_end = data_start + u64::from(header.size);
    if data_end > u64::from(section_end) {
        return Err(Error::Protocol(format!(
            "table {:#06x} at {offset:#x} with {} data bytes runs past section end {section_end:#x}",
            header.table_type, header.size
        )));
    }

    let data = &image[data_start as usize..data_end as usize];
    let crc_ok = TABLE_CRC.checksum(data) == header.crc32;
    if !crc_ok {
        debug!(
            "Table {:#06x} at {offset:#x}: CRC mismatch",
            header.table_type
        );
    }

    Ok(FlashTable {
        offset,
        size: TABLE_HEADER_SIZE as u32 + header.size,
        table_type: header.table_type,
        version: header.version,
        crc32: header.crc32,
        crc_ok,
    })
}

fn parse_section(
    image: &[u8],
    header: &InfoHeader,
    kind: SectionKind,
    toc_offset: u32,
) -> Result<FlashSection> {
    let (start, size) = header.section_range(kind);
    let end = u64::from(start) + u64::from(size);
    if end > image.len() as u64 {
        return Err(Error::Protocol(format!(
            "{kind} section {start:#x}+{size:#x} exceeds image of {} bytes",
            image.len()
        )));
    }
    let end = end as u32;

    if toc_offset < start || toc_offset >= end {
        return Err(Error::Protocol(format!(
            "{kind} TOC at {toc_offset:#x} is outside its section {start:#x}..{end:#x}"
        )));
    }

    let toc = read_table(image, toc_offset, end)?;
    let links_start = (toc_offset as usize) + TABLE_HEADER_SIZE;
    let links = &image[links_start..toc.end() as usize];

    let mut tables = vec![toc];
    for link in links.chunks_exact(TOC_LINK_SIZE) {
        let table_type = LittleEndian::read_u16(&link[0..2]);
        let offset_256 = LittleEndian::read_u16(&link[2..4]);
        if table_type == UNUSED_TABLE_TYPE || offset_256 == 0 {
            continue;
        }

        let offset = u32::from(offset_256) << 8;
        if offset < start || offset >= end {
            return Err(Error::Protocol(format!(
                "{kind} table {table_type:#06x} at {offset:#x} is outside its section"
            )));
        }
        tables.push(read_table(image, offset, end)?);
    }

    tables.sort_by_key(|t| t.offset);

    let app_size = tables[0].offset - start;
    debug!(
        "{kind} section: {start:#x}+{size:#x}, app {app_size:#x}, {} tables",
        tables.len()
    );

    Ok(FlashSection {
        kind,
        offset: start,
        size,
        app_size,
        tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::fixture::{self, CALIBRATION_TABLE, RW_CALIBRATION_OFFSET};

    #[test]
    fn test_parse_fixture() {
        let layout = FlashLayout::default();
        let image = fixture::image(1);
        let info = FlashImageInfo::parse(&image, &layout).unwrap();

        assert_eq!(info.header.read_write_start_address, fixture::RW_START);
        let rw = &info.read_write_section;
        assert_eq!(rw.offset, fixture::RW_START);
        assert_eq!(rw.first_table_offset(), RW_CALIBRATION_OFFSET);
        assert_eq!(rw.app_size, RW_CALIBRATION_OFFSET - fixture::RW_START);
        assert_eq!(rw.tables_size(), rw.end() - RW_CALIBRATION_OFFSET);
        // calibration, config, TOC
        assert_eq!(rw.tables.len(), 3);
        assert!(rw.tables.windows(2).all(|w| w[0].offset < w[1].offset));
        assert!(rw.tables.iter().all(|t| t.crc_ok));

        let cal = rw.table(CALIBRATION_TABLE).unwrap();
        assert_eq!(cal.offset, RW_CALIBRATION_OFFSET);
        assert_eq!(cal.size, TABLE_HEADER_SIZE as u32 + fixture::CALIBRATION_LEN);

        let ro = &info.read_only_section;
        assert_eq!(ro.end(), layout.flash_size);
        assert_eq!(ro.tables.len(), 2);
    }

    #[test]
    fn test_crc_mismatch_is_reported_not_fatal() {
        let mut image = fixture::image(1);
        image[RW_CALIBRATION_OFFSET as usize + TABLE_HEADER_SIZE] ^= 0xFF;

        let info = FlashImageInfo::parse(&image, &FlashLayout::default()).unwrap();
        let cal = info
            .read_write_section
            .table(CALIBRATION_TABLE)
            .unwrap();
        assert!(!cal.crc_ok);
    }

    #[test]
    fn test_truncated_image_rejected() {
        let image = fixture::image(1);
        let err = FlashImageInfo::parse(&image[..0x1F_0000], &FlashLayout::default()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_table_past_section_end_rejected() {
        let mut image = fixture::image(1);
        // Blow up the calibration table's declared size
        let size_at = RW_CALIBRATION_OFFSET as usize + 4;
        image[size_at..size_at + 4].copy_from_slice(&0x0100_0000u32.to_le_bytes());

        let err = FlashImageInfo::parse(&image, &FlashLayout::default()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_section_outside_image_rejected() {
        let mut image = fixture::image(1);
        let header_at = FlashLayout::default().header_offset as usize;
        image[header_at + 8..header_at + 12].copy_from_slice(&0x0100_0000u32.to_le_bytes());

        let err = FlashImageInfo::parse(&image, &FlashLayout::default()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
