//! Flash geometry and layout constants.

use crate::error::{Error, Result};
use crate::protocol::command::{MAX_PAYLOAD, MAX_RESPONSE_DATA};

/// Total flash size of the legacy family (2 MiB).
pub const DEFAULT_FLASH_SIZE: u32 = 1024 * 2048;

/// Smallest erasable unit.
pub const DEFAULT_SECTOR_SIZE: u32 = 4096;

/// Bytes requested per FRB during backup.
pub const DEFAULT_READ_CHUNK_SIZE: u32 = 1016;

/// Offset of the image info header.
pub const DEFAULT_HEADER_OFFSET: u32 = 0x1F_FF00;

/// Offset of the read-write section's table of contents.
pub const DEFAULT_RW_TOC_OFFSET: u32 = 0x17_FE00;

/// Offset of the read-only section's table of contents.
pub const DEFAULT_RO_TOC_OFFSET: u32 = 0x1F_FD00;

/// Flash geometry of one device family.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FlashLayout {
    /// Total flash size in bytes.
    pub flash_size: u32,
    /// Erase sector size in bytes.
    pub sector_size: u32,
    /// Bytes per backup read.
    pub read_chunk_size: u32,
    /// Largest FWB payload.
    pub max_packet_size: u32,
    /// Offset of the info header.
    pub header_offset: u32,
    /// Offset of the read-write TOC.
    pub rw_toc_offset: u32,
    /// Offset of the read-only TOC.
    pub ro_toc_offset: u32,
    /// Table types carried over from the backup when merging.
    pub preserved_tables: Vec<u16>,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            flash_size: DEFAULT_FLASH_SIZE,
            sector_size: DEFAULT_SECTOR_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_packet_size: MAX_PAYLOAD as u32,
            header_offset: DEFAULT_HEADER_OFFSET,
            rw_toc_offset: DEFAULT_RW_TOC_OFFSET,
            ro_toc_offset: DEFAULT_RO_TOC_OFFSET,
            preserved_tables: Vec::new(),
        }
    }
}

impl FlashLayout {
    /// Set the flash size.
    #[must_use]
    pub fn with_flash_size(mut self, size: u32) -> Self {
        self.flash_size = size;
        self
    }

    /// Set the sector size.
    #[must_use]
    pub fn with_sector_size(mut self, size: u32) -> Self {
        self.sector_size = size;
        self
    }

    /// Set the backup read chunk size.
    #[must_use]
    pub fn with_read_chunk_size(mut self, size: u32) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Set the largest write packet.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set the header and TOC offsets.
    #[must_use]
    pub fn with_offsets(mut self, header: u32, rw_toc: u32, ro_toc: u32) -> Self {
        self.header_offset = header;
        self.rw_toc_offset = rw_toc;
        self.ro_toc_offset = ro_toc;
        self
    }

    /// Set the table types preserved across merges.
    #[must_use]
    pub fn with_preserved_tables(mut self, types: impl Into<Vec<u16>>) -> Self {
        self.preserved_tables = types.into();
        self
    }

    /// Number of backup reads needed to cover the flash.
    pub fn read_chunk_count(&self) -> u32 {
        self.flash_size.div_ceil(self.read_chunk_size.max(1))
    }

    /// Check that the geometry is usable.
    pub fn validate(&self) -> Result<()> {
        if self.flash_size == 0 {
            return Err(Error::Config("flash_size must be non-zero".into()));
        }
        if self.sector_size == 0 || self.flash_size % self.sector_size != 0 {
            return Err(Error::Config(format!(
                "sector_size {} must be non-zero and divide flash_size {}",
                self.sector_size, self.flash_size
            )));
        }
        if self.read_chunk_size == 0 || self.read_chunk_size as usize >= MAX_RESPONSE_DATA {
            return Err(Error::Config(format!(
                "read_chunk_size {} must be in 1..{MAX_RESPONSE_DATA}",
                self.read_chunk_size
            )));
        }
        if self.max_packet_size == 0 || self.max_packet_size as usize > MAX_PAYLOAD {
            return Err(Error::Config(format!(
                "max_packet_size {} must be in 1..={MAX_PAYLOAD}",
                self.max_packet_size
            )));
        }

        for (name, offset) in [
            ("header_offset", self.header_offset),
            ("rw_toc_offset", self.rw_toc_offset),
            ("ro_toc_offset", self.ro_toc_offset),
        ] {
            if offset >= self.flash_size {
                return Err(Error::Config(format!(
                    "{name} {offset:#x} lies outside the {:#x}-byte flash",
                    self.flash_size
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let layout = FlashLayout::default();
        layout.validate().unwrap();
        assert_eq!(layout.flash_size, 2_097_152);
        assert_eq!(layout.read_chunk_count(), 2065);
    }

    #[test]
    fn test_chunk_must_fit_response() {
        let layout = FlashLayout::default().with_read_chunk_size(1020);
        assert!(matches!(layout.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_sector_must_divide_flash() {
        let layout = FlashLayout::default().with_sector_size(3000);
        assert!(matches!(layout.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_offsets_inside_flash() {
        let layout = FlashLayout::default().with_flash_size(0x10_0000);
        assert!(matches!(layout.validate(), Err(Error::Config(_))));
    }
}
