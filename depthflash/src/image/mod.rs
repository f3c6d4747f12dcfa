//! Flash image parsing and merging.

pub mod flash;
pub mod layout;
pub mod merge;

pub use flash::{FlashImageInfo, FlashSection, FlashTable, InfoHeader, SectionKind};
pub use layout::FlashLayout;
pub use merge::merge;

/// Synthetic images matching the default layout.
#[cfg(test)]
pub(crate) mod fixture {
    use super::flash::{INFO_HEADER_SIZE, TABLE_CRC, TABLE_HEADER_SIZE};
    use super::layout::FlashLayout;

    pub const RW_START: u32 = 0x10_0000;
    pub const RW_SIZE: u32 = 0x8_0000;
    pub const RO_START: u32 = 0x18_0000;
    pub const RO_SIZE: u32 = 0x8_0000;

    pub const CALIBRATION_TABLE: u16 = 0x00A0;
    pub const CALIBRATION_LEN: u32 = 256;
    pub const RW_CALIBRATION_OFFSET: u32 = 0x17_0000;

    pub const CONFIG_TABLE: u16 = 0x00B0;
    pub const RW_CONFIG_OFFSET: u32 = 0x17_1000;

    pub const FIRMWARE_TABLE: u16 = 0x00C0;
    pub const RO_FIRMWARE_OFFSET: u32 = 0x1F_0000;

    /// Firmware 5.8.15.0, stored right after the info header.
    pub const FIRMWARE_VERSION: [u8; 4] = [0, 15, 8, 5];

    fn put_table(image: &mut [u8], offset: u32, table_type: u16, data: &[u8]) {
        let at = offset as usize;
        image[at..at + 2].copy_from_slice(&table_type.to_le_bytes());
        image[at + 2..at + 4].copy_from_slice(&1u16.to_le_bytes());
        image[at + 4..at + 8].copy_from_slice(&(data.len() as u32).to_le_bytes());
        image[at + 8..at + 12].fill(0);
        image[at + 12..at + 16].copy_from_slice(&TABLE_CRC.checksum(data).to_le_bytes());
        image[at + TABLE_HEADER_SIZE..at + TABLE_HEADER_SIZE + data.len()].copy_from_slice(data);
    }

    fn put_toc(image: &mut [u8], offset: u32, links: &[(u16, u32)]) {
        let mut data = Vec::new();
        for &(table_type, table_offset) in links {
            data.extend_from_slice(&table_type.to_le_bytes());
            data.extend_from_slice(&((table_offset >> 8) as u16).to_le_bytes());
        }
        // One unused slot
        data.extend_from_slice(&[0xFF, 0xFF, 0, 0]);
        put_table(image, offset, 0xFFF0, &data);
    }

    fn pattern(seed: u8, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect()
    }

    /// Image with the calibration table at its usual offset.
    pub fn image(seed: u8) -> Vec<u8> {
        image_with_calibration_at(seed, RW_CALIBRATION_OFFSET)
    }

    /// Image whose read-write calibration table lives at `cal_offset`.
    pub fn image_with_calibration_at(seed: u8, cal_offset: u32) -> Vec<u8> {
        let layout = FlashLayout::default();
        let mut image = pattern(seed, layout.flash_size as usize);

        put_table(
            &mut image,
            cal_offset,
            CALIBRATION_TABLE,
            &pattern(seed ^ 0x5A, CALIBRATION_LEN as usize),
        );
        put_table(&mut image, RW_CONFIG_OFFSET, CONFIG_TABLE, &pattern(seed ^ 0x11, 64));
        put_toc(
            &mut image,
            layout.rw_toc_offset,
            &[(CALIBRATION_TABLE, cal_offset), (CONFIG_TABLE, RW_CONFIG_OFFSET)],
        );

        put_table(&mut image, RO_FIRMWARE_OFFSET, FIRMWARE_TABLE, &pattern(seed ^ 0x22, 128));
        put_toc(&mut image, layout.ro_toc_offset, &[(FIRMWARE_TABLE, RO_FIRMWARE_OFFSET)]);

        let header_at = layout.header_offset as usize;
        for (i, value) in [0x0000_D5D5, RW_START, RW_SIZE, RO_START, RO_SIZE]
            .into_iter()
            .enumerate()
        {
            let at = header_at + i * 4;
            image[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        let at = header_at + INFO_HEADER_SIZE;
        image[at..at + 4].copy_from_slice(&FIRMWARE_VERSION);

        image
    }
}
