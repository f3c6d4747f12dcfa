//! Image merging for partial updates.
//!
//! Updating one section still needs a full-size image: the merged buffer is
//! the single source of truth for every range the writer touches. It starts
//! as a copy of the device backup, and the updated sections are overwritten
//! with the candidate image's bytes.

use crate::error::{Error, Result};
use crate::image::flash::{FlashImageInfo, SectionKind};
use log::{debug, info, warn};

/// Build a full-size image from `backup` with `sections` taken from `image`.
///
/// Section ranges come from the candidate image's header. Table types in
/// `preserved_tables` that live in an updated section are copied back from
/// the backup to wherever the candidate layout places them, provided both
/// tables have the same size.
pub fn merge(
    backup: &[u8],
    backup_info: &FlashImageInfo,
    image: &[u8],
    image_info: &FlashImageInfo,
    sections: &[SectionKind],
    preserved_tables: &[u16],
) -> Result<Vec<u8>> {
    if backup.len() != image.len() {
        return Err(Error::InvalidImage(format!(
            "image is {} bytes but the device backup is {}",
            image.len(),
            backup.len()
        )));
    }

    let mut merged = backup.to_vec();

    for &kind in sections {
        let (start, size) = image_info.header.section_range(kind);
        let range = start as usize..(start as usize + size as usize);
        if range.end > image.len() {
            return Err(Error::Protocol(format!(
                "{kind} section {start:#x}+{size:#x} exceeds image"
            )));
        }
        debug!("Merging {kind} section {start:#x}+{size:#x}");
        merged[range.clone()].copy_from_slice(&image[range]);

        let section = image_info.section(kind);
        for &table_type in preserved_tables {
            let Some(target) = section.table(table_type) else {
                continue;
            };
            let Some(source) = backup_info
                .sections()
                .into_iter()
                .find_map(|s| s.table(table_type))
            else {
                warn!("Table {table_type:#06x} missing from device backup, using image copy");
                continue;
            };

            if source.size != target.size {
                warn!(
                    "Table {table_type:#06x} changed size ({} -> {} bytes), using image copy",
                    source.size, target.size
                );
                continue;
            }

            info!(
                "Preserving table {table_type:#06x} ({:#x} -> {:#x})",
                source.offset, target.offset
            );
            let from = source.offset as usize..source.end() as usize;
            let to = target.offset as usize..target.end() as usize;
            merged[to].copy_from_slice(&backup[from]);
        }
    }

    Ok(merged)
}
