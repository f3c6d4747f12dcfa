//! Legacy update orchestration.

use crate::error::{Error, Result};
use crate::image::flash::{FlashImageInfo, FlashSection, SectionKind};
use crate::image::layout::FlashLayout;
use crate::image::merge::merge;
use crate::port::Channel;
use crate::progress::Progress;
use crate::target::legacy::backup::{BackupConfig, backup_flash};
use crate::target::legacy::writer::write_range;
use crate::target::{DeviceFamily, FlashUpdater, UpdateMode, update_session};
use crate::transport::CommandTransport;
use log::info;

/// Sector erase/write updater.
pub struct LegacyUpdater<'a, C: Channel> {
    transport: &'a CommandTransport<C>,
    layout: &'a FlashLayout,
    backup: &'a BackupConfig,
}

impl<'a, C: Channel> LegacyUpdater<'a, C> {
    /// Create an updater over a transport.
    pub fn new(
        transport: &'a CommandTransport<C>,
        layout: &'a FlashLayout,
        backup: &'a BackupConfig,
    ) -> Self {
        Self {
            transport,
            layout,
            backup,
        }
    }

    /// Write `image` to flash in the given mode.
    ///
    /// The image must be exactly `flash_size` bytes. Flash programming is not
    /// transactional: a failure part-way leaves whatever the last write
    /// produced, and the device is reset either way.
    pub fn update_flash(
        &self,
        image: &[u8],
        mode: UpdateMode,
        progress: &mut Progress<'_>,
    ) -> Result<()> {
        if !DeviceFamily::Legacy.supports(mode) {
            return Err(Error::InvalidMode(mode.raw()));
        }
        if image.len() != self.layout.flash_size as usize {
            return Err(Error::InvalidImage(format!(
                "image is {} bytes, flash is {}",
                image.len(),
                self.layout.flash_size
            )));
        }

        // Partial modes need a parseable image before anything is erased
        let image_info = match mode {
            UpdateMode::Full => None,
            _ => Some(FlashImageInfo::parse(image, self.layout)?),
        };

        info!("Updating flash ({mode} mode)");
        update_session(self.transport, progress, |progress| match image_info {
            None => write_range(
                self.transport,
                self.layout,
                image,
                0,
                self.layout.flash_size,
                progress,
                0.0,
                1.0,
            ),
            Some(info) => self.update_sections(image, &info, mode, progress),
        })
    }

    fn update_sections(
        &self,
        image: &[u8],
        image_info: &FlashImageInfo,
        mode: UpdateMode,
        progress: &mut Progress<'_>,
    ) -> Result<()> {
        let backup = backup_flash(self.transport, self.layout, self.backup, &mut Progress::none())?;
        let backup_info = FlashImageInfo::parse(&backup, self.layout)?;

        let sections: &[SectionKind] = if mode == UpdateMode::ReadOnly {
            &[SectionKind::ReadWrite, SectionKind::ReadOnly]
        } else {
            &[SectionKind::ReadWrite]
        };

        let merged = merge(
            &backup,
            &backup_info,
            image,
            image_info,
            sections,
            &self.layout.preserved_tables,
        )?;

        let span = 1.0 / sections.len() as f32;
        for (i, &kind) in sections.iter().enumerate() {
            info!("Writing {kind} section");
            self.update_section(
                &merged,
                image_info.section(kind),
                progress,
                i as f32 * span,
                span,
            )?;
        }

        Ok(())
    }

    /// Write one section's application blob and tables region, with
    /// progress weighted by their sizes.
    fn update_section(
        &self,
        merged: &[u8],
        section: &FlashSection,
        progress: &mut Progress<'_>,
        base: f32,
        span: f32,
    ) -> Result<()> {
        let tables_size = section.tables_size();
        let total = (section.app_size + tables_size) as f32;
        let app_span = if total > 0.0 {
            section.app_size as f32 / total * span
        } else {
            0.0
        };
        let tables_span = span - app_span;

        write_range(
            self.transport,
            self.layout,
            merged,
            section.offset,
            section.app_size,
            progress,
            base,
            app_span,
        )?;
        write_range(
            self.transport,
            self.layout,
            merged,
            section.first_table_offset(),
            tables_size,
            progress,
            base + app_span,
            tables_span,
        )
    }
}

impl<C: Channel> FlashUpdater for LegacyUpdater<'_, C> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Legacy
    }

    fn update_flash(
        &self,
        image: &[u8],
        mode: UpdateMode,
        progress: &mut Progress<'_>,
    ) -> Result<()> {
        LegacyUpdater::update_flash(self, image, mode, progress)
    }
}
