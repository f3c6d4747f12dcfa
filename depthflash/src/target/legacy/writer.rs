//! Sector-granular erase-then-write.

use crate::check_interrupted;
use crate::error::{Error, Result};
use crate::image::layout::FlashLayout;
use crate::port::Channel;
use crate::progress::Progress;
use crate::protocol::command::{Command, Opcode};
use crate::transport::CommandTransport;
use log::debug;

/// Sectors touched by `[offset, offset + size)`, as a half-open index range.
pub fn sector_span(offset: u32, size: u32, sector_size: u32) -> std::ops::Range<u32> {
    if size == 0 {
        return 0..0;
    }
    let first = offset / sector_size;
    let end = (u64::from(offset) + u64::from(size)).div_ceil(u64::from(sector_size)) as u32;
    first..end
}

/// Program `image[offset..offset + size]` into flash.
///
/// Every touched sector is erased (FES) and then written from its start in
/// FWB packets of at most `max_packet_size` bytes, stopping at
/// `offset + size`. Bytes of the first sector before `offset` are rewritten
/// from `image` as well, so `image` must be the full merged buffer. Bytes of
/// the last sector past the range stay erased.
///
/// Both commands are fire-and-forget, but channel failures abort the write.
/// After each sector, progress moves to `base + done / total * span`.
#[allow(clippy::too_many_arguments)]
pub fn write_range<C: Channel>(
    transport: &CommandTransport<C>,
    layout: &FlashLayout,
    image: &[u8],
    offset: u32,
    size: u32,
    progress: &mut Progress<'_>,
    base: f32,
    span: f32,
) -> Result<()> {
    let end = u64::from(offset) + u64::from(size);
    if end > image.len() as u64 {
        return Err(Error::InvalidImage(format!(
            "range {offset:#x}+{size:#x} exceeds image of {} bytes",
            image.len()
        )));
    }
    let end = end as u32;

    let sector_size = layout.sector_size;
    let packet_size = layout.max_packet_size;
    let sectors = sector_span(offset, size, sector_size);
    let total = sectors.len();

    debug!(
        "Writing {offset:#x}..{end:#x}: sectors {}..{}",
        sectors.start, sectors.end
    );

    for (done, sector) in sectors.enumerate() {
        check_interrupted()?;

        transport.send(
            &Command::new(Opcode::Fes)
                .param1(sector)
                .param2(1)
                .without_response(),
        )?;

        let sector_start = sector * sector_size;
        let limit = (sector_start + sector_size).min(end);
        let mut index = sector_start;
        while index < limit {
            let len = packet_size.min(limit - index);
            let data = &image[index as usize..(index + len) as usize];
            transport.send(
                &Command::new(Opcode::Fwb)
                    .param1(index)
                    .param2(len)
                    .payload(data)
                    .without_response(),
            )?;
            index += len;
        }

        progress.report(base + (done + 1) as f32 / total as f32 * span);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::legacy::tests::FlashSim;

    fn layout(sector: u32) -> FlashLayout {
        FlashLayout::default()
            .with_flash_size(sector * 16)
            .with_sector_size(sector)
    }

    #[test]
    fn test_sector_span() {
        assert_eq!(sector_span(0, 4096, 4096), 0..1);
        assert_eq!(sector_span(100, 4096, 4096), 0..2);
        assert_eq!(sector_span(4096, 1, 4096), 1..2);
        assert_eq!(sector_span(4095, 2, 4096), 0..2);
        assert_eq!(sector_span(8192, 0, 4096), 0..0);
    }

    #[test]
    fn test_each_sector_erased_once_before_write() {
        for (offset, size) in [(0u32, 16_384u32), (1500, 3000), (4095, 2), (7000, 9000)] {
            let layout = layout(1024);
            let image: Vec<u8> = (0..layout.flash_size).map(|i| (i % 251) as u8).collect();
            let transport = CommandTransport::new(FlashSim::new(layout.flash_size as usize).sector_size(1024));

            write_range(&transport, &layout, &image, offset, size, &mut Progress::none(), 0.0, 1.0)
                .unwrap();

            let sim = transport.into_inner();
            let expected: Vec<u32> = sector_span(offset, size, 1024).collect();
            assert_eq!(sim.erases(), expected, "range {offset}+{size}");
            assert!(sim.violations().is_empty());

            // Requested range now matches the image
            let range = offset as usize..(offset + size) as usize;
            assert_eq!(&sim.flash()[range.clone()], &image[range]);
        }
    }

    #[test]
    fn test_packets_stop_at_range_end() {
        let layout = layout(4096);
        let image = vec![0x42; layout.flash_size as usize];
        let transport = CommandTransport::new(FlashSim::new(layout.flash_size as usize));

        write_range(&transport, &layout, &image, 4096, 2500, &mut Progress::none(), 0.0, 1.0).unwrap();

        let sim = transport.into_inner();
        assert_eq!(sim.writes(), vec![(4096, 1000), (5096, 1000), (6096, 500)]);
        // Tail of the sector stays erased
        assert!(sim.flash()[6596..8192].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_progress_is_weighted() {
        let layout = layout(1024);
        let image = vec![0; layout.flash_size as usize];
        let transport = CommandTransport::new(FlashSim::new(layout.flash_size as usize).sector_size(1024));

        let mut seen = Vec::new();
        let mut sink = |v: f32| seen.push(v);
        let mut progress = Progress::new(Some(&mut sink));
        write_range(&transport, &layout, &image, 0, 4096, &mut progress, 0.5, 0.5).unwrap();
        drop(progress);

        assert_eq!(seen, vec![0.625, 0.75, 0.875, 1.0]);
    }

    #[test]
    fn test_write_failure_surfaces() {
        let layout = layout(1024);
        let image = vec![0; layout.flash_size as usize];
        let mut sim = FlashSim::new(layout.flash_size as usize).sector_size(1024);
        sim.fail_writes_after(2);
        let transport = CommandTransport::new(sim);

        let err = write_range(&transport, &layout, &image, 0, 4096, &mut Progress::none(), 0.0, 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_range_outside_image_rejected() {
        let layout = layout(1024);
        let image = vec![0; 100];
        let transport = CommandTransport::new(FlashSim::new(layout.flash_size as usize));
        let err = write_range(&transport, &layout, &image, 0, 200, &mut Progress::none(), 0.0, 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
        assert!(transport.into_inner().erases().is_empty());
    }
}
