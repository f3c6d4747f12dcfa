//! Offline image commands: info and merge.

use {
    crate::{Cli, CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    depthflash::{
        FlashImageInfo, FlashLayout, SectionKind, identity::image_firmware_version, merge,
    },
    std::{fs, path::Path},
};

fn read_image(path: &Path, layout: &FlashLayout) -> Result<(Vec<u8>, FlashImageInfo)> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let info = FlashImageInfo::parse(&data, layout)
        .with_context(|| format!("{} is not a valid flash image", path.display()))?;
    Ok((data, info))
}

/// Info command implementation.
pub(crate) fn cmd_info(_cli: &Cli, config: &Config, path: &Path, json: bool) -> Result<()> {
    let layout = config.layout();
    let (data, info) = read_image(path, &layout)?;
    let version = image_firmware_version(&data, &layout)?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "size": data.len(),
                "firmware_version": version.to_string(),
                "image": info,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Flash image").bold().underlined());
    eprintln!("  File: {}", path.display());
    eprintln!("  Size: {} bytes", data.len());
    eprintln!("  Code: {:#010X}", info.header.code);
    eprintln!("  Firmware: {version}");

    for section in info.sections() {
        eprintln!(
            "\n{}",
            style(format!("{} section", section.kind)).bold()
        );
        eprintln!(
            "  Range: 0x{:06X}..0x{:06X} ({} bytes)",
            section.offset,
            section.end(),
            section.size
        );
        eprintln!("  Application: {} bytes", section.app_size);
        for table in &section.tables {
            let crc = if table.crc_ok {
                style("CRC OK").green()
            } else {
                style("CRC MISMATCH").red()
            };
            eprintln!(
                "    {} type 0x{:04X} v{} @ 0x{:06X} ({} bytes) {}",
                style("•").dim(),
                table.table_type,
                table.version,
                table.offset,
                table.size,
                crc
            );
        }
    }

    Ok(())
}

/// Merge command implementation.
pub(crate) fn cmd_merge(
    cli: &Cli,
    config: &Config,
    backup_path: &Path,
    image_path: &Path,
    output: &Path,
    read_only: bool,
) -> Result<()> {
    let layout = config.layout();
    layout
        .validate()
        .map_err(|e| CliError::Usage(e.to_string()))?;

    let (backup, backup_info) = read_image(backup_path, &layout)?;
    let (image, image_info) = read_image(image_path, &layout)?;

    let sections: &[SectionKind] = if read_only {
        &[SectionKind::ReadWrite, SectionKind::ReadOnly]
    } else {
        &[SectionKind::ReadWrite]
    };

    let merged = merge(
        &backup,
        &backup_info,
        &image,
        &image_info,
        sections,
        &layout.preserved_tables,
    )?;
    fs::write(output, &merged).with_context(|| format!("failed to write {}", output.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Merged {} section(s) into {} ({} bytes)",
            style("✓").green(),
            sections.len(),
            output.display(),
            merged.len()
        );
    }
    Ok(())
}
