//! Device commands: backup, update, identity, reset, enter-update, list-ports.

use {
    crate::{
        Cli, CliError,
        config::Config,
        progress_bar,
        serial::{SerialOptions, port_present, resolve_family, select_serial_port},
        was_interrupted,
    },
    anyhow::{Context, Result, bail},
    console::style,
    depthflash::{
        Device, DeviceFamily, DeviceOptions, EntryState, PortInfo, SerialChannel, SerialConfig,
        UpdateHost, UpdateMode,
        identity::{check_firmware_compatibility, image_firmware_version},
        port::list_ports,
    },
    dialoguer::{Confirm, theme::ColorfulTheme},
    std::{fs, path::Path},
};

const DEFAULT_BAUD: u32 = 115_200;

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Pick a port and resolve its device family without opening it.
fn select_target(cli: &Cli, config: &Config) -> Result<(PortInfo, DeviceFamily)> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    let port = select_serial_port(&options, config)?;
    let family = resolve_family(cli.family.map(Into::into), config, &port);
    Ok((port, family))
}

fn open_device_at(
    cli: &Cli,
    config: &Config,
    name: &str,
    family: DeviceFamily,
) -> Result<Device<SerialChannel>> {
    let baud = cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD);
    if !cli.quiet {
        eprintln!(
            "{} Using {name} ({family} family, {baud} baud)",
            style("→").cyan()
        );
    }

    let channel = SerialChannel::open(&SerialConfig::new(name, baud))
        .with_context(|| format!("failed to open {name}"))?;
    let options = DeviceOptions::default().with_layout(config.layout());
    let device = Device::new(channel, family, options)?;
    ensure_not_interrupted()?;
    Ok(device)
}

fn open_device(cli: &Cli, config: &Config) -> Result<Device<SerialChannel>> {
    let (port, family) = select_target(cli, config)?;
    open_device_at(cli, config, &port.name, family)
}

/// Backup command implementation.
pub(crate) fn cmd_backup(cli: &Cli, config: &Config, output: &Path) -> Result<()> {
    let device = open_device(cli, config)?;

    let pb = progress_bar(cli);
    pb.set_message("Reading flash");
    let backup = device.backup_flash(Some(&mut |p| pb.set_position(percent(p))))?;
    pb.finish_with_message("Complete");

    fs::write(output, &backup).with_context(|| format!("failed to write {}", output.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Saved {} bytes to {}",
            style("✓").green(),
            backup.len(),
            output.display()
        );
    }
    Ok(())
}

/// Update command implementation.
pub(crate) fn cmd_update(
    cli: &Cli,
    config: &Config,
    image_path: &Path,
    mode: Option<crate::Mode>,
    yes: bool,
    force: bool,
) -> Result<()> {
    let image =
        fs::read(image_path).with_context(|| format!("failed to read {}", image_path.display()))?;

    let (port, family) = select_target(cli, config)?;
    let mode: UpdateMode = mode.map_or_else(|| family.default_mode(), Into::into);
    if !family.supports(mode) {
        return Err(CliError::Usage(format!(
            "mode {mode} is not supported by {family} devices"
        ))
        .into());
    }

    if mode != UpdateMode::StreamFull {
        let layout = config.layout();
        let version = image_firmware_version(&image, &layout)?;
        if !force && !check_firmware_compatibility(&image, &layout, family)? {
            bail!(
                "image firmware {version} is older than the {family} minimum {}, \
                 use --force to flash anyway",
                family.minimum_firmware()
            );
        }
        if !cli.quiet {
            eprintln!("{} Image firmware {version}", style("ℹ").blue());
        }
    }

    if mode == UpdateMode::Full && !yes {
        confirm_full_update(cli)?;
    }

    let device = open_device_at(cli, config, &port.name, family)?;

    let pb = progress_bar(cli);
    pb.set_message(format!("Writing ({mode})"));
    device.update_flash(&image, mode, Some(&mut |p| pb.set_position(percent(p))))?;
    pb.finish_with_message("Complete");

    if !cli.quiet {
        eprintln!("\n{} Update completed, device was reset", style("✓").green().bold());
    }
    Ok(())
}

fn confirm_full_update(cli: &Cli) -> Result<()> {
    if cli.non_interactive {
        return Err(CliError::Usage(
            "full update erases the whole flash, pass --yes to confirm".to_string(),
        )
        .into());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Full update erases the whole flash, including calibration. Continue?")
        .default(false)
        .interact()
        .map_err(crate::serial::map_prompt_error)?;
    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("full update cancelled".to_string()).into())
    }
}

/// Identity command implementation.
pub(crate) fn cmd_identity(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let device = open_device(cli, config)?;
    let identity = device.identity()?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "family": device.family(),
                "identity": identity,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let caps = &identity.capabilities;
    eprintln!("{}", style("Device identity").bold().underlined());
    eprintln!("  Firmware:      {}", identity.firmware_version);
    eprintln!("  Optic serial:  {}", identity.optic_serial);
    eprintln!("  ASIC serial:   {}", identity.asic_serial);
    eprintln!("  Projector:     {}", yes_no(caps.active_projector));
    eprintln!("  RGB sensor:    {}", yes_no(caps.rgb_sensor));
    eprintln!("  Fisheye:       {}", yes_no(caps.fisheye_sensor));
    eprintln!(
        "  IMU:           {}",
        caps.imu
            .map_or_else(|| "no".to_string(), |imu| format!("{imu:?}"))
    );
    eprintln!("  Shutter:       {:?}", caps.shutter);
    eprintln!("  Locked:        {}", yes_no(identity.locked));
    Ok(())
}

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, config: &Config) -> Result<()> {
    let device = open_device(cli, config)?;
    device.hardware_reset()?;
    if !cli.quiet {
        eprintln!("{} Device reset", style("✓").green());
    }
    Ok(())
}

/// Host side of update-mode entry: the CLI holds no streams, and presence
/// is the port still being enumerated.
struct PortHost {
    name: String,
}

impl UpdateHost for PortHost {
    fn stop_activity(&self) -> depthflash::Result<()> {
        Ok(())
    }

    fn is_present(&self) -> depthflash::Result<bool> {
        Ok(port_present(&self.name)?)
    }
}

/// Enter-update command implementation.
pub(crate) fn cmd_enter_update(cli: &Cli, config: &Config) -> Result<()> {
    let device = open_device(cli, config)?;
    let host = PortHost {
        name: device.transport().channel_name(),
    };

    match device.enter_update_state(&host) {
        EntryState::Disconnected => {
            if !cli.quiet {
                eprintln!("{} Device left the bus, now in update mode", style("✓").green());
            }
            Ok(())
        },
        EntryState::TimedOut => bail!("device did not disconnect after the DFU command"),
        state => {
            ensure_not_interrupted()?;
            bail!("update-mode entry stopped in state {state:?}")
        },
    }
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = list_ports()?;

    if json {
        let ports: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "vid": p.vid,
                    "pid": p.pid,
                    "family": p.pid.map(DeviceFamily::from_pid),
                    "serial": p.serial_number,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("No ports found").dim());
    }
    for port in &ports {
        let usb = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(
                " ({vid:04X}:{pid:04X}, {})",
                DeviceFamily::from_pid(pid)
            ),
            _ => String::new(),
        };
        eprintln!("  {} {}{usb}", style("•").green(), style(&port.name).cyan());
    }
    Ok(())
}

fn percent(fraction: f32) -> u64 {
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u64
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
