//! Serial port selection.
//!
//! Ports are picked in this order:
//! - the `--port` flag (or `DEPTHFLASH_PORT`)
//! - `connection.serial` from the config file
//! - the only detected USB port
//! - an interactive choice between several ports

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    depthflash::{DeviceFamily, PortInfo, port::list_ports},
    log::{debug, info},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Select a serial port from flags, config or detection.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<PortInfo> {
    if let Some(name) = &options.port {
        return Ok(find_port_by_name(name));
    }

    if let Some(name) = &config.connection.serial {
        debug!("Using port from config: {name}");
        return Ok(find_port_by_name(name));
    }

    let mut ports: Vec<PortInfo> = list_ports()?
        .into_iter()
        .filter(|p| p.vid.is_some())
        .collect();

    match ports.len() {
        0 => Err(usage_err("no USB serial ports found, pass --port")),
        1 => {
            let port = ports.remove(0);
            info!("Auto-selected port: {}", port.name);
            Ok(port)
        },
        _ if options.non_interactive => Err(usage_err(
            "multiple USB serial ports found, pick one with --port",
        )),
        _ => select_port_interactive(ports),
    }
}

fn select_port_interactive(ports: Vec<PortInfo>) -> Result<PortInfo> {
    if !(std::io::stdin().is_terminal() && std::io::stderr().is_terminal()) {
        return Err(usage_err("port selection needs an interactive terminal, pass --port"));
    }

    let items: Vec<String> = ports.iter().map(describe_port).collect();
    let index = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match index.and_then(|i| ports.into_iter().nth(i)) {
        Some(port) => Ok(port),
        None => Err(CliError::Cancelled("port selection cancelled".to_string()).into()),
    }
}

pub(crate) fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("prompt cancelled".to_string()).into()
            } else {
                usage_err("prompt failed")
            }
        },
    }
}

fn find_port_by_name(name: &str) -> PortInfo {
    list_ports()
        .ok()
        .and_then(|ports| ports.into_iter().find(|p| p.name == name))
        .unwrap_or_else(|| PortInfo {
            name: name.to_string(),
            vid: None,
            pid: None,
            serial_number: None,
        })
}

fn describe_port(port: &PortInfo) -> String {
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(
            "{} ({vid:04X}:{pid:04X}, {})",
            port.name,
            DeviceFamily::from_pid(pid)
        ),
        _ => port.name.clone(),
    }
}

/// Family from the flag, the config, or the port's product ID.
pub fn resolve_family(
    flag: Option<DeviceFamily>,
    config: &Config,
    port: &PortInfo,
) -> DeviceFamily {
    flag.or(config.connection.family)
        .or_else(|| port.pid.map(DeviceFamily::from_pid))
        .unwrap_or_default()
}

/// Whether a port with this name is still enumerated.
pub fn port_present(name: &str) -> std::result::Result<bool, serialport::Error> {
    Ok(serialport::available_ports()?
        .iter()
        .any(|p| p.port_name == name))
}
