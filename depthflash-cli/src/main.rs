//! depthflash CLI - Command-line tool for depth-camera firmware.
//!
//! ## Features
//!
//! - Inspect and merge flash images offline
//! - Back up and update device flash
//! - Decode the device identity block
//! - Reset or switch the device into update mode
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use depthflash::{DeviceFamily, UpdateMode};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors that map to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Cancelled by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// depthflash - Inspect and reprogram depth-camera firmware.
///
/// Environment variables:
///   DEPTHFLASH_PORT              - Default serial port
///   DEPTHFLASH_BAUD              - Default baud rate (default: 115200)
///   DEPTHFLASH_FAMILY            - Device family (legacy, stream)
///   DEPTHFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "depthflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "DEPTHFLASH_PORT")]
    port: Option<String>,

    /// Baud rate of the serial bridge.
    #[arg(short, long, global = true, env = "DEPTHFLASH_BAUD")]
    baud: Option<u32>,

    /// Device family (detected from the USB product ID if not specified).
    #[arg(short, long, global = true, env = "DEPTHFLASH_FAMILY")]
    family: Option<Family>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "DEPTHFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Device families.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum Family {
    /// Sector erase/write devices.
    Legacy,
    /// Block-streaming devices.
    Stream,
}

impl From<Family> for DeviceFamily {
    fn from(family: Family) -> Self {
        match family {
            Family::Legacy => DeviceFamily::Legacy,
            Family::Stream => DeviceFamily::Stream,
        }
    }
}

/// Update modes.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum Mode {
    /// Replace the read-write section (legacy).
    Update,
    /// Replace the read-write and read-only sections (legacy).
    ReadOnly,
    /// Erase and write the whole flash (legacy).
    Full,
    /// Stream the whole image (stream family).
    Stream,
}

impl From<Mode> for UpdateMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Update => UpdateMode::Update,
            Mode::ReadOnly => UpdateMode::ReadOnly,
            Mode::Full => UpdateMode::Full,
            Mode::Stream => UpdateMode::StreamFull,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show the layout of a flash image file.
    Info {
        /// Path to the image.
        image: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Merge a new image into a flash backup offline.
    Merge {
        /// Flash backup read from the device.
        backup: PathBuf,

        /// New firmware image.
        image: PathBuf,

        /// Output file.
        #[arg(short, long)]
        output: PathBuf,

        /// Also replace the read-only section.
        #[arg(long)]
        read_only: bool,
    },

    /// Read the whole device flash into a file.
    Backup {
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write a firmware image to the device.
    Update {
        /// Path to the image.
        image: PathBuf,

        /// Update mode (family default if not specified).
        #[arg(short, long)]
        mode: Option<Mode>,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Flash even if the image firmware is older than the family minimum.
        #[arg(long)]
        force: bool,
    },

    /// Read and decode the device identity block.
    Identity {
        /// Output identity as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Reset the device.
    Reset,

    /// Switch the device into update mode and wait for it to re-enumerate.
    EnterUpdate,

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Progress bar on stderr, hidden in quiet or non-TTY mode.
pub(crate) fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    depthflash::set_interrupt_checker(was_interrupted);
}

/// Exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }

    let interrupted = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<depthflash::Error>(),
            Some(depthflash::Error::Interrupted)
        )
    });
    if interrupted { 130 } else { 1 }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Info { image, json } => commands::image::cmd_info(cli, &config, image, *json),
        Commands::Merge {
            backup,
            image,
            output,
            read_only,
        } => commands::image::cmd_merge(cli, &config, backup, image, output, *read_only),
        Commands::Backup { output } => commands::device::cmd_backup(cli, &config, output),
        Commands::Update {
            image,
            mode,
            yes,
            force,
        } => commands::device::cmd_update(cli, &config, image, *mode, *yes, *force),
        Commands::Identity { json } => commands::device::cmd_identity(cli, &config, *json),
        Commands::Reset => commands::device::cmd_reset(cli, &config),
        Commands::EnterUpdate => commands::device::cmd_enter_update(cli, &config),
        Commands::ListPorts { json } => commands::device::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "depthflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CliError::Usage("bad".into()).into()), 2);
        assert_eq!(exit_code(&CliError::Cancelled("stop".into()).into()), 130);
        assert_eq!(exit_code(&depthflash::Error::Interrupted.into()), 130);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);

        let wrapped = anyhow::Error::from(depthflash::Error::Interrupted).context("backup failed");
        assert_eq!(exit_code(&wrapped), 130);
    }

    #[test]
    fn test_mode_mapping() {
        assert_eq!(UpdateMode::from(Mode::Stream), UpdateMode::StreamFull);
        assert_eq!(UpdateMode::from(Mode::ReadOnly), UpdateMode::ReadOnly);
        assert_eq!(DeviceFamily::from(Family::Stream), DeviceFamily::Stream);
    }

    #[test]
    fn test_update_args() {
        let cli = Cli::try_parse_from(["depthflash", "update", "fw.bin", "--mode", "read-only"])
            .unwrap();
        match cli.command {
            Commands::Update { mode, yes, .. } => {
                assert!(matches!(mode, Some(Mode::ReadOnly)));
                assert!(!yes);
            },
            _ => panic!("expected update"),
        }
    }
}
