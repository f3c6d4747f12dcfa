//! Configuration file support for depthflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (DEPTHFLASH_*)
//! 3. Local config file (./depthflash.toml)
//! 4. Global config file (~/.config/depthflash/config.toml)

use depthflash::{DeviceFamily, FlashLayout};
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Device family, overriding product ID detection.
    pub family: Option<DeviceFamily>,
}

/// Flash layout overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Total flash size in bytes.
    pub flash_size: Option<u32>,
    /// Erase sector size in bytes.
    pub sector_size: Option<u32>,
    /// Bytes per backup read.
    pub read_chunk_size: Option<u32>,
    /// Largest write packet.
    pub max_packet_size: Option<u32>,
    /// Table types kept from the device during partial updates.
    pub preserved_tables: Option<Vec<u16>>,
}

impl FlashConfig {
    /// Apply the overrides to `layout`.
    pub fn apply(&self, mut layout: FlashLayout) -> FlashLayout {
        if let Some(size) = self.flash_size {
            layout = layout.with_flash_size(size);
        }
        if let Some(size) = self.sector_size {
            layout = layout.with_sector_size(size);
        }
        if let Some(size) = self.read_chunk_size {
            layout = layout.with_read_chunk_size(size);
        }
        if let Some(size) = self.max_packet_size {
            layout = layout.with_max_packet_size(size);
        }
        if let Some(tables) = &self.preserved_tables {
            layout = layout.with_preserved_tables(tables.clone());
        }
        layout
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Flash layout overrides.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("depthflash.toml")) {
            debug!("Loaded local config from depthflash.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "depthflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.family.is_some() {
            self.connection.family = other.connection.family;
        }

        let flash = other.flash;
        if flash.flash_size.is_some() {
            self.flash.flash_size = flash.flash_size;
        }
        if flash.sector_size.is_some() {
            self.flash.sector_size = flash.sector_size;
        }
        if flash.read_chunk_size.is_some() {
            self.flash.read_chunk_size = flash.read_chunk_size;
        }
        if flash.max_packet_size.is_some() {
            self.flash.max_packet_size = flash.max_packet_size;
        }
        if flash.preserved_tables.is_some() {
            self.flash.preserved_tables = flash.preserved_tables;
        }
    }

    /// Flash layout with this config's overrides applied.
    pub fn layout(&self) -> FlashLayout {
        self.flash.apply(FlashLayout::default())
    }
}
