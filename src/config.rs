//! Configuration
//!
//! Loads configuration from TOML file at `~/.config/wsegl-dri2/config.toml`.
//! Auto-generates a default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment hint that overrides `session.use_hw_sync`.
pub const HW_SYNC_ENV: &str = "WSEGL_USE_HW_SYNC";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub software_device: SoftwareDeviceConfig,
    pub probe: ProbeConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            Self::default()
        } else {
            Self::load_from(&config_path)?
        };

        config.apply_hw_sync_hint(std::env::var(HW_SYNC_ENV).ok().as_deref());
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse a config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    /// Override the hardware-sync capability from the environment hint.
    /// `0`, `false`, `no` and `off` disable it; any other value enables it.
    pub fn apply_hw_sync_hint(&mut self, hint: Option<&str>) {
        if let Some(value) = hint {
            let value = value.trim().to_ascii_lowercase();
            self.session.use_hw_sync = !matches!(value.as_str(), "0" | "false" | "no" | "off");
            debug!("{} = {:?}", HW_SYNC_ENV, value);
        }
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("wsegl-dri2");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Display session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// X display to open when the host supplies none (`None` uses `$DISPLAY`)
    pub display: Option<String>,
    /// Advertise that windows use hardware sync
    pub use_hw_sync: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display: None,
            use_hw_sync: true,
        }
    }
}

/// Software device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareDeviceConfig {
    /// Frame buffer width in pixels
    pub width: u32,
    /// Frame buffer height in pixels
    pub height: u32,
}

impl Default for SoftwareDeviceConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Probe binary configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Test window width
    pub width: u16,
    /// Test window height
    pub height: u16,
    /// Number of negotiate/present cycles
    pub frames: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frames: 60,
        }
    }
}
