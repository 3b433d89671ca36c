//! Configuration file support.
//!
//! Alignment settings are stored as versioned JSON so they can be shared
//! between machines and kept next to a project.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_ECC_EPSILON, DEFAULT_ECC_GAUSS_FILT_SIZE, DEFAULT_ECC_MAX_ITERATIONS,
    DEFAULT_ELLIPSE_SEGMENTS, DEFAULT_MIN_CORRELATION, DEFAULT_TARGET_PIXEL_SIZE_MICRONS,
};
use crate::error::AlignError;
use crate::registration::EccConfig;

/// Log level setting for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Get all log levels in order from least to most verbose.
    pub fn all() -> &'static [LogLevel] {
        &[
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ]
    }

    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }

    /// A level `steps` notches more verbose, saturating at Trace.
    pub fn more_verbose(&self, steps: u8) -> LogLevel {
        let all = Self::all();
        let current = all.iter().position(|l| l == self).unwrap_or(2);
        all[(current + usize::from(steps)).min(all.len() - 1)]
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Settings for one alignment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// Working resolution in microns per pixel
    #[serde(default = "default_target_pixel_size")]
    pub target_pixel_size_microns: f64,

    /// ECC iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// ECC correlation-improvement threshold
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Odd Gaussian kernel size applied before ECC
    #[serde(default = "default_gauss_filt_size")]
    pub gauss_filt_size: usize,

    /// Correlation below this is reported as a warning
    #[serde(default = "default_min_correlation")]
    pub min_correlation: f64,

    /// Segments used to flatten ellipses
    #[serde(default = "default_ellipse_segments")]
    pub ellipse_segments: usize,

    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_target_pixel_size() -> f64 {
    DEFAULT_TARGET_PIXEL_SIZE_MICRONS
}

fn default_max_iterations() -> usize {
    DEFAULT_ECC_MAX_ITERATIONS
}

fn default_epsilon() -> f64 {
    DEFAULT_ECC_EPSILON
}

fn default_gauss_filt_size() -> usize {
    DEFAULT_ECC_GAUSS_FILT_SIZE
}

fn default_min_correlation() -> f64 {
    DEFAULT_MIN_CORRELATION
}

fn default_ellipse_segments() -> usize {
    DEFAULT_ELLIPSE_SEGMENTS
}

impl AlignConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            target_pixel_size_microns: default_target_pixel_size(),
            max_iterations: default_max_iterations(),
            epsilon: default_epsilon(),
            gauss_filt_size: default_gauss_filt_size(),
            min_correlation: default_min_correlation(),
            ellipse_segments: default_ellipse_segments(),
            log_level: LogLevel::default(),
        }
    }

    /// Solver settings derived from this configuration.
    pub fn ecc(&self) -> EccConfig {
        EccConfig {
            max_iterations: self.max_iterations,
            epsilon: self.epsilon,
            gauss_filt_size: self.gauss_filt_size,
        }
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), AlignError> {
        if !(self.target_pixel_size_microns > 0.0 && self.target_pixel_size_microns.is_finite()) {
            return Err(AlignError::invalid_config(format!(
                "target pixel size must be positive, got {}",
                self.target_pixel_size_microns
            )));
        }
        if self.max_iterations == 0 {
            return Err(AlignError::invalid_config("max_iterations must be at least 1"));
        }
        if !(self.epsilon >= 0.0 && self.epsilon.is_finite()) {
            return Err(AlignError::invalid_config(format!(
                "epsilon must be non-negative, got {}",
                self.epsilon
            )));
        }
        if self.gauss_filt_size == 0 || self.gauss_filt_size % 2 == 0 {
            return Err(AlignError::invalid_config(format!(
                "gauss_filt_size must be odd, got {}",
                self.gauss_filt_size
            )));
        }
        if self.ellipse_segments < 3 {
            return Err(AlignError::invalid_config("ellipse_segments must be at least 3"));
        }
        Ok(())
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        // Validate version compatibility
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        Ok(config)
    }

    /// Read configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write configuration to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get the default filename for config export.
    pub fn default_filename() -> &'static str {
        "tmalign-config.json"
    }

    /// Get the default config file path.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn default_path() -> Option<PathBuf> {
        // Try to use XDG config directory, fall back to home directory
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("tmalign").join(Self::default_filename()))
        } else {
            dirs::home_dir().map(|home_dir| {
                home_dir
                    .join(".config")
                    .join("tmalign")
                    .join(Self::default_filename())
            })
        }
    }

    /// Try to load configuration from the default path.
    /// Returns None if the file doesn't exist or can't be read.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config file found at {:?}", path);
            return None;
        }

        match Self::load(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Failed to load config file {:?}: {}", path, e);
                None
            }
        }
    }
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AlignConfig::default();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.target_pixel_size_microns, 4.0);
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.epsilon, 1e-3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_roundtrip_json() {
        let mut config = AlignConfig::new();
        config.max_iterations = 80;
        config.log_level = LogLevel::Debug;
        let json = config.to_json().unwrap();
        assert!(json.contains("\"log_level\": \"debug\""));
        let loaded = AlignConfig::from_json(&json).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let loaded = AlignConfig::from_json(r#"{ "version": 1, "epsilon": 0.01 }"#).unwrap();
        assert_eq!(loaded.epsilon, 0.01);
        assert_eq!(loaded.max_iterations, 50);
        assert_eq!(loaded.gauss_filt_size, 5);
        assert_eq!(loaded.log_level, LogLevel::Info);
    }

    #[test]
    fn test_version_too_new() {
        let err = AlignConfig::from_json(r#"{ "version": 99 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::VersionTooNew {
                file_version: 99,
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AlignConfig::new();
        config.gauss_filt_size = 4;
        assert!(config.validate().is_err());

        let mut config = AlignConfig::new();
        config.target_pixel_size_microns = 0.0;
        assert!(config.validate().is_err());

        let mut config = AlignConfig::new();
        config.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_more_verbose_saturates() {
        assert_eq!(LogLevel::Info.more_verbose(1), LogLevel::Debug);
        assert_eq!(LogLevel::Warn.more_verbose(9), LogLevel::Trace);
        assert_eq!(LogLevel::Error.more_verbose(0), LogLevel::Error);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("tmalign-config-{}", std::process::id()));
        let path = dir.join("nested").join("config.json");
        let config = AlignConfig::new();
        config.save(&path).unwrap();
        assert_eq!(AlignConfig::load(&path).unwrap(), config);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
