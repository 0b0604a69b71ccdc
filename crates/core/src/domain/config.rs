//! Configuration management for trieq
//!
//! This module provides:
//! - Configuration structs for the engine, analyzer and display
//! - Initial parameter values (a [`ParameterSnapshot`]) in `[parameters]`
//! - Async TOML load/save and a manager for the per-user config file

use crate::domain::audio::{ProcessSpec, TapChannel};
use crate::domain::display::{DbRange, DisplayBounds};
use crate::domain::params::ParameterSnapshot;
use crate::domain::spectrum::{FftOrder, WindowType, DEFAULT_CEILING_DB, DEFAULT_FLOOR_DB};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Processing session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Largest host block in frames per channel
    pub max_block_size: usize,

    /// Channel handed to the analyzer
    pub tap_channel: TapChannel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            max_block_size: 512,
            tap_channel: TapChannel::Left,
        }
    }
}

/// Spectrum analyzer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Analysis window length (2048, 4096 or 8192)
    pub fft_size: FftOrder,

    pub window: WindowType,

    /// Level at the bottom of the trace
    pub floor_db: f32,

    /// Level at the top of the trace
    pub ceiling_db: f32,

    /// Blocks the FIFO holds before displacing the oldest
    pub fifo_capacity: usize,

    /// Samples per FIFO block
    pub fifo_block_size: usize,

    /// Fraction of a rise followed per frame (1.0 = instant)
    pub smoothing_attack: f32,

    /// Fraction of a fall followed per frame (1.0 = instant)
    pub smoothing_release: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: FftOrder::Order2048,
            window: WindowType::Blackman,
            floor_db: DEFAULT_FLOOR_DB,
            ceiling_db: DEFAULT_CEILING_DB,
            fifo_capacity: 30,
            fifo_block_size: 512,
            smoothing_attack: 0.8,
            smoothing_release: 0.25,
        }
    }
}

/// Response/analyzer plot settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Plot width in pixels (one path vertex per column)
    pub width: u32,

    /// Plot height in pixels
    pub height: u32,

    /// Visualizer ticks per second
    pub refresh_rate_hz: u32,

    /// Response curve spans `-response_range_db..=+response_range_db`
    pub response_range_db: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 600,
            height: 400,
            refresh_rate_hz: 60,
            response_range_db: 24.0,
        }
    }
}

/// Complete trieq configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EqConfig {
    pub engine: EngineConfig,
    pub analyzer: AnalyzerConfig,
    pub display: DisplayConfig,
    pub parameters: ParameterSnapshot,
}

impl EqConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Factory default configuration
    pub fn factory_default() -> Self {
        Self::default()
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.process_spec()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let analyzer = &self.analyzer;
        if analyzer.fifo_capacity == 0 {
            return Err(ConfigError::Invalid("analyzer.fifo_capacity must be non-zero".into()));
        }
        if analyzer.fifo_block_size == 0 || analyzer.fifo_block_size > analyzer.fft_size.size() {
            return Err(ConfigError::Invalid(format!(
                "analyzer.fifo_block_size must be in 1..={}, got {}",
                analyzer.fft_size.size(),
                analyzer.fifo_block_size
            )));
        }
        if !(analyzer.floor_db < analyzer.ceiling_db) {
            return Err(ConfigError::Invalid(format!(
                "analyzer.floor_db ({}) must be below ceiling_db ({})",
                analyzer.floor_db, analyzer.ceiling_db
            )));
        }
        for (name, value) in [
            ("smoothing_attack", analyzer.smoothing_attack),
            ("smoothing_release", analyzer.smoothing_release),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "analyzer.{name} must be in (0, 1], got {value}"
                )));
            }
        }

        let display = &self.display;
        if display.width == 0 || display.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "display size must be non-zero, got {}x{}",
                display.width, display.height
            )));
        }
        if !(1..=240).contains(&display.refresh_rate_hz) {
            return Err(ConfigError::Invalid(format!(
                "display.refresh_rate_hz must be in 1..=240, got {}",
                display.refresh_rate_hz
            )));
        }
        if !(display.response_range_db > 0.0) {
            return Err(ConfigError::Invalid(
                "display.response_range_db must be positive".into(),
            ));
        }

        self.parameters
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn process_spec(&self) -> ProcessSpec {
        ProcessSpec::new(self.engine.sample_rate, self.engine.max_block_size)
    }

    pub fn display_bounds(&self) -> DisplayBounds {
        DisplayBounds::sized(self.display.width as f32, self.display.height as f32)
    }

    pub fn response_range(&self) -> DbRange {
        DbRange::new(-self.display.response_range_db, self.display.response_range_db)
    }

    pub fn analyzer_range(&self) -> DbRange {
        DbRange::new(
            f64::from(self.analyzer.floor_db),
            f64::from(self.analyzer.ceiling_db),
        )
    }
}

/// Configuration manager for the per-user config file
///
/// Manages `<config_dir>/trieq/config.toml`.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");

        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// Returns `~/.config/trieq` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("trieq"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// A missing file yields (and writes) the factory default. A corrupt or
    /// invalid file is backed up next to the original and replaced by the
    /// factory default in memory.
    #[instrument(skip(self))]
    pub async fn load(&self) -> EqConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = EqConfig::factory_default();
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }

            return config;
        }

        match EqConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                EqConfig::factory_default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &EqConfig) -> Result<()> {
        config.validate()?;
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Delete the config file
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(
                path = %self.config_path.display(),
                "Configuration cleared"
            );
        }

        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::{ParamId, Slope};
    use tempfile::TempDir;

    #[test]
    fn test_config_serialization() {
        let mut config = EqConfig::factory_default();
        config.parameters = config.parameters.with(ParamId::HighCutSlope, 2.0);
        config.analyzer.window = WindowType::Hann;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("window = \"hann\""));
        assert!(toml_str.contains("fft_size = 2048"));

        let parsed: EqConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.parameters.high_cut_slope, Slope::Db36);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: EqConfig = toml::from_str(
            r#"
            [engine]
            sample_rate = 96000

            [parameters]
            peak_gain_db = 6.0
            "#,
        )
        .unwrap();

        assert_eq!(parsed.engine.sample_rate, 96000);
        assert_eq!(parsed.engine.max_block_size, 512);
        assert_eq!(parsed.parameters.peak_gain_db, 6.0);
        assert_eq!(parsed.parameters.peak_freq_hz, 750.0);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EqConfig::factory_default();
        assert!(config.validate().is_ok());

        config.engine.sample_rate = 32000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EqConfig::factory_default();
        config.analyzer.floor_db = 0.0;
        assert!(config.validate().is_err());

        let mut config = EqConfig::factory_default();
        config.analyzer.fifo_block_size = 4096;
        assert!(config.validate().is_err());

        let mut config = EqConfig::factory_default();
        config.display.refresh_rate_hz = 0;
        assert!(config.validate().is_err());

        let mut config = EqConfig::factory_default();
        config.parameters.peak_gain_db = 48.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_slope_rejected_by_parser() {
        let result: std::result::Result<EqConfig, _> =
            toml::from_str("[parameters]\nlow_cut_slope = 18\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_derived_views() {
        let config = EqConfig::factory_default();
        assert_eq!(config.process_spec(), ProcessSpec::new(48000, 512));
        assert_eq!(config.display_bounds().columns(), 600);
        assert_eq!(config.response_range(), DbRange::RESPONSE);
        assert_eq!(config.analyzer_range(), DbRange::ANALYZER);
    }

    #[tokio::test]
    async fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = EqConfig::factory_default();
        config.engine.tap_channel = TapChannel::Mid;
        config.save_to_file(&config_path).await.unwrap();

        assert!(config_path.exists());

        let loaded = EqConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_manager_creates_default() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());
        assert!(!manager.exists());

        let config = manager.load().await;
        assert_eq!(config, EqConfig::factory_default());
        assert!(manager.exists());

        manager.clear().await.unwrap();
        assert!(!manager.exists());
    }

    #[tokio::test]
    async fn test_manager_backs_up_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());
        tokio::fs::write(manager.config_path(), "[engine\nsample_rate = ")
            .await
            .unwrap();

        let config = manager.load().await;
        assert_eq!(config, EqConfig::factory_default());
        assert!(temp_dir.path().join("config.toml.corrupt").exists());
    }

    #[tokio::test]
    async fn test_manager_refuses_invalid_save() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());
        let mut config = EqConfig::factory_default();
        config.display.width = 0;

        assert!(manager.save(&config).await.is_err());
        assert!(!manager.exists());
    }
}
