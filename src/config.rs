//! Configuration management with validation and defaults
//!
//! Engine settings are grouped per component. A [`ConfigLoader`] reads them
//! from TOML, applies `FAIRPLAY_*` environment overrides and validates the
//! result before any engine is built from it.

use crate::errors::{ConfigurationError, EngineResult};
use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};

/// Top-level engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub crash: CrashConfig,
    pub tiles: TileConfig,
    pub one_shot: OneShotConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
}

/// Crash round settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    /// Curve growth constant `k` in `exp(k * t)`, per second
    pub growth_rate: f64,
    /// A BETTING round older than this is voided and replaced
    pub stale_betting_secs: u64,
    /// Number of recent crash points kept
    pub history_len: usize,
    /// Public salt used as the client seed of every round
    pub client_seed: String,
    pub min_bet: f64,
    pub max_bet: f64,
    /// Betting window used by the demo orchestrator
    pub betting_window_secs: u64,
    /// Pause between a crash and the next round in the demo orchestrator
    pub intermission_secs: u64,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            growth_rate: 0.06,
            stale_betting_secs: 30,
            history_len: 50,
            client_seed: "fairplay-crash".to_string(),
            min_bet: 0.01,
            max_bet: 10_000.0,
            betting_window_secs: 5,
            intermission_secs: 3,
        }
    }
}

/// Tile-reveal game settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    pub house_edge: f64,
    pub idle_timeout_secs: u64,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            house_edge: 0.01,
            idle_timeout_secs: 900,
        }
    }
}

/// One-shot game settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OneShotConfig {
    pub house_edge: f64,
}

impl Default for OneShotConfig {
    fn default() -> Self {
        Self { house_edge: 0.01 }
    }
}

/// Session registry housekeeping
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub sweep_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

/// Log output settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Presets, validation and duration accessors
impl EngineConfig {
    /// Short timeouts and verbose logs for local runs
    pub fn development() -> Self {
        Self {
            crash: CrashConfig {
                stale_betting_secs: 10,
                betting_window_secs: 3,
                intermission_secs: 1,
                ..Default::default()
            },
            tiles: TileConfig {
                idle_timeout_secs: 120,
                ..Default::default()
            },
            registry: RegistryConfig {
                sweep_interval_secs: 10,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                ansi: true,
            },
            ..Default::default()
        }
    }

    /// Plain log output for log shippers
    pub fn production() -> Self {
        Self {
            crash: CrashConfig {
                history_len: 100,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                ansi: false,
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let crash = &self.crash;
        if !crash.growth_rate.is_finite() || crash.growth_rate <= 0.0 {
            return Err(ConfigValidationError::InvalidValue(
                "crash.growth_rate must be > 0".to_string(),
            ));
        }
        if crash.stale_betting_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "crash.stale_betting_secs must be > 0".to_string(),
            ));
        }
        if crash.history_len == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "crash.history_len must be > 0".to_string(),
            ));
        }
        if crash.client_seed.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "crash.client_seed".to_string(),
            ));
        }
        if !crash.min_bet.is_finite() || crash.min_bet <= 0.0 {
            return Err(ConfigValidationError::InvalidValue(
                "crash.min_bet must be > 0".to_string(),
            ));
        }
        if !crash.max_bet.is_finite() || crash.max_bet < crash.min_bet {
            return Err(ConfigValidationError::LogicalInconsistency(
                "crash.max_bet must be >= crash.min_bet".to_string(),
            ));
        }
        if crash.betting_window_secs >= crash.stale_betting_secs {
            return Err(ConfigValidationError::LogicalInconsistency(
                "crash.betting_window_secs must be shorter than crash.stale_betting_secs".to_string(),
            ));
        }

        for (field, edge) in [
            ("tiles.house_edge", self.tiles.house_edge),
            ("one_shot.house_edge", self.one_shot.house_edge),
        ] {
            if !edge.is_finite() || !(0.0..1.0).contains(&edge) {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "{} must be within [0, 1)",
                    field
                )));
            }
        }

        if self.tiles.idle_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "tiles.idle_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.registry.sweep_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "registry.sweep_interval_secs must be > 0".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigValidationError::InvalidValue(format!(
                "logging.level '{}' is not one of {:?}",
                self.logging.level, LOG_LEVELS
            )));
        }

        Ok(())
    }

    pub fn betting_window(&self) -> Duration {
        Duration::from_secs(self.crash.betting_window_secs)
    }

    pub fn intermission(&self) -> Duration {
        Duration::from_secs(self.crash.intermission_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.registry.sweep_interval_secs)
    }
}

impl CrashConfig {
    pub fn stale_betting_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_betting_secs as i64)
    }
}

impl TileConfig {
    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idle_timeout_secs as i64)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    InvalidValue(String),
    LogicalInconsistency(String),
    MissingRequired(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValidationError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
            ConfigValidationError::LogicalInconsistency(msg) => {
                write!(f, "Configuration logical inconsistency: {}", msg)
            }
            ConfigValidationError::MissingRequired(msg) => write!(f, "Missing required configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

impl From<ConfigValidationError> for ConfigurationError {
    fn from(e: ConfigValidationError) -> Self {
        match e {
            ConfigValidationError::MissingRequired(field) => ConfigurationError::MissingRequired(field),
            other => ConfigurationError::ValidationFailed(other.to_string()),
        }
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<EngineConfig> {
        self.load_with(|name| env::var(name).ok())
    }

    /// Same as [`ConfigLoader::load`] with an explicit variable source.
    pub fn load_with(&self, lookup: impl Fn(&str) -> Option<String>) -> EngineResult<EngineConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => EngineConfig::default(),
        };

        self.apply_env_overrides(&mut config, lookup)?;

        config.validate().map_err(ConfigurationError::from)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(
        &self,
        config: &mut EngineConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> EngineResult<()> {
        if let Some(level) = lookup("FAIRPLAY_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(salt) = lookup("FAIRPLAY_CRASH_CLIENT_SEED") {
            config.crash.client_seed = salt;
        }

        if let Some(edge) = lookup("FAIRPLAY_HOUSE_EDGE") {
            let parsed: f64 = edge.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "FAIRPLAY_HOUSE_EDGE".to_string(),
                value: edge.clone(),
                reason: "Invalid decimal value".to_string(),
            })?;
            config.tiles.house_edge = parsed;
            config.one_shot.house_edge = parsed;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &EngineConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
