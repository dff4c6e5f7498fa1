//! Configuration loading and typed config structures for Tessera.
//!
//! The canonical configuration lives in `tessera-config.yaml` at the project
//! root. Every field has a default, so an empty file is a valid config.
//! The loader validates ranges that the storage layer depends on.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is out of its permitted range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TesseraConfig {
    /// Tick loop and world list.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Region storage parameters.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TesseraConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `TESSERA_WORLDS_DIR` overrides `engine.worlds_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.engine.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "engine.tick_interval_ms must be at least 1".to_owned(),
            });
        }
        if !(MIN_SEGMENT_BITS..=MAX_SEGMENT_BITS).contains(&self.storage.segment_bits) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "storage.segment_bits must be in {MIN_SEGMENT_BITS}..={MAX_SEGMENT_BITS} (got {})",
                    self.storage.segment_bits
                ),
            });
        }
        let mut names = std::collections::BTreeSet::new();
        for world in &self.engine.worlds {
            if world.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: "engine.worlds entries need a name".to_owned(),
                });
            }
            if !names.insert(world.name.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("world {:?} is configured twice", world.name),
                });
            }
        }
        if self.storage.region_dir.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "storage.region_dir must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

/// Smallest accepted `storage.segment_bits`.
pub const MIN_SEGMENT_BITS: u8 = 6;

/// Largest accepted `storage.segment_bits`.
pub const MAX_SEGMENT_BITS: u8 = 16;

/// Tick loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Directory holding one subdirectory per world.
    #[serde(default = "default_worlds_dir")]
    pub worlds_dir: PathBuf,

    /// Real-time milliseconds per tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Stop after this many ticks (0 = run until stopped).
    #[serde(default)]
    pub max_ticks: u64,

    /// Worlds to load or create at startup.
    #[serde(default = "default_worlds")]
    pub worlds: Vec<WorldEntry>,
}

impl EngineConfig {
    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TESSERA_WORLDS_DIR") {
            self.worlds_dir = PathBuf::from(val);
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worlds_dir: default_worlds_dir(),
            tick_interval_ms: default_tick_interval_ms(),
            max_ticks: 0,
            worlds: default_worlds(),
        }
    }
}

/// One world to run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldEntry {
    /// World name; also its directory name.
    pub name: String,

    /// Registered generator identifier.
    #[serde(default = "default_generator")]
    pub generator: String,

    /// Seed for new worlds. A random seed is chosen when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Region storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Subdirectory of each world holding region files.
    #[serde(default = "default_region_dir")]
    pub region_dir: String,

    /// Segment size of region files as a power of two.
    #[serde(default = "default_segment_bits")]
    pub segment_bits: u8,

    /// Idle time after which an open region file may be closed.
    #[serde(default = "default_region_timeout_ms")]
    pub region_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region_dir: default_region_dir(),
            segment_bits: default_segment_bits(),
            region_timeout_ms: default_region_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_worlds_dir() -> PathBuf {
    PathBuf::from("worlds")
}

const fn default_tick_interval_ms() -> u64 {
    50
}

fn default_worlds() -> Vec<WorldEntry> {
    vec![WorldEntry {
        name: "world".to_owned(),
        generator: default_generator(),
        seed: None,
    }]
}

fn default_generator() -> String {
    "flat".to_owned()
}

fn default_region_dir() -> String {
    "region".to_owned()
}

const fn default_segment_bits() -> u8 {
    8
}

const fn default_region_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TesseraConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.segment_bits, 8);
        assert_eq!(config.storage.region_timeout_ms, 30_000);
        assert_eq!(config.storage.region_dir, "region");
        assert_eq!(config.engine.worlds.len(), 1);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
engine:
  worlds_dir: "/tmp/tessera-worlds"
  tick_interval_ms: 20
  max_ticks: 100
  worlds:
    - name: "alpha"
      generator: "flat"
      seed: 9
    - name: "void"
      generator: "empty"

storage:
  region_dir: "regions"
  segment_bits: 10
  region_timeout_ms: 5000

logging:
  level: "debug"
  json: true
"#;
        let config = TesseraConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.engine.tick_interval_ms, 20);
        assert_eq!(config.engine.max_ticks, 100);
        assert_eq!(config.engine.worlds.len(), 2);
        assert_eq!(config.engine.worlds.first().and_then(|w| w.seed), Some(9));
        assert_eq!(config.engine.worlds.get(1).and_then(|w| w.seed), None);
        assert_eq!(config.storage.segment_bits, 10);
        assert_eq!(config.storage.region_dir, "regions");
        assert!(config.logging.json);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = TesseraConfig::parse("storage:\n  region_timeout_ms: 10\n");
        assert!(config.is_ok());
        let config = config.ok().unwrap_or_default();
        assert_eq!(config.storage.region_timeout_ms, 10);
        assert_eq!(config.storage.segment_bits, 8);
        assert_eq!(config.engine.tick_interval_ms, 50);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(TesseraConfig::parse("").is_ok());
    }

    #[test]
    fn rejects_out_of_range_segment_bits() {
        let result = TesseraConfig::parse("storage:\n  segment_bits: 40\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_zero_tick_interval() {
        let result = TesseraConfig::parse("engine:\n  tick_interval_ms: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_duplicate_world_names() {
        let yaml = "engine:\n  worlds:\n    - name: a\n    - name: a\n";
        let result = TesseraConfig::parse(yaml);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tessera-config.yaml");
        if path.exists() {
            let config = TesseraConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
