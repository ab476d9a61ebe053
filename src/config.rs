//! Configuration management for tensix-sim.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (TENSIX_SIM_ISA_SCHEMA, etc.)
//! 2. Project-local config file (`./tensix-sim.toml`)
//! 3. User config file (`~/.config/tensix-sim/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # tensix-sim.toml
//!
//! # Replacement instruction table (defaults to the built-in table)
//! isa_schema_path = "/home/user/tensix/isa.toml"
//!
//! # Stop a standalone run after this many cycles
//! max_cycles = 10000
//!
//! [diagnostics]
//! config_writes = true
//! issued_instructions = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::Result;
use crate::schema::Schemas;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Default cycle limit for standalone runs.
pub const DEFAULT_MAX_CYCLES: u64 = 100_000;

/// Default depth of each per-thread frontend FIFO.
pub const DEFAULT_FIFO_DEPTH: usize = 256;

/// Which simulator events are reported at info level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Diagnostics {
    /// Every write to a config bank or thread config word
    pub config_writes: bool,
    /// Every instruction accepted by the backend
    pub issued_instructions: bool,
    /// Matrix and vector unit bookkeeping
    pub fpu: bool,
    /// Packer and unpacker counter updates
    pub packing: bool,
}

impl Diagnostics {
    /// Enable everything.
    pub fn all() -> Self {
        Self {
            config_writes: true,
            issued_instructions: true,
            fpu: true,
            packing: true,
        }
    }

    fn merge(&mut self, other: Self) {
        self.config_writes |= other.config_writes;
        self.issued_instructions |= other.issued_instructions;
        self.fpu |= other.fpu;
        self.packing |= other.packing;
    }
}

/// tensix-sim configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Path to a replacement instruction schema (TOML).
    pub isa_schema_path: Option<String>,

    /// Path to a replacement config-field schema (TOML).
    pub config_schema_path: Option<String>,

    /// Cycle limit for standalone runs.
    pub max_cycles: Option<u64>,

    /// Depth of each per-thread frontend FIFO.
    pub fifo_depth: Option<usize>,

    /// Event reporting toggles.
    pub diagnostics: Diagnostics,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `tensix-sim.toml`
    /// 3. User config `~/.config/tensix-sim/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Cycle limit, with fallback to the default.
    pub fn max_cycles(&self) -> u64 {
        self.max_cycles.unwrap_or(DEFAULT_MAX_CYCLES)
    }

    /// FIFO depth, with fallback to the default. Never zero.
    pub fn fifo_depth(&self) -> usize {
        self.fifo_depth.unwrap_or(DEFAULT_FIFO_DEPTH).max(1)
    }

    /// Load the schemas this configuration names, falling back to the
    /// built-in tables.
    pub fn schemas(&self) -> Result<Schemas> {
        Schemas::load(
            self.isa_schema_path.as_deref().map(Path::new),
            self.config_schema_path.as_deref().map(Path::new),
        )
    }

    /// Load user configuration from ~/.config/tensix-sim/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./tensix-sim.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("tensix-sim.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("tensix-sim.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config; diagnostic
    /// toggles accumulate.
    fn merge(&mut self, other: Self) {
        if other.isa_schema_path.is_some() {
            self.isa_schema_path = other.isa_schema_path;
        }
        if other.config_schema_path.is_some() {
            self.config_schema_path = other.config_schema_path;
        }
        if other.max_cycles.is_some() {
            self.max_cycles = other.max_cycles;
        }
        if other.fifo_depth.is_some() {
            self.fifo_depth = other.fifo_depth;
        }
        self.diagnostics.merge(other.diagnostics);
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TENSIX_SIM_ISA_SCHEMA") {
            log::info!("Using TENSIX_SIM_ISA_SCHEMA from environment: {}", path);
            self.isa_schema_path = Some(path);
        }
        if let Ok(path) = std::env::var("TENSIX_SIM_CONFIG_SCHEMA") {
            log::info!("Using TENSIX_SIM_CONFIG_SCHEMA from environment: {}", path);
            self.config_schema_path = Some(path);
        }
        if let Ok(value) = std::env::var("TENSIX_SIM_MAX_CYCLES") {
            match value.parse() {
                Ok(cycles) => {
                    log::info!("Using TENSIX_SIM_MAX_CYCLES from environment: {}", cycles);
                    self.max_cycles = Some(cycles);
                }
                Err(e) => log::warn!("Ignoring TENSIX_SIM_MAX_CYCLES={}: {}", value, e),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tensix-sim").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# tensix-sim configuration
# Place this file at ~/.config/tensix-sim/config.toml or ./tensix-sim.toml

# Replacement instruction schema (optional, defaults to the built-in table)
# isa_schema_path = "/home/user/tensix/isa.toml"

# Replacement config-field schema (optional, defaults to the built-in table)
# config_schema_path = "/home/user/tensix/config.toml"

# Cycle limit for standalone runs
max_cycles = 100000

# Depth of each per-thread frontend FIFO
fifo_depth = 256

[diagnostics]
config_writes = false
issued_instructions = false
fpu = false
packing = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_cycles(), DEFAULT_MAX_CYCLES);
        assert_eq!(config.fifo_depth(), DEFAULT_FIFO_DEPTH);
        assert_eq!(config.diagnostics, Diagnostics::default());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            isa_schema_path: Some("/base/isa.toml".to_string()),
            max_cycles: Some(10),
            diagnostics: Diagnostics {
                fpu: true,
                ..Diagnostics::default()
            },
            ..Config::default()
        };

        let overlay = Config {
            config_schema_path: Some("/overlay/cfg.toml".to_string()),
            max_cycles: Some(20),
            diagnostics: Diagnostics {
                config_writes: true,
                ..Diagnostics::default()
            },
            ..Config::default()
        };

        base.merge(overlay);

        assert_eq!(base.isa_schema_path.as_deref(), Some("/base/isa.toml"));
        assert_eq!(base.config_schema_path.as_deref(), Some("/overlay/cfg.toml"));
        assert_eq!(base.max_cycles(), 20);
        assert!(base.diagnostics.fpu);
        assert!(base.diagnostics.config_writes);
        assert!(!base.diagnostics.packing);
    }

    #[test]
    fn test_zero_fifo_depth_is_clamped() {
        let config = Config {
            fifo_depth: Some(0),
            ..Config::default()
        };
        assert_eq!(config.fifo_depth(), 1);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.max_cycles, Some(100_000));
        assert_eq!(config.fifo_depth, Some(256));
    }

    #[test]
    fn test_default_schemas_load() {
        let schemas = Config::default().schemas().unwrap();
        assert!(!schemas.instructions.is_empty());
    }
}
