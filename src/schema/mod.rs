//! Instruction and configuration-field schemas.
//!
//! Both tables are loaded once, before the coprocessor is built, and are
//! immutable afterwards. They are shared through [`Arc`] handles so the
//! decoder, the config store and every backend unit read the same data
//! without any process-wide state.
//!
//! The built-in tables are compiled into the binary; a run can point at
//! replacement files through [`crate::config::Config`].

mod config_fields;
mod instructions;

use std::path::Path;
use std::sync::Arc;

pub use config_fields::{ConfigField, ConfigSchema, ConfigScope};
pub use instructions::{
    ArgumentLayout, ExResource, InstructionDef, InstructionSchema, Opcode, LAST_ARGUMENT_BIT,
};

use crate::error::Result;

/// Built-in instruction table.
pub const DEFAULT_INSTRUCTIONS: &str = include_str!("tensix_instructions.toml");

/// Built-in configuration field table.
pub const DEFAULT_CONFIG_FIELDS: &str = include_str!("tensix_config.toml");

/// The pair of schemas a coprocessor is constructed from.
#[derive(Debug, Clone)]
pub struct Schemas {
    pub instructions: Arc<InstructionSchema>,
    pub config: Arc<ConfigSchema>,
}

impl Schemas {
    /// Load the built-in tables.
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            instructions: Arc::new(InstructionSchema::from_toml(DEFAULT_INSTRUCTIONS)?),
            config: Arc::new(ConfigSchema::from_toml(DEFAULT_CONFIG_FIELDS)?),
        })
    }

    /// Load each table from a file when a path is given, otherwise built-in.
    pub fn load(instructions: Option<&Path>, config: Option<&Path>) -> Result<Self> {
        let instructions = match instructions {
            Some(path) => {
                log::info!("Loading instruction schema from {}", path.display());
                InstructionSchema::from_file(path)?
            }
            None => InstructionSchema::from_toml(DEFAULT_INSTRUCTIONS)?,
        };
        let config = match config {
            Some(path) => {
                log::info!("Loading config field schema from {}", path.display());
                ConfigSchema::from_file(path)?
            }
            None => ConfigSchema::from_toml(DEFAULT_CONFIG_FIELDS)?,
        };
        log::debug!(
            "Schemas loaded: {} instructions, {} config fields",
            instructions.len(),
            config.len()
        );
        Ok(Self {
            instructions: Arc::new(instructions),
            config: Arc::new(config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_and_load_agree() {
        let a = Schemas::builtin().unwrap();
        let b = Schemas::load(None, None).unwrap();
        assert_eq!(a.instructions.len(), b.instructions.len());
        assert_eq!(a.config.len(), b.config.len());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Schemas::load(Some(Path::new("/nonexistent/isa.toml")), None).unwrap_err();
        assert!(matches!(err, crate::error::SimError::Io(_)));
    }
}
