//! Named configuration fields: word address, shift and mask.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::arch::{CFG_BANK_WORDS, THD_STATE_SIZE};
use crate::error::{Result, SimError};

/// Which configuration space a field lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigScope {
    /// Per-thread configuration (57 words per thread)
    Thread,
    /// General configuration bank (188 words per bank)
    Bank,
}

impl ConfigScope {
    pub fn words(self) -> usize {
        match self {
            ConfigScope::Thread => THD_STATE_SIZE,
            ConfigScope::Bank => CFG_BANK_WORDS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ConfigScope::Thread => "thread config",
            ConfigScope::Bank => "config bank",
        }
    }
}

/// Location of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ConfigField {
    pub addr32: usize,
    pub shamt: u32,
    pub mask: u32,
}

impl ConfigField {
    /// Extract this field from the raw word at `addr32`.
    #[inline]
    pub fn parse(&self, raw: u32) -> u32 {
        (raw & self.mask) >> self.shamt
    }

    /// Return `raw` with this field replaced by `value`.
    #[inline]
    pub fn insert(&self, raw: u32, value: u32) -> u32 {
        (raw & !self.mask) | ((value << self.shamt) & self.mask)
    }
}

#[derive(Deserialize)]
struct RawConfigSchema {
    #[serde(default)]
    thread: HashMap<String, ConfigField>,
    #[serde(default)]
    bank: HashMap<String, ConfigField>,
}

/// Immutable field table for both configuration spaces.
#[derive(Debug, Clone, Default)]
pub struct ConfigSchema {
    thread: HashMap<String, ConfigField>,
    bank: HashMap<String, ConfigField>,
    /// First field name registered at each word, for diagnostics
    names: BTreeMap<(ConfigScope, usize), String>,
}

impl ConfigSchema {
    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: RawConfigSchema = toml::from_str(text)?;

        let mut names = BTreeMap::new();
        for (scope, table) in [(ConfigScope::Thread, &raw.thread), (ConfigScope::Bank, &raw.bank)] {
            for (name, field) in table {
                validate(scope, name, field)?;
                let word = name.rsplit_once('_').map(|(w, _)| w).unwrap_or(name);
                names
                    .entry((scope, field.addr32))
                    .and_modify(|existing: &mut String| {
                        if word < existing.as_str() {
                            *existing = word.to_string();
                        }
                    })
                    .or_insert_with(|| word.to_string());
            }
        }

        Ok(Self {
            thread: raw.thread,
            bank: raw.bank,
            names,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Look up a field; a missing name is a schema error.
    pub fn field(&self, scope: ConfigScope, name: &str) -> Result<ConfigField> {
        let table = match scope {
            ConfigScope::Thread => &self.thread,
            ConfigScope::Bank => &self.bank,
        };
        table
            .get(name)
            .copied()
            .ok_or_else(|| SimError::no_field(name, scope.name()))
    }

    pub fn thread_field(&self, name: &str) -> Result<ConfigField> {
        self.field(ConfigScope::Thread, name)
    }

    pub fn bank_field(&self, name: &str) -> Result<ConfigField> {
        self.field(ConfigScope::Bank, name)
    }

    /// Register name of a word, or "NONE".
    pub fn name_at(&self, scope: ConfigScope, addr32: usize) -> &str {
        self.names
            .get(&(scope, addr32))
            .map(String::as_str)
            .unwrap_or("NONE")
    }

    pub fn len(&self) -> usize {
        self.thread.len() + self.bank.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate(scope: ConfigScope, name: &str, field: &ConfigField) -> Result<()> {
    if field.addr32 >= scope.words() {
        return Err(SimError::Schema(format!(
            "{} field {} at word {} is outside the {} words",
            scope.name(),
            name,
            field.addr32,
            scope.words()
        )));
    }
    if field.shamt >= 32 || field.mask == 0 || field.mask.trailing_zeros() < field.shamt {
        return Err(SimError::Schema(format!(
            "{} field {} has mask 0x{:X} inconsistent with shift {}",
            scope.name(),
            name,
            field.mask,
            field.shamt
        )));
    }
    Ok(())
}
