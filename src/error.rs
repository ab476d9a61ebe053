//! Error types for the coprocessor simulator.
//!
//! Almost every failure here is fatal: the simulator models hardware, so a
//! decode miss or a schema inconsistency halts the run instead of guessing.
//! The one recoverable condition is [`SimError::CapacityExceeded`], raised
//! when a memory-mapped instruction push finds the thread's intake full;
//! the caller re-offers the same write on a later cycle.

use thiserror::Error;

use crate::memory::MemoryError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors raised while decoding, dispatching, or executing instructions.
#[derive(Debug, Error)]
pub enum SimError {
    /// The opcode byte of an instruction word has no schema entry.
    #[error("unknown opcode 0x{opcode:02X} in instruction word 0x{word:08X}")]
    UnknownOpcode { opcode: u8, word: u32 },

    /// The instruction's execution-resource tag names no wired unit.
    #[error("instruction {mnemonic} targets unroutable resource '{resource}'")]
    UnroutableInstruction { mnemonic: String, resource: String },

    /// A bounded queue could not take another entry this cycle.
    #[error("{queue} is full for thread {thread}; retry next cycle")]
    CapacityExceeded { queue: &'static str, thread: usize },

    /// A named argument or configuration field is absent from the schema.
    #[error("no field named '{name}' in {scope}")]
    InvalidFieldAccess { name: String, scope: String },

    /// A value does not fit the bit width of the argument it is encoded into.
    #[error("value 0x{value:X} does not fit the {width}-bit argument '{name}'")]
    FieldOverflow { name: String, value: u32, width: u32 },

    /// A mover transfer would straddle more than one 64KiB region.
    #[error("transfer of {count} bytes from 0x{src:08X} to 0x{dst:08X} (mode {mode}) is not supported: {reason}")]
    UnsupportedTransfer {
        src: u32,
        dst: u32,
        count: u32,
        mode: u8,
        reason: &'static str,
    },

    /// A recognised instruction selected a mode the simulator does not model.
    #[error("{mnemonic}: unsupported operation ({detail})")]
    UnsupportedOperation { mnemonic: &'static str, detail: String },

    /// Config bank or thread-config index outside its fixed size.
    #[error("{space} index {index} out of range (size {limit})")]
    IndexOutOfRange {
        space: &'static str,
        index: usize,
        limit: usize,
    },

    /// Mutex index is reserved or does not exist.
    #[error("mutex index {index} is not usable")]
    InvalidMutex { index: u32 },

    /// Thread id outside 0..NUM_THREADS.
    #[error("thread {0} does not exist")]
    InvalidThread(usize),

    /// Memory-mapped access that no coprocessor register decodes.
    #[error("no coprocessor register at address 0x{address:08X}")]
    UnmappedAddress { address: u64 },

    /// Thread configuration is only writable by instructions.
    #[error("thread configuration at 0x{address:08X} is read-only from the bus")]
    ReadOnlyRegister { address: u64 },

    /// A schema file was rejected.
    #[error("schema error: {0}")]
    Schema(String),

    /// A schema or config file failed to parse.
    #[error("failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Failure reported by the addressable-memory capability.
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    /// IO error while reading schema files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Whether the caller may retry the same operation on a later cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SimError::CapacityExceeded { .. })
    }

    pub(crate) fn no_field(name: impl Into<String>, scope: impl Into<String>) -> Self {
        SimError::InvalidFieldAccess {
            name: name.into(),
            scope: scope.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_capacity_is_recoverable() {
        let full = SimError::CapacityExceeded {
            queue: "instruction intake",
            thread: 1,
        };
        assert!(full.is_recoverable());
        assert!(!SimError::UnknownOpcode { opcode: 0xFF, word: 0xFF00_0000 }.is_recoverable());
        assert!(!SimError::InvalidThread(4).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = SimError::UnknownOpcode { opcode: 0xEE, word: 0xEE00_1234 };
        assert_eq!(
            err.to_string(),
            "unknown opcode 0xEE in instruction word 0xEE001234"
        );

        let err = SimError::no_field("SrcAIncr", "ADDR_MOD_AB_SEC0");
        assert_eq!(err.to_string(), "no field named 'SrcAIncr' in ADDR_MOD_AB_SEC0");
    }
}
