//! Table-driven instruction decoder.
//!
//! The opcode is the top byte of the word. Everything else is sliced into
//! named arguments according to the schema layout. Decoding is pure; queues
//! throughout the pipeline hold raw words and decode on demand.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::bits::extract_bits;
use crate::error::{Result, SimError};
use crate::schema::{ExResource, InstructionDef, InstructionSchema, Opcode};

/// Opcode byte of an instruction word.
#[inline]
pub fn opcode_byte(word: u32) -> u8 {
    extract_bits(word, 8, 24) as u8
}

/// One decoded instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    raw: u32,
    def: Arc<InstructionDef>,
    /// Argument values in schema order
    args: SmallVec<[u32; 8]>,
}

impl Instruction {
    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn opcode(&self) -> Opcode {
        self.def.opcode
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn ex_resource(&self) -> ExResource {
        self.def.ex_resource
    }

    pub fn def(&self) -> &InstructionDef {
        &self.def
    }

    /// Value of a named argument.
    pub fn arg(&self, name: &str) -> Result<u32> {
        self.def
            .argument_index(name)
            .map(|idx| self.args[idx])
            .ok_or_else(|| SimError::no_field(name, self.def.name.as_str()))
    }

    /// All arguments as (name, value) pairs.
    pub fn args(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.def
            .arguments
            .iter()
            .zip(self.args.iter())
            .map(|(layout, &value)| (layout.name.as_str(), value))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.def.name)?;
        for (name, value) in self.args() {
            write!(f, " {}={:#x}", name, value)?;
        }
        Ok(())
    }
}

/// Decoder bound to one instruction schema.
#[derive(Debug, Clone)]
pub struct Decoder {
    schema: Arc<InstructionSchema>,
}

impl Decoder {
    pub fn new(schema: Arc<InstructionSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Arc<InstructionSchema> {
        &self.schema
    }

    /// Whether the word's opcode is in the schema.
    pub fn is_recognised(&self, word: u32) -> bool {
        self.schema.lookup(opcode_byte(word)).is_some()
    }

    /// Decode a word, failing with [`SimError::UnknownOpcode`] if unrecognised.
    pub fn decode(&self, word: u32) -> Result<Instruction> {
        let opcode = opcode_byte(word);
        let def = self
            .schema
            .lookup(opcode)
            .ok_or(SimError::UnknownOpcode { opcode, word })?;

        let args = def.arguments.iter().map(|layout| layout.extract(word)).collect();

        Ok(Instruction {
            raw: word,
            def: Arc::clone(def),
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schemas;

    fn decoder() -> Decoder {
        Decoder::new(Schemas::builtin().unwrap().instructions)
    }

    #[test]
    fn test_decode_replay() {
        let d = decoder();
        // load_mode=1, execute_while_loading=1, len=5, start_idx=7
        let word = 0x0400_0000 | 1 | (1 << 1) | (5 << 4) | (7 << 14);
        let inst = d.decode(word).unwrap();
        assert_eq!(inst.opcode(), Opcode::Replay);
        assert_eq!(inst.arg("load_mode").unwrap(), 1);
        assert_eq!(inst.arg("execute_while_loading").unwrap(), 1);
        assert_eq!(inst.arg("len").unwrap(), 5);
        assert_eq!(inst.arg("start_idx").unwrap(), 7);
        assert_eq!(inst.raw(), word);
    }

    #[test]
    fn test_last_argument_runs_to_bit_23() {
        let d = decoder();
        let inst = d.decode(0xA0FF_FFFF).unwrap();
        assert_eq!(inst.opcode(), Opcode::AtGetM);
        assert_eq!(inst.arg("mutex_index").unwrap(), 0x00FF_FFFF);
    }

    #[test]
    fn test_unknown_opcode() {
        let d = decoder();
        assert!(!d.is_recognised(0xFE00_0000));
        match d.decode(0xFE00_1234) {
            Err(SimError::UnknownOpcode { opcode, word }) => {
                assert_eq!(opcode, 0xFE);
                assert_eq!(word, 0xFE00_1234);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_argument_name() {
        let d = decoder();
        let inst = d.decode(0x0200_0000).unwrap();
        assert_eq!(inst.opcode(), Opcode::Nop);
        assert!(matches!(inst.arg("len"), Err(SimError::InvalidFieldAccess { .. })));
    }

    #[test]
    fn test_display_lists_arguments() {
        let d = decoder();
        let inst = d.decode(0xA100_0003).unwrap();
        assert_eq!(inst.to_string(), "ATRELM mutex_index=0x3");
    }
}
