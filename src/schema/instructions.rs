//! Instruction encodings: opcode byte to mnemonic, argument layout and
//! executing unit.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::bits::get_bits;
use crate::error::{Result, SimError};

/// Highest bit an argument may occupy; bits 24..31 hold the opcode.
pub const LAST_ARGUMENT_BIT: u32 = 23;

/// Backend resource an instruction is executed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExResource {
    /// Consumed by the frontend (MOP, REPLAY, NOP); dropped by the dispatcher
    None,
    Math,
    Sfpu,
    Thcon,
    Sync,
    Xmov,
    /// Miscellaneous unit (ADC control)
    Tdma,
    Cfg,
    Unpack,
    Pack,
    /// Tag with no wired unit
    Unknown,
}

impl ExResource {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "NONE" => ExResource::None,
            "MATH" => ExResource::Math,
            "SFPU" => ExResource::Sfpu,
            "THCON" => ExResource::Thcon,
            "SYNC" => ExResource::Sync,
            "XMOV" => ExResource::Xmov,
            "TDMA" => ExResource::Tdma,
            "CFG" => ExResource::Cfg,
            "UNPACK" => ExResource::Unpack,
            "PACK" => ExResource::Pack,
            _ => ExResource::Unknown,
        }
    }

    /// Whether a STALLWAIT/SEMWAIT block mask holds back this resource.
    ///
    /// Bit 0 covers every data-movement resource; bits 1-8 each cover one.
    pub fn blocked_by(self, block_mask: u32) -> bool {
        use ExResource::*;
        let bits: &[u32] = match self {
            Sync => &[1],
            Pack => &[0, 2],
            Unpack => &[0, 3],
            Xmov => &[0, 4],
            Thcon => &[0, 5],
            Tdma => &[0],
            Math => &[6],
            Cfg => &[7],
            Sfpu => &[8],
            None | Unknown => &[],
        };
        bits.iter().any(|&b| block_mask & (1 << b) != 0)
    }
}

macro_rules! opcodes {
    ($($variant:ident => $name:literal,)+) => {
        /// Mnemonics the backend units match on.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(non_camel_case_types)]
        pub enum Opcode {
            $($variant,)+
            /// Present in the schema but handled by no unit
            Other,
        }

        impl Opcode {
            pub fn from_mnemonic(name: &str) -> Self {
                match name {
                    $($name => Opcode::$variant,)+
                    _ => Opcode::Other,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)+
                    Opcode::Other => "?",
                }
            }
        }
    };
}

opcodes! {
    Mop => "MOP",
    Nop => "NOP",
    MopCfg => "MOP_CFG",
    Replay => "REPLAY",
    ZeroAcc => "ZEROACC",
    ZeroSrc => "ZEROSRC",
    MovA2D => "MOVA2D",
    MovB2D => "MOVB2D",
    MvMul => "MVMUL",
    ElwMul => "ELWMUL",
    ElwAdd => "ELWADD",
    ElwSub => "ELWSUB",
    DotPv => "DOTPV",
    GmPool => "GMPOOL",
    GaPool => "GAPOOL",
    ClearDvalid => "CLEARDVALID",
    SetRwc => "SETRWC",
    IncRwc => "INCRWC",
    Xmov => "XMOV",
    Pacr => "PACR",
    Unpacr => "UNPACR",
    UnpacrNop => "UNPACR_NOP",
    SetDmaReg => "SETDMAREG",
    FlushDma => "FLUSHDMA",
    Reg2Flop => "REG2FLOP",
    LoadInd => "LOADIND",
    SetAdc => "SETADC",
    SetAdcXy => "SETADCXY",
    IncAdcXy => "INCADCXY",
    AddrCrXy => "ADDRCRXY",
    SetAdcZw => "SETADCZW",
    IncAdcZw => "INCADCZW",
    AddrCrZw => "ADDRCRZW",
    SetAdcXx => "SETADCXX",
    AddDmaReg => "ADDDMAREG",
    SubDmaReg => "SUBDMAREG",
    MulDmaReg => "MULDMAREG",
    BitwopDmaReg => "BITWOPDMAREG",
    ShiftDmaReg => "SHIFTDMAREG",
    CmpDmaReg => "CMPDMAREG",
    DmaNop => "DMANOP",
    AtSwap => "ATSWAP",
    StoreInd => "STOREIND",
    StoreReg => "STOREREG",
    SfpLoad => "SFPLOAD",
    SfpLoadI => "SFPLOADI",
    SfpStore => "SFPSTORE",
    SfpMad => "SFPMAD",
    SfpAdd => "SFPADD",
    SfpMul => "SFPMUL",
    SfpEncc => "SFPENCC",
    SfpNop => "SFPNOP",
    SfpConfig => "SFPCONFIG",
    AtGetM => "ATGETM",
    AtRelM => "ATRELM",
    StallWait => "STALLWAIT",
    SemInit => "SEMINIT",
    SemPost => "SEMPOST",
    SemGet => "SEMGET",
    SemWait => "SEMWAIT",
    WrCfg => "WRCFG",
    RdCfg => "RDCFG",
    SetC16 => "SETC16",
    Rmwcib0 => "RMWCIB0",
    Rmwcib1 => "RMWCIB1",
    Rmwcib2 => "RMWCIB2",
    Rmwcib3 => "RMWCIB3",
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// One named argument and the inclusive bit range it occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentLayout {
    pub name: String,
    pub start_bit: u32,
    pub end_bit: u32,
}

impl ArgumentLayout {
    pub fn width(&self) -> u32 {
        self.end_bit - self.start_bit + 1
    }

    pub fn extract(&self, word: u32) -> u32 {
        get_bits(word, self.start_bit, self.end_bit)
    }
}

/// A fully resolved instruction definition.
#[derive(Debug, Clone)]
pub struct InstructionDef {
    pub name: String,
    pub op_binary: u8,
    pub ex_resource: ExResource,
    /// Resource tag as written in the schema (for error reporting)
    pub resource_tag: String,
    /// Arguments in ascending start-bit order
    pub arguments: Vec<ArgumentLayout>,
    pub opcode: Opcode,
}

impl InstructionDef {
    pub fn argument_index(&self, name: &str) -> Option<usize> {
        self.arguments.iter().position(|a| a.name == name)
    }
}

#[derive(Deserialize)]
struct RawArgument {
    name: String,
    start_bit: u32,
}

#[derive(Deserialize)]
struct RawInstruction {
    op_binary: u8,
    ex_resource: String,
    #[serde(default)]
    arguments: Vec<RawArgument>,
}

/// Immutable opcode table.
#[derive(Debug, Clone, Default)]
pub struct InstructionSchema {
    by_opcode: HashMap<u8, Arc<InstructionDef>>,
    by_name: HashMap<String, Arc<InstructionDef>>,
}

impl InstructionSchema {
    /// Parse a schema from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: HashMap<String, RawInstruction> = toml::from_str(text)?;
        let mut schema = Self::default();

        for (name, entry) in raw {
            let def = Arc::new(resolve(name, entry)?);
            if let Some(prev) = schema.by_opcode.insert(def.op_binary, Arc::clone(&def)) {
                return Err(SimError::Schema(format!(
                    "opcode 0x{:02X} assigned to both {} and {}",
                    def.op_binary, prev.name, def.name
                )));
            }
            schema.by_name.insert(def.name.clone(), def);
        }

        Ok(schema)
    }

    /// Load a schema file from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn lookup(&self, opcode: u8) -> Option<&Arc<InstructionDef>> {
        self.by_opcode.get(&opcode)
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<InstructionDef>> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_opcode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_opcode.is_empty()
    }

    /// Assemble an instruction word from a mnemonic and named argument values.
    ///
    /// Arguments not mentioned are zero.
    pub fn encode(&self, name: &str, args: &[(&str, u32)]) -> Result<u32> {
        let def = self
            .by_name(name)
            .ok_or_else(|| SimError::no_field(name, "instruction schema"))?;

        let mut word = (def.op_binary as u32) << 24;
        for &(arg_name, value) in args {
            let layout = def
                .arguments
                .iter()
                .find(|a| a.name == arg_name)
                .ok_or_else(|| SimError::no_field(arg_name, def.name.as_str()))?;
            let width = layout.width();
            if width < 32 && value >> width != 0 {
                return Err(SimError::FieldOverflow {
                    name: arg_name.to_string(),
                    value,
                    width,
                });
            }
            word |= value << layout.start_bit;
        }
        Ok(word)
    }
}

fn resolve(name: String, entry: RawInstruction) -> Result<InstructionDef> {
    let mut raw_args = entry.arguments;
    raw_args.sort_by_key(|a| a.start_bit);

    let mut arguments = Vec::with_capacity(raw_args.len());
    for (idx, arg) in raw_args.iter().enumerate() {
        let end_bit = match raw_args.get(idx + 1) {
            Some(next) => next.start_bit.checked_sub(1),
            None => Some(LAST_ARGUMENT_BIT),
        };
        match end_bit {
            Some(end_bit) if arg.start_bit <= end_bit && end_bit <= LAST_ARGUMENT_BIT => {
                arguments.push(ArgumentLayout {
                    name: arg.name.clone(),
                    start_bit: arg.start_bit,
                    end_bit,
                });
            }
            _ => {
                return Err(SimError::Schema(format!(
                    "{}: argument '{}' has an empty or out-of-range bit span",
                    name, arg.name
                )))
            }
        }
    }

    let ex_resource = ExResource::from_tag(&entry.ex_resource);
    Ok(InstructionDef {
        opcode: Opcode::from_mnemonic(&name),
        name,
        op_binary: entry.op_binary,
        ex_resource,
        resource_tag: entry.ex_resource,
        arguments,
    })
}
