//! MOP expander: the first frontend stage.
//!
//! A MOP instruction is replaced by the sequence one of two templates
//! generates from the thread's nine MOP config words. MOP_CFG latches the
//! upper half of the template-0 mask. Everything else passes through.
//!
//! Config word layout per template:
//!
//! | word | template 0 | template 1 |
//! |------|------------|------------|
//! | 0    | -          | outer count (7 bits) |
//! | 1    | flags: bit 0 `hasB`, bit 1 `hasA123` | inner count (7 bits) |
//! | 2    | B          | start op |
//! | 3    | A0         | end op 0 |
//! | 4    | A1         | end op 1 |
//! | 5    | A2         | loop op |
//! | 6    | A3         | loop op 1 |
//! | 7    | skip A0    | last op (last outer iteration) |
//! | 8    | skip B     | last op (other outer iterations) |

use std::collections::VecDeque;

use crate::arch::{MOP_CFG_WORDS, NOP_OPCODE};
use crate::decode::{opcode_byte, Instruction};
use crate::error::{Result, SimError};
use crate::schema::Opcode;

/// Template 1 loop counts are 7-bit fields.
const LOOP_COUNT_MASK: u32 = 0x7F;

/// Only the plain NOP encoding counts; DMANOP and SFPNOP are real
/// instructions to the expander.
#[inline]
pub fn is_nop(word: u32) -> bool {
    opcode_byte(word) == NOP_OPCODE
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MopExpander {
    config: [u32; MOP_CFG_WORDS],
    mask_hi: u32,
    /// MOPs expanded since reset
    expanded: u64,
}

impl MopExpander {
    pub fn config(&self) -> &[u32; MOP_CFG_WORDS] {
        &self.config
    }

    pub fn mask_hi(&self) -> u32 {
        self.mask_hi
    }

    pub fn expanded(&self) -> u64 {
        self.expanded
    }

    /// Memory-mapped write of one config word; `offset` is a byte offset.
    pub fn write_config(&mut self, offset: u64, value: u32) -> Result<()> {
        let index = (offset / 4) as usize;
        if index >= MOP_CFG_WORDS {
            return Err(SimError::IndexOutOfRange {
                space: "MOP config",
                index,
                limit: MOP_CFG_WORDS,
            });
        }
        self.config[index] = value;
        Ok(())
    }

    /// Handle one instruction, pushing what it expands to onto `out`.
    pub fn process(&mut self, inst: &Instruction, out: &mut VecDeque<u32>) -> Result<()> {
        match inst.opcode() {
            Opcode::Mop => {
                self.expanded += 1;
                if inst.arg("mop_type")? == 0 {
                    let mask = (self.mask_hi << 16) | inst.arg("zmask_lo16")?;
                    out.extend(self.expand_template_zero(mask, inst.arg("loop_count")?));
                } else {
                    out.extend(self.expand_template_one());
                }
            }
            Opcode::MopCfg => self.mask_hi = inst.arg("zmask_hi16")?,
            _ => out.push_back(inst.raw()),
        }
        Ok(())
    }

    /// Bitmask template: one step per iteration, LSB of `mask` first.
    pub fn expand_template_zero(&self, mut mask: u32, loop_count: u32) -> Vec<u32> {
        let [_, flags, insn_b, a0, a1, a2, a3, skip_a0, skip_b] = self.config;
        let has_b = flags & 1 != 0;
        let has_a123 = flags & 2 != 0;

        let mut out = Vec::new();
        for _ in 0..=loop_count {
            if mask & 1 == 0 {
                out.push(a0);
                if has_a123 {
                    out.extend_from_slice(&[a1, a2, a3]);
                }
                if has_b {
                    out.push(insn_b);
                }
            } else {
                out.push(skip_a0);
                if has_b {
                    out.push(skip_b);
                }
            }
            mask >>= 1;
        }
        out
    }

    /// Nested-loop template.
    pub fn expand_template_one(&self) -> Vec<u32> {
        let [outer, inner, start, end0, end1, mut loop_op, loop_op1, last_outer, last_inner] =
            self.config;
        let mut outer = outer & LOOP_COUNT_MASK;
        let mut inner = inner & LOOP_COUNT_MASK;

        // Alternating bodies run for twice as many iterations.
        let flip = if is_nop(loop_op1) {
            0
        } else {
            inner *= 2;
            loop_op ^ loop_op1
        };

        // Hardware quirk: this exact shape runs 129 times.
        if outer == 1 && is_nop(start) && inner == 0 && !is_nop(end0) {
            outer += 128;
        }

        let mut out = Vec::new();
        for j in 0..outer {
            if !is_nop(start) {
                out.push(start);
            }
            for i in 0..inner {
                out.push(if i != inner - 1 {
                    loop_op
                } else if j != outer - 1 {
                    last_inner
                } else {
                    last_outer
                });
                loop_op ^= flip;
            }
            if !is_nop(end0) {
                out.push(end0);
                if !is_nop(end1) {
                    out.push(end1);
                }
            }
        }
        out
    }
}
