//! Configuration unit: WRCFG, RDCFG, SETC16 and RMWCIBn.
//!
//! Config writes and ordinary config instructions are kept a cycle apart:
//! nothing but SETC16/WRCFG is admitted while either is queued or was
//! executed on the previous cycle.

use crate::arch::{CFG_BANK_WORDS, MAX_SETC16_PER_CYCLE, SETC16_VALUE_MASK, THD_STATE_SIZE};
use crate::decode::Instruction;
use crate::error::{Result, SimError};
use crate::schema::Opcode;

use super::unit::{unhandled, BackendUnit, InflightView, Pending, PendingQueue, UnitStats};
use super::Shared;

const CONFIG_WRITES: &[Opcode] = &[Opcode::SetC16, Opcode::WrCfg];

#[derive(Debug, Default)]
pub struct ConfigUnit {
    pending: PendingQueue,
    /// A SETC16 or WRCFG was executed on the previous cycle
    wrote_last_cycle: bool,
    stats: UnitStats,
}

fn check_bank_word(index: u32) -> Result<usize> {
    let index = index as usize;
    if index >= CFG_BANK_WORDS {
        return Err(SimError::IndexOutOfRange {
            space: "config bank word",
            index,
            limit: CFG_BANK_WORDS,
        });
    }
    Ok(index)
}

impl ConfigUnit {
    fn execute(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        match inst.opcode() {
            Opcode::WrCfg => {
                let word = check_bank_word(inst.arg("CfgReg")?)?;
                let gpr = inst.arg("GprAddress")? as usize;
                let bank = shared.config.state_id(thread)?;
                let count = if inst.arg("wr128b")? != 0 { 4 } else { 1 };
                for i in 0..count {
                    let value = shared.gprs.get(thread, gpr + i)?;
                    shared.config.set_bank_word(bank, word + i, value)?;
                }
            }
            Opcode::RdCfg => {
                let word = check_bank_word(inst.arg("CfgReg")?)?;
                let bank = shared.config.state_id(thread)?;
                let value = shared.config.bank_word(bank, word)?;
                shared.gprs.set(thread, inst.arg("GprAddress")? as usize, value)?;
            }
            Opcode::SetC16 => {
                let word = inst.arg("setc16_reg")? as usize;
                if word >= THD_STATE_SIZE {
                    return Err(SimError::IndexOutOfRange {
                        space: "thread config word",
                        index: word,
                        limit: THD_STATE_SIZE,
                    });
                }
                let value = inst.arg("setc16_value")? & SETC16_VALUE_MASK;
                shared.config.set_thread_word(thread, word, value)?;
            }
            Opcode::Rmwcib0 | Opcode::Rmwcib1 | Opcode::Rmwcib2 | Opcode::Rmwcib3 => {
                let lane = match inst.opcode() {
                    Opcode::Rmwcib0 => 0,
                    Opcode::Rmwcib1 => 1,
                    Opcode::Rmwcib2 => 2,
                    _ => 3,
                };
                let word = check_bank_word(inst.arg("CfgRegAddr")?)?;
                let data = (inst.arg("Data")? & 0xFF) << (8 * lane);
                let mask = (inst.arg("Mask")? & 0xFF) << (8 * lane);
                let bank = shared.config.state_id(thread)?;
                let old = shared.config.bank_word(bank, word)?;
                shared.config.set_bank_word(bank, word, (data & mask) | (old & !mask))?;
            }
            _ => return Err(unhandled(inst, self.name())),
        }
        Ok(())
    }
}

impl BackendUnit for ConfigUnit {
    fn name(&self) -> &'static str {
        "config"
    }

    fn admit(&mut self, inst: Instruction, thread: usize) -> Result<bool> {
        let accepted = match inst.opcode() {
            Opcode::SetC16 => self.pending.count_of(Opcode::SetC16) < MAX_SETC16_PER_CYCLE,
            Opcode::WrCfg => self.pending.count_of(Opcode::WrCfg) == 0,
            _ => {
                !self.wrote_last_cycle
                    && !self.pending.contains_any(CONFIG_WRITES)
                    && !self.pending.has_thread(thread)
            }
        };
        if accepted {
            self.pending.push(inst, thread);
        }
        self.stats.record_offer(accepted);
        Ok(accepted)
    }

    fn drain(&mut self, shared: &mut Shared, _view: &InflightView) -> Result<()> {
        self.wrote_last_cycle = self.pending.contains_any(CONFIG_WRITES);
        for Pending { inst, thread } in self.pending.take() {
            self.execute(shared, &inst, thread)?;
            self.stats.executed += 1;
        }
        Ok(())
    }

    fn has_inflight_from(&self, thread: usize) -> bool {
        self.pending.has_thread(thread)
    }

    fn stats(&self) -> &UnitStats {
        &self.stats
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
