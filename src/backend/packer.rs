//! Packer unit.
//!
//! Dst values are not modelled, so a PACR writes no data. What it does
//! keep is the address walk: each PACR advances the issuing thread's
//! packer ADCs (input side on channel 0, output side on channel 1) by one
//! of the thread's `ADDR_MOD_PACK` slots.

use crate::decode::Instruction;
use crate::error::Result;
use crate::schema::Opcode;
use crate::state::{AdcChannel, ConfigStore, Dim};

use super::unit::{unhandled, BackendUnit, InflightView, Pending, PendingQueue, UnitStats};
use super::Shared;

#[derive(Debug, Default)]
pub struct PackerUnit {
    pending: PendingQueue,
    stats: UnitStats,
}

/// One `ADDR_MOD_PACK_SECn` slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PackAddrMod {
    y_incr: u32,
    y_cr: bool,
    y_clear: bool,
    z_incr: u32,
    z_clear: bool,
}

impl PackAddrMod {
    fn load(cfg: &ConfigStore, thread: usize, slot: u32) -> Result<Self> {
        let field = |name: &str| cfg.thread_value(thread, &format!("ADDR_MOD_PACK_SEC{}_{}", slot, name));
        Ok(Self {
            y_incr: field("YsrcIncr")?,
            y_cr: field("YsrcCR")? != 0,
            y_clear: field("YsrcClear")? != 0,
            z_incr: field("ZsrcIncr")?,
            z_clear: field("ZsrcClear")? != 0,
        })
    }

    fn apply(&self, channel: &mut AdcChannel) {
        if self.y_clear {
            channel.clear(Dim::Y);
        } else if self.y_cr {
            channel.add_cr(Dim::Y, self.y_incr);
        } else {
            channel.add(Dim::Y, self.y_incr);
        }

        if self.z_clear {
            channel.clear(Dim::Z);
        } else {
            channel.add(Dim::Z, self.z_incr);
        }
    }
}

impl PackerUnit {
    fn execute(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        if inst.opcode() != Opcode::Pacr {
            return Err(unhandled(inst, self.name()));
        }
        let slot = inst.arg("AddrMode")? & 0x3;
        let addr_mod = PackAddrMod::load(&shared.config, thread, slot)?;
        let packers = &mut shared.adc[thread].packers;
        for channel in packers.channels.iter_mut() {
            addr_mod.apply(channel);
        }
        if shared.diagnostics.packing {
            let channel = &packers.channels[0];
            log::info!(
                "Packer: thread {} PACR slot {} -> y={} z={}",
                thread,
                slot,
                channel.y,
                channel.z
            );
        }
        Ok(())
    }
}

impl BackendUnit for PackerUnit {
    fn name(&self) -> &'static str {
        "packer"
    }

    fn admit(&mut self, inst: Instruction, thread: usize) -> Result<bool> {
        let accepted = self.pending.admit_one_per_thread(inst, thread);
        self.stats.record_offer(accepted);
        Ok(accepted)
    }

    fn drain(&mut self, shared: &mut Shared, _view: &InflightView) -> Result<()> {
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
