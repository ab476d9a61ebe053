//! Vector unit (SFPU).
//!
//! Lane arithmetic is not modelled. SFPLOAD and SFPSTORE advance the
//! issuing thread's RWCs, and SFPSTORE marks the Dst rows it writes as
//! defined; every other SFPU instruction only occupies the unit for a cycle.

use crate::decode::Instruction;
use crate::error::Result;
use crate::schema::Opcode;

use super::unit::{unhandled, BackendUnit, InflightView, Pending, PendingQueue, UnitStats};
use super::Shared;

/// Dst rows covered by one SFPSTORE (32 lanes, 8 per row).
const STORE_ROWS: usize = 4;

#[derive(Debug, Default)]
pub struct VectorUnit {
    pending: PendingQueue,
    stats: UnitStats,
}

impl VectorUnit {
    fn execute(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        match inst.opcode() {
            Opcode::SfpStore => {
                let cfg = &shared.config;
                let address = inst.arg("dest_reg_addr")?
                    + cfg.thread_value(thread, "DEST_TARGET_REG_CFG_MATH_Offset")?
                    + shared.rwc[thread].dst
                    + cfg.active_value(thread, "DEST_REGW_BASE_Base")?;
                let first = (address & !3) as usize;
                for row in first..first + STORE_ROWS {
                    shared.dst.mark_defined(row);
                }
                if shared.diagnostics.fpu {
                    log::info!("SFPU stored dst rows {}..{} from thread {}", first, first + STORE_ROWS, thread);
                }
                self.advance(shared, inst, thread)
            }
            Opcode::SfpLoad => self.advance(shared, inst, thread),
            Opcode::SfpLoadI
            | Opcode::SfpMad
            | Opcode::SfpAdd
            | Opcode::SfpMul
            | Opcode::SfpEncc
            | Opcode::SfpNop
            | Opcode::SfpConfig => Ok(()),
            _ => Err(unhandled(inst, self.name())),
        }
    }

    /// Address mods from the SFPU leave the fidelity phase alone.
    fn advance(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        let addr_mod = inst.arg("sfpu_addr_mode")?;
        let Shared { rwc, config, .. } = shared;
        rwc[thread].apply_addr_mod(config, thread, addr_mod, false)
    }
}

impl BackendUnit for VectorUnit {
    fn name(&self) -> &'static str {
        "vector"
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

#[cfg(test)]
mod tests {
    use super::super::test_support::*;

    #[test]
    fn test_sfpstore_defines_rows_and_advances() {
        let mut be = backend();
        let cfg = &mut be.shared_mut().config;
        cfg.set_thread_value(0, "ADDR_MOD_DST_SEC1_DestIncr", 8).unwrap();
        cfg.set_thread_value(0, "ADDR_MOD_DST_SEC1_FidelityIncr", 1).unwrap();
        assert!(issue(&mut be, 0, "ZEROACC", &[("clear_mode", 3)]));
        be.tick().unwrap();

        assert!(issue(&mut be, 0, "SFPSTORE", &[("dest_reg_addr", 18), ("sfpu_addr_mode", 1)]));
        be.tick().unwrap();
        let shared = be.shared();
        assert!((16..20).all(|row| !shared.dst.is_undefined(row)));
        assert!(shared.dst.is_undefined(20));
        assert_eq!(shared.rwc[0].dst, 8);
        assert_eq!(shared.rwc[0].fidelity_phase, 0);
    }

    #[test]
    fn test_arithmetic_occupies_one_cycle() {
        let mut be = backend();
        assert!(issue(&mut be, 1, "SFPMAD", &[("lreg_dest", 3)]));
        assert!(!issue(&mut be, 1, "SFPNOP", &[]));
        assert!(!be.stall_condition_met(1, 14));
        be.tick().unwrap();
        assert!(be.stall_condition_met(1, 14));
        assert!(issue(&mut be, 1, "SFPLOAD", &[]));
    }
}
