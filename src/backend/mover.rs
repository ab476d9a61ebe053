//! Mover unit: bulk copies and fills between L1 and the tile's private
//! address windows.
//!
//! Work arrives two ways. XMOV instructions take their addresses from the
//! issuing thread's THCON config, and control cores queue commands through
//! the TDMA window. Each cycle the unit executes one TDMA command if any is
//! queued, otherwise one XMOV.
//!
//! Addresses and counts are in bytes once decoded; the config and TDMA
//! fields hold them in 16-byte units.

use crate::arch::mmio::{CONFIG_BASE, NCRISC_IRAM_BASE};
use crate::arch::L1_SIZE;
use crate::decode::Instruction;
use crate::error::{Result, SimError};
use crate::schema::Opcode;

use super::tdma::{commands, TdmaCommand};
use super::unit::{unhandled, BackendUnit, InflightView, PendingQueue, UnitStats};
use super::Shared;

/// XMOVs that may wait in the unit at once.
const XMOV_QUEUE_DEPTH: usize = 4;

/// Size of each aliased region a single transfer must stay inside.
const REGION_SIZE: u32 = 0x1_0000;

/// Private IRAM as seen from the mover's destination address space.
const IRAM_ALIAS: std::ops::RangeInclusive<u32> = 0x4_0000..=0x4_FFFF;

/// Transfer direction of a move.
///
/// L1 is the tile's shared SRAM; L0 is the aliased window of config
/// registers and NCRISC instruction RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmovDirection {
    L0ToL1 = 0,
    L1ToL0 = 1,
    L0ToL0 = 2,
    L1ToL1 = 3,
}

impl XmovDirection {
    /// Decode from the low two bits of a mode field.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::L0ToL1,
            1 => Self::L1ToL0,
            2 => Self::L0ToL0,
            _ => Self::L1ToL1,
        }
    }

    fn reads_l1(self) -> bool {
        matches!(self, Self::L1ToL0 | Self::L1ToL1)
    }

    fn writes_l1(self) -> bool {
        matches!(self, Self::L0ToL1 | Self::L1ToL1)
    }
}

/// One decoded transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transfer {
    dst: u32,
    src: u32,
    count: u32,
    direction: XmovDirection,
}

impl Transfer {
    fn error(&self, reason: &'static str) -> SimError {
        SimError::UnsupportedTransfer {
            src: self.src,
            dst: self.dst,
            count: self.count,
            mode: self.direction as u8,
            reason,
        }
    }

    /// Bus address written, or `None` when the writes are discarded.
    fn destination(&self) -> Result<Option<u64>> {
        if self.direction.writes_l1() {
            if self.dst >= L1_SIZE {
                return Err(self.error("destination outside L1"));
            }
            return Ok(Some(self.dst as u64));
        }

        let dst = if self.dst < REGION_SIZE {
            CONFIG_BASE as u32 + self.dst
        } else if IRAM_ALIAS.contains(&self.dst) {
            self.dst - IRAM_ALIAS.start() + NCRISC_IRAM_BASE
        } else {
            return Ok(None);
        };
        if (dst % REGION_SIZE) + self.count > REGION_SIZE {
            return Err(self.error("transfer spans more than one region"));
        }
        Ok(Some(dst as u64))
    }
}

#[derive(Debug, Default)]
pub struct MoverUnit {
    xmovs: PendingQueue,
    stats: UnitStats,
}

impl MoverUnit {
    /// Whether an XMOV is still queued.
    pub fn has_outstanding(&self) -> bool {
        !self.xmovs.is_empty()
    }

    fn xmov(&self, shared: &mut Shared, inst: &Instruction, thread: usize) -> Result<()> {
        if inst.opcode() != Opcode::Xmov {
            return Err(unhandled(inst, self.name()));
        }
        let cfg = &shared.config;
        let transfer = Transfer {
            dst: cfg.active_value(thread, "THCON_SEC0_REG6_Destination_address")? << 4,
            src: cfg.active_value(thread, "THCON_SEC0_REG6_Source_address")? << 4,
            count: (cfg.active_value(thread, "THCON_SEC0_REG6_Buffer_size")? & 0xFFFF) << 4,
            direction: XmovDirection::from_bits(cfg.active_value(thread, "THCON_SEC0_REG6_Transfer_direction")?),
        };
        self.transfer(shared, transfer)
    }

    fn command(&self, shared: &mut Shared, command: TdmaCommand) -> Result<()> {
        let [p0, p1, p2, p3] = command.params;
        let unsupported = |detail: String| SimError::UnsupportedOperation { mnemonic: "TDMA", detail };
        match command.opcode() {
            commands::MOVE => {
                if command.is_parameterless() {
                    return Err(unsupported(format!("parameterless move {:#010x}", command.word)));
                }
                self.transfer(
                    shared,
                    Transfer {
                        dst: p1 << 4,
                        src: p0 << 4,
                        count: (p2 & 0xFFFF) << 4,
                        direction: XmovDirection::from_bits(p3),
                    },
                )
            }
            commands::MOVE_WAIT | commands::NOP => Ok(()),
            commands::L1_WRITE => {
                if command.is_parameterless() || command.word & 0x600 != 0x600 {
                    return Err(unsupported(format!("L1 write form {:#010x}", command.word)));
                }
                if p0 >= L1_SIZE {
                    return Err(unsupported(format!("L1 write to {:#x}", p0)));
                }
                if command.word & 0x100 != 0 {
                    let value = ((p3 as u64) << 32) | p2 as u64;
                    shared.bus_write(p0 as u64, &value.to_le_bytes())
                } else {
                    shared.bus_write_u32(p0 as u64, p2)
                }
            }
            _ => Err(unsupported(format!("command {:#010x}", command.word))),
        }
    }

    /// Copy (from L1) or zero-fill (from L0) `count` bytes.
    fn transfer(&self, shared: &mut Shared, transfer: Transfer) -> Result<()> {
        let destination = transfer.destination()?;
        let data = if transfer.direction.reads_l1() {
            if transfer.src >= L1_SIZE {
                return Err(transfer.error("source outside L1"));
            }
            shared.bus_read(transfer.src as u64, transfer.count as usize)?
        } else {
            vec![0u8; transfer.count as usize]
        };
        log::debug!(
            "Mover {:?} {} bytes from {:#x} to {:#x?}",
            transfer.direction,
            transfer.count,
            transfer.src,
            destination
        );
        match destination {
            Some(address) if !data.is_empty() => shared.bus_write(address, &data),
            _ => Ok(()),
        }
    }
}

impl BackendUnit for MoverUnit {
    fn name(&self) -> &'static str {
        "mover"
    }

    fn admit(&mut self, inst: Instruction, thread: usize) -> Result<bool> {
        let accepted = self.xmovs.len() < XMOV_QUEUE_DEPTH && self.xmovs.admit_one_per_thread(inst, thread);
        self.stats.record_offer(accepted);
        Ok(accepted)
    }

    fn drain(&mut self, shared: &mut Shared, _view: &InflightView) -> Result<()> {
        if let Some(command) = shared.tdma.pop() {
            self.command(shared, command)?;
        } else if let Some(pending) = self.xmovs.pop_front() {
            self.xmov(shared, &pending.inst, pending.thread)?;
        } else {
            return Ok(());
        }
        self.stats.executed += 1;
        Ok(())
    }

    fn has_inflight_from(&self, thread: usize) -> bool {
        self.xmovs.has_thread(thread)
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
    use super::super::Backend;
    use super::*;
    use crate::arch::mmio::TDMA_BASE;

    fn push_command(be: &mut Backend, word: u32, params: [u32; 4]) {
        for (i, p) in params.iter().enumerate() {
            be.mmio_write(TDMA_BASE + 4 * i as u64, *p).unwrap();
        }
        be.mmio_write(TDMA_BASE + 0x10, word).unwrap();
    }

    fn read(be: &mut Backend, address: u64, len: usize) -> Vec<u8> {
        be.shared_mut().bus_read(address, len).unwrap()
    }

    #[test]
    fn test_direction_decoding() {
        assert_eq!(XmovDirection::from_bits(0), XmovDirection::L0ToL1);
        assert_eq!(XmovDirection::from_bits(7), XmovDirection::L1ToL1);
        assert!(XmovDirection::L1ToL0.reads_l1());
        assert!(!XmovDirection::L1ToL0.writes_l1());
    }

    #[test]
    fn test_l1_to_l1_copy_via_tdma() {
        let mut be = backend();
        be.shared_mut().bus_write(0x1000, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        push_command(&mut be, commands::MOVE, [0x100, 0x200, 1, 3]);
        assert!(be.mover_outstanding());
        be.tick().unwrap();
        assert!(!be.mover_outstanding());
        let copied = read(&mut be, 0x2000, 16);
        assert_eq!(&copied[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_l0_fill_targets_config_window() {
        let mut be = backend();
        be.shared_mut().config.set_bank_word(0, 4, 0xDEAD_BEEF).unwrap();
        be.shared_mut().config.set_bank_word(0, 8, 0x1234).unwrap();
        // L0 -> L0 zero-fills 16 bytes at config offset 0x10 (words 4..8)
        push_command(&mut be, commands::MOVE, [0, 1, 1, 2]);
        be.tick().unwrap();
        assert_eq!(be.shared().config.bank_word(0, 4).unwrap(), 0);
        assert_eq!(be.shared().config.bank_word(0, 8).unwrap(), 0x1234);
    }

    #[test]
    fn test_transfer_limits() {
        let mut be = backend();
        // Straddles the end of the config region
        push_command(&mut be, commands::MOVE, [0, 0xFFF, 2, 2]);
        assert!(matches!(be.tick(), Err(SimError::UnsupportedTransfer { .. })));

        // Destination outside L1 for a _TO_L1 mode
        let mut be = backend();
        push_command(&mut be, commands::MOVE, [0, L1_SIZE >> 4, 1, 0]);
        assert!(matches!(be.tick(), Err(SimError::UnsupportedTransfer { .. })));

        // Unaliased L0 destination: writes discarded, no straddle check
        let mut be = backend();
        push_command(&mut be, commands::MOVE, [0, 0x2_0000 >> 4, 0x2000, 2]);
        be.tick().unwrap();
    }

    #[test]
    fn test_l1_write_commands() {
        let mut be = backend();
        push_command(&mut be, 0x600 | commands::L1_WRITE, [0x40, 0, 0xAABB_CCDD, 0x1122_3344]);
        push_command(&mut be, 0x700 | commands::L1_WRITE, [0x80, 0, 0xAABB_CCDD, 0x1122_3344]);
        be.tick().unwrap();
        be.tick().unwrap();
        assert_eq!(read(&mut be, 0x40, 8), vec![0xDD, 0xCC, 0xBB, 0xAA, 0, 0, 0, 0]);
        assert_eq!(
            read(&mut be, 0x80, 8),
            vec![0xDD, 0xCC, 0xBB, 0xAA, 0x44, 0x33, 0x22, 0x11]
        );

        push_command(&mut be, 0x200 | commands::L1_WRITE, [0x40, 0, 1, 0]);
        assert!(matches!(be.tick(), Err(SimError::UnsupportedOperation { .. })));
    }

    #[test]
    fn test_xmov_uses_thread_config_after_commands() {
        let mut be = backend();
        be.shared_mut().bus_write(0x300, &[9; 16]).unwrap();
        let cfg = &mut be.shared_mut().config;
        cfg.set_bank_value(0, "THCON_SEC0_REG6_Source_address", 0x30).unwrap();
        cfg.set_bank_value(0, "THCON_SEC0_REG6_Destination_address", 0x50).unwrap();
        cfg.set_bank_value(0, "THCON_SEC0_REG6_Buffer_size", 1).unwrap();
        cfg.set_bank_value(0, "THCON_SEC0_REG6_Transfer_direction", 3).unwrap();

        push_command(&mut be, commands::NOP, [0; 4]);
        assert!(issue(&mut be, 0, "XMOV", &[]));
        assert!(!be.stall_condition_met(0, 12));
        be.tick().unwrap();
        // The TDMA command went first
        assert!(be.mover_outstanding());
        assert_eq!(read(&mut be, 0x500, 1), vec![0]);
        be.tick().unwrap();
        assert!(be.stall_condition_met(0, 12));
        assert_eq!(read(&mut be, 0x500, 16), vec![9; 16]);
    }

    #[test]
    fn test_unknown_command() {
        let mut be = backend();
        push_command(&mut be, 0x8000_0012, [0; 4]);
        assert!(matches!(be.tick(), Err(SimError::UnsupportedOperation { .. })));
    }
}
