//! TDMA command interface.
//!
//! A small register window through which a control core queues mover and
//! L1-write commands:
//!
//! | Offset | Access | Meaning |
//! |--------|--------|---------|
//! | 0x00-0x0C | W | Four command parameters |
//! | 0x10 | W | Push a command, snapshotting the parameters |
//! | 0x14 | R | Status (bit 3: ready) |
//! | 0x24 | W | Ignored |
//!
//! Queued commands are executed by the mover unit, one per cycle.

use std::collections::VecDeque;

use crate::error::{Result, SimError};

/// Number of command parameter registers.
pub const TDMA_PARAMS: usize = 4;

/// Register offsets inside the window.
pub mod offsets {
    pub const PARAMS_END: u64 = 0x0C;
    pub const PUSH: u64 = 0x10;
    pub const STATUS: u64 = 0x14;
    pub const IGNORED: u64 = 0x24;
}

/// Status value reported at offset 0x14.
const STATUS_READY: u32 = 1 << 3;

/// Command opcodes (low byte of the command word).
pub mod commands {
    pub const MOVE: u32 = 0x40;
    pub const MOVE_WAIT: u32 = 0x46;
    pub const L1_WRITE: u32 = 0x66;
    pub const NOP: u32 = 0x89;
}

/// A queued command and the parameters captured when it was pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdmaCommand {
    pub word: u32,
    pub params: [u32; TDMA_PARAMS],
}

impl TdmaCommand {
    pub fn opcode(&self) -> u32 {
        self.word & 0xFF
    }

    /// Bit 31 selects the parameterless variant.
    pub fn is_parameterless(&self) -> bool {
        self.word >> 31 != 0
    }
}

/// Parameter registers and the pending command queue.
#[derive(Debug, Clone, Default)]
pub struct TdmaInterface {
    params: [u32; TDMA_PARAMS],
    queue: VecDeque<TdmaCommand>,
}

impl TdmaInterface {
    pub fn read(&self, offset: u64) -> Result<u32> {
        match offset {
            offsets::STATUS => Ok(STATUS_READY),
            _ => Err(SimError::UnsupportedOperation {
                mnemonic: "TDMA",
                detail: format!("read from offset {:#x}", offset),
            }),
        }
    }

    pub fn write(&mut self, offset: u64, value: u32) -> Result<()> {
        match offset {
            0..=offsets::PARAMS_END if offset % 4 == 0 => {
                self.params[(offset / 4) as usize] = value;
            }
            offsets::PUSH => {
                let params = if value >> 31 != 0 { [0; TDMA_PARAMS] } else { self.params };
                log::debug!("TDMA push {:#010x} params {:x?}", value, params);
                self.queue.push_back(TdmaCommand { word: value, params });
            }
            offsets::IGNORED => {}
            _ => {
                return Err(SimError::UnsupportedOperation {
                    mnemonic: "TDMA",
                    detail: format!("write to offset {:#x}", offset),
                })
            }
        }
        Ok(())
    }

    pub fn params(&self) -> [u32; TDMA_PARAMS] {
        self.params
    }

    pub fn pop(&mut self) -> Option<TdmaCommand> {
        self.queue.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
