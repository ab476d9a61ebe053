//! Register files shared by the backend units.

use crate::arch::{DST_ROWS, GPRS_PER_THREAD, NUM_THREADS, SRC_ROWS};
use crate::error::{Result, SimError};

/// General purpose registers, 64 per thread.
#[derive(Debug, Clone)]
pub struct GprFile {
    regs: [[u32; GPRS_PER_THREAD]; NUM_THREADS],
}

impl Default for GprFile {
    fn default() -> Self {
        Self {
            regs: [[0; GPRS_PER_THREAD]; NUM_THREADS],
        }
    }
}

impl GprFile {
    pub fn get(&self, thread: usize, index: usize) -> Result<u32> {
        check(thread, index)?;
        Ok(self.regs[thread][index])
    }

    pub fn set(&mut self, thread: usize, index: usize, value: u32) -> Result<()> {
        check(thread, index)?;
        self.regs[thread][index] = value;
        Ok(())
    }

    pub fn thread(&self, thread: usize) -> &[u32; GPRS_PER_THREAD] {
        &self.regs[thread]
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn check(thread: usize, index: usize) -> Result<()> {
    if thread >= NUM_THREADS {
        return Err(SimError::InvalidThread(thread));
    }
    if index >= GPRS_PER_THREAD {
        return Err(SimError::IndexOutOfRange {
            space: "GPR",
            index,
            limit: GPRS_PER_THREAD,
        });
    }
    Ok(())
}

/// Which side currently owns a SrcA/SrcB bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrcClient {
    MatrixUnit,
    Unpackers,
}

/// Columns per Src row
pub const SRC_COLUMNS: usize = 16;

/// One bank of SrcA or SrcB.
#[derive(Debug, Clone)]
pub struct SrcRegister {
    pub allowed_client: SrcClient,
    data: Box<[[u32; SRC_COLUMNS]; SRC_ROWS]>,
}

impl Default for SrcRegister {
    fn default() -> Self {
        Self {
            allowed_client: SrcClient::Unpackers,
            data: Box::new([[0; SRC_COLUMNS]; SRC_ROWS]),
        }
    }
}

impl SrcRegister {
    pub fn flip_allowed_client(&mut self) {
        self.allowed_client = match self.allowed_client {
            SrcClient::Unpackers => SrcClient::MatrixUnit,
            SrcClient::MatrixUnit => SrcClient::Unpackers,
        };
    }

    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.data[row % SRC_ROWS][col % SRC_COLUMNS]
    }

    pub fn set(&mut self, row: usize, col: usize, value: u32) {
        self.data[row % SRC_ROWS][col % SRC_COLUMNS] = value;
    }

    /// Set every datum to `value`.
    pub fn fill(&mut self, value: u32) {
        for row in self.data.iter_mut() {
            row.fill(value);
        }
    }
}

/// Dst register occupancy.
///
/// Values are not modelled; only which 16-bit rows hold defined data.
#[derive(Debug, Clone)]
pub struct DstRegister {
    undefined: [u64; DST_ROWS / 64],
}

impl Default for DstRegister {
    fn default() -> Self {
        Self {
            undefined: [0; DST_ROWS / 64],
        }
    }
}

impl DstRegister {
    pub fn mark_undefined(&mut self, row: usize) {
        let row = row % DST_ROWS;
        self.undefined[row / 64] |= 1 << (row % 64);
    }

    /// Mark one 32-bit row, which spans 16-bit rows `2r` and `2r + 1`.
    pub fn mark_undefined_32b(&mut self, row: usize) {
        self.mark_undefined(row * 2);
        self.mark_undefined(row * 2 + 1);
    }

    pub fn mark_defined(&mut self, row: usize) {
        let row = row % DST_ROWS;
        self.undefined[row / 64] &= !(1 << (row % 64));
    }

    pub fn is_undefined(&self, row: usize) -> bool {
        let row = row % DST_ROWS;
        self.undefined[row / 64] & (1 << (row % 64)) != 0
    }

    pub fn undefined_rows(&self) -> usize {
        self.undefined.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
