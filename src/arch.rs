//! Wormhole Tensix Architecture Constants
//!
//! Sizes and addresses of the coprocessor as seen from the RISC-V control
//! cores. Values follow the tt-isa-documentation descriptions of the
//! Wormhole B0 Tensix tile (TensixCoprocessor/*.md, Mover.md).

// ============================================================================
// Threads and Frontend
// ============================================================================

/// Number of instruction-issuing threads (TRISC0, TRISC1, TRISC2)
pub const NUM_THREADS: usize = 3;

/// Opcode of the plain NOP instruction.
/// The MOP expander only treats this encoding as a no-op; DMANOP and
/// SFPNOP are real instructions as far as expansion is concerned.
pub const NOP_OPCODE: u8 = 0x02;

/// MOP expander configuration words per thread
pub const MOP_CFG_WORDS: usize = 9;

/// Replay buffer slots per thread
pub const REPLAY_SLOTS: usize = 32;

/// Replay length used when an instruction encodes `len = 0`
pub const REPLAY_DEFAULT_LEN: u32 = 64;

/// Bit position of the unpacker selector in UNPACR/UNPACR_NOP words
pub const UNPACKER_SELECT_BIT: u32 = 23;

// ============================================================================
// Configuration State
// ============================================================================

/// Size of one general config state in 128-bit units
pub const CFG_STATE_SIZE: usize = 47;

/// 32-bit words in one general config bank (47 x 4)
pub const CFG_BANK_WORDS: usize = CFG_STATE_SIZE * 4;

/// Number of general config banks (selected by CFG_STATE_ID_StateID)
pub const NUM_CFG_BANKS: usize = 2;

/// 32-bit words of per-thread configuration
pub const THD_STATE_SIZE: usize = 57;

/// First config word reachable by REG2FLOP (THCON section)
pub const THCON_CFGREG_BASE_ADDR32: usize = 52;

/// First config word of the global section; REG2FLOP stops below it
pub const GLOBAL_CFGREG_BASE_ADDR32: usize = 152;

/// Maximum value written by SETC16
pub const SETC16_VALUE_MASK: u32 = 0xFFFF;

// ============================================================================
// Register Files
// ============================================================================

/// General purpose registers per thread
pub const GPRS_PER_THREAD: usize = 64;

/// Rows in the Dst register (16-bit view)
pub const DST_ROWS: usize = 1024;

/// Rows in each SrcA/SrcB bank
pub const SRC_ROWS: usize = 64;

/// Number of SrcA (and SrcB) banks
pub const SRC_BANKS: usize = 2;

// ============================================================================
// Synchronization
// ============================================================================

/// Number of counting semaphores
pub const NUM_SEMAPHORES: usize = 8;

/// Saturation limit of every semaphore counter (4-bit)
pub const SEMAPHORE_MAX_VALUE: u8 = 15;

/// Mutex slots; slot 0 is reserved
pub const NUM_MUTEXES: usize = 8;

/// The reserved mutex slot
pub const RESERVED_MUTEX: usize = 0;

/// Maximum ATGETM/ATRELM admitted to the sync unit per cycle
pub const MAX_MUTEX_OPS_PER_CYCLE: usize = 3;

/// Maximum SETC16 admitted to the config unit per cycle
pub const MAX_SETC16_PER_CYCLE: usize = 3;

// ============================================================================
// Memory Map (as seen by the RISC-V cores)
// ============================================================================

/// L1 scratchpad size: 1464 KiB, starting at address 0
pub const L1_SIZE: u32 = 1024 * 1464;

/// Memory-mapped register windows owned by the coprocessor.
pub mod mmio {
    /// Instruction push window for thread 0; thread N is at `+ N * INSTRUCTION_STRIDE`
    pub const INSTRUCTION_BASE: u64 = 0xFFE4_0000;

    /// Distance between per-thread instruction push windows
    pub const INSTRUCTION_STRIDE: u64 = 0x1_0000;

    /// Size of each instruction push window
    pub const INSTRUCTION_WINDOW: u64 = 0x1_0000;

    /// GPR file: 3 threads x 64 registers x 4 bytes
    pub const GPR_BASE: u64 = 0xFFE0_0000;

    /// Bytes of GPR space per thread
    pub const GPR_THREAD_STRIDE: u64 = 64 * 4;

    /// Semaphore value registers (8 x 32-bit)
    pub const SEMAPHORE_BASE: u64 = 0xFFE8_0020;

    /// MOP expander configuration of the calling thread (9 x 32-bit)
    pub const MOP_CFG_BASE: u64 = 0xFFB8_0000;

    /// Backend configuration: both general banks then all thread configs
    pub const CONFIG_BASE: u64 = 0xFFEF_0000;

    /// TDMA command interface
    pub const TDMA_BASE: u64 = 0xFFB1_1000;

    /// Size of the TDMA command interface
    pub const TDMA_SIZE: u64 = 0x1000;

    /// Register space targeted by STOREREG
    pub const REGFILE_BASE: u32 = 0xFFB0_0000;

    /// NCRISC instruction RAM, reachable by mover writes to 0x40000..0x4FFFF
    pub const NCRISC_IRAM_BASE: u32 = 0xFFC0_0000;
}
