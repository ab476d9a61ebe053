//! tensix-sim library
//!
//! Cycle-stepped model of the Tensix coprocessor instruction pipeline:
//! per-thread frontends (MOP expander, replay expander, wait gate) feeding
//! a backend of functional units that share configuration, counters and
//! synchronization state.
//!
//! The general-purpose cores, the tile's memory map and the device clock
//! are outside this crate. The coprocessor consumes an
//! [`memory::AddressableMemory`] capability and is advanced once per cycle
//! through [`clock::Clockable`].

pub mod arch;
pub mod backend;
pub mod bits;
pub mod clock;
pub mod config;
pub mod coprocessor;
pub mod decode;
pub mod error;
pub mod frontend;
pub mod memory;
pub mod program;
pub mod schema;
pub mod state;
