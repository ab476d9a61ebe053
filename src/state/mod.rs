//! Architectural state shared by the backend units.

mod config_store;
mod counters;
mod registers;

pub use config_store::ConfigStore;
pub use counters::{AdcChannel, AdcGroup, AdcThread, Dim, Rwc, ADC_GROUPS};
pub use registers::{DstRegister, GprFile, SrcClient, SrcRegister, SRC_COLUMNS};
