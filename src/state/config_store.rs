//! Backend configuration memory with schema-driven field access.

use std::sync::Arc;

use crate::arch::{CFG_BANK_WORDS, NUM_CFG_BANKS, NUM_THREADS, THD_STATE_SIZE};
use crate::error::{Result, SimError};
use crate::schema::{ConfigField, ConfigSchema, ConfigScope};

/// Two general config banks plus one thread config per thread.
///
/// Every word index is range-checked; an out-of-range index is reported as
/// [`SimError::IndexOutOfRange`] and is never clamped.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    schema: Arc<ConfigSchema>,
    banks: [[u32; CFG_BANK_WORDS]; NUM_CFG_BANKS],
    threads: [[u32; THD_STATE_SIZE]; NUM_THREADS],
    /// Log every write at info level
    trace_writes: bool,
}

impl ConfigStore {
    pub fn new(schema: Arc<ConfigSchema>) -> Self {
        Self {
            schema,
            banks: [[0; CFG_BANK_WORDS]; NUM_CFG_BANKS],
            threads: [[0; THD_STATE_SIZE]; NUM_THREADS],
            trace_writes: false,
        }
    }

    pub fn with_tracing(mut self, trace_writes: bool) -> Self {
        self.trace_writes = trace_writes;
        self
    }

    pub fn schema(&self) -> &Arc<ConfigSchema> {
        &self.schema
    }

    pub fn reset(&mut self) {
        self.banks = [[0; CFG_BANK_WORDS]; NUM_CFG_BANKS];
        self.threads = [[0; THD_STATE_SIZE]; NUM_THREADS];
    }

    // --- raw word access ---

    pub fn bank_word(&self, bank: usize, addr32: usize) -> Result<u32> {
        check_bank(bank, addr32)?;
        Ok(self.banks[bank][addr32])
    }

    pub fn set_bank_word(&mut self, bank: usize, addr32: usize, value: u32) -> Result<()> {
        check_bank(bank, addr32)?;
        if self.trace_writes {
            log::info!(
                "Set config [{}]{} (word {}) = {:#x}",
                bank,
                self.schema.name_at(ConfigScope::Bank, addr32),
                addr32,
                value
            );
        }
        self.banks[bank][addr32] = value;
        Ok(())
    }

    pub fn thread_word(&self, thread: usize, addr32: usize) -> Result<u32> {
        check_thread(thread, addr32)?;
        Ok(self.threads[thread][addr32])
    }

    pub fn set_thread_word(&mut self, thread: usize, addr32: usize, value: u32) -> Result<()> {
        check_thread(thread, addr32)?;
        if self.trace_writes {
            log::info!(
                "Set threadConfig [{}]{} (word {}) = {:#x}",
                thread,
                self.schema.name_at(ConfigScope::Thread, addr32),
                addr32,
                value
            );
        }
        self.threads[thread][addr32] = value;
        Ok(())
    }

    // --- named field access ---

    pub fn thread_value(&self, thread: usize, name: &str) -> Result<u32> {
        let field = self.schema.thread_field(name)?;
        Ok(field.parse(self.thread_word(thread, field.addr32)?))
    }

    pub fn bank_value(&self, bank: usize, name: &str) -> Result<u32> {
        let field = self.schema.bank_field(name)?;
        Ok(field.parse(self.bank_word(bank, field.addr32)?))
    }

    /// Read a bank field from the bank the thread's `CFG_STATE_ID` selects.
    pub fn active_value(&self, thread: usize, name: &str) -> Result<u32> {
        self.bank_value(self.state_id(thread)?, name)
    }

    pub fn set_thread_value(&mut self, thread: usize, name: &str, value: u32) -> Result<()> {
        let field = self.schema.thread_field(name)?;
        self.write_field(ConfigScope::Thread, thread, field, value)
    }

    pub fn set_bank_value(&mut self, bank: usize, name: &str, value: u32) -> Result<()> {
        let field = self.schema.bank_field(name)?;
        self.write_field(ConfigScope::Bank, bank, field, value)
    }

    /// Config bank selected by a thread.
    pub fn state_id(&self, thread: usize) -> Result<usize> {
        Ok(self.thread_value(thread, "CFG_STATE_ID_StateID")? as usize)
    }

    fn write_field(&mut self, scope: ConfigScope, index: usize, field: ConfigField, value: u32) -> Result<()> {
        match scope {
            ConfigScope::Thread => {
                let raw = self.thread_word(index, field.addr32)?;
                self.set_thread_word(index, field.addr32, field.insert(raw, value))
            }
            ConfigScope::Bank => {
                let raw = self.bank_word(index, field.addr32)?;
                self.set_bank_word(index, field.addr32, field.insert(raw, value))
            }
        }
    }
}

fn check_bank(bank: usize, addr32: usize) -> Result<()> {
    if bank >= NUM_CFG_BANKS {
        return Err(SimError::IndexOutOfRange {
            space: "config bank",
            index: bank,
            limit: NUM_CFG_BANKS,
        });
    }
    if addr32 >= CFG_BANK_WORDS {
        return Err(SimError::IndexOutOfRange {
            space: "config bank word",
            index: addr32,
            limit: CFG_BANK_WORDS,
        });
    }
    Ok(())
}

fn check_thread(thread: usize, addr32: usize) -> Result<()> {
    if thread >= NUM_THREADS {
        return Err(SimError::InvalidThread(thread));
    }
    if addr32 >= THD_STATE_SIZE {
        return Err(SimError::IndexOutOfRange {
            space: "thread config word",
            index: addr32,
            limit: THD_STATE_SIZE,
        });
    }
    Ok(())
}
