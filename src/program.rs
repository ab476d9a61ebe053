//! Text program format for standalone runs.
//!
//! A program lists the instructions each thread pushes plus the state to
//! set up before the first cycle.
//!
//! # Format
//!
//! ```text
//! # Comments start with '#'
//! @mem 0x1000 0xDEADBEEF        # 32-bit L1 write before the run
//!
//! [thread 0]
//! @gpr 4 0x1234                 # GPR 4 of thread 0
//! @mop 3 SEMPOST sem_sel=1      # MOP config word 3 of thread 0
//! SEMINIT sem_sel=1 init_value=3 max_value=15
//! 0xA5000004                    # raw instruction word
//! ```
//!
//! Instructions are either a mnemonic followed by `name=value` arguments
//! (unnamed arguments are zero) or a raw hex word. `@mem` may appear
//! anywhere; `@gpr`, `@mop` and instructions need a `[thread N]` header.
//!
//! # Example
//!
//! ```
//! use tensix_sim::coprocessor::Coprocessor;
//! use tensix_sim::memory::SparseMemory;
//! use tensix_sim::program::Program;
//!
//! let mut cp = Coprocessor::with_memory(Box::new(SparseMemory::new()))?;
//! let text = "[thread 0]\nSEMINIT sem_sel=1 init_value=3 max_value=15\nSEMGET sem_sel=1\n";
//! let program = Program::parse(text, cp.backend().decoder().schema())?;
//! let summary = program.run(&mut cp, 100)?;
//! assert!(summary.completed);
//! assert_eq!(cp.backend().semaphore(0)?.value, 2);
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

use crate::arch::mmio::{GPR_BASE, GPR_THREAD_STRIDE, MOP_CFG_BASE};
use crate::arch::{GPRS_PER_THREAD, NUM_THREADS};
use crate::coprocessor::{Coprocessor, Core};
use crate::schema::InstructionSchema;

/// State written before the first cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setup {
    Memory { address: u64, value: u32 },
    Gpr { thread: usize, index: u32, value: u32 },
    MopConfig { thread: usize, index: u32, word: u32 },
}

/// Outcome of [`Program::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    /// Every word was pushed and nothing is left in flight
    pub completed: bool,
    /// Pushes refused because an intake FIFO was full
    pub intake_retries: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub setup: Vec<Setup>,
    pub threads: [Vec<u32>; NUM_THREADS],
}

fn parse_number(text: &str) -> Result<u32> {
    let clean = text.replace('_', "");
    let parsed = match clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => clean.parse(),
    };
    parsed.map_err(|e| anyhow!("invalid number '{}': {}", text, e))
}

/// Assemble one instruction from its tokens.
fn parse_instruction(tokens: &[&str], schema: &InstructionSchema) -> Result<u32> {
    let (head, rest) = tokens.split_first().ok_or_else(|| anyhow!("missing instruction"))?;
    if head.starts_with("0x") || head.starts_with("0X") {
        if !rest.is_empty() {
            bail!("unexpected text after raw word {}", head);
        }
        return parse_number(head);
    }

    let mut args = Vec::with_capacity(rest.len());
    for token in rest {
        let (name, value) = token
            .split_once('=')
            .ok_or_else(|| anyhow!("expected name=value, found '{}'", token))?;
        args.push((name, parse_number(value)?));
    }
    Ok(schema.encode(&head.to_ascii_uppercase(), &args)?)
}

impl Program {
    pub fn parse(text: &str, schema: &InstructionSchema) -> Result<Self> {
        let mut program = Program::default();
        let mut thread = None;

        for (number, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            program
                .parse_line(line, &mut thread, schema)
                .with_context(|| format!("line {}: '{}'", number + 1, raw.trim()))?;
        }
        Ok(program)
    }

    pub fn from_file(path: &Path, schema: &InstructionSchema) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading program {}", path.display()))?;
        Self::parse(&text, schema)
    }

    fn parse_line(&mut self, line: &str, thread: &mut Option<usize>, schema: &InstructionSchema) -> Result<()> {
        if let Some(header) = line.strip_prefix('[') {
            let inner = header.strip_suffix(']').ok_or_else(|| anyhow!("unterminated section"))?;
            let index = inner
                .strip_prefix("thread")
                .ok_or_else(|| anyhow!("unknown section '{}'", inner))?;
            let index = parse_number(index.trim())? as usize;
            if index >= NUM_THREADS {
                bail!("thread {} does not exist", index);
            }
            *thread = Some(index);
            return Ok(());
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let current = || thread.ok_or_else(|| anyhow!("'{}' needs a [thread N] section", tokens[0]));
        match tokens[0] {
            "@mem" => {
                let [address, value] = &tokens[1..] else {
                    bail!("expected @mem <address> <value>");
                };
                self.setup.push(Setup::Memory {
                    address: parse_number(address)? as u64,
                    value: parse_number(value)?,
                });
            }
            "@gpr" => {
                let [index, value] = &tokens[1..] else {
                    bail!("expected @gpr <index> <value>");
                };
                let index = parse_number(index)?;
                if index as usize >= GPRS_PER_THREAD {
                    bail!("GPR {} does not exist", index);
                }
                self.setup.push(Setup::Gpr {
                    thread: current()?,
                    index,
                    value: parse_number(value)?,
                });
            }
            "@mop" => {
                if tokens.len() < 3 {
                    bail!("expected @mop <index> <instruction>");
                }
                self.setup.push(Setup::MopConfig {
                    thread: current()?,
                    index: parse_number(tokens[1])?,
                    word: parse_instruction(&tokens[2..], schema)?,
                });
            }
            directive if directive.starts_with('@') => bail!("unknown directive {}", directive),
            _ => {
                let word = parse_instruction(&tokens, schema)?;
                self.threads[current()?].push(word);
            }
        }
        Ok(())
    }

    /// Instructions across all threads.
    pub fn len(&self) -> usize {
        self.threads.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply the setup entries.
    pub fn load(&self, cp: &mut Coprocessor) -> Result<()> {
        for entry in &self.setup {
            match *entry {
                Setup::Memory { address, value } => {
                    cp.backend_mut().shared_mut().bus_write_u32(address, value)?;
                }
                Setup::Gpr { thread, index, value } => {
                    let address = GPR_BASE + thread as u64 * GPR_THREAD_STRIDE + index as u64 * 4;
                    cp.mmio_write(Core::Brisc, address, value)?;
                }
                Setup::MopConfig { thread, index, word } => {
                    cp.mmio_write(Core::Trisc(thread), MOP_CFG_BASE + index as u64 * 4, word)?;
                }
            }
        }
        Ok(())
    }

    /// Load, then push each thread's instructions as intake space allows
    /// and step until everything has drained or `max_cycles` have run.
    pub fn run(&self, cp: &mut Coprocessor, max_cycles: u64) -> Result<RunSummary> {
        self.load(cp)?;
        let mut next = [0usize; NUM_THREADS];
        let mut intake_retries = 0;
        let start = cp.cycle();

        loop {
            for (thread, words) in self.threads.iter().enumerate() {
                while let Some(&word) = words.get(next[thread]) {
                    match cp.push_instruction(thread, word) {
                        Ok(()) => next[thread] += 1,
                        Err(e) if e.is_recoverable() => {
                            intake_retries += 1;
                            break;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }

            let pushed_all = next.iter().zip(&self.threads).all(|(&n, words)| n == words.len());
            let cycles = cp.cycle() - start;
            if pushed_all && !cp.has_inflight_instructions() {
                return Ok(RunSummary {
                    cycles,
                    completed: true,
                    intake_retries,
                });
            }
            if cycles >= max_cycles {
                log::warn!("Stopped after {} cycles with work outstanding", cycles);
                return Ok(RunSummary {
                    cycles,
                    completed: false,
                    intake_retries,
                });
            }
            cp.step()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::config::Diagnostics;
    use crate::memory::SparseMemory;
    use crate::schema::Schemas;

    fn coprocessor(depth: usize) -> Coprocessor {
        let schemas = Schemas::builtin().unwrap();
        Coprocessor::new(&schemas, Box::new(SparseMemory::new()), Diagnostics::default(), depth)
    }

    fn parse(cp: &Coprocessor, text: &str) -> Result<Program> {
        Program::parse(text, cp.backend().decoder().schema())
    }

    #[test]
    fn test_parse_sections_and_directives() {
        let cp = coprocessor(4);
        let program = parse(
            &cp,
            "@mem 0x100 7\n[thread 2]\n@gpr 1 0x10\n@mop 3 sempost sem_sel=1 # body\n0x0200_0000\nSEMGET sem_sel=2\n",
        )
        .unwrap();
        let schema = cp.backend().decoder().schema();
        let post = schema.encode("SEMPOST", &[("sem_sel", 1)]).unwrap();
        assert_eq!(
            program.setup,
            vec![
                Setup::Memory { address: 0x100, value: 7 },
                Setup::Gpr { thread: 2, index: 1, value: 0x10 },
                Setup::MopConfig { thread: 2, index: 3, word: post },
            ]
        );
        assert_eq!(program.threads[2], vec![0x0200_0000, schema.encode("SEMGET", &[("sem_sel", 2)]).unwrap()]);
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let cp = coprocessor(4);
        let err = parse(&cp, "SEMGET sem_sel=1\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 1"));
        assert!(parse(&cp, "[thread 3]\n").is_err());
        assert!(parse(&cp, "[thread 0]\nSEMGET bogus=1\n").is_err());
        assert!(parse(&cp, "[thread 0]\nSEMGET sem_sel\n").is_err());
        assert!(parse(&cp, "[thread 0]\n@frob 1\n").is_err());
        let err = parse(&cp, "\n\n[thread 0]\nNOTANOP\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 4"));
    }

    #[test]
    fn test_run_retries_full_intake() {
        let mut cp = coprocessor(1);
        let program = parse(
            &cp,
            "[thread 1]\nSEMPOST sem_sel=1\nSEMPOST sem_sel=1\nSEMPOST sem_sel=1\n",
        )
        .unwrap();
        let summary = program.run(&mut cp, 50).unwrap();
        assert!(summary.completed);
        assert!(summary.intake_retries > 0);
        assert_eq!(cp.backend().semaphore(0).unwrap().value, 3);
    }

    #[test]
    fn test_run_applies_setup() {
        let mut cp = coprocessor(8);
        let program = parse(
            &cp,
            "@mem 0x2000 0xCAFE\n[thread 0]\n@gpr 3 0x55\n@mop 3 SEMPOST sem_sel=2\n@mop 7 NOP\n\
             MOP loop_count=2 zmask_lo16=0b0\nWRCFG CfgReg=9 GprAddress=3\n",
        );
        // Binary literals are not part of the format.
        assert!(program.is_err());

        let program = parse(
            &cp,
            "@mem 0x2000 0xCAFE\n[thread 0]\n@gpr 3 0x55\n@mop 3 SEMPOST sem_sel=2\n@mop 7 NOP\n\
             MOP loop_count=2 zmask_lo16=2\nWRCFG CfgReg=9 GprAddress=3\n",
        )
        .unwrap();
        let summary = program.run(&mut cp, 50).unwrap();
        assert!(summary.completed);
        let backend: &Backend = cp.backend();
        assert_eq!(backend.semaphore(1).unwrap().value, 2);
        assert_eq!(backend.shared().config.bank_word(0, 9).unwrap(), 0x55);
        assert_eq!(cp.backend_mut().shared_mut().bus_read_u32(0x2000).unwrap(), 0xCAFE);
    }

    #[test]
    fn test_run_reports_incomplete() {
        let mut cp = coprocessor(4);
        // Waits forever on a semaphore nobody posts.
        let program = parse(
            &cp,
            "[thread 0]\nSEMWAIT wait_sem_cond=1 sem_sel=1 stall_res=2\nSEMPOST sem_sel=2\n",
        )
        .unwrap();
        let summary = program.run(&mut cp, 20).unwrap();
        assert!(!summary.completed);
        assert_eq!(summary.cycles, 20);
    }
}
