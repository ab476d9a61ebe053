//! tensix-sim: cycle-stepped simulator of the Tensix coprocessor pipeline

use std::env;
use std::path::Path;

use tensix_sim::arch::{NUM_MUTEXES, NUM_SEMAPHORES, NUM_THREADS, RESERVED_MUTEX};
use tensix_sim::config::Config;
use tensix_sim::coprocessor::Coprocessor;
use tensix_sim::memory::SparseMemory;
use tensix_sim::program::Program;

fn usage() {
    println!("Usage: tensix-sim [options] <program>");
    println!();
    println!("Options:");
    println!("  --cycles <n>      Stop after n cycles (default from config)");
    println!("  --dump-state      Print counters, semaphores and mutexes after the run");
    println!("  --stats           Print per-unit and per-thread statistics");
    println!("  --sample-config   Print a sample configuration file and exit");
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut dump_state = false;
    let mut show_stats = false;
    let mut cycles = None;
    let mut path = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dump-state" => dump_state = true,
            "--stats" => show_stats = true,
            "--cycles" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--cycles needs a value"))?;
                cycles = Some(value.parse::<u64>()?);
            }
            "--sample-config" => {
                if let Some(path) = Config::user_config_path() {
                    println!("# {}", path.display());
                }
                print!("{}", Config::sample_config());
                return Ok(());
            }
            "--help" | "-h" => {
                usage();
                return Ok(());
            }
            other if other.starts_with('-') => {
                anyhow::bail!("unknown option {}", other);
            }
            other => path = Some(other.to_string()),
        }
    }

    let path = match path {
        Some(p) => p,
        None => {
            usage();
            return Ok(());
        }
    };

    let config = Config::get();
    let max_cycles = cycles.unwrap_or_else(|| config.max_cycles());

    let mut cp = Coprocessor::from_config(config, Box::new(SparseMemory::new()))?;
    let program = Program::from_file(Path::new(&path), cp.backend().decoder().schema())?;

    println!("Loading: {}", path);
    for (thread, words) in program.threads.iter().enumerate() {
        if !words.is_empty() {
            println!("  thread {}: {} instructions", thread, words.len());
        }
    }
    println!();

    let summary = program.run(&mut cp, max_cycles)?;
    if summary.completed {
        println!("Completed in {} cycles", summary.cycles);
    } else {
        println!("Stopped after {} cycles with work still in flight", summary.cycles);
    }
    if summary.intake_retries > 0 {
        println!("Intake was full {} times", summary.intake_retries);
    }

    if show_stats {
        print_stats(&cp)?;
    }
    if dump_state {
        print_state(&cp)?;
    }

    Ok(())
}

/// Per-unit admission counters and per-thread issue counters
fn print_stats(cp: &Coprocessor) -> anyhow::Result<()> {
    println!();
    println!("Backend Units");
    println!("=============");
    println!("  {:10} {:>9} {:>9} {:>9} {:>7}", "unit", "accepted", "rejected", "executed", "stalls");
    for (name, stats) in cp.unit_stats() {
        println!(
            "  {:10} {:>9} {:>9} {:>9} {:>7}",
            name, stats.accepted, stats.rejected, stats.executed, stats.stall_cycles
        );
    }

    println!();
    println!("Threads");
    println!("=======");
    for thread in 0..NUM_THREADS {
        let stats = cp.thread_stats(thread)?;
        println!(
            "  thread {}: issued={} stall_cycles={} mops={}",
            thread, stats.issued, stats.stall_cycles, stats.mops_expanded
        );
    }
    Ok(())
}

/// Architectural state left behind by the run
fn print_state(cp: &Coprocessor) -> anyhow::Result<()> {
    let backend = cp.backend();
    let shared = backend.shared();

    println!();
    println!("Semaphores");
    println!("==========");
    for index in 0..NUM_SEMAPHORES {
        let sem = backend.semaphore(index)?;
        println!("  [{}] value={:2} max={:2}", index, sem.value, sem.max);
    }

    println!();
    println!("Mutexes");
    println!("=======");
    for index in (0..NUM_MUTEXES).filter(|&i| i != RESERVED_MUTEX) {
        match backend.mutex_holder(index) {
            Some(thread) => println!("  [{}] held by thread {}", index, thread),
            None => println!("  [{}] free", index),
        }
    }
    for (thread, index) in backend.mutex_waiters() {
        println!("  thread {} waiting on mutex {}", thread, index);
    }

    for thread in 0..NUM_THREADS {
        let frontend = cp.frontend(thread)?;
        let rwc = &shared.rwc[thread];
        let adc = &shared.adc[thread];
        println!();
        println!("Thread {}", thread);
        println!("--------");
        let (mop, replay, gate) = frontend.fifo_levels();
        println!("  FIFOs: mop={} replay={} gate={}", mop, replay, gate);
        if let Some(wait) = frontend.wait_gate().latched() {
            println!("  Latched wait: {:?}", wait);
        }
        println!(
            "  RWC: srcA={} ({}) srcB={} ({}) dst={} ({}) fidelity={}",
            rwc.src_a, rwc.src_a_cr, rwc.src_b, rwc.src_b_cr, rwc.dst, rwc.dst_cr, rwc.fidelity_phase
        );
        let groups = [("unpack0", &adc.unpackers[0]), ("unpack1", &adc.unpackers[1]), ("pack", &adc.packers)];
        for (name, group) in groups {
            for (i, ch) in group.channels.iter().enumerate() {
                println!(
                    "  ADC {}.{}: x={} y={} z={} w={}  cr: x={} y={} z={} w={}",
                    name, i, ch.x, ch.y, ch.z, ch.w, ch.x_cr, ch.y_cr, ch.z_cr, ch.w_cr
                );
            }
        }
    }

    println!();
    println!("Dst rows still undefined: {}", shared.dst.undefined_rows());
    Ok(())
}
