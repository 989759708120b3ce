//! Censor 932 emulator - CLI entry point.
//!
//! `censor932 run <image>` loads a raw memory image (big-endian 16-bit
//! half-words, placed at address 0) and steps the CPU until an error or
//! the cycle limit.

use clap::{Parser, Subcommand};

use censor932::{Cpu, DirectMemory, MemoryRange};

#[derive(Parser)]
#[command(name = "censor932")]
#[command(version = "0.1.0")]
#[command(about = "An emulator for the Censor 932 computer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a raw memory image until an error or the cycle limit
    Run {
        /// Path to the image: big-endian 16-bit half-words, loaded at address 0
        image: String,
        /// Number of half-word cells of memory to allocate
        #[arg(short, long, default_value = "65536")]
        memory: u32,
        /// Maximum number of instructions to execute
        #[arg(short = 'c', long, default_value = "10000")]
        max_cycles: u64,
        /// Print each executed instruction
        #[arg(short, long)]
        trace: bool,
        /// Treat unassigned opcodes as NOP instead of stopping
        #[arg(short, long)]
        lenient: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            image,
            memory,
            max_cycles,
            trace,
            lenient,
        } => run_image(&image, memory, max_cycles, trace, lenient),
    }
}

fn run_image(path: &str, memory: u32, max_cycles: u64, trace: bool, lenient: bool) {
    let raw = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("failed to read {}: {}", path, e);
            std::process::exit(1);
        }
    };
    if raw.len() % 2 != 0 {
        eprintln!("image {} has an odd number of bytes", path);
        std::process::exit(1);
    }

    if memory == 0 {
        eprintln!("memory size must be at least one cell");
        std::process::exit(1);
    }

    let halves: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    println!("loaded {} half-words from {}", halves.len(), path);

    let mut backing = DirectMemory::new(memory);
    if let Err(e) = backing.load(0, &halves) {
        eprintln!("image does not fit in {} cells: {}", memory, e);
        std::process::exit(1);
    }

    let mut cpu = Cpu::new();
    cpu.set_lenient(lenient);
    if let Err(e) = cpu.register_memory(MemoryRange::new(0, memory - 1), Box::new(backing)) {
        eprintln!("failed to register memory: {}", e);
        std::process::exit(1);
    }

    let mut stopped = None;
    while cpu.cycles < max_cycles {
        let ic = cpu.regs.ic;
        match cpu.step() {
            Ok(instr) => {
                if trace {
                    println!("{:06x}: {:<4}  CC={}", ic, instr.mnemonic(), cpu.regs.cc);
                }
            }
            Err(e) => {
                stopped = Some(e);
                break;
            }
        }
    }

    println!();
    println!("cycles: {}", cpu.cycles);
    println!("IC: {:#07x}  CC: {}", cpu.regs.ic, cpu.regs.cc);
    for (i, chunk) in cpu.regs.g.chunks(4).enumerate() {
        let base = i * 4;
        println!(
            "G{:<2} {:08x}  G{:<2} {:08x}  G{:<2} {:08x}  G{:<2} {:08x}",
            base,
            chunk[0],
            base + 1,
            chunk[1],
            base + 2,
            chunk[2],
            base + 3,
            chunk[3]
        );
    }

    if let Some(e) = stopped {
        eprintln!("stopped: {}", e);
        std::process::exit(1);
    }
    if cpu.cycles >= max_cycles {
        println!("reached cycle limit ({}); use --max-cycles to raise it", max_cycles);
    }
}
