//! CPU emulation for the Censor 932.
//!
//! This module implements the machine core:
//! - sixteen 32-bit general registers, an 18-bit instruction counter,
//!   a program status word and a 2-bit condition code
//! - ~70 instructions across three encoding formats
//! - a pluggable, range-routed memory subsystem

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;

pub use memory::{AddressSpace, DirectMemory, MemoryBackend, MemoryError, MemoryPlugin, MemoryRange};
pub use registers::{CcKind, Registers, IC_MASK};
pub use decode::{decode, DecodeError, Immediate, Indexed, Instruction, TwoReg};
pub use execute::{Cpu, CpuError};
