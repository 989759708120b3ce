//! Censor 932 CPU registers.
//!
//! The machine has:
//! - G0-G15: sixteen 32-bit general registers (G1-G7 double as index
//!   registers for effective-address computation)
//! - IC: the instruction counter, an 18-bit entity
//! - PS: a 64-bit program status word
//! - MIR: a 24-bit memory instruction register
//! - CC: a 2-bit condition code

use serde::{Serialize, Deserialize};

/// Mask applied to the instruction counter (and every computed address)
/// to keep it within the 18-bit address space.
pub const IC_MASK: u32 = 0x0003_FFFF;

/// Which condition-code rule an instruction applies to its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CcKind {
    /// Zero / negative (bit 31) / positive.
    Arithmetic,
    /// Zero / non-zero.
    Logical,
    /// Zero / top nibble clear / top nibble set.
    Compare,
}

/// The Censor 932 register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// G0-G15: general registers. G0 participates fully in arithmetic;
    /// only G1-G7 can be named as index registers.
    pub g: [u32; 16],

    /// Instruction counter. Semantically 18 bits; kept masked to
    /// [`IC_MASK`] after every update.
    pub ic: u32,

    /// Program status word. Modeled but not mutated by any implemented
    /// instruction except through the condition code.
    pub ps: u64,

    /// Memory instruction register, a 24-bit entity. Reserved.
    pub mir: u32,

    /// Condition code, always in 0-3.
    pub cc: u8,
}

impl Registers {
    /// Create a register file with all values zeroed.
    pub fn new() -> Self {
        Self {
            g: [0; 16],
            ic: 0,
            ps: 0,
            mir: 0,
            cc: 0,
        }
    }

    /// Reset all registers to zero.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Set the instruction counter, masked to the 18-bit address space.
    #[inline]
    pub fn set_ic(&mut self, value: u32) {
        self.ic = value & IC_MASK;
    }

    /// Set the condition code from a result value.
    pub fn set_cc(&mut self, kind: CcKind, value: u32) {
        self.cc = match kind {
            CcKind::Arithmetic => {
                if value & 0x8000_0000 != 0 {
                    1
                } else if value == 0 {
                    0
                } else {
                    2
                }
            }
            CcKind::Logical => {
                if value == 0 {
                    0
                } else {
                    1
                }
            }
            CcKind::Compare => {
                if value == 0 {
                    0
                } else if value & 0xf000_0000 == 0 {
                    2
                } else {
                    3
                }
            }
        };
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}
