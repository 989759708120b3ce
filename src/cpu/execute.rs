//! Execution engine for the Censor 932.
//!
//! Implements the fetch-decode-execute cycle, effective-address
//! computation and the per-instruction semantics, including the
//! condition-code side effects.

use log::{debug, error};
use thiserror::Error;

use crate::cpu::decode::{self, DecodeError, Instruction};
use crate::cpu::memory::{AddressSpace, MemoryBackend, MemoryError, MemoryRange};
use crate::cpu::registers::{CcKind, Registers, IC_MASK};

/// The Censor 932 CPU: a register file plus its address space.
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Registered memory plugins.
    memory: AddressSpace,
    /// Executed-instruction count (for bounded runs and profiling).
    pub cycles: u64,
    /// When set, unassigned opcodes execute as NOP instead of failing.
    lenient: bool,
}

impl Cpu {
    /// Create a CPU with zeroed registers and no memory.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            memory: AddressSpace::new(),
            cycles: 0,
            lenient: false,
        }
    }

    /// Register a memory backend over `range`.
    pub fn register_memory(
        &mut self,
        range: MemoryRange,
        backend: Box<dyn MemoryBackend>,
    ) -> Result<(), MemoryError> {
        self.memory.register(range, backend)
    }

    /// Downgrade unassigned opcodes to a logged NOP instead of an error.
    /// Off by default.
    pub fn set_lenient(&mut self, lenient: bool) {
        self.lenient = lenient;
    }

    /// Fetch a 32-bit word from a global address.
    pub fn fetch_word(&mut self, address: u32) -> Result<u32, CpuError> {
        Ok(self.memory.fetch_word(address)?)
    }

    /// Fetch a 16-bit half-word from a global address.
    pub fn fetch_half(&mut self, address: u32) -> Result<u16, CpuError> {
        Ok(self.memory.fetch_half(address)?)
    }

    /// Store a word, returning the word previously there.
    pub fn store_word(&mut self, address: u32, word: u32) -> Result<u32, CpuError> {
        Ok(self.memory.write_word(address, word)?)
    }

    /// Store a half-word, returning the half-word previously there.
    pub fn store_half(&mut self, address: u32, half: u16) -> Result<u16, CpuError> {
        Ok(self.memory.write_half(address, half)?)
    }

    /// Execute one instruction: fetch the word at IC, decode, execute,
    /// adopt the returned next-IC. Returns the executed instruction.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        debug!("step: IC={:#07x}", self.regs.ic);
        let word = self.fetch_word(self.regs.ic)?;
        let instr = self.decode_word(word)?;
        let next = self.execute(instr)?;
        self.regs.set_ic(next);
        self.cycles += 1;
        Ok(instr)
    }

    /// Run at most `max_cycles` instructions. Returns how many executed.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start = self.cycles;
        while self.cycles - start < max_cycles {
            self.step()?;
        }
        Ok(self.cycles - start)
    }

    fn decode_word(&self, word: u32) -> Result<Instruction, CpuError> {
        match decode::decode(word) {
            Ok(instr) => Ok(instr),
            Err(DecodeError::NoSuchOpcode(op)) if self.lenient => {
                error!(
                    "non-existent instruction {:#04x} at IC={:#07x}, treating as NOP",
                    op, self.regs.ic
                );
                Ok(Instruction::nop())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Compute a Type-1 effective address.
    ///
    /// All addressing is relative to the current IC. The address is
    /// masked back into the 18-bit space after every stage: the IC
    /// displacement, the optional indirection, and the optional index
    /// register (1-7; 0 means no indexing).
    fn compute_effective(&mut self, addr: u16, indirect: bool, x: u8) -> Result<u32, CpuError> {
        let mut ea = u32::from(addr).wrapping_add(self.regs.ic) & IC_MASK;

        if indirect {
            ea = self.fetch_word(ea)? & IC_MASK;
        }
        if (1..=7).contains(&x) {
            ea = ea.wrapping_add(self.regs.g[x as usize]) & IC_MASK;
        }

        Ok(ea)
    }

    /// Value of the register pair R[r]:R[r+1] as one 64-bit quantity,
    /// high half in R[r].
    fn pair(&self, r: u8) -> u64 {
        (u64::from(self.regs.g[r as usize]) << 32) | u64::from(self.regs.g[r as usize + 1])
    }

    fn set_pair(&mut self, r: u8, value: u64) {
        self.regs.g[r as usize] = (value >> 32) as u32;
        self.regs.g[r as usize + 1] = value as u32;
    }

    /// Execute a decoded instruction, returning the next value of the
    /// instruction counter.
    pub fn execute(&mut self, instr: Instruction) -> Result<u32, CpuError> {
        match instr {
            // ==================== Loads ====================

            Instruction::Lw(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                self.regs.g[i.r as usize] = self.fetch_word(source)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Lh(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                self.regs.g[i.r as usize] = u32::from(self.fetch_half(source)?);
                Ok(self.regs.ic + 2)
            }

            Instruction::Ld(i) => {
                self.regs.g[i.r1 as usize] = u32::from(i.d);
                Ok(self.regs.ic + 2)
            }

            Instruction::Ldw(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                self.regs.g[i.r as usize] = self.fetch_word(source)?;
                let source = self.compute_effective(i.addr.wrapping_add(2), i.indirect, i.x)?;
                self.regs.g[i.r as usize + 1] = self.fetch_word(source)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Lt(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let value = self.fetch_word(source)?;
                self.regs.g[i.r as usize] = value;
                self.regs.set_cc(CcKind::Arithmetic, value);
                Ok(self.regs.ic + 2)
            }

            Instruction::Ln(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let mut value = self.fetch_word(source)?;
                if value & 0x8000_0000 == 0 {
                    value = (!value).wrapping_add(1);
                }
                self.regs.g[i.r as usize] = value;
                self.regs.set_cc(CcKind::Arithmetic, value);
                Ok(self.regs.ic + 2)
            }

            Instruction::Lp(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let mut value = self.fetch_word(source)?;
                if value & 0x8000_0000 != 0 {
                    value = (!value).wrapping_add(1);
                }
                self.regs.g[i.r as usize] = value;
                self.regs.set_cc(CcKind::Arithmetic, value);
                Ok(self.regs.ic + 2)
            }

            Instruction::Lc(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let value = (!self.fetch_word(source)?).wrapping_add(1);
                self.regs.g[i.r as usize] = value;
                self.regs.set_cc(CcKind::Arithmetic, value);
                Ok(self.regs.ic + 2)
            }

            Instruction::Lrs(i) => {
                let source = self.compute_effective(i.addr, false, 0)?;
                self.regs.g[i.r1 as usize] = self.fetch_word(source)?;
                let source = self.compute_effective(i.addr.wrapping_add(2), false, 0)?;
                self.regs.g[i.r2 as usize] = self.fetch_word(source)?;
                Ok(self.regs.ic + 2)
            }

            // ==================== Stores ====================

            Instruction::Stw(i) => {
                let target = self.compute_effective(i.addr, i.indirect, i.x)?;
                let value = self.regs.g[i.r as usize];
                self.store_word(target, value)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Sth(i) => {
                let target = self.compute_effective(i.addr, i.indirect, i.x)?;
                let value = (self.regs.g[i.r as usize] & 0xffff) as u16;
                self.store_half(target, value)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Stdw(i) => {
                let target = self.compute_effective(i.addr, i.indirect, i.x)?;
                let value = self.regs.g[i.r as usize];
                self.store_word(target, value)?;
                let target = self.compute_effective(i.addr.wrapping_add(2), i.indirect, i.x)?;
                let value = self.regs.g[i.r as usize + 1];
                self.store_word(target, value)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Rzh(i) => {
                let target = self.compute_effective(i.addr, i.indirect, i.x)?;
                self.store_half(target, 0)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Rzw(i) => {
                let target = self.compute_effective(i.addr, i.indirect, i.x)?;
                self.store_word(target, 0)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Srs(i) => {
                let mut extra: u16 = 0;
                for r in i.r1..=i.r2 {
                    let target = self.compute_effective(i.addr.wrapping_add(extra), false, 0)?;
                    let value = self.regs.g[r as usize];
                    self.store_word(target, value)?;
                    extra = extra.wrapping_add(2);
                }
                Ok(self.regs.ic + 2)
            }

            Instruction::Iw(i) => {
                let target = self.compute_effective(i.addr, i.indirect, i.x)?;
                let value = self.regs.g[i.r as usize];
                self.regs.g[i.r as usize] = self.store_word(target, value)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Ih(i) => {
                let target = self.compute_effective(i.addr, i.indirect, i.x)?;
                let value = (self.regs.g[i.r as usize] & 0xffff) as u16;
                self.regs.g[i.r as usize] = u32::from(self.store_half(target, value)?);
                Ok(self.regs.ic + 2)
            }

            // ==================== Add / subtract ====================

            Instruction::Aw(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let sum = self.regs.g[i.r as usize].wrapping_add(self.fetch_word(source)?);
                self.regs.g[i.r as usize] = sum;
                self.regs.set_cc(CcKind::Arithmetic, sum);
                Ok(self.regs.ic + 2)
            }

            Instruction::Ah(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let operand = u32::from(self.fetch_half(source)?);
                let sum = self.regs.g[i.r as usize].wrapping_add(operand);
                self.regs.g[i.r as usize] = sum;
                self.regs.set_cc(CcKind::Arithmetic, sum);
                Ok(self.regs.ic + 2)
            }

            Instruction::Ad(i) => {
                let sum = self.regs.g[i.r2 as usize].wrapping_add(u32::from(i.d));
                self.regs.g[i.r1 as usize] = sum;
                self.regs.set_cc(CcKind::Arithmetic, sum);
                Ok(self.regs.ic + 2)
            }

            Instruction::As(i) => {
                let sum = self.regs.g[i.r1 as usize].wrapping_add(self.regs.g[i.r2 as usize]);
                let target = self.compute_effective(i.addr, false, 0)?;
                self.regs.set_cc(CcKind::Logical, sum);
                self.store_word(target, sum)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Ats(i) => {
                let effective = self.compute_effective(i.addr, i.indirect, i.x)?;
                let sum = self.fetch_word(effective)?.wrapping_add(self.regs.g[i.r as usize]);
                self.regs.set_cc(CcKind::Arithmetic, sum);
                self.store_word(effective, sum)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Adw(i) => {
                // Low half first, so the carry is known before the high
                // half is summed.
                let source = self.compute_effective(i.addr.wrapping_add(2), i.indirect, i.x)?;
                let old_low = self.regs.g[i.r as usize + 1];
                let low = old_low.wrapping_add(self.fetch_word(source)?);
                let carry = u32::from(low < old_low);
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let high = self.regs.g[i.r as usize]
                    .wrapping_add(carry)
                    .wrapping_add(self.fetch_word(source)?);

                if high == 0 {
                    self.regs.set_cc(CcKind::Arithmetic, low);
                } else {
                    self.regs.set_cc(CcKind::Arithmetic, high);
                }
                self.regs.g[i.r as usize] = high;
                self.regs.g[i.r as usize + 1] = low;
                Ok(self.regs.ic + 2)
            }

            Instruction::Sw(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let result = self.regs.g[i.r as usize].wrapping_sub(self.fetch_word(source)?);
                self.regs.g[i.r as usize] = result;
                self.regs.set_cc(CcKind::Arithmetic, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Sh(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let operand = u32::from(self.fetch_half(source)?);
                let result = self.regs.g[i.r as usize].wrapping_sub(operand);
                self.regs.g[i.r as usize] = result;
                self.regs.set_cc(CcKind::Arithmetic, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Sd(i) => {
                let result = self.regs.g[i.r2 as usize].wrapping_sub(u32::from(i.d));
                self.regs.g[i.r1 as usize] = result;
                self.regs.set_cc(CcKind::Arithmetic, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Ss(i) => {
                let target = self.compute_effective(i.addr, false, 0)?;
                let result = self.regs.g[i.r1 as usize].wrapping_sub(self.regs.g[i.r2 as usize]);
                self.regs.set_cc(CcKind::Arithmetic, result);
                self.store_word(target, result)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Sfs(i) => {
                let effective = self.compute_effective(i.addr, i.indirect, i.x)?;
                let result = self.fetch_word(effective)?.wrapping_sub(self.regs.g[i.r as usize]);
                self.regs.set_cc(CcKind::Arithmetic, result);
                self.store_word(effective, result)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Sdw(i) => {
                // Mirror of ADW with a borrow instead of a carry.
                let source = self.compute_effective(i.addr.wrapping_add(2), i.indirect, i.x)?;
                let operand = self.fetch_word(source)?;
                let old_low = self.regs.g[i.r as usize + 1];
                let low = old_low.wrapping_sub(operand);
                let borrow = u32::from(old_low < operand);
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let operand = self.fetch_word(source)?;
                let high = self.regs.g[i.r as usize]
                    .wrapping_sub(borrow)
                    .wrapping_sub(operand);

                if high == 0 {
                    self.regs.set_cc(CcKind::Arithmetic, low);
                } else {
                    self.regs.set_cc(CcKind::Arithmetic, high);
                }
                self.regs.g[i.r as usize] = high;
                self.regs.g[i.r as usize + 1] = low;
                Ok(self.regs.ic + 2)
            }

            // ==================== Multiply / divide ====================

            Instruction::Mw(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let product =
                    u64::from(self.regs.g[i.r as usize]) * u64::from(self.fetch_word(source)?);
                self.set_pair(i.r, product);
                Ok(self.regs.ic + 2)
            }

            Instruction::Mh(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let operand = u32::from(self.fetch_half(source)?);
                self.regs.g[i.r as usize] = self.regs.g[i.r as usize].wrapping_mul(operand);
                Ok(self.regs.ic + 2)
            }

            Instruction::Md(i) => {
                self.regs.g[i.r1 as usize] =
                    self.regs.g[i.r2 as usize].wrapping_mul(u32::from(i.d));
                Ok(self.regs.ic + 2)
            }

            Instruction::Ms(i) => {
                let product =
                    u64::from(self.regs.g[i.r1 as usize]) * u64::from(self.regs.g[i.r2 as usize]);
                let target = self.compute_effective(i.addr, false, 0)?;
                self.store_word(target, (product >> 32) as u32)?;
                let target = self.compute_effective(i.addr.wrapping_add(2), false, 0)?;
                self.store_word(target, product as u32)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Dw(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let divisor = u64::from(self.fetch_word(source)?);
                if divisor == 0 {
                    return Err(CpuError::DivisionByZero);
                }
                let quotient = self.pair(i.r) / divisor;
                self.set_pair(i.r, quotient);
                Ok(self.regs.ic + 2)
            }

            Instruction::Dh(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let divisor = u32::from(self.fetch_half(source)?);
                if divisor == 0 {
                    return Err(CpuError::DivisionByZero);
                }
                self.regs.g[i.r as usize] /= divisor;
                Ok(self.regs.ic + 2)
            }

            Instruction::Dd(i) => {
                let divisor = u32::from(i.d);
                if divisor == 0 {
                    return Err(CpuError::DivisionByZero);
                }
                self.regs.g[i.r1 as usize] = self.regs.g[i.r2 as usize] / divisor;
                Ok(self.regs.ic + 2)
            }

            Instruction::Ds(i) => {
                let divisor = u64::from(self.regs.g[i.r2 as usize]);
                if divisor == 0 {
                    return Err(CpuError::DivisionByZero);
                }
                let quotient = self.pair(i.r1) / divisor;
                let target = self.compute_effective(i.addr, false, 0)?;
                self.store_word(target, (quotient >> 32) as u32)?;
                let target = self.compute_effective(i.addr.wrapping_add(2), false, 0)?;
                self.store_word(target, quotient as u32)?;
                Ok(self.regs.ic + 2)
            }

            // ==================== Compares ====================

            Instruction::Ch(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let contents = u32::from(self.fetch_half(source)?);
                let result = self.regs.g[i.r as usize].wrapping_sub(contents);
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Cw(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let contents = self.fetch_word(source)?;
                let result = self.regs.g[i.r as usize].wrapping_sub(contents);
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Cd(i) => {
                let result = self.regs.g[i.r2 as usize].wrapping_sub(u32::from(i.d));
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Clh(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let contents = u32::from(self.fetch_half(source)?);
                let result = self.regs.g[i.r as usize].wrapping_sub(contents);
                self.regs.set_cc(CcKind::Logical, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Clw(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let contents = self.fetch_word(source)?;
                let result = self.regs.g[i.r as usize].wrapping_sub(contents);
                self.regs.set_cc(CcKind::Logical, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Cld(i) => {
                let result = self.regs.g[i.r2 as usize].wrapping_sub(u32::from(i.d));
                self.regs.set_cc(CcKind::Logical, result);
                Ok(self.regs.ic + 2)
            }

            // ==================== Bitwise ====================

            Instruction::Nh(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let operand = u32::from(self.fetch_half(source)?);
                let result = self.regs.g[i.r as usize] & operand;
                self.regs.g[i.r as usize] = result;
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Nw(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let result = self.regs.g[i.r as usize] & self.fetch_word(source)?;
                self.regs.g[i.r as usize] = result;
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Nd(i) => {
                let result = self.regs.g[i.r2 as usize] & u32::from(i.d);
                self.regs.g[i.r1 as usize] = result;
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Ns(i) => {
                let target = self.compute_effective(i.addr, false, 0)?;
                let result = self.regs.g[i.r1 as usize] & self.regs.g[i.r2 as usize];
                self.regs.set_cc(CcKind::Compare, result);
                self.store_word(target, result)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Nts(i) => {
                let location = self.compute_effective(i.addr, i.indirect, i.x)?;
                let result = self.fetch_word(location)? & self.regs.g[i.r as usize];
                self.regs.set_cc(CcKind::Compare, result);
                self.store_word(location, result)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Oh(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let operand = u32::from(self.fetch_half(source)?);
                let result = self.regs.g[i.r as usize] | operand;
                self.regs.g[i.r as usize] = result;
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Ow(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let result = self.regs.g[i.r as usize] | self.fetch_word(source)?;
                self.regs.g[i.r as usize] = result;
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Od(i) => {
                let result = self.regs.g[i.r2 as usize] | u32::from(i.d);
                self.regs.g[i.r1 as usize] = result;
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Os(i) => {
                let target = self.compute_effective(i.addr, false, 0)?;
                let result = self.regs.g[i.r1 as usize] | self.regs.g[i.r2 as usize];
                self.regs.set_cc(CcKind::Compare, result);
                self.store_word(target, result)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Ots(i) => {
                let location = self.compute_effective(i.addr, i.indirect, i.x)?;
                let result = self.fetch_word(location)? | self.regs.g[i.r as usize];
                self.regs.set_cc(CcKind::Compare, result);
                self.store_word(location, result)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Xh(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let operand = u32::from(self.fetch_half(source)?);
                let result = self.regs.g[i.r as usize] ^ operand;
                self.regs.g[i.r as usize] = result;
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Xw(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let result = self.regs.g[i.r as usize] ^ self.fetch_word(source)?;
                self.regs.g[i.r as usize] = result;
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Xd(i) => {
                let result = self.regs.g[i.r2 as usize] ^ u32::from(i.d);
                self.regs.g[i.r1 as usize] = result;
                self.regs.set_cc(CcKind::Compare, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Xs(i) => {
                let target = self.compute_effective(i.addr, false, 0)?;
                let result = self.regs.g[i.r1 as usize] ^ self.regs.g[i.r2 as usize];
                self.regs.set_cc(CcKind::Compare, result);
                self.store_word(target, result)?;
                Ok(self.regs.ic + 2)
            }

            Instruction::Xts(i) => {
                let location = self.compute_effective(i.addr, i.indirect, i.x)?;
                let result = self.fetch_word(location)? ^ self.regs.g[i.r as usize];
                self.regs.set_cc(CcKind::Compare, result);
                self.store_word(location, result)?;
                Ok(self.regs.ic + 2)
            }

            // ==================== Shifts and rotates ====================

            Instruction::Sll(i) => {
                self.regs.g[i.r as usize] <<= 1;
                Ok(self.regs.ic + 2)
            }

            Instruction::Srl(i) => {
                self.regs.g[i.r as usize] >>= 1;
                Ok(self.regs.ic + 2)
            }

            Instruction::Sldl(i) => {
                let value = self.pair(i.r) << 1;
                self.set_pair(i.r, value);
                Ok(self.regs.ic + 2)
            }

            Instruction::Srdl(i) => {
                let value = self.pair(i.r) >> 1;
                self.set_pair(i.r, value);
                Ok(self.regs.ic + 2)
            }

            Instruction::Sla(i) => {
                let r = self.regs.g[i.r as usize];
                let result = (r & 0x8000_0000) | ((r << 1) & 0x7fff_ffff);
                self.regs.g[i.r as usize] = result;
                self.regs.set_cc(CcKind::Arithmetic, result);
                Ok(self.regs.ic + 2)
            }

            Instruction::Sra(i) => {
                let r = self.regs.g[i.r as usize];
                self.regs.g[i.r as usize] = (r & 0x8000_0000) | (r >> 1);
                Ok(self.regs.ic + 2)
            }

            Instruction::Slda(i) => {
                let value = self.pair(i.r);
                let result =
                    (value & 0x8000_0000_0000_0000) | ((value << 1) & 0x7fff_ffff_ffff_ffff);
                self.set_pair(i.r, result);

                let high = self.regs.g[i.r as usize];
                if high == 0 {
                    let low = self.regs.g[i.r as usize + 1];
                    self.regs.set_cc(CcKind::Arithmetic, low);
                } else {
                    self.regs.set_cc(CcKind::Arithmetic, high);
                }
                Ok(self.regs.ic + 2)
            }

            Instruction::Srda(i) => {
                let value = (self.pair(i.r) as i64) >> 1;
                self.set_pair(i.r, value as u64);
                Ok(self.regs.ic + 2)
            }

            Instruction::Rls(i) => {
                self.regs.g[i.r as usize] = self.regs.g[i.r as usize].rotate_left(1);
                Ok(self.regs.ic + 2)
            }

            Instruction::Rrs(i) => {
                self.regs.g[i.r as usize] = self.regs.g[i.r as usize].rotate_right(1);
                Ok(self.regs.ic + 2)
            }

            Instruction::Rld(i) => {
                let value = self.pair(i.r).rotate_left(1);
                self.set_pair(i.r, value);
                Ok(self.regs.ic + 2)
            }

            Instruction::Rrd(i) => {
                let value = self.pair(i.r).rotate_right(1);
                self.set_pair(i.r, value);
                Ok(self.regs.ic + 2)
            }

            // ==================== Control flow ====================

            Instruction::Nop(_) => Ok(self.regs.ic + 2),

            Instruction::Ex(i) => {
                let source = self.compute_effective(i.addr, i.indirect, i.x)?;
                let word = self.fetch_word(source)?;
                let inner = self.decode_word(word)?;
                self.execute(inner)
            }

            Instruction::Jc(i) => {
                if self.regs.cc & i.r == 0 {
                    return Ok(self.regs.ic + 2);
                }
                self.compute_effective(i.addr, i.indirect, i.x)
            }

            Instruction::Js(i) => {
                self.regs.g[i.r as usize] = self.regs.ic + 2;
                self.compute_effective(i.addr, i.indirect, i.x)
            }

            Instruction::Jos(i) => {
                let value = self.regs.g[i.r as usize].wrapping_sub(1);
                self.regs.g[i.r as usize] = value;
                if value == 0 {
                    return Ok(self.regs.ic + 2);
                }
                self.compute_effective(i.addr, i.indirect, i.x)
            }

            Instruction::Jts(i) => {
                let value = self.regs.g[i.r as usize].wrapping_sub(2);
                self.regs.g[i.r as usize] = value;
                if value == 0 {
                    return Ok(self.regs.ic + 2);
                }
                self.compute_effective(i.addr, i.indirect, i.x)
            }

            Instruction::Joa(i) => {
                let value = self.regs.g[i.r as usize].wrapping_add(1);
                self.regs.g[i.r as usize] = value;
                if value == 0 {
                    return Ok(self.regs.ic + 2);
                }
                self.compute_effective(i.addr, i.indirect, i.x)
            }
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("regs", &self.regs)
            .field("cycles", &self.cycles)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("memory error: {0}")]
    MemoryError(#[from] MemoryError),

    #[error("decode error: {0}")]
    DecodeError(#[from] DecodeError),

    #[error("division by zero")]
    DivisionByZero,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::{Immediate, Indexed, TwoReg};
    use crate::cpu::memory::DirectMemory;

    /// A CPU with one DirectMemory plugin over [0, size-1].
    fn cpu_with_memory(size: u32) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.register_memory(MemoryRange::new(0, size - 1), Box::new(DirectMemory::new(size)))
            .unwrap();
        cpu
    }

    fn indexed(r: u8, addr: u16) -> Indexed {
        Indexed {
            r,
            indirect: false,
            x: 0,
            addr,
        }
    }

    #[test]
    fn test_step_add_immediate() {
        // Word 0x9A121234 at address 0: AD r1=1, r2=2, d=0x1234.
        let mut cpu = cpu_with_memory(16);
        cpu.store_half(0, 0x9a12).unwrap();
        cpu.store_half(1, 0x1234).unwrap();

        let instr = cpu.step().unwrap();

        assert_eq!(instr.mnemonic(), "AD");
        assert_eq!(cpu.regs.g[1], 0x1234);
        assert_eq!(cpu.regs.ic, 2);
        assert_eq!(cpu.regs.cc, 2);
        assert_eq!(cpu.cycles, 1);
    }

    #[test]
    fn test_compute_effective() {
        let cases = [
            (0u16, false, 0u8, 0u32),
            (0, false, 1, 0x10),
            (0, true, 1, 0x1244),
            (2, false, 0, 2),
            (2, false, 1, 0x12),
            (2, true, 1, 0x0010),
        ];

        let mut cpu = cpu_with_memory(16);
        cpu.regs.g[1] = 0x10;
        cpu.store_word(0, 0x1234).unwrap();
        assert_eq!(cpu.fetch_word(0).unwrap(), 0x0000_1234);

        for (ix, (addr, indirect, x, expected)) in cases.into_iter().enumerate() {
            cpu.regs.ic = 0;
            let seen = cpu.compute_effective(addr, indirect, x).unwrap();
            assert_eq!(seen, expected, "case #{ix}");
        }
    }

    #[test]
    fn test_effective_address_is_pc_relative() {
        let mut cpu = cpu_with_memory(64);
        cpu.regs.ic = 6;
        assert_eq!(cpu.compute_effective(4, false, 0).unwrap(), 10);
    }

    #[test]
    fn test_effective_address_masks_to_18_bits() {
        let mut cpu = cpu_with_memory(16);
        cpu.regs.ic = 0x3fffe;
        assert_eq!(cpu.compute_effective(4, false, 0).unwrap(), 2);

        cpu.regs.ic = 0;
        cpu.regs.g[3] = 0xffff_ffff;
        assert_eq!(cpu.compute_effective(8, false, 3).unwrap(), 7);
    }

    #[test]
    fn test_index_register_zero_means_no_index() {
        let mut cpu = cpu_with_memory(16);
        cpu.regs.g[0] = 0x100;
        assert_eq!(cpu.compute_effective(4, false, 0).unwrap(), 4);
    }

    #[test]
    fn test_loads() {
        let mut cpu = cpu_with_memory(32);
        cpu.store_word(8, 0xdead_beef).unwrap();
        cpu.store_word(10, 0x0000_0005).unwrap();

        cpu.regs.cc = 3;
        let next = cpu.execute(Instruction::Lw(indexed(1, 8))).unwrap();
        assert_eq!(next, 2);
        assert_eq!(cpu.regs.g[1], 0xdead_beef);
        // LW leaves the condition code alone.
        assert_eq!(cpu.regs.cc, 3);

        cpu.execute(Instruction::Lh(indexed(2, 8))).unwrap();
        assert_eq!(cpu.regs.g[2], 0x0000_dead);

        cpu.execute(Instruction::Ld(Immediate {
            r1: 3,
            r2: 0,
            d: 0x8001,
        }))
        .unwrap();
        assert_eq!(cpu.regs.g[3], 0x0000_8001);

        cpu.execute(Instruction::Ldw(indexed(4, 8))).unwrap();
        assert_eq!(cpu.regs.g[4], 0xdead_beef);
        assert_eq!(cpu.regs.g[5], 0x0000_0005);

        cpu.execute(Instruction::Lt(indexed(6, 8))).unwrap();
        assert_eq!(cpu.regs.g[6], 0xdead_beef);
        assert_eq!(cpu.regs.cc, 1);
    }

    #[test]
    fn test_load_negative_positive_complement() {
        let mut cpu = cpu_with_memory(32);
        cpu.store_word(8, 5).unwrap();
        cpu.store_word(10, (-5i32) as u32).unwrap();

        cpu.execute(Instruction::Ln(indexed(1, 8))).unwrap();
        assert_eq!(cpu.regs.g[1], (-5i32) as u32);
        assert_eq!(cpu.regs.cc, 1);

        // Already negative: LN keeps it.
        cpu.execute(Instruction::Ln(indexed(2, 10))).unwrap();
        assert_eq!(cpu.regs.g[2], (-5i32) as u32);

        cpu.execute(Instruction::Lp(indexed(3, 10))).unwrap();
        assert_eq!(cpu.regs.g[3], 5);
        assert_eq!(cpu.regs.cc, 2);

        cpu.execute(Instruction::Lp(indexed(4, 8))).unwrap();
        assert_eq!(cpu.regs.g[4], 5);

        cpu.execute(Instruction::Lc(indexed(5, 8))).unwrap();
        assert_eq!(cpu.regs.g[5], (-5i32) as u32);
        cpu.execute(Instruction::Lc(indexed(6, 10))).unwrap();
        assert_eq!(cpu.regs.g[6], 5);
    }

    #[test]
    fn test_lrs() {
        let mut cpu = cpu_with_memory(32);
        cpu.store_word(8, 0x1111_1111).unwrap();
        cpu.store_word(10, 0x2222_2222).unwrap();

        cpu.execute(Instruction::Lrs(TwoReg {
            r1: 4,
            r2: 9,
            addr: 8,
        }))
        .unwrap();
        assert_eq!(cpu.regs.g[4], 0x1111_1111);
        assert_eq!(cpu.regs.g[9], 0x2222_2222);
    }

    #[test]
    fn test_stores() {
        let mut cpu = cpu_with_memory(32);
        cpu.regs.g[1] = 0x1234_5678;
        cpu.regs.g[2] = 0x9abc_def0;

        cpu.execute(Instruction::Stw(indexed(1, 8))).unwrap();
        assert_eq!(cpu.fetch_word(8).unwrap(), 0x1234_5678);

        cpu.execute(Instruction::Sth(indexed(1, 12))).unwrap();
        assert_eq!(cpu.fetch_half(12).unwrap(), 0x5678);

        cpu.execute(Instruction::Stdw(indexed(1, 16))).unwrap();
        assert_eq!(cpu.fetch_word(16).unwrap(), 0x1234_5678);
        assert_eq!(cpu.fetch_word(18).unwrap(), 0x9abc_def0);

        cpu.execute(Instruction::Rzw(indexed(0, 8))).unwrap();
        assert_eq!(cpu.fetch_word(8).unwrap(), 0);
        cpu.execute(Instruction::Rzh(indexed(0, 12))).unwrap();
        assert_eq!(cpu.fetch_half(12).unwrap(), 0);
    }

    #[test]
    fn test_srs_stores_register_run() {
        let mut cpu = cpu_with_memory(32);
        cpu.regs.g[1] = 0x1111_1111;
        cpu.regs.g[2] = 0x2222_2222;
        cpu.regs.g[3] = 0x3333_3333;

        cpu.execute(Instruction::Srs(TwoReg {
            r1: 1,
            r2: 3,
            addr: 8,
        }))
        .unwrap();

        assert_eq!(cpu.fetch_word(8).unwrap(), 0x1111_1111);
        assert_eq!(cpu.fetch_word(10).unwrap(), 0x2222_2222);
        assert_eq!(cpu.fetch_word(12).unwrap(), 0x3333_3333);
    }

    #[test]
    fn test_iw_exchange() {
        let mut cpu = cpu_with_memory(16);
        cpu.regs.g[1] = 0xaaaa;
        cpu.store_word(0, 0x5555).unwrap();

        let next = cpu.execute(Instruction::Iw(indexed(1, 0))).unwrap();

        assert_eq!(next, 2);
        assert_eq!(cpu.regs.g[1], 0x5555);
        assert_eq!(cpu.fetch_word(0).unwrap(), 0xaaaa);
    }

    #[test]
    fn test_ih_exchange_low_half() {
        let mut cpu = cpu_with_memory(16);
        cpu.regs.g[1] = 0xdead_beef;
        cpu.store_half(4, 0x1234).unwrap();

        cpu.execute(Instruction::Ih(indexed(1, 4))).unwrap();

        assert_eq!(cpu.regs.g[1], 0x0000_1234);
        assert_eq!(cpu.fetch_half(4).unwrap(), 0xbeef);
    }

    #[test]
    fn test_add_family() {
        let mut cpu = cpu_with_memory(32);
        cpu.store_word(8, 10).unwrap();
        cpu.store_half(12, 0xffff).unwrap();

        cpu.regs.g[1] = 5;
        cpu.execute(Instruction::Aw(indexed(1, 8))).unwrap();
        assert_eq!(cpu.regs.g[1], 15);
        assert_eq!(cpu.regs.cc, 2);

        cpu.regs.g[2] = 1;
        cpu.execute(Instruction::Ah(indexed(2, 12))).unwrap();
        assert_eq!(cpu.regs.g[2], 0x0001_0000);

        // Wrapping is the semantics, not an error.
        cpu.regs.g[3] = 0xffff_ffff;
        cpu.execute(Instruction::Ad(Immediate {
            r1: 3,
            r2: 3,
            d: 1,
        }))
        .unwrap();
        assert_eq!(cpu.regs.g[3], 0);
        assert_eq!(cpu.regs.cc, 0);

        cpu.regs.g[4] = 3;
        cpu.regs.g[5] = 4;
        cpu.execute(Instruction::As(TwoReg {
            r1: 4,
            r2: 5,
            addr: 16,
        }))
        .unwrap();
        assert_eq!(cpu.fetch_word(16).unwrap(), 7);
        assert_eq!(cpu.regs.cc, 1); // Logical kind: non-zero.

        cpu.regs.g[6] = 100;
        cpu.execute(Instruction::Ats(indexed(6, 8))).unwrap();
        assert_eq!(cpu.fetch_word(8).unwrap(), 110);
    }

    #[test]
    fn test_adw_carry_propagation() {
        let mut cpu = cpu_with_memory(32);
        cpu.regs.g[1] = 1;
        cpu.regs.g[2] = 0xffff_ffff;
        // Operand pair: high word at EA, low word at EA+2.
        cpu.store_word(8, 0).unwrap();
        cpu.store_word(10, 1).unwrap();

        cpu.execute(Instruction::Adw(indexed(1, 8))).unwrap();

        assert_eq!(cpu.regs.g[1], 2);
        assert_eq!(cpu.regs.g[2], 0);
        assert_eq!(cpu.regs.cc, 2);
    }

    #[test]
    fn test_sub_family() {
        let mut cpu = cpu_with_memory(32);
        cpu.store_word(8, 10).unwrap();
        cpu.store_half(12, 3).unwrap();

        cpu.regs.g[1] = 4;
        cpu.execute(Instruction::Sw(indexed(1, 8))).unwrap();
        assert_eq!(cpu.regs.g[1], (-6i32) as u32);
        assert_eq!(cpu.regs.cc, 1);

        cpu.regs.g[2] = 5;
        cpu.execute(Instruction::Sh(indexed(2, 12))).unwrap();
        assert_eq!(cpu.regs.g[2], 2);

        cpu.execute(Instruction::Sd(Immediate {
            r1: 3,
            r2: 2,
            d: 2,
        }))
        .unwrap();
        assert_eq!(cpu.regs.g[3], 0);
        assert_eq!(cpu.regs.cc, 0);

        cpu.regs.g[4] = 9;
        cpu.regs.g[5] = 4;
        cpu.execute(Instruction::Ss(TwoReg {
            r1: 4,
            r2: 5,
            addr: 16,
        }))
        .unwrap();
        assert_eq!(cpu.fetch_word(16).unwrap(), 5);

        cpu.regs.g[6] = 3;
        cpu.execute(Instruction::Sfs(indexed(6, 8))).unwrap();
        assert_eq!(cpu.fetch_word(8).unwrap(), 7);
    }

    #[test]
    fn test_sdw_borrow_propagation() {
        let mut cpu = cpu_with_memory(32);
        cpu.regs.g[1] = 1;
        cpu.regs.g[2] = 0;
        cpu.store_word(8, 0).unwrap();
        cpu.store_word(10, 1).unwrap();

        cpu.execute(Instruction::Sdw(indexed(1, 8))).unwrap();

        assert_eq!(cpu.regs.g[1], 0);
        assert_eq!(cpu.regs.g[2], 0xffff_ffff);
        // High is zero, so CC reflects the low word.
        assert_eq!(cpu.regs.cc, 1);
    }

    #[test]
    fn test_multiply() {
        let mut cpu = cpu_with_memory(32);
        cpu.store_word(8, 0x0001_0000).unwrap();
        cpu.store_half(12, 3).unwrap();

        cpu.regs.g[1] = 0x0001_0000;
        cpu.execute(Instruction::Mw(indexed(1, 8))).unwrap();
        assert_eq!(cpu.regs.g[1], 1);
        assert_eq!(cpu.regs.g[2], 0);

        cpu.regs.g[3] = 7;
        cpu.execute(Instruction::Mh(indexed(3, 12))).unwrap();
        assert_eq!(cpu.regs.g[3], 21);

        cpu.execute(Instruction::Md(Immediate {
            r1: 4,
            r2: 3,
            d: 2,
        }))
        .unwrap();
        assert_eq!(cpu.regs.g[4], 42);

        cpu.regs.g[5] = 0x8000_0000;
        cpu.regs.g[6] = 4;
        cpu.execute(Instruction::Ms(TwoReg {
            r1: 5,
            r2: 6,
            addr: 16,
        }))
        .unwrap();
        assert_eq!(cpu.fetch_word(16).unwrap(), 2);
        assert_eq!(cpu.fetch_word(18).unwrap(), 0);
    }

    #[test]
    fn test_divide() {
        let mut cpu = cpu_with_memory(32);
        cpu.store_word(8, 2).unwrap();
        cpu.store_half(12, 5).unwrap();

        // Dividend is the 64-bit pair G1:G2 = 0x1_0000_0002.
        cpu.regs.g[1] = 1;
        cpu.regs.g[2] = 2;
        cpu.execute(Instruction::Dw(indexed(1, 8))).unwrap();
        assert_eq!(cpu.regs.g[1], 0);
        assert_eq!(cpu.regs.g[2], 0x8000_0001);

        cpu.regs.g[3] = 17;
        cpu.execute(Instruction::Dh(indexed(3, 12))).unwrap();
        assert_eq!(cpu.regs.g[3], 3);

        cpu.execute(Instruction::Dd(Immediate {
            r1: 4,
            r2: 3,
            d: 2,
        }))
        .unwrap();
        assert_eq!(cpu.regs.g[4], 1);

        cpu.regs.g[5] = 0;
        cpu.regs.g[6] = 8;
        cpu.regs.g[7] = 2;
        cpu.execute(Instruction::Ds(TwoReg {
            r1: 5,
            r2: 7,
            addr: 16,
        }))
        .unwrap();
        assert_eq!(cpu.fetch_word(16).unwrap(), 0);
        assert_eq!(cpu.fetch_word(18).unwrap(), 4);
    }

    #[test]
    fn test_divide_by_zero() {
        let mut cpu = cpu_with_memory(32);
        cpu.regs.g[1] = 1;

        assert_eq!(
            cpu.execute(Instruction::Dw(indexed(1, 8))),
            Err(CpuError::DivisionByZero)
        );
        assert_eq!(
            cpu.execute(Instruction::Dh(indexed(1, 8))),
            Err(CpuError::DivisionByZero)
        );
        assert_eq!(
            cpu.execute(Instruction::Dd(Immediate {
                r1: 1,
                r2: 1,
                d: 0
            })),
            Err(CpuError::DivisionByZero)
        );
        assert_eq!(
            cpu.execute(Instruction::Ds(TwoReg {
                r1: 1,
                r2: 3,
                addr: 8
            })),
            Err(CpuError::DivisionByZero)
        );
    }

    #[test]
    fn test_compare_kinds() {
        let mut cpu = cpu_with_memory(32);
        cpu.store_word(8, 5).unwrap();
        cpu.store_half(12, 5).unwrap();

        // Equal: CC 0.
        cpu.regs.g[1] = 5;
        cpu.execute(Instruction::Cw(indexed(1, 8))).unwrap();
        assert_eq!(cpu.regs.cc, 0);

        // Small positive difference: top nibble clear, CC 2.
        cpu.regs.g[1] = 7;
        cpu.execute(Instruction::Cw(indexed(1, 8))).unwrap();
        assert_eq!(cpu.regs.cc, 2);

        // Negative difference wraps into the top nibble: CC 3.
        cpu.regs.g[1] = 3;
        cpu.execute(Instruction::Cw(indexed(1, 8))).unwrap();
        assert_eq!(cpu.regs.cc, 3);

        cpu.regs.g[2] = 6;
        cpu.execute(Instruction::Ch(indexed(2, 12))).unwrap();
        assert_eq!(cpu.regs.cc, 2);

        cpu.execute(Instruction::Cd(Immediate {
            r1: 0,
            r2: 2,
            d: 6,
        }))
        .unwrap();
        assert_eq!(cpu.regs.cc, 0);

        // Logical compares report only zero/non-zero.
        cpu.regs.g[3] = 3;
        cpu.execute(Instruction::Clw(indexed(3, 8))).unwrap();
        assert_eq!(cpu.regs.cc, 1);
        cpu.regs.g[3] = 5;
        cpu.execute(Instruction::Clw(indexed(3, 8))).unwrap();
        assert_eq!(cpu.regs.cc, 0);
        cpu.execute(Instruction::Clh(indexed(2, 12))).unwrap();
        assert_eq!(cpu.regs.cc, 1);
        cpu.execute(Instruction::Cld(Immediate {
            r1: 0,
            r2: 2,
            d: 6,
        }))
        .unwrap();
        assert_eq!(cpu.regs.cc, 0);
    }

    #[test]
    fn test_bitwise_word_ops_use_index_register() {
        let mut cpu = cpu_with_memory(32);
        cpu.regs.g[2] = 8; // index register
        cpu.store_word(8, 0x0f0f).unwrap();

        cpu.regs.g[1] = 0x00ff;
        cpu.execute(Instruction::Nw(Indexed {
            r: 1,
            indirect: false,
            x: 2,
            addr: 0,
        }))
        .unwrap();
        assert_eq!(cpu.regs.g[1], 0x000f);
        assert_eq!(cpu.regs.cc, 2);
    }

    #[test]
    fn test_bitwise() {
        let mut cpu = cpu_with_memory(32);
        cpu.store_word(8, 0x0ff0).unwrap();
        cpu.store_half(12, 0x00ff).unwrap();

        cpu.regs.g[1] = 0x0f0f;
        cpu.execute(Instruction::Ow(indexed(1, 8))).unwrap();
        assert_eq!(cpu.regs.g[1], 0x0fff);

        cpu.regs.g[2] = 0x0f0f;
        cpu.execute(Instruction::Xw(indexed(2, 8))).unwrap();
        assert_eq!(cpu.regs.g[2], 0x00ff);

        cpu.regs.g[3] = 0x0f0f;
        cpu.execute(Instruction::Nh(indexed(3, 12))).unwrap();
        assert_eq!(cpu.regs.g[3], 0x000f);

        cpu.regs.g[4] = 0x0f0f;
        cpu.execute(Instruction::Xh(indexed(4, 12))).unwrap();
        assert_eq!(cpu.regs.g[4], 0x0ff0);

        cpu.regs.g[5] = 0x0f0f;
        cpu.execute(Instruction::Oh(indexed(5, 12))).unwrap();
        assert_eq!(cpu.regs.g[5], 0x0fff);
    }

    #[test]
    fn test_bitwise_immediates() {
        let mut cpu = cpu_with_memory(16);
        cpu.regs.g[2] = 0x0f0f;

        cpu.execute(Instruction::Nd(Immediate {
            r1: 1,
            r2: 2,
            d: 0x00ff,
        }))
        .unwrap();
        assert_eq!(cpu.regs.g[1], 0x000f);

        cpu.execute(Instruction::Od(Immediate {
            r1: 1,
            r2: 2,
            d: 0x00ff,
        }))
        .unwrap();
        assert_eq!(cpu.regs.g[1], 0x0fff);

        // XD is a true exclusive or.
        cpu.execute(Instruction::Xd(Immediate {
            r1: 1,
            r2: 2,
            d: 0x00ff,
        }))
        .unwrap();
        assert_eq!(cpu.regs.g[1], 0x0ff0);
    }

    #[test]
    fn test_bitwise_to_storage() {
        let mut cpu = cpu_with_memory(32);
        cpu.regs.g[1] = 0x0f0f;
        cpu.regs.g[2] = 0x00ff;

        cpu.execute(Instruction::Ns(TwoReg {
            r1: 1,
            r2: 2,
            addr: 8,
        }))
        .unwrap();
        assert_eq!(cpu.fetch_word(8).unwrap(), 0x000f);

        cpu.execute(Instruction::Os(TwoReg {
            r1: 1,
            r2: 2,
            addr: 10,
        }))
        .unwrap();
        assert_eq!(cpu.fetch_word(10).unwrap(), 0x0fff);

        cpu.execute(Instruction::Xs(TwoReg {
            r1: 1,
            r2: 2,
            addr: 12,
        }))
        .unwrap();
        assert_eq!(cpu.fetch_word(12).unwrap(), 0x0ff0);

        cpu.store_word(16, 0xffff_0000).unwrap();
        cpu.regs.g[3] = 0x0f0f_0f0f;
        cpu.execute(Instruction::Nts(indexed(3, 16))).unwrap();
        assert_eq!(cpu.fetch_word(16).unwrap(), 0x0f0f_0000);
        cpu.execute(Instruction::Ots(indexed(3, 16))).unwrap();
        assert_eq!(cpu.fetch_word(16).unwrap(), 0x0f0f_0f0f);
        cpu.execute(Instruction::Xts(indexed(3, 16))).unwrap();
        assert_eq!(cpu.fetch_word(16).unwrap(), 0);
    }

    #[test]
    fn test_single_shifts() {
        let mut cpu = cpu_with_memory(16);

        cpu.regs.g[1] = 0x8000_0001;
        cpu.execute(Instruction::Sll(indexed(1, 0))).unwrap();
        assert_eq!(cpu.regs.g[1], 0x0000_0002);

        cpu.regs.g[2] = 3;
        cpu.execute(Instruction::Srl(indexed(2, 0))).unwrap();
        assert_eq!(cpu.regs.g[2], 1);

        // SLA keeps the sign bit and discards the bit shifted into it.
        cpu.regs.g[3] = 0xc000_0001;
        cpu.execute(Instruction::Sla(indexed(3, 0))).unwrap();
        assert_eq!(cpu.regs.g[3], 0x8000_0002);
        assert_eq!(cpu.regs.cc, 1);

        cpu.regs.g[4] = 0x8000_0000;
        cpu.execute(Instruction::Sra(indexed(4, 0))).unwrap();
        assert_eq!(cpu.regs.g[4], 0xc000_0000);
    }

    #[test]
    fn test_double_shifts() {
        let mut cpu = cpu_with_memory(16);

        cpu.regs.g[1] = 1;
        cpu.regs.g[2] = 0x8000_0000;
        cpu.execute(Instruction::Sldl(indexed(1, 0))).unwrap();
        assert_eq!(cpu.regs.g[1], 3);
        assert_eq!(cpu.regs.g[2], 0);

        cpu.regs.g[3] = 1;
        cpu.regs.g[4] = 2;
        cpu.execute(Instruction::Srdl(indexed(3, 0))).unwrap();
        assert_eq!(cpu.regs.g[3], 0);
        assert_eq!(cpu.regs.g[4], 0x8000_0001);

        cpu.regs.g[5] = 0x8000_0000;
        cpu.regs.g[6] = 2;
        cpu.execute(Instruction::Srda(indexed(5, 0))).unwrap();
        assert_eq!(cpu.regs.g[5], 0xc000_0000);
        assert_eq!(cpu.regs.g[6], 1);
    }

    #[test]
    fn test_slda_preserves_sign() {
        let mut cpu = cpu_with_memory(16);
        cpu.regs.g[1] = 0x8000_0001;
        cpu.regs.g[2] = 0x8000_0000;

        cpu.execute(Instruction::Slda(indexed(1, 0))).unwrap();

        assert_eq!(cpu.regs.g[1], 0x8000_0003);
        assert_eq!(cpu.regs.g[2], 0);
        assert_eq!(cpu.regs.cc, 1);
    }

    #[test]
    fn test_rotates() {
        let mut cpu = cpu_with_memory(16);

        cpu.regs.g[1] = 0x8000_0000;
        cpu.execute(Instruction::Rls(indexed(1, 0))).unwrap();
        assert_eq!(cpu.regs.g[1], 1);

        cpu.regs.g[2] = 1;
        cpu.execute(Instruction::Rrs(indexed(2, 0))).unwrap();
        assert_eq!(cpu.regs.g[2], 0x8000_0000);

        // Double rotate moves the high sign bit into the low word's LSB
        // position of the pair, i.e. around the 64-bit value.
        cpu.regs.g[3] = 0x8000_0000;
        cpu.regs.g[4] = 0;
        cpu.execute(Instruction::Rld(indexed(3, 0))).unwrap();
        assert_eq!(cpu.regs.g[3], 0);
        assert_eq!(cpu.regs.g[4], 1);

        cpu.regs.g[5] = 0;
        cpu.regs.g[6] = 1;
        cpu.execute(Instruction::Rrd(indexed(5, 0))).unwrap();
        assert_eq!(cpu.regs.g[5], 0x8000_0000);
        assert_eq!(cpu.regs.g[6], 0);
    }

    #[test]
    fn test_jc_taken_and_not_taken() {
        let mut cpu = cpu_with_memory(16);

        cpu.regs.cc = 2;
        let next = cpu
            .execute(Instruction::Jc(indexed(2, 0x100)))
            .unwrap();
        assert_eq!(next, 0x100);

        cpu.regs.cc = 1;
        let next = cpu
            .execute(Instruction::Jc(indexed(2, 0x100)))
            .unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_js_links_and_jumps() {
        let mut cpu = cpu_with_memory(16);
        cpu.regs.ic = 4;

        let next = cpu.execute(Instruction::Js(indexed(3, 0x20))).unwrap();

        assert_eq!(cpu.regs.g[3], 6);
        assert_eq!(next, 0x24);
    }

    #[test]
    fn test_counting_jumps() {
        let mut cpu = cpu_with_memory(16);

        cpu.regs.g[2] = 2;
        let next = cpu.execute(Instruction::Jos(indexed(2, 0x50))).unwrap();
        assert_eq!(cpu.regs.g[2], 1);
        assert_eq!(next, 0x50);
        let next = cpu.execute(Instruction::Jos(indexed(2, 0x50))).unwrap();
        assert_eq!(cpu.regs.g[2], 0);
        assert_eq!(next, 2);

        cpu.regs.g[3] = 4;
        let next = cpu.execute(Instruction::Jts(indexed(3, 0x50))).unwrap();
        assert_eq!(cpu.regs.g[3], 2);
        assert_eq!(next, 0x50);

        cpu.regs.g[4] = 0xffff_ffff;
        let next = cpu.execute(Instruction::Joa(indexed(4, 0x50))).unwrap();
        assert_eq!(cpu.regs.g[4], 0);
        assert_eq!(next, 2);
        let next = cpu.execute(Instruction::Joa(indexed(4, 0x50))).unwrap();
        assert_eq!(cpu.regs.g[4], 1);
        assert_eq!(next, 0x50);
    }

    #[test]
    fn test_ex_executes_in_place() {
        let mut cpu = cpu_with_memory(32);
        // AD r1=1, r2=2, d=0x1234 stored as data at word 8.
        cpu.store_word(8, 0x9a12_1234).unwrap();

        let next = cpu.execute(Instruction::Ex(indexed(0, 8))).unwrap();

        assert_eq!(cpu.regs.g[1], 0x1234);
        assert_eq!(next, 2);
    }

    #[test]
    fn test_ex_propagates_branch_target() {
        let mut cpu = cpu_with_memory(32);
        // JC mask=2, as=0x10 at word 8.
        cpu.store_word(8, 0x0520_0010).unwrap();
        cpu.regs.cc = 2;

        let next = cpu.execute(Instruction::Ex(indexed(0, 8))).unwrap();
        assert_eq!(next, 0x10);
    }

    #[test]
    fn test_step_masks_ic() {
        let mut cpu = Cpu::new();
        cpu.register_memory(
            MemoryRange::new(0x3fffc, 0x3ffff),
            Box::new(DirectMemory::new(4)),
        )
        .unwrap();
        cpu.register_memory(MemoryRange::new(0, 3), Box::new(DirectMemory::new(4)))
            .unwrap();
        cpu.regs.ic = 0x3fffe;
        // NOP at the top of the address space; IC + 2 wraps to 0.
        cpu.store_word(0x3fffe, 0).unwrap();

        cpu.step().unwrap();
        assert_eq!(cpu.regs.ic, 0);
    }

    #[test]
    fn test_unassigned_opcode_halts_step() {
        let mut cpu = cpu_with_memory(16);
        cpu.store_word(0, 0xff00_0000).unwrap();

        assert_eq!(
            cpu.step(),
            Err(CpuError::DecodeError(DecodeError::NoSuchOpcode(0xff)))
        );
        assert_eq!(cpu.regs.ic, 0);
    }

    #[test]
    fn test_lenient_mode_substitutes_nop() {
        let mut cpu = cpu_with_memory(16);
        cpu.set_lenient(true);
        cpu.store_word(0, 0xff00_0000).unwrap();

        let instr = cpu.step().unwrap();
        assert_eq!(instr.mnemonic(), "NOP");
        assert_eq!(cpu.regs.ic, 2);
    }

    #[test]
    fn test_step_without_memory_fails() {
        let mut cpu = Cpu::new();
        assert_eq!(
            cpu.step(),
            Err(CpuError::MemoryError(MemoryError::NoMemoryAt(0)))
        );
    }

    #[test]
    fn test_run_limited() {
        let mut cpu = cpu_with_memory(64);
        // A field of NOPs.
        let executed = cpu.run_limited(5).unwrap();
        assert_eq!(executed, 5);
        assert_eq!(cpu.regs.ic, 10);
        assert_eq!(cpu.cycles, 5);
    }
}
