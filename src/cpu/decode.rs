//! Instruction decoder for the Censor 932.
//!
//! Every instruction is one 32-bit word: an 8-bit opcode, two 4-bit
//! register nibbles and a 16-bit payload. Whether the second nibble is a
//! second register number or an indirect flag plus index register is a
//! property of the opcode, not of the encoding, so the opcode table
//! selects the operand shape during decoding.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Type-1 operand: one register, indirect flag, index register, and a
/// 16-bit address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indexed {
    pub r: u8,
    pub indirect: bool,
    /// Index register number, 0-7. 0 means no indexing.
    pub x: u8,
    pub addr: u16,
}

/// Type-2 operand: two registers and a 16-bit address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoReg {
    pub r1: u8,
    pub r2: u8,
    pub addr: u16,
}

/// Type-3 operand: two registers and a 16-bit immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immediate {
    pub r1: u8,
    pub r2: u8,
    pub d: u16,
}

/// A decoded Censor 932 instruction.
///
/// LC, OH, OD and DD have no opcode assigned in the machine description;
/// they can be executed directly but are never produced by [`decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Loads ====================
    /// Load word: R[r] <- M[EA]
    Lw(Indexed),
    /// Load half-word, zero-extended
    Lh(Indexed),
    /// Load immediate: R[r1] <- d
    Ld(Immediate),
    /// Load double word into R[r], R[r+1]
    Ldw(Indexed),
    /// Load and test: load word, set CC
    Lt(Indexed),
    /// Load negative: negate unless already negative
    Ln(Indexed),
    /// Load positive: negate if negative
    Lp(Indexed),
    /// Load complement: always negate
    Lc(Indexed),
    /// Load registers from storage: R[r1] <- M[EA], R[r2] <- M[EA+2]
    Lrs(TwoReg),

    // ==================== Stores ====================
    /// Store word: M[EA] <- R[r]
    Stw(Indexed),
    /// Store low half-word of R[r]
    Sth(Indexed),
    /// Store double word from R[r], R[r+1]
    Stdw(Indexed),
    /// Reset half-word to zero
    Rzh(Indexed),
    /// Reset word to zero
    Rzw(Indexed),
    /// Store registers R[r1]..=R[r2] at consecutive words
    Srs(TwoReg),
    /// Interchange full word between R[r] and M[EA]
    Iw(Indexed),
    /// Interchange half word
    Ih(Indexed),

    // ==================== Add / subtract ====================
    /// Add word from memory
    Aw(Indexed),
    /// Add half-word from memory
    Ah(Indexed),
    /// Add immediate: R[r1] <- R[r2] + d
    Ad(Immediate),
    /// Add to storage: M[EA] <- R[r1] + R[r2]
    As(TwoReg),
    /// Add register to storage: M[EA] <- M[EA] + R[r]
    Ats(Indexed),
    /// Add double word with carry propagation
    Adw(Indexed),
    /// Subtract word from memory
    Sw(Indexed),
    /// Subtract half-word from memory
    Sh(Indexed),
    /// Subtract immediate: R[r1] <- R[r2] - d
    Sd(Immediate),
    /// Subtract to storage: M[EA] <- R[r1] - R[r2]
    Ss(TwoReg),
    /// Subtract register from storage: M[EA] <- M[EA] - R[r]
    Sfs(Indexed),
    /// Subtract double word with borrow propagation
    Sdw(Indexed),

    // ==================== Multiply / divide ====================
    /// Multiply word, 64-bit product into R[r], R[r+1]
    Mw(Indexed),
    /// Multiply half-word, wrapping
    Mh(Indexed),
    /// Multiply immediate: R[r1] <- R[r2] * d
    Md(Immediate),
    /// Multiply to storage, 64-bit product into M[EA], M[EA+2]
    Ms(TwoReg),
    /// Divide the pair R[r]:R[r+1] by a memory word
    Dw(Indexed),
    /// Divide by a half-word from memory
    Dh(Indexed),
    /// Divide immediate: R[r1] <- R[r2] / d
    Dd(Immediate),
    /// Divide the pair R[r1]:R[r1+1] by R[r2], quotient to storage
    Ds(TwoReg),

    // ==================== Compares ====================
    /// Compare with half-word
    Ch(Indexed),
    /// Compare with word
    Cw(Indexed),
    /// Compare with immediate
    Cd(Immediate),
    /// Compare logical with half-word
    Clh(Indexed),
    /// Compare logical with word
    Clw(Indexed),
    /// Compare logical with immediate
    Cld(Immediate),

    // ==================== Bitwise ====================
    /// AND half-word
    Nh(Indexed),
    /// AND word
    Nw(Indexed),
    /// AND immediate
    Nd(Immediate),
    /// AND to storage (two registers)
    Ns(TwoReg),
    /// AND register into storage
    Nts(Indexed),
    /// OR half-word
    Oh(Indexed),
    /// OR word
    Ow(Indexed),
    /// OR immediate
    Od(Immediate),
    /// OR to storage (two registers)
    Os(TwoReg),
    /// OR register into storage
    Ots(Indexed),
    /// XOR half-word
    Xh(Indexed),
    /// XOR word
    Xw(Indexed),
    /// XOR immediate
    Xd(Immediate),
    /// XOR to storage (two registers)
    Xs(TwoReg),
    /// XOR register into storage
    Xts(Indexed),

    // ==================== Shifts and rotates ====================
    /// Shift left logical, one bit
    Sll(Indexed),
    /// Shift right logical
    Srl(Indexed),
    /// Shift left logical double (R[r]:R[r+1])
    Sldl(Indexed),
    /// Shift right logical double
    Srdl(Indexed),
    /// Shift left arithmetic, sign preserved
    Sla(Indexed),
    /// Shift right arithmetic
    Sra(Indexed),
    /// Shift left arithmetic double
    Slda(Indexed),
    /// Shift right arithmetic double
    Srda(Indexed),
    /// Rotate left single
    Rls(Indexed),
    /// Rotate right single
    Rrs(Indexed),
    /// Rotate left double
    Rld(Indexed),
    /// Rotate right double
    Rrd(Indexed),

    // ==================== Control flow ====================
    /// No operation
    Nop(Indexed),
    /// Execute the instruction stored at M[EA] in place
    Ex(Indexed),
    /// Jump on condition: branch if CC & mask != 0 (mask in r)
    Jc(Indexed),
    /// Jump and save: R[r] <- IC + 2, branch
    Js(Indexed),
    /// Decrement by one and branch if not zero
    Jos(Indexed),
    /// Decrement by two and branch if not zero
    Jts(Indexed),
    /// Increment by one and branch if not zero
    Joa(Indexed),
}

impl Instruction {
    /// Assembler mnemonic, for diagnostics and tracing.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Lw(_) => "LW",
            Instruction::Lh(_) => "LH",
            Instruction::Ld(_) => "LD",
            Instruction::Ldw(_) => "LDW",
            Instruction::Lt(_) => "LT",
            Instruction::Ln(_) => "LN",
            Instruction::Lp(_) => "LP",
            Instruction::Lc(_) => "LC",
            Instruction::Lrs(_) => "LRS",
            Instruction::Stw(_) => "STW",
            Instruction::Sth(_) => "STH",
            Instruction::Stdw(_) => "STDW",
            Instruction::Rzh(_) => "RZH",
            Instruction::Rzw(_) => "RZW",
            Instruction::Srs(_) => "SRS",
            Instruction::Iw(_) => "IW",
            Instruction::Ih(_) => "IH",
            Instruction::Aw(_) => "AW",
            Instruction::Ah(_) => "AH",
            Instruction::Ad(_) => "AD",
            Instruction::As(_) => "AS",
            Instruction::Ats(_) => "ATS",
            Instruction::Adw(_) => "ADW",
            Instruction::Sw(_) => "SW",
            Instruction::Sh(_) => "SH",
            Instruction::Sd(_) => "SD",
            Instruction::Ss(_) => "SS",
            Instruction::Sfs(_) => "SFS",
            Instruction::Sdw(_) => "SDW",
            Instruction::Mw(_) => "MW",
            Instruction::Mh(_) => "MH",
            Instruction::Md(_) => "MD",
            Instruction::Ms(_) => "MS",
            Instruction::Dw(_) => "DW",
            Instruction::Dh(_) => "DH",
            Instruction::Dd(_) => "DD",
            Instruction::Ds(_) => "DS",
            Instruction::Ch(_) => "CH",
            Instruction::Cw(_) => "CW",
            Instruction::Cd(_) => "CD",
            Instruction::Clh(_) => "CLH",
            Instruction::Clw(_) => "CLW",
            Instruction::Cld(_) => "CLD",
            Instruction::Nh(_) => "NH",
            Instruction::Nw(_) => "NW",
            Instruction::Nd(_) => "ND",
            Instruction::Ns(_) => "NS",
            Instruction::Nts(_) => "NTS",
            Instruction::Oh(_) => "OH",
            Instruction::Ow(_) => "OW",
            Instruction::Od(_) => "OD",
            Instruction::Os(_) => "OS",
            Instruction::Ots(_) => "OTS",
            Instruction::Xh(_) => "XH",
            Instruction::Xw(_) => "XW",
            Instruction::Xd(_) => "XD",
            Instruction::Xs(_) => "XS",
            Instruction::Xts(_) => "XTS",
            Instruction::Sll(_) => "SLL",
            Instruction::Srl(_) => "SRL",
            Instruction::Sldl(_) => "SLDL",
            Instruction::Srdl(_) => "SRDL",
            Instruction::Sla(_) => "SLA",
            Instruction::Sra(_) => "SRA",
            Instruction::Slda(_) => "SLDA",
            Instruction::Srda(_) => "SRDA",
            Instruction::Rls(_) => "RLS",
            Instruction::Rrs(_) => "RRS",
            Instruction::Rld(_) => "RLD",
            Instruction::Rrd(_) => "RRD",
            Instruction::Nop(_) => "NOP",
            Instruction::Ex(_) => "EX",
            Instruction::Jc(_) => "JC",
            Instruction::Js(_) => "JS",
            Instruction::Jos(_) => "JOS",
            Instruction::Jts(_) => "JTS",
            Instruction::Joa(_) => "JOA",
        }
    }

    /// A NOP with empty operand fields, as substituted for unassigned
    /// opcodes in lenient mode.
    pub(crate) fn nop() -> Self {
        Instruction::Nop(Indexed {
            r: 0,
            indirect: false,
            x: 0,
            addr: 0,
        })
    }
}

/// Decode a 32-bit instruction word.
///
/// The opcode table follows the machine description. Several opcodes
/// alias the same instruction (0x44/0x45 NH, 0x94/0x95 ND, 0x4D/0x9D DH,
/// 0x98/0xCD LD); unassigned opcodes fail with
/// [`DecodeError::NoSuchOpcode`].
pub fn decode(word: u32) -> Result<Instruction, DecodeError> {
    let op = (word >> 24) as u8;
    let r1 = ((word >> 20) & 0xf) as u8;
    let r2 = ((word >> 16) & 0xf) as u8;
    let rest = (word & 0xffff) as u16;

    // All three shapes are cheap to build; the opcode picks one.
    let indexed = Indexed {
        r: r1,
        indirect: r2 & 0x8 != 0,
        x: r2 & 0x7,
        addr: rest,
    };
    let two_reg = TwoReg { r1, r2, addr: rest };
    let imm = Immediate { r1, r2, d: rest };

    let instruction = match op {
        0x00 => Instruction::Nop(indexed),
        0x01 => Instruction::Js(indexed),
        0x02 => Instruction::Jos(indexed),
        0x03 => Instruction::Jts(indexed),
        0x04 => Instruction::Joa(indexed),
        0x05 => Instruction::Jc(indexed),
        0x14 => Instruction::Ns(two_reg),
        0x15 => Instruction::Os(two_reg),
        0x16 => Instruction::Xs(two_reg),
        0x1a => Instruction::As(two_reg),
        0x1b => Instruction::Ss(two_reg),
        0x1c => Instruction::Ms(two_reg),
        0x1d => Instruction::Ds(two_reg),
        0x24 => Instruction::Nts(indexed),
        0x25 => Instruction::Ots(indexed),
        0x26 => Instruction::Xts(indexed),
        0x2a => Instruction::Ats(indexed),
        0x2b => Instruction::Sfs(indexed),
        0x40 => Instruction::Sth(indexed),
        0x44 | 0x45 => Instruction::Nh(indexed),
        0x46 => Instruction::Xh(indexed),
        0x47 => Instruction::Clh(indexed),
        0x48 => Instruction::Lh(indexed),
        0x49 => Instruction::Ch(indexed),
        0x4a => Instruction::Ah(indexed),
        0x4b => Instruction::Sh(indexed),
        0x4c => Instruction::Mh(indexed),
        0x4d => Instruction::Dh(indexed),
        0x4e => Instruction::Ih(indexed),
        0x4f => Instruction::Rzh(indexed),
        0x50 => Instruction::Stw(indexed),
        0x54 => Instruction::Nw(indexed),
        0x55 => Instruction::Ow(indexed),
        0x56 => Instruction::Xw(indexed),
        0x57 => Instruction::Clw(indexed),
        0x58 => Instruction::Lw(indexed),
        0x59 => Instruction::Cw(indexed),
        0x5a => Instruction::Aw(indexed),
        0x5b => Instruction::Sw(indexed),
        0x5c => Instruction::Mw(indexed),
        0x5d => Instruction::Dw(indexed),
        0x5e => Instruction::Iw(indexed),
        0x5f => Instruction::Rzw(indexed),
        0x60 => Instruction::Stdw(indexed),
        0x68 => Instruction::Ldw(indexed),
        0x6a => Instruction::Adw(indexed),
        0x6b => Instruction::Sdw(indexed),
        0x84 => Instruction::Rrs(indexed),
        0x85 => Instruction::Rls(indexed),
        0x86 => Instruction::Rrd(indexed),
        0x87 => Instruction::Rld(indexed),
        0x88 => Instruction::Sra(indexed),
        0x89 => Instruction::Sla(indexed),
        0x8a => Instruction::Srda(indexed),
        0x8b => Instruction::Slda(indexed),
        0x8c => Instruction::Srl(indexed),
        0x8d => Instruction::Sll(indexed),
        0x8e => Instruction::Srdl(indexed),
        0x8f => Instruction::Sldl(indexed),
        0x94 | 0x95 => Instruction::Nd(imm),
        0x96 => Instruction::Xd(imm),
        0x97 => Instruction::Cld(imm),
        0x98 => Instruction::Ld(imm),
        0x99 => Instruction::Cd(imm),
        0x9a => Instruction::Ad(imm),
        0x9b => Instruction::Sd(imm),
        0x9c => Instruction::Md(imm),
        0x9d => Instruction::Dh(indexed),
        0xb0 => Instruction::Srs(two_reg),
        0xb8 => Instruction::Lrs(two_reg),
        0xc1 => Instruction::Ex(indexed),
        0xca => Instruction::Lp(indexed),
        0xcb => Instruction::Ln(indexed),
        0xcc => Instruction::Lt(indexed),
        0xcd => Instruction::Ld(imm),
        _ => return Err(DecodeError::NoSuchOpcode(op)),
    };

    Ok(instruction)
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no such opcode: {0:#04x}")]
    NoSuchOpcode(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_immediate() {
        // AD r1=1, r2=2, d=0x1234
        let instr = decode(0x9a12_1234).unwrap();
        assert_eq!(
            instr,
            Instruction::Ad(Immediate {
                r1: 1,
                r2: 2,
                d: 0x1234
            })
        );
    }

    #[test]
    fn test_decode_indexed_fields() {
        // LW r=3, indirect, x=5, as=0xbeef
        let instr = decode(0x583d_beef).unwrap();
        assert_eq!(
            instr,
            Instruction::Lw(Indexed {
                r: 3,
                indirect: true,
                x: 5,
                addr: 0xbeef
            })
        );

        // Same without the indirect bit.
        let instr = decode(0x5835_beef).unwrap();
        assert_eq!(
            instr,
            Instruction::Lw(Indexed {
                r: 3,
                indirect: false,
                x: 5,
                addr: 0xbeef
            })
        );
    }

    #[test]
    fn test_decode_two_reg() {
        // SRS r1=2, r2=5, as=0x0100
        let instr = decode(0xb025_0100).unwrap();
        assert_eq!(
            instr,
            Instruction::Srs(TwoReg {
                r1: 2,
                r2: 5,
                addr: 0x0100
            })
        );
    }

    #[test]
    fn test_opcode_aliases() {
        let a = decode(0x9812_3456).unwrap();
        let b = decode(0xcd12_3456).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.mnemonic(), "LD");

        assert_eq!(decode(0x4400_0000).unwrap(), decode(0x4500_0000).unwrap());
        assert_eq!(decode(0x9400_0000).unwrap(), decode(0x9500_0000).unwrap());
        assert_eq!(decode(0x4d00_0000).unwrap(), decode(0x9d00_0000).unwrap());
    }

    #[test]
    fn test_unassigned_opcode() {
        assert_eq!(decode(0xff00_0000), Err(DecodeError::NoSuchOpcode(0xff)));
        // Reserved manual opcodes (CP and friends) fail too.
        assert_eq!(decode(0xc000_0000), Err(DecodeError::NoSuchOpcode(0xc0)));
        assert_eq!(decode(0x0600_0000), Err(DecodeError::NoSuchOpcode(0x06)));
    }

    #[test]
    fn test_rotate_group() {
        assert_eq!(decode(0x8400_0000).unwrap().mnemonic(), "RRS");
        assert_eq!(decode(0x8500_0000).unwrap().mnemonic(), "RLS");
        assert_eq!(decode(0x8600_0000).unwrap().mnemonic(), "RRD");
        assert_eq!(decode(0x8700_0000).unwrap().mnemonic(), "RLD");
    }
}
