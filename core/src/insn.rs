//! Decoded guest instructions (RV64I integer subset).
//!
//! The decoder turns a raw instruction word into an [`Insn`]; the code
//! generator lowers each [`Op`] into host-executable form. Only the
//! control-flow classification ([`Flow`]) matters to the tiering engine.

use crate::types::GuestAddress;

/// Link register written by direct and indirect calls (`ra`).
pub const LINK_REG: u8 = 1;

/// Size in bytes of every instruction in the supported subset.
pub const INSN_SIZE: u64 = 4;

/// Conditional branch comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchCond {
    Eq,
    Ne,
    Lt,
    Ge,
    Ltu,
    Geu,
}

impl BranchCond {
    pub fn eval(self, a: u64, b: u64) -> bool {
        match self {
            BranchCond::Eq => a == b,
            BranchCond::Ne => a != b,
            BranchCond::Lt => (a as i64) < (b as i64),
            BranchCond::Ge => (a as i64) >= (b as i64),
            BranchCond::Ltu => a < b,
            BranchCond::Geu => a >= b,
        }
    }
}

/// Integer ALU operation shared by register and immediate forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
}

impl AluOp {
    pub fn eval(self, a: u64, b: u64) -> u64 {
        let sh = (b & 0x3f) as u32;
        match self {
            AluOp::Add => a.wrapping_add(b),
            AluOp::Sub => a.wrapping_sub(b),
            AluOp::Sll => a << sh,
            AluOp::Slt => ((a as i64) < (b as i64)) as u64,
            AluOp::Sltu => (a < b) as u64,
            AluOp::Xor => a ^ b,
            AluOp::Srl => a >> sh,
            AluOp::Sra => ((a as i64) >> sh) as u64,
            AluOp::Or => a | b,
            AluOp::And => a & b,
        }
    }
}

/// Memory access width; loads also carry signedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemWidth {
    B,
    H,
    W,
    D,
}

impl MemWidth {
    pub const fn bytes(self) -> usize {
        match self {
            MemWidth::B => 1,
            MemWidth::H => 2,
            MemWidth::W => 4,
            MemWidth::D => 8,
        }
    }
}

/// Decoded operation with its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Lui { rd: u8, imm: i64 },
    Auipc { rd: u8, imm: i64 },
    Jal { rd: u8, offset: i64 },
    Jalr { rd: u8, rs1: u8, offset: i64 },
    Branch { cond: BranchCond, rs1: u8, rs2: u8, offset: i64 },
    Load { width: MemWidth, signed: bool, rd: u8, rs1: u8, offset: i64 },
    Store { width: MemWidth, rs1: u8, rs2: u8, offset: i64 },
    AluImm { op: AluOp, rd: u8, rs1: u8, imm: i64 },
    Alu { op: AluOp, rd: u8, rs1: u8, rs2: u8 },
}

/// How an instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    /// Falls through to the next instruction.
    Next,
    /// Conditional branch inside the subroutine.
    Branch { target: GuestAddress },
    /// Unconditional jump inside the subroutine.
    Jump { target: GuestAddress },
    /// Direct call with a statically known target.
    Call { target: GuestAddress },
    /// Call through a register.
    IndirectCall,
    /// Return through the link register.
    Return,
    /// Jump through a register that is neither a call nor a return.
    IndirectJump,
}

impl Flow {
    /// True for anything that ends a basic block.
    pub fn ends_block(self) -> bool {
        !matches!(self, Flow::Next)
    }

    /// True for direct and indirect calls.
    pub fn is_call(self) -> bool {
        matches!(self, Flow::Call { .. } | Flow::IndirectCall)
    }
}

/// One decoded guest instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Insn {
    pub addr: GuestAddress,
    pub word: u32,
    pub op: Op,
}

impl Insn {
    pub fn new(addr: GuestAddress, word: u32, op: Op) -> Self {
        Self { addr, word, op }
    }

    /// Address of the instruction that follows this one.
    pub fn next_addr(&self) -> GuestAddress {
        self.addr.offset(INSN_SIZE as i64)
    }

    pub fn flow(&self) -> Flow {
        match self.op {
            Op::Jal { rd, offset } => {
                let target = self.addr.offset(offset);
                if rd == LINK_REG {
                    Flow::Call { target }
                } else {
                    Flow::Jump { target }
                }
            }
            Op::Jalr { rd, rs1, offset } => {
                if rd == LINK_REG {
                    Flow::IndirectCall
                } else if rd == 0 && rs1 == LINK_REG && offset == 0 {
                    Flow::Return
                } else {
                    Flow::IndirectJump
                }
            }
            Op::Branch { offset, .. } => Flow::Branch {
                target: self.addr.offset(offset),
            },
            _ => Flow::Next,
        }
    }
}
