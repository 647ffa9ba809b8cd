//! RV64I instruction word decoding.
//!
//! Covers the base integer subset the engine needs: upper immediates,
//! jumps, branches, loads/stores and integer ALU ops. Every other
//! encoding (compressed, M/A/F/D, system) is undefined here.

use dbt_core::{AluOp, BranchCond, Fault, GuestAddress, Insn, MemWidth, Op};

const OPC_LUI: u32 = 0x37;
const OPC_AUIPC: u32 = 0x17;
const OPC_JAL: u32 = 0x6f;
const OPC_JALR: u32 = 0x67;
const OPC_BRANCH: u32 = 0x63;
const OPC_LOAD: u32 = 0x03;
const OPC_STORE: u32 = 0x23;
const OPC_OP_IMM: u32 = 0x13;
const OPC_OP: u32 = 0x33;

fn sign_ext(val: u32, bits: u32) -> i64 {
    let shift = 32 - bits;
    ((val << shift) as i32 >> shift) as i64
}

fn rd(insn: u32) -> u8 {
    ((insn >> 7) & 0x1f) as u8
}

fn rs1(insn: u32) -> u8 {
    ((insn >> 15) & 0x1f) as u8
}

fn rs2(insn: u32) -> u8 {
    ((insn >> 20) & 0x1f) as u8
}

fn funct3(insn: u32) -> u32 {
    (insn >> 12) & 0x7
}

fn itype_imm(insn: u32) -> i64 {
    sign_ext(insn >> 20, 12)
}

fn stype_imm(insn: u32) -> i64 {
    sign_ext(((insn >> 25) << 5) | ((insn >> 7) & 0x1f), 12)
}

fn btype_imm(insn: u32) -> i64 {
    let b12 = (insn >> 31) & 1;
    let b11 = (insn >> 7) & 1;
    let b10_5 = (insn >> 25) & 0x3f;
    let b4_1 = (insn >> 8) & 0xf;
    sign_ext((b12 << 12) | (b11 << 11) | (b10_5 << 5) | (b4_1 << 1), 13)
}

fn jtype_imm(insn: u32) -> i64 {
    let b20 = (insn >> 31) & 1;
    let b10_1 = (insn >> 21) & 0x3ff;
    let b11 = (insn >> 20) & 1;
    let b19_12 = (insn >> 12) & 0xff;
    sign_ext((b20 << 20) | (b19_12 << 12) | (b11 << 11) | (b10_1 << 1), 21)
}

fn utype_imm(insn: u32) -> i64 {
    (insn & 0xffff_f000) as i32 as i64
}

/// Decode one 32-bit instruction word located at `addr`.
pub fn decode_insn(addr: GuestAddress, insn: u32) -> Result<Insn, Fault> {
    let undef = Fault::Decode { addr, word: insn };

    // Compressed (16-bit) encodings are not part of the subset.
    if insn & 0x3 != 0x3 {
        return Err(undef);
    }

    let op = match insn & 0x7f {
        OPC_LUI => Op::Lui {
            rd: rd(insn),
            imm: utype_imm(insn),
        },
        OPC_AUIPC => Op::Auipc {
            rd: rd(insn),
            imm: utype_imm(insn),
        },
        OPC_JAL => Op::Jal {
            rd: rd(insn),
            offset: jtype_imm(insn),
        },
        OPC_JALR if funct3(insn) == 0 => Op::Jalr {
            rd: rd(insn),
            rs1: rs1(insn),
            offset: itype_imm(insn),
        },
        OPC_BRANCH => {
            let cond = match funct3(insn) {
                0 => BranchCond::Eq,
                1 => BranchCond::Ne,
                4 => BranchCond::Lt,
                5 => BranchCond::Ge,
                6 => BranchCond::Ltu,
                7 => BranchCond::Geu,
                _ => return Err(undef),
            };
            Op::Branch {
                cond,
                rs1: rs1(insn),
                rs2: rs2(insn),
                offset: btype_imm(insn),
            }
        }
        OPC_LOAD => {
            let (width, signed) = match funct3(insn) {
                0 => (MemWidth::B, true),
                1 => (MemWidth::H, true),
                2 => (MemWidth::W, true),
                3 => (MemWidth::D, false),
                4 => (MemWidth::B, false),
                5 => (MemWidth::H, false),
                6 => (MemWidth::W, false),
                _ => return Err(undef),
            };
            Op::Load {
                width,
                signed,
                rd: rd(insn),
                rs1: rs1(insn),
                offset: itype_imm(insn),
            }
        }
        OPC_STORE => {
            let width = match funct3(insn) {
                0 => MemWidth::B,
                1 => MemWidth::H,
                2 => MemWidth::W,
                3 => MemWidth::D,
                _ => return Err(undef),
            };
            Op::Store {
                width,
                rs1: rs1(insn),
                rs2: rs2(insn),
                offset: stype_imm(insn),
            }
        }
        OPC_OP_IMM => {
            let f3 = funct3(insn);
            let funct6 = insn >> 26;
            let (op, imm) = match f3 {
                0 => (AluOp::Add, itype_imm(insn)),
                2 => (AluOp::Slt, itype_imm(insn)),
                3 => (AluOp::Sltu, itype_imm(insn)),
                4 => (AluOp::Xor, itype_imm(insn)),
                6 => (AluOp::Or, itype_imm(insn)),
                7 => (AluOp::And, itype_imm(insn)),
                1 if funct6 == 0 => (AluOp::Sll, ((insn >> 20) & 0x3f) as i64),
                5 if funct6 == 0 => (AluOp::Srl, ((insn >> 20) & 0x3f) as i64),
                5 if funct6 == 0x10 => (AluOp::Sra, ((insn >> 20) & 0x3f) as i64),
                _ => return Err(undef),
            };
            Op::AluImm {
                op,
                rd: rd(insn),
                rs1: rs1(insn),
                imm,
            }
        }
        OPC_OP => {
            let op = match (insn >> 25, funct3(insn)) {
                (0x00, 0) => AluOp::Add,
                (0x20, 0) => AluOp::Sub,
                (0x00, 1) => AluOp::Sll,
                (0x00, 2) => AluOp::Slt,
                (0x00, 3) => AluOp::Sltu,
                (0x00, 4) => AluOp::Xor,
                (0x00, 5) => AluOp::Srl,
                (0x20, 5) => AluOp::Sra,
                (0x00, 6) => AluOp::Or,
                (0x00, 7) => AluOp::And,
                _ => return Err(undef),
            };
            Op::Alu {
                op,
                rd: rd(insn),
                rs1: rs1(insn),
                rs2: rs2(insn),
            }
        }
        _ => return Err(undef),
    };

    Ok(Insn::new(addr, insn, op))
}
