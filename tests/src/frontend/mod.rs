//! Decoder tests: single instructions, basic blocks and subroutine graphs.

use dbt_core::*;
use dbt_frontend::riscv::{decode_insn, RiscvDecoder};
use dbt_frontend::Decoder;
use pretty_assertions::assert_eq;

use crate::asm::*;

fn op_at(word: u32) -> Op {
    decode_insn(addr(BASE), word).expect("valid encoding").op
}

fn starts(cfg: &ControlFlowGraph) -> Vec<GuestAddress> {
    cfg.blocks().map(BasicBlock::start).collect()
}

// ── Single instructions ─────────────────────────────────────

#[test]
fn decode_alu_imm() {
    assert_eq!(
        op_at(addi(10, 11, -5)),
        Op::AluImm {
            op: AluOp::Add,
            rd: 10,
            rs1: 11,
            imm: -5
        }
    );
    assert_eq!(
        op_at(slli(5, 6, 33)),
        Op::AluImm {
            op: AluOp::Sll,
            rd: 5,
            rs1: 6,
            imm: 33
        }
    );
}

#[test]
fn decode_alu_reg() {
    assert_eq!(
        op_at(sub(1, 2, 3)),
        Op::Alu {
            op: AluOp::Sub,
            rd: 1,
            rs1: 2,
            rs2: 3
        }
    );
}

#[test]
fn decode_upper_immediates() {
    assert_eq!(
        op_at(lui(5, 0x12345000)),
        Op::Lui {
            rd: 5,
            imm: 0x12345000
        }
    );
    // lui sign-extends bit 31 on RV64.
    assert_eq!(
        op_at(lui(5, 0x8000_0000u32 as i32)),
        Op::Lui {
            rd: 5,
            imm: -0x8000_0000
        }
    );
    assert_eq!(
        op_at(auipc(6, 0x1000)),
        Op::Auipc { rd: 6, imm: 0x1000 }
    );
}

#[test]
fn decode_memory() {
    assert_eq!(
        op_at(ld(5, 2, -16)),
        Op::Load {
            width: MemWidth::D,
            signed: false,
            rd: 5,
            rs1: 2,
            offset: -16
        }
    );
    assert_eq!(
        op_at(lw(5, 2, 4)),
        Op::Load {
            width: MemWidth::W,
            signed: true,
            rd: 5,
            rs1: 2,
            offset: 4
        }
    );
    assert_eq!(
        op_at(sd(7, 2, -24)),
        Op::Store {
            width: MemWidth::D,
            rs1: 2,
            rs2: 7,
            offset: -24
        }
    );
}

#[test]
fn decode_control_flow_offsets() {
    assert_eq!(
        op_at(bne(5, 6, -8)),
        Op::Branch {
            cond: BranchCond::Ne,
            rs1: 5,
            rs2: 6,
            offset: -8
        }
    );
    assert_eq!(
        op_at(blt(1, 2, 0xffe)),
        Op::Branch {
            cond: BranchCond::Lt,
            rs1: 1,
            rs2: 2,
            offset: 0xffe
        }
    );
    assert_eq!(op_at(call(-0x800)), Op::Jal { rd: 1, offset: -0x800 });
    assert_eq!(op_at(j(0xf_fffe)), Op::Jal { rd: 0, offset: 0xf_fffe });
    assert_eq!(
        op_at(jalr(1, 5, -4)),
        Op::Jalr {
            rd: 1,
            rs1: 5,
            offset: -4
        }
    );
}

#[test]
fn zero_word_is_undefined() {
    assert_eq!(
        decode_insn(addr(0x1234), 0),
        Err(Fault::Decode {
            addr: addr(0x1234),
            word: 0
        })
    );
}

#[test]
fn compressed_encodings_are_undefined() {
    // c.addi a0, 1 in the low half, nop in the high half.
    let word = 0x0001_0505;
    assert!(matches!(
        decode_insn(addr(BASE), word),
        Err(Fault::Decode { word: w, .. }) if w == word
    ));
}

#[test]
fn unsupported_extensions_are_undefined() {
    // M extension.
    assert!(decode_insn(addr(BASE), mul(1, 2, 3)).is_err());
    // ecall.
    assert!(decode_insn(addr(BASE), 0x0000_0073).is_err());
    // Branch funct3 = 2 is reserved.
    assert!(decode_insn(addr(BASE), rv_b(8, 1, 2, 0b010)).is_err());
    // jalr with funct3 != 0.
    assert!(decode_insn(addr(BASE), rv_i(0, 1, 0b001, 0, 0b1100111)).is_err());
}

// ── Basic blocks ────────────────────────────────────────────

#[test]
fn block_stops_at_control_flow() {
    let mem = memory_with(&sum_loop());
    let b = RiscvDecoder::new().decode_block(&*mem, addr(BASE)).unwrap();
    assert_eq!(b.start(), addr(BASE));
    assert_eq!(b.len(), 3);
    assert_eq!(
        b.terminator(),
        Flow::Branch {
            target: addr(0x1000)
        }
    );
}

#[test]
fn block_stops_at_call() {
    let mem = call_loop_memory();
    let b = RiscvDecoder::new().decode_block(&*mem, addr(BASE)).unwrap();
    assert_eq!(b.len(), 3);
    assert_eq!(b.call_target(), Some(addr(0x2000)));
    assert_eq!(b.end(), addr(0x100c));
}

#[test]
fn block_stops_at_insn_cap() {
    let mem = memory_with(&[addi(1, 1, 1), addi(2, 2, 2), addi(3, 3, 3), ret()]);
    let dec = RiscvDecoder::new().with_max_block_insns(2);
    let b = dec.decode_block(&*mem, addr(BASE)).unwrap();
    assert_eq!(b.len(), 2);
    assert_eq!(b.terminator(), Flow::Next);
    assert_eq!(b.end(), addr(0x1008));
}

#[test]
fn block_with_bad_insn_fails() {
    // Third word is zero.
    let mem = memory_with(&[addi(1, 1, 1), addi(2, 2, 2)]);
    let err = RiscvDecoder::new()
        .decode_block(&*mem, addr(BASE))
        .unwrap_err();
    assert_eq!(
        err,
        Fault::Decode {
            addr: addr(0x1008),
            word: 0
        }
    );
}

#[test]
fn block_outside_memory_faults() {
    let mem = memory_with(&[]);
    let err = RiscvDecoder::new()
        .decode_block(&*mem, addr(0x10))
        .unwrap_err();
    assert!(matches!(err, Fault::Memory { addr: 0x10, size: 4 }));
}

// ── Subroutine graphs ───────────────────────────────────────

#[test]
fn graph_follows_loop() {
    let mem = memory_with(&sum_loop());
    let cfg = RiscvDecoder::new().decode_graph(&*mem, addr(BASE)).unwrap();
    assert_eq!(cfg.root(), addr(BASE));
    assert_eq!(starts(&cfg), vec![addr(0x1000), addr(0x100c)]);
    assert_eq!(cfg.call_sites().count(), 0);
}

#[test]
fn graph_stops_at_calls() {
    let mem = call_loop_memory();
    let cfg = RiscvDecoder::new().decode_graph(&*mem, addr(BASE)).unwrap();
    // The callee at 0x2000 and the return address are not followed.
    assert_eq!(starts(&cfg), vec![addr(0x1000)]);
    assert_eq!(
        cfg.call_sites().collect::<Vec<_>>(),
        vec![(addr(0x100c), Some(addr(0x2000)))]
    );

    let cfg = RiscvDecoder::new()
        .decode_graph(&*mem, addr(0x100c))
        .unwrap();
    assert_eq!(
        starts(&cfg),
        vec![addr(0x1004), addr(0x100c), addr(0x1010)]
    );
}

#[test]
fn graph_follows_jumps_and_diamonds() {
    // 0x1000: beq x5, x6, +12   -> 0x100c
    // 0x1004: addi x10, x0, 1
    // 0x1008: j +8              -> 0x1010
    // 0x100c: addi x10, x0, 2
    // 0x1010: ret
    let mem = memory_with(&[beq(5, 6, 12), addi(10, 0, 1), j(8), addi(10, 0, 2), ret()]);
    let cfg = RiscvDecoder::new().decode_graph(&*mem, addr(BASE)).unwrap();
    assert_eq!(
        starts(&cfg),
        vec![addr(0x1000), addr(0x1004), addr(0x100c), addr(0x1010)]
    );
    // 0x100c falls into 0x1010 and therefore overlaps it.
    assert_eq!(cfg.block(addr(0x100c)).unwrap().len(), 2);
}

#[test]
fn graph_respects_block_cap() {
    let mem = memory_with(&[beq(5, 6, 12), addi(10, 0, 1), j(8), addi(10, 0, 2), ret()]);
    let cfg = RiscvDecoder::new()
        .with_max_graph_blocks(2)
        .decode_graph(&*mem, addr(BASE))
        .unwrap();
    assert_eq!(cfg.len(), 2);
    assert!(cfg.contains(addr(BASE)));
}

#[test]
fn graph_leaves_undecodable_successor_out() {
    // The taken branch lands on a zero word.
    let mem = memory_with(&[beq(5, 6, 0x100), ret()]);
    let cfg = RiscvDecoder::new().decode_graph(&*mem, addr(BASE)).unwrap();
    assert_eq!(starts(&cfg), vec![addr(0x1000), addr(0x1004)]);
    assert!(!cfg.contains(addr(0x1100)));
}

#[test]
fn graph_with_bad_entry_fails() {
    let mem = memory_with(&[ret()]);
    let err = RiscvDecoder::new()
        .decode_graph(&*mem, addr(0x1004))
        .unwrap_err();
    assert_eq!(
        err,
        Fault::Decode {
            addr: addr(0x1004),
            word: 0
        }
    );
}
