use dbt_core::*;
use dbt_frontend::riscv::decode_insn;
use pretty_assertions::assert_eq;

use crate::asm::*;

fn block_at(start: u64, words: &[u32]) -> BasicBlock {
    let insns = words
        .iter()
        .enumerate()
        .map(|(i, w)| decode_insn(addr(start + 4 * i as u64), *w).expect("valid encoding"))
        .collect();
    BasicBlock::new(addr(start), insns)
}

#[test]
fn branch_block_successors() {
    let b = block_at(0x1000, &[addi(5, 5, 1), bne(5, 6, -4)]);
    assert_eq!(b.len(), 2);
    assert_eq!(b.end(), addr(0x1008));
    assert_eq!(b.size(), 8);
    assert_eq!(
        b.terminator(),
        Flow::Branch {
            target: addr(0x1000)
        }
    );
    assert_eq!(b.successors(), vec![addr(0x1000), addr(0x1008)]);
    assert!(!b.ends_in_call());
    assert_eq!(b.call_target(), None);
}

#[test]
fn call_block_has_no_internal_successors() {
    let b = block_at(0x1000, &[addi(5, 5, 1), call(0x100)]);
    assert!(b.ends_in_call());
    assert_eq!(b.call_target(), Some(addr(0x1104)));
    assert!(b.successors().is_empty());

    let b = block_at(0x1000, &[jalr(RA, 5, 0)]);
    assert!(b.ends_in_call());
    assert_eq!(b.call_target(), None);
}

#[test]
fn fallthrough_block() {
    // Block cut at the instruction cap.
    let b = block_at(0x1000, &[addi(1, 1, 1), addi(2, 2, 2)]);
    assert_eq!(b.terminator(), Flow::Next);
    assert_eq!(b.successors(), vec![addr(0x1008)]);
}

#[test]
fn return_and_jump_blocks() {
    assert!(block_at(0x1000, &[ret()]).successors().is_empty());
    assert_eq!(
        block_at(0x1000, &[j(0x20)]).successors(),
        vec![addr(0x1020)]
    );
}

#[test]
fn graph_insert_and_lookup() {
    let root = block_at(0x1000, &[beq(5, 6, 0x10)]);
    let mut cfg = ControlFlowGraph::new(root.clone());
    assert_eq!(cfg.root(), addr(0x1000));
    assert_eq!(cfg.root_block(), &root);
    assert!(cfg.insert(block_at(0x1004, &[ret()])));
    assert!(cfg.insert(block_at(0x1010, &[ret()])));
    assert!(!cfg.insert(block_at(0x1010, &[ret()])));
    assert_eq!(cfg.len(), 3);
    assert!(cfg.contains(addr(0x1004)));
    assert!(cfg.block(addr(0x1008)).is_none());
    assert_eq!(cfg.size(), 12);

    let starts: Vec<_> = cfg.blocks().map(BasicBlock::start).collect();
    assert_eq!(starts, vec![addr(0x1000), addr(0x1004), addr(0x1010)]);
}

#[test]
fn graph_call_sites() {
    let root = block_at(0x1000, &[beq(5, 6, 0x10)]);
    let mut cfg = ControlFlowGraph::new(root);
    cfg.insert(block_at(0x1004, &[addi(1, 1, 0), call(0x1000)]));
    cfg.insert(block_at(0x1010, &[jalr(RA, 7, 0)]));

    let sites: Vec<_> = cfg.call_sites().collect();
    assert_eq!(
        sites,
        vec![
            (addr(0x100c), Some(addr(0x2008))),
            (addr(0x1014), None),
        ]
    );
}
