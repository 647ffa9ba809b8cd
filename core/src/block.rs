use std::collections::BTreeMap;

use crate::insn::{Flow, Insn};
use crate::types::GuestAddress;

/// A straight-line run of decoded guest instructions.
///
/// Starts at `start` and ends at the first control-flow instruction, or
/// earlier when the decoder's per-block instruction cap is hit (the
/// block then falls through to [`BasicBlock::end`]). Immutable once
/// decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    start: GuestAddress,
    insns: Vec<Insn>,
}

impl BasicBlock {
    /// Build a block from decoded instructions.
    ///
    /// `insns` must be non-empty and contiguous starting at `start`.
    pub fn new(start: GuestAddress, insns: Vec<Insn>) -> Self {
        debug_assert!(!insns.is_empty());
        debug_assert_eq!(insns.first().map(|i| i.addr), Some(start));
        Self { start, insns }
    }

    pub fn start(&self) -> GuestAddress {
        self.start
    }

    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Last instruction of the block.
    pub fn last(&self) -> &Insn {
        &self.insns[self.insns.len() - 1]
    }

    /// Control flow of the block's last instruction.
    pub fn terminator(&self) -> Flow {
        self.last().flow()
    }

    /// Address immediately after the block.
    pub fn end(&self) -> GuestAddress {
        self.last().next_addr()
    }

    /// Guest bytes covered by the block.
    pub fn size(&self) -> u64 {
        self.end().value().wrapping_sub(self.start.value())
    }

    /// Successors reachable through internal (non-call) edges.
    pub fn successors(&self) -> Vec<GuestAddress> {
        match self.terminator() {
            Flow::Next => vec![self.end()],
            Flow::Branch { target } => vec![target, self.end()],
            Flow::Jump { target } => vec![target],
            Flow::Call { .. } | Flow::IndirectCall | Flow::Return | Flow::IndirectJump => {
                Vec::new()
            }
        }
    }

    pub fn ends_in_call(&self) -> bool {
        self.terminator().is_call()
    }

    /// Statically known call target, if the block ends in a direct call.
    pub fn call_target(&self) -> Option<GuestAddress> {
        match self.terminator() {
            Flow::Call { target } => Some(target),
            _ => None,
        }
    }
}

/// Blocks of one subroutine linked by internal branches.
///
/// Built once per Tier1 request and owned by that request until the
/// compiled unit has been produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph {
    root: GuestAddress,
    blocks: BTreeMap<GuestAddress, BasicBlock>,
}

impl ControlFlowGraph {
    /// Create a graph from its root block.
    pub fn new(root: BasicBlock) -> Self {
        let addr = root.start();
        let mut blocks = BTreeMap::new();
        blocks.insert(addr, root);
        Self { root: addr, blocks }
    }

    /// Add a block. Returns false if a block already starts there.
    pub fn insert(&mut self, block: BasicBlock) -> bool {
        if self.blocks.contains_key(&block.start()) {
            return false;
        }
        self.blocks.insert(block.start(), block);
        true
    }

    pub fn root(&self) -> GuestAddress {
        self.root
    }

    pub fn root_block(&self) -> &BasicBlock {
        &self.blocks[&self.root]
    }

    pub fn block(&self, addr: GuestAddress) -> Option<&BasicBlock> {
        self.blocks.get(&addr)
    }

    pub fn contains(&self, addr: GuestAddress) -> bool {
        self.blocks.contains_key(&addr)
    }

    /// Blocks in ascending address order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// `(return_address, target)` for every block ending in a call.
    ///
    /// `target` is `None` for indirect calls.
    pub fn call_sites(&self) -> impl Iterator<Item = (GuestAddress, Option<GuestAddress>)> + '_ {
        self.blocks
            .values()
            .filter(|b| b.ends_in_call())
            .map(|b| (b.end(), b.call_target()))
    }

    /// Total guest bytes covered by the graph's blocks.
    pub fn size(&self) -> u64 {
        self.blocks.values().map(BasicBlock::size).sum()
    }
}
