//! Guest instruction decoding into basic blocks and subroutine graphs.
//!
//! Provides the generic decode framework (`InsnDecoder` trait plus the
//! `block_loop` / `graph_walk` drivers) and the architecture-specific
//! decoders built on it.

pub mod riscv;

use std::collections::VecDeque;

use dbt_core::{BasicBlock, ControlFlowGraph, Fault, GuestAddress, GuestMemory, Insn};
use tracing::trace;

/// Default cap on instructions per basic block.
pub const DEFAULT_MAX_BLOCK_INSNS: usize = 512;
/// Default cap on blocks per subroutine graph.
pub const DEFAULT_MAX_GRAPH_BLOCKS: usize = 256;

/// Decoder contract used by the tier controller.
///
/// A block is either decoded completely or not at all. A graph only
/// fails when its entry block does; see [`graph_walk`].
pub trait Decoder: Send + Sync {
    /// Decode one basic block starting at `addr`.
    fn decode_block(&self, mem: &dyn GuestMemory, addr: GuestAddress) -> Result<BasicBlock, Fault>;

    /// Decode the subroutine rooted at `addr`: its entry block plus every
    /// block reachable through internal branches. Calls, returns and
    /// indirect jumps are not followed.
    fn decode_graph(&self, mem: &dyn GuestMemory, addr: GuestAddress) -> Result<ControlFlowGraph, Fault>;
}

// ---------------------------------------------------------------
// Generic decode framework
// ---------------------------------------------------------------

/// Per-architecture single-instruction decoding.
pub trait InsnDecoder {
    /// Fetch and decode the instruction at `addr`.
    fn decode_insn(&self, mem: &dyn GuestMemory, addr: GuestAddress) -> Result<Insn, Fault>;

    /// Maximum instructions allowed in one block.
    fn max_block_insns(&self) -> usize {
        DEFAULT_MAX_BLOCK_INSNS
    }

    /// Maximum blocks explored for one graph.
    fn max_graph_blocks(&self) -> usize {
        DEFAULT_MAX_GRAPH_BLOCKS
    }
}

/// Sequential decode loop: decode until a control-flow instruction or
/// the per-block cap.
pub fn block_loop<T: InsnDecoder + ?Sized>(
    dec: &T,
    mem: &dyn GuestMemory,
    addr: GuestAddress,
) -> Result<BasicBlock, Fault> {
    let max = dec.max_block_insns().max(1);
    let mut insns = Vec::new();
    let mut pc = addr;

    loop {
        let insn = dec.decode_insn(mem, pc)?;
        insns.push(insn);
        if insn.flow().ends_block() || insns.len() >= max {
            break;
        }
        pc = insn.next_addr();
    }

    Ok(BasicBlock::new(addr, insns))
}

/// Worklist exploration of the blocks reachable from `addr` through
/// internal edges.
///
/// Branch targets that would exceed the block cap, or whose block does
/// not decode, are left out of the graph; generated code treats them as
/// exits. Only a fault in the entry block fails the walk.
pub fn graph_walk<T: InsnDecoder + ?Sized>(
    dec: &T,
    mem: &dyn GuestMemory,
    addr: GuestAddress,
) -> Result<ControlFlowGraph, Fault> {
    let max_blocks = dec.max_graph_blocks().max(1);
    let root = block_loop(dec, mem, addr)?;
    let mut work: VecDeque<GuestAddress> = root.successors().into();
    let mut cfg = ControlFlowGraph::new(root);

    while let Some(next) = work.pop_front() {
        if cfg.contains(next) {
            continue;
        }
        if cfg.len() >= max_blocks {
            trace!(root = %addr, "graph block cap reached");
            break;
        }
        let block = match block_loop(dec, mem, next) {
            Ok(block) => block,
            Err(fault) => {
                trace!(root = %addr, %next, %fault, "undecodable successor left as exit");
                continue;
            }
        };
        work.extend(block.successors());
        cfg.insert(block);
    }

    Ok(cfg)
}
