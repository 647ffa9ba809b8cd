//! RISC-V frontend: RV64I user-mode instruction decoding.

mod decode;

pub use decode::decode_insn;

use crate::{block_loop, graph_walk, Decoder, InsnDecoder};
use crate::{DEFAULT_MAX_BLOCK_INSNS, DEFAULT_MAX_GRAPH_BLOCKS};
use dbt_core::{BasicBlock, ControlFlowGraph, Fault, GuestAddress, GuestMemory, Insn};

/// RV64I decoder.
#[derive(Debug, Clone)]
pub struct RiscvDecoder {
    max_block_insns: usize,
    max_graph_blocks: usize,
}

impl RiscvDecoder {
    pub fn new() -> Self {
        Self {
            max_block_insns: DEFAULT_MAX_BLOCK_INSNS,
            max_graph_blocks: DEFAULT_MAX_GRAPH_BLOCKS,
        }
    }

    /// Cap the number of instructions in one block (minimum 1).
    pub fn with_max_block_insns(mut self, n: usize) -> Self {
        self.max_block_insns = n.max(1);
        self
    }

    /// Cap the number of blocks explored for one graph (minimum 1).
    pub fn with_max_graph_blocks(mut self, n: usize) -> Self {
        self.max_graph_blocks = n.max(1);
        self
    }
}

impl Default for RiscvDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl InsnDecoder for RiscvDecoder {
    fn decode_insn(&self, mem: &dyn GuestMemory, addr: GuestAddress) -> Result<Insn, Fault> {
        let word = mem.fetch_insn(addr)?;
        decode_insn(addr, word)
    }

    fn max_block_insns(&self) -> usize {
        self.max_block_insns
    }

    fn max_graph_blocks(&self) -> usize {
        self.max_graph_blocks
    }
}

impl Decoder for RiscvDecoder {
    fn decode_block(&self, mem: &dyn GuestMemory, addr: GuestAddress) -> Result<BasicBlock, Fault> {
        block_loop(self, mem, addr)
    }

    fn decode_graph(&self, mem: &dyn GuestMemory, addr: GuestAddress) -> Result<ControlFlowGraph, Fault> {
        graph_walk(self, mem, addr)
    }
}
