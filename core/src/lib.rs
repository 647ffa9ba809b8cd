//! Core data model for the tiered binary translator.
//!
//! Guest addresses and tiers, decoded instructions, basic blocks and
//! subroutine graphs, guest CPU state, the guest memory contract, the
//! invocable entry point produced by code generation, and the fault
//! taxonomy shared by every other crate.

pub mod block;
pub mod code;
pub mod cpu;
pub mod error;
pub mod insn;
pub mod memory;
pub mod types;

pub use block::{BasicBlock, ControlFlowGraph};
pub use code::EntryPoint;
pub use cpu::{CpuState, StopHandle, NUM_GPRS};
pub use error::Fault;
pub use insn::{AluOp, BranchCond, Flow, Insn, MemWidth, Op, INSN_SIZE, LINK_REG};
pub use memory::{FlatMemory, GuestMemory};
pub use types::{GuestAddress, Tier};
