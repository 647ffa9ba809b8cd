//! Closure-threaded code generator.
//!
//! Each guest instruction is lowered into a boxed closure and each block
//! terminator into an [`Exit`]. A block routine runs its closures and
//! returns the exit address. A graph routine keeps running blocks while
//! the exit address stays inside the graph, and checks the thread's run
//! flag on every backward edge so a hot loop cannot outlive a stop
//! request.

mod ops;

use std::cell::Cell;
use std::collections::HashMap;

use dbt_core::{
    BasicBlock, BranchCond, CpuState, EntryPoint, Fault, Flow, GuestAddress, GuestMemory, Op,
};
use tracing::trace;

use crate::{CallLinker, CodeGenerator, CodeSource};
use ops::{jalr_target, lower, OpFn};

/// Default bound on nested direct calls between linked routines.
pub const DEFAULT_MAX_LINK_DEPTH: usize = 64;

thread_local! {
    static LINK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Decrements the linked-call depth when the callee returns or faults.
struct DepthGuard;

impl DepthGuard {
    fn enter(max: usize) -> Option<Self> {
        LINK_DEPTH.with(|d| {
            let cur = d.get();
            if cur >= max {
                None
            } else {
                d.set(cur + 1);
                Some(DepthGuard)
            }
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        LINK_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// How control leaves a lowered block.
enum Exit {
    /// Block ended at the instruction cap.
    Fallthrough(GuestAddress),
    /// `jal` that is not a call; `rd` receives the return address.
    Jump { rd: u8, target: GuestAddress, ret: GuestAddress },
    Branch {
        cond: BranchCond,
        rs1: u8,
        rs2: u8,
        taken: GuestAddress,
        not_taken: GuestAddress,
    },
    /// Direct call, optionally linked to the callee's routine.
    Call {
        rd: u8,
        target: GuestAddress,
        ret: GuestAddress,
        link: Option<EntryPoint>,
    },
    /// `jalr` of any kind (indirect call, return, indirect jump).
    Indirect { rd: u8, rs1: u8, offset: i64, ret: GuestAddress },
}

struct LoweredBlock {
    body: Vec<OpFn>,
    exit: Exit,
}

impl LoweredBlock {
    fn run(
        &self,
        cpu: &mut CpuState,
        mem: &dyn GuestMemory,
        max_link_depth: usize,
    ) -> Result<GuestAddress, Fault> {
        for op in &self.body {
            op(cpu, mem)?;
        }
        Ok(match &self.exit {
            Exit::Fallthrough(next) => *next,
            Exit::Jump { rd, target, ret } => {
                cpu.set_gpr(*rd, ret.value());
                *target
            }
            Exit::Branch {
                cond,
                rs1,
                rs2,
                taken,
                not_taken,
            } => {
                if cond.eval(cpu.gpr(*rs1), cpu.gpr(*rs2)) {
                    *taken
                } else {
                    *not_taken
                }
            }
            Exit::Call {
                rd,
                target,
                ret,
                link,
            } => {
                cpu.set_gpr(*rd, ret.value());
                match (link, DepthGuard::enter(max_link_depth)) {
                    (Some(callee), Some(_guard)) => callee.call(cpu, mem)?,
                    _ => *target,
                }
            }
            Exit::Indirect {
                rd,
                rs1,
                offset,
                ret,
            } => {
                // Read the target before writing rd; they may alias.
                let target = jalr_target(cpu, *rs1, *offset);
                cpu.set_gpr(*rd, ret.value());
                target
            }
        })
    }
}

/// Reference code generator producing closure-threaded routines.
#[derive(Debug, Clone)]
pub struct ThreadedCodeGen {
    max_link_depth: usize,
}

impl ThreadedCodeGen {
    pub fn new() -> Self {
        Self {
            max_link_depth: DEFAULT_MAX_LINK_DEPTH,
        }
    }

    /// Bound nested direct calls; 0 disables direct call linking.
    pub fn with_max_link_depth(mut self, depth: usize) -> Self {
        self.max_link_depth = depth;
        self
    }

    fn lower_block(&self, block: &BasicBlock, linker: &dyn CallLinker) -> Result<LoweredBlock, Fault> {
        if block.is_empty() {
            return Err(Fault::compilation(block.start(), "empty basic block"));
        }

        let insns = block.insns();
        let last = block.last();
        let flow = block.terminator();
        let straight = if flow.ends_block() {
            &insns[..insns.len() - 1]
        } else {
            insns
        };

        let mut body = Vec::with_capacity(straight.len());
        for insn in straight {
            let op = lower(insn).ok_or_else(|| {
                Fault::compilation(insn.addr, "control flow in the middle of a block")
            })?;
            body.push(op);
        }

        let ret = last.next_addr();
        let exit = match (flow, last.op) {
            (Flow::Next, _) => {
                if let Some(op) = lower(last) {
                    body.push(op);
                }
                Exit::Fallthrough(block.end())
            }
            (Flow::Branch { target }, Op::Branch { cond, rs1, rs2, .. }) => Exit::Branch {
                cond,
                rs1,
                rs2,
                taken: target,
                not_taken: ret,
            },
            (Flow::Jump { target }, Op::Jal { rd, .. }) => Exit::Jump { rd, target, ret },
            (Flow::Call { target }, Op::Jal { rd, .. }) => {
                let link = if self.max_link_depth > 0 {
                    linker.resolve_call(target)
                } else {
                    None
                };
                if link.is_some() {
                    trace!(caller = %block.start(), callee = %target, "linked direct call");
                }
                Exit::Call {
                    rd,
                    target,
                    ret,
                    link,
                }
            }
            (
                Flow::IndirectCall | Flow::Return | Flow::IndirectJump,
                Op::Jalr { rd, rs1, offset },
            ) => Exit::Indirect {
                rd,
                rs1,
                offset,
                ret,
            },
            _ => {
                return Err(Fault::compilation(
                    last.addr,
                    "terminator does not match its instruction",
                ))
            }
        };

        Ok(LoweredBlock { body, exit })
    }
}

impl Default for ThreadedCodeGen {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator for ThreadedCodeGen {
    fn generate(
        &self,
        source: CodeSource<'_>,
        name: &str,
        linker: &dyn CallLinker,
    ) -> Result<EntryPoint, Fault> {
        let max_link_depth = self.max_link_depth;
        match source {
            CodeSource::Block(block) => {
                trace!(%name, addr = %block.start(), insns = block.len(), "lowering block");
                let lowered = self.lower_block(block, linker)?;
                Ok(EntryPoint::new(move |cpu, mem| {
                    lowered.run(cpu, mem, max_link_depth)
                }))
            }
            CodeSource::Graph(cfg) => {
                trace!(%name, root = %cfg.root(), blocks = cfg.len(), "lowering graph");
                let mut blocks = HashMap::with_capacity(cfg.len());
                for block in cfg.blocks() {
                    blocks.insert(block.start(), self.lower_block(block, linker)?);
                }
                let root = cfg.root();
                Ok(EntryPoint::new(move |cpu, mem| {
                    let mut cur = root;
                    while let Some(block) = blocks.get(&cur) {
                        let next = block.run(cpu, mem, max_link_depth)?;
                        if !blocks.contains_key(&next) {
                            return Ok(next);
                        }
                        if next <= cur && !cpu.is_running() {
                            return Ok(next);
                        }
                        cur = next;
                    }
                    Ok(cur)
                }))
            }
        }
    }
}
