//! Code generation from decoded guest code to invocable routines.
//!
//! The tier controller treats code generation as a black box: given a
//! basic block or a subroutine graph plus a symbolic name, a
//! [`CodeGenerator`] returns an [`EntryPoint`]. [`ThreadedCodeGen`] is
//! the reference generator shipped with the engine.

pub mod threaded;

pub use threaded::ThreadedCodeGen;

use dbt_core::{BasicBlock, ControlFlowGraph, EntryPoint, Fault, GuestAddress};

/// Decoded code handed to a generator.
#[derive(Debug, Clone, Copy)]
pub enum CodeSource<'a> {
    /// Single basic block (Tier0).
    Block(&'a BasicBlock),
    /// Whole subroutine graph (Tier1).
    Graph(&'a ControlFlowGraph),
}

impl CodeSource<'_> {
    /// Guest address the generated routine is entered at.
    pub fn entry(&self) -> GuestAddress {
        match self {
            CodeSource::Block(b) => b.start(),
            CodeSource::Graph(g) => g.root(),
        }
    }
}

/// Resolves direct call targets to already compiled routines.
///
/// Generators consult this while lowering a call whose target is known
/// statically; a resolved call invokes the callee directly instead of
/// returning to the dispatch loop.
pub trait CallLinker {
    fn resolve_call(&self, target: GuestAddress) -> Option<EntryPoint>;
}

/// Linker that never resolves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLink;

impl CallLinker for NoLink {
    fn resolve_call(&self, _target: GuestAddress) -> Option<EntryPoint> {
        None
    }
}

/// Trait for code generators.
///
/// Implementations must be pure from the engine's point of view: the
/// same input yields a semantically equivalent routine, and no state is
/// shared with the engine beyond what the generator manages privately.
pub trait CodeGenerator: Send + Sync {
    /// Lower `source` into an invocable routine named `name`.
    ///
    /// Fails with [`Fault::Compilation`] when the generator
    /// cannot handle the input.
    fn generate(
        &self,
        source: CodeSource<'_>,
        name: &str,
        linker: &dyn CallLinker,
    ) -> Result<EntryPoint, Fault>;
}
