use thiserror::Error;

use crate::types::GuestAddress;

/// Faults raised while decoding, compiling or executing guest code.
///
/// None of these are retried by the engine: the same address with the
/// same inputs would fail the same way. They propagate out of the
/// dispatch loop to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// Malformed or unrecognized guest instruction.
    #[error("undefined instruction {word:#010x} at {addr}")]
    Decode { addr: GuestAddress, word: u32 },

    /// The code generator rejected a well-decoded block or graph.
    #[error("code generation failed for {addr}: {reason}")]
    Compilation { addr: GuestAddress, reason: String },

    /// Guest memory access outside of mapped storage.
    #[error("guest memory fault at {addr:#x} ({size} bytes)")]
    Memory { addr: u64, size: usize },
}

impl Fault {
    /// Guest address the fault refers to.
    pub fn addr(&self) -> GuestAddress {
        match self {
            Fault::Decode { addr, .. } | Fault::Compilation { addr, .. } => *addr,
            Fault::Memory { addr, .. } => GuestAddress(*addr),
        }
    }

    pub fn compilation(addr: GuestAddress, reason: impl Into<String>) -> Self {
        Fault::Compilation {
            addr,
            reason: reason.into(),
        }
    }
}
