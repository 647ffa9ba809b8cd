use std::fmt;
use std::sync::Arc;

use crate::cpu::CpuState;
use crate::error::Fault;
use crate::memory::GuestMemory;
use crate::types::GuestAddress;

type EntryFn = dyn Fn(&mut CpuState, &dyn GuestMemory) -> Result<GuestAddress, Fault> + Send + Sync;

/// Invocable translation of guest code.
///
/// Runs the translated guest semantics against `cpu` and `mem` until a
/// block or subroutine boundary, then returns the next guest address to
/// dispatch ([`GuestAddress::NULL`] when there is none). Cloning is
/// cheap; clones share the same routine.
#[derive(Clone)]
pub struct EntryPoint(Arc<EntryFn>);

impl EntryPoint {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut CpuState, &dyn GuestMemory) -> Result<GuestAddress, Fault> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    #[inline]
    pub fn call(&self, cpu: &mut CpuState, mem: &dyn GuestMemory) -> Result<GuestAddress, Fault> {
        (self.0)(cpu, mem)
    }

    /// True if both handles refer to the same routine.
    pub fn ptr_eq(&self, other: &EntryPoint) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntryPoint")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}
