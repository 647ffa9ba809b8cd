use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dbt_core::{CpuState, EntryPoint, Fault, GuestAddress, GuestMemory, Tier};
use parking_lot::Mutex;

/// Compiled translation of the guest code at one address.
///
/// The routine itself is immutable; a recompile produces a new unit that
/// replaces this one in the cache. Only the bookkeeping below changes
/// after installation: the execution counter, the re-translation flag
/// and the set of known callers.
pub struct CompiledUnit {
    addr: GuestAddress,
    name: Arc<str>,
    tier: Tier,
    entry: EntryPoint,
    /// Guest bytes covered.
    guest_size: u64,
    /// Basic blocks covered (1 for Tier0).
    block_count: usize,
    exec_count: AtomicU64,
    pending_rejit: AtomicBool,
    callers: Mutex<BTreeSet<GuestAddress>>,
}

impl CompiledUnit {
    pub fn new(
        addr: GuestAddress,
        name: Arc<str>,
        tier: Tier,
        entry: EntryPoint,
        guest_size: u64,
        block_count: usize,
    ) -> Self {
        Self {
            addr,
            name,
            tier,
            entry,
            guest_size,
            block_count,
            exec_count: AtomicU64::new(0),
            pending_rejit: AtomicBool::new(false),
            callers: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn addr(&self) -> GuestAddress {
        self.addr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    pub fn guest_size(&self) -> u64 {
        self.guest_size
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Run the unit once and return the next guest address.
    ///
    /// The execution counter is bumped before the routine runs, so a
    /// faulting invocation still counts.
    pub fn invoke(&self, cpu: &mut CpuState, mem: &dyn GuestMemory) -> Result<GuestAddress, Fault> {
        self.exec_count.fetch_add(1, Ordering::Relaxed);
        let next = self.entry.call(cpu, mem)?;
        cpu.pc = next;
        Ok(next)
    }

    pub fn exec_count(&self) -> u64 {
        self.exec_count.load(Ordering::Relaxed)
    }

    pub fn mark_for_rejit(&self) {
        self.pending_rejit.store(true, Ordering::Release);
    }

    pub fn is_pending_rejit(&self) -> bool {
        self.pending_rejit.load(Ordering::Acquire)
    }

    /// Record `caller` as a call site known to target this unit.
    pub fn add_caller(&self, caller: GuestAddress) -> bool {
        self.callers.lock().insert(caller)
    }

    /// Snapshot of the known callers.
    pub fn callers(&self) -> Vec<GuestAddress> {
        self.callers.lock().iter().copied().collect()
    }
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("addr", &self.addr)
            .field("name", &self.name)
            .field("tier", &self.tier)
            .field("exec_count", &self.exec_count())
            .field("pending_rejit", &self.is_pending_rejit())
            .finish()
    }
}
