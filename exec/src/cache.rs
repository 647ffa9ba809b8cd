use std::collections::HashMap;
use std::sync::Arc;

use dbt_backend::CallLinker;
use dbt_core::{EntryPoint, GuestAddress, Tier};
use parking_lot::RwLock;

use crate::unit::CompiledUnit;

/// Number of independently locked shards.
const CACHE_SHARDS: usize = 64;

type Shard = RwLock<HashMap<GuestAddress, Arc<CompiledUnit>>>;

/// Result of [`SubroutineCache::install`].
#[derive(Debug)]
pub enum InstallOutcome {
    /// No unit was cached for the address.
    Installed,
    /// The previous unit was superseded; it is handed back so callers can
    /// inspect its bookkeeping. In-flight invocations keep it alive.
    Replaced(Arc<CompiledUnit>),
    /// The new unit lost: a Tier1 unit is never replaced by a Tier0 one.
    Discarded,
}

impl InstallOutcome {
    pub fn is_discarded(&self) -> bool {
        matches!(self, InstallOutcome::Discarded)
    }

    /// Unit that was cached before the install, if it was replaced.
    pub fn previous(&self) -> Option<&Arc<CompiledUnit>> {
        match self {
            InstallOutcome::Replaced(old) => Some(old),
            _ => None,
        }
    }
}

/// Concurrent map from guest address to the newest compiled unit.
///
/// Each shard is guarded by its own `RwLock`: lookups take a shared
/// lock, installs publish a single `Arc` under the exclusive lock. A
/// reader therefore sees either the previous unit or the new one, never
/// a partial unit, and installs for one address are linearizable.
/// Installs to addresses in different shards proceed in parallel.
pub struct SubroutineCache {
    shards: Box<[Shard]>,
}

impl SubroutineCache {
    pub fn new() -> Self {
        let shards = (0..CACHE_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }

    fn shard(&self, addr: GuestAddress) -> &Shard {
        let h = addr.value().wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 58;
        &self.shards[h as usize & (CACHE_SHARDS - 1)]
    }

    pub fn lookup(&self, addr: GuestAddress) -> Option<Arc<CompiledUnit>> {
        self.shard(addr).read().get(&addr).cloned()
    }

    pub fn contains(&self, addr: GuestAddress) -> bool {
        self.shard(addr).read().contains_key(&addr)
    }

    /// Publish `unit` for its address, replacing whatever is cached.
    ///
    /// Refuses to downgrade: a Tier0 unit never replaces a Tier1 one.
    pub fn install(&self, unit: Arc<CompiledUnit>) -> InstallOutcome {
        let addr = unit.addr();
        let mut shard = self.shard(addr).write();
        match shard.get(&addr) {
            Some(cur) if cur.tier() > unit.tier() => InstallOutcome::Discarded,
            _ => match shard.insert(addr, unit) {
                Some(old) => InstallOutcome::Replaced(old),
                None => InstallOutcome::Installed,
            },
        }
    }

    /// Publish `unit` only if nothing is cached for its address.
    ///
    /// Returns the unit that ends up cached and whether it is `unit`.
    pub fn install_if_absent(&self, unit: Arc<CompiledUnit>) -> (Arc<CompiledUnit>, bool) {
        let addr = unit.addr();
        let mut shard = self.shard(addr).write();
        if let Some(cur) = shard.get(&addr) {
            return (cur.clone(), false);
        }
        shard.insert(addr, unit.clone());
        (unit, true)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Cached addresses in ascending order.
    pub fn addresses(&self) -> Vec<GuestAddress> {
        let mut out: Vec<GuestAddress> = self
            .shards
            .iter()
            .flat_map(|s| s.read().keys().copied().collect::<Vec<_>>())
            .collect();
        out.sort_unstable();
        out
    }

    /// Drop every cached unit.
    ///
    /// Units currently executing stay alive until their invocation ends.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }
}

impl Default for SubroutineCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Direct calls are linked only to Tier1 units; Tier0 callees are still
/// reached through the dispatch loop so they can be promoted.
///
/// A linked call holds its callee weakly, so a superseded callee is freed
/// once nothing is running it. Calling through a dead link exits to the
/// callee's address and lets the dispatch loop pick up the current unit.
impl CallLinker for SubroutineCache {
    fn resolve_call(&self, target: GuestAddress) -> Option<EntryPoint> {
        let unit = self.lookup(target).filter(|u| u.tier() == Tier::Tier1)?;
        let unit = Arc::downgrade(&unit);
        Some(EntryPoint::new(move |cpu, mem| match unit.upgrade() {
            Some(unit) => unit.invoke(cpu, mem),
            None => Ok(target),
        }))
    }
}
