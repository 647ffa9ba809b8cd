//! Tier selection, compilation and re-translation bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dbt_backend::{CodeGenerator, CodeSource, NoLink};
use dbt_core::{ControlFlowGraph, Fault, GuestAddress, GuestMemory, Tier};
use dbt_frontend::Decoder;
use tracing::debug;

use crate::cache::{InstallOutcome, SubroutineCache};
use crate::config::{JitConfig, Tier1Fallback};
use crate::queue::RecompileQueue;
use crate::symbols::SymbolTable;
use crate::unit::CompiledUnit;

/// Session-wide compilation counters.
#[derive(Debug, Default)]
struct TierCounters {
    tier0_compiles: AtomicU64,
    tier1_compiles: AtomicU64,
    race_discards: AtomicU64,
    rejit_marks: AtomicU64,
}

/// Point-in-time copy of the compilation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Tier0 units installed.
    pub tier0_compiles: u64,
    /// Tier1 units installed.
    pub tier1_compiles: u64,
    /// Compiled units dropped because another compile of the same
    /// address won.
    pub race_discards: u64,
    /// Callers flagged for re-translation after a callee reached Tier1.
    pub rejit_marks: u64,
    /// Background compiles that faulted or panicked.
    pub background_failures: u64,
}

/// Decides which tier to produce for an address and when.
///
/// Tier0 translates one basic block synchronously on first touch. Tier1
/// translates the whole subroutine graph once the Tier0 unit is hot (or
/// flagged), on the background queue and, depending on
/// [`Tier1Fallback`], also on the calling thread.
pub struct TierController<D, G> {
    decoder: D,
    codegen: G,
    memory: Arc<dyn GuestMemory>,
    cache: Arc<SubroutineCache>,
    symbols: Arc<SymbolTable>,
    config: JitConfig,
    counters: TierCounters,
    queue: RecompileQueue,
}

impl<D, G> TierController<D, G>
where
    D: Decoder + 'static,
    G: CodeGenerator + 'static,
{
    /// Create a controller and start its background workers.
    pub fn new(
        decoder: D,
        codegen: G,
        memory: Arc<dyn GuestMemory>,
        cache: Arc<SubroutineCache>,
        symbols: Arc<SymbolTable>,
        config: JitConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let queue = RecompileQueue::new(config.tier1_workers, move |addr| {
                match weak.upgrade() {
                    Some(tc) => tc.compile_tier1(addr).map(|_| ()),
                    // Session is shutting down.
                    None => Ok(()),
                }
            });
            Self {
                decoder,
                codegen,
                memory,
                cache,
                symbols,
                config,
                counters: TierCounters::default(),
                queue,
            }
        })
    }
}

impl<D, G> TierController<D, G>
where
    D: Decoder,
    G: CodeGenerator,
{
    /// Tuning this controller was built with.
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Cache the controller installs into.
    pub fn cache(&self) -> &Arc<SubroutineCache> {
        &self.cache
    }

    /// Symbol table used to name compiled units.
    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    /// Guest memory decoded from.
    pub fn memory(&self) -> &Arc<dyn GuestMemory> {
        &self.memory
    }

    /// Background Tier1 compile queue.
    pub fn queue(&self) -> &RecompileQueue {
        &self.queue
    }

    pub fn stats(&self) -> TierStats {
        let c = &self.counters;
        TierStats {
            tier0_compiles: c.tier0_compiles.load(Ordering::Relaxed),
            tier1_compiles: c.tier1_compiles.load(Ordering::Relaxed),
            race_discards: c.race_discards.load(Ordering::Relaxed),
            rejit_marks: c.rejit_marks.load(Ordering::Relaxed),
            background_failures: self.queue.failed_count() as u64,
        }
    }

    /// Return the cached unit for `addr`, translating one basic block
    /// synchronously if there is none.
    ///
    /// If another thread installs a unit for `addr` first, that unit is
    /// returned and the local translation is dropped.
    pub fn ensure_tier0(&self, addr: GuestAddress) -> Result<Arc<CompiledUnit>, Fault> {
        if let Some(unit) = self.cache.lookup(addr) {
            return Ok(unit);
        }

        let block = self.decoder.decode_block(&*self.memory, addr)?;
        let name = self.symbols.name_for(addr);
        let entry = self
            .codegen
            .generate(CodeSource::Block(&block), &name, &NoLink)?;

        if block.ends_in_call() {
            self.symbols.try_add(block.end(), name.clone());
        }
        if let Some(target) = block.call_target() {
            self.record_caller(addr, target);
        }

        let unit = Arc::new(CompiledUnit::new(
            addr,
            name,
            Tier::Tier0,
            entry,
            block.size(),
            1,
        ));
        let (unit, installed) = self.cache.install_if_absent(unit);
        if installed {
            self.counters.tier0_compiles.fetch_add(1, Ordering::Relaxed);
            debug!(%addr, name = unit.name(), insns = block.len(), "tier0 installed");
        } else {
            self.counters.race_discards.fetch_add(1, Ordering::Relaxed);
        }
        Ok(unit)
    }

    /// True when `unit` is a hot Tier0 unit or has been flagged for
    /// re-translation.
    pub fn should_rejit(&self, unit: &CompiledUnit) -> bool {
        (unit.tier() == Tier::Tier0 && unit.exec_count() > self.config.hotness_threshold)
            || unit.is_pending_rejit()
    }

    /// Queue a background Tier1 compile of `addr` unless one is already
    /// in flight. Never blocks.
    pub fn trigger_tier1(&self, addr: GuestAddress) -> bool {
        self.queue.enqueue(addr)
    }

    /// Trigger Tier1 for a hot address and apply the configured
    /// fallback.
    pub fn request_tier1(&self, addr: GuestAddress) -> Result<(), Fault> {
        let accepted = self.trigger_tier1(addr);
        match self.config.tier1_fallback {
            Tier1Fallback::Synchronous => {
                self.compile_tier1(addr)?;
            }
            Tier1Fallback::AwaitBackground => {
                if accepted || self.queue.in_flight(addr) {
                    self.queue.wait_for(addr);
                } else if !self.queue.has_failed(addr) {
                    self.compile_tier1(addr)?;
                }
            }
            Tier1Fallback::BackgroundOnly => {}
        }
        Ok(())
    }

    /// Translate the whole subroutine graph at `addr` and install it,
    /// superseding whatever unit is cached for `addr`.
    ///
    /// Afterwards every caller recorded on the superseded unit has its
    /// own cached unit flagged for re-translation, so it can be rebuilt
    /// with a direct call. Only direct callers are flagged.
    pub fn compile_tier1(&self, addr: GuestAddress) -> Result<Arc<CompiledUnit>, Fault> {
        let cfg = self.decoder.decode_graph(&*self.memory, addr)?;
        let name = self.symbols.name_for(addr);
        self.propagate_name(&cfg, &name);

        for target in cfg.call_sites().filter_map(|(_, target)| target) {
            self.record_caller(addr, target);
        }

        let entry = self
            .codegen
            .generate(CodeSource::Graph(&cfg), &name, &*self.cache)?;
        let unit = Arc::new(CompiledUnit::new(
            addr,
            name,
            Tier::Tier1,
            entry,
            cfg.size(),
            cfg.len(),
        ));

        match self.cache.install(unit.clone()) {
            InstallOutcome::Installed => {}
            InstallOutcome::Replaced(old) => self.mark_callers(addr, &old),
            InstallOutcome::Discarded => {
                self.counters.race_discards.fetch_add(1, Ordering::Relaxed);
                return Ok(unit);
            }
        }
        self.counters.tier1_compiles.fetch_add(1, Ordering::Relaxed);
        debug!(%addr, name = unit.name(), blocks = cfg.len(), "tier1 installed");
        Ok(unit)
    }

    /// Name the return address of every call in `cfg` after the calling
    /// subroutine, unless it already has a name.
    fn propagate_name(&self, cfg: &ControlFlowGraph, name: &Arc<str>) {
        for (ret, _) in cfg.call_sites() {
            self.symbols.try_add(ret, name.clone());
        }
    }

    /// Remember `caller` on the unit currently cached for `target`.
    fn record_caller(&self, caller: GuestAddress, target: GuestAddress) {
        if let Some(callee) = self.cache.lookup(target) {
            callee.add_caller(caller);
        }
    }

    fn mark_callers(&self, addr: GuestAddress, old: &CompiledUnit) {
        for caller in old.callers() {
            // A recursive subroutine must not flag the unit just installed.
            if caller == addr {
                continue;
            }
            if let Some(unit) = self.cache.lookup(caller) {
                unit.mark_for_rejit();
                self.counters.rejit_marks.fetch_add(1, Ordering::Relaxed);
                debug!(%caller, callee = %addr, "caller flagged for rejit");
            }
        }
    }
}
