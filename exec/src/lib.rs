//! Tiered execution engine: subroutine cache, tier controller and the
//! per-thread dispatch loop.
//!
//! Drives the lookup → translate → execute cycle: Tier0 units are built
//! synchronously from one basic block on first touch, hot units are
//! rebuilt from the whole subroutine graph (Tier1) on a background
//! queue, and callers of a freshly promoted subroutine are flagged so
//! they can be rebuilt with direct calls.
//!
//! All shared state lives in one [`ExecEnv`] per emulation session;
//! there are no process-wide registries.

pub mod cache;
pub mod config;
pub mod exec_loop;
pub mod queue;
pub mod symbols;
pub mod tier;
pub mod trace;
pub mod unit;

pub use cache::{InstallOutcome, SubroutineCache};
pub use config::{ConfigError, JitConfig, Tier1Fallback};
pub use exec_loop::{cpu_exec_loop, ExitReason};
pub use queue::{RecompileQueue, RecompileRequest};
pub use symbols::SymbolTable;
pub use tier::{TierController, TierStats};
pub use trace::{LogTracer, NoopTracer, TraceObserver};
pub use unit::CompiledUnit;

use std::sync::Arc;

use dbt_backend::CodeGenerator;
use dbt_core::{CpuState, Fault, GuestAddress, GuestMemory};
use dbt_frontend::Decoder;

/// State shared by every guest thread of a session.
pub struct SharedState<D, G> {
    controller: Arc<TierController<D, G>>,
}

impl<D, G> SharedState<D, G>
where
    D: Decoder,
    G: CodeGenerator,
{
    pub fn controller(&self) -> &TierController<D, G> {
        &self.controller
    }

    pub fn cache(&self) -> &Arc<SubroutineCache> {
        self.controller.cache()
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        self.controller.symbols()
    }

    pub fn memory(&self) -> &Arc<dyn GuestMemory> {
        self.controller.memory()
    }
}

/// Per-guest-thread execution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Dispatch loop iterations.
    pub dispatches: u64,
    /// Iterations whose unit was hot or flagged for rejit.
    pub rejit_requests: u64,
}

/// State owned by one guest thread's dispatch loop.
pub struct PerCpuState {
    pub stats: ExecStats,
    pub tracer: Arc<dyn TraceObserver>,
}

impl PerCpuState {
    pub fn new() -> Self {
        Self {
            stats: ExecStats::default(),
            tracer: Arc::new(NoopTracer),
        }
    }

    pub fn with_tracer(tracer: Arc<dyn TraceObserver>) -> Self {
        Self {
            stats: ExecStats::default(),
            tracer,
        }
    }
}

impl Default for PerCpuState {
    fn default() -> Self {
        Self::new()
    }
}

/// One emulation session.
///
/// Cloning the `shared` handle is how guest threads share the session;
/// dropping the last handle stops the background workers.
pub struct ExecEnv<D, G> {
    pub shared: Arc<SharedState<D, G>>,
}

impl<D, G> ExecEnv<D, G>
where
    D: Decoder + 'static,
    G: CodeGenerator + 'static,
{
    pub fn new(decoder: D, codegen: G, memory: Arc<dyn GuestMemory>, config: JitConfig) -> Self {
        Self::with_symbols(decoder, codegen, memory, config, SymbolTable::new())
    }

    /// Create a session whose symbol table starts out as `symbols`.
    pub fn with_symbols(
        decoder: D,
        codegen: G,
        memory: Arc<dyn GuestMemory>,
        config: JitConfig,
        symbols: SymbolTable,
    ) -> Self {
        let controller = TierController::new(
            decoder,
            codegen,
            memory,
            Arc::new(SubroutineCache::new()),
            Arc::new(symbols),
            config,
        );
        Self {
            shared: Arc::new(SharedState { controller }),
        }
    }

    /// Run a guest thread from `entry` on the calling thread.
    pub fn run(
        &self,
        per_cpu: &mut PerCpuState,
        cpu: &mut CpuState,
        entry: GuestAddress,
    ) -> Result<ExitReason, Fault> {
        cpu_exec_loop(&self.shared, per_cpu, cpu, entry)
    }
}
