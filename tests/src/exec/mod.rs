//! Tiered execution engine tests.

mod threads;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dbt_backend::{CallLinker, CodeGenerator, CodeSource, ThreadedCodeGen};
use dbt_core::{EntryPoint, Fault, FlatMemory};
use dbt_exec::{ExecEnv, JitConfig, SymbolTable};
use dbt_frontend::riscv::RiscvDecoder;
use parking_lot::{Condvar, Mutex};

/// Blocks callers until opened.
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
            waiting: AtomicUsize::new(0),
        })
    }

    pub fn wait(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.cv.wait(&mut open);
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }

    /// Callers that reached the gate so far.
    pub fn arrivals(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Threaded code generator that counts graph (Tier1) generations and
/// can hold them at a gate or reject them.
pub struct TestCodeGen {
    inner: ThreadedCodeGen,
    pub graphs: Arc<AtomicUsize>,
    gate: Option<Arc<Gate>>,
    fail_graphs: bool,
}

impl TestCodeGen {
    pub fn new() -> Self {
        Self {
            inner: ThreadedCodeGen::new(),
            graphs: Arc::new(AtomicUsize::new(0)),
            gate: None,
            fail_graphs: false,
        }
    }

    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn failing_graphs() -> Self {
        Self {
            fail_graphs: true,
            ..Self::new()
        }
    }
}

impl CodeGenerator for TestCodeGen {
    fn generate(
        &self,
        source: CodeSource<'_>,
        name: &str,
        linker: &dyn CallLinker,
    ) -> Result<EntryPoint, Fault> {
        if let CodeSource::Graph(_) = source {
            self.graphs.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.wait();
            }
            if self.fail_graphs {
                return Err(Fault::compilation(source.entry(), "graphs rejected"));
            }
        }
        self.inner.generate(source, name, linker)
    }
}

pub type InstrumentedEnv = ExecEnv<RiscvDecoder, TestCodeGen>;

pub fn instrumented(mem: Arc<FlatMemory>, codegen: TestCodeGen, config: JitConfig) -> InstrumentedEnv {
    ExecEnv::new(RiscvDecoder::new(), codegen, mem, config)
}

pub fn instrumented_with_symbols(
    mem: Arc<FlatMemory>,
    codegen: TestCodeGen,
    config: JitConfig,
    symbols: SymbolTable,
) -> InstrumentedEnv {
    ExecEnv::with_symbols(RiscvDecoder::new(), codegen, mem, config, symbols)
}
