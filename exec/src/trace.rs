use dbt_core::GuestAddress;
use tracing::trace;

/// Observer invoked once per dispatch iteration, before translation and
/// execution of the current address.
///
/// Purely informational. `name` is the address's symbol if one exists,
/// or the empty string; observing never creates a name.
pub trait TraceObserver: Send + Sync {
    /// When false, the dispatch loop skips the name lookup and the call.
    fn enabled(&self) -> bool {
        true
    }

    fn on_dispatch(&self, addr: GuestAddress, name: &str);
}

/// Default observer; disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl TraceObserver for NoopTracer {
    fn enabled(&self) -> bool {
        false
    }

    fn on_dispatch(&self, _addr: GuestAddress, _name: &str) {}
}

/// Forwards every dispatch to `tracing` at trace level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl TraceObserver for LogTracer {
    fn on_dispatch(&self, addr: GuestAddress, name: &str) {
        trace!(target: "dbt::cpu_trace", %addr, name, "dispatch");
    }
}
