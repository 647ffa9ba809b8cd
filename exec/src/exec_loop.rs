use dbt_backend::CodeGenerator;
use dbt_core::{CpuState, Fault, GuestAddress};
use dbt_frontend::Decoder;
use tracing::trace;

use crate::{PerCpuState, SharedState};

/// Reason the execution loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A unit returned address 0: no further guest code on this path.
    Returned,
    /// The thread's run flag was cleared; `next` is where it would have
    /// resumed.
    Stopped { next: GuestAddress },
}

/// Per-guest-thread dispatch loop.
///
/// Repeatedly looks up (or translates) the unit for the current
/// address, requests Tier1 when the unit is hot or flagged, and invokes
/// it; the returned address becomes the next position. Runs until a
/// unit returns 0 or the thread's run flag is cleared. A stop request
/// never interrupts a unit mid-invocation.
///
/// Decode, compilation and memory faults end the loop and are returned
/// unchanged; `cpu.pc` then holds the address being dispatched.
pub fn cpu_exec_loop<D, G>(
    shared: &SharedState<D, G>,
    per_cpu: &mut PerCpuState,
    cpu: &mut CpuState,
    entry: GuestAddress,
) -> Result<ExitReason, Fault>
where
    D: Decoder,
    G: CodeGenerator,
{
    let tier = shared.controller();
    let mem = &**shared.memory();
    let mut position = entry;

    loop {
        if position.is_null() {
            return Ok(ExitReason::Returned);
        }
        if !cpu.is_running() {
            trace!(next = %position, "guest thread stopped");
            return Ok(ExitReason::Stopped { next: position });
        }

        per_cpu.stats.dispatches += 1;
        cpu.pc = position;

        if per_cpu.tracer.enabled() {
            let name = shared.symbols().get(position);
            per_cpu
                .tracer
                .on_dispatch(position, name.as_deref().unwrap_or(""));
        }

        let unit = tier.ensure_tier0(position)?;

        if tier.should_rejit(&unit) {
            per_cpu.stats.rejit_requests += 1;
            tier.request_tier1(position)?;
        }

        position = unit.invoke(cpu, mem)?;
    }
}
