//! Guest CPU state for user-mode emulation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::GuestAddress;

/// Number of general-purpose registers (x0-x31).
pub const NUM_GPRS: usize = 32;

/// Shared flag behind a guest thread's `{Running, Stopped}` state.
///
/// Starts out running. Once cleared it is never set again by the
/// engine; clearing is the only cancellation primitive.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Request the owning thread to stop at its next dispatch boundary.
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Architectural state of one guest thread.
#[derive(Debug, Clone)]
pub struct CpuState {
    /// General-purpose registers x0-x31.
    /// x0 reads as zero; writes to it are dropped by [`CpuState::set_gpr`].
    gpr: [u64; NUM_GPRS],
    /// Address the thread will resume at.
    pub pc: GuestAddress,
    run: StopHandle,
}

impl CpuState {
    pub fn new() -> Self {
        Self {
            gpr: [0u64; NUM_GPRS],
            pc: GuestAddress::NULL,
            run: StopHandle::new(),
        }
    }

    #[inline]
    pub fn gpr(&self, reg: u8) -> u64 {
        self.gpr[reg as usize & (NUM_GPRS - 1)]
    }

    #[inline]
    pub fn set_gpr(&mut self, reg: u8, val: u64) {
        if reg != 0 {
            self.gpr[reg as usize & (NUM_GPRS - 1)] = val;
        }
    }

    pub fn gprs(&self) -> &[u64; NUM_GPRS] {
        &self.gpr
    }

    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }

    /// Handle other threads can use to stop this one.
    pub fn stop_handle(&self) -> StopHandle {
        self.run.clone()
    }
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}
