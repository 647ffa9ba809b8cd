//! Background Tier1 recompilation queue.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use dbt_core::{Fault, GuestAddress, Tier};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

/// Work item: recompile `addr` at `tier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecompileRequest {
    pub addr: GuestAddress,
    pub tier: Tier,
}

type CompileFn = dyn Fn(GuestAddress) -> Result<(), Fault> + Send + Sync;

#[derive(Default)]
struct QueueState {
    /// Queued or executing requests.
    in_flight: HashSet<GuestAddress>,
    /// Addresses whose background compile failed; never retried.
    failed: HashSet<GuestAddress>,
}

struct Inner {
    state: Mutex<QueueState>,
    done: Condvar,
}

/// Work queue feeding a pool of background compiler threads.
///
/// At most one request per address is queued or executing at any time;
/// a second request for the same address is dropped. Enqueueing never
/// blocks. Worker failures are logged and leave the address at its
/// previous tier.
pub struct RecompileQueue {
    inner: Arc<Inner>,
    tx: Option<Sender<RecompileRequest>>,
    workers: Vec<JoinHandle<()>>,
}

impl RecompileQueue {
    /// Start `workers` threads running `compile` for each request.
    pub fn new<F>(workers: usize, compile: F) -> Self
    where
        F: Fn(GuestAddress) -> Result<(), Fault> + Send + Sync + 'static,
    {
        let inner = Arc::new(Inner {
            state: Mutex::new(QueueState::default()),
            done: Condvar::new(),
        });
        let (tx, rx) = unbounded::<RecompileRequest>();
        let compile: Arc<CompileFn> = Arc::new(compile);

        let workers = (0..workers.max(1))
            .filter_map(|i| {
                let rx = rx.clone();
                let inner = inner.clone();
                let compile = compile.clone();
                thread::Builder::new()
                    .name(format!("dbt-tier1-{i}"))
                    .spawn(move || worker_loop(rx, inner, compile))
                    .map_err(|e| warn!(error = %e, "failed to spawn tier1 worker"))
                    .ok()
            })
            .collect();

        Self {
            inner,
            tx: Some(tx),
            workers,
        }
    }

    /// Queue a Tier1 compile of `addr`.
    ///
    /// Returns false if a request for `addr` is already in flight, if a
    /// previous background compile of `addr` failed, or if the queue
    /// has shut down.
    pub fn enqueue(&self, addr: GuestAddress) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        {
            let mut st = self.inner.state.lock();
            if st.failed.contains(&addr) || !st.in_flight.insert(addr) {
                return false;
            }
        }
        let req = RecompileRequest {
            addr,
            tier: Tier::Tier1,
        };
        if tx.send(req).is_err() {
            self.inner.state.lock().in_flight.remove(&addr);
            self.inner.done.notify_all();
            return false;
        }
        debug!(%addr, "tier1 request queued");
        true
    }

    pub fn in_flight(&self, addr: GuestAddress) -> bool {
        self.inner.state.lock().in_flight.contains(&addr)
    }

    pub fn has_failed(&self, addr: GuestAddress) -> bool {
        self.inner.state.lock().failed.contains(&addr)
    }

    /// Addresses whose background compile failed.
    pub fn failed_count(&self) -> usize {
        self.inner.state.lock().failed.len()
    }

    /// Requests queued or executing.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Block until no request for `addr` is in flight.
    pub fn wait_for(&self, addr: GuestAddress) {
        let mut st = self.inner.state.lock();
        while st.in_flight.contains(&addr) {
            self.inner.done.wait(&mut st);
        }
    }

    /// Block until every queued request has completed.
    pub fn wait_idle(&self) {
        let mut st = self.inner.state.lock();
        while !st.in_flight.is_empty() {
            self.inner.done.wait(&mut st);
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for RecompileQueue {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop once drained.
        self.tx.take();
        let me = thread::current().id();
        for handle in self.workers.drain(..) {
            // The last session handle may be released by a worker itself.
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(rx: Receiver<RecompileRequest>, inner: Arc<Inner>, compile: Arc<CompileFn>) {
    for req in rx.iter() {
        let result = catch_unwind(AssertUnwindSafe(|| compile(req.addr)));
        let mut st = inner.state.lock();
        st.in_flight.remove(&req.addr);
        match result {
            Ok(Ok(())) => debug!(addr = %req.addr, tier = %req.tier, "background compile done"),
            Ok(Err(fault)) => {
                warn!(addr = %req.addr, %fault, "background compile failed");
                st.failed.insert(req.addr);
            }
            Err(_) => {
                warn!(addr = %req.addr, "background compile panicked");
                st.failed.insert(req.addr);
            }
        }
        drop(st);
        inner.done.notify_all();
    }
}
