//! Multi-threaded execution: guest threads sharing one session.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;

use dbt_core::{CpuState, Tier};
use dbt_exec::{ExitReason, JitConfig, PerCpuState, Tier1Fallback};

use super::{instrumented, Gate, TestCodeGen};
use crate::asm::*;

const THREADS: usize = 8;

#[test]
fn single_background_request_per_address() {
    let gate = Gate::new();
    let cg = TestCodeGen::gated(gate.clone());
    let graphs = cg.graphs.clone();
    let env = instrumented(memory_with(&sum_loop()), cg, JitConfig::default().with_tier1_workers(4));
    let tc = env.shared.controller();
    tc.ensure_tier0(addr(BASE)).unwrap();

    let barrier = Barrier::new(THREADS);
    let accepted: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    tc.trigger_tier1(addr(BASE))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum()
    });
    assert_eq!(accepted, 1);

    gate.open();
    tc.queue().wait_idle();
    assert_eq!(graphs.load(Ordering::SeqCst), 1);
    assert_eq!(gate.arrivals(), 1);
    assert_eq!(env.shared.cache().lookup(addr(BASE)).unwrap().tier(), Tier::Tier1);
}

#[test]
fn concurrent_first_touch_installs_one_unit() {
    let env = instrumented(memory_with(&sum_loop()), TestCodeGen::new(), JitConfig::default());
    let tc = env.shared.controller();
    let barrier = Barrier::new(THREADS);

    let units: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    tc.ensure_tier0(addr(BASE)).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for u in &units[1..] {
        assert!(Arc::ptr_eq(u, &units[0]));
    }
    let stats = tc.stats();
    assert_eq!(stats.tier0_compiles, 1);
    assert!(stats.race_discards < THREADS as u64);
}

#[test]
fn readers_never_see_a_downgrade() {
    let env = instrumented(memory_with(&sum_loop()), TestCodeGen::new(), JitConfig::default());
    let tc = env.shared.controller();
    tc.ensure_tier0(addr(BASE)).unwrap();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut seen_tier1 = false;
                for _ in 0..2_000 {
                    let unit = env.shared.cache().lookup(addr(BASE)).expect("never evicted");
                    if unit.tier() == Tier::Tier1 {
                        seen_tier1 = true;
                    } else {
                        assert!(!seen_tier1, "tier1 replaced by tier0");
                    }
                }
            });
        }
        s.spawn(|| {
            for _ in 0..50 {
                tc.compile_tier1(addr(BASE)).unwrap();
                // A cached unit always wins over a fresh Tier0 translation.
                tc.ensure_tier0(addr(BASE)).unwrap();
            }
        });
    });

    assert_eq!(env.shared.cache().lookup(addr(BASE)).unwrap().tier(), Tier::Tier1);
}

fn run_sum_threads(config: JitConfig) {
    let env = session(memory_with(&sum_loop()), config);

    let results: Vec<(u64, u64)> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS as u64)
            .map(|i| {
                let env = &env;
                s.spawn(move || {
                    let n = 200 + 37 * i;
                    let mut cpu = CpuState::new();
                    cpu.set_gpr(6, n);
                    let mut per_cpu = PerCpuState::new();
                    let exit = env.run(&mut per_cpu, &mut cpu, addr(BASE)).unwrap();
                    assert_eq!(exit, ExitReason::Returned);
                    (n, cpu.gpr(10))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (n, sum) in results {
        assert_eq!(sum, n * (n + 1) / 2, "thread summing to {n}");
    }
    env.shared.controller().queue().wait_idle();
    assert_eq!(env.shared.cache().lookup(addr(BASE)).unwrap().tier(), Tier::Tier1);
}

#[test]
fn threads_share_translations_synchronous() {
    run_sum_threads(JitConfig::default().with_hotness_threshold(20));
}

#[test]
fn threads_share_translations_await() {
    run_sum_threads(
        JitConfig::default()
            .with_hotness_threshold(20)
            .with_tier1_workers(2)
            .with_tier1_fallback(Tier1Fallback::AwaitBackground),
    );
}

#[test]
fn threads_share_translations_background_only() {
    run_sum_threads(
        JitConfig::default()
            .with_hotness_threshold(20)
            .with_tier1_fallback(Tier1Fallback::BackgroundOnly),
    );
}

#[test]
fn threads_calling_shared_subroutine() {
    let env = session(call_loop_memory(), JitConfig::default().with_hotness_threshold(8));

    thread::scope(|s| {
        for i in 0..4u64 {
            let env = &env;
            s.spawn(move || {
                let n = 100 + i;
                let mut cpu = CpuState::new();
                cpu.set_gpr(6, n);
                env.run(&mut PerCpuState::new(), &mut cpu, addr(BASE)).unwrap();
                assert_eq!(cpu.gpr(10), n * (n + 1) / 2);
            });
        }
    });

    env.shared.controller().queue().wait_idle();
    assert_eq!(env.shared.cache().lookup(addr(0x2000)).unwrap().tier(), Tier::Tier1);
}

#[test]
fn session_outlives_spawning_thread() {
    let env = session(memory_with(&sum_loop()), JitConfig::default().with_hotness_threshold(4));
    let shared = env.shared.clone();
    drop(env);

    let handle = thread::spawn(move || {
        let mut cpu = CpuState::new();
        cpu.set_gpr(6, 50);
        dbt_exec::cpu_exec_loop(&shared, &mut PerCpuState::new(), &mut cpu, addr(BASE)).unwrap();
        cpu.gpr(10)
    });
    assert_eq!(handle.join().unwrap(), 1275);
}
