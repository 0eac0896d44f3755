//! Shared helpers for the integration tests.

use csopesy::{Config, SchedPolicy, Scheduler};

/// A small deterministic config: 256 B of memory in four 64 B frames, batch
/// generation effectively disabled.
pub fn test_config(num_cpu: u32, scheduler: SchedPolicy, quantum_cycles: u32) -> Config {
    Config {
        num_cpu,
        scheduler,
        quantum_cycles,
        batch_process_freq: 100_000,
        min_ins: 1,
        max_ins: 50,
        delay_per_exec: 0,
        max_overall_mem: 256,
        mem_per_frame: 64,
        min_mem_per_proc: 64,
        max_mem_per_proc: 256,
    }
}

/// Build a scheduler whose backing store lives in a fresh temp directory.
/// Background loops are not started; tests drive ticks synchronously.
pub fn scheduler(config: Config) -> (Scheduler, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let sched = Scheduler::with_store_path(config, dir.path().join("swap.bin")).unwrap();
    (sched, dir)
}

/// Check the unique-binding invariant: a process is Running iff exactly one
/// core holds it, and Ready processes are never bound.
#[allow(dead_code)]
pub fn assert_unique_binding(sched: &Scheduler) {
    let st = sched.state();
    for pcb in st.procs.iter() {
        let bound = st
            .cores
            .iter()
            .filter(|c| c.current == Some(pcb.id))
            .count();
        match pcb.state {
            csopesy::ProcState::Running => {
                assert_eq!(bound, 1, "running {} bound to {bound} cores", pcb.name)
            }
            csopesy::ProcState::Ready => {
                assert_eq!(bound, 0, "ready {} bound to a core", pcb.name)
            }
            csopesy::ProcState::Finished => {}
        }
    }
}
