//! The scheduler: shared state, dispatch policies, and background loops.
//!
//! All mutable state (cores, ready queue, process registry, memory manager)
//! lives behind one coarse mutex. Two background threads drive the
//! emulation: the tick loop and the batch process generator. Everything the
//! loops do per tick is also callable synchronously via [`Scheduler::tick_once`],
//! which is how the test suite drives deterministic schedules.

use std::collections::VecDeque;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use log::{debug, info};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::{valid_proc_mem, Config, SchedPolicy};
use crate::core::CoreSlot;
use crate::error::{Error, Result};
use crate::instruction::{generate_program, Instruction, MAX_USER_INSTRUCTIONS};
use crate::memory::MemoryManager;
use crate::process::{execute_instruction, Pcb, ProcState, ProcTable};
use crate::stats::{Counters, Snapshot};
use crate::store::DEFAULT_STORE_PATH;
use crate::types::{CoreId, ProcessId};

/// Wall-clock pacing of the background tick loop. One tick of simulated
/// time per period; tests bypass the pacing entirely.
const TICK_PERIOD: Duration = Duration::from_millis(18);

/// Poll granularity for the generator's cooperative sleep.
const GENERATOR_POLL: Duration = Duration::from_millis(50);

/// Seed for the admission RNG. Fixed so batch runs are reproducible.
const DEFAULT_SEED: u64 = 42;

/// Everything protected by the scheduler mutex.
#[derive(Debug)]
pub struct SchedState {
    pub config: Config,
    pub cores: Vec<CoreSlot>,
    pub ready: VecDeque<ProcessId>,
    pub procs: ProcTable,
    pub mem: MemoryManager,
    rng: SmallRng,
    /// Names the generator has handed out (`process<k>`).
    auto_counter: u32,
    all_done_notified: bool,
}

impl SchedState {
    /// One scheduler tick: reap, retry deferred allocations, dispatch,
    /// execute, update counters, check for global completion. Returns true
    /// if any instruction executed.
    pub fn tick(&mut self, stats: &Counters) -> bool {
        self.reap();
        self.retry_allocations();
        match self.config.scheduler {
            SchedPolicy::Rr => self.dispatch_rr(),
            SchedPolicy::Fcfs => self.dispatch_fcfs(),
        }
        let executed = self.execute_all();

        let active = self.cores.iter().filter(|c| !c.is_idle()).count() as u64;
        stats.count_tick(active, self.config.num_cpu as u64 - active);

        if !self.all_done_notified
            && !self.procs.is_empty()
            && self.procs.all_finished()
            && self.cores.iter().all(|c| c.is_idle())
            && self.ready.is_empty()
        {
            info!("all processes have finished execution");
            self.all_done_notified = true;
        }
        executed
    }

    /// Release cores (and memory) held by finished processes.
    fn reap(&mut self) {
        for idx in 0..self.cores.len() {
            let Some(pid) = self.cores[idx].current else {
                continue;
            };
            if self.procs.get(pid).is_finished() {
                self.mem.deallocate(self.procs.get_mut(pid));
                self.cores[idx].current = None;
                self.cores[idx].quantum = 0;
            }
        }
    }

    /// Walk the ready queue once, in place, installing page tables for any
    /// process that lost or never had residency. Queue order is preserved.
    fn retry_allocations(&mut self) {
        for i in 0..self.ready.len() {
            let pid = self.ready[i];
            let pcb = self.procs.get_mut(pid);
            if !pcb.has_residency && !pcb.is_finished() {
                self.mem.allocate(pcb);
            }
        }
    }

    fn bindable(&self, pid: ProcessId) -> bool {
        let pcb = self.procs.get(pid);
        pcb.has_residency && !pcb.is_finished()
    }

    fn bind(&mut self, core_idx: usize, pid: ProcessId) {
        let pcb = self.procs.get_mut(pid);
        pcb.state = ProcState::Running;
        pcb.core = Some(CoreId(core_idx as u32));
        self.cores[core_idx].current = Some(pid);
        debug!("core {core_idx}: bound pid {pid}");
    }

    /// Round-robin: one bind attempt per idle core, quantum-expiry
    /// preemption, and a guard so a process preempted this tick is never
    /// rebound to the same core in the same tick.
    fn dispatch_rr(&mut self) {
        let quantum_max = self.config.quantum_cycles;
        for idx in 0..self.cores.len() {
            if self.cores[idx].is_idle() {
                if let Some(pid) = self.ready.pop_front() {
                    if self.bindable(pid) {
                        self.bind(idx, pid);
                        self.cores[idx].quantum = 0;
                    } else if !self.procs.get(pid).is_finished() {
                        self.ready.push_back(pid);
                    }
                }
            } else if self.cores[idx].quantum >= quantum_max {
                let Some(prev) = self.cores[idx].current.take() else {
                    continue;
                };
                if !self.procs.get(prev).is_finished() {
                    let pcb = self.procs.get_mut(prev);
                    pcb.state = ProcState::Ready;
                    pcb.core = None;
                    self.ready.push_back(prev);
                    debug!("core {idx}: preempted pid {prev}");
                }
                self.cores[idx].quantum = 0;

                if let Some(pid) = self.ready.pop_front() {
                    if pid != prev && self.bindable(pid) {
                        self.bind(idx, pid);
                    } else if !self.procs.get(pid).is_finished() {
                        self.ready.push_back(pid);
                    }
                }
            }

            if !self.cores[idx].is_idle() {
                self.cores[idx].quantum += 1;
            }
        }
    }

    /// FCFS: each idle core takes the first residency-satisfying process,
    /// rotating skipped ones to the tail. No preemption, no quantum
    /// accounting.
    fn dispatch_fcfs(&mut self) {
        for idx in 0..self.cores.len() {
            if !self.cores[idx].is_idle() {
                continue;
            }
            let limit = self.ready.len();
            for _ in 0..limit {
                let Some(pid) = self.ready.pop_front() else {
                    break;
                };
                if self.procs.get(pid).is_finished() {
                    continue;
                }
                if !self.bindable(pid) {
                    self.ready.push_back(pid);
                    continue;
                }
                self.bind(idx, pid);
                break;
            }
        }
    }

    /// Run one instruction on every busy core, preceded by a synthetic
    /// access into the process's own address space to induce paging
    /// traffic. Memory for processes finishing here is released at once.
    fn execute_all(&mut self) -> bool {
        let mut executed = false;
        for idx in 0..self.cores.len() {
            let Some(pid) = self.cores[idx].current else {
                continue;
            };
            if self.procs.get(pid).is_finished() {
                continue;
            }

            let mem_required = self.procs.get(pid).mem_required;
            if mem_required > 0 {
                let probe = self.rng.gen_range(0..mem_required) as u32;
                self.mem.access_memory(&mut self.procs, pid, probe);
            }

            execute_instruction(&mut self.procs, &mut self.mem, pid);
            executed = true;

            if self.procs.get(pid).is_finished() {
                self.mem.deallocate(self.procs.get_mut(pid));
            }
        }
        executed
    }

    /// Register a new process: allocate its page table, enqueue it, insert
    /// it into the registry.
    fn admit(
        &mut self,
        name: &str,
        mem_required: usize,
        instructions: Vec<Instruction>,
    ) -> Result<ProcessId> {
        if self.procs.contains_name(name) {
            return Err(Error::rejected(format!("process {name:?} already exists")));
        }
        let id = self.procs.next_id();
        let mut pcb = Pcb::new(name, id, instructions, mem_required);
        self.mem.allocate(&mut pcb);
        let id = self.procs.insert(pcb);
        self.ready.push_back(id);
        info!("admitted {name} (pid {id}, {mem_required} bytes)");
        Ok(id)
    }
}

/// The scheduler facade: owns the shared state, the statistics counters,
/// and the two background threads.
pub struct Scheduler {
    state: Arc<Mutex<SchedState>>,
    stats: Arc<Counters>,
    ticking: Arc<AtomicBool>,
    generating: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Build a scheduler from a validated config, with the backing store at
    /// its default path.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_store_path(config, DEFAULT_STORE_PATH)
    }

    /// Build a scheduler with an explicit backing-store path (tests point
    /// this at temp directories).
    pub fn with_store_path(config: Config, store_path: impl AsRef<Path>) -> Result<Self> {
        let stats = Arc::new(Counters::new());
        let mut mem = MemoryManager::new(config.max_overall_mem, config.mem_per_frame, store_path)?;
        mem.stats_sink(Arc::clone(&stats));

        let cores = (0..config.num_cpu)
            .map(|i| CoreSlot::new(CoreId(i)))
            .collect();

        let state = SchedState {
            config,
            cores,
            ready: VecDeque::new(),
            procs: ProcTable::new(),
            mem,
            rng: SmallRng::seed_from_u64(DEFAULT_SEED),
            auto_counter: 0,
            all_done_notified: false,
        };

        Ok(Scheduler {
            state: Arc::new(Mutex::new(state)),
            stats,
            ticking: Arc::new(AtomicBool::new(false)),
            generating: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        })
    }

    fn locked(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().expect("scheduler mutex poisoned")
    }

    /// Lock and expose the shared state. Inspection surface for the shell
    /// and the test suite.
    pub fn state(&self) -> MutexGuard<'_, SchedState> {
        self.locked()
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.stats
    }

    /// Admit a process with generated instructions and a memory requirement
    /// drawn uniformly from the configured per-process range.
    pub fn add_process(&self, name: &str) -> Result<ProcessId> {
        let mut st = self.locked();
        if st.procs.contains_name(name) {
            return Err(Error::rejected(format!("process {name:?} already exists")));
        }
        let (min_mem, max_mem) = (st.config.min_mem_per_proc, st.config.max_mem_per_proc);
        let mem_required = st.rng.gen_range(min_mem..=max_mem);
        let (min_ins, max_ins) = (st.config.min_ins, st.config.max_ins);
        let program = generate_program(&mut st.rng, name, min_ins, max_ins, mem_required);
        st.admit(name, mem_required, program)
    }

    /// Admit a process with an explicit memory size (power of two in
    /// `[64, 65536]`) and generated instructions.
    pub fn add_process_with_size(&self, name: &str, mem_required: usize) -> Result<ProcessId> {
        if !valid_proc_mem(mem_required) {
            return Err(Error::rejected(format!(
                "memory size {mem_required} must be a power of two in [64, 65536]"
            )));
        }
        let mut st = self.locked();
        if st.procs.contains_name(name) {
            return Err(Error::rejected(format!("process {name:?} already exists")));
        }
        let (min_ins, max_ins) = (st.config.min_ins, st.config.max_ins);
        let program = generate_program(&mut st.rng, name, min_ins, max_ins, mem_required);
        st.admit(name, mem_required, program)
    }

    /// Admit a process with an explicit memory size (power of two in
    /// `[64, 65536]`) and a user-supplied program of 1..=50 instructions.
    pub fn add_process_with_memory(
        &self,
        name: &str,
        mem_required: usize,
        instructions: Vec<Instruction>,
    ) -> Result<ProcessId> {
        if !valid_proc_mem(mem_required) {
            return Err(Error::rejected(format!(
                "memory size {mem_required} must be a power of two in [64, 65536]"
            )));
        }
        if instructions.is_empty() || instructions.len() > MAX_USER_INSTRUCTIONS {
            return Err(Error::rejected(format!(
                "program must have 1..={MAX_USER_INSTRUCTIONS} instructions, got {}",
                instructions.len()
            )));
        }
        self.locked().admit(name, mem_required, instructions)
    }

    /// Run one synchronous tick. Returns true if any instruction executed.
    pub fn tick_once(&self) -> bool {
        let stats = Arc::clone(&self.stats);
        self.locked().tick(&stats)
    }

    /// Start the background tick loop and the batch process generator.
    pub fn start(&mut self) {
        self.generating.store(true, Ordering::SeqCst);
        self.locked().all_done_notified = false;
        if self.ticking.swap(true, Ordering::SeqCst) {
            // Loops already running; only generation was re-enabled.
            return;
        }

        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let ticking = Arc::clone(&self.ticking);
        self.threads.push(std::thread::spawn(move || {
            while ticking.load(Ordering::Relaxed) {
                let (executed, delay) = {
                    let mut st = state.lock().expect("scheduler mutex poisoned");
                    let executed = st.tick(&stats);
                    (executed, st.config.delay_per_exec)
                };
                // Sleeps happen with the lock released.
                std::thread::sleep(TICK_PERIOD);
                if executed && delay > 0 {
                    std::thread::sleep(Duration::from_millis(delay));
                }
            }
        }));

        let state = Arc::clone(&self.state);
        let generating = Arc::clone(&self.generating);
        self.threads.push(std::thread::spawn(move || {
            while generating.load(Ordering::Relaxed) {
                let batch_secs = {
                    state
                        .lock()
                        .expect("scheduler mutex poisoned")
                        .config
                        .batch_process_freq
                };
                let deadline = Instant::now() + Duration::from_secs(batch_secs);
                while Instant::now() < deadline {
                    if !generating.load(Ordering::Relaxed) {
                        return;
                    }
                    std::thread::sleep(GENERATOR_POLL);
                }

                let mut st = state.lock().expect("scheduler mutex poisoned");
                let name = format!("process{}", st.auto_counter);
                st.auto_counter += 1;
                if st.procs.contains_name(&name) {
                    debug!("generator: {name} already exists, skipping");
                    continue;
                }
                let (min_mem, max_mem) = (st.config.min_mem_per_proc, st.config.max_mem_per_proc);
                let mem_required = st.rng.gen_range(min_mem..=max_mem);
                let (min_ins, max_ins) = (st.config.min_ins, st.config.max_ins);
                let program = generate_program(&mut st.rng, &name, min_ins, max_ins, mem_required);
                if let Err(e) = st.admit(&name, mem_required, program) {
                    debug!("generator: {e}");
                }
            }
        }));

        info!("scheduler started");
    }

    /// Stop generating batch processes. The tick loop keeps running so
    /// outstanding work completes.
    pub fn stop_generation(&self) {
        self.generating.store(false, Ordering::SeqCst);
        info!("process generation stopped");
    }

    /// Whether the batch generator is currently enabled.
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Relaxed)
    }

    /// Stop both loops and join them. Any in-progress tick completes.
    pub fn shutdown(&mut self) {
        self.generating.store(false, Ordering::SeqCst);
        self.ticking.store(false, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// Point-in-time statistics readout.
    pub fn snapshot(&self) -> Snapshot {
        let st = self.locked();
        let used_mem = st.mem.used_frames() * st.mem.frame_size();
        Snapshot {
            total_cpu_ticks: self.stats.total_cpu_ticks(),
            active_cpu_ticks: self.stats.active_cpu_ticks(),
            idle_cpu_ticks: self.stats.idle_cpu_ticks(),
            num_paged_in: self.stats.paged_in(),
            num_paged_out: self.stats.paged_out(),
            total_mem: st.config.max_overall_mem,
            used_mem,
            free_mem: st.config.max_overall_mem - used_mem,
        }
    }

    /// Per-process inspection for `screen -r` / `process-smi`.
    pub fn process_info(&self, name: &str) -> Option<ProcessView> {
        let st = self.locked();
        let pid = st.procs.id_by_name(name)?;
        Some(ProcessView::of(st.procs.get(pid)))
    }

    /// The `screen -ls` / `report-util` body.
    pub fn utilization_report(&self) -> String {
        use std::fmt::Write;

        let st = self.locked();
        let active = st.cores.iter().filter(|c| !c.is_idle()).count() as u32;
        let utilization = active as f64 / st.config.num_cpu as f64 * 100.0;

        let mut out = String::new();
        let _ = writeln!(out, "CPU utilization: {utilization:.0}%");
        let _ = writeln!(out, "Cores used: {active}");
        let _ = writeln!(out, "Cores available: {}", st.config.num_cpu - active);
        let _ = writeln!(out);
        let _ = writeln!(out, "----------------------------------------");
        let _ = writeln!(out, "Running processes:");
        for core in &st.cores {
            let Some(pid) = core.current else { continue };
            let pcb = st.procs.get(pid);
            let (done, total) = pcb.progress();
            let _ = writeln!(
                out,
                "{:<12} ({:>6.1}s)  Core: {:<4} {done} / {total}",
                pcb.name,
                elapsed_secs(pcb.created_at),
                core.id,
            );
        }
        for pcb in st.procs.iter() {
            if pcb.is_finished() || pcb.state == ProcState::Running || pcb.has_residency {
                continue;
            }
            let _ = writeln!(out, "{:<12} (waiting for memory)", pcb.name);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Finished processes:");
        let mut finished: Vec<&Pcb> = st.procs.iter().filter(|p| p.is_finished()).collect();
        finished.sort_by_key(|p| p.finished_at);
        for pcb in finished {
            let (_, total) = pcb.progress();
            let _ = writeln!(
                out,
                "{:<12} ({:>6.1}s)  Finished    {total} / {total}",
                pcb.name,
                elapsed_secs(pcb.created_at),
            );
        }
        let _ = writeln!(out, "----------------------------------------");
        out
    }

    /// Write the utilization report to the given path and return it
    /// absolutized.
    pub fn report_util(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let report = self.utilization_report();
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "CPU Utilization Report")?;
        file.write_all(report.as_bytes())?;
        let absolute = std::fs::canonicalize(&path)?;
        Ok(absolute)
    }

    /// Render the frame table.
    pub fn memory_map(&self) -> String {
        let st = self.locked();
        st.mem.memory_map(&st.procs)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Immutable per-process view handed to the shell.
#[derive(Debug, Clone)]
pub struct ProcessView {
    pub name: String,
    pub id: ProcessId,
    pub state: ProcState,
    pub core: Option<CoreId>,
    pub executed: usize,
    pub total: usize,
    pub created_at: SystemTime,
    pub finished_at: Option<SystemTime>,
    pub mem_required: usize,
    pub has_residency: bool,
    pub log: Vec<String>,
}

impl ProcessView {
    fn of(pcb: &Pcb) -> Self {
        let (executed, total) = pcb.progress();
        ProcessView {
            name: pcb.name.clone(),
            id: pcb.id,
            state: pcb.state,
            core: pcb.core,
            executed,
            total,
            created_at: pcb.created_at,
            finished_at: pcb.finished_at,
            mem_required: pcb.mem_required,
            has_residency: pcb.has_residency,
            log: pcb.log.clone(),
        }
    }
}

fn elapsed_secs(since: SystemTime) -> f64 {
    since
        .elapsed()
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
