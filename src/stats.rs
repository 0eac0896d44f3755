//! Emulator-wide statistics counters.
//!
//! The scheduler updates the tick counters; the memory manager bumps the
//! paging counters through its installed sink. Plain atomics so `vmstat`
//! readers never need the scheduler mutex.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters shared between the scheduler and the memory manager.
#[derive(Debug, Default)]
pub struct Counters {
    total_cpu_ticks: AtomicU64,
    active_cpu_ticks: AtomicU64,
    idle_cpu_ticks: AtomicU64,
    paged_in: AtomicU64,
    paged_out: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one scheduler tick with the given busy/idle core split.
    pub(crate) fn count_tick(&self, active_cores: u64, idle_cores: u64) {
        self.total_cpu_ticks.fetch_add(1, Ordering::Relaxed);
        self.active_cpu_ticks.fetch_add(active_cores, Ordering::Relaxed);
        self.idle_cpu_ticks.fetch_add(idle_cores, Ordering::Relaxed);
    }

    pub(crate) fn count_paged_in(&self) {
        self.paged_in.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_paged_out(&self) {
        self.paged_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_cpu_ticks(&self) -> u64 {
        self.total_cpu_ticks.load(Ordering::Relaxed)
    }

    pub fn active_cpu_ticks(&self) -> u64 {
        self.active_cpu_ticks.load(Ordering::Relaxed)
    }

    pub fn idle_cpu_ticks(&self) -> u64 {
        self.idle_cpu_ticks.load(Ordering::Relaxed)
    }

    pub fn paged_in(&self) -> u64 {
        self.paged_in.load(Ordering::Relaxed)
    }

    pub fn paged_out(&self) -> u64 {
        self.paged_out.load(Ordering::Relaxed)
    }
}

/// Point-in-time statistics readout for `vmstat`.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub total_cpu_ticks: u64,
    pub active_cpu_ticks: u64,
    pub idle_cpu_ticks: u64,
    pub num_paged_in: u64,
    pub num_paged_out: u64,
    pub total_mem: usize,
    pub used_mem: usize,
    pub free_mem: usize,
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:>12} B total memory", self.total_mem)?;
        writeln!(f, "{:>12} B used memory", self.used_mem)?;
        writeln!(f, "{:>12} B free memory", self.free_mem)?;
        writeln!(f, "{:>12} idle cpu ticks", self.idle_cpu_ticks)?;
        writeln!(f, "{:>12} active cpu ticks", self.active_cpu_ticks)?;
        writeln!(f, "{:>12} total cpu ticks", self.total_cpu_ticks)?;
        writeln!(f, "{:>12} pages paged in", self.num_paged_in)?;
        write!(f, "{:>12} pages paged out", self.num_paged_out)
    }
}
