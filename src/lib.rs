//! csopesy - Interactive OS emulator core.
//!
//! A command shell over a simulated multi-core CPU executing synthetic
//! user-level processes, coupling a multi-core scheduler (round-robin or
//! FCFS) with a demand-paged virtual memory manager and a file-backed
//! swap area.
//!
//! # Architecture
//!
//! - **Scheduler**: ready queue, core slots, tick pipeline, two background
//!   loops (ticking and batch process generation)
//! - **Memory manager**: frame table, per-process page tables, FIFO sweep
//!   eviction, backing store round-trips
//! - **Processes**: PCBs in a dense registry, a small instruction set with
//!   counted loops and 16-bit memory accesses
//! - **Stats**: atomic counters surfaced to `vmstat`/`process-smi`
//!
//! # Usage
//!
//! ```rust,no_run
//! use csopesy::{Config, Scheduler};
//!
//! let config = Config::default();
//! let mut sched = Scheduler::new(config).unwrap();
//! sched.add_process("demo").unwrap();
//! sched.start();
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod instruction;
pub mod memory;
pub mod process;
pub mod sched;
pub mod stats;
pub mod store;
pub mod types;

// Re-export the main public types for convenience.
pub use config::{Config, SchedPolicy};
pub use error::{Error, Result};
pub use instruction::{parse_program, Instruction};
pub use memory::MemoryManager;
pub use process::{Pcb, ProcState, ProcTable};
pub use sched::{ProcessView, SchedState, Scheduler};
pub use stats::{Counters, Snapshot};
pub use store::BackingStore;
pub use types::{CoreId, FrameId, ProcessId, Tick, VirtAddr};
