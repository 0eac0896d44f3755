//! Emulator configuration and the `config.txt` loader.
//!
//! The configuration file is whitespace-delimited `key value` pairs, one per
//! line; string values may be double-quoted. Unknown keys are reported but
//! non-fatal. A recognized key with an unparseable value fails the load.

use std::path::Path;

use log::warn;

use crate::error::{Error, Result};

/// Dispatch policy selected by the `scheduler` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Round-robin with quantum preemption.
    Rr,
    /// First-come-first-served, no preemption.
    Fcfs,
}

impl std::fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedPolicy::Rr => write!(f, "rr"),
            SchedPolicy::Fcfs => write!(f, "fcfs"),
        }
    }
}

/// Full emulator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of simulated CPU cores.
    pub num_cpu: u32,
    /// Dispatch policy.
    pub scheduler: SchedPolicy,
    /// Ticks a process may run on a core before round-robin preemption.
    pub quantum_cycles: u32,
    /// Seconds between generated batch processes.
    pub batch_process_freq: u64,
    /// Minimum generated program length.
    pub min_ins: u32,
    /// Maximum generated program length.
    pub max_ins: u32,
    /// Extra milliseconds slept per tick on which instructions executed.
    pub delay_per_exec: u64,
    /// Total emulated physical memory in bytes.
    pub max_overall_mem: usize,
    /// Frame (and page) size in bytes.
    pub mem_per_frame: usize,
    /// Lower bound for randomly drawn per-process memory.
    pub min_mem_per_proc: usize,
    /// Upper bound for randomly drawn per-process memory.
    pub max_mem_per_proc: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_cpu: 4,
            scheduler: SchedPolicy::Rr,
            quantum_cycles: 5,
            batch_process_freq: 1,
            min_ins: 1000,
            max_ins: 2000,
            delay_per_exec: 0,
            max_overall_mem: 16384,
            mem_per_frame: 256,
            min_mem_per_proc: 64,
            max_mem_per_proc: 4096,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::ConfigParse {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Strip surrounding double quotes, if present.
fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

impl Config {
    /// Load configuration from a `key value` text file.
    ///
    /// Returns the parsed config; `validate` is the caller's job so the
    /// shell can report both kinds of problem distinctly.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse configuration from text. Missing keys keep their defaults.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Config::default();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let (key, value) = match (parts.next(), parts.next()) {
                (Some(k), Some(v)) => (k, v),
                _ => continue,
            };
            match key {
                "num-cpu" => config.num_cpu = parse_value(key, value)?,
                "scheduler" => {
                    config.scheduler = match unquote(value) {
                        "rr" => SchedPolicy::Rr,
                        "fcfs" => SchedPolicy::Fcfs,
                        other => {
                            return Err(Error::ConfigParse {
                                key: key.to_string(),
                                value: other.to_string(),
                            })
                        }
                    }
                }
                "quantum-cycles" => config.quantum_cycles = parse_value(key, value)?,
                "batch-process-freq" => config.batch_process_freq = parse_value(key, value)?,
                "min-ins" => config.min_ins = parse_value(key, value)?,
                "max-ins" => config.max_ins = parse_value(key, value)?,
                "delay-per-exec" => config.delay_per_exec = parse_value(key, value)?,
                "max-overall-mem" => config.max_overall_mem = parse_value(key, value)?,
                "mem-per-frame" => config.mem_per_frame = parse_value(key, value)?,
                "min-mem-per-proc" => config.min_mem_per_proc = parse_value(key, value)?,
                "max-mem-per-proc" => config.max_mem_per_proc = parse_value(key, value)?,
                other => warn!("unknown config key: {other}"),
            }
        }
        Ok(config)
    }

    /// Check cross-field invariants. Returns a refusal reason on failure.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.num_cpu < 1 {
            return Err("num-cpu must be at least 1".into());
        }
        if self.quantum_cycles < 1 {
            return Err("quantum-cycles must be at least 1".into());
        }
        if self.min_ins < 1 || self.min_ins > self.max_ins {
            return Err(format!(
                "instruction bounds invalid: min-ins={} max-ins={}",
                self.min_ins, self.max_ins
            ));
        }
        if self.mem_per_frame == 0 || self.max_overall_mem % self.mem_per_frame != 0 {
            return Err(format!(
                "mem-per-frame ({}) must divide max-overall-mem ({})",
                self.mem_per_frame, self.max_overall_mem
            ));
        }
        for (key, value) in [
            ("min-mem-per-proc", self.min_mem_per_proc),
            ("max-mem-per-proc", self.max_mem_per_proc),
        ] {
            if !valid_proc_mem(value) {
                return Err(format!(
                    "{key} ({value}) must be a power of two in [64, 65536]"
                ));
            }
        }
        if self.min_mem_per_proc > self.max_mem_per_proc {
            return Err("min-mem-per-proc exceeds max-mem-per-proc".into());
        }
        Ok(())
    }
}

/// Whether a per-process memory size is a power of two in `[64, 65536]`.
pub fn valid_proc_mem(size: usize) -> bool {
    (64..=65536).contains(&size) && size.is_power_of_two()
}
