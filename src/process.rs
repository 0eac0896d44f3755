//! Process control blocks, the process registry, and instruction execution.
//!
//! The registry owns every PCB for its whole lifetime in a dense arena
//! indexed by `ProcessId`; frames and page tables refer to processes by id
//! only, never by pointer.

use std::collections::BTreeMap;
use std::time::SystemTime;

use log::warn;

use crate::instruction::Instruction;
use crate::memory::MemoryManager;
use crate::types::{CoreId, ProcessId};

/// Cap on distinct variable names per process.
pub const MAX_VARIABLES: usize = 32;

/// The state a process can be in. `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Admitted, waiting in the ready queue.
    Ready,
    /// Bound to a core slot.
    Running,
    /// All instructions executed.
    Finished,
}

impl std::fmt::Display for ProcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcState::Ready => write!(f, "READY"),
            ProcState::Running => write!(f, "RUNNING"),
            ProcState::Finished => write!(f, "FINISHED"),
        }
    }
}

/// An active counted loop: where its `ForStart` sits and how many
/// iterations have completed.
#[derive(Debug, Clone, Copy)]
pub struct LoopFrame {
    pub start: usize,
    pub counter: u16,
}

/// A process control block.
#[derive(Debug)]
pub struct Pcb {
    pub name: String,
    pub id: ProcessId,
    pub state: ProcState,
    pub instructions: Vec<Instruction>,
    /// Index of the next instruction to execute.
    pub ip: usize,
    /// Variable file; insertion of new names stops at [`MAX_VARIABLES`].
    pub variables: BTreeMap<String, u16>,
    pub loop_stack: Vec<LoopFrame>,
    /// Core the process is bound to while `Running`.
    pub core: Option<CoreId>,
    pub created_at: SystemTime,
    pub finished_at: Option<SystemTime>,
    /// Bytes of virtual address space this process may touch.
    pub mem_required: usize,
    /// Whether a page table is currently installed for this process.
    pub has_residency: bool,
    /// Captured PRINT output, post-substitution.
    pub log: Vec<String>,
}

impl Pcb {
    pub fn new(
        name: impl Into<String>,
        id: ProcessId,
        instructions: Vec<Instruction>,
        mem_required: usize,
    ) -> Self {
        Pcb {
            name: name.into(),
            id,
            state: ProcState::Ready,
            instructions,
            ip: 0,
            variables: BTreeMap::new(),
            loop_stack: Vec::new(),
            core: None,
            created_at: SystemTime::now(),
            finished_at: None,
            mem_required,
            has_residency: false,
            log: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ProcState::Finished
    }

    /// `(executed, total)` instruction counts for progress displays.
    pub fn progress(&self) -> (usize, usize) {
        (self.ip.min(self.instructions.len()), self.instructions.len())
    }

    /// Read a variable; undeclared names read as 0.
    pub fn var(&self, name: &str) -> u16 {
        self.variables.get(name).copied().unwrap_or(0)
    }

    /// Bind a variable. Writes to a new name are silent no-ops once the
    /// variable file holds [`MAX_VARIABLES`] entries.
    pub fn set_var(&mut self, name: &str, value: u16) {
        if let Some(slot) = self.variables.get_mut(name) {
            *slot = value;
        } else if self.variables.len() < MAX_VARIABLES {
            self.variables.insert(name.to_string(), value);
        }
    }

    fn finish(&mut self) {
        self.state = ProcState::Finished;
        self.finished_at = Some(SystemTime::now());
        self.core = None;
    }
}

/// Dense registry of all PCBs, alive and finished, plus the injective
/// name index.
#[derive(Debug, Default)]
pub struct ProcTable {
    procs: Vec<Pcb>,
    names: BTreeMap<String, ProcessId>,
}

impl ProcTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next inserted PCB must carry.
    pub fn next_id(&self) -> ProcessId {
        ProcessId(self.procs.len() as u32)
    }

    /// Register a PCB. The caller is responsible for name-collision checks;
    /// this enforces the dense-id invariant.
    pub fn insert(&mut self, pcb: Pcb) -> ProcessId {
        debug_assert_eq!(pcb.id, self.next_id());
        debug_assert!(!self.names.contains_key(&pcb.name));
        let id = pcb.id;
        self.names.insert(pcb.name.clone(), id);
        self.procs.push(pcb);
        id
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn id_by_name(&self, name: &str) -> Option<ProcessId> {
        self.names.get(name).copied()
    }

    pub fn get(&self, id: ProcessId) -> &Pcb {
        &self.procs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ProcessId) -> &mut Pcb {
        &mut self.procs[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.procs.iter()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn all_finished(&self) -> bool {
        self.procs.iter().all(|p| p.is_finished())
    }
}

/// Substitute `$ident` occurrences with variable values.
///
/// Identifiers are `[A-Za-z_][A-Za-z0-9_]*`; a `$` not followed by one is
/// passed through verbatim. Undeclared variables substitute as `0`.
pub fn substitute_vars(msg: &str, variables: &BTreeMap<String, u16>) -> String {
    let mut out = String::with_capacity(msg.len());
    let mut rest = msg;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let ident_len = ident_prefix_len(after);
        if ident_len == 0 {
            out.push('$');
            rest = after;
        } else {
            let ident = &after[..ident_len];
            let value = variables.get(ident).copied().unwrap_or(0);
            out.push_str(&value.to_string());
            rest = &after[ident_len..];
        }
    }
    out.push_str(rest);
    out
}

fn ident_prefix_len(s: &str) -> usize {
    let mut len = 0;
    for (i, c) in s.char_indices() {
        let ok = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };
        if !ok {
            break;
        }
        len = i + c.len_utf8();
    }
    len
}

/// Execute one instruction of the given process, advancing its instruction
/// pointer. The process transitions to `Finished` on the tick that executes
/// its final instruction.
///
/// Memory faults from `READ`/`WRITE` are logged and ignored so the process
/// continues past the bad access.
pub fn execute_instruction(procs: &mut ProcTable, mem: &mut MemoryManager, pid: ProcessId) {
    let (ip, instr) = {
        let pcb = procs.get_mut(pid);
        if pcb.is_finished() {
            return;
        }
        if pcb.ip >= pcb.instructions.len() {
            pcb.finish();
            return;
        }
        (pcb.ip, pcb.instructions[pcb.ip].clone())
    };

    let mut next_ip = ip + 1;

    match instr {
        Instruction::Print(msg) => {
            let pcb = procs.get_mut(pid);
            let line = substitute_vars(&msg, &pcb.variables);
            pcb.log.push(line);
        }
        Instruction::Declare(var, value) => {
            procs.get_mut(pid).set_var(&var, value);
        }
        Instruction::Add(dst, a, b) => {
            let pcb = procs.get_mut(pid);
            let result = pcb.var(&a).saturating_add(pcb.var(&b));
            pcb.set_var(&dst, result);
        }
        Instruction::Subtract(dst, a, b) => {
            let pcb = procs.get_mut(pid);
            let result = pcb.var(&a).saturating_sub(pcb.var(&b));
            pcb.set_var(&dst, result);
        }
        Instruction::Sleep(_) => {
            // Costs exactly this tick; the argument is retained in the
            // instruction stream but adds no further delay.
        }
        Instruction::ForStart(_) => {
            procs
                .get_mut(pid)
                .loop_stack
                .push(LoopFrame { start: ip, counter: 0 });
        }
        Instruction::ForEnd => {
            let pcb = procs.get_mut(pid);
            if let Some(top) = pcb.loop_stack.last_mut() {
                top.counter += 1;
                let start = top.start;
                let counter = top.counter;
                let iterations = match pcb.instructions[start] {
                    Instruction::ForStart(n) => n,
                    _ => 0,
                };
                if counter < iterations {
                    // Rewind to the loop start; the shared advance below
                    // lands on the first body instruction.
                    next_ip = start + 1;
                } else {
                    pcb.loop_stack.pop();
                }
            }
        }
        Instruction::Read(var, addr) => match mem.translate(procs, pid, addr) {
            Ok(pa) => match mem.read_word(pa) {
                Ok(value) => procs.get_mut(pid).set_var(&var, value),
                Err(e) => warn!("pid {pid}: READ at {addr:#x}: {e}"),
            },
            Err(e) => warn!("pid {pid}: READ at {addr:#x}: {e}"),
        },
        Instruction::Write(addr, var) => {
            let value = procs.get(pid).var(&var);
            match mem.translate_write(procs, pid, addr) {
                Ok(pa) => {
                    if let Err(e) = mem.write_word(pa, value) {
                        warn!("pid {pid}: WRITE at {addr:#x}: {e}");
                    }
                }
                Err(e) => warn!("pid {pid}: WRITE at {addr:#x}: {e}"),
            }
        }
    }

    let pcb = procs.get_mut(pid);
    pcb.ip = next_ip;
    if pcb.ip >= pcb.instructions.len() {
        pcb.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, u16)]) -> BTreeMap<String, u16> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_substitute_simple() {
        let v = vars(&[("x", 14)]);
        assert_eq!(substitute_vars("$x", &v), "14");
        assert_eq!(substitute_vars("x is $x!", &v), "x is 14!");
    }

    #[test]
    fn test_substitute_missing_is_zero() {
        let v = vars(&[]);
        assert_eq!(substitute_vars("got $nothing", &v), "got 0");
    }

    #[test]
    fn test_substitute_bare_dollar_passes_through() {
        let v = vars(&[("a", 1)]);
        assert_eq!(substitute_vars("$ $1 $a", &v), "$ $1 1");
    }

    #[test]
    fn test_variable_cap() {
        let mut pcb = Pcb::new("p", crate::types::ProcessId(0), Vec::new(), 64);
        for i in 0..40 {
            pcb.set_var(&format!("v{i}"), i as u16);
        }
        assert_eq!(pcb.variables.len(), MAX_VARIABLES);
        // Existing names still writable.
        pcb.set_var("v0", 999);
        assert_eq!(pcb.var("v0"), 999);
        // New names are silent no-ops.
        pcb.set_var("overflow", 1);
        assert_eq!(pcb.var("overflow"), 0);
    }
}
