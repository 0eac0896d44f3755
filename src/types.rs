//! Newtype wrappers and type aliases for domain concepts.
//!
//! Newtypes for identifiers (process ids, core ids, frame ids) prevent silent
//! type confusion between the many small integers this emulator juggles. Type
//! aliases for quantities (addresses, tick counts) provide self-documenting
//! code without the boilerplate of implementing arithmetic traits.

/// Process identifier. Assigned monotonically at admission and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

/// CPU core identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreId(pub u32);

/// Physical frame identifier (index into the frame table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);

/// Virtual address within a process's address space.
pub type VirtAddr = u32;

/// Physical byte offset into emulated memory.
pub type PhysAddr = usize;

/// Scheduler tick count; the basic time unit of the simulation.
pub type Tick = u64;

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::fmt::Display for CoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}
