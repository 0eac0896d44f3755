//! Demand-paged memory management.
//!
//! Physical memory is a flat byte array split into frames of `frame_size`
//! bytes. Each process gets a page table at admission (its "residency");
//! pages are loaded into frames on first touch and evicted FIFO by a sweep
//! pointer rotating over frame indices. Evicted pages round-trip through the
//! backing store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::process::{Pcb, ProcTable};
use crate::stats::Counters;
use crate::store::BackingStore;
use crate::types::{FrameId, PhysAddr, ProcessId, VirtAddr};

/// A physical frame slot.
#[derive(Debug, Clone)]
pub struct Frame {
    pub owner: Option<ProcessId>,
    /// Virtual page number held while occupied.
    pub vpn: usize,
    pub occupied: bool,
    pub dirty: bool,
}

impl Frame {
    fn free() -> Self {
        Frame {
            owner: None,
            vpn: 0,
            occupied: false,
            dirty: false,
        }
    }
}

/// One page-table entry. `valid` holds exactly when `frame` points at an
/// occupied frame owned by this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageTableEntry {
    pub frame: Option<FrameId>,
    pub valid: bool,
    pub dirty: bool,
    pub referenced: bool,
}

/// The memory manager: frame table, per-process page tables, FIFO sweep
/// pointer, and the backing store.
#[derive(Debug)]
pub struct MemoryManager {
    total_mem: usize,
    frame_size: usize,
    frames: Vec<Frame>,
    phys: Vec<u8>,
    page_tables: BTreeMap<ProcessId, Vec<PageTableEntry>>,
    /// FIFO victim cursor over frame indices.
    sweep: usize,
    store: BackingStore,
    stats: Option<Arc<Counters>>,
}

impl MemoryManager {
    /// Build a manager over `total_mem` bytes in `frame_size` frames, backed
    /// by the store file at `store_path`.
    pub fn new(total_mem: usize, frame_size: usize, store_path: impl AsRef<Path>) -> Result<Self> {
        let total_frames = total_mem / frame_size;
        Ok(MemoryManager {
            total_mem,
            frame_size,
            frames: vec![Frame::free(); total_frames],
            phys: vec![0; total_mem],
            page_tables: BTreeMap::new(),
            sweep: 0,
            store: BackingStore::open(store_path, total_mem, frame_size)?,
            stats: None,
        })
    }

    /// Install the counter sink so paging events are counted.
    pub fn stats_sink(&mut self, stats: Arc<Counters>) {
        self.stats = Some(stats);
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn free_frames(&self) -> usize {
        self.frames.iter().filter(|f| !f.occupied).count()
    }

    pub fn used_frames(&self) -> usize {
        self.total_frames() - self.free_frames()
    }

    /// Distinct processes currently holding at least one frame.
    pub fn processes_in_memory(&self) -> usize {
        let mut owners: Vec<ProcessId> = self
            .frames
            .iter()
            .filter(|f| f.occupied)
            .filter_map(|f| f.owner)
            .collect();
        owners.sort_unstable();
        owners.dedup();
        owners.len()
    }

    /// Install a page table sized to the process's requirement, all entries
    /// invalid. Always succeeds: residency is about page tables, not frames.
    pub fn allocate(&mut self, pcb: &mut Pcb) {
        let pages_needed = pcb.mem_required.div_ceil(self.frame_size);
        self.page_tables
            .insert(pcb.id, vec![PageTableEntry::default(); pages_needed]);
        pcb.has_residency = true;
        debug!("allocated {} page(s) for {}", pages_needed, pcb.name);
    }

    /// Free every frame the process owns and drop its page table.
    pub fn deallocate(&mut self, pcb: &mut Pcb) {
        if self.page_tables.remove(&pcb.id).is_none() {
            return;
        }
        for frame in &mut self.frames {
            if frame.owner == Some(pcb.id) {
                *frame = Frame::free();
            }
        }
        pcb.has_residency = false;
        debug!("deallocated memory for {}", pcb.name);
    }

    /// Translate a virtual address for a read access.
    pub fn translate(
        &mut self,
        procs: &mut ProcTable,
        pid: ProcessId,
        vaddr: VirtAddr,
    ) -> Result<PhysAddr> {
        self.translate_access(procs, pid, vaddr, false)
    }

    /// Translate a virtual address for a write access, marking the page
    /// dirty.
    pub fn translate_write(
        &mut self,
        procs: &mut ProcTable,
        pid: ProcessId,
        vaddr: VirtAddr,
    ) -> Result<PhysAddr> {
        self.translate_access(procs, pid, vaddr, true)
    }

    fn translate_access(
        &mut self,
        procs: &mut ProcTable,
        pid: ProcessId,
        vaddr: VirtAddr,
        write: bool,
    ) -> Result<PhysAddr> {
        let addr = vaddr as usize;
        let page = addr / self.frame_size;
        let offset = addr % self.frame_size;

        let table_len = self
            .page_tables
            .get(&pid)
            .map(|t| t.len())
            .ok_or(Error::InvalidAddress { addr })?;
        if page >= table_len {
            return Err(Error::InvalidAddress { addr });
        }

        if !self.page_tables[&pid][page].valid {
            self.handle_page_fault(procs, pid, page)?;
        }

        let entry = &mut self
            .page_tables
            .get_mut(&pid)
            .ok_or(Error::InvalidAddress { addr })?[page];
        entry.referenced = true;
        if write {
            entry.dirty = true;
        }
        let frame = entry.frame.ok_or(Error::InvalidAddress { addr })?;
        if write {
            self.frames[frame.0].dirty = true;
        }
        Ok(frame.0 * self.frame_size + offset)
    }

    /// Translate and discard the result; models implicit accesses. Faults
    /// are logged and swallowed.
    pub fn access_memory(&mut self, procs: &mut ProcTable, pid: ProcessId, vaddr: VirtAddr) {
        if let Err(e) = self.translate(procs, pid, vaddr) {
            warn!("pid {pid}: access at {vaddr:#x}: {e}");
        }
    }

    /// Read the little-endian 16-bit word at a physical address.
    pub fn read_word(&self, paddr: PhysAddr) -> Result<u16> {
        if paddr + 1 >= self.total_mem {
            return Err(Error::InvalidAddress { addr: paddr });
        }
        Ok(u16::from_le_bytes([self.phys[paddr], self.phys[paddr + 1]]))
    }

    /// Write a little-endian 16-bit word at a physical address.
    pub fn write_word(&mut self, paddr: PhysAddr, value: u16) -> Result<()> {
        if paddr + 1 >= self.total_mem {
            return Err(Error::InvalidAddress { addr: paddr });
        }
        let bytes = value.to_le_bytes();
        self.phys[paddr] = bytes[0];
        self.phys[paddr + 1] = bytes[1];
        Ok(())
    }

    /// Bring `(pid, page)` into a frame: reuse a free frame or evict the
    /// next occupied frame past the sweep pointer.
    fn handle_page_fault(
        &mut self,
        procs: &mut ProcTable,
        pid: ProcessId,
        page: usize,
    ) -> Result<()> {
        let frame_idx = match self.find_free_frame() {
            Some(idx) => idx,
            None => {
                let victim = self.select_victim();
                self.evict(procs, victim)?;
                victim
            }
        };

        self.load_page(procs, pid, page, frame_idx)?;

        let entry = &mut self
            .page_tables
            .get_mut(&pid)
            .ok_or(Error::InvalidAddress {
                addr: page * self.frame_size,
            })?[page];
        entry.frame = Some(FrameId(frame_idx));
        entry.valid = true;
        entry.referenced = true;
        entry.dirty = false;

        let frame = &mut self.frames[frame_idx];
        frame.owner = Some(pid);
        frame.vpn = page;
        frame.occupied = true;
        frame.dirty = false;

        procs.get_mut(pid).has_residency = true;
        debug!("pid {pid}: page {page} -> frame {frame_idx}");
        Ok(())
    }

    fn find_free_frame(&self) -> Option<usize> {
        self.frames.iter().position(|f| !f.occupied)
    }

    /// Advance the sweep pointer to the next occupied frame and select it,
    /// leaving the pointer one past the victim. Ordering is by frame index,
    /// not allocation time.
    fn select_victim(&mut self) -> usize {
        let total = self.frames.len();
        let start = self.sweep;
        loop {
            let candidate = self.sweep;
            self.sweep = (self.sweep + 1) % total;
            if self.frames[candidate].occupied {
                return candidate;
            }
            if self.sweep == start {
                return 0;
            }
        }
    }

    /// Copy the victim frame out to the backing store and invalidate its
    /// page-table entry. Clears the owner's residency flag once it holds no
    /// valid pages.
    fn evict(&mut self, procs: &mut ProcTable, frame_idx: usize) -> Result<()> {
        let (owner, vpn) = {
            let frame = &self.frames[frame_idx];
            if !frame.occupied {
                return Ok(());
            }
            (frame.owner, frame.vpn)
        };

        let start = frame_idx * self.frame_size;
        let data = self.phys[start..start + self.frame_size].to_vec();
        self.store
            .write_page(vpn, &data)
            .map_err(|_| Error::InvalidAddress {
                addr: vpn * self.frame_size,
            })?;

        if let Some(owner) = owner {
            if let Some(table) = self.page_tables.get_mut(&owner) {
                if let Some(entry) = table.get_mut(vpn) {
                    entry.valid = false;
                    entry.frame = None;
                }
                if table.iter().all(|e| !e.valid) {
                    procs.get_mut(owner).has_residency = false;
                }
            }
            debug!("evicted pid {owner} page {vpn} from frame {frame_idx}");
        }

        self.frames[frame_idx] = Frame::free();
        if let Some(stats) = &self.stats {
            stats.count_paged_out();
        }
        Ok(())
    }

    /// Fill the target frame from the backing store. An all-zero page (never
    /// written) is synthesized with a deterministic per-process fill so
    /// reloads are stable across runs.
    fn load_page(
        &mut self,
        procs: &ProcTable,
        pid: ProcessId,
        page: usize,
        frame_idx: usize,
    ) -> Result<()> {
        let mut buf = vec![0u8; self.frame_size];
        self.store
            .read_page(page, &mut buf)
            .map_err(|_| Error::InvalidAddress {
                addr: page * self.frame_size,
            })?;

        if buf.iter().all(|&b| b == 0) {
            let seed = fnv1a(&procs.get(pid).name) as usize;
            for (offset, byte) in buf.iter_mut().enumerate() {
                *byte = ((seed + page + offset) % 256) as u8;
            }
        }

        let start = frame_idx * self.frame_size;
        self.phys[start..start + self.frame_size].copy_from_slice(&buf);
        if let Some(stats) = &self.stats {
            stats.count_paged_in();
        }
        Ok(())
    }

    /// Render the frame table, highest frame first.
    pub fn memory_map(&self, procs: &ProcTable) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "====== MEMORY MAP ======");
        let _ = writeln!(out, "Total frames: {}", self.total_frames());
        let _ = writeln!(out, "Free frames: {}", self.free_frames());
        let _ = writeln!(out, "Used frames: {}", self.used_frames());
        for (idx, frame) in self.frames.iter().enumerate().rev() {
            match frame.owner.filter(|_| frame.occupied) {
                Some(owner) => {
                    let _ = writeln!(
                        out,
                        "Frame {idx:>3}: {} (page {})",
                        procs.get(owner).name,
                        frame.vpn
                    );
                }
                None => {
                    let _ = writeln!(out, "Frame {idx:>3}: FREE");
                }
            }
        }
        let _ = writeln!(out, "========================");
        out
    }

    #[cfg(test)]
    pub(crate) fn page_table(&self, pid: ProcessId) -> Option<&[PageTableEntry]> {
        self.page_tables.get(&pid).map(|t| t.as_slice())
    }
}

/// FNV-1a, used for the deterministic zero-page fill. Stable across runs,
/// unlike the std hasher.
fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Pcb;

    fn setup(total_mem: usize, frame_size: usize) -> (MemoryManager, ProcTable, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mem = MemoryManager::new(total_mem, frame_size, dir.path().join("swap.bin")).unwrap();
        (mem, ProcTable::new(), dir)
    }

    fn admit(mem: &mut MemoryManager, procs: &mut ProcTable, name: &str, size: usize) -> ProcessId {
        let id = procs.next_id();
        let mut pcb = Pcb::new(name, id, Vec::new(), size);
        mem.allocate(&mut pcb);
        procs.insert(pcb)
    }

    #[test]
    fn test_translate_math() {
        let (mut mem, mut procs, _dir) = setup(256, 64);
        let pid = admit(&mut mem, &mut procs, "p", 256);

        // Page 1, offset 6: the cold fault grabs the first free frame (0).
        let pa = mem.translate(&mut procs, pid, 70).unwrap();
        assert_eq!(pa, 6);
    }

    #[test]
    fn test_invalid_page_rejected() {
        let (mut mem, mut procs, _dir) = setup(256, 64);
        let pid = admit(&mut mem, &mut procs, "p", 128);
        // Two pages installed; address in page 2 is out of range.
        assert!(matches!(
            mem.translate(&mut procs, pid, 128),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_cold_faults_fill_free_frames() {
        let (mut mem, mut procs, _dir) = setup(256, 64);
        let pid = admit(&mut mem, &mut procs, "p", 256);

        for page in 0..4 {
            mem.translate(&mut procs, pid, (page * 64) as u32).unwrap();
        }
        assert_eq!(mem.free_frames(), 0);
        // All four pages valid, each frame pointing back at its page.
        let table = mem.page_table(pid).unwrap().to_vec();
        for (page, entry) in table.iter().enumerate() {
            assert!(entry.valid);
            let frame = entry.frame.unwrap();
            assert_eq!(mem.frames[frame.0].vpn, page);
            assert_eq!(mem.frames[frame.0].owner, Some(pid));
        }
    }

    #[test]
    fn test_sweep_selects_victims_by_frame_index() {
        let (mut mem, mut procs, _dir) = setup(256, 64);
        let a = admit(&mut mem, &mut procs, "a", 256);
        for page in 0..4 {
            mem.translate(&mut procs, a, (page * 64) as u32).unwrap();
        }

        // Second process forces evictions; victims rotate 0, 1, 2, ...
        let b = admit(&mut mem, &mut procs, "b", 256);
        mem.translate(&mut procs, b, 0).unwrap();
        assert!(!mem.page_table(a).unwrap()[0].valid, "frame 0 was the victim");
        mem.translate(&mut procs, b, 64).unwrap();
        assert!(!mem.page_table(a).unwrap()[1].valid, "frame 1 was the victim");
    }

    #[test]
    fn test_eviction_clears_residency_when_no_valid_pages() {
        let (mut mem, mut procs, _dir) = setup(64, 64);
        let a = admit(&mut mem, &mut procs, "a", 64);
        mem.translate(&mut procs, a, 0).unwrap();
        assert!(procs.get(a).has_residency);

        let b = admit(&mut mem, &mut procs, "b", 64);
        mem.translate(&mut procs, b, 0).unwrap();
        assert!(!procs.get(a).has_residency, "sole page evicted");
        assert!(procs.get(b).has_residency);
    }

    #[test]
    fn test_word_io_bounds() {
        let (mut mem, _procs, _dir) = setup(128, 64);
        mem.write_word(0, 0xBEEF).unwrap();
        assert_eq!(mem.read_word(0).unwrap(), 0xBEEF);
        assert!(mem.write_word(127, 1).is_err());
        assert!(mem.read_word(130).is_err());
    }

    #[test]
    fn test_zero_page_fill_is_deterministic() {
        let (mut mem, mut procs, _dir) = setup(128, 64);
        let pid = admit(&mut mem, &mut procs, "proc9", 64);
        let pa = mem.translate(&mut procs, pid, 0).unwrap();
        let first = mem.read_word(pa).unwrap();

        let (mut mem2, mut procs2, _dir2) = setup(128, 64);
        let pid2 = admit(&mut mem2, &mut procs2, "proc9", 64);
        let pa2 = mem2.translate(&mut procs2, pid2, 0).unwrap();
        assert_eq!(mem2.read_word(pa2).unwrap(), first);
    }

    #[test]
    fn test_deallocate_frees_frames() {
        let (mut mem, mut procs, _dir) = setup(256, 64);
        let pid = admit(&mut mem, &mut procs, "p", 256);
        for page in 0..4 {
            mem.translate(&mut procs, pid, (page * 64) as u32).unwrap();
        }
        assert_eq!(mem.free_frames(), 0);

        mem.deallocate(procs.get_mut(pid));
        assert_eq!(mem.free_frames(), 4);
        assert!(!procs.get(pid).has_residency);
        assert!(matches!(
            mem.translate(&mut procs, pid, 0),
            Err(Error::InvalidAddress { .. })
        ));
    }
}
