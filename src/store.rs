//! Flat binary backing store (swap area).
//!
//! The store is a single file sized to total emulated memory, lazily created
//! and zero-filled, persisting across runs. Pages are addressed by byte
//! offset `virtual_page_number * page_size`.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Default store file, created in the working directory.
pub const DEFAULT_STORE_PATH: &str = "csopesy-backing-store.bin";

/// File-backed page store.
#[derive(Debug)]
pub struct BackingStore {
    file: File,
    path: PathBuf,
    page_size: usize,
}

impl BackingStore {
    /// Open (or create zero-filled) a store of `total_mem` bytes.
    ///
    /// An existing file shorter than `total_mem` is extended; longer content
    /// from an earlier, larger configuration is left in place.
    pub fn open(path: impl AsRef<Path>, total_mem: usize, page_size: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        if file.metadata()?.len() < total_mem as u64 {
            file.set_len(total_mem as u64)?;
        }
        Ok(BackingStore {
            file,
            path,
            page_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one page into `buf`. Offsets past the current file length read
    /// as zero.
    pub fn read_page(&mut self, vpn: usize, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        buf.fill(0);
        let offset = (vpn * self.page_size) as u64;
        if offset >= self.file.metadata()?.len() {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Write one page, extending the file if the offset lies past its end.
    pub fn write_page(&mut self, vpn: usize, buf: &[u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        let offset = (vpn * self.page_size) as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_store_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BackingStore::open(dir.path().join("swap.bin"), 256, 64).unwrap();
        let mut buf = [0xffu8; 64];
        store.read_page(2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_page_roundtrip_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swap.bin");
        let page: Vec<u8> = (0u8..64).collect();

        let mut store = BackingStore::open(&path, 256, 64).unwrap();
        store.write_page(1, &page).unwrap();
        drop(store);

        // Contents survive reopening.
        let mut store = BackingStore::open(&path, 256, 64).unwrap();
        let mut buf = [0u8; 64];
        store.read_page(1, &mut buf).unwrap();
        assert_eq!(&buf[..], &page[..]);

        // Neighboring pages are untouched.
        store.read_page(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_past_end_extends() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BackingStore::open(dir.path().join("swap.bin"), 128, 64).unwrap();
        let page = [7u8; 64];
        store.write_page(10, &page).unwrap();
        let mut buf = [0u8; 64];
        store.read_page(10, &mut buf).unwrap();
        assert_eq!(buf, page);
    }
}
