//! §4.1: fixed-size page allocation over a single file, random read/write,
//! geometric growth, and an on-disk free-page list threaded through the file
//! header and the free pages themselves (each free page's first 4 bytes hold
//! the next free page id, or 0 for "none").

use crate::config::StorageConfig;
use crate::errors::DbError;
use crate::storage::header::{FileHeader, HEADER_LEN};
use crate::types::PageId;
use crate::utils::fsutil;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const MIN_GROWTH_PAGES: u64 = 16;

struct Inner {
    file: File,
    page_size: u32,
    page_count: u64,
    header: FileHeader,
    read_only: bool,
}

/// A single page-addressed file. Page 0 is always the file header.
pub struct PageFile {
    inner: Mutex<Inner>,
}

impl PageFile {
    /// Creates a new page file at `path`, failing if it already exists.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid or the file cannot be created.
    pub fn create(path: &Path, config: StorageConfig) -> Result<Self, DbError> {
        if !config.is_valid() {
            return Err(DbError::Corrupted(format!(
                "invalid page size {} (must be a power of two in [4KiB, 64KiB])",
                config.page_size
            )));
        }
        let mut file = fsutil::create_new(path)?;
        let page_count = config.initial_size.max(1) as u64;
        let header = FileHeader::new(config.page_size);
        file.set_len(page_count * u64::from(config.page_size))?;
        file.write_all_at(0, &header.encode(config.page_size as usize))?;
        file.sync_data()?;
        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                page_size: config.page_size,
                page_count,
                header,
                read_only: false,
            }),
        })
    }

    /// Opens an existing page file, validating the header against `config.page_size`.
    ///
    /// # Errors
    /// Returns an error if the file is missing, corrupted, or its page size
    /// doesn't match `config.page_size`.
    pub fn open(path: &Path, config: StorageConfig) -> Result<Self, DbError> {
        let mut file = fsutil::open_existing(path, config.read_only)?;
        let len = file.metadata()?.len();
        let mut probe = vec![0u8; HEADER_LEN.max(4096)];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut probe[..probe.len().min(len as usize)])?;
        let header = FileHeader::decode(&probe)?;
        if header.page_size != config.page_size {
            return Err(DbError::SchemaMismatch(format!(
                "page size mismatch: file has {}, requested {}",
                header.page_size, config.page_size
            )));
        }
        let page_count = len / u64::from(header.page_size);
        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                page_size: header.page_size,
                page_count,
                header,
                read_only: config.read_only,
            }),
        })
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.inner.lock().page_size
    }

    #[must_use]
    pub fn page_count(&self) -> u64 {
        self.inner.lock().page_count
    }

    #[must_use]
    pub fn catalog_root(&self) -> PageId {
        self.inner.lock().header.catalog_root
    }

    pub fn set_catalog_root(&self, root: PageId) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        inner.header.catalog_root = root;
        let page_size = inner.page_size as usize;
        let bytes = inner.header.encode(page_size);
        inner.file.write_all_at(0, &bytes)?;
        Ok(())
    }

    #[must_use]
    pub fn next_txn_id(&self) -> u64 {
        self.inner.lock().header.next_txn_id
    }

    pub fn bump_next_txn_id(&self, value: u64) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        if value > inner.header.next_txn_id {
            inner.header.next_txn_id = value;
            let page_size = inner.page_size as usize;
            let bytes = inner.header.encode(page_size);
            inner.file.write_all_at(0, &bytes)?;
        }
        Ok(())
    }

    /// Reads page `id` in full into `dest`, which must be `page_size` bytes.
    ///
    /// # Errors
    /// Returns an error if `id` is out of range or the read fails.
    pub fn read_page(&self, id: PageId, dest: &mut [u8]) -> Result<(), DbError> {
        let inner = self.inner.lock();
        if u64::from(id) >= inner.page_count {
            return Err(DbError::Corrupted(format!("page {id} out of range")));
        }
        let offset = u64::from(id) * u64::from(inner.page_size);
        inner.file.read_exact_at(offset, dest)
    }

    /// Writes `src` (exactly `page_size` bytes) to page `id`.
    ///
    /// # Errors
    /// Returns an error if the file is read-only or the write fails.
    pub fn write_page(&self, id: PageId, src: &[u8]) -> Result<(), DbError> {
        let inner = self.inner.lock();
        if inner.read_only {
            return Err(DbError::InvalidTransactionState("page file opened read-only".into()));
        }
        let offset = u64::from(id) * u64::from(inner.page_size);
        inner.file.write_all_at(offset, src)
    }

    /// Allocates a page: reuses the free list's head if non-empty, else
    /// extends the file geometrically and bumps the high-water mark.
    ///
    /// # Errors
    /// Returns an error if growing the file fails.
    pub fn allocate_page(&self) -> Result<PageId, DbError> {
        let mut inner = self.inner.lock();
        if inner.header.free_list_head != 0 {
            let head = inner.header.free_list_head;
            let page_size = inner.page_size as usize;
            let mut buf = vec![0u8; page_size];
            let offset = u64::from(head) * u64::from(inner.page_size);
            inner.file.read_exact_at(offset, &mut buf)?;
            let next = u32::from_le_bytes(buf[0..4].try_into().unwrap());
            inner.header.free_list_head = next;
            let header_bytes = inner.header.encode(page_size);
            inner.file.write_all_at(0, &header_bytes)?;
            return Ok(head);
        }
        let id = inner.header.next_page_id;
        if u64::from(id) >= inner.page_count {
            let growth = inner.page_count.max(MIN_GROWTH_PAGES);
            let new_count = inner.page_count + growth;
            let page_size = u64::from(inner.page_size);
            inner.file.set_len(new_count * page_size)?;
            inner.page_count = new_count;
        }
        inner.header.next_page_id = id
            .checked_add(1)
            .ok_or_else(|| DbError::Corrupted("page file exhausted the 32-bit page id space".into()))?;
        let page_size = inner.page_size as usize;
        let header_bytes = inner.header.encode(page_size);
        inner.file.write_all_at(0, &header_bytes)?;
        Ok(id)
    }

    /// Returns `id` to the free list, threading it onto the current head.
    ///
    /// # Errors
    /// Returns an error if persisting the updated free list fails.
    pub fn free_page(&self, id: PageId) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        let page_size = inner.page_size as usize;
        let mut buf = vec![0u8; page_size];
        buf[0..4].copy_from_slice(&inner.header.free_list_head.to_le_bytes());
        let offset = u64::from(id) * u64::from(inner.page_size);
        inner.file.write_all_at(offset, &buf)?;
        inner.header.free_list_head = id;
        let header_bytes = inner.header.encode(page_size);
        inner.file.write_all_at(0, &header_bytes)?;
        Ok(())
    }

    /// Forces pending writes to stable storage.
    ///
    /// # Errors
    /// Returns an error if the underlying `sync_data` call fails.
    pub fn flush(&self) -> Result<(), DbError> {
        Ok(self.inner.lock().file.sync_data()?)
    }
}

/// Positional I/O helpers. Rust's portable `File` API lacks `pread`/`pwrite`,
/// so reads and writes seek first; callers serialize access via `PageFile`'s
/// own mutex, matching the teacher's choice to keep I/O dependency-free.
trait PositionalIo {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), DbError>;
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), DbError>;
}

impl PositionalIo for File {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), DbError> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)?;
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), DbError> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg() -> StorageConfig {
        StorageConfig { page_size: 4096, initial_size: 4, read_only: false }
    }

    #[test]
    fn create_then_open_round_trips_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.blite");
        let pf = PageFile::create(&path, cfg()).unwrap();
        let id = pf.allocate_page().unwrap();
        let mut buf = vec![0x42u8; 4096];
        pf.write_page(id, &buf).unwrap();
        pf.flush().unwrap();
        drop(pf);

        let pf2 = PageFile::open(&path, cfg()).unwrap();
        let mut back = vec![0u8; 4096];
        pf2.read_page(id, &mut back).unwrap();
        assert_eq!(back, buf);
        buf.fill(0x42);
    }

    #[test]
    fn allocate_grows_the_file_geometrically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t2.blite");
        let pf = PageFile::create(&path, StorageConfig { initial_size: 1, ..cfg() }).unwrap();
        let before = pf.page_count();
        for _ in 0..20 {
            pf.allocate_page().unwrap();
        }
        assert!(pf.page_count() > before);
    }

    #[test]
    fn freed_pages_are_reused_before_growing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t3.blite");
        let pf = PageFile::create(&path, cfg()).unwrap();
        let a = pf.allocate_page().unwrap();
        pf.free_page(a).unwrap();
        let count_before = pf.page_count();
        let b = pf.allocate_page().unwrap();
        assert_eq!(a, b);
        assert_eq!(pf.page_count(), count_before);
    }

    #[test]
    fn open_rejects_page_size_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t4.blite");
        PageFile::create(&path, cfg()).unwrap();
        let err = PageFile::open(&path, StorageConfig { page_size: 8192, ..cfg() });
        assert!(err.is_err());
    }
}
