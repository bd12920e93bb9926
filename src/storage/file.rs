//! # Memory-Mapped File Manager
//!
//! One database, one file. `FileManager` owns the file handle and a
//! whole-file memory mapping, and is the only component that touches the
//! OS. Everything above it consumes pages as bounds-checked byte slices.
//!
//! ## Design
//!
//! Traditional engines copy page data between kernel buffers and a
//! user-space page cache. Mapping the file into the address space skips
//! that copy and leans on the OS page cache instead. The file only ever
//! grows, one page at a time, by `set_len` + remap.
//!
//! ## Safety Model
//!
//! A remap (during [`FileManager::new_page`]) invalidates every slice that
//! was handed out before it. Rather than runtime guards, the borrow
//! checker enforces the rule at compile time:
//!
//! ```text
//! page(&self) -> &[u8]              // shared borrow of the manager
//! page_mut(&mut self) -> &mut [u8]  // exclusive borrow
//! new_page(&mut self)               // exclusive borrow, no slice survives
//! ```
//!
//! Callers that need data across an allocation copy it out first; the
//! block layer does exactly that at its read/write boundary.
//!
//! ## Durability
//!
//! Block writes schedule an asynchronous flush of the touched page
//! ([`FileManager::sync_page`]); [`FileManager::close`] performs one
//! blocking flush. After `close` returns, all prior writes are durable.
//! No ordering is promised across a crash.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use crate::error::{err, ErrorKind};

use super::PAGE_SIZE;

#[derive(Debug)]
pub struct FileManager {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    page_count: i64,
}

impl FileManager {
    /// Opens an existing database file. The file must be non-empty and a
    /// whole number of pages; superblock validation is the caller's job.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err(ErrorKind::Io)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err(ErrorKind::Io)
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            file_size > 0,
            err(
                ErrorKind::Io,
                format!("'{}' is empty, not a database", path.display())
            )
        );

        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            err(
                ErrorKind::Io,
                format!(
                    "'{}' size {} is not a multiple of page size {}",
                    path.display(),
                    file_size,
                    PAGE_SIZE
                )
            )
        );

        // SAFETY: map_mut is unsafe because the file could be modified
        // externally. The file is opened read+write by this process and
        // database files are single-owner; all access goes through
        // page()/page_mut() which bounds-check the page index.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err(ErrorKind::Io)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
            page_count: (file_size / PAGE_SIZE as u64) as i64,
        })
    }

    /// Creates a fresh single-page database file, truncating any existing
    /// content. Page 0 comes back zeroed; the caller writes the superblock.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err(ErrorKind::Io)
            .wrap_err_with(|| format!("failed to create database file '{}'", path.display()))?;

        file.set_len(PAGE_SIZE as u64)
            .wrap_err(ErrorKind::Io)
            .wrap_err_with(|| format!("failed to size '{}'", path.display()))?;

        // SAFETY: the file was just created with exclusive access and sized
        // to exactly one page; see open() for the access discipline.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err(ErrorKind::Io)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
            page_count: 1,
        })
    }

    /// Extends the file by exactly one page and returns its index.
    pub fn new_page(&mut self) -> Result<i64> {
        let new_count = self.page_count + 1;
        let new_size = new_count as u64 * PAGE_SIZE as u64;

        self.mmap
            .flush_async()
            .wrap_err(ErrorKind::Io)
            .wrap_err("failed to flush mapping before growth")?;

        self.file
            .set_len(new_size)
            .wrap_err(ErrorKind::Alloc)
            .wrap_err_with(|| format!("failed to extend '{}' to {} bytes", self.path.display(), new_size))?;

        // SAFETY: new_page takes &mut self, so no page slice can be live
        // across this remap; the old mapping was flushed and the file was
        // extended before the new one is created.
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file)
                .wrap_err(ErrorKind::Io)
                .wrap_err("failed to remap file after growth")?
        };

        self.page_count = new_count;
        Ok(new_count - 1)
    }

    pub fn page(&self, page_no: i64) -> Result<&[u8]> {
        ensure!(
            page_no >= 0 && page_no < self.page_count,
            err(
                ErrorKind::InvalidHandle,
                format!("page {} out of bounds (page_count={})", page_no, self.page_count)
            )
        );

        let offset = page_no as usize * PAGE_SIZE;
        Ok(&self.mmap[offset..offset + PAGE_SIZE])
    }

    pub fn page_mut(&mut self, page_no: i64) -> Result<&mut [u8]> {
        ensure!(
            page_no >= 0 && page_no < self.page_count,
            err(
                ErrorKind::InvalidHandle,
                format!("page {} out of bounds (page_count={})", page_no, self.page_count)
            )
        );

        let offset = page_no as usize * PAGE_SIZE;
        Ok(&mut self.mmap[offset..offset + PAGE_SIZE])
    }

    /// Copies bytes out of a page.
    pub fn read(&self, page_no: i64, offset: usize, dst: &mut [u8]) -> Result<()> {
        ensure!(
            offset + dst.len() <= PAGE_SIZE,
            err(
                ErrorKind::InvalidHandle,
                format!("read of {} bytes at {} crosses the page boundary", dst.len(), offset)
            )
        );
        let page = self.page(page_no)?;
        dst.copy_from_slice(&page[offset..offset + dst.len()]);
        Ok(())
    }

    /// Copies bytes into a page and schedules an asynchronous flush of it.
    pub fn write(&mut self, page_no: i64, offset: usize, src: &[u8]) -> Result<()> {
        ensure!(
            offset + src.len() <= PAGE_SIZE,
            err(
                ErrorKind::InvalidHandle,
                format!("write of {} bytes at {} crosses the page boundary", src.len(), offset)
            )
        );
        let page = self.page_mut(page_no)?;
        page[offset..offset + src.len()].copy_from_slice(src);
        self.sync_page(page_no)
    }

    /// Asynchronous flush of one page.
    pub fn sync_page(&self, page_no: i64) -> Result<()> {
        self.mmap
            .flush_async_range(page_no as usize * PAGE_SIZE, PAGE_SIZE)
            .wrap_err(ErrorKind::Io)
            .wrap_err_with(|| format!("failed to schedule flush of page {}", page_no))
    }

    /// Asynchronous flush of the whole mapping.
    pub fn sync(&self) -> Result<()> {
        self.mmap
            .flush_async()
            .wrap_err(ErrorKind::Io)
            .wrap_err("failed to schedule flush")
    }

    /// Blocking flush; everything written so far is durable on return.
    pub fn sync_all(&self) -> Result<()> {
        self.mmap
            .flush()
            .wrap_err(ErrorKind::Io)
            .wrap_err("failed to flush mapping to disk")
    }

    /// Flushes and releases the file.
    pub fn close(self) -> Result<()> {
        self.sync_all()
    }

    /// Flushes nothing: unmaps, closes, and deletes the backing file.
    pub fn unlink(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(&path)
            .wrap_err(ErrorKind::Io)
            .wrap_err_with(|| format!("failed to delete '{}'", path.display()))
    }

    pub fn page_count(&self) -> i64 {
        self.page_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hints the kernel that a page range is about to be scanned.
    pub fn prefetch_pages(&self, start_page: i64, count: i64) {
        if start_page < 0 || start_page >= self.page_count {
            return;
        }

        let end_page = (start_page + count).min(self.page_count);
        let start_offset = start_page as usize * PAGE_SIZE;
        let len = (end_page - start_page) as usize * PAGE_SIZE;

        #[cfg(unix)]
        // SAFETY: the range was clamped to the mapping above; madvise with
        // MADV_WILLNEED is advisory and does not fault.
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().add(start_offset) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }
        #[cfg(not(unix))]
        let _ = (start_offset, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.cdb");
        (dir, path)
    }

    #[test]
    fn create_makes_one_zeroed_page() {
        let (_dir, path) = scratch();
        let fm = FileManager::create(&path).unwrap();

        assert_eq!(fm.page_count(), 1);
        assert!(fm.page(0).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn new_page_returns_sequential_indices() {
        let (_dir, path) = scratch();
        let mut fm = FileManager::create(&path).unwrap();

        assert_eq!(fm.new_page().unwrap(), 1);
        assert_eq!(fm.new_page().unwrap(), 2);
        assert_eq!(fm.page_count(), 3);
    }

    #[test]
    fn writes_survive_close_and_reopen() {
        let (_dir, path) = scratch();
        let mut fm = FileManager::create(&path).unwrap();
        fm.new_page().unwrap();
        fm.write(1, 100, b"persisted").unwrap();
        fm.close().unwrap();

        let fm = FileManager::open(&path).unwrap();
        let mut buf = [0u8; 9];
        fm.read(1, 100, &mut buf).unwrap();
        assert_eq!(&buf, b"persisted");
    }

    #[test]
    fn open_rejects_empty_file() {
        let (_dir, path) = scratch();
        std::fs::File::create(&path).unwrap();

        let e = FileManager::open(&path).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::Io));
    }

    #[test]
    fn page_out_of_bounds_is_invalid_handle() {
        let (_dir, path) = scratch();
        let fm = FileManager::create(&path).unwrap();

        let e = fm.page(7).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::InvalidHandle));
    }

    #[test]
    fn unlink_removes_the_file() {
        let (_dir, path) = scratch();
        let fm = FileManager::create(&path).unwrap();
        fm.unlink().unwrap();

        assert!(!path.exists());
    }

    #[test]
    fn cross_page_write_is_rejected() {
        let (_dir, path) = scratch();
        let mut fm = FileManager::create(&path).unwrap();

        let e = fm.write(0, PAGE_SIZE - 2, b"abcd").unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::InvalidHandle));
    }
}
