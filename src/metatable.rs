//! # Metatable
//!
//! The name→table directory: a well-known collection rooted in the
//! superblock whose rows are 96-byte [`TableHeader`] records. The header
//! record *is* the table: its chblix is the table's identity, and the
//! scalar "table index" view of a table is simply its row-chain root.
//!
//! Names are unique; registering an existing name is a collision error.
//! Lookup is a linear scan of the chain; the `Db` layer keeps a hash map
//! cache on top, but this chain is the persistent truth.
//!
//! ## Table Header Record (96 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------
//! 0       64    table name, NUL-padded
//! 64      8     schema root chunk (i64 LE)
//! 72      8     row-chain root chunk (i64 LE)
//! 80      8     slot size (i64 LE)
//! 88      8     row count (i64 LE)
//! ```

use eyre::{ensure, Result};
use zerocopy::little_endian::I64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{err, ErrorKind};
use crate::schema::MAX_NAME;
use crate::storage::{pool, superblock, Chblix, FileManager};

pub(crate) const TABLE_HEADER_SIZE: usize = 96;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct TableHeader {
    name: [u8; MAX_NAME],
    schema_root: I64,
    row_root: I64,
    slot_size: I64,
    row_count: I64,
}

const _: () = assert!(std::mem::size_of::<TableHeader>() == TABLE_HEADER_SIZE);

impl TableHeader {
    pub fn new(name: &str, schema_root: i64, row_root: i64, slot_size: i64) -> Self {
        let mut bytes = [0u8; MAX_NAME];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            name: bytes,
            schema_root: I64::new(schema_root),
            row_root: I64::new(row_root),
            slot_size: I64::new(slot_size),
            row_count: I64::new(0),
        }
    }

    pub fn name(&self) -> String {
        let end = self.name.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn schema_root(&self) -> i64 {
        self.schema_root.get()
    }

    pub fn row_root(&self) -> i64 {
        self.row_root.get()
    }

    pub fn set_row_root(&mut self, root: i64) {
        self.row_root = I64::new(root);
    }

    pub fn slot_size(&self) -> i64 {
        self.slot_size.get()
    }

    pub fn row_count(&self) -> i64 {
        self.row_count.get()
    }

    pub fn set_row_count(&mut self, n: i64) {
        self.row_count = I64::new(n);
    }
}

fn root(fm: &FileManager) -> Result<i64> {
    Ok(superblock::read(fm)?.metatable_root())
}

/// Registers a table header. The name must not already be present.
pub fn add(fm: &mut FileManager, header: &TableHeader) -> Result<Chblix> {
    let name = header.name();
    ensure!(
        find(fm, &name)?.is_none(),
        err(
            ErrorKind::NameCollision,
            format!("table '{}' already exists", name)
        )
    );

    let root = root(fm)?;
    let at = pool::alloc(fm, root)?;
    pool::write_block(fm, at, header.as_bytes())?;
    Ok(at)
}

/// Linear scan for a name; `Ok(None)` when absent.
pub fn find(fm: &FileManager, name: &str) -> Result<Option<(Chblix, TableHeader)>> {
    let mut cursor = pool::BlockCursor::new(root(fm)?);
    while let Some(at) = cursor.next(fm)? {
        let header = read_at(fm, at)?;
        if header.name() == name {
            return Ok(Some((at, header)));
        }
    }
    Ok(None)
}

/// Reads a header record through its handle, validating it still names a
/// live directory row.
pub fn read(fm: &FileManager, at: Chblix) -> Result<TableHeader> {
    ensure!(
        pool::is_member(fm, root(fm)?, at)?,
        err(
            ErrorKind::InvalidHandle,
            format!("({}, {}) is not a live metatable row", at.chunk, at.block)
        )
    );
    read_at(fm, at)
}

fn read_at(fm: &FileManager, at: Chblix) -> Result<TableHeader> {
    let mut buf = [0u8; TABLE_HEADER_SIZE];
    pool::read_block(fm, at, &mut buf)?;
    let header: &TableHeader = TableHeader::ref_from_bytes(&buf)
        .map_err(|e| eyre::eyre!("failed to parse TableHeader: {:?}", e))?;
    Ok(*header)
}

/// Rewrites a header record in place (row counters, root moves).
pub fn update(fm: &mut FileManager, at: Chblix, header: &TableHeader) -> Result<()> {
    ensure!(
        pool::is_member(fm, root(fm)?, at)?,
        err(
            ErrorKind::InvalidHandle,
            format!("({}, {}) is not a live metatable row", at.chunk, at.block)
        )
    );
    pool::write_block(fm, at, header.as_bytes())
}

/// Unregisters a table. The metatable root moves through the superblock
/// if the directory's head chunk drains.
pub fn remove(fm: &mut FileManager, at: Chblix) -> Result<()> {
    let mut chain_root = root(fm)?;
    let old_root = chain_root;
    pool::free(fm, &mut chain_root, at)?;
    if chain_root != old_root {
        superblock::update(fm, |sb| sb.set_metatable_root(chain_root))?;
    }
    Ok(())
}

/// Yields every registered `(handle, header)` pair, directory order.
pub fn all(fm: &FileManager) -> Result<Vec<(Chblix, TableHeader)>> {
    let mut out = Vec::new();
    let mut cursor = pool::BlockCursor::new(root(fm)?);
    while let Some(at) = cursor.next(fm)? {
        out.push((at, read_at(fm, at)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Superblock;

    fn scratch() -> (tempfile::TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        let mut fm = FileManager::create(dir.path().join("meta.cdb")).unwrap();
        fm.write(0, 0, Superblock::new(64).as_bytes()).unwrap();
        let root = pool::chunk_init(&mut fm, TABLE_HEADER_SIZE as i64).unwrap();
        superblock::update(&mut fm, |sb| sb.set_metatable_root(root)).unwrap();
        (dir, fm)
    }

    #[test]
    fn add_then_find_returns_the_header() {
        let (_dir, mut fm) = scratch();
        let header = TableHeader::new("users", 5, 6, 32);

        let at = add(&mut fm, &header).unwrap();
        let (found_at, found) = find(&fm, "users").unwrap().unwrap();

        assert_eq!(found_at, at);
        assert_eq!(found.name(), "users");
        assert_eq!(found.schema_root(), 5);
        assert_eq!(found.row_root(), 6);
        assert_eq!(found.slot_size(), 32);
        assert_eq!(found.row_count(), 0);
    }

    #[test]
    fn duplicate_name_is_a_collision() {
        let (_dir, mut fm) = scratch();
        add(&mut fm, &TableHeader::new("t", 1, 2, 8)).unwrap();

        let e = add(&mut fm, &TableHeader::new("t", 3, 4, 8)).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::NameCollision));
    }

    #[test]
    fn missing_name_is_not_an_error() {
        let (_dir, fm) = scratch();
        assert!(find(&fm, "ghost").unwrap().is_none());
    }

    #[test]
    fn update_persists_the_row_count() {
        let (_dir, mut fm) = scratch();
        let at = add(&mut fm, &TableHeader::new("t", 1, 2, 8)).unwrap();

        let mut header = read(&fm, at).unwrap();
        header.set_row_count(41);
        update(&mut fm, at, &header).unwrap();

        assert_eq!(read(&fm, at).unwrap().row_count(), 41);
    }

    #[test]
    fn removed_row_is_an_invalid_handle() {
        let (_dir, mut fm) = scratch();
        let at = add(&mut fm, &TableHeader::new("t", 1, 2, 8)).unwrap();
        remove(&mut fm, at).unwrap();

        assert!(find(&fm, "t").unwrap().is_none());
        let e = read(&fm, at).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::InvalidHandle));
    }

    #[test]
    fn all_lists_directory_order() {
        let (_dir, mut fm) = scratch();
        add(&mut fm, &TableHeader::new("a", 1, 2, 8)).unwrap();
        add(&mut fm, &TableHeader::new("b", 3, 4, 8)).unwrap();

        let names: Vec<_> = all(&fm).unwrap().iter().map(|(_, h)| h.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
