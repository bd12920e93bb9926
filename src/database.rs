//! # Database Handle
//!
//! [`Db`] bundles everything one open file needs: the file manager, and
//! an in-memory name→handle cache over the metatable. Creation bootstraps
//! the superblock plus the two system collections (metatable directory
//! and varchar heap); opening validates the superblock and rebuilds the
//! cache from the directory.
//!
//! The engine is single-threaded: no operation suspends and nothing
//! locks internally. Callers that want to share a handle across threads
//! wrap it in [`SharedDb`], which publishes a mutex at the handle
//! boundary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use zerocopy::IntoBytes;

use crate::error::{err, ErrorKind};
use crate::metatable::{self, TableHeader, TABLE_HEADER_SIZE};
use crate::schema::{Schema, MAX_NAME};
use crate::storage::{capacity_for, pool, superblock, Chblix, FileManager, Superblock, MIN_BLOCK_SIZE};
use crate::table::Table;

/// Default payload bytes per varchar heap block.
pub const DEFAULT_HEAP_GRAIN: u64 = 64;

/// Creation-time knobs. An existing file's recorded values always win
/// over options passed to `open`.
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Payload bytes per varchar heap block.
    pub heap_grain: u64,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            heap_grain: DEFAULT_HEAP_GRAIN,
        }
    }
}

/// One open database file.
#[derive(Debug)]
pub struct Db {
    fm: FileManager,
    names: HashMap<String, Chblix>,
}

impl Db {
    /// Creates a fresh database file with default options, truncating any
    /// existing content at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with(path, DbOptions::default())
    }

    pub fn create_with<P: AsRef<Path>>(path: P, options: DbOptions) -> Result<Self> {
        let grain = options.heap_grain as i64;
        ensure!(
            grain >= 1 && capacity_for(grain + 16) >= 1,
            err(
                ErrorKind::Alloc,
                format!("heap grain {} does not fit in a page", grain)
            )
        );

        let mut fm = FileManager::create(path)?;
        fm.write(0, 0, Superblock::new(options.heap_grain).as_bytes())?;

        let metatable_root = pool::chunk_init(&mut fm, TABLE_HEADER_SIZE as i64)?;
        let heap_root = pool::chunk_init(&mut fm, grain + 16)?;
        superblock::update(&mut fm, |sb| {
            sb.set_metatable_root(metatable_root);
            sb.set_varchar_heap_root(heap_root);
        })?;

        Ok(Self {
            fm,
            names: HashMap::new(),
        })
    }

    /// Opens an existing database, validating the superblock and warming
    /// the name cache from the metatable.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let fm = FileManager::open(path)?;
        superblock::read(&fm)?;

        let mut names = HashMap::new();
        for (at, header) in metatable::all(&fm)? {
            names.insert(header.name(), at);
        }

        Ok(Self { fm, names })
    }

    /// Opens `path` when it already holds data, creates it otherwise.
    pub fn open_or_create<P: AsRef<Path>>(path: P, options: DbOptions) -> Result<Self> {
        match std::fs::metadata(path.as_ref()) {
            Ok(meta) if meta.len() > 0 => Self::open(path),
            _ => Self::create_with(path, options),
        }
    }

    /// Creates a table from a built schema and registers its name.
    pub fn create_table(&mut self, name: &str, schema: Schema) -> Result<Table> {
        ensure!(
            !name.is_empty() && name.len() < MAX_NAME,
            err(
                ErrorKind::Schema,
                format!("table name '{}' must be 1..{} bytes", name, MAX_NAME)
            )
        );
        ensure!(
            !schema.is_empty(),
            err(ErrorKind::Schema, "a table needs at least one field")
        );

        let slot_size = schema.slot_size();
        let block_size = slot_size.max(MIN_BLOCK_SIZE);
        ensure!(
            capacity_for(block_size) >= 1,
            err(
                ErrorKind::Alloc,
                format!("row slot of {} bytes does not fit in a page", slot_size)
            )
        );

        // Collision is detected before any chunk is carved.
        ensure!(
            !self.names.contains_key(name) && metatable::find(&self.fm, name)?.is_none(),
            err(
                ErrorKind::NameCollision,
                format!("table '{}' already exists", name)
            )
        );

        let schema_root = schema.save(&mut self.fm)?;
        let row_root = pool::chunk_init(&mut self.fm, block_size)?;

        let header = TableHeader::new(name, schema_root, row_root, slot_size);
        let handle = metatable::add(&mut self.fm, &header)?;
        self.names.insert(name.to_string(), handle);

        Ok(Table::new(handle, header, schema))
    }

    /// Looks a table up by name; `Ok(None)` when it does not exist.
    pub fn open_table(&self, name: &str) -> Result<Option<Table>> {
        let found = match self.names.get(name) {
            Some(&at) => Some((at, metatable::read(&self.fm, at)?)),
            None => metatable::find(&self.fm, name)?,
        };

        match found {
            Some((at, header)) => {
                let schema = Schema::load(&self.fm, header.schema_root())?;
                Ok(Some(Table::new(at, header, schema)))
            }
            None => Ok(None),
        }
    }

    /// Drops a table: varchar chains, row chain, schema chain, and the
    /// directory entry all go. Dropping through a stale handle (already
    /// dropped) is an invalid-handle error, not a crash.
    pub fn drop_table(&mut self, table: &Table) -> Result<()> {
        let handle = table.handle();
        let header = metatable::read(&self.fm, handle)?;
        let schema = Schema::load(&self.fm, header.schema_root())?;

        if schema
            .fields()
            .iter()
            .any(|f| f.dtype == crate::types::DataType::Varchar)
        {
            let mut cursor = pool::BlockCursor::new(header.row_root());
            let mut slot = vec![0u8; header.slot_size() as usize];
            while let Some(at) = cursor.next(&self.fm)? {
                pool::read_block(&self.fm, at, &mut slot)?;
                crate::table::free_varchar_chains(&mut self.fm, &schema, &slot)?;
            }
        }

        pool::destroy_chain(&mut self.fm, header.row_root())?;
        Schema::destroy(&mut self.fm, header.schema_root())?;
        metatable::remove(&mut self.fm, handle)?;
        self.names.remove(&header.name());
        Ok(())
    }

    /// Registered table names, directory order.
    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(metatable::all(&self.fm)?
            .into_iter()
            .map(|(_, h)| h.name())
            .collect())
    }

    /// Schedules an asynchronous flush of all dirty pages.
    pub fn sync(&self) -> Result<()> {
        self.fm.sync()
    }

    /// Blocking flush and close; all writes are durable on return.
    pub fn close(self) -> Result<()> {
        self.fm.close()
    }

    /// Closes and deletes the backing file.
    pub fn destroy(self) -> Result<()> {
        self.fm.unlink()
    }

    pub fn path(&self) -> PathBuf {
        self.fm.path().to_path_buf()
    }

    /// Current file size in pages (superblock included).
    pub fn page_count(&self) -> i64 {
        self.fm.page_count()
    }

    pub(crate) fn fm(&self) -> &FileManager {
        &self.fm
    }

    pub(crate) fn fm_mut(&mut self) -> &mut FileManager {
        &mut self.fm
    }
}

/// A [`Db`] behind a mutex, for callers that share one handle across
/// threads. Every operation takes the lock for its full duration; the
/// engine itself stays single-threaded.
#[derive(Clone)]
pub struct SharedDb {
    inner: Arc<Mutex<Db>>,
}

impl SharedDb {
    pub fn new(db: Db) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Runs `f` with exclusive access to the database.
    pub fn with<R>(&self, f: impl FnOnce(&mut Db) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn scratch() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::create(dir.path().join("db.cdb")).unwrap();
        (dir, db)
    }

    fn student_schema() -> Schema {
        let mut s = Schema::new();
        s.add_field(Field::int64("ID")).unwrap();
        s.add_field(Field::char("NAME", 10)).unwrap();
        s
    }

    #[test]
    fn create_bootstraps_system_collections() {
        let (_dir, db) = scratch();
        let sb = superblock::read(db.fm()).unwrap();

        assert_eq!(sb.metatable_root(), 1);
        assert_eq!(sb.varchar_heap_root(), 2);
        assert_eq!(sb.heap_grain(), DEFAULT_HEAP_GRAIN);
    }

    #[test]
    fn create_table_then_open_table() {
        let (_dir, mut db) = scratch();
        db.create_table("students", student_schema()).unwrap();

        let t = db.open_table("students").unwrap().unwrap();
        assert_eq!(t.name(), "students");
        assert_eq!(t.schema().slot_size(), 18);
        assert_eq!(t.row_count(), 0);
    }

    #[test]
    fn missing_table_is_none() {
        let (_dir, db) = scratch();
        assert!(db.open_table("ghost").unwrap().is_none());
    }

    #[test]
    fn duplicate_table_name_is_a_collision() {
        let (_dir, mut db) = scratch();
        db.create_table("t", student_schema()).unwrap();

        let e = db.create_table("t", student_schema()).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::NameCollision));
    }

    #[test]
    fn empty_schema_is_a_schema_error() {
        let (_dir, mut db) = scratch();
        let e = db.create_table("t", Schema::new()).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::Schema));
    }

    #[test]
    fn oversized_slot_is_an_alloc_error() {
        let (_dir, mut db) = scratch();
        let mut s = Schema::new();
        s.add_field(Field::char("BLOB", 8000)).unwrap();

        let e = db.create_table("t", s).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::Alloc));
    }

    #[test]
    fn double_drop_is_an_invalid_handle() {
        let (_dir, mut db) = scratch();
        let t = db.create_table("t", student_schema()).unwrap();

        db.drop_table(&t).unwrap();
        let e = db.drop_table(&t).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::InvalidHandle));
    }

    #[test]
    fn dropped_table_pages_are_recycled() {
        let (_dir, mut db) = scratch();
        let t = db.create_table("t", student_schema()).unwrap();
        let pages = db.fm().page_count();

        db.drop_table(&t).unwrap();
        db.create_table("u", student_schema()).unwrap();

        // The new table's schema and row chunks reuse the dropped pages.
        assert_eq!(db.fm().page_count(), pages);
    }

    #[test]
    fn table_names_lists_directory() {
        let (_dir, mut db) = scratch();
        db.create_table("a", student_schema()).unwrap();
        db.create_table("b", student_schema()).unwrap();

        assert_eq!(db.table_names().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn shared_db_serializes_access() {
        let (_dir, db) = scratch();
        let shared = SharedDb::new(db);
        let names = shared.with(|db| {
            db.create_table("t", student_schema()).unwrap();
            db.table_names().unwrap()
        });
        assert_eq!(names, vec!["t"]);
    }
}
