//! # Schema Catalog
//!
//! A schema is an ordered list of typed fields describing a row layout.
//! In memory it is a builder that assigns offsets as fields are added; on
//! disk it is a linked-block collection of fixed-size field records whose
//! root chunk index identifies the schema.
//!
//! ## Field Record Layout (88 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------
//! 0       64    name, NUL-padded
//! 64      1     datatype tag
//! 65      7     reserved
//! 72      8     declared size (i64 LE)
//! 80      8     slot offset (i64 LE)
//! ```

use eyre::{ensure, Result};
use zerocopy::little_endian::I64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{err, ErrorKind};
use crate::storage::{pool, FileManager};
use crate::types::DataType;

/// Field and table names are stored in fixed 64-byte slots, NUL-padded.
pub const MAX_NAME: usize = 64;

const FIELD_RECORD_SIZE: usize = 88;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct FieldRecord {
    name: [u8; MAX_NAME],
    datatype: u8,
    reserved: [u8; 7],
    size: I64,
    offset: I64,
}

const _: () = assert!(std::mem::size_of::<FieldRecord>() == FIELD_RECORD_SIZE);

/// One typed column: name, datatype, declared byte width, and the byte
/// offset of its value within a row slot (assigned by [`Schema`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub dtype: DataType,
    pub size: i64,
    pub offset: i64,
}

impl Field {
    fn fixed(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            size: dtype.fixed_size().expect("fixed-width datatype"),
            dtype,
            offset: 0,
        }
    }

    pub fn int64(name: impl Into<String>) -> Self {
        Self::fixed(name, DataType::Int64)
    }

    pub fn float32(name: impl Into<String>) -> Self {
        Self::fixed(name, DataType::Float32)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::fixed(name, DataType::Bool)
    }

    pub fn varchar(name: impl Into<String>) -> Self {
        Self::fixed(name, DataType::Varchar)
    }

    /// A CHAR(n) field: exactly `n` bytes, NUL-padded on the right.
    pub fn char(name: impl Into<String>, n: i64) -> Self {
        Self {
            name: name.into(),
            dtype: DataType::Char,
            size: n,
            offset: 0,
        }
    }
}

/// Ordered field list with precomputed offsets and slot size.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
    slot_size: i64,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field at the current end of the slot. Duplicate names,
    /// empty or over-long names, and non-positive CHAR widths are schema
    /// errors.
    pub fn add_field(&mut self, mut field: Field) -> Result<()> {
        ensure!(
            !field.name.is_empty() && field.name.len() < MAX_NAME,
            err(
                ErrorKind::Schema,
                format!("field name '{}' must be 1..{} bytes", field.name, MAX_NAME)
            )
        );
        ensure!(
            field.size > 0,
            err(
                ErrorKind::Schema,
                format!("field '{}' has non-positive size {}", field.name, field.size)
            )
        );
        ensure!(
            self.field(&field.name).is_none(),
            err(
                ErrorKind::Schema,
                format!("duplicate field name '{}'", field.name)
            )
        );

        field.offset = self.slot_size;
        self.slot_size += field.size;
        self.fields.push(field);
        Ok(())
    }

    /// Appends a field without the duplicate-name check. Join output
    /// schemas keep colliding names from both sides and are addressed
    /// positionally; everything else goes through [`Schema::add_field`].
    pub(crate) fn add_field_positional(&mut self, mut field: Field) {
        field.offset = self.slot_size;
        self.slot_size += field.size;
        self.fields.push(field);
    }

    /// Linear lookup by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn slot_size(&self) -> i64 {
        self.slot_size
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Persists the field list as a fresh record chain; returns its root.
    pub(crate) fn save(&self, fm: &mut FileManager) -> Result<i64> {
        let root = pool::chunk_init(fm, FIELD_RECORD_SIZE as i64)?;
        for field in &self.fields {
            let mut rec = FieldRecord {
                name: [0u8; MAX_NAME],
                datatype: field.dtype as u8,
                reserved: [0u8; 7],
                size: I64::new(field.size),
                offset: I64::new(field.offset),
            };
            rec.name[..field.name.len()].copy_from_slice(field.name.as_bytes());

            let at = pool::alloc(fm, root)?;
            pool::write_block(fm, at, rec.as_bytes())?;
        }
        Ok(root)
    }

    /// Rebuilds a schema from its record chain.
    pub(crate) fn load(fm: &FileManager, root: i64) -> Result<Schema> {
        let mut schema = Schema::new();
        let mut cursor = pool::BlockCursor::new(root);
        let mut buf = [0u8; FIELD_RECORD_SIZE];

        while let Some(at) = cursor.next(fm)? {
            pool::read_block(fm, at, &mut buf)?;
            let rec: &FieldRecord = FieldRecord::ref_from_bytes(&buf)
                .map_err(|e| eyre::eyre!("failed to parse FieldRecord: {:?}", e))?;

            let end = rec.name.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            let name = String::from_utf8_lossy(&rec.name[..end]).into_owned();
            let stored_offset = rec.offset.get();

            ensure!(
                stored_offset == schema.slot_size,
                err(
                    ErrorKind::Schema,
                    format!(
                        "field '{}' offset {} does not continue the slot layout at {}",
                        name, stored_offset, schema.slot_size
                    )
                )
            );
            ensure!(
                rec.size.get() > 0,
                err(
                    ErrorKind::Schema,
                    format!("field '{}' has non-positive size {}", name, rec.size.get())
                )
            );

            // Positional append: join schemas legitimately repeat names.
            schema.add_field_positional(Field {
                name,
                dtype: DataType::from_byte(rec.datatype)?,
                size: rec.size.get(),
                offset: 0,
            });
        }

        Ok(schema)
    }

    /// Frees a persisted schema's record chain.
    pub(crate) fn destroy(fm: &mut FileManager, root: i64) -> Result<()> {
        pool::destroy_chain(fm, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Superblock;

    #[test]
    fn offsets_are_strictly_increasing() {
        let mut s = Schema::new();
        s.add_field(Field::int64("ID")).unwrap();
        s.add_field(Field::char("NAME", 10)).unwrap();
        s.add_field(Field::float32("SCORE")).unwrap();
        s.add_field(Field::bool("PASS")).unwrap();

        let offsets: Vec<_> = s.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 18, 22]);
        assert_eq!(s.slot_size(), 23);
    }

    #[test]
    fn duplicate_field_is_a_schema_error() {
        let mut s = Schema::new();
        s.add_field(Field::int64("ID")).unwrap();

        let e = s.add_field(Field::float32("ID")).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::Schema));
    }

    #[test]
    fn empty_name_is_a_schema_error() {
        let mut s = Schema::new();
        let e = s.add_field(Field::int64("")).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::Schema));
    }

    #[test]
    fn varchar_field_is_ticket_sized() {
        let mut s = Schema::new();
        s.add_field(Field::varchar("BIO")).unwrap();
        assert_eq!(s.slot_size(), 24);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut fm = FileManager::create(dir.path().join("schema.cdb")).unwrap();
        fm.write(0, 0, Superblock::new(64).as_bytes()).unwrap();

        let mut s = Schema::new();
        s.add_field(Field::int64("ID")).unwrap();
        s.add_field(Field::char("NAME", 10)).unwrap();
        s.add_field(Field::varchar("BIO")).unwrap();

        let root = s.save(&mut fm).unwrap();
        let loaded = Schema::load(&fm, root).unwrap();

        assert_eq!(loaded.slot_size(), s.slot_size());
        assert_eq!(loaded.fields(), s.fields());
    }

    #[test]
    fn field_lookup_is_by_name() {
        let mut s = Schema::new();
        s.add_field(Field::int64("ID")).unwrap();
        s.add_field(Field::char("NAME", 10)).unwrap();

        assert_eq!(s.field("NAME").unwrap().offset, 8);
        assert!(s.field("MISSING").is_none());
    }
}
