//! # Table Engine
//!
//! A table is a header record in the metatable plus a row chain whose
//! block size equals the schema's slot size. [`Table`] is a lightweight
//! handle over both: it caches the header and schema, but re-reads the
//! header through its metatable row on every operation, so stale handles
//! (a dropped table, an aliased handle after deletes) are caught as
//! invalid-handle errors instead of corrupting anything.
//!
//! Varchar fields are resolved at this layer: insert and update allocate
//! heap tickets, delete and drop free them, reads materialize them into
//! owned strings. The slot itself only ever carries the 24-byte ticket.

use eyre::{ensure, Result};
use zerocopy::{FromBytes, IntoBytes};

use crate::database::Db;
use crate::error::{err, ErrorKind};
use crate::heap::{self, VchTicket};
use crate::metatable::{self, TableHeader};
use crate::schema::{Field, Schema};
use crate::storage::{pool, Chblix, FileManager};
use crate::types::{compare, read_fixed, write_fixed, Condition, DataType, Value};

/// Handle to one table. Cheap to clone in the sense that reopening by
/// name yields an equivalent handle; all state of record lives in the
/// file.
#[derive(Debug)]
pub struct Table {
    handle: Chblix,
    header: TableHeader,
    schema: Schema,
}

impl Table {
    pub(crate) fn new(handle: Chblix, header: TableHeader, schema: Schema) -> Self {
        Self {
            handle,
            header,
            schema,
        }
    }

    pub fn name(&self) -> String {
        self.header.name()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Rows currently in the table, per the persisted counter.
    pub fn row_count(&self) -> i64 {
        self.header.row_count()
    }

    /// The metatable row identifying this table.
    pub fn handle(&self) -> Chblix {
        self.handle
    }

    fn current_header(&self, fm: &FileManager) -> Result<TableHeader> {
        metatable::read(fm, self.handle)
    }

    /// Inserts one row; returns the new row's handle. Value types are
    /// checked against the schema before anything is written.
    pub fn insert(&mut self, db: &mut Db, values: &[Value]) -> Result<Chblix> {
        check_row_types(&self.schema, values)?;

        let fm = db.fm_mut();
        let mut header = self.current_header(fm)?;

        let mut slot = vec![0u8; header.slot_size() as usize];
        encode_row(fm, &self.schema, values, &mut slot)?;

        let at = pool::alloc(fm, header.row_root())?;
        pool::write_block(fm, at, &slot)?;

        header.set_row_count(header.row_count() + 1);
        metatable::update(fm, self.handle, &header)?;
        self.header = header;
        Ok(at)
    }

    /// Reads a row back as typed values, dereferencing varchar tickets.
    pub fn row(&self, db: &Db, at: Chblix) -> Result<Vec<Value>> {
        let fm = db.fm();
        let header = self.current_header(fm)?;
        let slot = self.read_slot(fm, &header, at)?;
        decode_row(fm, &self.schema, &slot)
    }

    /// Copies a row's raw slot bytes into `buf` (`buf.len()` must equal
    /// the slot size).
    pub fn row_bytes(&self, db: &Db, at: Chblix, buf: &mut [u8]) -> Result<()> {
        let fm = db.fm();
        let header = self.current_header(fm)?;
        ensure!(
            buf.len() == header.slot_size() as usize,
            err(
                ErrorKind::Schema,
                format!(
                    "buffer of {} bytes does not match slot size {}",
                    buf.len(),
                    header.slot_size()
                )
            )
        );
        self.ensure_row(fm, &header, at)?;
        pool::read_block(fm, at, buf)
    }

    /// First row whose `field_name` equals `value`, in scan order;
    /// `Ok(None)` when nothing matches.
    pub fn get_row(&self, db: &Db, field_name: &str, value: &Value) -> Result<Option<Chblix>> {
        let fm = db.fm();
        let header = self.current_header(fm)?;
        let field = lookup_field(&self.schema, field_name)?;
        check_probe(field, value, Condition::Eq)?;

        let mut cursor = pool::BlockCursor::new(header.row_root());
        let mut slot = vec![0u8; header.slot_size() as usize];
        while let Some(at) = cursor.next(fm)? {
            pool::read_block(fm, at, &mut slot)?;
            let lhs = field_value(fm, field, &slot)?;
            if compare(&lhs, value, Condition::Eq)? {
                return Ok(Some(at));
            }
        }
        Ok(None)
    }

    /// Overwrites a whole row. Old varchar chains are released and new
    /// tickets written.
    pub fn update_row(&mut self, db: &mut Db, at: Chblix, values: &[Value]) -> Result<()> {
        check_row_types(&self.schema, values)?;

        let fm = db.fm_mut();
        let header = self.current_header(fm)?;
        let old = self.read_slot(fm, &header, at)?;
        free_varchar_chains(fm, &self.schema, &old)?;

        let mut slot = vec![0u8; header.slot_size() as usize];
        encode_row(fm, &self.schema, values, &mut slot)?;
        pool::write_block(fm, at, &slot)?;
        self.header = header;
        Ok(())
    }

    /// Overwrites a single field of a row.
    pub fn update_element(
        &mut self,
        db: &mut Db,
        at: Chblix,
        field_name: &str,
        value: &Value,
    ) -> Result<()> {
        let field = lookup_field(&self.schema, field_name)?.clone();
        check_field_type(&field, value)?;

        let fm = db.fm_mut();
        let header = self.current_header(fm)?;
        self.ensure_row(fm, &header, at)?;

        let offset = field.offset as usize;
        match value {
            Value::Varchar(s) => {
                let mut ticket_bytes = [0u8; 24];
                pool::read_block_at(fm, at, offset, &mut ticket_bytes)?;
                let old = VchTicket::read_from_bytes(&ticket_bytes[..])
                    .map_err(|e| eyre::eyre!("failed to parse VchTicket: {:?}", e))?;
                let fresh = heap::update(fm, &old, s.as_bytes())?;
                pool::write_block_at(fm, at, offset, fresh.as_bytes())?;
            }
            _ => {
                let mut buf = vec![0u8; field.size as usize];
                write_fixed(&mut buf, value)?;
                pool::write_block_at(fm, at, offset, &buf)?;
            }
        }
        self.header = header;
        Ok(())
    }

    /// Deletes a row, releasing its varchar chains.
    pub fn delete(&mut self, db: &mut Db, at: Chblix) -> Result<()> {
        self.delete_and_next(db, at).map(|_| ())
    }

    /// Delete that also reports the pre-delete successor chunk when the
    /// row's chunk drained and was unlinked; scan-and-delete operators
    /// use it to reposition their cursor.
    pub(crate) fn delete_and_next(&mut self, db: &mut Db, at: Chblix) -> Result<Option<i64>> {
        let fm = db.fm_mut();
        let mut header = self.current_header(fm)?;
        let slot = self.read_slot(fm, &header, at)?;
        free_varchar_chains(fm, &self.schema, &slot)?;

        let mut root = header.row_root();
        let next = pool::free(fm, &mut root, at)?;

        header.set_row_root(root);
        header.set_row_count(header.row_count() - 1);
        metatable::update(fm, self.handle, &header)?;
        self.header = header;
        Ok(next)
    }

    /// Cursor over the table's live rows, chunk order then block order.
    pub fn scan(&self, db: &Db) -> Result<RowCursor> {
        let header = self.current_header(db.fm())?;
        Ok(RowCursor {
            cursor: pool::BlockCursor::new(header.row_root()),
        })
    }

    fn ensure_row(&self, fm: &FileManager, header: &TableHeader, at: Chblix) -> Result<()> {
        ensure!(
            pool::is_member(fm, header.row_root(), at)?,
            err(
                ErrorKind::InvalidHandle,
                format!(
                    "({}, {}) is not a live row of table '{}'",
                    at.chunk,
                    at.block,
                    header.name()
                )
            )
        );
        Ok(())
    }

    fn read_slot(&self, fm: &FileManager, header: &TableHeader, at: Chblix) -> Result<Vec<u8>> {
        self.ensure_row(fm, header, at)?;
        let mut slot = vec![0u8; header.slot_size() as usize];
        pool::read_block(fm, at, &mut slot)?;
        Ok(slot)
    }
}

/// Cursor over a table's rows. Holds no borrow of the database; fetch
/// each yielded row with [`Table::row`] or [`Table::row_bytes`].
#[derive(Debug)]
pub struct RowCursor {
    cursor: pool::BlockCursor,
}

impl RowCursor {
    pub fn next(&mut self, db: &Db) -> Result<Option<Chblix>> {
        self.cursor.next(db.fm())
    }

    pub(crate) fn reposition(&mut self, chunk: i64) {
        self.cursor.reposition(chunk);
    }
}

pub(crate) fn lookup_field<'a>(schema: &'a Schema, name: &str) -> Result<&'a Field> {
    schema.field(name).ok_or_else(|| {
        err(
            ErrorKind::Schema,
            format!("no field named '{}' in schema", name),
        )
    })
}

pub(crate) fn check_field_type(field: &Field, value: &Value) -> Result<()> {
    ensure!(
        field.dtype == value.data_type(),
        err(
            ErrorKind::Type,
            format!(
                "field '{}' is {}, got {}",
                field.name,
                field.dtype,
                value.data_type()
            )
        )
    );
    if let (DataType::Char, Value::Char(s)) = (field.dtype, value) {
        ensure!(
            s.len() <= field.size as usize,
            err(
                ErrorKind::Type,
                format!(
                    "CHAR value of {} bytes exceeds field '{}' width {}",
                    s.len(),
                    field.name,
                    field.size
                )
            )
        );
    }
    Ok(())
}

/// Probe value used with a condition: type must match the field and the
/// condition must be meaningful for it.
pub(crate) fn check_probe(field: &Field, value: &Value, cond: Condition) -> Result<()> {
    check_field_type(field, value)?;
    ensure!(
        field.dtype.supports(cond),
        err(
            ErrorKind::Type,
            format!("{} does not support {:?}", field.dtype, cond)
        )
    );
    Ok(())
}

pub(crate) fn check_row_types(schema: &Schema, values: &[Value]) -> Result<()> {
    ensure!(
        values.len() == schema.fields().len(),
        err(
            ErrorKind::Schema,
            format!(
                "row has {} values but schema has {} fields",
                values.len(),
                schema.fields().len()
            )
        )
    );
    for (field, value) in schema.fields().iter().zip(values) {
        check_field_type(field, value)?;
    }
    Ok(())
}

/// Encodes typed values into a slot buffer, allocating heap tickets for
/// varchar fields. Types must have been checked already.
pub(crate) fn encode_row(
    fm: &mut FileManager,
    schema: &Schema,
    values: &[Value],
    slot: &mut [u8],
) -> Result<()> {
    for (field, value) in schema.fields().iter().zip(values) {
        let range = field.offset as usize..(field.offset + field.size) as usize;
        match value {
            Value::Varchar(s) => {
                let ticket = heap::put(fm, s.as_bytes())?;
                slot[range].copy_from_slice(ticket.as_bytes());
            }
            _ => write_fixed(&mut slot[range], value)?,
        }
    }
    Ok(())
}

/// Decodes a slot into typed values, materializing varchar fields.
pub(crate) fn decode_row(fm: &FileManager, schema: &Schema, slot: &[u8]) -> Result<Vec<Value>> {
    schema
        .fields()
        .iter()
        .map(|field| field_value(fm, field, slot))
        .collect()
}

/// Decodes one field out of a slot.
pub(crate) fn field_value(fm: &FileManager, field: &Field, slot: &[u8]) -> Result<Value> {
    let range = field.offset as usize..(field.offset + field.size) as usize;
    match field.dtype {
        DataType::Varchar => {
            let ticket = VchTicket::read_from_bytes(&slot[range])
                .map_err(|e| eyre::eyre!("failed to parse VchTicket: {:?}", e))?;
            let bytes = heap::get(fm, &ticket)?;
            Ok(Value::Varchar(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        }
        dtype => read_fixed(&slot[range], dtype),
    }
}

/// Releases the heap chains of every varchar field in a slot.
pub(crate) fn free_varchar_chains(
    fm: &mut FileManager,
    schema: &Schema,
    slot: &[u8],
) -> Result<()> {
    for field in schema.fields() {
        if field.dtype == DataType::Varchar {
            let range = field.offset as usize..(field.offset + field.size) as usize;
            let ticket = VchTicket::read_from_bytes(&slot[range])
                .map_err(|e| eyre::eyre!("failed to parse VchTicket: {:?}", e))?;
            heap::del(fm, &ticket)?;
        }
    }
    Ok(())
}
