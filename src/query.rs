//! # Relational Operators
//!
//! Select, join, projection, and the predicate update/delete operators.
//! Each operator that produces rows materializes them into a fresh table
//! registered under the caller's name; the caller owns that table and
//! drops it when done. There is no cursor-based result carrier beyond
//! [`crate::Table::scan`].
//!
//! Type and schema errors are detected before any table is created or
//! any row touched. A multi-row operator that fails midway (for example
//! an insert hitting an allocation failure) leaves its partial output in
//! place for the caller to drop; there is no rollback.

use eyre::{ensure, Result, WrapErr};

use crate::database::Db;
use crate::error::{err, ErrorKind};
use crate::schema::Schema;
use crate::table::{check_probe, check_row_types, lookup_field, Table};
use crate::types::{compare, Condition, Value};

fn field_position(schema: &Schema, name: &str) -> Result<usize> {
    schema
        .fields()
        .iter()
        .position(|f| f.name == name)
        .ok_or_else(|| {
            err(
                ErrorKind::Schema,
                format!("no field named '{}' in schema", name),
            )
        })
}

impl Db {
    /// Materializes every row of `src` satisfying `field cond value` into
    /// a new table named `name`. The output schema copies the source
    /// schema and scan order is preserved; no match yields an empty
    /// table, not an error.
    pub fn select(
        &mut self,
        src: &Table,
        field_name: &str,
        cond: Condition,
        value: &Value,
        name: &str,
    ) -> Result<Table> {
        let field = lookup_field(src.schema(), field_name)?;
        check_probe(field, value, cond)?;
        let pos = field_position(src.schema(), field_name)?;

        let mut schema = Schema::new();
        for f in src.schema().fields() {
            schema.add_field_positional(f.clone());
        }

        let mut dst = self
            .create_table(name, schema)
            .wrap_err_with(|| format!("while materializing select into '{}'", name))?;

        let mut cursor = src.scan(self)?;
        while let Some(at) = cursor.next(self)? {
            let values = src.row(self, at)?;
            if compare(&values[pos], value, cond)? {
                dst.insert(self, &values)?;
            }
        }
        Ok(dst)
    }

    /// Inner join on equality of the two key fields, naive left-major
    /// nested loop. The output schema is the field-wise concatenation of
    /// both sides; colliding names are kept and addressed positionally.
    pub fn join(
        &mut self,
        left: &Table,
        right: &Table,
        left_field: &str,
        right_field: &str,
        name: &str,
    ) -> Result<Table> {
        let lf = lookup_field(left.schema(), left_field)?;
        let rf = lookup_field(right.schema(), right_field)?;
        ensure!(
            lf.dtype == rf.dtype,
            err(
                ErrorKind::Type,
                format!(
                    "cannot join {} key '{}' with {} key '{}'",
                    lf.dtype, left_field, rf.dtype, right_field
                )
            )
        );
        let lpos = field_position(left.schema(), left_field)?;
        let rpos = field_position(right.schema(), right_field)?;

        let mut schema = Schema::new();
        for f in left.schema().fields().iter().chain(right.schema().fields()) {
            schema.add_field_positional(f.clone());
        }

        let mut dst = self
            .create_table(name, schema)
            .wrap_err_with(|| format!("while materializing join into '{}'", name))?;

        let mut lcur = left.scan(self)?;
        while let Some(lat) = lcur.next(self)? {
            let lrow = left.row(self, lat)?;
            let mut rcur = right.scan(self)?;
            while let Some(rat) = rcur.next(self)? {
                let rrow = right.row(self, rat)?;
                if compare(&lrow[lpos], &rrow[rpos], Condition::Eq)? {
                    let mut out = lrow.clone();
                    out.extend(rrow.iter().cloned());
                    dst.insert(self, &out)?;
                }
            }
        }
        Ok(dst)
    }

    /// Copies the named fields of every row into a new table whose schema
    /// lists exactly those fields; each value lands at its new offset in
    /// the narrower slot.
    pub fn projection(&mut self, src: &Table, field_names: &[&str], name: &str) -> Result<Table> {
        let mut picks = Vec::with_capacity(field_names.len());
        let mut schema = Schema::new();
        for &fname in field_names {
            let pos = field_position(src.schema(), fname)?;
            picks.push(pos);
            schema.add_field(src.schema().fields()[pos].clone())?;
        }

        let mut dst = self
            .create_table(name, schema)
            .wrap_err_with(|| format!("while materializing projection into '{}'", name))?;

        let mut cursor = src.scan(self)?;
        while let Some(at) = cursor.next(self)? {
            let values = src.row(self, at)?;
            let projected: Vec<Value> = picks.iter().map(|&i| values[i].clone()).collect();
            dst.insert(self, &projected)?;
        }
        Ok(dst)
    }

    /// Overwrites the whole slot of every row satisfying the predicate
    /// with `row`; returns the number of rows rewritten.
    pub fn update_rows_where(
        &mut self,
        table: &mut Table,
        row: &[Value],
        field_name: &str,
        cond: Condition,
        value: &Value,
    ) -> Result<u64> {
        let field = lookup_field(table.schema(), field_name)?;
        check_probe(field, value, cond)?;
        check_row_types(table.schema(), row)?;
        let pos = field_position(table.schema(), field_name)?;

        let mut count = 0;
        let mut cursor = table.scan(self)?;
        while let Some(at) = cursor.next(self)? {
            let values = table.row(self, at)?;
            if compare(&values[pos], value, cond)? {
                table.update_row(self, at, row)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Overwrites one field of every row satisfying the predicate;
    /// returns the number of rows touched.
    pub fn update_element_where(
        &mut self,
        table: &mut Table,
        upd_field: &str,
        new_value: &Value,
        comp_field: &str,
        cond: Condition,
        value: &Value,
    ) -> Result<u64> {
        let cf = lookup_field(table.schema(), comp_field)?;
        check_probe(cf, value, cond)?;
        let uf = lookup_field(table.schema(), upd_field)?;
        crate::table::check_field_type(uf, new_value)?;
        let pos = field_position(table.schema(), comp_field)?;

        let mut count = 0;
        let mut cursor = table.scan(self)?;
        while let Some(at) = cursor.next(self)? {
            let values = table.row(self, at)?;
            if compare(&values[pos], value, cond)? {
                table.update_element(self, at, upd_field, new_value)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Deletes every row satisfying the predicate; returns the number of
    /// rows removed. When a delete drains a chunk out from under the
    /// scan, the cursor resumes at the chunk's pre-delete successor.
    pub fn delete_where(
        &mut self,
        table: &mut Table,
        field_name: &str,
        cond: Condition,
        value: &Value,
    ) -> Result<u64> {
        let field = lookup_field(table.schema(), field_name)?;
        check_probe(field, value, cond)?;
        let pos = field_position(table.schema(), field_name)?;

        let mut count = 0;
        let mut cursor = table.scan(self)?;
        while let Some(at) = cursor.next(self)? {
            let values = table.row(self, at)?;
            if compare(&values[pos], value, cond)? {
                if let Some(next) = table.delete_and_next(self, at)? {
                    cursor.reposition(next);
                }
                count += 1;
            }
        }
        Ok(count)
    }

    /// Writes every row of `table` to `out`, one line per row, values
    /// tab-separated in field order.
    pub fn dump_table(&self, table: &Table, out: &mut dyn std::io::Write) -> Result<()> {
        let mut cursor = table.scan(self)?;
        while let Some(at) = cursor.next(self)? {
            let values = table.row(self, at)?;
            let line = values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\t");
            writeln!(out, "{}", line)
                .wrap_err(ErrorKind::Io)
                .wrap_err_with(|| format!("while dumping table '{}'", table.name()))?;
        }
        Ok(())
    }
}
