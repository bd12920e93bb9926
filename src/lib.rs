//! # chunkdb: Single-File Embedded Relational Storage
//!
//! chunkdb turns one file on disk into a set of typed tables. It is the
//! storage core only: durable rows, schemas, and the standard relational
//! operators (insert, select-by-predicate, update, delete, inner join,
//! projection). No SQL, no networking, no transactions.
//!
//! ## Quick Start
//!
//! ```ignore
//! use chunkdb::{Condition, Db, Field, Schema, Value};
//!
//! let mut db = Db::create("./students.cdb")?;
//!
//! let mut schema = Schema::new();
//! schema.add_field(Field::int64("ID"))?;
//! schema.add_field(Field::char("NAME", 10))?;
//! schema.add_field(Field::float32("SCORE"))?;
//!
//! let mut students = db.create_table("STUDENT", schema)?;
//! students.insert(&mut db, &[
//!     Value::Int(42),
//!     Value::Char("Ada".into()),
//!     Value::Float(9.9),
//! ])?;
//!
//! let answer = db.select(&students, "ID", Condition::Eq, &Value::Int(42), "answer")?;
//! assert_eq!(answer.row_count(), 1);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Db handle (lifecycle, name cache)      │
//! ├─────────────────────────────────────────┤
//! │   Relational operators (query)           │
//! ├──────────────┬──────────────────────────┤
//! │ Table engine │ Schema catalog │ Varchar │
//! │   (rows)     │   (fields)     │  heap   │
//! ├──────────────┴──────────────────────────┤
//! │   Linked-block allocator (chunks)        │
//! ├─────────────────────────────────────────┤
//! │   Memory-mapped paged file               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Every layer above the file manager stores its state in *collections*:
//! chains of page-sized chunks holding fixed-size blocks. Tables, their
//! schemas, the varchar heap, and the metatable (the name directory,
//! itself a collection of table headers) all share that one allocator,
//! so a handful of small mechanisms carries the whole engine.
//!
//! ## Concurrency
//!
//! Single-threaded and fully synchronous; every operation completes or
//! fails before returning. [`SharedDb`] offers a mutex at the handle
//! boundary for multi-threaded callers.
//!
//! ## Module Overview
//!
//! - [`storage`]: memory-mapped file, chunks, and the block allocator
//! - `schema`: typed field lists with slot layout
//! - `table`: row storage, scan, and point operations
//! - `query`: select / join / projection / predicate update & delete
//! - `heap`: varchar side storage
//! - `metatable`: the name→table directory
//! - `database`: the `Db` handle and lifecycle

pub mod database;
pub mod error;
pub mod heap;
pub mod metatable;
pub mod query;
pub mod schema;
pub mod storage;
pub mod table;
pub mod types;

pub use database::{Db, DbOptions, SharedDb, DEFAULT_HEAP_GRAIN};
pub use error::ErrorKind;
pub use schema::{Field, Schema, MAX_NAME};
pub use storage::{Chblix, PAGE_SIZE};
pub use table::{RowCursor, Table};
pub use types::{Condition, DataType, Value};
