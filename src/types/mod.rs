//! # Type System
//!
//! Datatypes, runtime values, and the comparator dispatch shared by the
//! schema catalog and the table engine.

mod data_type;
mod value;

pub use data_type::{Condition, DataType, VARCHAR_TICKET_SIZE};
pub use value::{compare, Value};

pub(crate) use value::{read_fixed, write_fixed};
