//! # Failure Taxonomy
//!
//! Every fallible operation in chunkdb returns `eyre::Result`. To let
//! callers react to *classes* of failure (and not just read message
//! strings), errors raised by the engine carry an [`ErrorKind`] link in
//! their report chain:
//!
//! ```ignore
//! match ErrorKind::of(&err) {
//!     Some(ErrorKind::NameCollision) => { /* pick another table name */ }
//!     Some(ErrorKind::InvalidHandle) => { /* row was already deleted */ }
//!     _ => return Err(err),
//! }
//! ```
//!
//! "Not found" is deliberately absent: a probe that matches no row is a
//! successful empty result (`Ok(None)`, or an empty materialized table),
//! never an error.

use std::fmt;

use eyre::Report;

/// Classification attached to engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// open/map/flush/unlink failed at the OS layer.
    Io,
    /// The file could not be grown or a chunk could not be carved.
    Alloc,
    /// A chblix naming a freed block, an out-of-range block, or a chunk
    /// outside the target collection.
    InvalidHandle,
    /// Duplicate field name, unknown field, or slot-size mismatch.
    Schema,
    /// Comparator or encoder invoked with a mismatched datatype/condition.
    Type,
    /// Metatable insert of an already-registered name.
    NameCollision,
}

impl ErrorKind {
    /// Finds the kind recorded in a report chain, if any.
    pub fn of(report: &Report) -> Option<ErrorKind> {
        report.downcast_ref::<ErrorKind>().copied()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Io => "i/o failure",
            ErrorKind::Alloc => "allocation failure",
            ErrorKind::InvalidHandle => "invalid block handle",
            ErrorKind::Schema => "schema error",
            ErrorKind::Type => "type error",
            ErrorKind::NameCollision => "name collision",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ErrorKind {}

/// Builds a report whose chain bottoms out in `kind`.
pub(crate) fn err(kind: ErrorKind, msg: impl fmt::Display) -> Report {
    Report::new(kind).wrap_err(msg.to_string())
}
