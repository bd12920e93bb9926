//! # Data Types and Conditions
//!
//! The canonical `DataType` enum used across schema definitions, row
//! storage, and predicate evaluation.
//!
//! ## Design Principles
//!
//! 1. **Single source of truth**: one enum used everywhere
//! 2. **Storage-efficient**: `#[repr(u8)]` single-byte discriminant in
//!    field records
//! 3. **Metadata-free**: the CHAR length lives on the field, not the enum
//!
//! | Type | Slot bytes | Encoding |
//! |---------|------------|------------------------------------|
//! | Int64   | 8          | little-endian two's-complement     |
//! | Float32 | 4          | IEEE-754 binary32, little-endian   |
//! | Char    | n          | NUL-padded right, not terminated   |
//! | Bool    | 1          | 0 or 1                             |
//! | Varchar | 24         | heap ticket (size, chunk, block)   |

use eyre::Result;

use crate::error::{err, ErrorKind};

/// Byte width of a varchar ticket in a row slot.
pub const VARCHAR_TICKET_SIZE: i64 = 24;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int64 = 0,
    Float32 = 1,
    Char = 2,
    Bool = 3,
    Varchar = 4,
}

impl DataType {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(DataType::Int64),
            1 => Ok(DataType::Float32),
            2 => Ok(DataType::Char),
            3 => Ok(DataType::Bool),
            4 => Ok(DataType::Varchar),
            other => Err(err(
                ErrorKind::Schema,
                format!("unknown datatype tag {}", other),
            )),
        }
    }

    /// Slot width for types whose size is not declared per field.
    pub fn fixed_size(&self) -> Option<i64> {
        match self {
            DataType::Int64 => Some(8),
            DataType::Float32 => Some(4),
            DataType::Bool => Some(1),
            DataType::Varchar => Some(VARCHAR_TICKET_SIZE),
            DataType::Char => None,
        }
    }

    /// Whether `cond` is meaningful for this type. BOOL compares by
    /// equality only; everything else supports the full set.
    pub fn supports(&self, cond: Condition) -> bool {
        match self {
            DataType::Bool => matches!(cond, Condition::Eq | Condition::Ne),
            _ => true,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataType::Int64 => "INT64",
            DataType::Float32 => "FLOAT32",
            DataType::Char => "CHAR",
            DataType::Bool => "BOOL",
            DataType::Varchar => "VARCHAR",
        };
        f.write_str(s)
    }
}

/// Comparison condition for predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip() {
        for dt in [
            DataType::Int64,
            DataType::Float32,
            DataType::Char,
            DataType::Bool,
            DataType::Varchar,
        ] {
            assert_eq!(DataType::from_byte(dt as u8).unwrap(), dt);
        }
    }

    #[test]
    fn unknown_tag_is_schema_error() {
        let e = DataType::from_byte(200).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::Schema));
    }

    #[test]
    fn bool_orders_by_equality_only() {
        assert!(DataType::Bool.supports(Condition::Eq));
        assert!(DataType::Bool.supports(Condition::Ne));
        assert!(!DataType::Bool.supports(Condition::Lt));
        assert!(DataType::Int64.supports(Condition::Lt));
    }
}
