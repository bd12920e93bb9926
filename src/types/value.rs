//! # Runtime Values
//!
//! `Value` is the owned runtime representation of one field. Fixed-width
//! values encode directly into their slot range; varchar values are
//! resolved through the heap by the table layer before they get here, so
//! comparison always sees fully materialized operands.

use std::cmp::Ordering;

use eyre::{ensure, Result};

use crate::error::{err, ErrorKind};

use super::{Condition, DataType};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f32),
    Char(String),
    Bool(bool),
    Varchar(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int64,
            Value::Float(_) => DataType::Float32,
            Value::Char(_) => DataType::Char,
            Value::Bool(_) => DataType::Bool,
            Value::Varchar(_) => DataType::Varchar,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Char(v) | Value::Varchar(v) => f.write_str(v),
            Value::Bool(v) => write!(f, "{}", *v as u8),
        }
    }
}

/// Encodes a fixed-width value into its slot range. `dst` must be exactly
/// the field's declared width; varchar is the table layer's business.
pub(crate) fn write_fixed(dst: &mut [u8], value: &Value) -> Result<()> {
    match value {
        Value::Int(v) => {
            ensure!(dst.len() == 8, slot_mismatch(DataType::Int64, dst.len()));
            dst.copy_from_slice(&v.to_le_bytes());
        }
        Value::Float(v) => {
            ensure!(dst.len() == 4, slot_mismatch(DataType::Float32, dst.len()));
            dst.copy_from_slice(&v.to_le_bytes());
        }
        Value::Bool(v) => {
            ensure!(dst.len() == 1, slot_mismatch(DataType::Bool, dst.len()));
            dst[0] = *v as u8;
        }
        Value::Char(s) => {
            ensure!(
                s.len() <= dst.len(),
                err(
                    ErrorKind::Type,
                    format!("CHAR value of {} bytes exceeds field width {}", s.len(), dst.len())
                )
            );
            dst[..s.len()].copy_from_slice(s.as_bytes());
            dst[s.len()..].fill(0);
        }
        Value::Varchar(_) => {
            return Err(err(
                ErrorKind::Type,
                "varchar values encode through the heap, not inline",
            ))
        }
    }
    Ok(())
}

/// Decodes a fixed-width value from its slot range.
pub(crate) fn read_fixed(src: &[u8], dtype: DataType) -> Result<Value> {
    match dtype {
        DataType::Int64 => {
            ensure!(src.len() == 8, slot_mismatch(dtype, src.len()));
            Ok(Value::Int(i64::from_le_bytes(src.try_into().unwrap())))
        }
        DataType::Float32 => {
            ensure!(src.len() == 4, slot_mismatch(dtype, src.len()));
            Ok(Value::Float(f32::from_le_bytes(src.try_into().unwrap())))
        }
        DataType::Bool => {
            ensure!(src.len() == 1, slot_mismatch(dtype, src.len()));
            Ok(Value::Bool(src[0] != 0))
        }
        DataType::Char => {
            let end = src.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            Ok(Value::Char(
                String::from_utf8_lossy(&src[..end]).into_owned(),
            ))
        }
        DataType::Varchar => Err(err(
            ErrorKind::Type,
            "varchar values decode through the heap, not inline",
        )),
    }
}

fn slot_mismatch(dtype: DataType, got: usize) -> eyre::Report {
    err(
        ErrorKind::Schema,
        format!("{} field has slot width {}", dtype, got),
    )
}

/// Typed comparison. Operand types must match and the condition must be
/// meaningful for the type (BOOL: equality only); anything else is a type
/// error. A NaN operand satisfies `Ne` and nothing else.
pub fn compare(lhs: &Value, rhs: &Value, cond: Condition) -> Result<bool> {
    let dtype = lhs.data_type();
    ensure!(
        dtype == rhs.data_type(),
        err(
            ErrorKind::Type,
            format!("cannot compare {} with {}", dtype, rhs.data_type())
        )
    );
    ensure!(
        dtype.supports(cond),
        err(
            ErrorKind::Type,
            format!("{} does not support {:?}", dtype, cond)
        )
    );

    let ord = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Char(a), Value::Char(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (Value::Varchar(a), Value::Varchar(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        _ => unreachable!("type equality checked above"),
    };

    Ok(match ord {
        Some(ord) => match cond {
            Condition::Eq => ord == Ordering::Equal,
            Condition::Ne => ord != Ordering::Equal,
            Condition::Lt => ord == Ordering::Less,
            Condition::Le => ord != Ordering::Greater,
            Condition::Gt => ord == Ordering::Greater,
            Condition::Ge => ord != Ordering::Less,
        },
        // Incomparable floats: only Ne holds.
        None => cond == Condition::Ne,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_slot_roundtrip() {
        let mut slot = [0u8; 8];
        write_fixed(&mut slot, &Value::Int(-42)).unwrap();
        assert_eq!(read_fixed(&slot, DataType::Int64).unwrap(), Value::Int(-42));
    }

    #[test]
    fn float_slot_roundtrip() {
        let mut slot = [0u8; 4];
        write_fixed(&mut slot, &Value::Float(9.9)).unwrap();
        assert_eq!(
            read_fixed(&slot, DataType::Float32).unwrap(),
            Value::Float(9.9)
        );
    }

    #[test]
    fn char_pads_with_nuls() {
        let mut slot = [0xFFu8; 10];
        write_fixed(&mut slot, &Value::Char("abc".into())).unwrap();
        assert_eq!(&slot, b"abc\0\0\0\0\0\0\0");
        assert_eq!(
            read_fixed(&slot, DataType::Char).unwrap(),
            Value::Char("abc".into())
        );
    }

    #[test]
    fn char_overflow_is_type_error() {
        let mut slot = [0u8; 2];
        let e = write_fixed(&mut slot, &Value::Char("abc".into())).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::Type));
    }

    #[test]
    fn bool_slot_roundtrip() {
        let mut slot = [0u8; 1];
        write_fixed(&mut slot, &Value::Bool(true)).unwrap();
        assert_eq!(
            read_fixed(&slot, DataType::Bool).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn comparisons_across_conditions() {
        use Condition::*;
        let a = Value::Int(3);
        let b = Value::Int(5);

        assert!(compare(&a, &b, Lt).unwrap());
        assert!(compare(&a, &b, Le).unwrap());
        assert!(compare(&a, &b, Ne).unwrap());
        assert!(!compare(&a, &b, Eq).unwrap());
        assert!(!compare(&a, &b, Gt).unwrap());
        assert!(compare(&b, &a, Ge).unwrap());
    }

    #[test]
    fn char_compares_lexicographically() {
        let a = Value::Char("ab".into());
        let b = Value::Char("abc".into());
        assert!(compare(&a, &b, Condition::Lt).unwrap());
    }

    #[test]
    fn mismatched_types_are_a_type_error() {
        let e = compare(&Value::Int(1), &Value::Bool(true), Condition::Eq).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::Type));
    }

    #[test]
    fn ordering_bools_is_a_type_error() {
        let e = compare(&Value::Bool(true), &Value::Bool(false), Condition::Lt).unwrap_err();
        assert_eq!(ErrorKind::of(&e), Some(ErrorKind::Type));
    }

    #[test]
    fn nan_satisfies_only_ne() {
        let nan = Value::Float(f32::NAN);
        let one = Value::Float(1.0);
        assert!(!compare(&nan, &one, Condition::Eq).unwrap());
        assert!(!compare(&nan, &one, Condition::Lt).unwrap());
        assert!(compare(&nan, &one, Condition::Ne).unwrap());
    }
}
