//! Native cell to wire scalar coercions.
//!
//! [`lookup`] is the whole table: a (storage class, wire tag) pair either has a
//! coercion or it is unsupported. There is no fallback.

use plc_api::error::CallError;
use plc_api::value::{Scalar, WireType};

use crate::native::{Cell, StorageClass, portable};

pub type Coercion = fn(Cell) -> Result<Scalar, CallError>;

pub fn lookup(class: StorageClass, target: WireType) -> Option<Coercion> {
    use StorageClass as S;
    use WireType as W;

    match (class, target) {
        (S::Logical | S::Integer | S::Real | S::Text | S::Factor, W::Logical) => Some(to_logical),
        (S::Logical | S::Integer | S::Real | S::Text | S::Factor, W::Int) => Some(to_int),
        (S::Logical | S::Integer | S::Real | S::Text | S::Factor, W::Real) => Some(to_real),
        (S::Logical | S::Integer | S::Real | S::Text | S::Factor | S::Raw, W::Text) => Some(to_text),
        (S::Logical | S::Integer | S::Real | S::Text | S::Factor | S::Raw, W::Bytea) => {
            Some(to_bytea)
        }
        _ => None,
    }
}

/// Coerce one possibly-missing cell of `class` to `target`.
pub fn convert(
    cell: Option<Cell>,
    class: StorageClass,
    target: WireType,
) -> Result<Option<Scalar>, CallError> {
    let coerce = lookup(class, target).ok_or_else(|| unsupported(class, target))?;
    cell.map(coerce).transpose()
}

pub fn unsupported(class: StorageClass, target: WireType) -> CallError {
    CallError::type_mismatch(format!("cannot convert {} to {target}", class.as_str()))
}

fn mismatch(cell: &Cell, target: WireType) -> CallError {
    CallError::type_mismatch(format!("cannot convert {} value {cell} to {target}", cell.class().as_str()))
}

fn to_logical(cell: Cell) -> Result<Scalar, CallError> {
    let b = match &cell {
        Cell::Logical(b) => *b,
        Cell::Integer(i) => *i != 0,
        Cell::Real(r) if r.is_nan() => return Err(mismatch(&cell, WireType::Logical)),
        Cell::Real(r) => *r != 0.0,
        Cell::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => true,
            "false" | "f" | "no" | "0" => false,
            _ => return Err(mismatch(&cell, WireType::Logical)),
        },
        Cell::Raw(_) => return Err(mismatch(&cell, WireType::Logical)),
    };
    Ok(Scalar::Logical(b))
}

fn to_int(cell: Cell) -> Result<Scalar, CallError> {
    let from_real = |r: f64| {
        let t = r.trunc();
        if t.is_finite() && t >= i32::MIN as f64 && t <= i32::MAX as f64 {
            Some(t as i32)
        } else {
            None
        }
    };
    let i = match &cell {
        Cell::Logical(b) => Some(i32::from(*b)),
        Cell::Integer(i) => i32::try_from(*i).ok(),
        Cell::Real(r) => from_real(*r),
        Cell::Text(s) => {
            let s = s.trim();
            s.parse::<i32>().ok().or_else(|| s.parse::<f64>().ok().and_then(from_real))
        }
        Cell::Raw(_) => None,
    };
    i.map(Scalar::Int).ok_or_else(|| mismatch(&cell, WireType::Int))
}

fn to_real(cell: Cell) -> Result<Scalar, CallError> {
    let r = match &cell {
        Cell::Logical(b) => Some(if *b { 1.0 } else { 0.0 }),
        Cell::Integer(i) => Some(*i as f64),
        Cell::Real(r) => Some(*r),
        Cell::Text(s) => s.trim().parse::<f64>().ok(),
        Cell::Raw(_) => None,
    };
    r.map(Scalar::Real).ok_or_else(|| mismatch(&cell, WireType::Real))
}

fn to_text(cell: Cell) -> Result<Scalar, CallError> {
    let s = match cell {
        Cell::Logical(b) => (if b { "TRUE" } else { "FALSE" }).to_string(),
        Cell::Integer(i) => i.to_string(),
        Cell::Real(r) => r.to_string(),
        Cell::Text(s) => s,
        Cell::Raw(b) => String::from_utf8(b)?,
    };
    Ok(Scalar::Text(s))
}

fn to_bytea(cell: Cell) -> Result<Scalar, CallError> {
    match cell {
        Cell::Raw(b) => Ok(Scalar::Bytea(b)),
        other => portable::serialize(&other.into_dynamic()).map(Scalar::Bytea),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plc_api::error::ErrorKind;

    #[test]
    fn numeric_coercions() {
        assert_eq!(convert(Some(Cell::Real(3.9)), StorageClass::Real, WireType::Int).unwrap(), Some(Scalar::Int(3)));
        assert_eq!(convert(Some(Cell::Real(2147483647.5)), StorageClass::Real, WireType::Int).unwrap(), Some(Scalar::Int(i32::MAX)));
        assert_eq!(convert(Some(Cell::Real(-2147483648.5)), StorageClass::Real, WireType::Int).unwrap(), Some(Scalar::Int(i32::MIN)));
        assert!(convert(Some(Cell::Real(2147483648.0)), StorageClass::Real, WireType::Int).is_err());
        assert_eq!(convert(Some(Cell::Integer(2)), StorageClass::Integer, WireType::Real).unwrap(), Some(Scalar::Real(2.0)));
        assert_eq!(convert(Some(Cell::Logical(true)), StorageClass::Logical, WireType::Int).unwrap(), Some(Scalar::Int(1)));
        assert_eq!(convert(Some(Cell::Integer(0)), StorageClass::Integer, WireType::Logical).unwrap(), Some(Scalar::Logical(false)));
        assert_eq!(convert(None, StorageClass::Integer, WireType::Text).unwrap(), None);
    }

    #[test]
    fn out_of_range_integer_is_a_mismatch() {
        let err = convert(Some(Cell::Integer(1 << 40)), StorageClass::Integer, WireType::Int).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn text_parses_or_fails() {
        assert_eq!(convert(Some(Cell::Text(" 42 ".into())), StorageClass::Text, WireType::Int).unwrap(), Some(Scalar::Int(42)));
        assert_eq!(convert(Some(Cell::Text("yes".into())), StorageClass::Text, WireType::Logical).unwrap(), Some(Scalar::Logical(true)));
        let err = convert(Some(Cell::Text("abc".into())), StorageClass::Text, WireType::Real).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn raw_goes_to_bytes_or_utf8_text_only() {
        assert_eq!(convert(Some(Cell::Raw(vec![1, 2])), StorageClass::Raw, WireType::Bytea).unwrap(), Some(Scalar::Bytea(vec![1, 2])));
        assert_eq!(convert(Some(Cell::Raw(b"ok".to_vec())), StorageClass::Raw, WireType::Text).unwrap(), Some(Scalar::Text("ok".into())));
        assert!(lookup(StorageClass::Raw, WireType::Int).is_none());
        assert_eq!(convert(Some(Cell::Raw(vec![0xff])), StorageClass::Raw, WireType::Text).unwrap_err().kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn containers_have_no_coercion() {
        for class in [StorageClass::Frame, StorageClass::Matrix, StorageClass::List, StorageClass::Record, StorageClass::Unsupported] {
            assert!(lookup(class, WireType::Text).is_none(), "{class:?}");
        }
        let err = convert(None, StorageClass::Record, WireType::Int).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }
}
