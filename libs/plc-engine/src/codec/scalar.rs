use plc_api::error::CallError;
use plc_api::value::{Scalar, ScalarData, WireType};
use rhai::Dynamic;

use super::coerce;
use crate::native::{Cell, DataFrame, Matrix, StorageClass, Vector, classify, portable};

/// Native cell for a wire scalar. BYTEA stays raw bytes.
pub fn to_cell(scalar: &Scalar) -> Cell {
    match scalar {
        Scalar::Logical(b) => Cell::Logical(*b),
        Scalar::Int(i) => Cell::Integer(i64::from(*i)),
        Scalar::Real(r) => Cell::Real(*r),
        Scalar::Text(s) => Cell::Text(s.clone()),
        Scalar::Bytea(b) => Cell::Raw(b.clone()),
    }
}

/// Null becomes `()`. A BYTEA payload is deserialized into the value it carries.
pub fn to_native(data: &ScalarData) -> Result<Dynamic, CallError> {
    match data.value() {
        None => Ok(Dynamic::UNIT),
        Some(Scalar::Bytea(bytes)) => portable::deserialize(bytes),
        Some(other) => Ok(to_cell(other).into_dynamic()),
    }
}

pub fn to_wire(value: &Dynamic, ty: WireType) -> Result<ScalarData, CallError> {
    if !ty.is_scalar() {
        return Err(CallError::type_mismatch(format!("{ty} is not a scalar type")));
    }
    if value.is_unit() {
        return Ok(ScalarData::null(ty));
    }
    // BYTEA carries the whole value, whatever its shape.
    if ty == WireType::Bytea {
        return portable::serialize(value).map(|b| ScalarData::from(Scalar::Bytea(b)));
    }

    let (class, cell) = first_cell(value)?;
    let scalar = coerce::convert(cell, class, ty)?;
    ScalarData::new(ty, scalar)
}

/// First cell of a value together with the storage class it is read as.
/// Vectors, arrays and matrices yield their first element.
pub(crate) fn first_cell(value: &Dynamic) -> Result<(StorageClass, Option<Cell>), CallError> {
    if let Some(v) = value.read_lock::<Vector>() {
        return Ok((v.class(), v.cell(0)));
    }
    if let Some(m) = value.read_lock::<Matrix>() {
        return Ok((m.data().class(), m.data().cell(0)));
    }
    if value.is::<DataFrame>() {
        return Err(CallError::type_mismatch("cannot convert a data frame to a scalar"));
    }
    if value.is_array() {
        let items = value.clone().into_array().unwrap_or_default();
        return match items.first() {
            Some(first) => first_cell(first),
            None => Ok((StorageClass::Null, None)),
        };
    }

    match classify(value) {
        StorageClass::Null => Ok((StorageClass::Null, None)),
        class @ (StorageClass::Logical
        | StorageClass::Integer
        | StorageClass::Real
        | StorageClass::Text
        | StorageClass::Raw) => Ok((class, Cell::from_dynamic(value))),
        other => Err(CallError::type_mismatch(format!(
            "cannot convert {} ({}) to a scalar",
            other.as_str(),
            value.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plc_api::error::ErrorKind;

    fn wire(value: Dynamic, ty: WireType) -> Result<Option<Scalar>, CallError> {
        to_wire(&value, ty).map(ScalarData::into_value)
    }

    #[test]
    fn every_scalar_type_survives_the_round_trip() {
        let values = [
            Scalar::Logical(true),
            Scalar::Int(-42),
            Scalar::Real(2.5),
            Scalar::Text("héllo".into()),
            Scalar::Bytea(vec![0, 159, 255]),
        ];
        for scalar in values {
            let data = ScalarData::from(scalar);
            let back = to_wire(&to_native(&data).unwrap(), data.ty()).unwrap();
            assert_eq!(back, data);

            let null = ScalarData::null(data.ty());
            let back = to_wire(&to_native(&null).unwrap(), null.ty()).unwrap();
            assert_eq!(back, null);
        }
    }

    #[test]
    fn basic_scalars() {
        assert_eq!(wire(Dynamic::from_int(1), WireType::Int).unwrap(), Some(Scalar::Int(1)));
        assert_eq!(wire(Dynamic::from_float(2.5), WireType::Text).unwrap(), Some(Scalar::Text("2.5".into())));
        assert_eq!(wire(Dynamic::from_bool(true), WireType::Logical).unwrap(), Some(Scalar::Logical(true)));
        assert_eq!(wire(Dynamic::UNIT, WireType::Real).unwrap(), None);
    }

    #[test]
    fn containers_yield_their_first_cell() {
        let v = Dynamic::from(Vector::Integer(vec![Some(7), Some(8)]));
        assert_eq!(wire(v, WireType::Int).unwrap(), Some(Scalar::Int(7)));

        let arr = Dynamic::from_array(vec![Dynamic::from_float(1.5), Dynamic::from_float(2.5)]);
        assert_eq!(wire(arr, WireType::Real).unwrap(), Some(Scalar::Real(1.5)));

        let missing = Dynamic::from(Vector::Real(vec![None]));
        assert_eq!(wire(missing, WireType::Real).unwrap(), None);

        let factor = Dynamic::from(Vector::from_cells(StorageClass::Factor, vec![Some(Cell::Text("lvl".into()))]).unwrap());
        assert_eq!(wire(factor, WireType::Text).unwrap(), Some(Scalar::Text("lvl".into())));
    }

    #[test]
    fn unconvertible_value_is_a_type_mismatch() {
        let df = Dynamic::from(DataFrame::new(vec![], vec![]).unwrap());
        assert_eq!(wire(df, WireType::Int).unwrap_err().kind, ErrorKind::TypeMismatch);
        assert_eq!(wire(Dynamic::from("x".to_string()), WireType::Int).unwrap_err().kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn bytea_round_trips_native_values() {
        let df = DataFrame::new(vec!["a".into()], vec![Vector::Integer(vec![Some(1)])]).unwrap();
        let data = to_wire(&Dynamic::from(df.clone()), WireType::Bytea).unwrap();
        let back = to_native(&data).unwrap();
        assert_eq!(back.read_lock::<DataFrame>().map(|d| d.clone()), Some(df));

        let raw = ScalarData::from(Scalar::Bytea(vec![9, 9]));
        assert_eq!(to_native(&raw).unwrap().try_cast::<rhai::Blob>(), Some(vec![9, 9]));
    }

    #[test]
    fn null_input_is_unit() {
        assert!(to_native(&ScalarData::null(WireType::Int)).unwrap().is_unit());
    }
}
