//! Conversion between wire values and native values.
//!
//! `to_native` never loses information. `to_wire` dispatches on the value's
//! actual storage class and coerces cell by cell through [`coerce`].

pub mod array;
pub mod coerce;
pub mod composite;
pub mod scalar;
pub mod setof;

use plc_api::error::CallError;
use plc_api::schema::ReturnType;
use plc_api::value::{WireType, WireValue};
use rhai::Dynamic;

use crate::native::StorageClass;

/// Native storage class a wire scalar tag materializes as.
pub fn storage_class_for(ty: WireType) -> Result<StorageClass, CallError> {
    match ty {
        WireType::Logical => Ok(StorageClass::Logical),
        WireType::Int => Ok(StorageClass::Integer),
        WireType::Real => Ok(StorageClass::Real),
        WireType::Text => Ok(StorageClass::Text),
        WireType::Bytea => Ok(StorageClass::Raw),
        other => Err(CallError::argument(format!("{other} is not a scalar type"))),
    }
}

pub fn to_native(value: &WireValue) -> Result<Dynamic, CallError> {
    match value {
        WireValue::Scalar(s) => scalar::to_native(s),
        WireValue::Composite(c) => composite::to_native(c),
        WireValue::Array(a) => array::to_native(a),
        WireValue::SetOf(s) => setof::to_native(s),
        WireValue::Void => Ok(Dynamic::UNIT),
    }
}

/// Convert a result to the declared return type. `rettype` must already be
/// validated.
pub fn to_wire(value: &Dynamic, rettype: &ReturnType) -> Result<WireValue, CallError> {
    match rettype.ty {
        WireType::Void => Ok(WireValue::Void),
        WireType::Composite => composite::to_wire(value, &rettype.subtypes).map(WireValue::from),
        WireType::Array => {
            let element = rettype
                .element_type()
                .ok_or_else(|| CallError::unsupported("ARRAY return without an element type"))?;
            array::to_wire(value, element).map(WireValue::from)
        }
        WireType::Setof => setof::to_wire(value, &rettype.subtypes).map(WireValue::from),
        ty => scalar::to_wire(value, ty).map(WireValue::from),
    }
}
