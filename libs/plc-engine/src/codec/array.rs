use plc_api::error::CallError;
use plc_api::value::{ArrayData, Scalar, WireType};
use rhai::Dynamic;

use super::{coerce, scalar, storage_class_for};
use crate::native::{Cell, DataFrame, Matrix, Vector, portable};

/// Wire array to a typed vector. Null elements become missing cells.
pub fn to_native(array: &ArrayData) -> Result<Dynamic, CallError> {
    let class = storage_class_for(array.element_type)?;
    let cells = array
        .values
        .iter()
        .map(|v| v.as_ref().map(scalar::to_cell))
        .collect();
    Vector::from_cells(class, cells)
        .map(Dynamic::from)
        .map_err(|e| CallError::argument(format!("array: {e}")))
}

pub fn to_wire(value: &Dynamic, element_type: WireType) -> Result<ArrayData, CallError> {
    if !element_type.is_scalar() {
        return Err(CallError::type_mismatch(format!(
            "array element type {element_type} is not a scalar type"
        )));
    }

    // A plain array of BYTEA carries each element serialized on its own.
    if element_type == WireType::Bytea && value.is_array() {
        let items = value.clone().into_array().unwrap_or_default();
        let values = items
            .iter()
            .map(|item| {
                if item.is_unit() {
                    Ok(None)
                } else {
                    portable::serialize(item).map(|b| Some(Scalar::Bytea(b)))
                }
            })
            .collect::<Result<_, CallError>>()?;
        return Ok(ArrayData {
            element_type,
            values,
        });
    }

    let vector = as_vector(value)?;
    let coerce = coerce::lookup(vector.class(), element_type)
        .ok_or_else(|| coerce::unsupported(vector.class(), element_type))?;
    let values = vector
        .cells()
        .enumerate()
        .map(|(i, cell)| {
            cell.map(coerce)
                .transpose()
                .map_err(|e| e.with_context(format!("array element {i}")))
        })
        .collect::<Result<_, _>>()?;
    Ok(ArrayData {
        element_type,
        values,
    })
}

/// View a native value as a 1-D vector: vectors as-is, matrices by their
/// column-major data, plain arrays by inference, a scalar as length one and
/// `()` as empty.
pub(crate) fn as_vector(value: &Dynamic) -> Result<Vector, CallError> {
    if let Some(v) = value.read_lock::<Vector>() {
        return Ok(v.clone());
    }
    if let Some(m) = value.read_lock::<Matrix>() {
        return Ok(m.data().clone());
    }
    if value.is::<DataFrame>() {
        return Err(CallError::type_mismatch("cannot convert a data frame to an array"));
    }
    if value.is_unit() {
        return Ok(Vector::Logical(Vec::new()));
    }
    if value.is_array() {
        let items = value.clone().into_array().unwrap_or_default();
        return Vector::from_array(&items).map_err(CallError::type_mismatch);
    }
    match Cell::from_dynamic(value) {
        Some(cell) => Vector::from_cells(cell.class(), vec![Some(cell)]).map_err(CallError::type_mismatch),
        None => Err(CallError::type_mismatch(format!(
            "cannot convert {} to an array",
            value.type_name()
        ))),
    }
}
