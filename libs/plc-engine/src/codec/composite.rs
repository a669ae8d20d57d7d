use plc_api::error::CallError;
use plc_api::value::{CompositeData, CompositeField, ScalarData, WireType, WireValue};
use rhai::Dynamic;

use super::{coerce, scalar, storage_class_for};
use crate::native::{DataFrame, Vector};

/// A composite becomes a one-row data frame, one column per field.
/// Only scalar fields are supported.
pub fn to_native(composite: &CompositeData) -> Result<Dynamic, CallError> {
    let mut names = Vec::with_capacity(composite.fields.len());
    let mut columns = Vec::with_capacity(composite.fields.len());
    for field in &composite.fields {
        let WireValue::Scalar(data) = &field.value else {
            return Err(CallError::argument(format!(
                "composite field '{}' is {}, only scalar fields are supported",
                field.name,
                field.value.wire_type()
            )));
        };
        let class = storage_class_for(data.ty())?;
        let column = Vector::from_cells(class, vec![data.value().map(scalar::to_cell)])
            .map_err(|e| CallError::argument(format!("composite field '{}': {e}", field.name)))?;
        names.push(field.name.clone());
        columns.push(column);
    }
    DataFrame::new(names, columns)
        .map(Dynamic::from)
        .map_err(CallError::argument)
}

/// A one-row data frame with one column per declared field type.
pub fn to_wire(value: &Dynamic, subtypes: &[WireType]) -> Result<CompositeData, CallError> {
    let frame = value.read_lock::<DataFrame>().ok_or_else(|| {
        CallError::type_mismatch(format!(
            "COMPOSITE result must be a data frame, got {}",
            value.type_name()
        ))
    })?;
    if frame.ncol() != subtypes.len() {
        return Err(CallError::type_mismatch(format!(
            "composite result has {} columns, declared type has {}",
            frame.ncol(),
            subtypes.len()
        )));
    }
    if frame.nrow() != 1 {
        return Err(CallError::type_mismatch(format!(
            "composite result must have exactly one row, got {}",
            frame.nrow()
        )));
    }

    let mut fields = Vec::with_capacity(subtypes.len());
    for ((name, column), ty) in frame.names().iter().zip(frame.columns()).zip(subtypes) {
        let value = coerce::convert(column.cell(0), column.class(), *ty)
            .and_then(|v| ScalarData::new(*ty, v))
            .map_err(|e| e.with_context(format!("field '{name}'")))?;
        fields.push(CompositeField {
            name: name.clone(),
            value: value.into(),
        });
    }
    Ok(CompositeData { fields })
}
