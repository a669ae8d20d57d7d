use plc_api::error::CallError;
use plc_api::value::{Scalar, SetOfData, WireType};
use rhai::Dynamic;

use super::{array, coerce, scalar, storage_class_for};
use crate::native::{DataFrame, Matrix, Vector};

type Rows = Vec<Vec<Option<Scalar>>>;

/// A set becomes a data frame with one typed vector per column. Text columns
/// stay plain text.
pub fn to_native(set: &SetOfData) -> Result<Dynamic, CallError> {
    let mut columns = Vec::with_capacity(set.ncols());
    for (c, ty) in set.column_types.iter().enumerate() {
        let class = storage_class_for(*ty)?;
        let cells = set
            .rows
            .iter()
            .map(|row| row.get(c).and_then(|v| v.as_ref()).map(scalar::to_cell))
            .collect();
        let column = Vector::from_cells(class, cells)
            .map_err(|e| CallError::argument(format!("setof column {c}: {e}")))?;
        columns.push(column);
    }
    DataFrame::new(set.column_names.clone(), columns)
        .map(Dynamic::from)
        .map_err(CallError::argument)
}

/// Data frames map column by column, matrices are read column-major, a 1-D
/// value becomes a single column and `()` an empty set.
pub fn to_wire(value: &Dynamic, types: &[WireType]) -> Result<SetOfData, CallError> {
    if let Some(frame) = value.read_lock::<DataFrame>() {
        return frame_to_wire(&frame, types);
    }
    if let Some(m) = value.read_lock::<Matrix>() {
        return matrix_to_wire(&m, types);
    }
    if value.is_unit() {
        return Ok(SetOfData {
            column_names: default_names(types.len()),
            column_types: types.to_vec(),
            rows: Vec::new(),
        });
    }

    let vector = array::as_vector(value)?;
    check_width(1, types)?;
    let frame = DataFrame::new(default_names(1), vec![vector]).map_err(CallError::type_mismatch)?;
    frame_to_wire(&frame, types)
}

fn default_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("V{i}")).collect()
}

fn check_width(ncol: usize, types: &[WireType]) -> Result<(), CallError> {
    if ncol != types.len() {
        return Err(CallError::type_mismatch(format!(
            "result has {ncol} columns, declared set has {}",
            types.len()
        )));
    }
    Ok(())
}

fn frame_to_wire(frame: &DataFrame, types: &[WireType]) -> Result<SetOfData, CallError> {
    check_width(frame.ncol(), types)?;
    let mut rows: Rows = vec![vec![None; types.len()]; frame.nrow()];

    for (c, (column, ty)) in frame.columns().iter().zip(types).enumerate() {
        let name = frame.names().get(c).map(String::as_str).unwrap_or_default();
        let context = |e: CallError| e.with_context(format!("column '{name}'"));
        match exact_column(column, *ty) {
            Some(cells) => {
                for (row, cell) in rows.iter_mut().zip(cells.map_err(context)?) {
                    row[c] = cell;
                }
            }
            None => {
                let coerce = coerce::lookup(column.class(), *ty)
                    .ok_or_else(|| context(coerce::unsupported(column.class(), *ty)))?;
                for (r, row) in rows.iter_mut().enumerate() {
                    row[c] = column.cell(r).map(coerce).transpose().map_err(context)?;
                }
            }
        }
    }

    Ok(SetOfData {
        column_names: frame.names().to_vec(),
        column_types: types.to_vec(),
        rows,
    })
}

/// Whole-column copy when the storage class is exactly the declared type.
fn exact_column(column: &Vector, ty: WireType) -> Option<Result<Vec<Option<Scalar>>, CallError>> {
    match (column, ty) {
        (Vector::Logical(v), WireType::Logical) => {
            Some(Ok(v.iter().map(|c| c.map(Scalar::Logical)).collect()))
        }
        (Vector::Integer(v), WireType::Int) => Some(
            v.iter()
                .map(|c| {
                    c.map(|i| {
                        i32::try_from(i).map(Scalar::Int).map_err(|_| {
                            CallError::type_mismatch(format!("integer {i} does not fit INT"))
                        })
                    })
                    .transpose()
                })
                .collect(),
        ),
        (Vector::Real(v), WireType::Real) => Some(Ok(v.iter().map(|c| c.map(Scalar::Real)).collect())),
        (Vector::Text(v), WireType::Text) => {
            Some(Ok(v.iter().map(|c| c.clone().map(Scalar::Text)).collect()))
        }
        (Vector::Raw(v), WireType::Bytea) => {
            Some(Ok(v.iter().map(|c| c.clone().map(Scalar::Bytea)).collect()))
        }
        _ => None,
    }
}

fn matrix_to_wire(m: &Matrix, types: &[WireType]) -> Result<SetOfData, CallError> {
    check_width(m.ncol(), types)?;
    let class = m.data().class();
    let mut rows: Rows = vec![vec![None; types.len()]; m.nrow()];
    for (c, ty) in types.iter().enumerate() {
        let coerce = coerce::lookup(class, *ty).ok_or_else(|| coerce::unsupported(class, *ty))?;
        for (r, row) in rows.iter_mut().enumerate() {
            row[c] = m
                .cell(r, c)
                .map(coerce)
                .transpose()
                .map_err(|e| e.with_context(format!("matrix cell ({r}, {c})")))?;
        }
    }

    let column_names = match m.colnames() {
        Some(names) => names.to_vec(),
        None => default_names(m.ncol()),
    };
    Ok(SetOfData {
        column_names,
        column_types: types.to_vec(),
        rows,
    })
}
