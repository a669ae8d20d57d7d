//! Script-facing functions over the native column types.

use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, INT};

use super::{DataFrame, Factor, Matrix, Vector};

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

fn index(len: usize, i: INT) -> RhaiResult<usize> {
    // Negative positions count from the end.
    let pos = if i < 0 { len as INT + i } else { i };
    if pos < 0 || pos >= len as INT {
        return Err(format!("index {i} out of bounds for length {len}").into());
    }
    Ok(pos as usize)
}

fn count(n: INT, what: &str) -> RhaiResult<usize> {
    usize::try_from(n).map_err(|_| format!("{what} must not be negative, got {n}").into())
}

fn to_vector(value: Dynamic) -> RhaiResult<Vector> {
    if let Some(v) = value.read_lock::<Vector>() {
        return Ok(v.clone());
    }
    let type_name = value.type_name();
    match value.into_array() {
        Ok(items) => Vector::from_array(&items).map_err(Into::into),
        Err(_) => Err(format!("expected a vector or an array, got {type_name}").into()),
    }
}

fn dim(nrow: usize, ncol: usize) -> Array {
    vec![Dynamic::from_int(nrow as INT), Dynamic::from_int(ncol as INT)]
}

pub fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<Vector>("vector")
        .register_type_with_name::<DataFrame>("data_frame")
        .register_type_with_name::<Matrix>("matrix");

    register_vector(engine);
    register_frame(engine);
    register_matrix(engine);
}

fn register_vector(engine: &mut Engine) {
    engine
        .register_fn("vector", |items: Array| -> RhaiResult<Vector> {
            Vector::from_array(&items).map_err(Into::into)
        })
        .register_fn("factor", |items: Array| -> RhaiResult<Vector> {
            let labels = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    if item.is_unit() {
                        Ok(None)
                    } else {
                        item.clone()
                            .into_string()
                            .map(Some)
                            .map_err(|t| format!("factor label {i} must be a string, got {t}"))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Vector::Factor(Factor::from_labels(&labels)))
        })
        .register_fn("len", |v: &mut Vector| v.len() as INT)
        .register_fn("is_empty", |v: &mut Vector| v.is_empty())
        .register_fn("dim", |v: &mut Vector| vec![Dynamic::from_int(v.len() as INT)])
        .register_fn("storage_class", |v: &mut Vector| v.class().as_str().to_string())
        .register_fn("is_na", |v: &mut Vector, i: INT| -> RhaiResult<bool> {
            let i = index(v.len(), i)?;
            Ok(v.cell(i).is_none())
        })
        .register_fn("sum", |v: &mut Vector| -> RhaiResult<Dynamic> {
            v.sum().map_err(Into::into)
        })
        .register_fn("mean", |v: &mut Vector| -> RhaiResult<Dynamic> {
            v.mean().map_err(Into::into)
        })
        .register_fn("to_array", |v: &mut Vector| v.to_array())
        .register_fn("levels", |v: &mut Vector| -> Array {
            match v {
                Vector::Factor(f) => f.levels.iter().cloned().map(Dynamic::from).collect(),
                _ => Array::new(),
            }
        })
        .register_fn("to_string", |v: &mut Vector| v.to_string())
        .register_fn("to_debug", |v: &mut Vector| format!("{v:?}"))
        .register_indexer_get(|v: &mut Vector, i: INT| -> RhaiResult<Dynamic> {
            let i = index(v.len(), i)?;
            Ok(v.cell(i).map(super::Cell::into_dynamic).unwrap_or(Dynamic::UNIT))
        })
        .register_iterator::<Vector>();
}

fn register_frame(engine: &mut Engine) {
    engine
        .register_fn(
            "data_frame",
            |names: Array, columns: Array| -> RhaiResult<DataFrame> {
                let names = names
                    .into_iter()
                    .map(|n| n.into_string().map_err(|t| format!("column name must be a string, got {t}")))
                    .collect::<Result<Vec<_>, _>>()?;
                let columns = columns
                    .into_iter()
                    .map(to_vector)
                    .collect::<RhaiResult<Vec<_>>>()?;
                DataFrame::new(names, columns).map_err(Into::into)
            },
        )
        .register_fn("nrow", |df: &mut DataFrame| df.nrow() as INT)
        .register_fn("ncol", |df: &mut DataFrame| df.ncol() as INT)
        .register_fn("dim", |df: &mut DataFrame| dim(df.nrow(), df.ncol()))
        .register_fn("names", |df: &mut DataFrame| -> Array {
            df.names().iter().cloned().map(Dynamic::from).collect()
        })
        .register_fn("row", |df: &mut DataFrame, i: INT| -> RhaiResult<Map> {
            let i = index(df.nrow(), i)?;
            let mut row = Map::new();
            for (name, column) in df.names().iter().zip(df.columns()) {
                let cell = column.cell(i).map(super::Cell::into_dynamic).unwrap_or(Dynamic::UNIT);
                row.insert(name.as_str().into(), cell);
            }
            Ok(row)
        })
        .register_fn("to_string", |df: &mut DataFrame| df.to_string())
        .register_fn("to_debug", |df: &mut DataFrame| format!("{df:?}"))
        .register_indexer_get(|df: &mut DataFrame, name: ImmutableString| -> RhaiResult<Vector> {
            df.column(&name)
                .cloned()
                .ok_or_else(|| format!("no column named '{name}'").into())
        })
        .register_indexer_get(|df: &mut DataFrame, i: INT| -> RhaiResult<Vector> {
            let i = index(df.ncol(), i)?;
            Ok(df.columns()[i].clone())
        });
}

fn register_matrix(engine: &mut Engine) {
    engine
        .register_fn(
            "matrix",
            |items: Array, nrow: INT, ncol: INT| -> RhaiResult<Matrix> {
                let data = Vector::from_array(&items)?;
                Matrix::new(data, count(nrow, "nrow")?, count(ncol, "ncol")?).map_err(Into::into)
            },
        )
        .register_fn(
            "matrix",
            |items: Array, nrow: INT, ncol: INT, colnames: Array| -> RhaiResult<Matrix> {
                let data = Vector::from_array(&items)?;
                let names = colnames
                    .into_iter()
                    .map(|n| n.into_string().map_err(|t| format!("column name must be a string, got {t}")))
                    .collect::<Result<Vec<_>, _>>()?;
                Matrix::new(data, count(nrow, "nrow")?, count(ncol, "ncol")?)?
                    .with_colnames(names)
                    .map_err(Into::into)
            },
        )
        .register_fn("nrow", |m: &mut Matrix| m.nrow() as INT)
        .register_fn("ncol", |m: &mut Matrix| m.ncol() as INT)
        .register_fn("len", |m: &mut Matrix| m.data().len() as INT)
        .register_fn("dim", |m: &mut Matrix| dim(m.nrow(), m.ncol()))
        .register_fn("cell", |m: &mut Matrix, r: INT, c: INT| -> RhaiResult<Dynamic> {
            let r = index(m.nrow(), r)?;
            let c = index(m.ncol(), c)?;
            Ok(m.cell(r, c).map(super::Cell::into_dynamic).unwrap_or(Dynamic::UNIT))
        })
        .register_fn("to_string", |m: &mut Matrix| m.to_string())
        .register_fn("to_debug", |m: &mut Matrix| format!("{m:?}"));
}
