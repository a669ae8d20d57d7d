use serde::{Deserialize, Serialize};

use crate::error::CallError;

/// Wire type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WireType {
    Logical,
    Int,
    Real,
    Text,
    Bytea,
    Composite,
    Array,
    Setof,
    Void,
}

impl WireType {
    /// Scalar tags carry one typed payload (or null).
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            WireType::Logical | WireType::Int | WireType::Real | WireType::Text | WireType::Bytea
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WireType::Logical => "LOGICAL",
            WireType::Int => "INT",
            WireType::Real => "REAL",
            WireType::Text => "TEXT",
            WireType::Bytea => "BYTEA",
            WireType::Composite => "COMPOSITE",
            WireType::Array => "ARRAY",
            WireType::Setof => "SETOF",
            WireType::Void => "VOID",
        }
    }
}

impl std::fmt::Display for WireType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-null scalar payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Logical(bool),
    Int(i32),
    Real(f64),
    Text(String),
    /// Opaque bytes; also the carrier for serialized native objects.
    Bytea(Vec<u8>),
}

impl Scalar {
    pub fn wire_type(&self) -> WireType {
        match self {
            Scalar::Logical(_) => WireType::Logical,
            Scalar::Int(_) => WireType::Int,
            Scalar::Real(_) => WireType::Real,
            Scalar::Text(_) => WireType::Text,
            Scalar::Bytea(_) => WireType::Bytea,
        }
    }
}

/// A scalar wire value: type tag plus a payload that may be null.
///
/// The tag and the payload always agree; `new` rejects a mismatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarData {
    ty: WireType,
    value: Option<Scalar>,
}

impl ScalarData {
    pub fn new(ty: WireType, value: Option<Scalar>) -> Result<Self, CallError> {
        if !ty.is_scalar() {
            return Err(CallError::argument(format!("{ty} is not a scalar type")));
        }
        if let Some(v) = &value {
            if v.wire_type() != ty {
                return Err(CallError::argument(format!(
                    "scalar declared as {ty} carries a {} payload",
                    v.wire_type()
                )));
            }
        }
        Ok(Self { ty, value })
    }

    /// Null scalar of the given tag.
    pub fn null(ty: WireType) -> Self {
        Self { ty, value: None }
    }

    pub fn ty(&self) -> WireType {
        self.ty
    }

    pub fn value(&self) -> Option<&Scalar> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<Scalar> {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

impl From<Scalar> for ScalarData {
    fn from(value: Scalar) -> Self {
        Self {
            ty: value.wire_type(),
            value: Some(value),
        }
    }
}

/// One named field of a composite record.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeField {
    pub name: String,
    pub value: WireValue,
}

/// Named-field record (a row / UDT value).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompositeData {
    pub fields: Vec<CompositeField>,
}

impl CompositeData {
    pub fn field(mut self, name: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.fields.push(CompositeField {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// Homogeneous 1-D sequence; every non-null element has `element_type`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayData {
    pub element_type: WireType,
    pub values: Vec<Option<Scalar>>,
}

/// Multi-row, multi-column value set.
///
/// Every row is aligned to `column_types`.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOfData {
    pub column_names: Vec<String>,
    pub column_types: Vec<WireType>,
    pub rows: Vec<Vec<Option<Scalar>>>,
}

impl SetOfData {
    pub fn ncols(&self) -> usize {
        self.column_types.len()
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }
}

/// Wire value exchanged between the query engine and the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawValue", into = "RawValue")]
pub enum WireValue {
    Scalar(ScalarData),
    Composite(CompositeData),
    Array(ArrayData),
    SetOf(SetOfData),
    Void,
}

impl WireValue {
    pub fn wire_type(&self) -> WireType {
        match self {
            WireValue::Scalar(s) => s.ty(),
            WireValue::Composite(_) => WireType::Composite,
            WireValue::Array(_) => WireType::Array,
            WireValue::SetOf(_) => WireType::Setof,
            WireValue::Void => WireType::Void,
        }
    }

    pub fn null(ty: WireType) -> Self {
        WireValue::Scalar(ScalarData::null(ty))
    }

    pub fn as_scalar(&self) -> Option<&ScalarData> {
        match self {
            WireValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Check the structural invariants: tag/payload agreement, homogeneous
    /// arrays and rectangular sets.
    pub fn validate(&self) -> Result<(), CallError> {
        match self {
            WireValue::Scalar(s) => ScalarData::new(s.ty, s.value.clone()).map(|_| ()),
            WireValue::Composite(c) => {
                for field in &c.fields {
                    field
                        .value
                        .validate()
                        .map_err(|e| e.with_context(format!("field '{}'", field.name)))?;
                }
                Ok(())
            }
            WireValue::Array(a) => {
                if !a.element_type.is_scalar() {
                    return Err(CallError::argument(format!(
                        "array element type {} is not a scalar type",
                        a.element_type
                    )));
                }
                for (i, v) in a.values.iter().enumerate() {
                    check_cell(a.element_type, v.as_ref())
                        .map_err(|e| e.with_context(format!("array element {i}")))?;
                }
                Ok(())
            }
            WireValue::SetOf(s) => {
                if s.column_names.len() != s.column_types.len() {
                    return Err(CallError::argument(format!(
                        "setof has {} column names but {} column types",
                        s.column_names.len(),
                        s.column_types.len()
                    )));
                }
                if let Some(bad) = s.column_types.iter().find(|t| !t.is_scalar()) {
                    return Err(CallError::argument(format!(
                        "setof column type {bad} is not a scalar type"
                    )));
                }
                for (r, row) in s.rows.iter().enumerate() {
                    if row.len() != s.column_types.len() {
                        return Err(CallError::argument(format!(
                            "setof row {r} has {} cells, expected {}",
                            row.len(),
                            s.column_types.len()
                        )));
                    }
                    for (c, cell) in row.iter().enumerate() {
                        check_cell(s.column_types[c], cell.as_ref())
                            .map_err(|e| e.with_context(format!("setof cell ({r}, {c})")))?;
                    }
                }
                Ok(())
            }
            WireValue::Void => Ok(()),
        }
    }
}

fn check_cell(ty: WireType, cell: Option<&Scalar>) -> Result<(), CallError> {
    match cell {
        Some(v) if v.wire_type() != ty => Err(CallError::argument(format!(
            "expected {ty}, found {}",
            v.wire_type()
        ))),
        _ => Ok(()),
    }
}

impl From<ScalarData> for WireValue {
    fn from(value: ScalarData) -> Self {
        WireValue::Scalar(value)
    }
}

impl From<Scalar> for WireValue {
    fn from(value: Scalar) -> Self {
        WireValue::Scalar(value.into())
    }
}

impl From<CompositeData> for WireValue {
    fn from(value: CompositeData) -> Self {
        WireValue::Composite(value)
    }
}

impl From<ArrayData> for WireValue {
    fn from(value: ArrayData) -> Self {
        WireValue::Array(value)
    }
}

impl From<SetOfData> for WireValue {
    fn from(value: SetOfData) -> Self {
        WireValue::SetOf(value)
    }
}

// ---------------------------------------------------------------------------
// JSON form: {"type": "<TAG>", "value": <payload>}
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawValue {
    #[serde(rename = "type")]
    pub ty: WireType,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawComposite {
    fields: Vec<RawField>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    ty: WireType,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    value: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawArray {
    element_type: WireType,
    values: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawSetOf {
    columns: Vec<String>,
    types: Vec<WireType>,
    rows: Vec<Vec<serde_json::Value>>,
}

fn scalar_from_json(ty: WireType, v: &serde_json::Value) -> Result<Option<Scalar>, CallError> {
    if v.is_null() {
        return Ok(None);
    }
    let mismatch = || CallError::argument(format!("expected {ty} payload, found {v}"));
    let scalar = match ty {
        WireType::Logical => Scalar::Logical(v.as_bool().ok_or_else(mismatch)?),
        WireType::Int => {
            let i = v.as_i64().ok_or_else(mismatch)?;
            Scalar::Int(i32::try_from(i).map_err(|_| mismatch())?)
        }
        WireType::Real => Scalar::Real(match v.as_str() {
            Some(text) => real_from_text(text).ok_or_else(mismatch)?,
            None => v.as_f64().ok_or_else(mismatch)?,
        }),
        WireType::Text => Scalar::Text(v.as_str().ok_or_else(mismatch)?.to_string()),
        WireType::Bytea => Scalar::Bytea(serde_json::from_value(v.clone()).map_err(|_| mismatch())?),
        other => {
            return Err(CallError::argument(format!("{other} is not a scalar type")));
        }
    };
    Ok(Some(scalar))
}

/// JSON numbers cannot hold non-finite reals; they travel as the
/// PostgreSQL spellings instead.
fn real_from_text(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

fn real_to_json(r: f64) -> serde_json::Value {
    if r.is_nan() {
        serde_json::json!("NaN")
    } else if r.is_infinite() {
        serde_json::json!(if r > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        serde_json::json!(r)
    }
}

fn scalar_to_json(v: Option<&Scalar>) -> serde_json::Value {
    match v {
        None => serde_json::Value::Null,
        Some(Scalar::Logical(b)) => serde_json::json!(b),
        Some(Scalar::Int(i)) => serde_json::json!(i),
        Some(Scalar::Real(r)) => real_to_json(*r),
        Some(Scalar::Text(s)) => serde_json::json!(s),
        Some(Scalar::Bytea(b)) => serde_json::json!(b),
    }
}

impl TryFrom<RawValue> for WireValue {
    type Error = CallError;

    fn try_from(raw: RawValue) -> Result<Self, Self::Error> {
        let value = match raw.ty {
            WireType::Composite => {
                let composite: RawComposite = serde_json::from_value(raw.value)?;
                let mut fields = Vec::with_capacity(composite.fields.len());
                for f in composite.fields {
                    let value = WireValue::try_from(RawValue {
                        ty: f.ty,
                        value: f.value,
                    })
                    .map_err(|e| e.with_context(format!("field '{}'", f.name)))?;
                    fields.push(CompositeField { name: f.name, value });
                }
                WireValue::Composite(CompositeData { fields })
            }
            WireType::Array => {
                let array: RawArray = serde_json::from_value(raw.value)?;
                let values = array
                    .values
                    .iter()
                    .map(|v| scalar_from_json(array.element_type, v))
                    .collect::<Result<Vec<_>, _>>()?;
                WireValue::Array(ArrayData {
                    element_type: array.element_type,
                    values,
                })
            }
            WireType::Setof => {
                let set: RawSetOf = serde_json::from_value(raw.value)?;
                let mut rows = Vec::with_capacity(set.rows.len());
                for (r, row) in set.rows.iter().enumerate() {
                    if row.len() != set.types.len() {
                        return Err(CallError::argument(format!(
                            "setof row {r} has {} cells, expected {}",
                            row.len(),
                            set.types.len()
                        )));
                    }
                    let cells = row
                        .iter()
                        .zip(&set.types)
                        .map(|(v, ty)| scalar_from_json(*ty, v))
                        .collect::<Result<Vec<_>, _>>()?;
                    rows.push(cells);
                }
                WireValue::SetOf(SetOfData {
                    column_names: set.columns,
                    column_types: set.types,
                    rows,
                })
            }
            WireType::Void => WireValue::Void,
            ty => WireValue::Scalar(ScalarData::new(ty, scalar_from_json(ty, &raw.value)?)?),
        };
        value.validate()?;
        Ok(value)
    }
}

impl From<WireValue> for RawValue {
    fn from(value: WireValue) -> Self {
        let ty = value.wire_type();
        let value = match value {
            WireValue::Scalar(s) => scalar_to_json(s.value()),
            WireValue::Composite(c) => {
                let fields = c
                    .fields
                    .into_iter()
                    .map(|f| {
                        let raw = RawValue::from(f.value);
                        RawField {
                            name: f.name,
                            ty: raw.ty,
                            value: raw.value,
                        }
                    })
                    .collect();
                serde_json::to_value(RawComposite { fields }).unwrap_or_default()
            }
            WireValue::Array(a) => serde_json::to_value(RawArray {
                element_type: a.element_type,
                values: a.values.iter().map(|v| scalar_to_json(v.as_ref())).collect(),
            })
            .unwrap_or_default(),
            WireValue::SetOf(s) => serde_json::to_value(RawSetOf {
                columns: s.column_names,
                types: s.column_types,
                rows: s
                    .rows
                    .iter()
                    .map(|row| row.iter().map(|v| scalar_to_json(v.as_ref())).collect())
                    .collect(),
            })
            .unwrap_or_default(),
            WireValue::Void => serde_json::Value::Null,
        };
        RawValue { ty, value }
    }
}
