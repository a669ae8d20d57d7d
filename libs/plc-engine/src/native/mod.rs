//! Native value model of the embedded runtime.
//!
//! Scripts see plain Rhai values (`()`, `bool`, `i64`, `f64`, strings, blobs,
//! arrays, maps) plus three registered custom types that carry column data the
//! way the query engine ships it:
//!
//! - [`Vector`]: typed 1-D column, every cell may be missing.
//! - [`DataFrame`]: ordered named columns of equal length.
//! - [`Matrix`]: `nrow × ncol` cells stored column-major.

pub mod api;
pub mod portable;

use std::fmt;

use rhai::{Array, Blob, Dynamic, FLOAT, INT};
use serde::{Deserialize, Serialize};

/// Actual storage class of a native value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Null,
    Logical,
    Integer,
    Real,
    Text,
    Raw,
    /// Integer codes plus a label table.
    Factor,
    /// Untyped `rhai::Array`.
    List,
    /// `rhai::Map`.
    Record,
    Frame,
    Matrix,
    Unsupported,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Null => "null",
            StorageClass::Logical => "logical",
            StorageClass::Integer => "integer",
            StorageClass::Real => "real",
            StorageClass::Text => "text",
            StorageClass::Raw => "raw",
            StorageClass::Factor => "factor",
            StorageClass::List => "list",
            StorageClass::Record => "record",
            StorageClass::Frame => "data frame",
            StorageClass::Matrix => "matrix",
            StorageClass::Unsupported => "unsupported",
        }
    }
}

/// Storage class of a native value, looking through vectors to their cell class.
pub fn classify(value: &Dynamic) -> StorageClass {
    if value.is_unit() {
        StorageClass::Null
    } else if value.is_bool() {
        StorageClass::Logical
    } else if value.is_int() {
        StorageClass::Integer
    } else if value.is_float() {
        StorageClass::Real
    } else if value.is_string() || value.is_char() {
        StorageClass::Text
    } else if value.is_blob() {
        StorageClass::Raw
    } else if value.is_array() {
        StorageClass::List
    } else if value.is_map() {
        StorageClass::Record
    } else if let Some(v) = value.read_lock::<Vector>() {
        v.class()
    } else if value.is::<DataFrame>() {
        StorageClass::Frame
    } else if value.is::<Matrix>() {
        StorageClass::Matrix
    } else {
        StorageClass::Unsupported
    }
}

/// One non-missing cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Raw(Vec<u8>),
}

impl Cell {
    pub fn class(&self) -> StorageClass {
        match self {
            Cell::Logical(_) => StorageClass::Logical,
            Cell::Integer(_) => StorageClass::Integer,
            Cell::Real(_) => StorageClass::Real,
            Cell::Text(_) => StorageClass::Text,
            Cell::Raw(_) => StorageClass::Raw,
        }
    }

    pub fn into_dynamic(self) -> Dynamic {
        match self {
            Cell::Logical(b) => Dynamic::from_bool(b),
            Cell::Integer(i) => Dynamic::from_int(i),
            Cell::Real(r) => Dynamic::from_float(r),
            Cell::Text(s) => Dynamic::from(s),
            Cell::Raw(b) => Dynamic::from_blob(b),
        }
    }

    /// Cell of a plain scalar value. `None` for `()` and for anything that is
    /// not a plain scalar.
    pub fn from_dynamic(value: &Dynamic) -> Option<Cell> {
        if let Ok(b) = value.as_bool() {
            Some(Cell::Logical(b))
        } else if let Ok(i) = value.as_int() {
            Some(Cell::Integer(i))
        } else if let Ok(r) = value.as_float() {
            Some(Cell::Real(r))
        } else if let Ok(c) = value.as_char() {
            Some(Cell::Text(c.to_string()))
        } else if value.is_string() {
            value.clone().into_string().ok().map(Cell::Text)
        } else if value.is_blob() {
            value.clone().try_cast::<Blob>().map(Cell::Raw)
        } else {
            None
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Logical(b) => write!(f, "{b}"),
            Cell::Integer(i) => write!(f, "{i}"),
            Cell::Real(r) => write!(f, "{r}"),
            Cell::Text(s) => write!(f, "{s:?}"),
            Cell::Raw(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Enumerated column: integer codes into a label table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FactorParts")]
pub struct Factor {
    pub codes: Vec<Option<u32>>,
    pub levels: Vec<String>,
}

#[derive(Deserialize)]
struct FactorParts {
    codes: Vec<Option<u32>>,
    levels: Vec<String>,
}

impl TryFrom<FactorParts> for Factor {
    type Error = String;

    fn try_from(parts: FactorParts) -> Result<Self, String> {
        Factor::new(parts.codes, parts.levels)
    }
}

impl Factor {
    /// Every present code must index into `levels`.
    pub fn new(codes: Vec<Option<u32>>, levels: Vec<String>) -> Result<Self, String> {
        if let Some((i, code)) = codes
            .iter()
            .enumerate()
            .find_map(|(i, c)| c.filter(|c| *c as usize >= levels.len()).map(|c| (i, c)))
        {
            return Err(format!(
                "factor code {code} at cell {i} is outside {} levels",
                levels.len()
            ));
        }
        Ok(Self { codes, levels })
    }

    /// Build from labels. Levels are the sorted distinct labels.
    pub fn from_labels(labels: &[Option<String>]) -> Self {
        let mut levels: Vec<String> = labels.iter().flatten().cloned().collect();
        levels.sort();
        levels.dedup();
        let codes = labels
            .iter()
            .map(|l| {
                l.as_ref()
                    .and_then(|l| levels.binary_search(l).ok())
                    .map(|i| i as u32)
            })
            .collect();
        Self { codes, levels }
    }

    pub fn label(&self, i: usize) -> Option<&str> {
        let code = (*self.codes.get(i)?)?;
        self.levels.get(code as usize).map(String::as_str)
    }
}

/// Typed 1-D column. `None` cells are missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", content = "cells", rename_all = "lowercase")]
pub enum Vector {
    Logical(Vec<Option<bool>>),
    Integer(Vec<Option<i64>>),
    Real(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Raw(Vec<Option<Vec<u8>>>),
    Factor(Factor),
}

impl Vector {
    pub fn class(&self) -> StorageClass {
        match self {
            Vector::Logical(_) => StorageClass::Logical,
            Vector::Integer(_) => StorageClass::Integer,
            Vector::Real(_) => StorageClass::Real,
            Vector::Text(_) => StorageClass::Text,
            Vector::Raw(_) => StorageClass::Raw,
            Vector::Factor(_) => StorageClass::Factor,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Vector::Logical(v) => v.len(),
            Vector::Integer(v) => v.len(),
            Vector::Real(v) => v.len(),
            Vector::Text(v) => v.len(),
            Vector::Raw(v) => v.len(),
            Vector::Factor(f) => f.codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell `i`; factor cells resolve to their label. `None` when missing or
    /// out of range.
    pub fn cell(&self, i: usize) -> Option<Cell> {
        match self {
            Vector::Logical(v) => v.get(i).copied().flatten().map(Cell::Logical),
            Vector::Integer(v) => v.get(i).copied().flatten().map(Cell::Integer),
            Vector::Real(v) => v.get(i).copied().flatten().map(Cell::Real),
            Vector::Text(v) => v.get(i).cloned().flatten().map(Cell::Text),
            Vector::Raw(v) => v.get(i).cloned().flatten().map(Cell::Raw),
            Vector::Factor(f) => f.label(i).map(|l| Cell::Text(l.to_string())),
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = Option<Cell>> + '_ {
        (0..self.len()).map(|i| self.cell(i))
    }

    /// Build a vector of `class` from cells that must all be of that class.
    pub fn from_cells(class: StorageClass, cells: Vec<Option<Cell>>) -> Result<Self, String> {
        fn take<T>(
            cells: Vec<Option<Cell>>,
            class: StorageClass,
            pick: impl Fn(Cell) -> Option<T>,
        ) -> Result<Vec<Option<T>>, String> {
            cells
                .into_iter()
                .enumerate()
                .map(|(i, c)| match c {
                    None => Ok(None),
                    Some(c) => {
                        let found = c.class();
                        pick(c).map(Some).ok_or_else(|| {
                            format!("cell {i} is {}, expected {}", found.as_str(), class.as_str())
                        })
                    }
                })
                .collect()
        }

        match class {
            StorageClass::Logical => take(cells, class, |c| match c {
                Cell::Logical(b) => Some(b),
                _ => None,
            })
            .map(Vector::Logical),
            StorageClass::Integer => take(cells, class, |c| match c {
                Cell::Integer(i) => Some(i),
                _ => None,
            })
            .map(Vector::Integer),
            StorageClass::Real => take(cells, class, |c| match c {
                Cell::Real(r) => Some(r),
                _ => None,
            })
            .map(Vector::Real),
            StorageClass::Text => take(cells, class, |c| match c {
                Cell::Text(s) => Some(s),
                _ => None,
            })
            .map(Vector::Text),
            StorageClass::Raw => take(cells, class, |c| match c {
                Cell::Raw(b) => Some(b),
                _ => None,
            })
            .map(Vector::Raw),
            StorageClass::Factor => take(cells, class, |c| match c {
                Cell::Text(s) => Some(s),
                _ => None,
            })
            .map(|labels| Vector::Factor(Factor::from_labels(&labels))),
            other => Err(format!("cannot build a vector of class {}", other.as_str())),
        }
    }

    /// Infer a typed vector from a script array.
    ///
    /// `()` elements become missing cells. Integers mixed with reals widen to
    /// real. An array with no typed element is logical.
    pub fn from_array(items: &Array) -> Result<Self, String> {
        let mut cells = Vec::with_capacity(items.len());
        let mut class: Option<StorageClass> = None;
        for (i, item) in items.iter().enumerate() {
            if item.is_unit() {
                cells.push(None);
                continue;
            }
            let cell = Cell::from_dynamic(item).ok_or_else(|| {
                format!("element {i} of type {} cannot be stored in a vector", item.type_name())
            })?;
            class = Some(match (class, cell.class()) {
                (None, c) => c,
                (Some(a), b) if a == b => a,
                (Some(StorageClass::Integer), StorageClass::Real)
                | (Some(StorageClass::Real), StorageClass::Integer) => StorageClass::Real,
                (Some(a), b) => {
                    return Err(format!(
                        "element {i} is {}, earlier elements are {}",
                        b.as_str(),
                        a.as_str()
                    ));
                }
            });
            cells.push(Some(cell));
        }

        let class = class.unwrap_or(StorageClass::Logical);
        if class == StorageClass::Real {
            cells = cells
                .into_iter()
                .map(|c| match c {
                    Some(Cell::Integer(i)) => Some(Cell::Real(i as f64)),
                    other => other,
                })
                .collect();
        }
        Self::from_cells(class, cells)
    }

    pub fn to_array(&self) -> Array {
        self.cells()
            .map(|c| c.map(Cell::into_dynamic).unwrap_or(Dynamic::UNIT))
            .collect()
    }

    pub fn sum(&self) -> Result<Dynamic, String> {
        match self {
            Vector::Logical(v) => Ok(Dynamic::from_int(
                v.iter().flatten().filter(|b| **b).count() as INT,
            )),
            Vector::Integer(v) => Ok(Dynamic::from_int(v.iter().flatten().sum())),
            Vector::Real(v) => Ok(Dynamic::from_float(v.iter().flatten().sum())),
            other => Err(format!("cannot sum a {} vector", other.class().as_str())),
        }
    }

    /// Mean of the non-missing cells; `()` when there are none.
    pub fn mean(&self) -> Result<Dynamic, String> {
        let values: Vec<FLOAT> = match self {
            Vector::Logical(v) => v.iter().flatten().map(|b| if *b { 1.0 } else { 0.0 }).collect(),
            Vector::Integer(v) => v.iter().flatten().map(|i| *i as FLOAT).collect(),
            Vector::Real(v) => v.iter().flatten().copied().collect(),
            other => return Err(format!("cannot average a {} vector", other.class().as_str())),
        };
        if values.is_empty() {
            return Ok(Dynamic::UNIT);
        }
        Ok(Dynamic::from_float(values.iter().sum::<FLOAT>() / values.len() as FLOAT))
    }
}

impl IntoIterator for Vector {
    type Item = Dynamic;
    type IntoIter = std::vec::IntoIter<Dynamic>;

    fn into_iter(self) -> Self::IntoIter {
        self.to_array().into_iter()
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.class().as_str())?;
        for (i, c) in self.cells().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match c {
                Some(c) => write!(f, "{c}")?,
                None => write!(f, "NA")?,
            }
        }
        write!(f, "]")
    }
}

/// Column-oriented table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameParts")]
pub struct DataFrame {
    names: Vec<String>,
    columns: Vec<Vector>,
}

#[derive(Deserialize)]
struct FrameParts {
    names: Vec<String>,
    columns: Vec<Vector>,
}

impl TryFrom<FrameParts> for DataFrame {
    type Error = String;

    fn try_from(parts: FrameParts) -> Result<Self, String> {
        DataFrame::new(parts.names, parts.columns)
    }
}

impl DataFrame {
    pub fn new(names: Vec<String>, columns: Vec<Vector>) -> Result<Self, String> {
        if names.len() != columns.len() {
            return Err(format!(
                "data frame has {} names for {} columns",
                names.len(),
                columns.len()
            ));
        }
        if let Some(first) = columns.first() {
            if let Some((i, bad)) = columns.iter().enumerate().find(|(_, c)| c.len() != first.len()) {
                return Err(format!(
                    "column '{}' has {} rows, expected {}",
                    names[i],
                    bad.len(),
                    first.len()
                ));
            }
        }
        Ok(Self { names, columns })
    }

    pub fn nrow(&self) -> usize {
        self.columns.first().map(Vector::len).unwrap_or(0)
    }

    pub fn ncol(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> &[Vector] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Vector> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.columns.get(i))
    }
}

impl fmt::Display for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data.frame {}x{} [{}]", self.nrow(), self.ncol(), self.names.join(", "))
    }
}

/// Two-dimensional cells stored column-major: cell `(r, c)` lives at
/// `nrow * c + r`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MatrixParts")]
pub struct Matrix {
    nrow: usize,
    ncol: usize,
    data: Vector,
    colnames: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct MatrixParts {
    nrow: usize,
    ncol: usize,
    data: Vector,
    #[serde(default)]
    colnames: Option<Vec<String>>,
}

impl TryFrom<MatrixParts> for Matrix {
    type Error = String;

    fn try_from(parts: MatrixParts) -> Result<Self, String> {
        let m = Matrix::new(parts.data, parts.nrow, parts.ncol)?;
        match parts.colnames {
            Some(names) => m.with_colnames(names),
            None => Ok(m),
        }
    }
}

impl Matrix {
    pub fn new(data: Vector, nrow: usize, ncol: usize) -> Result<Self, String> {
        let cells = nrow
            .checked_mul(ncol)
            .ok_or_else(|| format!("matrix {nrow}x{ncol} is too large"))?;
        if data.len() != cells {
            return Err(format!(
                "matrix {nrow}x{ncol} needs {cells} cells, got {}",
                data.len()
            ));
        }
        Ok(Self {
            nrow,
            ncol,
            data,
            colnames: None,
        })
    }

    pub fn with_colnames(mut self, names: Vec<String>) -> Result<Self, String> {
        if names.len() != self.ncol {
            return Err(format!("{} column names for {} columns", names.len(), self.ncol));
        }
        self.colnames = Some(names);
        Ok(self)
    }

    pub fn nrow(&self) -> usize {
        self.nrow
    }

    pub fn ncol(&self) -> usize {
        self.ncol
    }

    pub fn data(&self) -> &Vector {
        &self.data
    }

    pub fn colnames(&self) -> Option<&[String]> {
        self.colnames.as_deref()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<Cell> {
        if row >= self.nrow || col >= self.ncol {
            return None;
        }
        self.data.cell(self.nrow * col + row)
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "matrix {}x{} of {}", self.nrow, self.ncol, self.data.class().as_str())
    }
}
