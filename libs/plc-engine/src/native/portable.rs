//! Opaque byte form of native values, carried in BYTEA payloads.
//!
//! A blob travels verbatim. Any other value is written as `PLC\x01` followed
//! by a JSON document; bytes without that header read back as a blob.

use plc_api::error::CallError;
use rhai::{Blob, Dynamic, Map};
use serde::{Deserialize, Serialize};

use super::{DataFrame, Matrix, Vector};

const MAGIC: &[u8; 4] = b"PLC\x01";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
enum Portable {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Array(Vec<Portable>),
    Map(Vec<(String, Portable)>),
    Vector(Vector),
    Frame(DataFrame),
    Matrix(Matrix),
}

fn to_portable(value: &Dynamic) -> Result<Portable, CallError> {
    if value.is_unit() {
        return Ok(Portable::Unit);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(Portable::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(Portable::Int(i));
    }
    if let Ok(f) = value.as_float() {
        return Ok(Portable::Float(f));
    }
    if let Ok(c) = value.as_char() {
        return Ok(Portable::Text(c.to_string()));
    }
    if value.is_string() {
        if let Ok(s) = value.clone().into_string() {
            return Ok(Portable::Text(s));
        }
    }
    if let Some(b) = value.clone().try_cast::<Blob>() {
        return Ok(Portable::Blob(b));
    }
    if let Ok(items) = value.clone().into_array() {
        return items
            .iter()
            .map(to_portable)
            .collect::<Result<_, _>>()
            .map(Portable::Array);
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        return map
            .iter()
            .map(|(k, v)| to_portable(v).map(|v| (k.to_string(), v)))
            .collect::<Result<_, _>>()
            .map(Portable::Map);
    }
    if let Some(v) = value.read_lock::<Vector>() {
        return Ok(Portable::Vector(v.clone()));
    }
    if let Some(df) = value.read_lock::<DataFrame>() {
        return Ok(Portable::Frame(df.clone()));
    }
    if let Some(m) = value.read_lock::<Matrix>() {
        return Ok(Portable::Matrix(m.clone()));
    }
    Err(CallError::type_mismatch(format!(
        "cannot serialize a value of type {}",
        value.type_name()
    )))
}

fn from_portable(value: Portable) -> Dynamic {
    match value {
        Portable::Unit => Dynamic::UNIT,
        Portable::Bool(b) => Dynamic::from_bool(b),
        Portable::Int(i) => Dynamic::from_int(i),
        Portable::Float(f) => Dynamic::from_float(f),
        Portable::Text(s) => Dynamic::from(s),
        Portable::Blob(b) => Dynamic::from_blob(b),
        Portable::Array(items) => Dynamic::from_array(items.into_iter().map(from_portable).collect()),
        Portable::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                map.insert(k.into(), from_portable(v));
            }
            Dynamic::from_map(map)
        }
        Portable::Vector(v) => Dynamic::from(v),
        Portable::Frame(df) => Dynamic::from(df),
        Portable::Matrix(m) => Dynamic::from(m),
    }
}

pub fn serialize(value: &Dynamic) -> Result<Vec<u8>, CallError> {
    if let Some(bytes) = value.clone().try_cast::<Blob>() {
        return Ok(bytes);
    }
    let portable = to_portable(value)?;
    let mut out = MAGIC.to_vec();
    serde_json::to_writer(&mut out, &portable)
        .map_err(|e| CallError::type_mismatch(format!("serialize {}: {e}", value.type_name())))?;
    Ok(out)
}

pub fn deserialize(bytes: &[u8]) -> Result<Dynamic, CallError> {
    match bytes.strip_prefix(MAGIC.as_slice()) {
        Some(body) => {
            let portable: Portable = serde_json::from_slice(body)
                .map_err(|e| CallError::argument(format!("corrupt serialized value: {e}")))?;
            Ok(from_portable(portable))
        }
        None => Ok(Dynamic::from_blob(bytes.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plc_api::error::ErrorKind;

    #[test]
    fn blob_travels_verbatim() {
        let bytes = serialize(&Dynamic::from_blob(vec![1, 2, 3])).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        let back = deserialize(&bytes).unwrap();
        assert_eq!(back.try_cast::<Blob>(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn structured_values_survive() {
        let df = DataFrame::new(
            vec!["x".into()],
            vec![Vector::Real(vec![Some(1.5), None])],
        )
        .unwrap();
        let bytes = serialize(&Dynamic::from(df.clone())).unwrap();
        assert!(bytes.starts_with(MAGIC));
        let back = deserialize(&bytes).unwrap();
        assert_eq!(back.read_lock::<DataFrame>().map(|d| d.clone()), Some(df));

        let mut map = Map::new();
        map.insert("k".into(), Dynamic::from_array(vec![Dynamic::from_int(1), Dynamic::UNIT]));
        let back = deserialize(&serialize(&Dynamic::from_map(map)).unwrap()).unwrap();
        let map = back.try_cast::<Map>().unwrap();
        let items = map["k"].clone().into_array().unwrap();
        assert_eq!(items[0].as_int(), Ok(1));
        assert!(items[1].is_unit());
    }

    #[test]
    fn corrupt_payload_is_an_argument_error() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(b"{not json");
        assert_eq!(deserialize(&bytes).unwrap_err().kind, ErrorKind::Argument);
    }

    fn framed(json: &str) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(json.as_bytes());
        bytes
    }

    #[test]
    fn misshapen_values_are_argument_errors() {
        let payloads = [
            r#"{"t":"frame","v":{"names":["a","b"],"columns":[{"class":"integer","cells":[1]}]}}"#,
            r#"{"t":"frame","v":{"names":["a","b"],"columns":[{"class":"integer","cells":[1]},{"class":"integer","cells":[]}]}}"#,
            r#"{"t":"matrix","v":{"nrow":3,"ncol":2,"data":{"class":"integer","cells":[1]}}}"#,
            r#"{"t":"vector","v":{"class":"factor","cells":{"codes":[0,3],"levels":["a"]}}}"#,
        ];
        for payload in payloads {
            let err = deserialize(&framed(payload)).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Argument, "{payload}");
        }
    }
}
