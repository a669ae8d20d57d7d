use serde::{Deserialize, Serialize};

use crate::error::CallError;
use crate::schema::ReturnType;
use crate::value::{RawValue, WireValue};

/// Procedure to call: name plus source body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcSrc {
    pub name: String,
    pub src: String,
}

/// One positional argument. An empty name means the argument is reachable
/// only positionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArgument", into = "RawArgument")]
pub struct Argument {
    pub name: String,
    pub value: WireValue,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<WireValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawArgument {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    ty: crate::value::WireType,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    value: serde_json::Value,
}

impl TryFrom<RawArgument> for Argument {
    type Error = CallError;

    fn try_from(raw: RawArgument) -> Result<Self, Self::Error> {
        let value = WireValue::try_from(RawValue {
            ty: raw.ty,
            value: raw.value,
        })
        .map_err(|e| e.with_context(format!("argument '{}'", raw.name)))?;
        Ok(Self {
            name: raw.name,
            value,
        })
    }
}

impl From<Argument> for RawArgument {
    fn from(arg: Argument) -> Self {
        let raw = RawValue::from(arg.value);
        Self {
            name: arg.name,
            ty: raw.ty,
            value: raw.value,
        }
    }
}

/// One invocation request, delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub proc: ProcSrc,
    #[serde(default)]
    pub args: Vec<Argument>,
    #[serde(default)]
    pub rettype: ReturnType,
}

impl CallRequest {
    pub fn new(name: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            proc: ProcSrc {
                name: name.into(),
                src: src.into(),
            },
            args: Vec::new(),
            rettype: ReturnType::default(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.args.push(Argument::new(name, value));
        self
    }

    pub fn returns(mut self, rettype: ReturnType) -> Self {
        self.rettype = rettype;
        self
    }
}

/// Guest-side failure reported inside a well-formed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    pub message: String,
}

/// One invocation response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    #[serde(default)]
    pub results: Vec<WireValue>,
    /// Diagnostic text accumulated during the call.
    #[serde(default)]
    pub logs: String,
    /// Absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<Exception>,
}

impl CallResponse {
    pub fn result(&self) -> Option<&WireValue> {
        self.results.first()
    }

    pub fn is_ok(&self) -> bool {
        self.exception.is_none()
    }

    pub fn set_exception(&mut self, err: &CallError) {
        self.exception = Some(Exception {
            message: err.to_string(),
        });
    }
}
