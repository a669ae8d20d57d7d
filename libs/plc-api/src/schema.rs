use crate::error::CallError;
use crate::value::WireType;

/// Declared return type of a call.
///
/// `subtypes` carries:
/// - Composite: one type per field, in field order.
/// - Array: exactly one entry, the element type.
/// - Setof: one type per column, in column order.
/// - Scalars and Void: ignored.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReturnType {
    #[serde(rename = "type")]
    pub ty: WireType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtypes: Vec<WireType>,
}

impl Default for ReturnType {
    fn default() -> Self {
        Self::void()
    }
}

impl ReturnType {
    pub fn void() -> Self {
        Self {
            ty: WireType::Void,
            subtypes: Vec::new(),
        }
    }

    pub fn scalar(ty: WireType) -> Self {
        Self {
            ty,
            subtypes: Vec::new(),
        }
    }

    pub fn composite(fields: impl Into<Vec<WireType>>) -> Self {
        Self {
            ty: WireType::Composite,
            subtypes: fields.into(),
        }
    }

    pub fn array(element: WireType) -> Self {
        Self {
            ty: WireType::Array,
            subtypes: vec![element],
        }
    }

    pub fn setof(columns: impl Into<Vec<WireType>>) -> Self {
        Self {
            ty: WireType::Setof,
            subtypes: columns.into(),
        }
    }

    /// Element type of an array return.
    pub fn element_type(&self) -> Option<WireType> {
        match self.ty {
            WireType::Array => self.subtypes.first().copied(),
            _ => None,
        }
    }

    /// Check that the descriptor can be materialized at all.
    ///
    /// A failure here is not a guest error: the response cannot be built.
    pub fn validate(&self) -> Result<(), CallError> {
        match self.ty {
            WireType::Void => Ok(()),
            ty if ty.is_scalar() => Ok(()),
            WireType::Array => match self.subtypes.as_slice() {
                [elem] if elem.is_scalar() => Ok(()),
                other => Err(CallError::unsupported(format!(
                    "ARRAY return needs exactly one scalar element type, got {other:?}"
                ))),
            },
            WireType::Composite | WireType::Setof => {
                if self.subtypes.is_empty() {
                    return Err(CallError::unsupported(format!(
                        "{} return declares no subtypes",
                        self.ty
                    )));
                }
                if let Some(bad) = self.subtypes.iter().find(|t| !t.is_scalar()) {
                    return Err(CallError::unsupported(format!(
                        "{} return with nested {bad} subtype",
                        self.ty
                    )));
                }
                Ok(())
            }
            ty => Err(CallError::unsupported(format!("return type {ty}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn materializable_descriptors() {
        assert!(ReturnType::void().validate().is_ok());
        assert!(ReturnType::scalar(WireType::Bytea).validate().is_ok());
        assert!(ReturnType::array(WireType::Int).validate().is_ok());
        assert!(ReturnType::setof([WireType::Int, WireType::Text]).validate().is_ok());
        assert!(ReturnType::composite([WireType::Real]).validate().is_ok());
    }

    #[test]
    fn unmaterializable_descriptors_are_unsupported() {
        let cases = [
            ReturnType::setof(Vec::new()),
            ReturnType::composite([WireType::Array]),
            ReturnType {
                ty: WireType::Array,
                subtypes: vec![],
            },
            ReturnType {
                ty: WireType::Array,
                subtypes: vec![WireType::Int, WireType::Int],
            },
        ];
        for rt in cases {
            assert_eq!(rt.validate().unwrap_err().kind, ErrorKind::Unsupported, "{rt:?}");
        }
    }

    #[test]
    fn subtypes_are_optional_in_json() {
        let rt: ReturnType = serde_json::from_str(r#"{"type":"INT"}"#).unwrap();
        assert_eq!(rt, ReturnType::scalar(WireType::Int));
        assert_eq!(ReturnType::array(WireType::Text).element_type(), Some(WireType::Text));
    }
}
