use serde_json::{Map, Value};

/// A row as returned by the SIS. Loosely typed until the validator promotes it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Fields(Map<String, Value>),
    /// The SIS returned something that is not a JSON object.
    Unparsed { payload_bytes: usize, reason: String },
}

impl RawRecord {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => RawRecord::Fields(map),
            other => {
                let kind = match &other {
                    Value::Null => "null",
                    Value::Bool(_) => "boolean",
                    Value::Number(_) => "number",
                    Value::String(_) => "string",
                    Value::Array(_) => "array",
                    Value::Object(_) => "object",
                };
                RawRecord::Unparsed {
                    payload_bytes: other.to_string().len(),
                    reason: format!("expected a JSON object, got {kind}"),
                }
            }
        }
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            RawRecord::Fields(map) => Some(map),
            RawRecord::Unparsed { .. } => None,
        }
    }
}
