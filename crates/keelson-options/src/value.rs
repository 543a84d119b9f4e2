use crate::OptionsError;
use serde_json::Value as JsonValue;
use std::fmt;

/// A typed option value. The variant chosen at registration time fixes the
/// type; later assignments must parse as that type.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    StringList(Vec<String>),
}

impl OptionValue {
    pub fn kind(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "bool",
            OptionValue::Int(_) => "int",
            OptionValue::Double(_) => "double",
            OptionValue::String(_) => "string",
            OptionValue::StringList(_) => "string list",
        }
    }

    /// Assign from a raw command-line token. Scalars are replaced, lists
    /// accumulate one element per occurrence.
    pub(crate) fn assign(&mut self, raw: &str, option: &str) -> Result<(), OptionsError> {
        let invalid = |expected: &'static str| OptionsError::InvalidValue {
            option: option.to_owned(),
            value: raw.to_owned(),
            expected,
        };

        match self {
            OptionValue::Bool(b) => {
                *b = match raw {
                    "true" | "yes" | "on" | "1" => true,
                    "false" | "no" | "off" | "0" => false,
                    _ => return Err(invalid("bool")),
                };
            }
            OptionValue::Int(i) => *i = raw.parse().map_err(|_| invalid("int"))?,
            OptionValue::Double(d) => *d = raw.parse().map_err(|_| invalid("double"))?,
            OptionValue::String(s) => *s = raw.to_owned(),
            OptionValue::StringList(l) => l.push(raw.to_owned()),
        }
        Ok(())
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            OptionValue::Bool(b) => JsonValue::from(*b),
            OptionValue::Int(i) => JsonValue::from(*i),
            OptionValue::Double(d) => JsonValue::from(*d),
            OptionValue::String(s) => JsonValue::from(s.clone()),
            OptionValue::StringList(l) => JsonValue::from(l.clone()),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Int(i) => write!(f, "{i}"),
            OptionValue::Double(d) => write!(f, "{d}"),
            OptionValue::String(s) => write!(f, "\"{s}\""),
            OptionValue::StringList(l) => write!(f, "[{}]", l.join(", ")),
        }
    }
}
