//! Value types for capability parameters and return values.
//!
//! Catalog documents describe types with loose, Python-flavoured strings
//! (`str`, `List[str]`, `Dict[str, Any]`, `Optional[int]`).  They are parsed
//! once at load time into [`ValueType`] so that plan validation and runtime
//! argument checks compare structured types instead of strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The declared type of a parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    /// Homogeneous list; the element type is [`ValueType::Any`] when the
    /// catalog only says `list`.
    List(Box<ValueType>),
    Object,
    Any,
}

impl ValueType {
    /// Whether a concrete JSON value can be passed where this type is expected.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::List(element) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| element.accepts(item))),
        }
    }

    /// Whether a value declared as `source` can be passed where this type is
    /// expected.
    ///
    /// `Any` on either side is assignable, integers widen to numbers, and
    /// lists are checked element-wise.
    pub fn is_assignable_from(&self, source: &ValueType) -> bool {
        match (self, source) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Number, Self::Integer) => true,
            (Self::List(target), Self::List(source)) => target.is_assignable_from(source),
            (target, source) => target == source,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::List(element) => write!(f, "list[{element}]"),
            Self::Object => write!(f, "object"),
            Self::Any => write!(f, "any"),
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("empty type string".into());
        }

        let (base, argument) = split_generic(trimmed)?;
        let base = base.trim().to_ascii_lowercase();

        match base.as_str() {
            "optional" => match argument {
                Some(inner) => inner.parse(),
                None => Err(format!("`{trimmed}`: Optional needs a type argument")),
            },
            "str" | "string" | "text" => Ok(Self::String),
            "int" | "integer" => Ok(Self::Integer),
            "float" | "number" | "double" => Ok(Self::Number),
            "bool" | "boolean" => Ok(Self::Boolean),
            "list" | "array" | "sequence" => {
                let element = match argument {
                    Some(inner) => inner.parse()?,
                    None => Self::Any,
                };
                Ok(Self::List(Box::new(element)))
            }
            "dict" | "object" | "map" | "mapping" | "json" => Ok(Self::Object),
            "any" => Ok(Self::Any),
            other => Err(format!("unknown type `{other}`")),
        }
    }
}

impl TryFrom<String> for ValueType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValueType> for String {
    fn from(value: ValueType) -> Self {
        value.to_string()
    }
}

/// Split `List[str]` into `("List", Some("str"))`; plain names have no
/// argument.
fn split_generic(s: &str) -> Result<(&str, Option<&str>), String> {
    match s.find('[') {
        None => Ok((s, None)),
        Some(open) => {
            if !s.ends_with(']') {
                return Err(format!("`{s}`: unbalanced brackets"));
            }
            let inner = &s[open + 1..s.len() - 1];
            Ok((&s[..open], Some(inner)))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
