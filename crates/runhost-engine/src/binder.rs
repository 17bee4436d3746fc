//! Parameter binding
//!
//! Narrows a caller-supplied value map to the subset a command can accept:
//! non-null values whose names appear in the command's signature
//! (case-insensitively) and whose runtime type fits the declared type.

use runhost_core::{Error, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Declared type of a command parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Accepts any value
    Any,
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// Floating point
    Float,
    /// Integer or floating point
    Number,
    /// String
    String,
    /// Array
    Array,
    /// Map (associative)
    Map,
}

impl ParamType {
    /// Runtime type of a value; `None` for null
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Bool),
            Value::Number(n) if n.is_f64() => Some(Self::Float),
            Value::Number(_) => Some(Self::Int),
            Value::String(_) => Some(Self::String),
            Value::Array(_) => Some(Self::Array),
            Value::Object(_) => Some(Self::Map),
        }
    }

    /// Whether a value of runtime type `other` can be assigned to this type
    pub fn is_assignable_from(&self, other: ParamType) -> bool {
        match self {
            Self::Any => true,
            Self::Number => matches!(other, Self::Int | Self::Float | Self::Number),
            declared => *declared == other,
        }
    }

    /// Whether this declared type takes an associative structure
    pub fn accepts_map(&self) -> bool {
        matches!(self, Self::Any | Self::Map)
    }

    /// Whether `value` may be bound to a parameter of this type
    pub fn accepts(&self, value: &Value) -> bool {
        match ParamType::of(value) {
            None => false,
            Some(actual) => {
                self.is_assignable_from(actual) || (self.accepts_map() && value.is_object())
            }
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Map => "map",
        };
        f.write_str(name)
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Declared name
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub ty: ParamType,
}

/// Ordered parameter list of a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSignature {
    params: Vec<ParameterSpec>,
}

impl ParameterSignature {
    /// Empty signature
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter
    pub fn with(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParameterSpec {
            name: name.into(),
            ty,
        });
        self
    }

    /// Signature of untyped parameters, as produced by script functions
    pub fn untyped<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .fold(Self::new(), |sig, name| sig.with(name, ParamType::Any))
    }

    /// Look up a parameter by name, ignoring case
    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Whether the signature declares `name` (ignoring case)
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Declared parameters in order
    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.params.iter()
    }

    /// Number of declared parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether no parameters are declared
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl fmt::Display for ParameterSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Bind caller parameters against a signature
///
/// Returns `(declared name, value)` pairs in declaration order. Entries that
/// are null, undeclared, or of an incompatible type are dropped. Two caller
/// keys that differ only in case are ambiguous and rejected.
pub fn bind_parameters(
    signature: &ParameterSignature,
    parameters: &HashMap<String, Value>,
) -> Result<Vec<(String, Value)>> {
    let mut bound: Vec<(usize, String, Value)> = Vec::new();

    for (key, value) in parameters {
        let Some(index) = signature
            .params
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(key))
        else {
            continue;
        };
        let declared = &signature.params[index];
        if !declared.ty.accepts(value) {
            tracing::trace!(
                parameter = %declared.name,
                declared = %declared.ty,
                "Dropping parameter with incompatible type"
            );
            continue;
        }
        if bound.iter().any(|(i, _, _)| *i == index) {
            return Err(Error::validation(format!(
                "Parameter '{}' supplied more than once",
                declared.name
            )));
        }
        bound.push((index, declared.name.clone(), value.clone()));
    }

    bound.sort_by_key(|(index, _, _)| *index);
    Ok(bound.into_iter().map(|(_, name, value)| (name, value)).collect())
}
