//! Typed values and schema fields.
//!
//! Clients hand us untyped text. A [`Value`] only exists once that text has
//! been checked against the grammar of its [`ValueType`], so anything holding a
//! `Value` can rely on `value.text()` parsing as `value.value_type()`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::InvalidInput;

/// Closed set of scalar types a schema field can declare.
///
/// There is no "unset" variant: unknown or empty type names are rejected when
/// deserialising, so an unset type can never leak into a schema or a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Real,
    String,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Integer => "integer",
            ValueType::Real => "real",
            ValueType::String => "string",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("{0:?} is not a base-10 64-bit integer")]
    InvalidInteger(String),

    #[error("{0:?} is not a real number")]
    InvalidReal(String),
}

/// A string-backed datum whose text conforms to its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawValue")]
pub struct Value {
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(rename = "value")]
    text: String,
}

impl Value {
    /// Validate `text` against the grammar of `value_type`.
    pub fn new(value_type: ValueType, text: impl Into<String>) -> Result<Self, ValueError> {
        let text = text.into();
        match value_type {
            ValueType::Integer => {
                text.parse::<i64>()
                    .map_err(|_| ValueError::InvalidInteger(text.clone()))?;
            }
            ValueType::Real => {
                text.parse::<f64>()
                    .map_err(|_| ValueError::InvalidReal(text.clone()))?;
            }
            ValueType::String => {}
        }
        Ok(Self { value_type, text })
    }

    pub fn integer(value: i64) -> Self {
        Self {
            value_type: ValueType::Integer,
            text: value.to_string(),
        }
    }

    pub fn real(value: f64) -> Self {
        Self {
            value_type: ValueType::Real,
            text: value.to_string(),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value_type: ValueType::String,
            text: value.into(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Integer payload, `None` for non-integer values.
    pub fn as_i64(&self) -> Option<i64> {
        match self.value_type {
            ValueType::Integer => self.text.parse().ok(),
            _ => None,
        }
    }

    /// Numeric payload for integer and real values.
    pub fn as_f64(&self) -> Option<f64> {
        match self.value_type {
            ValueType::Integer | ValueType::Real => self.text.parse().ok(),
            ValueType::String => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Deserialize)]
struct RawValue {
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(rename = "value")]
    text: String,
}

impl TryFrom<RawValue> for Value {
    type Error = ValueError;

    fn try_from(raw: RawValue) -> Result<Self, Self::Error> {
        Value::new(raw.value_type, raw.text)
    }
}

/// A named, typed slot in an input or output schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawField")]
pub struct Field {
    #[serde(rename = "type")]
    value_type: ValueType,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Result<Self, InvalidInput> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(InvalidInput::new(
                "field-empty-name",
                "field name must not be empty",
            ));
        }
        Ok(Self {
            value_type,
            name,
            description: None,
            unit: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Check that `value` may fill this slot.
    pub fn validate(&self, value: &Value) -> Result<(), InvalidInput> {
        if value.value_type() != self.value_type {
            return Err(InvalidInput::new(
                "field-type-mismatch",
                format!(
                    "field {:?} expects {}, got {}",
                    self.name,
                    self.value_type,
                    value.value_type()
                ),
            ));
        }
        Ok(())
    }

    /// Convert raw text into a value of this field's type.
    pub fn parse(&self, text: impl Into<String>) -> Result<Value, ValueError> {
        Value::new(self.value_type, text)
    }
}

#[derive(Deserialize)]
struct RawField {
    #[serde(rename = "type")]
    value_type: ValueType,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    unit: Option<String>,
}

impl TryFrom<RawField> for Field {
    type Error = InvalidInput;

    fn try_from(raw: RawField) -> Result<Self, Self::Error> {
        let mut field = Field::new(raw.name, raw.value_type)?;
        field.description = raw.description;
        field.unit = raw.unit;
        Ok(field)
    }
}
