// src/metadata.rs

//! Typed metadata values attached to reports.
//!
//! Every value carries an explicit tag. The wire form is
//! `{"raw_value": <json>, "type": "<label>"}`; the label `__infer__` asks us
//! to derive the tag from the JSON shape of `raw_value`.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

/// Label that requests tag inference from the raw value.
pub const INFER_LABEL: &str = "__infer__";

pub type MetadataMap = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Path(String),
    Json(Value),
    Url(String),
    Null,
}

impl MetadataValue {
    pub fn text(value: impl Into<String>) -> Self {
        MetadataValue::Text(value.into())
    }

    pub fn path(value: impl Into<String>) -> Self {
        MetadataValue::Path(value.into())
    }

    pub fn url(value: impl Into<String>) -> Self {
        MetadataValue::Url(value.into())
    }

    /// The type label used on the wire and for rendering.
    pub fn label(&self) -> &'static str {
        match self {
            MetadataValue::Text(_) => "text",
            MetadataValue::Int(_) => "int",
            MetadataValue::Float(_) => "float",
            MetadataValue::Bool(_) => "bool",
            MetadataValue::Path(_) => "path",
            MetadataValue::Json(_) => "json",
            MetadataValue::Url(_) => "url",
            MetadataValue::Null => "null",
        }
    }

    pub fn raw_value(&self) -> Value {
        match self {
            MetadataValue::Text(s) | MetadataValue::Path(s) | MetadataValue::Url(s) => {
                Value::String(s.clone())
            }
            MetadataValue::Int(i) => Value::from(*i),
            MetadataValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            MetadataValue::Bool(b) => Value::Bool(*b),
            MetadataValue::Json(v) => v.clone(),
            MetadataValue::Null => Value::Null,
        }
    }

    /// Derive a tag from the JSON shape of an untyped value.
    pub fn infer(raw: Value) -> Self {
        match raw {
            Value::Null => MetadataValue::Null,
            Value::Bool(b) => MetadataValue::Bool(b),
            Value::String(s) => MetadataValue::Text(s),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetadataValue::Int(i),
                None => MetadataValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            other @ (Value::Array(_) | Value::Object(_)) => MetadataValue::Json(other),
        }
    }

    /// Build a value from its wire parts, checking that the raw value fits
    /// the label.
    pub fn from_wire(raw: Value, label: &str) -> Result<Self, String> {
        let mismatch = |raw: &Value| format!("raw value {raw} does not match metadata type '{label}'");
        match label {
            INFER_LABEL => Ok(MetadataValue::infer(raw)),
            "text" | "path" | "url" => match raw {
                Value::String(s) => Ok(match label {
                    "text" => MetadataValue::Text(s),
                    "path" => MetadataValue::Path(s),
                    _ => MetadataValue::Url(s),
                }),
                other => Err(mismatch(&other)),
            },
            "int" => raw.as_i64().map(MetadataValue::Int).ok_or_else(|| mismatch(&raw)),
            "float" => raw.as_f64().map(MetadataValue::Float).ok_or_else(|| mismatch(&raw)),
            "bool" => raw.as_bool().map(MetadataValue::Bool).ok_or_else(|| mismatch(&raw)),
            "json" => Ok(MetadataValue::Json(raw)),
            "null" if raw.is_null() => Ok(MetadataValue::Null),
            "null" => Err(mismatch(&raw)),
            other => Err(format!("unknown metadata type '{other}'")),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl Serialize for MetadataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MetadataValue", 2)?;
        state.serialize_field("raw_value", &self.raw_value())?;
        state.serialize_field("type", self.label())?;
        state.end()
    }
}

#[derive(Deserialize)]
struct WireMetadataValue {
    #[serde(default)]
    raw_value: Value,
    #[serde(rename = "type", default = "default_label")]
    label: String,
}

fn default_label() -> String {
    INFER_LABEL.to_string()
}

impl<'de> Deserialize<'de> for MetadataValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireMetadataValue::deserialize(deserializer)?;
        MetadataValue::from_wire(wire.raw_value, &wire.label).map_err(D::Error::custom)
    }
}
