//! JSON field accessors
//!
//! ## Responsibilities
//!
//! - "Get field or default" reads over JSON objects
//! - Typed flavour: member must exist with a compatible JSON type
//! - Lenient flavour: member text is parsed (`"42"` and `42` both read as 42)
//! - Dynamic `additional` settings and `/`-separated JSON paths
//!
//! Device documents come from hand-edited files and older firmware, so no
//! accessor here ever fails: a missing or mistyped member yields the default.

mod dynamic;
pub mod json_path;
pub mod lenient;

pub use dynamic::{AdditionalEntry, DynamicSettings, DynamicValue};

use serde_json::{Map, Value};

/// Typed accessors over a JSON object
pub trait JsonFields {
    /// Nested object or array member
    fn get_object(&self, name: &str) -> Option<&Value>;

    /// Integer member that fits in i32
    fn get_int(&self, name: &str, default: i32) -> i32;

    /// Integer member
    fn get_i64(&self, name: &str, default: i64) -> i64;

    /// Integer or floating point member
    fn get_float(&self, name: &str, default: f32) -> f32;

    /// Integer or floating point member
    fn get_double(&self, name: &str, default: f64) -> f64;

    /// Boolean member
    fn get_bool(&self, name: &str, default: bool) -> bool;

    /// Any present member; non-strings in their JSON text form
    fn get_string(&self, name: &str, default: &str) -> String;
}

impl JsonFields for Map<String, Value> {
    fn get_object(&self, name: &str) -> Option<&Value> {
        match self.get(name) {
            Some(v @ Value::Object(_)) | Some(v @ Value::Array(_)) => Some(v),
            _ => None,
        }
    }

    fn get_int(&self, name: &str, default: i32) -> i32 {
        self.get(name)
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(default)
    }

    fn get_i64(&self, name: &str, default: i64) -> i64 {
        self.get(name).and_then(Value::as_i64).unwrap_or(default)
    }

    fn get_float(&self, name: &str, default: f32) -> f32 {
        self.get(name)
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(default)
    }

    fn get_double(&self, name: &str, default: f64) -> f64 {
        self.get(name).and_then(Value::as_f64).unwrap_or(default)
    }

    fn get_bool(&self, name: &str, default: bool) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(default)
    }

    fn get_string(&self, name: &str, default: &str) -> String {
        match self.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => default.to_string(),
        }
    }
}

/// Text form of a value as the lenient accessors see it
pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
