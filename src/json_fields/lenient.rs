//! Lenient accessors
//!
//! The member's text is parsed, whatever its JSON type. Used where values may
//! arrive quoted (form posts, older tools writing everything as strings).

use serde_json::{Map, Value};

use super::text_of;

/// Any present member
pub fn get_raw<'a>(root: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    root.get(name)
}

pub fn get_int(root: &Map<String, Value>, name: &str, default: i32) -> i32 {
    parse_member(root, name).unwrap_or(default)
}

pub fn get_i64(root: &Map<String, Value>, name: &str, default: i64) -> i64 {
    parse_member(root, name).unwrap_or(default)
}

pub fn get_float(root: &Map<String, Value>, name: &str, default: f32) -> f32 {
    parse_member(root, name).unwrap_or(default)
}

pub fn get_double(root: &Map<String, Value>, name: &str, default: f64) -> f64 {
    parse_member(root, name).unwrap_or(default)
}

/// `true`/`false` in any letter case
pub fn get_bool(root: &Map<String, Value>, name: &str, default: bool) -> bool {
    match root.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(v) => match text_of(v).trim().to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => default,
        },
        None => default,
    }
}

pub fn get_string(root: &Map<String, Value>, name: &str, default: &str) -> String {
    root.get(name)
        .map(text_of)
        .unwrap_or_else(|| default.to_string())
}

fn parse_member<T: std::str::FromStr>(root: &Map<String, Value>, name: &str) -> Option<T> {
    root.get(name).and_then(|v| text_of(v).trim().parse().ok())
}
