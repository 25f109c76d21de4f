//! Dynamic `additional` settings
//!
//! Free-form `{ "name": ..., "val": ... }` pairs attached to cameras and
//! detectors. Firmware-specific knobs live here instead of in the schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::JsonFields;

/// Value of one dynamic setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DynamicValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl DynamicValue {
    /// Convert a JSON scalar. Null, arrays and objects are not representable.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Double)),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Double(d) => Value::from(*d),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

/// Wire form of one dynamic setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalEntry {
    pub name: String,
    pub val: DynamicValue,
}

/// Named dynamic settings
///
/// Serialized in the `[{ "name", "val" }]` array layout used by devices.
/// Entries keep the device's order, duplicates included. Lookups return the
/// first entry with a given name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<AdditionalEntry>", into = "Vec<AdditionalEntry>")]
pub struct DynamicSettings {
    entries: Vec<AdditionalEntry>,
}

impl From<Vec<AdditionalEntry>> for DynamicSettings {
    fn from(entries: Vec<AdditionalEntry>) -> Self {
        Self { entries }
    }
}

impl From<DynamicSettings> for Vec<AdditionalEntry> {
    fn from(settings: DynamicSettings) -> Self {
        settings.entries
    }
}

impl DynamicSettings {
    /// Read the optional `additional` array of `root`
    ///
    /// Non-object entries and entries without `name` or `val` are skipped.
    pub fn parse(root: &Map<String, Value>) -> Self {
        let mut entries = Vec::new();

        if let Some(Value::Array(items)) = root.get_object("additional") {
            for item in items {
                let Some(entry) = item.as_object() else {
                    continue;
                };
                if !entry.contains_key("name") || !entry.contains_key("val") {
                    continue;
                }
                let name = entry.get_string("name", "");
                if let Some(val) = entry.get("val").and_then(DynamicValue::from_json) {
                    entries.push(AdditionalEntry { name, val });
                }
            }
        }

        Self { entries }
    }

    /// Render back to the `additional` array layout
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.entries
                .iter()
                .map(|e| serde_json::json!({ "name": e.name, "val": e.val.to_json() }))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Replace the first entry named `name`, or append a new one
    pub fn insert(&mut self, name: impl Into<String>, value: DynamicValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.val = value,
            None => self.entries.push(AdditionalEntry { name, val: value }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DynamicValue> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.val)
    }

    pub fn get_int(&self, name: &str, default: i64) -> i64 {
        match self.get(name) {
            Some(DynamicValue::Int(v)) => *v,
            _ => default,
        }
    }

    pub fn get_double(&self, name: &str, default: f64) -> f64 {
        match self.get(name) {
            Some(DynamicValue::Double(v)) => *v,
            _ => default,
        }
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(DynamicValue::Bool(v)) => *v,
            _ => default,
        }
    }

    pub fn get_string(&self, name: &str, default: &str) -> String {
        match self.get(name) {
            Some(DynamicValue::String(v)) => v.clone(),
            _ => default.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_skips_malformed_entries() {
        let root = json!({
            "additional": [
                {"name": "threshold", "val": 0.45},
                {"name": "max_objects", "val": 20},
                {"name": "label", "val": "person"},
                {"name": "no_val"},
                {"val": 3},
                "garbage",
                {"name": "enabled", "val": true}
            ]
        });
        let settings = DynamicSettings::parse(root.as_object().unwrap());

        assert_eq!(settings.len(), 4);
        assert_eq!(settings.get_double("threshold", 0.0), 0.45);
        assert_eq!(settings.get_int("max_objects", 0), 20);
        assert_eq!(settings.get_string("label", ""), "person");
        assert!(settings.get_bool("enabled", false));
    }

    #[test]
    fn test_getter_variant_mismatch_uses_default() {
        let root = json!({"additional": [{"name": "x", "val": 1}]});
        let settings = DynamicSettings::parse(root.as_object().unwrap());
        assert_eq!(settings.get_double("x", 9.5), 9.5);
        assert_eq!(settings.get_string("x", "d"), "d");
        assert_eq!(settings.get_int("missing", -1), -1);
    }

    #[test]
    fn test_serde_uses_array_layout() {
        let mut settings = DynamicSettings::default();
        settings.insert("gain", DynamicValue::Int(3));
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value, json!([{"name": "gain", "val": 3}]));
        assert_eq!(settings.to_json(), value);

        let back: DynamicSettings = serde_json::from_value(value).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_missing_additional_is_empty() {
        let root = json!({"name": "cam"});
        assert!(DynamicSettings::parse(root.as_object().unwrap()).is_empty());
    }

    #[test]
    fn test_render_keeps_device_order_and_duplicates() {
        let root = json!({
            "additional": [
                {"name": "zeta", "val": 1},
                {"name": "alpha", "val": 2},
                {"name": "zeta", "val": 3}
            ]
        });
        let settings = DynamicSettings::parse(root.as_object().unwrap());

        assert_eq!(settings.len(), 3);
        assert_eq!(settings.get_int("zeta", 0), 1);
        assert_eq!(settings.to_json(), root["additional"]);
    }

    #[test]
    fn test_insert_replaces_first_match() {
        let mut settings = DynamicSettings::default();
        settings.insert("b", DynamicValue::Int(1));
        settings.insert("a", DynamicValue::Int(2));
        settings.insert("b", DynamicValue::Int(5));

        assert_eq!(
            settings.to_json(),
            json!([{"name": "b", "val": 5}, {"name": "a", "val": 2}])
        );
    }
}
