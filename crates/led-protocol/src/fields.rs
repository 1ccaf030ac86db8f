//! Synonym resolution and lenient scalar coercion
//!
//! Controllers abbreviate keys (`dvr`, `sa`, `flt`) and older firmware sends
//! the long forms. Numbers may arrive as strings and booleans as `"on"` or
//! `1`. [`Fields`] looks a value up under the first present synonym and
//! coerces it; a value that cannot be coerced reads as absent.

use serde_json::{Map, Value};
use tracing::trace;

/// Borrowed view over a JSON object with synonym-aware getters
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    object: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    pub fn new(object: &'a Map<String, Value>) -> Self {
        Self { object }
    }

    /// View a value as an object, if it is one
    pub fn of(value: &'a Value) -> Option<Self> {
        value.as_object().map(Self::new)
    }

    /// First value present under any of `keys`, in order
    pub fn get(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter().find_map(|key| self.object.get(*key))
    }

    pub fn int(&self, keys: &[&str]) -> Option<i64> {
        let value = self.get(keys)?;
        let coerced = as_int(value);
        if coerced.is_none() {
            trace!("Ignoring non-integer {:?}: {}", keys, value);
        }
        coerced
    }

    pub fn float(&self, keys: &[&str]) -> Option<f64> {
        let value = self.get(keys)?;
        let coerced = as_float(value);
        if coerced.is_none() {
            trace!("Ignoring non-numeric {:?}: {}", keys, value);
        }
        coerced
    }

    pub fn flag(&self, keys: &[&str]) -> Option<bool> {
        self.get(keys).and_then(as_flag)
    }

    /// String value; numbers are rendered, empty strings read as absent
    pub fn text(&self, keys: &[&str]) -> Option<String> {
        match self.get(keys)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn object(&self, keys: &[&str]) -> Option<Fields<'a>> {
        self.get(keys).and_then(Fields::of)
    }

    /// Array value; anything else reads as empty
    pub fn array(&self, keys: &[&str]) -> &'a [Value] {
        match self.get(keys) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        }
    }
}

/// Integer coercion: floats truncate, numeric strings parse, booleans are 0/1
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Boolean coercion; `null` reads as absent rather than false
pub fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )),
        Value::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::Array(items) => Some(!items.is_empty()),
        Value::Object(map) => Some(!map.is_empty()),
    }
}

/// Short name of a JSON value's kind, for error messages
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_present_synonym_wins() {
        let value = json!({"driver": 2, "dvr": 1});
        let fields = Fields::of(&value).unwrap();
        assert_eq!(fields.int(&["dvr", "driver"]), Some(1));
        assert_eq!(fields.int(&["driver", "dvr"]), Some(2));
        assert_eq!(fields.int(&["idx"]), None);
    }

    #[test]
    fn test_int_coercion() {
        assert_eq!(as_int(&json!(7)), Some(7));
        assert_eq!(as_int(&json!(7.9)), Some(7));
        assert_eq!(as_int(&json!(" 12 ")), Some(12));
        assert_eq!(as_int(&json!(true)), Some(1));
        assert_eq!(as_int(&json!("abc")), None);
        assert_eq!(as_int(&json!(null)), None);
    }

    #[test]
    fn test_flag_coercion() {
        assert_eq!(as_flag(&json!("ON")), Some(true));
        assert_eq!(as_flag(&json!("off")), Some(false));
        assert_eq!(as_flag(&json!(0)), Some(false));
        assert_eq!(as_flag(&json!(2)), Some(true));
        assert_eq!(as_flag(&json!(null)), None);
    }

    #[test]
    fn test_text_renders_numbers() {
        let value = json!({"bu": 3, "dv": ""});
        let fields = Fields::of(&value).unwrap();
        assert_eq!(fields.text(&["bu"]).as_deref(), Some("3"));
        assert_eq!(fields.text(&["dv"]), None);
    }

    #[test]
    fn test_array_defaults_empty() {
        let value = json!({"cs": {"not": "a list"}});
        let fields = Fields::of(&value).unwrap();
        assert!(fields.array(&["cs", "channels"]).is_empty());
    }
}
