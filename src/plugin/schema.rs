//! Plugin configuration schema and validation
//!
//! A schema is the JSON document `{type: "object", properties: {...}}`.
//! Each property type maps to one validator from a closed table; every
//! value may also be `null`.

use crate::core::error::{MangoonError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Concrete configuration values, keyed by option name
pub type ConfigValues = Map<String, Value>;

/// Declared type of a configuration property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Boolean,
    Integer,
    Number,
    String,
    Array,
}

/// Validator for one property type
struct Rule {
    accepts: fn(&Value) -> bool,
    requirement: &'static str,
}

impl PropertyType {
    fn rule(self) -> Rule {
        match self {
            PropertyType::Boolean => Rule {
                accepts: accepts_boolean,
                requirement: "must be true or false",
            },
            PropertyType::Integer => Rule {
                accepts: accepts_integer,
                requirement: "must be an integer",
            },
            PropertyType::Number => Rule {
                accepts: accepts_number,
                requirement: "must be a number",
            },
            PropertyType::String => Rule {
                accepts: Value::is_string,
                requirement: "must be a string",
            },
            PropertyType::Array => Rule {
                accepts: |v| v.is_array() || v.is_object(),
                requirement: "must be an array",
            },
        }
    }

    /// Whether `value` is acceptable for this type (null always is)
    pub fn accepts(self, value: &Value) -> bool {
        value.is_null() || (self.rule().accepts)(value)
    }

    /// Violation message for property `key`
    pub fn violation(self, key: &str) -> String {
        format!("The {} field {}.", key, self.rule().requirement)
    }
}

fn accepts_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::Number(n) => matches!(n.as_i64(), Some(0) | Some(1)),
        Value::String(s) => matches!(s.as_str(), "0" | "1" | "true" | "false"),
        _ => false,
    }
}

fn accepts_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64(),
        Value::String(s) => s.trim().parse::<i64>().is_ok(),
        _ => false,
    }
}

fn accepts_number(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().map(f64::is_finite).unwrap_or(false),
        _ => false,
    }
}

/// Loose truthiness used for flags such as `enabled`
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !matches!(s.as_str(), "" | "0" | "false"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}

/// Shallow merge; keys in `overrides` win
pub fn merge_config(base: &mut ConfigValues, overrides: ConfigValues) {
    for (key, value) in overrides {
        base.insert(key, value);
    }
}

/// One declared configuration option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub description: String,
}

impl PropertySchema {
    pub fn new(property_type: PropertyType, default: impl Into<Value>, description: &str) -> Self {
        Self {
            property_type,
            default: default.into(),
            description: description.to_string(),
        }
    }
}

/// Configuration schema of a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
}

fn object_type() -> String {
    "object".to_string()
}

impl Default for ConfigSchema {
    fn default() -> Self {
        Self {
            schema_type: object_type(),
            properties: BTreeMap::new(),
        }
    }
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a property
    pub fn property(mut self, name: &str, property: PropertySchema) -> Self {
        self.properties.insert(name.to_string(), property);
        self
    }

    /// Default value of every declared property
    pub fn defaults(&self) -> ConfigValues {
        self.properties
            .iter()
            .map(|(name, property)| (name.clone(), property.default.clone()))
            .collect()
    }

    /// Check `values` against the schema, reporting every violation at once
    pub fn validate(&self, values: &ConfigValues) -> Result<()> {
        let violations: Vec<String> = values
            .iter()
            .filter_map(|(key, value)| match self.properties.get(key) {
                None => Some(format!("The {} field is not a recognized option.", key)),
                Some(property) if !property.property_type.accepts(value) => {
                    Some(property.property_type.violation(key))
                }
                Some(_) => None,
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(MangoonError::InvalidConfiguration(violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(value: Value) -> ConfigValues {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .property("enabled", PropertySchema::new(PropertyType::Boolean, true, "Enable"))
            .property("timeout", PropertySchema::new(PropertyType::Integer, 30, "Timeout"))
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let err = schema().validate(&values(json!({"enabled": "yes"}))).unwrap_err();
        assert_eq!(
            err.violations().unwrap(),
            ["The enabled field must be true or false."]
        );
    }

    #[test]
    fn test_valid_values_pass() {
        assert!(schema()
            .validate(&values(json!({"enabled": true, "timeout": 30})))
            .is_ok());
        assert!(schema()
            .validate(&values(json!({"enabled": null, "timeout": "45"})))
            .is_ok());
    }

    #[test]
    fn test_all_violations_are_reported() {
        let err = schema()
            .validate(&values(json!({"enabled": "yes", "timeout": 1.5, "proxy": "x"})))
            .unwrap_err();
        let violations = err.violations().unwrap();
        assert_eq!(violations.len(), 3);
        assert!(violations.contains(&"The proxy field is not a recognized option.".to_string()));
        assert!(violations.contains(&"The timeout field must be an integer.".to_string()));
        assert!(err.to_string().starts_with("Invalid configuration: "));
    }

    #[test]
    fn test_validator_table() {
        assert!(PropertyType::Boolean.accepts(&json!("1")));
        assert!(PropertyType::Boolean.accepts(&json!(0)));
        assert!(!PropertyType::Boolean.accepts(&json!(2)));
        assert!(PropertyType::Number.accepts(&json!("2.5")));
        assert!(!PropertyType::Number.accepts(&json!("fast")));
        assert!(!PropertyType::String.accepts(&json!(5)));
        assert!(PropertyType::Array.accepts(&json!(["a"])));
        assert!(PropertyType::Array.accepts(&json!({"a": 1})));
        assert!(!PropertyType::Array.accepts(&json!("a")));
    }

    #[test]
    fn test_defaults_and_merge() {
        let mut config = schema().defaults();
        assert_eq!(config.get("timeout"), Some(&json!(30)));

        merge_config(&mut config, values(json!({"timeout": 60})));
        assert_eq!(config.get("timeout"), Some(&json!(60)));
        assert_eq!(config.get("enabled"), Some(&json!(true)));
    }

    #[test]
    fn test_schema_json_shape() {
        let parsed: ConfigSchema = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "timeout": {"type": "integer", "default": 30, "description": "Request timeout"}
            }
        }))
        .unwrap();
        assert_eq!(parsed.properties["timeout"].property_type, PropertyType::Integer);
        assert_eq!(serde_json::to_value(&parsed).unwrap()["properties"]["timeout"]["type"], "integer");
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!("1")));
        assert!(!is_truthy(&json!("0")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&Value::Null));
    }
}
