//! Default-value schema for typed cache databases.
//!
//! A cache is constructed with a template object whose keys define the
//! logical schema of the database. Reads of absent keys fall back to the
//! template, and enumeration unions the template's keys with every key
//! ever written. A cache without defaults is simply one built from an
//! empty template.

use serde_json::{Map, Value};

/// Immutable default-value template for a cache database.
///
/// Each key of the template is a logical column of the database; its value
/// is what `get` returns when the key has never been written (or has
/// expired). Lookups hand out deep copies so callers can never mutate the
/// shared template through a returned value.
#[derive(Debug, Clone, Default)]
pub struct DefaultSchema {
    template: Map<String, Value>,
}

impl DefaultSchema {
    /// Build a schema from a template object.
    pub fn new(template: Map<String, Value>) -> Self {
        Self { template }
    }

    /// Build an empty schema (the "no defaults" degenerate configuration).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the template defines a default for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.template.contains_key(key)
    }

    /// Deep copy of the default value for `key`, if one is defined.
    pub fn default_for(&self, key: &str) -> Option<Value> {
        self.template.get(key).cloned()
    }

    /// The keys the template defines, in template order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.template.keys().map(String::as_str)
    }

    /// Number of keys the template defines.
    pub fn len(&self) -> usize {
        self.template.len()
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }
}

impl From<Map<String, Value>> for DefaultSchema {
    fn from(template: Map<String, Value>) -> Self {
        Self::new(template)
    }
}

impl From<Value> for DefaultSchema {
    /// Convenience conversion: non-object values yield an empty schema.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(template) => Self::new(template),
            _ => Self::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> DefaultSchema {
        DefaultSchema::from(json!({
            "profile": { "age": 0, "tags": [] },
            "theme": "dark",
        }))
    }

    #[test]
    fn test_default_lookup() {
        let schema = schema();
        assert_eq!(schema.default_for("theme"), Some(json!("dark")));
        assert_eq!(schema.default_for("missing"), None);
        assert!(schema.contains("profile"));
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_defaults_are_deep_copies() {
        let schema = schema();
        let mut first = schema.default_for("profile").unwrap();
        first["age"] = json!(99);
        first["tags"].as_array_mut().unwrap().push(json!("x"));

        // The template must be unaffected by mutations of returned values.
        assert_eq!(
            schema.default_for("profile"),
            Some(json!({ "age": 0, "tags": [] }))
        );
    }

    #[test]
    fn test_non_object_template_is_empty() {
        let schema = DefaultSchema::from(json!("not an object"));
        assert!(schema.is_empty());
    }
}
