//! Key/value context templates are rendered against.
//!
//! Lookups of unknown keys are not errors: they yield `None` so templates
//! can branch on presence.

use serde_yaml::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    values: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The rendered value of `key`, or `default` when unset.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .map(value_to_string)
            .unwrap_or_else(|| default.to_string())
    }

    /// Substitute the value of `key` for `%s` in `pattern`, or return
    /// `fallback` when the key is unset.
    pub fn format(&self, key: &str, pattern: &str, fallback: &str) -> String {
        match self.get(key) {
            Some(value) => pattern.replacen("%s", &value_to_string(value), 1),
            None => fallback.to_string(),
        }
    }

    pub fn is_truthy(&self, key: &str) -> bool {
        self.get(key).map(is_truthy).unwrap_or(false)
    }

    /// A child context: this context with `overrides` layered on top.
    pub fn with(&self, overrides: impl IntoIterator<Item = (String, Value)>) -> Context {
        let mut values = self.values.clone();
        values.extend(overrides);
        Context { values }
    }
}

/// YAML truthiness as templates see it. Null, `false`, the empty string and
/// the empty list are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Sequence(seq) => !seq.is_empty(),
        _ => true,
    }
}

/// Render a value as template text. Lists are flattened and space-joined.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(seq) => seq
            .iter()
            .map(value_to_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Mapping(_) | Value::Tagged(_) => serde_yaml::to_string(value)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
