//! Shared key-value model.
//!
//! A `Model` is a tree of string-keyed values; keys containing `.` descend
//! into nested models, creating intermediates on write. It backs both the
//! host configuration and the cross-plugin shared store, so every node
//! carries its own read/write lock.

pub mod parser;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Undefined,
    Float(f32),
    String(String),
    Model(Arc<Model>),
}

impl Value {
    pub fn as_float(&self) -> Option<f32> {
        if let Value::Float(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    pub fn as_model(&self) -> Option<&Arc<Model>> {
        if let Value::Model(m) = self {
            Some(m)
        } else {
            None
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Model(a), Value::Model(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        String::from(v).into()
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        // an empty string reads back as undefined
        if v.is_empty() {
            Value::Undefined
        } else {
            Value::String(v)
        }
    }
}

impl From<Arc<Model>> for Value {
    fn from(v: Arc<Model>) -> Self {
        Value::Model(v)
    }
}

#[derive(Debug, Default)]
pub struct Model {
    values: RwLock<HashMap<String, Value>>,
}

impl Model {
    pub fn new() -> Arc<Model> {
        Arc::new(Model::default())
    }

    /// Look up a dotted key. Missing segments and non-model intermediates
    /// read as `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        match key.split_once('.') {
            None => self.values.read().get(key).cloned().unwrap_or_default(),
            Some((head, rest)) => {
                let child = match self.values.read().get(head) {
                    Some(Value::Model(child)) => child.clone(),
                    _ => return Value::Undefined,
                };
                child.get(rest)
            }
        }
    }

    /// Write a dotted key, creating intermediate models as needed.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        match key.split_once('.') {
            None => {
                self.values.write().insert(key.to_string(), value);
            }
            Some((head, rest)) => self.ensure_child(head).set(rest, value),
        }
    }

    /// Fetch the child model under `name`, creating (and overwriting any
    /// non-model value) if absent.
    pub fn ensure_child(&self, name: &str) -> Arc<Model> {
        if let Some(Value::Model(child)) = self.values.read().get(name) {
            return child.clone();
        }
        let child = Model::new();
        self.values
            .write()
            .insert(name.to_string(), Value::Model(child.clone()));
        child
    }

    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        self.get(key).as_float().unwrap_or(default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Value::String(s) => s,
            _ => default.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_set_creates_intermediate_models() {
        let model = Model::new();
        model.set("a.b.c", 4.0f32);
        assert_eq!(model.get("a.b.c"), Value::Float(4.0));
        assert!(model.get("a").as_model().is_some());
        assert!(model.get("a.b").as_model().is_some());
        assert!(model.get("a.b.missing").is_undefined());
        assert!(model.get("a.b.c.d").is_undefined());
    }

    #[test]
    fn set_overwrites_and_descends_through_existing_children() {
        let model = Model::new();
        model.set("win.title", "hello");
        model.set("win.width", 640.0f32);
        assert_eq!(model.get_string("win.title", "?"), "hello");
        assert_eq!(model.get_float("win.width", 0.0), 640.0);

        model.set("win.title", "other");
        assert_eq!(model.get_string("win.title", "?"), "other");
    }

    #[test]
    fn typed_getters_fall_back_on_mismatch() {
        let model = Model::new();
        model.set("key", "text");
        assert_eq!(model.get_float("key", 7.5), 7.5);
        assert_eq!(model.get_string("missing", "fallback"), "fallback");
    }

    #[test]
    fn empty_strings_read_as_undefined() {
        let model = Model::new();
        model.set("blank", "");
        assert!(model.get("blank").is_undefined());
        assert_eq!(model.get_string("blank", "d"), "d");
    }
}
