//! Purpose: Checked access to untyped JSON objects returned by the remote API.
//! Exports: `EntityKind`, `RawPayload`.
//! Role: Boundary between wire JSON and the entity cache.
//! Invariants: Unknown fields are carried through untouched.
//! Invariants: Presence checks are per kind; typed getters never panic on drift.
use crate::core::error::{Error, ErrorKind};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum EntityKind {
    User,
    World,
    Avatar,
    Friend,
    Instance,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::World => "world",
            EntityKind::Avatar => "avatar",
            EntityKind::Friend => "friend",
            EntityKind::Instance => "instance",
        }
    }

    /// Fields a complete payload of this kind must carry.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::User => &["id", "displayName"],
            EntityKind::Friend => &["id", "displayName"],
            EntityKind::World => &["id", "name", "authorId"],
            EntityKind::Avatar => &["id", "name", "authorId"],
            EntityKind::Instance => &["worldId", "instanceId"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawPayload {
    fields: Map<String, Value>,
}

impl RawPayload {
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Accepts a JSON object; anything else is a response-shape error.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(Error::new(ErrorKind::InvalidResponse)
                .with_message(format!("expected json object, got {}", json_type(&other)))),
        }
    }

    /// Splits a list response into payloads; non-object items are rejected.
    pub fn list(value: Value) -> Result<Vec<Self>, Error> {
        match value {
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            other => Err(Error::new(ErrorKind::InvalidResponse)
                .with_message(format!("expected json array, got {}", json_type(&other)))),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    pub fn strings(&self, key: &str) -> Option<Vec<String>> {
        let items = self.fields.get(key)?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Remote id of the object this payload describes.
    ///
    /// Instances are addressed by their full location string, which older
    /// payloads only carry under `location`.
    pub fn id(&self, kind: EntityKind) -> Option<&str> {
        let id = self.str("id").filter(|id| !id.is_empty());
        match kind {
            EntityKind::Instance => id.or_else(|| self.str("location")),
            _ => id,
        }
    }

    /// Checks that a full payload of `kind` carries its required fields.
    pub fn require(&self, kind: EntityKind) -> Result<(), Error> {
        if self.id(kind).is_none() {
            return Err(Error::new(ErrorKind::Schema)
                .with_message(format!("{kind} payload is missing its id")));
        }
        for field in kind.required_fields() {
            if *field == "id" {
                continue;
            }
            match self.fields.get(*field) {
                Some(Value::Null) | None => {
                    return Err(Error::new(ErrorKind::Schema)
                        .with_message(format!("{kind} payload is missing `{field}`")));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl From<Map<String, Value>> for RawPayload {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl IntoIterator for RawPayload {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
