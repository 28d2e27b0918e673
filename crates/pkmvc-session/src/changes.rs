//! Typed change sets parsed from untyped input.
//!
//! Form submissions arrive as nested key/value mappings. [`Changes`] is the
//! typed form of one such mapping for one model: coerced direct-field values
//! plus an explicit per-collection instruction.

use pkmvc_core::{Error, Result, Schema, SchemaRegistry, Value};
use serde_json::Map;

/// What to do with one collection field.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CollectionUpdate {
    /// Leave the collection untouched.
    #[default]
    Keep,
    /// Empty the collection; saving deletes the stored children.
    Clear,
    /// Replace the collection with these children, in order.
    Replace(Vec<ChildInput>),
}

/// One child in a [`CollectionUpdate::Replace`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildInput {
    /// Existing child to update, or `None` for a new one.
    pub id: Option<i64>,
    pub changes: Changes,
}

impl ChildInput {
    /// A new child.
    pub fn new(changes: Changes) -> Self {
        Self { id: None, changes }
    }

    /// An existing child, identified by `id`.
    pub fn existing(id: i64, changes: Changes) -> Self {
        Self {
            id: Some(id),
            changes,
        }
    }
}

/// Typed updates for one instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    fields: Vec<(String, Value)>,
    collections: Vec<(String, CollectionUpdate)>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a direct field (replacing an earlier value for the same field).
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(field.into(), value.into());
        self
    }

    /// Empty a collection.
    pub fn clear(self, collection: impl Into<String>) -> Self {
        self.collection(collection, CollectionUpdate::Clear)
    }

    /// Replace a collection with `children`.
    pub fn replace(self, collection: impl Into<String>, children: Vec<ChildInput>) -> Self {
        self.collection(collection, CollectionUpdate::Replace(children))
    }

    /// Set the instruction for a collection.
    pub fn collection(mut self, collection: impl Into<String>, update: CollectionUpdate) -> Self {
        let collection = collection.into();
        self.collections.retain(|(name, _)| *name != collection);
        if update != CollectionUpdate::Keep {
            self.collections.push((collection, update));
        }
        self
    }

    pub(crate) fn put(&mut self, field: String, value: Value) {
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Direct-field updates in application order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Explicit collection instructions (collections not listed are kept).
    pub fn collections(&self) -> &[(String, CollectionUpdate)] {
        &self.collections
    }

    /// The instruction for `collection`, `Keep` when none was given.
    pub fn collection_update(&self, collection: &str) -> &CollectionUpdate {
        static KEEP: CollectionUpdate = CollectionUpdate::Keep;
        self.collections
            .iter()
            .find(|(name, _)| name == collection)
            .map_or(&KEEP, |(_, update)| update)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.collections.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<(String, Value)>, Vec<(String, CollectionUpdate)>) {
        (self.fields, self.collections)
    }

    /// Parse an untyped mapping for `schema`.
    ///
    /// Declared direct fields are coerced to their types. A collection key
    /// absent from the mapping keeps the collection, an empty list clears it,
    /// and a list of child mappings replaces it. The `id` key and undeclared
    /// keys are ignored.
    pub fn from_input(
        registry: &SchemaRegistry,
        schema: &Schema,
        input: &Map<String, serde_json::Value>,
    ) -> Result<Self> {
        let mut changes = Changes::new();

        for field in schema.fields() {
            if let Some(raw) = input.get(field.name) {
                let value = field.coerce(Value::from_json(raw))?;
                changes.put(field.name.to_string(), value);
            }
        }

        for collection in schema.collections() {
            let Some(raw) = input.get(collection.name) else {
                continue;
            };
            let items = raw.as_array().ok_or_else(|| {
                Error::invalid_input(format!(
                    "{}.{}: expected a list of {} mappings",
                    schema.name(),
                    collection.name,
                    collection.class.name
                ))
            })?;

            if items.is_empty() {
                changes = changes.clear(collection.name);
                continue;
            }

            let child_schema = registry.resolve(collection.class)?;
            let mut children = Vec::with_capacity(items.len());
            for item in items {
                let object = item.as_object().ok_or_else(|| {
                    Error::invalid_input(format!(
                        "{}.{}: every entry must be a mapping",
                        schema.name(),
                        collection.name
                    ))
                })?;
                children.push(ChildInput {
                    id: parse_id(object.get(pkmvc_core::PRIMARY_KEY))?,
                    changes: Changes::from_input(registry, &child_schema, object)?,
                });
            }
            changes = changes.replace(collection.name, children);
        }

        for key in input.keys() {
            let known = key == pkmvc_core::PRIMARY_KEY
                || schema.field(key).is_some()
                || schema.collection(key).is_some();
            if !known {
                tracing::trace!(class = schema.name(), key = %key, "Ignoring undeclared input key");
            }
        }

        Ok(changes)
    }
}

/// Parse an identifier from input: absent or null means none, otherwise it
/// must be a positive integer (numeric strings are accepted).
pub fn parse_id(raw: Option<&serde_json::Value>) -> Result<Option<i64>> {
    let id = match raw {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    match id {
        Some(id) if id > 0 => Ok(Some(id)),
        _ => Err(Error::invalid_input(format!(
            "malformed identifier: {}",
            raw.map_or_else(String::new, ToString::to_string)
        ))),
    }
}
