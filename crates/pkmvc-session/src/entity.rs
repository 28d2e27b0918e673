//! Live model instances.
//!
//! An [`Entity`] is one instance of a model class: its identifier, the
//! direct field values keyed by field name, any loaded collections and
//! resolved references. Entities are shared through [`EntityRef`] so the
//! identity cache can hand out the same instance to every caller.

use pkmvc_core::error::SchemaErrorKind;
use pkmvc_core::{Error, FromValue, Result, Row, Schema, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One model instance.
pub struct Entity {
    schema: Arc<Schema>,
    id: Option<i64>,
    values: HashMap<&'static str, Value>,
    /// Loaded collections. A missing key means "never loaded".
    collections: HashMap<&'static str, Vec<EntityRef>>,
    /// Resolved reference targets.
    references: HashMap<&'static str, EntityRef>,
    dirty: bool,
    deleted: bool,
}

impl Entity {
    /// A new unpersisted instance with every field `NULL`.
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = schema
            .fields()
            .iter()
            .map(|f| (f.name, Value::Null))
            .collect();
        Self {
            schema,
            id: None,
            values,
            collections: HashMap::new(),
            references: HashMap::new(),
            dirty: false,
            deleted: false,
        }
    }

    /// Build a clean, persisted instance from a storage row.
    pub fn from_row(schema: Arc<Schema>, row: &Row) -> Result<Self> {
        let id = row_id(&schema, row)?;
        let mut entity = Self::new(schema);
        entity.id = Some(id);
        entity.load_row(row)?;
        Ok(entity)
    }

    /// Concrete class name.
    pub fn class(&self) -> &'static str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Whether the instance has never been persisted.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Whether a direct field changed since the last load or save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Current value of a direct field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Typed value of a direct field.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get(name).ok_or_else(|| self.unknown_member("field", name))?;
        T::from_value(value)
    }

    /// Set a direct field, returning whether the stored value changed.
    ///
    /// The value is coerced to the declared type first, so `"42"` and `42`
    /// compare equal on an integer field. Only a real change marks the
    /// instance dirty.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<bool> {
        if name == pkmvc_core::PRIMARY_KEY {
            return Err(Error::invalid_input(format!(
                "{}: the identifier is assigned by storage and cannot be set",
                self.class()
            )));
        }
        let field = *self
            .schema
            .field(name)
            .ok_or_else(|| self.unknown_member("field", name))?;
        let value = field.coerce(value.into())?;

        if self.values.get(field.name) == Some(&value) {
            return Ok(false);
        }
        self.values.insert(field.name, value);
        self.dirty = true;

        // A resolved reference is stale once its foreign key moves.
        let stale: Vec<_> = self
            .schema
            .references()
            .iter()
            .filter(|r| r.foreign_key == field.name)
            .map(|r| r.name)
            .collect();
        for name in stale {
            self.references.remove(name);
        }
        Ok(true)
    }

    /// Direct fields in schema order.
    pub fn values(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.schema.fields().iter().map(|f| {
            (
                f.name,
                self.values.get(f.name).unwrap_or(&Value::Null),
            )
        })
    }

    /// A loaded collection, or `None` when it was never loaded or assigned.
    pub fn collection(&self, name: &str) -> Option<&[EntityRef]> {
        self.collections.get(name).map(Vec::as_slice)
    }

    pub fn is_loaded(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }

    /// The cached target of a reference, if it has been resolved.
    pub fn resolved(&self, reference: &str) -> Option<&EntityRef> {
        self.references.get(reference)
    }

    /// Render direct fields and loaded collections as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        self.render(&mut Vec::new())
    }

    fn render(&self, path: &mut Vec<*const RwLock<Entity>>) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(
            pkmvc_core::PRIMARY_KEY.to_string(),
            self.id.map_or(serde_json::Value::Null, Into::into),
        );
        for (name, value) in self.values() {
            map.insert(name.to_string(), value.to_json());
        }
        for collection in self.schema.collections() {
            let Some(children) = self.collections.get(collection.name) else {
                continue;
            };
            let mut rendered = Vec::with_capacity(children.len());
            for child in children {
                let ptr = Arc::as_ptr(&child.0);
                // Cyclic graphs are cut at the first repeat.
                if path.contains(&ptr) {
                    continue;
                }
                path.push(ptr);
                rendered.push(child.read().render(path));
                path.pop();
            }
            map.insert(
                collection.name.to_string(),
                serde_json::Value::Array(rendered),
            );
        }
        serde_json::Value::Object(map)
    }

    /// Overwrite direct fields from a storage row and mark the instance clean.
    pub(crate) fn load_row(&mut self, row: &Row) -> Result<()> {
        if let Some(id) = self.id {
            let row_id = row_id(&self.schema, row)?;
            if row_id != id {
                return Err(Error::invalid_input(format!(
                    "{}: row #{} cannot be loaded into #{}",
                    self.class(),
                    row_id,
                    id
                )));
            }
        }
        for field in self.schema.fields() {
            let raw = row.get_by_name(field.name).cloned().unwrap_or(Value::Null);
            let value = field.coerce(raw)?;
            self.values.insert(field.name, value);
        }
        self.references.clear();
        self.dirty = false;
        Ok(())
    }

    /// Record the identifier assigned by storage. Identifiers never change.
    pub(crate) fn assign_id(&mut self, id: i64) -> Result<()> {
        match self.id {
            Some(existing) if existing != id => Err(Error::invalid_input(format!(
                "{}: identifier #{} is immutable (attempted #{})",
                self.class(),
                existing,
                id
            ))),
            _ => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    pub(crate) fn set_collection(&mut self, name: &'static str, children: Vec<EntityRef>) {
        self.collections.insert(name, children);
    }

    pub(crate) fn set_resolved(&mut self, reference: &'static str, target: EntityRef) {
        self.references.insert(reference, target);
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
        self.dirty = false;
    }

    fn unknown_member(&self, kind: &str, name: &str) -> Error {
        Error::schema(
            SchemaErrorKind::UnknownMember,
            format!("{} has no {} named '{}'", self.class(), kind, name),
        )
    }
}

fn row_id(schema: &Schema, row: &Row) -> Result<i64> {
    row.id().ok_or_else(|| {
        Error::invalid_input(format!(
            "{}: row has no integer '{}' column",
            schema.name(),
            pkmvc_core::PRIMARY_KEY
        ))
    })
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaded: Vec<_> = self
            .collections
            .iter()
            .map(|(name, children)| (*name, children.len()))
            .collect();
        f.debug_struct("Entity")
            .field("class", &self.class())
            .field("id", &self.id)
            .field("values", &self.values)
            .field("collections", &loaded)
            .field("dirty", &self.dirty)
            .field("deleted", &self.deleted)
            .finish()
    }
}

/// Shared handle to an [`Entity`].
///
/// Two handles for the same cached (class, id) are always the same
/// allocation; compare them with [`EntityRef::ptr_eq`].
#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<Entity>>);

impl EntityRef {
    pub fn new(entity: Entity) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Entity> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Entity> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Shortcut for `read().id()`.
    pub fn id(&self) -> Option<i64> {
        self.read().id()
    }

    /// Shortcut for `read().class()`.
    pub fn class(&self) -> &'static str {
        self.read().class()
    }

    /// Render the instance and its loaded collections as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let mut path = vec![Arc::as_ptr(&self.0)];
        self.read().render(&mut path)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Ok(entity) => write!(f, "EntityRef({} #{:?})", entity.class(), entity.id()),
            Err(_) => f.write_str("EntityRef(<locked>)"),
        }
    }
}
