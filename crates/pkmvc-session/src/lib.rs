//! Sessions for PKMVC models.
//!
//! `pkmvc-session` is the **identity and persistence layer**. A [`Session`] owns
//! a connection, a request-scoped identity cache and the shared schema
//! registry, and moves model instances between storage and memory.
//!
//! # Role In The Architecture
//!
//! - **Identity cache**: at most one live instance per (class, id) per session.
//! - **Hydration**: loads a row, then every declared collection, through the cache.
//! - **Mutation**: applies typed [`Changes`] (parsed from untyped input) and
//!   tracks dirtiness per instance.
//! - **Persistence**: inserts or updates direct fields, then saves loaded
//!   collections and removes children that are no longer listed.
//!
//! # Design Philosophy
//!
//! - **Request scoped**: one session per request; nothing is process-global.
//! - **Explicit tri-state**: a collection is kept, cleared or replaced, never
//!   inferred from the shape of an empty form.
//! - **Cancel-correct**: all storage operations take a `Cx` and return an
//!   `Outcome`.
//! - **No transactions**: a failing `save` leaves earlier writes in place.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(conn, registry);
//!
//! // Same row, same instance
//! let post = session.find(&cx, &POST, 1).await?;
//! let again = session.get(&cx, &POST, 1).await?;
//! assert!(post.ptr_eq(&again));
//!
//! // Apply a form submission and persist it
//! session.update(&cx, &post, &form).await?;
//! session.save(&cx, &post).await?;
//! ```

pub mod cache;
pub mod changes;
pub mod entity;
mod persist;

pub use cache::IdentityCache;
pub use changes::{Changes, ChildInput, CollectionUpdate, parse_id};
pub use entity::{Entity, EntityRef};

use asupersync::{Cx, Outcome};
use pkmvc_core::error::SchemaErrorKind;
use pkmvc_core::{
    CollectionInfo, Connection, Error, ModelDecl, PRIMARY_KEY, Result, Row, Schema, SchemaRegistry,
    Value, quote_ident, try_outcome, try_result,
};
use serde_json::Map;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Whether saving a collection deletes stored children no longer listed.
    pub delete_absent: bool,
    /// Whether a lookup that hits the cache reloads the row anyway.
    pub refresh_on_get: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            delete_absent: true,
            refresh_on_get: false,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `delete_absent` option (builder pattern).
    #[must_use]
    pub fn delete_absent(mut self, value: bool) -> Self {
        self.delete_absent = value;
        self
    }

    /// Set the `refresh_on_get` option (builder pattern).
    #[must_use]
    pub fn refresh_on_get(mut self, value: bool) -> Self {
        self.refresh_on_get = value;
        self
    }
}

/// Options for [`Session::save_with`].
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Delete stored collection children that are absent from memory.
    pub delete_absent: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            delete_absent: true,
        }
    }
}

impl SaveOptions {
    /// Options that only insert or update, never deleting children.
    #[must_use]
    pub fn keep_absent() -> Self {
        Self {
            delete_absent: false,
        }
    }
}

impl From<&SessionConfig> for SaveOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            delete_absent: config.delete_absent,
        }
    }
}

/// What [`Session::get`] should retrieve.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// A fresh, unpersisted instance.
    New,
    /// The instance stored under this identifier.
    Id(i64),
    /// An existing instance (when the mapping carries `id`) updated with
    /// the remaining entries, or a new instance initialized from them.
    Input(Map<String, serde_json::Value>),
}

impl From<i64> for Lookup {
    fn from(id: i64) -> Self {
        Lookup::Id(id)
    }
}

impl From<Option<i64>> for Lookup {
    fn from(id: Option<i64>) -> Self {
        id.map_or(Lookup::New, Lookup::Id)
    }
}

impl From<Map<String, serde_json::Value>> for Lookup {
    fn from(input: Map<String, serde_json::Value>) -> Self {
        Lookup::Input(input)
    }
}

// ============================================================================
// Session
// ============================================================================

/// A request-scoped unit of identity and persistence over one connection.
pub struct Session<C: Connection> {
    connection: C,
    registry: Arc<SchemaRegistry>,
    cache: IdentityCache,
    config: SessionConfig,
}

impl<C: Connection> Session<C> {
    /// Create a new session with default configuration.
    pub fn new(connection: C, registry: Arc<SchemaRegistry>) -> Self {
        Self::with_config(connection, registry, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(connection: C, registry: Arc<SchemaRegistry>, config: SessionConfig) -> Self {
        Self {
            connection,
            registry,
            cache: IdentityCache::new(),
            config,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The identity cache backing this session.
    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Forget every cached instance. Handles held by callers stay valid but
    /// are no longer shared with later lookups.
    pub fn clear_cache(&mut self) {
        tracing::debug!(evicted = self.cache.len(), "Clearing identity cache");
        self.cache.clear();
    }

    /// Consume the session, returning its connection.
    pub fn into_connection(self) -> C {
        self.connection
    }

    // ========================================================================
    // Identity resolution
    // ========================================================================

    /// A new unpersisted instance of `decl`.
    pub fn create(&self, decl: &'static ModelDecl) -> Result<EntityRef> {
        let schema = self.registry.resolve(decl)?;
        Ok(EntityRef::new(Entity::new(schema)))
    }

    /// Retrieve an instance by [`Lookup`].
    #[tracing::instrument(level = "debug", skip_all, fields(class = decl.name))]
    pub async fn get(
        &mut self,
        cx: &Cx,
        decl: &'static ModelDecl,
        lookup: impl Into<Lookup>,
    ) -> Outcome<EntityRef, Error> {
        match lookup.into() {
            Lookup::New => self.create(decl).map_or_else(Outcome::Err, Outcome::Ok),
            Lookup::Id(id) => self.find(cx, decl, id).await,
            Lookup::Input(input) => {
                let entity = match try_result!(parse_id(input.get(PRIMARY_KEY))) {
                    Some(id) => try_outcome!(self.find(cx, decl, id).await),
                    None => try_result!(self.create(decl)),
                };
                try_outcome!(self.update(cx, &entity, &input).await);
                Outcome::Ok(entity)
            }
        }
    }

    /// The instance stored under `id`, from the cache when present.
    ///
    /// A cache miss loads the row and every declared collection. A missing
    /// row is [`Error::NotFound`].
    #[tracing::instrument(level = "debug", skip(self, cx, decl), fields(class = decl.name))]
    pub async fn find(
        &mut self,
        cx: &Cx,
        decl: &'static ModelDecl,
        id: i64,
    ) -> Outcome<EntityRef, Error> {
        if id <= 0 {
            return Outcome::Err(Error::invalid_input(format!(
                "{}: identifier must be positive, got {}",
                decl.name, id
            )));
        }
        let schema = try_result!(self.registry.resolve(decl));

        if let Some(cached) = self.cache.get(schema.name(), id) {
            if self.config.refresh_on_get {
                try_outcome!(self.hydrate(cx, &cached).await);
            } else {
                tracing::trace!("Identity cache hit");
            }
            return Outcome::Ok(cached);
        }

        let row = try_outcome!(self.fetch_row(cx, &schema, id).await);
        let entity = try_result!(Entity::from_row(Arc::clone(&schema), &row));
        let entity = self.cache.register(EntityRef::new(entity));
        try_outcome!(self.load_collections(cx, &entity).await);
        tracing::debug!("Loaded from storage");
        Outcome::Ok(entity)
    }

    /// Reload a persisted instance's row and re-resolve its collections.
    ///
    /// Unsaved field changes are discarded.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn hydrate(&mut self, cx: &Cx, entity: &EntityRef) -> Outcome<(), Error> {
        let (schema, id) = {
            let guard = entity.read();
            (Arc::clone(guard.schema()), guard.id())
        };
        let Some(id) = id else {
            return Outcome::Err(Error::invalid_input(format!(
                "{}: an unpersisted instance cannot be hydrated",
                schema.name()
            )));
        };

        let row = try_outcome!(self.fetch_row(cx, &schema, id).await);
        try_result!(entity.write().load_row(&row));
        self.cache.register(entity.clone());
        self.load_collections(cx, entity).await
    }

    /// Resolve every declared collection of `root`, and of every newly loaded
    /// child, through the cache.
    async fn load_collections(&mut self, cx: &Cx, root: &EntityRef) -> Outcome<(), Error> {
        let mut queue = VecDeque::from([root.clone()]);
        let mut visited: HashSet<(&'static str, i64)> = HashSet::new();

        while let Some(owner) = queue.pop_front() {
            let (schema, id) = {
                let guard = owner.read();
                (Arc::clone(guard.schema()), guard.id())
            };
            let Some(id) = id else { continue };
            if !visited.insert((schema.name(), id)) {
                continue;
            }

            for collection in schema.collections() {
                let child_schema = try_result!(self.registry.resolve(collection.class));
                let sql = format!(
                    "SELECT * FROM {} WHERE {} = ? ORDER BY {}",
                    quote_ident(child_schema.table()),
                    quote_ident(collection.foreign_key),
                    quote_ident(collection.order_by.unwrap_or(PRIMARY_KEY)),
                );
                tracing::trace!(sql = %sql, owner = id, "Loading collection");
                let rows = try_outcome!(self.connection.query(cx, &sql, &[Value::BigInt(id)]).await);

                let mut children = Vec::with_capacity(rows.len());
                for row in &rows {
                    let child = try_result!(self.cached_or_built(&child_schema, row));
                    if needs_collections(&child) {
                        queue.push_back(child.clone());
                    }
                    children.push(child);
                }
                tracing::trace!(collection = collection.name, count = children.len(), "Collection loaded");
                owner.write().set_collection(collection.name, children);
            }
        }
        Outcome::Ok(())
    }

    /// The cached instance for `row`, or a new cached one built from it.
    fn cached_or_built(&mut self, schema: &Arc<Schema>, row: &Row) -> Result<EntityRef> {
        let id = row.id().ok_or_else(|| {
            Error::invalid_input(format!("{}: row has no integer identifier", schema.name()))
        })?;
        if let Some(cached) = self.cache.get(schema.name(), id) {
            return Ok(cached);
        }
        let entity = Entity::from_row(Arc::clone(schema), row)?;
        Ok(self.cache.register(EntityRef::new(entity)))
    }

    async fn fetch_row(&self, cx: &Cx, schema: &Schema, id: i64) -> Outcome<Row, Error> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(schema.table()),
            quote_ident(PRIMARY_KEY)
        );
        tracing::trace!(sql = %sql, id, "Fetching row");
        match self.connection.query_one(cx, &sql, &[Value::BigInt(id)]).await {
            Outcome::Ok(Some(row)) => Outcome::Ok(row),
            Outcome::Ok(None) => Outcome::Err(Error::not_found(schema.name(), Some(id))),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Every instance of `decl` whose `field` equals `value`, in id order.
    #[tracing::instrument(level = "debug", skip(self, cx, decl, value), fields(class = decl.name))]
    pub async fn find_by(
        &mut self,
        cx: &Cx,
        decl: &'static ModelDecl,
        field: &str,
        value: impl Into<Value>,
    ) -> Outcome<Vec<EntityRef>, Error> {
        let schema = try_result!(self.registry.resolve(decl));
        let value = value.into();
        let value = if field == PRIMARY_KEY {
            value
        } else {
            let info = try_result!(
                schema
                    .field(field)
                    .ok_or_else(|| unknown_member(&schema, "field", field))
            );
            try_result!(info.coerce(value))
        };

        let (predicate, params) = if value.is_null() {
            (format!("{} IS NULL", quote_ident(field)), Vec::new())
        } else {
            (format!("{} = ?", quote_ident(field)), vec![value])
        };
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY {}",
            quote_ident(schema.table()),
            predicate,
            quote_ident(PRIMARY_KEY)
        );
        tracing::trace!(sql = %sql, "Finding by field");
        let rows = try_outcome!(self.connection.query(cx, &sql, &params).await);
        self.materialize(cx, &schema, &rows).await
    }

    /// Every stored instance of `decl`, ordered by `order_by` (default `id`).
    #[tracing::instrument(level = "debug", skip(self, cx, decl), fields(class = decl.name))]
    pub async fn all(
        &mut self,
        cx: &Cx,
        decl: &'static ModelDecl,
        order_by: Option<&str>,
    ) -> Outcome<Vec<EntityRef>, Error> {
        let schema = try_result!(self.registry.resolve(decl));
        let order = order_by.unwrap_or(PRIMARY_KEY);
        if order != PRIMARY_KEY && schema.field(order).is_none() {
            return Outcome::Err(unknown_member(&schema, "field", order));
        }
        let sql = format!(
            "SELECT * FROM {} ORDER BY {}",
            quote_ident(schema.table()),
            quote_ident(order)
        );
        tracing::trace!(sql = %sql, "Loading all rows");
        let rows = try_outcome!(self.connection.query(cx, &sql, &[]).await);
        self.materialize(cx, &schema, &rows).await
    }

    async fn materialize(
        &mut self,
        cx: &Cx,
        schema: &Arc<Schema>,
        rows: &[Row],
    ) -> Outcome<Vec<EntityRef>, Error> {
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let entity = try_result!(self.cached_or_built(schema, row));
            if needs_collections(&entity) {
                try_outcome!(self.load_collections(cx, &entity).await);
            }
            entities.push(entity);
        }
        Outcome::Ok(entities)
    }

    // ========================================================================
    // References
    // ========================================================================

    /// The instance a reference field points at, resolved lazily through
    /// the cache. `None` when the foreign key is `NULL`.
    #[tracing::instrument(level = "debug", skip(self, cx, entity))]
    pub async fn related(
        &mut self,
        cx: &Cx,
        entity: &EntityRef,
        reference: &str,
    ) -> Outcome<Option<EntityRef>, Error> {
        let (info, target_id, resolved) = {
            let guard = entity.read();
            let info = match guard.schema().reference(reference) {
                Some(info) => *info,
                None => return Outcome::Err(unknown_member(guard.schema(), "reference", reference)),
            };
            let target_id = guard.get(info.foreign_key).and_then(Value::as_i64);
            (info, target_id, guard.resolved(reference).cloned())
        };

        if let Some(target) = resolved {
            if !target.read().is_deleted() {
                return Outcome::Ok(Some(target));
            }
        }
        let Some(target_id) = target_id else {
            return Outcome::Ok(None);
        };
        let target = try_outcome!(self.find(cx, info.class, target_id).await);
        entity.write().set_resolved(info.name, target.clone());
        Outcome::Ok(Some(target))
    }

    /// Point a reference field at `target` (or clear it), stamping the
    /// foreign key. The target must be persisted and of the declared class.
    pub fn set_related(
        &self,
        entity: &EntityRef,
        reference: &str,
        target: Option<&EntityRef>,
    ) -> Result<()> {
        let info = {
            let guard = entity.read();
            *guard
                .schema()
                .reference(reference)
                .ok_or_else(|| unknown_member(guard.schema(), "reference", reference))?
        };

        let Some(target) = target else {
            entity.write().set(info.foreign_key, Value::Null)?;
            return Ok(());
        };

        let (is_a, target_id, target_class) = {
            let guard = target.read();
            (guard.schema().is_a(info.class.name), guard.id(), guard.class())
        };
        if !is_a {
            return Err(Error::invalid_input(format!(
                "{}: expected {}, got {}",
                reference, info.class.name, target_class
            )));
        }
        let target_id = target_id.ok_or_else(|| {
            Error::invalid_input(format!(
                "{}: {} must be saved before it can be referenced",
                reference, target_class
            ))
        })?;

        let mut guard = entity.write();
        guard.set(info.foreign_key, target_id)?;
        guard.set_resolved(info.name, target.clone());
        Ok(())
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Apply an untyped input mapping to `entity`.
    ///
    /// Returns whether any direct field of `entity` itself changed.
    pub async fn update(
        &mut self,
        cx: &Cx,
        entity: &EntityRef,
        input: &Map<String, serde_json::Value>,
    ) -> Outcome<bool, Error> {
        let schema = Arc::clone(entity.read().schema());
        let changes = try_result!(Changes::from_input(&self.registry, &schema, input));
        self.apply(cx, entity, changes).await
    }

    /// Apply typed changes to `entity` and, for replaced collections, to each
    /// resolved child.
    ///
    /// Existing children are found through the cache, new ones are created
    /// unpersisted, and every child has the owner's identifier stamped into
    /// its foreign key before its own changes are applied. Nothing is written
    /// to storage.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn apply(
        &mut self,
        cx: &Cx,
        entity: &EntityRef,
        changes: Changes,
    ) -> Outcome<bool, Error> {
        let mut pending = vec![(entity.clone(), changes)];
        let mut root_changed = None;

        while let Some((target, changes)) = pending.pop() {
            let (fields, collections) = changes.into_parts();
            let changed = {
                let mut guard = target.write();
                let mut changed = false;
                for (name, value) in fields {
                    changed |= try_result!(guard.set(&name, value));
                }
                changed
            };
            root_changed.get_or_insert(changed);

            let (schema, owner_id) = {
                let guard = target.read();
                (Arc::clone(guard.schema()), guard.id())
            };
            for (name, update) in collections {
                let info = *try_result!(
                    schema
                        .collection(&name)
                        .ok_or_else(|| unknown_member(&schema, "collection", &name))
                );
                match update {
                    CollectionUpdate::Keep => {}
                    CollectionUpdate::Clear => {
                        tracing::debug!(collection = info.name, "Clearing collection");
                        target.write().set_collection(info.name, Vec::new());
                    }
                    CollectionUpdate::Replace(children) => {
                        let child_schema = try_result!(self.registry.resolve(info.class));
                        let owner = owner_id.map_or(Value::Null, Value::BigInt);
                        let mut resolved = Vec::with_capacity(children.len());
                        for child in children {
                            let handle = match child.id {
                                Some(id) => {
                                    let found = try_outcome!(self.find(cx, info.class, id).await);
                                    self.detach_from_previous_owner(&schema, &info, &found, owner_id);
                                    found
                                }
                                None => EntityRef::new(Entity::new(Arc::clone(&child_schema))),
                            };
                            let changes = child.changes.set(info.foreign_key, owner.clone());
                            pending.push((handle.clone(), changes));
                            resolved.push(handle);
                        }
                        tracing::debug!(
                            collection = info.name,
                            count = resolved.len(),
                            "Replacing collection"
                        );
                        target.write().set_collection(info.name, resolved);
                    }
                }
            }
        }

        Outcome::Ok(root_changed.unwrap_or(false))
    }

    /// Remove `child` from the loaded collection of the cached owner its
    /// foreign key points at, unless that owner is `owner_id`.
    fn detach_from_previous_owner(
        &self,
        owner_schema: &Schema,
        info: &CollectionInfo,
        child: &EntityRef,
        owner_id: Option<i64>,
    ) {
        let previous = child.read().get(info.foreign_key).and_then(Value::as_i64);
        let Some(previous) = previous else {
            return;
        };
        if owner_id == Some(previous) {
            return;
        }
        let Some(old_owner) = self.cache.get(owner_schema.name(), previous) else {
            return;
        };
        let remaining: Vec<EntityRef> = {
            let guard = old_owner.read();
            let Some(items) = guard.collection(info.name) else {
                return;
            };
            if !items.iter().any(|c| c.ptr_eq(child)) {
                return;
            }
            items.iter().filter(|c| !c.ptr_eq(child)).cloned().collect()
        };
        tracing::debug!(
            collection = info.name,
            from = previous,
            "Moving child to another owner"
        );
        old_owner.write().set_collection(info.name, remaining);
    }

    // ========================================================================
    // Schema bootstrap
    // ========================================================================

    /// Create the table (and indexes) of every registered schema, returning
    /// how many tables were created or confirmed.
    ///
    /// Classes sharing a table get the widest declaration's columns.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn create_tables(&self, cx: &Cx) -> Outcome<usize, Error> {
        let mut schemas = self.registry.schemas();
        schemas.sort_by_key(|s| std::cmp::Reverse(s.fields().len()));

        let mut tables = HashSet::new();
        for schema in &schemas {
            if !tables.insert(schema.table().to_string()) {
                continue;
            }
            for statement in schema.create_table_sql() {
                tracing::trace!(sql = %statement, "Executing DDL");
                try_outcome!(self.connection.execute_raw(cx, &statement).await);
            }
        }
        tracing::info!(tables = tables.len(), "Created tables");
        Outcome::Ok(tables.len())
    }
}

impl<C: Connection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Whether some declared collection of `entity` has not been loaded yet.
fn needs_collections(entity: &EntityRef) -> bool {
    let guard = entity.read();
    guard
        .schema()
        .collections()
        .iter()
        .any(|c| !guard.is_loaded(c.name))
}

fn unknown_member(schema: &Schema, kind: &str, name: &str) -> Error {
    Error::schema(
        SchemaErrorKind::UnknownMember,
        format!("{} has no {} named '{}'", schema.name(), kind, name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_conversions() {
        assert_eq!(Lookup::from(3_i64), Lookup::Id(3));
        assert_eq!(Lookup::from(None::<i64>), Lookup::New);
        assert_eq!(Lookup::from(Some(8_i64)), Lookup::Id(8));

        let mut input = Map::new();
        input.insert("title".into(), "x".into());
        assert!(matches!(Lookup::from(input), Lookup::Input(map) if map.len() == 1));
    }

    #[test]
    fn config_builders() {
        let config = SessionConfig::new().delete_absent(false).refresh_on_get(true);
        assert!(!config.delete_absent);
        assert!(config.refresh_on_get);
        assert!(!SaveOptions::from(&config).delete_absent);
        assert!(SaveOptions::default().delete_absent);
        assert!(!SaveOptions::keep_absent().delete_absent);
    }
}
