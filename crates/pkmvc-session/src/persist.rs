//! Saving and deleting instances.
//!
//! `save` writes direct fields first (INSERT for new instances, UPDATE for
//! dirty ones), then walks loaded collections breadth-first, stamping each
//! child's foreign key and saving it in turn. Deletion walks storage rather
//! than memory so children that were never loaded are removed as well.

use crate::entity::EntityRef;
use crate::{SaveOptions, Session};
use asupersync::{Cx, Outcome};
use pkmvc_core::{
    CollectionInfo, Connection, Error, PRIMARY_KEY, Row, Schema, Value, quote_ident, try_outcome,
    try_result,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

impl<C: Connection> Session<C> {
    /// Save `entity` and its loaded collections using the session's
    /// configured options. Returns the entity's identifier.
    pub async fn save(&mut self, cx: &Cx, entity: &EntityRef) -> Outcome<i64, Error> {
        let options = SaveOptions::from(&self.config);
        self.save_with(cx, entity, options).await
    }

    /// Save `entity` and its loaded collections.
    ///
    /// A storage error aborts the save; rows written before it stay written.
    #[tracing::instrument(level = "debug", skip(self, cx, entity), fields(class = entity.class()))]
    pub async fn save_with(
        &mut self,
        cx: &Cx,
        entity: &EntityRef,
        options: SaveOptions,
    ) -> Outcome<i64, Error> {
        let id = try_outcome!(self.save_directs(cx, entity).await);
        try_outcome!(self.save_collections(cx, entity, options).await);
        Outcome::Ok(id)
    }

    /// Write the direct fields of `entity` only.
    ///
    /// New instances are inserted and receive their generated identifier;
    /// dirty ones are updated; clean persisted ones issue no statement.
    pub async fn save_directs(&mut self, cx: &Cx, entity: &EntityRef) -> Outcome<i64, Error> {
        let (schema, id, dirty, deleted, values) = {
            let guard = entity.read();
            let values: Vec<(&'static str, Value)> = guard
                .values()
                .map(|(name, value)| (name, value.clone()))
                .collect();
            (
                Arc::clone(guard.schema()),
                guard.id(),
                guard.is_dirty(),
                guard.is_deleted(),
                values,
            )
        };
        if deleted {
            return Outcome::Err(Error::invalid_input(format!(
                "{} #{}: a deleted instance cannot be saved",
                schema.name(),
                id.map_or_else(|| "new".to_string(), |id| id.to_string())
            )));
        }

        let id = match id {
            None => try_outcome!(self.insert_row(cx, entity, &schema, values).await),
            Some(id) if !dirty => {
                tracing::trace!(class = schema.name(), id, "Clean instance, skipping UPDATE");
                id
            }
            Some(id) => {
                try_outcome!(self.update_row(cx, &schema, id, values).await);
                entity.write().mark_clean();
                id
            }
        };
        self.cache.register(entity.clone());
        Outcome::Ok(id)
    }

    async fn insert_row(
        &mut self,
        cx: &Cx,
        entity: &EntityRef,
        schema: &Schema,
        values: Vec<(&'static str, Value)>,
    ) -> Outcome<i64, Error> {
        // NULL columns are left out so storage defaults apply.
        let (present, omitted): (Vec<_>, Vec<_>) =
            values.into_iter().partition(|(_, value)| !value.is_null());
        let reload = omitted.iter().any(|(name, _)| {
            schema
                .field(name)
                .is_some_and(|field| field.default.is_some())
        });

        let table = quote_ident(schema.table());
        let sql = if present.is_empty() {
            format!(
                "INSERT INTO {} ({}) VALUES (NULL)",
                table,
                quote_ident(PRIMARY_KEY)
            )
        } else {
            let columns: Vec<String> = present.iter().map(|(name, _)| quote_ident(name)).collect();
            let placeholders = vec!["?"; present.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders
            )
        };
        let params: Vec<Value> = present.into_iter().map(|(_, value)| value).collect();

        tracing::trace!(sql = %sql, "Inserting row");
        let id = try_outcome!(self.connection.insert(cx, &sql, &params).await);
        try_result!(entity.write().assign_id(id));

        if reload {
            let row = try_outcome!(self.fetch_row(cx, schema, id).await);
            try_result!(entity.write().load_row(&row));
        } else {
            entity.write().mark_clean();
        }
        tracing::debug!(class = schema.name(), id, "Inserted");
        Outcome::Ok(id)
    }

    async fn update_row(
        &self,
        cx: &Cx,
        schema: &Schema,
        id: i64,
        values: Vec<(&'static str, Value)>,
    ) -> Outcome<(), Error> {
        if values.is_empty() {
            return Outcome::Ok(());
        }
        let assignments: Vec<String> = values
            .iter()
            .map(|(name, _)| format!("{} = ?", quote_ident(name)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(schema.table()),
            assignments.join(", "),
            quote_ident(PRIMARY_KEY)
        );
        let mut params: Vec<Value> = values.into_iter().map(|(_, value)| value).collect();
        params.push(Value::BigInt(id));

        tracing::trace!(sql = %sql, "Updating row");
        let affected = try_outcome!(self.connection.execute(cx, &sql, &params).await);
        if affected == 0 {
            tracing::warn!(class = schema.name(), id, "UPDATE matched no row");
        }
        Outcome::Ok(())
    }

    /// Save every loaded collection below `root`, which must be persisted.
    ///
    /// Collections that were never loaded or assigned are not touched.
    pub async fn save_collections(
        &mut self,
        cx: &Cx,
        root: &EntityRef,
        options: SaveOptions,
    ) -> Outcome<(), Error> {
        let mut queue = VecDeque::from([root.clone()]);
        let mut visited: HashSet<(&'static str, i64)> = HashSet::new();

        while let Some(owner) = queue.pop_front() {
            let (schema, owner_id, loaded) = {
                let guard = owner.read();
                let loaded: Vec<(CollectionInfo, Vec<EntityRef>)> = guard
                    .schema()
                    .collections()
                    .iter()
                    .filter_map(|c| guard.collection(c.name).map(|items| (*c, items.to_vec())))
                    .collect();
                (Arc::clone(guard.schema()), guard.id(), loaded)
            };
            let Some(owner_id) = owner_id else {
                return Outcome::Err(Error::invalid_input(format!(
                    "{}: collections of an unpersisted instance cannot be saved",
                    schema.name()
                )));
            };
            if !visited.insert((schema.name(), owner_id)) {
                continue;
            }

            for (collection, children) in loaded {
                let mut saved = Vec::with_capacity(children.len());
                let mut live = Vec::with_capacity(children.len());
                for child in children {
                    if child.read().is_deleted() {
                        continue;
                    }
                    try_result!(child.write().set(collection.foreign_key, owner_id));
                    saved.push(try_outcome!(self.save_directs(cx, &child).await));
                    queue.push_back(child.clone());
                    live.push(child);
                }
                owner.write().set_collection(collection.name, live);

                if options.delete_absent {
                    let removed =
                        try_outcome!(self.delete_absent(cx, &collection, owner_id, &saved).await);
                    if removed > 0 {
                        tracing::debug!(
                            collection = collection.name,
                            owner = owner_id,
                            removed,
                            "Deleted absent children"
                        );
                    }
                }
            }
        }
        Outcome::Ok(())
    }

    /// Delete stored children of `owner_id` whose identifiers are not in `kept`.
    async fn delete_absent(
        &mut self,
        cx: &Cx,
        collection: &CollectionInfo,
        owner_id: i64,
        kept: &[i64],
    ) -> Outcome<u64, Error> {
        let child_schema = try_result!(self.registry.resolve(collection.class));
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            quote_ident(PRIMARY_KEY),
            quote_ident(child_schema.table()),
            quote_ident(collection.foreign_key)
        );
        let mut params = vec![Value::BigInt(owner_id)];
        if !kept.is_empty() {
            let placeholders = vec!["?"; kept.len()].join(", ");
            sql.push_str(&format!(
                " AND {} NOT IN ({})",
                quote_ident(PRIMARY_KEY),
                placeholders
            ));
            params.extend(kept.iter().copied().map(Value::BigInt));
        }

        tracing::trace!(sql = %sql, "Finding absent children");
        let rows = try_outcome!(self.connection.query(cx, &sql, &params).await);
        // Children already moved to another owner in memory are not absent.
        let roots: Vec<_> = rows
            .iter()
            .filter_map(Row::id)
            .filter(|id| {
                self.cache
                    .get(child_schema.name(), *id)
                    .is_none_or(|child| {
                        child.read().get(collection.foreign_key).and_then(Value::as_i64)
                            == Some(owner_id)
                    })
            })
            .map(|id| (Arc::clone(&child_schema), id))
            .collect();
        if roots.is_empty() {
            return Outcome::Ok(0);
        }
        self.delete_rows(cx, roots).await
    }

    /// Delete `entity` and, recursively, every row of its declared
    /// collections. Returns how many rows were deleted.
    ///
    /// Children are deleted before their owners and every deleted instance
    /// is evicted from the cache and flagged deleted. Deleting an
    /// unpersisted instance only flags it.
    #[tracing::instrument(level = "debug", skip(self, cx, entity), fields(class = entity.class()))]
    pub async fn delete(&mut self, cx: &Cx, entity: &EntityRef) -> Outcome<u64, Error> {
        let (schema, id) = {
            let guard = entity.read();
            (Arc::clone(guard.schema()), guard.id())
        };
        let Some(id) = id else {
            entity.write().mark_deleted();
            return Outcome::Ok(0);
        };

        let removed = try_outcome!(self.delete_rows(cx, vec![(schema, id)]).await);
        entity.write().mark_deleted();
        tracing::info!(id, removed, "Deleted with cascade");
        Outcome::Ok(removed)
    }

    async fn delete_rows(
        &mut self,
        cx: &Cx,
        roots: Vec<(Arc<Schema>, i64)>,
    ) -> Outcome<u64, Error> {
        // Owners come before their children in `order`.
        let mut order = Vec::new();
        let mut seen: HashSet<(&'static str, i64)> = HashSet::new();
        let mut queue = VecDeque::from(roots);

        while let Some((schema, id)) = queue.pop_front() {
            if !seen.insert((schema.name(), id)) {
                continue;
            }
            for collection in schema.collections() {
                let child_schema = try_result!(self.registry.resolve(collection.class));
                let sql = format!(
                    "SELECT {} FROM {} WHERE {} = ?",
                    quote_ident(PRIMARY_KEY),
                    quote_ident(child_schema.table()),
                    quote_ident(collection.foreign_key)
                );
                tracing::trace!(sql = %sql, owner = id, "Collecting children to delete");
                let rows = try_outcome!(self.connection.query(cx, &sql, &[Value::BigInt(id)]).await);
                queue.extend(
                    rows.iter()
                        .filter_map(Row::id)
                        .map(|child| (Arc::clone(&child_schema), child)),
                );
            }
            order.push((schema, id));
        }

        let mut removed = 0;
        for (schema, id) in order.into_iter().rev() {
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?",
                quote_ident(schema.table()),
                quote_ident(PRIMARY_KEY)
            );
            tracing::trace!(sql = %sql, id, "Deleting row");
            removed += try_outcome!(self.connection.execute(cx, &sql, &[Value::BigInt(id)]).await);
            if let Some(evicted) = self.cache.evict(schema.name(), id) {
                evicted.write().mark_deleted();
            }
        }
        Outcome::Ok(removed)
    }
}
