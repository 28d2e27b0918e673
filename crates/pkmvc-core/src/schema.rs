//! Model declarations and the effective schema merged from them.
//!
//! Every model class is described by a static [`ModelDecl`]. A declaration
//! lists only what the class itself adds; `parent` links it to the class it
//! extends. [`ModelDecl::schema`] walks that chain and merges the pieces into
//! one [`Schema`] per concrete class.
//!
//! ```
//! use pkmvc_core::{FieldInfo, ModelDecl, SqlType};
//!
//! static NODE: ModelDecl = ModelDecl {
//!     fields: &[FieldInfo::new("title", SqlType::VarChar(200)).required()],
//!     ..ModelDecl::new("Node")
//! };
//!
//! static ARTICLE: ModelDecl = ModelDecl {
//!     parent: Some(&NODE),
//!     fields: &[FieldInfo::new("body", SqlType::Text)],
//!     ..ModelDecl::new("Article")
//! };
//!
//! let schema = ARTICLE.schema().unwrap();
//! assert_eq!(schema.table(), "article");
//! assert_eq!(schema.column_names(), vec!["id", "title", "body"]);
//! ```

use crate::Result;
use crate::error::{Error, SchemaErrorKind};
use crate::field::{CollectionInfo, FieldInfo, ReferenceInfo};
use crate::identifiers::{is_valid_identifier, quote_ident, to_snake_case};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Maximum length of an inheritance chain. Longer chains are treated as cycles.
pub const MAX_DEPTH: usize = 32;

/// Name of the implicit auto-increment primary key column.
pub const PRIMARY_KEY: &str = "id";

/// Static declaration of one model class.
#[derive(Clone, Copy)]
pub struct ModelDecl {
    /// Class name, unique within a registry
    pub name: &'static str,
    /// Class this one extends
    pub parent: Option<&'static ModelDecl>,
    /// Explicit table name
    pub table: Option<&'static str>,
    /// Direct fields declared by this class
    pub fields: &'static [FieldInfo],
    /// Reference fields declared by this class
    pub references: &'static [ReferenceInfo],
    /// Collection fields declared by this class
    pub collections: &'static [CollectionInfo],
}

impl ModelDecl {
    /// An empty declaration, intended as the base of struct-update syntax.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            parent: None,
            table: None,
            fields: &[],
            references: &[],
            collections: &[],
        }
    }

    /// The declaration chain from the root ancestor down to `self`.
    pub fn chain(&'static self) -> Result<Vec<&'static ModelDecl>> {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(decl) = current {
            if chain.len() == MAX_DEPTH {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!(
                        "inheritance chain of {} exceeds {} levels",
                        self.name, MAX_DEPTH
                    ),
                ));
            }
            chain.push(decl);
            current = decl.parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Whether `name` is a direct field anywhere along the chain.
    pub fn declares_field(&'static self, name: &str) -> bool {
        self.chain()
            .map(|chain| {
                chain
                    .iter()
                    .any(|decl| decl.fields.iter().any(|f| f.name == name))
            })
            .unwrap_or(false)
    }

    /// Merge the declaration chain into the effective schema.
    ///
    /// Pure function of the chain: the same declarations always produce the
    /// same schema.
    pub fn schema(&'static self) -> Result<Schema> {
        let chain = self.chain()?;

        let fields = merge(&chain, |d| d.fields, |f| f.name);
        let references = merge(&chain, |d| d.references, |r| r.name);
        let collections = merge(&chain, |d| d.collections, |c| c.name);

        let table = chain
            .iter()
            .rev()
            .find_map(|d| d.table)
            .map_or_else(|| to_snake_case(self.name), str::to_string);

        let schema = Schema {
            name: self.name,
            table,
            fields,
            references,
            collections,
            lineage: chain.iter().map(|d| d.name).collect(),
        };
        schema.validate()?;
        Ok(schema)
    }
}

impl fmt::Debug for ModelDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDecl")
            .field("name", &self.name)
            .field("parent", &self.parent.map(|p| p.name))
            .field("table", &self.table)
            .field("fields", &self.fields)
            .field("references", &self.references)
            .field("collections", &self.collections)
            .finish()
    }
}

/// Root-first merge: a descendant entry replaces the same-named ancestor
/// entry in place, new entries append in declaration order.
fn merge<T: Copy + 'static>(
    chain: &[&'static ModelDecl],
    entries: impl Fn(&'static ModelDecl) -> &'static [T],
    key: impl Fn(&T) -> &'static str,
) -> Vec<T> {
    let mut merged: Vec<T> = Vec::new();
    for decl in chain {
        for entry in entries(*decl) {
            match merged.iter().position(|m| key(m) == key(entry)) {
                Some(idx) => merged[idx] = *entry,
                None => merged.push(*entry),
            }
        }
    }
    merged
}

/// Effective schema of one concrete model class.
#[derive(Debug, Clone)]
pub struct Schema {
    name: &'static str,
    table: String,
    fields: Vec<FieldInfo>,
    references: Vec<ReferenceInfo>,
    collections: Vec<CollectionInfo>,
    lineage: Vec<&'static str>,
}

impl Schema {
    /// Concrete class name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Direct fields in merged declaration order (without `id`).
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn references(&self) -> &[ReferenceInfo] {
        &self.references
    }

    pub fn collections(&self) -> &[CollectionInfo] {
        &self.collections
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn reference(&self, name: &str) -> Option<&ReferenceInfo> {
        self.references.iter().find(|r| r.name == name)
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionInfo> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Storage columns: `id` followed by every direct field.
    pub fn column_names(&self) -> Vec<&'static str> {
        std::iter::once(PRIMARY_KEY)
            .chain(self.fields.iter().map(|f| f.name))
            .collect()
    }

    /// Class names from the root ancestor to this class.
    pub fn lineage(&self) -> &[&'static str] {
        &self.lineage
    }

    /// Whether this class is `class` or extends it.
    pub fn is_a(&self, class: &str) -> bool {
        self.lineage.iter().any(|c| *c == class)
    }

    /// DDL for this schema: the `CREATE TABLE` followed by one
    /// `CREATE INDEX` per indexed field.
    pub fn create_table_sql(&self) -> Vec<String> {
        let table = quote_ident(&self.table);
        let mut columns = vec![format!(
            "  {} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote_ident(PRIMARY_KEY)
        )];
        columns.extend(
            self.fields
                .iter()
                .map(|f| format!("  {}", f.column_definition())),
        );

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            table,
            columns.join(",\n")
        )];

        for field in self.fields.iter().filter(|f| f.index && !f.unique) {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("idx_{}_{}", self.table, field.name)),
                table,
                quote_ident(field.name)
            ));
        }

        statements
    }

    fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::schema(SchemaErrorKind::Invalid, message));

        if !is_valid_identifier(&self.table) {
            return invalid(format!(
                "{}: table name '{}' is not a valid identifier",
                self.name, self.table
            ));
        }

        for field in &self.fields {
            if field.name == PRIMARY_KEY {
                return invalid(format!(
                    "{}: '{}' is the implicit primary key and cannot be declared",
                    self.name, PRIMARY_KEY
                ));
            }
            if !is_valid_identifier(field.name) {
                return invalid(format!(
                    "{}: field name '{}' is not a valid identifier",
                    self.name, field.name
                ));
            }
        }

        for reference in &self.references {
            if self.field(reference.foreign_key).is_none() {
                return invalid(format!(
                    "{}: reference '{}' uses undeclared foreign key '{}'",
                    self.name, reference.name, reference.foreign_key
                ));
            }
        }

        for collection in &self.collections {
            if self.field(collection.name).is_some() {
                return invalid(format!(
                    "{}: collection '{}' shadows a direct field",
                    self.name, collection.name
                ));
            }
            if !collection.class.declares_field(collection.foreign_key) {
                return invalid(format!(
                    "{}: collection '{}' expects {} to declare '{}'",
                    self.name, collection.name, collection.class.name, collection.foreign_key
                ));
            }
            if let Some(order_by) = collection.order_by {
                if order_by != PRIMARY_KEY && !collection.class.declares_field(order_by) {
                    return invalid(format!(
                        "{}: collection '{}' is ordered by unknown column '{}'",
                        self.name, collection.name, order_by
                    ));
                }
            }
        }

        Ok(())
    }
}

#[derive(Default)]
struct RegistryInner {
    decls: HashMap<&'static str, &'static ModelDecl>,
    schemas: HashMap<&'static str, Arc<Schema>>,
    order: Vec<&'static str>,
}

/// Registry of model declarations and their memoized schemas.
///
/// Populated at startup and shared (behind an `Arc`) by every session.
#[derive(Default)]
pub struct SchemaRegistry {
    inner: RwLock<RegistryInner>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `decl` together with every class reachable from it through
    /// parents, references and collections.
    pub fn register(&self, decl: &'static ModelDecl) -> Result<Arc<Schema>> {
        let mut pending = vec![decl];
        while let Some(next) = pending.pop() {
            if self.is_registered(next)? {
                continue;
            }
            let schema = Arc::new(next.schema()?);
            tracing::debug!(
                class = next.name,
                table = %schema.table(),
                fields = schema.fields().len(),
                "Registered model"
            );

            pending.extend(next.parent);
            pending.extend(schema.references().iter().map(|r| r.class));
            pending.extend(schema.collections().iter().map(|c| c.class));

            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.decls.insert(next.name, next);
            inner.schemas.insert(next.name, schema);
            inner.order.push(next.name);
        }
        self.resolve(decl)
    }

    fn is_registered(&self, decl: &'static ModelDecl) -> Result<bool> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        match inner.decls.get(decl.name) {
            Some(existing) if std::ptr::eq(*existing, decl) => Ok(true),
            Some(_) => Err(Error::schema(
                SchemaErrorKind::Invalid,
                format!("a different class named {} is already registered", decl.name),
            )),
            None => Ok(false),
        }
    }

    /// Look up a registered declaration by class name.
    pub fn decl(&self, name: &str) -> Result<&'static ModelDecl> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.decls.get(name).copied().ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::UnknownClass,
                format!("class {} is not registered", name),
            )
        })
    }

    /// Look up a registered schema by class name.
    pub fn schema(&self, name: &str) -> Result<Arc<Schema>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.schemas.get(name).cloned().ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::UnknownClass,
                format!("class {} is not registered", name),
            )
        })
    }

    /// The memoized schema for `decl`, registering it on first use.
    pub fn resolve(&self, decl: &'static ModelDecl) -> Result<Arc<Schema>> {
        {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let (Some(existing), Some(schema)) =
                (inner.decls.get(decl.name), inner.schemas.get(decl.name))
            {
                if std::ptr::eq(*existing, decl) {
                    return Ok(Arc::clone(schema));
                }
            }
        }
        self.register(decl)
    }

    /// Every registered schema in registration order.
    pub fn schemas(&self) -> Vec<Arc<Schema>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .filter_map(|name| inner.schemas.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("SchemaRegistry")
            .field("classes", &inner.order)
            .finish()
    }
}
