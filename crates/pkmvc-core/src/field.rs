//! Field, reference and collection declarations.

use crate::Result;
use crate::schema::ModelDecl;
use crate::types::SqlType;
use crate::value::Value;
use std::fmt;

/// Metadata about a direct field (one storage column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Field and column name
    pub name: &'static str,
    /// SQL type for this field
    pub sql_type: SqlType,
    /// Whether this field is nullable
    pub nullable: bool,
    /// Whether this field has a unique constraint
    pub unique: bool,
    /// Whether an index should be created for this column
    pub index: bool,
    /// Default value expression (SQL)
    pub default: Option<&'static str>,
}

impl FieldInfo {
    /// Create a new nullable field with no constraints.
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            nullable: true,
            unique: false,
            index: false,
            default: None,
        }
    }

    /// Mark the column `NOT NULL`.
    pub const fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Add a unique constraint.
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Request an index on the column.
    pub const fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    /// Set a SQL default expression.
    pub const fn default_sql(mut self, expr: &'static str) -> Self {
        self.default = Some(expr);
        self
    }

    /// Coerce a value into this field's storage representation.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        self.sql_type.coerce(self.name, value)
    }

    /// Render the column definition for `CREATE TABLE`.
    pub fn column_definition(&self) -> String {
        let mut def = format!(
            "{} {}",
            crate::quote_ident(self.name),
            self.sql_type.sql_name()
        );

        if !self.nullable {
            def.push_str(" NOT NULL");
        }

        if self.unique {
            def.push_str(" UNIQUE");
        }

        if let Some(default) = self.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }

        def
    }
}

/// A reference field: a foreign-key column resolving to one related instance.
#[derive(Clone, Copy)]
pub struct ReferenceInfo {
    /// Name the related instance is reached by
    pub name: &'static str,
    /// Related model class
    pub class: &'static ModelDecl,
    /// Direct field on this model holding the related identifier
    pub foreign_key: &'static str,
}

impl ReferenceInfo {
    pub const fn new(
        name: &'static str,
        class: &'static ModelDecl,
        foreign_key: &'static str,
    ) -> Self {
        Self {
            name,
            class,
            foreign_key,
        }
    }
}

/// A collection field: owned children carrying this model's id in `foreign_key`.
#[derive(Clone, Copy)]
pub struct CollectionInfo {
    /// Collection name, also its key in input mappings
    pub name: &'static str,
    /// Child model class
    pub class: &'static ModelDecl,
    /// Direct field on the child holding the owner's identifier
    pub foreign_key: &'static str,
    /// Optional column to order hydrated children by
    pub order_by: Option<&'static str>,
}

impl CollectionInfo {
    pub const fn new(
        name: &'static str,
        class: &'static ModelDecl,
        foreign_key: &'static str,
    ) -> Self {
        Self {
            name,
            class,
            foreign_key,
            order_by: None,
        }
    }

    /// Order hydrated children by `column` instead of storage order.
    pub const fn ordered_by(mut self, column: &'static str) -> Self {
        self.order_by = Some(column);
        self
    }
}

// Declarations may reference each other cyclically, so only the class name
// of the target is printed.
impl fmt::Debug for ReferenceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceInfo")
            .field("name", &self.name)
            .field("class", &self.class.name)
            .field("foreign_key", &self.foreign_key)
            .finish()
    }
}

impl fmt::Debug for CollectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionInfo")
            .field("name", &self.name)
            .field("class", &self.class.name)
            .field("foreign_key", &self.foreign_key)
            .field("order_by", &self.order_by)
            .finish()
    }
}
