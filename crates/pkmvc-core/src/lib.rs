//! Core types and traits for PKMVC.
//!
//! This crate provides the foundations the session and drivers build on:
//!
//! - `Value` and `Row` for dynamically-typed storage access
//! - `ModelDecl`, `Schema` and `SchemaRegistry` for declaring model classes
//!   and merging their declarations along the inheritance chain
//! - `Connection` trait for database connections
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

/// Unwrap an `Outcome`, returning early from the enclosing function on
/// anything but `Ok`.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(value) => value,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside a function returning `Outcome`.
#[macro_export]
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return $crate::Outcome::Err(e),
        }
    };
}

pub mod connection;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod row;
pub mod schema;
pub mod types;
pub mod value;

pub use connection::Connection;
pub use error::{
    AuthError, AuthErrorKind, ConfigError, ConnectionError, ConnectionErrorKind, Error,
    NotFoundError, QueryError, QueryErrorKind, Result, SchemaError, SchemaErrorKind, TypeError,
};
pub use field::{CollectionInfo, FieldInfo, ReferenceInfo};
pub use identifiers::{is_valid_identifier, quote_ident, to_snake_case};
pub use row::{ColumnInfo, FromValue, Row};
pub use schema::{ModelDecl, PRIMARY_KEY, Schema, SchemaRegistry};
pub use types::SqlType;
pub use value::Value;
