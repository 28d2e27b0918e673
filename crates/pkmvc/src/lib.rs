//! PKMVC - declarative models, identity-cached sessions and accounts.
//!
//! PKMVC is the model layer of a small MVC application:
//!
//! - Models declared as static tables of fields, references and collections,
//!   merged along an inheritance chain
//! - One live instance per (class, id) per request, via the session's
//!   identity cache
//! - Hydration of one-to-many collections and saving them back, deleting
//!   children that are no longer listed
//! - Explicit keep / clear / replace semantics for collections in form input
//! - Salted-password registration and login
//!
//! # Quick Start
//!
//! ```ignore
//! use pkmvc::prelude::*;
//!
//! static POST: ModelDecl = ModelDecl {
//!     fields: &[
//!         FieldInfo::new("title", SqlType::VarChar(200)).required(),
//!         FieldInfo::new("body", SqlType::Text),
//!     ],
//!     collections: &[CollectionInfo::new("comments", &COMMENT, "post_id")],
//!     ..ModelDecl::new("Post")
//! };
//!
//! static COMMENT: ModelDecl = ModelDecl {
//!     fields: &[
//!         FieldInfo::new("post_id", SqlType::BigInt).indexed(),
//!         FieldInfo::new("text", SqlType::Text),
//!     ],
//!     ..ModelDecl::new("Comment")
//! };
//!
//! async fn handle(cx: &Cx, builder: &SessionBuilder, conn: impl Connection, form: Map) {
//!     let mut session = builder.build_with(conn).unwrap();
//!
//!     // New or existing, depending on whether the form carries an `id`
//!     let post = session.get(cx, &POST, form).await.unwrap();
//!     session.save(cx, &post).await.unwrap();
//! }
//! ```
//!
//! # Features
//!
//! - **Structured concurrency**: Built on asupersync for cancel-correct operations
//! - **Request scoped**: sessions and their caches never outlive a request
//! - **Driver agnostic**: any `Connection` implementation, SQLite in `pkmvc-sqlite`

// Re-export all public types from sub-crates
pub use pkmvc_core::{
    AuthErrorKind,
    CollectionInfo,
    // Core types
    Connection,
    Cx,
    Error,
    FieldInfo,
    FromValue,
    ModelDecl,
    Outcome,
    PRIMARY_KEY,
    QueryErrorKind,
    ReferenceInfo,
    Result,
    Row,
    Schema,
    SchemaErrorKind,
    SchemaRegistry,
    SqlType,
    Value,
    try_outcome,
    try_result,
};

pub use pkmvc_session::{
    Changes, ChildInput, CollectionUpdate, Entity, EntityRef, IdentityCache, Lookup, SaveOptions,
    Session, SessionConfig,
};

pub use pkmvc_auth::{
    AccountConfig, Accounts, AuthState, MemorySessionStore, SessionStore, password_digest,
    verify_password,
};

// Session management
pub mod session;
pub use session::SessionBuilder;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        // Accounts
        AccountConfig,
        Accounts,
        AuthState,
        // Declarations
        CollectionInfo,
        // Core traits and types
        Connection,
        Cx,
        EntityRef,
        Error,
        FieldInfo,
        Lookup,
        MemorySessionStore,
        ModelDecl,
        Outcome,
        ReferenceInfo,
        Result,
        // Session
        Session,
        SessionBuilder,
        SessionConfig,
        SessionStore,
        SqlType,
        Value,
    };
    pub use serde_json::Map;
}
