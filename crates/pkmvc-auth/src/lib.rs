//! Account helpers for PKMVC.
//!
//! `pkmvc-auth` adds salted-password accounts to any model that declares an
//! identity, salt and digest field. The authenticated user is remembered in
//! a [`SessionStore`] as an (id, class) pair and resolved back through the
//! request's [`Session`](pkmvc_session::Session) on demand.
//!
//! # Example
//!
//! ```ignore
//! static USER: ModelDecl = ModelDecl {
//!     fields: &[
//!         FieldInfo::new("username", SqlType::VarChar(64)).required().unique(),
//!         FieldInfo::new("salt", SqlType::VarChar(64)),
//!         FieldInfo::new("password", SqlType::Char(64)),
//!         FieldInfo::new("email", SqlType::VarChar(255)),
//!     ],
//!     ..ModelDecl::new("User")
//! };
//!
//! let mut accounts = Accounts::new(
//!     AccountConfig::new(&USER).permit(&["email"]),
//!     MemorySessionStore::new(),
//! );
//! accounts.register(&cx, &mut session, "alice", "secret", &extra).await?;
//! accounts.login(&cx, &mut session, "alice", "secret").await?;
//! let me = accounts.current(&cx, &mut session).await?;
//! ```

pub mod accounts;
pub mod digest;
pub mod store;

pub use accounts::{AccountConfig, Accounts, AuthState, USER_CLASS_KEY, USER_ID_KEY};
pub use digest::{generate_salt, password_digest, verify_password};
pub use store::{MemorySessionStore, SessionStore};
