//! Account registration, login and the current user.
//!
//! State machine:
//!
//! ```text
//! Anonymous --register/login--> Authenticated --logout--> Anonymous
//! ```
//!
//! A failed register or login leaves the stored state exactly as it was.

use crate::digest::{generate_salt, password_digest, verify_password};
use crate::store::SessionStore;
use asupersync::{Cx, Outcome};
use pkmvc_core::error::SchemaErrorKind;
use pkmvc_core::{
    AuthErrorKind, Connection, Error, ModelDecl, Result, Schema, Value, try_outcome, try_result,
};
use pkmvc_session::{EntityRef, Session};
use serde_json::Map;

/// Session key holding the authenticated user's identifier.
pub const USER_ID_KEY: &str = "auth.user_id";
/// Session key holding the authenticated user's concrete class name.
pub const USER_CLASS_KEY: &str = "auth.user_class";

/// Which model holds accounts and which of its fields hold what.
#[derive(Debug, Clone, Copy)]
pub struct AccountConfig {
    /// Account model
    pub decl: &'static ModelDecl,
    /// Login name field
    pub identity_field: &'static str,
    pub salt_field: &'static str,
    /// Field holding `hex(SHA256(salt || password))`
    pub digest_field: &'static str,
    /// Extra fields a registration form may set
    pub permitted_fields: &'static [&'static str],
    /// Random bytes per salt (hex encoded, so the stored text is twice as long)
    pub salt_len: usize,
}

impl AccountConfig {
    /// Config using the conventional `username`, `salt` and `password` fields.
    pub const fn new(decl: &'static ModelDecl) -> Self {
        Self {
            decl,
            identity_field: "username",
            salt_field: "salt",
            digest_field: "password",
            permitted_fields: &[],
            salt_len: 16,
        }
    }

    #[must_use]
    pub const fn identity_field(mut self, field: &'static str) -> Self {
        self.identity_field = field;
        self
    }

    #[must_use]
    pub const fn salt_field(mut self, field: &'static str) -> Self {
        self.salt_field = field;
        self
    }

    #[must_use]
    pub const fn digest_field(mut self, field: &'static str) -> Self {
        self.digest_field = field;
        self
    }

    /// Allow registration to set these extra fields.
    #[must_use]
    pub const fn permit(mut self, fields: &'static [&'static str]) -> Self {
        self.permitted_fields = fields;
        self
    }

    #[must_use]
    pub const fn salt_len(mut self, len: usize) -> Self {
        self.salt_len = len;
        self
    }

    /// Check that every configured field is declared on `schema`.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        let required = [self.identity_field, self.salt_field, self.digest_field];
        for field in required.iter().chain(self.permitted_fields) {
            if schema.field(field).is_none() {
                return Err(Error::schema(
                    SchemaErrorKind::UnknownMember,
                    format!("{} has no field named '{}'", schema.name(), field),
                ));
            }
        }
        if self.salt_len == 0 {
            return Err(Error::invalid_input("salt length must be positive"));
        }
        Ok(())
    }
}

/// Authentication state of one visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated { user_id: i64, class: String },
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. })
    }
}

/// Registration and login for one visitor, backed by their session store.
#[derive(Debug)]
pub struct Accounts<S: SessionStore> {
    config: AccountConfig,
    store: S,
}

impl<S: SessionStore> Accounts<S> {
    pub fn new(config: AccountConfig, store: S) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Current state, read from the session store.
    pub fn state(&self) -> AuthState {
        let user_id = self
            .store
            .get(USER_ID_KEY)
            .and_then(|raw| raw.parse::<i64>().ok());
        match (user_id, self.store.get(USER_CLASS_KEY)) {
            (Some(user_id), Some(class)) => AuthState::Authenticated { user_id, class },
            _ => AuthState::Anonymous,
        }
    }

    /// Create and persist a new account, then authenticate as it.
    ///
    /// Only permitted entries of `extra` are copied; others are ignored.
    #[tracing::instrument(level = "debug", skip(self, cx, session, password, extra))]
    pub async fn register<C: Connection>(
        &mut self,
        cx: &Cx,
        session: &mut Session<C>,
        identity: &str,
        password: &str,
        extra: &Map<String, serde_json::Value>,
    ) -> Outcome<EntityRef, Error> {
        let config = self.config;
        let schema = try_result!(session.registry().resolve(config.decl));
        try_result!(config.validate(&schema));
        if identity.trim().is_empty() {
            return Outcome::Err(Error::invalid_input("identity must not be empty"));
        }

        let existing =
            try_outcome!(session.find_by(cx, config.decl, config.identity_field, identity).await);
        if !existing.is_empty() {
            tracing::debug!("Identity already registered");
            return Outcome::Err(Error::auth(AuthErrorKind::IdentityTaken, identity));
        }

        let user = try_result!(session.create(config.decl));
        {
            let mut guard = user.write();
            for (key, raw) in extra {
                if config.permitted_fields.contains(&key.as_str()) {
                    try_result!(guard.set(key, Value::from_json(raw)));
                } else {
                    tracing::trace!(field = %key, "Ignoring non-permitted registration field");
                }
            }
            let salt = generate_salt(config.salt_len);
            let digest = password_digest(&salt, password);
            try_result!(guard.set(config.identity_field, identity));
            try_result!(guard.set(config.salt_field, salt));
            try_result!(guard.set(config.digest_field, digest));
        }

        let user_id = try_outcome!(session.save(cx, &user).await);
        self.authenticate(user_id, schema.name());
        tracing::info!(user_id, "Registered account");
        Outcome::Ok(user)
    }

    /// Authenticate with an identity and password.
    ///
    /// Fails with `UnknownIdentity` unless exactly one account matches, and
    /// with `PasswordMismatch` when the digest differs.
    #[tracing::instrument(level = "debug", skip(self, cx, session, password))]
    pub async fn login<C: Connection>(
        &mut self,
        cx: &Cx,
        session: &mut Session<C>,
        identity: &str,
        password: &str,
    ) -> Outcome<EntityRef, Error> {
        let config = self.config;
        let schema = try_result!(session.registry().resolve(config.decl));
        try_result!(config.validate(&schema));
        // An identity the field could never hold matches no account.
        let storable = schema
            .field(config.identity_field)
            .is_some_and(|field| field.coerce(Value::from(identity)).is_ok());
        if !storable {
            tracing::warn!("Login failed: identity cannot be stored");
            return Outcome::Err(Error::auth(AuthErrorKind::UnknownIdentity, identity));
        }

        let matches =
            try_outcome!(session.find_by(cx, config.decl, config.identity_field, identity).await);
        let [user] = matches.as_slice() else {
            tracing::warn!(matches = matches.len(), "Login failed: no single account");
            return Outcome::Err(Error::auth(AuthErrorKind::UnknownIdentity, identity));
        };

        let (user_id, class, salt, digest) = {
            let guard = user.read();
            (
                guard.id(),
                guard.class(),
                guard.get_as::<String>(config.salt_field).unwrap_or_default(),
                guard.get_as::<String>(config.digest_field).unwrap_or_default(),
            )
        };
        if !verify_password(&salt, password, &digest) {
            tracing::warn!("Login failed: password mismatch");
            return Outcome::Err(Error::auth(AuthErrorKind::PasswordMismatch, identity));
        }
        let Some(user_id) = user_id else {
            return Outcome::Err(Error::auth(AuthErrorKind::UnknownIdentity, identity));
        };

        self.authenticate(user_id, class);
        tracing::info!(user_id, "Logged in");
        Outcome::Ok(user.clone())
    }

    /// Forget the authenticated user, returning the previous state.
    pub fn logout(&mut self) -> AuthState {
        let previous = self.state();
        self.store.remove(USER_ID_KEY);
        self.store.remove(USER_CLASS_KEY);
        if let AuthState::Authenticated { user_id, .. } = &previous {
            tracing::info!(user_id, "Logged out");
        }
        previous
    }

    /// The authenticated user, resolved through the session's cache.
    ///
    /// `None` when anonymous or when the stored account no longer exists.
    pub async fn current<C: Connection>(
        &self,
        cx: &Cx,
        session: &mut Session<C>,
    ) -> Outcome<Option<EntityRef>, Error> {
        let AuthState::Authenticated { user_id, class } = self.state() else {
            return Outcome::Ok(None);
        };
        let decl = try_result!(session.registry().decl(&class));
        match session.find(cx, decl, user_id).await {
            Outcome::Ok(user) => Outcome::Ok(Some(user)),
            Outcome::Err(e) if e.is_not_found() => {
                tracing::warn!(user_id, class = %class, "Authenticated account no longer exists");
                Outcome::Ok(None)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    fn authenticate(&mut self, user_id: i64, class: &str) {
        self.store.set(USER_ID_KEY, user_id.to_string());
        self.store.set(USER_CLASS_KEY, class.to_string());
    }
}
