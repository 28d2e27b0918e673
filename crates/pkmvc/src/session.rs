//! Building request sessions.
//!
//! Applications declare their models once at startup, then build one
//! [`Session`] per request over that shared registry.
//!
//! # Example
//!
//! ```rust,ignore
//! use pkmvc::prelude::*;
//!
//! let builder = SessionBuilder::new()
//!     .models(&[&POST, &USER])
//!     .delete_absent(true);
//!
//! // Once per request
//! let session = builder.build_with(connection)?;
//! ```

use pkmvc_core::{Connection, ModelDecl, Result, SchemaRegistry};
use pkmvc_session::{Session, SessionConfig};
use std::sync::{Arc, OnceLock};

/// Builder for creating Session instances with fluent API.
///
/// The schema registry is created (and every listed model registered) on
/// first use, then shared by every session the builder produces.
#[derive(Debug, Default)]
pub struct SessionBuilder {
    models: Vec<&'static ModelDecl>,
    config: SessionConfig,
    registry: OnceLock<Arc<SchemaRegistry>>,
}

impl SessionBuilder {
    /// Create a new session builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing registry instead of creating one.
    #[must_use]
    pub fn with_registry(registry: Arc<SchemaRegistry>) -> Self {
        let builder = Self::default();
        let _ = builder.registry.set(registry);
        builder
    }

    /// Register `decl` (and every class reachable from it).
    #[must_use]
    pub fn model(mut self, decl: &'static ModelDecl) -> Self {
        self.models.push(decl);
        self
    }

    /// Register several models.
    #[must_use]
    pub fn models(mut self, decls: &[&'static ModelDecl]) -> Self {
        self.models.extend_from_slice(decls);
        self
    }

    /// Replace the whole session configuration.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the `delete_absent` option (builder pattern).
    #[must_use]
    pub fn delete_absent(mut self, value: bool) -> Self {
        self.config = self.config.delete_absent(value);
        self
    }

    /// Set the `refresh_on_get` option (builder pattern).
    #[must_use]
    pub fn refresh_on_get(mut self, value: bool) -> Self {
        self.config = self.config.refresh_on_get(value);
        self
    }

    /// The shared registry with every listed model registered.
    pub fn registry(&self) -> Result<Arc<SchemaRegistry>> {
        let registry = Arc::clone(
            self.registry
                .get_or_init(|| Arc::new(SchemaRegistry::new())),
        );
        for decl in self.models.iter().copied() {
            registry.register(decl)?;
        }
        Ok(registry)
    }

    /// Build a session over `connection`.
    pub fn build_with<C: Connection>(&self, connection: C) -> Result<Session<C>> {
        let registry = self.registry()?;
        tracing::debug!(models = registry.len(), "Building session");
        Ok(Session::with_config(connection, registry, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use pkmvc_core::{Cx, Error, FieldInfo, Outcome, Row, SqlType, Value};
    use std::sync::Mutex;

    static NOTE: ModelDecl = ModelDecl {
        fields: &[FieldInfo::new("text", SqlType::Text)],
        ..ModelDecl::new("Note")
    };

    static BROKEN: ModelDecl = ModelDecl {
        fields: &[FieldInfo::new("id", SqlType::BigInt)],
        ..ModelDecl::new("Broken")
    };

    /// Records every statement; inserts hand out increasing ids.
    #[derive(Default)]
    struct RecordingConnection {
        statements: Mutex<Vec<String>>,
        next_id: Mutex<i64>,
    }

    impl RecordingConnection {
        fn record(&self, sql: &str) {
            self.statements.lock().unwrap().push(sql.to_string());
        }

        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    impl Connection for RecordingConnection {
        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            self.record(sql);
            async { Outcome::Ok(Vec::new()) }
        }

        fn query_one(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
            self.record(sql);
            async { Outcome::Ok(None) }
        }

        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            self.record(sql);
            async { Outcome::Ok(1) }
        }

        fn insert(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<i64, Error>> + Send {
            self.record(sql);
            let id = {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                *next
            };
            async move { Outcome::Ok(id) }
        }

        fn execute_raw(&self, _cx: &Cx, sql: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
            self.record(sql);
            async { Outcome::Ok(()) }
        }

        fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
            async { Outcome::Ok(()) }
        }
    }

    #[test]
    fn test_builder_shares_one_registry() {
        let builder = SessionBuilder::new().model(&NOTE).models(&[&NOTE]);
        let a = builder.build_with(RecordingConnection::default()).unwrap();
        let b = builder.build_with(RecordingConnection::default()).unwrap();
        assert!(Arc::ptr_eq(a.registry(), b.registry()));
        assert_eq!(a.registry().len(), 1);
        assert!(a.config().delete_absent);
    }

    #[test]
    fn test_builder_with_existing_registry() {
        let registry = Arc::new(SchemaRegistry::new());
        let builder = SessionBuilder::with_registry(Arc::clone(&registry))
            .model(&NOTE)
            .delete_absent(false)
            .refresh_on_get(true);
        let session = builder.build_with(RecordingConnection::default()).unwrap();
        assert!(Arc::ptr_eq(session.registry(), &registry));
        assert!(!session.config().delete_absent);
        assert!(session.config().refresh_on_get);
        assert!(registry.schema("Note").is_ok());
    }

    #[test]
    fn test_builder_rejects_invalid_models() {
        let builder = SessionBuilder::new().model(&BROKEN);
        assert!(builder.build_with(RecordingConnection::default()).is_err());
    }

    #[test]
    fn test_clean_save_issues_no_statement() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let mut session = SessionBuilder::new()
            .model(&NOTE)
            .build_with(RecordingConnection::default())
            .unwrap();

        rt.block_on(async {
            let note = session.create(&NOTE).unwrap();
            note.write().set("text", "hello").unwrap();

            assert!(matches!(session.save(&cx, &note).await, Outcome::Ok(1)));
            assert!(matches!(session.save(&cx, &note).await, Outcome::Ok(1)));
            assert_eq!(
                session.connection().statements(),
                vec!["INSERT INTO `note` (`text`) VALUES (?)".to_string()]
            );

            note.write().set("text", "changed").unwrap();
            assert!(matches!(session.save(&cx, &note).await, Outcome::Ok(1)));
            assert_eq!(
                session.connection().statements().last().map(String::as_str),
                Some("UPDATE `note` SET `text` = ? WHERE `id` = ?")
            );
        });
    }
}
