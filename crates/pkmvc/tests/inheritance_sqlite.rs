//! End-to-end behavior of inherited models over SQLite.

use asupersync::runtime::RuntimeBuilder;
use pkmvc::prelude::*;
use pkmvc::{AuthErrorKind, SqlType as Sql};
use pkmvc_sqlite::SqliteConnection;
use serde_json::json;

static CONTENT: ModelDecl = ModelDecl {
    table: Some("content"),
    fields: &[
        FieldInfo::new("title", Sql::VarChar(200)).required(),
        FieldInfo::new("body", Sql::Text),
    ],
    collections: &[CollectionInfo::new("notes", &NOTE, "content_id")],
    ..ModelDecl::new("Content")
};

static ARTICLE: ModelDecl = ModelDecl {
    parent: Some(&CONTENT),
    fields: &[
        FieldInfo::new("title", Sql::VarChar(300)),
        FieldInfo::new("summary", Sql::Text),
    ],
    ..ModelDecl::new("Article")
};

static NOTE: ModelDecl = ModelDecl {
    fields: &[
        FieldInfo::new("content_id", Sql::BigInt).indexed(),
        FieldInfo::new("text", Sql::Text),
    ],
    ..ModelDecl::new("Note")
};

static PERSON: ModelDecl = ModelDecl {
    fields: &[
        FieldInfo::new("username", Sql::VarChar(64)).required().unique(),
        FieldInfo::new("salt", Sql::VarChar(64)),
        FieldInfo::new("password", Sql::Char(64)),
    ],
    ..ModelDecl::new("Person")
};

static MEMBER: ModelDecl = ModelDecl {
    parent: Some(&PERSON),
    fields: &[FieldInfo::new("nickname", Sql::VarChar(64))],
    ..ModelDecl::new("Member")
};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn form(value: serde_json::Value) -> Map<String, serde_json::Value> {
    value.as_object().cloned().expect("object literal")
}

fn count(session: &Session<SqliteConnection>, table: &str) -> i64 {
    let rows = session
        .connection()
        .query_sync(&format!("SELECT COUNT(*) AS n FROM `{table}`"), &[])
        .expect("count rows");
    rows[0].get_named::<i64>("n").expect("count column")
}

fn note_ids(entity: &EntityRef) -> Vec<Option<i64>> {
    entity
        .read()
        .collection("notes")
        .expect("notes loaded")
        .iter()
        .map(EntityRef::id)
        .collect()
}

#[test]
fn inherited_schema_merges_the_chain() {
    let schema = ARTICLE.schema().unwrap();

    let fields: Vec<_> = schema.fields().iter().map(|f| f.name).collect();
    assert_eq!(fields, vec!["title", "body", "summary"]);
    // Redeclared in place, with the descendant's definition.
    let title = schema.field("title").unwrap();
    assert_eq!(title.sql_type, Sql::VarChar(300));
    assert!(title.nullable);

    assert_eq!(schema.table(), "content");
    assert!(schema.collection("notes").is_some());
    assert_eq!(schema.lineage(), &["Content", "Article"]);
    assert!(schema.is_a("Content"));
    assert!(!CONTENT.schema().unwrap().is_a("Article"));
}

#[test]
fn forms_round_trip_through_an_inherited_model() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let builder = SessionBuilder::new().model(&ARTICLE);
    let mut session = builder
        .build_with(SqliteConnection::open_memory().expect("open sqlite memory db"))
        .unwrap();

    rt.block_on(async {
        // Content and Article share one table.
        assert_eq!(unwrap_outcome(session.create_tables(&cx).await), 2);

        let article = unwrap_outcome(
            session
                .get(
                    &cx,
                    &ARTICLE,
                    form(json!({
                        "title": "Hello",
                        "summary": "short",
                        "notes": [{ "text": "first" }, { "text": "second" }],
                        "unknown": 1
                    })),
                )
                .await,
        );
        assert!(article.read().is_new());
        let id = unwrap_outcome(session.save(&cx, &article).await);
        assert_eq!(count(&session, "content"), 1);
        assert_eq!(count(&session, "note"), 2);
        let ids = note_ids(&article);
        assert!(ids.iter().all(Option::is_some));

        // Within the request the same instance comes back.
        let again = unwrap_outcome(session.get(&cx, &ARTICLE, id).await);
        assert!(again.ptr_eq(&article));

        // A later request reloads from storage.
        session.clear_cache();
        let loaded = unwrap_outcome(session.get(&cx, &ARTICLE, id).await);
        assert!(!loaded.ptr_eq(&article));
        {
            let guard = loaded.read();
            assert_eq!(guard.get_as::<String>("title").unwrap(), "Hello");
            assert_eq!(guard.get_as::<String>("summary").unwrap(), "short");
            assert!(!guard.is_dirty());
        }
        assert_eq!(note_ids(&loaded), ids);

        // Omitting the collection keeps it.
        let edited = unwrap_outcome(
            session
                .get(&cx, &ARTICLE, form(json!({ "id": id, "body": "text" })))
                .await,
        );
        assert!(edited.ptr_eq(&loaded));
        unwrap_outcome(session.save(&cx, &edited).await);
        assert_eq!(count(&session, "note"), 2);

        // Listing one child drops the other.
        let kept = ids[0].unwrap();
        unwrap_outcome(
            session
                .get(
                    &cx,
                    &ARTICLE,
                    form(json!({ "id": id, "notes": [{ "id": kept, "text": "edited" }] })),
                )
                .await,
        );
        unwrap_outcome(session.save(&cx, &loaded).await);
        assert_eq!(count(&session, "note"), 1);
        assert_eq!(note_ids(&loaded), vec![Some(kept)]);

        // An empty list clears it.
        unwrap_outcome(
            session
                .get(&cx, &ARTICLE, form(json!({ "id": id, "notes": [] })))
                .await,
        );
        unwrap_outcome(session.save(&cx, &loaded).await);
        assert_eq!(count(&session, "note"), 0);

        assert_eq!(unwrap_outcome(session.delete(&cx, &loaded).await), 1);
        assert!(loaded.read().is_deleted());
        assert_eq!(count(&session, "content"), 0);
        match session.find(&cx, &ARTICLE, id).await {
            Outcome::Err(e) => assert!(e.is_not_found()),
            other => panic!("expected not found, got {other:?}"),
        }
    });
}

#[test]
fn accounts_remember_the_concrete_class() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let builder = SessionBuilder::new().models(&[&MEMBER, &ARTICLE]);
    let mut session = builder
        .build_with(SqliteConnection::open_memory().expect("open sqlite memory db"))
        .unwrap();

    rt.block_on(async {
        unwrap_outcome(session.create_tables(&cx).await);
        let mut accounts = Accounts::new(
            AccountConfig::new(&MEMBER).permit(&["nickname"]),
            MemorySessionStore::new(),
        );

        let member = unwrap_outcome(
            accounts
                .register(
                    &cx,
                    &mut session,
                    "carol",
                    "pa55",
                    &form(json!({ "nickname": "cc" })),
                )
                .await,
        );
        let id = member.id().unwrap();
        accounts.logout();

        session.clear_cache();
        match accounts.login(&cx, &mut session, "carol", "nope").await {
            Outcome::Err(e) => assert_eq!(e.auth_kind(), Some(AuthErrorKind::PasswordMismatch)),
            other => panic!("expected login failure, got {other:?}"),
        }
        assert_eq!(accounts.state(), AuthState::Anonymous);

        unwrap_outcome(accounts.login(&cx, &mut session, "carol", "pa55").await);
        assert_eq!(
            accounts.state(),
            AuthState::Authenticated {
                user_id: id,
                class: "Member".into()
            }
        );

        let current = unwrap_outcome(accounts.current(&cx, &mut session).await).unwrap();
        assert_eq!(current.class(), "Member");
        assert_eq!(current.read().get_as::<String>("nickname").unwrap(), "cc");
    });
}
