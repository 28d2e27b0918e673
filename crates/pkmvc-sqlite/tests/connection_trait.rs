use asupersync::runtime::RuntimeBuilder;
use pkmvc_core::{Connection, Cx, Error, Outcome, Value};
use pkmvc_sqlite::SqliteConnection;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

#[test]
fn sqlite_connection_trait_round_trip() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        assert!(conn.is_valid(&cx).await);

        unwrap_outcome(
            Connection::execute_raw(
                &conn,
                &cx,
                "CREATE TABLE `post` (`id` INTEGER PRIMARY KEY AUTOINCREMENT, `title` TEXT)",
            )
            .await,
        );

        let first = unwrap_outcome(
            conn.insert(
                &cx,
                "INSERT INTO `post` (`title`) VALUES (?)",
                &[Value::from("Hello")],
            )
            .await,
        );
        let second = unwrap_outcome(
            conn.insert(
                &cx,
                "INSERT INTO `post` (`title`) VALUES (?)",
                &[Value::from("World")],
            )
            .await,
        );
        assert_eq!((first, second), (1, 2));

        let row = unwrap_outcome(
            conn.query_one(
                &cx,
                "SELECT * FROM `post` WHERE `id` = ?",
                &[Value::BigInt(second)],
            )
            .await,
        )
        .expect("row exists");
        assert_eq!(row.get_named::<String>("title").unwrap(), "World");

        let missing = unwrap_outcome(
            conn.query_one(&cx, "SELECT * FROM `post` WHERE `id` = ?", &[Value::BigInt(9)])
                .await,
        );
        assert!(missing.is_none());

        let updated = unwrap_outcome(
            conn.execute(
                &cx,
                "UPDATE `post` SET `title` = ? WHERE `id` = ?",
                &[Value::from("Hi"), Value::BigInt(first)],
            )
            .await,
        );
        assert_eq!(updated, 1);

        let rows = unwrap_outcome(
            conn.query(&cx, "SELECT `title` FROM `post` ORDER BY `id`", &[])
                .await,
        );
        let titles: Vec<String> = rows
            .iter()
            .map(|r| r.get_named::<String>("title").unwrap())
            .collect();
        assert_eq!(titles, vec!["Hi", "World"]);

        match conn.query(&cx, "SELECT * FROM `missing`", &[]).await {
            Outcome::Err(e) => assert_eq!(e.sql(), Some("SELECT * FROM `missing`")),
            other => panic!("expected error, got {other:?}"),
        }
    });
}
