use std::sync::Arc;

use moar_core::error::{ConnectionError, ConnectionErrorKind, QueryErrorKind};
use moar_mysql::testing::{RecordingObserver, ScriptedDriver};
use moar_mysql::{
    Connection, ConnectionEvent, ConnectionState, DriverError, Error, MySqlConfig, Row, Value,
};

const USERS: &str = "SELECT id FROM users WHERE active = 1";

fn users_driver() -> ScriptedDriver {
    ScriptedDriver::new().with_result(
        USERS,
        &["id"],
        vec![
            vec![Value::BigInt(10)],
            vec![Value::BigInt(11)],
            vec![Value::BigInt(12)],
            vec![Value::BigInt(13)],
        ],
    )
}

fn connection(driver: &ScriptedDriver) -> (Connection<ScriptedDriver>, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new());
    let conn = Connection::new(
        MySqlConfig::new().host("db1").user("app").database("app"),
        driver.clone(),
    )
    .with_observer(observer.clone());
    (conn, observer)
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .map(|row| row.get_named::<i64>("id").unwrap())
        .collect()
}

#[test]
fn active_users_example() {
    let driver = users_driver();
    let (mut conn, _) = connection(&driver);

    let rows: Vec<Row> = conn
        .query("SELECT id FROM users WHERE active = %s", &[true.into()])
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(conn.last_query(), Some(USERS));
    assert_eq!(ids(&rows), vec![10, 11, 12, 13]);
    assert_eq!(rows[0].to_string(), "{id: 10}");
    assert_eq!(
        driver.executed(),
        vec!["SET NAMES utf8mb4".to_string(), USERS.to_string()]
    );
}

#[test]
fn first_use_connects_lazily() {
    let driver = users_driver();
    let (mut conn, observer) = connection(&driver);
    assert_eq!(conn.state(), ConnectionState::Unconnected);
    assert_eq!(driver.stats().connects, 0);

    conn.execute(USERS, &[]).unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(
        observer.events()[0],
        ConnectionEvent::Connected {
            host: "db1".to_string(),
            port: 3306
        }
    );
}

#[test]
fn identical_queries_yield_identical_rows() {
    let driver = users_driver();
    let (mut conn, _) = connection(&driver);

    let first = conn.execute(USERS, &[]).unwrap();
    let second = conn.execute(USERS, &[]).unwrap();
    assert_eq!(first, second);
    assert_eq!(driver.stats().connects, 1);
}

#[test]
fn execute_on_empty_result_is_empty() {
    let driver =
        ScriptedDriver::new().with_result("SELECT id FROM users WHERE 0", &["id"], vec![]);
    let (mut conn, _) = connection(&driver);

    assert!(conn.execute("SELECT id FROM users WHERE 0", &[]).unwrap().is_empty());
    assert!(conn.execute("DELETE FROM sessions", &[]).unwrap().is_empty());
    assert_eq!(driver.stats().open_cursors, 0);
}

#[test]
fn query_one_abandons_the_rest() {
    let driver = users_driver();
    let (mut conn, _) = connection(&driver);

    let row = conn.query_one(USERS, &[]).unwrap().unwrap();
    assert_eq!(row.get_named::<i64>("id").unwrap(), 10);
    assert_eq!(driver.stats().open_cursors, 0);

    let none = conn.query_one("SELECT id FROM users WHERE 0", &[]).unwrap();
    assert!(none.is_none());
}

#[test]
fn abandoned_stream_releases_cursor_and_connection() {
    let driver = users_driver();
    let (mut conn, _) = connection(&driver);

    let taken: Vec<Row> = conn
        .query(USERS, &[])
        .unwrap()
        .take(2)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ids(&taken), vec![10, 11]);
    assert_eq!(driver.stats().open_cursors, 0);

    // The connection is immediately reusable.
    assert_eq!(conn.execute(USERS, &[]).unwrap().len(), 4);
}

#[test]
fn transient_fetch_failure_reconnects_once_and_restarts() {
    let driver = users_driver().fail_fetch(
        USERS,
        2,
        DriverError::new(2013, "Lost connection to MySQL server during query"),
    );
    let (mut conn, observer) = connection(&driver);

    let rows: Vec<Row> = conn
        .query(USERS, &[])
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(ids(&rows), vec![10, 11, 10, 11, 12, 13]);
    assert_eq!(observer.reconnects(), 1);
    assert_eq!(driver.stats().connects, 2);
    assert_eq!(driver.stats().session_closes, 1);
    assert_eq!(driver.stats().open_sessions, 1);
    assert_eq!(driver.stats().open_cursors, 0);
    assert!(conn.is_connected());
}

#[test]
fn transient_execute_failure_reprepares_original_template() {
    let driver = users_driver().fail_next_execute(
        USERS,
        DriverError::new(2006, "MySQL server has gone away"),
    );
    let (mut conn, observer) = connection(&driver);

    let rows = conn
        .execute("SELECT id FROM users WHERE active = %s", &[true.into()])
        .unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(observer.reconnects(), 1);

    let prepared = observer
        .events()
        .into_iter()
        .filter(|e| matches!(e, ConnectionEvent::Prepared { .. }))
        .count();
    assert_eq!(prepared, 2);
    assert_eq!(
        driver.executed(),
        vec![
            "SET NAMES utf8mb4".to_string(),
            USERS.to_string(),
            "SET NAMES utf8mb4".to_string(),
            USERS.to_string(),
        ]
    );
}

#[test]
fn zero_retries_surfaces_transient_error() {
    let driver = users_driver().fail_fetch(
        USERS,
        1,
        DriverError::new(2006, "MySQL server has gone away"),
    );
    let (conn, observer) = connection(&driver);
    let mut conn = conn.with_retries(0);

    let mut stream = conn.query(USERS, &[]).unwrap();
    assert!(stream.next().unwrap().is_ok());
    let err = stream.next().unwrap().unwrap_err();
    assert!(stream.next().is_none());
    drop(stream);

    assert!(err.is_transient());
    assert!(matches!(&err, Error::Query(q) if q.kind == QueryErrorKind::ConnectionLost));
    assert_eq!(err.code(), Some(2006));
    assert_eq!(observer.reconnects(), 0);
    assert_eq!(driver.stats().connects, 1);
}

#[test]
fn per_call_retry_budget_overrides_default() {
    let lost = DriverError::new(2013, "Lost connection");
    let driver = users_driver()
        .fail_next_execute(USERS, lost.clone())
        .fail_next_execute(USERS, lost.clone())
        .fail_next_execute(USERS, lost);
    let (mut conn, observer) = connection(&driver);

    let rows: Vec<Row> = conn
        .query_with_retries(USERS, &[], 3)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(observer.reconnects(), 3);
}

#[test]
fn retry_budget_is_exhausted() {
    let lost = DriverError::new(2013, "Lost connection");
    let driver = users_driver()
        .fail_next_execute(USERS, lost.clone())
        .fail_next_execute(USERS, lost);
    let (mut conn, observer) = connection(&driver);

    let err = conn.execute(USERS, &[]).unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.sql(), Some(USERS));
    assert_eq!(observer.reconnects(), 1);
}

#[test]
fn non_transient_errors_are_not_retried() {
    let driver = ScriptedDriver::new().fail_next_execute(
        "SELECT * FROM nope",
        DriverError::new(1146, "Table 'app.nope' doesn't exist").with_sqlstate("42S02"),
    );
    let (mut conn, observer) = connection(&driver);

    let err = conn.execute("SELECT * FROM nope", &[]).unwrap_err();
    assert!(matches!(&err, Error::Query(q) if q.kind == QueryErrorKind::NotFound));
    assert_eq!(err.sqlstate(), Some("42S02"));
    assert!(!err.is_transient());
    assert_eq!(observer.reconnects(), 0);
    assert_eq!(driver.stats().connects, 1);
    // The session survives a query error.
    assert!(conn.is_connected());
}

#[test]
fn duplicate_key_maps_to_constraint() {
    let driver = ScriptedDriver::new().fail_next_execute(
        "INSERT INTO users (email) VALUES ('a@b.c')",
        DriverError::new(1062, "Duplicate entry 'a@b.c' for key 'email'").with_sqlstate("23000"),
    );
    let (mut conn, _) = connection(&driver);

    let err = conn
        .execute("INSERT INTO users (email) VALUES (%s)", &["a@b.c".into()])
        .unwrap_err();
    assert!(matches!(&err, Error::Query(q) if q.kind == QueryErrorKind::Constraint));
}

#[test]
fn connect_failures_are_not_retried() {
    let driver = users_driver()
        .fail_next_connect(DriverError::new(2003, "Can't connect to MySQL server"));
    let (mut conn, observer) = connection(&driver);

    let err = conn.execute(USERS, &[]).unwrap_err();
    assert!(matches!(&err, Error::Connection(c) if c.kind == ConnectionErrorKind::Connect));
    assert!(err.to_string().contains("db1:3306"));
    assert_eq!(observer.reconnects(), 0);
    assert_eq!(conn.state(), ConnectionState::Unconnected);

    // A later call tries again from scratch.
    assert_eq!(conn.execute(USERS, &[]).unwrap().len(), 4);
}

#[test]
fn failed_reconnect_surfaces_connection_error() {
    let driver = users_driver().fail_fetch(
        USERS,
        0,
        DriverError::new(2006, "MySQL server has gone away"),
    );
    let (mut conn, _) = connection(&driver);

    let mut stream = conn.query(USERS, &[]).unwrap();
    // Queue the failure only after the first session is up.
    let driver_handle = driver.clone().fail_next_connect(DriverError::new(2003, "Can't connect"));
    let err = stream.next().unwrap().unwrap_err();
    assert!(stream.next().is_none());
    drop(stream);

    assert!(matches!(&err, Error::Connection(c) if c.kind == ConnectionErrorKind::Disconnected));
    let cause = std::error::Error::source(&err)
        .and_then(|e| e.downcast_ref::<ConnectionError>())
        .expect("reconnect failure wraps the connect error");
    assert_eq!(cause.kind, ConnectionErrorKind::Connect);
    let driver_err = std::error::Error::source(cause)
        .and_then(|e| e.downcast_ref::<DriverError>())
        .expect("connect error wraps the driver error");
    assert_eq!(driver_err.code, 2003);
    assert_eq!(driver_handle.stats().open_cursors, 0);
    assert_eq!(conn.state(), ConnectionState::Unconnected);
}

#[test]
fn execute_update_reports_affected_rows() {
    let driver = ScriptedDriver::new().with_update(
        "UPDATE users SET active = 0 WHERE last_login < '2024-01-01'",
        7,
        None,
    );
    let (mut conn, _) = connection(&driver);

    let changed = conn
        .execute_update(
            "UPDATE users SET active = %s WHERE last_login < %s",
            &[false.into(), "2024-01-01".into()],
        )
        .unwrap();
    assert_eq!(changed, 7);
    assert_eq!(driver.stats().open_cursors, 0);

    // Statements nobody scripted change nothing.
    assert_eq!(conn.execute_update("DELETE FROM sessions", &[]).unwrap(), 0);
}

#[test]
fn insert_returns_generated_id() {
    let driver = ScriptedDriver::new().with_update(
        "INSERT INTO users (email) VALUES ('a@b.c')",
        1,
        Some(42),
    );
    let (mut conn, _) = connection(&driver);

    let id = conn
        .insert("INSERT INTO users (email) VALUES (%s)", &["a@b.c".into()])
        .unwrap();
    assert_eq!(id, Some(42));

    let stream = conn
        .query("INSERT INTO users (email) VALUES (%s)", &["a@b.c".into()])
        .unwrap();
    assert_eq!(stream.affected_rows(), 1);
    assert_eq!(stream.last_insert_id(), Some(42));
}

#[test]
fn update_count_comes_from_restarted_statement() {
    let sql = "UPDATE users SET active = 1";
    let driver = ScriptedDriver::new()
        .with_update(sql, 3, None)
        .fail_next_execute(sql, DriverError::new(2006, "MySQL server has gone away"));
    let (mut conn, observer) = connection(&driver);

    assert_eq!(conn.execute_update(sql, &[]).unwrap(), 3);
    assert_eq!(observer.reconnects(), 1);
}

#[test]
fn cursor_close_failure_on_abandoned_stream_is_swallowed() {
    let driver = users_driver();
    let (mut conn, observer) = connection(&driver);
    conn.connect().unwrap();
    let driver = driver.fail_next_cursor_close(DriverError::new(2013, "Lost connection"));

    let first: Vec<Row> = conn
        .query(USERS, &[])
        .unwrap()
        .take(1)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ids(&first), vec![10]);
    assert!(observer.events().iter().any(|e| matches!(
        e,
        ConnectionEvent::CloseFailed { resource: "cursor", .. }
    )));
    assert_eq!(driver.stats().open_cursors, 0);

    // The connection is still usable.
    assert!(conn.is_connected());
    assert_eq!(conn.execute(USERS, &[]).unwrap().len(), 4);
}

#[test]
fn cursor_close_failure_on_exhausted_stream_is_swallowed() {
    let driver = users_driver();
    let (mut conn, observer) = connection(&driver);
    conn.connect().unwrap();
    let driver = driver.fail_next_cursor_close(DriverError::new(2013, "Lost connection"));

    let mut stream = conn.query(USERS, &[]).unwrap();
    let rows: Vec<Row> = stream.by_ref().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.len(), 4);
    assert!(stream.next().is_none());
    drop(stream);

    let failures = observer
        .events()
        .into_iter()
        .filter(|e| matches!(e, ConnectionEvent::CloseFailed { resource: "cursor", .. }))
        .count();
    assert_eq!(failures, 1);
    assert_eq!(driver.stats().cursor_closes, 2);
    assert_eq!(conn.query_one(USERS, &[]).unwrap().unwrap().len(), 1);
}

#[test]
fn malformed_query_executes_nothing() {
    let driver = users_driver();
    let (mut conn, _) = connection(&driver);

    let err = conn
        .execute("SELECT id FROM users WHERE a = %s AND b = %s", &[1.into()])
        .unwrap_err();
    assert!(matches!(err, Error::Malformed(_)));
    let err = conn.execute("SELECT id FROM users", &[1.into()]).unwrap_err();
    assert!(matches!(err, Error::Malformed(_)));
    assert!(driver.executed().is_empty());
}

#[test]
fn string_arguments_are_escaped() {
    let driver = ScriptedDriver::new();
    let (mut conn, _) = connection(&driver);

    conn.execute(
        "SELECT id FROM users WHERE name = %s AND note = %s",
        &["Robert'); DROP TABLE users;--".into(), Value::Null],
    )
    .unwrap();
    assert_eq!(
        conn.last_query(),
        Some("SELECT id FROM users WHERE name = 'Robert\\'); DROP TABLE users;--' AND note = NULL")
    );
}

#[test]
fn close_twice_leaves_unconnected() {
    let driver = users_driver();
    let (mut conn, observer) = connection(&driver);

    conn.execute(USERS, &[]).unwrap();
    conn.close();
    conn.close();
    assert_eq!(conn.state(), ConnectionState::Unconnected);
    assert_eq!(driver.stats().session_closes, 1);
    assert_eq!(
        observer
            .events()
            .iter()
            .filter(|e| **e == ConnectionEvent::Closed)
            .count(),
        1
    );

    // Reusable after close.
    assert_eq!(conn.execute(USERS, &[]).unwrap().len(), 4);
    assert_eq!(driver.stats().connects, 2);
}

#[test]
fn use_after_shutdown_fails() {
    let driver = users_driver();
    let (mut conn, _) = connection(&driver);

    conn.execute(USERS, &[]).unwrap();
    conn.shutdown();
    assert_eq!(conn.state(), ConnectionState::Closed);

    let err = conn.query(USERS, &[]).unwrap_err();
    assert!(err.is_use_after_close());
    assert_eq!(driver.stats().connects, 1);
}

#[test]
fn dropping_the_connection_closes_the_session() {
    let driver = users_driver();
    {
        let (mut conn, _) = connection(&driver);
        conn.execute(USERS, &[]).unwrap();
        assert_eq!(driver.stats().open_sessions, 1);
    }
    assert_eq!(driver.stats().open_sessions, 0);
}

#[test]
fn config_from_framework_document() {
    let config: MySqlConfig = serde_json::from_str(
        r#"{"host": "db1", "port": 3307, "username": "app", "password": "pw", "schema": "app"}"#,
    )
    .unwrap();
    let driver = ScriptedDriver::new();
    let conn = Connection::new(config, driver);
    assert_eq!(conn.config().socket_addr(), "db1:3307");
    assert_eq!(conn.config().database.as_deref(), Some("app"));
}

#[test]
fn config_from_url_drives_connection() {
    let config = MySqlConfig::from_url("mysql://app:pw@db1:3306/app").unwrap();
    let driver = users_driver();
    let observer = Arc::new(RecordingObserver::new());
    let mut conn =
        Connection::new(config.charset("utf8"), driver.clone()).with_observer(observer.clone());

    conn.execute(USERS, &[]).unwrap();
    assert_eq!(driver.executed()[0], "SET NAMES utf8");
    assert!(matches!(
        &observer.events()[0],
        ConnectionEvent::Connected { host, port: 3306 } if host == "db1"
    ));
}
