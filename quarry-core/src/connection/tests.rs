use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;

use super::*;
use crate::query::Constrainable;
use crate::test_utils::MockDriver;

fn mock() -> (MockDriver, Connection) {
    let driver = MockDriver::new();
    let conn = Connection::from_driver(driver.clone(), "");
    (driver, conn)
}

fn deadlock() -> DriverError {
    DriverError::new("Deadlock found when trying to get lock; try restarting transaction")
}

#[tokio::test]
async fn lost_connection_is_retried_once_outside_transactions() {
    let (driver, mut conn) = mock();
    driver
        .push_error(DriverError::new("MySQL server has gone away"))
        .push_rows(vec![Row::from([("id".to_owned(), Value::Int(1))])]);

    let rows = conn.select("select * from users", vec![]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(driver.reconnects(), 1);
    assert_eq!(driver.statements().len(), 2);
}

#[tokio::test]
async fn lost_connection_inside_transaction_is_not_retried() {
    let (driver, mut conn) = mock();
    conn.begin_transaction().await.unwrap();
    driver.push_error(DriverError::new("Lost connection to server"));

    let err = conn.select("select 1", vec![]).await.unwrap_err();
    assert!(crate::detect::caused_by_lost_connection(&err));
    assert_eq!(driver.reconnects(), 0);
}

#[tokio::test]
async fn failures_carry_sql_and_bindings() {
    let (driver, mut conn) = mock();
    driver.push_error(DriverError::new("no such table: users"));

    let err = conn
        .select("select * from users where id = ?", vec![Value::Int(5)])
        .await
        .unwrap_err();
    match err {
        QuarryError::Query(query) => {
            assert_eq!(query.sql, "select * from users where id = ?");
            assert_eq!(query.bindings, vec![Value::Int(5)]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn bindings_are_normalized_before_the_driver_sees_them() {
    let (driver, mut conn) = mock();
    let when = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 5)
        .unwrap();
    conn.statement(
        "insert into t (a, b) values (?, ?)",
        vec![Value::Bool(true), Value::DateTime(when)],
    )
    .await
    .unwrap();
    assert_eq!(
        driver.bindings()[0],
        vec![Value::Int(1), Value::from("2024-01-02 03:04:05")]
    );
}

#[tokio::test]
async fn nested_transactions_use_savepoints() {
    let (driver, mut conn) = mock();
    conn.begin_transaction().await.unwrap();
    conn.begin_transaction().await.unwrap();
    assert_eq!(conn.transaction_level(), 2);
    conn.rollback().await.unwrap();
    assert_eq!(conn.transaction_level(), 1);
    conn.commit().await.unwrap();
    assert_eq!(conn.transaction_level(), 0);

    assert_eq!(
        driver.statements(),
        vec![
            "BEGIN",
            "SAVEPOINT trans2",
            "ROLLBACK TO SAVEPOINT trans2",
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn rollback_to_out_of_range_level_is_ignored() {
    let (driver, mut conn) = mock();
    conn.begin_transaction().await.unwrap();
    conn.rollback_to(3).await.unwrap();
    assert_eq!(conn.transaction_level(), 1);
    conn.rollback_to(0).await.unwrap();
    assert_eq!(conn.transaction_level(), 0);
    assert_eq!(driver.statements(), vec!["BEGIN", "ROLLBACK"]);
}

#[tokio::test]
async fn transaction_commits_and_returns_value() {
    let (driver, mut conn) = mock();
    driver.push_executed(1, Some(7));
    let id = conn
        .transaction(1, |c| {
            Box::pin(async move {
                c.table("users")
                    .insert_get_id(c, crate::value::record([("name", "ann")]))
                    .await
            })
        })
        .await
        .unwrap();
    assert_eq!(id, 7);
    assert_eq!(conn.transaction_level(), 0);
    let statements = driver.statements();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));
}

#[tokio::test]
async fn deadlocks_are_retried_until_success() {
    let (driver, mut conn) = mock();
    driver.push_error(deadlock());

    let affected = conn
        .transaction(3, |c| {
            Box::pin(async move {
                c.table("users")
                    .filter_eq("id", 1)
                    .update(c, crate::value::record([("votes", 2)]))
                    .await
            })
        })
        .await
        .unwrap();
    assert_eq!(affected, 0);
    assert_eq!(conn.transaction_level(), 0);
    let statements = driver.statements();
    assert_eq!(statements[0], "BEGIN");
    assert_eq!(statements[2], "ROLLBACK");
    assert_eq!(statements[3], "BEGIN");
    assert_eq!(statements[5], "COMMIT");
}

#[tokio::test]
async fn exhausted_deadlock_retries_surface_the_error_at_level_zero() {
    let (driver, mut conn) = mock();
    driver.push_error(deadlock()).push_error(deadlock());

    let err = conn
        .transaction(2, |c| {
            Box::pin(async move { c.statement("update users set votes = 1", vec![]).await })
        })
        .await
        .unwrap_err();
    assert!(crate::detect::caused_by_concurrency_error(&err));
    assert_eq!(conn.transaction_level(), 0);
    assert_eq!(
        driver
            .statements()
            .iter()
            .filter(|sql| sql.as_str() == "ROLLBACK")
            .count(),
        2
    );
}

#[tokio::test]
async fn other_errors_roll_back_without_retry() {
    let (driver, mut conn) = mock();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let err = conn
        .transaction(5, move |_c| {
            let counter = counter.clone();
            Box::pin(async move {
                *counter.lock().unwrap() += 1;
                Err::<(), _>(QuarryError::Message("boom".to_owned()))
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Message(_)));
    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(driver.statements(), vec!["BEGIN", "ROLLBACK"]);
}

#[tokio::test]
async fn nested_deadlock_releases_level_and_propagates() {
    let (driver, mut conn) = mock();
    let script = driver.clone();

    let err = conn
        .transaction(1, move |c| {
            let script = script.clone();
            Box::pin(async move {
                c.transaction(3, move |inner| {
                    script.push_error(deadlock());
                    Box::pin(async move { inner.statement("update t set a = 1", vec![]).await })
                })
                .await
            })
        })
        .await
        .unwrap_err();
    assert!(crate::detect::caused_by_concurrency_error(&err));
    assert_eq!(conn.transaction_level(), 0);
    assert_eq!(
        driver.statements(),
        vec!["BEGIN", "SAVEPOINT trans2", "update t set a = 1", "ROLLBACK"]
    );
}

#[tokio::test]
async fn pretend_collects_statements_without_running_them() {
    let (driver, mut conn) = mock();
    let log = conn
        .pretend(|c| {
            Box::pin(async move {
                c.table("users").filter_eq("id", 1).delete(c).await?;
                let rows = c.table("users").get(c).await?;
                assert!(rows.is_empty());
                Ok(())
            })
        })
        .await
        .unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].sql, "delete from \"users\" where \"id\" = ?");
    assert_eq!(log[0].bindings, vec![Value::Int(1)]);
    assert!(driver.statements().is_empty());
    assert!(!conn.pretending());
    assert!(conn.query_log().is_empty());
}

#[tokio::test]
async fn query_log_and_listeners_see_every_statement() {
    let (_driver, mut conn) = mock();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    conn.listen(move |record| sink.lock().unwrap().push(record.sql.clone()));

    conn.select("select 1", vec![]).await.unwrap();
    assert!(conn.query_log().is_empty());

    conn.enable_query_log();
    conn.select("select 2", vec![]).await.unwrap();
    assert_eq!(conn.query_log().len(), 1);
    assert_eq!(conn.query_log()[0].sql, "select 2");
    conn.flush_query_log();
    assert!(conn.query_log().is_empty());

    assert_eq!(*seen.lock().unwrap(), vec!["select 1", "select 2"]);
}

#[tokio::test]
async fn failed_begin_leaves_level_untouched() {
    let (driver, mut conn) = mock();
    driver.push_control_error(DriverError::new("disk I/O error"));
    let err = conn.begin_transaction().await.unwrap_err();
    assert!(matches!(err, QuarryError::Driver(_)));
    assert_eq!(conn.transaction_level(), 0);
}

#[tokio::test]
async fn failed_commit_releases_the_level() {
    let (driver, mut conn) = mock();
    let script = driver.clone();
    let err = conn
        .transaction(1, move |c| {
            script.push_control_error(DriverError::new("database is locked"));
            Box::pin(async move { c.select("select 1", vec![]).await })
        })
        .await
        .unwrap_err();
    assert!(crate::detect::caused_by_concurrency_error(&err));
    assert_eq!(conn.transaction_level(), 0);
    assert_eq!(driver.statements(), vec!["BEGIN", "select 1", "COMMIT"]);
}

#[tokio::test]
async fn mysql_driver_name_selects_mysql_grammar() {
    let conn = Connection::from_driver(MockDriver::named("mysql"), "app_");
    assert_eq!(conn.table("users").to_sql(), "select * from `app_users`");
    assert_eq!(conn.table_prefix(), "app_");
}

#[tokio::test]
async fn unknown_driver_is_rejected() {
    let config = DatabaseConfig {
        driver: "oracle".to_owned(),
        ..DatabaseConfig::default()
    };
    let err = Connection::connect(&config).await.unwrap_err();
    assert!(matches!(err, QuarryError::UnsupportedDriver(name) if name == "oracle"));
}
