#![cfg(feature = "metrics")]

use quarry_orm::metrics::{install_prometheus_recorder, record_transaction_depth};
use quarry_orm::test_utils::memory_connection;

#[tokio::test]
async fn sqlite_queries_are_exported_to_prometheus() {
    let handle = install_prometheus_recorder().expect("recorder");
    let mut conn = memory_connection().await.expect("connection");

    conn.statement("create table probes (id integer primary key)", Vec::new())
        .await
        .expect("create");
    conn.begin_transaction().await.expect("begin");
    record_transaction_depth(&conn);
    conn.rollback().await.expect("rollback");

    let rendered = handle.render();
    assert!(rendered.contains("quarry_query_count"));
    assert!(rendered.contains("quarry_query_duration_ms"));
    assert!(rendered.contains("quarry_transaction_level"));
    assert!(rendered.contains("driver=\"sqlite\""));
}
