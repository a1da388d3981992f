use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::connection::Connection;
use crate::driver::{Driver, Executed};
use crate::error::{DriverError, Result};
use crate::value::{Row, Value};

/// Run an async test block inside a transaction that is always rolled back.
pub async fn with_test_transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut Connection) -> BoxFuture<'c, Result<T>>,
{
    let level = conn.transaction_level();
    conn.begin_transaction().await?;
    let result = f(conn).await;
    let rollback_result = conn.rollback_to(level).await;

    match (result, rollback_result) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(err), _) => Err(err),
        (Ok(_), Err(err)) => Err(err),
    }
}

/// A fresh in-memory SQLite connection.
#[cfg(feature = "sqlite")]
pub async fn memory_connection() -> Result<Connection> {
    Connection::connect(&crate::config::DatabaseConfig::default()).await
}

/// A scripted reply for [`MockDriver`].
#[derive(Debug, Clone)]
pub enum MockResponse {
    Rows(Vec<Row>),
    Executed(Executed),
    Fail(DriverError),
}

#[derive(Debug, Default)]
struct MockState {
    statements: Vec<(String, Vec<Value>)>,
    responses: VecDeque<MockResponse>,
    control_errors: VecDeque<DriverError>,
    reconnects: u32,
}

/// In-process [`Driver`] that records every statement and replays queued
/// responses in order.
///
/// Statements consume the next queued response; with nothing queued they
/// return no rows or a zero result. `BEGIN`, `COMMIT` and `ROLLBACK` draw from
/// a separate error queue. Clones share the same script and recording.
#[derive(Debug, Clone)]
pub struct MockDriver {
    name: &'static str,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self::named("sqlite")
    }

    /// A mock that reports itself as `name` so the connection picks that dialect.
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_rows(&self, rows: Vec<Row>) -> &Self {
        self.state().responses.push_back(MockResponse::Rows(rows));
        self
    }

    pub fn push_executed(&self, rows_affected: u64, last_insert_id: Option<i64>) -> &Self {
        self.state()
            .responses
            .push_back(MockResponse::Executed(Executed {
                rows_affected,
                last_insert_id,
            }));
        self
    }

    pub fn push_error(&self, error: DriverError) -> &Self {
        self.state().responses.push_back(MockResponse::Fail(error));
        self
    }

    /// Fails the next `BEGIN`, `COMMIT` or `ROLLBACK` with `error`.
    pub fn push_control_error(&self, error: DriverError) -> &Self {
        self.state().control_errors.push_back(error);
        self
    }

    /// Every SQL string the driver received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state()
            .statements
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn bindings(&self) -> Vec<Vec<Value>> {
        self.state()
            .statements
            .iter()
            .map(|(_, bindings)| bindings.clone())
            .collect()
    }

    pub fn reconnects(&self) -> u32 {
        self.state().reconnects
    }

    pub fn clear(&self) {
        self.state().statements.clear();
    }

    fn record(&self, sql: &str, bindings: &[Value]) -> Option<MockResponse> {
        let mut state = self.state();
        state.statements.push((sql.to_owned(), bindings.to_vec()));
        state.responses.pop_front()
    }

    fn control(&self, sql: &str) -> std::result::Result<(), DriverError> {
        let mut state = self.state();
        state.statements.push((sql.to_owned(), Vec::new()));
        match state.control_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn select(&mut self, sql: &str, bindings: &[Value]) -> std::result::Result<Vec<Row>, DriverError> {
        match self.record(sql, bindings) {
            Some(MockResponse::Rows(rows)) => Ok(rows),
            Some(MockResponse::Fail(err)) => Err(err),
            Some(MockResponse::Executed(_)) | None => Ok(Vec::new()),
        }
    }

    async fn execute(&mut self, sql: &str, bindings: &[Value]) -> std::result::Result<Executed, DriverError> {
        match self.record(sql, bindings) {
            Some(MockResponse::Executed(executed)) => Ok(executed),
            Some(MockResponse::Fail(err)) => Err(err),
            Some(MockResponse::Rows(_)) | None => Ok(Executed::default()),
        }
    }

    async fn unprepared(&mut self, sql: &str) -> std::result::Result<u64, DriverError> {
        match self.record(sql, &[]) {
            Some(MockResponse::Fail(err)) => Err(err),
            Some(MockResponse::Executed(executed)) => Ok(executed.rows_affected),
            _ => Ok(0),
        }
    }

    async fn begin(&mut self) -> std::result::Result<(), DriverError> {
        self.control("BEGIN")
    }

    async fn commit(&mut self) -> std::result::Result<(), DriverError> {
        self.control("COMMIT")
    }

    async fn rollback(&mut self) -> std::result::Result<(), DriverError> {
        self.control("ROLLBACK")
    }

    async fn reconnect(&mut self) -> std::result::Result<(), DriverError> {
        self.state().reconnects += 1;
        Ok(())
    }
}
