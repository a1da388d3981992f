use std::fmt;

use async_trait::async_trait;

use crate::error::DriverError;
use crate::value::{Row, Value};

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "mysql")]
pub use mysql::MySqlDriver;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

/// Outcome of a data-modifying statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Executed {
    pub rows_affected: u64,
    /// Last generated auto-increment id, when the backend reports one.
    pub last_insert_id: Option<i64>,
}

/// The capability a backend must provide to the connection.
///
/// Implementations execute parameterized SQL with `?` placeholders and hand
/// rows back as ordered column maps. Transaction control defaults to plain
/// `BEGIN` / `COMMIT` / `ROLLBACK` statements.
#[async_trait]
pub trait Driver: Send + fmt::Debug {
    /// Short driver name such as `sqlite` or `mysql`.
    fn name(&self) -> &'static str;

    async fn select(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError>;

    async fn execute(&mut self, sql: &str, bindings: &[Value]) -> Result<Executed, DriverError>;

    /// Runs SQL without preparing it; may contain several statements.
    async fn unprepared(&mut self, sql: &str) -> Result<u64, DriverError>;

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.unprepared("BEGIN").await.map(|_| ())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.unprepared("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.unprepared("ROLLBACK").await.map(|_| ())
    }

    /// Drops the underlying session and opens a new one.
    async fn reconnect(&mut self) -> Result<(), DriverError>;
}
