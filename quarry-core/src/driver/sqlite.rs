use std::str::FromStr;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Row as _, TypeInfo, ValueRef};

use super::{Driver, Executed};
use crate::error::DriverError;
use crate::value::{DATE_FORMAT, Row, Value};

/// [`Driver`] backed by a single `sqlx` SQLite connection.
///
/// Reconnecting to `sqlite::memory:` yields a fresh, empty database.
#[derive(Debug)]
pub struct SqliteDriver {
    options: SqliteConnectOptions,
    conn: SqliteConnection,
}

impl SqliteDriver {
    pub async fn connect(url: &str) -> Result<Self, DriverError> {
        Self::connect_with(url, true).await
    }

    /// Opens the database, creating the file when missing.
    pub async fn connect_with(url: &str, foreign_keys: bool) -> Result<Self, DriverError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(foreign_keys);
        let conn = options.connect().await?;
        Ok(Self { options, conn })
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(v) => query.bind(i64::from(*v)),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Bytes(v) => query.bind(v.clone()),
        Value::Json(v) => query.bind(v.to_string()),
        Value::Date(v) => query.bind(v.format("%Y-%m-%d").to_string()),
        Value::DateTime(v) => query.bind(v.format(DATE_FORMAT).to_string()),
    }
}

fn decode_row(row: &SqliteRow) -> Result<Row, DriverError> {
    let mut out = Row::with_capacity(row.columns().len());
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            // Storage class of the value itself, not the declared column type.
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" | "BOOLEAN" => {
                    Value::Int(row.try_get_unchecked::<i64, _>(idx)?)
                }
                "REAL" | "FLOAT" | "DOUBLE" => Value::Float(row.try_get_unchecked::<f64, _>(idx)?),
                "BLOB" => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
                _ => Value::Text(row.try_get_unchecked::<String, _>(idx)?),
            }
        };
        out.insert(column.name().to_owned(), value);
    }
    Ok(out)
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn select(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError> {
        let query = bindings.iter().fold(sqlx::query(sql), bind_value);
        let rows = query.fetch_all(&mut self.conn).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &str, bindings: &[Value]) -> Result<Executed, DriverError> {
        let query = bindings.iter().fold(sqlx::query(sql), bind_value);
        let result = query.execute(&mut self.conn).await?;
        Ok(Executed {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        })
    }

    async fn unprepared(&mut self, sql: &str) -> Result<u64, DriverError> {
        let result = sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }

    async fn reconnect(&mut self) -> Result<(), DriverError> {
        tracing::warn!(driver = "sqlite", "quarry reconnect");
        self.conn = self.options.connect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn select_decodes_storage_classes() {
        let mut driver = SqliteDriver::connect("sqlite::memory:").await.unwrap();
        driver
            .unprepared("create table t (a integer, b real, c text, d blob, e datetime)")
            .await
            .unwrap();
        driver
            .execute(
                "insert into t values (?, ?, ?, ?, ?)",
                &[
                    Value::Int(7),
                    Value::Float(1.5),
                    Value::from("x"),
                    Value::Bytes(vec![1, 2]),
                    Value::Null,
                ],
            )
            .await
            .unwrap();

        let rows = driver.select("select * from t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["a"], Value::Int(7));
        assert_eq!(row["b"], Value::Float(1.5));
        assert_eq!(row["c"], Value::from("x"));
        assert_eq!(row["d"], Value::Bytes(vec![1, 2]));
        assert_eq!(row["e"], Value::Null);
    }

    #[tokio::test]
    async fn execute_reports_last_insert_id() {
        let mut driver = SqliteDriver::connect("sqlite::memory:").await.unwrap();
        driver
            .unprepared("create table t (id integer primary key autoincrement, name text)")
            .await
            .unwrap();
        let done = driver
            .execute("insert into t (name) values (?)", &[Value::from("a")])
            .await
            .unwrap();
        assert_eq!(done.rows_affected, 1);
        assert_eq!(done.last_insert_id, Some(1));
    }

    #[tokio::test]
    async fn errors_keep_driver_message() {
        let mut driver = SqliteDriver::connect("sqlite::memory:").await.unwrap();
        let err = driver.select("select * from missing", &[]).await.unwrap_err();
        assert!(err.message.contains("no such table"));
    }
}
