use std::str::FromStr;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Row as _, TypeInfo, ValueRef};

use super::{Driver, Executed};
use crate::error::DriverError;
use crate::value::{DATE_FORMAT, Row, Value};

/// [`Driver`] backed by a single `sqlx` MySQL connection.
#[derive(Debug)]
pub struct MySqlDriver {
    options: MySqlConnectOptions,
    conn: MySqlConnection,
}

impl MySqlDriver {
    pub async fn connect(url: &str) -> Result<Self, DriverError> {
        let options = MySqlConnectOptions::from_str(url)?;
        let conn = options.connect().await?;
        Ok(Self { options, conn })
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(v) => query.bind(i64::from(*v)),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Bytes(v) => query.bind(v.clone()),
        Value::Json(v) => query.bind(v.to_string()),
        Value::Date(v) => query.bind(*v),
        Value::DateTime(v) => query.bind(v.format(DATE_FORMAT).to_string()),
    }
}

fn decode_row(row: &MySqlRow) -> Result<Row, DriverError> {
    let mut out = Row::with_capacity(row.columns().len());
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                    Value::Int(row.try_get_unchecked::<i64, _>(idx)?)
                }
                name if name.ends_with("UNSIGNED") => {
                    Value::Int(row.try_get_unchecked::<u64, _>(idx)? as i64)
                }
                "FLOAT" | "DOUBLE" => Value::Float(row.try_get_unchecked::<f64, _>(idx)?),
                "DATETIME" | "TIMESTAMP" => {
                    Value::DateTime(row.try_get_unchecked::<NaiveDateTime, _>(idx)?)
                }
                "DATE" => Value::Date(row.try_get_unchecked::<NaiveDate, _>(idx)?),
                "TIME" => Value::Text(
                    row.try_get_unchecked::<NaiveTime, _>(idx)?
                        .format("%H:%M:%S")
                        .to_string(),
                ),
                "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                    Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?)
                }
                _ => Value::Text(row.try_get_unchecked::<String, _>(idx)?),
            }
        };
        out.insert(column.name().to_owned(), value);
    }
    Ok(out)
}

#[async_trait]
impl Driver for MySqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
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
            last_insert_id: Some(result.last_insert_id() as i64),
        })
    }

    async fn unprepared(&mut self, sql: &str) -> Result<u64, DriverError> {
        let result = sqlx::raw_sql(sql).execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.unprepared("START TRANSACTION").await.map(|_| ())
    }

    async fn reconnect(&mut self) -> Result<(), DriverError> {
        tracing::warn!(driver = "mysql", "quarry reconnect");
        self.conn = self.options.connect().await?;
        Ok(())
    }
}
