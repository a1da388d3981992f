use std::fmt;

use crate::value::Value;

/// Raw failure reported by a [`Driver`](crate::driver::Driver).
///
/// The message is kept verbatim because lost-connection and deadlock
/// classification match against it.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverError {
    pub message: String,
    /// SQLSTATE or driver specific code when the backend reports one.
    pub code: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|code| code.into_owned());
                Self {
                    message: db.message().to_owned(),
                    code,
                }
            }
            sqlx::Error::Io(io) => Self::new(format!("Lost connection: {io}")).with_code("io"),
            sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                Self::new(format!("Lost connection: {err}")).with_code("io")
            }
            _ => Self::new(err.to_string()),
        }
    }
}

/// A statement failed at the driver; carries the SQL and the bindings it ran with.
#[derive(Debug, Clone)]
pub struct QueryError {
    pub sql: String,
    pub bindings: Vec<Value>,
    pub source: DriverError,
}

impl QueryError {
    pub fn new(sql: impl Into<String>, bindings: Vec<Value>, source: DriverError) -> Self {
        Self {
            sql: sql.into(),
            bindings,
            source,
        }
    }

    /// The SQL with every `?` replaced by its binding, for diagnostics only.
    pub fn interpolated_sql(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + self.bindings.len() * 8);
        let mut bindings = self.bindings.iter();
        for ch in self.sql.chars() {
            if ch == '?' {
                match bindings.next() {
                    Some(value) => out.push_str(&value.to_sql_literal()),
                    None => out.push('?'),
                }
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQL: {})", self.source, self.interpolated_sql())
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Quarry-specific error type with actionable variants.
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    /// A statement failed while executing.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// A driver failure outside of statement execution (connect, begin, commit).
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("no query results for entity [{entity}] {}", format_ids(.ids))]
    ModelNotFound { entity: String, ids: Vec<Value> },
    #[error("add [{key}] to the fillable list to allow mass assignment on [{entity}]")]
    MassAssignment { key: String, entity: String },
    #[error("relationship [{relation}] on [{entity}] is not defined: {reason}")]
    RelationshipDefinition {
        entity: String,
        relation: String,
        reason: String,
    },
    #[error("unsupported driver [{0}]")]
    UnsupportedDriver(String),
    #[error("this database driver does not support {0}")]
    Unsupported(String),
    #[error("entity [{0}] is not registered")]
    UnknownEntity(String),
    #[error("cannot convert attribute [{key}]: {message}")]
    Conversion { key: String, message: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A lifecycle hook vetoed the operation.
    #[error("{0}")]
    Hook(String),
    #[error("{0}")]
    Message(String),
}

impl QuarryError {
    pub fn model_not_found(entity: impl Into<String>, ids: Vec<Value>) -> Self {
        Self::ModelNotFound {
            entity: entity.into(),
            ids,
        }
    }

    /// The driver failure underneath this error, if there is one.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Query(err) => Some(&err.source),
            Self::Driver(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for QuarryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Driver(DriverError::from(err))
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Message(format!("json error: {err}"))
    }
}

fn format_ids(ids: &[Value]) -> String {
    ids.iter()
        .map(|id| id.to_sql_literal())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias for Quarry operations.
pub type Result<T, E = QuarryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_error_renders_sql_with_bindings() {
        let err = QueryError::new(
            "select * from \"users\" where \"id\" = ? and \"name\" = ?",
            vec![Value::Int(4), Value::Text("ann".to_owned())],
            DriverError::new("no such table: users"),
        );
        let rendered = err.to_string();
        assert!(rendered.starts_with("no such table: users"));
        assert!(rendered.contains("\"id\" = 4 and \"name\" = 'ann'"));
    }

    #[test]
    fn model_not_found_lists_ids() {
        let err = QuarryError::model_not_found("User", vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(err.to_string(), "no query results for entity [User] 1, 2");
    }

    #[test]
    fn driver_error_exposed_through_query_error() {
        let err = QuarryError::from(QueryError::new(
            "select 1",
            vec![],
            DriverError::new("deadlock detected").with_code("40001"),
        ));
        let source = err.driver_error().unwrap();
        assert_eq!(source.code.as_deref(), Some("40001"));
    }
}
