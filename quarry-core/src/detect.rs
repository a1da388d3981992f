//! Best-effort classification of driver failures.
//!
//! Both checks match the raw driver message against known substrings. The
//! tables are dialect specific and will miss messages from drivers they do not
//! list; treat a `false` as "unknown", not as "definitely not".

use crate::error::{DriverError, QuarryError};

const LOST_CONNECTION_MESSAGES: &[&str] = &[
    "server has gone away",
    "no connection to the server",
    "lost connection",
    "is dead or not enabled",
    "error while sending",
    "decryption failed or bad record mac",
    "server closed the connection unexpectedly",
    "ssl connection has been closed unexpectedly",
    "error writing data to the connection",
    "resource deadlock avoided",
    "reset by peer",
    "physical connection is not usable",
    "packets out of order. expected",
    "communication link failure",
    "connection is no longer usable",
    "login timeout expired",
    "connection refused",
    "broken pipe",
    "connection timed out",
    "the connection is broken and recovery is not possible",
    "connection closed",
];

const CONCURRENCY_MESSAGES: &[&str] = &[
    "deadlock found when trying to get lock",
    "deadlock detected",
    "the database file is locked",
    "database is locked",
    "database table is locked",
    "a table in the database is locked",
    "has been chosen as the deadlock victim",
    "lock wait timeout exceeded; try restarting transaction",
    "wsrep detected deadlock/conflict and aborted the transaction",
];

/// SQLSTATE for serialization failures.
const SERIALIZATION_FAILURE: &str = "40001";

pub fn caused_by_lost_connection(err: &QuarryError) -> bool {
    err.driver_error().is_some_and(is_lost_connection)
}

pub fn caused_by_concurrency_error(err: &QuarryError) -> bool {
    err.driver_error().is_some_and(is_concurrency_error)
}

pub(crate) fn is_lost_connection(err: &DriverError) -> bool {
    if err.code.as_deref() == Some("io") {
        return true;
    }
    let message = err.message.to_ascii_lowercase();
    LOST_CONNECTION_MESSAGES
        .iter()
        .any(|needle| message.contains(needle))
}

pub(crate) fn is_concurrency_error(err: &DriverError) -> bool {
    if err.code.as_deref() == Some(SERIALIZATION_FAILURE) {
        return true;
    }
    let message = err.message.to_ascii_lowercase();
    CONCURRENCY_MESSAGES.iter().any(|needle| message.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_lost_connections() {
        assert!(is_lost_connection(&DriverError::new(
            "SQLSTATE[HY000]: General error: 2006 MySQL server has gone away"
        )));
        assert!(is_lost_connection(&DriverError::new("anything").with_code("io")));
        assert!(!is_lost_connection(&DriverError::new("syntax error near from")));
    }

    #[test]
    fn recognizes_deadlocks() {
        assert!(is_concurrency_error(&DriverError::new(
            "Deadlock found when trying to get lock; try restarting transaction"
        )));
        assert!(is_concurrency_error(&DriverError::new("database is locked")));
        assert!(is_concurrency_error(&DriverError::new("x").with_code("40001")));
        assert!(!is_concurrency_error(&DriverError::new("UNIQUE constraint failed")));
    }

    #[test]
    fn non_driver_errors_are_never_classified() {
        let err = QuarryError::Message("deadlock detected".to_owned());
        assert!(!caused_by_concurrency_error(&err));
        assert!(!caused_by_lost_connection(&err));
    }
}
