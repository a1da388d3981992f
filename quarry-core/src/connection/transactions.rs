use futures_util::future::BoxFuture;

use super::Connection;
use crate::detect::{self, caused_by_concurrency_error, caused_by_lost_connection};
use crate::error::Result;

impl Connection {
    /// Current nesting depth; 0 outside any transaction.
    pub fn transaction_level(&self) -> u32 {
        self.transactions
    }

    /// Starts a transaction, or a savepoint when one is already open.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.create_transaction().await?;
        self.transactions += 1;
        tracing::debug!(level = self.transactions, "quarry transaction begin");
        Ok(())
    }

    async fn create_transaction(&mut self) -> Result<()> {
        if self.transactions == 0 {
            match self.driver.begin().await {
                Err(err) if detect::is_lost_connection(&err) => {
                    tracing::warn!(error = %err, "quarry lost connection before begin, retrying");
                    self.driver.reconnect().await?;
                    self.driver.begin().await?;
                }
                other => other?,
            }
        } else if self.grammar.supports_savepoints() {
            let sql = self
                .grammar
                .compile_savepoint(&format!("trans{}", self.transactions + 1));
            self.unprepared(&sql).await?;
        }
        Ok(())
    }

    /// Commits the outermost transaction, or just leaves the current savepoint.
    pub async fn commit(&mut self) -> Result<()> {
        if self.transactions == 1 {
            self.driver.commit().await?;
        }
        self.transactions = self.transactions.saturating_sub(1);
        tracing::debug!(level = self.transactions, "quarry transaction commit");
        Ok(())
    }

    /// Rolls back the innermost level.
    pub async fn rollback(&mut self) -> Result<()> {
        let to = self.transactions.saturating_sub(1);
        self.rollback_to(to).await
    }

    /// Rolls back to `level`: 0 rolls back the whole transaction, higher
    /// levels roll back to the matching savepoint. Out of range levels are
    /// ignored.
    pub async fn rollback_to(&mut self, level: u32) -> Result<()> {
        if level >= self.transactions {
            return Ok(());
        }
        if let Err(err) = self.perform_rollback(level).await {
            if caused_by_lost_connection(&err) {
                self.transactions = 0;
            }
            return Err(err);
        }
        self.transactions = level;
        tracing::debug!(level, "quarry transaction rollback");
        Ok(())
    }

    async fn perform_rollback(&mut self, level: u32) -> Result<()> {
        if level == 0 {
            self.driver.rollback().await?;
        } else if self.grammar.supports_savepoints() {
            let sql = self
                .grammar
                .compile_savepoint_rollback(&format!("trans{}", level + 1));
            self.unprepared(&sql).await?;
        }
        Ok(())
    }

    /// Runs `callback` inside a transaction, retrying the whole attempt up to
    /// `attempts` times when it fails with a deadlock or serialization error.
    ///
    /// Any other error rolls the level back and is returned. A deadlock inside
    /// a nested transaction is not retried: the level is released and the
    /// error propagates so the outermost transaction can retry.
    pub async fn transaction<T, F>(&mut self, attempts: u32, mut callback: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut Connection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let attempts = attempts.max(1);
        let mut current = 1;
        loop {
            self.begin_transaction().await?;

            let value = match callback(self).await {
                Ok(value) => value,
                Err(err) => {
                    let concurrency = caused_by_concurrency_error(&err);
                    if concurrency && self.transactions > 1 {
                        self.transactions -= 1;
                        return Err(err);
                    }
                    self.rollback().await?;
                    if concurrency && current < attempts {
                        tracing::warn!(attempt = current, "quarry transaction deadlock, retrying");
                        current += 1;
                        continue;
                    }
                    return Err(err);
                }
            };

            match self.commit().await {
                Ok(()) => return Ok(value),
                Err(err) => {
                    self.transactions = self.transactions.saturating_sub(1);
                    if caused_by_concurrency_error(&err) && current < attempts {
                        current += 1;
                        continue;
                    }
                    if caused_by_lost_connection(&err) {
                        self.transactions = 0;
                    }
                    return Err(err);
                }
            }
        }
    }
}
