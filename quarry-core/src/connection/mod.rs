//! A single database session plus everything needed to talk to it.
//!
//! [`Connection`] owns the [`Driver`], the query and schema grammars for its
//! dialect and the entity [`Registry`]. Every statement funnels through one
//! execution path that normalizes bindings, retries once after a lost
//! connection outside transactions, wraps driver failures with the SQL and
//! bindings, and reports the query to tracing, metrics, the optional query log
//! and any registered listeners.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;

use crate::config::DatabaseConfig;
use crate::detect;
use crate::driver::{Driver, Executed};
use crate::entity_query::EntityQuery;
use crate::error::{DriverError, QuarryError, QueryError, Result};
use crate::grammar::{MySqlQueryGrammar, QueryGrammar, SqliteQueryGrammar};
use crate::model::{Entity, EntityMeta};
use crate::query::Builder;
use crate::registry::Registry;
use crate::schema::{MySqlSchemaGrammar, SchemaBuilder, SchemaGrammar, SqliteSchemaGrammar};
use crate::value::{Row, Value};

mod transactions;

/// One executed statement as seen by the query log and listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub sql: String,
    pub bindings: Vec<Value>,
    /// Wall time in milliseconds; zero while pretending.
    pub time_ms: f64,
}

type QueryListener = Arc<dyn Fn(&QueryRecord) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Select,
    Execute,
    Unprepared,
}

impl StatementKind {
    fn as_str(self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Execute => "execute",
            StatementKind::Unprepared => "unprepared",
        }
    }
}

enum Outcome {
    Rows(Vec<Row>),
    Executed(Executed),
    Done(u64),
}

impl Outcome {
    fn pretend(kind: StatementKind) -> Self {
        match kind {
            StatementKind::Select => Outcome::Rows(Vec::new()),
            StatementKind::Execute => Outcome::Executed(Executed::default()),
            StatementKind::Unprepared => Outcome::Done(0),
        }
    }

    fn into_rows(self) -> Vec<Row> {
        match self {
            Outcome::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    fn into_executed(self) -> Executed {
        match self {
            Outcome::Executed(executed) => executed,
            Outcome::Done(affected) => Executed {
                rows_affected: affected,
                last_insert_id: None,
            },
            Outcome::Rows(_) => Executed::default(),
        }
    }
}

#[cfg(feature = "metrics")]
fn record_query_metrics(operation: &str, driver: &'static str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let labels = [
        ("operation", operation.to_owned()),
        ("driver", driver.to_owned()),
    ];
    metrics::histogram!("quarry.query.duration_ms", &labels).record(elapsed_ms);
    metrics::counter!("quarry.query.count", &labels).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_query_metrics(_operation: &str, _driver: &'static str, _elapsed: Duration) {}

/// A database session.
pub struct Connection {
    driver: Box<dyn Driver>,
    grammar: Arc<dyn QueryGrammar>,
    schema_grammar: Arc<dyn SchemaGrammar>,
    registry: Arc<Registry>,
    pub(crate) transactions: u32,
    logging: bool,
    query_log: Vec<QueryRecord>,
    pretending: bool,
    listeners: Vec<QueryListener>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("driver", &self.driver.name())
            .field("prefix", &self.grammar.table_prefix())
            .field("transactions", &self.transactions)
            .field("logging", &self.logging)
            .field("pretending", &self.pretending)
            .finish()
    }
}

impl Connection {
    /// Wraps a driver with explicit grammars.
    pub fn new(
        driver: Box<dyn Driver>,
        grammar: Arc<dyn QueryGrammar>,
        schema_grammar: Arc<dyn SchemaGrammar>,
    ) -> Self {
        Self {
            driver,
            grammar,
            schema_grammar,
            registry: Arc::new(Registry::default()),
            transactions: 0,
            logging: false,
            query_log: Vec::new(),
            pretending: false,
            listeners: Vec::new(),
        }
    }

    /// Wraps a driver, picking grammars from [`Driver::name`].
    pub fn from_driver(driver: impl Driver + 'static, prefix: &str) -> Self {
        let (grammar, schema_grammar): (Arc<dyn QueryGrammar>, Arc<dyn SchemaGrammar>) =
            match driver.name() {
                "mysql" => (
                    Arc::new(MySqlQueryGrammar::new(prefix)),
                    Arc::new(MySqlSchemaGrammar::new(prefix)),
                ),
                _ => (
                    Arc::new(SqliteQueryGrammar::new(prefix)),
                    Arc::new(SqliteSchemaGrammar::new(prefix)),
                ),
            };
        Self::new(Box::new(driver), grammar, schema_grammar)
    }

    /// Opens a connection described by `config`.
    #[tracing::instrument(skip_all, fields(driver = %config.driver))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut conn = match config.driver.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let driver =
                    crate::driver::SqliteDriver::connect_with(&config.url, config.foreign_keys)
                        .await?;
                Self::from_driver(driver, &config.prefix)
            }
            #[cfg(feature = "mysql")]
            "mysql" => {
                let driver = crate::driver::MySqlDriver::connect(&config.url).await?;
                Self::from_driver(driver, &config.prefix)
            }
            other => return Err(QuarryError::UnsupportedDriver(other.to_owned())),
        };
        conn.logging = config.log_queries;
        tracing::info!(driver = conn.driver.name(), "quarry connected");
        Ok(conn)
    }

    /// Shares an entity registry (scopes, morph map) with this connection.
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn grammar(&self) -> &Arc<dyn QueryGrammar> {
        &self.grammar
    }

    pub fn schema_grammar(&self) -> &Arc<dyn SchemaGrammar> {
        &self.schema_grammar
    }

    pub fn table_prefix(&self) -> &str {
        self.grammar.table_prefix()
    }

    /// A query builder over `table`.
    pub fn table(&self, table: &str) -> Builder {
        Builder::new(self.grammar.clone()).from(table)
    }

    /// A query builder with no table, for sub-selects and raw expressions.
    pub fn query_builder(&self) -> Builder {
        Builder::new(self.grammar.clone())
    }

    /// An entity query over `T`'s table with its global scopes.
    pub fn query<T: Entity>(&self) -> EntityQuery {
        EntityQuery::new(self.query_builder(), self.registry.meta_or_define::<T>(), self.registry.clone())
    }

    pub fn query_for(&self, meta: Arc<EntityMeta>) -> EntityQuery {
        EntityQuery::new(self.query_builder(), meta, self.registry.clone())
    }

    pub fn schema(&mut self) -> SchemaBuilder<'_> {
        SchemaBuilder::new(self)
    }

    // ----------------------------------------------------------------------
    // statements
    // ----------------------------------------------------------------------

    pub async fn select(&mut self, sql: &str, bindings: Vec<Value>) -> Result<Vec<Row>> {
        Ok(self.run(StatementKind::Select, sql, bindings).await?.into_rows())
    }

    pub async fn select_one(&mut self, sql: &str, bindings: Vec<Value>) -> Result<Option<Row>> {
        Ok(self.select(sql, bindings).await?.into_iter().next())
    }

    pub async fn insert(&mut self, sql: &str, bindings: Vec<Value>) -> Result<Executed> {
        Ok(self
            .run(StatementKind::Execute, sql, bindings)
            .await?
            .into_executed())
    }

    pub async fn update(&mut self, sql: &str, bindings: Vec<Value>) -> Result<u64> {
        self.affecting_statement(sql, bindings).await
    }

    pub async fn delete(&mut self, sql: &str, bindings: Vec<Value>) -> Result<u64> {
        self.affecting_statement(sql, bindings).await
    }

    /// Runs a statement and reports success.
    pub async fn statement(&mut self, sql: &str, bindings: Vec<Value>) -> Result<bool> {
        self.run(StatementKind::Execute, sql, bindings).await?;
        Ok(true)
    }

    /// Runs a statement and returns the affected row count.
    pub async fn affecting_statement(&mut self, sql: &str, bindings: Vec<Value>) -> Result<u64> {
        Ok(self
            .run(StatementKind::Execute, sql, bindings)
            .await?
            .into_executed()
            .rows_affected)
    }

    /// Runs SQL without preparing it or binding values.
    pub async fn unprepared(&mut self, sql: &str) -> Result<bool> {
        self.run(StatementKind::Unprepared, sql, Vec::new()).await?;
        Ok(true)
    }

    async fn run(&mut self, kind: StatementKind, sql: &str, bindings: Vec<Value>) -> Result<Outcome> {
        let date_format = self.grammar.date_format();
        let bindings: Vec<Value> = bindings
            .into_iter()
            .map(|value| value.normalize_binding(date_format))
            .collect();

        if self.pretending {
            self.log_query(kind, sql, bindings, Duration::ZERO);
            return Ok(Outcome::pretend(kind));
        }

        let start = Instant::now();
        let result = match self.run_on_driver(kind, sql, &bindings).await {
            Err(err) if self.transactions == 0 && detect::is_lost_connection(&err) => {
                tracing::warn!(error = %err, "quarry lost connection, retrying");
                self.driver.reconnect().await?;
                self.run_on_driver(kind, sql, &bindings).await
            }
            other => other,
        };

        match result {
            Ok(outcome) => {
                self.log_query(kind, sql, bindings, start.elapsed());
                Ok(outcome)
            }
            Err(source) => {
                tracing::debug!(sql = %sql, error = %source, "quarry query failed");
                Err(QueryError::new(sql, bindings, source).into())
            }
        }
    }

    async fn run_on_driver(
        &mut self,
        kind: StatementKind,
        sql: &str,
        bindings: &[Value],
    ) -> std::result::Result<Outcome, DriverError> {
        match kind {
            StatementKind::Select => self.driver.select(sql, bindings).await.map(Outcome::Rows),
            StatementKind::Execute => self
                .driver
                .execute(sql, bindings)
                .await
                .map(Outcome::Executed),
            StatementKind::Unprepared => self.driver.unprepared(sql).await.map(Outcome::Done),
        }
    }

    fn log_query(&mut self, kind: StatementKind, sql: &str, bindings: Vec<Value>, elapsed: Duration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        tracing::debug!(
            operation = kind.as_str(),
            sql = %sql,
            bindings = ?bindings,
            elapsed_ms,
            "quarry query"
        );
        record_query_metrics(kind.as_str(), self.driver.name(), elapsed);

        if !self.logging && self.listeners.is_empty() {
            return;
        }
        let record = QueryRecord {
            sql: sql.to_owned(),
            bindings,
            time_ms: elapsed_ms,
        };
        for listener in &self.listeners {
            listener(&record);
        }
        if self.logging {
            self.query_log.push(record);
        }
    }

    // ----------------------------------------------------------------------
    // query log
    // ----------------------------------------------------------------------

    pub fn enable_query_log(&mut self) {
        self.logging = true;
    }

    pub fn disable_query_log(&mut self) {
        self.logging = false;
    }

    pub fn logging(&self) -> bool {
        self.logging
    }

    pub fn query_log(&self) -> &[QueryRecord] {
        &self.query_log
    }

    pub fn flush_query_log(&mut self) {
        self.query_log.clear();
    }

    /// Calls `listener` after every executed statement.
    pub fn listen(&mut self, listener: impl Fn(&QueryRecord) + Send + Sync + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    pub fn pretending(&self) -> bool {
        self.pretending
    }

    /// Runs `callback` without touching the database and returns the
    /// statements it would have executed. Selects yield no rows.
    pub async fn pretend<F>(&mut self, callback: F) -> Result<Vec<QueryRecord>>
    where
        F: for<'c> FnOnce(&'c mut Connection) -> BoxFuture<'c, Result<()>>,
    {
        let saved_logging = self.logging;
        let saved_log = std::mem::take(&mut self.query_log);
        self.logging = true;
        self.pretending = true;

        let result = callback(self).await;

        self.pretending = false;
        self.logging = saved_logging;
        let pretended = std::mem::replace(&mut self.query_log, saved_log);
        result.map(|()| pretended)
    }

    /// Drops the session and opens a fresh one.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.driver.reconnect().await?;
        self.transactions = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
