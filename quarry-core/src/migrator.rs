//! Ordered execution of schema migrations.
//!
//! Migrations run in name order. Each applied name is recorded in the
//! repository table together with the batch number of the run that applied
//! it, so a second run only executes what is new.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::connection::Connection;
use crate::error::{QuarryError, Result};
use crate::query::Constrainable;
use crate::value::{Expr, Record, Value};

/// Default name of the repository table.
pub const MIGRATIONS_TABLE: &str = "migrations";

#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique name; also the sort key.
    fn name(&self) -> &str;

    async fn up(&self, conn: &mut Connection) -> Result<()>;
}

/// A migration made of literal SQL statements separated by `;`.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    name: String,
    sql: String,
}

impl SqlMigration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }

    /// Reads a `.sql` file. When the file has a `-- up` marker only the text
    /// after it (and before any `-- down` marker) is used.
    pub fn from_file(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| QuarryError::Config(format!("bad migration file name {}", path.display())))?
            .to_owned();
        let content = fs::read_to_string(path).map_err(|err| {
            QuarryError::Config(format!("cannot read migration {}: {err}", path.display()))
        })?;
        Ok(Self::new(name, up_section(&content)))
    }

    /// Non-empty statements in file order.
    pub fn statements(&self) -> Vec<&str> {
        self.sql
            .split(';')
            .map(str::trim)
            .filter(|statement| !statement.is_empty())
            .collect()
    }
}

fn up_section(content: &str) -> &str {
    let start = content
        .find("-- up")
        .map(|idx| idx + "-- up".len())
        .unwrap_or(0);
    let rest = &content[start..];
    match rest.find("-- down") {
        Some(end) => &rest[..end],
        None => rest,
    }
}

#[async_trait]
impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn up(&self, conn: &mut Connection) -> Result<()> {
        for statement in self.statements() {
            conn.statement(statement, Vec::new()).await?;
        }
        Ok(())
    }
}

pub struct Migrator {
    migrations: Vec<Box<dyn Migration>>,
    table: String,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("table", &self.table)
            .field("migrations", &self.names())
            .finish()
    }
}

impl Migrator {
    pub fn new() -> Self {
        Self {
            migrations: Vec::new(),
            table: MIGRATIONS_TABLE.to_owned(),
        }
    }

    /// Every `.sql` file directly inside `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut migrator = Self::new();
        if !dir.exists() {
            return Ok(migrator);
        }
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| QuarryError::Config(err.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("sql") {
                migrator = migrator.add(SqlMigration::from_file(path)?);
            }
        }
        Ok(migrator)
    }

    pub fn add(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Box::new(migration));
        self
    }

    /// Records applied migrations in `table` instead of `migrations`.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Known migration names in run order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.migrations.iter().map(|m| m.name()).collect();
        names.sort_unstable();
        names
    }

    async fn ensure_repository(&self, conn: &mut Connection) -> Result<()> {
        if conn.schema().has_table(&self.table).await? {
            return Ok(());
        }
        conn.schema()
            .create(&self.table, |table| {
                table.increments("id");
                table.string("migration", 255);
                table.integer("batch");
            })
            .await
    }

    /// Names already applied, oldest batch first.
    pub async fn ran(&self, conn: &mut Connection) -> Result<Vec<String>> {
        self.ensure_repository(conn).await?;
        let names = conn
            .table(&self.table)
            .order_by("batch")
            .order_by("migration")
            .pluck(conn, "migration")
            .await?;
        Ok(names.into_iter().map(|name| name.to_string()).collect())
    }

    /// Names not applied yet, in run order.
    pub async fn pending(&self, conn: &mut Connection) -> Result<Vec<String>> {
        let ran: HashSet<String> = self.ran(conn).await?.into_iter().collect();
        Ok(self
            .names()
            .into_iter()
            .filter(|name| !ran.contains(*name))
            .map(str::to_owned)
            .collect())
    }

    /// Applies every pending migration under one new batch number and
    /// returns the applied names.
    #[tracing::instrument(skip_all, fields(table = %self.table))]
    pub async fn run(&self, conn: &mut Connection) -> Result<Vec<String>> {
        let pending = self.pending(conn).await?;
        if pending.is_empty() {
            tracing::info!("nothing to migrate");
            return Ok(pending);
        }
        let batch = conn
            .table(&self.table)
            .max(conn, "batch")
            .await?
            .as_i64()
            .unwrap_or(0)
            + 1;

        let mut ordered: Vec<&dyn Migration> = self.migrations.iter().map(|m| m.as_ref()).collect();
        ordered.sort_by(|a, b| a.name().cmp(b.name()));
        // MySQL commits implicitly around DDL
        let transactional = conn.driver_name() != "mysql";

        for migration in ordered.into_iter().filter(|m| pending.iter().any(|p| p == m.name())) {
            tracing::info!(migration = %migration.name(), batch, "migrating");
            if transactional {
                conn.begin_transaction().await?;
            }
            let applied = self.apply(conn, migration, batch).await;
            match applied {
                Ok(()) if transactional => conn.commit().await?,
                Ok(()) => {}
                Err(err) => {
                    if transactional {
                        conn.rollback().await?;
                    }
                    tracing::info!(migration = %migration.name(), error = %err, "migration failed");
                    return Err(err);
                }
            }
        }
        Ok(pending)
    }

    async fn apply(&self, conn: &mut Connection, migration: &dyn Migration, batch: i64) -> Result<()> {
        migration.up(conn).await?;
        let mut record = Record::new();
        record.insert(
            "migration".to_owned(),
            Expr::from(Value::from(migration.name())),
        );
        record.insert("batch".to_owned(), Expr::from(Value::Int(batch)));
        conn.table(&self.table).insert(conn, vec![record]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockDriver;

    #[test]
    fn statements_split_on_semicolons() {
        let migration = SqlMigration::new(
            "0001_init",
            "create table a (id integer);\n\ncreate table b (id integer);\n",
        );
        assert_eq!(
            migration.statements(),
            vec!["create table a (id integer)", "create table b (id integer)"]
        );
    }

    #[test]
    fn up_section_ignores_down() {
        let content = "-- Migration: users\n-- up\ncreate table users (id integer);\n-- down\ndrop table users;\n";
        assert_eq!(up_section(content).trim(), "create table users (id integer);");
        assert_eq!(up_section("select 1").trim(), "select 1");
    }

    #[test]
    fn names_sort_lexically() {
        let migrator = Migrator::new()
            .add(SqlMigration::new("0002_b", ""))
            .add(SqlMigration::new("0001_a", ""));
        assert_eq!(migrator.names(), vec!["0001_a", "0002_b"]);
    }

    #[tokio::test]
    async fn failed_migration_rolls_back() {
        let driver = MockDriver::new();
        let mut conn = Connection::from_driver(driver.clone(), "");
        // repository exists, nothing ran, max batch is null
        driver
            .push_rows(vec![[("exists".to_owned(), Value::Int(1))].into_iter().collect()])
            .push_rows(Vec::new())
            .push_rows(Vec::new())
            .push_error(crate::error::DriverError::new("syntax error"));

        let migrator = Migrator::new().add(SqlMigration::new("0001_bad", "create tabel x"));
        assert!(migrator.run(&mut conn).await.is_err());

        let statements = driver.statements();
        assert!(statements.contains(&"BEGIN".to_owned()));
        assert_eq!(statements.last().map(String::as_str), Some("ROLLBACK"));
        assert_eq!(conn.transaction_level(), 0);
    }
}
