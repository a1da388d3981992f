//! Schema blueprints and the builder that runs them.
//!
//! ```ignore
//! conn.schema()
//!     .create("users", |table| {
//!         table.id();
//!         table.string("email", 255).unique();
//!         table.timestamps();
//!     })
//!     .await?;
//! ```

mod blueprint;
mod column;
mod grammar;

pub use blueprint::{Blueprint, Command, IndexCommand};
pub use column::{ColumnDefinition, ColumnType, ForeignAction, ForeignKeyDefinition};
pub use grammar::{MySqlSchemaGrammar, SchemaGrammar, SqliteSchemaGrammar};

use crate::connection::Connection;
use crate::error::Result;
use crate::value::Value;

/// Runs blueprints against a connection.
pub struct SchemaBuilder<'a> {
    conn: &'a mut Connection,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    fn blueprint(&self, table: &str) -> Blueprint {
        Blueprint::new(table, self.conn.table_prefix())
    }

    /// Compiles and executes every statement of `blueprint` in order.
    pub async fn build(&mut self, blueprint: Blueprint) -> Result<()> {
        let grammar = self.conn.schema_grammar().clone();
        for sql in blueprint.to_sql(grammar.as_ref())? {
            self.conn.statement(&sql, Vec::new()).await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, callback))]
    pub async fn create(&mut self, table: &str, callback: impl FnOnce(&mut Blueprint)) -> Result<()> {
        let mut blueprint = self.blueprint(table);
        blueprint.create();
        callback(&mut blueprint);
        self.build(blueprint).await
    }

    /// Modifies an existing table.
    #[tracing::instrument(skip(self, callback))]
    pub async fn table(&mut self, table: &str, callback: impl FnOnce(&mut Blueprint)) -> Result<()> {
        let mut blueprint = self.blueprint(table);
        callback(&mut blueprint);
        self.build(blueprint).await
    }

    pub async fn drop(&mut self, table: &str) -> Result<()> {
        let mut blueprint = self.blueprint(table);
        blueprint.drop();
        self.build(blueprint).await
    }

    pub async fn drop_if_exists(&mut self, table: &str) -> Result<()> {
        let mut blueprint = self.blueprint(table);
        blueprint.drop_if_exists();
        self.build(blueprint).await
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let mut blueprint = self.blueprint(from);
        blueprint.rename(to);
        self.build(blueprint).await
    }

    pub async fn has_table(&mut self, table: &str) -> Result<bool> {
        let sql = self.conn.schema_grammar().compile_table_exists();
        let name = format!("{}{table}", self.conn.table_prefix());
        let rows = self.conn.select(&sql, vec![Value::Text(name)]).await?;
        Ok(!rows.is_empty())
    }

    pub async fn has_column(&mut self, table: &str, column: &str) -> Result<bool> {
        let columns = self.column_listing(table).await?;
        Ok(columns
            .iter()
            .any(|name| name.eq_ignore_ascii_case(column)))
    }

    /// Column names of `table` in declaration order.
    pub async fn column_listing(&mut self, table: &str) -> Result<Vec<String>> {
        let sql = self.conn.schema_grammar().compile_column_listing();
        let name = format!("{}{table}", self.conn.table_prefix());
        let rows = self.conn.select(&sql, vec![Value::Text(name)]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.shift_remove("column_name"))
            .map(|value| value.to_string())
            .collect())
    }

    pub async fn enable_foreign_key_constraints(&mut self) -> Result<bool> {
        let sql = self.conn.schema_grammar().compile_enable_foreign_key_constraints();
        self.conn.statement(&sql, Vec::new()).await
    }

    pub async fn disable_foreign_key_constraints(&mut self) -> Result<bool> {
        let sql = self.conn.schema_grammar().compile_disable_foreign_key_constraints();
        self.conn.statement(&sql, Vec::new()).await
    }
}
