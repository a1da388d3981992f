use super::blueprint::{Blueprint, Command, IndexCommand};
use super::column::{ColumnDefinition, ForeignKeyDefinition};
use crate::error::{QuarryError, Result};
use crate::grammar::Grammar;
use crate::value::{Expr, Value};

mod mysql;
mod sqlite;

pub use mysql::MySqlSchemaGrammar;
pub use sqlite::SqliteSchemaGrammar;

/// Compiles blueprint commands into DDL.
///
/// Each command has its own `compile_*` method. A dialect suppresses a
/// command by returning no statements, for example when the concern was
/// already folded into `create table`.
pub trait SchemaGrammar: Grammar {
    fn compile(&self, blueprint: &Blueprint, command: &Command) -> Result<Vec<String>> {
        match command {
            Command::Create => self.compile_create(blueprint),
            Command::Add => self.compile_add(blueprint),
            Command::Change => self.compile_change(blueprint),
            Command::Drop => Ok(vec![format!(
                "drop table {}",
                self.wrap_table(blueprint.table())
            )]),
            Command::DropIfExists => Ok(vec![format!(
                "drop table if exists {}",
                self.wrap_table(blueprint.table())
            )]),
            Command::Rename { to } => self.compile_rename(blueprint, to),
            Command::DropColumn { columns } => self.compile_drop_column(blueprint, columns),
            Command::RenameColumn { from, to } => Ok(vec![format!(
                "alter table {} rename column {} to {}",
                self.wrap_table(blueprint.table()),
                self.wrap(from),
                self.wrap(to)
            )]),
            Command::Primary(index) => self.compile_primary(blueprint, index),
            Command::Unique(index) => self.compile_unique(blueprint, index),
            Command::Index(index) => self.compile_index(blueprint, index),
            Command::Foreign(foreign) => self.compile_foreign(blueprint, foreign),
            Command::DropPrimary { name } => self.compile_drop_primary(blueprint, name),
            Command::DropUnique { name } | Command::DropIndex { name } => {
                self.compile_drop_index(blueprint, name)
            }
            Command::DropForeign { name } => self.compile_drop_foreign(blueprint, name),
            Command::RenameIndex { from, to } => self.compile_rename_index(blueprint, from, to),
        }
    }

    fn compile_create(&self, blueprint: &Blueprint) -> Result<Vec<String>>;

    fn compile_add(&self, blueprint: &Blueprint) -> Result<Vec<String>>;

    fn compile_change(&self, _blueprint: &Blueprint) -> Result<Vec<String>> {
        Err(QuarryError::Unsupported("changing columns".to_owned()))
    }

    fn compile_rename(&self, blueprint: &Blueprint, to: &str) -> Result<Vec<String>>;

    fn compile_drop_column(&self, blueprint: &Blueprint, columns: &[String])
    -> Result<Vec<String>>;

    fn compile_primary(&self, blueprint: &Blueprint, index: &IndexCommand) -> Result<Vec<String>>;

    fn compile_unique(&self, blueprint: &Blueprint, index: &IndexCommand) -> Result<Vec<String>>;

    fn compile_index(&self, blueprint: &Blueprint, index: &IndexCommand) -> Result<Vec<String>>;

    fn compile_foreign(
        &self,
        blueprint: &Blueprint,
        foreign: &ForeignKeyDefinition,
    ) -> Result<Vec<String>>;

    fn compile_drop_primary(&self, _blueprint: &Blueprint, _name: &str) -> Result<Vec<String>> {
        Err(QuarryError::Unsupported("dropping primary keys".to_owned()))
    }

    fn compile_drop_index(&self, blueprint: &Blueprint, name: &str) -> Result<Vec<String>>;

    fn compile_drop_foreign(&self, _blueprint: &Blueprint, _name: &str) -> Result<Vec<String>> {
        Err(QuarryError::Unsupported("dropping foreign keys".to_owned()))
    }

    fn compile_rename_index(
        &self,
        _blueprint: &Blueprint,
        _from: &str,
        _to: &str,
    ) -> Result<Vec<String>> {
        Err(QuarryError::Unsupported("renaming indexes".to_owned()))
    }

    /// The SQL type of a column.
    fn type_sql(&self, column: &ColumnDefinition) -> String;

    /// A column definition: wrapped name, type, then dialect modifiers.
    fn compile_column(&self, column: &ColumnDefinition) -> String;

    /// Foreign key body shared by inline and `alter table` forms.
    fn compile_foreign_body(&self, foreign: &ForeignKeyDefinition) -> String {
        let mut sql = format!(
            "foreign key ({}) references {} ({})",
            self.columnize(&foreign.columns),
            self.wrap_table(&foreign.on),
            self.columnize(&foreign.references)
        );
        if let Some(action) = foreign.on_delete {
            sql.push_str(" on delete ");
            sql.push_str(action.as_str());
        }
        if let Some(action) = foreign.on_update {
            sql.push_str(" on update ");
            sql.push_str(action.as_str());
        }
        sql
    }

    /// ` default ...` for the column, if it has one.
    fn compile_default(&self, column: &ColumnDefinition) -> Option<String> {
        if column.use_current {
            return Some(" default CURRENT_TIMESTAMP".to_owned());
        }
        let default = column.default.as_ref()?;
        Some(format!(" default {}", self.default_literal(default)))
    }

    fn default_literal(&self, default: &Expr) -> String {
        match default {
            Expr::Raw(sql) => sql.clone(),
            Expr::Value(Value::Null) => "null".to_owned(),
            Expr::Value(Value::Bool(flag)) => {
                self.quote_string(if *flag { "1" } else { "0" })
            }
            Expr::Value(value) => self.quote_string(&value.to_string()),
        }
    }

    /// Statement checking whether a table exists; binds the prefixed name.
    fn compile_table_exists(&self) -> String;

    /// Statement listing column names as `column_name`; binds the prefixed name.
    fn compile_column_listing(&self) -> String;

    fn compile_enable_foreign_key_constraints(&self) -> String;

    fn compile_disable_foreign_key_constraints(&self) -> String;
}

/// `enum` values rendered as a quoted list.
pub(crate) fn quoted_list<G: Grammar + ?Sized>(grammar: &G, values: &[String]) -> String {
    values
        .iter()
        .map(|value| grammar.quote_string(value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The first primary key command among the expanded commands.
pub(crate) fn primary_command(blueprint: &Blueprint) -> Option<IndexCommand> {
    blueprint.expanded_commands().into_iter().find_map(|command| match command {
        Command::Primary(index) => Some(index),
        _ => None,
    })
}

pub(crate) fn has_auto_increment(blueprint: &Blueprint) -> bool {
    blueprint
        .added_columns()
        .iter()
        .any(|column| column.auto_increment && column.kind.is_integer())
}

#[cfg(test)]
mod tests;
