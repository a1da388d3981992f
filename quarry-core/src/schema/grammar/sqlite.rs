use super::{SchemaGrammar, has_auto_increment, primary_command, quoted_list};
use crate::error::{QuarryError, Result};
use crate::grammar::Grammar;
use crate::schema::blueprint::{Blueprint, IndexCommand};
use crate::schema::column::{ColumnDefinition, ColumnType, ForeignKeyDefinition};

/// SQLite DDL.
///
/// Foreign keys and composite primary keys can only be declared inside
/// `create table`, so they are inlined there and their standalone commands
/// compile to nothing. Unique and plain indexes become `create index`.
#[derive(Debug, Clone, Default)]
pub struct SqliteSchemaGrammar {
    prefix: String,
}

impl SqliteSchemaGrammar {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn create_index(&self, kind: &str, blueprint: &Blueprint, index: &IndexCommand) -> String {
        format!(
            "create {kind}index {} on {} ({})",
            self.wrap_value(&index.name),
            self.wrap_table(blueprint.table()),
            self.columnize(&index.columns)
        )
    }
}

impl Grammar for SqliteSchemaGrammar {
    fn table_prefix(&self) -> &str {
        &self.prefix
    }
}

impl SchemaGrammar for SqliteSchemaGrammar {
    fn compile_create(&self, blueprint: &Blueprint) -> Result<Vec<String>> {
        let mut parts: Vec<String> = blueprint
            .added_columns()
            .into_iter()
            .map(|column| self.compile_column(column))
            .collect();
        for foreign in blueprint.foreign_keys() {
            parts.push(self.compile_foreign_body(&foreign));
        }
        if !has_auto_increment(blueprint) {
            if let Some(primary) = primary_command(blueprint) {
                parts.push(format!("primary key ({})", self.columnize(&primary.columns)));
            }
        }
        let temporary = if blueprint.temporary { "temporary " } else { "" };
        Ok(vec![format!(
            "create {temporary}table {} ({})",
            self.wrap_table(blueprint.table()),
            parts.join(", ")
        )])
    }

    fn compile_add(&self, blueprint: &Blueprint) -> Result<Vec<String>> {
        let table = self.wrap_table(blueprint.table());
        Ok(blueprint
            .added_columns()
            .into_iter()
            .map(|column| format!("alter table {table} add column {}", self.compile_column(column)))
            .collect())
    }

    fn compile_rename(&self, blueprint: &Blueprint, to: &str) -> Result<Vec<String>> {
        Ok(vec![format!(
            "alter table {} rename to {}",
            self.wrap_table(blueprint.table()),
            self.wrap_table(to)
        )])
    }

    fn compile_drop_column(
        &self,
        blueprint: &Blueprint,
        columns: &[String],
    ) -> Result<Vec<String>> {
        let table = self.wrap_table(blueprint.table());
        Ok(columns
            .iter()
            .map(|column| format!("alter table {table} drop column {}", self.wrap(column)))
            .collect())
    }

    fn compile_primary(&self, _blueprint: &Blueprint, _index: &IndexCommand) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn compile_unique(&self, blueprint: &Blueprint, index: &IndexCommand) -> Result<Vec<String>> {
        Ok(vec![self.create_index("unique ", blueprint, index)])
    }

    fn compile_index(&self, blueprint: &Blueprint, index: &IndexCommand) -> Result<Vec<String>> {
        Ok(vec![self.create_index("", blueprint, index)])
    }

    fn compile_foreign(
        &self,
        _blueprint: &Blueprint,
        _foreign: &ForeignKeyDefinition,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn compile_drop_index(&self, _blueprint: &Blueprint, name: &str) -> Result<Vec<String>> {
        Ok(vec![format!("drop index {}", self.wrap_value(name))])
    }

    fn compile_drop_foreign(&self, _blueprint: &Blueprint, _name: &str) -> Result<Vec<String>> {
        Err(QuarryError::Unsupported(
            "dropping foreign keys on sqlite".to_owned(),
        ))
    }

    fn type_sql(&self, column: &ColumnDefinition) -> String {
        match &column.kind {
            ColumnType::TinyInteger
            | ColumnType::SmallInteger
            | ColumnType::Integer
            | ColumnType::BigInteger => "integer".to_owned(),
            ColumnType::String(_) | ColumnType::Char(_) | ColumnType::Uuid => "varchar".to_owned(),
            ColumnType::Text | ColumnType::MediumText | ColumnType::LongText | ColumnType::Json => {
                "text".to_owned()
            }
            ColumnType::Boolean => "tinyint(1)".to_owned(),
            ColumnType::Float | ColumnType::Double => "float".to_owned(),
            ColumnType::Decimal { .. } => "numeric".to_owned(),
            ColumnType::Date => "date".to_owned(),
            ColumnType::DateTime | ColumnType::Timestamp => "datetime".to_owned(),
            ColumnType::Time => "time".to_owned(),
            ColumnType::Binary => "blob".to_owned(),
            ColumnType::Enum(values) => format!(
                "varchar check ({} in ({}))",
                self.wrap(&column.name),
                quoted_list(self, values)
            ),
        }
    }

    fn compile_column(&self, column: &ColumnDefinition) -> String {
        let mut sql = format!("{} {}", self.wrap(&column.name), self.type_sql(column));
        if column.auto_increment && column.kind.is_integer() {
            sql.push_str(" primary key autoincrement");
        }
        sql.push_str(if column.nullable { " null" } else { " not null" });
        if let Some(default) = self.compile_default(column) {
            sql.push_str(&default);
        }
        sql
    }

    fn compile_table_exists(&self) -> String {
        "select * from sqlite_master where type = 'table' and name = ?".to_owned()
    }

    fn compile_column_listing(&self) -> String {
        "select name as column_name from pragma_table_info(?)".to_owned()
    }

    fn compile_enable_foreign_key_constraints(&self) -> String {
        "PRAGMA foreign_keys = ON".to_owned()
    }

    fn compile_disable_foreign_key_constraints(&self) -> String {
        "PRAGMA foreign_keys = OFF".to_owned()
    }
}
