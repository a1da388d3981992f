use super::{SchemaGrammar, has_auto_increment, quoted_list};
use crate::error::Result;
use crate::grammar::Grammar;
use crate::schema::blueprint::{Blueprint, IndexCommand};
use crate::schema::column::{ColumnDefinition, ColumnType, ForeignKeyDefinition};

/// MySQL / MariaDB DDL: `create table` followed by separate `alter table`
/// statements for indexes and foreign keys.
#[derive(Debug, Clone, Default)]
pub struct MySqlSchemaGrammar {
    prefix: String,
}

impl MySqlSchemaGrammar {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn alter(&self, blueprint: &Blueprint, body: String) -> String {
        format!("alter table {} {body}", self.wrap_table(blueprint.table()))
    }

    fn add_index(&self, kind: &str, blueprint: &Blueprint, index: &IndexCommand) -> Vec<String> {
        vec![self.alter(
            blueprint,
            format!(
                "add {kind} {}({})",
                self.wrap_value(&index.name),
                self.columnize(&index.columns)
            ),
        )]
    }

    fn compile_columns(&self, columns: Vec<&ColumnDefinition>, verb: &str) -> String {
        columns
            .into_iter()
            .map(|column| format!("{verb} {}", self.compile_column(column)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Grammar for MySqlSchemaGrammar {
    fn table_prefix(&self) -> &str {
        &self.prefix
    }

    fn wrap_value(&self, value: &str) -> String {
        if value == "*" {
            return value.to_owned();
        }
        format!("`{}`", value.replace('`', "``"))
    }
}

impl SchemaGrammar for MySqlSchemaGrammar {
    fn compile_create(&self, blueprint: &Blueprint) -> Result<Vec<String>> {
        let columns: Vec<String> = blueprint
            .added_columns()
            .into_iter()
            .map(|column| self.compile_column(column))
            .collect();
        let temporary = if blueprint.temporary { "temporary " } else { "" };
        let mut sql = format!(
            "create {temporary}table {} ({})",
            self.wrap_table(blueprint.table()),
            columns.join(", ")
        );
        if let Some(charset) = &blueprint.charset {
            sql.push_str(&format!(" default character set {charset}"));
        }
        if let Some(collation) = &blueprint.collation {
            sql.push_str(&format!(" collate '{collation}'"));
        }
        if let Some(engine) = &blueprint.engine {
            sql.push_str(&format!(" engine = {engine}"));
        }
        Ok(vec![sql])
    }

    fn compile_add(&self, blueprint: &Blueprint) -> Result<Vec<String>> {
        let columns = blueprint.added_columns();
        Ok(vec![self.alter(blueprint, self.compile_columns(columns, "add"))])
    }

    fn compile_change(&self, blueprint: &Blueprint) -> Result<Vec<String>> {
        let columns = blueprint.changed_columns();
        Ok(vec![self.alter(blueprint, self.compile_columns(columns, "modify"))])
    }

    fn compile_rename(&self, blueprint: &Blueprint, to: &str) -> Result<Vec<String>> {
        Ok(vec![format!(
            "rename table {} to {}",
            self.wrap_table(blueprint.table()),
            self.wrap_table(to)
        )])
    }

    fn compile_drop_column(
        &self,
        blueprint: &Blueprint,
        columns: &[String],
    ) -> Result<Vec<String>> {
        let drops = columns
            .iter()
            .map(|column| format!("drop {}", self.wrap(column)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(vec![self.alter(blueprint, drops)])
    }

    fn compile_primary(&self, blueprint: &Blueprint, index: &IndexCommand) -> Result<Vec<String>> {
        if blueprint.creating() && has_auto_increment(blueprint) {
            return Ok(Vec::new());
        }
        Ok(vec![self.alter(
            blueprint,
            format!("add primary key ({})", self.columnize(&index.columns)),
        )])
    }

    fn compile_unique(&self, blueprint: &Blueprint, index: &IndexCommand) -> Result<Vec<String>> {
        Ok(self.add_index("unique", blueprint, index))
    }

    fn compile_index(&self, blueprint: &Blueprint, index: &IndexCommand) -> Result<Vec<String>> {
        Ok(self.add_index("index", blueprint, index))
    }

    fn compile_foreign(
        &self,
        blueprint: &Blueprint,
        foreign: &ForeignKeyDefinition,
    ) -> Result<Vec<String>> {
        let name = foreign.name.clone().unwrap_or_default();
        Ok(vec![self.alter(
            blueprint,
            format!(
                "add constraint {} {}",
                self.wrap_value(&name),
                self.compile_foreign_body(foreign)
            ),
        )])
    }

    fn compile_drop_primary(&self, blueprint: &Blueprint, _name: &str) -> Result<Vec<String>> {
        Ok(vec![self.alter(blueprint, "drop primary key".to_owned())])
    }

    fn compile_drop_index(&self, blueprint: &Blueprint, name: &str) -> Result<Vec<String>> {
        Ok(vec![self.alter(blueprint, format!("drop index {}", self.wrap_value(name)))])
    }

    fn compile_drop_foreign(&self, blueprint: &Blueprint, name: &str) -> Result<Vec<String>> {
        Ok(vec![self.alter(
            blueprint,
            format!("drop foreign key {}", self.wrap_value(name)),
        )])
    }

    fn compile_rename_index(
        &self,
        blueprint: &Blueprint,
        from: &str,
        to: &str,
    ) -> Result<Vec<String>> {
        Ok(vec![self.alter(
            blueprint,
            format!(
                "rename index {} to {}",
                self.wrap_value(from),
                self.wrap_value(to)
            ),
        )])
    }

    fn type_sql(&self, column: &ColumnDefinition) -> String {
        match &column.kind {
            ColumnType::TinyInteger => "tinyint".to_owned(),
            ColumnType::SmallInteger => "smallint".to_owned(),
            ColumnType::Integer => "int".to_owned(),
            ColumnType::BigInteger => "bigint".to_owned(),
            ColumnType::String(length) => format!("varchar({length})"),
            ColumnType::Char(length) => format!("char({length})"),
            ColumnType::Text => "text".to_owned(),
            ColumnType::MediumText => "mediumtext".to_owned(),
            ColumnType::LongText => "longtext".to_owned(),
            ColumnType::Boolean => "tinyint(1)".to_owned(),
            ColumnType::Float => "float".to_owned(),
            ColumnType::Double => "double".to_owned(),
            ColumnType::Decimal { total, places } => format!("decimal({total}, {places})"),
            ColumnType::Date => "date".to_owned(),
            ColumnType::DateTime => "datetime".to_owned(),
            ColumnType::Timestamp => "timestamp".to_owned(),
            ColumnType::Time => "time".to_owned(),
            ColumnType::Json => "json".to_owned(),
            ColumnType::Binary => "blob".to_owned(),
            ColumnType::Uuid => "char(36)".to_owned(),
            ColumnType::Enum(values) => format!("enum({})", quoted_list(self, values)),
        }
    }

    fn compile_column(&self, column: &ColumnDefinition) -> String {
        let mut sql = format!("{} {}", self.wrap(&column.name), self.type_sql(column));
        if column.unsigned && column.kind.is_numeric() {
            sql.push_str(" unsigned");
        }
        sql.push_str(if column.nullable { " null" } else { " not null" });
        if let Some(default) = self.compile_default(column) {
            sql.push_str(&default);
        }
        if column.auto_increment && column.kind.is_integer() {
            sql.push_str(" auto_increment primary key");
        }
        if let Some(comment) = &column.comment {
            sql.push_str(&format!(" comment {}", self.quote_string(comment)));
        }
        if let Some(after) = &column.after {
            sql.push_str(&format!(" after {}", self.wrap(after)));
        }
        sql
    }

    fn compile_table_exists(&self) -> String {
        "select * from information_schema.tables where table_schema = database() \
         and table_name = ? and table_type = 'BASE TABLE'"
            .to_owned()
    }

    fn compile_column_listing(&self) -> String {
        "select column_name as `column_name` from information_schema.columns \
         where table_schema = database() and table_name = ? order by ordinal_position"
            .to_owned()
    }

    fn compile_enable_foreign_key_constraints(&self) -> String {
        "SET FOREIGN_KEY_CHECKS=1;".to_owned()
    }

    fn compile_disable_foreign_key_constraints(&self) -> String {
        "SET FOREIGN_KEY_CHECKS=0;".to_owned()
    }
}
