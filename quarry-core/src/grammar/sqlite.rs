use super::{Grammar, QueryGrammar};
use crate::error::Result;
use crate::query::Builder;
use crate::query::clause::{Column, DatePart};
use crate::value::{Record, Value};

/// SQLite dialect: `strftime` date filters, `limit -1` offsets and `rowid`
/// sub-selects for updates and deletes that carry joins or limits.
#[derive(Debug, Clone, Default)]
pub struct SqliteQueryGrammar {
    prefix: String,
}

impl SqliteQueryGrammar {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// `"table"."rowid" in (select ...)` for statements SQLite cannot join or limit.
    fn rowid_subselect(&self, query: &Builder, bindings: &mut Vec<Value>) -> String {
        let table = query.table_name();
        let alias = table
            .rsplit_once(" as ")
            .map(|(_, alias)| alias.trim())
            .unwrap_or(table);
        let mut select = query.clone();
        select.columns = vec![Column::Plain(format!("{alias}.rowid"))];
        format!(
            "{} in ({})",
            self.wrap("rowid"),
            self.compile_select(&select, bindings)
        )
    }

    fn base_table(&self, query: &Builder) -> String {
        let table = query.table_name();
        let name = table
            .rsplit_once(" as ")
            .map(|(name, _)| name.trim())
            .unwrap_or(table);
        self.wrap_table(name)
    }
}

impl Grammar for SqliteQueryGrammar {
    fn table_prefix(&self) -> &str {
        &self.prefix
    }
}

impl QueryGrammar for SqliteQueryGrammar {
    fn compile_date_based_where(
        &self,
        part: DatePart,
        column: &str,
        operator: &str,
        value: &Value,
        bindings: &mut Vec<Value>,
    ) -> String {
        bindings.push(value.clone());
        format!(
            "strftime('{}', {}) {} cast(? as text)",
            part.strftime(),
            self.wrap(column),
            operator
        )
    }

    fn compile_offset_without_limit(&self) -> Option<&'static str> {
        Some("limit -1")
    }

    fn wrap_union(&self, sql: &str) -> String {
        format!("select * from ({sql})")
    }

    fn compile_insert_or_ignore(
        &self,
        query: &Builder,
        rows: &[Record],
        bindings: &mut Vec<Value>,
    ) -> Result<String> {
        let sql = self.compile_insert(query, rows, bindings);
        Ok(sql.replacen("insert", "insert or ignore", 1))
    }

    /// Column keys lose any `table.` qualifier; SQLite rejects them in `set`.
    fn compile_update_columns(
        &self,
        query: &Builder,
        values: &Record,
        bindings: &mut Vec<Value>,
    ) -> String {
        let qualifier = format!("{}.", query.table_name());
        values
            .iter()
            .map(|(column, value)| {
                let column = column.strip_prefix(&qualifier).unwrap_or(column);
                format!("{} = {}", self.wrap(column), self.parameter(value, bindings))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn compile_update(&self, query: &Builder, values: &Record, bindings: &mut Vec<Value>) -> String {
        let columns = self.compile_update_columns(query, values, bindings);
        if query.joins.is_empty() && query.limit.is_none() {
            let mut sql = format!("update {} set {}", self.base_table(query), columns);
            if let Some(wheres) = self.compile_wheres(&query.wheres, bindings) {
                sql.push(' ');
                sql.push_str(&wheres);
            }
            return sql;
        }
        format!(
            "update {} set {} where {}",
            self.base_table(query),
            columns,
            self.rowid_subselect(query, bindings)
        )
    }

    fn compile_delete(&self, query: &Builder, bindings: &mut Vec<Value>) -> String {
        if query.joins.is_empty() && query.limit.is_none() {
            let mut sql = format!("delete from {}", self.base_table(query));
            if let Some(wheres) = self.compile_wheres(&query.wheres, bindings) {
                sql.push(' ');
                sql.push_str(&wheres);
            }
            return sql;
        }
        format!(
            "delete from {} where {}",
            self.base_table(query),
            self.rowid_subselect(query, bindings)
        )
    }

    fn compile_sequence_check(&self) -> Option<String> {
        Some(
            "select exists (select 1 from sqlite_master where name = 'sqlite_sequence') as \"exists\""
                .to_owned(),
        )
    }

    fn compile_truncate(&self, query: &Builder, reset_sequence: bool) -> Vec<(String, Vec<Value>)> {
        let table = query.table_name();
        let mut statements = Vec::with_capacity(2);
        if reset_sequence {
            statements.push((
                "delete from sqlite_sequence where name = ?".to_owned(),
                vec![Value::Text(format!("{}{}", self.table_prefix(), table))],
            ));
        }
        statements.push((format!("delete from {}", self.wrap_table(table)), Vec::new()));
        statements
    }
}
