use super::query::insert_rows;
use super::{Grammar, QueryGrammar};
use crate::error::Result;
use crate::query::Builder;
use crate::query::clause::Lock;
use crate::value::{Record, Value};

/// MySQL / MariaDB dialect: backtick quoting, `json_unquote` selectors,
/// native `update ... limit` and row locks.
#[derive(Debug, Clone, Default)]
pub struct MySqlQueryGrammar {
    prefix: String,
}

impl MySqlQueryGrammar {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Grammar for MySqlQueryGrammar {
    fn table_prefix(&self) -> &str {
        &self.prefix
    }

    fn wrap_value(&self, value: &str) -> String {
        if value == "*" {
            return value.to_owned();
        }
        format!("`{}`", value.replace('`', "``"))
    }

    fn wrap_json_selector(&self, value: &str) -> String {
        let (field, path) = self.wrap_json_field_and_path(value);
        format!("json_unquote(json_extract({field}{path}))")
    }
}

impl QueryGrammar for MySqlQueryGrammar {
    fn compile_random(&self) -> &'static str {
        "RAND()"
    }

    fn compile_offset_without_limit(&self) -> Option<&'static str> {
        Some("limit 18446744073709551615")
    }

    fn compile_lock(&self, lock: &Lock) -> String {
        match lock {
            Lock::Update => "for update".to_owned(),
            Lock::Shared => "lock in share mode".to_owned(),
            Lock::Raw(sql) => sql.clone(),
        }
    }

    fn compile_insert(&self, query: &Builder, rows: &[Record], bindings: &mut Vec<Value>) -> String {
        if rows.is_empty() {
            return format!("insert into {} () values ()", self.wrap_table(query.table_name()));
        }
        insert_rows(self, query, rows, bindings)
    }

    fn compile_insert_or_ignore(
        &self,
        query: &Builder,
        rows: &[Record],
        bindings: &mut Vec<Value>,
    ) -> Result<String> {
        let sql = self.compile_insert(query, rows, bindings);
        Ok(sql.replacen("insert", "insert ignore", 1))
    }

    fn compile_update(&self, query: &Builder, values: &Record, bindings: &mut Vec<Value>) -> String {
        let table = self.wrap_table(query.table_name());
        let mut parts = vec![format!("update {table}")];
        if !query.joins.is_empty() {
            parts.push(self.compile_joins(&query.joins, bindings));
        }
        parts.push(format!(
            "set {}",
            self.compile_update_columns(query, values, bindings)
        ));
        if let Some(wheres) = self.compile_wheres(&query.wheres, bindings) {
            parts.push(wheres);
        }
        if query.joins.is_empty() {
            if !query.orders.is_empty() {
                parts.push(self.compile_orders(&query.orders, bindings));
            }
            if let Some(limit) = query.limit {
                parts.push(self.compile_limit(limit));
            }
        }
        parts.join(" ")
    }

    fn compile_delete(&self, query: &Builder, bindings: &mut Vec<Value>) -> String {
        if !query.joins.is_empty() {
            let table = self.wrap_table(query.table_name());
            let alias = query
                .table_name()
                .rsplit_once(" as ")
                .map(|(_, alias)| self.wrap_table(alias))
                .unwrap_or_else(|| table.clone());
            let mut parts = vec![format!(
                "delete {} from {} {}",
                alias,
                table,
                self.compile_joins(&query.joins, bindings)
            )];
            if let Some(wheres) = self.compile_wheres(&query.wheres, bindings) {
                parts.push(wheres);
            }
            return parts.join(" ");
        }
        let mut parts = vec![format!("delete from {}", self.wrap_table(query.table_name()))];
        if let Some(wheres) = self.compile_wheres(&query.wheres, bindings) {
            parts.push(wheres);
        }
        if !query.orders.is_empty() {
            parts.push(self.compile_orders(&query.orders, bindings));
        }
        if let Some(limit) = query.limit {
            parts.push(self.compile_limit(limit));
        }
        parts.join(" ")
    }
}
