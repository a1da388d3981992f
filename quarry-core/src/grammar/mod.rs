//! Dialect compilers shared by the query and schema families.
//!
//! [`Grammar`] holds identifier quoting and parameter helpers common to both
//! families. [`QueryGrammar`] turns a [`Builder`](crate::query::Builder) into
//! DML; the schema family lives in [`crate::schema`].

use std::fmt;

use crate::value::{DATE_FORMAT, Expr, Value};

mod mysql;
mod query;
mod sqlite;

pub use mysql::MySqlQueryGrammar;
pub use query::QueryGrammar;
pub use sqlite::SqliteQueryGrammar;

/// Identifier quoting and parameter helpers shared by every grammar.
pub trait Grammar: Send + Sync + fmt::Debug {
    /// Prefix applied to every table name this grammar wraps.
    fn table_prefix(&self) -> &str;

    /// Quotes one identifier segment. `*` passes through.
    fn wrap_value(&self, value: &str) -> String {
        if value == "*" {
            return value.to_owned();
        }
        format!("\"{}\"", value.replace('"', "\"\""))
    }

    /// Wraps a column reference such as `users.id`, `name as n` or `options->lang`.
    fn wrap(&self, value: &str) -> String {
        if let Some((expr, alias)) = split_alias(value) {
            return format!("{} as {}", self.wrap(expr), self.wrap_value(alias));
        }
        if value.contains("->") {
            return self.wrap_json_selector(value);
        }
        match value.rsplit_once('.') {
            Some((table, column)) => {
                format!("{}.{}", self.wrap_table(table), self.wrap_value(column))
            }
            None => self.wrap_value(value),
        }
    }

    /// Wraps a table name, applying the prefix to the table and to its alias.
    fn wrap_table(&self, table: &str) -> String {
        let prefix = self.table_prefix();
        if let Some((name, alias)) = split_alias(table) {
            return format!(
                "{} as {}",
                self.wrap_segments(&format!("{prefix}{name}")),
                self.wrap_value(&format!("{prefix}{alias}"))
            );
        }
        self.wrap_segments(&format!("{prefix}{table}"))
    }

    /// Quotes every dot separated segment.
    fn wrap_segments(&self, value: &str) -> String {
        value
            .split('.')
            .map(|segment| self.wrap_value(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn wrap_json_selector(&self, value: &str) -> String {
        let (field, path) = self.wrap_json_field_and_path(value);
        format!("json_extract({field}{path})")
    }

    /// Splits `column->a->b` into the wrapped column and `, '$."a"."b"'`.
    fn wrap_json_field_and_path(&self, value: &str) -> (String, String) {
        let mut parts = value.splitn(2, "->");
        let field = self.wrap(parts.next().unwrap_or_default());
        let path = parts
            .next()
            .map(|path| format!(", {}", self.wrap_json_path(path)))
            .unwrap_or_default();
        (field, path)
    }

    fn wrap_json_path(&self, path: &str) -> String {
        let segments = path
            .split("->")
            .map(|segment| {
                let segment = segment.trim_matches(|c| c == '"' || c == '\'');
                format!("\"{}\"", segment.replace('\'', "''"))
            })
            .collect::<Vec<_>>()
            .join(".");
        format!("'$.{segments}'")
    }

    fn columnize(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|column| self.wrap(column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Emits `?` and records the binding, or embeds a raw expression.
    fn parameter(&self, value: &Expr, bindings: &mut Vec<Value>) -> String {
        match value {
            Expr::Raw(sql) => sql.clone(),
            Expr::Value(value) => {
                bindings.push(value.clone());
                "?".to_owned()
            }
        }
    }

    fn parameterize(&self, values: &[Value], bindings: &mut Vec<Value>) -> String {
        bindings.extend(values.iter().cloned());
        vec!["?"; values.len()].join(", ")
    }

    /// Quotes a string literal for DDL where bindings are not allowed.
    fn quote_string(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    fn date_format(&self) -> &'static str {
        DATE_FORMAT
    }
}

/// Splits `expr as alias` (case-insensitive) into its two halves.
pub(crate) fn split_alias(value: &str) -> Option<(&str, &str)> {
    let lower = value.to_ascii_lowercase();
    let idx = lower.find(" as ")?;
    Some((value[..idx].trim(), value[idx + 4..].trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Plain(&'static str);

    impl Grammar for Plain {
        fn table_prefix(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn wraps_qualified_and_aliased_columns() {
        let g = Plain("");
        assert_eq!(g.wrap("users.id"), "\"users\".\"id\"");
        assert_eq!(g.wrap("name as n"), "\"name\" as \"n\"");
        assert_eq!(g.wrap("users.*"), "\"users\".*");
        assert_eq!(g.wrap("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn prefixes_tables_and_aliases_once() {
        let g = Plain("app_");
        assert_eq!(g.wrap_table("users"), "\"app_users\"");
        assert_eq!(g.wrap_table("users as u"), "\"app_users\" as \"app_u\"");
        assert_eq!(g.wrap("users.id"), "\"app_users\".\"id\"");
    }

    #[test]
    fn json_selectors_compile_to_paths() {
        let g = Plain("");
        assert_eq!(
            g.wrap("options->lang->code"),
            "json_extract(\"options\", '$.\"lang\".\"code\"')"
        );
    }
}
