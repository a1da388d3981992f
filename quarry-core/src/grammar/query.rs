use std::fmt::Write;

use super::Grammar;
use crate::error::{QuarryError, Result};
use crate::query::clause::{
    Aggregate, Column, DatePart, FromClause, Having, JoinClause, JoinKind, Lock, Order, Where,
};
use crate::query::Builder;
use crate::value::{Expr, Record, Value};

/// Compiles a [`Builder`] into DML for one dialect.
///
/// Every method has a portable default; dialects override only the
/// components whose syntax differs. Bindings are pushed in the order their
/// placeholders are emitted.
pub trait QueryGrammar: Grammar {
    fn compile_select(&self, query: &Builder, bindings: &mut Vec<Value>) -> String {
        if !query.unions.is_empty() && query.aggregate.is_some() {
            return self.compile_union_aggregate(query, bindings);
        }

        let mut parts: Vec<String> = Vec::with_capacity(8);
        match &query.aggregate {
            Some(aggregate) => parts.push(self.compile_aggregate(query, aggregate)),
            None => parts.push(self.compile_columns(query, bindings)),
        }
        if let Some(from) = &query.from {
            parts.push(self.compile_from(from, bindings));
        }
        if !query.joins.is_empty() {
            parts.push(self.compile_joins(&query.joins, bindings));
        }
        if let Some(wheres) = self.compile_wheres(&query.wheres, bindings) {
            parts.push(wheres);
        }
        if !query.groups.is_empty() {
            parts.push(format!("group by {}", self.columnize(&query.groups)));
        }
        if !query.havings.is_empty() {
            parts.push(self.compile_havings(&query.havings, bindings));
        }
        if !query.orders.is_empty() {
            parts.push(self.compile_orders(&query.orders, bindings));
        }
        match (query.limit, query.offset) {
            (Some(limit), _) => parts.push(self.compile_limit(limit)),
            (None, Some(_)) => {
                if let Some(limit) = self.compile_offset_without_limit() {
                    parts.push(limit.to_owned());
                }
            }
            (None, None) => {}
        }
        if let Some(offset) = query.offset {
            parts.push(self.compile_offset(offset));
        }

        let mut sql = concatenate(parts);
        if !query.unions.is_empty() {
            sql = format!("{} {}", self.wrap_union(&sql), self.compile_unions(query, bindings));
        }
        if let Some(lock) = &query.lock {
            let lock = self.compile_lock(lock);
            if !lock.is_empty() {
                sql.push(' ');
                sql.push_str(&lock);
            }
        }
        sql
    }

    fn compile_aggregate(&self, query: &Builder, aggregate: &Aggregate) -> String {
        let mut column = self.columnize(&aggregate.columns);
        if query.distinct && column != "*" {
            column = format!("distinct {column}");
        }
        format!(
            "select {}({}) as {}",
            aggregate.function,
            column,
            self.wrap_value("aggregate")
        )
    }

    fn compile_columns(&self, query: &Builder, bindings: &mut Vec<Value>) -> String {
        let select = if query.distinct { "select distinct " } else { "select " };
        if query.columns.is_empty() {
            return format!("{select}*");
        }
        let columns = query
            .columns
            .iter()
            .map(|column| match column {
                Column::Plain(name) => self.wrap(name),
                Column::Raw { sql, bindings: values } => {
                    bindings.extend(values.iter().cloned());
                    sql.clone()
                }
                Column::Sub { query, alias } => format!(
                    "({}) as {}",
                    self.compile_select(query, bindings),
                    self.wrap_value(alias)
                ),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{select}{columns}")
    }

    fn compile_from(&self, from: &FromClause, bindings: &mut Vec<Value>) -> String {
        match from {
            FromClause::Table(table) => format!("from {}", self.wrap_table(table)),
            FromClause::Sub { query, alias } => format!(
                "from ({}) as {}",
                self.compile_select(query, bindings),
                self.wrap_table(alias)
            ),
        }
    }

    fn compile_joins(&self, joins: &[JoinClause], bindings: &mut Vec<Value>) -> String {
        joins
            .iter()
            .map(|join| {
                let table = self.wrap_table(&join.table);
                match self.compile_where_list(&join.wheres, bindings) {
                    Some(on) => format!("{} join {} on {}", join.kind.as_str(), table, on),
                    None if join.kind == JoinKind::Cross => format!("cross join {table}"),
                    None => format!("{} join {}", join.kind.as_str(), table),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `where ...` for the clause list, or `None` when it is empty.
    fn compile_wheres(&self, wheres: &[Where], bindings: &mut Vec<Value>) -> Option<String> {
        self.compile_where_list(wheres, bindings)
            .map(|sql| format!("where {sql}"))
    }

    /// Joins the clauses with their conjunctions, dropping the leading one.
    fn compile_where_list(&self, wheres: &[Where], bindings: &mut Vec<Value>) -> Option<String> {
        if wheres.is_empty() {
            return None;
        }
        let mut sql = String::with_capacity(wheres.len() * 24);
        for (i, clause) in wheres.iter().enumerate() {
            if i > 0 {
                let _ = write!(sql, " {} ", clause.boolean().as_str());
            }
            sql.push_str(&self.compile_where(clause, bindings));
        }
        Some(sql)
    }

    fn compile_where(&self, clause: &Where, bindings: &mut Vec<Value>) -> String {
        match clause {
            Where::Basic {
                column,
                operator,
                value,
                ..
            } => format!(
                "{} {} {}",
                self.wrap(column),
                operator,
                self.parameter(value, bindings)
            ),
            Where::Column {
                first,
                operator,
                second,
                ..
            } => format!("{} {} {}", self.wrap(first), operator, self.wrap(second)),
            Where::In {
                column, values, not, ..
            } => {
                if values.is_empty() {
                    return if *not { "1 = 1" } else { "0 = 1" }.to_owned();
                }
                format!(
                    "{} {}in ({})",
                    self.wrap(column),
                    if *not { "not " } else { "" },
                    self.parameterize(values, bindings)
                )
            }
            Where::InSub {
                column, query, not, ..
            } => format!(
                "{} {}in ({})",
                self.wrap(column),
                if *not { "not " } else { "" },
                self.compile_select(query, bindings)
            ),
            Where::Null { column, not, .. } => format!(
                "{} is {}null",
                self.wrap(column),
                if *not { "not " } else { "" }
            ),
            Where::Between {
                column,
                low,
                high,
                not,
                ..
            } => {
                bindings.push(low.clone());
                bindings.push(high.clone());
                format!(
                    "{} {}between ? and ?",
                    self.wrap(column),
                    if *not { "not " } else { "" }
                )
            }
            Where::Nested { wheres, .. } => match self.compile_where_list(wheres, bindings) {
                Some(inner) => format!("({inner})"),
                None => "1 = 1".to_owned(),
            },
            Where::Exists { query, not, .. } => format!(
                "{}exists ({})",
                if *not { "not " } else { "" },
                self.compile_select(query, bindings)
            ),
            Where::Sub {
                column,
                operator,
                query,
                ..
            } => format!(
                "{} {} ({})",
                self.wrap(column),
                operator,
                self.compile_select(query, bindings)
            ),
            Where::Count {
                query,
                operator,
                count,
                ..
            } => format!("({}) {} {}", self.compile_select(query, bindings), operator, count),
            Where::Date {
                part,
                column,
                operator,
                value,
                ..
            } => self.compile_date_based_where(*part, column, operator, value, bindings),
            Where::Raw {
                sql,
                bindings: values,
                ..
            } => {
                bindings.extend(values.iter().cloned());
                sql.clone()
            }
        }
    }

    fn compile_date_based_where(
        &self,
        part: DatePart,
        column: &str,
        operator: &str,
        value: &Value,
        bindings: &mut Vec<Value>,
    ) -> String {
        bindings.push(value.clone());
        format!("{}({}) {} ?", part.function(), self.wrap(column), operator)
    }

    fn compile_havings(&self, havings: &[Having], bindings: &mut Vec<Value>) -> String {
        let mut sql = String::from("having ");
        for (i, having) in havings.iter().enumerate() {
            if i > 0 {
                let _ = write!(sql, " {} ", having.boolean().as_str());
            }
            match having {
                Having::Basic {
                    column,
                    operator,
                    value,
                    ..
                } => {
                    bindings.push(value.clone());
                    let _ = write!(sql, "{} {} ?", self.wrap(column), operator);
                }
                Having::Null { column, not, .. } => {
                    let _ = write!(
                        sql,
                        "{} is {}null",
                        self.wrap(column),
                        if *not { "not " } else { "" }
                    );
                }
                Having::Between {
                    column,
                    low,
                    high,
                    not,
                    ..
                } => {
                    bindings.push(low.clone());
                    bindings.push(high.clone());
                    let _ = write!(
                        sql,
                        "{} {}between ? and ?",
                        self.wrap(column),
                        if *not { "not " } else { "" }
                    );
                }
                Having::Raw {
                    sql: raw,
                    bindings: values,
                    ..
                } => {
                    bindings.extend(values.iter().cloned());
                    sql.push_str(raw);
                }
            }
        }
        sql
    }

    fn compile_orders(&self, orders: &[Order], bindings: &mut Vec<Value>) -> String {
        let compiled = orders
            .iter()
            .map(|order| match order {
                Order::Column { column, direction } => {
                    format!("{} {}", self.wrap(column), direction.as_str())
                }
                Order::Raw {
                    sql,
                    bindings: values,
                } => {
                    bindings.extend(values.iter().cloned());
                    sql.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("order by {compiled}")
    }

    fn compile_random(&self) -> &'static str {
        "RANDOM()"
    }

    fn compile_limit(&self, limit: u64) -> String {
        format!("limit {limit}")
    }

    fn compile_offset(&self, offset: u64) -> String {
        format!("offset {offset}")
    }

    /// Limit clause emitted when only an offset is present, for dialects that
    /// reject a bare `offset`.
    fn compile_offset_without_limit(&self) -> Option<&'static str> {
        None
    }

    fn wrap_union(&self, sql: &str) -> String {
        format!("({sql})")
    }

    fn compile_unions(&self, query: &Builder, bindings: &mut Vec<Value>) -> String {
        let mut parts: Vec<String> = query
            .unions
            .iter()
            .map(|union| {
                let conjunction = if union.all { "union all" } else { "union" };
                let sql = self.compile_select(&union.query, bindings);
                format!("{} {}", conjunction, self.wrap_union(&sql))
            })
            .collect();
        if !query.union_orders.is_empty() {
            parts.push(self.compile_orders(&query.union_orders, bindings));
        }
        if let Some(limit) = query.union_limit {
            parts.push(self.compile_limit(limit));
        }
        if let Some(offset) = query.union_offset {
            parts.push(self.compile_offset(offset));
        }
        parts.join(" ")
    }

    fn compile_union_aggregate(&self, query: &Builder, bindings: &mut Vec<Value>) -> String {
        let Some(aggregate) = &query.aggregate else {
            return self.compile_select(query, bindings);
        };
        let sql = self.compile_aggregate(query, aggregate);
        let mut inner = query.clone();
        inner.aggregate = None;
        format!(
            "{} from ({}) as {}",
            sql,
            self.compile_select(&inner, bindings),
            self.wrap_table("temp_table")
        )
    }

    fn compile_lock(&self, lock: &Lock) -> String {
        match lock {
            Lock::Raw(sql) => sql.clone(),
            Lock::Update | Lock::Shared => String::new(),
        }
    }

    fn compile_exists(&self, query: &Builder, bindings: &mut Vec<Value>) -> String {
        format!(
            "select exists({}) as {}",
            self.compile_select(query, bindings),
            self.wrap_value("exists")
        )
    }

    fn compile_insert(&self, query: &Builder, rows: &[Record], bindings: &mut Vec<Value>) -> String {
        if rows.is_empty() {
            return format!("insert into {} default values", self.wrap_table(query.table_name()));
        }
        insert_rows(self, query, rows, bindings)
    }

    fn compile_insert_or_ignore(
        &self,
        _query: &Builder,
        _rows: &[Record],
        _bindings: &mut Vec<Value>,
    ) -> Result<String> {
        Err(QuarryError::Unsupported("insert or ignore".to_owned()))
    }

    fn compile_insert_get_id(
        &self,
        query: &Builder,
        record: &Record,
        bindings: &mut Vec<Value>,
    ) -> String {
        self.compile_insert(query, std::slice::from_ref(record), bindings)
    }

    fn compile_update_columns(
        &self,
        _query: &Builder,
        values: &Record,
        bindings: &mut Vec<Value>,
    ) -> String {
        values
            .iter()
            .map(|(column, value)| {
                format!("{} = {}", self.wrap(column), self.parameter(value, bindings))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn compile_update(&self, query: &Builder, values: &Record, bindings: &mut Vec<Value>) -> String {
        let table = self.wrap_table(query.table_name());
        let mut sql = format!("update {table}");
        if !query.joins.is_empty() {
            sql.push(' ');
            sql.push_str(&self.compile_joins(&query.joins, bindings));
        }
        let columns = self.compile_update_columns(query, values, bindings);
        let _ = write!(sql, " set {columns}");
        if let Some(wheres) = self.compile_wheres(&query.wheres, bindings) {
            sql.push(' ');
            sql.push_str(&wheres);
        }
        sql
    }

    fn compile_delete(&self, query: &Builder, bindings: &mut Vec<Value>) -> String {
        let table = self.wrap_table(query.table_name());
        let mut sql = if query.joins.is_empty() {
            format!("delete from {table}")
        } else {
            let alias = query
                .table_name()
                .rsplit_once(" as ")
                .map(|(_, alias)| self.wrap_table(alias))
                .unwrap_or_else(|| table.clone());
            format!(
                "delete {} from {} {}",
                alias,
                table,
                self.compile_joins(&query.joins, bindings)
            )
        };
        if let Some(wheres) = self.compile_wheres(&query.wheres, bindings) {
            sql.push(' ');
            sql.push_str(&wheres);
        }
        sql
    }

    /// Query answering whether an auto-increment sequence table exists, for
    /// dialects where truncation resets it by hand.
    fn compile_sequence_check(&self) -> Option<String> {
        None
    }

    /// Statements (with bindings) that empty the table and reset its sequence.
    fn compile_truncate(&self, query: &Builder, _reset_sequence: bool) -> Vec<(String, Vec<Value>)> {
        vec![(
            format!("truncate table {}", self.wrap_table(query.table_name())),
            Vec::new(),
        )]
    }

    fn supports_savepoints(&self) -> bool {
        true
    }

    fn compile_savepoint(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    fn compile_savepoint_rollback(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }
}

/// `insert into t (cols) values (...), (...)` using the first row's columns.
pub(crate) fn insert_rows<G: QueryGrammar + ?Sized>(
    grammar: &G,
    query: &Builder,
    rows: &[Record],
    bindings: &mut Vec<Value>,
) -> String {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();
    let null = Expr::Value(Value::Null);
    let values = rows
        .iter()
        .map(|row| {
            let params = columns
                .iter()
                .map(|column| grammar.parameter(row.get(column).unwrap_or(&null), bindings))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({params})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "insert into {} ({}) values {}",
        grammar.wrap_table(query.table_name()),
        grammar.columnize(&columns),
        values
    )
}

/// Joins non-empty segments with single spaces.
pub(crate) fn concatenate(parts: Vec<String>) -> String {
    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
