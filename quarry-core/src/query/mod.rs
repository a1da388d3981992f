//! Fluent SQL query builder.
//!
//! A [`Builder`] is a pure clause AST: every mutator returns the builder for
//! chaining and nothing touches the database until a terminal method such as
//! [`Builder::get`] or [`Builder::update`] hands the compiled SQL to a
//! [`Connection`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::connection::Connection;
use crate::error::{QuarryError, Result};
use crate::grammar::QueryGrammar;
use crate::value::{Record, Row, Value, raw};

pub mod clause;
mod constrain;

pub use clause::{Boolean, DatePart, Direction, JoinClause, JoinKind, Lock, Where};
pub use constrain::Constrainable;

use clause::{Aggregate, Column, FromClause, Having, Order, Union};

/// A type-safe SQL query builder.
#[derive(Clone)]
pub struct Builder {
    grammar: Arc<dyn QueryGrammar>,
    pub(crate) aggregate: Option<Aggregate>,
    pub(crate) columns: Vec<Column>,
    pub(crate) distinct: bool,
    pub(crate) from: Option<FromClause>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) wheres: Vec<Where>,
    pub(crate) groups: Vec<String>,
    pub(crate) havings: Vec<Having>,
    pub(crate) orders: Vec<Order>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) unions: Vec<Union>,
    pub(crate) union_orders: Vec<Order>,
    pub(crate) union_limit: Option<u64>,
    pub(crate) union_offset: Option<u64>,
    pub(crate) lock: Option<Lock>,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("from", &self.from)
            .field("columns", &self.columns)
            .field("joins", &self.joins)
            .field("wheres", &self.wheres)
            .field("orders", &self.orders)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}

/// One page of results plus the totals needed to render pagination.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, per_page: u64, current_page: u64) -> Self {
        let last_page = if per_page == 0 {
            1
        } else {
            total.div_ceil(per_page).max(1)
        };
        Self {
            items,
            total,
            per_page,
            current_page,
            last_page,
        }
    }

    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            per_page: self.per_page,
            current_page: self.current_page,
            last_page: self.last_page,
        }
    }
}

impl Builder {
    pub fn new(grammar: Arc<dyn QueryGrammar>) -> Self {
        Self {
            grammar,
            aggregate: None,
            columns: Vec::new(),
            distinct: false,
            from: None,
            joins: Vec::new(),
            wheres: Vec::with_capacity(4),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            unions: Vec::new(),
            union_orders: Vec::new(),
            union_limit: None,
            union_offset: None,
            lock: None,
        }
    }

    /// An empty builder sharing this builder's grammar.
    pub fn fork(&self) -> Builder {
        Builder::new(self.grammar.clone())
    }

    pub fn grammar(&self) -> &Arc<dyn QueryGrammar> {
        &self.grammar
    }

    /// Sets the table the query selects from.
    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.from = Some(FromClause::Table(table.into()));
        self
    }

    /// Selects from a derived table.
    pub fn from_sub(mut self, query: Builder, alias: impl Into<String>) -> Self {
        self.from = Some(FromClause::Sub {
            query: Box::new(query),
            alias: alias.into(),
        });
        self
    }

    /// The table name (possibly `name as alias`), or `""` for derived tables.
    pub fn table_name(&self) -> &str {
        match &self.from {
            Some(FromClause::Table(table)) => table,
            _ => "",
        }
    }

    pub fn wheres(&self) -> &[Where] {
        &self.wheres
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    pub(crate) fn push_where(&mut self, clause: Where) {
        self.wheres.push(clause);
    }

    /// Appends another builder's where clauses, keeping their conjunctions.
    pub fn merge_wheres(&mut self, wheres: Vec<Where>) {
        self.wheres.extend(wheres);
    }

    pub(crate) fn take_wheres(&mut self) -> Vec<Where> {
        std::mem::take(&mut self.wheres)
    }

    /// Compiles the select statement and its bindings.
    pub fn compile(&self) -> (String, Vec<Value>) {
        let mut bindings = Vec::new();
        let sql = self.grammar.compile_select(self, &mut bindings);
        (sql, bindings)
    }

    /// Returns the SELECT SQL that would be executed for this query.
    pub fn to_sql(&self) -> String {
        self.compile().0
    }

    /// Bindings in placeholder order.
    pub fn bindings(&self) -> Vec<Value> {
        self.compile().1
    }

    fn require_table(&self) -> Result<()> {
        if self.table_name().is_empty() {
            return Err(QuarryError::Message(
                "query has no table; call from() first".to_owned(),
            ));
        }
        Ok(())
    }

    /// Executes the query and returns every row.
    #[tracing::instrument(skip_all, fields(table = %self.table_name()))]
    pub async fn get(&self, conn: &mut Connection) -> Result<Vec<Row>> {
        let (sql, bindings) = self.compile();
        conn.select(&sql, bindings).await
    }

    pub async fn first(&self, conn: &mut Connection) -> Result<Option<Row>> {
        let rows = self.clone().limit(1).get(conn).await?;
        Ok(rows.into_iter().next())
    }

    /// Finds a row by its `id` column.
    pub async fn find(&self, conn: &mut Connection, id: impl Into<Value>) -> Result<Option<Row>> {
        self.find_by(conn, "id", id).await
    }

    pub async fn find_by(
        &self,
        conn: &mut Connection,
        key: &str,
        id: impl Into<Value>,
    ) -> Result<Option<Row>> {
        self.clone().filter_eq(key, id.into()).first(conn).await
    }

    /// First column of the first row.
    pub async fn value(&self, conn: &mut Connection, column: &str) -> Result<Option<Value>> {
        let row = self.clone().select(&[column]).first(conn).await?;
        Ok(row.and_then(|row| row.into_values().next()))
    }

    /// Values of one column across every row.
    pub async fn pluck(&self, conn: &mut Connection, column: &str) -> Result<Vec<Value>> {
        let rows = self.clone().select(&[column]).get(conn).await?;
        let key = strip_table_for_pluck(column);
        Ok(rows
            .into_iter()
            .map(|mut row| row.shift_remove(key).unwrap_or_default())
            .collect())
    }

    /// `(key, value)` pairs of two columns, in row order.
    pub async fn pluck_with_key(
        &self,
        conn: &mut Connection,
        column: &str,
        key: &str,
    ) -> Result<Vec<(Value, Value)>> {
        let rows = self.clone().select(&[column, key]).get(conn).await?;
        let (column, key) = (strip_table_for_pluck(column), strip_table_for_pluck(key));
        Ok(rows
            .into_iter()
            .map(|row| {
                let k = row.get(key).cloned().unwrap_or_default();
                let v = row.get(column).cloned().unwrap_or_default();
                (k, v)
            })
            .collect())
    }

    pub async fn count(&self, conn: &mut Connection) -> Result<u64> {
        let value = self.aggregate(conn, "count", &["*"]).await?;
        Ok(value.as_i64().unwrap_or(0).max(0) as u64)
    }

    pub async fn min(&self, conn: &mut Connection, column: &str) -> Result<Value> {
        self.aggregate(conn, "min", &[column]).await
    }

    pub async fn max(&self, conn: &mut Connection, column: &str) -> Result<Value> {
        self.aggregate(conn, "max", &[column]).await
    }

    pub async fn sum(&self, conn: &mut Connection, column: &str) -> Result<Value> {
        let value = self.aggregate(conn, "sum", &[column]).await?;
        Ok(if value.is_null() { Value::Int(0) } else { value })
    }

    pub async fn avg(&self, conn: &mut Connection, column: &str) -> Result<Value> {
        self.aggregate(conn, "avg", &[column]).await
    }

    /// Runs `function(columns)` over the query and returns the scalar.
    pub async fn aggregate(
        &self,
        conn: &mut Connection,
        function: &str,
        columns: &[&str],
    ) -> Result<Value> {
        let mut query = self.clone();
        if query.unions.is_empty() && query.havings.is_empty() {
            query.columns.clear();
        }
        query.aggregate = Some(Aggregate {
            function: function.to_owned(),
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
        });
        let rows = query.get(conn).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.shift_remove("aggregate"))
            .unwrap_or_default())
    }

    pub async fn exists(&self, conn: &mut Connection) -> Result<bool> {
        let mut bindings = Vec::new();
        let sql = self.grammar.compile_exists(self, &mut bindings);
        let rows = conn.select(&sql, bindings).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("exists"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    pub async fn doesnt_exist(&self, conn: &mut Connection) -> Result<bool> {
        Ok(!self.exists(conn).await?)
    }

    /// Inserts one or more rows; columns come from the first record.
    pub async fn insert(&self, conn: &mut Connection, rows: Vec<Record>) -> Result<bool> {
        self.require_table()?;
        if rows.is_empty() {
            return Ok(true);
        }
        let mut bindings = Vec::new();
        let sql = self.grammar.compile_insert(self, &rows, &mut bindings);
        conn.statement(&sql, bindings).await
    }

    /// Inserts rows, skipping any that violate a unique constraint.
    pub async fn insert_or_ignore(&self, conn: &mut Connection, rows: Vec<Record>) -> Result<u64> {
        self.require_table()?;
        if rows.is_empty() {
            return Ok(0);
        }
        let mut bindings = Vec::new();
        let sql = self
            .grammar
            .compile_insert_or_ignore(self, &rows, &mut bindings)?;
        conn.affecting_statement(&sql, bindings).await
    }

    /// Inserts a row and returns the generated auto-increment id.
    pub async fn insert_get_id(&self, conn: &mut Connection, record: Record) -> Result<i64> {
        self.require_table()?;
        let mut bindings = Vec::new();
        let sql = self
            .grammar
            .compile_insert_get_id(self, &record, &mut bindings);
        let executed = conn.insert(&sql, bindings).await?;
        executed.last_insert_id.ok_or_else(|| {
            QuarryError::Message(format!("driver reported no insert id for [{}]", self.table_name()))
        })
    }

    pub async fn update(&self, conn: &mut Connection, values: Record) -> Result<u64> {
        self.require_table()?;
        if values.is_empty() {
            return Ok(0);
        }
        let mut bindings = Vec::new();
        let sql = self.grammar.compile_update(self, &values, &mut bindings);
        conn.update(&sql, bindings).await
    }

    /// Updates the matching row, or inserts `attributes + values` when none matches.
    pub async fn update_or_insert(
        &self,
        conn: &mut Connection,
        attributes: Record,
        values: Record,
    ) -> Result<bool> {
        let mut query = self.clone();
        for (column, value) in &attributes {
            query = query.filter(column, "=", value.clone());
        }
        if !query.exists(conn).await? {
            let mut row = attributes;
            row.extend(values);
            return self.insert(conn, vec![row]).await;
        }
        if values.is_empty() {
            return Ok(true);
        }
        Ok(query.limit(1).update(conn, values).await? > 0)
    }

    pub async fn increment(&self, conn: &mut Connection, column: &str, amount: i64) -> Result<u64> {
        self.increment_with(conn, column, amount, Record::new()).await
    }

    pub async fn decrement(&self, conn: &mut Connection, column: &str, amount: i64) -> Result<u64> {
        self.increment_with(conn, column, -amount, Record::new()).await
    }

    /// Adds `amount` to `column` and applies `extra` in the same statement.
    pub async fn increment_with(
        &self,
        conn: &mut Connection,
        column: &str,
        amount: i64,
        extra: Record,
    ) -> Result<u64> {
        let wrapped = self.grammar.wrap(column);
        let expression = if amount < 0 {
            format!("{} - {}", wrapped, amount.unsigned_abs())
        } else {
            format!("{wrapped} + {amount}")
        };
        let mut values = Record::new();
        values.insert(column.to_owned(), raw(expression));
        values.extend(extra);
        self.update(conn, values).await
    }

    pub async fn delete(&self, conn: &mut Connection) -> Result<u64> {
        self.require_table()?;
        let mut bindings = Vec::new();
        let sql = self.grammar.compile_delete(self, &mut bindings);
        conn.delete(&sql, bindings).await
    }

    /// Empties the table and resets its auto-increment sequence.
    pub async fn truncate(&self, conn: &mut Connection) -> Result<()> {
        self.require_table()?;
        let reset_sequence = match self.grammar.compile_sequence_check() {
            Some(sql) => conn
                .select_one(&sql, Vec::new())
                .await?
                .and_then(|row| row.get("exists").and_then(Value::as_bool))
                .unwrap_or(false),
            None => true,
        };
        for (sql, bindings) in self.grammar.compile_truncate(self, reset_sequence) {
            conn.statement(&sql, bindings).await?;
        }
        Ok(())
    }

    /// Total row count honoring groups and havings, ignoring ordering and paging.
    pub async fn count_for_pagination(&self, conn: &mut Connection) -> Result<u64> {
        if !self.groups.is_empty() || !self.havings.is_empty() || !self.unions.is_empty() {
            let mut inner = self.clone();
            inner.orders.clear();
            inner.limit = None;
            inner.offset = None;
            return self
                .fork()
                .from_sub(inner, "aggregate_table")
                .count(conn)
                .await;
        }
        let mut query = self.clone();
        query.columns.clear();
        query.orders.clear();
        query.limit = None;
        query.offset = None;
        query.count(conn).await
    }

    /// Runs a count query and fetches one page of rows.
    pub async fn paginate(
        &self,
        conn: &mut Connection,
        per_page: u64,
        page: u64,
    ) -> Result<Page<Row>> {
        let page = page.max(1);
        let total = self.count_for_pagination(conn).await?;
        let items = if total > 0 {
            self.clone().for_page(page, per_page).get(conn).await?
        } else {
            Vec::new()
        };
        Ok(Page::new(items, total, per_page, page))
    }
}

impl Constrainable for Builder {
    fn query_mut(&mut self) -> &mut Builder {
        self
    }

    fn query_ref(&self) -> &Builder {
        self
    }
}

/// `users.name as n` is read back as `n`; `users.name` as `name`.
fn strip_table_for_pluck(column: &str) -> &str {
    if let Some((_, alias)) = crate::grammar::split_alias(column) {
        return alias;
    }
    column.rsplit_once('.').map(|(_, c)| c).unwrap_or(column)
}
