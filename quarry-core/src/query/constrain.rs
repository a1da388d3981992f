use super::Builder;
use super::clause::{
    Boolean, Column, DatePart, Direction, Having, JoinClause, JoinKind, Lock, Order, Union, Where,
};
use crate::value::{Expr, Value};

/// Chainable clause methods shared by every type that wraps a [`Builder`].
///
/// Implementors only expose their inner builder; the provided methods consume
/// and return `self` so entity queries and relations chain exactly like the
/// base builder.
pub trait Constrainable: Sized {
    fn query_mut(&mut self) -> &mut Builder;

    fn query_ref(&self) -> &Builder;

    fn tap(mut self, f: impl FnOnce(&mut Builder)) -> Self {
        f(self.query_mut());
        self
    }

    // ----------------------------------------------------------------------
    // select
    // ----------------------------------------------------------------------

    /// Replaces the selected columns.
    fn select(self, columns: &[&str]) -> Self {
        self.tap(|q| {
            q.columns = columns.iter().map(|c| Column::Plain((*c).to_owned())).collect();
        })
    }

    fn add_select(self, columns: &[&str]) -> Self {
        self.tap(|q| {
            q.columns
                .extend(columns.iter().map(|c| Column::Plain((*c).to_owned())));
        })
    }

    fn select_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.tap(|q| {
            q.columns.push(Column::Raw {
                sql: sql.to_owned(),
                bindings,
            })
        })
    }

    /// Selects `(subquery) as alias`.
    fn select_sub(self, query: Builder, alias: &str) -> Self {
        self.tap(|q| {
            q.columns.push(Column::Sub {
                query: Box::new(query),
                alias: alias.to_owned(),
            })
        })
    }

    fn distinct(self) -> Self {
        self.tap(|q| q.distinct = true)
    }

    // ----------------------------------------------------------------------
    // where
    // ----------------------------------------------------------------------

    /// `column operator ?`. Comparing to NULL with `=` or `!=` becomes `is [not] null`.
    fn filter(self, column: &str, operator: &str, value: impl Into<Expr>) -> Self {
        self.tap(|q| push_basic(q, column, operator, value.into(), Boolean::And))
    }

    fn or_filter(self, column: &str, operator: &str, value: impl Into<Expr>) -> Self {
        self.tap(|q| push_basic(q, column, operator, value.into(), Boolean::Or))
    }

    fn filter_eq(self, column: &str, value: impl Into<Expr>) -> Self {
        self.filter(column, "=", value)
    }

    fn or_filter_eq(self, column: &str, value: impl Into<Expr>) -> Self {
        self.or_filter(column, "=", value)
    }

    fn filter_ne(self, column: &str, value: impl Into<Expr>) -> Self {
        self.filter(column, "!=", value)
    }

    fn filter_lt(self, column: &str, value: impl Into<Expr>) -> Self {
        self.filter(column, "<", value)
    }

    fn filter_lte(self, column: &str, value: impl Into<Expr>) -> Self {
        self.filter(column, "<=", value)
    }

    fn filter_gt(self, column: &str, value: impl Into<Expr>) -> Self {
        self.filter(column, ">", value)
    }

    fn filter_gte(self, column: &str, value: impl Into<Expr>) -> Self {
        self.filter(column, ">=", value)
    }

    fn filter_like(self, column: &str, pattern: impl Into<Expr>) -> Self {
        self.filter(column, "like", pattern)
    }

    /// Compares two columns.
    fn filter_column(self, first: &str, operator: &str, second: &str) -> Self {
        self.tap(|q| {
            q.push_where(Where::Column {
                first: first.to_owned(),
                operator: operator.to_owned(),
                second: second.to_owned(),
                boolean: Boolean::And,
            })
        })
    }

    fn or_filter_column(self, first: &str, operator: &str, second: &str) -> Self {
        self.tap(|q| {
            q.push_where(Where::Column {
                first: first.to_owned(),
                operator: operator.to_owned(),
                second: second.to_owned(),
                boolean: Boolean::Or,
            })
        })
    }

    /// `column in (...)`. An empty list matches nothing.
    fn filter_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.tap(|q| push_in(q, column, values, false, Boolean::And))
    }

    fn or_filter_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.tap(|q| push_in(q, column, values, false, Boolean::Or))
    }

    /// `column not in (...)`. An empty list matches everything.
    fn filter_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.tap(|q| push_in(q, column, values, true, Boolean::And))
    }

    fn or_filter_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.tap(|q| push_in(q, column, values, true, Boolean::Or))
    }

    fn filter_in_sub(self, column: &str, query: Builder) -> Self {
        self.tap(|q| {
            q.push_where(Where::InSub {
                column: column.to_owned(),
                query: Box::new(query),
                not: false,
                boolean: Boolean::And,
            })
        })
    }

    fn filter_not_in_sub(self, column: &str, query: Builder) -> Self {
        self.tap(|q| {
            q.push_where(Where::InSub {
                column: column.to_owned(),
                query: Box::new(query),
                not: true,
                boolean: Boolean::And,
            })
        })
    }

    fn filter_null(self, column: &str) -> Self {
        self.tap(|q| push_null(q, column, false, Boolean::And))
    }

    fn or_filter_null(self, column: &str) -> Self {
        self.tap(|q| push_null(q, column, false, Boolean::Or))
    }

    fn filter_not_null(self, column: &str) -> Self {
        self.tap(|q| push_null(q, column, true, Boolean::And))
    }

    fn or_filter_not_null(self, column: &str) -> Self {
        self.tap(|q| push_null(q, column, true, Boolean::Or))
    }

    fn filter_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        let (low, high) = (low.into(), high.into());
        self.tap(|q| push_between(q, column, low, high, false, Boolean::And))
    }

    fn or_filter_between(
        self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        let (low, high) = (low.into(), high.into());
        self.tap(|q| push_between(q, column, low, high, false, Boolean::Or))
    }

    fn filter_not_between(
        self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        let (low, high) = (low.into(), high.into());
        self.tap(|q| push_between(q, column, low, high, true, Boolean::And))
    }

    /// Groups the clauses added by `f` in parentheses.
    fn filter_nested(self, f: impl FnOnce(Builder) -> Builder) -> Self {
        self.tap(|q| push_nested(q, f, Boolean::And))
    }

    fn or_filter_nested(self, f: impl FnOnce(Builder) -> Builder) -> Self {
        self.tap(|q| push_nested(q, f, Boolean::Or))
    }

    fn filter_exists(self, query: Builder) -> Self {
        self.tap(|q| push_exists(q, query, false, Boolean::And))
    }

    fn or_filter_exists(self, query: Builder) -> Self {
        self.tap(|q| push_exists(q, query, false, Boolean::Or))
    }

    fn filter_not_exists(self, query: Builder) -> Self {
        self.tap(|q| push_exists(q, query, true, Boolean::And))
    }

    /// `column operator (subquery)`.
    fn filter_sub(self, column: &str, operator: &str, query: Builder) -> Self {
        self.tap(|q| {
            q.push_where(Where::Sub {
                column: column.to_owned(),
                operator: operator.to_owned(),
                query: Box::new(query),
                boolean: Boolean::And,
            })
        })
    }

    fn filter_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.tap(|q| {
            q.push_where(Where::Raw {
                sql: sql.to_owned(),
                bindings,
                boolean: Boolean::And,
            })
        })
    }

    fn or_filter_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.tap(|q| {
            q.push_where(Where::Raw {
                sql: sql.to_owned(),
                bindings,
                boolean: Boolean::Or,
            })
        })
    }

    fn filter_date(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.tap(|q| push_date(q, DatePart::Date, column, operator, value))
    }

    fn filter_year(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.tap(|q| push_date(q, DatePart::Year, column, operator, value))
    }

    /// Integer months are zero padded so `3` matches `'03'`.
    fn filter_month(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        let value = pad_date_part(value.into());
        self.tap(|q| push_date(q, DatePart::Month, column, operator, value))
    }

    fn filter_day(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        let value = pad_date_part(value.into());
        self.tap(|q| push_date(q, DatePart::Day, column, operator, value))
    }

    fn filter_time(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.tap(|q| push_date(q, DatePart::Time, column, operator, value))
    }

    // ----------------------------------------------------------------------
    // joins
    // ----------------------------------------------------------------------

    fn join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.tap(|q| {
            q.joins
                .push(JoinClause::new(JoinKind::Inner, table).on(first, operator, second))
        })
    }

    fn left_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.tap(|q| {
            q.joins
                .push(JoinClause::new(JoinKind::Left, table).on(first, operator, second))
        })
    }

    fn right_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.tap(|q| {
            q.joins
                .push(JoinClause::new(JoinKind::Right, table).on(first, operator, second))
        })
    }

    fn cross_join(self, table: &str) -> Self {
        self.tap(|q| q.joins.push(JoinClause::new(JoinKind::Cross, table)))
    }

    /// Join with a predicate built by `f`.
    fn join_on(self, kind: JoinKind, table: &str, f: impl FnOnce(JoinClause) -> JoinClause) -> Self {
        self.tap(|q| q.joins.push(f(JoinClause::new(kind, table))))
    }

    // ----------------------------------------------------------------------
    // group / having
    // ----------------------------------------------------------------------

    fn group_by(self, columns: &[&str]) -> Self {
        self.tap(|q| q.groups.extend(columns.iter().map(|c| (*c).to_owned())))
    }

    fn having(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.tap(|q| {
            q.havings.push(Having::Basic {
                column: column.to_owned(),
                operator: operator.to_owned(),
                value,
                boolean: Boolean::And,
            })
        })
    }

    fn or_having(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.tap(|q| {
            q.havings.push(Having::Basic {
                column: column.to_owned(),
                operator: operator.to_owned(),
                value,
                boolean: Boolean::Or,
            })
        })
    }

    fn having_null(self, column: &str) -> Self {
        self.tap(|q| {
            q.havings.push(Having::Null {
                column: column.to_owned(),
                not: false,
                boolean: Boolean::And,
            })
        })
    }

    fn having_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        let (low, high) = (low.into(), high.into());
        self.tap(|q| {
            q.havings.push(Having::Between {
                column: column.to_owned(),
                low,
                high,
                not: false,
                boolean: Boolean::And,
            })
        })
    }

    fn having_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.tap(|q| {
            q.havings.push(Having::Raw {
                sql: sql.to_owned(),
                bindings,
                boolean: Boolean::And,
            })
        })
    }

    // ----------------------------------------------------------------------
    // order / limit
    // ----------------------------------------------------------------------

    fn order_by(self, column: &str) -> Self {
        self.order_by_dir(column, Direction::Asc)
    }

    fn order_by_desc(self, column: &str) -> Self {
        self.order_by_dir(column, Direction::Desc)
    }

    /// Orders applied after a union target the whole compound query.
    fn order_by_dir(self, column: &str, direction: Direction) -> Self {
        self.tap(|q| {
            let order = Order::Column {
                column: column.to_owned(),
                direction,
            };
            if q.unions.is_empty() {
                q.orders.push(order);
            } else {
                q.union_orders.push(order);
            }
        })
    }

    fn latest(self, column: &str) -> Self {
        self.order_by_desc(column)
    }

    fn oldest(self, column: &str) -> Self {
        self.order_by(column)
    }

    fn order_by_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.tap(|q| {
            let order = Order::Raw {
                sql: sql.to_owned(),
                bindings,
            };
            if q.unions.is_empty() {
                q.orders.push(order);
            } else {
                q.union_orders.push(order);
            }
        })
    }

    fn in_random_order(self) -> Self {
        self.tap(|q| {
            let random = q.grammar().compile_random().to_owned();
            q.orders.push(Order::Raw {
                sql: random,
                bindings: Vec::new(),
            });
        })
    }

    /// Drops every ordering.
    fn reorder(self) -> Self {
        self.tap(|q| {
            q.orders.clear();
            q.union_orders.clear();
        })
    }

    fn limit(self, value: u64) -> Self {
        self.tap(|q| {
            if q.unions.is_empty() {
                q.limit = Some(value);
            } else {
                q.union_limit = Some(value);
            }
        })
    }

    fn take(self, value: u64) -> Self {
        self.limit(value)
    }

    fn offset(self, value: u64) -> Self {
        self.tap(|q| {
            if q.unions.is_empty() {
                q.offset = Some(value);
            } else {
                q.union_offset = Some(value);
            }
        })
    }

    fn skip(self, value: u64) -> Self {
        self.offset(value)
    }

    /// `limit per_page offset (page - 1) * per_page`; pages start at 1.
    fn for_page(self, page: u64, per_page: u64) -> Self {
        self.offset(page.saturating_sub(1) * per_page).limit(per_page)
    }

    // ----------------------------------------------------------------------
    // unions / locks
    // ----------------------------------------------------------------------

    fn union(self, query: Builder) -> Self {
        self.tap(|q| {
            q.unions.push(Union {
                query: Box::new(query),
                all: false,
            })
        })
    }

    fn union_all(self, query: Builder) -> Self {
        self.tap(|q| {
            q.unions.push(Union {
                query: Box::new(query),
                all: true,
            })
        })
    }

    fn lock_for_update(self) -> Self {
        self.tap(|q| q.lock = Some(Lock::Update))
    }

    fn shared_lock(self) -> Self {
        self.tap(|q| q.lock = Some(Lock::Shared))
    }

    fn lock_raw(self, sql: &str) -> Self {
        self.tap(|q| q.lock = Some(Lock::Raw(sql.to_owned())))
    }
}

fn push_basic(q: &mut Builder, column: &str, operator: &str, value: Expr, boolean: Boolean) {
    if matches!(value, Expr::Value(Value::Null)) {
        match operator {
            "=" | "is" => return push_null(q, column, false, boolean),
            "!=" | "<>" | "is not" => return push_null(q, column, true, boolean),
            _ => {}
        }
    }
    q.push_where(Where::Basic {
        column: column.to_owned(),
        operator: operator.to_ascii_lowercase(),
        value,
        boolean,
    });
}

fn push_in<I, V>(q: &mut Builder, column: &str, values: I, not: bool, boolean: Boolean)
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    q.push_where(Where::In {
        column: column.to_owned(),
        values: values.into_iter().map(Into::into).collect(),
        not,
        boolean,
    });
}

fn push_null(q: &mut Builder, column: &str, not: bool, boolean: Boolean) {
    q.push_where(Where::Null {
        column: column.to_owned(),
        not,
        boolean,
    });
}

fn push_between(q: &mut Builder, column: &str, low: Value, high: Value, not: bool, boolean: Boolean) {
    q.push_where(Where::Between {
        column: column.to_owned(),
        low,
        high,
        not,
        boolean,
    });
}

fn push_nested(q: &mut Builder, f: impl FnOnce(Builder) -> Builder, boolean: Boolean) {
    let wheres = f(q.fork()).take_wheres();
    if !wheres.is_empty() {
        q.push_where(Where::Nested { wheres, boolean });
    }
}

fn push_exists(q: &mut Builder, query: Builder, not: bool, boolean: Boolean) {
    q.push_where(Where::Exists {
        query: Box::new(query),
        not,
        boolean,
    });
}

fn push_date(q: &mut Builder, part: DatePart, column: &str, operator: &str, value: Value) {
    q.push_where(Where::Date {
        part,
        column: column.to_owned(),
        operator: operator.to_owned(),
        value,
        boolean: Boolean::And,
    });
}

fn pad_date_part(value: Value) -> Value {
    match value {
        Value::Int(n) => Value::Text(format!("{n:02}")),
        other => other,
    }
}
