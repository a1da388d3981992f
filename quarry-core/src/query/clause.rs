//! Clause nodes accumulated by [`Builder`](super::Builder).

use crate::value::{Expr, Value};

use super::Builder;

/// Conjunction joining a clause to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boolean {
    And,
    Or,
}

impl Boolean {
    pub fn as_str(self) -> &'static str {
        match self {
            Boolean::And => "and",
            Boolean::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Date,
    Year,
    Month,
    Day,
    Time,
}

impl DatePart {
    /// Function name understood by MySQL-family dialects.
    pub fn function(self) -> &'static str {
        match self {
            DatePart::Date => "date",
            DatePart::Year => "year",
            DatePart::Month => "month",
            DatePart::Day => "day",
            DatePart::Time => "time",
        }
    }

    /// `strftime` pattern for SQLite.
    pub fn strftime(self) -> &'static str {
        match self {
            DatePart::Date => "%Y-%m-%d",
            DatePart::Year => "%Y",
            DatePart::Month => "%m",
            DatePart::Day => "%d",
            DatePart::Time => "%H:%M:%S",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Where {
    Basic {
        column: String,
        operator: String,
        value: Expr,
        boolean: Boolean,
    },
    Column {
        first: String,
        operator: String,
        second: String,
        boolean: Boolean,
    },
    In {
        column: String,
        values: Vec<Value>,
        not: bool,
        boolean: Boolean,
    },
    InSub {
        column: String,
        query: Box<Builder>,
        not: bool,
        boolean: Boolean,
    },
    Null {
        column: String,
        not: bool,
        boolean: Boolean,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        not: bool,
        boolean: Boolean,
    },
    /// Parenthesized group; owns its own clause list.
    Nested {
        wheres: Vec<Where>,
        boolean: Boolean,
    },
    Exists {
        query: Box<Builder>,
        not: bool,
        boolean: Boolean,
    },
    /// `column op (subquery)`
    Sub {
        column: String,
        operator: String,
        query: Box<Builder>,
        boolean: Boolean,
    },
    /// `(subquery) op count`
    Count {
        query: Box<Builder>,
        operator: String,
        count: i64,
        boolean: Boolean,
    },
    Date {
        part: DatePart,
        column: String,
        operator: String,
        value: Value,
        boolean: Boolean,
    },
    Raw {
        sql: String,
        bindings: Vec<Value>,
        boolean: Boolean,
    },
}

impl Where {
    pub fn boolean(&self) -> Boolean {
        match self {
            Where::Basic { boolean, .. }
            | Where::Column { boolean, .. }
            | Where::In { boolean, .. }
            | Where::InSub { boolean, .. }
            | Where::Null { boolean, .. }
            | Where::Between { boolean, .. }
            | Where::Nested { boolean, .. }
            | Where::Exists { boolean, .. }
            | Where::Sub { boolean, .. }
            | Where::Count { boolean, .. }
            | Where::Date { boolean, .. }
            | Where::Raw { boolean, .. } => *boolean,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

impl JoinKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinKind::Inner => "inner",
            JoinKind::Left => "left",
            JoinKind::Right => "right",
            JoinKind::Cross => "cross",
        }
    }
}

/// A join and its `ON` predicate.
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub(crate) kind: JoinKind,
    pub(crate) table: String,
    pub(crate) wheres: Vec<Where>,
}

impl JoinClause {
    pub fn new(kind: JoinKind, table: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            wheres: Vec::new(),
        }
    }

    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Adds `first op second` comparing two columns.
    pub fn on(mut self, first: &str, operator: &str, second: &str) -> Self {
        self.push_on(first, operator, second, Boolean::And);
        self
    }

    pub fn or_on(mut self, first: &str, operator: &str, second: &str) -> Self {
        self.push_on(first, operator, second, Boolean::Or);
        self
    }

    /// Adds a bound comparison (`table.column op ?`) to the join predicate.
    pub fn filter(mut self, column: &str, operator: &str, value: impl Into<Expr>) -> Self {
        self.wheres.push(Where::Basic {
            column: column.to_owned(),
            operator: operator.to_owned(),
            value: value.into(),
            boolean: Boolean::And,
        });
        self
    }

    pub fn or_filter(mut self, column: &str, operator: &str, value: impl Into<Expr>) -> Self {
        self.wheres.push(Where::Basic {
            column: column.to_owned(),
            operator: operator.to_owned(),
            value: value.into(),
            boolean: Boolean::Or,
        });
        self
    }

    pub fn filter_null(mut self, column: &str) -> Self {
        self.wheres.push(Where::Null {
            column: column.to_owned(),
            not: false,
            boolean: Boolean::And,
        });
        self
    }

    /// Groups the predicates built by `f` in parentheses.
    pub fn on_nested(mut self, f: impl FnOnce(JoinClause) -> JoinClause) -> Self {
        let nested = f(JoinClause::new(self.kind, self.table.clone()));
        if !nested.wheres.is_empty() {
            self.wheres.push(Where::Nested {
                wheres: nested.wheres,
                boolean: Boolean::And,
            });
        }
        self
    }

    fn push_on(&mut self, first: &str, operator: &str, second: &str, boolean: Boolean) {
        self.wheres.push(Where::Column {
            first: first.to_owned(),
            operator: operator.to_owned(),
            second: second.to_owned(),
            boolean,
        });
    }
}

#[derive(Debug, Clone)]
pub enum Having {
    Basic {
        column: String,
        operator: String,
        value: Value,
        boolean: Boolean,
    },
    Null {
        column: String,
        not: bool,
        boolean: Boolean,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        not: bool,
        boolean: Boolean,
    },
    Raw {
        sql: String,
        bindings: Vec<Value>,
        boolean: Boolean,
    },
}

impl Having {
    pub fn boolean(&self) -> Boolean {
        match self {
            Having::Basic { boolean, .. }
            | Having::Null { boolean, .. }
            | Having::Between { boolean, .. }
            | Having::Raw { boolean, .. } => *boolean,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Order {
    Column { column: String, direction: Direction },
    Raw { sql: String, bindings: Vec<Value> },
}

#[derive(Debug, Clone)]
pub enum Column {
    Plain(String),
    Raw { sql: String, bindings: Vec<Value> },
    Sub { query: Box<Builder>, alias: String },
}

#[derive(Debug, Clone)]
pub enum FromClause {
    Table(String),
    Sub { query: Box<Builder>, alias: String },
}

#[derive(Debug, Clone)]
pub struct Union {
    pub(crate) query: Box<Builder>,
    pub(crate) all: bool,
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub(crate) function: String,
    pub(crate) columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lock {
    Update,
    Shared,
    Raw(String),
}
