use crate::value::{Expr, Value};

/// Logical column type, mapped to SQL by each schema grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    TinyInteger,
    SmallInteger,
    Integer,
    BigInteger,
    /// `varchar(length)`
    String(u32),
    Char(u32),
    Text,
    MediumText,
    LongText,
    Boolean,
    Float,
    Double,
    Decimal { total: u8, places: u8 },
    Date,
    DateTime,
    Timestamp,
    Time,
    Json,
    Binary,
    Uuid,
    /// Restricted to the listed values.
    Enum(Vec<String>),
}

impl ColumnType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::TinyInteger
                | ColumnType::SmallInteger
                | ColumnType::Integer
                | ColumnType::BigInteger
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer()
            || matches!(
                self,
                ColumnType::Float | ColumnType::Double | ColumnType::Decimal { .. }
            )
    }
}

/// Foreign key action such as `cascade` or `set null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignAction {
    Cascade,
    Restrict,
    SetNull,
    NoAction,
}

impl ForeignAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ForeignAction::Cascade => "cascade",
            ForeignAction::Restrict => "restrict",
            ForeignAction::SetNull => "set null",
            ForeignAction::NoAction => "no action",
        }
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDefinition {
    /// Constraint name; generated as `{prefix}{table}_{columns}_foreign` when unset.
    pub name: Option<String>,
    /// Columns on the owning table.
    pub columns: Vec<String>,
    /// Referenced columns.
    pub references: Vec<String>,
    /// Referenced table (unprefixed).
    pub on: String,
    pub on_delete: Option<ForeignAction>,
    pub on_update: Option<ForeignAction>,
}

impl ForeignKeyDefinition {
    pub(crate) fn new(columns: Vec<String>) -> Self {
        Self {
            name: None,
            columns,
            references: vec!["id".to_owned()],
            on: String::new(),
            on_delete: None,
            on_update: None,
        }
    }

    pub fn references(&mut self, columns: &[&str]) -> &mut Self {
        self.references = columns.iter().map(|c| (*c).to_owned()).collect();
        self
    }

    pub fn on(&mut self, table: &str) -> &mut Self {
        self.on = table.to_owned();
        self
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn on_delete(&mut self, action: ForeignAction) -> &mut Self {
        self.on_delete = Some(action);
        self
    }

    pub fn on_update(&mut self, action: ForeignAction) -> &mut Self {
        self.on_update = Some(action);
        self
    }

    pub fn cascade_on_delete(&mut self) -> &mut Self {
        self.on_delete(ForeignAction::Cascade)
    }

    pub fn cascade_on_update(&mut self) -> &mut Self {
        self.on_update(ForeignAction::Cascade)
    }

    pub fn null_on_delete(&mut self) -> &mut Self {
        self.on_delete(ForeignAction::SetNull)
    }

    pub fn restrict_on_delete(&mut self) -> &mut Self {
        self.on_delete(ForeignAction::Restrict)
    }
}

/// A column and its modifiers.
///
/// Returned by the [`Blueprint`](super::Blueprint) column methods so that
/// modifiers chain: `table.string("email", 255).nullable().unique();`
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub kind: ColumnType,
    pub nullable: bool,
    pub default: Option<Expr>,
    /// `default CURRENT_TIMESTAMP` on timestamp columns.
    pub use_current: bool,
    pub unsigned: bool,
    pub auto_increment: bool,
    /// Fluent index flags, expanded into index commands before compiling.
    pub primary: bool,
    pub unique: bool,
    pub index: bool,
    /// MySQL column comment.
    pub comment: Option<String>,
    /// MySQL column placement.
    pub after: Option<String>,
    /// Modify an existing column instead of adding one.
    pub change: bool,
    /// Constraint added by `constrained()` / `references()`.
    pub foreign: Option<ForeignKeyDefinition>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            default: None,
            use_current: false,
            unsigned: false,
            auto_increment: false,
            primary: false,
            unique: false,
            index: false,
            comment: None,
            after: None,
            change: false,
            foreign: None,
        }
    }

    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.nullable = false;
        self
    }

    pub fn default(&mut self, value: impl Into<Value>) -> &mut Self {
        self.default = Some(Expr::Value(value.into()));
        self
    }

    /// A default given as a raw SQL expression.
    pub fn default_raw(&mut self, sql: &str) -> &mut Self {
        self.default = Some(Expr::Raw(sql.to_owned()));
        self
    }

    pub fn use_current(&mut self) -> &mut Self {
        self.use_current = true;
        self
    }

    pub fn unsigned(&mut self) -> &mut Self {
        self.unsigned = true;
        self
    }

    pub fn auto_increment(&mut self) -> &mut Self {
        self.auto_increment = true;
        self
    }

    pub fn primary(&mut self) -> &mut Self {
        self.primary = true;
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    pub fn index(&mut self) -> &mut Self {
        self.index = true;
        self
    }

    pub fn comment(&mut self, comment: &str) -> &mut Self {
        self.comment = Some(comment.to_owned());
        self
    }

    pub fn after(&mut self, column: &str) -> &mut Self {
        self.after = Some(column.to_owned());
        self
    }

    pub fn change(&mut self) -> &mut Self {
        self.change = true;
        self
    }

    /// References `id` on the table named after the column stem:
    /// `user_id` points at `users.id`.
    pub fn constrained(&mut self) -> &mut Self {
        let stem = self.name.strip_suffix("_id").unwrap_or(&self.name);
        let table = pluralizer::pluralize(stem, 2, false);
        self.constrained_on(&table)
    }

    pub fn constrained_on(&mut self, table: &str) -> &mut Self {
        let mut foreign = ForeignKeyDefinition::new(vec![self.name.clone()]);
        foreign.on(table);
        self.foreign = Some(foreign);
        self
    }

    /// Sets the referenced column of the constraint started by `constrained()`.
    pub fn references(&mut self, column: &str) -> &mut Self {
        let name = self.name.clone();
        self.foreign
            .get_or_insert_with(|| ForeignKeyDefinition::new(vec![name]))
            .references(&[column]);
        self
    }

    pub fn on(&mut self, table: &str) -> &mut Self {
        let name = self.name.clone();
        self.foreign
            .get_or_insert_with(|| ForeignKeyDefinition::new(vec![name]))
            .on(table);
        self
    }

    pub fn cascade_on_delete(&mut self) -> &mut Self {
        if let Some(foreign) = self.foreign.as_mut() {
            foreign.cascade_on_delete();
        }
        self
    }

    pub fn null_on_delete(&mut self) -> &mut Self {
        if let Some(foreign) = self.foreign.as_mut() {
            foreign.null_on_delete();
        }
        self
    }

    pub fn cascade_on_update(&mut self) -> &mut Self {
        if let Some(foreign) = self.foreign.as_mut() {
            foreign.cascade_on_update();
        }
        self
    }
}
