use super::column::{ColumnDefinition, ColumnType, ForeignKeyDefinition};
use super::grammar::SchemaGrammar;
use crate::error::Result;

/// Columns of an index command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCommand {
    pub name: String,
    pub columns: Vec<String>,
}

/// A table-level command compiled independently by the schema grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create,
    /// Implied when an existing table gains columns.
    Add,
    /// Implied when columns are marked with `change()`.
    Change,
    Drop,
    DropIfExists,
    Rename { to: String },
    DropColumn { columns: Vec<String> },
    RenameColumn { from: String, to: String },
    Primary(IndexCommand),
    Unique(IndexCommand),
    Index(IndexCommand),
    Foreign(ForeignKeyDefinition),
    DropPrimary { name: String },
    DropUnique { name: String },
    DropIndex { name: String },
    DropForeign { name: String },
    RenameIndex { from: String, to: String },
}

/// Accumulates the columns and commands for one table.
///
/// Nothing is compiled until [`Blueprint::to_sql`] runs; at that point the
/// implied `add` / `change` commands and every fluent column index are
/// expanded into explicit commands, in that order.
#[derive(Debug, Clone)]
pub struct Blueprint {
    table: String,
    prefix: String,
    columns: Vec<ColumnDefinition>,
    commands: Vec<Command>,
    foreign_keys: Vec<ForeignKeyDefinition>,
    /// MySQL table options.
    pub engine: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub temporary: bool,
}

impl Blueprint {
    pub fn new(table: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            prefix: prefix.into(),
            columns: Vec::new(),
            commands: Vec::new(),
            foreign_keys: Vec::new(),
            engine: None,
            charset: None,
            collation: None,
            temporary: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Columns being added (not changed).
    pub fn added_columns(&self) -> Vec<&ColumnDefinition> {
        self.columns.iter().filter(|c| !c.change).collect()
    }

    pub fn changed_columns(&self) -> Vec<&ColumnDefinition> {
        self.columns.iter().filter(|c| c.change).collect()
    }

    pub fn creating(&self) -> bool {
        self.commands.iter().any(|c| matches!(c, Command::Create))
    }

    /// Every foreign key: explicit `foreign()` calls plus constrained columns.
    pub fn foreign_keys(&self) -> Vec<ForeignKeyDefinition> {
        let mut keys = self.foreign_keys.clone();
        keys.extend(self.columns.iter().filter_map(|c| c.foreign.clone()));
        keys.into_iter()
            .map(|mut key| {
                if key.name.is_none() {
                    key.name = Some(self.index_name("foreign", &key.columns));
                }
                key
            })
            .collect()
    }

    /// The fully expanded command list, in compile order.
    pub fn expanded_commands(&self) -> Vec<Command> {
        let mut commands = Vec::with_capacity(self.commands.len() + 2);
        if !self.creating() {
            if !self.changed_columns().is_empty() {
                commands.push(Command::Change);
            }
            if !self.added_columns().is_empty() {
                commands.push(Command::Add);
            }
        }
        commands.extend(self.commands.iter().cloned());
        for column in &self.columns {
            let columns = vec![column.name.clone()];
            if column.primary {
                commands.push(Command::Primary(self.index_command("primary", columns.clone())));
            }
            if column.unique {
                commands.push(Command::Unique(self.index_command("unique", columns.clone())));
            }
            if column.index {
                commands.push(Command::Index(self.index_command("index", columns)));
            }
        }
        commands.extend(self.foreign_keys().into_iter().map(Command::Foreign));
        commands
    }

    /// Compiles every command into DDL statements.
    pub fn to_sql(&self, grammar: &dyn SchemaGrammar) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        for command in self.expanded_commands() {
            statements.extend(grammar.compile(self, &command)?);
        }
        Ok(statements)
    }

    /// `{prefix}{table}_{columns}_{kind}`, lowercased with `-` and `.` replaced.
    pub fn index_name(&self, kind: &str, columns: &[String]) -> String {
        format!("{}{}_{}_{}", self.prefix, self.table, columns.join("_"), kind)
            .to_ascii_lowercase()
            .replace(['-', '.'], "_")
    }

    fn index_command(&self, kind: &str, columns: Vec<String>) -> IndexCommand {
        IndexCommand {
            name: self.index_name(kind, &columns),
            columns,
        }
    }

    fn owned(columns: &[&str]) -> Vec<String> {
        columns.iter().map(|c| (*c).to_owned()).collect()
    }

    // ----------------------------------------------------------------------
    // table commands
    // ----------------------------------------------------------------------

    pub fn create(&mut self) -> &mut Self {
        self.commands.push(Command::Create);
        self
    }

    pub fn drop(&mut self) -> &mut Self {
        self.commands.push(Command::Drop);
        self
    }

    pub fn drop_if_exists(&mut self) -> &mut Self {
        self.commands.push(Command::DropIfExists);
        self
    }

    pub fn rename(&mut self, to: &str) -> &mut Self {
        self.commands.push(Command::Rename { to: to.to_owned() });
        self
    }

    pub fn drop_column(&mut self, columns: &[&str]) -> &mut Self {
        self.commands.push(Command::DropColumn {
            columns: Self::owned(columns),
        });
        self
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> &mut Self {
        self.commands.push(Command::RenameColumn {
            from: from.to_owned(),
            to: to.to_owned(),
        });
        self
    }

    pub fn primary(&mut self, columns: &[&str]) -> &mut Self {
        let command = self.index_command("primary", Self::owned(columns));
        self.commands.push(Command::Primary(command));
        self
    }

    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        let command = self.index_command("unique", Self::owned(columns));
        self.commands.push(Command::Unique(command));
        self
    }

    pub fn unique_named(&mut self, columns: &[&str], name: &str) -> &mut Self {
        self.commands.push(Command::Unique(IndexCommand {
            name: name.to_owned(),
            columns: Self::owned(columns),
        }));
        self
    }

    pub fn index(&mut self, columns: &[&str]) -> &mut Self {
        let command = self.index_command("index", Self::owned(columns));
        self.commands.push(Command::Index(command));
        self
    }

    pub fn index_named(&mut self, columns: &[&str], name: &str) -> &mut Self {
        self.commands.push(Command::Index(IndexCommand {
            name: name.to_owned(),
            columns: Self::owned(columns),
        }));
        self
    }

    /// Starts a foreign key; chain `references(..).on(..)`.
    pub fn foreign(&mut self, columns: &[&str]) -> &mut ForeignKeyDefinition {
        let idx = self.foreign_keys.len();
        self.foreign_keys
            .push(ForeignKeyDefinition::new(Self::owned(columns)));
        &mut self.foreign_keys[idx]
    }

    pub fn drop_primary(&mut self) -> &mut Self {
        let name = self.index_name("primary", &[]);
        self.commands.push(Command::DropPrimary { name });
        self
    }

    /// Drops the unique index generated for `columns`.
    pub fn drop_unique(&mut self, columns: &[&str]) -> &mut Self {
        let name = self.index_name("unique", &Self::owned(columns));
        self.commands.push(Command::DropUnique { name });
        self
    }

    pub fn drop_index(&mut self, columns: &[&str]) -> &mut Self {
        let name = self.index_name("index", &Self::owned(columns));
        self.commands.push(Command::DropIndex { name });
        self
    }

    pub fn drop_index_named(&mut self, name: &str) -> &mut Self {
        self.commands.push(Command::DropIndex {
            name: name.to_owned(),
        });
        self
    }

    pub fn drop_foreign(&mut self, columns: &[&str]) -> &mut Self {
        let name = self.index_name("foreign", &Self::owned(columns));
        self.commands.push(Command::DropForeign { name });
        self
    }

    pub fn rename_index(&mut self, from: &str, to: &str) -> &mut Self {
        self.commands.push(Command::RenameIndex {
            from: from.to_owned(),
            to: to.to_owned(),
        });
        self
    }

    // ----------------------------------------------------------------------
    // columns
    // ----------------------------------------------------------------------

    /// Adds a column of any type.
    pub fn add_column(&mut self, name: &str, kind: ColumnType) -> &mut ColumnDefinition {
        let idx = self.columns.len();
        self.columns.push(ColumnDefinition::new(name, kind));
        &mut self.columns[idx]
    }

    /// Auto-incrementing unsigned integer primary key.
    pub fn increments(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Integer)
            .unsigned()
            .auto_increment()
    }

    pub fn big_increments(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::BigInteger)
            .unsigned()
            .auto_increment()
    }

    /// `big_increments("id")`.
    pub fn id(&mut self) -> &mut ColumnDefinition {
        self.big_increments("id")
    }

    pub fn tiny_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::TinyInteger)
    }

    pub fn small_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::SmallInteger)
    }

    pub fn integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Integer)
    }

    pub fn big_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::BigInteger)
    }

    pub fn unsigned_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.integer(name).unsigned()
    }

    pub fn unsigned_big_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.big_integer(name).unsigned()
    }

    /// Unsigned big integer meant to reference another table's `id`.
    pub fn foreign_id(&mut self, name: &str) -> &mut ColumnDefinition {
        self.unsigned_big_integer(name)
    }

    pub fn string(&mut self, name: &str, length: u32) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::String(length))
    }

    pub fn char(&mut self, name: &str, length: u32) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Char(length))
    }

    pub fn text(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Text)
    }

    pub fn medium_text(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::MediumText)
    }

    pub fn long_text(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::LongText)
    }

    pub fn boolean(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Boolean)
    }

    pub fn float(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Float)
    }

    pub fn double(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Double)
    }

    pub fn decimal(&mut self, name: &str, total: u8, places: u8) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Decimal { total, places })
    }

    pub fn date(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Date)
    }

    pub fn date_time(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::DateTime)
    }

    pub fn timestamp(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Timestamp)
    }

    pub fn time(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Time)
    }

    pub fn json(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Json)
    }

    pub fn binary(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Binary)
    }

    pub fn uuid(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Uuid)
    }

    pub fn enumeration(&mut self, name: &str, values: &[&str]) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Enum(Self::owned(values)))
    }

    /// Nullable `created_at` and `updated_at`.
    pub fn timestamps(&mut self) {
        self.timestamp("created_at").nullable();
        self.timestamp("updated_at").nullable();
    }

    pub fn nullable_timestamps(&mut self) {
        self.timestamps();
    }

    /// Nullable `deleted_at` used by soft deleting entities.
    pub fn soft_deletes(&mut self) -> &mut ColumnDefinition {
        self.timestamp("deleted_at").nullable()
    }

    /// `{name}_type` and `{name}_id` plus a composite index.
    pub fn morphs(&mut self, name: &str) {
        let (kind, id) = (format!("{name}_type"), format!("{name}_id"));
        self.string(&kind, 255);
        self.unsigned_big_integer(&id);
        self.index(&[kind.as_str(), id.as_str()]);
    }

    pub fn nullable_morphs(&mut self, name: &str) {
        let (kind, id) = (format!("{name}_type"), format!("{name}_id"));
        self.string(&kind, 255).nullable();
        self.unsigned_big_integer(&id).nullable();
        self.index(&[kind.as_str(), id.as_str()]);
    }

    pub fn remember_token(&mut self) -> &mut ColumnDefinition {
        self.string("remember_token", 100).nullable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implied_commands_lead_for_existing_tables() {
        let mut table = Blueprint::new("users", "");
        table.string("nickname", 50).nullable();
        table.integer("votes").change();
        table.drop_column(&["legacy"]);
        let commands = table.expanded_commands();
        assert_eq!(commands[0], Command::Change);
        assert_eq!(commands[1], Command::Add);
        assert!(matches!(commands[2], Command::DropColumn { .. }));
    }

    #[test]
    fn creating_tables_do_not_imply_add() {
        let mut table = Blueprint::new("users", "");
        table.create();
        table.id();
        assert_eq!(table.expanded_commands(), vec![Command::Create]);
    }

    #[test]
    fn fluent_indexes_expand_with_generated_names() {
        let mut table = Blueprint::new("users", "app_");
        table.create();
        table.string("email", 255).unique();
        table.string("Last-Name", 100).index();
        let commands = table.expanded_commands();
        assert_eq!(
            commands[1],
            Command::Unique(IndexCommand {
                name: "app_users_email_unique".to_owned(),
                columns: vec!["email".to_owned()],
            })
        );
        assert!(matches!(
            &commands[2],
            Command::Index(IndexCommand { name, .. }) if name == "app_users_last_name_index"
        ));
    }

    #[test]
    fn constrained_infers_table_from_column_stem() {
        let mut table = Blueprint::new("posts", "");
        table.foreign_id("user_id").constrained().cascade_on_delete();
        table.foreign_id("category_id").constrained();
        let keys = table.foreign_keys();
        assert_eq!(keys[0].on, "users");
        assert_eq!(keys[0].references, vec!["id".to_owned()]);
        assert_eq!(keys[0].name.as_deref(), Some("posts_user_id_foreign"));
        assert_eq!(keys[1].on, "categories");
    }

    #[test]
    fn morphs_add_type_id_and_index() {
        let mut table = Blueprint::new("comments", "");
        table.morphs("commentable");
        let names: Vec<_> = table.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["commentable_type", "commentable_id"]);
        assert!(matches!(
            &table.commands()[0],
            Command::Index(IndexCommand { name, .. })
                if name == "comments_commentable_type_commentable_id_index"
        ));
    }
}
