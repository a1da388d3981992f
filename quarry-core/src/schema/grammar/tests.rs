use pretty_assertions::assert_eq;

use super::*;
use crate::schema::ForeignAction;

fn sqlite() -> SqliteSchemaGrammar {
    SqliteSchemaGrammar::new("")
}

fn mysql() -> MySqlSchemaGrammar {
    MySqlSchemaGrammar::new("")
}

fn users(prefix: &str) -> Blueprint {
    let mut table = Blueprint::new("users", prefix);
    table.create();
    table.id();
    table.string("email", 255).unique();
    table.boolean("active").default(true);
    table.timestamps();
    table
}

#[test]
fn sqlite_create_emits_table_then_unique_index() {
    let sql = users("").to_sql(&sqlite()).unwrap();
    assert_eq!(
        sql,
        vec![
            "create table \"users\" (\"id\" integer primary key autoincrement not null, \
             \"email\" varchar not null, \"active\" tinyint(1) not null default '1', \
             \"created_at\" datetime null, \"updated_at\" datetime null)",
            "create unique index \"users_email_unique\" on \"users\" (\"email\")",
        ]
    );
}

#[test]
fn mysql_create_emits_separate_alter_for_unique() {
    let sql = users("").to_sql(&mysql()).unwrap();
    assert_eq!(
        sql,
        vec![
            "create table `users` (`id` bigint unsigned not null auto_increment primary key, \
             `email` varchar(255) not null, `active` tinyint(1) not null default '1', \
             `created_at` timestamp null, `updated_at` timestamp null)",
            "alter table `users` add unique `users_email_unique`(`email`)",
        ]
    );
}

#[test]
fn prefix_applies_to_tables_and_index_names() {
    let sql = users("app_").to_sql(&SqliteSchemaGrammar::new("app_")).unwrap();
    assert!(sql[0].starts_with("create table \"app_users\""));
    assert_eq!(
        sql[1],
        "create unique index \"app_users_email_unique\" on \"app_users\" (\"email\")"
    );
}

#[test]
fn sqlite_inlines_foreign_keys_at_creation() {
    let mut table = Blueprint::new("posts", "");
    table.create();
    table.id();
    table.foreign_id("user_id").constrained().cascade_on_delete();
    table.string("title", 120);
    let sql = table.to_sql(&sqlite()).unwrap();
    assert_eq!(sql.len(), 1);
    assert!(sql[0].ends_with(
        "foreign key (\"user_id\") references \"users\" (\"id\") on delete cascade)"
    ));
}

#[test]
fn mysql_adds_foreign_keys_with_alter() {
    let mut table = Blueprint::new("posts", "");
    table.create();
    table.id();
    table.unsigned_big_integer("user_id");
    table
        .foreign(&["user_id"])
        .references(&["id"])
        .on("users")
        .on_delete(ForeignAction::SetNull);
    let sql = table.to_sql(&mysql()).unwrap();
    assert_eq!(
        sql[1],
        "alter table `posts` add constraint `posts_user_id_foreign` foreign key (`user_id`) \
         references `users` (`id`) on delete set null"
    );
}

#[test]
fn composite_primary_key() {
    let mut table = Blueprint::new("role_user", "");
    table.create();
    table.integer("role_id");
    table.integer("user_id");
    table.primary(&["role_id", "user_id"]);
    let sqlite_sql = table.to_sql(&sqlite()).unwrap();
    assert_eq!(sqlite_sql.len(), 1);
    assert!(sqlite_sql[0].ends_with("primary key (\"role_id\", \"user_id\"))"));

    let mysql_sql = table.to_sql(&mysql()).unwrap();
    assert_eq!(
        mysql_sql[1],
        "alter table `role_user` add primary key (`role_id`, `user_id`)"
    );
}

#[test]
fn adding_columns_to_existing_tables() {
    let mut table = Blueprint::new("users", "");
    table.string("nickname", 50).nullable().after("email").comment("display");
    table.integer("votes").default(0);
    assert_eq!(
        table.to_sql(&sqlite()).unwrap(),
        vec![
            "alter table \"users\" add column \"nickname\" varchar null",
            "alter table \"users\" add column \"votes\" integer not null default '0'",
        ]
    );
    assert_eq!(
        table.to_sql(&mysql()).unwrap(),
        vec![
            "alter table `users` add `nickname` varchar(50) null comment 'display' after `email`, \
             add `votes` int not null default '0'"
        ]
    );
}

#[test]
fn sqlite_rejects_column_changes_and_foreign_drops() {
    let mut table = Blueprint::new("users", "");
    table.integer("votes").change();
    assert!(matches!(
        table.to_sql(&sqlite()),
        Err(crate::error::QuarryError::Unsupported(_))
    ));
    assert_eq!(
        table.to_sql(&mysql()).unwrap(),
        vec!["alter table `users` modify `votes` int not null"]
    );

    let mut table = Blueprint::new("posts", "");
    table.drop_foreign(&["user_id"]);
    assert!(table.to_sql(&sqlite()).is_err());
    assert_eq!(
        table.to_sql(&mysql()).unwrap(),
        vec!["alter table `posts` drop foreign key `posts_user_id_foreign`"]
    );
}

#[test]
fn table_level_commands() {
    let mut table = Blueprint::new("users", "");
    table.rename_column("name", "full_name");
    table.drop_column(&["a", "b"]);
    table.drop_index(&["email"]);
    assert_eq!(
        table.to_sql(&sqlite()).unwrap(),
        vec![
            "alter table \"users\" rename column \"name\" to \"full_name\"",
            "alter table \"users\" drop column \"a\"",
            "alter table \"users\" drop column \"b\"",
            "drop index \"users_email_index\"",
        ]
    );
    assert_eq!(
        table.to_sql(&mysql()).unwrap(),
        vec![
            "alter table `users` rename column `name` to `full_name`",
            "alter table `users` drop `a`, drop `b`",
            "alter table `users` drop index `users_email_index`",
        ]
    );

    let mut rename = Blueprint::new("users", "");
    rename.rename("people");
    assert_eq!(
        rename.to_sql(&sqlite()).unwrap(),
        vec!["alter table \"users\" rename to \"people\""]
    );
    assert_eq!(
        rename.to_sql(&mysql()).unwrap(),
        vec!["rename table `users` to `people`"]
    );
}

#[test]
fn column_types_per_dialect() {
    let mut table = Blueprint::new("items", "");
    table.create();
    table.decimal("price", 8, 2).unsigned();
    table.json("meta").nullable();
    table.enumeration("state", &["draft", "live"]);
    table.timestamp("seen_at").use_current();
    table.integer("counter").default_raw("1 + 1");

    let sqlite_sql = &table.to_sql(&sqlite()).unwrap()[0];
    assert!(sqlite_sql.contains("\"price\" numeric not null"));
    assert!(sqlite_sql.contains("\"meta\" text null"));
    assert!(sqlite_sql.contains("\"state\" varchar check (\"state\" in ('draft', 'live')) not null"));
    assert!(sqlite_sql.contains("\"seen_at\" datetime not null default CURRENT_TIMESTAMP"));

    let mysql_sql = &table.to_sql(&mysql()).unwrap()[0];
    assert!(mysql_sql.contains("`price` decimal(8, 2) unsigned not null"));
    assert!(mysql_sql.contains("`meta` json null"));
    assert!(mysql_sql.contains("`state` enum('draft', 'live') not null"));
    assert!(mysql_sql.contains("`counter` int not null default 1 + 1"));
}

#[test]
fn morphs_and_drop_statements() {
    let mut table = Blueprint::new("comments", "");
    table.create();
    table.id();
    table.morphs("commentable");
    let sql = table.to_sql(&sqlite()).unwrap();
    assert_eq!(
        sql[1],
        "create index \"comments_commentable_type_commentable_id_index\" on \"comments\" \
         (\"commentable_type\", \"commentable_id\")"
    );

    let mut drop = Blueprint::new("comments", "tmp_");
    drop.drop_if_exists();
    assert_eq!(
        drop.to_sql(&MySqlSchemaGrammar::new("tmp_")).unwrap(),
        vec!["drop table if exists `tmp_comments`"]
    );
}
