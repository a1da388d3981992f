use quarry_orm::async_trait::async_trait;
use quarry_orm::prelude::*;
use quarry_orm::test_utils::memory_connection;
use quarry_orm::{QuarryError, SqlMigration};

struct CreateAccounts;

#[async_trait]
impl Migration for CreateAccounts {
    fn name(&self) -> &str {
        "2024_01_01_000000_create_accounts"
    }

    async fn up(&self, conn: &mut Connection) -> quarry_orm::Result<()> {
        conn.schema()
            .create("accounts", |table| {
                table.id();
                table.string("email", 120).unique();
                table.boolean("active").default(true);
                table.timestamps();
            })
            .await
    }
}

#[tokio::test]
async fn sqlite_schema_alters_and_inspects_tables() {
    let mut conn = memory_connection().await.expect("connection");
    let mut schema = conn.schema();
    schema
        .create("drafts", |table| {
            table.id();
            table.string("title", 100);
        })
        .await
        .expect("create");
    schema
        .table("drafts", |table| {
            table.text("body").nullable();
        })
        .await
        .expect("add column");
    assert!(schema.has_column("drafts", "body").await.expect("has_column"));
    assert_eq!(
        schema.column_listing("drafts").await.expect("columns"),
        vec!["id", "title", "body"]
    );

    schema.rename("drafts", "articles").await.expect("rename");
    assert!(!schema.has_table("drafts").await.expect("has_table"));
    assert!(schema.has_table("articles").await.expect("has_table"));

    let dropped = schema
        .table("articles", |table| {
            table.drop_foreign(&["user_id"]);
        })
        .await;
    assert!(matches!(dropped, Err(QuarryError::Unsupported(_))));

    schema.drop_if_exists("articles").await.expect("drop");
    schema.drop_if_exists("articles").await.expect("drop twice");
    assert!(!schema.has_table("articles").await.expect("has_table"));
}

#[tokio::test]
async fn sqlite_migrator_mixes_code_and_sql_migrations() {
    let mut conn = memory_connection().await.expect("connection");
    let migrator = Migrator::new().add(CreateAccounts).add(SqlMigration::new(
        "2024_02_01_000000_seed_accounts",
        "insert into accounts (email, active) values ('ops@example.com', 0)",
    ));

    let applied = migrator.run(&mut conn).await.expect("run");
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0], "2024_01_01_000000_create_accounts");

    let active = conn
        .table("accounts")
        .filter_eq("email", "ops@example.com")
        .value(&mut conn, "active")
        .await
        .expect("value");
    assert_eq!(active, Some(Value::Int(0)));

    conn.table("accounts")
        .insert(&mut conn, vec![record([("email", "dev@example.com")])])
        .await
        .expect("insert");
    let defaulted = conn
        .table("accounts")
        .filter_eq("email", "dev@example.com")
        .value(&mut conn, "active")
        .await
        .expect("value");
    assert_eq!(defaulted, Some(Value::Int(1)));
}
