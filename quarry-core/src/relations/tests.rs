use std::sync::Arc;

use pretty_assertions::assert_eq;

use super::*;
use crate::model::EntityDef;
use crate::test_utils::MockDriver;
use crate::value::{Record, Row};

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), value.clone()))
        .collect()
}

fn schema() -> Arc<Registry> {
    let registry = Registry::new();
    registry.define(
        EntityDef::new("User")
            .relation("posts", RelationDef::has_many("Post"))
            .relation("profile", RelationDef::has_one("Profile"))
            .relation("roles", RelationDef::belongs_to_many("Role").with_pivot(&["level"]))
            .relation("children", RelationDef::has_many("User").foreign_key("parent_id"))
            .relation("tags", RelationDef::morph_to_many("Tag", "taggable")),
    );
    registry.define(
        EntityDef::new("Post")
            .relation("user", RelationDef::belongs_to("User"))
            .relation("author", RelationDef::belongs_to("User"))
            .relation("comments", RelationDef::morph_many("Comment", "commentable")),
    );
    registry.define(EntityDef::new("Profile"));
    registry.define(EntityDef::new("Role"));
    registry.define(EntityDef::new("Tag").relation("users", RelationDef::morphed_by_many("User", "taggable")));
    registry.define(EntityDef::new("Video"));
    registry.define(EntityDef::new("Comment").relation("commentable", RelationDef::morph_to()));
    registry.define(
        EntityDef::new("Country").relation("posts", RelationDef::has_many_through("Post", "User")),
    );
    registry
}

fn setup() -> (MockDriver, Connection, Arc<Registry>) {
    let registry = schema();
    let driver = MockDriver::new();
    let conn = Connection::from_driver(driver.clone(), "").with_registry(registry.clone());
    (driver, conn, registry)
}

fn persisted(registry: &Arc<Registry>, entity: &str, pairs: &[(&str, Value)]) -> Model {
    let meta = registry.meta(entity).unwrap();
    Model::from_row(meta, registry.clone(), row(pairs))
}

#[test]
fn conventional_keys() {
    let registry = schema();
    let user = registry.meta("User").unwrap();
    let post = registry.meta("Post").unwrap();
    let role = registry.meta("Role").unwrap();

    let shape = post.relation("author").unwrap().resolve("author", &post, &user, None, &registry).unwrap();
    assert!(matches!(
        shape,
        Shape::BelongsTo { ref foreign_key, ref owner_key } if foreign_key == "author_id" && owner_key == "id"
    ));

    let shape = user.relation("roles").unwrap().resolve("roles", &user, &role, None, &registry).unwrap();
    let Shape::BelongsToMany(pivot) = shape else {
        panic!("expected a pivot shape");
    };
    assert_eq!(pivot.table, "role_user");
    assert_eq!(pivot.foreign_pivot_key, "user_id");
    assert_eq!(pivot.related_pivot_key, "role_id");
}

#[test]
fn has_many_constrains_by_parent_key() {
    let (_, conn, registry) = setup();
    let user = persisted(&registry, "User", &[("id", Value::Int(1))]);
    let relation = user.relation(&conn, "posts").unwrap();
    assert_eq!(
        relation.to_sql(),
        "select * from \"posts\" where \"posts\".\"user_id\" = ? and \"posts\".\"user_id\" is not null"
    );
    assert_eq!(relation.bindings(), vec![Value::Int(1)]);
    assert!(relation.is_many());
}

#[test]
fn belongs_to_constrains_by_owner_key() {
    let (_, conn, registry) = setup();
    let post = persisted(&registry, "Post", &[("id", Value::Int(3)), ("user_id", Value::Int(9))]);
    let relation = post.relation(&conn, "user").unwrap();
    assert_eq!(relation.to_sql(), "select * from \"users\" where \"users\".\"id\" = ?");
    assert_eq!(relation.bindings(), vec![Value::Int(9)]);
}

#[test]
fn belongs_to_many_selects_pivot_columns() {
    let (_, conn, registry) = setup();
    let user = persisted(&registry, "User", &[("id", Value::Int(1))]);
    let relation = user.relation(&conn, "roles").unwrap();
    assert_eq!(
        relation.to_sql(),
        "select \"roles\".*, \"role_user\".\"user_id\" as \"pivot_user_id\", \
         \"role_user\".\"role_id\" as \"pivot_role_id\", \"role_user\".\"level\" as \"pivot_level\" \
         from \"roles\" inner join \"role_user\" on \"roles\".\"id\" = \"role_user\".\"role_id\" \
         where \"role_user\".\"user_id\" = ?"
    );
}

#[test]
fn morph_many_filters_on_type() {
    let (_, conn, registry) = setup();
    let post = persisted(&registry, "Post", &[("id", Value::Int(4))]);
    let relation = post.relation(&conn, "comments").unwrap();
    assert_eq!(
        relation.to_sql(),
        "select * from \"comments\" where \"comments\".\"commentable_id\" = ? \
         and \"comments\".\"commentable_id\" is not null and \"comments\".\"commentable_type\" = ?"
    );
    assert_eq!(relation.bindings(), vec![Value::Int(4), Value::from("Post")]);
}

#[test]
fn morph_map_alias_is_stored_in_type_column() {
    let (_, conn, registry) = setup();
    registry.morph_map_entity("post", crate::model::EntityRef::named("Post"));
    let post = persisted(&registry, "Post", &[("id", Value::Int(4))]);
    let relation = post.relation(&conn, "comments").unwrap();
    assert_eq!(relation.bindings(), vec![Value::Int(4), Value::from("post")]);
}

#[test]
fn has_many_through_joins_intermediate_table() {
    let (_, conn, registry) = setup();
    let country = persisted(&registry, "Country", &[("id", Value::Int(2))]);
    let relation = country.relation(&conn, "posts").unwrap();
    assert_eq!(
        relation.to_sql(),
        "select \"posts\".*, \"users\".\"country_id\" as \"quarry_through_key\" from \"posts\" \
         inner join \"users\" on \"users\".\"id\" = \"posts\".\"user_id\" \
         where \"users\".\"country_id\" = ?"
    );
}

#[test]
fn has_compiles_correlated_exists() {
    let (_, conn, registry) = setup();
    let query = conn
        .query_for(registry.meta("User").unwrap())
        .has("posts")
        .unwrap();
    assert_eq!(
        query.to_sql(),
        "select * from \"users\" where exists (select * from \"posts\" \
         where \"posts\".\"user_id\" = \"users\".\"id\")"
    );
}

#[test]
fn has_count_compiles_count_subquery() {
    let (_, conn, registry) = setup();
    let query = conn
        .query_for(registry.meta("User").unwrap())
        .has_count("posts", ">=", 3)
        .unwrap();
    assert_eq!(
        query.to_sql(),
        "select * from \"users\" where (select count(*) from \"posts\" \
         where \"posts\".\"user_id\" = \"users\".\"id\") >= 3"
    );
}

#[test]
fn where_doesnt_have_with_callback() {
    let (_, conn, registry) = setup();
    let query = conn
        .query_for(registry.meta("User").unwrap())
        .where_doesnt_have("posts", |posts| posts.filter_eq("published", true))
        .unwrap();
    assert_eq!(
        query.to_sql(),
        "select * from \"users\" where not exists (select * from \"posts\" \
         where \"posts\".\"user_id\" = \"users\".\"id\" and \"published\" = ?)"
    );
    assert_eq!(query.bindings(), vec![Value::Bool(true)]);
}

#[test]
fn self_relation_existence_aliases_table() {
    let (_, conn, registry) = setup();
    let query = conn
        .query_for(registry.meta("User").unwrap())
        .has("children")
        .unwrap();
    assert_eq!(
        query.to_sql(),
        "select * from \"users\" where exists (select * from \"users\" as \"quarry_reserved_0\" \
         where \"quarry_reserved_0\".\"parent_id\" = \"users\".\"id\")"
    );
}

#[test]
fn each_self_join_takes_a_new_alias() {
    let (_, conn, registry) = setup();
    let user = registry.meta("User").unwrap();
    let first = conn.query_for(user.clone()).has("children").unwrap();
    let second = conn.query_for(user).has("children").unwrap();
    assert!(first.to_sql().contains("as \"quarry_reserved_0\""));
    assert!(second.to_sql().contains("as \"quarry_reserved_1\""));
    assert!(!second.to_sql().contains("quarry_reserved_0"));
}

#[test]
fn morph_to_existence_is_unsupported() {
    let (_, conn, registry) = setup();
    let result = conn
        .query_for(registry.meta("Comment").unwrap())
        .has("commentable");
    assert!(matches!(result, Err(QuarryError::Unsupported(_))));
}

#[test]
fn unknown_relation_is_a_definition_error() {
    let (_, conn, registry) = setup();
    let result = conn.query_for(registry.meta("User").unwrap()).has("ghosts");
    assert!(matches!(result, Err(QuarryError::RelationshipDefinition { .. })));
}

#[tokio::test]
async fn eager_load_matches_children_to_parents() {
    let (driver, mut conn, registry) = setup();
    driver
        .push_rows(vec![
            row(&[("id", Value::Int(1))]),
            row(&[("id", Value::Int(2))]),
        ])
        .push_rows(vec![
            row(&[("id", Value::Int(10)), ("user_id", Value::Int(1))]),
            row(&[("id", Value::Int(11)), ("user_id", Value::Int(1))]),
        ]);

    let users = conn
        .query_for(registry.meta("User").unwrap())
        .with(&["posts"])
        .get(&mut conn)
        .await
        .unwrap();

    let statements = driver.statements();
    assert_eq!(statements.len(), 2);
    assert_eq!(
        statements[1],
        "select * from \"posts\" where \"posts\".\"user_id\" in (?, ?)"
    );
    assert_eq!(users.get(0).unwrap().many("posts").unwrap().len(), 2);
    assert!(users.get(1).unwrap().many("posts").unwrap().is_empty());
}

#[tokio::test]
async fn eager_belongs_to_shares_owner_between_children() {
    let (driver, mut conn, registry) = setup();
    driver
        .push_rows(vec![
            row(&[("id", Value::Int(1)), ("user_id", Value::Int(5))]),
            row(&[("id", Value::Int(2)), ("user_id", Value::Int(5))]),
            row(&[("id", Value::Int(3)), ("user_id", Value::Null)]),
        ])
        .push_rows(vec![row(&[("id", Value::Int(5)), ("name", Value::from("ann"))])]);

    let posts = conn
        .query_for(registry.meta("Post").unwrap())
        .with(&["user"])
        .get(&mut conn)
        .await
        .unwrap();

    assert_eq!(driver.bindings()[1], vec![Value::Int(5)]);
    for post in posts.iter().take(2) {
        assert_eq!(post.one("user").unwrap().get_raw("name"), Value::from("ann"));
    }
    assert!(posts.get(2).unwrap().relation_loaded("user"));
    assert!(posts.get(2).unwrap().one("user").is_none());
}

#[tokio::test]
async fn eager_belongs_to_many_hydrates_pivot() {
    let (driver, mut conn, registry) = setup();
    driver
        .push_rows(vec![row(&[("id", Value::Int(1))])])
        .push_rows(vec![row(&[
            ("id", Value::Int(7)),
            ("name", Value::from("admin")),
            ("pivot_user_id", Value::Int(1)),
            ("pivot_role_id", Value::Int(7)),
            ("pivot_level", Value::Int(3)),
        ])]);

    let users = conn
        .query_for(registry.meta("User").unwrap())
        .with(&["roles"])
        .get(&mut conn)
        .await
        .unwrap();

    let roles = users.get(0).unwrap().many("roles").unwrap();
    let role = roles.get(0).unwrap();
    assert!(!role.has_attribute("pivot_level"));
    let pivot = role.one("pivot").unwrap();
    assert_eq!(pivot.get_raw("level"), Value::Int(3));
    assert_eq!(pivot.get_raw("user_id"), Value::Int(1));
}

#[tokio::test]
async fn eager_morph_to_queries_each_type_once() {
    let (driver, mut conn, registry) = setup();
    driver
        .push_rows(vec![
            row(&[
                ("id", Value::Int(1)),
                ("commentable_type", Value::from("Post")),
                ("commentable_id", Value::Int(5)),
            ]),
            row(&[
                ("id", Value::Int(2)),
                ("commentable_type", Value::from("Video")),
                ("commentable_id", Value::Int(8)),
            ]),
            row(&[
                ("id", Value::Int(3)),
                ("commentable_type", Value::from("Post")),
                ("commentable_id", Value::Int(6)),
            ]),
        ])
        .push_rows(vec![
            row(&[("id", Value::Int(5))]),
            row(&[("id", Value::Int(6))]),
        ])
        .push_rows(vec![row(&[("id", Value::Int(8))])]);

    let comments = conn
        .query_for(registry.meta("Comment").unwrap())
        .with(&["commentable"])
        .get(&mut conn)
        .await
        .unwrap();

    let statements = driver.statements();
    assert_eq!(statements.len(), 3);
    assert_eq!(statements[1], "select * from \"posts\" where \"posts\".\"id\" in (?, ?)");
    assert_eq!(statements[2], "select * from \"videos\" where \"videos\".\"id\" in (?)");
    let owner = comments.get(1).unwrap().one("commentable").unwrap();
    assert_eq!(owner.entity_name(), "Video");
    assert_eq!(comments.get(2).unwrap().one("commentable").unwrap().key(), Value::Int(6));
}

#[tokio::test]
async fn eager_has_many_through_strips_intermediate_key() {
    let (driver, mut conn, registry) = setup();
    driver
        .push_rows(vec![row(&[("id", Value::Int(2))])])
        .push_rows(vec![row(&[
            ("id", Value::Int(30)),
            ("user_id", Value::Int(4)),
            ("quarry_through_key", Value::Int(2)),
        ])]);

    let countries = conn
        .query_for(registry.meta("Country").unwrap())
        .with(&["posts"])
        .get(&mut conn)
        .await
        .unwrap();

    let posts = countries.get(0).unwrap().many("posts").unwrap();
    assert_eq!(posts.len(), 1);
    assert!(!posts.get(0).unwrap().has_attribute("quarry_through_key"));
}

#[tokio::test]
async fn lazy_load_with_null_key_skips_query() {
    let (driver, mut conn, registry) = setup();
    let mut post = persisted(&registry, "Post", &[("id", Value::Int(1)), ("user_id", Value::Null)]);
    let loaded = post.related(&mut conn, "user").await.unwrap();
    assert!(loaded.as_one().is_none());
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn related_is_cached_after_first_access() {
    let (driver, mut conn, registry) = setup();
    driver.push_rows(vec![row(&[("id", Value::Int(10)), ("user_id", Value::Int(1))])]);
    let mut user = persisted(&registry, "User", &[("id", Value::Int(1))]);

    assert_eq!(user.related(&mut conn, "posts").await.unwrap().models().len(), 1);
    assert_eq!(user.related(&mut conn, "posts").await.unwrap().models().len(), 1);
    assert_eq!(driver.statements().len(), 1);
}

#[tokio::test]
async fn sync_detaches_stale_and_attaches_new() {
    let (driver, mut conn, registry) = setup();
    driver.push_rows(vec![
        row(&[("role_id", Value::Int(1))]),
        row(&[("role_id", Value::Int(2))]),
    ]);
    let user = persisted(&registry, "User", &[("id", Value::Int(1))]);

    let changes = user
        .relation(&conn, "roles")
        .unwrap()
        .sync(&mut conn, [2, 3])
        .await
        .unwrap();

    assert_eq!(changes.attached, vec![Value::Int(3)]);
    assert_eq!(changes.detached, vec![Value::Int(1)]);
    assert!(changes.updated.is_empty());

    let statements = driver.statements();
    assert_eq!(
        statements[0],
        "select \"role_id\" from \"role_user\" where \"user_id\" = ?"
    );
    assert_eq!(
        statements[1],
        "delete from \"role_user\" where \"user_id\" = ? and \"role_id\" in (?)"
    );
    assert!(statements[2].starts_with("insert into \"role_user\""));
    assert_eq!(driver.bindings()[2], vec![Value::Int(1), Value::Int(3)]);
}

#[tokio::test]
async fn morph_to_many_attach_writes_type_column() {
    let (driver, mut conn, registry) = setup();
    let user = persisted(&registry, "User", &[("id", Value::Int(1))]);
    user.relation(&conn, "tags")
        .unwrap()
        .attach(&mut conn, [4], Record::new())
        .await
        .unwrap();
    assert_eq!(
        driver.statements()[0],
        "insert into \"taggables\" (\"taggable_id\", \"tag_id\", \"taggable_type\") values (?, ?, ?)"
    );
    assert_eq!(
        driver.bindings()[0],
        vec![Value::Int(1), Value::Int(4), Value::from("User")]
    );
}

#[tokio::test]
async fn pivot_operations_need_a_saved_parent() {
    let (_, mut conn, registry) = setup();
    let user = registry.make_for(registry.meta("User").unwrap());
    let result = user
        .relation(&conn, "roles")
        .unwrap()
        .attach(&mut conn, [1], Record::new())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn saving_through_has_many_sets_foreign_key() {
    let (driver, mut conn, registry) = setup();
    driver.push_executed(1, Some(12));
    let user = persisted(&registry, "User", &[("id", Value::Int(1))]);
    let mut post = registry.make_for(registry.meta("Post").unwrap());
    post.set_raw("title", "hello");

    user.relation(&conn, "posts").unwrap().save(&mut conn, &mut post).await.unwrap();

    assert_eq!(post.get_raw("user_id"), Value::Int(1));
    assert_eq!(post.key(), Value::Int(12));
    assert!(post.exists());
}

#[test]
fn associate_and_dissociate_belongs_to() {
    let registry = schema();
    let user = persisted(&registry, "User", &[("id", Value::Int(5))]);
    let mut post = registry.make_for(registry.meta("Post").unwrap());

    post.associate("user", &user).unwrap();
    assert_eq!(post.get_raw("user_id"), Value::Int(5));
    assert_eq!(post.one("user").unwrap().key(), Value::Int(5));

    post.dissociate("user").unwrap();
    assert_eq!(post.get_raw("user_id"), Value::Null);
    assert!(post.one("user").is_none());
}

#[test]
fn dissociate_uses_owner_primary_key() {
    let registry = Registry::new();
    registry.define(EntityDef::new("Account").primary_key("uid"));
    registry.define(EntityDef::new("Invoice").relation("account", RelationDef::belongs_to("Account")));
    let mut invoice = persisted(
        &registry,
        "Invoice",
        &[("id", Value::Int(1)), ("account_uid", Value::Int(7))],
    );

    invoice.dissociate("account").unwrap();

    assert_eq!(invoice.get_raw("account_uid"), Value::Null);
    let keys: Vec<&str> = invoice.attributes().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["id", "account_uid"]);
    assert_eq!(invoice.get_dirty(), row(&[("account_uid", Value::Null)]));
}

#[test]
fn dissociate_honors_explicit_foreign_key() {
    let registry = Registry::new();
    registry.define(EntityDef::new("Account").primary_key("uid"));
    registry.define(
        EntityDef::new("Invoice")
            .relation("payer", RelationDef::belongs_to("Account").foreign_key("billed_to")),
    );
    let account = persisted(&registry, "Account", &[("uid", Value::Int(3))]);
    let mut invoice = persisted(
        &registry,
        "Invoice",
        &[("id", Value::Int(1)), ("billed_to", Value::Null)],
    );

    invoice.associate("payer", &account).unwrap();
    assert_eq!(invoice.get_raw("billed_to"), Value::Int(3));

    invoice.dissociate("payer").unwrap();
    assert_eq!(invoice.get_raw("billed_to"), Value::Null);
    let keys: Vec<&str> = invoice.attributes().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["id", "billed_to"]);
    assert!(invoice.is_clean());
}

#[test]
fn associate_morph_to_stores_alias() {
    let registry = schema();
    let video = persisted(&registry, "Video", &[("id", Value::Int(8))]);
    let mut comment = registry.make_for(registry.meta("Comment").unwrap());
    comment.associate("commentable", &video).unwrap();
    assert_eq!(comment.get_raw("commentable_type"), Value::from("Video"));
    assert_eq!(comment.get_raw("commentable_id"), Value::Int(8));
    assert!(comment.associate("commentable", &video).is_ok());
    assert!(persisted(&registry, "User", &[("id", Value::Int(1))])
        .associate("posts", &video)
        .is_err());
}
