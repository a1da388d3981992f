use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::connection::Connection;
use crate::error::QuarryError;
use crate::test_utils::MockDriver;

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), value.clone()))
        .collect()
}

fn mock() -> (MockDriver, Connection) {
    let driver = MockDriver::new();
    let conn = Connection::from_driver(driver.clone(), "");
    (driver, conn)
}

fn user_def() -> EntityDef {
    EntityDef::new("User").fillable(&["name", "email", "options"])
}

fn persisted(def: EntityDef, pairs: &[(&str, Value)]) -> Model {
    let registry = Registry::new();
    let meta = registry.define(def);
    Model::from_row(meta, registry, row(pairs))
}

#[test]
fn loosely_equal_values_are_not_dirty() {
    let mut user = persisted(
        user_def(),
        &[("id", Value::Int(1)), ("name", Value::from("ann")), ("votes", Value::Int(5))],
    );
    user.set_raw("votes", "5");
    assert!(user.is_clean());

    user.set_attribute("name", "bob").unwrap();
    assert!(user.is_dirty());
    assert_eq!(user.get_dirty(), row(&[("name", Value::from("bob"))]));
    assert_eq!(user.get_original("name"), Value::from("ann"));
}

#[test]
fn date_attributes_compare_as_instants() {
    let mut user = persisted(
        user_def().timestamps(true),
        &[("id", Value::Int(1)), ("updated_at", Value::from("2024-01-02 03:04:05"))],
    );
    let same = Value::from("2024-01-02 03:04:05").as_datetime().unwrap();
    user.set_attribute("updated_at", same).unwrap();
    assert!(!user.is_dirty_any(&["updated_at"]));
    assert!(matches!(user.get_attribute("updated_at"), Value::DateTime(_)));
}

#[test]
fn json_casts_encode_on_write_and_decode_on_read() {
    let mut user = persisted(
        user_def().cast("options", Cast::Json),
        &[("id", Value::Int(1))],
    );
    user.set_attribute("options", json!({"theme": "dark"})).unwrap();
    assert_eq!(user.get_raw("options"), Value::from(r#"{"theme":"dark"}"#));
    assert_eq!(user.get_attribute("options"), Value::Json(json!({"theme": "dark"})));
}

#[test]
fn accessors_and_mutators_wrap_raw_values() {
    let def = user_def()
        .accessor("name", |_, value| {
            Value::from(value.as_str().unwrap_or_default().to_uppercase())
        })
        .mutator("email", |value| {
            Value::from(value.as_str().unwrap_or_default().to_lowercase())
        });
    let mut user = persisted(def, &[("id", Value::Int(1)), ("name", Value::from("ann"))]);
    user.set_attribute("email", "ANN@EXAMPLE.COM").unwrap();
    assert_eq!(user.get_attribute("name"), Value::from("ANN"));
    assert_eq!(user.get_raw("email"), Value::from("ann@example.com"));
}

#[test]
fn fill_skips_guarded_keys() {
    let mut user = persisted(user_def(), &[]);
    user.fill([("name", Value::from("ann")), ("is_admin", Value::Bool(true))])
        .unwrap();
    assert!(user.has_attribute("name"));
    assert!(!user.has_attribute("is_admin"));
}

#[test]
fn totally_guarded_entities_reject_fill() {
    let mut post = persisted(EntityDef::new("Post"), &[]);
    let err = post.fill([("title", "x")]).unwrap_err();
    assert!(matches!(err, QuarryError::MassAssignment { ref key, .. } if key == "title"));

    post.registry().clone().unguarded(|| {
        post.fill([("title", "x")]).unwrap();
    });
    assert_eq!(post.get_raw("title"), Value::from("x"));
}

#[test]
fn to_array_honors_hidden_and_relations() {
    let registry = Registry::new();
    let meta = registry.define(user_def().hidden(&["password"]));
    let post_meta = registry.define(EntityDef::new("Post"));
    let mut user = Model::from_row(
        meta,
        registry.clone(),
        row(&[
            ("id", Value::Int(1)),
            ("name", Value::from("ann")),
            ("password", Value::from("secret")),
        ]),
    );
    let post = Model::from_row(post_meta, registry, row(&[("id", Value::Int(9))]));
    user.set_relation("posts", Loaded::Many(Collection::from(vec![post])));

    assert_eq!(
        serde_json::to_value(&user).unwrap(),
        json!({"id": 1, "name": "ann", "posts": [{"id": 9}]})
    );
}

#[test]
fn replicate_drops_key_and_timestamps() {
    let user = persisted(
        user_def(),
        &[
            ("id", Value::Int(1)),
            ("name", Value::from("ann")),
            ("created_at", Value::from("2024-01-01 00:00:00")),
            ("updated_at", Value::from("2024-01-01 00:00:00")),
        ],
    );
    let copy = user.replicate(&[]);
    assert!(!copy.exists());
    assert_eq!(copy.attributes(), &row(&[("name", Value::from("ann"))]));
}

#[tokio::test]
async fn insert_takes_generated_key() {
    let (driver, mut conn) = mock();
    driver.push_executed(1, Some(7));
    let registry = Registry::new();
    let mut user = registry.make_for(registry.define(user_def().timestamps(false)));
    user.fill([("name", "ann")]).unwrap();

    assert!(user.save(&mut conn).await.unwrap());

    assert_eq!(driver.statements(), vec!["insert into \"users\" (\"name\") values (?)"]);
    assert_eq!(user.key(), Value::Int(7));
    assert!(user.exists());
    assert!(user.was_recently_created());
    assert!(user.is_clean());
}

#[tokio::test]
async fn uuid_keys_are_generated_before_insert() {
    let (driver, mut conn) = mock();
    driver.push_executed(1, None);
    let registry = Registry::new();
    let def = user_def()
        .timestamps(false)
        .key_type(KeyType::Uuid)
        .incrementing(false);
    let mut user = registry.make_for(registry.define(def));
    user.fill([("name", "ann")]).unwrap();
    user.save(&mut conn).await.unwrap();

    assert_eq!(
        driver.statements(),
        vec!["insert into \"users\" (\"name\", \"id\") values (?, ?)"]
    );
    let key = user.key();
    let text = key.as_str().unwrap();
    assert_eq!(text.len(), 36);
    assert_eq!(driver.bindings()[0][1], Value::from(text));
}

#[tokio::test]
async fn insert_stamps_both_timestamps() {
    let (driver, mut conn) = mock();
    driver.push_executed(1, Some(1));
    let registry = Registry::new();
    let mut user = registry.make_for(registry.define(user_def()));
    user.fill([("name", "ann")]).unwrap();
    user.save(&mut conn).await.unwrap();

    assert_eq!(
        driver.statements()[0],
        "insert into \"users\" (\"name\", \"updated_at\", \"created_at\") values (?, ?, ?)"
    );
    assert_eq!(user.get_raw("created_at"), user.get_raw("updated_at"));
}

#[tokio::test]
async fn update_writes_only_dirty_columns() {
    let (driver, mut conn) = mock();
    let mut user = persisted(
        user_def().timestamps(false),
        &[("id", Value::Int(1)), ("name", Value::from("ann")), ("email", Value::from("a@x"))],
    );
    user.set_attribute("name", "bob").unwrap();
    user.save(&mut conn).await.unwrap();

    assert_eq!(
        driver.statements(),
        vec!["update \"users\" set \"name\" = ? where \"id\" = ?"]
    );
    assert_eq!(driver.bindings()[0], vec![Value::from("bob"), Value::Int(1)]);
    assert!(user.was_changed_key("name"));
    assert!(user.is_clean());
}

#[tokio::test]
async fn clean_save_issues_no_statement() {
    let (driver, mut conn) = mock();
    let mut user = persisted(user_def(), &[("id", Value::Int(1))]);
    assert!(user.save(&mut conn).await.unwrap());
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn changed_primary_key_updates_by_original_key() {
    let (driver, mut conn) = mock();
    let mut user = persisted(user_def().timestamps(false), &[("id", Value::Int(1))]);
    user.set_raw("id", 2);
    user.save(&mut conn).await.unwrap();
    assert_eq!(driver.bindings()[0], vec![Value::Int(2), Value::Int(1)]);
}

#[tokio::test]
async fn saving_hook_can_veto() {
    let (driver, mut conn) = mock();
    let def = user_def().on(ModelEvent::Saving, |_| {
        Err(QuarryError::Hook("read only".to_owned()))
    });
    let mut user = persisted(def, &[("id", Value::Int(1))]);
    user.set_raw("name", "bob");

    assert!(matches!(user.save(&mut conn).await, Err(QuarryError::Hook(_))));
    assert!(driver.statements().is_empty());
    assert!(user.is_dirty());
}

#[tokio::test]
async fn hooks_fire_in_lifecycle_order() {
    let (driver, mut conn) = mock();
    driver.push_executed(1, Some(3));
    let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut def = user_def().timestamps(false);
    for event in [
        ModelEvent::Saving,
        ModelEvent::Creating,
        ModelEvent::Created,
        ModelEvent::Saved,
    ] {
        let fired = fired.clone();
        def = def.on(event, move |_| {
            fired.lock().unwrap().push(event.as_str());
            Ok(())
        });
    }
    let registry = Registry::new();
    let mut user = registry.make_for(registry.define(def));
    user.save(&mut conn).await.unwrap();

    assert_eq!(
        *fired.lock().unwrap(),
        vec!["saving", "creating", "created", "saved"]
    );
}

#[tokio::test]
async fn creating_hook_can_set_attributes() {
    let (driver, mut conn) = mock();
    driver.push_executed(1, Some(1));
    let def = user_def().timestamps(false).on(ModelEvent::Creating, |model| {
        model.set_raw("slug", "generated");
        Ok(())
    });
    let registry = Registry::new();
    let mut user = registry.make_for(registry.define(def));
    user.save(&mut conn).await.unwrap();
    assert_eq!(
        driver.statements()[0],
        "insert into \"users\" (\"slug\") values (?)"
    );
}

#[tokio::test]
async fn soft_delete_stamps_deleted_at() {
    let (driver, mut conn) = mock();
    let mut post = persisted(
        EntityDef::new("Post").timestamps(false).soft_deletes(),
        &[("id", Value::Int(4)), ("deleted_at", Value::Null)],
    );
    assert!(post.delete(&mut conn).await.unwrap());

    assert_eq!(
        driver.statements(),
        vec!["update \"posts\" set \"deleted_at\" = ? where \"id\" = ?"]
    );
    assert!(post.trashed());
    assert!(post.exists());
    assert!(post.is_clean());

    post.restore(&mut conn).await.unwrap();
    assert!(!post.trashed());
    assert_eq!(driver.bindings()[1], vec![Value::Null, Value::Int(4)]);
}

#[tokio::test]
async fn force_delete_removes_row() {
    let (driver, mut conn) = mock();
    let mut post = persisted(
        EntityDef::new("Post").soft_deletes(),
        &[("id", Value::Int(4))],
    );
    post.force_delete(&mut conn).await.unwrap();
    assert_eq!(driver.statements(), vec!["delete from \"posts\" where \"id\" = ?"]);
    assert!(!post.exists());
}

#[tokio::test]
async fn deleting_unsaved_model_is_a_no_op() {
    let (driver, mut conn) = mock();
    let registry = Registry::new();
    let mut user = registry.make_for(registry.define(user_def()));
    assert!(!user.delete(&mut conn).await.unwrap());
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn increment_updates_row_and_local_value() {
    let (driver, mut conn) = mock();
    driver.push_executed(1, None);
    let mut user = persisted(
        user_def().timestamps(false),
        &[("id", Value::Int(1)), ("votes", Value::Int(5))],
    );
    assert_eq!(user.increment(&mut conn, "votes", 2).await.unwrap(), 1);
    assert_eq!(
        driver.statements(),
        vec!["update \"users\" set \"votes\" = \"votes\" + 2 where \"id\" = ?"]
    );
    assert_eq!(user.get_raw("votes"), Value::Int(7));
    assert!(user.is_clean());
}

#[tokio::test]
async fn refresh_of_missing_row_fails() {
    let (_, mut conn) = mock();
    let mut user = persisted(user_def(), &[("id", Value::Int(1))]);
    let err = user.refresh(&mut conn).await.unwrap_err();
    assert!(matches!(err, QuarryError::ModelNotFound { .. }));
}

#[tokio::test]
async fn hooks_run_once_per_save() {
    let (driver, mut conn) = mock();
    driver.push_executed(1, Some(1));
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let def = user_def().timestamps(false).on(ModelEvent::Saved, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let registry = Registry::new();
    let mut user = registry.make_for(registry.define(def));
    user.save(&mut conn).await.unwrap();
    user.save(&mut conn).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 2);
}
