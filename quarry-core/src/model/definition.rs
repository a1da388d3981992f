use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use heck::ToSnakeCase;
use indexmap::IndexMap;

use super::Model;
use super::cast::Cast;
use super::entity::Entity;
use crate::error::{QuarryError, Result};
use crate::query::Builder;
use crate::relations::RelationDef;
use crate::value::Value;

/// Type of the primary key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Int,
    String,
    /// Text key filled with a random v4 UUID on insert when unset.
    Uuid,
}

/// Lifecycle points at which definition hooks run.
///
/// A hook on a `*ing` event that returns `Err` aborts the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    Saving,
    Saved,
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
    Restoring,
    Restored,
}

impl ModelEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelEvent::Saving => "saving",
            ModelEvent::Saved => "saved",
            ModelEvent::Creating => "creating",
            ModelEvent::Created => "created",
            ModelEvent::Updating => "updating",
            ModelEvent::Updated => "updated",
            ModelEvent::Deleting => "deleting",
            ModelEvent::Deleted => "deleted",
            ModelEvent::Restoring => "restoring",
            ModelEvent::Restored => "restored",
        }
    }
}

pub type Hook = Arc<dyn Fn(&mut Model) -> Result<()> + Send + Sync>;
/// Getter: receives the raw stored value.
pub type Accessor = Arc<dyn Fn(&Model, Value) -> Value + Send + Sync>;
/// Setter: returns the value to store.
pub type Mutator = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub type LocalScope = Arc<dyn Fn(Builder, &[Value]) -> Builder + Send + Sync>;

/// A constraint applied to every query of an entity unless removed by name.
pub trait Scope: Send + Sync {
    fn apply(&self, query: Builder, meta: &EntityMeta) -> Builder;
}

impl<F> Scope for F
where
    F: Fn(Builder, &EntityMeta) -> Builder + Send + Sync,
{
    fn apply(&self, query: Builder, meta: &EntityMeta) -> Builder {
        self(query, meta)
    }
}

/// Points at another entity, either by type or by a registered name.
///
/// Typed references carry the definition so the registry can define the
/// entity on first use; named references must already be registered.
#[derive(Clone)]
pub struct EntityRef {
    pub name: String,
    pub(crate) definition: Option<fn() -> EntityDef>,
}

impl EntityRef {
    pub fn of<T: Entity>() -> Self {
        Self {
            name: T::NAME.to_owned(),
            definition: Some(T::definition),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: None,
        }
    }
}

impl From<&str> for EntityRef {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityRef").field(&self.name).finish()
    }
}

/// Everything the engine knows about one entity type: table, keys, guards,
/// casts, relations, hooks and scopes.
#[derive(Clone)]
pub struct EntityMeta {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub key_type: KeyType,
    pub incrementing: bool,
    pub timestamps: bool,
    pub created_at: String,
    pub updated_at: String,
    pub soft_deletes: bool,
    pub deleted_at: String,
    pub fillable: Vec<String>,
    pub guarded: Vec<String>,
    pub hidden: Vec<String>,
    pub visible: Vec<String>,
    pub casts: IndexMap<String, Cast>,
    pub dates: Vec<String>,
    pub morph_alias: Option<String>,
    pub per_page: u64,
    pub(crate) relations: IndexMap<String, RelationDef>,
    pub(crate) accessors: HashMap<String, Accessor>,
    pub(crate) mutators: HashMap<String, Mutator>,
    pub(crate) hooks: Vec<(ModelEvent, Hook)>,
    pub(crate) global_scopes: IndexMap<String, Arc<dyn Scope>>,
    pub(crate) local_scopes: HashMap<String, LocalScope>,
}

impl fmt::Debug for EntityMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMeta")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .field("global_scopes", &self.global_scopes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl EntityMeta {
    /// `table.column`.
    pub fn qualify(&self, column: &str) -> String {
        if column.contains('.') {
            return column.to_owned();
        }
        format!("{}.{}", self.table, column)
    }

    pub fn qualified_key_name(&self) -> String {
        self.qualify(&self.primary_key)
    }

    /// Default foreign key pointing at this entity: `user_id` for `User`.
    pub fn foreign_key(&self) -> String {
        format!("{}_{}", self.name.to_snake_case(), self.primary_key)
    }

    pub fn relation(&self, name: &str) -> Result<&RelationDef> {
        self.relations
            .get(name)
            .ok_or_else(|| QuarryError::RelationshipDefinition {
                entity: self.name.clone(),
                relation: name.to_owned(),
                reason: "no relation with that name is defined".to_owned(),
            })
    }

    pub fn has_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// True for declared dates, timestamp columns and date casts.
    pub fn is_date(&self, key: &str) -> bool {
        if self.casts.get(key).is_some_and(|cast| cast.is_date()) {
            return true;
        }
        if self.timestamps && (key == self.created_at || key == self.updated_at) {
            return true;
        }
        if self.soft_deletes && key == self.deleted_at {
            return true;
        }
        self.dates.iter().any(|date| date == key)
    }

    pub fn cast(&self, key: &str) -> Option<Cast> {
        self.casts.get(key).copied()
    }

    pub(crate) fn hooks_for(&self, event: ModelEvent) -> Vec<Hook> {
        self.hooks
            .iter()
            .filter(|(on, _)| *on == event)
            .map(|(_, hook)| hook.clone())
            .collect()
    }

    pub(crate) fn local_scope(&self, name: &str) -> Option<&LocalScope> {
        self.local_scopes.get(name)
    }
}

/// Builder for an [`EntityMeta`].
///
/// ```ignore
/// EntityDef::new("User")
///     .fillable(&["name", "email"])
///     .hidden(&["password"])
///     .cast("is_admin", Cast::Bool)
///     .relation("posts", RelationDef::has_many(EntityRef::of::<Post>()))
/// ```
pub struct EntityDef {
    meta: EntityMeta,
}

impl EntityDef {
    /// Starts a definition; the table defaults to the snake case plural of `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let table = pluralizer::pluralize(&name.to_snake_case(), 2, false);
        Self {
            meta: EntityMeta {
                name,
                table,
                primary_key: "id".to_owned(),
                key_type: KeyType::Int,
                incrementing: true,
                timestamps: true,
                created_at: "created_at".to_owned(),
                updated_at: "updated_at".to_owned(),
                soft_deletes: false,
                deleted_at: "deleted_at".to_owned(),
                fillable: Vec::new(),
                guarded: vec!["*".to_owned()],
                hidden: Vec::new(),
                visible: Vec::new(),
                casts: IndexMap::new(),
                dates: Vec::new(),
                morph_alias: None,
                per_page: 15,
                relations: IndexMap::new(),
                accessors: HashMap::new(),
                mutators: HashMap::new(),
                hooks: Vec::new(),
                global_scopes: IndexMap::new(),
                local_scopes: HashMap::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.meta.table = table.into();
        self
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.meta.primary_key = key.into();
        self
    }

    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.meta.key_type = key_type;
        self
    }

    pub fn incrementing(mut self, incrementing: bool) -> Self {
        self.meta.incrementing = incrementing;
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.meta.timestamps = enabled;
        self
    }

    pub fn created_at(mut self, column: impl Into<String>) -> Self {
        self.meta.created_at = column.into();
        self
    }

    pub fn updated_at(mut self, column: impl Into<String>) -> Self {
        self.meta.updated_at = column.into();
        self
    }

    /// Deletes stamp `deleted_at` and queries exclude stamped rows.
    pub fn soft_deletes(mut self) -> Self {
        self.meta.soft_deletes = true;
        self
    }

    pub fn deleted_at(mut self, column: impl Into<String>) -> Self {
        self.meta.deleted_at = column.into();
        self
    }

    pub fn fillable(mut self, keys: &[&str]) -> Self {
        self.meta.fillable = owned(keys);
        self
    }

    pub fn guarded(mut self, keys: &[&str]) -> Self {
        self.meta.guarded = owned(keys);
        self
    }

    /// Nothing is guarded: every key may be mass assigned.
    pub fn unguarded(mut self) -> Self {
        self.meta.guarded.clear();
        self
    }

    pub fn hidden(mut self, keys: &[&str]) -> Self {
        self.meta.hidden = owned(keys);
        self
    }

    pub fn visible(mut self, keys: &[&str]) -> Self {
        self.meta.visible = owned(keys);
        self
    }

    pub fn cast(mut self, key: impl Into<String>, cast: Cast) -> Self {
        self.meta.casts.insert(key.into(), cast);
        self
    }

    pub fn dates(mut self, keys: &[&str]) -> Self {
        self.meta.dates.extend(owned(keys));
        self
    }

    /// Discriminator stored in polymorphic `*_type` columns.
    pub fn morph_alias(mut self, alias: impl Into<String>) -> Self {
        self.meta.morph_alias = Some(alias.into());
        self
    }

    pub fn per_page(mut self, per_page: u64) -> Self {
        self.meta.per_page = per_page;
        self
    }

    pub fn relation(mut self, name: impl Into<String>, relation: RelationDef) -> Self {
        self.meta.relations.insert(name.into(), relation);
        self
    }

    pub fn accessor(
        mut self,
        key: impl Into<String>,
        accessor: impl Fn(&Model, Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.meta.accessors.insert(key.into(), Arc::new(accessor));
        self
    }

    pub fn mutator(
        mut self,
        key: impl Into<String>,
        mutator: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.meta.mutators.insert(key.into(), Arc::new(mutator));
        self
    }

    pub fn on(
        mut self,
        event: ModelEvent,
        hook: impl Fn(&mut Model) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.meta.hooks.push((event, Arc::new(hook)));
        self
    }

    pub fn global_scope(mut self, name: impl Into<String>, scope: impl Scope + 'static) -> Self {
        self.meta.global_scopes.insert(name.into(), Arc::new(scope));
        self
    }

    /// A named constraint applied on demand with `EntityQuery::scope`.
    pub fn local_scope(
        mut self,
        name: impl Into<String>,
        scope: impl Fn(Builder, &[Value]) -> Builder + Send + Sync + 'static,
    ) -> Self {
        self.meta.local_scopes.insert(name.into(), Arc::new(scope));
        self
    }

    pub fn build(self) -> EntityMeta {
        self.meta
    }
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|key| (*key).to_owned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_defaults_to_snake_plural() {
        assert_eq!(EntityDef::new("User").build().table, "users");
        assert_eq!(EntityDef::new("BlogPost").build().table, "blog_posts");
        assert_eq!(EntityDef::new("Category").build().table, "categories");
    }

    #[test]
    fn foreign_key_and_qualified_names() {
        let meta = EntityDef::new("BlogPost").build();
        assert_eq!(meta.foreign_key(), "blog_post_id");
        assert_eq!(meta.qualify("title"), "blog_posts.title");
        assert_eq!(meta.qualify("other.title"), "other.title");
    }

    #[test]
    fn date_detection_covers_timestamps_and_casts() {
        let meta = EntityDef::new("User")
            .soft_deletes()
            .cast("born_on", Cast::Date)
            .dates(&["last_seen"])
            .build();
        assert!(meta.is_date("created_at"));
        assert!(meta.is_date("deleted_at"));
        assert!(meta.is_date("born_on"));
        assert!(meta.is_date("last_seen"));
        assert!(!meta.is_date("name"));
    }

    #[test]
    fn unknown_relation_is_a_definition_error() {
        let meta = EntityDef::new("User").build();
        assert!(matches!(
            meta.relation("posts"),
            Err(QuarryError::RelationshipDefinition { .. })
        ));
    }
}
