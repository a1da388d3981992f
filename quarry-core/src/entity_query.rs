//! Entity-aware queries: global scopes, eager loading and relation filters.
//!
//! An [`EntityQuery`] wraps a [`Builder`] over one entity's table. Clause
//! methods come from [`Constrainable`]; terminal methods hydrate [`Model`]s
//! and eager load the relations requested with [`EntityQuery::with`], one
//! query per relation and nesting level.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;

use crate::collection::Collection;
use crate::connection::Connection;
use crate::error::{QuarryError, Result};
use crate::model::{Entity, EntityMeta, Model};
use crate::query::{Boolean, Builder, Constrainable, Page, Where};
use crate::registry::Registry;
use crate::relations::Relation;
use crate::value::{Expr, Record, Row, Value};

/// Callback applied to the related query of an eager load.
pub type EagerConstraint = Arc<dyn Fn(EntityQuery) -> EntityQuery + Send + Sync>;

/// Relation path to its optional constraint; `a.b` implies an `a` entry.
pub(crate) type EagerMap = IndexMap<String, Option<EagerConstraint>>;

/// Name of the built-in scope hiding soft-deleted rows.
pub const SOFT_DELETES_SCOPE: &str = "soft_deletes";

#[derive(Clone)]
pub struct EntityQuery {
    builder: Builder,
    meta: Arc<EntityMeta>,
    registry: Arc<Registry>,
    eager: EagerMap,
    removed_scopes: HashSet<String>,
    without_all_scopes: bool,
}

impl fmt::Debug for EntityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityQuery")
            .field("entity", &self.meta.name)
            .field("builder", &self.builder)
            .field("eager", &self.eager.keys().collect::<Vec<_>>())
            .field("removed_scopes", &self.removed_scopes)
            .finish()
    }
}

impl Constrainable for EntityQuery {
    fn query_mut(&mut self) -> &mut Builder {
        &mut self.builder
    }

    fn query_ref(&self) -> &Builder {
        &self.builder
    }
}

impl EntityQuery {
    pub fn new(builder: Builder, meta: Arc<EntityMeta>, registry: Arc<Registry>) -> Self {
        Self {
            builder: builder.from(meta.table.clone()),
            meta,
            registry,
            eager: EagerMap::new(),
            removed_scopes: HashSet::new(),
            without_all_scopes: false,
        }
    }

    pub fn meta(&self) -> &Arc<EntityMeta> {
        &self.meta
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The clauses added so far, without global scopes.
    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    pub(crate) fn set_from(&mut self, table: String) {
        self.builder = self.builder.clone().from(table);
    }

    // ----------------------------------------------------------------------
    // eager loading
    // ----------------------------------------------------------------------

    /// Eager loads relations. Accepts nested paths (`posts.comments`) and
    /// column lists (`posts:id,user_id`).
    pub fn with(mut self, relations: &[&str]) -> Self {
        for (path, constraint) in parse_eager(relations) {
            match constraint {
                Some(constraint) => {
                    self.eager.insert(path, Some(constraint));
                }
                None => {
                    self.eager.entry(path).or_insert(None);
                }
            }
        }
        self
    }

    /// Eager loads `relation` with a constraint on its query.
    pub fn with_constraint(
        mut self,
        relation: &str,
        constraint: impl Fn(EntityQuery) -> EntityQuery + Send + Sync + 'static,
    ) -> Self {
        for ancestor in ancestors(relation) {
            self.eager.entry(ancestor).or_insert(None);
        }
        self.eager
            .insert(relation.to_owned(), Some(Arc::new(constraint)));
        self
    }

    /// Drops relations, and everything nested under them, from the eager list.
    pub fn without(mut self, relations: &[&str]) -> Self {
        for relation in relations {
            let nested = format!("{relation}.");
            self.eager
                .retain(|path, _| path.as_str() != *relation && !path.starts_with(&nested));
        }
        self
    }

    pub(crate) fn with_eager_map(mut self, eager: EagerMap) -> Self {
        self.eager = eager;
        self
    }

    /// Relation paths that will be eager loaded.
    pub fn eager_loads(&self) -> Vec<&str> {
        self.eager.keys().map(String::as_str).collect()
    }

    // ----------------------------------------------------------------------
    // scopes
    // ----------------------------------------------------------------------

    pub fn without_global_scope(mut self, name: &str) -> Self {
        self.removed_scopes.insert(name.to_owned());
        self
    }

    pub fn without_global_scopes(mut self) -> Self {
        self.without_all_scopes = true;
        self
    }

    pub fn removed_scopes(&self) -> Vec<&str> {
        self.removed_scopes.iter().map(String::as_str).collect()
    }

    /// Includes soft-deleted rows.
    pub fn with_trashed(self) -> Self {
        self.without_global_scope(SOFT_DELETES_SCOPE)
    }

    /// Only soft-deleted rows.
    pub fn only_trashed(self) -> Self {
        let column = self.meta.qualify(&self.meta.deleted_at);
        self.with_trashed().filter_not_null(&column)
    }

    /// Applies a local scope registered on the definition.
    pub fn scope(mut self, name: &str, args: &[Value]) -> Result<Self> {
        let Some(scope) = self.meta.local_scope(name).cloned() else {
            return Err(QuarryError::Message(format!(
                "call to undefined scope [{name}] on [{}]",
                self.meta.name
            )));
        };
        self.builder = scope(self.builder, args);
        Ok(self)
    }

    fn scope_applies(&self, name: &str) -> bool {
        !self.without_all_scopes && !self.removed_scopes.contains(name)
    }

    /// The underlying builder with every active global scope applied.
    pub fn to_base(&self) -> Builder {
        let mut base = self.builder.clone();
        let soft_deletes = self.meta.soft_deletes && self.scope_applies(SOFT_DELETES_SCOPE);
        let scopes: Vec<_> = self
            .registry
            .global_scopes(&self.meta)
            .into_iter()
            .filter(|(name, _)| self.scope_applies(name))
            .collect();
        if !soft_deletes && scopes.is_empty() {
            return base;
        }

        if base.wheres().iter().any(|clause| clause.boolean() == Boolean::Or) {
            let wheres = base.take_wheres();
            base.push_where(Where::Nested {
                wheres,
                boolean: Boolean::And,
            });
        }
        if soft_deletes {
            base = base.filter_null(&self.meta.qualify(&self.meta.deleted_at));
        }
        for (_, scope) in scopes {
            base = scope.apply(base, &self.meta);
        }
        base
    }

    pub fn to_sql(&self) -> String {
        self.to_base().to_sql()
    }

    pub fn bindings(&self) -> Vec<Value> {
        self.to_base().bindings()
    }

    // ----------------------------------------------------------------------
    // reads
    // ----------------------------------------------------------------------

    fn hydrate(&self, rows: Vec<Row>) -> Vec<Model> {
        rows.into_iter()
            .map(|row| Model::from_row(self.meta.clone(), self.registry.clone(), row))
            .collect()
    }

    /// Runs the query, hydrates models and eager loads requested relations.
    #[tracing::instrument(skip_all, fields(entity = %self.meta.name))]
    pub async fn get(&self, conn: &mut Connection) -> Result<Collection> {
        let rows = self.to_base().get(conn).await?;
        let mut models = self.hydrate(rows);
        if !models.is_empty() && !self.eager.is_empty() {
            eager_load(conn, &self.registry, &self.meta, &mut models, &self.eager).await?;
        }
        Ok(Collection::from(models))
    }

    pub async fn first(&self, conn: &mut Connection) -> Result<Option<Model>> {
        let models = self.clone().limit(1).get(conn).await?;
        Ok(models.into_iter().next())
    }

    pub async fn first_or_fail(&self, conn: &mut Connection) -> Result<Model> {
        self.first(conn)
            .await?
            .ok_or_else(|| QuarryError::model_not_found(self.meta.name.clone(), Vec::new()))
    }

    pub async fn find(&self, conn: &mut Connection, id: impl Into<Value>) -> Result<Option<Model>> {
        self.clone()
            .filter_eq(&self.meta.qualified_key_name(), id.into())
            .first(conn)
            .await
    }

    pub async fn find_or_fail(&self, conn: &mut Connection, id: impl Into<Value>) -> Result<Model> {
        let id = id.into();
        self.find(conn, id.clone())
            .await?
            .ok_or_else(|| QuarryError::model_not_found(self.meta.name.clone(), vec![id]))
    }

    pub async fn find_many<I, V>(&self, conn: &mut Connection, ids: I) -> Result<Collection>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(Collection::default());
        }
        self.clone()
            .filter_in(&self.meta.qualified_key_name(), ids)
            .get(conn)
            .await
    }

    /// Like [`EntityQuery::find_many`] but fails unless every id is found.
    pub async fn find_many_or_fail<I, V>(&self, conn: &mut Connection, ids: I) -> Result<Collection>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        let found = self.find_many(conn, ids.clone()).await?;
        let missing: Vec<Value> = ids
            .into_iter()
            .filter(|id| !found.contains_key(id.clone()))
            .collect();
        if !missing.is_empty() {
            return Err(QuarryError::model_not_found(self.meta.name.clone(), missing));
        }
        Ok(found)
    }

    /// An unsaved model filled with the fillable subset of `attributes`.
    pub fn make<I, K, V>(&self, attributes: I) -> Result<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.registry.make_for(self.meta.clone());
        model.fill(attributes)?;
        Ok(model)
    }

    pub async fn create<I, K, V>(&self, conn: &mut Connection, attributes: I) -> Result<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.make(attributes)?;
        model.save(conn).await?;
        Ok(model)
    }

    /// The first row matching `attributes`, or an unsaved model of
    /// `attributes` plus `values`.
    pub async fn first_or_new(
        &self,
        conn: &mut Connection,
        attributes: Vec<(&str, Value)>,
        values: Vec<(&str, Value)>,
    ) -> Result<Model> {
        let mut query = self.clone();
        for (column, value) in &attributes {
            query = query.filter_eq(column, value.clone());
        }
        if let Some(model) = query.first(conn).await? {
            return Ok(model);
        }
        self.make(attributes.into_iter().chain(values))
    }

    pub async fn first_or_create(
        &self,
        conn: &mut Connection,
        attributes: Vec<(&str, Value)>,
        values: Vec<(&str, Value)>,
    ) -> Result<Model> {
        let mut model = self.first_or_new(conn, attributes, values).await?;
        if !model.exists() {
            model.save(conn).await?;
        }
        Ok(model)
    }

    /// Updates the first row matching `attributes` with `values`, creating it
    /// when absent.
    pub async fn update_or_create(
        &self,
        conn: &mut Connection,
        attributes: Vec<(&str, Value)>,
        values: Vec<(&str, Value)>,
    ) -> Result<Model> {
        let mut model = self.first_or_new(conn, attributes, Vec::new()).await?;
        model.fill(values)?;
        model.save(conn).await?;
        Ok(model)
    }

    pub async fn value(&self, conn: &mut Connection, column: &str) -> Result<Option<Value>> {
        let value = self.to_base().value(conn, column).await?;
        Ok(value.map(|value| self.cast_column(column, value)))
    }

    /// Values of `column`, cast the way the model would read them.
    pub async fn pluck(&self, conn: &mut Connection, column: &str) -> Result<Vec<Value>> {
        let values = self.to_base().pluck(conn, column).await?;
        Ok(values
            .into_iter()
            .map(|value| self.cast_column(column, value))
            .collect())
    }

    fn cast_column(&self, column: &str, value: Value) -> Value {
        let key = column.rsplit_once('.').map(|(_, key)| key).unwrap_or(column);
        match self.meta.cast(key) {
            Some(cast) => cast.get(value),
            None => value,
        }
    }

    pub async fn count(&self, conn: &mut Connection) -> Result<u64> {
        self.to_base().count(conn).await
    }

    pub async fn exists(&self, conn: &mut Connection) -> Result<bool> {
        self.to_base().exists(conn).await
    }

    pub async fn doesnt_exist(&self, conn: &mut Connection) -> Result<bool> {
        Ok(!self.exists(conn).await?)
    }

    pub async fn min(&self, conn: &mut Connection, column: &str) -> Result<Value> {
        self.to_base().min(conn, column).await
    }

    pub async fn max(&self, conn: &mut Connection, column: &str) -> Result<Value> {
        self.to_base().max(conn, column).await
    }

    pub async fn sum(&self, conn: &mut Connection, column: &str) -> Result<Value> {
        self.to_base().sum(conn, column).await
    }

    pub async fn avg(&self, conn: &mut Connection, column: &str) -> Result<Value> {
        self.to_base().avg(conn, column).await
    }

    /// One page of models; `per_page` of zero uses the entity's default.
    pub async fn paginate(&self, conn: &mut Connection, per_page: u64, page: u64) -> Result<Page<Model>> {
        let per_page = if per_page == 0 {
            self.meta.per_page
        } else {
            per_page
        };
        let page = page.max(1);
        let total = self.to_base().count_for_pagination(conn).await?;
        let items = if total > 0 {
            self.clone().for_page(page, per_page).get(conn).await?.into_vec()
        } else {
            Vec::new()
        };
        Ok(Page::new(items, total, per_page, page))
    }

    pub async fn get_as<T: Entity>(&self, conn: &mut Connection) -> Result<Vec<T>> {
        self.get(conn).await?.to_entities()
    }

    pub async fn first_as<T: Entity>(&self, conn: &mut Connection) -> Result<Option<T>> {
        self.first(conn)
            .await?
            .map(|model| model.to_entity())
            .transpose()
    }

    pub async fn find_as<T: Entity>(
        &self,
        conn: &mut Connection,
        id: impl Into<Value>,
    ) -> Result<Option<T>> {
        self.find(conn, id)
            .await?
            .map(|model| model.to_entity())
            .transpose()
    }

    // ----------------------------------------------------------------------
    // writes
    // ----------------------------------------------------------------------

    fn touching(&self, mut values: Record) -> Record {
        if self.meta.timestamps && !values.contains_key(&self.meta.updated_at) {
            values.insert(
                self.meta.updated_at.clone(),
                Expr::from(Value::DateTime(crate::model::fresh_timestamp())),
            );
        }
        values
    }

    /// Mass update of every matching row; stamps `updated_at`. No hooks run.
    pub async fn update(&self, conn: &mut Connection, values: Record) -> Result<u64> {
        let values = self.touching(values);
        self.to_base().update(conn, values).await
    }

    /// Mass delete; soft-deleting entities stamp `deleted_at`. No hooks run.
    pub async fn delete(&self, conn: &mut Connection) -> Result<u64> {
        if !self.meta.soft_deletes {
            return self.to_base().delete(conn).await;
        }
        let mut values = Record::new();
        values.insert(
            self.meta.deleted_at.clone(),
            Expr::from(Value::DateTime(crate::model::fresh_timestamp())),
        );
        let values = self.touching(values);
        self.to_base().update(conn, values).await
    }

    pub async fn force_delete(&self, conn: &mut Connection) -> Result<u64> {
        self.clone().with_trashed().to_base().delete(conn).await
    }

    /// Clears `deleted_at` on every matching row.
    pub async fn restore(&self, conn: &mut Connection) -> Result<u64> {
        if !self.meta.soft_deletes {
            return Ok(0);
        }
        let mut values = Record::new();
        values.insert(self.meta.deleted_at.clone(), Expr::from(Value::Null));
        let values = self.touching(values);
        self.clone().with_trashed().to_base().update(conn, values).await
    }

    pub async fn increment(&self, conn: &mut Connection, column: &str, amount: i64) -> Result<u64> {
        let extra = self.touching(Record::new());
        self.to_base().increment_with(conn, column, amount, extra).await
    }

    pub async fn decrement(&self, conn: &mut Connection, column: &str, amount: i64) -> Result<u64> {
        self.increment(conn, column, -amount).await
    }

    /// Loads each id and deletes it through the model so hooks run.
    pub async fn destroy<I, V>(&self, conn: &mut Connection, ids: I) -> Result<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let models = self.find_many(conn, ids).await?;
        let mut deleted = 0;
        for mut model in models {
            if model.delete(conn).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    // ----------------------------------------------------------------------
    // relation existence
    // ----------------------------------------------------------------------

    /// Rows with at least one related row; `relation` may be a dotted path.
    pub fn has(self, relation: &str) -> Result<Self> {
        self.has_count(relation, ">=", 1)
    }

    /// Rows whose related row count satisfies `operator count`.
    pub fn has_count(self, relation: &str, operator: &str, count: i64) -> Result<Self> {
        self.has_nested(relation, operator, count, None)
    }

    pub fn doesnt_have(self, relation: &str) -> Result<Self> {
        self.has_nested(relation, "<", 1, None)
    }

    /// Rows with at least one related row matching `callback`.
    pub fn where_has(
        self,
        relation: &str,
        callback: impl Fn(EntityQuery) -> EntityQuery,
    ) -> Result<Self> {
        let callback: &dyn Fn(EntityQuery) -> EntityQuery = &callback;
        self.has_nested(relation, ">=", 1, Some(callback))
    }

    pub fn where_doesnt_have(
        self,
        relation: &str,
        callback: impl Fn(EntityQuery) -> EntityQuery,
    ) -> Result<Self> {
        let callback: &dyn Fn(EntityQuery) -> EntityQuery = &callback;
        self.has_nested(relation, "<", 1, Some(callback))
    }

    fn has_nested(
        self,
        path: &str,
        operator: &str,
        count: i64,
        callback: Option<&dyn Fn(EntityQuery) -> EntityQuery>,
    ) -> Result<Self> {
        let Some((first, rest)) = path.split_once('.') else {
            return self.has_relation(path, operator, count, |related| {
                Ok(match callback {
                    Some(callback) => callback(related),
                    None => related,
                })
            });
        };
        let doesnt_have = operator == "<" && count == 1;
        let (inner_operator, inner_count) = if doesnt_have {
            (">=", 1)
        } else {
            (operator, count)
        };
        let outer_operator = if doesnt_have { "<" } else { ">=" };
        self.has_relation(first, outer_operator, 1, |related| {
            related.has_nested(rest, inner_operator, inner_count, callback)
        })
    }

    fn has_relation(
        mut self,
        name: &str,
        operator: &str,
        count: i64,
        constrain: impl FnOnce(EntityQuery) -> Result<EntityQuery>,
    ) -> Result<Self> {
        let relation = Relation::build(
            self.builder.fork(),
            self.registry.clone(),
            self.meta.clone(),
            name,
            None,
        )?;
        let existence = relation.existence_query(constrain)?;

        if count == 1 && (operator == ">=" || operator == "<") {
            self.builder.push_where(Where::Exists {
                query: Box::new(existence),
                not: operator == "<",
                boolean: Boolean::And,
            });
        } else {
            let mut counted = existence;
            counted.columns.clear();
            let counted = counted.select_raw("count(*)", Vec::new());
            self.builder.push_where(Where::Count {
                query: Box::new(counted),
                operator: operator.to_owned(),
                count,
                boolean: Boolean::And,
            });
        }
        Ok(self)
    }
}

/// Parses `with` arguments into a flat path map with implied ancestors.
pub(crate) fn parse_eager(relations: &[&str]) -> EagerMap {
    let mut eager = EagerMap::new();
    for relation in relations {
        let relation = relation.trim();
        if relation.is_empty() {
            continue;
        }
        let (path, constraint) = match relation.split_once(':') {
            Some((path, columns)) => (path.trim(), Some(select_columns(columns))),
            None => (relation, None),
        };
        for ancestor in ancestors(path) {
            eager.entry(ancestor).or_insert(None);
        }
        match constraint {
            Some(constraint) => {
                eager.insert(path.to_owned(), Some(constraint));
            }
            None => {
                eager.entry(path.to_owned()).or_insert(None);
            }
        }
    }
    eager
}

/// `a.b.c` yields `a` and `a.b`.
fn ancestors(path: &str) -> Vec<String> {
    path.match_indices('.')
        .map(|(idx, _)| path[..idx].to_owned())
        .collect()
}

fn select_columns(columns: &str) -> EagerConstraint {
    let columns: Vec<String> = columns
        .split(',')
        .map(|column| column.trim().to_owned())
        .filter(|column| !column.is_empty())
        .collect();
    Arc::new(move |query: EntityQuery| {
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        query.select(&columns)
    })
}

/// Entries nested under `name`, with the `name.` prefix removed.
fn nested_eager(eager: &EagerMap, name: &str) -> EagerMap {
    let prefix = format!("{name}.");
    eager
        .iter()
        .filter_map(|(path, constraint)| {
            path.strip_prefix(&prefix)
                .map(|rest| (rest.to_owned(), constraint.clone()))
        })
        .collect()
}

/// Loads every top-level relation in `eager` onto `models`, one query per
/// relation; deeper paths load recursively through the related query.
pub(crate) fn eager_load<'a>(
    conn: &'a mut Connection,
    registry: &'a Arc<Registry>,
    meta: &'a Arc<EntityMeta>,
    models: &'a mut [Model],
    eager: &'a EagerMap,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if models.is_empty() {
            return Ok(());
        }
        for (name, constraint) in eager.iter().filter(|(name, _)| !name.contains('.')) {
            let relation = Relation::build(
                conn.query_builder(),
                registry.clone(),
                meta.clone(),
                name,
                None,
            )?;
            tracing::debug!(
                entity = %meta.name,
                relation = %name,
                parents = models.len(),
                "eager loading"
            );
            relation
                .eager_load(conn, models, constraint.clone(), nested_eager(eager, name))
                .await?;
        }
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eager_paths_include_ancestors() {
        let eager = parse_eager(&["posts.comments.author", "roles"]);
        let keys: Vec<&str> = eager.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["posts", "posts.comments", "posts.comments.author", "roles"]
        );
        assert!(eager.values().all(Option::is_none));
    }

    #[test]
    fn column_lists_become_constraints() {
        let eager = parse_eager(&["posts:id,user_id"]);
        assert!(eager["posts"].is_some());
    }

    #[test]
    fn nested_entries_strip_prefix() {
        let eager = parse_eager(&["posts.comments", "posts.tags", "roles"]);
        let nested = nested_eager(&eager, "posts");
        let keys: Vec<&str> = nested.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["comments", "tags"]);
    }
}
