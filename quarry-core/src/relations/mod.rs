//! Relations between entities.
//!
//! A [`RelationDef`] is declared on an [`EntityDef`](crate::model::EntityDef)
//! and resolved against the registry into a [`Relation`]: a query over the
//! related entity plus the key columns linking the two sides. The same
//! relation object serves lazy loading (constrained by one parent), eager
//! loading (constrained by the keys of many parents, then matched back), and
//! existence subqueries for `has`/`where_has`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

mod definition;
mod morph_to;
mod ownership;
mod pivot;

pub use definition::{RelationDef, RelationKind};
pub use pivot::SyncChanges;

pub(crate) use definition::Shape;

use crate::collection::Collection;
use crate::connection::Connection;
use crate::entity_query::{eager_load, parse_eager, EagerConstraint, EagerMap, EntityQuery};
use crate::error::{QuarryError, Result};
use crate::model::{EntityMeta, Loaded, Model};
use crate::query::{Builder, Constrainable};
use crate::registry::Registry;
use crate::value::{unique_sorted_keys, Value};

/// Column carrying the intermediate key of a through relation.
const THROUGH_KEY: &str = "quarry_through_key";

#[derive(Clone)]
pub struct Relation {
    name: String,
    kind: RelationKind,
    parent: Arc<EntityMeta>,
    related: Arc<EntityMeta>,
    pub(crate) shape: Shape,
    query: EntityQuery,
    registry: Arc<Registry>,
    /// Parent-side key of the model this relation was built from.
    parent_value: Value,
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parent", &self.parent.name)
            .field("related", &self.related.name)
            .field("shape", &self.shape)
            .finish()
    }
}

impl Constrainable for Relation {
    fn query_mut(&mut self) -> &mut Builder {
        self.query.query_mut()
    }

    fn query_ref(&self) -> &Builder {
        self.query.query_ref()
    }
}

impl Relation {
    /// Resolves relation `name` of `parent`. With a model the query is
    /// constrained to that model's related rows.
    pub(crate) fn build(
        builder: Builder,
        registry: Arc<Registry>,
        parent: Arc<EntityMeta>,
        name: &str,
        model: Option<&Model>,
    ) -> Result<Self> {
        let def = parent.relation(name)?;
        let declared = match (&def.related, def.kind) {
            (Some(related), _) => registry.resolve(related)?,
            // morph-to targets are only known per row
            (None, RelationKind::MorphTo) => parent.clone(),
            (None, _) => {
                return Err(QuarryError::RelationshipDefinition {
                    entity: parent.name.clone(),
                    relation: name.to_owned(),
                    reason: "no related entity".to_owned(),
                });
            }
        };
        let through = match &def.through {
            Some(through) => Some(registry.resolve(through)?),
            None => None,
        };
        let shape = def.resolve(name, &parent, &declared, through, &registry)?;

        let mut related = declared;
        if let (Shape::MorphTo { type_column, .. }, Some(model)) = (&shape, model) {
            let alias = model.get_raw(type_column);
            if !alias.is_null() {
                related = registry.resolve_morph(&alias.to_string())?;
            }
        }

        let query = EntityQuery::new(builder, related.clone(), registry.clone());
        let relation = Self {
            name: name.to_owned(),
            kind: def.kind,
            parent,
            related,
            shape,
            query,
            registry,
            parent_value: Value::Null,
        };
        Ok(match model {
            Some(model) => relation.add_constraints(model),
            None => relation,
        })
    }

    /// Relation `name` of `model`, constrained to its related rows.
    pub fn of(conn: &Connection, model: &Model, name: &str) -> Result<Self> {
        Self::build(
            conn.query_builder(),
            model.registry().clone(),
            model.meta().clone(),
            name,
            Some(model),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn parent(&self) -> &Arc<EntityMeta> {
        &self.parent
    }

    pub fn related(&self) -> &Arc<EntityMeta> {
        &self.related
    }

    pub fn is_many(&self) -> bool {
        self.shape.is_many()
    }

    /// The related query, global scopes not yet applied.
    pub fn query(&self) -> &EntityQuery {
        &self.query
    }

    /// Replaces the related query, e.g. to chain entity-level methods.
    pub fn constrain(mut self, f: impl FnOnce(EntityQuery) -> EntityQuery) -> Self {
        self.query = f(self.query);
        self
    }

    pub fn to_sql(&self) -> String {
        self.select_columns(self.query.clone()).to_sql()
    }

    pub fn bindings(&self) -> Vec<Value> {
        self.select_columns(self.query.clone()).bindings()
    }

    // ----------------------------------------------------------------------
    // constraints
    // ----------------------------------------------------------------------

    fn add_constraints(mut self, model: &Model) -> Self {
        let related = self.related.clone();
        match self.shape.clone() {
            Shape::HasOneOrMany {
                foreign_key,
                local_key,
                morph,
                ..
            } => {
                self.parent_value = model.get_raw(&local_key);
                let column = related.qualify(&foreign_key);
                self.query = self
                    .query
                    .filter_eq(&column, self.parent_value.clone())
                    .filter_not_null(&column);
                if let Some(morph) = morph {
                    self.query = self
                        .query
                        .filter_eq(&related.qualify(&morph.column), morph.alias);
                }
            }
            Shape::BelongsTo {
                foreign_key,
                owner_key,
            } => {
                self.parent_value = model.get_raw(&foreign_key);
                self.query = self
                    .query
                    .filter_eq(&related.qualify(&owner_key), self.parent_value.clone());
            }
            Shape::BelongsToMany(pivot) => {
                self.parent_value = model.get_raw(&pivot.parent_key);
                self.query = pivot.join(self.query, &related.table).filter_eq(
                    &pivot.qualify(&pivot.foreign_pivot_key),
                    self.parent_value.clone(),
                );
                if let Some(morph) = &pivot.morph {
                    self.query = self
                        .query
                        .filter_eq(&pivot.qualify(&morph.column), morph.alias.clone());
                }
            }
            Shape::MorphTo {
                type_column,
                id_column,
                owner_key,
            } => {
                self.parent_value = if model.get_raw(&type_column).is_null() {
                    Value::Null
                } else {
                    model.get_raw(&id_column)
                };
                let owner_key = owner_key.unwrap_or_else(|| related.primary_key.clone());
                self.query = self
                    .query
                    .filter_eq(&related.qualify(&owner_key), self.parent_value.clone());
            }
            Shape::Through {
                through,
                first_key,
                second_key,
                local_key,
                second_local_key,
                ..
            } => {
                self.parent_value = model.get_raw(&local_key);
                self.query = join_through(
                    self.query,
                    &through,
                    &related,
                    &second_key,
                    &second_local_key,
                )
                .filter_eq(&through.qualify(&first_key), self.parent_value.clone());
            }
        }
        self
    }

    /// Constrains the related query to the keys of every parent in `models`.
    fn add_eager_constraints(mut self, models: &[Model]) -> Self {
        let related = self.related.clone();
        let keys = |column: &str| unique_sorted_keys(models.iter().map(|model| model.get_raw(column)));
        match self.shape.clone() {
            Shape::HasOneOrMany {
                foreign_key,
                local_key,
                morph,
                ..
            } => {
                self.query = self
                    .query
                    .filter_in(&related.qualify(&foreign_key), keys(&local_key));
                if let Some(morph) = morph {
                    self.query = self
                        .query
                        .filter_eq(&related.qualify(&morph.column), morph.alias);
                }
            }
            Shape::BelongsTo {
                foreign_key,
                owner_key,
            } => {
                self.query = self
                    .query
                    .filter_in(&related.qualify(&owner_key), keys(&foreign_key));
            }
            Shape::BelongsToMany(pivot) => {
                self.query = pivot.join(self.query, &related.table).filter_in(
                    &pivot.qualify(&pivot.foreign_pivot_key),
                    keys(&pivot.parent_key),
                );
                if let Some(morph) = &pivot.morph {
                    self.query = self
                        .query
                        .filter_eq(&pivot.qualify(&morph.column), morph.alias.clone());
                }
            }
            // grouped per type in eager_load_morph_to
            Shape::MorphTo { .. } => {}
            Shape::Through {
                through,
                first_key,
                second_key,
                local_key,
                second_local_key,
                ..
            } => {
                self.query = join_through(
                    self.query,
                    &through,
                    &related,
                    &second_key,
                    &second_local_key,
                )
                .filter_in(&through.qualify(&first_key), keys(&local_key));
            }
        }
        self
    }

    /// Adds the pivot or intermediate columns a fetch needs.
    fn select_columns(&self, query: EntityQuery) -> EntityQuery {
        let related_columns = format!("{}.*", self.related.table);
        match &self.shape {
            Shape::BelongsToMany(pivot) => {
                let query = if query.builder().has_columns() {
                    query
                } else {
                    query.select(&[related_columns.as_str()])
                };
                let columns = pivot.select_columns();
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                query.add_select(&columns)
            }
            Shape::Through {
                through, first_key, ..
            } => {
                let query = if query.builder().has_columns() {
                    query
                } else {
                    query.select(&[related_columns.as_str()])
                };
                let column = format!("{} as {THROUGH_KEY}", through.qualify(first_key));
                query.add_select(&[column.as_str()])
            }
            _ => query,
        }
    }

    async fn fetch(&self, conn: &mut Connection) -> Result<Collection> {
        let mut results = self.select_columns(self.query.clone()).get(conn).await?;
        if let Shape::BelongsToMany(pivot) = &self.shape {
            pivot.hydrate(&mut results, &self.registry);
        }
        Ok(results)
    }

    // ----------------------------------------------------------------------
    // matching
    // ----------------------------------------------------------------------

    fn default_value(&self) -> Loaded {
        if self.is_many() {
            Loaded::Many(Collection::default())
        } else {
            Loaded::One(None)
        }
    }

    /// Sets the empty default on every parent.
    fn init_relation(&self, models: &mut [Model]) {
        for model in models.iter_mut() {
            model.set_relation(self.name.clone(), self.default_value());
        }
    }

    /// Key a fetched related model is grouped under.
    fn dictionary_key(&self, related: &mut Model) -> Option<String> {
        match &self.shape {
            Shape::HasOneOrMany { foreign_key, .. } => related.get_raw(foreign_key).to_key(),
            Shape::BelongsTo { owner_key, .. } => related.get_raw(owner_key).to_key(),
            Shape::BelongsToMany(pivot) => related
                .one("pivot")
                .and_then(|pivot_model| pivot_model.get_raw(&pivot.foreign_pivot_key).to_key()),
            Shape::Through { .. } => related.take_attribute(THROUGH_KEY)?.to_key(),
            Shape::MorphTo { .. } => None,
        }
    }

    /// Key a parent looks its related models up by.
    fn parent_key(&self, parent: &Model) -> Option<String> {
        match &self.shape {
            Shape::HasOneOrMany { local_key, .. } | Shape::Through { local_key, .. } => {
                parent.get_raw(local_key).to_key()
            }
            Shape::BelongsTo { foreign_key, .. } => parent.get_raw(foreign_key).to_key(),
            Shape::BelongsToMany(pivot) => parent.get_raw(&pivot.parent_key).to_key(),
            Shape::MorphTo { .. } => None,
        }
    }

    /// Distributes `results` onto the parents they belong to.
    fn match_models(&self, models: &mut [Model], results: Collection) {
        let mut dictionary: HashMap<String, Vec<Model>> = HashMap::new();
        for mut related in results {
            if let Some(key) = self.dictionary_key(&mut related) {
                dictionary.entry(key).or_default().push(related);
            }
        }
        for model in models.iter_mut() {
            let Some(matched) = self
                .parent_key(model)
                .and_then(|key| dictionary.get(&key))
            else {
                continue;
            };
            let value = if self.is_many() {
                Loaded::Many(Collection::from(matched.clone()))
            } else {
                Loaded::One(matched.first().cloned().map(Box::new))
            };
            model.set_relation(self.name.clone(), value);
        }
    }

    /// Loads this relation for every model in `models` with one query.
    pub(crate) async fn eager_load(
        self,
        conn: &mut Connection,
        models: &mut [Model],
        constraint: Option<EagerConstraint>,
        nested: EagerMap,
    ) -> Result<()> {
        if matches!(self.shape, Shape::MorphTo { .. }) {
            return self.eager_load_morph_to(conn, models, constraint, nested).await;
        }
        let mut relation = self.add_eager_constraints(models);
        if let Some(constraint) = constraint {
            relation.query = constraint(relation.query);
        }
        relation.query = relation.query.with_eager_map(nested);
        let results = relation.fetch(conn).await?;
        relation.init_relation(models);
        relation.match_models(models, results);
        Ok(())
    }

    /// Related rows of the model this relation was built from.
    pub async fn get_results(self, conn: &mut Connection) -> Result<Loaded> {
        if self.parent_value.is_null() {
            return Ok(self.default_value());
        }
        let many = self.is_many();
        let relation = if many { self } else { self.limit(1) };
        let mut results = relation.fetch(conn).await?;
        if matches!(relation.shape, Shape::Through { .. }) {
            for model in results.iter_mut() {
                model.take_attribute(THROUGH_KEY);
            }
        }
        Ok(if many {
            Loaded::Many(results)
        } else {
            Loaded::One(results.into_iter().next().map(Box::new))
        })
    }

    /// Every related row of the parent as a collection.
    pub async fn get(self, conn: &mut Connection) -> Result<Collection> {
        Ok(match self.get_results(conn).await? {
            Loaded::Many(collection) => collection,
            Loaded::One(model) => model.map(|model| *model).into_iter().collect(),
        })
    }

    pub async fn first(self, conn: &mut Connection) -> Result<Option<Model>> {
        Ok(self.limit(1).get(conn).await?.into_iter().next())
    }

    pub async fn count(&self, conn: &mut Connection) -> Result<u64> {
        if self.parent_value.is_null() {
            return Ok(0);
        }
        self.query.count(conn).await
    }

    pub async fn exists(&self, conn: &mut Connection) -> Result<bool> {
        Ok(self.count(conn).await? > 0)
    }

    // ----------------------------------------------------------------------
    // existence
    // ----------------------------------------------------------------------

    /// Correlated subquery selecting related rows of the outer parent row.
    pub(crate) fn existence_query(
        self,
        constrain: impl FnOnce(EntityQuery) -> Result<EntityQuery>,
    ) -> Result<Builder> {
        let parent = self.parent.clone();
        let self_relation = parent.table == self.related.table;
        let (query, related) = match &self.shape {
            Shape::HasOneOrMany { .. } | Shape::BelongsTo { .. } if self_relation => {
                let alias = self.registry.next_self_alias();
                let mut aliased = (*self.related).clone();
                aliased.table = alias.clone();
                let aliased = Arc::new(aliased);
                let mut query = EntityQuery::new(
                    self.query.builder().fork(),
                    aliased.clone(),
                    self.registry.clone(),
                );
                query.set_from(format!("{} as {alias}", self.related.table));
                (query, aliased)
            }
            _ => (self.query.clone(), self.related.clone()),
        };

        let query = match &self.shape {
            Shape::HasOneOrMany {
                foreign_key,
                local_key,
                morph,
                ..
            } => {
                let query = query.filter_column(
                    &related.qualify(foreign_key),
                    "=",
                    &parent.qualify(local_key),
                );
                match morph {
                    Some(morph) => {
                        query.filter_eq(&related.qualify(&morph.column), morph.alias.clone())
                    }
                    None => query,
                }
            }
            Shape::BelongsTo {
                foreign_key,
                owner_key,
            } => query.filter_column(
                &related.qualify(owner_key),
                "=",
                &parent.qualify(foreign_key),
            ),
            Shape::BelongsToMany(pivot) => {
                let query = pivot.join(query, &related.table).filter_column(
                    &pivot.qualify(&pivot.foreign_pivot_key),
                    "=",
                    &parent.qualify(&pivot.parent_key),
                );
                match &pivot.morph {
                    Some(morph) => {
                        query.filter_eq(&pivot.qualify(&morph.column), morph.alias.clone())
                    }
                    None => query,
                }
            }
            Shape::Through {
                through,
                first_key,
                second_key,
                local_key,
                second_local_key,
                ..
            } => join_through(query, through, &related, second_key, second_local_key).filter_column(
                &through.qualify(first_key),
                "=",
                &parent.qualify(local_key),
            ),
            Shape::MorphTo { .. } => {
                return Err(QuarryError::Unsupported(format!(
                    "relation existence queries on morph-to relation [{}]",
                    self.name
                )));
            }
        };
        let query = constrain(query)?;
        Ok(query.to_base())
    }
}

/// Joins the intermediate table of a through relation onto the related query.
fn join_through(
    query: EntityQuery,
    through: &EntityMeta,
    related: &EntityMeta,
    second_key: &str,
    second_local_key: &str,
) -> EntityQuery {
    let query = query.join(
        &through.table,
        &through.qualify(second_local_key),
        "=",
        &related.qualify(second_key),
    );
    if through.soft_deletes {
        query.filter_null(&through.qualify(&through.deleted_at))
    } else {
        query
    }
}

impl Model {
    /// Relation `name` constrained to this model.
    pub fn relation(&self, conn: &Connection, name: &str) -> Result<Relation> {
        Relation::of(conn, self, name)
    }

    /// The loaded relation, querying and caching it on first access.
    pub async fn related(&mut self, conn: &mut Connection, name: &str) -> Result<&Loaded> {
        if !self.relation_loaded(name) {
            let loaded = Relation::of(conn, self, name)?.get_results(conn).await?;
            self.set_relation(name, loaded);
        }
        self.get_relation(name).ok_or_else(|| {
            QuarryError::Message(format!("relation [{name}] failed to load"))
        })
    }

    /// Eager loads relations onto this model, replacing cached values.
    pub async fn load(&mut self, conn: &mut Connection, relations: &[&str]) -> Result<&mut Self> {
        let meta = self.meta().clone();
        let registry = self.registry().clone();
        let eager = parse_eager(relations);
        eager_load(conn, &registry, &meta, std::slice::from_mut(&mut *self), &eager).await?;
        Ok(self)
    }

    /// Loads only the relations whose top level is not cached yet.
    pub async fn load_missing(&mut self, conn: &mut Connection, relations: &[&str]) -> Result<&mut Self> {
        let missing: Vec<&str> = relations
            .iter()
            .copied()
            .filter(|path| {
                let top = path
                    .split(['.', ':'])
                    .next()
                    .unwrap_or_default();
                !self.relation_loaded(top)
            })
            .collect();
        if missing.is_empty() {
            return Ok(self);
        }
        self.load(conn, &missing).await
    }
}

#[cfg(test)]
mod tests;
