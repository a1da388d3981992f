//! Active-record entities.
//!
//! A [`Model`] is the dynamic attribute bag behind every entity: current
//! attributes, the snapshot taken at load or save time, loaded relations and
//! the `exists` flag. [`EntityMeta`] carries the per-type configuration and
//! is shared by every model of that type. Typed structs implement [`Entity`]
//! and convert to and from models.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::collection::Collection;
use crate::error::Result;
use crate::registry::Registry;
use crate::value::{Row, Value};

mod attributes;
mod cast;
mod definition;
mod entity;
mod guard;
mod persist;
mod serialize;

pub use cast::Cast;
pub use definition::{
    Accessor, EntityDef, EntityMeta, EntityRef, Hook, KeyType, LocalScope, ModelEvent, Mutator,
    Scope,
};
pub use entity::Entity;

pub(crate) use cast::storage_date;
pub(crate) use persist::fresh_timestamp;

/// A relation value cached on a model.
#[derive(Debug, Clone)]
pub enum Loaded {
    One(Option<Box<Model>>),
    Many(Collection),
}

impl Loaded {
    pub fn as_one(&self) -> Option<&Model> {
        match self {
            Loaded::One(model) => model.as_deref(),
            Loaded::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&Collection> {
        match self {
            Loaded::Many(collection) => Some(collection),
            Loaded::One(_) => None,
        }
    }

    /// Every loaded model, whatever the cardinality.
    pub fn models(&self) -> Vec<&Model> {
        match self {
            Loaded::One(model) => model.iter().map(|model| model.as_ref()).collect(),
            Loaded::Many(collection) => collection.iter().collect(),
        }
    }

    pub(crate) fn models_mut(&mut self) -> Vec<&mut Model> {
        match self {
            Loaded::One(model) => model.iter_mut().map(|model| model.as_mut()).collect(),
            Loaded::Many(collection) => collection.iter_mut().collect(),
        }
    }
}

/// One row of an entity.
#[derive(Clone)]
pub struct Model {
    meta: Arc<EntityMeta>,
    registry: Arc<Registry>,
    pub(crate) attributes: Row,
    pub(crate) original: Row,
    pub(crate) changes: Row,
    pub(crate) relations: IndexMap<String, Loaded>,
    pub(crate) exists: bool,
    pub(crate) was_recently_created: bool,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("entity", &self.meta.name)
            .field("exists", &self.exists)
            .field("attributes", &self.attributes)
            .field("relations", &self.relations)
            .finish()
    }
}

impl Model {
    /// A fresh, unsaved model.
    pub fn new(meta: Arc<EntityMeta>, registry: Arc<Registry>) -> Self {
        Self {
            meta,
            registry,
            attributes: Row::new(),
            original: Row::new(),
            changes: Row::new(),
            relations: IndexMap::new(),
            exists: false,
            was_recently_created: false,
        }
    }

    /// A persisted model hydrated from a fetched row.
    pub(crate) fn from_row(meta: Arc<EntityMeta>, registry: Arc<Registry>, row: Row) -> Self {
        let mut model = Self::new(meta, registry);
        model.original = row.clone();
        model.attributes = row;
        model.exists = true;
        model
    }

    /// An unsaved model holding a typed entity's attributes.
    pub fn from_entity<T: crate::model::Entity>(entity: &T, registry: &Arc<Registry>) -> Self {
        let meta = registry.meta_or_define::<T>();
        let mut model = Self::new(meta, registry.clone());
        for (key, value) in entity.to_attributes() {
            if key == model.meta.primary_key && value.is_null() && model.meta.incrementing {
                continue;
            }
            model.attributes.insert(key, value);
        }
        model
    }

    pub fn to_entity<T: crate::model::Entity>(&self) -> Result<T> {
        T::from_model(self)
    }

    pub fn meta(&self) -> &Arc<EntityMeta> {
        &self.meta
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn entity_name(&self) -> &str {
        &self.meta.name
    }

    pub fn table(&self) -> &str {
        &self.meta.table
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn was_recently_created(&self) -> bool {
        self.was_recently_created
    }

    pub fn key_name(&self) -> &str {
        &self.meta.primary_key
    }

    /// Current primary key value, `Null` when unassigned.
    pub fn key(&self) -> Value {
        self.get_raw(&self.meta.primary_key)
    }

    /// Key used in `where` clauses of updates and deletes: the loaded key,
    /// even if the attribute has since been changed.
    pub(crate) fn key_for_save_query(&self) -> Value {
        match self.original.get(&self.meta.primary_key) {
            Some(value) if !value.is_null() => value.clone(),
            _ => self.key(),
        }
    }

    // ----------------------------------------------------------------------
    // loaded relations
    // ----------------------------------------------------------------------

    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn get_relation(&self, name: &str) -> Option<&Loaded> {
        self.relations.get(name)
    }

    pub(crate) fn get_relation_mut(&mut self, name: &str) -> Option<&mut Loaded> {
        self.relations.get_mut(name)
    }

    /// The loaded to-one relation, if loaded and present.
    pub fn one(&self, name: &str) -> Option<&Model> {
        self.relations.get(name).and_then(Loaded::as_one)
    }

    /// The loaded to-many relation, if loaded.
    pub fn many(&self, name: &str) -> Option<&Collection> {
        self.relations.get(name).and_then(Loaded::as_many)
    }

    pub fn relations(&self) -> &IndexMap<String, Loaded> {
        &self.relations
    }

    pub fn set_relation(&mut self, name: impl Into<String>, value: Loaded) -> &mut Self {
        self.relations.insert(name.into(), value);
        self
    }

    pub fn unset_relation(&mut self, name: &str) -> &mut Self {
        self.relations.shift_remove(name);
        self
    }

    /// Drops an attribute from both the current and original maps.
    pub(crate) fn take_attribute(&mut self, key: &str) -> Option<Value> {
        self.original.shift_remove(key);
        self.attributes.shift_remove(key)
    }
}

#[cfg(test)]
mod tests;
