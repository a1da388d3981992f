//! Process-level entity state held in one explicitly shared object.
//!
//! The [`Registry`] resolves entity definitions into shared [`EntityMeta`],
//! keeps the morph map used by polymorphic relations, holds global scopes
//! added after definition, and carries the mass-assignment unguard switch.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;

use crate::error::{QuarryError, Result};
use crate::model::{Entity, EntityDef, EntityMeta, EntityRef, Model, Scope};

type ScopeMap = IndexMap<String, Arc<dyn Scope>>;

#[derive(Default)]
pub struct Registry {
    metas: RwLock<HashMap<String, Arc<EntityMeta>>>,
    morph_map: RwLock<IndexMap<String, EntityRef>>,
    scopes: RwLock<HashMap<String, ScopeMap>>,
    unguarded: AtomicBool,
    self_joins: AtomicUsize,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metas = self.metas.read().unwrap_or_else(PoisonError::into_inner);
        let morphs = self.morph_map.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Registry")
            .field("entities", &metas.keys().collect::<Vec<_>>())
            .field("morph_map", &morphs.keys().collect::<Vec<_>>())
            .field("unguarded", &self.is_unguarded())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a definition, replacing any earlier one of the same name.
    pub fn define(&self, definition: EntityDef) -> Arc<EntityMeta> {
        let meta = Arc::new(definition.build());
        tracing::debug!(entity = %meta.name, table = %meta.table, "entity defined");
        if let Some(alias) = &meta.morph_alias {
            self.morph_map
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(alias.clone())
                .or_insert_with(|| EntityRef::named(meta.name.clone()));
        }
        self.metas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(meta.name.clone(), meta.clone());
        meta
    }

    pub fn register<T: Entity>(&self) -> Arc<EntityMeta> {
        self.define(T::definition())
    }

    /// The metadata of `T`, defining it on first use.
    pub fn meta_or_define<T: Entity>(&self) -> Arc<EntityMeta> {
        if let Some(meta) = self.lookup(T::NAME) {
            return meta;
        }
        self.register::<T>()
    }

    pub fn resolve(&self, entity: &EntityRef) -> Result<Arc<EntityMeta>> {
        if let Some(meta) = self.lookup(&entity.name) {
            return Ok(meta);
        }
        match entity.definition {
            Some(definition) => Ok(self.define(definition())),
            None => Err(QuarryError::UnknownEntity(entity.name.clone())),
        }
    }

    pub fn meta(&self, name: &str) -> Result<Arc<EntityMeta>> {
        self.lookup(name)
            .ok_or_else(|| QuarryError::UnknownEntity(name.to_owned()))
    }

    fn lookup(&self, name: &str) -> Option<Arc<EntityMeta>> {
        self.metas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    // ----------------------------------------------------------------------
    // morph map
    // ----------------------------------------------------------------------

    /// Stores `alias` in polymorphic type columns for `T`.
    pub fn morph_map<T: Entity>(&self, alias: impl Into<String>) -> &Self {
        self.morph_map_entity(alias, EntityRef::of::<T>())
    }

    pub fn morph_map_entity(&self, alias: impl Into<String>, entity: EntityRef) -> &Self {
        self.morph_map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alias.into(), entity);
        self
    }

    /// The discriminator stored for `meta`: mapped alias, declared alias, or name.
    pub fn morph_alias(&self, meta: &EntityMeta) -> String {
        let mapped = self
            .morph_map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, entity)| entity.name == meta.name)
            .map(|(alias, _)| alias.clone());
        mapped
            .or_else(|| meta.morph_alias.clone())
            .unwrap_or_else(|| meta.name.clone())
    }

    /// The entity stored under a polymorphic discriminator.
    pub fn resolve_morph(&self, alias: &str) -> Result<Arc<EntityMeta>> {
        let mapped = self
            .morph_map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)
            .cloned();
        if let Some(entity) = mapped {
            return self.resolve(&entity);
        }
        if let Some(meta) = self.lookup(alias) {
            return Ok(meta);
        }
        self.metas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|meta| meta.morph_alias.as_deref() == Some(alias))
            .cloned()
            .ok_or_else(|| QuarryError::UnknownEntity(alias.to_owned()))
    }

    // ----------------------------------------------------------------------
    // global scopes
    // ----------------------------------------------------------------------

    /// Adds a global scope to an entity after it was defined.
    pub fn add_global_scope(
        &self,
        entity: &str,
        name: impl Into<String>,
        scope: impl Scope + 'static,
    ) -> &Self {
        self.scopes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity.to_owned())
            .or_default()
            .insert(name.into(), Arc::new(scope));
        self
    }

    /// Definition scopes followed by scopes added at runtime.
    pub fn global_scopes(&self, meta: &EntityMeta) -> Vec<(String, Arc<dyn Scope>)> {
        let mut scopes: Vec<(String, Arc<dyn Scope>)> = meta
            .global_scopes
            .iter()
            .map(|(name, scope)| (name.clone(), scope.clone()))
            .collect();
        if let Some(extra) = self
            .scopes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&meta.name)
        {
            scopes.extend(extra.iter().map(|(name, scope)| (name.clone(), scope.clone())));
        }
        scopes
    }

    // ----------------------------------------------------------------------
    // mass assignment
    // ----------------------------------------------------------------------

    /// Disables mass-assignment guards for every entity.
    pub fn unguard(&self) {
        self.unguarded.store(true, Ordering::SeqCst);
    }

    pub fn reguard(&self) {
        self.unguarded.store(false, Ordering::SeqCst);
    }

    pub fn is_unguarded(&self) -> bool {
        self.unguarded.load(Ordering::SeqCst)
    }

    /// Fresh alias for a table joined against itself in an existence query.
    pub(crate) fn next_self_alias(&self) -> String {
        format!("quarry_reserved_{}", self.self_joins.fetch_add(1, Ordering::SeqCst))
    }

    /// Runs `f` unguarded, restoring the previous state afterwards.
    pub fn unguarded<T>(&self, f: impl FnOnce() -> T) -> T {
        let _restore = GuardRestore {
            flag: &self.unguarded,
            previous: self.unguarded.swap(true, Ordering::SeqCst),
        };
        f()
    }

    // ----------------------------------------------------------------------
    // models
    // ----------------------------------------------------------------------

    /// An empty, unsaved model of `T`.
    pub fn make<T: Entity>(self: &Arc<Self>) -> Model {
        Model::new(self.meta_or_define::<T>(), self.clone())
    }

    pub fn make_for(self: &Arc<Self>, meta: Arc<EntityMeta>) -> Model {
        Model::new(meta, self.clone())
    }
}

/// Puts the guard flag back when dropped, including during unwinding.
struct GuardRestore<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl Drop for GuardRestore<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}
