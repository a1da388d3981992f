//! Ordered sets of models returned by entity queries.

use std::cmp::Ordering;
use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::connection::Connection;
use crate::entity_query::{eager_load, parse_eager};
use crate::error::Result;
use crate::model::{Entity, Model};
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct Collection {
    items: Vec<Model>,
}

impl Collection {
    pub fn new(items: Vec<Model>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Model> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Model> {
        self.items.iter_mut()
    }

    pub fn first(&self) -> Option<&Model> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&Model> {
        self.items.last()
    }

    pub fn get(&self, index: usize) -> Option<&Model> {
        self.items.get(index)
    }

    pub fn push(&mut self, model: Model) {
        self.items.push(model);
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Model] {
        &mut self.items
    }

    /// The model whose primary key loosely equals `key`.
    pub fn find(&self, key: impl Into<Value>) -> Option<&Model> {
        let key = key.into().to_key()?;
        self.items
            .iter()
            .find(|model| model.key().to_key().as_deref() == Some(key.as_str()))
    }

    pub fn contains_key(&self, key: impl Into<Value>) -> bool {
        self.find(key).is_some()
    }

    /// Primary keys in order.
    pub fn keys(&self) -> Vec<Value> {
        self.items.iter().map(Model::key).collect()
    }

    /// Cast values of `column` in order.
    pub fn pluck(&self, column: &str) -> Vec<Value> {
        self.items
            .iter()
            .map(|model| model.get_attribute(column))
            .collect()
    }

    /// Keyed by the raw value of `column`; later models overwrite earlier ones.
    pub fn key_by(&self, column: &str) -> IndexMap<String, Model> {
        let mut keyed = IndexMap::with_capacity(self.items.len());
        for model in &self.items {
            if let Some(key) = model.get_raw(column).to_key() {
                keyed.insert(key, model.clone());
            }
        }
        keyed
    }

    /// Keyed by primary key.
    pub fn get_dictionary(&self) -> IndexMap<String, Model> {
        let mut keyed = IndexMap::with_capacity(self.items.len());
        for model in &self.items {
            if let Some(key) = model.key().to_key() {
                keyed.insert(key, model.clone());
            }
        }
        keyed
    }

    /// First model per primary key.
    pub fn unique(&self) -> Collection {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .filter(|model| match model.key().to_key() {
                Some(key) => seen.insert(key),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Models whose key is absent from `other`.
    pub fn diff(&self, other: &Collection) -> Collection {
        let keys = other.key_set();
        self.items
            .iter()
            .filter(|model| !model.key().to_key().is_some_and(|key| keys.contains(&key)))
            .cloned()
            .collect()
    }

    /// Models whose key is present in `other`.
    pub fn intersect(&self, other: &Collection) -> Collection {
        let keys = other.key_set();
        self.items
            .iter()
            .filter(|model| model.key().to_key().is_some_and(|key| keys.contains(&key)))
            .cloned()
            .collect()
    }

    fn key_set(&self) -> HashSet<String> {
        self.items
            .iter()
            .filter_map(|model| model.key().to_key())
            .collect()
    }

    pub fn filter(&self, predicate: impl Fn(&Model) -> bool) -> Collection {
        self.items.iter().filter(|model| predicate(model)).cloned().collect()
    }

    pub fn sort_by(mut self, compare: impl FnMut(&Model, &Model) -> Ordering) -> Collection {
        self.items.sort_by(compare);
        self
    }

    /// Eager loads `relations` onto every model with one query per relation.
    pub async fn load(&mut self, conn: &mut Connection, relations: &[&str]) -> Result<&mut Self> {
        let Some(first) = self.items.first() else {
            return Ok(self);
        };
        let meta = first.meta().clone();
        let registry = first.registry().clone();
        let eager = parse_eager(relations);
        eager_load(conn, &registry, &meta, &mut self.items, &eager).await?;
        Ok(self)
    }

    pub fn to_array(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.items
                .iter()
                .map(|model| serde_json::Value::Object(model.to_array()))
                .collect(),
        )
    }

    pub fn to_json(&self) -> String {
        self.to_array().to_string()
    }

    pub fn into_vec(self) -> Vec<Model> {
        self.items
    }

    pub fn to_entities<T: Entity>(&self) -> Result<Vec<T>> {
        self.items.iter().map(T::from_model).collect()
    }
}

impl From<Vec<Model>> for Collection {
    fn from(items: Vec<Model>) -> Self {
        Self { items }
    }
}

impl FromIterator<Model> for Collection {
    fn from_iter<I: IntoIterator<Item = Model>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Collection {
    type Item = Model;
    type IntoIter = std::vec::IntoIter<Model>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Model;
    type IntoIter = std::slice::Iter<'a, Model>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl Serialize for Collection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityDef;
    use crate::registry::Registry;

    fn users(ids: &[i64]) -> Collection {
        let registry = Registry::new();
        let meta = registry.define(EntityDef::new("User"));
        ids.iter()
            .map(|id| {
                let mut model = registry.make_for(meta.clone());
                model.set_raw("id", *id).set_raw("name", format!("user{id}"));
                model
            })
            .collect()
    }

    #[test]
    fn find_matches_loose_keys() {
        let users = users(&[1, 2, 3]);
        assert_eq!(users.find("2").unwrap().get_raw("name"), Value::from("user2"));
        assert!(users.contains_key(3));
        assert!(!users.contains_key(9));
    }

    #[test]
    fn dictionary_last_duplicate_wins() {
        let mut users = users(&[1, 2]);
        let mut dup = users.get(0).unwrap().clone();
        dup.set_raw("name", "again");
        users.push(dup);
        let dictionary = users.get_dictionary();
        assert_eq!(dictionary.len(), 2);
        assert_eq!(dictionary["1"].get_raw("name"), Value::from("again"));
        assert_eq!(users.unique().len(), 2);
    }

    #[test]
    fn diff_and_intersect_by_key() {
        let all = users(&[1, 2, 3]);
        let some = users(&[2, 4]);
        assert_eq!(all.diff(&some).keys(), vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(all.intersect(&some).keys(), vec![Value::Int(2)]);
    }

    #[test]
    fn serializes_as_array_of_objects() {
        let json = users(&[7]).to_json();
        assert_eq!(json, r#"[{"id":7,"name":"user7"}]"#);
    }
}
