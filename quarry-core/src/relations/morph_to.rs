use std::collections::HashMap;

use indexmap::IndexMap;

use super::{Relation, Shape};
use crate::connection::Connection;
use crate::entity_query::{EagerConstraint, EagerMap, EntityQuery};
use crate::error::Result;
use crate::model::{Loaded, Model};
use crate::query::Constrainable;
use crate::value::{unique_sorted_keys, Value};

impl Relation {
    /// Groups parents by their type column and runs one query per type.
    pub(super) async fn eager_load_morph_to(
        self,
        conn: &mut Connection,
        models: &mut [Model],
        constraint: Option<EagerConstraint>,
        nested: EagerMap,
    ) -> Result<()> {
        let Shape::MorphTo {
            type_column,
            id_column,
            owner_key,
        } = &self.shape
        else {
            return Ok(());
        };
        self.init_relation(models);

        let mut groups: IndexMap<String, Vec<Value>> = IndexMap::new();
        for model in models.iter() {
            let alias = model.get_raw(type_column);
            let id = model.get_raw(id_column);
            if alias.is_null() || id.is_null() {
                continue;
            }
            groups.entry(alias.to_string()).or_default().push(id);
        }

        for (alias, ids) in groups {
            let meta = self.registry.resolve_morph(&alias)?;
            let key = owner_key
                .clone()
                .unwrap_or_else(|| meta.primary_key.clone());
            let mut query = EntityQuery::new(
                self.query.builder().fork(),
                meta.clone(),
                self.registry.clone(),
            )
            .filter_in(&meta.qualify(&key), unique_sorted_keys(ids));
            if let Some(constraint) = &constraint {
                query = constraint(query);
            }
            tracing::debug!(relation = %self.name, morph_type = %alias, "eager loading morph-to group");
            let results = query.with_eager_map(nested.clone()).get(conn).await?;

            let dictionary: HashMap<String, Model> = results
                .into_iter()
                .filter_map(|model| model.get_raw(&key).to_key().map(|found| (found, model)))
                .collect();
            for model in models.iter_mut() {
                if model.get_raw(type_column).to_string() != alias {
                    continue;
                }
                let Some(owner) = model
                    .get_raw(id_column)
                    .to_key()
                    .and_then(|id| dictionary.get(&id))
                else {
                    continue;
                };
                model.set_relation(self.name.clone(), Loaded::One(Some(Box::new(owner.clone()))));
            }
        }
        Ok(())
    }
}
