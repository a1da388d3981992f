use super::{Relation, RelationKind, Shape};
use crate::connection::Connection;
use crate::error::{QuarryError, Result};
use crate::model::{Loaded, Model};
use crate::value::{Record, Value};

impl Relation {
    /// Points `model` at the parent and saves it. Many-to-many relations
    /// save the model and attach it.
    pub async fn save(&self, conn: &mut Connection, model: &mut Model) -> Result<bool> {
        match &self.shape {
            Shape::HasOneOrMany {
                foreign_key, morph, ..
            } => {
                model.set_raw(foreign_key, self.parent_value.clone());
                if let Some(morph) = morph {
                    model.set_raw(&morph.column, morph.alias.clone());
                }
                model.save(conn).await
            }
            Shape::BelongsToMany(_) => self.save_and_attach(conn, model, Record::new()).await,
            _ => Err(QuarryError::Message(format!(
                "cannot save through {:?} relation [{}]; associate the parent instead",
                self.kind, self.name
            ))),
        }
    }

    pub async fn save_many(&self, conn: &mut Connection, models: &mut [Model]) -> Result<()> {
        for model in models.iter_mut() {
            self.save(conn, model).await?;
        }
        Ok(())
    }

    /// Creates a related model from fillable `attributes` linked to the parent.
    pub async fn create<I, K, V>(&self, conn: &mut Connection, attributes: I) -> Result<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.registry.make_for(self.related.clone());
        model.fill(attributes)?;
        self.save(conn, &mut model).await?;
        Ok(model)
    }
}

impl Model {
    /// Sets the foreign key (and morph type) of a belongs-to or morph-to
    /// relation to `owner` and caches it. Does not save.
    pub fn associate(&mut self, name: &str, owner: &Model) -> Result<&mut Self> {
        let meta = self.meta().clone();
        let def = meta.relation(name)?;
        let shape = def.resolve(name, &meta, owner.meta(), None, self.registry())?;
        match shape {
            Shape::BelongsTo {
                foreign_key,
                owner_key,
            } => {
                self.set_raw(foreign_key, owner.get_raw(&owner_key));
            }
            Shape::MorphTo {
                type_column,
                id_column,
                owner_key,
            } => {
                let key = owner_key.unwrap_or_else(|| owner.key_name().to_owned());
                let alias = self.registry().morph_alias(owner.meta());
                self.set_raw(id_column, owner.get_raw(&key));
                self.set_raw(type_column, alias);
            }
            _ => return Err(not_an_owner(&meta.name, name, def.kind)),
        }
        self.set_relation(name, Loaded::One(Some(Box::new(owner.clone()))));
        Ok(self)
    }

    /// Clears the foreign key (and morph type) of a belongs-to or morph-to relation.
    pub fn dissociate(&mut self, name: &str) -> Result<&mut Self> {
        let meta = self.meta().clone();
        let def = meta.relation(name)?;
        let related = match def.related() {
            Some(entity) => self.registry().resolve(entity)?,
            None => meta.clone(),
        };
        let shape = def.resolve(name, &meta, &related, None, self.registry())?;
        match shape {
            Shape::BelongsTo { foreign_key, .. } => {
                self.set_raw(foreign_key, Value::Null);
            }
            Shape::MorphTo {
                type_column,
                id_column,
                ..
            } => {
                self.set_raw(id_column, Value::Null);
                self.set_raw(type_column, Value::Null);
            }
            _ => return Err(not_an_owner(&meta.name, name, def.kind)),
        }
        self.set_relation(name, Loaded::One(None));
        Ok(self)
    }
}

fn not_an_owner(entity: &str, relation: &str, kind: RelationKind) -> QuarryError {
    QuarryError::Message(format!(
        "relation [{relation}] on [{entity}] is {kind:?}; only belongs-to and morph-to relations can be associated"
    ))
}
