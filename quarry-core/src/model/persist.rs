use chrono::{NaiveDateTime, Timelike, Utc};

use super::{KeyType, Model, ModelEvent};
use crate::connection::Connection;
use crate::error::{QuarryError, Result};
use crate::query::{Builder, Constrainable};
use crate::value::{Expr, Record, Row, Value};

/// Current UTC time at second precision, the resolution of the storage format.
pub(crate) fn fresh_timestamp() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

fn to_record(row: Row) -> Record {
    row.into_iter()
        .map(|(key, value)| (key, Expr::from(value)))
        .collect()
}

impl Model {
    pub(crate) fn fire(&mut self, event: ModelEvent) -> Result<()> {
        for hook in self.meta.hooks_for(event) {
            hook(self).map_err(|err| {
                tracing::debug!(entity = %self.meta.name, event = event.as_str(), error = %err, "hook aborted");
                err
            })?;
        }
        Ok(())
    }

    fn base_query(&self, conn: &Connection) -> Builder {
        conn.table(&self.meta.table)
    }

    fn keyed_query(&self, conn: &Connection) -> Result<Builder> {
        let key = self.key_for_save_query();
        if key.is_null() {
            return Err(QuarryError::Message(format!(
                "no primary key value on [{}]",
                self.meta.name
            )));
        }
        Ok(self.base_query(conn).filter_eq(&self.meta.primary_key, key))
    }

    /// Stamps `updated_at`, and `created_at` for unsaved models, unless the
    /// caller already set them.
    pub fn update_timestamps(&mut self) -> Result<()> {
        if !self.meta.timestamps {
            return Ok(());
        }
        let now = Value::DateTime(fresh_timestamp());
        let updated_at = self.meta.updated_at.clone();
        if !self.is_dirty_any(&[updated_at.as_str()]) {
            self.set_attribute(&updated_at, now.clone())?;
        }
        let created_at = self.meta.created_at.clone();
        if !self.exists && !self.is_dirty_any(&[created_at.as_str()]) {
            self.set_attribute(&created_at, now)?;
        }
        Ok(())
    }

    /// Inserts or updates the row.
    ///
    /// Unsaved models are inserted and take the generated key; persisted
    /// models update only their dirty attributes, keyed by the loaded key.
    #[tracing::instrument(skip_all, fields(entity = %self.meta.name, exists = self.exists))]
    pub async fn save(&mut self, conn: &mut Connection) -> Result<bool> {
        self.fire(ModelEvent::Saving)?;
        let saved = if self.exists {
            if self.is_dirty() {
                self.perform_update(conn).await?
            } else {
                true
            }
        } else {
            self.perform_insert(conn).await?
        };
        if saved {
            self.fire(ModelEvent::Saved)?;
            self.sync_original();
        }
        Ok(saved)
    }

    async fn perform_update(&mut self, conn: &mut Connection) -> Result<bool> {
        self.fire(ModelEvent::Updating)?;
        self.update_timestamps()?;
        let dirty = self.get_dirty();
        if dirty.is_empty() {
            return Ok(true);
        }
        self.keyed_query(conn)?.update(conn, to_record(dirty)).await?;
        self.sync_changes();
        self.fire(ModelEvent::Updated)?;
        Ok(true)
    }

    async fn perform_insert(&mut self, conn: &mut Connection) -> Result<bool> {
        self.fire(ModelEvent::Creating)?;
        self.update_timestamps()?;

        let key_name = self.meta.primary_key.clone();
        if self.meta.key_type == KeyType::Uuid && self.key().is_null() {
            self.attributes
                .insert(key_name.clone(), Value::Text(uuid::Uuid::new_v4().to_string()));
        }
        let mut attributes = self.attributes.clone();
        let generate_key = self.meta.incrementing && self.key().is_null();
        if generate_key {
            attributes.shift_remove(&key_name);
            let id = self
                .base_query(conn)
                .insert_get_id(conn, to_record(attributes))
                .await?;
            self.attributes.insert(key_name, Value::Int(id));
        } else {
            self.base_query(conn)
                .insert(conn, vec![to_record(attributes)])
                .await?;
        }

        self.exists = true;
        self.was_recently_created = true;
        tracing::debug!(entity = %self.meta.name, key = %self.key(), "inserted");
        self.fire(ModelEvent::Created)?;
        Ok(true)
    }

    /// Fills the fillable subset of `attributes` and saves.
    pub async fn update<I, K, V>(&mut self, conn: &mut Connection, attributes: I) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if !self.exists {
            return Ok(false);
        }
        self.fill(attributes)?;
        self.save(conn).await
    }

    /// Deletes the row; soft-deleting entities stamp `deleted_at` instead.
    #[tracing::instrument(skip_all, fields(entity = %self.meta.name))]
    pub async fn delete(&mut self, conn: &mut Connection) -> Result<bool> {
        if !self.exists {
            return Ok(false);
        }
        self.fire(ModelEvent::Deleting)?;
        if self.meta.soft_deletes {
            self.run_soft_delete(conn).await?;
        } else {
            self.keyed_query(conn)?.delete(conn).await?;
            self.exists = false;
        }
        self.fire(ModelEvent::Deleted)?;
        Ok(true)
    }

    /// Deletes the row even when the entity soft deletes.
    pub async fn force_delete(&mut self, conn: &mut Connection) -> Result<bool> {
        if !self.exists {
            return Ok(false);
        }
        self.fire(ModelEvent::Deleting)?;
        self.keyed_query(conn)?.delete(conn).await?;
        self.exists = false;
        self.fire(ModelEvent::Deleted)?;
        Ok(true)
    }

    async fn run_soft_delete(&mut self, conn: &mut Connection) -> Result<()> {
        let now = Value::DateTime(fresh_timestamp());
        let mut columns = vec![self.meta.deleted_at.clone()];
        if self.meta.timestamps {
            columns.push(self.meta.updated_at.clone());
        }
        let query = self.keyed_query(conn)?;
        for column in &columns {
            self.set_attribute(column, now.clone())?;
        }
        let values: Record = columns
            .iter()
            .map(|column| (column.clone(), Expr::from(self.get_raw(column))))
            .collect();
        query.update(conn, values).await?;
        for column in &columns {
            self.sync_original_attribute(column);
        }
        Ok(())
    }

    /// Clears `deleted_at` on a soft-deleted model.
    pub async fn restore(&mut self, conn: &mut Connection) -> Result<bool> {
        if !self.meta.soft_deletes {
            return Ok(false);
        }
        self.fire(ModelEvent::Restoring)?;
        let deleted_at = self.meta.deleted_at.clone();
        self.set_raw(deleted_at, Value::Null);
        self.exists = true;
        let saved = self.save(conn).await?;
        self.fire(ModelEvent::Restored)?;
        Ok(saved)
    }

    pub fn trashed(&self) -> bool {
        self.meta.soft_deletes && !self.get_raw(&self.meta.deleted_at).is_null()
    }

    /// Saves with a fresh `updated_at`.
    pub async fn touch(&mut self, conn: &mut Connection) -> Result<bool> {
        if !self.meta.timestamps {
            return Ok(false);
        }
        let updated_at = self.meta.updated_at.clone();
        self.set_attribute(&updated_at, Value::DateTime(fresh_timestamp()))?;
        self.save(conn).await
    }

    /// Reloads this row, ignoring global scopes, with the same relations loaded.
    pub async fn fresh(&self, conn: &mut Connection) -> Result<Option<Model>> {
        if !self.exists {
            return Ok(None);
        }
        let names: Vec<&str> = self.relations.keys().map(String::as_str).collect();
        conn.query_for(self.meta.clone())
            .without_global_scopes()
            .with(&names)
            .filter_eq(&self.meta.qualified_key_name(), self.key_for_save_query())
            .first(conn)
            .await
    }

    /// Replaces attributes and loaded relations with a fresh copy from the database.
    pub async fn refresh(&mut self, conn: &mut Connection) -> Result<&mut Self> {
        let Some(fresh) = self.fresh(conn).await? else {
            return Err(QuarryError::model_not_found(
                self.meta.name.clone(),
                vec![self.key_for_save_query()],
            ));
        };
        self.attributes = fresh.attributes;
        self.relations = fresh.relations;
        self.sync_original();
        Ok(self)
    }

    pub async fn increment(&mut self, conn: &mut Connection, column: &str, amount: i64) -> Result<u64> {
        self.increment_or_decrement(conn, column, amount).await
    }

    pub async fn decrement(&mut self, conn: &mut Connection, column: &str, amount: i64) -> Result<u64> {
        self.increment_or_decrement(conn, column, -amount).await
    }

    async fn increment_or_decrement(
        &mut self,
        conn: &mut Connection,
        column: &str,
        amount: i64,
    ) -> Result<u64> {
        let current = self.get_raw(column);
        let next = match current {
            Value::Float(value) => Value::Float(value + amount as f64),
            other => Value::Int(other.as_i64().unwrap_or(0) + amount),
        };
        if !self.exists {
            self.set_raw(column, next);
            return Ok(0);
        }

        self.fire(ModelEvent::Updating)?;
        let mut extra = Record::new();
        let mut touched = vec![column.to_owned()];
        if self.meta.timestamps {
            let updated_at = self.meta.updated_at.clone();
            self.set_attribute(&updated_at, Value::DateTime(fresh_timestamp()))?;
            extra.insert(updated_at.clone(), Expr::from(self.get_raw(&updated_at)));
            touched.push(updated_at);
        }
        let affected = self
            .keyed_query(conn)?
            .increment_with(conn, column, amount, extra)
            .await?;
        self.set_raw(column, next);
        for key in &touched {
            self.sync_original_attribute(key);
        }
        self.fire(ModelEvent::Updated)?;
        Ok(affected)
    }

    /// An unsaved copy without the key, timestamps and the `except` keys.
    pub fn replicate(&self, except: &[&str]) -> Model {
        let mut excluded = vec![self.meta.primary_key.as_str()];
        if self.meta.timestamps {
            excluded.push(self.meta.created_at.as_str());
            excluded.push(self.meta.updated_at.as_str());
        }
        excluded.extend_from_slice(except);

        let mut copy = Model::new(self.meta.clone(), self.registry.clone());
        copy.attributes = self
            .attributes
            .iter()
            .filter(|(key, _)| !excluded.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        copy.relations = self.relations.clone();
        copy
    }
}
