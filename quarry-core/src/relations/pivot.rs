use std::collections::HashSet;
use std::sync::Arc;

use super::definition::{MorphType, Shape};
use super::Relation;
use crate::collection::Collection;
use crate::connection::Connection;
use crate::error::{QuarryError, Result};
use crate::model::{fresh_timestamp, EntityDef, Loaded, Model};
use crate::query::{Builder, Constrainable};
use crate::registry::Registry;
use crate::value::{Expr, Record, Value};

/// Prefix of pivot columns selected alongside related rows.
const PIVOT_PREFIX: &str = "pivot_";

/// Resolved intermediate table of a many-to-many relation.
#[derive(Debug, Clone)]
pub(crate) struct PivotSpec {
    pub table: String,
    pub foreign_pivot_key: String,
    pub related_pivot_key: String,
    pub parent_key: String,
    pub related_key: String,
    pub columns: Vec<String>,
    pub timestamps: bool,
    pub morph: Option<MorphType>,
}

impl PivotSpec {
    pub(crate) fn qualify(&self, column: &str) -> String {
        format!("{}.{column}", self.table)
    }

    /// Every pivot column loaded onto the `pivot` relation.
    fn loaded_columns(&self) -> Vec<String> {
        let mut columns = vec![
            self.foreign_pivot_key.clone(),
            self.related_pivot_key.clone(),
        ];
        if let Some(morph) = &self.morph {
            columns.push(morph.column.clone());
        }
        for column in &self.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        if self.timestamps {
            for column in ["created_at", "updated_at"] {
                if !columns.iter().any(|existing| existing == column) {
                    columns.push(column.to_owned());
                }
            }
        }
        columns
    }

    /// `role_user.user_id as pivot_user_id` for every loaded column.
    pub(crate) fn select_columns(&self) -> Vec<String> {
        self.loaded_columns()
            .into_iter()
            .map(|column| format!("{} as {PIVOT_PREFIX}{column}", self.qualify(&column)))
            .collect()
    }

    /// Moves `pivot_*` attributes of each fetched row into a `pivot` model.
    pub(crate) fn hydrate(&self, results: &mut Collection, registry: &Arc<Registry>) {
        let meta = Arc::new(
            EntityDef::new("Pivot")
                .table(&self.table)
                .timestamps(self.timestamps)
                .unguarded()
                .build(),
        );
        for model in results.iter_mut() {
            let mut pivot = registry.make_for(meta.clone());
            for column in self.loaded_columns() {
                if let Some(value) = model.take_attribute(&format!("{PIVOT_PREFIX}{column}")) {
                    pivot.set_raw(&column, value);
                }
            }
            pivot.sync_original();
            pivot.exists = true;
            model.set_relation("pivot", Loaded::One(Some(Box::new(pivot))));
        }
    }

    /// Joins the pivot table onto a related query.
    pub(crate) fn join<Q: Constrainable>(&self, query: Q, related_table: &str) -> Q {
        query.join(
            &self.table,
            &format!("{related_table}.{}", self.related_key),
            "=",
            &self.qualify(&self.related_pivot_key),
        )
    }
}

/// What a sync changed, by related key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncChanges {
    pub attached: Vec<Value>,
    pub detached: Vec<Value>,
    pub updated: Vec<Value>,
}

impl Relation {
    fn pivot(&self) -> Result<&PivotSpec> {
        match &self.shape {
            Shape::BelongsToMany(pivot) => Ok(pivot),
            _ => Err(QuarryError::Message(format!(
                "relation [{}] on [{}] has no pivot table",
                self.name, self.parent.name
            ))),
        }
    }

    fn pivot_mut(&mut self) -> Option<&mut PivotSpec> {
        match &mut self.shape {
            Shape::BelongsToMany(pivot) => Some(pivot),
            _ => None,
        }
    }

    /// Loads extra pivot columns onto each related model's `pivot`.
    pub fn with_pivot(mut self, columns: &[&str]) -> Self {
        if let Some(pivot) = self.pivot_mut() {
            pivot
                .columns
                .extend(columns.iter().map(|column| (*column).to_owned()));
        }
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        if let Some(pivot) = self.pivot_mut() {
            pivot.timestamps = true;
        }
        self
    }

    /// Filters on a pivot column.
    pub fn where_pivot(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        let column = match &self.shape {
            Shape::BelongsToMany(pivot) => pivot.qualify(column),
            _ => column.to_owned(),
        };
        self.filter(&column, operator, value.into())
    }

    pub fn where_pivot_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let column = match &self.shape {
            Shape::BelongsToMany(pivot) => pivot.qualify(column),
            _ => column.to_owned(),
        };
        self.filter_in(&column, values)
    }

    /// Pivot rows belonging to the parent.
    fn pivot_query(&self, conn: &Connection) -> Result<Builder> {
        let pivot = self.pivot()?;
        if self.parent_value.is_null() {
            return Err(QuarryError::Message(format!(
                "relation [{}] needs a saved parent to reach its pivot rows",
                self.name
            )));
        }
        let mut query = conn
            .table(&pivot.table)
            .filter_eq(&pivot.foreign_pivot_key, self.parent_value.clone());
        if let Some(morph) = &pivot.morph {
            query = query.filter_eq(&morph.column, morph.alias.clone());
        }
        Ok(query)
    }

    fn pivot_record(&self, pivot: &PivotSpec, id: Value, attributes: Record) -> Record {
        let mut record = Record::new();
        record.insert(
            pivot.foreign_pivot_key.clone(),
            Expr::from(self.parent_value.clone()),
        );
        record.insert(pivot.related_pivot_key.clone(), Expr::from(id));
        if let Some(morph) = &pivot.morph {
            record.insert(morph.column.clone(), Expr::from(morph.alias.clone()));
        }
        if pivot.timestamps {
            let now = Value::DateTime(fresh_timestamp());
            record.insert("created_at".to_owned(), Expr::from(now.clone()));
            record.insert("updated_at".to_owned(), Expr::from(now));
        }
        record.extend(attributes);
        record
    }

    /// Inserts one pivot row per id, each carrying `attributes`.
    pub async fn attach<I, V>(&self, conn: &mut Connection, ids: I, attributes: Record) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let pivot = self.pivot()?;
        let query = self.pivot_query(conn)?;
        let records: Vec<Record> = ids
            .into_iter()
            .map(|id| self.pivot_record(pivot, id.into(), attributes.clone()))
            .collect();
        if records.is_empty() {
            return Ok(());
        }
        tracing::debug!(relation = %self.name, rows = records.len(), "attaching pivot rows");
        query.insert(conn, records).await?;
        Ok(())
    }

    /// Deletes the pivot rows for `ids`; an empty list detaches nothing.
    pub async fn detach<I, V>(&self, conn: &mut Connection, ids: I) -> Result<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let pivot = self.pivot()?;
        self.pivot_query(conn)?
            .filter_in(&pivot.related_pivot_key, ids)
            .delete(conn)
            .await
    }

    /// Deletes every pivot row of the parent.
    pub async fn detach_all(&self, conn: &mut Connection) -> Result<u64> {
        self.pivot_query(conn)?.delete(conn).await
    }

    /// Updates the extra columns of one existing pivot row.
    pub async fn update_existing_pivot(
        &self,
        conn: &mut Connection,
        id: impl Into<Value>,
        mut attributes: Record,
    ) -> Result<u64> {
        let pivot = self.pivot()?;
        if pivot.timestamps && !attributes.contains_key("updated_at") {
            attributes.insert(
                "updated_at".to_owned(),
                Expr::from(Value::DateTime(fresh_timestamp())),
            );
        }
        self.pivot_query(conn)?
            .filter_eq(&pivot.related_pivot_key, id.into())
            .update(conn, attributes)
            .await
    }

    /// Makes the pivot rows match `ids` exactly.
    pub async fn sync<I, V>(&self, conn: &mut Connection, ids: I) -> Result<SyncChanges>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let records = ids.into_iter().map(|id| (id.into(), Record::new())).collect();
        self.sync_with(conn, records, true).await
    }

    /// Attaches missing ids and leaves the rest alone.
    pub async fn sync_without_detaching<I, V>(&self, conn: &mut Connection, ids: I) -> Result<SyncChanges>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let records = ids.into_iter().map(|id| (id.into(), Record::new())).collect();
        self.sync_with(conn, records, false).await
    }

    /// Syncs ids with per-row pivot attributes. Existing rows whose
    /// attributes are given get updated; absent rows are detached when
    /// `detaching` is set.
    pub async fn sync_with(
        &self,
        conn: &mut Connection,
        records: Vec<(Value, Record)>,
        detaching: bool,
    ) -> Result<SyncChanges> {
        let pivot = self.pivot()?;
        let current = self
            .pivot_query(conn)?
            .pluck(conn, &pivot.related_pivot_key)
            .await?;
        let current_keys: HashSet<String> = current.iter().filter_map(Value::to_key).collect();
        let wanted_keys: HashSet<String> = records.iter().filter_map(|(id, _)| id.to_key()).collect();

        let mut changes = SyncChanges::default();
        if detaching {
            let stale: Vec<Value> = current
                .into_iter()
                .filter(|id| !id.to_key().is_some_and(|key| wanted_keys.contains(&key)))
                .collect();
            if !stale.is_empty() {
                self.detach(conn, stale.clone()).await?;
                changes.detached = stale;
            }
        }

        for (id, attributes) in records {
            let known = id.to_key().is_some_and(|key| current_keys.contains(&key));
            if !known {
                self.attach(conn, [id.clone()], attributes).await?;
                changes.attached.push(id);
            } else if !attributes.is_empty()
                && self
                    .update_existing_pivot(conn, id.clone(), attributes)
                    .await?
                    > 0
            {
                changes.updated.push(id);
            }
        }
        tracing::debug!(
            relation = %self.name,
            attached = changes.attached.len(),
            detached = changes.detached.len(),
            updated = changes.updated.len(),
            "pivot synced"
        );
        Ok(changes)
    }

    /// Saves `model` and attaches it with `attributes`.
    pub(crate) async fn save_and_attach(
        &self,
        conn: &mut Connection,
        model: &mut Model,
        attributes: Record,
    ) -> Result<bool> {
        let pivot = self.pivot()?;
        let saved = model.save(conn).await?;
        let id = model.get_raw(&pivot.related_key);
        self.attach(conn, [id], attributes).await?;
        Ok(saved)
    }
}
