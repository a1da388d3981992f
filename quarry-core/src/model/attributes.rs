use super::Model;
use super::cast::storage_date;
use crate::error::{QuarryError, Result};
use crate::value::{FromValue, Row, Value};

impl Model {
    /// Reads an attribute: accessor first, then the declared cast, then date
    /// parsing for date columns.
    pub fn get_attribute(&self, key: &str) -> Value {
        let raw = self.get_raw(key);
        if let Some(accessor) = self.meta.accessors.get(key) {
            return accessor(self, raw);
        }
        self.cast_attribute(key, raw)
    }

    /// Reads an attribute and converts it.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        T::from_value(self.get_attribute(key)).map_err(|err| match err {
            QuarryError::Conversion { message, .. } => QuarryError::Conversion {
                key: key.to_owned(),
                message,
            },
            other => other,
        })
    }

    /// The stored value without accessors or casts.
    pub fn get_raw(&self, key: &str) -> Value {
        self.attributes.get(key).cloned().unwrap_or_default()
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn attributes(&self) -> &Row {
        &self.attributes
    }

    fn cast_attribute(&self, key: &str, raw: Value) -> Value {
        if let Some(cast) = self.meta.cast(key) {
            return cast.get(raw);
        }
        if !raw.is_null() && self.meta.is_date(key) {
            if let Some(dt) = raw.as_datetime() {
                return Value::DateTime(dt);
            }
        }
        raw
    }

    /// Writes an attribute through the mutator, date normalization or JSON
    /// encoding that applies to `key`.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let value = value.into();
        if let Some(mutator) = self.meta.mutators.get(key) {
            let stored = mutator(value);
            self.attributes.insert(key.to_owned(), stored);
            return Ok(self);
        }
        let stored = if let Some(cast) = self.meta.cast(key) {
            cast.set(key, value)?
        } else if self.meta.is_date(key) && !value.is_null() {
            storage_date(key, &value)?
        } else {
            value
        };
        self.attributes.insert(key.to_owned(), stored);
        Ok(self)
    }

    /// Stores the value untouched.
    pub fn set_raw(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    // ----------------------------------------------------------------------
    // original & dirty tracking
    // ----------------------------------------------------------------------

    /// The loaded value of `key`, cast like [`Model::get_attribute`].
    pub fn get_original(&self, key: &str) -> Value {
        let raw = self.get_raw_original(key);
        self.cast_attribute(key, raw)
    }

    pub fn get_raw_original(&self, key: &str) -> Value {
        self.original.get(key).cloned().unwrap_or_default()
    }

    pub fn original(&self) -> &Row {
        &self.original
    }

    /// Attributes that differ from the original snapshot.
    pub fn get_dirty(&self) -> Row {
        self.attributes
            .iter()
            .filter(|(key, _)| !self.original_is_equivalent(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn original_is_equivalent(&self, key: &str) -> bool {
        let Some(original) = self.original.get(key) else {
            return false;
        };
        let current = self.get_raw(key);
        if current == *original {
            return true;
        }
        if current.is_null() || original.is_null() {
            return false;
        }
        if self.meta.is_date(key) {
            return match (current.as_datetime(), original.as_datetime()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
        }
        if let Some(cast) = self.meta.cast(key) {
            if cast.get(current.clone()) == cast.get(original.clone()) {
                return true;
            }
        }
        current.loosely_equals(original)
    }

    pub fn is_dirty(&self) -> bool {
        !self.get_dirty().is_empty()
    }

    /// True when any of `keys` is dirty.
    pub fn is_dirty_any(&self, keys: &[&str]) -> bool {
        let dirty = self.get_dirty();
        keys.iter().any(|key| dirty.contains_key(*key))
    }

    pub fn is_clean(&self) -> bool {
        !self.is_dirty()
    }

    /// Attributes written by the last save.
    pub fn get_changes(&self) -> &Row {
        &self.changes
    }

    pub fn was_changed(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn was_changed_key(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    /// Takes a new original snapshot from the current attributes.
    pub fn sync_original(&mut self) -> &mut Self {
        self.original = self.attributes.clone();
        self
    }

    pub fn sync_original_attribute(&mut self, key: &str) -> &mut Self {
        match self.attributes.get(key) {
            Some(value) => {
                self.original.insert(key.to_owned(), value.clone());
            }
            None => {
                self.original.shift_remove(key);
            }
        }
        self
    }

    pub(crate) fn sync_changes(&mut self) {
        self.changes = self.get_dirty();
    }

    // ----------------------------------------------------------------------
    // mass assignment
    // ----------------------------------------------------------------------

    /// Assigns the fillable subset of `attributes`.
    ///
    /// Non-fillable keys are skipped, except on a totally guarded entity
    /// where any key is rejected with [`QuarryError::MassAssignment`].
    pub fn fill<I, K, V>(&mut self, attributes: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let unguarded = self.registry.is_unguarded();
        let totally_guarded = !unguarded && self.meta.totally_guarded();
        for (key, value) in attributes {
            let key = key.into();
            if self.meta.is_fillable(&key, unguarded) {
                self.set_attribute(&key, value)?;
            } else if totally_guarded {
                return Err(QuarryError::MassAssignment {
                    key,
                    entity: self.meta.name.clone(),
                });
            } else {
                tracing::trace!(entity = %self.meta.name, key = %key, "skipping guarded attribute");
            }
        }
        Ok(self)
    }

    /// Assigns every attribute, ignoring guards.
    pub fn force_fill<I, K, V>(&mut self, attributes: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in attributes {
            self.set_attribute(&key.into(), value)?;
        }
        Ok(self)
    }

    /// Raw values of the given keys, in argument order.
    pub fn only(&self, keys: &[&str]) -> Row {
        keys.iter()
            .map(|key| ((*key).to_owned(), self.get_raw(key)))
            .collect()
    }
}
