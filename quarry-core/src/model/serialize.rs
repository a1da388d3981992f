use serde::{Serialize, Serializer};
use serde_json::{Map, Value as Json};

use super::{Loaded, Model};
use crate::value::{DATE_FORMAT, Value};

impl Model {
    fn is_visible(&self, key: &str) -> bool {
        if self.meta.hidden.iter().any(|hidden| hidden == key) {
            return false;
        }
        self.meta.visible.is_empty() || self.meta.visible.iter().any(|visible| visible == key)
    }

    /// Visible attributes with casts applied, followed by loaded relations.
    ///
    /// Dates are rendered in the storage format.
    pub fn to_array(&self) -> Map<String, Json> {
        let mut map = Map::new();
        for key in self.attributes.keys() {
            if !self.is_visible(key) {
                continue;
            }
            let json = match self.get_attribute(key) {
                Value::DateTime(dt) => Json::String(dt.format(DATE_FORMAT).to_string()),
                other => other.to_json(),
            };
            map.insert(key.clone(), json);
        }
        for (name, loaded) in &self.relations {
            if !self.is_visible(name) {
                continue;
            }
            let json = match loaded {
                Loaded::One(Some(model)) => Json::Object(model.to_array()),
                Loaded::One(None) => Json::Null,
                Loaded::Many(collection) => collection.to_array(),
            };
            map.insert(name.clone(), json);
        }
        map
    }

    pub fn to_json(&self) -> String {
        Json::Object(self.to_array()).to_string()
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_array().serialize(serializer)
    }
}
