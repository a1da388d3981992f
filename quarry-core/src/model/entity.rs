use super::Model;
use super::definition::EntityDef;
use crate::error::Result;
use crate::value::Value;

/// A typed view over a [`Model`].
///
/// Usually implemented with `#[derive(Entity)]`; the definition drives the
/// table name, keys, casts and relations the engine uses for this type.
pub trait Entity: Sized + Send + Sync + 'static {
    /// Registry name; also the default morph alias.
    const NAME: &'static str;

    fn definition() -> EntityDef;

    /// Builds the struct from a model's cast attributes and loaded relations.
    fn from_model(model: &Model) -> Result<Self>;

    /// Column values for persisting this struct.
    fn to_attributes(&self) -> Vec<(String, Value)>;
}
