//! Core engine of Quarry ORM.
//!
//! The [`query::Builder`] assembles SQL through a dialect [`grammar::Grammar`],
//! [`schema::SchemaBuilder`] runs DDL, and [`Connection`] executes statements,
//! tracks transaction depth and keeps the query log. On top of that sit the
//! active-record [`Model`], the [`EntityQuery`] with scopes and eager loading,
//! every relation kind and the [`Migrator`].

pub use async_trait;
pub use sqlx;

pub mod collection;
pub mod config;
pub mod connection;
pub mod detect;
pub mod driver;
pub mod entity_query;
pub mod error;
pub mod grammar;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod migrator;
pub mod model;
pub mod query;
pub mod registry;
pub mod relations;
pub mod schema;
pub mod test_utils;
pub mod value;

pub use collection::Collection;
pub use config::DatabaseConfig;
pub use connection::{Connection, QueryRecord};
pub use detect::{caused_by_concurrency_error, caused_by_lost_connection};
pub use driver::{Driver, Executed};
pub use entity_query::{EagerConstraint, EntityQuery, SOFT_DELETES_SCOPE};
pub use error::{DriverError, QuarryError, QueryError, Result};
pub use migrator::{Migration, Migrator, SqlMigration};
pub use model::{Cast, Entity, EntityDef, EntityMeta, EntityRef, KeyType, Loaded, Model, ModelEvent, Scope};
pub use query::{Builder, Constrainable, Direction, Page};
pub use registry::Registry;
pub use relations::{Relation, RelationDef, RelationKind, SyncChanges};
pub use schema::{Blueprint, SchemaBuilder};
pub use value::{Expr, FromValue, Record, Row, Value, raw, record};

pub mod prelude {
    pub use crate::{
        Blueprint, Cast, Collection, Connection, Constrainable, DatabaseConfig, Entity, EntityDef,
        EntityQuery, Loaded, Migration, Migrator, Model, ModelEvent, QuarryError, Record, Registry,
        RelationDef, Value, raw, record,
    };
}
