//! # Quarry ORM
//!
//! An async active-record ORM for Rust with a fluent query builder, MySQL and
//! SQLite grammars, schema blueprints, typed entities and every classic
//! relation kind (one-to-one, one-to-many, many-to-many with pivots,
//! polymorphic and has-many-through).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quarry_orm::prelude::*;
//!
//! #[derive(Entity, Debug)]
//! #[quarry(fillable("name"))]
//! struct User {
//!     id: Option<i64>,
//!     name: String,
//!     #[quarry(has_many(Post))]
//!     posts: Vec<Post>,
//! }
//!
//! #[derive(Entity, Debug)]
//! struct Post {
//!     id: Option<i64>,
//!     user_id: i64,
//!     title: String,
//! }
//!
//! # async fn example() -> quarry_orm::Result<()> {
//! let mut conn = Connection::connect(&DatabaseConfig::sqlite("sqlite::memory:")).await?;
//! conn.schema()
//!     .create("users", |table| {
//!         table.id();
//!         table.string("name", 255);
//!         table.timestamps();
//!     })
//!     .await?;
//!
//! let mut ada = conn.query::<User>().create(&mut conn, [("name", "Ada")]).await?;
//! ada.set_attribute("name", "Ada Lovelace")?;
//! ada.save(&mut conn).await?;
//!
//! let users: Vec<User> = conn
//!     .query::<User>()
//!     .with(&["posts"])
//!     .filter("name", "like", "Ada%")
//!     .get_as(&mut conn)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Installation
//!
//! ```toml
//! [dependencies]
//! quarry-orm = "0.4.0-alpha"
//! ```

pub use quarry_core::*;
pub use quarry_macros::Entity;

pub mod prelude {
    pub use quarry_core::prelude::*;

    pub use crate::Entity; // the derive and the trait
}
