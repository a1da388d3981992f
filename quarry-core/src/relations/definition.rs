use std::sync::Arc;

use heck::ToSnakeCase;

use super::pivot::PivotSpec;
use crate::error::{QuarryError, Result};
use crate::model::{EntityMeta, EntityRef};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany,
    MorphOne,
    MorphMany,
    MorphTo,
    MorphToMany,
    MorphedByMany,
    HasOneThrough,
    HasManyThrough,
}

impl RelationKind {
    /// Whether the relation resolves to a collection.
    pub fn is_many(self) -> bool {
        matches!(
            self,
            RelationKind::HasMany
                | RelationKind::BelongsToMany
                | RelationKind::MorphMany
                | RelationKind::MorphToMany
                | RelationKind::MorphedByMany
                | RelationKind::HasManyThrough
        )
    }
}

/// Declaration of a relation on an entity definition.
///
/// Keys left unset fall back to naming conventions: `user_id` style foreign
/// keys, alphabetical `role_user` pivot tables, `{name}_type`/`{name}_id`
/// morph columns.
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub(crate) kind: RelationKind,
    pub(crate) related: Option<EntityRef>,
    pub(crate) through: Option<EntityRef>,
    morph_name: Option<String>,
    morph_type: Option<String>,
    foreign_key: Option<String>,
    local_key: Option<String>,
    table: Option<String>,
    foreign_pivot_key: Option<String>,
    related_pivot_key: Option<String>,
    related_key: Option<String>,
    first_key: Option<String>,
    second_key: Option<String>,
    second_local_key: Option<String>,
    pivot_columns: Vec<String>,
    pivot_timestamps: bool,
}

impl RelationDef {
    fn new(kind: RelationKind, related: Option<EntityRef>) -> Self {
        Self {
            kind,
            related,
            through: None,
            morph_name: None,
            morph_type: None,
            foreign_key: None,
            local_key: None,
            table: None,
            foreign_pivot_key: None,
            related_pivot_key: None,
            related_key: None,
            first_key: None,
            second_key: None,
            second_local_key: None,
            pivot_columns: Vec::new(),
            pivot_timestamps: false,
        }
    }

    fn morph(kind: RelationKind, related: EntityRef, name: &str) -> Self {
        let mut def = Self::new(kind, Some(related));
        def.morph_name = Some(name.to_owned());
        def
    }

    pub fn has_one(related: impl Into<EntityRef>) -> Self {
        Self::new(RelationKind::HasOne, Some(related.into()))
    }

    pub fn has_many(related: impl Into<EntityRef>) -> Self {
        Self::new(RelationKind::HasMany, Some(related.into()))
    }

    pub fn belongs_to(related: impl Into<EntityRef>) -> Self {
        Self::new(RelationKind::BelongsTo, Some(related.into()))
    }

    pub fn belongs_to_many(related: impl Into<EntityRef>) -> Self {
        Self::new(RelationKind::BelongsToMany, Some(related.into()))
    }

    /// One related row whose `{name}_type`/`{name}_id` columns point here.
    pub fn morph_one(related: impl Into<EntityRef>, name: &str) -> Self {
        Self::morph(RelationKind::MorphOne, related.into(), name)
    }

    pub fn morph_many(related: impl Into<EntityRef>, name: &str) -> Self {
        Self::morph(RelationKind::MorphMany, related.into(), name)
    }

    /// The owner named by this entity's `{relation}_type`/`{relation}_id` columns.
    pub fn morph_to() -> Self {
        Self::new(RelationKind::MorphTo, None)
    }

    pub fn morph_to_many(related: impl Into<EntityRef>, name: &str) -> Self {
        Self::morph(RelationKind::MorphToMany, related.into(), name)
    }

    /// Inverse of [`RelationDef::morph_to_many`].
    pub fn morphed_by_many(related: impl Into<EntityRef>, name: &str) -> Self {
        Self::morph(RelationKind::MorphedByMany, related.into(), name)
    }

    pub fn has_one_through(related: impl Into<EntityRef>, through: impl Into<EntityRef>) -> Self {
        let mut def = Self::new(RelationKind::HasOneThrough, Some(related.into()));
        def.through = Some(through.into());
        def
    }

    pub fn has_many_through(related: impl Into<EntityRef>, through: impl Into<EntityRef>) -> Self {
        let mut def = Self::new(RelationKind::HasManyThrough, Some(related.into()));
        def.through = Some(through.into());
        def
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn related(&self) -> Option<&EntityRef> {
        self.related.as_ref()
    }

    /// Foreign key column; for morph-to, the id column.
    pub fn foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.to_owned());
        self
    }

    /// Key on the parent matched by the foreign key; the parent key of a pivot.
    pub fn local_key(mut self, column: &str) -> Self {
        self.local_key = Some(column.to_owned());
        self
    }

    /// Key on the related entity referenced by a belongs-to foreign key.
    pub fn owner_key(self, column: &str) -> Self {
        self.local_key(column)
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_owned());
        self
    }

    pub fn foreign_pivot_key(mut self, column: &str) -> Self {
        self.foreign_pivot_key = Some(column.to_owned());
        self
    }

    pub fn related_pivot_key(mut self, column: &str) -> Self {
        self.related_pivot_key = Some(column.to_owned());
        self
    }

    pub fn related_key(mut self, column: &str) -> Self {
        self.related_key = Some(column.to_owned());
        self
    }

    /// Overrides the morph prefix; morph-to defaults to the relation name.
    pub fn morph_name(mut self, name: &str) -> Self {
        self.morph_name = Some(name.to_owned());
        self
    }

    pub fn morph_type(mut self, column: &str) -> Self {
        self.morph_type = Some(column.to_owned());
        self
    }

    /// Column on the intermediate table pointing at the parent.
    pub fn first_key(mut self, column: &str) -> Self {
        self.first_key = Some(column.to_owned());
        self
    }

    /// Column on the related table pointing at the intermediate row.
    pub fn second_key(mut self, column: &str) -> Self {
        self.second_key = Some(column.to_owned());
        self
    }

    pub fn second_local_key(mut self, column: &str) -> Self {
        self.second_local_key = Some(column.to_owned());
        self
    }

    /// Extra pivot columns loaded onto the `pivot` relation.
    pub fn with_pivot(mut self, columns: &[&str]) -> Self {
        self.pivot_columns
            .extend(columns.iter().map(|column| (*column).to_owned()));
        self
    }

    /// Maintains `created_at`/`updated_at` on pivot rows.
    pub fn with_timestamps(mut self) -> Self {
        self.pivot_timestamps = true;
        self
    }

    /// Fills in conventional names for every key left unset.
    pub(crate) fn resolve(
        &self,
        name: &str,
        parent: &EntityMeta,
        related: &EntityMeta,
        through: Option<Arc<EntityMeta>>,
        registry: &Registry,
    ) -> Result<Shape> {
        let morph_name = || self.morph_name.clone().unwrap_or_else(|| name.to_owned());
        let local_key = || {
            self.local_key
                .clone()
                .unwrap_or_else(|| parent.primary_key.clone())
        };
        let shape = match self.kind {
            RelationKind::HasOne | RelationKind::HasMany => Shape::HasOneOrMany {
                many: self.kind.is_many(),
                foreign_key: self
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| parent.foreign_key()),
                local_key: local_key(),
                morph: None,
            },
            RelationKind::MorphOne | RelationKind::MorphMany => {
                let morph = morph_name();
                Shape::HasOneOrMany {
                    many: self.kind.is_many(),
                    foreign_key: self
                        .foreign_key
                        .clone()
                        .unwrap_or_else(|| format!("{morph}_id")),
                    local_key: local_key(),
                    morph: Some(MorphType {
                        column: self.morph_type_column(&morph),
                        alias: registry.morph_alias(parent),
                    }),
                }
            }
            RelationKind::BelongsTo => Shape::BelongsTo {
                foreign_key: self
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", name.to_snake_case(), related.primary_key)),
                owner_key: self
                    .local_key
                    .clone()
                    .unwrap_or_else(|| related.primary_key.clone()),
            },
            RelationKind::MorphTo => {
                let morph = morph_name();
                Shape::MorphTo {
                    type_column: self.morph_type_column(&morph),
                    id_column: self
                        .foreign_key
                        .clone()
                        .unwrap_or_else(|| format!("{morph}_id")),
                    owner_key: self.local_key.clone(),
                }
            }
            RelationKind::BelongsToMany => Shape::BelongsToMany(PivotSpec {
                table: self
                    .table
                    .clone()
                    .unwrap_or_else(|| joining_table(parent, related)),
                foreign_pivot_key: self
                    .foreign_pivot_key
                    .clone()
                    .unwrap_or_else(|| parent.foreign_key()),
                related_pivot_key: self
                    .related_pivot_key
                    .clone()
                    .unwrap_or_else(|| related.foreign_key()),
                parent_key: local_key(),
                related_key: self.related_key_or(related),
                columns: self.pivot_columns.clone(),
                timestamps: self.pivot_timestamps,
                morph: None,
            }),
            RelationKind::MorphToMany | RelationKind::MorphedByMany => {
                let morph = morph_name();
                let inverse = self.kind == RelationKind::MorphedByMany;
                let (foreign_default, related_default, alias) = if inverse {
                    (
                        parent.foreign_key(),
                        format!("{morph}_id"),
                        registry.morph_alias(related),
                    )
                } else {
                    (
                        format!("{morph}_id"),
                        related.foreign_key(),
                        registry.morph_alias(parent),
                    )
                };
                Shape::BelongsToMany(PivotSpec {
                    table: self
                        .table
                        .clone()
                        .unwrap_or_else(|| pluralizer::pluralize(&morph, 2, false)),
                    foreign_pivot_key: self.foreign_pivot_key.clone().unwrap_or(foreign_default),
                    related_pivot_key: self.related_pivot_key.clone().unwrap_or(related_default),
                    parent_key: local_key(),
                    related_key: self.related_key_or(related),
                    columns: self.pivot_columns.clone(),
                    timestamps: self.pivot_timestamps,
                    morph: Some(MorphType {
                        column: self.morph_type_column(&morph),
                        alias,
                    }),
                })
            }
            RelationKind::HasOneThrough | RelationKind::HasManyThrough => {
                let through = through.ok_or_else(|| QuarryError::RelationshipDefinition {
                    entity: parent.name.clone(),
                    relation: name.to_owned(),
                    reason: "through relations need an intermediate entity".to_owned(),
                })?;
                Shape::Through {
                    many: self.kind.is_many(),
                    first_key: self
                        .first_key
                        .clone()
                        .unwrap_or_else(|| parent.foreign_key()),
                    second_key: self
                        .second_key
                        .clone()
                        .unwrap_or_else(|| through.foreign_key()),
                    local_key: local_key(),
                    second_local_key: self
                        .second_local_key
                        .clone()
                        .unwrap_or_else(|| through.primary_key.clone()),
                    through,
                }
            }
        };
        Ok(shape)
    }

    fn morph_type_column(&self, morph: &str) -> String {
        self.morph_type
            .clone()
            .unwrap_or_else(|| format!("{morph}_type"))
    }

    fn related_key_or(&self, related: &EntityMeta) -> String {
        self.related_key
            .clone()
            .unwrap_or_else(|| related.primary_key.clone())
    }
}

/// `role_user` for `User` and `Role`: snake case names in alphabetical order.
fn joining_table(parent: &EntityMeta, related: &EntityMeta) -> String {
    let mut segments = [parent.name.to_snake_case(), related.name.to_snake_case()];
    segments.sort();
    segments.join("_")
}

/// Discriminator column and the value identifying the owning side.
#[derive(Debug, Clone)]
pub(crate) struct MorphType {
    pub column: String,
    pub alias: String,
}

/// A relation with every key resolved.
#[derive(Debug, Clone)]
pub(crate) enum Shape {
    HasOneOrMany {
        many: bool,
        foreign_key: String,
        local_key: String,
        morph: Option<MorphType>,
    },
    BelongsTo {
        foreign_key: String,
        owner_key: String,
    },
    BelongsToMany(PivotSpec),
    MorphTo {
        type_column: String,
        id_column: String,
        owner_key: Option<String>,
    },
    Through {
        many: bool,
        through: Arc<EntityMeta>,
        first_key: String,
        second_key: String,
        local_key: String,
        second_local_key: String,
    },
}

impl Shape {
    pub(crate) fn is_many(&self) -> bool {
        match self {
            Shape::HasOneOrMany { many, .. } | Shape::Through { many, .. } => *many,
            Shape::BelongsToMany(_) => true,
            Shape::BelongsTo { .. } | Shape::MorphTo { .. } => false,
        }
    }
}
