use proc_macro2::{Ident, TokenStream};
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{LitStr, Path, Token, Type};

const ONE_KINDS: &[&str] = &["has_one", "belongs_to", "morph_one", "has_one_through"];
const MANY_KINDS: &[&str] = &[
    "has_many",
    "belongs_to_many",
    "morph_many",
    "morph_to_many",
    "morphed_by_many",
    "has_many_through",
];
const MORPH_NAMED: &[&str] = &["morph_one", "morph_many", "morph_to_many", "morphed_by_many"];
const THROUGH_KINDS: &[&str] = &["has_one_through", "has_many_through"];

/// Builder methods a relation attribute may set with `key = "column"`.
const KEY_OPTIONS: &[&str] = &[
    "foreign_key",
    "local_key",
    "owner_key",
    "table",
    "foreign_pivot_key",
    "related_pivot_key",
    "related_key",
    "morph_type",
    "first_key",
    "second_key",
    "second_local_key",
];

/// A relation declared on a field, e.g. `#[quarry(has_many(Post))]`.
pub struct RelationField {
    kind: Ident,
    related: Option<Path>,
    through: Option<Path>,
    name: Option<LitStr>,
    keys: Vec<(Ident, LitStr)>,
    pivot: Vec<LitStr>,
    timestamps: bool,
}

enum RelationArg {
    Bare(Path),
    Value(Ident, LitStr),
    Through(Path),
    List(Ident, Vec<LitStr>),
}

impl Parse for RelationArg {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let path: Path = input.parse()?;
        if input.peek(Token![=]) {
            input.parse::<Token![=]>()?;
            let key = path.require_ident()?.clone();
            if key == "through" {
                return Ok(Self::Through(input.parse()?));
            }
            return Ok(Self::Value(key, input.parse()?));
        }
        if input.peek(syn::token::Paren) {
            let key = path.require_ident()?.clone();
            let content;
            syn::parenthesized!(content in input);
            let items = Punctuated::<LitStr, Token![,]>::parse_terminated(&content)?;
            return Ok(Self::List(key, items.into_iter().collect()));
        }
        Ok(Self::Bare(path))
    }
}

/// Parses a relation option; `Ok(None)` when `meta` names no relation kind.
pub fn parse(meta: &ParseNestedMeta) -> syn::Result<Option<RelationField>> {
    let Some(kind) = meta.path.get_ident() else {
        return Ok(None);
    };
    let name = kind.to_string();
    if name != "morph_to" && !ONE_KINDS.contains(&name.as_str()) && !MANY_KINDS.contains(&name.as_str()) {
        return Ok(None);
    }

    let mut field = RelationField {
        kind: kind.clone(),
        related: None,
        through: None,
        name: None,
        keys: Vec::new(),
        pivot: Vec::new(),
        timestamps: false,
    };
    if !meta.input.peek(syn::token::Paren) {
        if name != "morph_to" {
            return Err(meta.error(format!("`{name}` needs the related entity, e.g. `{name}(Post)`")));
        }
        return Ok(Some(field));
    }

    let content;
    syn::parenthesized!(content in meta.input);
    let args = Punctuated::<RelationArg, Token![,]>::parse_terminated(&content)?;
    for arg in args {
        match arg {
            RelationArg::Bare(path) if path.is_ident("timestamps") => field.timestamps = true,
            RelationArg::Bare(path) => {
                if field.related.is_some() {
                    return Err(syn::Error::new_spanned(path, "related entity given twice"));
                }
                field.related = Some(path);
            }
            RelationArg::Through(path) => field.through = Some(path),
            RelationArg::Value(key, value) if key == "name" => field.name = Some(value),
            RelationArg::Value(key, value) => {
                if !KEY_OPTIONS.contains(&key.to_string().as_str()) {
                    return Err(syn::Error::new_spanned(key, "unsupported relation option"));
                }
                field.keys.push((key, value));
            }
            RelationArg::List(key, columns) if key == "pivot" => field.pivot.extend(columns),
            RelationArg::List(key, _) => {
                return Err(syn::Error::new_spanned(key, "unsupported relation option"));
            }
        }
    }
    if field.related.is_none() && name != "morph_to" {
        return Err(syn::Error::new_spanned(kind, format!("`{name}` needs the related entity")));
    }
    Ok(Some(field))
}

impl RelationField {
    fn kind_name(&self) -> String {
        self.kind.to_string()
    }

    fn is_many(&self) -> bool {
        MANY_KINDS.contains(&self.kind_name().as_str())
    }

    /// One-kinds are read into `Option<_>` fields, many-kinds into `Vec<_>`.
    pub fn check_field(&self, ty: &Type) -> syn::Result<()> {
        if !self.is_many() && !crate::is_option(ty) {
            return Err(syn::Error::new_spanned(
                ty,
                format!("a `{}` field must be an `Option`", self.kind),
            ));
        }
        if self.is_many() && crate::is_option(ty) {
            return Err(syn::Error::new_spanned(
                ty,
                format!("a `{}` field must be a `Vec`", self.kind),
            ));
        }
        Ok(())
    }

    /// `RelationDef` expression registered on the entity definition.
    pub fn definition(&self) -> syn::Result<TokenStream> {
        let kind = &self.kind;
        let kind_name = self.kind_name();
        let related = self
            .related
            .as_ref()
            .map(|path| quote! { ::quarry_orm::EntityRef::of::<#path>() });

        let mut def = if kind_name == "morph_to" {
            let morph_name = self.name.as_ref().map(|name| quote! { .morph_name(#name) });
            quote! { ::quarry_orm::RelationDef::morph_to() #morph_name }
        } else if MORPH_NAMED.contains(&kind_name.as_str()) {
            let Some(name) = &self.name else {
                return Err(syn::Error::new_spanned(
                    kind,
                    format!("`{kind}` needs the morph name, e.g. `name = \"commentable\"`"),
                ));
            };
            quote! { ::quarry_orm::RelationDef::#kind(#related, #name) }
        } else if THROUGH_KINDS.contains(&kind_name.as_str()) {
            let Some(through) = &self.through else {
                return Err(syn::Error::new_spanned(
                    kind,
                    format!("`{kind}` needs the intermediate entity, e.g. `through = User`"),
                ));
            };
            quote! {
                ::quarry_orm::RelationDef::#kind(#related, ::quarry_orm::EntityRef::of::<#through>())
            }
        } else {
            quote! { ::quarry_orm::RelationDef::#kind(#related) }
        };

        for (key, value) in &self.keys {
            def.extend(quote! { .#key(#value) });
        }
        if !self.pivot.is_empty() {
            let columns = &self.pivot;
            def.extend(quote! { .with_pivot(&[ #( #columns ),* ]) });
        }
        if self.timestamps {
            def.extend(quote! { .with_timestamps() });
        }
        Ok(def)
    }

    /// Reads the loaded relation off the model; unloaded relations read as
    /// `None` or an empty `Vec`.
    pub fn reader(&self, name: &str) -> TokenStream {
        match &self.related {
            Some(related) if self.is_many() => quote! {
                model
                    .many(#name)
                    .map(|items| items.to_entities::<#related>())
                    .transpose()?
                    .unwrap_or_default()
            },
            Some(related) => quote! {
                model
                    .one(#name)
                    .map(|owner| owner.to_entity::<#related>())
                    .transpose()?
                    .map(::std::convert::Into::into)
            },
            None => quote! {
                model.one(#name).cloned().map(::std::convert::Into::into)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use syn::{DeriveInput, parse_quote};

    use crate::derive_entity_impl;

    fn expand(input: DeriveInput) -> syn::Result<String> {
        derive_entity_impl(&input).map(|tokens| tokens.to_string())
    }

    #[test]
    fn has_many_with_custom_key() {
        let tokens = expand(parse_quote! {
            struct User {
                id: Option<i64>,
                #[quarry(has_many(Post, foreign_key = "author_id"))]
                posts: Vec<Post>,
            }
        })
        .unwrap();
        assert!(tokens.contains("RelationDef :: has_many (:: quarry_orm :: EntityRef :: of :: < Post > ())"));
        assert!(tokens.contains("foreign_key (\"author_id\")"));
        assert!(tokens.contains("to_entities :: < Post >"));
        assert!(!tokens.contains("String :: from (\"posts\")"));
    }

    #[test]
    fn belongs_to_many_with_pivot_columns() {
        let tokens = expand(parse_quote! {
            struct User {
                #[quarry(belongs_to_many(Role, table = "role_user", pivot("level"), timestamps))]
                roles: Vec<Role>,
            }
        })
        .unwrap();
        assert!(tokens.contains("table (\"role_user\")"));
        assert!(tokens.contains("with_pivot (& [\"level\"])"));
        assert!(tokens.contains("with_timestamps ()"));
    }

    #[test]
    fn morph_kinds_need_a_name() {
        let err = expand(parse_quote! {
            struct Post {
                #[quarry(morph_many(Comment))]
                comments: Vec<Comment>,
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("morph name"));

        let tokens = expand(parse_quote! {
            struct Post {
                #[quarry(morph_many(Comment, name = "commentable"))]
                comments: Vec<Comment>,
            }
        })
        .unwrap();
        assert!(tokens.contains("\"commentable\""));
    }

    #[test]
    fn morph_to_reads_a_model() {
        let tokens = expand(parse_quote! {
            struct Comment {
                #[quarry(morph_to)]
                commentable: Option<quarry_orm::Model>,
            }
        })
        .unwrap();
        assert!(tokens.contains("RelationDef :: morph_to ()"));
        assert!(tokens.contains("model . one (\"commentable\") . cloned ()"));
    }

    #[test]
    fn through_kinds_need_the_intermediate() {
        let err = expand(parse_quote! {
            struct Country {
                #[quarry(has_many_through(Post))]
                posts: Vec<Post>,
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("intermediate"));

        let tokens = expand(parse_quote! {
            struct Country {
                #[quarry(has_many_through(Post, through = User))]
                posts: Vec<Post>,
            }
        })
        .unwrap();
        assert!(tokens.contains("EntityRef :: of :: < User > ()"));
    }

    #[test]
    fn one_kinds_must_be_optional() {
        let err = expand(parse_quote! {
            struct Post {
                #[quarry(belongs_to(User))]
                user: User,
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("must be an `Option`"));
    }

    #[test]
    fn self_relations_may_be_boxed() {
        let tokens = expand(parse_quote! {
            struct Category {
                #[quarry(belongs_to(Category, foreign_key = "parent_id"))]
                parent: Option<Box<Category>>,
            }
        })
        .unwrap();
        assert!(tokens.contains("Into :: into"));
    }

    #[test]
    fn unknown_relation_option_is_rejected() {
        let err = expand(parse_quote! {
            struct User {
                #[quarry(has_many(Post, cascade = "delete"))]
                posts: Vec<Post>,
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("unsupported relation option"));
    }
}
