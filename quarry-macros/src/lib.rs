use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{
    Attribute, Data, DeriveInput, Field, Fields, Ident, LitBool, LitInt, LitStr, Token, Type,
    meta::ParseNestedMeta, parse_macro_input, punctuated::Punctuated,
};

mod relations;

use relations::RelationField;

/// Derives `quarry_orm::Entity` for a struct with named fields.
///
/// Struct options go in `#[quarry(...)]`: `name`, `table`, `primary_key`,
/// `key_type`, `incrementing`, `timestamps`, `soft_deletes`, `morph_alias`,
/// `per_page` and the lists `fillable`, `guarded`, `hidden`, `visible`,
/// `dates`. Fields take `column`, `cast`, `skip` or one relation kind such
/// as `has_many(Post, foreign_key = "author_id")`.
#[proc_macro_derive(Entity, attributes(quarry))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match derive_entity_impl(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn derive_entity_impl(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let options = EntityOptions::parse(&input.attrs)?;
    let fields = named_fields(input)?;

    let mut definition = options.definition_calls();
    let mut readers = Vec::new();
    let mut writers = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        match FieldRole::parse(field)? {
            FieldRole::Skip => {
                readers.push(quote! { #ident: ::std::default::Default::default() });
            }
            FieldRole::Column { column, cast } => {
                let ty = &field.ty;
                if let Some(cast) = cast {
                    definition.push(quote! { .cast(#column, #cast) });
                }
                readers.push(quote! { #ident: model.get::<#ty>(#column)? });
                writers.push(quote! {
                    (
                        ::std::string::String::from(#column),
                        ::quarry_orm::Value::from(::std::clone::Clone::clone(&self.#ident)),
                    )
                });
            }
            FieldRole::Relation(relation) => {
                let name = ident.to_string();
                let def = relation.definition()?;
                definition.push(quote! { .relation(#name, #def) });
                let reader = relation.reader(&name);
                readers.push(quote! { #ident: #reader });
            }
        }
    }

    let struct_name = &input.ident;
    let entity_name = options
        .name
        .clone()
        .unwrap_or_else(|| struct_name.to_string());
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::quarry_orm::Entity for #struct_name #ty_generics #where_clause {
            const NAME: &'static str = #entity_name;

            fn definition() -> ::quarry_orm::EntityDef {
                ::quarry_orm::EntityDef::new(#entity_name)
                    #( #definition )*
            }

            fn from_model(model: &::quarry_orm::Model) -> ::quarry_orm::Result<Self> {
                ::std::result::Result::Ok(Self {
                    #( #readers, )*
                })
            }

            fn to_attributes(&self) -> ::std::vec::Vec<(::std::string::String, ::quarry_orm::Value)> {
                ::std::vec![ #( #writers ),* ]
            }
        }
    })
}

fn named_fields(input: &DeriveInput) -> syn::Result<&Punctuated<Field, Token![,]>> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "Quarry Entity only supports structs",
        ));
    };
    match &data.fields {
        Fields::Named(fields) => Ok(&fields.named),
        other => Err(syn::Error::new_spanned(
            other,
            "Quarry Entity only supports structs with named fields",
        )),
    }
}

#[derive(Default)]
struct EntityOptions {
    name: Option<String>,
    table: Option<LitStr>,
    primary_key: Option<LitStr>,
    key_type: Option<proc_macro2::TokenStream>,
    incrementing: Option<LitBool>,
    timestamps: Option<LitBool>,
    soft_deletes: bool,
    morph_alias: Option<LitStr>,
    per_page: Option<LitInt>,
    fillable: Option<Vec<LitStr>>,
    guarded: Option<Vec<LitStr>>,
    hidden: Option<Vec<LitStr>>,
    visible: Option<Vec<LitStr>>,
    dates: Option<Vec<LitStr>>,
}

impl EntityOptions {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut options = Self::default();
        for attr in attrs.iter().filter(|attr| attr.path().is_ident("quarry")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    options.name = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("table") {
                    options.table = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("primary_key") {
                    options.primary_key = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("key_type") {
                    let lit: LitStr = meta.value()?.parse()?;
                    options.key_type = Some(match lit.value().as_str() {
                        "int" | "integer" => quote! { ::quarry_orm::KeyType::Int },
                        "string" => quote! { ::quarry_orm::KeyType::String },
                        "uuid" => quote! { ::quarry_orm::KeyType::Uuid },
                        other => {
                            return Err(syn::Error::new_spanned(
                                &lit,
                                format!("unknown key_type `{other}`, expected `int`, `string` or `uuid`"),
                            ));
                        }
                    });
                } else if meta.path.is_ident("incrementing") {
                    options.incrementing = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("timestamps") {
                    options.timestamps = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("soft_deletes") {
                    options.soft_deletes = true;
                } else if meta.path.is_ident("morph_alias") {
                    options.morph_alias = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("per_page") {
                    options.per_page = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("fillable") {
                    options.fillable = Some(parse_list(&meta)?);
                } else if meta.path.is_ident("guarded") {
                    options.guarded = Some(parse_list(&meta)?);
                } else if meta.path.is_ident("hidden") {
                    options.hidden = Some(parse_list(&meta)?);
                } else if meta.path.is_ident("visible") {
                    options.visible = Some(parse_list(&meta)?);
                } else if meta.path.is_ident("dates") {
                    options.dates = Some(parse_list(&meta)?);
                } else {
                    return Err(meta.error("unsupported quarry entity option"));
                }
                Ok(())
            })?;
        }
        Ok(options)
    }

    fn definition_calls(&self) -> Vec<proc_macro2::TokenStream> {
        let mut calls = Vec::new();
        if let Some(table) = &self.table {
            calls.push(quote! { .table(#table) });
        }
        if let Some(key) = &self.primary_key {
            calls.push(quote! { .primary_key(#key) });
        }
        if let Some(key_type) = &self.key_type {
            calls.push(quote! { .key_type(#key_type) });
        }
        if let Some(incrementing) = &self.incrementing {
            calls.push(quote! { .incrementing(#incrementing) });
        }
        if let Some(timestamps) = &self.timestamps {
            calls.push(quote! { .timestamps(#timestamps) });
        }
        if self.soft_deletes {
            calls.push(quote! { .soft_deletes() });
        }
        if let Some(alias) = &self.morph_alias {
            calls.push(quote! { .morph_alias(#alias) });
        }
        if let Some(per_page) = &self.per_page {
            calls.push(quote! { .per_page(#per_page) });
        }
        let lists = [
            ("fillable", &self.fillable),
            ("guarded", &self.guarded),
            ("hidden", &self.hidden),
            ("visible", &self.visible),
            ("dates", &self.dates),
        ];
        for (method, keys) in lists {
            if let Some(keys) = keys {
                let method = Ident::new(method, Span::call_site());
                calls.push(quote! { .#method(&[ #( #keys ),* ]) });
            }
        }
        calls
    }
}

/// Parses `key("a", "b")`.
fn parse_list(meta: &ParseNestedMeta) -> syn::Result<Vec<LitStr>> {
    let content;
    syn::parenthesized!(content in meta.input);
    let items = Punctuated::<LitStr, Token![,]>::parse_terminated(&content)?;
    Ok(items.into_iter().collect())
}

enum FieldRole {
    Column {
        column: String,
        cast: Option<proc_macro2::TokenStream>,
    },
    Relation(RelationField),
    Skip,
}

impl FieldRole {
    fn parse(field: &Field) -> syn::Result<Self> {
        let mut column = field.ident.as_ref().map(Ident::to_string).unwrap_or_default();
        let mut cast = None;
        let mut skip = false;
        let mut relation = None;

        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("quarry")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                } else if meta.path.is_ident("column") {
                    column = meta.value()?.parse::<LitStr>()?.value();
                } else if meta.path.is_ident("cast") {
                    cast = Some(parse_cast(&meta.value()?.parse()?)?);
                } else if let Some(parsed) = relations::parse(&meta)? {
                    if relation.is_some() {
                        return Err(meta.error("a field holds at most one relation"));
                    }
                    relation = Some(parsed);
                } else {
                    return Err(meta.error("unsupported quarry field option"));
                }
                Ok(())
            })?;
        }

        if skip {
            return Ok(Self::Skip);
        }
        if let Some(relation) = relation {
            relation.check_field(&field.ty)?;
            return Ok(Self::Relation(relation));
        }
        Ok(Self::Column { column, cast })
    }
}

fn parse_cast(lit: &LitStr) -> syn::Result<proc_macro2::TokenStream> {
    let value = lit.value();
    let cast = match value.as_str() {
        "int" | "integer" => quote! { Int },
        "float" | "double" | "real" => quote! { Float },
        "bool" | "boolean" => quote! { Bool },
        "string" => quote! { String },
        "json" | "object" => quote! { Json },
        "array" => quote! { Array },
        "collection" => quote! { Collection },
        "date" => quote! { Date },
        "datetime" => quote! { DateTime },
        "timestamp" => quote! { Timestamp },
        other => match other.strip_prefix("decimal:").map(str::parse::<u32>) {
            Some(Ok(places)) => quote! { Decimal(#places) },
            _ => {
                return Err(syn::Error::new_spanned(
                    lit,
                    format!("unknown cast `{other}`"),
                ));
            }
        },
    };
    Ok(quote! { ::quarry_orm::Cast::#cast })
}

/// True when `ty` is written as `Option<...>`.
fn is_option(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Option"),
        _ => false,
    }
}
