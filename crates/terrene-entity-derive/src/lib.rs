//! `#[derive(Component)]` for Terrene components.
//!
//! Emits the `Component` trait impl (field reflection vtable) and the
//! `ComponentMeta` impl (static name and field table) for a plain struct
//! with named fields. The type must also implement `Clone` and `Default`.
//!
//! Attributes:
//!
//! - `#[component(name = "...")]` on the struct overrides the stable type
//!   name. By default the struct identifier is used, minus a trailing
//!   `Component`.
//! - `#[component(owned)]` on an `EntityId` field marks it as an owned
//!   entity reference, enumerated by `owned_references()` for cascading
//!   copy/delete.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

#[proc_macro_derive(Component, attributes(component))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let ident = &input.ident;

    let mut name = {
        let raw = ident.to_string();
        match raw.strip_suffix("Component") {
            Some(stripped) if !stripped.is_empty() => stripped.to_owned(),
            _ => raw,
        }
    };
    for attr in &input.attrs {
        if attr.path().is_ident("component") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let value: syn::LitStr = meta.value()?.parse()?;
                    name = value.value();
                    Ok(())
                } else {
                    Err(meta.error("unsupported component attribute"))
                }
            })?;
        }
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named.named.iter().collect::<Vec<_>>(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "#[derive(Component)] requires named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "#[derive(Component)] only supports structs",
            ));
        }
    };

    let mut field_names = Vec::new();
    let mut get_arms = Vec::new();
    let mut set_arms = Vec::new();
    let mut owned_fields = Vec::new();

    for (index, field) in fields.iter().enumerate() {
        let field_ident = field.ident.as_ref().expect("named field");
        let field_ty = &field.ty;
        field_names.push(field_ident.to_string());

        get_arms.push(quote! {
            #index => ::core::option::Option::Some(
                ::terrene_entity::FieldType::to_field(&self.#field_ident)
            ),
        });
        set_arms.push(quote! {
            #index => match <#field_ty as ::terrene_entity::FieldType>::from_field(value) {
                ::core::option::Option::Some(v) => {
                    self.#field_ident = v;
                    true
                }
                ::core::option::Option::None => false,
            },
        });

        let mut owned = false;
        for attr in &field.attrs {
            if attr.path().is_ident("component") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("owned") {
                        owned = true;
                        Ok(())
                    } else {
                        Err(meta.error("unsupported component field attribute"))
                    }
                })?;
            }
        }
        if owned {
            owned_fields.push(field_ident.clone());
        }
    }

    let owned_impl = if owned_fields.is_empty() {
        quote! {}
    } else {
        quote! {
            fn owned_references(&self) -> ::terrene_entity::OwnedRefs {
                let mut out = ::terrene_entity::OwnedRefs::new();
                #( out.push(self.#owned_fields); )*
                out
            }
        }
    };

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::terrene_entity::Component for #ident #ty_generics #where_clause {
            fn type_name(&self) -> &'static str {
                #name
            }

            fn field_names(&self) -> &'static [&'static str] {
                &[#(#field_names),*]
            }

            fn field(&self, index: usize) -> ::core::option::Option<::terrene_entity::FieldValue> {
                match index {
                    #(#get_arms)*
                    _ => ::core::option::Option::None,
                }
            }

            fn set_field(&mut self, index: usize, value: &::terrene_entity::FieldValue) -> bool {
                match index {
                    #(#set_arms)*
                    _ => false,
                }
            }

            fn clone_boxed(&self) -> ::std::boxed::Box<dyn ::terrene_entity::Component> {
                ::std::boxed::Box::new(::core::clone::Clone::clone(self))
            }

            #owned_impl

            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::core::any::Any {
                self
            }

            fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn ::core::any::Any> {
                self
            }
        }

        impl #impl_generics ::terrene_entity::ComponentMeta for #ident #ty_generics #where_clause {
            const NAME: &'static str = #name;
            const FIELDS: &'static [&'static str] = &[#(#field_names),*];
        }
    })
}
