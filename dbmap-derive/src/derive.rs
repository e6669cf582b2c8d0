//! Implementation of the `#[derive(Mapped)]` macro.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr};

/// Parse and generate code for the `#[derive(Mapped)]` macro.
pub fn derive_mapped_impl(input: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Mapped derive only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Mapped derive only supports structs",
            ));
        }
    };

    let struct_attrs = parse_struct_attrs(input)?;
    let field_infos: Vec<FieldInfo> = fields.iter().map(parse_field).collect::<Result<_, _>>()?;

    let table_name_fn = struct_attrs.table_name.map(|table| {
        quote! {
            fn table_name() -> ::std::option::Option<&'static str> {
                ::std::option::Option::Some(#table)
            }
        }
    });

    let registrations = field_infos.iter().map(generate_registration);

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::dbmap::Mapped for #name #ty_generics #where_clause {
            #table_name_fn

            fn describe(table: &mut ::dbmap::TableBuilder<Self>) {
                #(#registrations)*
            }
        }
    })
}

/// Struct-level `#[db(...)]` attributes.
#[derive(Debug, Default)]
struct StructAttrs {
    table_name: Option<String>,
}

fn parse_struct_attrs(input: &DeriveInput) -> Result<StructAttrs, syn::Error> {
    let mut attrs = StructAttrs::default();

    for attr in &input.attrs {
        if !attr.path().is_ident("db") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.table_name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unknown db attribute, expected `table = \"...\"`"))
            }
        })?;
    }

    Ok(attrs)
}

/// A field and its descriptor.
#[derive(Debug)]
struct FieldInfo {
    name: Ident,
    descriptor: String,
}

impl FieldInfo {
    fn is_excluded(&self) -> bool {
        self.descriptor == "-"
    }

    fn is_json(&self) -> bool {
        self.descriptor
            .split(',')
            .skip(1)
            .any(|flag| flag.trim().eq_ignore_ascii_case("json"))
    }
}

/// Parse a field and its `#[db("...")]` descriptor.
fn parse_field(field: &syn::Field) -> Result<FieldInfo, syn::Error> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| syn::Error::new_spanned(field, "Fields must be named"))?;

    let mut descriptor = None;
    for attr in &field.attrs {
        if !attr.path().is_ident("db") {
            continue;
        }
        if descriptor.is_some() {
            return Err(syn::Error::new_spanned(attr, "duplicate db attribute"));
        }
        let value: LitStr = attr.parse_args()?;
        descriptor = Some(value.value());
    }

    Ok(FieldInfo {
        name,
        descriptor: descriptor.unwrap_or_default(),
    })
}

fn generate_registration(field: &FieldInfo) -> TokenStream {
    if field.is_excluded() {
        return quote! { table.skip(); };
    }

    let name = &field.name;
    let field_name = name.to_string();
    let field_name = field_name.strip_prefix("r#").unwrap_or(&field_name);
    let descriptor = &field.descriptor;
    let method = if field.is_json() {
        quote! { json }
    } else {
        quote! { field }
    };

    quote! {
        table.#method(#field_name, #descriptor, |m| &m.#name, |m| &mut m.#name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_simple_struct() {
        let input: DeriveInput = parse_quote! {
            #[db(table = "users")]
            struct User {
                #[db("id,pk,serial")]
                id: i64,
                email: String,
                #[db(",json")]
                prefs: Prefs,
                #[db("-")]
                cache: Vec<u8>,
            }
        };

        let code = derive_mapped_impl(&input).unwrap().to_string();
        assert!(code.contains(":: dbmap :: Mapped for User"));
        assert!(code.contains("Some (\"users\")"));
        assert!(code.contains("table . field (\"id\" , \"id,pk,serial\""));
        assert!(code.contains("table . field (\"email\" , \"\""));
        assert!(code.contains("table . json (\"prefs\" , \",json\""));
        assert!(code.contains("table . skip ()"));
    }

    #[test]
    fn test_default_table_name_is_not_emitted() {
        let input: DeriveInput = parse_quote! {
            struct Plain {
                id: i32,
            }
        };

        let code = derive_mapped_impl(&input).unwrap().to_string();
        assert!(!code.contains("fn table_name"));
    }

    #[test]
    fn test_rejects_tuple_structs_and_enums() {
        let tuple: DeriveInput = parse_quote! { struct Pair(i32, i32); };
        assert!(derive_mapped_impl(&tuple).is_err());

        let en: DeriveInput = parse_quote! { enum E { A } };
        assert!(derive_mapped_impl(&en).is_err());
    }

    #[test]
    fn test_rejects_unknown_struct_attribute() {
        let input: DeriveInput = parse_quote! {
            #[db(schema = "x")]
            struct S {
                id: i32,
            }
        };
        assert!(derive_mapped_impl(&input).is_err());
    }

    #[test]
    fn test_json_flag_detection() {
        let info = FieldInfo {
            name: parse_quote!(data),
            descriptor: "payload, JSON ,nullable".into(),
        };
        assert!(info.is_json());

        let info = FieldInfo {
            name: parse_quote!(data),
            descriptor: "json".into(),
        };
        assert!(!info.is_json());
    }
}
