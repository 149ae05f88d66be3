use heck::ToUpperCamelCase;
use proc_macro_error2::abort;
use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{Data, DeriveInput, spanned::Spanned};

/// The four isolation dimensions, in the order the trait declares them.
const DIMENSIONS: [&str; 4] = ["tenant", "resource", "owner", "jamaah"];

/// One dimension as declared in `#[secure(...)]`.
#[derive(Default)]
struct Dimension {
    column: Option<(String, Span)>,
    absent: Option<Span>,
}

#[derive(Default)]
struct SecureConfig {
    dims: [Dimension; 4],
    unrestricted: Option<Span>,
}

impl SecureConfig {
    fn has_any_dimension(&self) -> bool {
        self.dims
            .iter()
            .any(|d| d.column.is_some() || d.absent.is_some())
    }
}

#[allow(clippy::needless_pass_by_value)]
pub fn expand_derive_scopable(input: DeriveInput) -> TokenStream {
    if !matches!(&input.data, Data::Struct(_)) {
        abort!(
            input.span(),
            "#[derive(Scopable)] can only be applied to structs"
        );
    }

    let config = parse_secure_attrs(&input);
    validate_config(&config, &input);

    let entity_ident = syn::Ident::new("Entity", input.ident.span());

    if config.unrestricted.is_some() {
        return quote! {
            impl ::umroh_db::secure::ScopableEntity for #entity_ident {
                const IS_UNRESTRICTED: bool = true;

                fn tenant_col() -> ::core::option::Option<Self::Column> {
                    ::core::option::Option::None
                }

                fn resource_col() -> ::core::option::Option<Self::Column> {
                    ::core::option::Option::None
                }

                fn owner_col() -> ::core::option::Option<Self::Column> {
                    ::core::option::Option::None
                }

                fn jamaah_col() -> ::core::option::Option<Self::Column> {
                    ::core::option::Option::None
                }
            }
        };
    }

    let methods = DIMENSIONS.iter().zip(config.dims.iter()).map(|(name, dim)| {
        col_method(&format!("{name}_col"), dim.column.as_ref(), input.ident.span())
    });

    quote! {
        impl ::umroh_db::secure::ScopableEntity for #entity_ident {
            const IS_UNRESTRICTED: bool = false;

            #(#methods)*
        }
    }
}

fn col_method(method_name: &str, col: Option<&(String, Span)>, span: Span) -> TokenStream {
    let method_ident = syn::Ident::new(method_name, span);

    match col {
        Some((col_name, _)) => {
            let variant = syn::Ident::new(&col_name.to_upper_camel_case(), span);
            quote! {
                fn #method_ident() -> ::core::option::Option<Self::Column> {
                    ::core::option::Option::Some(Self::Column::#variant)
                }
            }
        }
        None => quote! {
            fn #method_ident() -> ::core::option::Option<Self::Column> {
                ::core::option::Option::None
            }
        },
    }
}

fn validate_config(config: &SecureConfig, input: &DeriveInput) {
    if let Some(span) = config.unrestricted {
        if config.has_any_dimension() {
            abort!(
                span,
                "When using 'unrestricted', no other column attributes are allowed"
            );
        }
        return;
    }

    for (name, dim) in DIMENSIONS.iter().zip(config.dims.iter()) {
        match (&dim.column, dim.absent) {
            (None, None) => {
                let msg = format!(
                    "secure: missing explicit decision for {name}:\n  \
                     use `{name}_col = \"column_name\"` or `no_{name}`"
                );
                abort!(input.span(), msg);
            }
            (Some((_, span)), Some(_)) => {
                let msg = format!("secure: specify either `{name}_col` or `no_{name}`, not both");
                abort!(*span, msg);
            }
            _ => {}
        }
    }
}

fn dimension_index(name: &str) -> Option<usize> {
    DIMENSIONS.iter().position(|d| *d == name)
}

fn parse_secure_attrs(input: &DeriveInput) -> SecureConfig {
    let mut config = SecureConfig::default();

    for attr in &input.attrs {
        if !attr.path().is_ident("secure") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            let span = meta.path.span();
            let key = meta
                .path
                .get_ident()
                .map(ToString::to_string)
                .unwrap_or_default();

            if key == "unrestricted" {
                if config.unrestricted.is_some() {
                    abort!(span, "duplicate attribute 'unrestricted'");
                }
                config.unrestricted = Some(span);
                return Ok(());
            }

            if let Some(idx) = key.strip_prefix("no_").and_then(dimension_index) {
                let dim = &mut config.dims[idx];
                if dim.absent.is_some() {
                    abort!(span, "duplicate attribute '{}'", key);
                }
                if dim.column.is_some() {
                    abort!(
                        span,
                        "secure: specify either `{}_col` or `{}`, not both",
                        DIMENSIONS[idx],
                        key
                    );
                }
                dim.absent = Some(span);
                return Ok(());
            }

            let Some(idx) = key.strip_suffix("_col").and_then(dimension_index) else {
                abort!(
                    span,
                    "Unknown attribute '{}'. Valid attributes: tenant_col, no_tenant, resource_col, no_resource, owner_col, no_owner, jamaah_col, no_jamaah, unrestricted",
                    key
                );
            };

            let value: String = match meta.value() {
                Ok(v) => match v.parse::<syn::LitStr>() {
                    Ok(lit) => lit.value(),
                    Err(_) => abort!(span, "Expected string literal"),
                },
                Err(_) => abort!(span, "Expected '=' followed by a string value"),
            };

            let dim = &mut config.dims[idx];
            if dim.column.is_some() {
                abort!(span, "duplicate attribute '{}'", key);
            }
            if dim.absent.is_some() {
                abort!(
                    span,
                    "secure: specify either `{}` or `no_{}`, not both",
                    key,
                    DIMENSIONS[idx]
                );
            }
            dim.column = Some((value, span));
            Ok(())
        });

        if let Err(err) = result {
            abort!(err.span(), "{}", err);
        }
    }

    config
}
