// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `#[concurrency_mode(..)]`: attribute form of the `concurrency` crate's backend switches.

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Ident, Item,
    parse::{Parse, ParseStream},
    parse_macro_input,
};

enum Backend {
    Std,
    Shuttle,
    Loom,
}

impl Parse for Backend {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let ident: Ident = input.parse()?;
        match ident.to_string().as_str() {
            "std" => Ok(Backend::Std),
            "shuttle" => Ok(Backend::Shuttle),
            "loom" => Ok(Backend::Loom),
            _ => Err(syn::Error::new_spanned(
                ident,
                "expected one of `std`, `shuttle` or `loom`",
            )),
        }
    }
}

/// Compile the annotated item only for the given concurrency backend.
///
/// ```no_compile
/// use concurrency::concurrency_mode;
///
/// #[concurrency_mode(shuttle)]
/// mod shuttle_tests {
///     // model-checked tests
/// }
/// ```
#[proc_macro_attribute]
pub fn concurrency_mode(attr: TokenStream, item: TokenStream) -> TokenStream {
    let backend = parse_macro_input!(attr as Backend);
    let item = parse_macro_input!(item as Item);

    let output = match backend {
        Backend::Std => quote! { ::concurrency::with_std! { #item } },
        Backend::Shuttle => quote! { ::concurrency::with_shuttle! { #item } },
        Backend::Loom => quote! { ::concurrency::with_loom! { #item } },
    };
    output.into()
}
