use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Attribute, Error, ItemStruct, LitStr, Token, parse_macro_input};

struct MarkerArgs {
    name: Option<LitStr>,
    section: LitStr,
}

impl Parse for MarkerArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let span = input.span();
        let args = Punctuated::<LitStr, Token![,]>::parse_terminated(input)?;
        let mut args = args.into_iter();
        let (name, section) = match (args.next(), args.next(), args.next()) {
            (Some(section), None, None) => (None, section),
            (Some(name), Some(section), None) => (Some(name), section),
            _ => {
                return Err(Error::new(
                    span,
                    "expected `(\"Section\")` or `(\"Name\", \"Section\")`",
                ));
            }
        };
        let value = section.value();
        if value.is_empty() {
            return Err(Error::new(section.span(), "section must not be empty"));
        }
        if value.split(':').any(str::is_empty) {
            return Err(Error::new(
                section.span(),
                "section must not contain empty segments",
            ));
        }
        Ok(Self { name, section })
    }
}

fn is_register_options(attr: &Attribute) -> bool {
    attr.path().is_ident("register_options")
}

/// Declares the configuration section an options struct is bound from.
///
/// `#[register_options("Section")]` binds the default instance and
/// `#[register_options("Name", "Section")]` binds a named instance. The attribute can be
/// repeated; markers keep declaration order.
#[proc_macro_attribute]
pub fn register_options(args: TokenStream, input: TokenStream) -> TokenStream {
    let first = parse_macro_input!(args as MarkerArgs);
    let mut input_struct = parse_macro_input!(input as ItemStruct);

    // Later attributes of the same kind are still on the item; collect and strip them.
    let mut markers = vec![first];
    let mut errors: Option<Error> = None;
    let mut attrs = Vec::with_capacity(input_struct.attrs.len());
    for attr in input_struct.attrs.drain(..) {
        if !is_register_options(&attr) {
            attrs.push(attr);
            continue;
        }
        match attr.parse_args::<MarkerArgs>() {
            Ok(marker) => markers.push(marker),
            Err(err) => match errors.as_mut() {
                Some(errors) => errors.combine(err),
                None => errors = Some(err),
            },
        }
    }
    input_struct.attrs = attrs;
    if let Some(errors) = errors {
        return errors.to_compile_error().into();
    }
    if !input_struct.generics.params.is_empty() {
        return Error::new(
            Span::call_site(),
            "register_options does not support generic structs",
        )
        .to_compile_error()
        .into();
    }

    let struct_name = &input_struct.ident;
    let markers = markers.iter().map(|marker| {
        let section = &marker.section;
        match &marker.name {
            Some(name) => quote! { ::knob_config::OptionsMarker::named(#name, #section) },
            None => quote! { ::knob_config::OptionsMarker::section(#section) },
        }
    });

    let expanded = quote! {
        #input_struct

        impl ::knob_config::RegisterOptions for #struct_name {
            fn markers() -> ::std::vec::Vec<::knob_config::OptionsMarker> {
                ::std::vec![#(#markers),*]
            }
        }
    };

    TokenStream::from(expanded)
}
