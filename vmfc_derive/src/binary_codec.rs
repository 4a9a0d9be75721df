//! Derive macro for fixed-layout binary records.
//!
//! The VMFC container has no length prefixes or tags: every header record is a
//! plain sequence of fixed-width fields. The derive therefore only accepts
//! structs with named fields and serializes them back to back, in declaration
//! order, through `crate::types::encoding`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derives `Encode` and `Decode` for a named-field struct.
///
/// ```ignore
/// #[derive(BinaryCodec)]
/// pub struct SectionDescriptor {
///     pub file_pointer: u16,
///     pub load_offset: u16,
///     pub byte_length: u16,
/// }
/// ```
///
/// expands to an `Encode` impl writing `file_pointer`, `load_offset` and
/// `byte_length` in that order, and a matching `Decode` impl.
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "BinaryCodec only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "BinaryCodec only supports structs with named fields",
            ));
        }
    };

    let field_names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();

    let encode_fields = field_names.iter().map(|name| {
        quote! {
            crate::types::encoding::Encode::encode(&self.#name, out);
        }
    });

    let decode_fields = field_names.iter().map(|name| {
        quote! {
            #name: crate::types::encoding::Decode::decode(input)?,
        }
    });

    Ok(quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode(&self, out: &mut Vec<u8>) {
                #(#encode_fields)*
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                Ok(Self {
                    #(#decode_fields)*
                })
            }
        }
    })
}
