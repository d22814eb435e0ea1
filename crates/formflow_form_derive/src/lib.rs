use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use proc_macro_crate::{FoundCrate, crate_name};
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

#[proc_macro_derive(FormModel)]
pub fn derive_form_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    if !input.generics.params.is_empty() {
        return syn::Error::new_spanned(
            input.ident,
            "FormModel derive currently supports only non-generic structs",
        )
        .to_compile_error()
        .into();
    }

    let model_ident = input.ident;
    let fields_struct_ident = format_ident!("{model_ident}Fields");

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields.named,
            _ => {
                return syn::Error::new(
                    Span::call_site(),
                    "FormModel derive requires a struct with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new(
                Span::call_site(),
                "FormModel derive is only supported on structs",
            )
            .to_compile_error()
            .into();
        }
    };

    let formflow = formflow_path();
    let mut fields_methods = Vec::new();
    let mut to_values = Vec::new();
    let mut from_values = Vec::new();

    for field in named_fields {
        let Some(field_ident) = field.ident else {
            continue;
        };
        let field_ty = field.ty;
        let field_name = field_ident.unraw().to_string();

        fields_methods.push(quote! {
            pub const fn #field_ident(&self) -> #formflow::form::Field<#field_ty> {
                #formflow::form::Field::new(#field_name)
            }
        });

        to_values.push(quote! {
            values.write::<#field_ty>(
                #formflow::form::FieldKey::new(#field_name),
                ::core::clone::Clone::clone(&self.#field_ident),
            );
        });

        from_values.push(quote! {
            #field_ident: values.read::<#field_ty>(#formflow::form::FieldKey::new(#field_name))?,
        });
    }

    quote! {
        #[derive(Clone, Copy, Debug, Default)]
        pub struct #fields_struct_ident;

        impl #fields_struct_ident {
            #(#fields_methods)*
        }

        impl #formflow::form::FormModel for #model_ident {
            type Fields = #fields_struct_ident;

            fn fields() -> Self::Fields {
                #fields_struct_ident
            }

            fn to_values(&self) -> #formflow::form::Values {
                let mut values = #formflow::form::Values::new();
                #(#to_values)*
                values
            }

            fn from_values(
                values: &#formflow::form::Values,
            ) -> ::core::result::Result<Self, #formflow::form::ValueError> {
                ::core::result::Result::Ok(Self {
                    #(#from_values)*
                })
            }
        }
    }
    .into()
}

fn formflow_path() -> TokenStream2 {
    match crate_name("formflow") {
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        // The library declares `extern crate self as formflow`, so the absolute path also
        // resolves inside the crate and in its integration tests.
        Ok(FoundCrate::Itself) | Err(_) => quote!(::formflow),
    }
}
