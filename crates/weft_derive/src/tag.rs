use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr, Path, Token, WherePredicate, punctuated::Punctuated};

pub fn derive_kernel_tag(input: DeriveInput) -> TokenStream {
    let name = input.ident;

    // parse kernel_tag attributes
    let mut crate_name = None;
    let mut tag_name = None;
    let mut user_bounds = Punctuated::<WherePredicate, Token![,]>::new();
    for attr in &input.attrs {
        if !attr.path().is_ident("kernel_tag") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                let value = meta.value()?;
                let s: LitStr = value.parse()?;
                crate_name = Some(s.parse::<Path>()?);
                Ok(())
            } else if meta.path.is_ident("name") {
                let value = meta.value()?;
                let s: LitStr = value.parse()?;
                tag_name = Some(s);
                Ok(())
            } else if meta.path.is_ident("bound") {
                let value = meta.value()?;
                let s: LitStr = value.parse()?;
                let predicates =
                    s.parse_with(Punctuated::<WherePredicate, Token![,]>::parse_terminated)?;
                user_bounds.extend(predicates);
                Ok(())
            } else {
                Err(meta.error("unexpected attribute; supported are `crate`, `name` and `bound`"))
            }
        });

        if let Err(err) = result {
            return err.to_compile_error();
        }
    }
    // determine the base path for trait implementation
    let base_path = match crate_name {
        Some(path) => quote!(#path::launch),
        None => quote!(::weft::launch),
    };
    let tag_name = tag_name.unwrap_or_else(|| LitStr::new(&name.to_string(), name.span()));

    // handle struct generics
    let generics = &input.generics;
    let (impl_generics, ty_generics, _) = generics.split_for_impl();

    // prepare where clause
    let mut generics = generics.clone();
    let where_clause = generics.make_where_clause();
    where_clause.predicates.extend(user_bounds);

    quote! {
        impl #impl_generics #base_path::KernelTag for #name #ty_generics #where_clause {
            const NAME: &'static str = #tag_name;
        }
    }
}
