use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod tag;

#[proc_macro_derive(KernelTag, attributes(kernel_tag))]
pub fn derive_kernel_tag(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let expanded = tag::derive_kernel_tag(input);
    expanded.into()
}
