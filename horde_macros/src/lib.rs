use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{FnArg, ItemFn, parse_macro_input, spanned::Spanned};

extern crate proc_macro;

/// Turn an `async fn(ctx: VuContext) -> Result<(), WorkflowError>` into a
/// unit struct of the same name implementing `horde::Workflow`.
///
/// ```rust,ignore
/// #[workflow]
/// async fn browse(ctx: VuContext) -> Result<(), WorkflowError> {
///     ctx.check("alive", true);
///     Ok(())
/// }
///
/// let scenario = Scenario::new("browse", browse);
/// ```
#[proc_macro_attribute]
pub fn workflow(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemFn);
    match expand_workflow(ast) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_workflow(ast: ItemFn) -> syn::Result<proc_macro2::TokenStream> {
    let sig = &ast.sig;
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(
            sig.fn_token.span(),
            "#[workflow] requires an `async fn`",
        ));
    }
    if sig.inputs.len() != 1 || matches!(sig.inputs.first(), Some(FnArg::Receiver(_))) {
        return Err(syn::Error::new(
            sig.inputs.span(),
            "#[workflow] functions take exactly one `VuContext` argument",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            sig.generics.span(),
            "#[workflow] functions cannot be generic",
        ));
    }

    let vis = &ast.vis;
    let attrs = &ast.attrs;
    let name = &sig.ident;
    let body_ident = format_ident!("__{}_body", name);
    let mut body = ast.clone();
    body.sig.ident = body_ident.clone();
    body.vis = syn::Visibility::Inherited;
    body.attrs.clear();

    Ok(quote! {
        #(#attrs)*
        #[allow(non_camel_case_types)]
        #[derive(Clone, Copy, Debug, Default)]
        #vis struct #name;

        impl ::horde::Workflow for #name {
            fn iterate(
                &self,
                ctx: ::horde::VuContext,
            ) -> ::horde::BoxFuture<'static, ::std::result::Result<(), ::horde::WorkflowError>> {
                #body
                ::std::boxed::Box::pin(#body_ident(ctx))
            }
        }
    })
}
