use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, FnArg, Ident, ItemFn, Pat, PatType, ReturnType, Type};

fn is_fn_trait(bound: &syn::TypeParamBound) -> bool {
    let syn::TypeParamBound::Trait(trait_bound) = bound else {
        return false;
    };
    trait_bound
        .path
        .segments
        .last()
        .map(|segment| segment.ident == "Fn" || segment.ident == "FnMut" || segment.ident == "FnOnce")
        .unwrap_or(false)
}

/// Closure-like parameter types (`Box<dyn Fn..>`, `fn(..)`, generics bound by
/// `Fn*`). They have no `PartialEq`, so they cannot be component props.
fn is_fn_param(ty: &Type, generics: &syn::Generics) -> bool {
    match ty {
        Type::BareFn(_) => true,
        Type::TraitObject(object) => object.bounds.iter().any(is_fn_trait),
        Type::Path(type_path) => {
            let Some(segment) = type_path.path.segments.last() else {
                return false;
            };
            if segment.ident == "Box" || segment.ident == "Rc" || segment.ident == "Arc" {
                if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                        return is_fn_param(inner, generics);
                    }
                }
                return false;
            }
            type_path.path.segments.len() == 1 && generic_has_fn_bound(&segment.ident, generics)
        }
        _ => false,
    }
}

fn generic_has_fn_bound(ident: &Ident, generics: &syn::Generics) -> bool {
    let in_params = generics.params.iter().any(|param| match param {
        syn::GenericParam::Type(type_param) => {
            type_param.ident == *ident && type_param.bounds.iter().any(is_fn_trait)
        }
        _ => false,
    });
    let in_where = generics.where_clause.iter().any(|where_clause| {
        where_clause.predicates.iter().any(|predicate| match predicate {
            syn::WherePredicate::Type(pred) => {
                matches!(&pred.bounded_ty, Type::Path(path) if path.path.is_ident(ident))
                    && pred.bounds.iter().any(is_fn_trait)
            }
            _ => false,
        })
    });
    in_params || in_where
}

struct Param {
    field: Ident,
    pat: Box<Pat>,
    ty: Box<Type>,
}

fn collect_params(func: &ItemFn) -> Result<Vec<Param>, syn::Error> {
    let mut params = Vec::new();
    for arg in &func.sig.inputs {
        let FnArg::Typed(PatType { pat, ty, .. }) = arg else {
            return Err(syn::Error::new_spanned(arg, "components cannot take `self`"));
        };
        let Pat::Ident(pat_ident) = &**pat else {
            return Err(syn::Error::new_spanned(pat, "component parameters must be plain identifiers"));
        };
        if matches!(**ty, Type::ImplTrait(_)) {
            return Err(syn::Error::new_spanned(
                ty,
                "`impl Trait` parameters cannot be stored as props; use a named type",
            ));
        }
        if is_fn_param(ty, &func.sig.generics) {
            return Err(syn::Error::new_spanned(
                ty,
                "closure parameters cannot be compared as props; pass a `trellis_core::Handler`",
            ));
        }
        params.push(Param {
            field: pat_ident.ident.clone(),
            pat: pat.clone(),
            ty: ty.clone(),
        });
    }
    Ok(params)
}

/// Turns a render function into a component.
///
/// ```ignore
/// #[component]
/// fn Greeting(name: String) -> RenderResult {
///     host(&Label).prop("text", format!("hello {name}")).emit()?;
///     Ok(())
/// }
///
/// Greeting("ada".into()).key("greeting").emit()?;
/// ```
///
/// expands to a `Greeting` props struct deriving `Clone` and `PartialEq`,
/// a `Component` impl whose `render` runs the body with each parameter
/// bound to a clone of its prop, and a `Greeting(..)` constructor returning
/// the component's `ElementBuilder`.
#[proc_macro_attribute]
pub fn component(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr_tokens = TokenStream2::from(attr);
    if !attr_tokens.is_empty() {
        return syn::Error::new_spanned(attr_tokens, "#[component] takes no arguments")
            .to_compile_error()
            .into();
    }

    let func = parse_macro_input!(item as ItemFn);
    if func.sig.asyncness.is_some() {
        return syn::Error::new_spanned(func.sig.fn_token, "components cannot be async")
            .to_compile_error()
            .into();
    }
    let return_ty: Type = match &func.sig.output {
        ReturnType::Default => {
            return syn::Error::new_spanned(&func.sig, "components must return `RenderResult`")
                .to_compile_error()
                .into();
        }
        ReturnType::Type(_, ty) => ty.as_ref().clone(),
    };
    let params = match collect_params(&func) {
        Ok(params) => params,
        Err(err) => return err.to_compile_error().into(),
    };

    let name = &func.sig.ident;
    let vis = &func.vis;
    let attrs = &func.attrs;
    let body = &func.block;
    let generics = &func.sig.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let fields: Vec<TokenStream2> = params
        .iter()
        .map(|Param { field, ty, .. }| quote! { pub #field: #ty })
        .collect();
    let rebinds: Vec<TokenStream2> = params
        .iter()
        .map(|Param { field, pat, .. }| {
            quote! { let #pat = ::core::clone::Clone::clone(&self.#field); }
        })
        .collect();
    let inputs: Vec<TokenStream2> = params
        .iter()
        .map(|Param { field, ty, .. }| quote! { #field: #ty })
        .collect();
    let field_names: Vec<&Ident> = params.iter().map(|param| &param.field).collect();

    TokenStream::from(quote! {
        #(#attrs)*
        #[derive(Clone, PartialEq)]
        #vis struct #name #impl_generics #where_clause {
            #(#fields,)*
        }

        impl #impl_generics ::trellis_core::Component for #name #ty_generics #where_clause {
            #[allow(unused_mut)]
            fn render(&self) -> #return_ty {
                #(#rebinds)*
                #body
            }
        }

        #[allow(non_snake_case)]
        #[doc = concat!("Element builder for the [`", stringify!(#name), "`] component.")]
        #vis fn #name #impl_generics (#(#inputs),*) -> ::trellis_core::ElementBuilder #where_clause {
            ::trellis_core::component(#name { #(#field_names),* })
        }
    })
}
