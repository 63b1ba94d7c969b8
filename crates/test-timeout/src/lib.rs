//! Test attributes that fail a test instead of hanging the suite.
//!
//! Both attributes run the test body on its own thread and wait for it
//! with a deadline. A panic inside the body is resumed on the test thread
//! so assertion messages survive.
//!
//! ```ignore
//! #[test_timeout::timeout]
//! fn quick() { /* ... */ }
//!
//! #[test_timeout::tokio_timeout_test(5)]
//! async fn io_bound() { /* ... */ }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Attribute, Block, ItemFn, LitInt, parse_macro_input};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Synchronous test with a deadline, in seconds (default 60).
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_secs(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let function = parse_macro_input!(item as ItemFn);
    if function.sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &function.sig.ident,
            "`timeout` expects a synchronous test; use `tokio_timeout_test` for async ones",
        )
        .to_compile_error()
        .into();
    }
    let body = &function.block;
    let run = quote! { #body };
    expand(function, &["test"], secs, run)
}

/// Async test driven by a current-thread tokio runtime with a deadline, in
/// seconds (default 60). The deadline also applies inside the runtime, so a
/// stuck future is reported even when the thread is parked.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_secs(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let mut function = parse_macro_input!(item as ItemFn);
    if function.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &function.sig.ident,
            "`tokio_timeout_test` expects an async test function",
        )
        .to_compile_error()
        .into();
    }
    function.sig.asyncness = None;
    let run = runtime_body(&function.block);
    expand(function, &["test", "tokio::test"], secs, run)
}

fn parse_secs(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be at least one second"));
    }
    Ok(secs)
}

fn runtime_body(block: &Block) -> TokenStream2 {
    quote! {
        {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build tokio runtime");
            runtime.block_on(async move {
                tokio::time::timeout(__deadline, async move #block)
                    .await
                    .expect("test timed out inside the runtime")
            })
        }
    }
}

/// Wraps `run` in a watched thread. `skip` lists attribute paths the
/// generated `#[test]` replaces.
fn expand(function: ItemFn, skip: &[&str], secs: u64, run: TokenStream2) -> TokenStream {
    let ItemFn {
        attrs, vis, sig, ..
    } = function;
    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !skip.iter().any(|path| path_is(attr, path)))
        .collect();
    let thread_name = format!("timeout:{}", sig.ident);

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let __deadline = ::std::time::Duration::from_secs(#secs);
            let (__tx, __rx) = ::std::sync::mpsc::channel();
            ::std::thread::Builder::new()
                .name(#thread_name.to_string())
                .spawn(move || {
                    let outcome = ::std::panic::catch_unwind(
                        ::std::panic::AssertUnwindSafe(move || #run),
                    );
                    let _ = __tx.send(outcome);
                })
                .expect("failed to spawn test thread");
            match __rx.recv_timeout(__deadline) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => ::std::panic::resume_unwind(payload),
                Err(::std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {}s", #secs)
                }
                Err(::std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting")
                }
            }
        }
    })
}

fn path_is(attr: &Attribute, expected: &str) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    segments.join("::") == expected
}
