//! `#[tokio_timeout_test]`: runs an async test on its own Tokio runtime and
//! fails it once a wall-clock deadline passes, even if the runtime is wedged.
//!
//! ```ignore
//! #[test_timeout::tokio_timeout_test]
//! async fn default_deadline() {}
//!
//! #[test_timeout::tokio_timeout_test(20, worker_threads = 2, trace)]
//! async fn busy_mesh() {}
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Attribute, Ident, ItemFn, LitInt, Token, parse_macro_input};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, PartialEq)]
struct TimeoutArgs {
    secs: u64,
    worker_threads: Option<usize>,
    trace: bool,
}

impl Default for TimeoutArgs {
    fn default() -> Self {
        Self {
            secs: DEFAULT_TIMEOUT_SECS,
            worker_threads: None,
            trace: false,
        }
    }
}

fn positive<N>(lit: &LitInt) -> syn::Result<N>
where
    N: std::str::FromStr + PartialEq + From<u8>,
    N::Err: std::fmt::Display,
{
    let value: N = lit.base10_parse()?;
    if value == N::from(0) {
        return Err(syn::Error::new(lit.span(), "value must be greater than zero"));
    }
    Ok(value)
}

impl Parse for TimeoutArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = TimeoutArgs::default();
        if input.peek(LitInt) {
            args.secs = positive(&input.parse::<LitInt>()?)?;
            if input.is_empty() {
                return Ok(args);
            }
            input.parse::<Token![,]>()?;
        }
        while !input.is_empty() {
            let name: Ident = input.parse()?;
            match name.to_string().as_str() {
                "secs" => {
                    input.parse::<Token![=]>()?;
                    args.secs = positive(&input.parse::<LitInt>()?)?;
                }
                "worker_threads" => {
                    input.parse::<Token![=]>()?;
                    args.worker_threads = Some(positive(&input.parse::<LitInt>()?)?);
                }
                "trace" => args.trace = true,
                other => {
                    return Err(syn::Error::new(
                        name.span(),
                        format!("unknown argument `{other}`; expected secs, worker_threads or trace"),
                    ));
                }
            }
            if input.is_empty() {
                break;
            }
            input.parse::<Token![,]>()?;
        }
        Ok(args)
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as TimeoutArgs);
    let function = parse_macro_input!(item as ItemFn);
    expand(args, function)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(args: TimeoutArgs, function: ItemFn) -> syn::Result<TokenStream2> {
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = function;

    if sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        ));
    }
    sig.asyncness = None;

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    let secs = args.secs;
    let builder = match args.worker_threads {
        Some(threads) => quote! {
            ::tokio::runtime::Builder::new_multi_thread().worker_threads(#threads)
        },
        None => quote! { ::tokio::runtime::Builder::new_current_thread() },
    };
    let trace = args.trace.then(|| {
        quote! {
            let _ = ::tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(::tracing_subscriber::EnvFilter::from_default_env())
                .try_init();
        }
    });

    Ok(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #trace
            let deadline = ::std::time::Duration::from_secs(#secs);
            let (done_tx, done_rx) = ::std::sync::mpsc::channel();
            ::std::thread::spawn(move || {
                let outcome = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                    let runtime = #builder
                        .enable_all()
                        .build()
                        .expect("failed to build Tokio runtime");
                    runtime.block_on(async {
                        if ::tokio::time::timeout(deadline, async move #block).await.is_err() {
                            panic!("test exceeded {}s deadline", #secs);
                        }
                    });
                }));
                let _ = done_tx.send(outcome);
            });
            match done_rx.recv_timeout(deadline + ::std::time::Duration::from_secs(1)) {
                Ok(Ok(())) => {}
                Ok(Err(payload)) => ::std::panic::resume_unwind(payload),
                Err(::std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test runtime wedged past {}s deadline", #secs)
                }
                Err(::std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting a result")
                }
            }
        }
    })
}

/// `#[test]` and `#[tokio::test]` would register the function a second time.
fn is_test_attribute(attr: &Attribute) -> bool {
    let names: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        names.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
