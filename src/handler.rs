//! Handler trait and type erasure.
//!
//! The router stores handlers of different concrete types side by side, so
//! each one is erased behind `dyn ErasedHandler`:
//!
//! ```text
//! async fn profile(req: Request) -> Result<Response, HandlerError>   ← user writes this
//!        ↓ router.protected(Method::GET, "/profile", profile)
//! profile.into_boxed_handler()                                      ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(profile))  stored as BoxedHandler
//!        ↓
//! handler.call(req)  at request time → BoxFuture<'static, Response>
//! ```
//!
//! Per request this costs one `Arc` clone and one virtual call.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` because it appears in the public `Handler` trait's
/// `into_boxed_handler` return type.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Response>;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// Automatically satisfied by any function or closure of the shape
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// Sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` into the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
