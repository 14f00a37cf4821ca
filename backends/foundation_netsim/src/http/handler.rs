use std::future::Future;

use async_trait::async_trait;

use super::{FakeRequest, FakeResponse};
use crate::errors::BoxedError;

pub type HandlerResult = Result<FakeResponse, BoxedError>;

/// Something that turns a [`FakeRequest`] into a [`FakeResponse`].
///
/// Errors and panics are caught by the server and answered with a 500 for
/// that request only.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: FakeRequest) -> HandlerResult;
}

/// A fixed response is the simplest handler: every request gets a copy.
#[async_trait]
impl RequestHandler for FakeResponse {
    async fn handle(&self, _request: FakeRequest) -> HandlerResult {
        Ok(self.clone())
    }
}

/// Handler backed by a synchronous closure.
pub struct SyncHandler<F>(F);

#[async_trait]
impl<F> RequestHandler for SyncHandler<F>
where
    F: Fn(&FakeRequest) -> HandlerResult + Send + Sync + 'static,
{
    async fn handle(&self, request: FakeRequest) -> HandlerResult {
        (self.0)(&request)
    }
}

/// Handler backed by a closure returning a future, for handlers that need to
/// await their own work.
pub struct AsyncHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for AsyncHandler<F>
where
    F: Fn(FakeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, request: FakeRequest) -> HandlerResult {
        (self.0)(request).await
    }
}

/// Wraps a synchronous closure as a handler.
///
/// ```rust
/// use foundation_netsim::{handler_fn, FakeResponse};
///
/// let handler = handler_fn(|req| {
///     let address = req.query("active").unwrap_or_default();
///     Ok(FakeResponse::ok(format!("unspent for {address}")))
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(func: F) -> SyncHandler<F>
where
    F: Fn(&FakeRequest) -> HandlerResult + Send + Sync + 'static,
{
    SyncHandler(func)
}

/// Wraps an async closure as a handler.
pub fn async_handler_fn<F, Fut>(func: F) -> AsyncHandler<F>
where
    F: Fn(FakeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    AsyncHandler(func)
}
