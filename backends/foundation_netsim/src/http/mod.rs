//! Request, response and handler types seen by route handlers.

mod handler;
mod request;
mod response;

pub use handler::{
    async_handler_fn, handler_fn, AsyncHandler, HandlerResult, RequestHandler, SyncHandler,
};
pub use request::FakeRequest;
pub use response::{FakeResponse, HyperResponse};
