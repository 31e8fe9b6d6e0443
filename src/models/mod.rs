pub mod context;
pub mod request;
pub mod stream;

pub use context::{CallContext, Interrupt};
pub use request::{Request, RequestBuilder, Response};
