pub mod accumulator;
pub mod sse_parser;

pub use accumulator::{accumulate, Accumulator, StreamEvent};
pub use sse_parser::{ByteStream, LineSource};
