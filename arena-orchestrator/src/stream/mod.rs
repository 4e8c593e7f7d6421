//! Incremental decoding of chunked response bodies
//!
//! Byte chunks arrive in whatever sizes the transport delivers them. The
//! pieces here turn them into text without splitting multi-byte characters,
//! into lines, and finally into [`StreamEvent`]s.

mod decoder;
mod lines;
mod utf8;

pub use decoder::{Framing, StreamDecoder, StreamEvent};
pub use lines::LineDecoder;
pub use utf8::Utf8Decoder;
