//! Transport Layer for Platform Responses
//!
//! Wire-level pieces shared by the streaming endpoints:
//! - `frame`: newline framing over arbitrarily fragmented bytes, with a line
//!   length limit
//!
//! # Design Philosophy
//!
//! The transport layer only deals in bytes and lines. It knows nothing about
//! the `data:` marker or JSON payloads; interpretation happens in
//! [`crate::streaming`].

pub mod frame;

// Re-exports for convenience
pub use frame::{FrameDecoder, FrameError, MAX_LINE_SIZE};
