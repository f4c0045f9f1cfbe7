//! Streaming Responses
//!
//! Turns a chunked `text/event-stream` body into typed [`StreamEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! bytes ──► FrameDecoder ──► lines ──► EventClassifier ──► StreamEvent
//!           (transport)                 (classifier)        (session)
//! ```
//!
//! [`StreamingSession`] ties the stages together behind a cancellable
//! consumer. Fragment boundaries are invisible above the decoder: the same
//! body split at any points yields the same events.
//!
//! [`StreamEvent`]: crate::events::StreamEvent

pub mod classifier;
pub mod request;
mod session;

pub use classifier::{ClassifierStats, EventClassifier, DATA_MARKER, DONE_SENTINEL};
pub use request::{
    ChatRequest, ResearchStreamRequest, StreamRequest, CHAT_STREAM_PATH, RESEARCH_STREAM_PATH,
};
pub use session::{ReaderExit, ReaderSummary, SessionItem, StreamingSession};
