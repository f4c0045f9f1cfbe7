//! Stream Events
//!
//! Typed domain events produced from streamed platform responses. These are
//! what chat and research views consume; they never see raw bytes or lines.
//!
//! # Design Philosophy
//!
//! The wire format does not always say what a payload is. The research
//! stream infers the kind from the payload's shape, the chat stream sends an
//! explicit `type`. Either way the consumer gets exactly one
//! [`StreamEvent`] variant per classified line.

use serde::{Deserialize, Serialize};

use crate::research::{ResearchPhase, ResearchResult};

/// Which streaming endpoint a session is consuming
///
/// Determines how payloads without an error or result shape are classified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Chat endpoint: payloads carry an explicit `type` field
    #[default]
    Chat,
    /// Research endpoint: payloads are classified by shape
    Research,
}

impl StreamKind {
    /// Lowercase name used in logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Research => "research",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified event from a streaming response
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Session metadata (session id, model, retrieval stats, ...)
    Metadata(serde_json::Map<String, serde_json::Value>),
    /// A piece of generated text
    Token(String),
    /// Intermediate progress of a research run
    Progress(ProgressRecord),
    /// The finished synthesis
    Result(Box<ResearchResult>),
    /// An application-level failure reported inside the stream
    Error(String),
    /// The `[DONE]` sentinel
    Done,
}

impl StreamEvent {
    /// Short name of the event kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Metadata(_) => "metadata",
            Self::Token(_) => "token",
            Self::Progress(_) => "progress",
            Self::Result(_) => "result",
            Self::Error(_) => "error",
            Self::Done => "done",
        }
    }

    /// Whether this event ends the stream
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// One entry in a progress history
///
/// Histories are append-only and kept in arrival order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Display phase at the time of this record
    pub phase: ResearchPhase,
    /// Human-readable progress message
    pub message: String,
    /// Iteration counter (0-based)
    pub iteration: u32,
    /// Everything else the server reported
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ProgressRecord {
    /// Create a record with empty metadata
    pub fn new(phase: ResearchPhase, message: impl Into<String>, iteration: u32) -> Self {
        Self {
            phase,
            message: message.into(),
            iteration,
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Progress percentage, when the server reported one
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        self.metadata
            .get("progress_percent")
            .and_then(serde_json::Value::as_f64)
            .map(|p| p.clamp(0.0, 100.0).round() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(StreamEvent::Token("x".into()).kind(), "token");
        assert_eq!(StreamEvent::Done.kind(), "done");
        assert_eq!(StreamEvent::Error("boom".into()).kind(), "error");
        assert!(StreamEvent::Done.is_done());
        assert!(!StreamEvent::Metadata(serde_json::Map::new()).is_done());
    }

    #[test]
    fn test_progress_record_metadata() {
        let record = ProgressRecord::new(ResearchPhase::Search, "Retrieving sources", 2)
            .with_metadata("progress_percent", 140);
        assert_eq!(record.percent(), Some(100));
        let fractional = ProgressRecord::default().with_metadata("progress_percent", 42.6);
        assert_eq!(fractional.percent(), Some(43));
        assert_eq!(record.iteration, 2);

        let bare = ProgressRecord::new(ResearchPhase::Plan, "", 0);
        assert_eq!(bare.percent(), None);
    }
}
