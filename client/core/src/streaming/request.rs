//! Streaming Requests
//!
//! Request descriptions for the two streaming endpoints. Each request knows
//! which [`StreamKind`] its response must be classified with.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::events::StreamKind;
use crate::research::ResearchParams;

/// Chat endpoint path
pub const CHAT_STREAM_PATH: &str = "/chat/stream";

/// Research streaming endpoint path
pub const RESEARCH_STREAM_PATH: &str = "/research/stream";

/// Body of a streamed chat turn
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's message
    pub message: String,
    /// Existing chat session to continue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Knowledge namespace to ground the answer in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ChatRequest {
    /// Create a request for a new session
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Continue an existing session
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Body of a streamed research run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchStreamRequest {
    /// The research question
    pub query: String,
    /// Run parameters, flattened into the body
    #[serde(flatten)]
    pub params: ResearchParams,
}

/// A request against a streaming endpoint
#[derive(Clone, Debug)]
pub struct StreamRequest {
    /// HTTP method
    pub method: Method,
    /// API path relative to the base URL
    pub path: String,
    /// JSON body
    pub body: serde_json::Value,
    /// How the response payloads are classified
    pub kind: StreamKind,
}

impl StreamRequest {
    /// Create a `POST` stream request
    pub fn new(path: impl Into<String>, body: serde_json::Value, kind: StreamKind) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body,
            kind,
        }
    }

    /// Stream a chat turn
    #[must_use]
    pub fn chat(request: &ChatRequest) -> Self {
        Self::new(CHAT_STREAM_PATH, to_body(request), StreamKind::Chat)
    }

    /// Stream a research run
    #[must_use]
    pub fn research(request: &ResearchStreamRequest) -> Self {
        Self::new(RESEARCH_STREAM_PATH, to_body(request), StreamKind::Research)
    }
}

fn to_body<T: Serialize>(value: &T) -> serde_json::Value {
    // Plain structs of strings and integers cannot fail to serialize
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chat_request_body() {
        let request = StreamRequest::chat(&ChatRequest::new("hi").with_namespace("docs"));
        assert_eq!(request.path, CHAT_STREAM_PATH);
        assert_eq!(request.kind, StreamKind::Chat);
        assert_eq!(
            request.body,
            serde_json::json!({"message": "hi", "namespace": "docs"})
        );
    }

    #[test]
    fn test_research_request_body() {
        let request = StreamRequest::research(&ResearchStreamRequest {
            query: "compare vendors".to_string(),
            params: ResearchParams::default(),
        });
        assert_eq!(request.path, RESEARCH_STREAM_PATH);
        assert_eq!(request.kind, StreamKind::Research);
        assert_eq!(request.body["query"], "compare vendors");
        assert_eq!(request.body["max_iterations"], 5);
    }
}
