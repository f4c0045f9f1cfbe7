//! Event Classification
//!
//! Turns one decoded `data:` line into at most one [`StreamEvent`].
//!
//! # Precedence
//!
//! Payloads do not always carry a discriminant, so they are classified by
//! shape. Rules are evaluated in a fixed order and the first match wins:
//!
//! 1. a non-null `error` field → [`StreamEvent::Error`]
//! 2. a non-null `final_answer` field → [`StreamEvent::Result`]
//! 3. transport fallback:
//!    - research stream → [`StreamEvent::Progress`]
//!    - chat stream → by the explicit `type` field
//!
//! A payload may satisfy more than one shape test; the order above decides.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::events::{ProgressRecord, StreamEvent, StreamKind};
use crate::research::{ResearchPhase, ResearchResult};

/// Marker that prefixes every payload line
pub const DATA_MARKER: &str = "data:";

/// Payload that ends a stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Strip the `data:` marker and its optional single space
///
/// Returns `None` for lines without the marker (comments, `event:` lines,
/// blank separators).
#[must_use]
pub fn strip_marker(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(DATA_MARKER)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Shape tags recognised before the transport-specific fallback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    Error,
    Result,
}

type ShapeMatcher = fn(&Map<String, Value>) -> bool;

/// Ordered shape rules; first match wins
const SHAPE_RULES: [(ShapeMatcher, Shape); 2] = [
    (has_error_field, Shape::Error),
    (has_final_answer_field, Shape::Result),
];

fn has_error_field(obj: &Map<String, Value>) -> bool {
    obj.get("error").is_some_and(|v| !v.is_null())
}

fn has_final_answer_field(obj: &Map<String, Value>) -> bool {
    obj.get("final_answer").is_some_and(|v| !v.is_null())
}

/// Counters for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassifierStats {
    /// Lines that produced an event
    pub classified: u64,
    /// Marked lines whose payload could not be decoded
    pub malformed: u64,
    /// Well-formed payloads with no known meaning
    pub ignored: u64,
}

/// Classifies stream payloads for one transport
#[derive(Clone, Debug)]
pub struct EventClassifier {
    kind: StreamKind,
    stats: ClassifierStats,
}

impl EventClassifier {
    /// Create a classifier for a transport
    #[must_use]
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            stats: ClassifierStats::default(),
        }
    }

    /// Which transport this classifier serves
    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Diagnostic counters
    #[must_use]
    pub fn stats(&self) -> ClassifierStats {
        self.stats
    }

    /// Classify a raw decoded line
    ///
    /// Unmarked and blank lines yield `None` without touching the counters.
    pub fn classify_line(&mut self, line: &str) -> Option<StreamEvent> {
        let payload = strip_marker(line)?;
        self.classify_payload(payload)
    }

    /// Classify a payload with the marker already stripped
    pub fn classify_payload(&mut self, payload: &str) -> Option<StreamEvent> {
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            self.stats.classified += 1;
            return Some(StreamEvent::Done);
        }

        let obj = match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(obj)) => obj,
            Ok(other) => {
                self.stats.malformed += 1;
                warn!(
                    kind = ?self.kind,
                    value_type = json_type_name(&other),
                    "Skipping stream payload that is not a JSON object"
                );
                return None;
            }
            Err(e) => {
                self.stats.malformed += 1;
                warn!(
                    kind = ?self.kind,
                    error = %e,
                    payload_len = payload.len(),
                    "Skipping malformed stream payload"
                );
                return None;
            }
        };

        let event = self.classify_object(obj);
        if event.is_some() {
            self.stats.classified += 1;
        }
        event
    }

    fn classify_object(&mut self, obj: Map<String, Value>) -> Option<StreamEvent> {
        let shape = SHAPE_RULES
            .iter()
            .find(|(matches, _)| matches(&obj))
            .map(|(_, shape)| *shape);

        match shape {
            Some(Shape::Error) => Some(StreamEvent::Error(error_text(&obj["error"]))),
            Some(Shape::Result) => self.result_event(obj),
            None => match self.kind {
                StreamKind::Research => Some(StreamEvent::Progress(progress_record(obj))),
                StreamKind::Chat => self.chat_event(obj),
            },
        }
    }

    fn result_event(&mut self, obj: Map<String, Value>) -> Option<StreamEvent> {
        match serde_json::from_value::<ResearchResult>(Value::Object(obj)) {
            Ok(result) => Some(StreamEvent::Result(Box::new(result))),
            Err(e) => {
                self.stats.malformed += 1;
                warn!(error = %e, "Skipping result payload with unexpected shape");
                None
            }
        }
    }

    fn chat_event(&mut self, mut obj: Map<String, Value>) -> Option<StreamEvent> {
        let event_type = obj
            .remove("type")
            .and_then(|t| t.as_str().map(str::to_owned));

        match event_type.as_deref() {
            Some("metadata") => Some(StreamEvent::Metadata(obj)),
            Some("token") => match obj.get("content").and_then(Value::as_str) {
                Some(content) => Some(StreamEvent::Token(content.to_string())),
                None => {
                    self.stats.ignored += 1;
                    debug!("Skipping token payload without content");
                    None
                }
            },
            Some("progress") => Some(StreamEvent::Progress(progress_record(obj))),
            Some("error") => Some(StreamEvent::Error(
                obj.get("message")
                    .map_or_else(|| "unknown error".to_string(), error_text),
            )),
            Some("done") => Some(StreamEvent::Done),
            other => {
                self.stats.ignored += 1;
                debug!(event_type = ?other, "Skipping chat payload of unknown type");
                None
            }
        }
    }
}

/// Build a progress record from a shape-inferred payload
///
/// `phase` (or `status`), `message` and `iteration` are lifted out; every
/// other field is kept as metadata.
fn progress_record(mut obj: Map<String, Value>) -> ProgressRecord {
    let phase = obj
        .remove("phase")
        .or_else(|| obj.get("status").cloned())
        .and_then(|v| v.as_str().map(ResearchPhase::parse))
        .unwrap_or_default();

    let message = obj
        .remove("message")
        .and_then(|v| v.as_str().map(str::to_owned))
        .or_else(|| {
            obj.get("current_step")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_default();

    let iteration = obj
        .remove("iteration")
        .and_then(|v| v.as_u64())
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX));

    ProgressRecord {
        phase,
        message,
        iteration,
        metadata: obj,
    }
}

fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| value.to_string(), str::to_owned),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chat() -> EventClassifier {
        EventClassifier::new(StreamKind::Chat)
    }

    fn research() -> EventClassifier {
        EventClassifier::new(StreamKind::Research)
    }

    #[test]
    fn test_strip_marker() {
        assert_eq!(strip_marker("data: {}"), Some("{}"));
        assert_eq!(strip_marker("data:{}"), Some("{}"));
        assert_eq!(strip_marker("data:  x"), Some(" x"));
        assert_eq!(strip_marker(": keep-alive"), None);
        assert_eq!(strip_marker("event: message"), None);
        assert_eq!(strip_marker(""), None);
    }

    #[test]
    fn test_done_sentinel() {
        assert_eq!(chat().classify_line("data: [DONE]"), Some(StreamEvent::Done));
        assert_eq!(research().classify_line("data: [DONE] "), Some(StreamEvent::Done));
    }

    #[test]
    fn test_unmarked_lines_ignored() {
        let mut classifier = chat();
        assert_eq!(classifier.classify_line(""), None);
        assert_eq!(classifier.classify_line("id: 7"), None);
        assert_eq!(classifier.stats(), ClassifierStats::default());
    }

    #[test]
    fn test_chat_metadata_and_token() {
        let mut classifier = chat();
        let meta = classifier
            .classify_line(r#"data: {"type":"metadata","session_id":"123"}"#)
            .unwrap();
        match meta {
            StreamEvent::Metadata(map) => {
                assert_eq!(map.get("session_id"), Some(&Value::from("123")));
                assert!(!map.contains_key("type"));
            }
            other => panic!("expected metadata, got {other:?}"),
        }

        assert_eq!(
            classifier.classify_line(r#"data: {"type":"token","content":"Hello"}"#),
            Some(StreamEvent::Token("Hello".to_string()))
        );
        assert_eq!(classifier.stats().classified, 2);
    }

    #[test]
    fn test_chat_unknown_type_skipped() {
        let mut classifier = chat();
        assert_eq!(classifier.classify_line(r#"data: {"type":"heartbeat"}"#), None);
        assert_eq!(classifier.classify_line(r#"data: {"content":"x"}"#), None);
        assert_eq!(classifier.stats().ignored, 2);
        assert_eq!(classifier.stats().malformed, 0);
    }

    #[test]
    fn test_malformed_payload_skipped() {
        let mut classifier = chat();
        assert_eq!(classifier.classify_line("data: {not json"), None);
        assert_eq!(classifier.classify_line("data: 42"), None);
        assert_eq!(classifier.stats().malformed, 2);
    }

    #[test]
    fn test_error_field_wins() {
        for mut classifier in [chat(), research()] {
            let event = classifier
                .classify_line(r#"data: {"type":"token","error":"quota exceeded","final_answer":"x"}"#)
                .unwrap();
            assert_eq!(event, StreamEvent::Error("quota exceeded".to_string()));
        }
    }

    #[test]
    fn test_null_error_is_not_an_error() {
        let event = research()
            .classify_line(r#"data: {"error":null,"final_answer":"done"}"#)
            .unwrap();
        assert_eq!(event.kind(), "result");
    }

    #[test]
    fn test_structured_error_text() {
        let event = research()
            .classify_line(r#"data: {"error":{"message":"retriever down","code":503}}"#)
            .unwrap();
        assert_eq!(event, StreamEvent::Error("retriever down".to_string()));
    }

    #[test]
    fn test_research_result() {
        let event = research()
            .classify_line(
                r#"data: {"final_answer":"Revenue grew 4%","sources":[{"title":"Q3 report"}],"confidence":0.8}"#,
            )
            .unwrap();
        match event {
            StreamEvent::Result(result) => {
                assert_eq!(result.final_answer, "Revenue grew 4%");
                assert_eq!(result.sources[0].title.as_deref(), Some("Q3 report"));
                assert_eq!(result.confidence, Some(0.8));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn test_result_with_bad_shape_skipped() {
        let mut classifier = research();
        assert_eq!(classifier.classify_line(r#"data: {"final_answer":17}"#), None);
        assert_eq!(classifier.stats().malformed, 1);
    }

    #[test]
    fn test_research_progress() {
        let event = research()
            .classify_line(
                r#"data: {"phase":"search","message":"Searching 3 sub-questions","iteration":2,"documents":14}"#,
            )
            .unwrap();
        let expected = ProgressRecord::new(ResearchPhase::Search, "Searching 3 sub-questions", 2)
            .with_metadata("documents", 14);
        assert_eq!(event, StreamEvent::Progress(expected));
    }

    #[test]
    fn test_research_progress_from_status_shape() {
        let event = research()
            .classify_line(r#"data: {"status":"analyzing","current_step":"Ranking evidence"}"#)
            .unwrap();
        match event {
            StreamEvent::Progress(record) => {
                assert_eq!(record.phase, ResearchPhase::Analyze);
                assert_eq!(record.message, "Ranking evidence");
                assert_eq!(record.iteration, 0);
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[test]
    fn test_research_ignores_type_field() {
        // The research stream infers kind from shape, an explicit type is just metadata
        let event = research()
            .classify_line(r#"data: {"type":"token","content":"x"}"#)
            .unwrap();
        assert_eq!(event.kind(), "progress");
    }

    #[test]
    fn test_chat_error_type_uses_message() {
        let event = chat()
            .classify_line(r#"data: {"type":"error","message":"model overloaded"}"#)
            .unwrap();
        assert_eq!(event, StreamEvent::Error("model overloaded".to_string()));
    }
}
