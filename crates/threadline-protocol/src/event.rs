use serde::Serialize;
use serde_json::Value;

/// Closed set of event kinds (spec §4.8). Each maps to a single wire
/// character used in the SSE `data:` framing (§6) — never the standard
/// `event:` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    InitialState,
    InitialStateNoCall,
    Acknowledge,
    Thought,
    ModelMessage,
    FunctionCall,
    FunctionResponse,
    InlineData,
    Complete,
    SessionName,
    CumulTokenCount,
    PendingConfirmation,
    GenerationChanged,
    Ping,
    Finish,
    Error,
}

impl EventKind {
    /// The one-character wire tag used in SSE framing.
    pub fn wire_char(self) -> char {
        match self {
            EventKind::InitialState => 'I',
            EventKind::InitialStateNoCall => 'J',
            EventKind::Acknowledge => 'A',
            EventKind::Thought => 'T',
            EventKind::ModelMessage => 'M',
            EventKind::FunctionCall => 'C',
            EventKind::FunctionResponse => 'R',
            EventKind::InlineData => 'D',
            EventKind::Complete => 'X',
            EventKind::SessionName => 'S',
            EventKind::CumulTokenCount => 'K',
            EventKind::PendingConfirmation => 'P',
            EventKind::GenerationChanged => 'G',
            EventKind::Ping => 'Q',
            EventKind::Finish => 'F',
            EventKind::Error => 'E',
        }
    }
}

/// A single broadcastable event: a kind plus a JSON-serializable payload.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub payload: Value,
}

impl Event {
    pub fn new(kind: EventKind, payload: impl Serialize) -> Self {
        Self {
            kind,
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Render this event as the literal SSE wire frame from spec §4.8/§6:
    /// `data: <kind>\ndata: <payload>\n\n`, with multi-line payloads
    /// continued on additional `data:` lines.
    pub fn to_sse(&self) -> String {
        let payload_text = match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut frame = String::new();
        frame.push_str("data: ");
        frame.push(self.kind.wire_char());
        frame.push('\n');
        for line in payload_text.split('\n') {
            frame.push_str("data: ");
            frame.push_str(line);
            frame.push('\n');
        }
        frame.push('\n');
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_chars_are_distinct() {
        let kinds = [
            EventKind::InitialState,
            EventKind::InitialStateNoCall,
            EventKind::Acknowledge,
            EventKind::Thought,
            EventKind::ModelMessage,
            EventKind::FunctionCall,
            EventKind::FunctionResponse,
            EventKind::InlineData,
            EventKind::Complete,
            EventKind::SessionName,
            EventKind::CumulTokenCount,
            EventKind::PendingConfirmation,
            EventKind::GenerationChanged,
            EventKind::Ping,
            EventKind::Finish,
            EventKind::Error,
        ];
        let mut seen = std::collections::HashSet::new();
        for k in kinds {
            assert!(seen.insert(k.wire_char()), "duplicate wire char for {k:?}");
        }
    }

    #[test]
    fn single_line_payload_frames_as_two_data_lines() {
        let ev = Event::new(EventKind::ModelMessage, "hello");
        assert_eq!(ev.to_sse(), "data: M\ndata: hello\n\n");
    }

    #[test]
    fn multiline_payload_continues_on_additional_data_lines() {
        let ev = Event::new(EventKind::Thought, "line one\nline two");
        assert_eq!(ev.to_sse(), "data: T\ndata: line one\ndata: line two\n\n");
    }

    #[test]
    fn json_payload_is_serialized_inline() {
        let ev = Event::new(EventKind::CumulTokenCount, serde_json::json!({"n": 7}));
        assert_eq!(ev.to_sse(), "data: K\ndata: {\"n\":7}\n\n");
    }
}
