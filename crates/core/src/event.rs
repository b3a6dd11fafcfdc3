//! Decoding of relayed realtime events.
//!
//! Both legs of the relay speak the same JSON vocabulary: an object with a
//! `type` discriminator plus type-specific payload. Only a handful of types are
//! interesting to the relay, so events are kept as generic JSON objects and
//! classified into an [`EventKind`]; everything unrecognised lands in
//! [`EventKind::Other`] and is passed through untouched.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The event types the relay reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SessionUpdate,
    SessionCreated,
    ResponseOutputItemAdded,
    ConversationItemCreated,
    FunctionCallArgumentsDelta,
    FunctionCallArgumentsDone,
    ResponseOutputItemDone,
    ResponseDone,
    /// Any type without a rewrite rule, including ones added upstream later.
    Other,
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "session.update" => Self::SessionUpdate,
            "session.created" => Self::SessionCreated,
            "response.output_item.added" => Self::ResponseOutputItemAdded,
            "conversation.item.created" => Self::ConversationItemCreated,
            "response.function_call_arguments.delta" => Self::FunctionCallArgumentsDelta,
            "response.function_call_arguments.done" => Self::FunctionCallArgumentsDone,
            "response.output_item.done" => Self::ResponseOutputItemDone,
            "response.done" => Self::ResponseDone,
            _ => Self::Other,
        }
    }
}

/// Conversation item types carried in `item.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    FunctionCall,
    FunctionCallOutput,
    Other,
}

impl ItemType {
    fn from_value(item: &Value) -> Self {
        match item.get("type").and_then(Value::as_str) {
            Some("function_call") => Self::FunctionCall,
            Some("function_call_output") => Self::FunctionCallOutput,
            _ => Self::Other,
        }
    }
}

/// One parsed event. The body is never mutated in place; rewrites work on a
/// copy obtained through [`RealtimeEvent::to_body`].
#[derive(Debug, Clone)]
pub struct RealtimeEvent {
    kind: EventKind,
    body: Map<String, Value>,
}

impl RealtimeEvent {
    /// Parses a text frame. Non-JSON payloads, non-object payloads and objects
    /// without a string `type` are rejected.
    pub fn parse(frame: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(frame).map_err(RelayError::MalformedEvent)?;
        let Value::Object(body) = value else {
            return Err(RelayError::NotAnObject);
        };
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .map(EventKind::from_type)
            .ok_or_else(|| RelayError::MissingField {
                event_type: "<untyped>".to_string(),
                field: "type",
            })?;
        Ok(Self { kind, body })
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn event_type(&self) -> &str {
        self.body
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// A mutable copy of the body for building a rewritten event.
    pub fn to_body(&self) -> Map<String, Value> {
        self.body.clone()
    }

    /// Type of the embedded `item`, or `None` when the event carries no item.
    pub fn item_type(&self) -> Option<ItemType> {
        self.body.get("item").map(ItemType::from_value)
    }

    /// Optional string field such as `previous_item_id`.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }

    pub(crate) fn missing(&self, field: &'static str) -> RelayError {
        RelayError::MissingField {
            event_type: self.event_type().to_string(),
            field,
        }
    }

    /// Decodes the embedded function-call item.
    pub fn function_call(&self) -> Result<FunctionCallItem, RelayError> {
        let item = self.body.get("item").ok_or_else(|| self.missing("item"))?;
        FunctionCallItem::deserialize(item).map_err(RelayError::MalformedEvent)
    }
}

/// The fields of a `function_call` conversation item the relay needs.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCallItem {
    pub call_id: String,
    #[serde(default)]
    pub name: String,
    /// JSON-encoded arguments, streamed by the model as text.
    #[serde(default)]
    pub arguments: String,
}

/// Serializes a (possibly rewritten) event body back into a text frame.
pub fn encode(body: &Map<String, Value>) -> Result<String, RelayError> {
    serde_json::to_string(body).map_err(RelayError::Serialize)
}

/// Events authored by the relay itself rather than either peer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum RelayEvent {
    /// Hands a tool's output back to the upstream conversation.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    /// Asks the model to continue once tool outputs are in place.
    #[serde(rename = "response.create")]
    ResponseCreate,
    /// Client-directed tool result, outside the upstream vocabulary.
    #[serde(rename = "extension.middle_tier_tool_response")]
    ToolResponse {
        previous_item_id: Option<String>,
        tool_name: String,
        tool_result: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput { call_id: String, output: String },
}

impl RelayEvent {
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(RelayError::Serialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_classifies_known_and_unknown_types() {
        let event = RealtimeEvent::parse(r#"{"type":"response.done","response":{}}"#).unwrap();
        assert_eq!(event.kind(), EventKind::ResponseDone);
        assert_eq!(event.event_type(), "response.done");

        let event = RealtimeEvent::parse(r#"{"type":"response.audio.delta","delta":"AAA="}"#).unwrap();
        assert_eq!(event.kind(), EventKind::Other);
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        assert!(matches!(
            RealtimeEvent::parse("{not json"),
            Err(RelayError::MalformedEvent(_))
        ));
        assert!(matches!(
            RealtimeEvent::parse("[1,2]"),
            Err(RelayError::NotAnObject)
        ));
        assert!(matches!(
            RealtimeEvent::parse(r#"{"session":{}}"#),
            Err(RelayError::MissingField { field: "type", .. })
        ));
    }

    #[test]
    fn test_item_type() {
        let event = RealtimeEvent::parse(
            r#"{"type":"conversation.item.created","item":{"type":"function_call_output"}}"#,
        )
        .unwrap();
        assert_eq!(event.item_type(), Some(ItemType::FunctionCallOutput));

        let event =
            RealtimeEvent::parse(r#"{"type":"conversation.item.created","item":{"type":"message"}}"#)
                .unwrap();
        assert_eq!(event.item_type(), Some(ItemType::Other));

        let event = RealtimeEvent::parse(r#"{"type":"conversation.item.created"}"#).unwrap();
        assert_eq!(event.item_type(), None);
    }

    #[test]
    fn test_function_call_item() {
        let event = RealtimeEvent::parse(
            r#"{"type":"response.output_item.done","item":{"type":"function_call","call_id":"c1","name":"search","arguments":"{\"q\":\"x\"}"}}"#,
        )
        .unwrap();
        let call = event.function_call().unwrap();
        assert_eq!(call.call_id, "c1");
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments, r#"{"q":"x"}"#);
    }

    #[test]
    fn test_relay_events_serialize_to_wire_shape() {
        let create = RelayEvent::function_call_output("c1", "found");
        assert_eq!(
            serde_json::to_value(&create).unwrap(),
            json!({
                "type": "conversation.item.create",
                "item": {"type": "function_call_output", "call_id": "c1", "output": "found"}
            })
        );
        assert_eq!(
            serde_json::to_value(RelayEvent::ResponseCreate).unwrap(),
            json!({"type": "response.create"})
        );
        let ext = RelayEvent::ToolResponse {
            previous_item_id: Some("item_0".to_string()),
            tool_name: "report_grounding".to_string(),
            tool_result: "{}".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&ext).unwrap(),
            json!({
                "type": "extension.middle_tier_tool_response",
                "previous_item_id": "item_0",
                "tool_name": "report_grounding",
                "tool_result": "{}"
            })
        );
    }
}
