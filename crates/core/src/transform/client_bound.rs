use super::Outbound;
use crate::error::RelayError;
use crate::event::{EventKind, ItemType, RealtimeEvent, RelayEvent, encode};
use crate::pending::PendingToolCallTable;
use crate::policy::SessionPolicy;
use crate::tool::{ToolRegistry, ToolResultDirection};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Rewrites upstream→client events.
///
/// Masks the server-side prompt and tool catalog, swallows every part of the
/// function-call protocol, runs the tools upstream asks for and splices their
/// output back into the upstream conversation.
#[derive(Debug)]
pub struct ClientBoundTransform {
    registry: Arc<ToolRegistry>,
    policy: Arc<SessionPolicy>,
    pending: PendingToolCallTable,
}

impl ClientBoundTransform {
    pub fn new(registry: Arc<ToolRegistry>, policy: Arc<SessionPolicy>) -> Self {
        Self {
            registry,
            policy,
            pending: PendingToolCallTable::new(),
        }
    }

    pub fn pending(&self) -> &PendingToolCallTable {
        &self.pending
    }

    /// Processes one upstream frame.
    ///
    /// The returned frames must be sent in order. An empty list means the
    /// event is suppressed. Tool execution happens inline, so this future
    /// resolves only after any requested tool has finished.
    pub async fn process(&mut self, frame: &str) -> Result<Vec<Outbound>, RelayError> {
        let event = RealtimeEvent::parse(frame)?;
        let forward = || vec![Outbound::Client(frame.to_string())];

        match (event.kind(), event.item_type()) {
            (EventKind::SessionCreated, _) => {
                Ok(vec![Outbound::Client(self.mask_session_created(&event)?)])
            }
            (EventKind::ResponseOutputItemAdded, Some(ItemType::FunctionCall)) => Ok(vec![]),
            (EventKind::ConversationItemCreated, Some(ItemType::FunctionCall)) => {
                let call = event.function_call()?;
                if self
                    .pending
                    .register(&call.call_id, event.str_field("previous_item_id"))
                {
                    debug!(call_id = %call.call_id, tool = %call.name, "Tool call pending");
                }
                Ok(vec![])
            }
            (EventKind::ConversationItemCreated, Some(ItemType::FunctionCallOutput)) => Ok(vec![]),
            (EventKind::FunctionCallArgumentsDelta | EventKind::FunctionCallArgumentsDone, _) => {
                Ok(vec![])
            }
            (EventKind::ResponseOutputItemDone, Some(ItemType::FunctionCall)) => {
                self.run_tool_call(&event).await
            }
            (EventKind::ResponseDone, _) => self.settle_response(&event, frame),
            _ => {
                debug!(event_type = event.event_type(), "Forwarding to client");
                Ok(forward())
            }
        }
    }

    /// Hides the server prompt and tool catalog from the client. The voice is
    /// only replaced when the policy configures one; otherwise the upstream
    /// default is reported as is.
    fn mask_session_created(&self, event: &RealtimeEvent) -> Result<String, RelayError> {
        let mut body = event.to_body();
        let session = body
            .get_mut("session")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| event.missing("session"))?;

        session.insert("instructions".into(), "".into());
        session.insert("tools".into(), Value::Array(Vec::new()));
        if let Some(voice) = self.policy.voice_value() {
            session.insert("voice".into(), voice);
        }
        session.insert("tool_choice".into(), "none".into());
        if let Some(transcription) = self.policy.transcription_value() {
            session.insert("input_audio_transcription".into(), transcription);
        }
        let turn_detection =
            serde_json::to_value(&self.policy.turn_detection).map_err(RelayError::Serialize)?;
        session.insert("turn_detection".into(), turn_detection);
        session.insert("max_response_output_tokens".into(), Value::Null);

        encode(&body)
    }

    async fn run_tool_call(&self, event: &RealtimeEvent) -> Result<Vec<Outbound>, RelayError> {
        let call = event.function_call()?;
        let previous_item_id = self
            .pending
            .get(&call.call_id)
            .ok_or_else(|| RelayError::OrphanedToolCall(call.call_id.clone()))?
            .previous_item_id
            .clone();
        let handler = self
            .registry
            .lookup(&call.name)
            .map(|tool| Arc::clone(&tool.handler))
            .ok_or_else(|| RelayError::ToolNotFound(call.name.clone()))?;
        let arguments: Value =
            serde_json::from_str(&call.arguments).map_err(|source| RelayError::InvalidArguments {
                tool: call.name.clone(),
                source,
            })?;

        info!(tool = %call.name, call_id = %call.call_id, "Executing tool");
        let result = handler
            .execute(arguments)
            .await
            .map_err(|source| RelayError::ToolFailed {
                tool: call.name.clone(),
                source,
            })?;
        let text = result.to_text();
        info!(
            tool = %call.name,
            call_id = %call.call_id,
            destination = ?result.destination,
            "Tool finished"
        );

        let mut out = Vec::with_capacity(2);
        match result.destination {
            ToolResultDirection::ToServer => {
                out.push(Outbound::Upstream(
                    RelayEvent::function_call_output(&call.call_id, text).encode()?,
                ));
            }
            ToolResultDirection::ToClient => {
                out.push(Outbound::Upstream(
                    RelayEvent::function_call_output(&call.call_id, "").encode()?,
                ));
                let extension = RelayEvent::ToolResponse {
                    previous_item_id,
                    tool_name: call.name,
                    tool_result: text,
                };
                out.push(Outbound::Client(extension.encode()?));
            }
        }
        Ok(out)
    }

    fn settle_response(
        &mut self,
        event: &RealtimeEvent,
        frame: &str,
    ) -> Result<Vec<Outbound>, RelayError> {
        let mut out = Vec::with_capacity(2);
        let settled = self.pending.clear();
        if settled > 0 {
            debug!(settled, "Tool outputs submitted, requesting a new response");
            out.push(Outbound::Upstream(RelayEvent::ResponseCreate.encode()?));
        }
        let client_frame = match strip_function_calls(event)? {
            Some(rewritten) => rewritten,
            None => frame.to_string(),
        };
        out.push(Outbound::Client(client_frame));
        Ok(out)
    }
}

fn is_function_call(output: &Value) -> bool {
    output.get("type").and_then(Value::as_str) == Some("function_call")
}

/// Removes `function_call` entries from `response.output`. Returns `None` when
/// there is nothing to remove, so the original frame can be forwarded as is.
fn strip_function_calls(event: &RealtimeEvent) -> Result<Option<String>, RelayError> {
    let has_calls = event
        .body()
        .get("response")
        .and_then(|response| response.get("output"))
        .and_then(Value::as_array)
        .is_some_and(|output| output.iter().any(is_function_call));
    if !has_calls {
        return Ok(None);
    }

    let mut body = event.to_body();
    if let Some(output) = body
        .get_mut("response")
        .and_then(|response| response.get_mut("output"))
        .and_then(Value::as_array_mut)
    {
        output.retain(|entry| !is_function_call(entry));
    }
    encode(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ModelFamily, VadProfile};
    use crate::tool::{MockToolHandler, ToolHandler, ToolResult};
    use serde_json::json;

    const SEARCH_DONE: &str = r#"{"type":"response.output_item.done","item":{"type":"function_call","call_id":"c1","name":"search","arguments":"{\"q\":\"x\"}"}}"#;
    const SEARCH_CREATED: &str = r#"{"type":"conversation.item.created","previous_item_id":"item_0","item":{"type":"function_call","call_id":"c1","name":"search","arguments":""}}"#;

    fn policy() -> Arc<SessionPolicy> {
        Arc::new(
            SessionPolicy::new(ModelFamily::AoaiRealtime, VadProfile::server())
                .with_instructions("secret prompt")
                .with_voice("alloy")
                .with_transcription_model("whisper-1"),
        )
    }

    fn transform_with(tool: &str, result: ToolResult) -> ClientBoundTransform {
        let mut mock = MockToolHandler::new();
        mock.expect_execute()
            .withf(|args| args == &json!({"q": "x"}))
            .times(1)
            .returning(move |_| Ok(result.clone()));
        let handler: Arc<dyn ToolHandler> = Arc::new(mock);
        let mut registry = ToolRegistry::new();
        registry.register(tool, json!({"type": "function", "name": tool}), handler);
        ClientBoundTransform::new(Arc::new(registry), policy())
    }

    fn empty_transform() -> ClientBoundTransform {
        ClientBoundTransform::new(Arc::new(ToolRegistry::new()), policy())
    }

    fn parse(frame: &str) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test]
    async fn test_session_created_is_masked() {
        let mut transform = empty_transform();
        let frame = r#"{"type":"session.created","session":{"id":"sess_1","instructions":"secret prompt","tools":[{"name":"search"}],"tool_choice":"auto","voice":"echo","max_response_output_tokens":4096}}"#;

        let out = transform.process(frame).await.unwrap();
        let [Outbound::Client(masked)] = out.as_slice() else {
            panic!("expected a single client frame, got {out:?}");
        };
        let session = &parse(masked)["session"];
        assert_eq!(session["id"], "sess_1");
        assert_eq!(session["instructions"], "");
        assert_eq!(session["tools"], json!([]));
        assert_eq!(session["tool_choice"], "none");
        assert_eq!(session["voice"], "alloy");
        assert_eq!(session["input_audio_transcription"], json!({"model": "whisper-1"}));
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert_eq!(session["max_response_output_tokens"], Value::Null);
    }

    #[tokio::test]
    async fn test_session_created_for_voice_agent_family() {
        let policy = SessionPolicy::new(ModelFamily::VoiceAgent, VadProfile::semantic())
            .with_instructions("secret prompt")
            .with_voice("ava");
        let mut transform =
            ClientBoundTransform::new(Arc::new(ToolRegistry::new()), Arc::new(policy));
        let frame = r#"{"type":"session.created","session":{"id":"sess_2","voice":"upstream-voice","turn_detection":{"type":"server_vad"}}}"#;

        let out = transform.process(frame).await.unwrap();
        let [Outbound::Client(masked)] = out.as_slice() else {
            panic!("expected a single client frame, got {out:?}");
        };
        let session = &parse(masked)["session"];
        assert_eq!(session["voice"], json!({"name": "ava", "type": "azure-standard"}));
        assert_eq!(
            session["turn_detection"],
            json!({"type": "semantic_vad", "eagerness": "auto", "create_response": true})
        );
        assert_eq!(session["instructions"], "");
    }

    #[tokio::test]
    async fn test_session_created_keeps_upstream_voice_without_override() {
        let policy = SessionPolicy::new(ModelFamily::AoaiRealtime, VadProfile::server());
        let mut transform =
            ClientBoundTransform::new(Arc::new(ToolRegistry::new()), Arc::new(policy));
        let frame = r#"{"type":"session.created","session":{"voice":"upstream-voice"}}"#;

        let out = transform.process(frame).await.unwrap();
        let [Outbound::Client(masked)] = out.as_slice() else {
            panic!("expected a single client frame, got {out:?}");
        };
        assert_eq!(parse(masked)["session"]["voice"], "upstream-voice");
    }

    #[tokio::test]
    async fn test_function_call_protocol_is_suppressed() {
        let mut transform = empty_transform();
        let frames = [
            r#"{"type":"response.output_item.added","item":{"type":"function_call","call_id":"c1","name":"search"}}"#,
            SEARCH_CREATED,
            r#"{"type":"conversation.item.created","item":{"type":"function_call_output","call_id":"c1","output":"x"}}"#,
            r#"{"type":"response.function_call_arguments.delta","call_id":"c1","delta":"{\"q"}"#,
            r#"{"type":"response.function_call_arguments.done","call_id":"c1","arguments":"{\"q\":\"x\"}"}"#,
        ];
        for frame in frames {
            assert!(transform.process(frame).await.unwrap().is_empty(), "{frame} leaked");
        }
        assert_eq!(transform.pending().len(), 1);
        assert_eq!(
            transform.pending().get("c1").unwrap().previous_item_id.as_deref(),
            Some("item_0")
        );
    }

    #[tokio::test]
    async fn test_non_function_items_are_forwarded() {
        let mut transform = empty_transform();
        let frame = r#"{"type":"response.output_item.added","item":{"type":"message","role":"assistant"}}"#;
        assert_eq!(
            transform.process(frame).await.unwrap(),
            vec![Outbound::Client(frame.to_string())]
        );
    }

    #[tokio::test]
    async fn test_to_server_result_goes_upstream_only() {
        let mut transform = transform_with("search", ToolResult::to_server("found"));
        transform.process(SEARCH_CREATED).await.unwrap();

        let out = transform.process(SEARCH_DONE).await.unwrap();
        let [Outbound::Upstream(create)] = out.as_slice() else {
            panic!("expected a single upstream frame, got {out:?}");
        };
        assert_eq!(
            parse(create),
            json!({
                "type": "conversation.item.create",
                "item": {"type": "function_call_output", "call_id": "c1", "output": "found"}
            })
        );
    }

    #[tokio::test]
    async fn test_to_client_result_goes_to_extension_event() {
        let mut transform = transform_with(
            "search",
            ToolResult::to_client(json!({"sources": ["doc-1"]})),
        );
        transform.process(SEARCH_CREATED).await.unwrap();

        let out = transform.process(SEARCH_DONE).await.unwrap();
        let [Outbound::Upstream(create), Outbound::Client(extension)] = out.as_slice() else {
            panic!("expected upstream then client frames, got {out:?}");
        };
        assert_eq!(parse(create)["item"]["output"], "");
        assert_eq!(
            parse(extension),
            json!({
                "type": "extension.middle_tier_tool_response",
                "previous_item_id": "item_0",
                "tool_name": "search",
                "tool_result": "{\"sources\":[\"doc-1\"]}"
            })
        );
    }

    #[tokio::test]
    async fn test_orphaned_tool_call_is_an_error() {
        let mut transform = empty_transform();
        assert!(matches!(
            transform.process(SEARCH_DONE).await,
            Err(RelayError::OrphanedToolCall(id)) if id == "c1"
        ));
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_an_error() {
        let mut transform = empty_transform();
        transform.process(SEARCH_CREATED).await.unwrap();
        assert!(matches!(
            transform.process(SEARCH_DONE).await,
            Err(RelayError::ToolNotFound(name)) if name == "search"
        ));
    }

    #[tokio::test]
    async fn test_tool_failure_is_an_error() {
        let mut mock = MockToolHandler::new();
        mock.expect_execute()
            .returning(|_| Err(anyhow::anyhow!("index unavailable")));
        let handler: Arc<dyn ToolHandler> = Arc::new(mock);
        let mut registry = ToolRegistry::new();
        registry.register("search", json!({"name": "search"}), handler);
        let mut transform = ClientBoundTransform::new(Arc::new(registry), policy());

        transform.process(SEARCH_CREATED).await.unwrap();
        assert!(matches!(
            transform.process(SEARCH_DONE).await,
            Err(RelayError::ToolFailed { tool, .. }) if tool == "search"
        ));
    }

    #[tokio::test]
    async fn test_response_done_requests_continuation_and_strips_calls() {
        let mut transform = transform_with("search", ToolResult::to_server("found"));
        transform.process(SEARCH_CREATED).await.unwrap();
        transform.process(SEARCH_DONE).await.unwrap();

        let frame = r#"{"type":"response.done","response":{"id":"r1","output":[{"type":"function_call","call_id":"c1"},{"type":"message","id":"m1"},{"type":"function_call","call_id":"c2"}]}}"#;
        let out = transform.process(frame).await.unwrap();
        let [Outbound::Upstream(create), Outbound::Client(done)] = out.as_slice() else {
            panic!("expected upstream then client frames, got {out:?}");
        };
        assert_eq!(parse(create), json!({"type": "response.create"}));
        assert_eq!(
            parse(done)["response"]["output"],
            json!([{"type": "message", "id": "m1"}])
        );
        assert!(transform.pending().is_empty());
    }

    #[tokio::test]
    async fn test_response_done_without_calls_is_forwarded_verbatim() {
        let mut transform = empty_transform();
        let frame = r#"{"type":"response.done", "response":{"output":[{"type":"message"}]}}"#;
        assert_eq!(
            transform.process(frame).await.unwrap(),
            vec![Outbound::Client(frame.to_string())]
        );
    }

    #[tokio::test]
    async fn test_unknown_events_are_forwarded_verbatim() {
        let mut transform = empty_transform();
        let frame = r#"{"type":"response.audio.delta", "delta":"UklGRg==","response_id":"r1"}"#;
        assert_eq!(
            transform.process(frame).await.unwrap(),
            vec![Outbound::Client(frame.to_string())]
        );
    }
}
