use crate::error::RelayError;
use crate::event::{EventKind, RealtimeEvent, encode};
use crate::policy::SessionPolicy;
use crate::tool::ToolRegistry;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Rewrites client→upstream events.
///
/// Only `session.update` is touched: the session policy is laid over the
/// client's request and the tool catalog is replaced by the registered one.
#[derive(Debug, Clone)]
pub struct ServerBoundTransform {
    registry: Arc<ToolRegistry>,
    policy: Arc<SessionPolicy>,
}

impl ServerBoundTransform {
    pub fn new(registry: Arc<ToolRegistry>, policy: Arc<SessionPolicy>) -> Self {
        Self { registry, policy }
    }

    /// Returns the frame to send upstream, or `None` to drop it.
    pub fn process(&self, frame: &str) -> Result<Option<String>, RelayError> {
        let event = RealtimeEvent::parse(frame)?;
        match event.kind() {
            EventKind::SessionUpdate => self.rewrite_session_update(&event).map(Some),
            _ => {
                debug!(event_type = event.event_type(), "Forwarding upstream");
                Ok(Some(frame.to_string()))
            }
        }
    }

    fn rewrite_session_update(&self, event: &RealtimeEvent) -> Result<String, RelayError> {
        let mut body = event.to_body();
        let session = body
            .get_mut("session")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| event.missing("session"))?;

        self.apply_policy(session)?;

        let tool_choice = if self.registry.is_empty() { "none" } else { "auto" };
        session.insert("tool_choice".into(), tool_choice.into());
        session.insert("tools".into(), Value::Array(self.registry.schemas()));

        debug!(tools = self.registry.len(), "Applied session policy to session.update");
        encode(&body)
    }

    fn apply_policy(&self, session: &mut Map<String, Value>) -> Result<(), RelayError> {
        let policy = &self.policy;
        if let Some(instructions) = &policy.instructions {
            session.insert("instructions".into(), instructions.as_str().into());
        }
        if let Some(temperature) = policy.temperature {
            session.insert("temperature".into(), temperature.into());
        }
        if let Some(max) = policy.max_output_tokens {
            let max = serde_json::to_value(max).map_err(RelayError::Serialize)?;
            session.insert("max_response_output_tokens".into(), max);
        }
        if let Some(disable) = policy.disable_audio {
            session.insert("disable_audio".into(), disable.into());
        }
        if let Some(voice) = policy.voice_value() {
            session.insert("voice".into(), voice);
        }
        if let Some(transcription) = policy.transcription_value() {
            session.insert("input_audio_transcription".into(), transcription);
        }
        let turn_detection =
            serde_json::to_value(&policy.turn_detection).map_err(RelayError::Serialize)?;
        session.insert("turn_detection".into(), turn_detection);
        Ok(())
    }
}
