use thiserror::Error;

/// Failures raised while transforming a single relayed event.
///
/// Every variant is fatal for the session that produced it; the session is the
/// unit of isolation, so the pump loop that hits one of these stops.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Malformed event payload: {0}")]
    MalformedEvent(#[source] serde_json::Error),

    #[error("Event is not a JSON object")]
    NotAnObject,

    #[error("Event '{event_type}' is missing field '{field}'")]
    MissingField {
        event_type: String,
        field: &'static str,
    },

    #[error("Tool '{0}' is not registered")]
    ToolNotFound(String),

    #[error("No pending tool call for call id '{0}'")]
    OrphanedToolCall(String),

    #[error("Invalid arguments for tool '{tool}': {source}")]
    InvalidArguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Tool '{tool}' failed: {source}")]
    ToolFailed {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to serialize event: {0}")]
    Serialize(#[source] serde_json::Error),
}
