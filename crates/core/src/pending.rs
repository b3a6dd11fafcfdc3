use std::collections::HashMap;

/// A tool call announced by upstream and not yet settled by `response.done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    pub call_id: String,
    /// The conversation item that preceded the call, echoed back to the client
    /// in extension events. Upstream sends `null` for the first item.
    pub previous_item_id: Option<String>,
}

/// In-flight tool calls of one relay session, keyed by call id.
///
/// Owned by the upstream→client direction of a single session, so it needs no
/// synchronisation.
#[derive(Debug, Default)]
pub struct PendingToolCallTable {
    calls: HashMap<String, PendingToolCall>,
}

impl PendingToolCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a call unless one with the same id is already pending.
    /// Returns whether a new entry was created.
    pub fn register(&mut self, call_id: &str, previous_item_id: Option<&str>) -> bool {
        if self.calls.contains_key(call_id) {
            return false;
        }
        self.calls.insert(
            call_id.to_string(),
            PendingToolCall {
                call_id: call_id.to_string(),
                previous_item_id: previous_item_id.map(str::to_string),
            },
        );
        true
    }

    pub fn get(&self, call_id: &str) -> Option<&PendingToolCall> {
        self.calls.get(call_id)
    }

    /// Drops every entry, returning how many were pending.
    pub fn clear(&mut self) -> usize {
        let count = self.calls.len();
        self.calls.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
