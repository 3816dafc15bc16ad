//! Tool-call accumulation.
//!
//! Buffered completions deliver whole calls. Streaming completions deliver
//! fragments: an opening fragment carries the call id (and usually the name),
//! and the arguments JSON trickles in afterwards without an id.

use convoy_core::{ToolCall, ToolCallFragment};
use tracing::warn;

/// Assembles tool calls for one model turn.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<ToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whole-call mode: calls from a buffered turn are already complete.
    pub fn whole(calls: Vec<ToolCall>) -> Vec<ToolCall> {
        calls
    }

    /// Feed one streamed fragment.
    ///
    /// A fragment with a non-empty id opens a new call. Anything else
    /// continues the most recently opened call.
    pub fn push(&mut self, fragment: ToolCallFragment) {
        let ToolCallFragment {
            id,
            name,
            arguments,
        } = fragment;

        if let Some(id) = id.filter(|id| !id.is_empty()) {
            self.calls
                .push(ToolCall::new(id, name.unwrap_or_default(), arguments));
            return;
        }

        let Some(call) = self.calls.last_mut() else {
            warn!(
                arguments_len = arguments.len(),
                "Dropping tool-call fragment with no open call"
            );
            return;
        };

        if call.name.is_empty()
            && let Some(name) = name
        {
            call.name = name;
        }
        call.arguments.push_str(&arguments);
    }

    /// Number of calls opened so far.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Take the assembled calls in the order they were opened, leaving the
    /// accumulator empty for the next round.
    pub fn finalize(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
    }
}
