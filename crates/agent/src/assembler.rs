//! Conversation assembly: rich history in, wire messages out.
//!
//! The assembler never reorders. The system message comes first, then the
//! history in the order given, then the new user input. Tool bookkeeping is
//! only ever appended.

use convoy_core::{Message, Role, ToolCall, ToolResult, WireMessage};

/// Build the initial wire sequence for one request.
///
/// Each history entry keeps its role; its content is the first text block,
/// or an empty string when it has none. The result always has
/// `history.len() + 2` entries.
pub fn to_wire_messages(
    system_prompt: &str,
    history: &[Message],
    user_input: &str,
) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(WireMessage::system(system_prompt));
    messages.extend(
        history
            .iter()
            .map(|m| WireMessage::new(m.role, m.first_text().unwrap_or_default())),
    );
    messages.push(WireMessage::user(user_input));
    messages
}

/// Record an assistant turn that announced tool calls.
pub fn append_assistant(messages: &mut Vec<WireMessage>, text: &str, tool_calls: Vec<ToolCall>) {
    messages.push(WireMessage::assistant(text, tool_calls));
}

/// Record a tool's answer to one call.
pub fn append_tool(messages: &mut Vec<WireMessage>, result: ToolResult) {
    messages.push(WireMessage::tool(result.tool_call_id, result.content));
}

/// The final assistant answer as a conversation message.
pub fn to_message(text: impl Into<String>) -> Message {
    Message::new(Role::Assistant, text)
}
