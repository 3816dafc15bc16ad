//! Provider trait: the abstraction over the remote completion endpoint.
//!
//! A Provider knows how to send a wire-message sequence to an LLM and get a
//! response back, either as a complete turn or as a stream of events.
//!
//! Implementations: OpenAI-compatible endpoints (see `convoy-providers`),
//! scripted mocks in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::WireMessage;
use crate::tool::{ToolCall, ToolCallFragment};

/// Requested output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

/// Configuration for a single completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The full wire message sequence, system message first
    pub messages: Vec<WireMessage>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    #[serde(default)]
    pub response_format: ResponseFormat,

    /// Tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// What the model produced in one buffered completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    /// A plain answer; no tool use requested.
    Text { text: String },

    /// The model requests tool calls. `text` is any content emitted alongside.
    ToolUse { text: String, calls: Vec<ToolCall> },
}

impl Turn {
    /// Build a turn from the raw response fields. An empty call list is a text turn.
    pub fn from_parts(text: String, calls: Vec<ToolCall>) -> Self {
        if calls.is_empty() {
            Self::Text { text }
        } else {
            Self::ToolUse { text, calls }
        }
    }

    /// The textual part of the turn.
    pub fn text(&self) -> &str {
        match self {
            Self::Text { text } | Self::ToolUse { text, .. } => text,
        }
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub turn: Turn,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Why the model ended its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolUse,
}

/// A single event in a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial answer text
    TextDelta { text: String },

    /// Partial tool call
    ToolCallFragment { fragment: ToolCallFragment },

    /// End of the model's turn
    TurnComplete { reason: StopReason },
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn fragment(fragment: ToolCallFragment) -> Self {
        Self::ToolCallFragment { fragment }
    }

    pub fn complete(reason: StopReason) -> Self {
        Self::TurnComplete { reason }
    }
}

/// Receiving half of a streaming completion.
pub type EventReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<StreamEvent, ProviderError>>;

/// The core Provider trait.
///
/// The recursion controller calls `complete()` or `stream()` without knowing
/// which endpoint is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Send a request and get a stream of events.
    ///
    /// Default implementation calls `complete()` and replays the turn as events:
    /// the text as one delta, each tool call as a single opening fragment, then
    /// the matching `TurnComplete`.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<EventReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let events = replay_turn(response.turn);
        let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.send(Ok(event)).await;
        }
        Ok(rx)
    }
}

/// Express a buffered turn as the event sequence a streaming endpoint would send.
pub fn replay_turn(turn: Turn) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    match turn {
        Turn::Text { text } => {
            if !text.is_empty() {
                events.push(StreamEvent::text(text));
            }
            events.push(StreamEvent::complete(StopReason::Stop));
        }
        Turn::ToolUse { text, calls } => {
            if !text.is_empty() {
                events.push(StreamEvent::text(text));
            }
            for call in calls {
                events.push(StreamEvent::fragment(ToolCallFragment {
                    id: Some(call.id),
                    name: Some(call.name),
                    arguments: call.arguments,
                }));
            }
            events.push(StreamEvent::complete(StopReason::ToolUse));
        }
    }
    events
}
