//! Shared test helpers: scripted providers and recording tool handlers.

use async_trait::async_trait;
use convoy_core::error::{ProviderError, ToolError};
use convoy_core::provider::{
    CompletionRequest, CompletionResponse, EventReceiver, Provider, StreamEvent, Turn, Usage,
    replay_turn,
};
use convoy_core::{ToolCall, ToolHandler, ToolResult, WireMessage};
use std::sync::Mutex;

/// One scripted reply.
#[derive(Clone)]
pub enum Reply {
    /// A whole turn; streamed requests get it replayed as events.
    Turn(Turn),
    /// Raw stream events, for fragment and error-ordering tests.
    Events(Vec<Result<StreamEvent, ProviderError>>),
    /// Fail the request itself.
    Fail(ProviderError),
}

/// A mock provider that returns a sequence of scripted replies.
///
/// Each call to `complete` or `stream` consumes the next reply.
/// Panics if more calls are made than replies provided.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers once with plain text.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![Reply::Turn(text_turn(text))])
    }

    /// A provider that requests `calls` once, then answers with `answer`.
    pub fn tool_then_answer(calls: Vec<ToolCall>, answer: &str) -> Self {
        Self::new(vec![
            Reply::Turn(tool_turn("", calls)),
            Reply::Turn(text_turn(answer)),
        ])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: CompletionRequest) -> Reply {
        let mut requests = self.requests.lock().unwrap();
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            panic!(
                "ScriptedProvider: no more replies (call #{})",
                requests.len() + 1
            );
        }
        requests.push(request);
        replies.remove(0)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        match self.next_reply(request) {
            Reply::Turn(turn) => Ok(CompletionResponse {
                turn,
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                model: "mock-model".into(),
            }),
            Reply::Fail(e) => Err(e),
            Reply::Events(_) => panic!("ScriptedProvider: event script used for a buffered call"),
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<EventReceiver, ProviderError> {
        let events = match self.next_reply(request) {
            Reply::Turn(turn) => replay_turn(turn).into_iter().map(Ok).collect(),
            Reply::Events(events) => events,
            Reply::Fail(e) => return Err(e),
        };
        let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.send(event).await;
        }
        Ok(rx)
    }
}

pub fn text_turn(text: &str) -> Turn {
    Turn::Text { text: text.into() }
}

pub fn tool_turn(text: &str, calls: Vec<ToolCall>) -> Turn {
    Turn::ToolUse {
        text: text.into(),
        calls,
    }
}

/// Helper to create a tool call with JSON arguments.
pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, serde_json::to_string(&args).unwrap())
}

/// A tool handler that records every call and answers by tool name.
///
/// A tool named `"fail"` returns an execution error; every other tool
/// answers `"<name> ok"`.
#[derive(Default)]
pub struct RecordingToolHandler {
    seen: Mutex<Vec<(ToolCall, usize)>>,
}

impl RecordingToolHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls handled so far, each with the number of wire messages visible to it.
    pub fn seen(&self) -> Vec<(ToolCall, usize)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolHandler for RecordingToolHandler {
    async fn handle(
        &self,
        call: &ToolCall,
        messages: &[WireMessage],
    ) -> Result<ToolResult, ToolError> {
        self.seen
            .lock()
            .unwrap()
            .push((call.clone(), messages.len()));
        if call.name == "fail" {
            return Err(ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason: "boom".into(),
            });
        }
        Ok(ToolResult::new(&call.id, format!("{} ok", call.name)))
    }
}
