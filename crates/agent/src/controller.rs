//! The tool-recursion loop.
//!
//! One request runs as a small state machine:
//!
//! 1. **AwaitingModel**: send the wire messages to the provider
//! 2. **ExecutingTools**: if the model asked for tools, run them in order and
//!    append their results
//! 3. Loop back to step 1 until the model answers with text, or the
//!    recursion budget runs out
//!
//! Buffered requests return the final text. Streaming requests forward text
//! deltas as they arrive and splice every follow-up round into the same
//! stream.

use std::sync::Arc;

use convoy_core::{
    CompletionRequest, Error, InferenceConfig, Provider, ResponseFormat, Result, StopReason,
    StreamEvent, ToolCall, ToolDefinition, ToolHandler, ToolResult, Turn, WireMessage,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::accumulator::ToolCallAccumulator;
use crate::assembler;

/// Tool rounds allowed per request unless configured otherwise.
pub const DEFAULT_TOOL_MAX_RECURSIONS: u32 = 5;

/// A stream of answer text, ending with an `Err` item if the request failed.
pub type TextStream = ReceiverStream<Result<String>>;

/// Where a request is in the recursion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecursionPhase {
    AwaitingModel,
    ExecutingTools,
    Done,
    BudgetExhausted,
}

/// Per-request loop state. Owned by exactly one control path.
#[derive(Debug, Clone)]
pub struct RecursionState {
    /// Tool rounds still allowed
    pub remaining: u32,

    /// Wire messages so far, system message first
    pub messages: Vec<WireMessage>,
}

impl RecursionState {
    pub fn new(messages: Vec<WireMessage>, budget: u32) -> Self {
        Self {
            remaining: budget,
            messages,
        }
    }
}

/// Drives completions and tool execution for one agent.
///
/// Cheap to clone: shared collaborators are behind `Arc`.
#[derive(Clone)]
pub struct ToolRecursionController {
    provider: Arc<dyn Provider>,
    tool_handler: Option<Arc<dyn ToolHandler>>,
    model: String,
    inference: InferenceConfig,
    response_format: ResponseFormat,
    tools: Vec<ToolDefinition>,
}

impl ToolRecursionController {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            tool_handler: None,
            model: model.into(),
            inference: InferenceConfig::default(),
            response_format: ResponseFormat::Text,
            tools: Vec::new(),
        }
    }

    pub fn with_tool_handler(mut self, handler: Option<Arc<dyn ToolHandler>>) -> Self {
        self.tool_handler = handler;
        self
    }

    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Tool definitions advertised to the model on every round.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    fn request(&self, messages: &[WireMessage]) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.inference.max_tokens,
            temperature: self.inference.temperature,
            top_p: self.inference.top_p,
            stop: self.inference.stop_sequences.clone(),
            response_format: self.response_format,
            tools: self.tools.clone(),
        }
    }

    fn require_handler(&self) -> Result<&Arc<dyn ToolHandler>> {
        self.tool_handler
            .as_ref()
            .ok_or_else(|| Error::config("model requested tool use but no tool handler is configured"))
    }

    /// Run one request to completion and return the final answer text.
    ///
    /// When the budget runs out the text of the last model turn is returned,
    /// which may be empty.
    pub async fn run(&self, mut state: RecursionState) -> Result<String> {
        let mut phase = RecursionPhase::AwaitingModel;
        let mut text = String::new();
        let mut calls = Vec::new();
        let mut round = 0u32;

        loop {
            match phase {
                RecursionPhase::AwaitingModel => {
                    round += 1;
                    debug!(model = %self.model, round, messages = state.messages.len(), "Requesting completion");
                    let response = self.provider.complete(self.request(&state.messages)).await?;

                    if let Some(usage) = &response.usage {
                        debug!(
                            round,
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            "Completion received"
                        );
                    }

                    match response.turn {
                        Turn::Text { text: answer } => {
                            text = answer;
                            phase = RecursionPhase::Done;
                        }
                        Turn::ToolUse {
                            text: announced,
                            calls: requested,
                        } => {
                            self.require_handler()?;
                            text = announced;
                            calls = ToolCallAccumulator::whole(requested);
                            phase = RecursionPhase::ExecutingTools;
                        }
                    }
                }
                RecursionPhase::ExecutingTools => {
                    phase = self
                        .execute_round(&mut state, &text, std::mem::take(&mut calls))
                        .await?;
                }
                RecursionPhase::Done => {
                    info!(model = %self.model, rounds = round, "Request complete");
                    return Ok(text);
                }
                RecursionPhase::BudgetExhausted => {
                    warn!(model = %self.model, rounds = round, "Tool recursion budget exhausted");
                    return Ok(text);
                }
            }
        }
    }

    /// Run one request, streaming answer text.
    ///
    /// The loop runs on a spawned task. Dropping the returned stream lets the
    /// current round's tools finish but starts no further round.
    pub fn run_stream(&self, state: RecursionState) -> TextStream {
        let (tx, rx) = mpsc::channel(64);
        let controller = self.clone();

        tokio::spawn(async move {
            if let Err(e) = controller.drive_stream(state, &tx).await {
                warn!(error = %e, "Streaming request failed");
                let _ = tx.send(Err(e)).await;
            }
        });

        ReceiverStream::new(rx)
    }

    async fn drive_stream(
        &self,
        mut state: RecursionState,
        tx: &mpsc::Sender<Result<String>>,
    ) -> Result<()> {
        let mut phase = RecursionPhase::AwaitingModel;
        let mut text = String::new();
        let mut calls = Vec::new();
        let mut accumulator = ToolCallAccumulator::new();
        let mut round = 0u32;

        loop {
            match phase {
                RecursionPhase::AwaitingModel => {
                    if tx.is_closed() {
                        debug!(round, "Stream consumer gone, not starting another round");
                        return Ok(());
                    }
                    round += 1;
                    debug!(model = %self.model, round, "Requesting streaming completion");

                    let mut events = self.provider.stream(self.request(&state.messages)).await?;
                    text.clear();
                    let mut reason = None;

                    while let Some(event) = events.recv().await {
                        match event? {
                            StreamEvent::TextDelta { text: delta } => {
                                text.push_str(&delta);
                                // A closed receiver only stops new rounds; keep
                                // draining so tool calls still assemble.
                                let _ = tx.send(Ok(delta)).await;
                            }
                            StreamEvent::ToolCallFragment { fragment } => {
                                accumulator.push(fragment);
                            }
                            StreamEvent::TurnComplete { reason: r } => {
                                reason = Some(r);
                                break;
                            }
                        }
                    }

                    match reason.unwrap_or(StopReason::Stop) {
                        StopReason::Stop => {
                            if reason.is_none() {
                                debug!(round, "Stream ended without a completion marker");
                            }
                            phase = RecursionPhase::Done;
                        }
                        StopReason::ToolUse => {
                            calls = accumulator.finalize();
                            if calls.is_empty() {
                                warn!(round, "Tool use signalled but no tool calls assembled");
                                phase = RecursionPhase::Done;
                            } else {
                                self.require_handler()?;
                                phase = RecursionPhase::ExecutingTools;
                            }
                        }
                    }
                }
                RecursionPhase::ExecutingTools => {
                    phase = self
                        .execute_round(&mut state, &text, std::mem::take(&mut calls))
                        .await?;
                }
                RecursionPhase::Done => {
                    info!(model = %self.model, rounds = round, "Streaming request complete");
                    return Ok(());
                }
                RecursionPhase::BudgetExhausted => {
                    warn!(model = %self.model, rounds = round, "Tool recursion budget exhausted");
                    return Ok(());
                }
            }
        }
    }

    /// Execute one round of tool calls and decide the next phase.
    async fn execute_round(
        &self,
        state: &mut RecursionState,
        text: &str,
        calls: Vec<ToolCall>,
    ) -> Result<RecursionPhase> {
        let handler = self.require_handler()?;
        assembler::append_assistant(&mut state.messages, text, calls.clone());

        for call in &calls {
            debug!(tool = %call.name, call_id = %call.id, "Executing tool call");
            let result = match handler.handle(call, &state.messages).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool execution failed");
                    ToolResult::new(&call.id, format!("Error: {e}"))
                }
            };
            assembler::append_tool(&mut state.messages, result);
        }

        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining == 0 {
            Ok(RecursionPhase::BudgetExhausted)
        } else {
            Ok(RecursionPhase::AwaitingModel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use convoy_core::error::ProviderError;
    use convoy_core::{Role, ToolCallFragment};
    use futures::StreamExt;

    fn state(budget: u32) -> RecursionState {
        RecursionState::new(
            vec![WireMessage::system("sys"), WireMessage::user("Hello")],
            budget,
        )
    }

    fn controller(
        provider: Arc<ScriptedProvider>,
        handler: Option<Arc<RecordingToolHandler>>,
    ) -> ToolRecursionController {
        ToolRecursionController::new(provider, "mock-model")
            .with_tool_handler(handler.map(|h| h as Arc<dyn ToolHandler>))
    }

    async fn collect(stream: TextStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn text_turn_finishes_in_one_round() {
        let provider = Arc::new(ScriptedProvider::single_text("Hi there"));
        let text = controller(provider.clone(), None).run(state(5)).await.unwrap();
        assert_eq!(text, "Hi there");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn request_carries_inference_settings() {
        let provider = Arc::new(ScriptedProvider::single_text("ok"));
        let inference = InferenceConfig {
            max_tokens: Some(1000),
            temperature: Some(0.1),
            top_p: None,
            stop_sequences: vec!["END".into()],
        };
        controller(provider.clone(), None)
            .with_inference(inference)
            .with_response_format(ResponseFormat::JsonObject)
            .run(state(5))
            .await
            .unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.model, "mock-model");
        assert_eq!(request.max_tokens, Some(1000));
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.stop, vec!["END".to_string()]);
        assert_eq!(request.response_format, ResponseFormat::JsonObject);
        assert_eq!(request.messages.len(), 2);
    }

    #[tokio::test]
    async fn tool_round_feeds_results_back() {
        let call = make_tool_call("call_1", "weather", serde_json::json!({"city": "Oslo"}));
        let provider = Arc::new(ScriptedProvider::tool_then_answer(
            vec![call.clone()],
            "It is 12C in Oslo.",
        ));
        let handler = Arc::new(RecordingToolHandler::new());

        let text = controller(provider.clone(), Some(handler.clone()))
            .run(state(5))
            .await
            .unwrap();
        assert_eq!(text, "It is 12C in Oslo.");

        // The handler saw system, user and the assistant announcement.
        assert_eq!(handler.seen(), vec![(call.clone(), 3)]);

        let second = &provider.requests()[1];
        assert_eq!(second.messages.len(), 4);
        assert_eq!(second.messages[2].role, Role::Assistant);
        assert_eq!(second.messages[2].tool_calls, vec![call]);
        assert_eq!(second.messages[3], WireMessage::tool("call_1", "weather ok"));
    }

    #[tokio::test]
    async fn tools_run_in_order_within_a_round() {
        let calls = vec![
            make_tool_call("c1", "first", serde_json::json!({})),
            make_tool_call("c2", "second", serde_json::json!({})),
        ];
        let provider = Arc::new(ScriptedProvider::tool_then_answer(calls, "done"));
        let handler = Arc::new(RecordingToolHandler::new());

        controller(provider.clone(), Some(handler.clone()))
            .run(state(5))
            .await
            .unwrap();

        let seen = handler.seen();
        assert_eq!(seen[0].0.id, "c1");
        assert_eq!(seen[1].0.id, "c2");
        // The second call sees the first call's result.
        assert_eq!(seen[1].1, seen[0].1 + 1);
    }

    #[tokio::test]
    async fn failed_tool_becomes_error_result() {
        let call = make_tool_call("c1", "fail", serde_json::json!({}));
        let provider = Arc::new(ScriptedProvider::tool_then_answer(vec![call], "recovered"));
        let handler = Arc::new(RecordingToolHandler::new());

        let text = controller(provider.clone(), Some(handler))
            .run(state(5))
            .await
            .unwrap();
        assert_eq!(text, "recovered");

        let tool_msg = &provider.requests()[1].messages[3];
        assert_eq!(tool_msg.role, Role::Tool);
        assert!(tool_msg.content.starts_with("Error: "));
        assert!(tool_msg.content.contains("boom"));
    }

    #[tokio::test]
    async fn budget_of_one_allows_exactly_one_round() {
        let call = make_tool_call("c1", "lookup", serde_json::json!({}));
        let provider = Arc::new(ScriptedProvider::new(vec![Reply::Turn(tool_turn(
            "Let me check.",
            vec![call],
        ))]));
        let handler = Arc::new(RecordingToolHandler::new());

        let text = controller(provider.clone(), Some(handler.clone()))
            .run(state(1))
            .await
            .unwrap();
        assert_eq!(text, "Let me check.");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(handler.seen().len(), 1);
    }

    #[tokio::test]
    async fn budget_counts_rounds_not_calls() {
        let round = |id: &str| {
            Reply::Turn(tool_turn(
                "",
                vec![
                    make_tool_call(&format!("{id}a"), "lookup", serde_json::json!({})),
                    make_tool_call(&format!("{id}b"), "lookup", serde_json::json!({})),
                ],
            ))
        };
        let provider = Arc::new(ScriptedProvider::new(vec![round("1"), round("2")]));
        let handler = Arc::new(RecordingToolHandler::new());

        let text = controller(provider.clone(), Some(handler.clone()))
            .run(state(2))
            .await
            .unwrap();
        assert_eq!(text, "");
        assert_eq!(provider.call_count(), 2);
        assert_eq!(handler.seen().len(), 4);
    }

    #[tokio::test]
    async fn tool_use_without_handler_is_config_error() {
        let call = make_tool_call("c1", "lookup", serde_json::json!({}));
        let provider = Arc::new(ScriptedProvider::new(vec![Reply::Turn(tool_turn(
            "",
            vec![call],
        ))]));

        let err = controller(provider, None).run(state(5)).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn upstream_error_propagates() {
        let provider = Arc::new(ScriptedProvider::new(vec![Reply::Fail(
            ProviderError::Timeout("30s".into()),
        )]));
        let err = controller(provider, None).run(state(5)).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(ProviderError::Timeout(_))));
        assert!(err.is_retryable());
    }

    // --- Streaming ---

    #[tokio::test]
    async fn stream_forwards_deltas_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![Reply::Events(vec![
            Ok(StreamEvent::text("Hel")),
            Ok(StreamEvent::text("lo")),
            Ok(StreamEvent::complete(StopReason::Stop)),
        ])]));

        let items = collect(controller(provider, None).run_stream(state(5))).await;
        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn stream_splices_tool_round() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Reply::Events(vec![
                Ok(StreamEvent::text("Checking. ")),
                Ok(StreamEvent::fragment(ToolCallFragment::open("c1", "weather"))),
                Ok(StreamEvent::fragment(ToolCallFragment::chunk("{\"city\":"))),
                Ok(StreamEvent::fragment(ToolCallFragment::chunk("\"Oslo\"}"))),
                Ok(StreamEvent::complete(StopReason::ToolUse)),
            ]),
            Reply::Events(vec![
                Ok(StreamEvent::text("12C")),
                Ok(StreamEvent::complete(StopReason::Stop)),
            ]),
        ]));
        let handler = Arc::new(RecordingToolHandler::new());

        let items = collect(controller(provider.clone(), Some(handler.clone())).run_stream(state(5))).await;
        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(texts, vec!["Checking. ", "12C"]);

        let seen = handler.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, ToolCall::new("c1", "weather", "{\"city\":\"Oslo\"}"));

        let second = &provider.requests()[1];
        assert_eq!(second.messages[2].content, "Checking. ");
        assert_eq!(second.messages[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn stream_without_completion_marker_is_stop() {
        let provider = Arc::new(ScriptedProvider::new(vec![Reply::Events(vec![Ok(
            StreamEvent::text("partial"),
        )])]));
        let items = collect(controller(provider.clone(), None).run_stream(state(5))).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_deref().unwrap(), "partial");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn stream_tool_use_without_calls_ends() {
        let provider = Arc::new(ScriptedProvider::new(vec![Reply::Events(vec![
            Ok(StreamEvent::fragment(ToolCallFragment::chunk("orphan"))),
            Ok(StreamEvent::complete(StopReason::ToolUse)),
        ])]));
        let handler = Arc::new(RecordingToolHandler::new());
        let items = collect(controller(provider.clone(), Some(handler.clone())).run_stream(state(5))).await;
        assert!(items.is_empty());
        assert!(handler.seen().is_empty());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn stream_upstream_error_is_final_item() {
        let provider = Arc::new(ScriptedProvider::new(vec![Reply::Events(vec![
            Ok(StreamEvent::text("Hel")),
            Err(ProviderError::StreamInterrupted("connection reset".into())),
        ])]));
        let items = collect(controller(provider, None).run_stream(state(5))).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "Hel");
        assert!(matches!(
            items[1],
            Err(Error::Upstream(ProviderError::StreamInterrupted(_)))
        ));
    }

    #[tokio::test]
    async fn stream_request_failure_is_single_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Reply::Fail(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let items = collect(controller(provider, None).run_stream(state(5))).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(Error::Upstream(ProviderError::AuthenticationFailed(_)))
        ));
    }

    #[tokio::test]
    async fn stream_tool_use_without_handler_is_config_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Reply::Turn(tool_turn(
            "",
            vec![make_tool_call("c1", "lookup", serde_json::json!({}))],
        ))]));
        let items = collect(controller(provider, None).run_stream(state(5))).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn stream_budget_exhaustion_ends_cleanly() {
        let provider = Arc::new(ScriptedProvider::new(vec![Reply::Turn(tool_turn(
            "Working on it",
            vec![make_tool_call("c1", "lookup", serde_json::json!({}))],
        ))]));
        let handler = Arc::new(RecordingToolHandler::new());
        let items = collect(controller(provider.clone(), Some(handler.clone())).run_stream(state(1))).await;
        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(texts, vec!["Working on it"]);
        assert_eq!(handler.seen().len(), 1);
        assert_eq!(provider.call_count(), 1);
    }

    /// Blocks every call until released, so a test can drop the stream mid-round.
    struct GatedHandler {
        gate: tokio::sync::Notify,
        finished: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ToolHandler for GatedHandler {
        async fn handle(
            &self,
            call: &ToolCall,
            _messages: &[WireMessage],
        ) -> std::result::Result<ToolResult, convoy_core::ToolError> {
            self.gate.notified().await;
            self.finished
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(ToolResult::new(&call.id, "late result"))
        }
    }

    #[tokio::test]
    async fn dropped_stream_finishes_round_but_starts_no_more() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Reply::Turn(tool_turn(
                "Working",
                vec![make_tool_call("c1", "lookup", serde_json::json!({}))],
            )),
            Reply::Turn(text_turn("never requested")),
        ]));
        let handler = Arc::new(GatedHandler {
            gate: tokio::sync::Notify::new(),
            finished: std::sync::atomic::AtomicUsize::new(0),
        });

        let mut stream = ToolRecursionController::new(provider.clone(), "mock-model")
            .with_tool_handler(Some(handler.clone()))
            .run_stream(state(5));
        assert_eq!(stream.next().await.unwrap().unwrap(), "Working");
        drop(stream);
        handler.gate.notify_one();

        for _ in 0..100 {
            if handler.finished.load(std::sync::atomic::Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(handler.finished.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(provider.call_count(), 1);
    }
}
