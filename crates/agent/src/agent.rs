//! The chat agent: one configured persona over one provider.
//!
//! A [`ChatAgent`] owns its options and shared collaborators. Each call to
//! [`ChatAgent::process_request`] composes the system prompt, assembles the
//! wire messages and hands them to a [`ToolRecursionController`].

use std::collections::HashMap;
use std::sync::Arc;

use convoy_core::{
    Error, InferenceConfig, Message, Provider, RequestMetadata, ResponseFormat, Result, Retriever,
    SystemPromptTemplate, TemplateValue, ToolDefinition, ToolHandler,
};
use tracing::{debug, info};

use crate::assembler;
use crate::controller::{
    DEFAULT_TOOL_MAX_RECURSIONS, RecursionState, TextStream, ToolRecursionController,
};
use crate::prompt;

/// Models that accept the JSON-object response format.
pub const JSON_MODE_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-4-turbo-preview",
    "gpt-4-1106-preview",
    "gpt-4-0125-preview",
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-1106",
    "gpt-3.5-turbo-0125",
];

/// Default completion length when the caller sets none.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Everything that configures a chat agent.
#[derive(Debug, Clone)]
pub struct ChatAgentOptions {
    pub name: String,
    pub description: String,
    pub model: String,
    pub streaming: bool,
    pub inference: InferenceConfig,
    pub system_prompt: Option<SystemPromptTemplate>,
    pub format_response_as_json: bool,
    pub tools: Vec<ToolDefinition>,
    pub tool_max_recursions: u32,
}

impl ChatAgentOptions {
    /// Options with defaults for everything but the name, description and model.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            model: model.into(),
            streaming: false,
            inference: InferenceConfig {
                max_tokens: Some(DEFAULT_MAX_TOKENS),
                ..InferenceConfig::default()
            },
            system_prompt: None,
            format_response_as_json: false,
            tools: Vec::new(),
            tool_max_recursions: DEFAULT_TOOL_MAX_RECURSIONS,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("agent name must not be empty"));
        }

        if self.format_response_as_json && !JSON_MODE_MODELS.contains(&self.model.as_str()) {
            return Err(Error::config(format!(
                "model '{}' does not support JSON response format",
                self.model
            )));
        }

        if self.tool_max_recursions == 0 {
            return Err(Error::config("tool_max_recursions must be at least 1"));
        }

        Ok(())
    }
}

/// What a request produced.
pub enum AgentOutput {
    /// The whole answer, buffered
    Message(Message),
    /// The answer as it is generated
    Stream(TextStream),
}

impl std::fmt::Debug for AgentOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// The output of one request plus its metadata.
#[derive(Debug)]
pub struct AgentResponse {
    pub metadata: RequestMetadata,
    pub output: AgentOutput,
}

/// Builder for [`ChatAgent`].
pub struct ChatAgentBuilder {
    options: ChatAgentOptions,
    provider: Arc<dyn Provider>,
    tool_handler: Option<Arc<dyn ToolHandler>>,
    retriever: Option<Arc<dyn Retriever>>,
}

impl ChatAgentBuilder {
    /// Executes the tool calls the model requests.
    pub fn tool_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.tool_handler = Some(handler);
        self
    }

    /// Supplies context for each request, queried with the user input.
    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Validate the options and build the agent. No network call is made.
    pub fn build(self) -> Result<ChatAgent> {
        self.options.validate()?;

        let id = derive_id(&self.options.name);
        let system_prompt = self.options.system_prompt.clone().unwrap_or_else(|| {
            SystemPromptTemplate {
                template: prompt::DEFAULT_SYSTEM_TEMPLATE.to_string(),
                variables: HashMap::new(),
            }
        });

        let response_format = if self.options.format_response_as_json {
            ResponseFormat::JsonObject
        } else {
            ResponseFormat::Text
        };

        let controller = ToolRecursionController::new(self.provider, self.options.model.clone())
            .with_tool_handler(self.tool_handler)
            .with_inference(self.options.inference.clone())
            .with_response_format(response_format)
            .with_tools(self.options.tools.clone());

        info!(agent = %id, model = %self.options.model, streaming = self.options.streaming, "Chat agent ready");

        Ok(ChatAgent {
            id,
            options: self.options,
            system_prompt,
            controller,
            retriever: self.retriever,
        })
    }
}

/// A conversational agent over a remote completion endpoint.
pub struct ChatAgent {
    id: String,
    options: ChatAgentOptions,
    system_prompt: SystemPromptTemplate,
    controller: ToolRecursionController,
    retriever: Option<Arc<dyn Retriever>>,
}

impl ChatAgent {
    pub fn builder(options: ChatAgentOptions, provider: Arc<dyn Provider>) -> ChatAgentBuilder {
        ChatAgentBuilder {
            options,
            provider,
            tool_handler: None,
            retriever: None,
        }
    }

    /// Identifier derived from the agent name.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &ChatAgentOptions {
        &self.options
    }

    /// Replace the system-prompt template and its variables.
    pub fn set_system_prompt(
        &mut self,
        template: impl Into<String>,
        variables: HashMap<String, TemplateValue>,
    ) {
        self.system_prompt = SystemPromptTemplate {
            template: template.into(),
            variables,
        };
    }

    /// The system prompt as it would be sent, before any retrieved context.
    pub fn system_prompt(&self) -> String {
        let variables = prompt::agent_variables(
            &self.options.name,
            &self.options.description,
            &self.system_prompt.variables,
        );
        prompt::compose(&self.system_prompt.template, &variables)
    }

    /// Answer one user input in the context of `history`.
    ///
    /// Returns a buffered message or a text stream depending on the agent's
    /// streaming option. In streaming mode, upstream failures after the first
    /// round arrive as the stream's last item.
    pub async fn process_request(
        &self,
        input: &str,
        user_id: &str,
        session_id: &str,
        history: &[Message],
        additional_params: HashMap<String, String>,
    ) -> Result<AgentResponse> {
        let metadata = RequestMetadata {
            agent_id: self.id.clone(),
            agent_name: self.options.name.clone(),
            model_id: self.options.model.clone(),
            user_input: input.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            additional_params,
        };

        let retrieved = match &self.retriever {
            Some(retriever) => {
                let context = retriever.retrieve_and_combine_results(input).await?;
                debug!(agent = %self.id, context_len = context.len(), "Retrieved context");
                Some(context)
            }
            None => None,
        };

        let system_prompt = prompt::with_context(self.system_prompt(), retrieved.as_deref());
        let messages = assembler::to_wire_messages(&system_prompt, history, input);
        let state = RecursionState::new(messages, self.options.tool_max_recursions);

        debug!(
            agent = %self.id,
            user = %user_id,
            session = %session_id,
            history = history.len(),
            "Processing request"
        );

        let output = if self.options.streaming {
            AgentOutput::Stream(self.controller.run_stream(state))
        } else {
            let text = self.controller.run(state).await?;
            AgentOutput::Message(assembler::to_message(text))
        };

        Ok(AgentResponse { metadata, output })
    }
}

/// Lower-case the name, drop everything but alphanumerics, spaces and `-`,
/// then turn spaces into `-`.
fn derive_id(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .map(|c| if c == ' ' { '-' } else { c })
        .collect()
}
