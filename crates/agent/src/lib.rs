//! The chat agent engine: the heart of Convoy.
//!
//! A request flows through four pieces:
//!
//! 1. **Compose** the system prompt from a template, its variables and any
//!    retrieved context ([`prompt`])
//! 2. **Assemble** the wire messages: system, history, user input ([`assembler`])
//! 3. **Run** the tool-recursion loop against the provider, executing any
//!    requested tools and feeding results back ([`controller`])
//! 4. **Return** the answer as a buffered message or a text stream ([`agent`])
//!
//! Streamed tool calls are reassembled from fragments by the
//! [`accumulator`] before they are executed.

pub mod accumulator;
pub mod agent;
pub mod assembler;
pub mod controller;
pub mod prompt;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use accumulator::ToolCallAccumulator;
pub use agent::{
    AgentOutput, AgentResponse, ChatAgent, ChatAgentBuilder, ChatAgentOptions, DEFAULT_MAX_TOKENS,
    JSON_MODE_MODELS,
};
pub use controller::{
    DEFAULT_TOOL_MAX_RECURSIONS, RecursionPhase, RecursionState, TextStream,
    ToolRecursionController,
};
pub use prompt::{DEFAULT_SYSTEM_TEMPLATE, compose, with_context};
