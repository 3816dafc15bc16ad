//! # Convoy Core
//!
//! Domain types, traits, and error definitions for the Convoy agent engine.
//! This crate has **no transport dependencies**: it defines the domain model
//! that the provider, agent and CLI crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`Provider`]: the remote completion endpoint (buffered + streaming)
//! - [`ToolHandler`]: executes tool calls requested by the model
//! - [`Retriever`]: returns ranked context text for a query
//!
//! Implementations live in their respective crates or in the caller's code,
//! which keeps the agent loop testable with scripted mocks.

pub mod agent;
pub mod error;
pub mod message;
pub mod provider;
pub mod retriever;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{InferenceConfig, RequestMetadata, SystemPromptTemplate, TemplateValue};
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{ContentBlock, Message, Role, WireMessage};
pub use provider::{
    CompletionRequest, CompletionResponse, Provider, ResponseFormat, StopReason, StreamEvent,
    ToolDefinition, Turn, Usage,
};
pub use retriever::Retriever;
pub use tool::{Tool, ToolCall, ToolCallFragment, ToolHandler, ToolRegistry, ToolResult};
