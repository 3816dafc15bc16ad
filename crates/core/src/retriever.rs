//! Retriever trait: the boundary to a retrieval subsystem.
//!
//! The agent only needs the combined context text for a query; ranking,
//! chunking and storage are the retriever's business.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve documents relevant to `query` and combine them into one text block.
    async fn retrieve_and_combine_results(&self, query: &str) -> Result<String>;
}
