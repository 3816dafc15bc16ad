//! Remote completion clients for Convoy.
//!
//! All providers implement the `convoy_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
