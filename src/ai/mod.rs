//! Completion client abstraction and response validation.
//!
//! ## Modules
//!
//! - `client`: the `CompletionClient` trait plus the Gemini implementation
//! - `validation`: boundary validation/defaulting of loosely-typed responses

pub mod client;
pub mod validation;

pub use client::{ClientConfig, CompletionClient, GeminiClient, SharedClient};
