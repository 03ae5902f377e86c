//! Completion Client Abstraction
//!
//! Defines the `CompletionClient` trait the pipeline drives. The core only
//! constrains the *shape* of successful results; transport, prompt content,
//! and retry policy belong to the implementation.
//!
//! ## Modules
//!
//! - `gemini`: Gemini API implementation with schema-constrained JSON output
//! - `schemas`: response schemas sent alongside each request

mod gemini;
mod schemas;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::constants::client as client_constants;
use crate::pipeline::conflict::{ConflictEvidence, ConflictResolutionItem};
use crate::types::{ExtractedChunkData, OutlineSection, Result, StitchedOutput, StudySettings};

/// Shared completion client for the pipeline runner.
pub type SharedClient = Arc<dyn CompletionClient>;

/// External generative collaborator.
///
/// Every call is fallible with a human-readable message. Implementations
/// must not rely on call ordering: the runner may skip, repeat, or resume
/// any of these calls across process restarts.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Produce the top-level outline of the source text.
    async fn generate_outline(
        &self,
        text: &str,
        goal_title: Option<&str>,
        tags: &[String],
    ) -> Result<Vec<OutlineSection>>;

    /// Extract structured facts from one chunk of text.
    ///
    /// `chunk_index`/`total_chunks` are informational; positions and
    /// coverage ids are tagged by the runner, not trusted from the response.
    async fn process_chunk(
        &self,
        chunk_text: &str,
        chunk_index: usize,
        total_chunks: usize,
        settings: &StudySettings,
        outline_focus: &[OutlineSection],
    ) -> Result<ExtractedChunkData>;

    /// Merge all chunk extractions and the outline into one document.
    async fn stitch_final_output(
        &self,
        outline: &[OutlineSection],
        chunk_results: &[ExtractedChunkData],
        settings: &StudySettings,
        sample: &str,
    ) -> Result<StitchedOutput>;

    /// Arbitrate conflicting numeric evidence. Advisory: results are
    /// surfaced alongside the evidence, never substituted into it.
    async fn resolve_conflict_values(
        &self,
        conflicts: &[ConflictEvidence],
    ) -> Result<Vec<ConflictResolutionItem>>;
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for completion client implementations
///
/// API keys are never serialized to output and are redacted in debug
/// output; implementations convert the key to a SecretString internally.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Model name (provider-specific)
    pub model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Temperature for generation (0.0 = deterministic)
    pub temperature: f32,
    /// API key - never serialized to output
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// API base URL (for custom endpoints)
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            model: None,
            timeout_secs: client_constants::DEFAULT_TIMEOUT_SECS,
            temperature: 0.2,
            api_key: None,
            api_base: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ClientConfig {
            api_key: Some("super-secret".into()),
            ..Default::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn test_api_key_never_serialized() {
        let config = ClientConfig {
            api_key: Some("super-secret".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("super-secret"));
    }
}
