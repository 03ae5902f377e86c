//! Session Types
//!
//! A `Session` carries everything a presentation layer needs to persist one
//! study-guide run: the raw input, user settings, the rendered output, and
//! the embedded pipeline snapshot used for resume.

use serde::{Deserialize, Serialize};

use super::domain::RawInputDigest;
use crate::pipeline::state::PipelineState;

// =============================================================================
// Settings
// =============================================================================

/// Study load presented to the learner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputLength {
    Light,
    #[default]
    Standard,
    Deep,
}

/// How liberally the synthesized document applies highlight markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HighlightDensity {
    Low,
    #[default]
    Medium,
    High,
}

/// User-facing generation settings passed through to the completion client.
///
/// `include_extra = false` is strict mode: the model must not add content
/// beyond the source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySettings {
    pub output_length: OutputLength,
    pub include_extra: bool,
    pub include_translation: bool,
    pub highlight_density: HighlightDensity,
    pub auto_include_glossary: bool,
}

impl Default for StudySettings {
    fn default() -> Self {
        Self {
            output_length: OutputLength::Standard,
            include_extra: false,
            include_translation: false,
            highlight_density: HighlightDensity::Medium,
            auto_include_glossary: true,
        }
    }
}

// =============================================================================
// Stitched Output
// =============================================================================

/// A glossary entry surfaced in the final document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub term: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub english_term: Option<String>,
}

/// Result of the final synthesis pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StitchedOutput {
    pub markdown: String,
    #[serde(default)]
    pub glossary_entries: Vec<GlossaryEntry>,
}

// =============================================================================
// Session
// =============================================================================

/// One persisted study session.
///
/// The pipeline snapshot is embedded as plain serializable data; the session
/// store never sees functions or live references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// RFC 3339 creation timestamp
    pub created_at: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub input_text: String,
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub output_markdown: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StitchedOutput>,
    pub settings: StudySettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<RawInputDigest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineState>,
}

impl Session {
    /// Create a fresh session around an input text.
    pub fn new(title: impl Into<String>, input_text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            title: title.into(),
            tags: Vec::new(),
            input_text: input_text.into(),
            model_used: String::new(),
            output_markdown: String::new(),
            output: None,
            settings: StudySettings::default(),
            input_fingerprint: None,
            pipeline: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_settings(mut self, settings: StudySettings) -> Self {
        self.settings = settings;
        self
    }

    /// The latest pipeline snapshot, if a run was ever started.
    pub fn pipeline(&self) -> Option<&PipelineState> {
        self.pipeline.as_ref()
    }

    /// Whether this session has an unfinished run worth resuming.
    pub fn is_resumable(&self) -> bool {
        self.pipeline
            .as_ref()
            .is_some_and(|p| p.status.is_resumable())
    }
}

// =============================================================================
// Tests
// =============================================================================
