//! Unified Error Type System
//!
//! Centralized error types for the entire crate.
//!
//! ## Error Taxonomy
//!
//! - **Planning**: outline/plan build failed before any chunk work exists
//! - **ChunkExecution**: one chunk failed; siblings are still attempted
//! - **Synthesis**: the final stitch failed; all chunk data stays intact
//! - **FingerprintMismatch**: resume attempted against different input
//! - **Persistence**: a snapshot write failed; in-memory state may be ahead
//! - **Snapshot**: a persisted snapshot failed validation at load
//!
//! ## Design Principles
//!
//! - Single unified error type (StudyError) for the entire crate
//! - Structured variants with context for better debugging
//! - No panic/unwrap - all errors are recoverable or surfaced

use thiserror::Error;

use super::domain::RawInputDigest;

#[derive(Debug, Error)]
pub enum StudyError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    /// Outline or chunk-plan construction failed. Nothing to resume.
    #[error("Planning failed: {0}")]
    Planning(String),

    /// A single chunk attempt failed. Recorded on that chunk; siblings still run.
    #[error("Chunk {chunk_id} failed: {message}")]
    ChunkExecution { chunk_id: u32, message: String },

    /// The stitch call failed after all chunks succeeded.
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// Resume attempted against input that no longer matches the saved run.
    #[error(
        "Input changed since this run started: expected {expected_len} chars \
         ({expected_hash}), got {actual_len} chars ({actual_hash})"
    )]
    FingerprintMismatch {
        expected_hash: String,
        expected_len: usize,
        actual_hash: String,
        actual_len: usize,
    },

    /// A snapshot write failed. The in-memory state may be ahead of storage.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// A persisted snapshot failed version/checksum/invariant validation.
    #[error("Snapshot invalid: {0}")]
    Snapshot(String),

    // -------------------------------------------------------------------------
    // Collaborator / Domain Errors
    // -------------------------------------------------------------------------
    #[error("Completion API error: {0}")]
    LlmApi(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl StudyError {
    /// Create a fingerprint-mismatch error from the two digests.
    pub fn fingerprint_mismatch(expected: &RawInputDigest, actual: &RawInputDigest) -> Self {
        Self::FingerprintMismatch {
            expected_hash: expected.hash.clone(),
            expected_len: expected.length,
            actual_hash: actual.hash.clone(),
            actual_len: actual.length,
        }
    }

    /// Check if retry/continue can make progress after this error.
    ///
    /// Chunk and synthesis failures leave a resumable snapshot behind;
    /// planning and fingerprint failures do not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ChunkExecution { .. } | Self::Synthesis(_) | Self::LlmApi(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StudyError>;

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error, converting it into a persistence error.
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| StudyError::Persistence(format!("{}: {}", context.into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
