//! StudyWeave - Resumable AI Study-Guide Extraction Pipeline
//!
//! Turns a large block of source text into a structured study document:
//! deterministic text segmentation, outline-to-chunk planning, a persisted
//! state machine driving outlining→chunking→stitching with per-chunk retry
//! and content-addressed resume, a coverage verifier, and a numeric-conflict
//! detector.
//!
//! ## Core Features
//!
//! - **Snapshot/Resume**: a full immutable snapshot is persisted after every
//!   transition; completed chunks are never re-run
//! - **Per-Chunk Retry**: one chunk's failure never blocks its siblings or
//!   discards their results
//! - **Content Addressing**: resume is refused when the input text no longer
//!   matches the digest frozen at run start
//! - **Coverage & Conflicts**: per-section coverage reporting and
//!   `(label, type, unit)` clustering of disagreeing numeric mentions
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use studyweave::{ExtractionPipeline, GeminiClient, ClientConfig, SqliteSessionStore, Session};
//!
//! let client = Arc::new(GeminiClient::new(ClientConfig::default())?);
//! let store = Arc::new(SqliteSessionStore::open("studyweave.db")?);
//! let pipeline = ExtractionPipeline::new(client, store);
//!
//! let mut session = Session::new("Renal physiology", source_text);
//! let outcome = pipeline.generate(&mut session).await?;
//! println!("{}", outcome.markdown);
//! ```
//!
//! ## Modules
//!
//! - [`pipeline`]: segmentation, planning, the state machine, coverage,
//!   conflicts
//! - [`ai`]: completion client abstraction and response validation
//! - [`storage`]: session persistence (SQLite and in-memory)
//! - [`config`]: layered configuration loading
//!
//! This crate exposes no wire format or CLI of its own; it is a library
//! consumed by a presentation layer.

pub mod ai;
pub mod config;
pub mod constants;
pub mod pipeline;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader, SegmenterSettings, StorageSettings};

// Error Types
pub use types::error::{Result, ResultExt, StudyError};

// Domain
pub use types::{
    ChunkPlan, ChunkPlanEntry, ChunkRunState, ChunkRunStatus, ExtractedChunkData, GlossaryEntry,
    OutlinePriority, OutlineSection, RawInputDigest, Session, StitchedOutput, StudySettings,
};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{
    ChunkPlanner, ConflictClusterer, ConflictResolutionItem, CoverageAnalyzer, ExtractionPipeline,
    NumberCluster, PipelineEvent, PipelineOutcome, PipelinePhase, PipelineState, TextSegmenter,
};

// =============================================================================
// Collaborator Re-exports
// =============================================================================

pub use ai::{ClientConfig, CompletionClient, GeminiClient, SharedClient};
pub use storage::{MemoryStore, SessionStore, SharedStore, SqliteSessionStore};
