//! Core type system: domain data model, sessions, and errors.

pub mod domain;
pub mod error;
pub mod session;

pub use domain::{
    ChunkPlan, ChunkPlanEntry, ChunkRunState, ChunkRunStatus, ExtractedChunkData, OutlinePriority,
    OutlineSection, RawInputDigest, RecallQuestion, SectionCoverage,
};
pub use error::{Result, ResultExt, StudyError};
pub use session::{
    GlossaryEntry, HighlightDensity, OutputLength, Session, StitchedOutput, StudySettings,
};
