//! Pipeline State Machine (pure transition layer)
//!
//! `PipelineState` is one immutable snapshot of pipeline progress. It is
//! never mutated in place: every transition is `state.apply(event)` -> new
//! snapshot, which keeps resume-from-snapshot safe without locks and makes
//! the whole state machine unit-testable without a live completion client.
//!
//! Derived fields (`processed_chunks`, `chunk_results`, `coverage`) are
//! recomputed on every transition - they are projections of `chunk_states`,
//! never independently mutated.
//!
//! Snapshots carry a schema version and a CRC32 checksum; a persisted
//! snapshot that fails validation is refused at load rather than silently
//! trusted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::coverage::CoverageAnalyzer;
use crate::types::{
    ChunkPlan, ChunkRunState, ChunkRunStatus, ExtractedChunkData, OutlineSection, RawInputDigest,
    Result, SectionCoverage, StudyError,
};

/// Current snapshot schema version
///
/// Increment when making breaking changes to the PipelineState structure.
pub const SNAPSHOT_VERSION: u8 = 1;

// =============================================================================
// Phase
// =============================================================================

/// Pipeline-level phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    #[default]
    Idle,
    Outlining,
    Chunking,
    Stitching,
    Complete,
    Error,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Idle => "idle",
            PipelinePhase::Outlining => "outlining",
            PipelinePhase::Chunking => "chunking",
            PipelinePhase::Stitching => "stitching",
            PipelinePhase::Complete => "complete",
            PipelinePhase::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "outlining" => PipelinePhase::Outlining,
            "chunking" => PipelinePhase::Chunking,
            "stitching" => PipelinePhase::Stitching,
            "complete" => PipelinePhase::Complete,
            "error" => PipelinePhase::Error,
            _ => PipelinePhase::Idle,
        }
    }

    /// A phase with saved progress worth continuing.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            PipelinePhase::Chunking | PipelinePhase::Stitching | PipelinePhase::Error
        )
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Events
// =============================================================================

/// Every transition the pipeline can make, pipeline-level and chunk-level.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A fresh run begins; freezes the input digest for the whole run.
    RunStarted { digest: RawInputDigest },
    /// The outline arrived and the chunk plan was built; initializes every
    /// chunk state to pending with zero attempts.
    OutlineReady {
        outline: Vec<OutlineSection>,
        plan: ChunkPlan,
    },
    /// A chunk attempt starts: attempts += 1, last error cleared.
    ChunkStarted { chunk_id: u32 },
    /// A chunk attempt succeeded; stores the tagged result.
    ChunkCompleted {
        chunk_id: u32,
        result: ExtractedChunkData,
    },
    /// A chunk attempt failed; records the message on that chunk only.
    ChunkFailed { chunk_id: u32, message: String },
    /// All chunks are complete; the stitch call is about to start.
    StitchStarted,
    /// Synthesis succeeded; the run is complete.
    StitchCompleted { markdown: String },
    /// An unrecoverable phase failure; preserves the last good snapshot
    /// contents alongside the error message.
    PipelineFailed { message: String },
}

// =============================================================================
// Snapshot
// =============================================================================

/// One immutable snapshot of pipeline progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Snapshot schema version for forward compatibility
    #[serde(default = "default_snapshot_version")]
    pub version: u8,

    /// CRC32 of the serialized snapshot (excluding this field)
    #[serde(default)]
    pub checksum: u32,

    pub status: PipelinePhase,
    pub total_chunks: usize,
    pub processed_chunks: usize,

    #[serde(default)]
    pub outline: Vec<OutlineSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ChunkPlan>,

    /// Frozen at run start; resume is only valid while the current input's
    /// digest equals it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input_hash: Option<RawInputDigest>,

    #[serde(default)]
    pub chunk_states: BTreeMap<u32, ChunkRunState>,

    /// Sorted-by-chunk-id, result-filtered projection of `chunk_states`
    #[serde(default)]
    pub chunk_results: Vec<ExtractedChunkData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown_output: Option<String>,

    /// Explicit id-coverage per outline section
    #[serde(default)]
    pub coverage: BTreeMap<String, SectionCoverage>,

    /// RFC 3339 timestamp of the last transition
    #[serde(default)]
    pub updated_at: String,
}

fn default_snapshot_version() -> u8 {
    SNAPSHOT_VERSION
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            checksum: 0,
            status: PipelinePhase::Idle,
            total_chunks: 0,
            processed_chunks: 0,
            outline: Vec::new(),
            plan: None,
            raw_input_hash: None,
            chunk_states: BTreeMap::new(),
            chunk_results: Vec::new(),
            current_error: None,
            markdown_output: None,
            coverage: BTreeMap::new(),
            updated_at: String::new(),
        }
    }
}

impl PipelineState {
    /// Apply one event, producing the next snapshot.
    pub fn apply(&self, event: PipelineEvent) -> PipelineState {
        let mut next = self.clone();

        match event {
            PipelineEvent::RunStarted { digest } => {
                next = PipelineState {
                    status: PipelinePhase::Outlining,
                    raw_input_hash: Some(digest),
                    ..PipelineState::default()
                };
            }
            PipelineEvent::OutlineReady { outline, plan } => {
                next.status = PipelinePhase::Chunking;
                next.total_chunks = plan.len();
                next.chunk_states = plan
                    .chunk_ids()
                    .map(|id| (id, ChunkRunState::pending(id)))
                    .collect();
                next.outline = outline;
                next.plan = Some(plan);
                next.current_error = None;
                next.markdown_output = None;
            }
            PipelineEvent::ChunkStarted { chunk_id } => {
                next.status = PipelinePhase::Chunking;
                next.current_error = None;
                let entry = next
                    .chunk_states
                    .entry(chunk_id)
                    .or_insert_with(|| ChunkRunState::pending(chunk_id));
                entry.status = ChunkRunStatus::Running;
                entry.attempts += 1;
                entry.last_error = None;
            }
            PipelineEvent::ChunkCompleted { chunk_id, result } => {
                let entry = next
                    .chunk_states
                    .entry(chunk_id)
                    .or_insert_with(|| ChunkRunState::pending(chunk_id));
                entry.status = ChunkRunStatus::Complete;
                entry.last_error = None;
                entry.result = Some(result);
            }
            PipelineEvent::ChunkFailed { chunk_id, message } => {
                let entry = next
                    .chunk_states
                    .entry(chunk_id)
                    .or_insert_with(|| ChunkRunState::pending(chunk_id));
                entry.status = ChunkRunStatus::Error;
                entry.last_error = Some(message.clone());
                next.status = PipelinePhase::Error;
                next.current_error = Some(message);
            }
            PipelineEvent::StitchStarted => {
                next.status = PipelinePhase::Stitching;
                next.current_error = None;
            }
            PipelineEvent::StitchCompleted { markdown } => {
                next.status = PipelinePhase::Complete;
                next.markdown_output = Some(markdown);
                next.current_error = None;
            }
            PipelineEvent::PipelineFailed { message } => {
                next.status = PipelinePhase::Error;
                next.current_error = Some(message);
            }
        }

        next.refresh_derived();
        next
    }

    /// Recompute every derived field from `chunk_states`.
    fn refresh_derived(&mut self) {
        self.processed_chunks = self
            .chunk_states
            .values()
            .filter(|s| s.status == ChunkRunStatus::Complete)
            .count();
        // BTreeMap iteration is already sorted by chunk id.
        self.chunk_results = self
            .chunk_states
            .values()
            .filter_map(|s| s.result.clone())
            .collect();
        self.coverage = CoverageAnalyzer::explicit(&self.outline, &self.chunk_results);
        self.updated_at = chrono::Utc::now().to_rfc3339();
        self.checksum = 0;
    }

    /// Chunk ids currently in the error state, in plan order.
    pub fn failed_chunk_ids(&self) -> Vec<u32> {
        self.chunk_states
            .values()
            .filter(|s| s.status == ChunkRunStatus::Error)
            .map(|s| s.chunk_id)
            .collect()
    }

    pub fn has_failed_chunks(&self) -> bool {
        self.chunk_states
            .values()
            .any(|s| s.status == ChunkRunStatus::Error)
    }

    /// Every planned chunk is complete with a stored result.
    pub fn all_chunks_done(&self) -> bool {
        !self.chunk_states.is_empty() && self.chunk_states.values().all(|s| s.is_done())
    }

    // -------------------------------------------------------------------------
    // Validation & Persistence Helpers
    // -------------------------------------------------------------------------

    fn compute_checksum(&self) -> Result<u32> {
        let mut probe = self.clone();
        probe.checksum = 0;
        let bytes = serde_json::to_vec(&probe)?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes);
        Ok(hasher.finalize())
    }

    /// Check snapshot invariants and version compatibility.
    pub fn validate(&self) -> Result<()> {
        if self.version > SNAPSHOT_VERSION {
            return Err(StudyError::Snapshot(format!(
                "snapshot version {} is newer than supported version {}",
                self.version, SNAPSHOT_VERSION
            )));
        }

        if let Some(plan) = &self.plan {
            let plan_ids: Vec<u32> = plan.chunk_ids().collect();
            let state_ids: Vec<u32> = self.chunk_states.keys().copied().collect();
            let mut sorted_plan = plan_ids.clone();
            sorted_plan.sort_unstable();
            if sorted_plan != state_ids {
                return Err(StudyError::Snapshot(format!(
                    "chunk states {:?} do not match plan ids {:?}",
                    state_ids, plan_ids
                )));
            }
        }

        let done = self
            .chunk_states
            .values()
            .filter(|s| s.status == ChunkRunStatus::Complete)
            .count();
        if self.processed_chunks != done {
            return Err(StudyError::Snapshot(format!(
                "processed_chunks {} disagrees with {} complete chunk states",
                self.processed_chunks, done
            )));
        }

        let projected: Vec<u32> = self
            .chunk_states
            .values()
            .filter(|s| s.result.is_some())
            .map(|s| s.chunk_id)
            .collect();
        let stored: Vec<u32> = self.chunk_results.iter().map(|r| r.chunk_id).collect();
        if projected != stored {
            return Err(StudyError::Snapshot(format!(
                "chunk_results {:?} diverged from chunk_states projection {:?}",
                stored, projected
            )));
        }

        Ok(())
    }

    /// Serialize with checksum for safe storage.
    pub fn to_json(&self) -> Result<String> {
        let mut snapshot = self.clone();
        snapshot.checksum = snapshot.compute_checksum()?;
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Deserialize, verify integrity, and rebuild transient indexes.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut state: Self = serde_json::from_str(json)
            .map_err(|e| StudyError::Snapshot(format!("failed to parse snapshot: {}", e)))?;

        if state.checksum != 0 {
            let expected = state.checksum;
            let computed = state.compute_checksum()?;
            if expected != computed {
                return Err(StudyError::Snapshot(format!(
                    "snapshot corrupted: checksum mismatch (expected {}, got {})",
                    expected, computed
                )));
            }
        }

        state.validate()?;
        if let Some(plan) = &mut state.plan {
            plan.reindex();
        }
        Ok(state)
    }
}

// =============================================================================
// Tests
// =============================================================================
