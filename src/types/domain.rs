//! Core Domain Types
//!
//! Data model for the extraction pipeline: input digests, outline sections,
//! chunk plans, and per-chunk extraction records.
//!
//! Everything here is plain serializable data - no closures, no live
//! references - so values survive persistence round-trips unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Input Identity
// =============================================================================

/// Content identity of the exact input text.
///
/// Two digests are equal only if both the hash and the length match; the
/// length is redundant with a strong hash but makes comparison cheap to
/// pre-filter and guards against weak hash implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInputDigest {
    pub hash: String,
    pub length: usize,
}

// =============================================================================
// Outline
// =============================================================================

/// Learner-relevance priority of an outline section
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutlinePriority {
    Low,
    #[default]
    Medium,
    High,
}

impl OutlinePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutlinePriority::High => "high",
            OutlinePriority::Medium => "medium",
            OutlinePriority::Low => "low",
        }
    }

    /// Parse priority from string (case-insensitive, lenient)
    pub fn parse(s: &str) -> Self {
        match s.trim_matches('"').to_lowercase().as_str() {
            "high" => OutlinePriority::High,
            "low" => OutlinePriority::Low,
            _ => OutlinePriority::Medium,
        }
    }
}

impl std::fmt::Display for OutlinePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A top-level topic of the source text, used for chunk planning and
/// coverage reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineSection {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub priority: OutlinePriority,
}

// =============================================================================
// Chunk Plan
// =============================================================================

/// One planned unit of work: a `[start, end)` byte-offset slice of the
/// original text plus the outline sections assigned to it.
///
/// Offsets are always on UTF-8 character boundaries, so `&text[start..end]`
/// re-slices identically for reruns - the text itself is never copied into
/// the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlanEntry {
    pub chunk_id: u32,
    pub title: String,
    pub start: usize,
    pub end: usize,
    pub outline_ids: Vec<String>,
}

/// Ordered chunk plan with O(1) lookup by chunk id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkPlan {
    entries: Vec<ChunkPlanEntry>,
    #[serde(skip)]
    index: HashMap<u32, usize>,
}

impl ChunkPlan {
    pub fn new(entries: Vec<ChunkPlanEntry>) -> Self {
        let index = Self::build_index(&entries);
        Self { entries, index }
    }

    fn build_index(entries: &[ChunkPlanEntry]) -> HashMap<u32, usize> {
        entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.chunk_id, pos))
            .collect()
    }

    pub fn entries(&self) -> &[ChunkPlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a plan entry by chunk id.
    ///
    /// The index is rebuilt lazily after deserialization (serde skips it),
    /// so lookups fall back to a scan when the map is empty but entries are
    /// not.
    pub fn get(&self, chunk_id: u32) -> Option<&ChunkPlanEntry> {
        if self.index.is_empty() && !self.entries.is_empty() {
            return self.entries.iter().find(|e| e.chunk_id == chunk_id);
        }
        self.index.get(&chunk_id).map(|&pos| &self.entries[pos])
    }

    /// Restore the lookup index after deserialization.
    pub fn reindex(&mut self) {
        self.index = Self::build_index(&self.entries);
    }

    /// All chunk ids in plan order.
    pub fn chunk_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|e| e.chunk_id)
    }
}

// =============================================================================
// Chunk Extraction
// =============================================================================

/// An active-recall question extracted from a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallQuestion {
    pub question: String,
    pub answer: String,
}

/// Structured facts produced for one chunk by the completion client.
///
/// `source_start`/`source_end`/`covers_outline_ids` are tagged by the runner
/// from the plan entry, never trusted from the model response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedChunkData {
    pub chunk_id: u32,
    pub source_start: usize,
    pub source_end: usize,
    pub covers_outline_ids: Vec<String>,

    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub procedure_steps: Vec<String>,
    #[serde(default)]
    pub numeric_facts: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub pitfalls: Vec<String>,
    #[serde(default)]
    pub memory_aids: Vec<String>,
    #[serde(default)]
    pub recall_questions: Vec<RecallQuestion>,
    #[serde(default)]
    pub glossary_terms: Vec<String>,
    #[serde(default)]
    pub extra_content: Vec<String>,
    #[serde(default)]
    pub chunk_markdown: String,
}

// =============================================================================
// Chunk Run State
// =============================================================================

/// Execution status of a single chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkRunStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Error,
}

impl ChunkRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkRunStatus::Pending => "pending",
            ChunkRunStatus::Running => "running",
            ChunkRunStatus::Complete => "complete",
            ChunkRunStatus::Error => "error",
        }
    }
}

/// Mutable execution record for one chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkRunState {
    pub chunk_id: u32,
    pub status: ChunkRunStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExtractedChunkData>,
}

impl ChunkRunState {
    pub fn pending(chunk_id: u32) -> Self {
        Self {
            chunk_id,
            status: ChunkRunStatus::Pending,
            attempts: 0,
            last_error: None,
            result: None,
        }
    }

    /// A chunk is done when it is complete and a result is actually stored.
    pub fn is_done(&self) -> bool {
        self.status == ChunkRunStatus::Complete && self.result.is_some()
    }
}

// =============================================================================
// Coverage
// =============================================================================

/// Whether and where an outline section was covered by processed chunks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionCoverage {
    pub covered: bool,
    pub chunk_ids: Vec<u32>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parse() {
        assert_eq!(OutlinePriority::parse("HIGH"), OutlinePriority::High);
        assert_eq!(OutlinePriority::parse("\"low\""), OutlinePriority::Low);
        assert_eq!(OutlinePriority::parse("unknown"), OutlinePriority::Medium);
    }

    #[test]
    fn test_digest_equality_needs_both_fields() {
        let a = RawInputDigest {
            hash: "abc".into(),
            length: 10,
        };
        let b = RawInputDigest {
            hash: "abc".into(),
            length: 11,
        };
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_plan_lookup_and_reindex() {
        let plan = ChunkPlan::new(vec![
            ChunkPlanEntry {
                chunk_id: 0,
                title: "Part 1".into(),
                start: 0,
                end: 100,
                outline_ids: vec!["s1".into()],
            },
            ChunkPlanEntry {
                chunk_id: 1,
                title: "Part 2".into(),
                start: 90,
                end: 200,
                outline_ids: vec!["s2".into()],
            },
        ]);
        assert_eq!(plan.get(1).map(|e| e.start), Some(90));
        assert!(plan.get(7).is_none());

        // Round-trip drops the index; lookups must still work.
        let json = serde_json::to_string(&plan).unwrap();
        let mut restored: ChunkPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.get(0).map(|e| e.end), Some(100));
        restored.reindex();
        assert_eq!(restored.get(1).map(|e| e.end), Some(200));
    }

    #[test]
    fn test_chunk_state_is_done_requires_result() {
        let mut state = ChunkRunState::pending(3);
        state.status = ChunkRunStatus::Complete;
        assert!(!state.is_done());
        state.result = Some(ExtractedChunkData {
            chunk_id: 3,
            ..Default::default()
        });
        assert!(state.is_done());
    }
}
