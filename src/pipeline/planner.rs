//! Chunk Planning
//!
//! Combines the segmenter's windows with the generated outline to produce
//! the chunk plan the state machine executes.

use tracing::debug;

use super::segmenter::TextSegmenter;
use crate::types::{ChunkPlan, ChunkPlanEntry, OutlineSection, Result};

/// Builds chunk plans from raw text and an outline.
#[derive(Debug, Clone, Default)]
pub struct ChunkPlanner {
    segmenter: TextSegmenter,
}

impl ChunkPlanner {
    pub fn new(segmenter: TextSegmenter) -> Self {
        Self { segmenter }
    }

    /// Build the ordered chunk plan for `text`.
    ///
    /// Outline section ids are distributed across chunks by ceiling
    /// division, in outline order: each id lands on exactly one chunk. When
    /// chunk count and section count diverge this is a best-effort one-pass
    /// distribution, not a bijection.
    pub fn build_plan(&self, text: &str, outline: &[OutlineSection]) -> Result<ChunkPlan> {
        let segments = self.segmenter.segment(text);
        let total = segments.len();
        let per_chunk = outline.len().div_ceil(total.max(1));

        let entries: Vec<ChunkPlanEntry> = segments
            .into_iter()
            .enumerate()
            .map(|(idx, seg)| {
                let lo = (idx * per_chunk).min(outline.len());
                let hi = ((idx + 1) * per_chunk).min(outline.len());
                let assigned = &outline[lo..hi];
                let title = assigned
                    .first()
                    .map(|s| s.title.clone())
                    .unwrap_or_else(|| format!("Chunk {}", idx + 1));

                ChunkPlanEntry {
                    chunk_id: idx as u32,
                    title,
                    start: seg.start,
                    end: seg.end,
                    outline_ids: assigned.iter().map(|s| s.id.clone()).collect(),
                }
            })
            .collect();

        debug!(
            chunks = entries.len(),
            sections = outline.len(),
            per_chunk,
            "chunk plan built"
        );
        Ok(ChunkPlan::new(entries))
    }
}

// =============================================================================
// Tests
// =============================================================================
