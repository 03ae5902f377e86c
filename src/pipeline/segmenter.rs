//! Text Segmentation
//!
//! Splits raw text into contiguous, boundary-aware, overlapping windows.
//!
//! Offsets are the source of truth: the text is never copied, so identical
//! re-slicing is always possible for reruns. Every cut point lands on a
//! UTF-8 character boundary, keeping `&text[start..end]` valid for any
//! returned segment.

use serde::{Deserialize, Serialize};

use crate::constants::segmenter as defaults;
use crate::types::{Result, StudyError};

/// One contiguous `[start, end)` window of the input text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Boundary-aware windowing over raw text.
///
/// If the text fits in one window, a single segment covers it. Otherwise
/// windows are taken left to right; each window prefers to cut at the last
/// sentence terminator or newline in its final 30%, falling back to a hard
/// cut at the window edge. The cursor then steps back by a fixed overlap so
/// adjacent chunks share context.
#[derive(Debug, Clone)]
pub struct TextSegmenter {
    window: usize,
    overlap: usize,
}

impl Default for TextSegmenter {
    fn default() -> Self {
        Self {
            window: defaults::WINDOW_CHARS,
            overlap: defaults::OVERLAP_CHARS,
        }
    }
}

impl TextSegmenter {
    /// Create a segmenter with custom window/overlap sizes.
    ///
    /// The overlap must be strictly smaller than the clean-boundary floor of
    /// the window, otherwise the cursor could stall.
    pub fn new(window: usize, overlap: usize) -> Result<Self> {
        if window == 0 {
            return Err(StudyError::Config("segmenter window must be > 0".into()));
        }
        let min_advance = (window as f64 * defaults::CLEAN_BOUNDARY_RATIO) as usize;
        if overlap >= min_advance {
            return Err(StudyError::Config(format!(
                "segmenter overlap {} must be smaller than {} (70% of window {})",
                overlap, min_advance, window
            )));
        }
        Ok(Self { window, overlap })
    }

    /// Split `text` into ordered segments covering `[0, text.len())`.
    ///
    /// Guarantees: no gaps, the last segment ends exactly at `text.len()`,
    /// and the cursor strictly advances each iteration even when no clean
    /// boundary exists.
    pub fn segment(&self, text: &str) -> Vec<Segment> {
        let len = text.len();
        if len <= self.window {
            return vec![Segment { start: 0, end: len }];
        }

        let mut segments = Vec::new();
        let mut start = 0usize;

        while start < len {
            let end = self.cut_point(text, start);
            segments.push(Segment { start, end });
            if end >= len {
                break;
            }

            // Step back by the overlap, clamped so progress stays strict.
            let next = end.saturating_sub(self.overlap).max(start + 1);
            start = ceil_char_boundary(text, next);
        }

        segments
    }

    /// Find where the window starting at `start` should end.
    fn cut_point(&self, text: &str, start: usize) -> usize {
        let len = text.len();
        let hard_end = start + self.window;
        if hard_end >= len {
            return len;
        }
        let hard_end = floor_char_boundary(text, hard_end);

        // Search backward for the last sentence terminator or newline; only
        // accept it when the cut keeps at least 70% of the window.
        let window_text = &text[start..hard_end];
        if let Some(pos) = window_text.rfind(['.', '\n']) {
            let min_pos = (self.window as f64 * defaults::CLEAN_BOUNDARY_RATIO) as usize;
            if pos >= min_pos {
                return start + pos + 1;
            }
        }
        hard_end
    }
}

/// Largest index `<= at` that is a char boundary of `text`.
fn floor_char_boundary(text: &str, at: usize) -> usize {
    let mut at = at.min(text.len());
    while !text.is_char_boundary(at) {
        at -= 1;
    }
    at
}

/// Smallest index `>= at` that is a char boundary of `text`.
fn ceil_char_boundary(text: &str, at: usize) -> usize {
    let mut at = at.min(text.len());
    while !text.is_char_boundary(at) {
        at += 1;
    }
    at
}

// =============================================================================
// Tests
// =============================================================================
