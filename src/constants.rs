//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Text segmentation constants
pub mod segmenter {
    /// Window size for one chunk (characters). Sized for large-context
    /// models: fewer calls, better per-chunk coherence.
    pub const WINDOW_CHARS: usize = 32_000;

    /// Overlap carried between consecutive chunks (characters)
    pub const OVERLAP_CHARS: usize = 1_000;

    /// A sentence/newline boundary is only taken when it sits at or beyond
    /// this fraction of the window; earlier boundaries would shrink chunks
    /// too much.
    pub const CLEAN_BOUNDARY_RATIO: f64 = 0.7;
}

/// Pipeline constants
pub mod pipeline {
    /// How much of the input the outline call sees (characters)
    pub const OUTLINE_SAMPLE_CHARS: usize = 40_000;

    /// How much of the input the stitch call sees as a style sample (characters)
    pub const STITCH_SAMPLE_CHARS: usize = 5_000;
}

/// Coverage heuristic constants
pub mod coverage {
    /// Keywords shorter than this are too common to signal coverage
    pub const MIN_KEYWORD_LEN: usize = 4;
}

/// Conflict detection constants
pub mod conflict {
    /// Context window captured around a numeric mention for its label (characters)
    pub const LABEL_WINDOW_CHARS: usize = 40;

    /// Labels are truncated to this length after normalization
    pub const MAX_LABEL_CHARS: usize = 60;
}

/// Completion client constants
pub mod client {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Maximum retries for transient completion failures
    pub const MAX_RETRIES: usize = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 1_000;
}
