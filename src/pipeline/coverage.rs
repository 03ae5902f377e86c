//! Coverage Analysis
//!
//! Answers, per outline section, whether and where the section was covered
//! by processed chunks.
//!
//! Two strategies:
//!
//! - **Explicit id-coverage** (preferred, wired into snapshots): a section
//!   is covered when some chunk result lists it in `covers_outline_ids`.
//!   Deterministic, computed via an inverted index.
//! - **Keyword overlap** (degraded fallback): substring containment of the
//!   section's keywords in the normalized corpus of all chunk text. This is
//!   an approximate UX signal - containment can both over- and under-count -
//!   never a correctness oracle.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::constants::coverage::MIN_KEYWORD_LEN;
use crate::types::{ExtractedChunkData, OutlineSection, SectionCoverage};

/// Combining marks (diacritics) to strip during keyword normalization
fn mark_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\p{M}+").unwrap())
}

/// Runs of anything that is not a letter or digit
fn separator_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap())
}

pub struct CoverageAnalyzer;

impl CoverageAnalyzer {
    /// Explicit id-coverage over all chunk results.
    ///
    /// Adding a result whose `covers_outline_ids` includes section X can
    /// only flip `covered(X)` false→true, never back.
    pub fn explicit(
        outline: &[OutlineSection],
        results: &[ExtractedChunkData],
    ) -> BTreeMap<String, SectionCoverage> {
        // Inverted index: section id -> chunk ids that cover it.
        let mut by_section: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
        for result in results {
            for id in &result.covers_outline_ids {
                by_section.entry(id.as_str()).or_default().push(result.chunk_id);
            }
        }

        outline
            .iter()
            .map(|section| {
                let mut chunk_ids = by_section
                    .get(section.id.as_str())
                    .cloned()
                    .unwrap_or_default();
                chunk_ids.sort_unstable();
                chunk_ids.dedup();
                let coverage = SectionCoverage {
                    covered: !chunk_ids.is_empty(),
                    chunk_ids,
                };
                (section.id.clone(), coverage)
            })
            .collect()
    }

    /// Keyword-overlap percentage of one section against a corpus string.
    ///
    /// Keywords are the tokens of `title + summary` longer than three
    /// characters, case-folded with punctuation and diacritic marks
    /// stripped. The result is `matched / total * 100`, clamped to
    /// `[0, 100]`; a section with no usable keywords reports 0.
    pub fn keyword_overlap(section: &OutlineSection, corpus: &str) -> f64 {
        let keywords = Self::keywords(&format!("{} {}", section.title, section.summary));
        if keywords.is_empty() {
            return 0.0;
        }
        let normalized_corpus = Self::normalize(corpus);
        let matched = keywords
            .iter()
            .filter(|kw| normalized_corpus.contains(kw.as_str()))
            .count();
        (matched as f64 / keywords.len() as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Concatenate every textual field of the chunk results (plus the final
    /// document, when present) into one normalized corpus string.
    pub fn build_corpus(results: &[ExtractedChunkData], final_markdown: Option<&str>) -> String {
        let mut corpus = String::new();
        for r in results {
            for field in [
                &r.key_points,
                &r.procedure_steps,
                &r.numeric_facts,
                &r.patterns,
                &r.pitfalls,
                &r.memory_aids,
                &r.glossary_terms,
                &r.extra_content,
            ] {
                for item in field {
                    corpus.push_str(item);
                    corpus.push(' ');
                }
            }
            for q in &r.recall_questions {
                corpus.push_str(&q.question);
                corpus.push(' ');
                corpus.push_str(&q.answer);
                corpus.push(' ');
            }
            corpus.push_str(&r.chunk_markdown);
            corpus.push(' ');
        }
        if let Some(md) = final_markdown {
            corpus.push_str(md);
        }
        corpus
    }

    fn keywords(text: &str) -> Vec<String> {
        let normalized = Self::normalize(text);
        let mut tokens: Vec<String> = separator_pattern()
            .split(&normalized)
            .filter(|t| t.chars().count() >= MIN_KEYWORD_LEN)
            .map(str::to_string)
            .collect();
        tokens.sort_unstable();
        tokens.dedup();
        tokens
    }

    fn normalize(text: &str) -> String {
        let folded = text.to_lowercase();
        mark_pattern().replace_all(&folded, "").into_owned()
    }
}

// =============================================================================
// Tests
// =============================================================================
