//! Response Validation
//!
//! The completion client's JSON is loosely typed; nothing beyond the
//! documented contract is trusted. Every optional field is validated and
//! defaulted here at the boundary, so the rest of the crate only ever sees
//! the exhaustive result structs of the data model.

use serde_json::Value;

use crate::pipeline::conflict::ConflictResolutionItem;
use crate::types::{
    ExtractedChunkData, GlossaryEntry, OutlinePriority, OutlineSection, RecallQuestion, Result,
    StudyError,
};

// =============================================================================
// Field Helpers
// =============================================================================

/// Read a string field, empty when missing or the wrong type.
pub fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Read an array of strings, dropping non-string items.
pub fn string_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Outline
// =============================================================================

/// Parse the outline response: `{"sections": [{id, title, summary, priority}]}`.
///
/// Entries without an id or title are dropped; a response with no usable
/// sections is an error since nothing downstream can be planned from it.
pub fn parse_outline_sections(value: &Value) -> Result<Vec<OutlineSection>> {
    let raw = value
        .get("sections")
        .and_then(Value::as_array)
        .ok_or_else(|| StudyError::LlmApi("outline response missing 'sections' array".into()))?;

    let sections: Vec<OutlineSection> = raw
        .iter()
        .filter_map(|item| {
            let id = string_field(item, "id");
            let title = string_field(item, "title");
            if id.is_empty() || title.is_empty() {
                return None;
            }
            Some(OutlineSection {
                id,
                title,
                summary: string_field(item, "summary"),
                priority: OutlinePriority::parse(&string_field(item, "priority")),
            })
        })
        .collect();

    if sections.is_empty() {
        return Err(StudyError::LlmApi(
            "outline response contained no usable sections".into(),
        ));
    }
    Ok(sections)
}

// =============================================================================
// Chunk Extraction
// =============================================================================

/// Parse one chunk-extraction response into the exhaustive result struct.
///
/// Positions and coverage ids are left zeroed; the runner tags them from the
/// plan entry. Every list defaults to empty.
pub fn parse_chunk_extraction(value: &Value) -> Result<ExtractedChunkData> {
    if !value.is_object() {
        return Err(StudyError::LlmApi(format!(
            "chunk response is not an object: {}",
            value
        )));
    }

    let recall_questions = value
        .get("recall_questions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|q| {
                    let question = string_field(q, "question");
                    let answer = string_field(q, "answer");
                    if question.is_empty() {
                        return None;
                    }
                    Some(RecallQuestion { question, answer })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ExtractedChunkData {
        chunk_id: 0,
        source_start: 0,
        source_end: 0,
        covers_outline_ids: Vec::new(),
        key_points: string_array(value, "key_points"),
        procedure_steps: string_array(value, "procedure_steps"),
        numeric_facts: string_array(value, "numeric_facts"),
        patterns: string_array(value, "patterns"),
        pitfalls: string_array(value, "pitfalls"),
        memory_aids: string_array(value, "memory_aids"),
        recall_questions,
        glossary_terms: string_array(value, "glossary_terms"),
        extra_content: string_array(value, "extra_content"),
        chunk_markdown: string_field(value, "chunk_markdown"),
    })
}

// =============================================================================
// Glossary & Conflict Resolution
// =============================================================================

/// Parse glossary entries, dropping items without a term.
pub fn parse_glossary_entries(value: &Value, key: &str) -> Vec<GlossaryEntry> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let term = string_field(item, "term");
                    if term.is_empty() {
                        return None;
                    }
                    let english = string_field(item, "english_term");
                    Some(GlossaryEntry {
                        term,
                        definition: string_field(item, "definition"),
                        english_term: (!english.is_empty()).then_some(english),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the arbitration response: a bare array of resolution items.
///
/// Items without a context label or resolved value are dropped rather than
/// poisoning the whole batch.
pub fn parse_conflict_resolutions(value: &Value) -> Result<Vec<ConflictResolutionItem>> {
    let raw = value.as_array().ok_or_else(|| {
        StudyError::LlmApi("conflict resolution response is not an array".into())
    })?;

    Ok(raw
        .iter()
        .filter_map(|item| {
            let context_label = string_field(item, "context_label");
            let resolved_value = string_field(item, "resolved_value");
            if context_label.is_empty() || resolved_value.is_empty() {
                return None;
            }
            Some(ConflictResolutionItem {
                context_label,
                resolved_value,
                rationale: string_field(item, "rationale"),
                sources: string_array(item, "sources"),
            })
        })
        .collect())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outline_defaults_and_drops() {
        let value = json!({
            "sections": [
                {"id": "s1", "title": "Intro"},
                {"id": "", "title": "dropped"},
                {"title": "also dropped"},
                {"id": "s2", "title": "Dosing", "summary": "mg ranges", "priority": "high"},
            ]
        });
        let sections = parse_outline_sections(&value).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].priority, OutlinePriority::Medium);
        assert_eq!(sections[1].priority, OutlinePriority::High);
        assert!(sections[0].summary.is_empty());
    }

    #[test]
    fn test_outline_empty_is_error() {
        assert!(parse_outline_sections(&json!({"sections": []})).is_err());
        assert!(parse_outline_sections(&json!({"nope": 1})).is_err());
    }

    #[test]
    fn test_chunk_defaults_every_field() {
        let data = parse_chunk_extraction(&json!({})).unwrap();
        assert!(data.key_points.is_empty());
        assert!(data.recall_questions.is_empty());
        assert!(data.chunk_markdown.is_empty());
    }

    #[test]
    fn test_chunk_parses_partial_shape() {
        let value = json!({
            "key_points": ["first point", 42, "second point"],
            "recall_questions": [
                {"question": "Q1?", "answer": "A1"},
                {"answer": "orphan answer"},
            ],
            "chunk_markdown": "## Notes",
        });
        let data = parse_chunk_extraction(&value).unwrap();
        assert_eq!(data.key_points, vec!["first point", "second point"]);
        assert_eq!(data.recall_questions.len(), 1);
        assert_eq!(data.chunk_markdown, "## Notes");
    }

    #[test]
    fn test_chunk_rejects_non_object() {
        assert!(parse_chunk_extraction(&json!("just a string")).is_err());
    }

    #[test]
    fn test_glossary_drops_unnamed_terms() {
        let value = json!({
            "glossary_entries": [
                {"term": "Preload", "definition": "venous return", "english_term": "preload"},
                {"definition": "dropped"},
            ]
        });
        let entries = parse_glossary_entries(&value, "glossary_entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].english_term.as_deref(), Some("preload"));
    }

    #[test]
    fn test_conflict_resolutions_filtered() {
        let value = json!([
            {"context_label": "loading dose", "resolved_value": "500 mg", "rationale": "guideline"},
            {"context_label": "", "resolved_value": "x"},
        ]);
        let items = parse_conflict_resolutions(&value).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].resolved_value, "500 mg");
        assert!(items[0].sources.is_empty());
    }
}
