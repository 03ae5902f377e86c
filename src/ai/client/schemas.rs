//! Response Schemas
//!
//! JSON schemas sent with each completion request so the model returns
//! structured output matching the data model. Field names here must stay in
//! sync with the boundary parsers in `ai::validation`.

use serde_json::{Value, json};

/// Outline response: `{sections: [{id, title, summary, priority}]}`
pub(crate) fn outline_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "title": {"type": "string"},
                        "summary": {"type": "string"},
                        "priority": {"type": "string", "enum": ["high", "medium", "low"]}
                    },
                    "required": ["id", "title", "summary", "priority"]
                }
            }
        },
        "required": ["sections"]
    })
}

/// Per-chunk extraction response
pub(crate) fn chunk_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "key_points": {"type": "array", "items": {"type": "string"}},
            "procedure_steps": {"type": "array", "items": {"type": "string"}},
            "numeric_facts": {"type": "array", "items": {"type": "string"}},
            "patterns": {"type": "array", "items": {"type": "string"}},
            "pitfalls": {"type": "array", "items": {"type": "string"}},
            "memory_aids": {"type": "array", "items": {"type": "string"}},
            "recall_questions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "question": {"type": "string"},
                        "answer": {"type": "string"}
                    },
                    "required": ["question", "answer"]
                }
            },
            "glossary_terms": {"type": "array", "items": {"type": "string"}},
            "extra_content": {"type": "array", "items": {"type": "string"}},
            "chunk_markdown": {"type": "string"}
        },
        "required": [
            "key_points", "procedure_steps", "numeric_facts", "patterns",
            "pitfalls", "memory_aids", "recall_questions", "glossary_terms",
            "chunk_markdown"
        ]
    })
}

/// Final synthesis response: one named section per document part
pub(crate) fn stitch_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title_and_roadmap": {"type": "string"},
            "tldr": {"type": "string"},
            "stepwise_teaching": {"type": "string"},
            "numbers_and_cutoffs": {"type": "string"},
            "decision_algorithm": {"type": "string"},
            "pitfalls": {"type": "string"},
            "memory_tools": {"type": "string"},
            "active_recall": {"type": "string"},
            "glossary_entries": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "term": {"type": "string"},
                        "english_term": {"type": "string"},
                        "definition": {"type": "string"}
                    },
                    "required": ["term", "definition"]
                }
            }
        },
        "required": [
            "title_and_roadmap", "tldr", "stepwise_teaching", "numbers_and_cutoffs",
            "decision_algorithm", "pitfalls", "memory_tools", "active_recall",
            "glossary_entries"
        ]
    })
}

/// Conflict arbitration response: a bare array of resolution items
pub(crate) fn conflict_resolution_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "context_label": {"type": "string"},
                "resolved_value": {"type": "string"},
                "rationale": {"type": "string"},
                "sources": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["context_label", "resolved_value", "rationale", "sources"]
        }
    })
}
