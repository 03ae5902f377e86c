//! Gemini API Client
//!
//! `CompletionClient` implementation over the Gemini `generateContent` API
//! with schema-constrained JSON responses.
//!
//! Transient failures (rate limits, 5xx, network hiccups) are retried with
//! exponential backoff; that policy lives here, in the collaborator, not in
//! the pipeline core.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::schemas;
use super::{ClientConfig, CompletionClient};
use crate::ai::validation;
use crate::constants::client as client_constants;
use crate::pipeline::conflict::{ConflictEvidence, ConflictResolutionItem};
use crate::types::{
    ExtractedChunkData, HighlightDensity, OutlineSection, Result, StitchedOutput, StudyError,
    StudySettings,
};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const SYSTEM_INSTRUCTION: &str = "\
You are a source-grounded study tutor. Produce study notes that are easier to \
understand and more memorable, yet faithful to the source text and its numbers. \
Never invent facts; anything not supported by the source must be wrapped in \
[[EXTRA]]...[[/EXTRA]] and is forbidden entirely in strict mode. \
Highlight vocabulary: [[R]]...[[/R]] critical actions or red flags, \
[[Y]]...[[/Y]] numbers, thresholds, doses and time windows, \
[[B]]...[[/B]] key terms and patterns. Wrap ALL numbers with [[Y]] markers. \
Respond ONLY with valid JSON matching the provided schema.";

/// Gemini completion client with secure API key handling
pub struct GeminiClient {
    /// API key stored securely - never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api_key_str = config
            .api_key
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .ok_or_else(|| {
                StudyError::Config(
                    "Gemini API key not found. Set GEMINI_API_KEY env var or provide in config"
                        .to_string(),
                )
            })?;

        let api_base = config
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Url::parse(&api_base)
            .map_err(|e| StudyError::Config(format!("Invalid API base '{}': {}", api_base, e)))?;

        let model = config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StudyError::LlmApi(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key_str),
            api_base,
            model,
            temperature: config.temperature,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One schema-constrained completion with exponential backoff on
    /// transient failures.
    async fn generate_json(&self, prompt: &str, schema: Value) -> Result<Value> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(client_constants::BASE_DELAY_MS))
            .with_max_times(client_constants::MAX_RETRIES);

        (|| async { self.call_api(prompt, &schema).await })
            .retry(backoff)
            .when(is_transient)
            .notify(|err: &StudyError, dur: Duration| {
                warn!(
                    delay_ms = dur.as_millis() as u64,
                    error = %err,
                    "transient completion failure, retrying"
                );
            })
            .await
    }

    async fn call_api(&self, prompt: &str, schema: &Value) -> Result<Value> {
        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        );

        let request = GenerateContentRequest {
            system_instruction: Content {
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            },
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: schema.clone(),
                temperature: self.temperature,
            },
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "completion request");

        let response = self
            .client
            .post(&endpoint)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| StudyError::LlmApi(format!("network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StudyError::LlmApi(format!(
                "completion request failed with status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| StudyError::LlmApi(format!("malformed response body: {}", e)))?;

        let text = parsed
            .candidates
            .into_iter()
            .flatten()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| StudyError::LlmApi("response contained no candidates".into()))?;

        serde_json::from_str(&text)
            .map_err(|e| StudyError::LlmApi(format!("candidate text is not valid JSON: {}", e)))
    }

    // -------------------------------------------------------------------------
    // Prompt Builders
    // -------------------------------------------------------------------------

    fn build_outline_prompt(&self, text: &str, goal_title: Option<&str>, tags: &[String]) -> String {
        format!(
            "Generate a study outline for: {}. Tags: {}.\n\
             Identify the top-level topics of the text with a short summary and a \
             learner-relevance priority for each.\n\nTEXT:\n{}",
            goal_title.unwrap_or("Text"),
            tags.join(", "),
            sample(text, crate::constants::pipeline::OUTLINE_SAMPLE_CHARS)
        )
    }

    fn build_chunk_prompt(
        &self,
        chunk_index: usize,
        total_chunks: usize,
        settings: &StudySettings,
        outline_focus: &[OutlineSection],
    ) -> String {
        let translation = if settings.include_translation {
            "Append a short English gloss in parentheses after key terms."
        } else {
            "Do not add English glosses."
        };
        let focus = if outline_focus.is_empty() {
            String::new()
        } else {
            let titles: Vec<&str> = outline_focus.iter().map(|s| s.title.as_str()).collect();
            format!("FOCUS SECTIONS: {}.\n", titles.join("; "))
        };
        format!(
            "Processing chunk {}/{}. Extract DETAILED structured facts. Do NOT simplify.\n\
             STRICT MODE: {}.\n{}{}\nReturn JSON only.",
            chunk_index + 1,
            total_chunks,
            if settings.include_extra { "OFF" } else { "ON" },
            focus,
            translation,
        )
    }

    fn build_synthesis_prompt(&self, aggregated: &str, settings: &StudySettings) -> String {
        let density = match settings.highlight_density {
            HighlightDensity::Low => {
                "HIGHLIGHT DENSITY: Low (sparse markers, only the most critical numbers)."
            }
            HighlightDensity::Medium => "HIGHLIGHT DENSITY: Medium.",
            HighlightDensity::High => {
                "HIGHLIGHT DENSITY: High (apply highlights liberally to all relevant terms)."
            }
        };
        let strictness = if settings.include_extra {
            "Extras allowed inline with [[EXTRA]] tags."
        } else {
            "No [[EXTRA]] labels allowed. Use only source material."
        };
        format!(
            "Merge the extracted data into one cohesive study guide.\n{}\n{}\n\
             Return JSON only.\n\nDATA:\n{}",
            density, strictness, aggregated
        )
    }
}

// =============================================================================
// Trait Implementation
// =============================================================================

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn generate_outline(
        &self,
        text: &str,
        goal_title: Option<&str>,
        tags: &[String],
    ) -> Result<Vec<OutlineSection>> {
        let prompt = self.build_outline_prompt(text, goal_title, tags);
        let value = self.generate_json(&prompt, schemas::outline_schema()).await?;
        validation::parse_outline_sections(&value)
    }

    async fn process_chunk(
        &self,
        chunk_text: &str,
        chunk_index: usize,
        total_chunks: usize,
        settings: &StudySettings,
        outline_focus: &[OutlineSection],
    ) -> Result<ExtractedChunkData> {
        let prompt = format!(
            "{}\n\nCHUNK TEXT:\n{}",
            self.build_chunk_prompt(chunk_index, total_chunks, settings, outline_focus),
            chunk_text
        );
        let value = self.generate_json(&prompt, schemas::chunk_schema()).await?;
        validation::parse_chunk_extraction(&value)
    }

    async fn stitch_final_output(
        &self,
        outline: &[OutlineSection],
        chunk_results: &[ExtractedChunkData],
        settings: &StudySettings,
        sample_text: &str,
    ) -> Result<StitchedOutput> {
        // Compact per-chunk digest so the aggregate stays within limits.
        let aggregated = chunk_results
            .iter()
            .map(|c| {
                format!(
                    "[Chunk {}]\nKEY: {}\nSTEPS: {}\nNUMBERS: {}\nPITFALLS: {}",
                    c.chunk_id,
                    join_capped(&c.key_points, 10),
                    join_capped(&c.procedure_steps, 5),
                    join_capped(&c.numeric_facts, 10),
                    join_capped(&c.pitfalls, 5),
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let section_titles = outline
            .iter()
            .map(|s| s.title.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let prompt = format!(
            "{}\n\nOUTLINE: {}\n\nSTYLE SAMPLE:\n{}",
            self.build_synthesis_prompt(&aggregated, settings),
            section_titles,
            sample(sample_text, crate::constants::pipeline::STITCH_SAMPLE_CHARS),
        );

        let value = self.generate_json(&prompt, schemas::stitch_schema()).await?;
        let glossary_entries = validation::parse_glossary_entries(&value, "glossary_entries");

        let mut markdown = format!(
            "## 1) Title & Roadmap\n{}\n\n## 2) TL;DR\n{}\n\n\
             ## 3) Step-by-Step Teaching\n{}\n\n## 4) Numbers & Cutoffs\n{}\n\n\
             ## 5) Decision Algorithm (IF/THEN)\n{}\n\n## 6) Pitfalls\n{}\n\n\
             ## 7) Memory Tools\n{}\n\n## 8) Active Recall\n{}\n",
            validation::string_field(&value, "title_and_roadmap"),
            validation::string_field(&value, "tldr"),
            validation::string_field(&value, "stepwise_teaching"),
            validation::string_field(&value, "numbers_and_cutoffs"),
            validation::string_field(&value, "decision_algorithm"),
            validation::string_field(&value, "pitfalls"),
            validation::string_field(&value, "memory_tools"),
            validation::string_field(&value, "active_recall"),
        );

        if settings.auto_include_glossary && !glossary_entries.is_empty() {
            markdown.push_str("\n## 9) Glossary\n");
            for (i, entry) in glossary_entries.iter().enumerate() {
                let english = entry
                    .english_term
                    .as_ref()
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default();
                markdown.push_str(&format!(
                    "{}. {}{}: {}\n",
                    i + 1,
                    entry.term,
                    english,
                    entry.definition
                ));
            }
        }

        Ok(StitchedOutput {
            markdown,
            glossary_entries,
        })
    }

    async fn resolve_conflict_values(
        &self,
        conflicts: &[ConflictEvidence],
    ) -> Result<Vec<ConflictResolutionItem>> {
        let serialized = conflicts
            .iter()
            .enumerate()
            .map(|(i, c)| format!("#{} {}: {}", i + 1, c.context_label, c.values.join(" vs ")))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "The following quantities were reported with disagreeing values. \
             For each, pick the best-supported value and explain why, citing sources:\n{}",
            serialized
        );
        let value = self
            .generate_json(&prompt, schemas::conflict_resolution_schema())
            .await?;
        validation::parse_conflict_resolutions(&value)
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: Value,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

// =============================================================================
// Helpers
// =============================================================================

/// Transient failures worth retrying on the same endpoint.
fn is_transient(err: &StudyError) -> bool {
    let StudyError::LlmApi(message) = err else {
        return false;
    };
    let lower = message.to_lowercase();
    ["429", "500", "502", "503", "504"]
        .iter()
        .any(|code| lower.contains(code))
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("deadline")
        || lower.contains("overloaded")
        || lower.contains("network")
        || lower.contains("connection")
}

/// Prefix of `text` at most `max` bytes long, snapped to a char boundary.
fn sample(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn join_capped(items: &[String], cap: usize) -> String {
    items
        .iter()
        .take(cap)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Tests
// =============================================================================
