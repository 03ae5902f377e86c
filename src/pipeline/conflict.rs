//! Numeric Conflict Detection
//!
//! Detects when the same real-world quantity is reported with disagreeing
//! numeric values across chunk extractions and/or the final document.
//!
//! Mentions are clustered by `(normalized label, kind, unit)` rather than
//! raw text proximity: a dose in mg must never collide with a duration in
//! hours just because they sit near each other in the text. A cluster is a
//! true conflict only when it holds more than one distinct normalized value;
//! the same value reported by several chunks is agreement, not conflict.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::conflict::{LABEL_WINDOW_CHARS, MAX_LABEL_CHARS};

/// Numeric value with optional unit token, e.g. `500 mg`, `7.5%`, `48h`
fn mention_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<num>\d+(?:[.,]\d+)?)\s*(?P<unit>%|[A-Za-zµ]+)?").unwrap()
    })
}

/// Digit runs, masked out of labels so the value itself never keys a cluster
fn digit_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)?").unwrap())
}

/// Anything that is not a letter or the mask character
fn label_noise_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{L}#]+").unwrap())
}

// =============================================================================
// Mention Model
// =============================================================================

/// Classified kind of a numeric mention
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Dose,
    Duration,
    Percentage,
    Length,
    Age,
    Count,
    #[default]
    Other,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Dose => "dose",
            ValueKind::Duration => "duration",
            ValueKind::Percentage => "percentage",
            ValueKind::Length => "length",
            ValueKind::Age => "age",
            ValueKind::Count => "count",
            ValueKind::Other => "other",
        }
    }
}

/// One numeric mention lifted from a recorded source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericMention {
    /// Value as it appeared, e.g. `500 mg`
    pub raw_value: String,
    /// Whitespace/dash/decimal-separator-normalized value, e.g. `500`
    pub normalized_value: String,
    /// Canonical unit after synonym mapping, e.g. `mg`
    pub unit: Option<String>,
    pub kind: ValueKind,
    /// Short masked phrase around the number; the cluster key component
    pub label: String,
    /// Which source reported it, e.g. `chunk 2` or `final`
    pub source: String,
    /// Raw context around the mention, for display
    pub snippet: String,
}

// =============================================================================
// Clusters
// =============================================================================

/// One distinct value within a cluster with everywhere it was reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterValue {
    pub normalized_value: String,
    pub display_value: String,
    pub sources: Vec<String>,
    pub snippets: Vec<String>,
}

/// Mentions sharing `(label, kind, unit)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberCluster {
    pub key: String,
    pub label: String,
    pub kind: ValueKind,
    pub unit: Option<String>,
    pub values: Vec<ClusterValue>,
}

impl NumberCluster {
    /// True conflict: more than one distinct normalized value.
    pub fn is_conflict(&self) -> bool {
        self.values.len() > 1
    }
}

// =============================================================================
// Arbitration Contracts
// =============================================================================

/// Evidence handed to the external arbitration call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEvidence {
    pub context_label: String,
    pub values: Vec<String>,
    pub snippets: Vec<ConflictSnippet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSnippet {
    pub value: String,
    pub context: String,
    pub source: String,
}

/// One reconciled value returned by arbitration.
///
/// Advisory only: surfaced alongside, never substituted into, the original
/// evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolutionItem {
    pub context_label: String,
    pub resolved_value: String,
    pub rationale: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

// =============================================================================
// Clusterer
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictClusterer;

impl ConflictClusterer {
    /// Extract every numeric mention from one source text.
    pub fn extract_mentions(&self, source: &str, text: &str) -> Vec<NumericMention> {
        mention_pattern()
            .captures_iter(text)
            .filter_map(|caps| {
                let num = caps.name("num")?;
                let unit_token = caps.name("unit").map(|m| m.as_str());
                let unit = unit_token.and_then(canonical_unit);

                // A trailing word that is not a known unit is context, not a
                // unit; the mention is the bare number.
                let raw_value = match (unit_token, &unit) {
                    (Some(tok), Some(_)) => format!("{} {}", num.as_str(), tok),
                    _ => num.as_str().to_string(),
                };

                let snippet = context_window(text, num.start(), num.end());
                let kind = classify_kind(unit.as_deref(), &snippet, num.as_str());

                Some(NumericMention {
                    raw_value,
                    normalized_value: normalize_number(num.as_str()),
                    unit: unit.map(str::to_string),
                    kind,
                    label: build_label(&snippet),
                    source: source.to_string(),
                    snippet,
                })
            })
            .collect()
    }

    /// Extract mentions from the number-highlight spans (`[[Y]]…[[/Y]]`) of
    /// the final document. Other marker vocabulary is stripped before label
    /// windows are taken, so markers never leak into cluster keys.
    pub fn extract_highlighted(&self, source: &str, markdown: &str) -> Vec<NumericMention> {
        let (clean, ranges) = strip_markers(markdown);
        let mut mentions = Vec::new();
        for mention in self.extract_mentions(source, &clean) {
            // Keep only mentions whose number sits inside a highlight span.
            if ranges.iter().any(|r| {
                clean[r.0..r.1].contains(mention.raw_value.as_str())
                    || clean[r.0..r.1].contains(mention.normalized_value.as_str())
            }) {
                mentions.push(mention);
            }
        }
        mentions
    }

    /// Group mentions into clusters keyed by `(label, kind, unit)` and
    /// deduplicate within each cluster by normalized value.
    pub fn cluster(&self, mentions: Vec<NumericMention>) -> Vec<NumberCluster> {
        let mut clusters: BTreeMap<String, NumberCluster> = BTreeMap::new();

        for mention in mentions {
            if mention.label.is_empty() {
                continue;
            }
            let key = format!(
                "{}|{}|{}",
                mention.label,
                mention.kind.as_str(),
                mention.unit.as_deref().unwrap_or("-")
            );
            let cluster = clusters.entry(key.clone()).or_insert_with(|| NumberCluster {
                key,
                label: mention.label.clone(),
                kind: mention.kind,
                unit: mention.unit.clone(),
                values: Vec::new(),
            });

            match cluster
                .values
                .iter_mut()
                .find(|v| v.normalized_value == mention.normalized_value)
            {
                Some(value) => {
                    if !value.sources.contains(&mention.source) {
                        value.sources.push(mention.source);
                    }
                    value.snippets.push(mention.snippet);
                }
                None => cluster.values.push(ClusterValue {
                    normalized_value: mention.normalized_value,
                    display_value: mention.raw_value,
                    sources: vec![mention.source],
                    snippets: vec![mention.snippet],
                }),
            }
        }

        clusters.into_values().collect()
    }

    /// Only the clusters that actually disagree.
    pub fn conflicts(&self, clusters: Vec<NumberCluster>) -> Vec<NumberCluster> {
        clusters.into_iter().filter(NumberCluster::is_conflict).collect()
    }

    /// Build arbitration evidence from clusters without consuming them.
    pub fn to_evidence(clusters: &[NumberCluster]) -> Vec<ConflictEvidence> {
        clusters
            .iter()
            .map(|c| ConflictEvidence {
                context_label: c.label.clone(),
                values: c.values.iter().map(|v| v.display_value.clone()).collect(),
                snippets: c
                    .values
                    .iter()
                    .flat_map(|v| {
                        v.sources.iter().zip(v.snippets.iter()).map(|(s, ctx)| {
                            ConflictSnippet {
                                value: v.display_value.clone(),
                                context: ctx.clone(),
                                source: s.clone(),
                            }
                        })
                    })
                    .collect(),
            })
            .collect()
    }
}

// =============================================================================
// Normalization Helpers
// =============================================================================

/// Map a unit token through the synonym table to its canonical form.
fn canonical_unit(token: &str) -> Option<&'static str> {
    let lower = token.to_lowercase();
    let canonical = match lower.as_str() {
        "mg" | "milligram" | "milligrams" => "mg",
        "g" | "gram" | "grams" => "g",
        "mcg" | "µg" | "ug" | "microgram" | "micrograms" => "mcg",
        "kg" | "kilogram" | "kilograms" => "kg",
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => "ml",
        "l" | "liter" | "liters" | "litre" | "litres" => "l",
        "iu" | "unit" | "units" => "iu",
        "%" | "percent" | "pct" => "%",
        "s" | "sec" | "secs" | "second" | "seconds" => "s",
        "min" | "mins" | "minute" | "minutes" => "min",
        "h" | "hr" | "hrs" | "hour" | "hours" => "h",
        "d" | "day" | "days" => "d",
        "wk" | "wks" | "week" | "weeks" => "wk",
        "mo" | "month" | "months" => "mo",
        "y" | "yr" | "yrs" | "year" | "years" => "y",
        "mm" => "mm",
        "cm" => "cm",
        "m" | "meter" | "meters" | "metre" | "metres" => "m",
        "km" => "km",
        "bpm" => "bpm",
        "mmhg" => "mmhg",
        _ => return None,
    };
    Some(canonical)
}

/// Classify the mention kind from its unit and surrounding keywords.
fn classify_kind(unit: Option<&str>, context: &str, number: &str) -> ValueKind {
    let lower = context.to_lowercase();
    let age_context = lower.contains("age")
        || lower.contains("aged")
        || lower.contains("year-old")
        || lower.contains("years old");

    match unit {
        Some("%") => ValueKind::Percentage,
        Some("mg" | "g" | "mcg" | "ml" | "l" | "iu") => ValueKind::Dose,
        Some("s" | "min" | "h" | "d" | "wk" | "mo") => ValueKind::Duration,
        Some("y") => {
            if age_context {
                ValueKind::Age
            } else {
                ValueKind::Duration
            }
        }
        Some("mm" | "cm" | "m" | "km") => ValueKind::Length,
        Some(_) => ValueKind::Other,
        None => {
            if age_context {
                ValueKind::Age
            } else if !number.contains(['.', ',']) {
                ValueKind::Count
            } else {
                ValueKind::Other
            }
        }
    }
}

/// Normalize a numeric literal for equality comparison.
///
/// Strips whitespace and dashes, unifies the decimal separator, and drops
/// redundant trailing zeros (`500,0` == `500.0` == `500`).
fn normalize_number(raw: &str) -> String {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '–')
        .collect();

    if cleaned.contains(',') {
        // `1,500` is a thousands separator; `1,5` is a decimal comma.
        let is_thousands = cleaned
            .split(',')
            .skip(1)
            .all(|part| part.len() == 3 && part.chars().all(|c| c.is_ascii_digit()))
            && !cleaned.contains('.');
        if is_thousands {
            cleaned = cleaned.replace(',', "");
        } else {
            cleaned = cleaned.replace(',', ".");
        }
    }

    match cleaned.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 => format!("{}", value as i64),
        Ok(value) => format!("{}", value),
        Err(_) => cleaned,
    }
}

/// Short masked phrase around a number: digits masked, case folded,
/// punctuation collapsed, truncated.
fn build_label(snippet: &str) -> String {
    let masked = digit_pattern().replace_all(snippet, "#");
    let folded = masked.to_lowercase();
    let collapsed = label_noise_pattern().replace_all(&folded, " ");
    let trimmed = collapsed.trim();
    trimmed.chars().take(MAX_LABEL_CHARS).collect::<String>().trim().to_string()
}

/// Raw context window around `[start, end)`, snapped to char boundaries.
fn context_window(text: &str, start: usize, end: usize) -> String {
    let mut lo = start.saturating_sub(LABEL_WINDOW_CHARS);
    while !text.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = (end + LABEL_WINDOW_CHARS).min(text.len());
    while !text.is_char_boundary(hi) {
        hi += 1;
    }
    text[lo..hi].to_string()
}

/// Remove the highlight marker vocabulary from a document, returning the
/// clean text plus the `[start, end)` ranges that were inside `[[Y]]` spans.
fn strip_markers(markdown: &str) -> (String, Vec<(usize, usize)>) {
    const MARKERS: [&str; 8] = [
        "[[Y]]", "[[/Y]]", "[[R]]", "[[/R]]", "[[B]]", "[[/B]]", "[[EXTRA]]", "[[/EXTRA]]",
    ];

    let mut clean = String::with_capacity(markdown.len());
    let mut ranges = Vec::new();
    let mut span_start: Option<usize> = None;
    let mut rest = markdown;

    while !rest.is_empty() {
        let next = MARKERS
            .iter()
            .filter_map(|m| rest.find(m).map(|pos| (pos, *m)))
            .min_by_key(|(pos, _)| *pos);

        match next {
            Some((pos, marker)) => {
                clean.push_str(&rest[..pos]);
                match marker {
                    "[[Y]]" => span_start = Some(clean.len()),
                    "[[/Y]]" => {
                        if let Some(start) = span_start.take() {
                            ranges.push((start, clean.len()));
                        }
                    }
                    _ => {}
                }
                rest = &rest[pos + marker.len()..];
            }
            None => {
                clean.push_str(rest);
                break;
            }
        }
    }

    (clean, ranges)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing_variants_normalize_to_one_value() {
        let clusterer = ConflictClusterer;
        let a = clusterer.extract_mentions("chunk 0", "loading dose 500 mg daily");
        let b = clusterer.extract_mentions("chunk 1", "loading dose 500mg daily");
        assert_eq!(a[0].normalized_value, b[0].normalized_value);
        assert_eq!(a[0].unit.as_deref(), Some("mg"));
        assert_eq!(b[0].unit.as_deref(), Some("mg"));

        let clusters = clusterer.cluster([a, b].concat());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].values.len(), 1);
        assert!(!clusters[0].is_conflict());
        // Agreement still accumulates both sources.
        assert_eq!(clusters[0].values[0].sources.len(), 2);
    }

    #[test]
    fn test_disagreeing_values_form_conflict() {
        let clusterer = ConflictClusterer;
        let mentions = [
            clusterer.extract_mentions("chunk 0", "loading dose 500 mg daily"),
            clusterer.extract_mentions("chunk 2", "loading dose 750 mg daily"),
        ]
        .concat();
        let conflicts = clusterer.conflicts(clusterer.cluster(mentions));
        assert_eq!(conflicts.len(), 1);
        let values: Vec<&str> = conflicts[0]
            .values
            .iter()
            .map(|v| v.normalized_value.as_str())
            .collect();
        assert_eq!(values, vec!["500", "750"]);
    }

    #[test]
    fn test_dose_and_duration_never_collide() {
        let clusterer = ConflictClusterer;
        let mentions =
            clusterer.extract_mentions("chunk 0", "give 500 mg then wait 500 h before rechecking");
        let clusters = clusterer.cluster(mentions);
        assert!(clusters.len() >= 2);
        assert!(clusters.iter().all(|c| !c.is_conflict()));
        let kinds: Vec<ValueKind> = clusters.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ValueKind::Dose));
        assert!(kinds.contains(&ValueKind::Duration));
    }

    #[test]
    fn test_unit_synonyms_map_to_canonical() {
        let clusterer = ConflictClusterer;
        let a = clusterer.extract_mentions("chunk 0", "infuse over 2 hours slowly");
        let b = clusterer.extract_mentions("chunk 1", "infuse over 2 hr slowly");
        assert_eq!(a[0].unit.as_deref(), Some("h"));
        assert_eq!(b[0].unit.as_deref(), Some("h"));
    }

    #[test]
    fn test_percentage_classification() {
        let clusterer = ConflictClusterer;
        let mentions = clusterer.extract_mentions("chunk 0", "sensitivity of 95% overall");
        assert_eq!(mentions[0].kind, ValueKind::Percentage);
        assert_eq!(mentions[0].unit.as_deref(), Some("%"));
    }

    #[test]
    fn test_age_keyword_overrides_year_duration() {
        let clusterer = ConflictClusterer;
        let mentions = clusterer.extract_mentions("chunk 0", "patients aged 65 years or older");
        assert_eq!(mentions[0].kind, ValueKind::Age);
    }

    #[test]
    fn test_unknown_trailing_word_is_not_a_unit() {
        let clusterer = ConflictClusterer;
        let mentions = clusterer.extract_mentions("chunk 0", "enrolled 120 patients in total");
        assert_eq!(mentions[0].unit, None);
        assert_eq!(mentions[0].kind, ValueKind::Count);
        assert_eq!(mentions[0].raw_value, "120");
    }

    #[test]
    fn test_normalize_number_separators() {
        assert_eq!(normalize_number("1,5"), "1.5");
        assert_eq!(normalize_number("1.5"), "1.5");
        assert_eq!(normalize_number("1,500"), "1500");
        assert_eq!(normalize_number("500.0"), "500");
        assert_eq!(normalize_number("500"), "500");
    }

    #[test]
    fn test_label_masks_the_number() {
        let clusterer = ConflictClusterer;
        let mentions = clusterer.extract_mentions("chunk 0", "target pressure 120 mmhg at rest");
        assert!(mentions[0].label.contains('#'));
        assert!(!mentions[0].label.contains("120"));
    }

    #[test]
    fn test_highlight_spans_only() {
        let clusterer = ConflictClusterer;
        let markdown = "Give [[Y]]500 mg[[/Y]] now; see page 12 for details.";
        let mentions = clusterer.extract_highlighted("final", markdown);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].normalized_value, "500");
        // The label window must not contain marker residue.
        assert!(!mentions[0].label.contains("[["));
    }

    #[test]
    fn test_evidence_built_without_consuming_clusters() {
        let clusterer = ConflictClusterer;
        let mentions = [
            clusterer.extract_mentions("chunk 0", "loading dose 500 mg daily"),
            clusterer.extract_mentions("chunk 1", "loading dose 750 mg daily"),
        ]
        .concat();
        let conflicts = clusterer.conflicts(clusterer.cluster(mentions));
        let before = conflicts.clone();
        let evidence = ConflictClusterer::to_evidence(&conflicts);
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].values.len(), 2);
        // Evidence construction never mutates the original clusters.
        assert_eq!(conflicts, before);
    }
}
