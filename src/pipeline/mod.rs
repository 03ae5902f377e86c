//! Resumable Extraction Pipeline
//!
//! Drives one study-guide run end to end:
//!
//! ```text
//! raw text ──> TextSegmenter ──> ChunkPlanner (with outline)
//!                                      │
//!                  chunk-by-chunk completion calls (sequential)
//!                                      │
//!                CoverageAnalyzer / ConflictClusterer
//!                                      │
//!                         stitch ──> final document
//! ```
//!
//! Execution is single-threaded and cooperative: at most one outstanding
//! completion call, chunks strictly in plan order. A full snapshot is
//! persisted before each completion call starts and after every chunk, so a
//! crash mid-run loses at most the one chunk in flight. Chunks already
//! complete in the snapshot are skipped on resume - the central idempotent
//! resume property.
//!
//! The caller enforces single-writer semantics per session: never trigger a
//! new run while one is in flight for the same session.

pub mod conflict;
pub mod coverage;
pub mod fingerprint;
pub mod planner;
pub mod segmenter;
pub mod state;

pub use conflict::{ConflictClusterer, ConflictResolutionItem, NumberCluster};
pub use coverage::CoverageAnalyzer;
pub use planner::ChunkPlanner;
pub use segmenter::{Segment, TextSegmenter};
pub use state::{PipelineEvent, PipelinePhase, PipelineState};

use tracing::{debug, info, warn};

use crate::ai::client::SharedClient;
use crate::constants::pipeline as pipeline_constants;
use crate::storage::SharedStore;
use crate::types::{
    ChunkPlan, GlossaryEntry, OutlineSection, Result, Session, StudyError,
};

// =============================================================================
// Outcome
// =============================================================================

/// Result of a successful full run (or a successful continue).
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub markdown: String,
    pub glossary_entries: Vec<GlossaryEntry>,
}

// =============================================================================
// Runner
// =============================================================================

/// Orchestrates outlining, chunk extraction, and synthesis for one session.
pub struct ExtractionPipeline {
    client: SharedClient,
    store: SharedStore,
    planner: ChunkPlanner,
}

impl ExtractionPipeline {
    pub fn new(client: SharedClient, store: SharedStore) -> Self {
        Self {
            client,
            store,
            planner: ChunkPlanner::default(),
        }
    }

    /// Override the planner (custom window/overlap sizes).
    pub fn with_planner(mut self, planner: ChunkPlanner) -> Self {
        self.planner = planner;
        self
    }

    // -------------------------------------------------------------------------
    // Entry Points
    // -------------------------------------------------------------------------

    /// Run the full pipeline from scratch for `session`.
    ///
    /// Freezes the input digest, generates the outline, builds the plan,
    /// processes every chunk, and stitches the final document. Any chunk
    /// failure stops progression to stitching but never discards sibling
    /// results; the session keeps a resumable snapshot.
    pub async fn generate(&self, session: &mut Session) -> Result<PipelineOutcome> {
        if session.input_text.trim().is_empty() {
            return Err(StudyError::Planning("input text is empty".into()));
        }

        let digest = fingerprint::compute_digest(&session.input_text);
        session.input_fingerprint = Some(digest.clone());
        let state = PipelineState::default().apply(PipelineEvent::RunStarted { digest });
        self.persist(session, &state).await?;
        info!(session_id = %session.id, "pipeline run started");

        let goal_title = (!session.title.is_empty()).then_some(session.title.as_str());
        let outline = match self
            .client
            .generate_outline(&session.input_text, goal_title, &session.tags)
            .await
        {
            Ok(outline) => outline,
            Err(e) => {
                let message = e.to_string();
                let failed = state.apply(PipelineEvent::PipelineFailed {
                    message: message.clone(),
                });
                self.persist(session, &failed).await?;
                return Err(StudyError::Planning(message));
            }
        };

        let plan = match self.planner.build_plan(&session.input_text, &outline) {
            Ok(plan) => plan,
            Err(e) => {
                let message = e.to_string();
                let failed = state.apply(PipelineEvent::PipelineFailed {
                    message: message.clone(),
                });
                self.persist(session, &failed).await?;
                return Err(StudyError::Planning(message));
            }
        };
        let state = state.apply(PipelineEvent::OutlineReady {
            outline,
            plan: plan.clone(),
        });
        self.persist(session, &state).await?;
        info!(chunks = plan.len(), "outline ready, chunking");

        let (state, failure) = self.run_chunk_plan(session, state, &plan).await?;
        if let Some((chunk_id, message)) = failure {
            return Err(StudyError::ChunkExecution { chunk_id, message });
        }

        self.stitch(session, state).await
    }

    /// Continue a saved pipeline from its latest snapshot.
    ///
    /// Refuses with a fingerprint-mismatch error when the current input no
    /// longer matches the digest frozen at run start - progress from a
    /// different text is never silently mixed in.
    pub async fn continue_run(&self, session: &mut Session) -> Result<PipelineOutcome> {
        let state = self.resumable_state(session)?;
        let plan = self.plan_of(&state)?;

        let (state, failure) = self.run_chunk_plan(session, state, &plan).await?;
        if let Some((chunk_id, message)) = failure {
            return Err(StudyError::ChunkExecution { chunk_id, message });
        }

        self.stitch(session, state).await
    }

    /// Retry everything that previously failed, then stitch.
    ///
    /// Completed chunks are skipped, so this is exactly `continue_run`; the
    /// name exists for the plan-wide "retry failed chunks" affordance.
    pub async fn retry_failed(&self, session: &mut Session) -> Result<PipelineOutcome> {
        self.continue_run(session).await
    }

    /// Re-run exactly one chunk, independent of plan order.
    ///
    /// Applies the same `pending/error -> running -> {complete|error}`
    /// transition as the plan loop, without touching sibling chunks and
    /// without stitching.
    pub async fn run_single_chunk(&self, session: &mut Session, chunk_id: u32) -> Result<()> {
        let state = self.resumable_state(session)?;
        let plan = self.plan_of(&state)?;
        let entry = plan
            .get(chunk_id)
            .ok_or_else(|| StudyError::Session(format!("chunk {} is not in the plan", chunk_id)))?
            .clone();

        let state = state.apply(PipelineEvent::ChunkStarted { chunk_id });
        self.persist(session, &state).await?;

        let focus = focus_sections(&state.outline, &entry.outline_ids);
        let chunk_text = &session.input_text[entry.start..entry.end];
        match self
            .client
            .process_chunk(
                chunk_text,
                entry.chunk_id as usize,
                plan.len(),
                &session.settings,
                &focus,
            )
            .await
        {
            Ok(mut data) => {
                data.chunk_id = entry.chunk_id;
                data.source_start = entry.start;
                data.source_end = entry.end;
                data.covers_outline_ids = entry.outline_ids.clone();
                let state = state.apply(PipelineEvent::ChunkCompleted {
                    chunk_id,
                    result: data,
                });
                self.persist(session, &state).await?;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let state = state.apply(PipelineEvent::ChunkFailed {
                    chunk_id,
                    message: message.clone(),
                });
                self.persist(session, &state).await?;
                Err(StudyError::ChunkExecution { chunk_id, message })
            }
        }
    }

    /// Find a saved session whose unfinished run matches `text`.
    pub async fn find_resumable(&self, text: &str) -> Result<Option<Session>> {
        let digest = fingerprint::compute_digest(text);
        let sessions = self.store.get_all_sessions().await?;
        Ok(sessions.into_iter().find(|s| {
            s.pipeline.as_ref().is_some_and(|p| {
                p.status.is_resumable()
                    && p.raw_input_hash
                        .as_ref()
                        .is_some_and(|h| fingerprint::digests_match(h, &digest))
            })
        }))
    }

    // -------------------------------------------------------------------------
    // Conflicts
    // -------------------------------------------------------------------------

    /// Cluster numeric mentions across chunk results and the final document
    /// and return only the clusters that disagree.
    pub fn detect_conflicts(&self, state: &PipelineState) -> Vec<NumberCluster> {
        let clusterer = ConflictClusterer;
        let mut mentions = Vec::new();
        for result in &state.chunk_results {
            let source = format!("chunk {}", result.chunk_id);
            for fact in &result.numeric_facts {
                mentions.extend(clusterer.extract_mentions(&source, fact));
            }
        }
        if let Some(markdown) = &state.markdown_output {
            mentions.extend(clusterer.extract_highlighted("final", markdown));
        }
        clusterer.conflicts(clusterer.cluster(mentions))
    }

    /// Send true conflicts to the arbitration call.
    ///
    /// Advisory: the returned resolutions are surfaced alongside the
    /// evidence; the clusters handed in are never mutated.
    pub async fn resolve_conflicts(
        &self,
        conflicts: &[NumberCluster],
    ) -> Result<Vec<ConflictResolutionItem>> {
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }
        let evidence = ConflictClusterer::to_evidence(conflicts);
        self.client.resolve_conflict_values(&evidence).await
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Walk the chunk plan in order, skipping chunks already complete.
    ///
    /// One chunk's failure never prevents the remaining entries from being
    /// attempted; the first failure is remembered as the run's aggregate
    /// error. A snapshot is persisted before each completion call and after
    /// every chunk, success or failure.
    async fn run_chunk_plan(
        &self,
        session: &mut Session,
        mut state: PipelineState,
        plan: &ChunkPlan,
    ) -> Result<(PipelineState, Option<(u32, String)>)> {
        let total = plan.len();
        let mut first_failure: Option<(u32, String)> = None;

        for entry in plan.entries() {
            if state
                .chunk_states
                .get(&entry.chunk_id)
                .is_some_and(|s| s.is_done())
            {
                debug!(chunk_id = entry.chunk_id, "chunk already complete, skipping");
                continue;
            }

            state = state.apply(PipelineEvent::ChunkStarted {
                chunk_id: entry.chunk_id,
            });
            self.persist(session, &state).await?;

            let focus = focus_sections(&state.outline, &entry.outline_ids);
            let chunk_text = &session.input_text[entry.start..entry.end];
            match self
                .client
                .process_chunk(
                    chunk_text,
                    entry.chunk_id as usize,
                    total,
                    &session.settings,
                    &focus,
                )
                .await
            {
                Ok(mut data) => {
                    data.chunk_id = entry.chunk_id;
                    data.source_start = entry.start;
                    data.source_end = entry.end;
                    data.covers_outline_ids = entry.outline_ids.clone();
                    state = state.apply(PipelineEvent::ChunkCompleted {
                        chunk_id: entry.chunk_id,
                        result: data,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(chunk_id = entry.chunk_id, error = %message, "chunk failed");
                    if first_failure.is_none() {
                        first_failure = Some((entry.chunk_id, message.clone()));
                    }
                    state = state.apply(PipelineEvent::ChunkFailed {
                        chunk_id: entry.chunk_id,
                        message,
                    });
                }
            }
            // Once any chunk has failed, the run stays in the error phase no
            // matter what later chunks do.
            if let Some((_, message)) = &first_failure
                && state.status != PipelinePhase::Error
            {
                state = state.apply(PipelineEvent::PipelineFailed {
                    message: message.clone(),
                });
            }
            self.persist(session, &state).await?;
        }

        Ok((state, first_failure))
    }

    /// Run the final synthesis pass over all chunk results.
    async fn stitch(&self, session: &mut Session, state: PipelineState) -> Result<PipelineOutcome> {
        let state = state.apply(PipelineEvent::StitchStarted);
        self.persist(session, &state).await?;

        let sample = sample_prefix(&session.input_text, pipeline_constants::STITCH_SAMPLE_CHARS);
        match self
            .client
            .stitch_final_output(&state.outline, &state.chunk_results, &session.settings, sample)
            .await
        {
            Ok(output) => {
                let done = state.apply(PipelineEvent::StitchCompleted {
                    markdown: output.markdown.clone(),
                });
                session.output_markdown = output.markdown.clone();
                session.output = Some(output.clone());
                self.persist(session, &done).await?;
                info!(session_id = %session.id, "pipeline complete");
                Ok(PipelineOutcome {
                    markdown: output.markdown,
                    glossary_entries: output.glossary_entries,
                })
            }
            Err(e) => {
                let message = e.to_string();
                let failed = state.apply(PipelineEvent::PipelineFailed {
                    message: message.clone(),
                });
                self.persist(session, &failed).await?;
                Err(StudyError::Synthesis(message))
            }
        }
    }

    /// Load and guard the saved snapshot for a resume-style operation.
    fn resumable_state(&self, session: &Session) -> Result<PipelineState> {
        let state = session
            .pipeline
            .clone()
            .ok_or_else(|| StudyError::Session("session has no saved pipeline".into()))?;
        let saved = state
            .raw_input_hash
            .clone()
            .ok_or_else(|| StudyError::Session("saved pipeline has no input digest".into()))?;
        let current = fingerprint::compute_digest(&session.input_text);
        if !fingerprint::digests_match(&saved, &current) {
            return Err(StudyError::fingerprint_mismatch(&saved, &current));
        }
        Ok(state)
    }

    fn plan_of(&self, state: &PipelineState) -> Result<ChunkPlan> {
        state
            .plan
            .clone()
            .ok_or_else(|| StudyError::Session("saved pipeline has no chunk plan".into()))
    }

    /// Replace the session's snapshot wholesale and write it through.
    async fn persist(&self, session: &mut Session, state: &PipelineState) -> Result<()> {
        session.pipeline = Some(state.clone());
        self.store.save_session(session).await.map_err(|e| match e {
            StudyError::Persistence(_) => e,
            other => StudyError::Persistence(other.to_string()),
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn focus_sections(outline: &[OutlineSection], ids: &[String]) -> Vec<OutlineSection> {
    outline
        .iter()
        .filter(|s| ids.contains(&s.id))
        .cloned()
        .collect()
}

/// Prefix of `text` at most `max` bytes long, snapped to a char boundary.
fn sample_prefix(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::ai::client::CompletionClient;
    use crate::pipeline::conflict::{ConflictEvidence, ConflictResolutionItem};
    use crate::storage::{MemoryStore, SessionStore};
    use crate::types::{
        ChunkRunStatus, ExtractedChunkData, OutlinePriority, StitchedOutput, StudySettings,
    };

    const FINAL_MARKDOWN: &str = "# Guide\nDose is [[Y]]500 mg[[/Y]] daily.";

    /// Scripted completion client: counts calls, fails on demand.
    struct MockClient {
        outline_sections: usize,
        outline_calls: AtomicUsize,
        chunk_calls: AtomicUsize,
        stitch_calls: AtomicUsize,
        /// chunk id -> remaining scripted failures
        chunk_failures: Mutex<HashMap<u32, usize>>,
        /// remaining scripted stitch failures
        stitch_failures: AtomicUsize,
        /// evidence received by the arbitration call
        seen_evidence: Mutex<Vec<ConflictEvidence>>,
    }

    impl MockClient {
        fn new(outline_sections: usize) -> Self {
            Self {
                outline_sections,
                outline_calls: AtomicUsize::new(0),
                chunk_calls: AtomicUsize::new(0),
                stitch_calls: AtomicUsize::new(0),
                chunk_failures: Mutex::new(HashMap::new()),
                stitch_failures: AtomicUsize::new(0),
                seen_evidence: Mutex::new(Vec::new()),
            }
        }

        fn fail_chunk(self, chunk_id: u32, times: usize) -> Self {
            self.chunk_failures.lock().unwrap().insert(chunk_id, times);
            self
        }

        fn fail_stitch(self, times: usize) -> Self {
            self.stitch_failures.store(times, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl CompletionClient for MockClient {
        async fn generate_outline(
            &self,
            _text: &str,
            _goal_title: Option<&str>,
            _tags: &[String],
        ) -> Result<Vec<OutlineSection>> {
            self.outline_calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..self.outline_sections)
                .map(|i| OutlineSection {
                    id: format!("s{}", i),
                    title: format!("Section {}", i),
                    summary: String::new(),
                    priority: OutlinePriority::Medium,
                })
                .collect())
        }

        async fn process_chunk(
            &self,
            chunk_text: &str,
            chunk_index: usize,
            _total_chunks: usize,
            _settings: &StudySettings,
            _outline_focus: &[OutlineSection],
        ) -> Result<ExtractedChunkData> {
            self.chunk_calls.fetch_add(1, Ordering::SeqCst);
            let chunk_id = chunk_index as u32;
            {
                let mut failures = self.chunk_failures.lock().unwrap();
                if let Some(remaining) = failures.get_mut(&chunk_id)
                    && *remaining > 0
                {
                    *remaining -= 1;
                    return Err(StudyError::LlmApi(format!(
                        "scripted failure for chunk {}",
                        chunk_id
                    )));
                }
            }
            Ok(ExtractedChunkData {
                key_points: vec![format!("point from {} bytes", chunk_text.len())],
                numeric_facts: vec!["loading dose 500 mg daily".into()],
                ..Default::default()
            })
        }

        async fn stitch_final_output(
            &self,
            _outline: &[OutlineSection],
            _chunk_results: &[ExtractedChunkData],
            _settings: &StudySettings,
            _sample: &str,
        ) -> Result<StitchedOutput> {
            self.stitch_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.stitch_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.stitch_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StudyError::LlmApi("scripted stitch failure".into()));
            }
            Ok(StitchedOutput {
                markdown: FINAL_MARKDOWN.to_string(),
                glossary_entries: Vec::new(),
            })
        }

        async fn resolve_conflict_values(
            &self,
            conflicts: &[ConflictEvidence],
        ) -> Result<Vec<ConflictResolutionItem>> {
            self.seen_evidence
                .lock()
                .unwrap()
                .extend(conflicts.iter().cloned());
            Ok(conflicts
                .iter()
                .map(|c| ConflictResolutionItem {
                    context_label: c.context_label.clone(),
                    resolved_value: c.values.first().cloned().unwrap_or_default(),
                    rationale: "first reported value".into(),
                    sources: Vec::new(),
                })
                .collect())
        }
    }

    /// Pipeline over a 3-chunk plan (window 1000 / overlap 50 over 2900 chars).
    fn pipeline_with(client: Arc<MockClient>) -> (ExtractionPipeline, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let shared: SharedStore = store.clone();
        let planner = ChunkPlanner::new(TextSegmenter::new(1_000, 50).unwrap());
        let pipeline = ExtractionPipeline::new(client, shared).with_planner(planner);
        (pipeline, store)
    }

    fn three_chunk_session() -> Session {
        Session::new("Test run", "a".repeat(2_900))
    }

    #[tokio::test]
    async fn test_full_run_success() {
        let client = Arc::new(MockClient::new(3));
        let (pipeline, store) = pipeline_with(client.clone());
        let mut session = three_chunk_session();

        let outcome = pipeline.generate(&mut session).await.unwrap();
        assert_eq!(outcome.markdown, FINAL_MARKDOWN);

        let state = session.pipeline.as_ref().unwrap();
        assert_eq!(state.status, PipelinePhase::Complete);
        assert_eq!(state.total_chunks, 3);
        assert_eq!(state.processed_chunks, 3);
        assert_eq!(client.chunk_calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.stitch_calls.load(Ordering::SeqCst), 1);
        // Every outline section covered by exactly one chunk.
        assert!(state.coverage.values().all(|c| c.covered));
        state.validate().unwrap();

        // The persisted copy matches the in-memory session.
        let stored = store.get_all_sessions().await.unwrap();
        assert_eq!(stored[0].pipeline.as_ref().unwrap().status, PipelinePhase::Complete);
    }

    #[tokio::test]
    async fn test_chunk_failure_does_not_block_siblings() {
        // Scenario: chunk 1 fails once. Chunks 0 and 2 complete, stitching
        // does not run, and their results stay available.
        let client = Arc::new(MockClient::new(3).fail_chunk(1, 1));
        let (pipeline, _store) = pipeline_with(client.clone());
        let mut session = three_chunk_session();

        let err = pipeline.generate(&mut session).await.unwrap_err();
        assert!(matches!(err, StudyError::ChunkExecution { chunk_id: 1, .. }));

        let state = session.pipeline.as_ref().unwrap();
        assert_eq!(state.status, PipelinePhase::Error);
        assert_eq!(state.chunk_states[&0].status, ChunkRunStatus::Complete);
        assert_eq!(state.chunk_states[&1].status, ChunkRunStatus::Error);
        assert_eq!(state.chunk_states[&1].attempts, 1);
        assert!(state.chunk_states[&1].last_error.is_some());
        assert_eq!(state.chunk_states[&2].status, ChunkRunStatus::Complete);
        assert_eq!(state.processed_chunks, 2);
        assert_eq!(state.chunk_results.len(), 2);
        assert_eq!(client.stitch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_continue_retries_only_failed_chunk() {
        let client = Arc::new(MockClient::new(3).fail_chunk(1, 1));
        let (pipeline, _store) = pipeline_with(client.clone());
        let mut session = three_chunk_session();

        pipeline.generate(&mut session).await.unwrap_err();
        assert_eq!(client.chunk_calls.load(Ordering::SeqCst), 3);

        let outcome = pipeline.continue_run(&mut session).await.unwrap();
        assert_eq!(outcome.markdown, FINAL_MARKDOWN);
        // Only chunk 1 re-ran.
        assert_eq!(client.chunk_calls.load(Ordering::SeqCst), 4);
        let state = session.pipeline.as_ref().unwrap();
        assert_eq!(state.status, PipelinePhase::Complete);
        assert_eq!(state.chunk_states[&1].attempts, 2);
    }

    #[tokio::test]
    async fn test_idempotent_resume_issues_no_chunk_calls() {
        // All chunks complete, stitch fails once: continuing re-runs only
        // the stitch and returns identical chunk results.
        let client = Arc::new(MockClient::new(3).fail_stitch(1));
        let (pipeline, _store) = pipeline_with(client.clone());
        let mut session = three_chunk_session();

        let err = pipeline.generate(&mut session).await.unwrap_err();
        assert!(matches!(err, StudyError::Synthesis(_)));
        assert_eq!(client.chunk_calls.load(Ordering::SeqCst), 3);
        let results_before = session.pipeline.as_ref().unwrap().chunk_results.clone();
        assert_eq!(results_before.len(), 3);

        let outcome = pipeline.continue_run(&mut session).await.unwrap();
        assert_eq!(outcome.markdown, FINAL_MARKDOWN);
        assert_eq!(client.chunk_calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.stitch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            session.pipeline.as_ref().unwrap().chunk_results,
            results_before
        );
    }

    #[tokio::test]
    async fn test_continue_refuses_changed_input() {
        let client = Arc::new(MockClient::new(3).fail_chunk(1, 1));
        let (pipeline, _store) = pipeline_with(client.clone());
        let mut session = three_chunk_session();
        pipeline.generate(&mut session).await.unwrap_err();

        session.input_text.push_str("extra text appended after the fact");
        let err = pipeline.continue_run(&mut session).await.unwrap_err();
        assert!(matches!(err, StudyError::FingerprintMismatch { .. }));
        // No further completion calls were made.
        assert_eq!(client.chunk_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_single_chunk_retry() {
        let client = Arc::new(MockClient::new(3).fail_chunk(1, 2));
        let (pipeline, _store) = pipeline_with(client.clone());
        let mut session = three_chunk_session();

        pipeline.generate(&mut session).await.unwrap_err();

        // Second scripted failure: the single-chunk rerun fails again.
        let err = pipeline.run_single_chunk(&mut session, 1).await.unwrap_err();
        assert!(matches!(err, StudyError::ChunkExecution { chunk_id: 1, .. }));
        let state = session.pipeline.as_ref().unwrap();
        assert_eq!(state.chunk_states[&1].attempts, 2);
        // Siblings untouched by the rerun.
        assert_eq!(state.chunk_states[&0].attempts, 1);

        // Third attempt succeeds without re-running chunks 0 and 2.
        pipeline.run_single_chunk(&mut session, 1).await.unwrap();
        let state = session.pipeline.as_ref().unwrap();
        assert_eq!(state.chunk_states[&1].status, ChunkRunStatus::Complete);
        assert_eq!(state.chunk_states[&1].attempts, 3);
        assert_eq!(state.processed_chunks, 3);
        assert_eq!(client.chunk_calls.load(Ordering::SeqCst), 5);

        // A plan-wide continue now only stitches.
        pipeline.retry_failed(&mut session).await.unwrap();
        assert_eq!(client.chunk_calls.load(Ordering::SeqCst), 5);
        assert_eq!(client.stitch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_single_chunk_unknown_id() {
        let client = Arc::new(MockClient::new(3).fail_chunk(1, 1));
        let (pipeline, _store) = pipeline_with(client.clone());
        let mut session = three_chunk_session();
        pipeline.generate(&mut session).await.unwrap_err();

        let err = pipeline.run_single_chunk(&mut session, 99).await.unwrap_err();
        assert!(matches!(err, StudyError::Session(_)));
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let client = Arc::new(MockClient::new(1));
        let (pipeline, _store) = pipeline_with(client);
        let mut session = Session::new("Empty", "   ");
        let err = pipeline.generate(&mut session).await.unwrap_err();
        assert!(matches!(err, StudyError::Planning(_)));
    }

    #[tokio::test]
    async fn test_find_resumable_matches_digest() {
        let client = Arc::new(MockClient::new(3).fail_chunk(1, 1));
        let (pipeline, _store) = pipeline_with(client);
        let mut session = three_chunk_session();
        pipeline.generate(&mut session).await.unwrap_err();

        let found = pipeline
            .find_resumable(&session.input_text)
            .await
            .unwrap()
            .expect("errored run should be resumable");
        assert_eq!(found.id, session.id);

        assert!(pipeline.find_resumable("different text").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completed_run_not_offered_for_resume() {
        let client = Arc::new(MockClient::new(3));
        let (pipeline, _store) = pipeline_with(client);
        let mut session = three_chunk_session();
        pipeline.generate(&mut session).await.unwrap();

        assert!(
            pipeline
                .find_resumable(&session.input_text)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_conflict_detection_and_advisory_resolution() {
        // Scenario: two chunks disagree on the same labeled quantity; the
        // arbitration call returns items keyed by the cluster labels and
        // never mutates the evidence it was given.
        let client = Arc::new(MockClient::new(2));
        let (pipeline, _store) = pipeline_with(client.clone());

        let state = PipelineState::default()
            .apply(PipelineEvent::ChunkCompleted {
                chunk_id: 0,
                result: ExtractedChunkData {
                    chunk_id: 0,
                    numeric_facts: vec!["loading dose 500 mg daily".into()],
                    ..Default::default()
                },
            })
            .apply(PipelineEvent::ChunkCompleted {
                chunk_id: 1,
                result: ExtractedChunkData {
                    chunk_id: 1,
                    numeric_facts: vec!["loading dose 750 mg daily".into()],
                    ..Default::default()
                },
            });

        let conflicts = pipeline.detect_conflicts(&state);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].values.len(), 2);
        let before = conflicts.clone();

        let resolutions = pipeline.resolve_conflicts(&conflicts).await.unwrap();
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].context_label, conflicts[0].label);
        // Original evidence untouched.
        assert_eq!(conflicts, before);
        let seen = client.seen_evidence.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].context_label, conflicts[0].label);
    }

    #[tokio::test]
    async fn test_resolve_conflicts_empty_is_noop() {
        let client = Arc::new(MockClient::new(1));
        let (pipeline, _store) = pipeline_with(client.clone());
        let resolutions = pipeline.resolve_conflicts(&[]).await.unwrap();
        assert!(resolutions.is_empty());
        assert!(client.seen_evidence.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_persisted_before_each_completion_call() {
        // A chunk failure must leave the pre-call running snapshot behind:
        // after the failed run, the stored attempts count reflects the
        // attempt that was in flight.
        let client = Arc::new(MockClient::new(3).fail_chunk(2, 1));
        let (pipeline, store) = pipeline_with(client);
        let mut session = three_chunk_session();
        pipeline.generate(&mut session).await.unwrap_err();

        let stored = store.get_all_sessions().await.unwrap();
        let state = stored[0].pipeline.as_ref().unwrap();
        assert_eq!(state.chunk_states[&2].attempts, 1);
        assert_eq!(state.chunk_states[&2].status, ChunkRunStatus::Error);
    }
}
