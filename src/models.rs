//! Core data models for track matching.
//!
//! Inputs from the caller, parsed catalog metadata, scored candidates, the
//! per-track match result and the caller-facing summary.

use serde::{Deserialize, Serialize};

use crate::early_exit::StopReason;

// ============================================================================
// Input
// ============================================================================

/// One playlist row to match.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrackInput {
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub key: Option<String>,
}

impl TrackInput {
    pub fn new(title: &str, artist: &str) -> Self {
        Self {
            title: title.to_string(),
            artist: artist.to_string(),
            year: None,
            key: None,
        }
    }
}

// ============================================================================
// Catalog Models
// ============================================================================

/// Track metadata parsed from one catalog page.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetadata {
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub bpm: Option<f32>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub release_name: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub release_year: Option<i32>,
}

// ============================================================================
// Scored Candidates
// ============================================================================

/// One evaluated candidate. Entries are appended to the per-track log and
/// never changed afterwards, except `is_winner` at finalization.
#[derive(Clone, Debug, Serialize)]
pub struct Candidate {
    pub url: String,
    #[serde(flatten)]
    pub metadata: CandidateMetadata,

    pub title_sim: u8,
    pub artist_sim: u8,
    pub base_score: f64,
    pub bonus_year: i32,
    pub bonus_key: i32,
    pub mix_bonus: i32,
    pub phrase_bonus: i32,
    pub special_bonus: i32,
    /// Sum of all terms, clamped at 0
    pub final_score: f64,

    pub guard_ok: bool,
    /// Empty when accepted
    pub reject_reason: String,
    /// Candidate mix type is compatible with the requested one (no mismatch penalty)
    pub mix_compatible: bool,
    /// Candidate carries one of the input's generic phrases
    pub phrase_matched: bool,

    pub query_index: usize,
    pub candidate_index: usize,
    pub elapsed_ms: u64,
    pub is_winner: bool,
}

impl Candidate {
    /// Log entry for a page that yielded no parseable title.
    pub fn without_title(url: &str, metadata: Option<CandidateMetadata>) -> Self {
        Self {
            url: url.to_string(),
            metadata: metadata.unwrap_or_default(),
            title_sim: 0,
            artist_sim: 0,
            base_score: 0.0,
            bonus_year: 0,
            bonus_key: 0,
            mix_bonus: 0,
            phrase_bonus: 0,
            special_bonus: 0,
            final_score: 0.0,
            guard_ok: false,
            reject_reason: "no_title".to_string(),
            mix_compatible: false,
            phrase_matched: false,
            query_index: 0,
            candidate_index: 0,
            elapsed_ms: 0,
            is_winner: false,
        }
    }
}

/// One row per processed query.
#[derive(Clone, Debug, Serialize)]
pub struct QueryAudit {
    pub query_index: usize,
    pub query_text: String,
    pub candidate_count: usize,
    pub elapsed_ms: u64,
    pub is_winner: bool,
    pub is_stop: bool,
}

/// Everything one track's search produced.
#[derive(Clone, Debug, Serialize)]
pub struct MatchResult {
    pub best: Option<Candidate>,
    pub candidate_log: Vec<Candidate>,
    pub query_audit: Vec<QueryAudit>,
    /// Last query index processed (1-based), 0 when no query ran
    pub stop_query_index: usize,
    pub stop_reason: StopReason,
}

// ============================================================================
// Output Models
// ============================================================================

/// Caller-facing description of an accepted match.
#[derive(Clone, Debug, Serialize)]
pub struct MatchSummary {
    pub track_index: usize,
    pub url: String,
    pub title: String,
    pub artists: Vec<String>,
    pub key: Option<String>,
    pub bpm: Option<f32>,
    pub label: Option<String>,
    pub genre: Option<String>,
    pub release_name: Option<String>,
    pub release_date: Option<String>,
    pub release_year: Option<i32>,
    pub score: f64,
    pub title_sim: u8,
    pub artist_sim: u8,
    pub query_index: usize,
    pub candidate_index: usize,
}

impl MatchSummary {
    pub fn from_candidate(track_index: usize, candidate: &Candidate) -> Self {
        let m = &candidate.metadata;
        Self {
            track_index,
            url: candidate.url.clone(),
            title: m.title.clone(),
            artists: m.artists.clone(),
            key: m.key.clone(),
            bpm: m.bpm,
            label: m.label.clone(),
            genre: m.genre.clone(),
            release_name: m.release_name.clone(),
            release_date: m.release_date.clone(),
            release_year: m.release_year,
            score: candidate.final_score,
            title_sim: candidate.title_sim,
            artist_sim: candidate.artist_sim,
            query_index: candidate.query_index,
            candidate_index: candidate.candidate_index,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrackOutcome {
    Matched(MatchSummary),
    NoMatch {
        track_index: usize,
        /// Best accepted score, if any candidate passed the guards
        best_score: Option<f64>,
    },
}

impl TrackOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, TrackOutcome::Matched(_))
    }
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Aggregate counters over a batch of tracks.
#[derive(Default, Debug, Clone, Serialize)]
pub struct MatchingStats {
    pub total_tracks: usize,
    pub matched: usize,
    pub no_match: usize,
    /// Accepted best candidate scored under min_accept_score
    pub below_accept_score: usize,

    pub queries_run: usize,
    pub candidates_scored: usize,
    pub candidates_rejected: usize,
    pub candidates_without_title: usize,

    // Why each track's search stopped
    pub stop_query_cap: usize,
    pub stop_time_budget: usize,
    pub stop_remix_confidence: usize,
    pub stop_family_consensus: usize,
    pub stop_early_exit: usize,
    pub stop_exhausted: usize,

    pub elapsed_seconds: f64,
}

impl MatchingStats {
    /// Calculate match rate as a percentage
    pub fn match_rate(&self) -> f64 {
        if self.total_tracks == 0 {
            0.0
        } else {
            100.0 * self.matched as f64 / self.total_tracks as f64
        }
    }

    /// Fold one track's result into the counters.
    pub fn record(&mut self, result: &MatchResult, outcome: &TrackOutcome) {
        self.total_tracks += 1;
        match outcome {
            TrackOutcome::Matched(_) => self.matched += 1,
            TrackOutcome::NoMatch { best_score, .. } => {
                self.no_match += 1;
                if best_score.is_some() {
                    self.below_accept_score += 1;
                }
            }
        }

        self.queries_run += result.query_audit.len();
        self.candidates_scored += result.candidate_log.len();
        for candidate in &result.candidate_log {
            if !candidate.guard_ok {
                self.candidates_rejected += 1;
            }
            if candidate.reject_reason == "no_title" {
                self.candidates_without_title += 1;
            }
        }

        match result.stop_reason {
            StopReason::QueryCap | StopReason::RemixQueryCap => self.stop_query_cap += 1,
            StopReason::TimeBudget => self.stop_time_budget += 1,
            StopReason::RemixConfidence => self.stop_remix_confidence += 1,
            StopReason::FamilyConsensus => self.stop_family_consensus += 1,
            StopReason::EarlyExit => self.stop_early_exit += 1,
            StopReason::Exhausted => self.stop_exhausted += 1,
        }
    }

    /// Log stats as pretty JSON
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            tracing::info!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
