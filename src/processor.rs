//! Caller-facing entry point.
//!
//! A [`Processor`] owns the validated configuration, the collaborators and two
//! rayon pools: one for candidate fetches (shared by every track) and one for
//! running tracks side by side. Tracks share nothing mutable.

use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use std::time::Instant;

use crate::config::MatchConfig;
use crate::matcher::MatchOrchestrator;
use crate::mix::{generic_phrases, MixIntent};
use crate::models::{MatchResult, MatchSummary, MatchingStats, TrackInput, TrackOutcome};
use crate::queries::QueryGenerator;
use crate::similarity::SimilarityProvider;
use crate::source::CandidateSource;

/// Outcome of one track plus the full audit trail behind it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrackReport {
    pub track_index: usize,
    pub input: TrackInput,
    pub outcome: TrackOutcome,
    pub result: MatchResult,
}

pub struct Processor {
    config: MatchConfig,
    source: Arc<dyn CandidateSource>,
    similarity: Arc<dyn SimilarityProvider>,
    fetch_pool: ThreadPool,
    track_pool: ThreadPool,
}

impl Processor {
    /// Validates the configuration and builds the worker pools.
    pub fn new(
        config: MatchConfig,
        source: Arc<dyn CandidateSource>,
        similarity: Arc<dyn SimilarityProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let fetch_pool = ThreadPoolBuilder::new()
            .num_threads(config.fetch_workers)
            .thread_name(|i| format!("mixmatch-fetch-{}", i))
            .build()
            .context("Failed to build fetch pool")?;
        let track_pool = ThreadPoolBuilder::new()
            .num_threads(config.track_workers)
            .thread_name(|i| format!("mixmatch-track-{}", i))
            .build()
            .context("Failed to build track pool")?;
        Ok(Self {
            config,
            source,
            similarity,
            fetch_pool,
            track_pool,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Match one track. Never fails: anything short of a confident match is `NoMatch`.
    pub fn process_track(&self, track_index: usize, track: &TrackInput) -> TrackReport {
        let start = Instant::now();
        let intent = MixIntent::parse(&track.title);
        let phrases = generic_phrases(&track.title);
        let queries = QueryGenerator::new(&self.config).generate(&track.title, &track.artist, &track.title);

        let orchestrator = MatchOrchestrator::new(
            &self.config,
            Arc::clone(&self.source),
            self.similarity.as_ref(),
            &self.fetch_pool,
        );
        let result = orchestrator.find_best_match(track, &intent, &phrases, &queries);
        let outcome = self.outcome(track_index, &result);

        match &outcome {
            TrackOutcome::Matched(summary) => tracing::info!(
                "#{} '{}' - '{}' → {} (score {:.1}, q{}/{}, {}, {:.1}s)",
                track_index,
                track.artist,
                track.title,
                summary.url,
                summary.score,
                result.stop_query_index,
                queries.len(),
                result.stop_reason.as_str(),
                start.elapsed().as_secs_f64()
            ),
            TrackOutcome::NoMatch { best_score, .. } => tracing::info!(
                "#{} '{}' - '{}' → no match (best {:?}, q{}/{}, {}, {:.1}s)",
                track_index,
                track.artist,
                track.title,
                best_score,
                result.stop_query_index,
                queries.len(),
                result.stop_reason.as_str(),
                start.elapsed().as_secs_f64()
            ),
        }

        TrackReport {
            track_index,
            input: track.clone(),
            outcome,
            result,
        }
    }

    fn outcome(&self, track_index: usize, result: &MatchResult) -> TrackOutcome {
        match &result.best {
            Some(best) if best.final_score >= self.config.min_accept_score => {
                TrackOutcome::Matched(MatchSummary::from_candidate(track_index, best))
            }
            best => TrackOutcome::NoMatch {
                track_index,
                best_score: best.as_ref().map(|b| b.final_score),
            },
        }
    }

    /// Match tracks concurrently on the track pool. Reports come back in input
    /// order; `on_done` is called as each track finishes, from worker threads.
    pub fn process_all<F>(&self, tracks: &[TrackInput], on_done: F) -> (Vec<TrackReport>, MatchingStats)
    where
        F: Fn(&TrackReport) + Sync,
    {
        let start = Instant::now();
        let reports: Vec<TrackReport> = self.track_pool.install(|| {
            tracks
                .par_iter()
                .enumerate()
                .map(|(i, track)| {
                    let report = self.process_track(i, track);
                    on_done(&report);
                    report
                })
                .collect()
        });

        let mut stats = MatchingStats::default();
        for report in &reports {
            stats.record(&report.result, &report.outcome);
        }
        stats.elapsed_seconds = start.elapsed().as_secs_f64();
        (reports, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandidateMetadata;
    use crate::similarity::TokenSetRatio;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Every query returns the same single page.
    struct OnePage(CandidateMetadata);

    impl CandidateSource for OnePage {
        fn search(&self, _query: &str, _max_results: usize) -> Vec<String> {
            vec!["/only".to_string()]
        }

        fn fetch_metadata(&self, _url: &str) -> Option<CandidateMetadata> {
            Some(self.0.clone())
        }
    }

    fn processor(title: &str, artists: &[&str]) -> Processor {
        let page = CandidateMetadata {
            title: title.to_string(),
            artists: artists.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        };
        Processor::new(MatchConfig::default(), Arc::new(OnePage(page)), Arc::new(TokenSetRatio)).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MatchConfig {
            title_weight: 2.0,
            ..MatchConfig::default()
        };
        let err = Processor::new(config, Arc::new(OnePage(CandidateMetadata::default())), Arc::new(TokenSetRatio))
            .err()
            .unwrap();
        assert!(err.to_string().contains("title_weight"));
    }

    #[test]
    fn test_match_and_no_match() {
        let p = processor("Never Sleep Again (Original Mix)", &["Tim Green"]);
        let report = p.process_track(7, &TrackInput::new("Never Sleep Again", "Tim Green"));
        match &report.outcome {
            TrackOutcome::Matched(summary) => {
                assert_eq!(summary.track_index, 7);
                assert_eq!(summary.url, "/only");
                assert!(summary.score >= 90.0);
            }
            other => panic!("expected match, got {:?}", other),
        }

        let report = p.process_track(8, &TrackInput::new("Completely Different Song", "Someone"));
        assert!(!report.outcome.is_match());
    }

    #[test]
    fn test_process_all_keeps_order_and_counts() {
        let p = processor("Never Sleep Again (Original Mix)", &["Tim Green"]);
        let tracks = vec![
            TrackInput::new("Never Sleep Again", "Tim Green"),
            TrackInput::new("Nothing Alike", "Nobody"),
            TrackInput::new("Never Sleep Again (Original Mix)", "Tim Green"),
        ];
        let done = AtomicUsize::new(0);
        let (reports, stats) = p.process_all(&tracks, |_| {
            done.fetch_add(1, Ordering::Relaxed);
        });

        assert_eq!(done.load(Ordering::Relaxed), 3);
        let indices: Vec<usize> = reports.iter().map(|r| r.track_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(stats.total_tracks, 3);
        assert_eq!(stats.matched, 2);
        assert_eq!(stats.no_match, 1);
    }
}
