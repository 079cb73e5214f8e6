//! Per-track search loop.
//!
//! Queries run strictly in order. For each one the orchestrator asks the
//! source for URLs, fetches the ones it has never seen on the shared fetch
//! pool, waits for them with a bounded timeout, scores what arrived and asks
//! the early-exit controller whether to continue.
//!
//! Fetches that miss the timeout are not cancelled. Their results land on the
//! track's channel and are moved into the cache before the next query, so a URL
//! returned again later is scored without a second fetch.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use rayon::ThreadPool;
use rustc_hash::{FxHashMap, FxHashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::MatchConfig;
use crate::early_exit::{EarlyExitController, ExitState, Observation, StopReason};
use crate::mix::{GenericPhrase, MixIntent};
use crate::models::{Candidate, CandidateMetadata, MatchResult, QueryAudit, TrackInput};
use crate::queries::SearchQuery;
use crate::scoring::{ScoringGuard, ScoringState, TrackProfile};
use crate::similarity::SimilarityProvider;
use crate::source::CandidateSource;

type FetchResult = (String, Option<CandidateMetadata>);

/// URL bookkeeping for one track. Never shared with another track.
struct TrackCache {
    /// Fetched metadata by URL; `None` when the page had nothing usable
    fetched: FxHashMap<String, Option<CandidateMetadata>>,
    /// Fetches started but not yet received
    in_flight: FxHashSet<String>,
    /// URLs already scored for this track
    scored: FxHashSet<String>,
    /// Every distinct URL search has returned
    seen: FxHashSet<String>,
    tx: Sender<FetchResult>,
    rx: Receiver<FetchResult>,
}

impl TrackCache {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            fetched: FxHashMap::default(),
            in_flight: FxHashSet::default(),
            scored: FxHashSet::default(),
            seen: FxHashSet::default(),
            tx,
            rx,
        }
    }

    fn store(&mut self, (url, metadata): FetchResult) {
        self.in_flight.remove(&url);
        self.fetched.insert(url, metadata);
    }

    /// Move results of fetches abandoned by earlier queries into the cache.
    fn drain_late(&mut self) -> usize {
        let late: Vec<FetchResult> = self.rx.try_iter().collect();
        let count = late.len();
        for result in late {
            self.store(result);
        }
        count
    }

    /// Block until none of `urls` is in flight or the deadline passes.
    fn wait_for(&mut self, urls: &[String], deadline: Instant) -> bool {
        while urls.iter().any(|u| self.in_flight.contains(u)) {
            match self.rx.recv_deadline(deadline) {
                Ok(result) => self.store(result),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }
}

pub struct MatchOrchestrator<'a> {
    config: &'a MatchConfig,
    source: Arc<dyn CandidateSource>,
    similarity: &'a dyn SimilarityProvider,
    fetch_pool: &'a ThreadPool,
}

impl<'a> MatchOrchestrator<'a> {
    pub fn new(
        config: &'a MatchConfig,
        source: Arc<dyn CandidateSource>,
        similarity: &'a dyn SimilarityProvider,
        fetch_pool: &'a ThreadPool,
    ) -> Self {
        Self {
            config,
            source,
            similarity,
            fetch_pool,
        }
    }

    /// Results requested for a query: fewer for partial-title queries, more
    /// while the track has seen only a handful of distinct URLs.
    pub fn result_count(&self, query: &SearchQuery, distinct_seen: usize) -> usize {
        let base = if query.is_partial_title() {
            self.config.results_ngram
        } else {
            self.config.results_rich
        };
        if distinct_seen < self.config.sparse_url_threshold {
            base.max(self.config.results_sparse)
        } else {
            base
        }
    }

    pub fn find_best_match(
        &self,
        track: &TrackInput,
        intent: &MixIntent,
        phrases: &[GenericPhrase],
        queries: &[SearchQuery],
    ) -> MatchResult {
        let config = self.config;
        let track_start = Instant::now();
        let profile = TrackProfile::new(track, intent, phrases);
        let guard = ScoringGuard::new(config, self.similarity);
        let mut controller = EarlyExitController::new(config, intent, !phrases.is_empty());

        let mut cache = TrackCache::new();
        let mut scoring_state = ScoringState::default();
        let mut candidate_log: Vec<Candidate> = Vec::new();
        let mut query_audit: Vec<QueryAudit> = Vec::new();
        let mut best_idx: Option<usize> = None;
        let mut stop_query_index = 0;
        let mut stop_reason = StopReason::Exhausted;

        for (pos, query) in queries.iter().enumerate() {
            let query_index = pos + 1;
            let query_start = Instant::now();

            let late = cache.drain_late();
            if late > 0 {
                tracing::debug!("[{}] {} late fetches cached before q{}", track.title, late, query_index);
            }

            let max_results = self.result_count(query, cache.seen.len());
            let mut in_query = FxHashSet::default();
            let urls: Vec<String> = self
                .source
                .search(&query.text, max_results)
                .into_iter()
                .filter(|u| in_query.insert(u.clone()))
                .take(config.max_urls_per_query)
                .collect();
            cache.seen.extend(urls.iter().cloned());

            // Keep each URL's 1-based position in the query's result list
            let pending: Vec<(usize, String)> = urls
                .into_iter()
                .enumerate()
                .filter(|(_, u)| !cache.scored.contains(u))
                .map(|(i, u)| (i + 1, u))
                .collect();
            let pending_urls: Vec<String> = pending.iter().map(|(_, u)| u.clone()).collect();
            let mut started = 0;
            for url in &pending_urls {
                if cache.fetched.contains_key(url) || cache.in_flight.contains(url) {
                    continue;
                }
                cache.in_flight.insert(url.clone());
                self.spawn_fetch(url.clone(), cache.tx.clone());
                started += 1;
            }

            let deadline = Instant::now() + Duration::from_millis(config.fetch_batch_timeout_ms);
            if !cache.wait_for(&pending_urls, deadline) {
                let missing = pending_urls.iter().filter(|u| cache.in_flight.contains(*u)).count();
                tracing::warn!(
                    "[{}] q{} fetch timeout after {}ms, {} of {} still pending",
                    track.title,
                    query_index,
                    config.fetch_batch_timeout_ms,
                    missing,
                    pending.len()
                );
            }

            let mut candidate_count = 0;
            for (position, url) in &pending {
                let Some(metadata) = cache.fetched.get(url) else {
                    continue;
                };
                cache.scored.insert(url.clone());

                let mut candidate = match metadata {
                    Some(m) => guard.evaluate(&profile, url, m, &scoring_state),
                    None => Candidate::without_title(url, None),
                };
                candidate.query_index = query_index;
                candidate.candidate_index = *position;
                candidate.elapsed_ms = query_start.elapsed().as_millis() as u64;
                scoring_state.observe(&candidate);

                let improves = candidate.guard_ok
                    && best_idx.map_or(true, |b| candidate.final_score > candidate_log[b].final_score);
                if improves {
                    best_idx = Some(candidate_log.len());
                }
                candidate_log.push(candidate);
                candidate_count += 1;
            }

            let elapsed_ms = query_start.elapsed().as_millis() as u64;
            tracing::debug!(
                "[{}] q{} {:?} '{}': {} new urls, {} fetched, {} scored in {}ms",
                track.title,
                query_index,
                query.kind,
                query.text,
                pending.len(),
                started,
                candidate_count,
                elapsed_ms
            );
            query_audit.push(QueryAudit {
                query_index,
                query_text: query.text.clone(),
                candidate_count,
                elapsed_ms,
                is_winner: false,
                is_stop: false,
            });
            stop_query_index = query_index;

            let best = best_idx.map(|b| &candidate_log[b]);
            let best_from_family_query = best
                .and_then(|b| queries.get(b.query_index.wrapping_sub(1)))
                .is_some_and(|q| q.family_shaped());
            let state = controller.observe(&Observation {
                query_index,
                elapsed: track_start.elapsed(),
                best,
                best_from_family_query,
                current_family_query: query.family_shaped(),
            });
            if let ExitState::Stopped(reason) = state {
                stop_reason = reason;
                if let Some(row) = query_audit.last_mut() {
                    row.is_stop = true;
                }
                break;
            }
        }

        let best = best_idx.map(|b| {
            candidate_log[b].is_winner = true;
            let winner = candidate_log[b].clone();
            if let Some(row) = query_audit.iter_mut().find(|r| r.query_index == winner.query_index) {
                row.is_winner = true;
            }
            winner
        });

        MatchResult {
            best,
            candidate_log,
            query_audit,
            stop_query_index,
            stop_reason,
        }
    }

    fn spawn_fetch(&self, url: String, tx: Sender<FetchResult>) {
        let source = Arc::clone(&self.source);
        self.fetch_pool.spawn(move || {
            // A panicking source still has to release the URL from `in_flight`
            let metadata = match panic::catch_unwind(AssertUnwindSafe(|| source.fetch_metadata(&url))) {
                Ok(metadata) => metadata,
                Err(_) => {
                    tracing::warn!("fetch of {} panicked, treating page as empty", url);
                    None
                }
            };
            // The track may have finished already; its receiver is gone then
            let _ = tx.send((url, metadata));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::QueryKind;
    use crate::similarity::TokenSetRatio;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSource {
        results: FxHashMap<String, Vec<String>>,
        pages: FxHashMap<String, CandidateMetadata>,
        slow: FxHashMap<String, u64>,
        search_delay_ms: FxHashMap<String, u64>,
        panics: FxHashSet<String>,
        fetches: Mutex<FxHashMap<String, usize>>,
    }

    impl FakeSource {
        fn result(mut self, query: &str, urls: &[&str]) -> Self {
            self.results
                .insert(query.to_string(), urls.iter().map(|u| u.to_string()).collect());
            self
        }

        fn page(mut self, url: &str, title: &str, artists: &[&str]) -> Self {
            self.pages.insert(
                url.to_string(),
                CandidateMetadata {
                    title: title.to_string(),
                    artists: artists.iter().map(|a| a.to_string()).collect(),
                    ..Default::default()
                },
            );
            self
        }

        fn fetch_count(&self, url: &str) -> usize {
            self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    impl CandidateSource for FakeSource {
        fn search(&self, query: &str, max_results: usize) -> Vec<String> {
            if let Some(ms) = self.search_delay_ms.get(query) {
                std::thread::sleep(Duration::from_millis(*ms));
            }
            let mut urls = self.results.get(query).cloned().unwrap_or_default();
            urls.truncate(max_results);
            urls
        }

        fn fetch_metadata(&self, url: &str) -> Option<CandidateMetadata> {
            *self.fetches.lock().unwrap().entry(url.to_string()).or_default() += 1;
            if let Some(ms) = self.slow.get(url) {
                std::thread::sleep(Duration::from_millis(*ms));
            }
            if self.panics.contains(url) {
                panic!("page {} exploded", url);
            }
            self.pages.get(url).cloned()
        }
    }

    fn query(text: &str, family: bool) -> SearchQuery {
        SearchQuery {
            text: text.to_string(),
            rank: 0,
            kind: QueryKind::TitleArtist,
            full_title: family,
            artist_count: 1,
            mix_hint: false,
            phrase_hint: false,
        }
    }

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap()
    }

    fn run(config: &MatchConfig, source: Arc<FakeSource>, title: &str, artist: &str, queries: &[SearchQuery]) -> MatchResult {
        let pool = pool();
        let sim = TokenSetRatio;
        let orchestrator = MatchOrchestrator::new(config, source, &sim, &pool);
        let track = TrackInput::new(title, artist);
        orchestrator.find_best_match(&track, &MixIntent::parse(title), &crate::mix::generic_phrases(title), queries)
    }

    fn run_all() -> MatchConfig {
        MatchConfig {
            run_all_queries: true,
            ..MatchConfig::default()
        }
    }

    #[test]
    fn test_each_url_fetched_once() {
        let source = Arc::new(
            FakeSource::default()
                .result("q1", &["a", "b", "a"])
                .result("q2", &["b", "c"])
                .result("q3", &["a", "c", "d"])
                .page("a", "Never Sleep Again", &["Tim Green"])
                .page("b", "Never Sleep Again (Radio Edit)", &["Tim Green"])
                .page("c", "Something Else", &["Nobody"]),
        );
        let queries = vec![query("q1", true), query("q2", true), query("q3", true)];
        let result = run(&run_all(), Arc::clone(&source), "Never Sleep Again", "Tim Green", &queries);

        for url in ["a", "b", "c", "d"] {
            assert_eq!(source.fetch_count(url), 1, "{}", url);
        }
        let urls: Vec<&str> = result.candidate_log.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "b", "c", "d"]);
        assert_eq!(result.stop_reason, StopReason::Exhausted);
        assert_eq!(result.stop_query_index, 3);
        assert_eq!(result.query_audit.len(), 3);
        assert_eq!(result.query_audit[2].candidate_count, 1);
    }

    #[test]
    fn test_missing_page_logged_as_no_title() {
        let source = Arc::new(FakeSource::default().result("q1", &["gone"]));
        let result = run(&run_all(), source, "Track", "Artist", &[query("q1", true)]);
        assert_eq!(result.candidate_log.len(), 1);
        assert_eq!(result.candidate_log[0].reject_reason, "no_title");
        assert!(result.best.is_none());
    }

    #[test]
    fn test_winner_is_best_accepted() {
        let source = Arc::new(
            FakeSource::default()
                .result("q1", &["radio", "wrong"])
                .result("q2", &["orig"])
                .page("radio", "Never Sleep Again (Radio Edit)", &["Tim Green"])
                .page("wrong", "Never Sleep Again", &["Someone Else Entirely"])
                .page("orig", "Never Sleep Again (Original Mix)", &["Tim Green"]),
        );
        let queries = vec![query("q1", true), query("q2", true)];
        let result = run(&run_all(), source, "Never Sleep Again", "Tim Green", &queries);

        let best = result.best.as_ref().unwrap();
        assert_eq!(best.url, "orig");
        assert!(best.is_winner);
        assert_eq!(best.query_index, 2);
        assert_eq!(result.candidate_log.iter().filter(|c| c.is_winner).count(), 1);
        assert!(result.query_audit[1].is_winner);
        assert!(!result.query_audit[0].is_winner);
    }

    #[test]
    fn test_early_exit_marks_stop_row() {
        let source = Arc::new(
            FakeSource::default()
                .result("q", &["orig"])
                .page("orig", "Never Sleep Again (Original Mix)", &["Tim Green"]),
        );
        let mut queries: Vec<SearchQuery> = (0..10).map(|i| query(&format!("q{}", i), false)).collect();
        queries[0].text = "q".to_string();
        let config = MatchConfig::default();
        let result = run(&config, source, "Never Sleep Again", "Tim Green", &queries);

        assert_eq!(result.stop_reason, StopReason::EarlyExit);
        assert_eq!(result.stop_query_index, config.early_exit_min_queries_default);
        assert!(result.query_audit.last().unwrap().is_stop);
    }

    #[test]
    fn test_result_count_adapts() {
        let config = MatchConfig::default();
        let pool = pool();
        let sim = TokenSetRatio;
        let orchestrator = MatchOrchestrator::new(&config, Arc::new(FakeSource::default()), &sim, &pool);
        let rich = query("q", true);
        let gram = SearchQuery {
            kind: QueryKind::NGram,
            ..query("g", false)
        };
        assert_eq!(orchestrator.result_count(&rich, 0), config.results_sparse);
        assert_eq!(orchestrator.result_count(&rich, 50), config.results_rich);
        assert_eq!(orchestrator.result_count(&gram, 50), config.results_ngram);
    }

    #[test]
    fn test_timed_out_fetch_scored_later_without_refetch() {
        let mut source = FakeSource::default()
            .result("q1", &["slow"])
            .result("q2", &["fast"])
            .result("q3", &["slow", "fast"])
            .page("slow", "Never Sleep Again", &["Tim Green"])
            .page("fast", "Never Sleep Again (Radio Edit)", &["Tim Green"]);
        source.slow.insert("slow".to_string(), 100);
        source.search_delay_ms.insert("q2".to_string(), 200);
        let source = Arc::new(source);

        let config = MatchConfig {
            fetch_batch_timeout_ms: 30,
            ..run_all()
        };
        let queries = vec![query("q1", true), query("q2", true), query("q3", true)];
        let result = run(&config, Arc::clone(&source), "Never Sleep Again", "Tim Green", &queries);

        assert_eq!(source.fetch_count("slow"), 1);
        assert_eq!(result.query_audit[0].candidate_count, 0);
        let slow = result.candidate_log.iter().find(|c| c.url == "slow").unwrap();
        assert_eq!(slow.query_index, 3);
        assert_eq!(result.candidate_log.len(), 2);
    }

    #[test]
    fn test_candidate_index_is_position_in_query_results() {
        let source = Arc::new(
            FakeSource::default()
                .result("q1", &["a"])
                .result("q2", &["a", "b"])
                .page("a", "Never Sleep Again", &["Tim Green"])
                .page("b", "Never Sleep Again (Original Mix)", &["Tim Green"]),
        );
        let queries = vec![query("q1", true), query("q2", true)];
        let result = run(&run_all(), source, "Never Sleep Again", "Tim Green", &queries);

        let b = result.candidate_log.iter().find(|c| c.url == "b").unwrap();
        assert_eq!(b.query_index, 2);
        assert_eq!(b.candidate_index, 2);
    }

    #[test]
    fn test_panicking_fetch_is_released() {
        let mut source = FakeSource::default()
            .result("q1", &["boom"])
            .result("q2", &["boom", "ok"])
            .page("ok", "Never Sleep Again", &["Tim Green"]);
        source.panics.insert("boom".to_string());
        let source = Arc::new(source);

        let config = MatchConfig {
            fetch_batch_timeout_ms: 5_000,
            ..run_all()
        };
        let queries = vec![query("q1", true), query("q2", true)];
        let start = Instant::now();
        let result = run(&config, Arc::clone(&source), "Never Sleep Again", "Tim Green", &queries);

        assert!(start.elapsed() < Duration::from_millis(2_000));
        assert_eq!(source.fetch_count("boom"), 1);
        let boom: Vec<&Candidate> = result.candidate_log.iter().filter(|c| c.url == "boom").collect();
        assert_eq!(boom.len(), 1);
        assert_eq!(boom[0].reject_reason, "no_title");
        assert_eq!(boom[0].query_index, 1);
        assert_eq!(result.best.as_ref().unwrap().url, "ok");
    }
}
