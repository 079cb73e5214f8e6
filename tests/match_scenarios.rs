//! End-to-end matching scenarios through the full pipeline:
//! parse → generate queries → search/fetch → score → early exit.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use mixmatch::catalog::{CatalogEntry, SqliteCatalog};
use mixmatch::config::MatchConfig;
use mixmatch::models::{CandidateMetadata, TrackInput, TrackOutcome};
use mixmatch::processor::{Processor, TrackReport};
use mixmatch::scoring::{REJECT_ORIGINAL_GOT_ALT_MIX, REJECT_ORIGINAL_GOT_REMIX, REJECT_REMIX_GOT_ORIGINAL};
use mixmatch::similarity::TokenSetRatio;
use mixmatch::source::CandidateSource;

/// Returns every page for every query and counts fetches per URL.
#[derive(Default)]
struct PoolSource {
    pages: Vec<(String, CandidateMetadata)>,
    fetches: Mutex<FxHashMap<String, usize>>,
}

impl PoolSource {
    fn with(pages: &[(&str, &str, &[&str])]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, title, artists)| {
                    (
                        url.to_string(),
                        CandidateMetadata {
                            title: title.to_string(),
                            artists: artists.iter().map(|a| a.to_string()).collect(),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
            fetches: Mutex::new(FxHashMap::default()),
        }
    }

    fn max_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().copied().max().unwrap_or(0)
    }
}

impl CandidateSource for PoolSource {
    fn search(&self, _query: &str, max_results: usize) -> Vec<String> {
        self.pages.iter().take(max_results).map(|(url, _)| url.clone()).collect()
    }

    fn fetch_metadata(&self, url: &str) -> Option<CandidateMetadata> {
        *self.fetches.lock().unwrap().entry(url.to_string()).or_default() += 1;
        self.pages.iter().find(|(u, _)| u == url).map(|(_, m)| m.clone())
    }
}

fn run(config: MatchConfig, source: Arc<PoolSource>, title: &str, artist: &str) -> TrackReport {
    let processor = Processor::new(config, source, Arc::new(TokenSetRatio)).unwrap();
    processor.process_track(0, &TrackInput::new(title, artist))
}

#[test]
fn exact_original_mix_is_accepted() {
    let source = Arc::new(PoolSource::with(&[
        ("/other", "Never Let Go", &["Someone Else"]),
        ("/nsa", "Never Sleep Again (Original Mix)", &["Tim Green"]),
    ]));
    let report = run(MatchConfig::default(), Arc::clone(&source), "Never Sleep Again", "Tim Green");

    let best = report.result.best.as_ref().expect("a best candidate");
    assert_eq!(best.url, "/nsa");
    assert_eq!(best.title_sim, 100);
    assert_eq!(best.artist_sim, 100);
    assert!(best.guard_ok);
    assert!(best.final_score >= 90.0);
    assert!(best.is_winner);
    assert!(report.outcome.is_match());
    assert!(source.max_fetches() <= 1);
}

#[test]
fn generic_phrase_candidate_beats_plain() {
    let config = MatchConfig::default();
    let phrase_bonus = config.generic_phrase_bonus as f64;
    let source = Arc::new(PoolSource::with(&[
        ("/a", "Burn For You", &["Tim Green"]),
        ("/b", "Burn For You (Ivory Re-fire)", &["Tim Green"]),
    ]));
    let report = run(config, Arc::clone(&source), "Burn For You (Ivory Re-fire)", "Tim Green");

    let log = &report.result.candidate_log;
    let a = log.iter().find(|c| c.url == "/a").unwrap();
    let b = log.iter().find(|c| c.url == "/b").unwrap();
    assert!(b.final_score - a.final_score >= phrase_bonus);
    assert_eq!(report.result.best.as_ref().unwrap().url, "/b");
    assert!(b.is_winner);
    assert!(!a.is_winner);
}

#[test]
fn extended_remix_satisfies_remix_request() {
    let source = Arc::new(PoolSource::with(&[(
        "/cola",
        "Cola (CamelPhat Extended Remix)",
        &["Elderbrook", "CamelPhat"],
    )]));
    let report = run(MatchConfig::default(), source, "Cola (CamelPhat Remix)", "Elderbrook");

    let candidate = &report.result.candidate_log[0];
    assert!(candidate.guard_ok, "rejected as {}", candidate.reject_reason);
    assert!(candidate.reject_reason.is_empty());
    assert_eq!(report.result.best.as_ref().unwrap().url, "/cola");
}

#[test]
fn original_mix_rejected_for_remix_request() {
    let source = Arc::new(PoolSource::with(&[(
        "/gravity",
        "Gravity (Original Mix)",
        &["Producer"],
    )]));
    let report = run(MatchConfig::default(), Arc::clone(&source), "Gravity (Artist Remix)", "Producer");

    let candidate = &report.result.candidate_log[0];
    assert!(!candidate.guard_ok);
    assert_eq!(candidate.reject_reason, REJECT_REMIX_GOT_ORIGINAL);
    assert!(report.result.best.is_none());
    assert!(matches!(report.outcome, TrackOutcome::NoMatch { best_score: None, .. }));
    assert_eq!(report.result.candidate_log.len(), 1);
    assert_eq!(source.max_fetches(), 1);
}

#[test]
fn original_request_rejects_same_artist_remix_and_radio_edit() {
    let source = Arc::new(PoolSource::with(&[
        ("/remix", "Opus (Four Tet Remix)", &["Eric Prydz", "Four Tet"]),
        ("/radio", "Opus (Radio Edit)", &["Eric Prydz"]),
    ]));
    let report = run(MatchConfig::default(), Arc::clone(&source), "Opus (Original Mix)", "Eric Prydz");

    let log = &report.result.candidate_log;
    let remix = log.iter().find(|c| c.url == "/remix").unwrap();
    let radio = log.iter().find(|c| c.url == "/radio").unwrap();
    assert_eq!(remix.artist_sim, 100);
    assert_eq!(remix.reject_reason, REJECT_ORIGINAL_GOT_REMIX);
    assert_eq!(radio.reject_reason, REJECT_ORIGINAL_GOT_ALT_MIX);
    assert!(report.result.best.is_none());
    assert!(!report.outcome.is_match());
    assert_eq!(source.max_fetches(), 1);
}

#[test]
fn extended_request_rejects_club_mix() {
    let source = Arc::new(PoolSource::with(&[("/club", "Opus (Club Mix)", &["Eric Prydz"])]));
    let report = run(MatchConfig::default(), source, "Opus (Extended Mix)", "Eric Prydz");

    assert_eq!(report.result.candidate_log[0].reject_reason, REJECT_ORIGINAL_GOT_ALT_MIX);
    assert!(report.result.best.is_none());
}

#[test]
fn every_url_fetched_at_most_once_per_track() {
    let config = MatchConfig {
        run_all_queries: true,
        ..MatchConfig::default()
    };
    let source = Arc::new(PoolSource::with(&[
        ("/1", "Cola (Original Mix)", &["CamelPhat", "Elderbrook"]),
        ("/2", "Cola (Mason Maynard Remix)", &["Elderbrook", "Mason Maynard"]),
        ("/3", "Cola (CamelPhat Extended Remix)", &["Elderbrook", "CamelPhat"]),
        ("/4", "Coca", &["Somebody"]),
    ]));
    let report = run(config, Arc::clone(&source), "Cola (CamelPhat Remix)", "Elderbrook");

    assert!(report.result.query_audit.len() > 1);
    assert_eq!(source.max_fetches(), 1);
    assert_eq!(report.result.candidate_log.len(), 4);
    assert_eq!(report.result.best.as_ref().unwrap().url, "/3");
}

#[test]
fn sqlite_catalog_end_to_end() {
    let catalog = SqliteCatalog::open_in_memory().unwrap();
    let entry = |url: &str, title: &str, mix: &str, artists: &[&str]| CatalogEntry {
        url: url.to_string(),
        title: title.to_string(),
        mix_name: Some(mix.to_string()),
        artists: artists.iter().map(|a| a.to_string()).collect(),
        ..Default::default()
    };
    catalog
        .insert(&[
            entry("/t/1", "Cola", "Original Mix", &["CamelPhat", "Elderbrook"]),
            entry("/t/2", "Cola", "CamelPhat Extended Remix", &["Elderbrook", "CamelPhat"]),
            entry("/t/3", "Never Sleep Again", "Original Mix", &["Tim Green"]),
        ])
        .unwrap();

    let processor = Processor::new(MatchConfig::default(), Arc::new(catalog), Arc::new(TokenSetRatio)).unwrap();
    let tracks = vec![
        TrackInput::new("Cola (CamelPhat Remix)", "Elderbrook"),
        TrackInput::new("Never Sleep Again", "Tim Green"),
        TrackInput::new("Unknown Song", "Unknown Artist"),
    ];
    let (reports, stats) = processor.process_all(&tracks, |_| {});

    let urls: Vec<Option<&str>> = reports
        .iter()
        .map(|r| match &r.outcome {
            TrackOutcome::Matched(summary) => Some(summary.url.as_str()),
            TrackOutcome::NoMatch { .. } => None,
        })
        .collect();
    assert_eq!(urls, vec![Some("/t/2"), Some("/t/3"), None]);
    assert_eq!(stats.matched, 2);
    assert_eq!(stats.total_tracks, 3);
}
