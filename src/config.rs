//! Matching configuration.
//!
//! One immutable, flat struct holds every tunable: scoring weights, guard
//! floors, bonus magnitudes, query generation switches, retrieval sizes and
//! early-exit gates. It is built once (defaults, a flat JSON object, or
//! `key=value` pairs), validated, and then passed by reference everywhere.
//!
//! The scoring constants are empirically tuned defaults, not derived values.
//! Change them against recorded match outcomes, not by reasoning alone.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config value `{key}` must be {expected}, got {value}")]
    OutOfRange {
        key: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("config value `{cap}` ({cap_value}) is below `{gate}` ({gate_value}); raise the cap or lower the gate")]
    GateAboveCap {
        cap: &'static str,
        cap_value: usize,
        gate: &'static str,
        gate_value: usize,
    },

    #[error("malformed config pair `{0}`, expected key=value")]
    MalformedPair(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    // ------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------
    pub title_weight: f64,
    pub artist_weight: f64,
    /// Below this final score the processor reports "no match".
    pub min_accept_score: f64,

    /// Fraction of the input's significant title tokens the candidate must cover.
    pub title_coverage_floor: f64,
    pub coverage_relax_title_sim: u8,
    pub coverage_relax_artist_sim: u8,
    /// Titles with one or two significant tokens need at least this title similarity.
    pub short_title_min_sim: u8,

    /// Artist similarity that satisfies the artist floor without token overlap.
    pub artist_min_sim: u8,
    /// Title similarity that overrides a low artist similarity.
    pub artist_override_title_sim: u8,
    /// Tiered title floors, lowered as artist similarity rises.
    pub artist_strong_sim: u8,
    pub artist_medium_sim: u8,
    pub title_floor_strong_artist: u8,
    pub title_floor_medium_artist: u8,
    pub title_floor_weak_artist: u8,

    /// Original/Extended request accepts a remix only above both of these.
    pub remix_override_title_sim: u8,
    pub remix_override_artist_sim: u8,
    /// Original/Extended request accepts edit/radio/club/vip/dub only above this (both sims).
    pub alt_mix_near_exact_sim: u8,

    pub year_exact_bonus: i32,
    pub year_near_bonus: i32,
    pub key_exact_bonus: i32,
    pub key_near_bonus: i32,

    pub mix_match_bonus: i32,
    pub mix_compatible_bonus: i32,
    pub alt_mix_penalty: i32,
    pub remix_mismatch_penalty: i32,
    /// Scaled by the fraction of requested remixer tokens the candidate carries.
    pub remixer_overlap_bonus: i32,

    pub generic_phrase_bonus: i32,
    pub generic_phrase_missing_penalty: i32,
    pub special_intent_bonus: i32,
    pub special_intent_missing_penalty: i32,

    // ------------------------------------------------------------------
    // Query generation
    // ------------------------------------------------------------------
    pub max_queries: usize,
    pub reverse_remix_hints: bool,
    pub priority_reverse: bool,
    /// Every query must carry the full title and at least one artist.
    pub require_artist: bool,
    /// Disables n-gram queries.
    pub full_title_artist_only: bool,
    pub ngram_max: usize,
    pub ngram_prefix_only: bool,
    pub exhaustive_enabled: bool,
    pub exhaustive_min_words: usize,
    pub exhaustive_max_words: usize,
    pub exhaustive_max_combos: usize,
    /// Artist tokens considered when building ordered subsets.
    pub max_artist_subset_tokens: usize,

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------
    pub results_ngram: usize,
    pub results_rich: usize,
    pub results_sparse: usize,
    /// While fewer distinct URLs than this have been seen, ask for `results_sparse`.
    pub sparse_url_threshold: usize,
    pub max_urls_per_query: usize,
    pub fetch_workers: usize,
    pub fetch_batch_timeout_ms: u64,
    pub track_workers: usize,

    // ------------------------------------------------------------------
    // Early exit
    // ------------------------------------------------------------------
    pub remix_max_queries: usize,
    pub time_budget_ms: u64,
    pub run_all_queries: bool,

    pub early_exit_score: f64,
    pub early_exit_min_queries_original: usize,
    pub early_exit_min_queries_default: usize,
    pub early_exit_min_queries_remix: usize,

    pub family_exit_score: f64,
    pub family_min_queries_original: usize,
    pub family_min_queries_default: usize,
    pub family_min_queries_remix: usize,

    pub remix_exit_score: f64,
    pub remix_exit_min_queries: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            title_weight: 0.55,
            artist_weight: 0.45,
            min_accept_score: 70.0,

            title_coverage_floor: 0.6,
            coverage_relax_title_sim: 95,
            coverage_relax_artist_sim: 95,
            short_title_min_sim: 90,

            artist_min_sim: 60,
            artist_override_title_sim: 97,
            artist_strong_sim: 90,
            artist_medium_sim: 70,
            title_floor_strong_artist: 60,
            title_floor_medium_artist: 70,
            title_floor_weak_artist: 80,

            remix_override_title_sim: 98,
            remix_override_artist_sim: 98,
            alt_mix_near_exact_sim: 98,

            year_exact_bonus: 2,
            year_near_bonus: 1,
            key_exact_bonus: 2,
            key_near_bonus: 1,

            mix_match_bonus: 4,
            mix_compatible_bonus: 2,
            alt_mix_penalty: 4,
            remix_mismatch_penalty: 6,
            remixer_overlap_bonus: 4,

            generic_phrase_bonus: 12,
            generic_phrase_missing_penalty: 6,
            special_intent_bonus: 5,
            special_intent_missing_penalty: 3,

            max_queries: 40,
            reverse_remix_hints: true,
            priority_reverse: true,
            require_artist: false,
            full_title_artist_only: true,
            ngram_max: 3,
            ngram_prefix_only: true,
            exhaustive_enabled: false,
            exhaustive_min_words: 2,
            exhaustive_max_words: 4,
            exhaustive_max_combos: 64,
            max_artist_subset_tokens: 4,

            results_ngram: 10,
            results_rich: 20,
            results_sparse: 30,
            sparse_url_threshold: 5,
            max_urls_per_query: 12,
            fetch_workers: 8,
            fetch_batch_timeout_ms: 8_000,
            track_workers: 4,

            remix_max_queries: 30,
            time_budget_ms: 45_000,
            run_all_queries: false,

            early_exit_score: 90.0,
            early_exit_min_queries_original: 2,
            early_exit_min_queries_default: 4,
            early_exit_min_queries_remix: 6,

            family_exit_score: 85.0,
            family_min_queries_original: 3,
            family_min_queries_default: 5,
            family_min_queries_remix: 8,

            remix_exit_score: 92.0,
            remix_exit_min_queries: 6,
        }
    }
}

impl MatchConfig {
    /// Load from a flat JSON object. Missing keys keep their defaults; unknown keys are rejected.
    pub fn from_flat_json(json: &str) -> Result<Self, ConfigError> {
        let config: MatchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_flat_json(&text)
    }

    /// Build from `key=value` strings. Values are read as JSON scalars
    /// (`true`, `12`, `0.5`), falling back to plain strings.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pairs: Vec<S> = pairs.into_iter().collect();
        let map = Self::pairs_to_map(&pairs)?;
        let config: MatchConfig = serde_json::from_value(Value::Object(map))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `key=value` overrides on top of this configuration.
    pub fn with_overrides<S: AsRef<str>>(&self, pairs: &[S]) -> Result<Self, ConfigError> {
        let mut base = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let overrides = Self::pairs_to_map(pairs)?;
        base.extend(overrides);
        let config: MatchConfig = serde_json::from_value(Value::Object(base))?;
        config.validate()?;
        Ok(config)
    }

    fn pairs_to_map<S: AsRef<str>>(pairs: &[S]) -> Result<Map<String, Value>, ConfigError> {
        let mut map = Map::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedPair(pair.to_string()))?;
            let value = serde_json::from_str::<Value>(raw.trim())
                .unwrap_or_else(|_| Value::String(raw.trim().to_string()));
            map.insert(key.trim().to_string(), value);
        }
        Ok(map)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("title_weight", self.title_weight)?;
        check_unit("artist_weight", self.artist_weight)?;
        let weight_sum = self.title_weight + self.artist_weight;
        if (weight_sum - 1.0).abs() > 0.01 {
            return Err(ConfigError::OutOfRange {
                key: "title_weight + artist_weight",
                expected: "1.0 (within 0.01)",
                value: format!("{:.3}", weight_sum),
            });
        }
        check_unit("title_coverage_floor", self.title_coverage_floor)?;
        check_score("min_accept_score", self.min_accept_score)?;
        check_score("early_exit_score", self.early_exit_score)?;
        check_score("family_exit_score", self.family_exit_score)?;
        check_score("remix_exit_score", self.remix_exit_score)?;

        for (key, value) in [
            ("coverage_relax_title_sim", self.coverage_relax_title_sim),
            ("coverage_relax_artist_sim", self.coverage_relax_artist_sim),
            ("short_title_min_sim", self.short_title_min_sim),
            ("artist_min_sim", self.artist_min_sim),
            ("artist_override_title_sim", self.artist_override_title_sim),
            ("artist_strong_sim", self.artist_strong_sim),
            ("artist_medium_sim", self.artist_medium_sim),
            ("title_floor_strong_artist", self.title_floor_strong_artist),
            ("title_floor_medium_artist", self.title_floor_medium_artist),
            ("title_floor_weak_artist", self.title_floor_weak_artist),
            ("remix_override_title_sim", self.remix_override_title_sim),
            ("remix_override_artist_sim", self.remix_override_artist_sim),
            ("alt_mix_near_exact_sim", self.alt_mix_near_exact_sim),
        ] {
            if value > 100 {
                return Err(ConfigError::OutOfRange {
                    key,
                    expected: "a similarity between 0 and 100",
                    value: value.to_string(),
                });
            }
        }

        for (key, value) in [
            ("max_queries", self.max_queries),
            ("remix_max_queries", self.remix_max_queries),
            ("fetch_workers", self.fetch_workers),
            ("track_workers", self.track_workers),
            ("max_urls_per_query", self.max_urls_per_query),
            ("results_ngram", self.results_ngram),
            ("results_rich", self.results_rich),
            ("results_sparse", self.results_sparse),
        ] {
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    key,
                    expected: "at least 1",
                    value: "0".to_string(),
                });
            }
        }

        if self.exhaustive_enabled && self.exhaustive_min_words > self.exhaustive_max_words {
            return Err(ConfigError::OutOfRange {
                key: "exhaustive_min_words",
                expected: "no greater than exhaustive_max_words",
                value: self.exhaustive_min_words.to_string(),
            });
        }

        let gates = [
            ("early_exit_min_queries_original", self.early_exit_min_queries_original),
            ("early_exit_min_queries_default", self.early_exit_min_queries_default),
            ("family_min_queries_original", self.family_min_queries_original),
            ("family_min_queries_default", self.family_min_queries_default),
        ];
        for (gate, gate_value) in gates {
            if gate_value > self.max_queries {
                return Err(ConfigError::GateAboveCap {
                    cap: "max_queries",
                    cap_value: self.max_queries,
                    gate,
                    gate_value,
                });
            }
        }
        let remix_cap = self.max_queries.min(self.remix_max_queries);
        let remix_gates = [
            ("early_exit_min_queries_remix", self.early_exit_min_queries_remix),
            ("family_min_queries_remix", self.family_min_queries_remix),
            ("remix_exit_min_queries", self.remix_exit_min_queries),
        ];
        for (gate, gate_value) in remix_gates {
            if gate_value > remix_cap {
                return Err(ConfigError::GateAboveCap {
                    cap: "remix_max_queries",
                    cap_value: remix_cap,
                    gate,
                    gate_value,
                });
            }
        }

        Ok(())
    }
}

fn check_unit(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key,
            expected: "a number between 0.0 and 1.0",
            value: value.to_string(),
        })
    }
}

fn check_score(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key,
            expected: "a finite, non-negative score",
            value: value.to_string(),
        })
    }
}
