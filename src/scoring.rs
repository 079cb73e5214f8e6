//! Candidate scoring and guard rules.
//!
//! Every fetched candidate gets a composite score:
//! - weighted title/artist similarity (`base_score`)
//! - year and musical-key bonuses
//! - a mix bonus for matching (or penalty for mismatching) the requested variant
//! - a generic-phrase bonus ("Ivory Re-fire" style markers)
//! - a refire/rework bonus
//!
//! Independently, a chain of guards decides whether the candidate may be
//! selected at all. The first failing guard names the reject reason. Scores are
//! always computed, so rejected candidates remain useful in the audit log.
//!
//! Guard thresholds on title similarity are all "at least X passes", so raising
//! `title_sim` can never turn an accepted candidate into a rejected one.

use rustc_hash::FxHashSet;

use crate::config::MatchConfig;
use crate::keys::{compare_keys, KeyRelation};
use crate::mix::{title_has_refire, title_has_rework, GenericPhrase, MixIntent, SpecialIntent};
use crate::models::{Candidate, CandidateMetadata, TrackInput};
use crate::normalize::{core_title, fold_text, normalize_artist, sanitize_title, significant_tokens, split_artists, tokens};
use crate::similarity::SimilarityProvider;

// ============================================================================
// Reject Reasons
// ============================================================================

pub const REJECT_SHORT_TITLE: &str = "short_title_low_sim";
pub const REJECT_LOW_COVERAGE: &str = "low_title_coverage";
pub const REJECT_TITLE_SUBSET: &str = "title_subset";
pub const REJECT_ARTIST_MISMATCH: &str = "artist_mismatch";
pub const REJECT_TITLE_FLOOR: &str = "title_below_floor";
pub const REJECT_ORIGINAL_GOT_REMIX: &str = "wanted_original_got_remix";
pub const REJECT_ORIGINAL_GOT_ALT_MIX: &str = "wanted_original_got_alt_mix";
pub const REJECT_REMIX_GOT_ORIGINAL: &str = "wanted_remix_got_original";
pub const REJECT_REMIXER_MISMATCH: &str = "remixer_mismatch";

// ============================================================================
// Track Profile
// ============================================================================

/// Everything about the input track the scorer needs, computed once per track.
#[derive(Debug, Clone)]
pub struct TrackProfile {
    pub raw_title: String,
    /// Folded title without brackets, featured artists or mix suffix
    pub core_title: String,
    /// Folded title with its mix text kept
    pub full_title: String,
    pub title_tokens: Vec<String>,
    pub artists: Vec<String>,
    /// `normalize_artist` form of each artist
    pub artist_keys: FxHashSet<String>,
    pub intent: MixIntent,
    pub phrases: Vec<GenericPhrase>,
    pub special: SpecialIntent,
    pub year: Option<i32>,
    pub key: Option<String>,
}

impl TrackProfile {
    pub fn new(track: &TrackInput, intent: &MixIntent, phrases: &[GenericPhrase]) -> Self {
        let artists = split_artists(&track.artist);
        let artist_keys = artists
            .iter()
            .map(|a| normalize_artist(a))
            .filter(|a| !a.is_empty())
            .collect();
        Self {
            raw_title: track.title.clone(),
            core_title: core_title(&track.title),
            full_title: fold_text(&track.title),
            title_tokens: significant_tokens(&sanitize_title(&track.title)),
            artists,
            artist_keys,
            intent: intent.clone(),
            phrases: phrases.to_vec(),
            special: SpecialIntent::from_phrases(phrases),
            year: track.year,
            key: track.key.clone(),
        }
    }

    /// No artist to anchor on: the artist-floor guard is skipped.
    pub fn title_only(&self) -> bool {
        self.artists.is_empty()
    }
}

/// Per-track scoring memory, owned by the orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringState {
    /// Some candidate has already carried one of the input's generic phrases.
    pub phrase_seen: bool,
}

impl ScoringState {
    pub fn observe(&mut self, candidate: &Candidate) {
        self.phrase_seen |= candidate.phrase_matched;
    }
}

// ============================================================================
// Guards
// ============================================================================

/// The facts guard decisions are based on, separated from how they are computed.
#[derive(Debug, Clone)]
pub struct GuardFacts<'a> {
    /// Core-title similarity
    pub title_sim: u8,
    /// Similarity of the folded titles including mix text. Only the variant
    /// overrides read it, so a differently mixed same-title track is never near-exact.
    pub full_title_sim: u8,
    pub artist_sim: u8,
    /// Number of significant tokens in the input title
    pub significant_count: usize,
    /// Fraction of those tokens found in the candidate title
    pub coverage: f64,
    /// Candidate's significant tokens are a strict subset of the input's
    pub title_subset: bool,
    pub title_only: bool,
    /// Input and candidate share an artist, or the candidate is a remix by an input artist
    pub artist_anchor: bool,
    /// Requested remixer tokens appear in the candidate title or artists
    pub remixer_overlap: bool,
    pub input: &'a MixIntent,
    pub candidate: &'a MixIntent,
}

/// Apply the guard chain. Returns the first failing reason code.
pub fn check_guards(facts: &GuardFacts, config: &MatchConfig) -> Result<(), &'static str> {
    let title_sim = facts.title_sim;
    let artist_sim = facts.artist_sim;

    if (1..=2).contains(&facts.significant_count) && title_sim < config.short_title_min_sim {
        return Err(REJECT_SHORT_TITLE);
    }

    let coverage_relaxed =
        title_sim >= config.coverage_relax_title_sim || artist_sim >= config.coverage_relax_artist_sim;
    if facts.coverage < config.title_coverage_floor && !coverage_relaxed {
        return Err(REJECT_LOW_COVERAGE);
    }

    if facts.title_subset {
        return Err(REJECT_TITLE_SUBSET);
    }

    if !facts.title_only
        && !facts.artist_anchor
        && artist_sim < config.artist_min_sim
        && title_sim < config.artist_override_title_sim
    {
        return Err(REJECT_ARTIST_MISMATCH);
    }

    let title_floor = if artist_sim >= config.artist_strong_sim {
        config.title_floor_strong_artist
    } else if artist_sim >= config.artist_medium_sim {
        config.title_floor_medium_artist
    } else {
        config.title_floor_weak_artist
    };
    if title_sim < title_floor {
        return Err(REJECT_TITLE_FLOOR);
    }

    let input = facts.input;
    let candidate = facts.candidate;
    if input.wants_original() {
        let full_sim = facts.full_title_sim.min(title_sim);
        if candidate.remix
            && !(full_sim >= config.remix_override_title_sim && artist_sim >= config.remix_override_artist_sim)
        {
            return Err(REJECT_ORIGINAL_GOT_REMIX);
        }
        if !candidate.remix
            && candidate.is_alt_mix()
            && !(full_sim >= config.alt_mix_near_exact_sim && artist_sim >= config.alt_mix_near_exact_sim)
        {
            return Err(REJECT_ORIGINAL_GOT_ALT_MIX);
        }
    }

    if input.remix {
        if !candidate.remix && !candidate.extended {
            return Err(REJECT_REMIX_GOT_ORIGINAL);
        }
        if !input.remixer_tokens.is_empty() && !facts.remixer_overlap {
            return Err(REJECT_REMIXER_MISMATCH);
        }
    }

    Ok(())
}

// ============================================================================
// Bonuses
// ============================================================================

pub fn year_bonus(input: Option<i32>, candidate: Option<i32>, config: &MatchConfig) -> i32 {
    match (input, candidate) {
        (Some(a), Some(b)) if a == b => config.year_exact_bonus,
        (Some(a), Some(b)) if (a - b).abs() == 1 => config.year_near_bonus,
        _ => 0,
    }
}

pub fn key_bonus(input: Option<&str>, candidate: Option<&str>, config: &MatchConfig) -> i32 {
    match compare_keys(input, candidate) {
        KeyRelation::Exact => config.key_exact_bonus,
        KeyRelation::Near => config.key_near_bonus,
        KeyRelation::Unrelated => 0,
    }
}

/// Variant-type agreement. Returns the bonus and whether no mismatch penalty applied.
pub fn mix_bonus(input: &MixIntent, candidate: &MixIntent, remixer_ratio: f64, config: &MatchConfig) -> (i32, bool) {
    if input.remix {
        if candidate.remix {
            let overlap = (config.remixer_overlap_bonus as f64 * remixer_ratio).round() as i32;
            return (config.mix_match_bonus + overlap, true);
        }
        return (-config.remix_mismatch_penalty, false);
    }

    if candidate.remix {
        return (-config.remix_mismatch_penalty, false);
    }

    if input.wants_original() {
        if candidate.is_alt_mix() {
            return (-config.alt_mix_penalty, false);
        }
        if (input.original && candidate.original) || (input.extended && candidate.extended) {
            return (config.mix_match_bonus, true);
        }
        return (config.mix_compatible_bonus, true);
    }

    if input.prefer_plain {
        if candidate.is_alt_mix() {
            return (-config.alt_mix_penalty, false);
        }
        if candidate.original || candidate.prefer_plain {
            return (config.mix_match_bonus, true);
        }
        if candidate.extended {
            return (config.mix_compatible_bonus, true);
        }
        return (0, true);
    }

    if input.flags().iter().any(|flag| candidate.has(*flag)) {
        (config.mix_match_bonus, true)
    } else {
        (0, true)
    }
}

/// Generic-phrase bonus. Returns the bonus and whether the candidate carries a phrase.
pub fn phrase_bonus(
    phrases: &[GenericPhrase],
    candidate_title: &str,
    candidate: &MixIntent,
    state: &ScoringState,
    config: &MatchConfig,
) -> (i32, bool) {
    if phrases.is_empty() {
        return (0, false);
    }
    if phrases.iter().any(|p| p.found_in(candidate_title)) {
        return (config.generic_phrase_bonus, true);
    }
    let plainish = candidate.prefer_plain || candidate.original || candidate.extended;
    if state.phrase_seen && plainish {
        (-config.generic_phrase_missing_penalty, false)
    } else {
        (0, false)
    }
}

pub fn special_bonus(special: SpecialIntent, candidate_title: &str, config: &MatchConfig) -> i32 {
    let mut bonus = 0;
    for (wanted, present) in [
        (special.want_refire, title_has_refire(candidate_title)),
        (special.want_rework, title_has_rework(candidate_title)),
    ] {
        if !wanted {
            continue;
        }
        bonus += if present {
            config.special_intent_bonus
        } else {
            -config.special_intent_missing_penalty
        };
    }
    bonus
}

// ============================================================================
// ScoringGuard
// ============================================================================

pub struct ScoringGuard<'a> {
    config: &'a MatchConfig,
    similarity: &'a dyn SimilarityProvider,
}

impl<'a> ScoringGuard<'a> {
    pub fn new(config: &'a MatchConfig, similarity: &'a dyn SimilarityProvider) -> Self {
        Self { config, similarity }
    }

    /// Score one candidate. Query/candidate indices and timing are left at zero
    /// for the caller to fill in.
    pub fn evaluate(
        &self,
        profile: &TrackProfile,
        url: &str,
        metadata: &CandidateMetadata,
        state: &ScoringState,
    ) -> Candidate {
        if metadata.title.trim().is_empty() {
            return Candidate::without_title(url, Some(metadata.clone()));
        }
        let config = self.config;
        let candidate_title = metadata.title.as_str();
        let candidate_intent = MixIntent::parse(candidate_title);

        let title_sim = self.similarity.similarity(&profile.core_title, &core_title(candidate_title));
        let artist_sim = self.similarity.artist_similarity(&profile.artists, &metadata.artists);
        let base_score = config.title_weight * title_sim as f64 + config.artist_weight * artist_sim as f64;

        let remixer_tokens = candidate_remixer_tokens(&candidate_intent, metadata);
        let requested = &profile.intent.remixer_tokens;
        let shared_remixer_tokens = requested.iter().filter(|t| remixer_tokens.contains(*t)).count();
        let remixer_ratio = if requested.is_empty() {
            0.0
        } else {
            shared_remixer_tokens as f64 / requested.len() as f64
        };

        let full_title_sim = self.similarity.similarity(&profile.full_title, &fold_text(candidate_title));
        let facts = GuardFacts {
            title_sim,
            full_title_sim,
            artist_sim,
            significant_count: profile.title_tokens.len(),
            coverage: coverage(&profile.title_tokens, candidate_title),
            title_subset: is_title_subset(profile, candidate_title),
            title_only: profile.title_only(),
            artist_anchor: artist_anchor(profile, metadata),
            remixer_overlap: shared_remixer_tokens > 0,
            input: &profile.intent,
            candidate: &candidate_intent,
        };
        let guard = check_guards(&facts, config);

        let bonus_year = year_bonus(profile.year, metadata.release_year, config);
        let bonus_key = key_bonus(profile.key.as_deref(), metadata.key.as_deref(), config);
        let (mix_bonus, mix_compatible) = mix_bonus(&profile.intent, &candidate_intent, remixer_ratio, config);
        let (phrase_bonus, phrase_matched) =
            phrase_bonus(&profile.phrases, candidate_title, &candidate_intent, state, config);
        let special_bonus = special_bonus(profile.special, candidate_title, config);

        let bonuses = bonus_year + bonus_key + mix_bonus + phrase_bonus + special_bonus;
        let final_score = (base_score + bonuses as f64).max(0.0);

        Candidate {
            url: url.to_string(),
            metadata: metadata.clone(),
            title_sim,
            artist_sim,
            base_score,
            bonus_year,
            bonus_key,
            mix_bonus,
            phrase_bonus,
            special_bonus,
            final_score,
            guard_ok: guard.is_ok(),
            reject_reason: guard.err().unwrap_or_default().to_string(),
            mix_compatible,
            phrase_matched,
            query_index: 0,
            candidate_index: 0,
            elapsed_ms: 0,
            is_winner: false,
        }
    }
}

fn coverage(input_tokens: &[String], candidate_title: &str) -> f64 {
    if input_tokens.is_empty() {
        return 1.0;
    }
    let candidate: FxHashSet<String> = tokens(candidate_title).into_iter().collect();
    let found = input_tokens.iter().filter(|t| candidate.contains(*t)).count();
    found as f64 / input_tokens.len() as f64
}

fn is_title_subset(profile: &TrackProfile, candidate_title: &str) -> bool {
    if core_title(candidate_title) == profile.core_title {
        return false;
    }
    let input: FxHashSet<&String> = profile.title_tokens.iter().collect();
    let candidate = significant_tokens(&sanitize_title(candidate_title));
    candidate.len() < input.len() && candidate.iter().all(|t| input.contains(t))
}

fn artist_anchor(profile: &TrackProfile, metadata: &CandidateMetadata) -> bool {
    if metadata.artists.iter().any(|a| profile.artist_keys.contains(&normalize_artist(a))) {
        return true;
    }
    let title = fold_text(&metadata.title);
    profile
        .artist_keys
        .iter()
        .any(|artist| title.contains(&format!("{} remix", artist)))
}

fn candidate_remixer_tokens(intent: &MixIntent, metadata: &CandidateMetadata) -> FxHashSet<String> {
    let mut out: FxHashSet<String> = intent.remixer_tokens.iter().cloned().collect();
    for artist in &metadata.artists {
        out.extend(tokens(artist).into_iter().filter(|t| t.len() >= 2));
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mix::generic_phrases;
    use crate::similarity::TokenSetRatio;

    fn profile(title: &str, artist: &str) -> TrackProfile {
        let track = TrackInput::new(title, artist);
        TrackProfile::new(&track, &MixIntent::parse(title), &generic_phrases(title))
    }

    fn meta(title: &str, artists: &[&str]) -> CandidateMetadata {
        CandidateMetadata {
            title: title.to_string(),
            artists: artists.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    fn score(profile: &TrackProfile, candidate: &CandidateMetadata) -> Candidate {
        let config = MatchConfig::default();
        ScoringGuard::new(&config, &TokenSetRatio).evaluate(profile, "u", candidate, &ScoringState::default())
    }

    #[test]
    fn test_exact_original_mix_accepted() {
        let p = profile("Never Sleep Again", "Tim Green");
        let c = score(&p, &meta("Never Sleep Again (Original Mix)", &["Tim Green"]));
        assert!(c.guard_ok, "{}", c.reject_reason);
        assert_eq!(c.title_sim, 100);
        assert_eq!(c.artist_sim, 100);
        assert_eq!(c.mix_bonus, 4);
        assert!(c.final_score >= 90.0);
    }

    #[test]
    fn test_wrong_artist_rejected() {
        let p = profile("Never Sleep Again", "Tim Green");
        let c = score(&p, &meta("Sleepless Again", &["Someone Else"]));
        assert!(!c.guard_ok);
    }

    #[test]
    fn test_title_subset_rejected() {
        let p = profile("Never Sleep Again", "Tim Green");
        let c = score(&p, &meta("Never Sleep", &["Tim Green"]));
        assert!(!c.guard_ok);
        assert!(c.reject_reason == REJECT_TITLE_SUBSET || c.reject_reason == REJECT_LOW_COVERAGE);
    }

    #[test]
    fn test_remix_request_rejects_original() {
        let p = profile("Gravity (Artist Remix)", "Producer");
        let c = score(&p, &meta("Gravity (Original Mix)", &["Producer"]));
        assert!(!c.guard_ok);
        assert_eq!(c.reject_reason, REJECT_REMIX_GOT_ORIGINAL);
        assert!(c.mix_bonus < 0);
    }

    #[test]
    fn test_extended_remix_matches_remix_request() {
        let p = profile("Cola (CamelPhat Remix)", "Elderbrook");
        let c = score(&p, &meta("Cola (CamelPhat Extended Remix)", &["Elderbrook", "CamelPhat"]));
        assert!(c.guard_ok, "{}", c.reject_reason);
        assert!(c.mix_compatible);
        assert_eq!(c.mix_bonus, 8);
    }

    #[test]
    fn test_wrong_remixer_rejected() {
        let p = profile("Cola (CamelPhat Remix)", "Elderbrook");
        let c = score(&p, &meta("Cola (Mason Maynard Remix)", &["Elderbrook", "Mason Maynard"]));
        assert_eq!(c.reject_reason, REJECT_REMIXER_MISMATCH);
    }

    #[test]
    fn test_original_request_rejects_remix_and_radio_edit() {
        let p = profile("Opus (Original Mix)", "Eric Prydz");
        let c = score(&p, &meta("Opus (Four Tet Remix)", &["Four Tet"]));
        assert_eq!(c.reject_reason, REJECT_ORIGINAL_GOT_REMIX);
        let c = score(&p, &meta("Opus (Extended Mix)", &["Eric Prydz"]));
        assert!(c.guard_ok);
        assert_eq!(c.mix_bonus, 2);
    }

    #[test]
    fn test_same_artist_variants_not_near_exact() {
        let p = profile("Opus (Original Mix)", "Eric Prydz");

        let remix = score(&p, &meta("Opus (Four Tet Remix)", &["Eric Prydz", "Four Tet"]));
        assert_eq!(remix.title_sim, 100);
        assert_eq!(remix.artist_sim, 100);
        assert!(!remix.guard_ok);
        assert_eq!(remix.reject_reason, REJECT_ORIGINAL_GOT_REMIX);

        let radio = score(&p, &meta("Opus (Radio Edit)", &["Eric Prydz"]));
        assert_eq!(radio.artist_sim, 100);
        assert_eq!(radio.reject_reason, REJECT_ORIGINAL_GOT_ALT_MIX);

        let p = profile("Opus (Extended Mix)", "Eric Prydz");
        let club = score(&p, &meta("Opus (Club Mix)", &["Eric Prydz"]));
        assert_eq!(club.reject_reason, REJECT_ORIGINAL_GOT_ALT_MIX);
    }

    #[test]
    fn test_near_exact_override_needs_both_similarities() {
        let config = MatchConfig::default();
        let input = MixIntent::parse("Opus (Original Mix)");
        let radio = MixIntent::parse("Opus (Radio Edit)");
        let mut facts = GuardFacts {
            title_sim: 100,
            full_title_sim: 100,
            artist_sim: 90,
            significant_count: 1,
            coverage: 1.0,
            title_subset: false,
            title_only: false,
            artist_anchor: true,
            remixer_overlap: false,
            input: &input,
            candidate: &radio,
        };
        assert_eq!(check_guards(&facts, &config), Err(REJECT_ORIGINAL_GOT_ALT_MIX));
        facts.artist_sim = 100;
        assert_eq!(check_guards(&facts, &config), Ok(()));
        facts.full_title_sim = 60;
        assert_eq!(check_guards(&facts, &config), Err(REJECT_ORIGINAL_GOT_ALT_MIX));
    }

    #[test]
    fn test_remix_by_input_artist_anchors() {
        let p = profile("Track", "Tim Green");
        let c = score(&p, &meta("Track (Tim Green Remix)", &["Other Artist"]));
        assert_ne!(c.reject_reason, REJECT_ARTIST_MISMATCH);
    }

    #[test]
    fn test_phrase_and_special_bonus() {
        let p = profile("Burn For You (Ivory Re-fire)", "Tim Green");
        let plain = score(&p, &meta("Burn For You", &["Tim Green"]));
        let refire = score(&p, &meta("Burn For You (Ivory Re-fire)", &["Tim Green"]));
        assert_eq!(refire.phrase_bonus, 12);
        assert_eq!(refire.special_bonus, 5);
        assert!(refire.phrase_matched);
        assert_eq!(plain.special_bonus, -3);
        assert!(refire.final_score - plain.final_score >= 12.0);
    }

    #[test]
    fn test_phrase_missing_penalty_after_seen() {
        let config = MatchConfig::default();
        let p = profile("Burn For You (Ivory Re-fire)", "Tim Green");
        let guard = ScoringGuard::new(&config, &TokenSetRatio);
        let seen = ScoringState { phrase_seen: true };
        let c = guard.evaluate(&p, "u", &meta("Burn For You (Original Mix)", &["Tim Green"]), &seen);
        assert_eq!(c.phrase_bonus, -6);
        let c = guard.evaluate(&p, "u", &meta("Burn For You (Original Mix)", &["Tim Green"]), &ScoringState::default());
        assert_eq!(c.phrase_bonus, 0);
    }

    #[test]
    fn test_year_and_key_bonus() {
        let config = MatchConfig::default();
        assert_eq!(year_bonus(Some(2019), Some(2019), &config), 2);
        assert_eq!(year_bonus(Some(2019), Some(2020), &config), 1);
        assert_eq!(year_bonus(Some(2019), Some(2022), &config), 0);
        assert_eq!(year_bonus(None, Some(2019), &config), 0);
        assert_eq!(key_bonus(Some("A Minor"), Some("8A"), &config), 2);
        assert_eq!(key_bonus(Some("A Minor"), Some("C Major"), &config), 1);
        assert_eq!(key_bonus(Some("A Minor"), Some("D Major"), &config), 0);
    }

    #[test]
    fn test_empty_title_is_no_title() {
        let p = profile("Track", "Artist");
        let c = score(&p, &meta("  ", &["Artist"]));
        assert_eq!(c.reject_reason, "no_title");
        assert!(!c.guard_ok);
    }

    #[test]
    fn test_final_score_clamped() {
        let p = profile("Cola (CamelPhat Remix)", "Elderbrook");
        let c = score(&p, &meta("Something Unrelated", &[]));
        assert!(c.final_score >= 0.0);
    }

    #[test]
    fn test_guards_monotone_in_title_sim() {
        let config = MatchConfig::default();
        let intents = [
            MixIntent::parse("T"),
            MixIntent::parse("T (Original Mix)"),
            MixIntent::parse("T (Extended Mix)"),
            MixIntent::parse("T (DJ Nova Remix)"),
            MixIntent::parse("T (Radio Edit)"),
        ];
        for input in &intents {
            for candidate in &intents {
                for artist_sim in [0u8, 50, 65, 75, 95, 100] {
                    for significant_count in [0usize, 1, 2, 5] {
                        for coverage in [0.0, 0.5, 1.0] {
                            for (title_only, artist_anchor, remixer_overlap) in
                                [(false, false, false), (false, true, true), (true, false, true)]
                            {
                                let mut accepted = false;
                                for title_sim in 0..=100u8 {
                                    let facts = GuardFacts {
                                        title_sim,
                                        full_title_sim: 100,
                                        artist_sim,
                                        significant_count,
                                        coverage,
                                        title_subset: false,
                                        title_only,
                                        artist_anchor,
                                        remixer_overlap,
                                        input,
                                        candidate,
                                    };
                                    let ok = check_guards(&facts, &config).is_ok();
                                    assert!(!(accepted && !ok), "guard flipped at title_sim {}", title_sim);
                                    accepted |= ok;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
