//! Search query generation.
//!
//! Builds a deterministic, deduplicated, priority-ordered list of search
//! strings from the sanitized title, the artist string and the original
//! (bracketed) title. Stages run in a fixed order and every stage dedups
//! case-insensitively against everything emitted before it:
//!
//! 1. remixer-first queries
//! 2. title × single artist/remixer, then title × artist pairs
//! 3. title bases × the full artist-variant set (title alone when no artists)
//! 4. title n-grams × artist variants (only when `full_title_artist_only` is off)
//! 5. exhaustive title word combinations × artist subsets (only when enabled)
//!
//! The total is capped at `max_queries`. No hash-set iteration order ever
//! reaches the output.

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::config::MatchConfig;
use crate::mix::{extended_phrase, generic_phrases, remix_phrase, MixIntent};
use crate::normalize::{
    dedup_case_insensitive, featured_artists, fold_text, normalize_punctuation, sanitize_title, split_artists,
    MULTI_SPACE,
};

/// Remixer suffixes tried for every remixer name, in priority order.
const REMIXER_TEMPLATES: [&str; 5] = ["remix", "extended remix", "extended mix", "club remix", "club mix"];

/// Separators used when joining artist subsets.
const ARTIST_JOINERS: [&str; 4] = [", ", " & ", " and ", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    RemixerFirst,
    TitleArtist,
    TitleArtistPair,
    ArtistVariant,
    TitleOnly,
    NGram,
    Exhaustive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub text: String,
    /// Position in the generated list, 0-based
    pub rank: usize,
    pub kind: QueryKind,
    /// Carries the whole sanitized title
    pub full_title: bool,
    /// Number of artist (or remixer) names in the query
    pub artist_count: usize,
    /// Carries a mix phrase or remixer suffix
    pub mix_hint: bool,
    /// Carries a generic phrase
    pub phrase_hint: bool,
}

impl SearchQuery {
    /// "Full title + one or two artists": treated as high precision by the early-exit rules.
    pub fn family_shaped(&self) -> bool {
        self.full_title && (1..=2).contains(&self.artist_count)
    }

    /// Bare n-gram / word-combination queries get fewer results.
    pub fn is_partial_title(&self) -> bool {
        matches!(self.kind, QueryKind::NGram | QueryKind::Exhaustive)
    }
}

#[derive(Debug, Clone)]
struct TitleBase {
    text: String,
    mix_hint: bool,
    phrase_hint: bool,
}

#[derive(Debug, Clone)]
struct ArtistVariant {
    text: String,
    count: usize,
    mix_hint: bool,
}

#[derive(Debug, Clone, Copy)]
struct Shape {
    kind: QueryKind,
    full_title: bool,
    artist_count: usize,
    mix_hint: bool,
    phrase_hint: bool,
}

/// Accumulates queries with case-insensitive dedup and the hard cap.
struct QueryBuilder {
    queries: Vec<SearchQuery>,
    seen: FxHashSet<String>,
    cap: usize,
}

impl QueryBuilder {
    fn new(cap: usize) -> Self {
        Self {
            queries: Vec::new(),
            seen: FxHashSet::default(),
            cap,
        }
    }

    fn is_full(&self) -> bool {
        self.queries.len() >= self.cap
    }

    fn push(&mut self, raw: &str, shape: Shape) {
        if self.is_full() {
            return;
        }
        let text = MULTI_SPACE.replace_all(raw.trim(), " ").to_string();
        if text.is_empty() {
            return;
        }
        if !self.seen.insert(text.to_lowercase()) {
            return;
        }
        self.queries.push(SearchQuery {
            text,
            rank: self.queries.len(),
            kind: shape.kind,
            full_title: shape.full_title,
            artist_count: shape.artist_count,
            mix_hint: shape.mix_hint,
            phrase_hint: shape.phrase_hint,
        });
    }

    fn finish(self) -> Vec<SearchQuery> {
        self.queries
    }
}

pub struct QueryGenerator<'a> {
    config: &'a MatchConfig,
}

impl<'a> QueryGenerator<'a> {
    pub fn new(config: &'a MatchConfig) -> Self {
        Self { config }
    }

    /// Only the query strings, in order.
    pub fn generate_strings(&self, title: &str, artist_string: &str, original_title: &str) -> Vec<String> {
        self.generate(title, artist_string, original_title)
            .into_iter()
            .map(|q| q.text)
            .collect()
    }

    pub fn generate(&self, title: &str, artist_string: &str, original_title: &str) -> Vec<SearchQuery> {
        let source_title = if title.trim().is_empty() { original_title } else { title };
        let base_title = if source_title.trim().is_empty() {
            String::new()
        } else {
            sanitize_title(source_title)
        };

        let intent = MixIntent::parse(original_title);
        let artists = split_artists(artist_string);
        let remixers = intent.remixer_names.clone();
        let hints: Vec<String> = featured_artists(original_title)
            .into_iter()
            .filter(|h| !artists.iter().any(|a| fold_text(a) == fold_text(h)))
            .collect();

        let mut builder = QueryBuilder::new(self.config.max_queries);
        if base_title.is_empty() {
            return builder.finish();
        }

        let bases = self.title_bases(&base_title, original_title, &intent);
        let artist_variants = self.artist_variants(artist_string, &artists, &hints, &remixers);

        self.remixer_first(&mut builder, &bases, &remixers);
        self.title_with_artists(&mut builder, &base_title, &artists, &remixers);
        self.bases_with_variants(&mut builder, &bases, &artist_variants, artists.is_empty());
        if !self.config.full_title_artist_only && !self.config.require_artist {
            self.ngrams(&mut builder, &base_title, &artist_variants);
        }
        if self.config.exhaustive_enabled && !self.config.require_artist {
            self.exhaustive(&mut builder, &base_title, &artists);
        }

        builder.finish()
    }

    /// Plain title, then the mix/phrase-decorated variants the original title asks for.
    fn title_bases(&self, title: &str, original_title: &str, intent: &MixIntent) -> Vec<TitleBase> {
        let mut bases = vec![TitleBase {
            text: title.to_string(),
            mix_hint: false,
            phrase_hint: false,
        }];
        if intent.original {
            bases.push(TitleBase {
                text: format!("{} (Original Mix)", title),
                mix_hint: true,
                phrase_hint: false,
            });
        }
        for phrase in generic_phrases(original_title) {
            for variant in phrase.variants() {
                bases.push(TitleBase {
                    text: format!("{} {}", title, variant),
                    mix_hint: false,
                    phrase_hint: true,
                });
            }
        }
        if let Some(phrase) = remix_phrase(original_title) {
            bases.push(TitleBase {
                text: format!("{} ({})", title, phrase),
                mix_hint: true,
                phrase_hint: false,
            });
        }
        match extended_phrase(original_title) {
            Some(phrase) => bases.push(TitleBase {
                text: format!("{} ({})", title, phrase),
                mix_hint: true,
                phrase_hint: false,
            }),
            None if intent.extended => bases.push(TitleBase {
                text: format!("{} (Extended Mix)", title),
                mix_hint: true,
                phrase_hint: false,
            }),
            None => {}
        }

        let mut seen = FxHashSet::default();
        bases.retain(|b| seen.insert(b.text.to_lowercase()));
        bases
    }

    fn artist_variants(
        &self,
        artist_string: &str,
        artists: &[String],
        hints: &[String],
        remixers: &[String],
    ) -> Vec<ArtistVariant> {
        let mut variants = Vec::new();
        if !artists.is_empty() {
            variants.push(ArtistVariant {
                text: normalize_punctuation(artist_string),
                count: artists.len(),
                mix_hint: false,
            });
            for joiner in [", ", " & ", " and "] {
                variants.push(ArtistVariant {
                    text: artists.join(joiner),
                    count: artists.len(),
                    mix_hint: false,
                });
            }

            let limit = artists.len().min(self.config.max_artist_subset_tokens);
            let pool = &artists[..limit];
            for size in 1..=limit {
                for combo in combinations(limit, size, usize::MAX) {
                    let names: Vec<&str> = combo.iter().map(|&i| pool[i].as_str()).collect();
                    if size == 1 {
                        variants.push(ArtistVariant {
                            text: names[0].to_string(),
                            count: 1,
                            mix_hint: false,
                        });
                        continue;
                    }
                    for joiner in ARTIST_JOINERS {
                        variants.push(ArtistVariant {
                            text: names.join(joiner),
                            count: size,
                            mix_hint: false,
                        });
                    }
                }
            }
        }

        for hint in hints {
            variants.push(ArtistVariant {
                text: hint.clone(),
                count: 1,
                mix_hint: false,
            });
        }
        for remixer in remixers {
            variants.push(ArtistVariant {
                text: format!("{} remix", remixer),
                count: 1,
                mix_hint: true,
            });
        }

        let mut seen = FxHashSet::default();
        variants.retain(|v| seen.insert(v.text.to_lowercase()));
        variants
    }

    // ------------------------------------------------------------------
    // Stage 1
    // ------------------------------------------------------------------

    fn remixer_first(&self, builder: &mut QueryBuilder, bases: &[TitleBase], remixers: &[String]) {
        for remixer in remixers {
            for base in bases {
                for template in REMIXER_TEMPLATES {
                    let suffix = format!("{} {}", remixer, template);
                    let shape = Shape {
                        kind: QueryKind::RemixerFirst,
                        full_title: true,
                        artist_count: 1,
                        mix_hint: true,
                        phrase_hint: base.phrase_hint,
                    };
                    builder.push(&format!("{} {}", base.text, suffix), shape);
                    if self.config.reverse_remix_hints {
                        builder.push(&format!("{} {}", suffix, base.text), shape);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage 2
    // ------------------------------------------------------------------

    fn title_with_artists(&self, builder: &mut QueryBuilder, title: &str, artists: &[String], remixers: &[String]) {
        let reverse = self.config.priority_reverse;
        let singles = dedup_case_insensitive(artists.iter().chain(remixers.iter()).cloned().collect());

        let single_shape = Shape {
            kind: QueryKind::TitleArtist,
            full_title: true,
            artist_count: 1,
            mix_hint: false,
            phrase_hint: false,
        };
        for name in &singles {
            builder.push(&format!("{} {}", title, name), single_shape);
            if reverse {
                builder.push(&format!("{} {}", name, title), single_shape);
            }
        }

        let pair_shape = Shape {
            kind: QueryKind::TitleArtistPair,
            full_title: true,
            artist_count: 2,
            mix_hint: false,
            phrase_hint: false,
        };
        for combo in combinations(artists.len(), 2, usize::MAX) {
            let (a, b) = (&artists[combo[0]], &artists[combo[1]]);
            builder.push(&format!("{} {} {}", title, a, b), pair_shape);
            if reverse {
                builder.push(&format!("{} {} {}", a, b, title), pair_shape);
            }
        }
        for remixer in remixers {
            for artist in artists {
                if remixer.eq_ignore_ascii_case(artist) {
                    continue;
                }
                builder.push(&format!("{} {} {}", title, remixer, artist), pair_shape);
                if reverse {
                    builder.push(&format!("{} {} {}", remixer, artist, title), pair_shape);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage 3
    // ------------------------------------------------------------------

    fn bases_with_variants(
        &self,
        builder: &mut QueryBuilder,
        bases: &[TitleBase],
        variants: &[ArtistVariant],
        no_artists: bool,
    ) {
        for base in bases {
            for variant in variants {
                builder.push(
                    &format!("{} {}", base.text, variant.text),
                    Shape {
                        kind: QueryKind::ArtistVariant,
                        full_title: true,
                        artist_count: variant.count,
                        mix_hint: base.mix_hint || variant.mix_hint,
                        phrase_hint: base.phrase_hint,
                    },
                );
            }
        }

        if no_artists && !self.config.require_artist {
            for base in bases {
                builder.push(
                    &base.text,
                    Shape {
                        kind: QueryKind::TitleOnly,
                        full_title: true,
                        artist_count: 0,
                        mix_hint: base.mix_hint,
                        phrase_hint: base.phrase_hint,
                    },
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage 4
    // ------------------------------------------------------------------

    fn ngrams(&self, builder: &mut QueryBuilder, title: &str, variants: &[ArtistVariant]) {
        let words: Vec<&str> = title.split_whitespace().collect();
        if words.len() < 2 || variants.is_empty() || self.config.ngram_max == 0 {
            return;
        }
        let largest = self.config.ngram_max.min(words.len() - 1);
        for n in (1..=largest).rev() {
            let starts = if self.config.ngram_prefix_only { 1 } else { words.len() - n + 1 };
            for start in 0..starts {
                let gram = words[start..start + n].join(" ");
                if fold_text(&gram).len() < 3 {
                    continue;
                }
                for variant in variants {
                    if builder.is_full() {
                        return;
                    }
                    builder.push(
                        &format!("{} {}", gram, variant.text),
                        Shape {
                            kind: QueryKind::NGram,
                            full_title: false,
                            artist_count: variant.count,
                            mix_hint: variant.mix_hint,
                            phrase_hint: false,
                        },
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage 5
    // ------------------------------------------------------------------

    fn exhaustive(&self, builder: &mut QueryBuilder, title: &str, artists: &[String]) {
        let words: Vec<&str> = title.split_whitespace().collect();
        if words.len() < 2 || artists.is_empty() {
            return;
        }

        let max_words = self.config.exhaustive_max_words.min(words.len() - 1);
        let min_words = self.config.exhaustive_min_words.max(1);
        let mut budget = self.config.exhaustive_max_combos;

        let limit = artists.len().min(self.config.max_artist_subset_tokens);
        let mut artist_subsets: Vec<(String, usize)> = Vec::new();
        for size in 1..=limit.min(2) {
            for combo in combinations(limit, size, usize::MAX) {
                let names: Vec<&str> = combo.iter().map(|&i| artists[i].as_str()).collect();
                artist_subsets.push((names.join(" "), size));
            }
        }

        for size in (min_words..=max_words).rev() {
            for combo in combinations(words.len(), size, budget) {
                if budget == 0 || builder.is_full() {
                    return;
                }
                budget -= 1;
                let phrase: Vec<&str> = combo.iter().map(|&i| words[i]).collect();
                let phrase = phrase.join(" ");
                for (subset, count) in &artist_subsets {
                    builder.push(
                        &format!("{} {}", phrase, subset),
                        Shape {
                            kind: QueryKind::Exhaustive,
                            full_title: false,
                            artist_count: *count,
                            mix_hint: false,
                            phrase_hint: false,
                        },
                    );
                }
            }
        }
    }
}

/// Index combinations of `k` out of `n` in lexicographic order, at most `limit` of them.
fn combinations(n: usize, k: usize, limit: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n || limit == 0 {
        return out;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.clone());
        if out.len() >= limit {
            return out;
        }
        // Rightmost index that can still move right
        let mut i = k;
        while i > 0 && idx[i - 1] == n - k + (i - 1) {
            i -= 1;
        }
        if i == 0 {
            return out;
        }
        idx[i - 1] += 1;
        for j in i..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}
