//! Mix/variant intent parsing.
//!
//! Turns a raw title such as "Cola (CamelPhat Extended Remix)" into a
//! [`MixIntent`]: which variant flags are present, who the remixers are, and
//! whether the title asks for the plain version. Bracketed phrases that are not
//! mix vocabulary ("Ivory Re-fire") are extracted separately as
//! [`GenericPhrase`]s.
//!
//! Everything here is a pure function of the input string.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::normalize::{collapse, fold_text, fold_to_ascii, normalize_punctuation, tokens, BRACKETED};

// ============================================================================
// Variant Flags
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixFlag {
    Original,
    Extended,
    Club,
    Radio,
    Edit,
    Remix,
    Dub,
    Guitar,
    Vip,
    Rework,
    Refire,
    Acapella,
    Instrumental,
}

/// Variant patterns, tested against accent-folded lower-case text.
static VARIANT_PATTERNS: Lazy<Vec<(MixFlag, Regex)>> = Lazy::new(|| {
    vec![
        (MixFlag::Original, Regex::new(r"\boriginal\s+(?:mix|version)\b").unwrap()),
        (MixFlag::Extended, Regex::new(r"\bextended\b").unwrap()),
        (MixFlag::Club, Regex::new(r"\bclub\s+(?:mix|remix|edit|version|dub)\b").unwrap()),
        (MixFlag::Radio, Regex::new(r"\bradio\s+(?:edit|mix|version|cut)\b").unwrap()),
        (MixFlag::Edit, Regex::new(r"\bedit\b").unwrap()),
        (MixFlag::Remix, Regex::new(r"\b(?:remix(?:ed)?|rmx)\b").unwrap()),
        (MixFlag::Dub, Regex::new(r"\bdub\b").unwrap()),
        (MixFlag::Guitar, Regex::new(r"\bguitar\s+(?:mix|version|edit|remix)\b").unwrap()),
        (MixFlag::Vip, Regex::new(r"\bvip\b").unwrap()),
        (MixFlag::Rework, Regex::new(r"\bre[-\s]?work(?:ed)?\b").unwrap()),
        (MixFlag::Refire, Regex::new(r"\bre[-\s]?fire\b").unwrap()),
        (MixFlag::Acapella, Regex::new(r"\ba[-\s]?cap+el+a\b").unwrap()),
        (MixFlag::Instrumental, Regex::new(r"\binstrumental\b").unwrap()),
    ]
});

// ============================================================================
// Remixer Extraction Patterns
// ============================================================================

/// Mix vocabulary stripped from a bracket before the remaining words are read as names.
static MIX_VOCAB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:extended|original|club|radio|remix(?:ed)?|rmx|mix|edit|version|dub|vip|bootleg|re[-\s]?work(?:ed)?|re[-\s]?fire|instrumental|acapella|guitar|official|cut)\b",
    )
    .unwrap()
});

/// Release descriptors and years that are never a remixer's name.
static DESCRIPTOR_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:album|live|short|long|single|original|remaster(?:ed)?|clean|explicit|mono|stereo|demo|main|full|length|(?:19|20)\d{2})\b",
    )
    .unwrap()
});

static REMIX_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:remix(?:ed)?|rmx)\b").unwrap());

static OTHER_VARIANT_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:re[-\s]?work(?:ed)?|re[-\s]?fire|edit|version|bootleg|vip)\b").unwrap()
});

/// Separators between remixer names inside one bracket.
static NAME_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:,|&|/|\+|\s+and\s+|\s+x\s+)\s*").unwrap());

/// "<name> remix" outside brackets: one to three words before "remix".
static FALLBACK_REMIXER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([A-Za-z0-9][A-Za-z0-9&.'\-]*(?:\s+[A-Za-z0-9][A-Za-z0-9&.'\-]*){0,2})\s+remix\b").unwrap()
});

/// Bracket content that disqualifies a phrase from being a generic phrase.
static GENERIC_EXCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:remix(?:ed)?|rmx|mix|edit|version|original|extended|club|radio|dub|vip|instrumental|acapella|a\s?cappella|bootleg|guitar|feat|ft|featuring|remaster(?:ed)?)\b",
    )
    .unwrap()
});

static REFIRE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bre[-\s]?fire\b").unwrap());
static REWORK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bre[-\s]?work(?:ed)?\b").unwrap());

// ============================================================================
// MixIntent
// ============================================================================

/// Structured reading of a title's variant vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MixIntent {
    pub original: bool,
    pub extended: bool,
    pub club: bool,
    pub radio: bool,
    pub edit: bool,
    pub remix: bool,
    pub dub: bool,
    pub guitar: bool,
    pub vip: bool,
    pub rework: bool,
    pub refire: bool,
    pub acapella: bool,
    pub instrumental: bool,
    /// Remixer names in first-seen order, deduplicated case-insensitively.
    pub remixer_names: Vec<String>,
    /// Lower-case word tokens of the remixer names, length >= 2.
    pub remixer_tokens: BTreeSet<String>,
    /// True iff no variant flag is set.
    pub prefer_plain: bool,
}

impl MixIntent {
    pub fn parse(raw_title: &str) -> Self {
        let literal = normalize_punctuation(raw_title);
        let folded = fold_to_ascii(&literal);

        let mut intent = MixIntent::default();
        for (flag, pattern) in VARIANT_PATTERNS.iter() {
            if pattern.is_match(&folded) {
                intent.set(*flag);
            }
        }

        intent.remixer_names = extract_remixers(&literal);
        intent.remixer_tokens = intent
            .remixer_names
            .iter()
            .flat_map(|name| tokens(name))
            .filter(|t| t.len() >= 2)
            .collect();
        intent.prefer_plain = !intent.any_flag();
        intent
    }

    fn set(&mut self, flag: MixFlag) {
        match flag {
            MixFlag::Original => self.original = true,
            MixFlag::Extended => self.extended = true,
            MixFlag::Club => self.club = true,
            MixFlag::Radio => self.radio = true,
            MixFlag::Edit => self.edit = true,
            MixFlag::Remix => self.remix = true,
            MixFlag::Dub => self.dub = true,
            MixFlag::Guitar => self.guitar = true,
            MixFlag::Vip => self.vip = true,
            MixFlag::Rework => self.rework = true,
            MixFlag::Refire => self.refire = true,
            MixFlag::Acapella => self.acapella = true,
            MixFlag::Instrumental => self.instrumental = true,
        }
    }

    pub fn has(&self, flag: MixFlag) -> bool {
        match flag {
            MixFlag::Original => self.original,
            MixFlag::Extended => self.extended,
            MixFlag::Club => self.club,
            MixFlag::Radio => self.radio,
            MixFlag::Edit => self.edit,
            MixFlag::Remix => self.remix,
            MixFlag::Dub => self.dub,
            MixFlag::Guitar => self.guitar,
            MixFlag::Vip => self.vip,
            MixFlag::Rework => self.rework,
            MixFlag::Refire => self.refire,
            MixFlag::Acapella => self.acapella,
            MixFlag::Instrumental => self.instrumental,
        }
    }

    /// All flags that are set, in declaration order.
    pub fn flags(&self) -> Vec<MixFlag> {
        VARIANT_PATTERNS
            .iter()
            .map(|(flag, _)| *flag)
            .filter(|flag| self.has(*flag))
            .collect()
    }

    pub fn any_flag(&self) -> bool {
        VARIANT_PATTERNS.iter().any(|(flag, _)| self.has(*flag))
    }

    /// Edit, radio, club, VIP and dub versions are alternates of the original.
    pub fn is_alt_mix(&self) -> bool {
        self.edit || self.radio || self.club || self.vip || self.dub
    }

    /// Original or extended requested without a remix.
    pub fn wants_original(&self) -> bool {
        (self.original || self.extended) && !self.remix
    }
}

// ============================================================================
// Remixer Extraction
// ============================================================================

fn extract_remixers(literal: &str) -> Vec<String> {
    let brackets: Vec<&str> = BRACKETED
        .captures_iter(literal)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    // (a) brackets mentioning a remix
    let mut names: Vec<String> = brackets
        .iter()
        .filter(|inner| REMIX_WORD.is_match(inner))
        .flat_map(|inner| names_from_segment(inner))
        .collect();

    // (b) brackets with other variant vocabulary
    if names.is_empty() {
        names = brackets
            .iter()
            .filter(|inner| OTHER_VARIANT_WORD.is_match(inner))
            .flat_map(|inner| names_from_segment(inner))
            .collect();
    }

    // (c) "<name> remix" outside brackets, literal text first, then accent-folded
    if names.is_empty() {
        let outside = BRACKETED.replace_all(literal, " ").to_string();
        let zone = outside.rsplit(" - ").next().unwrap_or(&outside).to_string();
        names = fallback_names(&zone);
        if names.is_empty() {
            names = fallback_names(&fold_to_ascii(&zone));
        }
    }

    dedup_names(names)
}

static EXTENDED_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bextended\b").unwrap());

fn first_bracket_matching(raw_title: &str, pattern: &Regex) -> Option<String> {
    let literal = normalize_punctuation(raw_title);
    BRACKETED
        .captures_iter(&literal)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .find(|inner| pattern.is_match(inner))
}

/// The bracketed remix phrase as written, e.g. "CamelPhat Remix".
pub fn remix_phrase(raw_title: &str) -> Option<String> {
    first_bracket_matching(raw_title, &REMIX_WORD)
}

/// The bracketed extended phrase as written, e.g. "Extended Mix".
pub fn extended_phrase(raw_title: &str) -> Option<String> {
    first_bracket_matching(raw_title, &EXTENDED_WORD)
}

fn names_from_segment(inner: &str) -> Vec<String> {
    let stripped = MIX_VOCAB.replace_all(inner, " ");
    let stripped = DESCRIPTOR_WORDS.replace_all(&stripped, " ");
    NAME_SPLIT
        .split(&stripped)
        .map(clean_name)
        .filter(|name| is_name(name))
        .collect()
}

fn fallback_names(zone: &str) -> Vec<String> {
    FALLBACK_REMIXER
        .captures_iter(zone)
        .filter_map(|caps| caps.get(1))
        .flat_map(|m| names_from_segment(m.as_str()))
        .collect()
}

fn clean_name(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '.' | ':' | '\'' | '"'));
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_name(name: &str) -> bool {
    name.chars().filter(|c| c.is_alphanumeric()).count() >= 2 && name.chars().any(char::is_alphabetic)
}

/// Case- and accent-insensitive dedup, first-seen order.
fn dedup_names(names: Vec<String>) -> Vec<String> {
    let mut seen = FxHashSet::default();
    names.into_iter().filter(|n| seen.insert(fold_text(n))).collect()
}

// ============================================================================
// Generic Phrases
// ============================================================================

/// A bracketed phrase that is not standard mix vocabulary, e.g. "Ivory Re-fire".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenericPhrase {
    pub text: String,
    pub tokens: Vec<String>,
    pub collapsed: String,
}

impl GenericPhrase {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            tokens: tokens(text),
            collapsed: collapse(text),
        }
    }

    /// Whether a candidate title carries this phrase, either as tokens or in
    /// its token-collapsed form ("Ivory Refire" matches "Ivory Re-fire").
    pub fn found_in(&self, candidate_title: &str) -> bool {
        if self.tokens.is_empty() {
            return false;
        }
        let title_tokens: FxHashSet<String> = tokens(candidate_title).into_iter().collect();
        if self.tokens.iter().all(|t| title_tokens.contains(t)) {
            return true;
        }
        !self.collapsed.is_empty() && collapse(candidate_title).contains(&self.collapsed)
    }

    /// Spellings used when building queries: as written, hyphens spaced, hyphens dropped.
    pub fn variants(&self) -> Vec<String> {
        let spaced = self.text.replace('-', " ");
        let joined = self.text.replace('-', "");
        let mut out = vec![self.text.clone()];
        for v in [spaced, joined] {
            if !out.iter().any(|o| o.eq_ignore_ascii_case(&v)) {
                out.push(v);
            }
        }
        out
    }
}

/// Extract generic phrases from a raw title, in order, deduplicated.
pub fn generic_phrases(raw_title: &str) -> Vec<GenericPhrase> {
    let literal = normalize_punctuation(raw_title);
    let mut seen = FxHashSet::default();
    BRACKETED
        .captures_iter(&literal)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|inner| !GENERIC_EXCLUDE.is_match(inner))
        .filter(|inner| inner.chars().any(|c| c.is_alphabetic()))
        .filter(|inner| seen.insert(fold_text(inner)))
        .map(|inner| GenericPhrase::new(&inner))
        .collect()
}

/// Refire/rework requests carried by generic phrases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpecialIntent {
    pub want_refire: bool,
    pub want_rework: bool,
}

impl SpecialIntent {
    pub fn from_phrases(phrases: &[GenericPhrase]) -> Self {
        let mut intent = SpecialIntent::default();
        for phrase in phrases {
            let folded = fold_to_ascii(&phrase.text);
            intent.want_refire |= REFIRE.is_match(&folded);
            intent.want_rework |= REWORK.is_match(&folded);
        }
        intent
    }

    pub fn any(&self) -> bool {
        self.want_refire || self.want_rework
    }
}

/// Whether a candidate title mentions a refire / rework.
pub fn title_has_refire(title: &str) -> bool {
    REFIRE.is_match(&fold_to_ascii(&normalize_punctuation(title)))
}

pub fn title_has_rework(title: &str) -> bool {
    REWORK.is_match(&fold_to_ascii(&normalize_punctuation(title)))
}
