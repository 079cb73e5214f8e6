//! Shared text normalization for titles and artist strings.
//! Used by mix parsing, query generation, scoring and the catalog index.
//!
//! CRITICAL: query dedup keys and scoring tokens both go through `fold_text`.
//! Changing it shifts every similarity value. Run tests after changes.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Regex to collapse runs of whitespace into a single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Parenthesised or square-bracketed segment; group 1 is the inner text.
pub static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\(\[]([^\)\]]*)[\)\]]").unwrap());

/// Featured artists without brackets: "Song feat. Artist"
pub static FEAT_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+.+$").unwrap());

/// Featured artists inside a bracket: "(feat. Artist)"; group 1 is the name list.
pub static FEAT_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\(\[]\s*(?:feat\.?|ft\.?|featuring)\s+([^\)\]]+)[\)\]]").unwrap());

/// Dash-separated mix suffix: "Song - Extended Mix", "Song - DJ Nova Remix"
pub static DASH_MIX_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+-\s+[^-]*\b(?:mix|remix|edit|version|dub|re-?work|re-?fire|vip|bootleg)\b[^-]*$")
        .unwrap()
});

/// Multi-artist separator pattern.
/// Matches: &, /, ,, ;, •, +, ×, x, vs, and, with, feat, ft
pub static ARTIST_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:[&/,;•+×]|(?:\s+(?:x|vs\.?|and|with|feat\.?|ft\.?|featuring)\s+))\s*")
        .unwrap()
});

/// HTML entities that show up in scraped catalog titles.
const HTML_ENTITIES: [(&str, &str); 8] = [
    ("&amp;", "&"),
    ("&#39;", "'"),
    ("&#x27;", "'"),
    ("&apos;", "'"),
    ("&quot;", "\""),
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
];

/// Words too common to anchor a title match.
pub static STOPWORDS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "feat", "from", "that", "this", "into", "are", "was", "its",
        "featuring",
    ]
    .into_iter()
    .collect()
});

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lower-case ASCII by applying NFKD decomposition and removing combining marks.
/// e.g., "Beyoncé" → "beyonce", "Röyksopp" → "royksopp"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    // Then transliterate any remaining non-ASCII (Cyrillic, Hebrew, CJK, etc.)
    any_ascii(&stripped).to_lowercase()
}

/// Decode the handful of HTML entities catalog pages leak into titles.
pub fn decode_entities(s: &str) -> String {
    let mut out = s.to_string();
    for (entity, replacement) in HTML_ENTITIES {
        if out.contains(entity) {
            out = out.replace(entity, replacement);
        }
    }
    out
}

/// Normalize punctuation: curly quotes to straight, every dash variant to '-',
/// HTML entities decoded, whitespace collapsed. Case is preserved.
pub fn normalize_punctuation(s: &str) -> String {
    let result = decode_entities(s)
        .replace(['\u{2018}', '\u{2019}', '\u{00B4}', '\u{0060}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(
            ['\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2015}', '\u{2212}'],
            "-",
        )
        .replace('\u{00A0}', " ");
    MULTI_SPACE.replace_all(result.trim(), " ").to_string()
}

/// Fold to lower-case ASCII and keep only alphanumeric words separated by single spaces.
/// "Burn For You (Ivory Re-fire)" → "burn for you ivory re fire"
pub fn fold_text(s: &str) -> String {
    let folded = fold_to_ascii(&normalize_punctuation(s));
    let spaced: String = folded
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Folded text with all spaces removed, used to match "Re-fire" against "Refire".
pub fn collapse(s: &str) -> String {
    fold_text(s).replace(' ', "")
}

/// Folded word tokens.
pub fn tokens(s: &str) -> Vec<String> {
    fold_text(s).split_whitespace().map(str::to_string).collect()
}

/// Significant tokens: at least 3 characters, not a stopword, first occurrence only.
pub fn significant_tokens(s: &str) -> Vec<String> {
    let mut seen = FxHashSet::default();
    tokens(s)
        .into_iter()
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

// ============================================================================
// TITLE / ARTIST NORMALIZATION
// ============================================================================

/// Strip bracketed segments, featured-artist tails and dash mix suffixes, keeping case.
/// "Never Sleep Again (Original Mix)" → "Never Sleep Again"
pub fn sanitize_title(raw: &str) -> String {
    let mut result = normalize_punctuation(raw);
    result = BRACKETED.replace_all(&result, " ").to_string();
    result = FEAT_TAIL.replace(&result, "").to_string();
    result = DASH_MIX_SUFFIX.replace(&result, "").to_string();
    let result = MULTI_SPACE.replace_all(result.trim(), " ").to_string();
    let result = result.trim_matches(|c: char| c == '-' || c.is_whitespace()).to_string();

    if result.is_empty() {
        normalize_punctuation(raw)
    } else {
        result
    }
}

/// Folded core title used for similarity and coverage checks.
pub fn core_title(raw: &str) -> String {
    fold_text(&sanitize_title(raw))
}

/// Normalize an artist name for comparison. Strips a leading "the ".
pub fn normalize_artist(artist: &str) -> String {
    let folded = fold_text(artist);
    match folded.strip_prefix("the ") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => folded,
    }
}

/// Split a multi-artist string into individual names, display case preserved.
/// Duplicates are dropped case-insensitively; first occurrence wins.
/// e.g., "Duck Sauce, A-Trak & Armand Van Helden" → ["Duck Sauce", "A-Trak", "Armand Van Helden"]
pub fn split_artists(artist_string: &str) -> Vec<String> {
    let cleaned = normalize_punctuation(artist_string);
    let mut seen = FxHashSet::default();
    ARTIST_SEPARATOR
        .split(&cleaned)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(fold_text(name)))
        .map(str::to_string)
        .collect()
}

/// Featured artist names found in brackets of the raw title.
pub fn featured_artists(raw_title: &str) -> Vec<String> {
    let cleaned = normalize_punctuation(raw_title);
    let mut names = Vec::new();
    for caps in FEAT_BRACKET.captures_iter(&cleaned) {
        names.extend(split_artists(&caps[1]));
    }
    if let Some(m) = FEAT_TAIL.find(&cleaned) {
        let tail = BRACKETED.replace_all(m.as_str(), " ");
        let tail = tail.trim();
        let names_part = tail
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest)
            .unwrap_or("");
        names.extend(split_artists(names_part));
    }
    dedup_case_insensitive(names)
}

/// Drop case-insensitive duplicates, preserving first-seen order.
pub fn dedup_case_insensitive(items: Vec<String>) -> Vec<String> {
    let mut seen = FxHashSet::default();
    items
        .into_iter()
        .filter(|s| seen.insert(s.to_lowercase()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("Björk"), "bjork");
        assert_eq!(fold_to_ascii("Röyksopp"), "royksopp");
        assert_eq!(fold_to_ascii("Beyoncé"), "beyonce");
    }

    #[test]
    fn test_normalize_punctuation() {
        assert_eq!(normalize_punctuation("Rock &amp; Roll"), "Rock & Roll");
        assert_eq!(normalize_punctuation("Track \u{2013} Dub"), "Track - Dub");
        assert_eq!(normalize_punctuation("Don\u{2019}t  Stop"), "Don't Stop");
    }

    #[test]
    fn test_fold_text() {
        assert_eq!(fold_text("Burn For You (Ivory Re-fire)"), "burn for you ivory re fire");
        assert_eq!(collapse("Ivory Re-fire"), "ivoryrefire");
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("Never Sleep Again (Original Mix)"), "Never Sleep Again");
        assert_eq!(sanitize_title("Cola [CamelPhat Remix]"), "Cola");
        assert_eq!(sanitize_title("Track - DJ Nova Remix"), "Track");
        assert_eq!(sanitize_title("Song feat. Someone"), "Song");
        // A title that is only a bracket falls back to the raw text
        assert_eq!(sanitize_title("(Intro)"), "(Intro)");
    }

    #[test]
    fn test_significant_tokens() {
        assert_eq!(significant_tokens("Burn For You"), vec!["burn", "you"]);
        assert_eq!(significant_tokens("The Sound of the Sound"), vec!["sound"]);
    }

    #[test]
    fn test_split_artists() {
        assert_eq!(
            split_artists("Duck Sauce, A-Trak & Armand Van Helden"),
            vec!["Duck Sauce", "A-Trak", "Armand Van Helden"]
        );
        assert_eq!(split_artists("DJ Snake x Lil Jon"), vec!["DJ Snake", "Lil Jon"]);
        assert_eq!(split_artists("Artist feat. Other / artist"), vec!["Artist", "Other"]);
        assert!(split_artists("   ").is_empty());
    }

    #[test]
    fn test_normalize_artist() {
        assert_eq!(normalize_artist("The Chemical Brothers"), "chemical brothers");
        assert_eq!(normalize_artist("Tiësto"), "tiesto");
    }

    #[test]
    fn test_featured_artists() {
        assert_eq!(featured_artists("Song (feat. Jane Doe & MC Zed)"), vec!["Jane Doe", "MC Zed"]);
        assert_eq!(featured_artists("Song ft. Jane Doe"), vec!["Jane Doe"]);
        assert!(featured_artists("Plain Song").is_empty());
    }
}
