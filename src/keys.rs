//! Musical key parsing for the key bonus.
//!
//! Accepts the spellings DJ software and catalogs use: "A Minor", "Am",
//! "F# min", "G♭ Major", "Ebm", and Camelot codes like "8A".

use once_cell::sync::Lazy;
use regex::Regex;

static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([a-g])\s*(#|b|♯|♭|sharp|flat)?\s*(maj(?:or)?|min(?:or)?|m)?\s*$").unwrap()
});

static CAMELOT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*(1[0-2]|[1-9])\s*([ab])\s*$").unwrap());

/// Pitch classes of the natural notes, C = 0.
const NATURALS: [(char, u8); 7] = [('c', 0), ('d', 2), ('e', 4), ('f', 5), ('g', 7), ('a', 9), ('b', 11)];

/// Camelot wheel position 1..=12 to minor ("A") pitch class.
const CAMELOT_MINOR: [u8; 12] = [8, 3, 10, 5, 0, 7, 2, 9, 4, 11, 6, 1];

/// Camelot wheel position 1..=12 to major ("B") pitch class.
const CAMELOT_MAJOR: [u8; 12] = [11, 6, 1, 8, 3, 10, 5, 0, 7, 2, 9, 4];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicalKey {
    pub pitch_class: u8,
    pub minor: bool,
    /// Spelling as written, e.g. "f#" or "gb"; Camelot keys use their pitch name.
    pub spelling: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRelation {
    Exact,
    /// Same pitch and mode, different spelling (F# minor vs Gb minor),
    /// or the relative major/minor (A minor vs C major).
    Near,
    Unrelated,
}

impl MusicalKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = raw.trim();
        if cleaned.is_empty() {
            return None;
        }

        if let Some(caps) = CAMELOT_PATTERN.captures(cleaned) {
            let position: usize = caps[1].parse().ok()?;
            let minor = caps[2].eq_ignore_ascii_case("a");
            let table = if minor { &CAMELOT_MINOR } else { &CAMELOT_MAJOR };
            let pitch_class = table[position - 1];
            return Some(Self {
                pitch_class,
                minor,
                spelling: sharp_name(pitch_class).to_string(),
            });
        }

        let caps = KEY_PATTERN.captures(cleaned)?;
        let letter = caps[1].chars().next()?.to_ascii_lowercase();
        let natural = NATURALS.iter().find(|(c, _)| *c == letter)?.1;

        let (offset, accidental) = match caps.get(2).map(|m| m.as_str().to_lowercase()) {
            Some(a) if a == "#" || a == "♯" || a == "sharp" => (1i16, "#"),
            Some(a) if a == "b" || a == "♭" || a == "flat" => (-1i16, "b"),
            _ => (0, ""),
        };
        let pitch_class = (natural as i16 + offset).rem_euclid(12) as u8;

        let minor = match caps.get(3).map(|m| m.as_str()) {
            // "m", "min", "minor" are minor; "maj", "major" are major
            Some(mode) => mode.to_lowercase().starts_with("m") && !mode.to_lowercase().starts_with("maj"),
            None => false,
        };

        Some(Self {
            pitch_class,
            minor,
            spelling: format!("{}{}", letter, accidental),
        })
    }

    pub fn relation(&self, other: &MusicalKey) -> KeyRelation {
        if self.pitch_class == other.pitch_class && self.minor == other.minor {
            if self.spelling == other.spelling {
                KeyRelation::Exact
            } else {
                KeyRelation::Near
            }
        } else if self.minor != other.minor && self.relative_pitch() == other.pitch_class {
            KeyRelation::Near
        } else {
            KeyRelation::Unrelated
        }
    }

    /// Pitch class of the relative major (for a minor key) or relative minor (for a major key).
    fn relative_pitch(&self) -> u8 {
        if self.minor {
            (self.pitch_class + 3) % 12
        } else {
            (self.pitch_class + 9) % 12
        }
    }
}

fn sharp_name(pitch_class: u8) -> &'static str {
    const NAMES: [&str; 12] = ["c", "c#", "d", "d#", "e", "f", "f#", "g", "g#", "a", "a#", "b"];
    NAMES[(pitch_class % 12) as usize]
}

/// Compare two raw key strings. Unparseable or missing keys are unrelated.
pub fn compare_keys(a: Option<&str>, b: Option<&str>) -> KeyRelation {
    match (a.and_then(MusicalKey::parse), b.and_then(MusicalKey::parse)) {
        (Some(ka), Some(kb)) => ka.relation(&kb),
        _ => KeyRelation::Unrelated,
    }
}
