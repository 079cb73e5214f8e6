//! Fuzzy similarity between titles and artist lists.
//!
//! The matcher only depends on the [`SimilarityProvider`] trait. [`TokenSetRatio`]
//! is the default implementation: a token-set ratio on folded text, built on
//! normalized Levenshtein distance.

use std::collections::BTreeSet;

use strsim::normalized_levenshtein;

use crate::normalize::fold_text;

/// Scores two strings 0..=100.
pub trait SimilarityProvider: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> u8;

    /// Compare each input artist against its best match among the candidate
    /// artists and average the results. Either side empty scores 0.
    fn artist_similarity(&self, input_artists: &[String], candidate_artists: &[String]) -> u8 {
        if input_artists.is_empty() || candidate_artists.is_empty() {
            return 0;
        }
        let total: u32 = input_artists
            .iter()
            .map(|input| {
                candidate_artists
                    .iter()
                    .map(|candidate| self.similarity(input, candidate))
                    .max()
                    .unwrap_or(0) as u32
            })
            .sum();
        (total as f64 / input_artists.len() as f64).round() as u8
    }
}

/// Token-set ratio: word order and duplicate words are ignored, and a string
/// whose words are a subset of the other's scores 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSetRatio;

impl TokenSetRatio {
    fn ratio(a: &str, b: &str) -> f64 {
        normalized_levenshtein(a, b) * 100.0
    }
}

impl SimilarityProvider for TokenSetRatio {
    fn similarity(&self, a: &str, b: &str) -> u8 {
        let a = fold_text(a);
        let b = fold_text(b);
        if a.is_empty() || b.is_empty() {
            return 0;
        }
        if a == b {
            return 100;
        }

        let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
        let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

        let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
        let diff_ab: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
        let diff_ba: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

        if !intersection.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
            return 100;
        }

        let sect = intersection.join(" ");
        let join = |diff: &[&str]| {
            if sect.is_empty() {
                diff.join(" ")
            } else {
                format!("{} {}", sect, diff.join(" "))
            }
        };
        let combined_ab = join(&diff_ab);
        let combined_ba = join(&diff_ba);

        let mut best = Self::ratio(&combined_ab, &combined_ba);
        if !sect.is_empty() {
            best = best
                .max(Self::ratio(&sect, &combined_ab))
                .max(Self::ratio(&sect, &combined_ba));
        }
        best.round().clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_and_empty() {
        let sim = TokenSetRatio;
        assert_eq!(sim.similarity("Never Sleep Again", "never sleep again"), 100);
        assert_eq!(sim.similarity("", "x"), 0);
    }

    #[test]
    fn test_subset_scores_full() {
        let sim = TokenSetRatio;
        assert_eq!(sim.similarity("Sleep Again", "Never Sleep Again"), 100);
        assert_eq!(sim.similarity("again sleep never", "Never Sleep Again"), 100);
    }

    #[test]
    fn test_partial_overlap() {
        let sim = TokenSetRatio;
        let score = sim.similarity("Never Sleep Again", "Never Sleep Tonight");
        assert!(score > 50 && score < 100, "score {}", score);
        assert!(sim.similarity("Completely Different", "Never Sleep Again") < 50);
    }

    #[test]
    fn test_artist_similarity_averages_best_matches() {
        let sim = TokenSetRatio;
        let input = vec!["Tim Green".to_string()];
        let candidates = vec!["Somebody Else".to_string(), "Tim Green".to_string()];
        assert_eq!(sim.artist_similarity(&input, &candidates), 100);

        let input = vec!["Tim Green".to_string(), "Nobody Known".to_string()];
        let score = sim.artist_similarity(&input, &candidates);
        assert!(score >= 50 && score < 100, "score {}", score);

        assert_eq!(sim.artist_similarity(&[], &candidates), 0);
    }
}
