//! Candidate retrieval collaborator.

use crate::models::CandidateMetadata;

/// Where candidate URLs and their metadata come from.
///
/// Implementations own retries, backoff and response decoding. Neither method
/// reports errors: a failed search is an empty list, and an empty or
/// unparseable page is `None`. Calls come from several fetch workers at once.
pub trait CandidateSource: Send + Sync {
    /// Candidate URLs for one query, best first, at most `max_results`.
    fn search(&self, query: &str, max_results: usize) -> Vec<String>;

    fn fetch_metadata(&self, url: &str) -> Option<CandidateMetadata>;
}
