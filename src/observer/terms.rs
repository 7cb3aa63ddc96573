//! Search-term harvesting from observed request URLs.
//!
//! When any open page issues a request that looks like a search
//! (`...?q=winter+boots`), the phrase is remembered for that site's base
//! domain. A later Search session dispatched to the same site replays a
//! plausible query instead of an invented one. Last write wins; the store
//! is rebuilt from observation on every run.

use super::base_domain;
use std::collections::HashMap;
use url::Url;

/// Reply value that signals "no term available" to the Search strategy.
pub const NO_TERM: &str = " ";

/// Query parameters that commonly carry a search phrase.
const QUERY_PARAMS: &[&str] = &["q", "query", "search", "s", "p", "text", "wd"];

/// Longest phrase worth replaying.
const MAX_TERM_LEN: usize = 100;

/// Base-domain → most recent search phrase seen going there.
#[derive(Debug, Default)]
pub struct TermStore {
    terms: HashMap<String, String>,
}

impl TermStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `term` for the base domain of `site`, replacing any earlier
    /// one. Returns false when `site` has no extractable base domain.
    pub fn put(&mut self, site: &str, term: &str) -> bool {
        let Some(base) = base_domain(site) else {
            return false;
        };
        self.terms.insert(base, term.to_string());
        true
    }

    /// Term stored for the base domain of `origin`, or the [`NO_TERM`]
    /// sentinel when nothing is known.
    pub fn term_for(&self, origin: &str) -> String {
        base_domain(origin)
            .and_then(|base| self.terms.get(&base).cloned())
            .unwrap_or_else(|| NO_TERM.to_string())
    }

    /// Inspect an observed request URL for a search-query parameter and
    /// store its value under the destination's base domain.
    ///
    /// Returns whether a term was harvested.
    pub fn harvest(&mut self, request_url: &str) -> bool {
        let Ok(url) = Url::parse(request_url) else {
            return false;
        };
        let Some(raw) = url
            .query_pairs()
            .find(|(k, _)| QUERY_PARAMS.contains(&k.as_ref()))
            .map(|(_, v)| v.into_owned())
        else {
            return false;
        };

        // query_pairs percent-decodes but leaves form-encoded spaces.
        let term = raw.replace('+', " ").trim().to_string();
        if term.is_empty() || term.len() > MAX_TERM_LEN || !term.chars().any(|c| c.is_alphabetic())
        {
            return false;
        }

        self.put(request_url, &term)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harvest_q_parameter() {
        let mut store = TermStore::new();
        assert!(store.harvest("https://search.example.com/find?q=winter+boots&page=2"));
        assert_eq!(store.term_for("https://example.com"), "winter boots");
    }

    #[test]
    fn test_harvest_skips_non_search_urls() {
        let mut store = TermStore::new();
        assert!(!store.harvest("https://example.com/article/17"));
        assert!(!store.harvest("https://example.com/?page=2&sort=asc"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_harvest_rejects_non_phrases() {
        let mut store = TermStore::new();
        // No alphabetic content — a sort index, not a phrase.
        assert!(!store.harvest("https://example.com/?s=12345"));
        // Oversized payloads are not worth replaying.
        let long = format!("https://example.com/?q={}", "a".repeat(150));
        assert!(!store.harvest(&long));
        assert!(store.is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = TermStore::new();
        store.harvest("https://example.com/?q=first");
        store.harvest("https://example.com/?q=second");
        assert_eq!(store.term_for("https://example.com"), "second");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_lookup_matches_across_subdomains() {
        let mut store = TermStore::new();
        store.harvest("https://www.example.com/search?query=rust%20async");
        assert_eq!(store.term_for("https://example.com"), "rust async");
        assert_eq!(store.term_for("https://shop.example.com"), "rust async");
    }

    #[test]
    fn test_missing_term_yields_sentinel() {
        let store = TermStore::new();
        assert_eq!(store.term_for("https://example.com"), NO_TERM);
        assert_eq!(store.term_for("not a url"), NO_TERM);
    }

    #[test]
    fn test_put_and_term_for_roundtrip() {
        let mut store = TermStore::new();
        store.put("https://example.com", "hand-seeded");
        assert_eq!(store.term_for("https://news.example.com"), "hand-seeded");
    }
}
