//! Passive third-party request observation and origin discovery.
//!
//! Every outbound request from an open page flows through [`ThirdPartyObserver::observe`].
//! First-party requests are discarded; third-party endpoints are indexed
//! under the requesting origin. When an origin is seen contacting an
//! endpoint already recorded under some *other* origin of a different base
//! domain, the requester is pushed onto the discovery queue: two sites that
//! share an advertiser or tracker are plausibly visited by the same
//! audience, which makes either a credible decoy destination.

pub mod terms;

use crate::discovery::DiscoveryQueue;
use crate::host::ResourceType;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};
use url::Url;

/// Resource types never worth indexing. Pure cost reduction; correctness
/// does not depend on the set.
const EXCLUDED_RESOURCE_TYPES: &[ResourceType] = &[ResourceType::Image, ResourceType::Stylesheet];

/// Second-level labels that act as public suffixes under a two-letter
/// country TLD (`co.uk`, `com.au`, ...). Heavyweight suffix lists are not
/// worth carrying for traffic shaping; these cover the overwhelming bulk.
const SECOND_LEVEL_SUFFIXES: &[&str] = &["co", "com", "net", "org", "ac", "gov", "edu"];

/// Registrable base domain of a URL or origin string.
///
/// `https://ads.example.co.uk/x` → `example.co.uk`. IP-literal hosts are
/// their own base domain. Returns `None` when no base domain can be
/// extracted (no host, single-label host, unparseable input) — callers
/// treat that as "skip", never as an error.
pub fn base_domain(input: &str) -> Option<String> {
    let url = Url::parse(input).ok()?;
    let host = url.host_str()?;

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<std::net::IpAddr>().is_ok() {
        return Some(bare.to_string());
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }

    let take = if labels.len() >= 3
        && labels[labels.len() - 1].len() == 2
        && SECOND_LEVEL_SUFFIXES.contains(&labels[labels.len() - 2])
    {
        3
    } else {
        2
    };
    Some(labels[labels.len() - take..].join("."))
}

/// Index of which third-party endpoints each origin has been seen
/// contacting. Grows monotonically within a run; never shrinks.
pub struct ThirdPartyObserver {
    index: HashMap<String, HashSet<String>>,
}

impl ThirdPartyObserver {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
        }
    }

    /// Record one outbound request and run the cross-reference step.
    ///
    /// Malformed URLs and first-party requests are skipped silently; this
    /// path must never abort request processing.
    pub fn observe(
        &mut self,
        requesting_origin: &str,
        request_url: &str,
        resource_type: ResourceType,
        queue: &mut DiscoveryQueue,
    ) {
        if EXCLUDED_RESOURCE_TYPES.contains(&resource_type) {
            return;
        }
        let Some(origin_base) = base_domain(requesting_origin) else {
            return;
        };
        let Some(request_base) = base_domain(request_url) else {
            return;
        };
        if origin_base == request_base {
            // First-party traffic carries no audience signal.
            return;
        }

        let newly_recorded = self
            .index
            .entry(requesting_origin.to_string())
            .or_default()
            .insert(request_url.to_string());
        if !newly_recorded {
            // A repeated pair is a no-op, discovery included.
            return;
        }
        trace!(origin = requesting_origin, endpoint = request_url, "third-party recorded");

        // Cross-reference: does any other origin of a different base domain
        // already contact this endpoint? If so the requester shares an
        // audience with it and becomes a candidate destination.
        let shared = self.index.iter().any(|(other, endpoints)| {
            other != requesting_origin
                && base_domain(other).is_some_and(|b| b != origin_base)
                && endpoints.contains(request_url)
        });
        if shared && queue.enqueue(requesting_origin) {
            debug!(
                origin = requesting_origin,
                endpoint = request_url,
                "origin discovered via shared third party"
            );
        }
    }

    /// Number of origins with at least one recorded endpoint.
    pub fn origin_count(&self) -> usize {
        self.index.len()
    }

    /// Total distinct (origin, endpoint) pairs recorded.
    pub fn endpoint_count(&self) -> usize {
        self.index.values().map(|e| e.len()).sum()
    }
}

impl Default for ThirdPartyObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe_all(
        obs: &mut ThirdPartyObserver,
        queue: &mut DiscoveryQueue,
        calls: &[(&str, &str)],
    ) {
        for (origin, url) in calls {
            obs.observe(origin, url, ResourceType::Script, queue);
        }
    }

    #[test]
    fn test_base_domain_plain() {
        assert_eq!(base_domain("https://example.com/x").as_deref(), Some("example.com"));
        assert_eq!(base_domain("https://ads.tracker.example.com").as_deref(), Some("example.com"));
    }

    #[test]
    fn test_base_domain_second_level_suffix() {
        assert_eq!(base_domain("https://news.bbc.co.uk").as_deref(), Some("bbc.co.uk"));
        assert_eq!(base_domain("https://shop.a.com.au/p").as_deref(), Some("a.com.au"));
    }

    #[test]
    fn test_base_domain_ip_literal() {
        assert_eq!(base_domain("http://192.168.0.1:8080/x").as_deref(), Some("192.168.0.1"));
    }

    #[test]
    fn test_base_domain_rejects_hostless_and_single_label() {
        assert_eq!(base_domain("about:blank"), None);
        assert_eq!(base_domain("http://localhost/x"), None);
        assert_eq!(base_domain("not a url"), None);
        assert_eq!(base_domain(""), None);
    }

    #[test]
    fn test_first_party_never_recorded() {
        let mut obs = ThirdPartyObserver::new();
        let mut queue = DiscoveryQueue::new();
        obs.observe(
            "https://app.example.com",
            "https://cdn.example.com/app.js",
            ResourceType::Script,
            &mut queue,
        );
        assert_eq!(obs.endpoint_count(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_excluded_resource_types_ignored() {
        let mut obs = ThirdPartyObserver::new();
        let mut queue = DiscoveryQueue::new();
        obs.observe("https://a.example", "https://t.example/p.png", ResourceType::Image, &mut queue);
        obs.observe("https://a.example", "https://t.example/s.css", ResourceType::Stylesheet, &mut queue);
        assert_eq!(obs.endpoint_count(), 0);
    }

    #[test]
    fn test_malformed_urls_skipped_silently() {
        let mut obs = ThirdPartyObserver::new();
        let mut queue = DiscoveryQueue::new();
        obs.observe("garbage", "https://t.example/x.js", ResourceType::Script, &mut queue);
        obs.observe("https://a.example", "data:text/plain,hi", ResourceType::Script, &mut queue);
        assert_eq!(obs.endpoint_count(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shared_endpoint_discovers_second_requester() {
        let mut obs = ThirdPartyObserver::new();
        let mut queue = DiscoveryQueue::new();
        observe_all(
            &mut obs,
            &mut queue,
            &[
                ("https://a.example", "https://t.example/ad.js"),
                ("https://b.example", "https://t.example/ad.js"),
            ],
        );
        // B shares A's tracker, so B is the discovered candidate — not A.
        assert_eq!(queue.dequeue().as_deref(), Some("https://b.example"));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_same_base_domain_pair_triggers_nothing() {
        let mut obs = ThirdPartyObserver::new();
        let mut queue = DiscoveryQueue::new();
        observe_all(
            &mut obs,
            &mut queue,
            &[
                ("https://a.example", "https://t.example/ad.js"),
                ("https://www.a.example", "https://t.example/ad.js"),
            ],
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_repeated_pair_is_noop() {
        let mut obs = ThirdPartyObserver::new();
        let mut queue = DiscoveryQueue::new();
        observe_all(
            &mut obs,
            &mut queue,
            &[
                ("https://b.example", "https://t.example/ad.js"),
                ("https://a.example", "https://t.example/ad.js"),
            ],
        );
        assert_eq!(queue.dequeue().as_deref(), Some("https://a.example"));
        // Replaying B's request does not resurrect it as a candidate.
        obs.observe("https://b.example", "https://t.example/ad.js", ResourceType::Script, &mut queue);
        assert!(queue.is_empty());
        assert_eq!(obs.endpoint_count(), 2);
    }

    #[test]
    fn test_index_grows_monotonically() {
        let mut obs = ThirdPartyObserver::new();
        let mut queue = DiscoveryQueue::new();
        observe_all(
            &mut obs,
            &mut queue,
            &[
                ("https://a.example", "https://t.example/one.js"),
                ("https://a.example", "https://u.example/two.js"),
            ],
        );
        assert_eq!(obs.origin_count(), 1);
        assert_eq!(obs.endpoint_count(), 2);
        // Both endpoints are live cross-reference material: a later origin
        // contacting either one is discovered.
        obs.observe("https://c.example", "https://t.example/one.js", ResourceType::Script, &mut queue);
        obs.observe("https://d.example", "https://u.example/two.js", ResourceType::Script, &mut queue);
        assert_eq!(queue.dequeue().as_deref(), Some("https://c.example"));
        assert_eq!(queue.dequeue().as_deref(), Some("https://d.example"));
    }
}
