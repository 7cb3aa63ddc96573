//! Work queue of discovered candidate origins.
//!
//! Strict FIFO with all-time duplicate suppression: an origin that has ever
//! been enqueued — even one dequeued long ago — is never accepted again in
//! the same run. Fairness falls out of the FIFO order; every accepted
//! origin eventually reaches the front.

use std::collections::{HashSet, VecDeque};

/// Ordered, duplicate-free queue of origins awaiting a session slot.
#[derive(Debug, Default)]
pub struct DiscoveryQueue {
    queue: VecDeque<String>,
    /// Everything ever enqueued, including entries long since dequeued.
    seen: HashSet<String>,
}

impl DiscoveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `origin` unless it was ever enqueued before.
    ///
    /// Returns whether the origin was accepted.
    pub fn enqueue(&mut self, origin: &str) -> bool {
        if !self.seen.insert(origin.to_string()) {
            return false;
        }
        self.queue.push_back(origin.to_string());
        true
    }

    /// Remove and return the oldest origin, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = DiscoveryQueue::new();
        q.enqueue("https://a.example");
        q.enqueue("https://b.example");
        q.enqueue("https://c.example");
        assert_eq!(q.dequeue().as_deref(), Some("https://a.example"));
        assert_eq!(q.dequeue().as_deref(), Some("https://b.example"));
        assert_eq!(q.dequeue().as_deref(), Some("https://c.example"));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn test_duplicates_rejected_while_queued() {
        let mut q = DiscoveryQueue::new();
        assert!(q.enqueue("https://a.example"));
        assert!(!q.enqueue("https://a.example"));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_duplicates_rejected_after_dequeue() {
        let mut q = DiscoveryQueue::new();
        q.enqueue("https://a.example");
        assert_eq!(q.dequeue().as_deref(), Some("https://a.example"));
        // History suppression: the origin was already queued once this run.
        assert!(!q.enqueue("https://a.example"));
        assert!(q.is_empty());
    }

    #[test]
    fn test_no_duplicates_at_any_point() {
        let mut q = DiscoveryQueue::new();
        assert!(q.enqueue("https://a.example"));
        assert!(q.enqueue("https://b.example"));
        assert!(!q.enqueue("https://a.example"));
        assert!(q.enqueue("https://c.example"));
        assert!(!q.enqueue("https://b.example"));
        assert_eq!(q.len(), 3);
        let drained: Vec<String> = std::iter::from_fn(|| q.dequeue()).collect();
        assert_eq!(
            drained,
            ["https://a.example", "https://b.example", "https://c.example"]
        );
    }
}
