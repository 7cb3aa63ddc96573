//! Run statistics — what the decoy layer has produced so far.
//!
//! Three monotonic counters (sites visited, links clicked, searches
//! performed) survive restarts through a JSON record in the chaff home
//! directory. The daily connection counter shares the record but resets
//! itself on a calendar-day boundary; it is a budget, not a statistic, and
//! a user-requested reset leaves it alone.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Counter selector carried by the increment protocol op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatCounter {
    VisitedSites,
    ClickedLinks,
    KeywordSearches,
}

/// Point-in-time view of the store, also its on-disk format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub visited_sites: u64,
    pub clicked_links: u64,
    pub keyword_searches: u64,
    #[serde(default)]
    pub daily_connections: u64,
    #[serde(default)]
    pub day_stamp: Option<NaiveDate>,
}

/// Owner of all counters. Mutated only from the orchestrator's control
/// task; loaded on startup, persisted on shutdown and on reset.
pub struct StatisticsStore {
    visited_sites: u64,
    clicked_links: u64,
    keyword_searches: u64,
    daily_connections: u64,
    day_stamp: NaiveDate,
    path: Option<PathBuf>,
}

impl StatisticsStore {
    /// Store with no backing file; `persist` becomes a no-op.
    pub fn in_memory(today: NaiveDate) -> Self {
        Self {
            visited_sites: 0,
            clicked_links: 0,
            keyword_searches: 0,
            daily_connections: 0,
            day_stamp: today,
            path: None,
        }
    }

    /// Load counters from `path`, starting zeroed when the file is missing.
    ///
    /// A corrupt record is logged and discarded rather than propagated —
    /// losing counters must never keep the daemon from starting.
    pub fn load(path: &Path, today: NaiveDate) -> Self {
        let mut store = Self::in_memory(today);
        store.path = Some(path.to_path_buf());

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return store,
        };
        match serde_json::from_str::<StatsSnapshot>(&raw) {
            Ok(snap) => {
                store.visited_sites = snap.visited_sites;
                store.clicked_links = snap.clicked_links;
                store.keyword_searches = snap.keyword_searches;
                // The daily budget survives a same-day restart only.
                if snap.day_stamp == Some(today) {
                    store.daily_connections = snap.daily_connections;
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding unreadable statistics record");
            }
        }
        store
    }

    /// Write the current counters to the backing file, if any.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)
            .with_context(|| format!("writing statistics to {}", path.display()))
    }

    /// Bump one public counter.
    pub fn increment(&mut self, counter: StatCounter) {
        match counter {
            StatCounter::VisitedSites => self.visited_sites += 1,
            StatCounter::ClickedLinks => self.clicked_links += 1,
            StatCounter::KeywordSearches => self.keyword_searches += 1,
        }
    }

    /// Count one dispatched connection against today's budget.
    pub fn record_connection(&mut self, today: NaiveDate) {
        self.roll_day(today);
        self.daily_connections += 1;
    }

    /// Connections already spent today, rolling the day boundary first.
    pub fn daily_connections(&mut self, today: NaiveDate) -> u64 {
        self.roll_day(today);
        self.daily_connections
    }

    /// Zero the three public counters and persist. The daily budget is not
    /// a statistic and is left untouched.
    pub fn reset(&mut self) -> Result<()> {
        self.visited_sites = 0;
        self.clicked_links = 0;
        self.keyword_searches = 0;
        self.persist()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            visited_sites: self.visited_sites,
            clicked_links: self.clicked_links,
            keyword_searches: self.keyword_searches,
            daily_connections: self.daily_connections,
            day_stamp: Some(self.day_stamp),
        }
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if today != self.day_stamp {
            self.day_stamp = today;
            self.daily_connections = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_counters_are_monotonic_between_resets() {
        let mut store = StatisticsStore::in_memory(day("2026-08-23"));
        let mut last = store.snapshot();
        for counter in [
            StatCounter::VisitedSites,
            StatCounter::ClickedLinks,
            StatCounter::VisitedSites,
            StatCounter::KeywordSearches,
        ] {
            store.increment(counter);
            let now = store.snapshot();
            assert!(now.visited_sites >= last.visited_sites);
            assert!(now.clicked_links >= last.clicked_links);
            assert!(now.keyword_searches >= last.keyword_searches);
            last = now;
        }
        assert_eq!(last.visited_sites, 2);
        assert_eq!(last.clicked_links, 1);
        assert_eq!(last.keyword_searches, 1);
    }

    #[test]
    fn test_reset_yields_exactly_zero_zero_zero() {
        let mut store = StatisticsStore::in_memory(day("2026-08-23"));
        store.increment(StatCounter::VisitedSites);
        store.increment(StatCounter::ClickedLinks);
        store.increment(StatCounter::KeywordSearches);
        store.record_connection(day("2026-08-23"));
        store.reset().unwrap();
        let snap = store.snapshot();
        assert_eq!(
            (snap.visited_sites, snap.clicked_links, snap.keyword_searches),
            (0, 0, 0)
        );
        // The daily budget is not part of the user-visible statistics.
        assert_eq!(snap.daily_connections, 1);
    }

    #[test]
    fn test_daily_counter_resets_on_day_boundary() {
        let mut store = StatisticsStore::in_memory(day("2026-08-23"));
        store.record_connection(day("2026-08-23"));
        store.record_connection(day("2026-08-23"));
        assert_eq!(store.daily_connections(day("2026-08-23")), 2);
        assert_eq!(store.daily_connections(day("2026-08-24")), 0);
        store.record_connection(day("2026-08-24"));
        assert_eq!(store.daily_connections(day("2026-08-24")), 1);
    }

    #[test]
    fn test_persist_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let today = day("2026-08-23");

        let mut store = StatisticsStore::load(&path, today);
        store.increment(StatCounter::VisitedSites);
        store.increment(StatCounter::KeywordSearches);
        store.record_connection(today);
        store.persist().unwrap();

        let mut reloaded = StatisticsStore::load(&path, today);
        let snap = reloaded.snapshot();
        assert_eq!(snap.visited_sites, 1);
        assert_eq!(snap.keyword_searches, 1);
        assert_eq!(reloaded.daily_connections(today), 1);
    }

    #[test]
    fn test_load_drops_stale_daily_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let mut store = StatisticsStore::load(&path, day("2026-08-23"));
        store.record_connection(day("2026-08-23"));
        store.persist().unwrap();

        let mut next_day = StatisticsStore::load(&path, day("2026-08-24"));
        assert_eq!(next_day.daily_connections(day("2026-08-24")), 0);
    }

    #[test]
    fn test_load_survives_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, "not json").unwrap();
        let store = StatisticsStore::load(&path, day("2026-08-23"));
        assert_eq!(store.snapshot().visited_sites, 0);
    }

    #[test]
    fn test_missing_file_starts_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatisticsStore::load(&dir.path().join("absent.json"), day("2026-08-23"));
        assert_eq!(store.snapshot(), StatsSnapshot {
            visited_sites: 0,
            clicked_links: 0,
            keyword_searches: 0,
            daily_connections: 0,
            day_stamp: Some(day("2026-08-23")),
        });
    }
}
