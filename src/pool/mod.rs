//! Fixed-capacity registry of open fake-connection sessions.
//!
//! The pool is a plain slot array sized once at startup from the
//! max-connections setting. It never resizes, so the asynchronous open and
//! close paths can never race a growing structure; a slot index stays valid
//! for the whole life of the session that occupies it. All mutation happens
//! on the orchestrator's single control task, so there is no locking here.

use crate::host::TabId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Behavior algorithm assigned to a session at creation, immutable after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Sit on the page for a while, then close.
    Idle,
    /// Activate one random link, then close after the redirect lands.
    Navigate,
    /// Fill and submit a search form, then close after the results load.
    Search,
}

impl Algorithm {
    /// Uniform random choice among the three algorithms.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        match rng.gen_range(0..3) {
            0 => Algorithm::Idle,
            1 => Algorithm::Navigate,
            _ => Algorithm::Search,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::Idle => "idle",
            Algorithm::Navigate => "navigate",
            Algorithm::Search => "search",
        };
        f.write_str(name)
    }
}

/// One open fake-connection tab.
#[derive(Debug)]
pub struct Session {
    /// Tab handle, pending (`None`) between slot claim and the host
    /// reporting the opened tab.
    pub handle: Option<TabId>,
    /// Algorithm the page-side worker will execute.
    pub algorithm: Algorithm,
    /// True until the worker receives its first handshake dispatch.
    /// Distinguishes "first load, should execute" from "redirected,
    /// should terminate".
    pub fresh: bool,
    /// Destination origin this session was dispatched to.
    pub origin: String,
    /// When the slot was claimed.
    pub created_at: Instant,
}

impl Session {
    fn new(algorithm: Algorithm, origin: String) -> Self {
        Self {
            handle: None,
            algorithm,
            fresh: true,
            origin,
            created_at: Instant::now(),
        }
    }
}

/// Stable index of a pool slot.
pub type SlotIndex = usize;

/// Fixed-capacity session registry.
pub struct SessionPool {
    slots: Vec<Option<Session>>,
}

impl SessionPool {
    /// Create a pool with `capacity` slots. Capacity is fixed for the
    /// lifetime of the pool.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    /// Claim the first empty slot for a new fresh session.
    ///
    /// Returns the slot index, or `None` when the pool is full — a normal
    /// scheduling condition, not an error.
    pub fn try_acquire(&mut self, algorithm: Algorithm, origin: &str) -> Option<SlotIndex> {
        let idx = self.slots.iter().position(|s| s.is_none())?;
        self.slots[idx] = Some(Session::new(algorithm, origin.to_string()));
        Some(idx)
    }

    /// Record the tab handle once the host has opened the tab.
    pub fn bind(&mut self, slot: SlotIndex, handle: TabId) {
        if let Some(Some(session)) = self.slots.get_mut(slot) {
            session.handle = Some(handle);
        }
    }

    /// Reset the slot holding `handle` to empty.
    ///
    /// Idempotent: releasing a handle that is no longer (or never was) in
    /// the pool is a no-op and returns `false`. A session is routinely
    /// released twice — once by its disconnect and once by the external
    /// tab-close notification.
    pub fn release(&mut self, handle: TabId) -> bool {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(s) if s.handle == Some(handle)) {
                *slot = None;
                return true;
            }
        }
        false
    }

    /// Reset a slot by index, for the path where the tab never opened and
    /// no handle exists to release by.
    pub fn release_slot(&mut self, slot: SlotIndex) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = None;
        }
    }

    /// Session holding `handle`, if any.
    pub fn find(&self, handle: TabId) -> Option<&Session> {
        self.slots
            .iter()
            .flatten()
            .find(|s| s.handle == Some(handle))
    }

    /// Mutable session holding `handle`, if any.
    pub fn find_mut(&mut self, handle: TabId) -> Option<&mut Session> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|s| s.handle == Some(handle))
    }

    /// Number of occupied slots.
    pub fn open_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Configured maximum concurrent sessions.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.open_count() >= self.capacity()
    }

    /// Open sessions in slot order.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.slots.iter().flatten()
    }

    /// Handles of all bound sessions, for shutdown cleanup.
    pub fn open_handles(&self) -> Vec<TabId> {
        self.sessions().filter_map(|s| s.handle).collect()
    }
}
