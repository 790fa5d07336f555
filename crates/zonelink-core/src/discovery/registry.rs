//! In-memory table of discovered peers with TTL expiry and probe eviction.
//!
//! # Ownership (for beginners)
//!
//! The registry is a plain struct with no interior locking.  The async layer
//! that owns it wraps it in a single `Mutex` so that every mutation and every
//! [`PeerRegistry::list_groups`] snapshot happens under one lock.  That gives
//! readers a consistent view of records whose fields are read together.
//!
//! Every mutating method returns whether the externally published group list
//! may have changed, so the caller can decide whether to broadcast.  Callers
//! batch these results over a maintenance pass and notify once.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

use icu_collator::{Collator, CollatorOptions, Strength};
use tracing::{debug, warn};

use super::peer::{GroupSummary, PeerId, PeerRecord};

/// Known peers keyed by identity.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerRecord>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `record`, replacing any existing record with the same identity.
    ///
    /// Returns `true` when the identity is new or when the published
    /// projection of the record changed (name, address, coordinator flag).
    /// A pure TTL refresh returns `false`.
    pub fn upsert(&mut self, record: PeerRecord) -> bool {
        let changed = match self.peers.get(&record.id) {
            None => true,
            Some(prev) => {
                prev.is_coordinator != record.is_coordinator || prev.summary() != record.summary()
            }
        };
        self.peers.insert(record.id.clone(), record);
        changed
    }

    /// Removes the record for `id`.  Idempotent; returns whether a record was removed.
    pub fn remove(&mut self, id: &PeerId) -> bool {
        let removed = self.peers.remove(id).is_some();
        if removed {
            debug!(peer = %id, "peer withdrawn");
        }
        removed
    }

    /// Removes every record whose `expires_at <= now`.
    ///
    /// Returns `true` if any record was removed.
    pub fn expire_stale(&mut self, now: Instant) -> bool {
        let before = self.peers.len();
        self.peers.retain(|id, peer| {
            let keep = peer.expires_at > now;
            if !keep {
                debug!(peer = %id, "peer expired");
            }
            keep
        });
        self.peers.len() != before
    }

    /// Removes every record whose `acquired_at < cutoff`.
    ///
    /// Used at the end of a probe cycle with `cutoff` set to the cycle's start
    /// time: peers that neither answered the probe nor advertised since then
    /// are dropped.  Returns `true` if any record was removed.
    pub fn evict_unresponsive(&mut self, cutoff: Instant) -> bool {
        let before = self.peers.len();
        self.peers.retain(|id, peer| {
            let keep = peer.acquired_at >= cutoff;
            if !keep {
                debug!(peer = %id, "peer did not answer probe cycle; evicting");
            }
            keep
        });
        self.peers.len() != before
    }

    /// Returns the published group list: one summary per coordinator,
    /// sorted by name (root-locale collation ignoring case, then exact),
    /// ties broken by identity.
    pub fn list_groups(&self) -> Vec<GroupSummary> {
        let mut coordinators: Vec<&PeerRecord> =
            self.peers.values().filter(|p| p.is_coordinator).collect();
        let collator = name_collator();
        coordinators.sort_by(|a, b| {
            compare_names(collator.as_ref(), &a.group_name, &b.group_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        coordinators.into_iter().map(PeerRecord::summary).collect()
    }

    /// Returns the record for `id`, if present.
    pub fn get(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    /// Returns `true` if a record for `id` is present.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Number of records, coordinators and members alike.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Root-locale collator at secondary strength: accents count, case does not.
fn name_collator() -> Option<Collator> {
    let mut options = CollatorOptions::new();
    options.strength = Some(Strength::Secondary);
    match Collator::try_new(&Default::default(), options) {
        Ok(collator) => Some(collator),
        Err(e) => {
            warn!("collation data unavailable; sorting names by code point: {e}");
            None
        }
    }
}

/// Orders display names the way a person reading a list expects: letters
/// compared by collation without regard to case first, exact spelling second.
fn compare_names(collator: Option<&Collator>, a: &str, b: &str) -> Ordering {
    let primary = match collator {
        Some(collator) => collator.compare(a, b),
        None => a.to_lowercase().cmp(&b.to_lowercase()),
    };
    primary.then_with(|| a.cmp(b))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
