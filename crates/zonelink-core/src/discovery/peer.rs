//! Peer records and the published group projection.

use std::fmt;
use std::time::Instant;

use serde::Serialize;

/// Stable identity of a discovered player (the `uuid:` part of its USN).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One discovered service instance, as last advertised.
///
/// Records are owned by the [`PeerRegistry`](super::PeerRegistry); callers
/// receive clones or [`GroupSummary`] projections, never references that
/// outlive a registry call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: PeerId,
    pub group_name: String,
    pub group_id: String,
    pub household_id: String,
    /// Only coordinators are published as connectable groups.
    pub is_coordinator: bool,
    /// `wss://` control endpoint, when the player advertises one.
    pub secure_address: Option<String>,
    /// `ws://` control endpoint.
    pub insecure_address: String,
    /// `BOOTID.UPNP.ORG`; changes when the player restarts.  Informational only.
    pub boot_id: Option<u64>,
    /// When this record was last refreshed by an advertisement.
    pub acquired_at: Instant,
    /// `acquired_at + max-age`; always strictly later than `acquired_at`.
    pub expires_at: Instant,
}

impl PeerRecord {
    /// Returns `true` when the player advertises a secure endpoint.
    pub fn has_secure_address(&self) -> bool {
        self.secure_address.is_some()
    }

    /// The endpoint a control session should use: secure if available.
    pub fn preferred_address(&self) -> &str {
        self.secure_address
            .as_deref()
            .unwrap_or(&self.insecure_address)
    }

    /// Projects this record into its published form.
    pub fn summary(&self) -> GroupSummary {
        GroupSummary {
            group_name: self.group_name.clone(),
            address: self.preferred_address().to_string(),
            household_id: self.household_id.clone(),
            group_id: self.group_id.clone(),
        }
    }
}

/// A connectable group as published to subscribers.
///
/// Serialised with camelCase keys so that presentation layers receive the
/// same shape the session protocol uses (`householdId`, `groupId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub group_name: String,
    pub address: String,
    pub household_id: String,
    pub group_id: String,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
