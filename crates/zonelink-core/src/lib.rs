//! # zonelink-core
//!
//! Shared library for Zonelink containing the discovery message parsers, the
//! in-memory peer registry, and the typed session protocol (envelopes, topics,
//! commands, and events).
//!
//! This crate performs no I/O.  It never opens sockets, spawns tasks, or reads
//! the clock on its own: every time-dependent operation takes `now` as an
//! argument, which keeps the registry's expiry rules deterministic in tests.
//!
//! # Architecture overview (for beginners)
//!
//! Zonelink finds speaker groups on the local network and opens a control
//! session to the group's coordinator.  This crate is the shared foundation:
//!
//! - **`discovery`** – How presence is learned.  Devices multicast SSDP
//!   advertisements; [`discovery::ssdp`] turns a datagram into header fields,
//!   [`discovery::advertisement`] turns those fields into a typed
//!   [`PeerRecord`], and [`PeerRegistry`] keeps the live set with TTL expiry.
//!
//! - **`protocol`** – How the control session talks.  Every message on the
//!   WebSocket is a two-element JSON array `[header, body]`; [`Envelope`]
//!   models it, [`Topic`] names the channel, [`Command`] builds the
//!   outbound request bodies, and [`GroupEvent`] decodes inbound events.

pub mod discovery;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `zonelink_core::PeerRegistry` instead of the full module path.
pub use discovery::advertisement::{
    parse_advertisement, parse_datagram, Advertisement, AdvertisementError,
};
pub use discovery::group_info::{GroupInfo, GroupInfoError};
pub use discovery::peer::{GroupSummary, PeerId, PeerRecord};
pub use discovery::registry::PeerRegistry;
pub use discovery::ssdp::{SsdpError, SsdpKind, SsdpMessage};
pub use protocol::command::{Command, CommandError};
pub use protocol::envelope::{Envelope, EnvelopeError, Header};
pub use protocol::event::{EventError, GroupEvent};
pub use protocol::topic::Topic;
