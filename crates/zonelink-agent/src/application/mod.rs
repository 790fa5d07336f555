//! Application layer: discovery orchestration, change notification, message
//! routing and feature channels.
//!
//! Depends on `domain` and on the transport traits defined here; concrete
//! sockets live in `infrastructure`.

pub mod broadcaster;
pub mod discovery;
pub mod features;
pub mod router;

pub use broadcaster::{ChangeBroadcaster, ChannelListener, GroupListener, ListenerError, GROUPS_EVENT};
pub use discovery::{DiscoveryError, DiscoveryService, DiscoveryStats, SsdpTransport};
pub use features::{CommandSink, FeatureChannel, GroupControls, GroupVolume, Playback};
pub use router::{DispatchOutcome, MessageRouter, RouterStats, TopicHandler};
