//! Session protocol: the `[header, body]` envelope, topics, commands, and
//! typed events.
//!
//! Every WebSocket text frame exchanged with a group coordinator is a JSON
//! array of exactly two elements:
//!
//! ```text
//! [
//!   { "namespace": "groupVolume:1", "householdId": "...", "groupId": "...", "command": "setVolume" },
//!   { "volume": 35 }
//! ]
//! ```
//!
//! Outbound frames carry `command`; inbound frames carry either `response`
//! (the reply to a command) or `type` (an unsolicited event).

pub mod command;
pub mod envelope;
pub mod event;
pub mod topic;

pub use command::{Command, CommandError};
pub use envelope::{Envelope, EnvelopeError, Header};
pub use event::{EventError, GroupEvent};
pub use topic::Topic;
