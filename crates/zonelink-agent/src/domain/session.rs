//! Control-session lifecycle types.
//!
//! A session moves through a small state machine:
//!
//! ```text
//!   Idle ──connect──► Connecting ──open──► Open ──disconnect / remote close──► Closed
//!                          │                 │
//!                          └──cert / handshake error──► Failed ◄──transport error
//! ```
//!
//! `Closed` and `Failed` are terminal for that session.  The connector starts a
//! fresh session on the next `connect`.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use zonelink_core::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session has been started yet.
    Idle,
    Connecting,
    Open,
    Closed,
    Failed,
}

impl SessionState {
    /// `true` for states from which `connect` may start a new session.
    pub fn can_connect(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Closed | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by the session connector.
///
/// Cloneable so that one failure can be both returned to the caller and
/// published on the event channel.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The endpoint's certificate does not chain to a configured trust
    /// anchor, or names a different host.
    #[error("certificate rejected for {host}: {reason}")]
    Certificate { host: String, reason: String },

    /// Socket or WebSocket failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{stage} did not complete within {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },

    /// `send` was called outside the `Open` state.
    #[error("session is not open (state: {0})")]
    NotOpen(SessionState),

    /// `connect` was called while a session is connecting or open.
    #[error("a session is already active; disconnect first")]
    AlreadyConnected,

    #[error("invalid endpoint URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// An outbound envelope could not be serialised.
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl SessionError {
    pub fn is_certificate(&self) -> bool {
        matches!(self, SessionError::Certificate { .. })
    }
}

/// Lifecycle notifications delivered on the connector's event channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The WebSocket is open and commands may be sent.
    Connected {
        household_id: String,
        group_id: String,
    },
    /// The session ended, by request or because the device closed it.
    Disconnected,
    /// The connect attempt or the open session failed.  No retry is made.
    Error(SessionError),
}
