//! Domain layer: configuration schema and session lifecycle types.
//!
//! Nothing in this module performs I/O.

pub mod config;
pub mod session;

pub use config::{AgentConfig, DiscoveryConfig, InvalidConfig, SessionConfig};
pub use session::{SessionError, SessionEvent, SessionState};
