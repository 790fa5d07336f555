//! zonelink-agent library crate.
//!
//! Finds smart-speaker groups on the local network and opens secure control
//! sessions to their coordinators.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! LAN (SSDP multicast)            Group coordinator (WebSocket, JSON)
//!         ↕                                   ↕
//! [zonelink-agent]
//!   ├── domain/           Config schema, session states and errors
//!   ├── application/
//!   │     ├── discovery/   Intake, probe cycles, TTL sweep
//!   │     ├── broadcaster/ Group-list listeners
//!   │     ├── router/      Inbound envelope dispatch by topic
//!   │     └── features/    Typed volume / playback / metadata / global channels
//!   └── infrastructure/
//!         ├── ssdp_socket/ Multicast UDP (socket2 + tokio)
//!         ├── tls/         Trust anchors, verifier, pre-flight (rustls)
//!         ├── connector/   WebSocket session (tokio-tungstenite)
//!         └── config_file/ config.toml persistence
//! ```
//!
//! # Layer rules
//!
//! - `domain` performs no I/O.
//! - `application` depends on `domain` and `zonelink-core`; the network is
//!   reached only through the [`application::SsdpTransport`] and
//!   [`application::CommandSink`] traits.
//! - `infrastructure` implements those traits with real sockets.

/// Domain layer: configuration and session lifecycle types (no I/O).
pub mod domain;

/// Application layer: discovery, change notification and message routing.
pub mod application;

/// Infrastructure layer: SSDP socket, TLS, WebSocket session, config file.
pub mod infrastructure;
