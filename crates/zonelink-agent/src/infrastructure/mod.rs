//! Infrastructure layer: everything that touches the network or the disk.
//!
//! # Responsibilities
//!
//! - Binding the SSDP multicast socket and sending M-SEARCH probes
//! - Loading device trust anchors and verifying certificates
//! - Opening, owning and closing the WebSocket control session
//! - Reading and writing `config.toml`
//!
//! Parsing, registry bookkeeping and probe-cycle timing are not here; they
//! live in `zonelink-core` and the application layer.

pub mod config_file;
pub mod connector;
pub mod ssdp_socket;
pub mod tls;

pub use config_file::{load_config, save_config, ConfigError};
pub use connector::{Endpoint, SessionConnector};
pub use ssdp_socket::MulticastSsdpSocket;
pub use tls::{client_config, preflight_check, DeviceCertVerifier, TlsSetupError, TrustAnchors};
