//! Agent configuration schema.
//!
//! [`AgentConfig`] is read from `config.toml` (see
//! [`crate::infrastructure::config_file`]) and may be partially overridden
//! from the command line.  Every field has a default, so an empty or missing
//! file yields a working configuration:
//!
//! ```toml
//! log_level = "info"
//!
//! [discovery]
//! bind_address = "0.0.0.0"
//! multicast_address = "239.255.255.250"
//! port = 1900
//! service_type = "urn:smartspeaker-audio:service:SpeakerGroup:1"
//! mx = 1
//! reissue_delays_ms = [1000, 2000]
//! eviction_delay_ms = 7000
//! expiry_interval_secs = 30
//!
//! [session]
//! api_key = "1e31c6cf-0834-41df-8795-5f9ce11a0164"
//! sub_protocol = "v1.api.smartspeaker.audio"
//! trust_anchors = ["/etc/zonelink/device-root.pem"]
//! connect_timeout_secs = 5
//! ```

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zonelink_core::discovery::ssdp::{SPEAKER_GROUP_SERVICE_TYPE, SSDP_MULTICAST_ADDR, SSDP_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// SSDP socket and probe-cycle timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// Local interface address for the SSDP socket.  `0.0.0.0` listens on all.
    #[serde(default = "default_bind_address")]
    pub bind_address: Ipv4Addr,
    #[serde(default = "default_multicast_address")]
    pub multicast_address: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Search target sent in M-SEARCH probes.
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// Maximum response delay devices may apply, in seconds.
    #[serde(default = "default_mx")]
    pub mx: u8,
    /// Offsets from cycle start at which the probe is sent again.
    #[serde(default = "default_reissue_delays_ms")]
    pub reissue_delays_ms: Vec<u64>,
    /// Offset from cycle start at which unresponsive peers are evicted.
    #[serde(default = "default_eviction_delay_ms")]
    pub eviction_delay_ms: u64,
    /// Period of the background TTL sweep.
    #[serde(default = "default_expiry_interval_secs")]
    pub expiry_interval_secs: u64,
}

/// Control-session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Sent as the `key` query parameter on every session URL.
    #[serde(default = "default_api_key")]
    pub api_key: Uuid,
    /// WebSocket sub-protocol requested in the handshake.
    #[serde(default = "default_sub_protocol")]
    pub sub_protocol: String,
    /// PEM files holding the device root certificates secure sessions must
    /// chain to.  The system trust store is never consulted.
    #[serde(default)]
    pub trust_anchors: Vec<PathBuf>,
    /// Upper bound on the certificate pre-flight check and on the WebSocket
    /// handshake, each.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// A value that parses but cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value for {field}: {reason}")]
pub struct InvalidConfig {
    pub field: &'static str,
    pub reason: &'static str,
}

impl AgentConfig {
    /// Rejects settings that would stall discovery or every session.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        self.discovery.validate()?;
        self.session.validate()
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.expiry_interval_secs == 0 {
            return Err(InvalidConfig {
                field: "discovery.expiry_interval_secs",
                reason: "must be at least 1",
            });
        }
        if self
            .reissue_delays_ms
            .iter()
            .any(|&delay| delay >= self.eviction_delay_ms)
        {
            return Err(InvalidConfig {
                field: "discovery.eviction_delay_ms",
                reason: "must be later than every reissue delay",
            });
        }
        Ok(())
    }

    pub fn reissue_delays(&self) -> Vec<Duration> {
        self.reissue_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    pub fn eviction_delay(&self) -> Duration {
        Duration::from_millis(self.eviction_delay_ms)
    }

    /// Never zero, even for a config built in code without validation.
    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs.max(1))
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.connect_timeout_secs == 0 {
            return Err(InvalidConfig {
                field: "session.connect_timeout_secs",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}
fn default_multicast_address() -> Ipv4Addr {
    SSDP_MULTICAST_ADDR
}
fn default_port() -> u16 {
    SSDP_PORT
}
fn default_service_type() -> String {
    SPEAKER_GROUP_SERVICE_TYPE.to_string()
}
fn default_mx() -> u8 {
    1
}
fn default_reissue_delays_ms() -> Vec<u64> {
    vec![1000, 2000]
}
fn default_eviction_delay_ms() -> u64 {
    7000
}
fn default_expiry_interval_secs() -> u64 {
    30
}
/// The key devices accept from third-party control clients.
const DEFAULT_API_KEY: Uuid = Uuid::from_u128(0x1e31c6cf_0834_41df_8795_5f9ce11a0164);

fn default_api_key() -> Uuid {
    DEFAULT_API_KEY
}
fn default_sub_protocol() -> String {
    "v1.api.smartspeaker.audio".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            discovery: DiscoveryConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            multicast_address: default_multicast_address(),
            port: default_port(),
            service_type: default_service_type(),
            mx: default_mx(),
            reissue_delays_ms: default_reissue_delays_ms(),
            eviction_delay_ms: default_eviction_delay_ms(),
            expiry_interval_secs: default_expiry_interval_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            sub_protocol: default_sub_protocol(),
            trust_anchors: Vec::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
