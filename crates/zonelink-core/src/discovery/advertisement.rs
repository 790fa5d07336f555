//! Turns an [`SsdpMessage`] into a typed [`Advertisement`].
//!
//! Parsing is fail-closed: a single missing or malformed field rejects the
//! whole message.  The error says which field was at fault so the caller can
//! log it; the discovery layer never propagates these errors further.
//!
//! Fields read from a speaker-group advertisement:
//!
//! | Header                        | Use                                      |
//! |-------------------------------|------------------------------------------|
//! | `USN`                         | `uuid:<id>::<service type>` → identity   |
//! | `HOUSEHOLD.SMARTSPEAKER.AUDIO`| owning household                         |
//! | `WEBSOCK.SMARTSPEAKER.AUDIO`  | control endpoint (`ws://` or `wss://`)   |
//! | `GROUPINFO.SMARTSPEAKER.AUDIO`| see [`GroupInfo`]                        |
//! | `BOOTID.UPNP.ORG`             | restart counter (optional)               |
//! | `CACHE-CONTROL`               | `max-age=N` → expiry                     |

use std::time::{Duration, Instant};

use thiserror::Error;

use super::group_info::{GroupInfo, GroupInfoError};
use super::peer::{PeerId, PeerRecord};
use super::ssdp::{SsdpError, SsdpKind, SsdpMessage, SPEAKER_GROUP_SERVICE_TYPE};

pub const HEADER_USN: &str = "USN";
pub const HEADER_HOUSEHOLD: &str = "HOUSEHOLD.SMARTSPEAKER.AUDIO";
pub const HEADER_WEBSOCKET: &str = "WEBSOCK.SMARTSPEAKER.AUDIO";
pub const HEADER_GROUP_INFO: &str = "GROUPINFO.SMARTSPEAKER.AUDIO";
pub const HEADER_BOOT_ID: &str = "BOOTID.UPNP.ORG";
pub const HEADER_CACHE_CONTROL: &str = "CACHE-CONTROL";

/// Why an SSDP message was not accepted as a speaker-group advertisement.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdvertisementError {
    /// The datagram itself could not be split into headers.
    #[error("SSDP framing error: {0}")]
    Ssdp(#[from] SsdpError),

    /// The message is for some other service type.  Expected on a busy LAN.
    #[error("not a speaker-group advertisement")]
    WrongServiceType,

    /// The message is an M-SEARCH, which carries no peer description.
    #[error("{0} messages do not describe a peer")]
    UnsupportedKind(SsdpKind),

    /// A required header is absent or blank.
    #[error("missing header {0}")]
    MissingField(&'static str),

    /// The `USN` does not have the `uuid:<id>::<type>` shape.
    #[error("malformed USN: {0:?}")]
    MalformedUsn(String),

    /// `CACHE-CONTROL` has no usable positive `max-age`.
    #[error("malformed cache-control: {0:?}")]
    MalformedCacheControl(String),

    /// The control endpoint is not a `ws://` or `wss://` URL.
    #[error("malformed websocket address: {0:?}")]
    MalformedAddress(String),

    /// `BOOTID.UPNP.ORG` is present but not an unsigned integer.
    #[error("malformed boot id: {0:?}")]
    MalformedBootId(String),

    /// The group-info field failed its own grammar.
    #[error("group info: {0}")]
    GroupInfo(#[from] GroupInfoError),
}

/// A decoded speaker-group advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advertisement {
    /// `ssdp:alive` notification: insert or refresh the peer.
    Alive(PeerRecord),
    /// Reply to one of our probes: insert or refresh the peer.
    Response(PeerRecord),
    /// `ssdp:byebye` notification: the identified peer left.
    ByeBye(PeerId),
}

impl Advertisement {
    /// The identity this advertisement is about.
    pub fn peer_id(&self) -> &PeerId {
        match self {
            Advertisement::Alive(record) | Advertisement::Response(record) => &record.id,
            Advertisement::ByeBye(id) => id,
        }
    }
}

/// Decodes a parsed SSDP message received at `now`.
///
/// A byebye only needs a valid `USN`; the device is going away and is not
/// obliged to describe itself.  Alive notifications and probe responses must
/// carry every field listed in the module documentation.
///
/// # Errors
///
/// Returns [`AdvertisementError`] naming the first field that failed.
pub fn parse_advertisement(
    message: &SsdpMessage,
    now: Instant,
) -> Result<Advertisement, AdvertisementError> {
    match message.kind() {
        SsdpKind::ByeBye => Ok(Advertisement::ByeBye(parse_usn(message)?)),
        SsdpKind::Alive => Ok(Advertisement::Alive(parse_peer(message, now)?)),
        SsdpKind::SearchResponse => Ok(Advertisement::Response(parse_peer(message, now)?)),
        SsdpKind::Search => Err(AdvertisementError::UnsupportedKind(SsdpKind::Search)),
    }
}

/// Convenience wrapper: splits `datagram` and decodes it in one step.
pub fn parse_datagram(datagram: &[u8], now: Instant) -> Result<Advertisement, AdvertisementError> {
    let message = SsdpMessage::parse(datagram)?;
    parse_advertisement(&message, now)
}

/// Builds a full [`PeerRecord`] from an alive notification or probe response.
pub fn parse_peer(message: &SsdpMessage, now: Instant) -> Result<PeerRecord, AdvertisementError> {
    let id = parse_usn(message)?;
    let household_id = required(message, HEADER_HOUSEHOLD)?.to_string();
    let ws_address = required(message, HEADER_WEBSOCKET)?;
    let group_info = GroupInfo::parse(required(message, HEADER_GROUP_INFO)?)?;
    let max_age = parse_max_age(required(message, HEADER_CACHE_CONTROL)?)?;

    let boot_id = match message.header(HEADER_BOOT_ID).filter(|v| !v.is_empty()) {
        Some(raw) => Some(
            raw.parse::<u64>()
                .map_err(|_| AdvertisementError::MalformedBootId(raw.to_string()))?,
        ),
        None => None,
    };

    let (secure_address, insecure_address) = if ws_address.starts_with("wss://") {
        (Some(ws_address.to_string()), insecure_variant(ws_address))
    } else if ws_address.starts_with("ws://") {
        (None, ws_address.to_string())
    } else {
        return Err(AdvertisementError::MalformedAddress(ws_address.to_string()));
    };

    let expires_at = now
        .checked_add(max_age)
        .ok_or_else(|| AdvertisementError::MalformedCacheControl(format!("{max_age:?}")))?;

    Ok(PeerRecord {
        id,
        group_name: group_info.group_name,
        group_id: group_info.group_id,
        household_id,
        is_coordinator: group_info.coordinator,
        secure_address,
        insecure_address,
        boot_id,
        acquired_at: now,
        expires_at,
    })
}

/// Derives the plain-text endpoint a player serves next to its TLS one.
///
/// Players listen for `wss://` on port 1443 and `ws://` on port 1400 under
/// the same path.
pub fn insecure_variant(secure: &str) -> String {
    secure
        .replacen("wss://", "ws://", 1)
        .replacen(":1443/websocket", ":1400/websocket", 1)
}

fn required<'m>(message: &'m SsdpMessage, name: &'static str) -> Result<&'m str, AdvertisementError> {
    message
        .header(name)
        .filter(|v| !v.is_empty())
        .ok_or(AdvertisementError::MissingField(name))
}

fn parse_usn(message: &SsdpMessage) -> Result<PeerId, AdvertisementError> {
    let usn = required(message, HEADER_USN)?;
    let uuid_part = usn
        .strip_suffix(SPEAKER_GROUP_SERVICE_TYPE)
        .and_then(|rest| rest.strip_suffix("::"));

    let Some(uuid_part) = uuid_part else {
        return Err(if usn.contains("::") {
            AdvertisementError::WrongServiceType
        } else {
            AdvertisementError::MalformedUsn(usn.to_string())
        });
    };

    match uuid_part.strip_prefix("uuid:") {
        Some(id) if !id.is_empty() => Ok(PeerId::new(id)),
        _ => Err(AdvertisementError::MalformedUsn(usn.to_string())),
    }
}

/// Extracts `max-age` seconds from a cache-control value such as
/// `max-age = 1800` or `no-cache, max-age=90`.
fn parse_max_age(value: &str) -> Result<Duration, AdvertisementError> {
    let malformed = || AdvertisementError::MalformedCacheControl(value.to_string());

    let lower = value.to_ascii_lowercase();
    let start = lower.find("max-age").ok_or_else(malformed)?;
    let rest = lower[start + "max-age".len()..].trim_start();
    let rest = rest.strip_prefix('=').ok_or_else(malformed)?.trim_start();
    let digits: &str = &rest[..rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len())];

    // A zero lifetime would make the record expire the instant it is stored.
    match digits.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(malformed()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
