//! SSDP datagram parsing and M-SEARCH request construction.
//!
//! SSDP (Simple Service Discovery Protocol) reuses HTTP/1.1 message syntax
//! over UDP multicast.  Three message shapes matter here:
//!
//! ```text
//! NOTIFY * HTTP/1.1          unsolicited advertisement (NTS: ssdp:alive | ssdp:byebye)
//! HTTP/1.1 200 OK            unicast reply to one of our M-SEARCH probes
//! M-SEARCH * HTTP/1.1        someone else's probe (ignored by the discovery layer)
//! ```
//!
//! Header names are case-insensitive on the wire, so they are stored
//! upper-cased.  Values are trimmed of surrounding whitespace.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

/// IPv4 multicast group every SSDP participant joins.
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Well-known SSDP UDP port.
pub const SSDP_PORT: u16 = 1900;

/// Search target advertised by speaker group coordinators.
pub const SPEAKER_GROUP_SERVICE_TYPE: &str = "urn:smartspeaker-audio:service:SpeakerGroup:1";

/// Errors produced while splitting a datagram into an [`SsdpMessage`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SsdpError {
    /// The datagram is not valid UTF-8 text.
    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    /// The datagram contained no start line.
    #[error("empty datagram")]
    Empty,

    /// The start line is not one of NOTIFY, M-SEARCH, or an HTTP status line.
    #[error("unrecognised start line: {0:?}")]
    UnknownStartLine(String),

    /// An HTTP status line carried something other than `200`.
    #[error("unexpected response status: {0}")]
    UnexpectedStatus(String),

    /// A NOTIFY arrived without an `NTS` header.
    #[error("NOTIFY without NTS header")]
    MissingNts,

    /// A NOTIFY carried a sub-type other than `ssdp:alive` or `ssdp:byebye`.
    #[error("unsupported notification sub-type: {0}")]
    UnsupportedNts(String),
}

/// The role of an SSDP message, derived from its start line and `NTS` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SsdpKind {
    /// `NOTIFY` with `NTS: ssdp:alive` – a device announcing (or refreshing) itself.
    Alive,
    /// `NOTIFY` with `NTS: ssdp:byebye` – a device withdrawing cleanly.
    ByeBye,
    /// `HTTP/1.1 200 OK` – a reply to an M-SEARCH probe.
    SearchResponse,
    /// `M-SEARCH` – another control point's probe.
    Search,
}

impl fmt::Display for SsdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SsdpKind::Alive => "alive",
            SsdpKind::ByeBye => "byebye",
            SsdpKind::SearchResponse => "search-response",
            SsdpKind::Search => "search",
        };
        f.write_str(label)
    }
}

/// A parsed SSDP message: its kind plus the upper-cased header map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpMessage {
    kind: SsdpKind,
    headers: HashMap<String, String>,
}

impl SsdpMessage {
    /// Builds a message directly from a kind and header pairs.
    ///
    /// Header names are upper-cased and values trimmed, exactly as
    /// [`SsdpMessage::parse`] would store them.
    pub fn from_headers<I, K, V>(kind: SsdpKind, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_ascii_uppercase(), v.as_ref().trim().to_string()))
            .collect();
        Self { kind, headers }
    }

    /// Parses a raw UDP datagram.
    ///
    /// Header lines without a `:` separator are skipped; parsing stops at the
    /// first blank line.
    ///
    /// # Errors
    ///
    /// Returns [`SsdpError`] if the datagram is not UTF-8, has an unknown
    /// start line, or is a NOTIFY with a missing or unsupported `NTS`.
    pub fn parse(datagram: &[u8]) -> Result<Self, SsdpError> {
        let text = std::str::from_utf8(datagram).map_err(|_| SsdpError::NotUtf8)?;
        let mut lines = text.lines().map(str::trim_end);

        let start_line = lines
            .by_ref()
            .find(|line| !line.trim().is_empty())
            .ok_or(SsdpError::Empty)?;

        let mut headers = HashMap::new();
        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_uppercase(), value.trim().to_string());
            }
        }

        let kind = classify(start_line.trim(), &headers)?;
        Ok(Self { kind, headers })
    }

    /// Returns the message kind.
    pub fn kind(&self) -> SsdpKind {
        self.kind
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Returns the number of headers carried by the message.
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }
}

fn classify(start_line: &str, headers: &HashMap<String, String>) -> Result<SsdpKind, SsdpError> {
    let upper = start_line.to_ascii_uppercase();

    if upper.starts_with("NOTIFY ") {
        let nts = headers.get("NTS").ok_or(SsdpError::MissingNts)?;
        return match nts.to_ascii_lowercase().as_str() {
            "ssdp:alive" => Ok(SsdpKind::Alive),
            "ssdp:byebye" => Ok(SsdpKind::ByeBye),
            _ => Err(SsdpError::UnsupportedNts(nts.clone())),
        };
    }

    if upper.starts_with("M-SEARCH ") {
        return Ok(SsdpKind::Search);
    }

    if upper.starts_with("HTTP/") {
        let status = upper.split_whitespace().nth(1).unwrap_or_default();
        return if status == "200" {
            Ok(SsdpKind::SearchResponse)
        } else {
            Err(SsdpError::UnexpectedStatus(status.to_string()))
        };
    }

    Err(SsdpError::UnknownStartLine(start_line.to_string()))
}

/// Builds the text of an M-SEARCH probe for `search_target`.
///
/// `mx` is the maximum number of seconds a responder may wait before
/// replying; devices spread their responses randomly over this window.
///
/// # Examples
///
/// ```rust
/// use zonelink_core::discovery::ssdp::{build_search_request, SPEAKER_GROUP_SERVICE_TYPE};
///
/// let probe = build_search_request(SPEAKER_GROUP_SERVICE_TYPE, 1);
/// assert!(probe.starts_with("M-SEARCH * HTTP/1.1\r\n"));
/// assert!(probe.ends_with("\r\n\r\n"));
/// ```
pub fn build_search_request(search_target: &str, mx: u8) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_MULTICAST_ADDR}:{SSDP_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx}\r\n\
         ST: {search_target}\r\n\
         \r\n"
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ALIVE: &str = "NOTIFY * HTTP/1.1\r\n\
        HOST: 239.255.255.250:1900\r\n\
        CACHE-CONTROL: max-age = 1800\r\n\
        NT: urn:smartspeaker-audio:service:SpeakerGroup:1\r\n\
        NTS: ssdp:alive\r\n\
        usn: uuid:RINCON_1::urn:smartspeaker-audio:service:SpeakerGroup:1\r\n\
        \r\n";

    #[test]
    fn test_parse_notify_alive_classifies_as_alive() {
        // Arrange / Act
        let msg = SsdpMessage::parse(ALIVE.as_bytes()).unwrap();

        // Assert
        assert_eq!(msg.kind(), SsdpKind::Alive);
        assert_eq!(msg.header("cache-control"), Some("max-age = 1800"));
    }

    #[test]
    fn test_parse_header_lookup_is_case_insensitive() {
        let msg = SsdpMessage::parse(ALIVE.as_bytes()).unwrap();
        assert_eq!(
            msg.header("USN"),
            Some("uuid:RINCON_1::urn:smartspeaker-audio:service:SpeakerGroup:1")
        );
        assert_eq!(msg.header("Usn"), msg.header("usn"));
    }

    #[test]
    fn test_parse_byebye_classifies_as_byebye() {
        let text = "NOTIFY * HTTP/1.1\r\nNTS: ssdp:byebye\r\nUSN: uuid:X::urn:y\r\n\r\n";
        let msg = SsdpMessage::parse(text.as_bytes()).unwrap();
        assert_eq!(msg.kind(), SsdpKind::ByeBye);
    }

    #[test]
    fn test_parse_http_ok_classifies_as_search_response() {
        let text = "HTTP/1.1 200 OK\r\nST: urn:x\r\n\r\n";
        let msg = SsdpMessage::parse(text.as_bytes()).unwrap();
        assert_eq!(msg.kind(), SsdpKind::SearchResponse);
    }

    #[test]
    fn test_parse_msearch_classifies_as_search() {
        let probe = build_search_request(SPEAKER_GROUP_SERVICE_TYPE, 1);
        let msg = SsdpMessage::parse(probe.as_bytes()).unwrap();
        assert_eq!(msg.kind(), SsdpKind::Search);
        assert_eq!(msg.header("ST"), Some(SPEAKER_GROUP_SERVICE_TYPE));
        assert_eq!(msg.header("MAN"), Some("\"ssdp:discover\""));
    }

    #[test]
    fn test_parse_accepts_bare_newlines() {
        let text = "HTTP/1.1 200 OK\nST: urn:x\nUSN: abc\n\n";
        let msg = SsdpMessage::parse(text.as_bytes()).unwrap();
        assert_eq!(msg.header("usn"), Some("abc"));
    }

    #[test]
    fn test_parse_stops_at_blank_line() {
        let text = "HTTP/1.1 200 OK\r\nST: urn:x\r\n\r\nUSN: body-not-header\r\n";
        let msg = SsdpMessage::parse(text.as_bytes()).unwrap();
        assert_eq!(msg.header("usn"), None);
        assert_eq!(msg.header_count(), 1);
    }

    #[test]
    fn test_parse_rejects_non_utf8() {
        assert_eq!(SsdpMessage::parse(&[0xFF, 0xFE, 0x00]), Err(SsdpError::NotUtf8));
    }

    #[test]
    fn test_parse_rejects_empty_datagram() {
        assert_eq!(SsdpMessage::parse(b"\r\n\r\n"), Err(SsdpError::Empty));
    }

    #[test]
    fn test_parse_rejects_notify_without_nts() {
        let text = "NOTIFY * HTTP/1.1\r\nUSN: x\r\n\r\n";
        assert_eq!(SsdpMessage::parse(text.as_bytes()), Err(SsdpError::MissingNts));
    }

    #[test]
    fn test_parse_rejects_unsupported_nts() {
        let text = "NOTIFY * HTTP/1.1\r\nNTS: ssdp:update\r\n\r\n";
        assert_eq!(
            SsdpMessage::parse(text.as_bytes()),
            Err(SsdpError::UnsupportedNts("ssdp:update".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_error_status() {
        let text = "HTTP/1.1 404 Not Found\r\n\r\n";
        assert_eq!(
            SsdpMessage::parse(text.as_bytes()),
            Err(SsdpError::UnexpectedStatus("404".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_unknown_start_line() {
        let text = "GET / HTTP/1.1\r\n\r\n";
        assert!(matches!(
            SsdpMessage::parse(text.as_bytes()),
            Err(SsdpError::UnknownStartLine(_))
        ));
    }

    #[test]
    fn test_build_search_request_contains_target_and_mx() {
        let probe = build_search_request("urn:test:service:Thing:1", 3);
        assert!(probe.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(probe.contains("MX: 3\r\n"));
        assert!(probe.contains("ST: urn:test:service:Thing:1\r\n"));
    }

    #[test]
    fn test_from_headers_normalises_names_and_values() {
        let msg = SsdpMessage::from_headers(SsdpKind::Alive, [(" usn ", "  abc  ")]);
        assert_eq!(msg.header("USN"), Some("abc"));
    }
}
