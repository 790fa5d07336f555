//! Discovery module: SSDP message parsing, advertisement decoding, and the
//! peer registry.
//!
//! Data flows through the sub-modules in this order:
//!
//! ```text
//! datagram ─► ssdp::SsdpMessage ─► advertisement::parse_advertisement
//!                                        │
//!                                        ▼
//!                             registry::PeerRegistry ─► Vec<GroupSummary>
//! ```

pub mod advertisement;
pub mod group_info;
pub mod peer;
pub mod registry;
pub mod ssdp;

pub use advertisement::{parse_advertisement, parse_datagram, Advertisement, AdvertisementError};
pub use group_info::{GroupInfo, GroupInfoError};
pub use peer::{GroupSummary, PeerId, PeerRecord};
pub use registry::PeerRegistry;
pub use ssdp::{SsdpError, SsdpKind, SsdpMessage};
