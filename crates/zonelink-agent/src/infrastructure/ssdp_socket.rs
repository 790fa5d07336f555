//! UDP multicast transport for SSDP.
//!
//! One socket does both jobs: it is bound to the SSDP port and joined to the
//! multicast group so it hears `NOTIFY` traffic, and it is the source of our
//! M-SEARCH probes so unicast replies come back to it as well.

use std::net::{SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, trace};
use zonelink_core::discovery::ssdp::build_search_request;

use crate::application::discovery::{DiscoveryError, SsdpTransport};
use crate::domain::DiscoveryConfig;

/// Large enough for any SSDP datagram seen in practice.
const RECV_BUFFER_LEN: usize = 4096;

/// [`SsdpTransport`] over a real multicast socket.
#[derive(Debug)]
pub struct MulticastSsdpSocket {
    socket: UdpSocket,
    target: SocketAddr,
}

impl MulticastSsdpSocket {
    /// Binds `bind_address:port` with `SO_REUSEADDR` and joins the multicast
    /// group on that interface.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(config.bind_address, config.port));
        let bind_failed = |source| DiscoveryError::BindFailed { addr, source };

        let socket =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_failed)?;
        // Other SSDP agents on this host share port 1900.
        socket.set_reuse_address(true).map_err(bind_failed)?;
        socket.set_nonblocking(true).map_err(bind_failed)?;
        socket.bind(&addr.into()).map_err(bind_failed)?;
        socket
            .join_multicast_v4(&config.multicast_address, &config.bind_address)
            .map_err(|source| DiscoveryError::JoinFailed {
                group: config.multicast_address,
                source,
            })?;

        let socket = UdpSocket::from_std(socket.into()).map_err(bind_failed)?;
        debug!(%addr, group = %config.multicast_address, "SSDP socket bound");

        Ok(Self {
            socket,
            target: SocketAddr::V4(SocketAddrV4::new(config.multicast_address, config.port)),
        })
    }

    /// Wraps an already bound socket; probes go to `target`.
    pub fn from_socket(socket: UdpSocket, target: SocketAddr) -> Self {
        Self { socket, target }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl SsdpTransport for MulticastSsdpSocket {
    async fn send_search(&self, search_target: &str, mx: u8) -> Result<(), DiscoveryError> {
        let request = build_search_request(search_target, mx);
        self.socket
            .send_to(request.as_bytes(), self.target)
            .await
            .map_err(DiscoveryError::Send)?;
        trace!(target = %self.target, "M-SEARCH sent");
        Ok(())
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), DiscoveryError> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(DiscoveryError::Recv)?;
        buf.truncate(len);
        Ok((buf, from))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
