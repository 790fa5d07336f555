//! Discovery service: passive intake, probe cycles, and TTL expiry.
//!
//! # How a probe cycle works (for beginners)
//!
//! SSDP runs over UDP, so any single M-SEARCH or reply may be lost.  A cycle
//! therefore sends the same probe several times and only then decides which
//! peers are gone:
//!
//! ```text
//! T0        probe  (cycle start recorded)
//! T0+1s     broadcast list, probe again
//! T0+2s     broadcast list, probe again
//! T0+7s     evict peers with acquired_at < T0, broadcast list
//! ```
//!
//! Every reply or alive notification refreshes a peer's `acquired_at`, so a
//! peer that answered any of the probes, or advertised on its own during the
//! window, survives the eviction at T0+7s.  Each cycle evicts relative to its
//! own T0 only, so overlapping cycles cannot remove a peer another cycle saw.
//!
//! The cycle's timers run as tasks owned by the service.  [`DiscoveryService::shutdown`]
//! aborts them so nothing touches the registry afterwards.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use zonelink_core::{
    parse_datagram, Advertisement, AdvertisementError, GroupSummary, PeerRegistry,
};

use crate::application::broadcaster::{ChangeBroadcaster, GroupListener};
use crate::domain::DiscoveryConfig;

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The SSDP socket could not be bound.
    #[error("failed to bind SSDP socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Joining the multicast group failed.
    #[error("failed to join multicast group {group}: {source}")]
    JoinFailed {
        group: std::net::Ipv4Addr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send M-SEARCH: {0}")]
    Send(#[source] std::io::Error),

    #[error("SSDP receive error: {0}")]
    Recv(#[source] std::io::Error),

    /// The service has been shut down.
    #[error("discovery service is shut down")]
    ShutDown,
}

/// The network side of discovery.
///
/// Implemented by the multicast socket in production and by in-memory fakes
/// in tests.
#[async_trait]
pub trait SsdpTransport: Send + Sync {
    /// Multicasts one M-SEARCH for `search_target`.
    async fn send_search(&self, search_target: &str, mx: u8) -> Result<(), DiscoveryError>;

    /// Waits for the next datagram.
    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), DiscoveryError>;
}

/// Counters for datagrams seen by the intake path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    /// Parsed as a speaker-group advertisement and applied.
    pub accepted: u64,
    /// Other service types and other control points' M-SEARCH probes.
    pub ignored: u64,
    /// Speaker-group messages, or unparsable datagrams, that failed validation.
    pub rejected: u64,
}

/// Explicitly constructed, explicitly shut down discovery manager.
///
/// Cloning is cheap and yields another handle to the same service.
#[derive(Clone)]
pub struct DiscoveryService {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn SsdpTransport>,
    config: DiscoveryConfig,
    registry: Mutex<PeerRegistry>,
    broadcaster: ChangeBroadcaster,
    tasks: Mutex<JoinSet<()>>,
    running: AtomicBool,
    accepted: AtomicU64,
    ignored: AtomicU64,
    rejected: AtomicU64,
}

impl DiscoveryService {
    pub fn new(transport: Arc<dyn SsdpTransport>, config: DiscoveryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                registry: Mutex::new(PeerRegistry::new()),
                broadcaster: ChangeBroadcaster::new(),
                tasks: Mutex::new(JoinSet::new()),
                running: AtomicBool::new(true),
                accepted: AtomicU64::new(0),
                ignored: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Spawns the receive loop and the periodic TTL sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), DiscoveryError> {
        let recv_inner = Arc::clone(&self.inner);
        let sweep_inner = Arc::clone(&self.inner);
        let mut tasks = lock(&self.inner.tasks);
        self.inner.ensure_running()?;
        tasks.spawn(async move { recv_inner.receive_loop().await });
        tasks.spawn(async move { sweep_inner.expiry_loop().await });

        info!(
            service_type = %self.inner.config.service_type,
            "discovery started"
        );
        Ok(())
    }

    /// Adds a group-list listener (idempotent per listener instance).
    pub fn subscribe(&self, listener: Arc<dyn GroupListener>) -> bool {
        self.inner.broadcaster.subscribe(listener)
    }

    /// Removes a listener added with [`subscribe`](Self::subscribe).
    ///
    /// Returns `false` if that instance was not subscribed.
    pub fn unsubscribe(&self, listener: &Arc<dyn GroupListener>) -> bool {
        self.inner.broadcaster.unsubscribe(listener)
    }

    /// Current published group list.
    pub fn groups(&self) -> Vec<GroupSummary> {
        lock(&self.inner.registry).list_groups()
    }

    /// Number of known peers, coordinators and members alike.
    pub fn peer_count(&self) -> usize {
        lock(&self.inner.registry).len()
    }

    pub fn stats(&self) -> DiscoveryStats {
        DiscoveryStats {
            accepted: self.inner.accepted.load(Ordering::Relaxed),
            ignored: self.inner.ignored.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
        }
    }

    /// Parses and applies one inbound datagram immediately.
    pub fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        self.inner.handle_datagram(datagram, from);
    }

    /// Expires stale peers and starts a probe cycle.
    ///
    /// The first probe is sent before this returns; the reissues and the
    /// final eviction run in the background.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::ShutDown`] if [`shutdown`](Self::shutdown) ran before
    /// or during the call (no cycle is left behind), or the transport's error
    /// if the first probe cannot be sent.
    pub async fn refresh_groups(&self) -> Result<(), DiscoveryError> {
        self.inner.ensure_running()?;

        let cycle_start = now();
        if lock(&self.inner.registry).expire_stale(cycle_start) {
            self.inner.notify();
        }

        self.inner.probe().await?;

        let inner = Arc::clone(&self.inner);
        let mut tasks = lock(&self.inner.tasks);
        // Checked under the task lock: `shutdown` may have run while the
        // first probe was in flight, and must not miss this cycle.
        self.inner.ensure_running()?;
        // Reap finished cycles so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move { inner.run_cycle(cycle_start).await });
        Ok(())
    }

    /// Stops every background task.  Idempotent.
    ///
    /// After this returns no timer, sweep, or receive task of this service
    /// is running.
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut guard = lock(&self.inner.tasks);
            if !self.inner.running.swap(false, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *guard)
        };
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        info!("discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn ensure_running(&self) -> Result<(), DiscoveryError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DiscoveryError::ShutDown)
        }
    }

    fn notify(&self) {
        let groups = lock(&self.registry).list_groups();
        self.broadcaster.notify(&groups);
    }

    async fn probe(&self) -> Result<(), DiscoveryError> {
        self.transport
            .send_search(&self.config.service_type, self.config.mx)
            .await
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let advertisement = match parse_datagram(datagram, now()) {
            Ok(adv) => adv,
            Err(AdvertisementError::WrongServiceType | AdvertisementError::UnsupportedKind(_)) => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(%from, "dropping SSDP message: {e}");
                return;
            }
        };
        self.accepted.fetch_add(1, Ordering::Relaxed);

        // Probe responses are published by the cycle's next broadcast; alive
        // and byebye notifications are published at once.
        let publish = {
            let mut registry = lock(&self.registry);
            match advertisement {
                Advertisement::Alive(record) => {
                    debug!(%from, peer = %record.id, "alive");
                    registry.upsert(record)
                }
                Advertisement::Response(record) => {
                    debug!(%from, peer = %record.id, "search response");
                    registry.upsert(record);
                    false
                }
                Advertisement::ByeBye(id) => {
                    debug!(%from, peer = %id, "byebye");
                    registry.remove(&id)
                }
            }
        };
        if publish {
            self.notify();
        }
    }

    async fn run_cycle(self: Arc<Self>, cycle_start: Instant) {
        let start = tokio::time::Instant::from_std(cycle_start);

        for delay in self.config.reissue_delays() {
            tokio::time::sleep_until(start + delay).await;
            if self.ensure_running().is_err() {
                return;
            }
            self.notify();
            if let Err(e) = self.probe().await {
                warn!("probe reissue failed: {e}");
            }
        }

        tokio::time::sleep_until(start + self.config.eviction_delay()).await;
        if self.ensure_running().is_err() {
            return;
        }
        let evicted = lock(&self.registry).evict_unresponsive(cycle_start);
        if evicted {
            debug!("evicted peers that missed the probe cycle");
        }
        self.notify();
    }

    async fn receive_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            match self.transport.recv().await {
                Ok((datagram, from)) => self.handle_datagram(&datagram, from),
                Err(e) => {
                    warn!("{e}");
                    // Avoid spinning on a persistently failing socket.
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                }
            }
        }
    }

    async fn expiry_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.expiry_interval());
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let expired = lock(&self.registry).expire_stale(now());
            if expired {
                self.notify();
            }
        }
    }
}

/// Reads the clock through Tokio so paused-time tests control it.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::broadcaster::MockGroupListener;
    use std::time::Duration;

    /// Transport that records probes and never yields a datagram.
    #[derive(Default)]
    struct RecordingTransport {
        searches: Mutex<Vec<(String, u8)>>,
    }

    #[async_trait]
    impl SsdpTransport for RecordingTransport {
        async fn send_search(&self, search_target: &str, mx: u8) -> Result<(), DiscoveryError> {
            self.searches.lock().unwrap().push((search_target.to_string(), mx));
            Ok(())
        }

        async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), DiscoveryError> {
            std::future::pending().await
        }
    }

    fn idle_service() -> DiscoveryService {
        DiscoveryService::new(
            Arc::new(RecordingTransport::default()),
            DiscoveryConfig::default(),
        )
    }

    fn from() -> SocketAddr {
        "10.0.0.2:1900".parse().unwrap()
    }

    fn alive(id: &str, name: &str) -> String {
        format!(
            "NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\n\
             USN: uuid:{id}::urn:smartspeaker-audio:service:SpeakerGroup:1\r\n\
             HOUSEHOLD.SMARTSPEAKER.AUDIO: HH\r\n\
             WEBSOCK.SMARTSPEAKER.AUDIO: ws://10.0.0.2:1400/websocket/api\r\n\
             GROUPINFO.SMARTSPEAKER.AUDIO: gc=1; gid={id}:1; gname=\"{name}\"\r\n\
             CACHE-CONTROL: max-age=1800\r\n\r\n"
        )
    }

    #[tokio::test]
    async fn test_alive_is_applied_and_published() {
        // Arrange
        let service = idle_service();
        let mut listener = MockGroupListener::new();
        listener
            .expect_send()
            .withf(|_, groups| groups.len() == 1 && groups[0].group_name == "Kitchen")
            .times(1)
            .returning(|_, _| Ok(()));
        service.subscribe(Arc::new(listener));

        // Act
        service.handle_datagram(alive("A", "Kitchen").as_bytes(), from());

        // Assert
        assert_eq!(service.groups().len(), 1);
        assert_eq!(service.stats().accepted, 1);
    }

    #[tokio::test]
    async fn test_foreign_and_malformed_datagrams_are_counted_not_applied() {
        let service = idle_service();

        service.handle_datagram(
            b"NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\nUSN: uuid:x::urn:other:1\r\n\r\n",
            from(),
        );
        service.handle_datagram(b"M-SEARCH * HTTP/1.1\r\nST: ssdp:all\r\n\r\n", from());
        service.handle_datagram(b"\xff\xfe", from());

        assert_eq!(service.peer_count(), 0);
        assert_eq!(
            service.stats(),
            DiscoveryStats {
                accepted: 0,
                ignored: 2,
                rejected: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_sends_probe_now_and_reissues_twice() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let service = DiscoveryService::new(transport.clone(), DiscoveryConfig::default());

        // Act
        service.refresh_groups().await.unwrap();
        assert_eq!(transport.searches.lock().unwrap().len(), 1);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        // Assert
        let searches = transport.searches.lock().unwrap().clone();
        assert_eq!(searches.len(), 3);
        assert!(searches
            .iter()
            .all(|(st, mx)| st == "urn:smartspeaker-audio:service:SpeakerGroup:1" && *mx == 1));
    }

    #[tokio::test]
    async fn test_refresh_after_shutdown_is_rejected() {
        let service = idle_service();
        service.shutdown().await;
        service.shutdown().await;

        assert!(matches!(service.refresh_groups().await, Err(DiscoveryError::ShutDown)));
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_datagrams_after_shutdown_are_ignored() {
        let service = idle_service();
        service.shutdown().await;

        service.handle_datagram(alive("A", "Kitchen").as_bytes(), from());

        assert_eq!(service.peer_count(), 0);
    }
}
