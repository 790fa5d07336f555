//! Integration tests for the discovery service's probe cycle.
//!
//! Time is paused, so each test walks the cycle schedule
//! (probe at T0, reissues at +1s and +2s, eviction at +7s) deterministically.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use zonelink_agent::application::{
    DiscoveryError, DiscoveryService, GroupListener, ListenerError, SsdpTransport,
};
use zonelink_agent::domain::DiscoveryConfig;
use zonelink_core::GroupSummary;

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Counts probes; never delivers a datagram (tests feed them directly).
#[derive(Default)]
struct FakeTransport {
    probes: Mutex<usize>,
}

impl FakeTransport {
    fn probes(&self) -> usize {
        *self.probes.lock().unwrap()
    }
}

#[async_trait]
impl SsdpTransport for FakeTransport {
    async fn send_search(&self, _search_target: &str, _mx: u8) -> Result<(), DiscoveryError> {
        *self.probes.lock().unwrap() += 1;
        Ok(())
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), DiscoveryError> {
        std::future::pending().await
    }
}

/// Holds the first M-SEARCH until the test opens the gate.
#[derive(Default)]
struct GatedTransport {
    probes: Mutex<usize>,
    entered: tokio::sync::Notify,
    gate: tokio::sync::Notify,
}

#[async_trait]
impl SsdpTransport for GatedTransport {
    async fn send_search(&self, _search_target: &str, _mx: u8) -> Result<(), DiscoveryError> {
        let first = {
            let mut probes = self.probes.lock().unwrap();
            *probes += 1;
            *probes == 1
        };
        if first {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), DiscoveryError> {
        std::future::pending().await
    }
}

/// Records every group list it is handed.
#[derive(Default)]
struct RecordingListener {
    deliveries: Mutex<Vec<Vec<String>>>,
}

impl RecordingListener {
    fn count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    fn last(&self) -> Option<Vec<String>> {
        self.deliveries.lock().unwrap().last().cloned()
    }
}

impl GroupListener for RecordingListener {
    fn send(&self, _event: &str, groups: &[GroupSummary]) -> Result<(), ListenerError> {
        let names = groups.iter().map(|g| g.group_name.clone()).collect();
        self.deliveries.lock().unwrap().push(names);
        Ok(())
    }
}

fn datagram(kind: &str, id: &str, name: &str, max_age: u64) -> String {
    let start = match kind {
        "alive" => "NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\n",
        "byebye" => "NOTIFY * HTTP/1.1\r\nNTS: ssdp:byebye\r\n",
        _ => "HTTP/1.1 200 OK\r\n",
    };
    format!(
        "{start}\
         USN: uuid:{id}::urn:smartspeaker-audio:service:SpeakerGroup:1\r\n\
         HOUSEHOLD.SMARTSPEAKER.AUDIO: Household_HH\r\n\
         WEBSOCK.SMARTSPEAKER.AUDIO: wss://10.0.0.2:1443/websocket/api\r\n\
         GROUPINFO.SMARTSPEAKER.AUDIO: gc=1; gid={id}:1; gname=\"{name}\"\r\n\
         CACHE-CONTROL: max-age={max_age}\r\n\
         \r\n"
    )
}

fn from() -> SocketAddr {
    "10.0.0.2:1900".parse().unwrap()
}

fn service() -> (DiscoveryService, Arc<FakeTransport>, Arc<RecordingListener>) {
    service_with(DiscoveryConfig::default())
}

fn service_with(
    config: DiscoveryConfig,
) -> (DiscoveryService, Arc<FakeTransport>, Arc<RecordingListener>) {
    let transport = Arc::new(FakeTransport::default());
    let listener = Arc::new(RecordingListener::default());
    let service = DiscoveryService::new(transport.clone(), config);
    service.subscribe(listener.clone());
    (service, transport, listener)
}

fn names(service: &DiscoveryService) -> Vec<String> {
    service.groups().into_iter().map(|g| g.group_name).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cycle_evicts_only_peers_silent_since_its_start() {
    // Arrange
    let (service, _transport, _listener) = service();
    service.handle_datagram(datagram("alive", "A", "Kitchen", 1800).as_bytes(), from());
    service.handle_datagram(datagram("alive", "B", "Den", 1800).as_bytes(), from());
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Act
    service.refresh_groups().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    service.handle_datagram(datagram("response", "A", "Kitchen", 1800).as_bytes(), from());
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Assert
    assert_eq!(names(&service), vec!["Kitchen".to_string()]);
    assert_eq!(service.peer_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_peer_answering_before_eviction_is_kept() {
    let (service, _transport, _listener) = service();
    service.handle_datagram(datagram("alive", "A", "Kitchen", 1800).as_bytes(), from());
    tokio::time::sleep(Duration::from_secs(1)).await;

    service.refresh_groups().await.unwrap();
    tokio::time::sleep(Duration::from_millis(6900)).await;
    service.handle_datagram(datagram("response", "A", "Kitchen", 1800).as_bytes(), from());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(names(&service), vec!["Kitchen".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_peer_from_before_the_cycle_survives_until_eviction_time() {
    let (service, _transport, _listener) = service();
    service.handle_datagram(datagram("alive", "B", "Den", 1800).as_bytes(), from());
    tokio::time::sleep(Duration::from_secs(1)).await;

    service.refresh_groups().await.unwrap();
    tokio::time::sleep(Duration::from_millis(6500)).await;
    let before_eviction = names(&service);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(before_eviction, vec!["Den".to_string()]);
    assert!(names(&service).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_cycle_broadcasts_at_each_reissue_and_after_eviction() {
    // Arrange
    let (service, transport, listener) = service();

    // Act
    service.refresh_groups().await.unwrap();
    let after_first_probe = listener.count();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let after_first_reissue = listener.count();
    tokio::time::sleep(Duration::from_secs(6)).await;

    // Assert
    assert_eq!(after_first_probe, 0);
    assert_eq!(after_first_reissue, 1);
    assert_eq!(listener.count(), 3);
    assert_eq!(listener.last(), Some(Vec::new()));
    assert_eq!(transport.probes(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_response_is_published_by_the_next_cycle_broadcast() {
    let (service, _transport, listener) = service();
    service.refresh_groups().await.unwrap();

    service.handle_datagram(datagram("response", "A", "Kitchen", 1800).as_bytes(), from());
    let immediately = listener.count();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(immediately, 0);
    assert_eq!(listener.last(), Some(vec!["Kitchen".to_string()]));
}

#[tokio::test(start_paused = true)]
async fn test_alive_and_byebye_publish_immediately() {
    // Arrange
    let (service, _transport, listener) = service();

    // Act
    service.handle_datagram(datagram("alive", "A", "Kitchen", 1800).as_bytes(), from());
    let after_alive = listener.last();
    service.handle_datagram(datagram("alive", "A", "Kitchen", 1800).as_bytes(), from());
    let after_refresh_alive = listener.count();
    service.handle_datagram(datagram("byebye", "A", "Kitchen", 1800).as_bytes(), from());

    // Assert
    assert_eq!(after_alive, Some(vec!["Kitchen".to_string()]));
    assert_eq!(after_refresh_alive, 1, "an unchanged re-announcement is not republished");
    assert_eq!(listener.count(), 2);
    assert_eq!(listener.last(), Some(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_cycles_each_evict_against_their_own_start() {
    // Arrange
    let (service, _transport, _listener) = service();
    service.handle_datagram(datagram("alive", "A", "Kitchen", 1800).as_bytes(), from());
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Act: second cycle starts at T0+3s and A answers it at T0+4s.
    service.refresh_groups().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    service.refresh_groups().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    service.handle_datagram(datagram("response", "A", "Kitchen", 1800).as_bytes(), from());
    tokio::time::sleep(Duration::from_secs(7)).await;

    // Assert
    assert_eq!(names(&service), vec!["Kitchen".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_expiry_sweep_removes_peer_after_max_age() {
    // Arrange
    let config = DiscoveryConfig {
        expiry_interval_secs: 1,
        ..DiscoveryConfig::default()
    };
    let (service, _transport, listener) = service_with(config);
    service.start().unwrap();
    service.handle_datagram(datagram("alive", "A", "Kitchen", 2).as_bytes(), from());

    // Act
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let still_fresh = names(&service);
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Assert
    assert_eq!(still_fresh, vec!["Kitchen".to_string()]);
    assert_eq!(service.peer_count(), 0);
    assert_eq!(listener.last(), Some(Vec::new()));

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_cycle() {
    // Arrange
    let (service, transport, listener) = service();
    service.refresh_groups().await.unwrap();

    // Act
    service.shutdown().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Assert
    assert_eq!(transport.probes(), 1);
    assert_eq!(listener.count(), 0);
    assert!(!service.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_first_search_leaves_no_cycle_behind() {
    // Arrange
    let transport = Arc::new(GatedTransport::default());
    let listener = Arc::new(RecordingListener::default());
    let service = DiscoveryService::new(transport.clone(), DiscoveryConfig::default());
    service.subscribe(listener.clone());
    let refreshing = service.clone();
    let refresh = tokio::spawn(async move { refreshing.refresh_groups().await });
    transport.entered.notified().await;

    // Act
    service.shutdown().await;
    transport.gate.notify_one();
    let result = refresh.await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Assert
    assert!(matches!(result, Err(DiscoveryError::ShutDown)));
    assert_eq!(*transport.probes.lock().unwrap(), 1, "no reissue after shutdown");
    assert_eq!(listener.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_expiry_interval_still_sweeps_every_second() {
    // Arrange
    let config = DiscoveryConfig {
        expiry_interval_secs: 0,
        ..DiscoveryConfig::default()
    };
    let (service, _transport, _listener) = service_with(config);
    service.start().unwrap();
    service.handle_datagram(datagram("alive", "A", "Kitchen", 1).as_bytes(), from());

    // Act
    tokio::time::sleep(Duration::from_millis(2500)).await;

    // Assert
    assert_eq!(service.peer_count(), 0);
    assert!(service.is_running());

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_listener_receives_nothing_further() {
    // Arrange
    let (service, _transport, listener) = service();
    let as_dyn: Arc<dyn GroupListener> = listener.clone();
    service.handle_datagram(datagram("alive", "A", "Kitchen", 1800).as_bytes(), from());

    // Act
    let removed = service.unsubscribe(&as_dyn);
    let removed_again = service.unsubscribe(&as_dyn);
    service.handle_datagram(datagram("alive", "B", "Den", 1800).as_bytes(), from());

    // Assert
    assert!(removed);
    assert!(!removed_again);
    assert_eq!(listener.count(), 1);
    assert_eq!(names(&service), vec!["Den".to_string(), "Kitchen".to_string()]);
}
