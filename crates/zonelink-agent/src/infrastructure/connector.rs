//! WebSocket control session to a group coordinator.
//!
//! # Connect sequence
//!
//! ```text
//!  connect(household, group, url)
//!     │  state: Connecting
//!     ├─ wss:// ─► TLS pre-flight against host:port ──fail──► Failed + Error event
//!     ├─ WebSocket handshake (url?key=<api key>, sub-protocol header)
//!     │                                          ──fail──► Failed + Error event
//!     └─ state: Open, Connected event, session task spawned
//! ```
//!
//! One task per session owns the socket.  It dispatches inbound text frames
//! through the [`MessageRouter`] and writes outbound envelopes queued by
//! [`SessionConnector::send`], preserving their order.
//!
//! Every session carries a generation number.  A task or a connect attempt
//! whose generation is no longer current cannot change the state, so a late
//! completion never resurrects a session that was disconnected.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Uri};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zonelink_core::{Command, Envelope, Topic};

use crate::application::features::CommandSink;
use crate::application::router::MessageRouter;
use crate::domain::{SessionConfig, SessionError, SessionEvent, SessionState};
use crate::infrastructure::tls::{
    classify_handshake_error, client_config, preflight_check, TlsSetupError, TrustAnchors,
};

/// Capacity of the lifecycle event channel.  Events beyond it are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` waits for the close frame to be written.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Scheme, host and port of a session URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub secure: bool,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parses a `ws://` or `wss://` URL.  The port defaults to 80 or 443.
    pub fn parse(url: &str) -> Result<Self, SessionError> {
        let invalid = |reason: &str| SessionError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let uri: Uri = url.parse().map_err(|_| invalid("not a URI"))?;
        let secure = match uri.scheme_str() {
            Some("wss") => true,
            Some("ws") => false,
            _ => return Err(invalid("scheme must be ws or wss")),
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
        Ok(Self { secure, host, port })
    }
}

/// Appends the API key as the `key` query parameter.
pub fn session_url(url: &str, api_key: &Uuid) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}key={api_key}")
}

/// Opens, owns and closes one control session at a time.
///
/// Cloning yields another handle to the same connector.  When the last
/// handle is dropped an open session is closed by its task.
#[derive(Clone)]
pub struct SessionConnector {
    shared: Arc<Shared>,
}

struct Shared {
    settings: SessionConfig,
    tls: Arc<ClientConfig>,
    router: Arc<MessageRouter>,
    events: mpsc::Sender<SessionEvent>,
    slot: Mutex<Slot>,
}

struct Slot {
    state: SessionState,
    generation: u64,
    label: Option<Uuid>,
    household_id: String,
    group_id: String,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl SessionConnector {
    /// Creates a connector and the receiver for its lifecycle events.
    pub fn new(
        settings: SessionConfig,
        tls: Arc<ClientConfig>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Shared {
            settings,
            tls,
            router: Arc::new(MessageRouter::new()),
            events,
            slot: Mutex::new(Slot {
                state: SessionState::Idle,
                generation: 0,
                label: None,
                household_id: String::new(),
                group_id: String::new(),
                outbound: None,
                task: None,
            }),
        };
        (Self { shared: Arc::new(shared) }, rx)
    }

    /// Loads the configured trust anchors and builds the TLS client config.
    pub fn from_config(
        settings: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), TlsSetupError> {
        let anchors = TrustAnchors::from_pem_files(&settings.trust_anchors)?;
        if anchors.is_empty() {
            warn!("no trust anchors configured; secure sessions will be rejected");
        }
        let tls = client_config(&anchors)?;
        Ok(Self::new(settings, tls))
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock_slot().state
    }

    /// Household of the current session; empty when none is open.
    pub fn household_id(&self) -> String {
        self.shared.lock_slot().household_id.clone()
    }

    pub fn group_id(&self) -> String {
        self.shared.lock_slot().group_id.clone()
    }

    /// The router inbound frames are dispatched through.
    pub fn router(&self) -> &MessageRouter {
        &self.shared.router
    }

    /// Opens a session to the coordinator at `url`.
    ///
    /// For `wss://` URLs the certificate pre-flight runs first; the WebSocket
    /// is never attempted if it fails.  Each stage is bounded by the
    /// configured connect timeout.  No retry is made on failure.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyConnected`] while a session is connecting or open
    /// - [`SessionError::InvalidUrl`] if `url` is not a `ws`/`wss` URL
    /// - [`SessionError::Certificate`], [`SessionError::Timeout`] or
    ///   [`SessionError::Transport`] when the attempt fails; the state is then
    ///   `Failed` and the same error is published as [`SessionEvent::Error`]
    pub async fn connect(
        &self,
        household_id: &str,
        group_id: &str,
        url: &str,
    ) -> Result<(), SessionError> {
        let endpoint = Endpoint::parse(url)?;
        let (generation, label) = {
            let mut slot = self.shared.lock_slot();
            if !slot.state.can_connect() {
                return Err(SessionError::AlreadyConnected);
            }
            let label = Uuid::new_v4();
            slot.generation += 1;
            slot.state = SessionState::Connecting;
            slot.label = Some(label);
            slot.household_id = household_id.to_string();
            slot.group_id = group_id.to_string();
            (slot.generation, label)
        };
        info!(
            session = %label,
            host = %endpoint.host,
            port = endpoint.port,
            secure = endpoint.secure,
            "connecting"
        );

        match self.shared.open(&endpoint, url).await {
            Ok(ws) => Shared::install(&self.shared, generation, label, ws),
            Err(err) => {
                self.shared.fail(generation, label, err.clone());
                Err(err)
            }
        }
    }

    /// Closes the current session.  Idempotent.
    ///
    /// Handlers are cleared before the session task is stopped, and the task
    /// has finished when this returns, so no handler runs afterwards.
    pub async fn disconnect(&self) {
        let (task, was_open, label) = {
            let mut slot = self.shared.lock_slot();
            let was_open = slot.state == SessionState::Open;
            if matches!(slot.state, SessionState::Open | SessionState::Connecting) {
                slot.state = SessionState::Closed;
                slot.generation += 1;
            }
            slot.household_id.clear();
            slot.group_id.clear();
            // Dropping the sender tells the task to send a close frame.
            slot.outbound = None;
            (slot.task.take(), was_open, slot.label)
        };

        self.shared.router.clear();

        if let Some(mut task) = task {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                task.abort();
                let _ = task.await;
            }
        }

        if was_open {
            if let Some(label) = label {
                info!(session = %label, "disconnected");
            }
            self.shared.emit(SessionEvent::Disconnected);
        }
    }

    /// Queues `envelope` for the open session.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotOpen`] outside the `Open` state; nothing is queued.
    pub fn send(&self, envelope: &Envelope) -> Result<(), SessionError> {
        let text = envelope
            .to_json()
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        let slot = self.shared.lock_slot();
        match (&slot.outbound, slot.state) {
            (Some(outbound), SessionState::Open) => outbound
                .send(text)
                .map_err(|_| SessionError::Transport("session writer has stopped".to_string())),
            (_, state) => Err(SessionError::NotOpen(state)),
        }
    }
}

impl CommandSink for SessionConnector {
    fn send_command(&self, topic: &Topic, command: &Command) -> Result<(), SessionError> {
        let envelope = {
            let slot = self.shared.lock_slot();
            if slot.state != SessionState::Open {
                return Err(SessionError::NotOpen(slot.state));
            }
            Envelope::command(topic, &slot.household_id, &slot.group_id, command)
        };
        self.send(&envelope)
    }

    fn router(&self) -> &MessageRouter {
        &self.shared.router
    }
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publishes without blocking; a full or closed channel drops the event.
    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("session event dropped: {e}");
        }
    }

    async fn open(&self, endpoint: &Endpoint, url: &str) -> Result<WsStream, SessionError> {
        let timeout = self.settings.connect_timeout();

        if endpoint.secure {
            preflight_check(Arc::clone(&self.tls), &endpoint.host, endpoint.port, timeout).await?;
        }

        let mut request = session_url(url, &self.settings.api_key)
            .into_client_request()
            .map_err(|e| SessionError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let protocol = HeaderValue::from_str(&self.settings.sub_protocol).map_err(|e| {
            SessionError::Transport(format!(
                "invalid sub-protocol {:?}: {e}",
                self.settings.sub_protocol
            ))
        })?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);

        let connector = if endpoint.secure {
            Connector::Rustls(Arc::clone(&self.tls))
        } else {
            Connector::Plain
        };
        let handshake = connect_async_tls_with_config(request, None, false, Some(connector));
        let (ws, _response) = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| SessionError::Timeout {
                stage: "WebSocket handshake",
                timeout,
            })?
            .map_err(|e| match e {
                WsError::Io(io) => classify_handshake_error(&endpoint.host, io),
                other => SessionError::Transport(format!("WebSocket handshake failed: {other}")),
            })?;
        Ok(ws)
    }

    fn install(
        self: &Arc<Self>,
        generation: u64,
        label: Uuid,
        ws: WsStream,
    ) -> Result<(), SessionError> {
        let mut slot = self.lock_slot();
        if slot.generation != generation || slot.state != SessionState::Connecting {
            drop(slot);
            debug!(session = %label, "disconnected while connecting; dropping socket");
            tokio::spawn(async move {
                let mut ws = ws;
                let _ = ws.close(None).await;
            });
            return Err(SessionError::Transport(
                "connection attempt cancelled by disconnect".to_string(),
            ));
        }

        let (outbound, rx) = mpsc::unbounded_channel();
        slot.state = SessionState::Open;
        slot.outbound = Some(outbound);
        slot.task = Some(tokio::spawn(run_session(
            Arc::downgrade(self),
            Arc::clone(&self.router),
            generation,
            label,
            ws,
            rx,
        )));
        // Emitted under the lock so it always precedes the task's own events.
        self.emit(SessionEvent::Connected {
            household_id: slot.household_id.clone(),
            group_id: slot.group_id.clone(),
        });
        info!(session = %label, "session open");
        Ok(())
    }

    fn fail(&self, generation: u64, label: Uuid, err: SessionError) {
        let mut slot = self.lock_slot();
        if slot.generation != generation || slot.state != SessionState::Connecting {
            return;
        }
        warn!(session = %label, "connect failed: {err}");
        slot.state = SessionState::Failed;
        slot.household_id.clear();
        slot.group_id.clear();
        self.emit(SessionEvent::Error(err));
    }

    /// Called by the session task when the socket ends on its own.
    fn finish(&self, generation: u64, label: Uuid, outcome: Result<(), SessionError>) {
        let mut slot = self.lock_slot();
        if slot.generation != generation || slot.state != SessionState::Open {
            return;
        }
        slot.outbound = None;
        slot.task = None;
        slot.household_id.clear();
        slot.group_id.clear();
        self.router.clear();
        match outcome {
            Ok(()) => {
                info!(session = %label, "closed by device");
                slot.state = SessionState::Closed;
                self.emit(SessionEvent::Disconnected);
            }
            Err(err) => {
                warn!(session = %label, "session failed: {err}");
                slot.state = SessionState::Failed;
                self.emit(SessionEvent::Error(err));
            }
        }
    }
}

/// Owns the socket of one session until either side closes it.
async fn run_session(
    shared: Weak<Shared>,
    router: Arc<MessageRouter>,
    generation: u64,
    label: Uuid,
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let (mut sink, mut stream) = ws.split();

    let outcome = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    router.dispatch(&text);
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(session = %label, ?frame, "close frame received");
                    break Ok(());
                }
                // Pings are answered by tungstenite; binary frames are not part
                // of the protocol.
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    break Ok(())
                }
                // The socket ended without a close frame: the device went
                // away rather than closing the session.
                Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))) => {
                    break Err(SessionError::Transport(
                        "connection dropped without a close frame".to_string(),
                    ))
                }
                Some(Err(e)) => break Err(SessionError::Transport(e.to_string())),
            },
            queued = outbound.recv() => match queued {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        break Err(SessionError::Transport(format!("send failed: {e}")));
                    }
                }
                None => {
                    if let Err(e) = sink.close().await {
                        debug!(session = %label, "close: {e}");
                    }
                    break Ok(());
                }
            },
        }
    };

    if let Some(shared) = shared.upgrade() {
        shared.finish(generation, label, outcome);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
