use crate::binary::node::{Node, NodeContent};
use crate::binary::NodeBuilder;
use crate::bus::EventBuffer;
use crate::config::SocketConfig;
use crate::creds::Creds;
use crate::error::{ClientError, DisconnectReason};
use crate::externals::{Clock, SystemClock};
use crate::router::{Matcher, StanzaHandler, StanzaRouter};
use crate::signal::SignalRepository;
use crate::socket::frame_socket::FrameSocket;
use crate::socket::noise_socket::NoiseSocket;
use crate::store::KeyStore;
use crate::transport::TransportFactory;
use crate::types::events::{
    ConnectionState, ConnectionUpdate, Event, LastDisconnect,
};
use crate::types::jid::Jid;
use async_trait::async_trait;
use log::{debug, info, warn};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, Notify, RwLock};

/// Connection lifecycle, driven entirely on the connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Pairing,
    LoggingIn,
    Authenticated,
    Open,
    Closing,
    Closed,
}

/// One connection to the relay. All mutable state is confined to the
/// connection task; concurrent entry points serialize on
/// [`Client::processing_mutex`] or the key store transaction lock.
pub struct Client {
    pub config: SocketConfig,
    pub keys: KeyStore,
    pub signal: Arc<dyn SignalRepository>,
    pub events: EventBuffer,
    pub clock: Arc<dyn Clock>,

    pub(crate) creds: RwLock<Creds>,
    transport_factory: Arc<dyn TransportFactory>,

    pub(crate) noise_socket: Mutex<Option<Arc<NoiseSocket>>>,
    state: StdMutex<SessionState>,
    router: StdMutex<Option<Arc<StanzaRouter>>>,

    pub(crate) response_waiters: Mutex<HashMap<String, oneshot::Sender<Node>>>,
    pub(crate) unique_id: String,
    pub(crate) id_counter: AtomicU64,

    pub(crate) last_frame_received: StdMutex<Instant>,
    pub(crate) shutdown: Notify,
    ended: AtomicBool,

    /// Serializes message processing, receipts and app-state pushes so
    /// they are observed in wire order.
    pub(crate) processing_mutex: Mutex<()>,

    pub device_cache: crate::usync::DeviceCache,
    group_resolver: StdMutex<Option<Arc<dyn crate::externals::GroupMetadataResolver>>>,

    /// History sync arrived before the app-state key did.
    pub(crate) pending_app_state_sync: AtomicBool,
    /// The event buffer was opened waiting for the first full resync.
    pub(crate) initial_flush_pending: AtomicBool,
    pub(crate) initial_resync_done: AtomicBool,
}

impl Client {
    pub fn new(
        config: SocketConfig,
        creds: Creds,
        keys: KeyStore,
        signal: Arc<dyn SignalRepository>,
        transport_factory: Arc<dyn TransportFactory>,
    ) -> Arc<Self> {
        let mut unique_bytes = [0u8; 2];
        rand::thread_rng().fill_bytes(&mut unique_bytes);

        let device_cache_ttl = config.device_cache_ttl;
        let client = Arc::new(Self {
            config,
            keys,
            signal,
            events: EventBuffer::new(),
            clock: Arc::new(SystemClock),
            creds: RwLock::new(creds),
            transport_factory,
            noise_socket: Mutex::new(None),
            state: StdMutex::new(SessionState::Closed),
            router: StdMutex::new(None),
            response_waiters: Mutex::new(HashMap::new()),
            unique_id: format!("{}.{}", unique_bytes[0], unique_bytes[1]),
            id_counter: AtomicU64::new(0),
            last_frame_received: StdMutex::new(Instant::now()),
            shutdown: Notify::new(),
            ended: AtomicBool::new(false),
            processing_mutex: Mutex::new(()),
            device_cache: crate::usync::DeviceCache::new(device_cache_ttl),
            group_resolver: StdMutex::new(None),
            pending_app_state_sync: AtomicBool::new(false),
            initial_flush_pending: AtomicBool::new(false),
            initial_resync_done: AtomicBool::new(false),
        });

        let router = build_router();
        *client.router.lock().unwrap() = Some(Arc::new(router));
        client
    }

    /// Plugs in the group metadata collaborator; group sends fail
    /// without one.
    pub fn set_group_resolver(
        &self,
        resolver: Arc<dyn crate::externals::GroupMetadataResolver>,
    ) {
        *self.group_resolver.lock().unwrap() = Some(resolver);
    }

    pub(crate) fn group_resolver(
        &self,
    ) -> Option<Arc<dyn crate::externals::GroupMetadataResolver>> {
        self.group_resolver.lock().unwrap().clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Authenticated | SessionState::Open
        )
    }

    pub async fn creds_snapshot(&self) -> Creds {
        self.creds.read().await.clone()
    }

    /// Applies a credential mutation and surfaces it for persistence.
    pub(crate) async fn update_creds(&self, update: crate::types::events::CredsUpdate) {
        self.creds.write().await.apply(&update);
        self.events.emit(Event::CredsUpdate(update));
    }

    /// Opens the carrier, runs the Noise handshake and starts the frame
    /// and keep-alive loops. Returns once the encrypted transport is up;
    /// login/pairing progress is reported through `connection.update`.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.state() != SessionState::Closed {
            return Err(ClientError::Socket(
                crate::socket::error::SocketError::SocketAlreadyOpen,
            ));
        }
        self.ended.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Connecting);
        self.events
            .emit(Event::ConnectionUpdate(ConnectionUpdate {
                connection: Some(ConnectionState::Connecting),
                ..Default::default()
            }));

        let (transport, raw_rx) = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport_factory.connect(&self.config.ws_url),
        )
        .await
        .map_err(|_| ClientError::Disconnected(DisconnectReason::TimedOut))?
        .map_err(|e| {
            crate::socket::error::SocketError::Transport(e.to_string())
        })?;

        let (frame_socket, mut frames_rx) = FrameSocket::new(transport, raw_rx);

        self.set_state(SessionState::Handshaking);
        let creds = self.creds_snapshot().await;
        let mut handshake = crate::handshake::HandshakeState::new(&creds, &self.config)?;

        frame_socket
            .send_frame(&handshake.build_client_hello()?)
            .await
            .map_err(ClientError::Socket)?;

        let server_hello = tokio::time::timeout(self.config.connect_timeout, frames_rx.recv())
            .await
            .map_err(|_| ClientError::Disconnected(DisconnectReason::TimedOut))?
            .ok_or(ClientError::Disconnected(DisconnectReason::ConnectionClosed))?;

        let client_finish =
            handshake.read_server_hello_and_build_client_finish(server_hello.as_ref())?;
        frame_socket
            .send_frame(&client_finish)
            .await
            .map_err(ClientError::Socket)?;

        let (write_key, read_key) = handshake.finish()?;
        let noise_socket = Arc::new(NoiseSocket::new(frame_socket, write_key, read_key));
        *self.noise_socket.lock().await = Some(noise_socket);

        self.set_state(if creds.is_registered() {
            SessionState::LoggingIn
        } else {
            SessionState::Pairing
        });
        *self.last_frame_received.lock().unwrap() = self.clock.now_instant();

        self.spawn_pipelines(frames_rx);
        Ok(())
    }

    /// Starts the inbound pipelines and the keep-alive timer.
    ///
    /// Stage one resolves reply waiters and teardown stanzas inline so
    /// queries issued from handlers always complete; stage two runs
    /// every other handler to completion, one stanza at a time.
    pub(crate) fn spawn_pipelines(
        self: &Arc<Self>,
        frames_rx: tokio::sync::mpsc::Receiver<bytes::Bytes>,
    ) {
        let (dispatch_tx, dispatch_rx) = tokio::sync::mpsc::unbounded_channel();
        let frame_client = self.clone();
        tokio::spawn(async move { frame_client.frame_loop(frames_rx, dispatch_tx).await });
        let processor_client = self.clone();
        tokio::spawn(async move { processor_client.processor_loop(dispatch_rx).await });

        let keepalive_client = self.clone();
        tokio::spawn(async move { keepalive_client.keepalive_loop().await });
    }

    async fn frame_loop(
        self: Arc<Self>,
        mut frames_rx: tokio::sync::mpsc::Receiver<bytes::Bytes>,
        dispatch_tx: tokio::sync::mpsc::UnboundedSender<Node>,
    ) {
        loop {
            tokio::select! {
                frame = frames_rx.recv() => {
                    let Some(frame) = frame else {
                        self.end(DisconnectReason::ConnectionClosed).await;
                        return;
                    };
                    *self.last_frame_received.lock().unwrap() = self.clock.now_instant();
                    if let Err(e) = self.handle_encrypted_frame(&frame, &dispatch_tx).await {
                        warn!(target: "Client", "failed to handle frame: {e}");
                    }
                }
                _ = self.shutdown.notified() => {
                    debug!(target: "Client", "frame loop shutting down");
                    return;
                }
            }
        }
    }

    async fn handle_encrypted_frame(
        self: &Arc<Self>,
        frame: &[u8],
        dispatch_tx: &tokio::sync::mpsc::UnboundedSender<Node>,
    ) -> Result<(), ClientError> {
        let socket = self
            .noise_socket
            .lock()
            .await
            .clone()
            .ok_or(ClientError::Disconnected(DisconnectReason::ConnectionClosed))?;
        let plaintext = socket.decrypt_frame(frame)?;
        let node = crate::binary::unmarshal(&plaintext)?;
        log::trace!(target: "Client", "<-- {node}");

        match node.tag.as_str() {
            "stream:error" => {
                self.handle_stream_error(&node).await;
                return Ok(());
            }
            "xmlstreamend" => {
                self.end(DisconnectReason::ConnectionClosed).await;
                return Ok(());
            }
            "failure" => {
                self.handle_failure(&node).await;
                return Ok(());
            }
            _ => {}
        }

        // Reply correlation comes before routing.
        if self.handle_iq_response(&node).await {
            return Ok(());
        }
        let _ = dispatch_tx.send(node);
        Ok(())
    }

    /// Stage two: handlers for one stanza run to completion before the
    /// next is routed.
    async fn processor_loop(
        self: Arc<Self>,
        mut dispatch_rx: tokio::sync::mpsc::UnboundedReceiver<Node>,
    ) {
        while let Some(node) = dispatch_rx.recv().await {
            self.process_node(node).await;
        }
        debug!(target: "Client", "processor loop shutting down");
    }

    /// Pattern-routes one stanza. Unconsumed frames only get a debug line.
    pub(crate) async fn process_node(self: &Arc<Self>, node: Node) {
        let router = self.router.lock().unwrap().clone();
        let consumed = match router {
            Some(router) => router.dispatch(self.clone(), &node).await,
            None => false,
        };
        if !consumed {
            debug!(target: "Client", "unhandled stanza: {node}");
        }
    }

    async fn handle_stream_error(self: &Arc<Self>, node: &Node) {
        let code = node.attrs.get("code").cloned().unwrap_or_default();
        let reason = if node.get_optional_child("conflict").is_some() {
            DisconnectReason::LoggedOut
        } else {
            DisconnectReason::from_stream_error_code(&code)
        };
        warn!(target: "Client", "stream error, code={code:?} -> {reason}");
        self.end(reason).await;
    }

    async fn handle_failure(self: &Arc<Self>, node: &Node) {
        let mut attrs = node.attrs();
        let reason = match attrs.optional_u64("reason") {
            Some(401) => DisconnectReason::LoggedOut,
            Some(403) => DisconnectReason::Forbidden,
            Some(405) => DisconnectReason::Unpaired,
            Some(411) => DisconnectReason::MultideviceMismatch,
            _ => DisconnectReason::StreamError,
        };
        warn!(target: "Client", "connection failure: {node}");
        self.end(reason).await;
    }

    /// Keep-alive: on every tick, a connection whose last inbound frame
    /// is older than the interval plus grace is declared lost; otherwise
    /// a ping goes out (the response is not required for liveness).
    async fn keepalive_loop(self: Arc<Self>) {
        let interval = self.config.keep_alive_interval;
        let grace = Duration::from_millis(5000);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let last = *self.last_frame_received.lock().unwrap();
                    let silence = self.clock.now_instant().saturating_duration_since(last);
                    if silence > interval + grace {
                        warn!(
                            target: "Client/Keepalive",
                            "no data for {}ms, closing",
                            silence.as_millis()
                        );
                        self.end(DisconnectReason::ConnectionLost).await;
                        return;
                    }

                    let ping_client = self.clone();
                    tokio::spawn(async move {
                        let iq = crate::request::InfoQuery {
                            namespace: "w:p",
                            query_type: crate::request::InfoQueryType::Get,
                            to: Jid::server_jid(),
                            target: None,
                            id: None,
                            content: Some(NodeContent::Nodes(vec![
                                NodeBuilder::new("ping").build(),
                            ])),
                            timeout: None,
                        };
                        if let Err(e) = ping_client.send_iq(iq).await {
                            debug!(target: "Client/Keepalive", "ping failed: {e:?}");
                        }
                    });
                }
                _ = self.shutdown.notified() => {
                    debug!(target: "Client/Keepalive", "shutdown, exiting keepalive loop");
                    return;
                }
            }
        }
    }

    /// Idempotent teardown: closes the socket, cancels pending queries
    /// and timers, and emits exactly one close update.
    pub async fn end(self: &Arc<Self>, reason: DisconnectReason) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(target: "Client", "ending connection: {reason}");
        self.set_state(SessionState::Closing);
        self.shutdown.notify_waiters();

        if let Some(socket) = self.noise_socket.lock().await.take() {
            socket.close().await;
        }

        // Fail every pending query; the dropped senders surface as
        // connection-closed errors at the call sites.
        self.response_waiters.lock().await.clear();

        // Never strand events held for an initial resync that will no
        // longer happen on this connection.
        if self.initial_flush_pending.swap(false, Ordering::SeqCst) {
            self.events.flush();
        }

        self.set_state(SessionState::Closed);
        self.events
            .emit(Event::ConnectionUpdate(ConnectionUpdate {
                connection: Some(ConnectionState::Close),
                last_disconnect: Some(LastDisconnect {
                    reason,
                    date: chrono::Utc::now(),
                }),
                ..Default::default()
            }));
    }

    /// Unregisters this companion from the account, then closes.
    pub async fn logout(self: &Arc<Self>) -> Result<(), ClientError> {
        let me = self
            .creds_snapshot()
            .await
            .me
            .ok_or(ClientError::NotLoggedIn)?;

        let iq = crate::request::InfoQuery {
            namespace: "md",
            query_type: crate::request::InfoQueryType::Set,
            to: Jid::server_jid(),
            target: None,
            id: None,
            content: Some(NodeContent::Nodes(vec![NodeBuilder::new(
                "remove-companion-device",
            )
            .attr("jid", me.to_string())
            .attr("reason", "user_initiated")
            .build()])),
            timeout: None,
        };
        let _ = self.send_iq(iq).await;
        self.end(DisconnectReason::LoggedOut).await;
        Ok(())
    }

    /// Login success: top up pre-keys, announce passive/active, report
    /// the connection open.
    pub(crate) async fn handle_success(self: &Arc<Self>, _node: &Node) {
        self.set_state(SessionState::Authenticated);
        info!(target: "Client", "authentication successful");

        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.upload_prekeys_if_needed().await {
                warn!(target: "Client", "pre-key top-up failed: {e:?}");
            }

            // Required post-login announcement; the server expects it
            // even though its purpose is undocumented upstream.
            let mode = if client.config.mark_online_on_connect {
                "active"
            } else {
                "passive"
            };
            let iq = crate::request::InfoQuery {
                namespace: "passive",
                query_type: crate::request::InfoQueryType::Set,
                to: Jid::server_jid(),
                target: None,
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new(mode).build()])),
                timeout: None,
            };
            if let Err(e) = client.send_iq(iq).await {
                warn!(target: "Client", "passive/active iq failed: {e:?}");
            }

            client.set_state(SessionState::Open);
            client
                .events
                .emit(Event::ConnectionUpdate(ConnectionUpdate {
                    connection: Some(ConnectionState::Open),
                    is_online: Some(client.config.mark_online_on_connect),
                    ..Default::default()
                }));
        });
    }

    /// `ib` service stanzas: offline previews and forced downgrades.
    pub(crate) async fn handle_ib(self: &Arc<Self>, node: &Node) -> bool {
        if node.get_optional_child("downgrade_webclient").is_some() {
            warn!(target: "Client", "server requested web client downgrade");
            self.end(DisconnectReason::MultideviceMismatch).await;
            return true;
        }
        if let Some(offline) = node.get_optional_child("offline") {
            let mut attrs = offline.attrs();
            let count = attrs.optional_u64("count").unwrap_or(0);
            debug!(target: "Client", "offline preview: {count} pending notifications");

            let needs_key = self.creds.read().await.my_app_state_key_id.is_none();
            if needs_key && !self.initial_flush_pending.swap(true, Ordering::SeqCst) {
                // Hold events back until the first full resync lands.
                self.events.buffer();
            }

            self.events
                .emit(Event::ConnectionUpdate(ConnectionUpdate {
                    received_pending_notifications: Some(true),
                    ..Default::default()
                }));
            return true;
        }
        false
    }

    /// Sends an ack for stanzas that require one.
    pub(crate) async fn send_ack(self: &Arc<Self>, node: &Node) {
        let mut attrs = node.attrs();
        let id = match attrs.optional_string("id") {
            Some(id) => id.to_string(),
            None => return,
        };
        let from = attrs.optional_string("from").unwrap_or_default().to_string();

        let mut builder = NodeBuilder::new("ack")
            .attr("class", node.tag.clone())
            .attr("id", id)
            .attr("to", from);
        if let Some(participant) = attrs.optional_string("participant") {
            builder = builder.attr("participant", participant.to_string());
        }
        if let Some(recipient) = attrs.optional_string("recipient") {
            builder = builder.attr("recipient", recipient.to_string());
        }
        if node.tag != "message" {
            if let Some(t) = attrs.optional_string("type") {
                builder = builder.attr("type", t.to_string());
            }
        }

        if let Err(e) = self.send_node(&builder.build()).await {
            warn!(target: "Client", "failed to ack {}: {e:?}", node.tag);
        }
    }

    pub(crate) async fn send_node(&self, node: &Node) -> Result<(), ClientError> {
        let socket = self
            .noise_socket
            .lock()
            .await
            .clone()
            .ok_or(ClientError::Disconnected(DisconnectReason::ConnectionClosed))?;
        socket.send_node(node).await.map_err(ClientError::Socket)
    }
}

// ---------------------------------------------------------------------------
// Route table
// ---------------------------------------------------------------------------

struct SuccessHandler;
struct IbHandler;
struct PairDeviceHandler;
struct PairSuccessHandler;
struct MessageHandler;
struct ReceiptHandler;
struct NotificationHandler;
struct PresenceHandler;
struct AckHandler;

#[async_trait]
impl StanzaHandler for SuccessHandler {
    async fn handle(&self, client: Arc<Client>, node: &Node) -> bool {
        client.handle_success(node).await;
        true
    }
}

#[async_trait]
impl StanzaHandler for IbHandler {
    async fn handle(&self, client: Arc<Client>, node: &Node) -> bool {
        client.handle_ib(node).await
    }
}

#[async_trait]
impl StanzaHandler for PairDeviceHandler {
    async fn handle(&self, client: Arc<Client>, node: &Node) -> bool {
        crate::pair::handle_pair_device(&client, node).await
    }
}

#[async_trait]
impl StanzaHandler for PairSuccessHandler {
    async fn handle(&self, client: Arc<Client>, node: &Node) -> bool {
        crate::pair::handle_pair_success(&client, node).await
    }
}

#[async_trait]
impl StanzaHandler for MessageHandler {
    async fn handle(&self, client: Arc<Client>, node: &Node) -> bool {
        crate::message::handle_message_stanza(&client, node).await
    }
}

#[async_trait]
impl StanzaHandler for ReceiptHandler {
    async fn handle(&self, client: Arc<Client>, node: &Node) -> bool {
        crate::message::handle_receipt(&client, node).await
    }
}

#[async_trait]
impl StanzaHandler for NotificationHandler {
    async fn handle(&self, client: Arc<Client>, node: &Node) -> bool {
        crate::message::handle_notification(&client, node).await
    }
}

#[async_trait]
impl StanzaHandler for PresenceHandler {
    async fn handle(&self, client: Arc<Client>, node: &Node) -> bool {
        crate::message::handle_presence(&client, node).await
    }
}

#[async_trait]
impl StanzaHandler for AckHandler {
    async fn handle(&self, _client: Arc<Client>, _node: &Node) -> bool {
        true
    }
}

fn build_router() -> StanzaRouter {
    let mut router = StanzaRouter::new();
    router.register(Matcher::tag("success"), Arc::new(SuccessHandler));
    router.register(Matcher::tag("ib"), Arc::new(IbHandler));
    router.register(
        Matcher::nested("iq", "type", "set", "pair-device"),
        Arc::new(PairDeviceHandler),
    );
    router.register(
        Matcher::child("iq", "pair-success"),
        Arc::new(PairSuccessHandler),
    );
    router.register(Matcher::tag("message"), Arc::new(MessageHandler));
    router.register(Matcher::tag("receipt"), Arc::new(ReceiptHandler));
    router.register(Matcher::tag("notification"), Arc::new(NotificationHandler));
    router.register(Matcher::tag("presence"), Arc::new(PresenceHandler));
    router.register(Matcher::tag("chatstate"), Arc::new(PresenceHandler));
    router.register(Matcher::tag("ack"), Arc::new(AckHandler));
    router
}
