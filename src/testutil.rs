//! In-memory test network: a fully-wired client over the mock transport
//! with a scripted "server" side sharing the post-handshake keys.

use crate::binary::node::Node;
use crate::client::{Client, SessionState};
use crate::config::SocketConfig;
use crate::creds::Creds;
use crate::signal::mock::MockSignalRepository;
use crate::socket::frame_socket::FrameSocket;
use crate::socket::noise_handshake::generate_iv;
use crate::socket::noise_socket::NoiseSocket;
use crate::store::{KeyStore, MemoryBackend};
use crate::transport::mock::{MockTransport, MockTransportFactory};
use crate::transport::TransportFactory;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Drives one client against an in-memory peer. Outbound frames are
/// decrypted with the client's write key, inbound frames are encrypted
/// with its read key; both sides skip the handshake and share fixed keys.
pub struct TestHarness {
    pub client: Arc<Client>,
    pub signal: Arc<MockSignalRepository>,
    mock: Arc<MockTransport>,
    inbound_tx: tokio::sync::mpsc::Sender<Bytes>,
    peer_read_key: Aes256Gcm,
    peer_write_key: Aes256Gcm,
    read_counter: u32,
    write_counter: u32,
    consumed_frames: usize,
}

impl TestHarness {
    pub async fn new() -> Self {
        let mut creds = Creds::generate();
        creds.me = Some("5550001111:1@s.whatsapp.net".parse().unwrap());
        Self::with_creds_and_config(creds, SocketConfig::default()).await
    }

    pub async fn with_creds_and_config(creds: Creds, config: SocketConfig) -> Self {
        let signal = Arc::new(MockSignalRepository::new());
        let keys = KeyStore::new(Arc::new(MemoryBackend::new()));
        let factory = MockTransportFactory::new();
        let inbound_tx = factory.inbound_tx.clone();
        let mock = factory.transport();

        let client = Client::new(
            config,
            creds,
            keys,
            signal.clone(),
            Arc::new(MockTransportFactory::new()),
        );

        let (transport, raw_rx) = factory.connect("ws://test").await.unwrap();
        let (frame_socket, frames_rx) = FrameSocket::new(transport, raw_rx);

        let key = [0x11u8; 32];
        let write_key = Aes256Gcm::new_from_slice(&key).unwrap();
        let read_key = Aes256Gcm::new_from_slice(&key).unwrap();
        *client.noise_socket.lock().await = Some(Arc::new(NoiseSocket::new(
            frame_socket,
            write_key,
            read_key,
        )));
        client.set_state(SessionState::Open);
        client.spawn_pipelines(frames_rx);

        Self {
            client,
            signal,
            mock,
            inbound_tx,
            peer_read_key: Aes256Gcm::new_from_slice(&key).unwrap(),
            peer_write_key: Aes256Gcm::new_from_slice(&key).unwrap(),
            read_counter: 0,
            write_counter: 0,
            consumed_frames: 0,
        }
    }

    /// Decrypts and decodes every outbound stanza sent since the last
    /// call.
    pub async fn sent_stanzas(&mut self) -> Vec<Node> {
        let frames = self.mock.sent_frames().await;
        let mut out = Vec::new();
        for (i, frame) in frames.iter().enumerate().skip(self.consumed_frames) {
            // The first transport frame carries the connection magic.
            let body = if i == 0 { &frame[4..] } else { &frame[..] };
            let (len_prefix, ciphertext) = body.split_at(3);
            let len =
                ((len_prefix[0] as usize) << 16) | ((len_prefix[1] as usize) << 8) | len_prefix[2] as usize;
            assert_eq!(len, ciphertext.len(), "frame length prefix mismatch");

            let iv = generate_iv(self.read_counter);
            self.read_counter += 1;
            let plaintext = self
                .peer_read_key
                .decrypt(iv.as_ref().into(), ciphertext)
                .expect("outbound frame should decrypt with shared key");
            out.push(crate::binary::unmarshal(&plaintext).expect("outbound frame should decode"));
        }
        self.consumed_frames = frames.len();
        out
    }

    /// Polls for outbound stanzas until at least one arrives.
    pub async fn wait_for_stanzas(&mut self) -> Vec<Node> {
        for _ in 0..200 {
            let stanzas = self.sent_stanzas().await;
            if !stanzas.is_empty() {
                return stanzas;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no stanza sent within the polling window");
    }

    /// Encrypts and frames a server-side stanza into the client.
    pub async fn inject(&mut self, node: Node) {
        let plaintext = crate::binary::marshal(&node).unwrap();
        let iv = generate_iv(self.write_counter);
        self.write_counter += 1;
        let ciphertext = self
            .peer_write_key
            .encrypt(iv.as_ref().into(), plaintext.as_slice())
            .unwrap();

        let mut frame = u32::to_be_bytes(ciphertext.len() as u32)[1..].to_vec();
        frame.extend_from_slice(&ciphertext);
        self.inbound_tx
            .send(Bytes::from(frame))
            .await
            .expect("inbound channel open");
    }

    /// Lets the pipelines drain.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    /// Puts the connection into the pairing leg of the state machine.
    pub fn enter_pairing(&self) {
        self.client.set_state(SessionState::Pairing);
    }
}

/// Event handler that records everything into a shared vector.
pub struct EventCollector {
    pub events: std::sync::Mutex<Vec<crate::types::events::Event>>,
}

impl EventCollector {
    pub fn install(client: &Client) -> Arc<Self> {
        let collector = Arc::new(Self {
            events: std::sync::Mutex::new(Vec::new()),
        });
        client.events.add_handler(collector.clone());
        collector
    }

    pub fn snapshot(&self) -> Vec<crate::types::events::Event> {
        self.events.lock().unwrap().clone()
    }
}

impl crate::types::events::EventHandler for EventCollector {
    fn handle_event(&self, event: &crate::types::events::Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}
