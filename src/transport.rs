//! Carrier abstraction under the frame layer. The production transport is
//! a WebSocket; tests plug in an in-memory pair.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use log::{debug, error, trace};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_websockets::{ClientBuilder, Message};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, data: &[u8]) -> anyhow::Result<()>;
    async fn close(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Opens the carrier. The receiver yields raw inbound payload chunks;
    /// the channel closing signals carrier loss.
    async fn connect(&self, url: &str)
        -> anyhow::Result<(Arc<dyn Transport>, mpsc::Receiver<Bytes>)>;
}

type WsStream = tokio_websockets::WebSocketStream<
    tokio_websockets::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

pub struct WebSocketTransport {
    sink: Mutex<Option<WsSink>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, data: &[u8]) -> anyhow::Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("websocket already closed"))?;
        sink.send(Message::binary(Bytes::copy_from_slice(data)))
            .await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransportFactory;

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn connect(
        &self,
        url: &str,
    ) -> anyhow::Result<(Arc<dyn Transport>, mpsc::Receiver<Bytes>)> {
        debug!(target: "Transport", "dialing {url}");
        let uri: http::Uri = url.parse()?;
        let (stream, _response) = ClientBuilder::from_uri(uri).connect().await?;

        let (sink, mut source) = stream.split();
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            loop {
                match source.next().await {
                    Some(Ok(msg)) => {
                        if msg.is_binary() {
                            let payload = Bytes::copy_from_slice(msg.as_payload());
                            trace!(target: "Transport", "<-- {} bytes", payload.len());
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        } else if msg.is_close() {
                            trace!(target: "Transport", "received close frame");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!(target: "Transport", "websocket read error: {e}");
                        break;
                    }
                    None => {
                        trace!(target: "Transport", "websocket stream ended");
                        break;
                    }
                }
            }
        });

        Ok((
            Arc::new(WebSocketTransport {
                sink: Mutex::new(Some(sink)),
            }),
            rx,
        ))
    }
}

pub mod mock {
    use super::*;

    /// In-memory transport: captures outbound frames and lets the test
    /// inject inbound chunks.
    pub struct MockTransport {
        pub sent: Mutex<Vec<Vec<u8>>>,
        pub closed: std::sync::atomic::AtomicBool,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                closed: std::sync::atomic::AtomicBool::new(false),
            }
        }

        pub async fn sent_frames(&self) -> Vec<Vec<u8>> {
            self.sent.lock().await.clone()
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, data: &[u8]) -> anyhow::Result<()> {
            if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("mock transport closed");
            }
            self.sent.lock().await.push(data.to_vec());
            Ok(())
        }

        async fn close(&self) {
            self.closed
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    pub struct MockTransportFactory {
        transport: Arc<MockTransport>,
        inbound: Mutex<Option<mpsc::Receiver<Bytes>>>,
        pub inbound_tx: mpsc::Sender<Bytes>,
    }

    impl MockTransportFactory {
        pub fn new() -> Self {
            let (tx, rx) = mpsc::channel(100);
            Self {
                transport: Arc::new(MockTransport::new()),
                inbound: Mutex::new(Some(rx)),
                inbound_tx: tx,
            }
        }

        pub fn transport(&self) -> Arc<MockTransport> {
            self.transport.clone()
        }
    }

    impl Default for MockTransportFactory {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn connect(
            &self,
            _url: &str,
        ) -> anyhow::Result<(Arc<dyn Transport>, mpsc::Receiver<Bytes>)> {
            let rx = self
                .inbound
                .lock()
                .await
                .take()
                .ok_or_else(|| anyhow::anyhow!("mock transport already connected"))?;
            Ok((self.transport.clone(), rx))
        }
    }
}
