use crate::socket::consts::{FRAME_LENGTH_SIZE, FRAME_MAX_SIZE, WA_CONN_HEADER};
use crate::socket::error::{Result, SocketError};
use crate::transport::Transport;
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace, warn};
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;

/// Length-prefixed frame layer over a raw carrier. The connection magic
/// is prepended to the first outbound frame only.
pub struct FrameSocket {
    transport: Arc<dyn Transport>,
    header: Mutex<Option<Vec<u8>>>,
}

impl FrameSocket {
    /// Wraps a connected transport. Returns the socket and a channel of
    /// reassembled frames; the channel closes when the carrier drops.
    pub fn new(
        transport: Arc<dyn Transport>,
        raw_rx: Receiver<Bytes>,
    ) -> (Arc<Self>, Receiver<Bytes>) {
        let (frames_tx, frames_rx) = mpsc::channel(100);

        tokio::spawn(Self::read_pump(raw_rx, frames_tx));

        (
            Arc::new(Self {
                transport,
                header: Mutex::new(Some(WA_CONN_HEADER.to_vec())),
            }),
            frames_rx,
        )
    }

    pub async fn send_frame(&self, data: &[u8]) -> Result<()> {
        let data_len = data.len();
        if data_len >= FRAME_MAX_SIZE {
            return Err(SocketError::FrameTooLarge {
                max: FRAME_MAX_SIZE,
                got: data_len,
            });
        }

        let mut frame_header = self.header.lock().await.take().unwrap_or_default();
        let mut whole_frame =
            Vec::with_capacity(frame_header.len() + FRAME_LENGTH_SIZE + data_len);
        whole_frame.append(&mut frame_header);
        whole_frame.extend_from_slice(&u32::to_be_bytes(data_len as u32)[1..]);
        whole_frame.extend_from_slice(data);

        debug!(
            target: "Socket",
            "--> frame: payload {data_len} bytes, total {} bytes",
            whole_frame.len()
        );
        self.transport
            .send(&whole_frame)
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    async fn read_pump(mut raw_rx: Receiver<Bytes>, frames_tx: Sender<Bytes>) {
        let mut buffer = BytesMut::new();

        while let Some(chunk) = raw_rx.recv().await {
            buffer.extend_from_slice(&chunk);

            while buffer.len() >= FRAME_LENGTH_SIZE {
                let frame_len = ((buffer[0] as usize) << 16)
                    | ((buffer[1] as usize) << 8)
                    | (buffer[2] as usize);

                if buffer.len() < FRAME_LENGTH_SIZE + frame_len {
                    break;
                }
                buffer.advance(FRAME_LENGTH_SIZE);
                let frame_data = buffer.split_to(frame_len).freeze();
                trace!(target: "Socket", "<-- frame: {} bytes", frame_data.len());
                if frames_tx.send(frame_data).await.is_err() {
                    warn!(target: "Socket", "frame receiver dropped, closing read pump");
                    return;
                }
            }
        }
        trace!(target: "Socket", "carrier closed, read pump exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransportFactory;
    use crate::transport::TransportFactory;

    #[tokio::test]
    async fn first_frame_carries_connection_header() {
        let factory = MockTransportFactory::new();
        let mock = factory.transport();
        let (transport, raw_rx) = factory.connect("ws://test").await.unwrap();
        let (socket, _frames) = FrameSocket::new(transport, raw_rx);

        socket.send_frame(b"abc").await.unwrap();
        socket.send_frame(b"defg").await.unwrap();

        let sent = mock.sent_frames().await;
        assert_eq!(&sent[0][..4], &WA_CONN_HEADER);
        assert_eq!(&sent[0][4..7], &[0, 0, 3]);
        assert_eq!(&sent[0][7..], b"abc");
        // Header must not repeat.
        assert_eq!(&sent[1][..3], &[0, 0, 4]);
        assert_eq!(&sent[1][3..], b"defg");
    }

    #[tokio::test]
    async fn reassembles_frames_split_across_chunks() {
        let factory = MockTransportFactory::new();
        let inbound = factory.inbound_tx.clone();
        let (transport, raw_rx) = factory.connect("ws://test").await.unwrap();
        let (_socket, mut frames) = FrameSocket::new(transport, raw_rx);

        // One frame delivered in three chunks, then two frames in one chunk.
        inbound.send(Bytes::from_static(&[0, 0])).await.unwrap();
        inbound.send(Bytes::from_static(&[4, 1, 2])).await.unwrap();
        inbound.send(Bytes::from_static(&[3, 4])).await.unwrap();
        inbound
            .send(Bytes::from_static(&[0, 0, 1, 9, 0, 0, 1, 8]))
            .await
            .unwrap();

        assert_eq!(frames.recv().await.unwrap().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(frames.recv().await.unwrap().as_ref(), &[9]);
        assert_eq!(frames.recv().await.unwrap().as_ref(), &[8]);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let factory = MockTransportFactory::new();
        let (transport, raw_rx) = factory.connect("ws://test").await.unwrap();
        let (socket, _frames) = FrameSocket::new(transport, raw_rx);

        let huge = vec![0u8; FRAME_MAX_SIZE];
        assert!(matches!(
            socket.send_frame(&huge).await,
            Err(SocketError::FrameTooLarge { .. })
        ));
    }
}
