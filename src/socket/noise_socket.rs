use crate::binary::node::Node;
use crate::socket::error::{Result, SocketError};
use crate::socket::frame_socket::FrameSocket;
use crate::socket::noise_handshake::generate_iv;
use aes_gcm::aead::Aead;
use aes_gcm::Aes256Gcm;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Post-handshake AEAD layer. Each direction has its own key and a
/// strictly increasing counter starting at zero.
pub struct NoiseSocket {
    frame_socket: Arc<FrameSocket>,
    write_key: Aes256Gcm,
    read_key: Aes256Gcm,
    write_counter: AtomicU32,
    read_counter: AtomicU32,
}

impl NoiseSocket {
    pub fn new(frame_socket: Arc<FrameSocket>, write_key: Aes256Gcm, read_key: Aes256Gcm) -> Self {
        Self {
            frame_socket,
            write_key,
            read_key,
            write_counter: AtomicU32::new(0),
            read_counter: AtomicU32::new(0),
        }
    }

    pub fn encrypt_frame(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let counter = self.write_counter.fetch_add(1, Ordering::SeqCst);
        let iv = generate_iv(counter);
        self.write_key
            .encrypt(iv.as_ref().into(), plaintext)
            .map_err(|e| SocketError::Crypto(e.to_string()))
    }

    pub fn decrypt_frame(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let counter = self.read_counter.fetch_add(1, Ordering::SeqCst);
        let iv = generate_iv(counter);
        self.read_key
            .decrypt(iv.as_ref().into(), ciphertext)
            .map_err(|e| SocketError::Crypto(e.to_string()))
    }

    /// Marshals, encrypts and sends one stanza.
    pub async fn send_node(&self, node: &Node) -> Result<()> {
        log::trace!(target: "Socket", "--> {node}");
        let plaintext = crate::binary::marshal(node)
            .map_err(|e| SocketError::Crypto(e.to_string()))?;
        let ciphertext = self.encrypt_frame(&plaintext)?;
        self.frame_socket.send_frame(&ciphertext).await
    }

    pub async fn close(&self) {
        self.frame_socket.close().await;
    }
}
