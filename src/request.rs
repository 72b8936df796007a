use crate::binary::node::{Attrs, Node, NodeContent};
use crate::client::Client;
use crate::error::DisconnectReason;
use crate::types::jid::Jid;
use log::warn;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQueryType {
    Set,
    Get,
}

impl InfoQueryType {
    fn as_str(&self) -> &'static str {
        match self {
            InfoQueryType::Set => "set",
            InfoQueryType::Get => "get",
        }
    }
}

/// An IQ request awaiting its correlated reply.
#[derive(Debug, Clone)]
pub struct InfoQuery<'a> {
    pub namespace: &'a str,
    pub query_type: InfoQueryType,
    pub to: Jid,
    pub target: Option<Jid>,
    pub id: Option<String>,
    pub content: Option<NodeContent>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum IqError {
    #[error("request timed out")]
    Timeout,
    #[error("client is not connected")]
    NotConnected,
    #[error("connection closed while waiting: {0}")]
    Disconnected(DisconnectReason),
    #[error("server error response: code={code}, text='{text}'")]
    ServerError { code: u16, text: String },
    #[error("socket error: {0}")]
    Socket(String),
}

impl Client {
    /// Message-tag for request correlation: `<prefix>-<counter>`.
    pub fn generate_request_id(&self) -> String {
        let count = self
            .id_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("{}-{}", self.unique_id, count)
    }

    /// Chat message id in the uppercase-hex `3EB0…` form other devices
    /// expect for receipts, reactions and revokes.
    pub async fn generate_message_id(&self) -> String {
        let mut data = Vec::with_capacity(8 + 20 + 16);
        data.extend_from_slice(&(self.clock.now_unix() as u64).to_be_bytes());

        if let Some(me) = &self.creds_snapshot().await.me {
            data.extend_from_slice(me.user.as_bytes());
            data.extend_from_slice(b"@c.us");
        }

        let mut random_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        data.extend_from_slice(&random_bytes);

        let hash = Sha256::digest(&data);
        format!("3EB0{}", hex::encode(&hash[..9]).to_uppercase())
    }

    /// Sends an IQ and waits for the reply correlated by its id.
    pub async fn send_iq(&self, query: InfoQuery<'_>) -> Result<Node, IqError> {
        let req_id = query
            .id
            .clone()
            .unwrap_or_else(|| self.generate_request_id());
        let wait = query.timeout.unwrap_or(self.config.default_query_timeout);

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.response_waiters
            .lock()
            .await
            .insert(req_id.clone(), tx);

        let mut attrs = Attrs::new();
        attrs.insert("id".into(), req_id.clone());
        attrs.insert("xmlns".into(), query.namespace.into());
        attrs.insert("type".into(), query.query_type.as_str().into());
        attrs.insert("to".into(), query.to.to_string());
        if let Some(target) = query.target {
            if !target.is_empty() {
                attrs.insert("target".into(), target.to_string());
            }
        }

        let node = Node {
            tag: "iq".into(),
            attrs,
            content: query.content,
        };

        if let Err(e) = self.send_node(&node).await {
            self.response_waiters.lock().await.remove(&req_id);
            return Err(match e {
                crate::error::ClientError::Disconnected(_) => IqError::NotConnected,
                other => IqError::Socket(other.to_string()),
            });
        }

        match timeout(wait, rx).await {
            Ok(Ok(response_node)) => {
                if let Some(res_type) = response_node.attrs.get("type") {
                    if res_type == "error" {
                        return Err(parse_error_response(&response_node));
                    }
                }
                Ok(response_node)
            }
            // The waiter map was cleared on close; the sender dropped.
            Ok(Err(_)) => Err(IqError::Disconnected(DisconnectReason::ConnectionClosed)),
            Err(_) => {
                self.response_waiters.lock().await.remove(&req_id);
                Err(IqError::Timeout)
            }
        }
    }

    /// Resolves a pending query from an inbound frame. Returns whether a
    /// waiter consumed it.
    pub async fn handle_iq_response(&self, node: &Node) -> bool {
        let Some(id) = node.attrs.get("id").cloned() else {
            return false;
        };
        if let Some(waiter) = self.response_waiters.lock().await.remove(&id) {
            if waiter.send(node.clone()).is_err() {
                warn!(
                    target: "Client/IQ",
                    "response waiter for {id} dropped before delivery"
                );
            }
            true
        } else {
            false
        }
    }
}

fn parse_error_response(node: &Node) -> IqError {
    if let Some(error_node) = node.get_optional_child("error") {
        let mut parser = error_node.attrs();
        let code = parser.optional_u64("code").unwrap_or(0) as u16;
        let text = parser.optional_string("text").unwrap_or("").to_string();
        IqError::ServerError { code, text }
    } else {
        IqError::ServerError {
            code: 0,
            text: "malformed error response".to_string(),
        }
    }
}
