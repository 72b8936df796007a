use crate::config::SocketConfig;
use crate::creds::Creds;
use crate::crypto::key_pair::KeyPair;
use crate::proto::{self, cert_chain::noise_certificate, CertChain, HandshakeMessage};
use crate::socket::consts::{NOISE_START_PATTERN, WA_CONN_HEADER};
use crate::socket::noise_handshake::NoiseHandshake;
use aes_gcm::Aes256Gcm;
use prost::Message;
use sha2::{Digest, Sha256};
use thiserror::Error;

const WA_CERT_ISSUER_SERIAL: u32 = 0;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("protobuf encoding error: {0}")]
    Proto(#[from] prost::EncodeError),
    #[error("protobuf decoding error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),
    #[error("handshake response is missing required parts")]
    IncompleteResponse,
    #[error("crypto operation failed: {0}")]
    Crypto(String),
    #[error("server certificate verification failed: {0}")]
    CertVerification(String),
    #[error("unexpected data length: expected {expected}, got {got} for {name}")]
    InvalidLength {
        name: &'static str,
        expected: usize,
        got: usize,
    },
}

pub type Result<T> = std::result::Result<T, HandshakeError>;

impl From<crate::socket::noise_handshake::NoiseError> for HandshakeError {
    fn from(e: crate::socket::noise_handshake::NoiseError) -> Self {
        HandshakeError::Crypto(e.to_string())
    }
}

/// Drives the three-message XX handshake from the client side.
pub struct HandshakeState {
    noise: NoiseHandshake,
    ephemeral_kp: KeyPair,
    static_kp: KeyPair,
    payload: Vec<u8>,
}

impl HandshakeState {
    pub fn new(creds: &Creds, config: &SocketConfig) -> Result<Self> {
        let ephemeral_kp = KeyPair::new();

        let mut noise = NoiseHandshake::new(NOISE_START_PATTERN, &WA_CONN_HEADER)?;
        noise.authenticate(&ephemeral_kp.public_key);

        Ok(Self {
            noise,
            ephemeral_kp,
            static_kp: creds.noise_key.clone(),
            payload: build_client_payload(creds, config).encode_to_vec(),
        })
    }

    pub fn build_client_hello(&self) -> Result<Vec<u8>> {
        let client_hello = HandshakeMessage {
            client_hello: Some(proto::handshake_message::ClientHello {
                ephemeral: Some(self.ephemeral_kp.public_key.to_vec()),
                r#static: None,
                payload: None,
            }),
            ..Default::default()
        };
        Ok(client_hello.encode_to_vec())
    }

    pub fn read_server_hello_and_build_client_finish(
        &mut self,
        response_bytes: &[u8],
    ) -> Result<Vec<u8>> {
        let (server_ephemeral_raw, server_static_ciphertext, certificate_ciphertext) =
            parse_server_hello(response_bytes)?;

        let server_ephemeral: [u8; 32] = server_ephemeral_raw
            .try_into()
            .map_err(|v: Vec<u8>| HandshakeError::InvalidLength {
                name: "server ephemeral key",
                expected: 32,
                got: v.len(),
            })?;

        self.noise.authenticate(&server_ephemeral);
        self.noise
            .mix_shared_secret(&self.ephemeral_kp, &server_ephemeral)?;

        let static_decrypted = self
            .noise
            .decrypt(&server_static_ciphertext)
            .map_err(|e| HandshakeError::Crypto(format!("failed to decrypt server static: {e}")))?;
        let server_static: [u8; 32] =
            static_decrypted
                .try_into()
                .map_err(|v: Vec<u8>| HandshakeError::InvalidLength {
                    name: "server static key",
                    expected: 32,
                    got: v.len(),
                })?;

        self.noise
            .mix_shared_secret(&self.ephemeral_kp, &server_static)?;

        let cert_decrypted = self
            .noise
            .decrypt(&certificate_ciphertext)
            .map_err(|e| HandshakeError::Crypto(format!("failed to decrypt certificate: {e}")))?;
        verify_server_cert(&cert_decrypted, &server_static)?;

        let encrypted_pubkey = self.noise.encrypt(&self.static_kp.public_key)?;
        self.noise
            .mix_shared_secret(&self.static_kp, &server_ephemeral)?;
        let encrypted_payload = self.noise.encrypt(&self.payload)?;

        let client_finish = HandshakeMessage {
            client_finish: Some(proto::handshake_message::ClientFinish {
                r#static: Some(encrypted_pubkey),
                payload: Some(encrypted_payload),
            }),
            ..Default::default()
        };
        Ok(client_finish.encode_to_vec())
    }

    /// Rotates to post-handshake transport keys.
    pub fn finish(self) -> Result<(Aes256Gcm, Aes256Gcm)> {
        Ok(self.noise.finish()?)
    }
}

fn parse_server_hello(response_bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let handshake_response = HandshakeMessage::decode(response_bytes)?;
    let server_hello = handshake_response
        .server_hello
        .ok_or(HandshakeError::IncompleteResponse)?;

    let ephemeral = server_hello
        .ephemeral
        .ok_or(HandshakeError::IncompleteResponse)?;
    let static_ciphertext = server_hello
        .r#static
        .ok_or(HandshakeError::IncompleteResponse)?;
    let certificate_ciphertext = server_hello
        .payload
        .ok_or(HandshakeError::IncompleteResponse)?;

    Ok((ephemeral, static_ciphertext, certificate_ciphertext))
}

/// Checks the decrypted certificate chain: issuer serials must chain from
/// the root serial, and the leaf key must match the server's static key.
fn verify_server_cert(cert_decrypted: &[u8], server_static: &[u8; 32]) -> Result<()> {
    let cert_chain = CertChain::decode(cert_decrypted)?;

    let intermediate = cert_chain
        .intermediate
        .ok_or_else(|| HandshakeError::CertVerification("missing intermediate cert".into()))?;
    let leaf = cert_chain
        .leaf
        .ok_or_else(|| HandshakeError::CertVerification("missing leaf cert".into()))?;

    let intermediate_details = noise_certificate::Details::decode(
        intermediate
            .details
            .as_deref()
            .ok_or_else(|| HandshakeError::CertVerification("missing intermediate details".into()))?,
    )?;

    if intermediate_details.issuer_serial() != WA_CERT_ISSUER_SERIAL {
        return Err(HandshakeError::CertVerification(format!(
            "unexpected intermediate issuer serial: got {}, expected {}",
            intermediate_details.issuer_serial(),
            WA_CERT_ISSUER_SERIAL
        )));
    }

    let leaf_details = noise_certificate::Details::decode(
        leaf.details
            .as_deref()
            .ok_or_else(|| HandshakeError::CertVerification("missing leaf details".into()))?,
    )?;

    if leaf_details.issuer_serial() != intermediate_details.serial() {
        return Err(HandshakeError::CertVerification(format!(
            "leaf issuer serial mismatch: got {}, expected {}",
            leaf_details.issuer_serial(),
            intermediate_details.serial()
        )));
    }

    if leaf_details.key() != server_static {
        return Err(HandshakeError::CertVerification(
            "cert key does not match decrypted static key".into(),
        ));
    }

    Ok(())
}

/// A login payload when credentials carry an identity, otherwise a
/// registration payload for pairing.
pub fn build_client_payload(creds: &Creds, config: &SocketConfig) -> proto::ClientPayload {
    let user_agent = proto::client_payload::UserAgent {
        platform: Some(proto::client_payload::user_agent::Platform::Web as i32),
        app_version: Some(proto::client_payload::user_agent::AppVersion {
            primary: Some(config.version.0),
            secondary: Some(config.version.1),
            tertiary: Some(config.version.2),
        }),
        os_version: Some(config.browser.2.clone()),
        manufacturer: Some(config.browser.1.clone()),
        device: Some(config.browser.0.clone()),
        release_channel: Some(proto::client_payload::user_agent::ReleaseChannel::Release as i32),
        ..Default::default()
    };

    match &creds.me {
        Some(me) => proto::ClientPayload {
            username: me.user.parse().ok(),
            device: Some(me.device as u32),
            passive: Some(false),
            pull: Some(true),
            user_agent: Some(user_agent),
            connect_type: Some(proto::client_payload::ConnectType::WifiUnknown as i32),
            connect_reason: Some(proto::client_payload::ConnectReason::UserActivated as i32),
            ..Default::default()
        },
        None => {
            let device_props = proto::DeviceProps {
                os: Some(config.browser.0.clone()),
                platform_type: Some(proto::device_props::PlatformType::Chrome as i32),
                require_full_sync: Some(config.sync_full_history),
            }
            .encode_to_vec();

            let version_hash: [u8; 32] = Sha256::digest(
                format!(
                    "{}.{}.{}",
                    config.version.0, config.version.1, config.version.2
                )
                .as_bytes(),
            )
            .into();

            let pairing_data = proto::client_payload::DevicePairingRegistrationData {
                e_regid: Some(creds.registration_id.to_be_bytes().to_vec()),
                e_keytype: Some(vec![5]),
                e_ident: Some(creds.signed_identity_key.public_key.to_vec()),
                e_skey_id: Some(creds.signed_pre_key.key_id.to_be_bytes()[1..].to_vec()),
                e_skey_val: Some(creds.signed_pre_key.key_pair.public_key.to_vec()),
                e_skey_sig: creds.signed_pre_key.signature.clone(),
                build_hash: Some(version_hash[..16].to_vec()),
                device_props: Some(device_props),
            };

            proto::ClientPayload {
                passive: Some(false),
                pull: Some(false),
                user_agent: Some(user_agent),
                device_pairing_data: Some(pairing_data),
                connect_type: Some(proto::client_payload::ConnectType::WifiUnknown as i32),
                connect_reason: Some(proto::client_payload::ConnectReason::UserActivated as i32),
                ..Default::default()
            }
        }
    }
}
