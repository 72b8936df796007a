//! Device pairing: QR reference rotation and the `pair-success` identity
//! binding.

use crate::binary::node::Node;
use crate::binary::NodeBuilder;
use crate::client::{Client, SessionState};
use crate::creds::Creds;
use crate::crypto::xed25519;
use crate::error::DisconnectReason;
use crate::proto::{AdvDeviceIdentity, AdvSignedDeviceIdentity, AdvSignedDeviceIdentityHmac};
use crate::types::events::{ConnectionUpdate, CredsUpdate, Event};
use crate::types::jid::Jid;
use base64::prelude::*;
use hmac::{Hmac, Mac};
use log::{debug, warn};
use prost::Message;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

const ADV_PREFIX_ACCOUNT_SIGNATURE: &[u8] = &[6, 0];
const ADV_PREFIX_DEVICE_SIGNATURE: &[u8] = &[6, 1];

/// Interval for every QR code after the first.
const QR_ROTATION_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug)]
pub struct PairCryptoError {
    pub code: u16,
    pub text: &'static str,
    pub source: anyhow::Error,
}

impl std::fmt::Display for PairCryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pairing crypto failed with code {}: {} ({})",
            self.code, self.text, self.source
        )
    }
}

impl std::error::Error for PairCryptoError {}

fn internal_error(source: anyhow::Error) -> PairCryptoError {
    PairCryptoError {
        code: 500,
        text: "internal-error",
        source,
    }
}

/// The QR payload: pairing ref plus the three local public values.
pub fn make_qr_data(creds: &Creds, ref_str: &str) -> String {
    let noise_b64 = BASE64_STANDARD.encode(creds.noise_key.public_key);
    let identity_b64 = BASE64_STANDARD.encode(creds.signed_identity_key.public_key);
    [
        ref_str,
        noise_b64.as_str(),
        identity_b64.as_str(),
        creds.adv_secret_key.as_str(),
    ]
    .join(",")
}

/// `iq type=set` with a `pair-device` child: ack, then rotate QR refs
/// until one is scanned or the list runs out.
pub async fn handle_pair_device(client: &Arc<Client>, node: &Node) -> bool {
    let Some(pair_device) = node.get_optional_child("pair-device") else {
        return false;
    };

    // Acknowledge the request before emitting any code.
    if let (Some(from), Some(id)) = (node.attrs.get("from"), node.attrs.get("id")) {
        let ack = NodeBuilder::new("iq")
            .attr("to", from.clone())
            .attr("id", id.clone())
            .attr("type", "result")
            .build();
        if let Err(e) = client.send_node(&ack).await {
            warn!(target: "Client/Pair", "failed to ack pair-device: {e:?}");
        }
    }

    let creds = client.creds_snapshot().await;
    let codes: Vec<String> = pair_device
        .get_children_by_tag("ref")
        .into_iter()
        .filter_map(|r| r.content_string().map(|s| s.into_owned()))
        .map(|r| make_qr_data(&creds, &r))
        .collect();

    if codes.is_empty() {
        warn!(target: "Client/Pair", "pair-device carried no refs");
        return true;
    }

    let rotation_client = client.clone();
    let first_timeout = client.config.qr_timeout;
    tokio::spawn(async move {
        let mut is_first = true;
        for code in codes {
            if rotation_client.state() != SessionState::Pairing {
                debug!(target: "Client/Pair", "pairing left, stopping QR rotation");
                return;
            }

            let timeout = if is_first {
                is_first = false;
                first_timeout
            } else {
                QR_ROTATION_INTERVAL
            };
            debug!(target: "Client/Pair", "emitting QR code, lifetime {}s", timeout.as_secs());
            rotation_client
                .events
                .emit(Event::ConnectionUpdate(ConnectionUpdate {
                    qr: Some(code),
                    ..Default::default()
                }));

            tokio::select! {
                _ = tokio::time::sleep(timeout) => {}
                _ = rotation_client.shutdown.notified() => return,
            }
        }

        if rotation_client.state() == SessionState::Pairing {
            warn!(target: "Client/Pair", "QR refs exhausted without a scan");
            rotation_client.end(DisconnectReason::TimedOut).await;
        }
    });

    true
}

/// `pair-success`: verify the signed device identity, bind it to our
/// keys, persist the new identity and reply with the counter-signature.
pub async fn handle_pair_success(client: &Arc<Client>, node: &Node) -> bool {
    let Some(pair_success) = node.get_optional_child("pair-success") else {
        return false;
    };
    let req_id = node.attrs.get("id").cloned().unwrap_or_default();

    let device_identity_bytes = pair_success
        .get_optional_child("device-identity")
        .and_then(|n| n.content_bytes())
        .map(|b| b.to_vec());
    let device_jid = pair_success
        .get_optional_child("device")
        .and_then(|n| n.attrs.get("jid").cloned())
        .and_then(|raw| raw.parse::<Jid>().ok());
    let platform = pair_success
        .get_optional_child("platform")
        .and_then(|n| n.attrs.get("name").cloned());

    let (Some(device_identity_bytes), Some(device_jid)) = (device_identity_bytes, device_jid)
    else {
        warn!(target: "Client/Pair", "pair-success missing device identity or jid");
        return true;
    };

    let creds = client.creds_snapshot().await;
    let (self_signed_identity, key_index) =
        match do_pair_crypto(&creds, &device_identity_bytes) {
            Ok(out) => out,
            Err(e) => {
                warn!(target: "Client/Pair", "{e}");
                let error_node = NodeBuilder::new("iq")
                    .attr("to", crate::types::jid::SERVER_JID)
                    .attr("type", "error")
                    .attr("id", req_id)
                    .children([NodeBuilder::new("error")
                        .attr("code", e.code.to_string())
                        .attr("text", e.text)
                        .build()])
                    .build();
                let _ = client.send_node(&error_node).await;
                return true;
            }
        };

    client
        .update_creds(CredsUpdate {
            me: Some(device_jid.normalized()),
            platform,
            account: Some(self_signed_identity.clone()),
            ..Default::default()
        })
        .await;

    let reply = NodeBuilder::new("iq")
        .attr("to", crate::types::jid::SERVER_JID)
        .attr("id", req_id)
        .attr("type", "result")
        .children([NodeBuilder::new("pair-device-sign")
            .children([NodeBuilder::new("device-identity")
                .attr("key-index", key_index.to_string())
                .bytes(self_signed_identity)
                .build()])
            .build()])
        .build();
    if let Err(e) = client.send_node(&reply).await {
        warn!(target: "Client/Pair", "failed to send pair-device-sign: {e:?}");
    }

    client.set_state(SessionState::LoggingIn);
    client
        .events
        .emit(Event::ConnectionUpdate(ConnectionUpdate {
            is_new_login: Some(true),
            qr: None,
            ..Default::default()
        }));

    // The server restarts the stream after a successful pair; the next
    // connect logs in with the new identity.
    true
}

/// Verifies the phone's signed device identity and produces our device
/// signature over it.
pub fn do_pair_crypto(
    creds: &Creds,
    device_identity_bytes: &[u8],
) -> Result<(Vec<u8>, u32), PairCryptoError> {
    let adv_secret = creds.adv_secret_bytes().map_err(internal_error)?;

    let hmac_container = AdvSignedDeviceIdentityHmac::decode(device_identity_bytes)
        .map_err(|e| internal_error(e.into()))?;
    let details_bytes = hmac_container
        .details
        .as_deref()
        .ok_or_else(|| internal_error(anyhow::anyhow!("HMAC container missing details")))?;
    let hmac_bytes = hmac_container
        .hmac
        .as_deref()
        .ok_or_else(|| internal_error(anyhow::anyhow!("HMAC container missing hmac")))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(&adv_secret).expect("HMAC accepts any key size");
    mac.update(details_bytes);
    if mac.verify_slice(hmac_bytes).is_err() {
        return Err(PairCryptoError {
            code: 401,
            text: "hmac-mismatch",
            source: anyhow::anyhow!("ADV HMAC mismatch"),
        });
    }

    let mut signed_identity =
        AdvSignedDeviceIdentity::decode(details_bytes).map_err(|e| internal_error(e.into()))?;
    let account_sig_key: [u8; 32] = signed_identity
        .account_signature_key()
        .try_into()
        .map_err(|_| internal_error(anyhow::anyhow!("invalid account signature key length")))?;
    let account_sig: [u8; 64] = signed_identity
        .account_signature()
        .try_into()
        .map_err(|_| internal_error(anyhow::anyhow!("invalid account signature length")))?;
    let inner_details = signed_identity.details().to_vec();

    let msg_to_verify = [
        ADV_PREFIX_ACCOUNT_SIGNATURE,
        &inner_details,
        &creds.signed_identity_key.public_key,
    ]
    .concat();
    if !xed25519::verify(&account_sig_key, &msg_to_verify, &account_sig) {
        return Err(PairCryptoError {
            code: 401,
            text: "signature-mismatch",
            source: anyhow::anyhow!("account signature mismatch"),
        });
    }

    let msg_to_sign = [
        ADV_PREFIX_DEVICE_SIGNATURE,
        &inner_details,
        &creds.signed_identity_key.public_key,
        &account_sig_key,
    ]
    .concat();
    let device_signature = creds.signed_identity_key.sign_message(&msg_to_sign);
    signed_identity.device_signature = Some(device_signature.to_bytes().to_vec());

    let identity_details =
        AdvDeviceIdentity::decode(inner_details.as_slice()).map_err(|e| internal_error(e.into()))?;

    Ok((signed_identity.encode_to_vec(), identity_details.key_index()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::KeyPair;

    fn build_signed_identity(creds: &Creds, phone_account: &KeyPair, key_index: u32) -> Vec<u8> {
        let details = AdvDeviceIdentity {
            raw_id: Some(1),
            timestamp: Some(1_700_000_000),
            key_index: Some(key_index),
        }
        .encode_to_vec();

        let msg = [
            ADV_PREFIX_ACCOUNT_SIGNATURE,
            &details,
            &creds.signed_identity_key.public_key,
        ]
        .concat();
        let account_signature = xed25519::sign(&phone_account.private_key, &msg);

        let signed = AdvSignedDeviceIdentity {
            details: Some(details),
            account_signature_key: Some(phone_account.public_key.to_vec()),
            account_signature: Some(account_signature.to_vec()),
            device_signature: None,
        }
        .encode_to_vec();

        let adv_secret = creds.adv_secret_bytes().unwrap();
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&adv_secret).expect("HMAC accepts any key size");
        mac.update(&signed);
        AdvSignedDeviceIdentityHmac {
            details: Some(signed),
            hmac: Some(mac.finalize().into_bytes().to_vec()),
        }
        .encode_to_vec()
    }

    #[test]
    fn qr_data_has_four_comma_separated_parts() {
        let creds = Creds::generate();
        let qr = make_qr_data(&creds, "some-ref");
        let parts: Vec<&str> = qr.split(',').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "some-ref");
        assert_eq!(BASE64_STANDARD.decode(parts[1]).unwrap().len(), 32);
        assert_eq!(BASE64_STANDARD.decode(parts[2]).unwrap().len(), 32);
    }

    #[test]
    fn pair_crypto_roundtrip_produces_device_signature() {
        let creds = Creds::generate();
        let phone_account = KeyPair::new();
        let container = build_signed_identity(&creds, &phone_account, 3);

        let (signed_bytes, key_index) = do_pair_crypto(&creds, &container).unwrap();
        assert_eq!(key_index, 3);

        let reparsed = AdvSignedDeviceIdentity::decode(signed_bytes.as_slice()).unwrap();
        let device_sig: [u8; 64] = reparsed.device_signature().try_into().unwrap();
        let msg = [
            ADV_PREFIX_DEVICE_SIGNATURE,
            reparsed.details(),
            &creds.signed_identity_key.public_key,
            &phone_account.public_key,
        ]
        .concat();
        assert!(xed25519::verify(
            &creds.signed_identity_key.public_key,
            &msg,
            &device_sig
        ));
    }

    #[test]
    fn pair_crypto_rejects_tampered_hmac() {
        let creds = Creds::generate();
        let phone_account = KeyPair::new();
        let mut container = build_signed_identity(&creds, &phone_account, 0);
        let len = container.len();
        container[len - 1] ^= 0xFF;

        let err = do_pair_crypto(&creds, &container).unwrap_err();
        assert_eq!(err.code, 401);
        assert_eq!(err.text, "hmac-mismatch");
    }

    #[test]
    fn pair_crypto_rejects_wrong_identity_key() {
        let creds = Creds::generate();
        let other_creds = Creds::generate();
        let phone_account = KeyPair::new();
        // Signed against a different companion identity key.
        let container = build_signed_identity(&other_creds, &phone_account, 0);

        // Re-MAC with our secret so only the signature check fails.
        let hmac_container = AdvSignedDeviceIdentityHmac::decode(container.as_slice()).unwrap();
        let details = hmac_container.details.unwrap();
        let adv_secret = creds.adv_secret_bytes().unwrap();
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&adv_secret).expect("HMAC accepts any key size");
        mac.update(&details);
        let remac = AdvSignedDeviceIdentityHmac {
            details: Some(details),
            hmac: Some(mac.finalize().into_bytes().to_vec()),
        }
        .encode_to_vec();

        let err = do_pair_crypto(&creds, &remac).unwrap_err();
        assert_eq!(err.text, "signature-mismatch");
    }
}
