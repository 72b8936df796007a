//! Contact/device discovery over the `usync` IQ subprotocol, fronted by
//! a per-user TTL cache.

use crate::binary::node::{Node, NodeContent};
use crate::binary::NodeBuilder;
use crate::client::Client;
use crate::request::{InfoQuery, InfoQueryType};
use crate::types::jid::Jid;
use anyhow::Context;
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cached device lists keyed by user. Entries expire after the TTL and
/// are dropped eagerly when a `device-list` notification arrives.
pub struct DeviceCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Vec<Jid>)>>,
}

impl DeviceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, user: &str, now: Instant) -> Option<Vec<Jid>> {
        let entries = self.entries.lock().unwrap();
        let (inserted, devices) = entries.get(user)?;
        if now.saturating_duration_since(*inserted) > self.ttl {
            return None;
        }
        Some(devices.clone())
    }

    pub fn insert(&self, user: &str, devices: Vec<Jid>, now: Instant) {
        self.entries
            .lock()
            .unwrap()
            .insert(user.to_string(), (now, devices));
    }

    pub fn invalidate(&self, user: &str) {
        self.entries.lock().unwrap().remove(user);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl Client {
    /// Resolves every device of the given users, round-tripping USync
    /// only for cache misses.
    pub async fn get_user_devices(
        self: &std::sync::Arc<Self>,
        jids: &[Jid],
    ) -> anyhow::Result<Vec<Jid>> {
        let now = self.clock.now_instant();
        let mut devices = Vec::new();
        let mut misses: Vec<Jid> = Vec::new();

        for jid in jids {
            let base = jid.to_non_ad().normalized();
            match self.device_cache.get(&base.user, now) {
                Some(cached) => devices.extend(cached),
                None => misses.push(base),
            }
        }

        if !misses.is_empty() {
            debug!(target: "Client/USync", "querying devices for {} users", misses.len());
            let resolved = self.usync_query_devices(&misses).await?;
            for (user, user_devices) in resolved {
                self.device_cache.insert(&user, user_devices.clone(), now);
                devices.extend(user_devices);
            }
        }

        Ok(devices)
    }

    async fn usync_query_devices(
        self: &std::sync::Arc<Self>,
        jids: &[Jid],
    ) -> anyhow::Result<HashMap<String, Vec<Jid>>> {
        let user_nodes: Vec<Node> = jids
            .iter()
            .map(|jid| NodeBuilder::new("user").attr("jid", jid.to_string()).build())
            .collect();

        let usync_node = NodeBuilder::new("usync")
            .attr("sid", self.generate_request_id())
            .attr("mode", "query")
            .attr("context", "message")
            .attr("index", "0")
            .attr("last", "true")
            .children([
                NodeBuilder::new("query")
                    .children([NodeBuilder::new("devices").attr("version", "2").build()])
                    .build(),
                NodeBuilder::new("list").children(user_nodes).build(),
            ])
            .build();

        let resp = self
            .send_iq(InfoQuery {
                namespace: "usync",
                query_type: InfoQueryType::Get,
                to: Jid::server_jid(),
                target: None,
                id: None,
                content: Some(NodeContent::Nodes(vec![usync_node])),
                timeout: None,
            })
            .await
            .context("usync query failed")?;

        Ok(parse_usync_device_response(&resp))
    }
}

/// Extracts per-user device JIDs from a USync response. Device zero is
/// always accepted; other devices require a `key-index`.
pub fn parse_usync_device_response(resp: &Node) -> HashMap<String, Vec<Jid>> {
    let mut out = HashMap::new();

    let Some(list) = resp.get_optional_child_by_tag(&["usync", "list"]) else {
        return out;
    };

    for user_node in list.get_children_by_tag("user") {
        let mut attrs = user_node.attrs();
        let user_jid = attrs.non_ad_jid("jid");
        if user_jid.user.is_empty() {
            continue;
        }

        let mut user_devices = Vec::new();
        if let Some(device_list) =
            user_node.get_optional_child_by_tag(&["devices", "device-list"])
        {
            for device_node in device_list.get_children_by_tag("device") {
                let mut device_attrs = device_node.attrs();
                let Some(id) = device_attrs.optional_u64("id") else {
                    continue;
                };
                let has_key_index = device_attrs.optional_string("key-index").is_some();
                if id != 0 && !has_key_index {
                    continue;
                }
                user_devices.push(user_jid.with_device(id as u16));
            }
        }

        out.insert(user_jid.user.clone(), user_devices);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: u32, key_index: Option<u32>) -> Node {
        let mut builder = NodeBuilder::new("device").attr("id", id.to_string());
        if let Some(ki) = key_index {
            builder = builder.attr("key-index", ki.to_string());
        }
        builder.build()
    }

    fn usync_response(users: Vec<Node>) -> Node {
        NodeBuilder::new("iq")
            .children([NodeBuilder::new("usync")
                .children([NodeBuilder::new("list").children(users).build()])
                .build()])
            .build()
    }

    #[test]
    fn devices_without_key_index_are_rejected_except_primary() {
        let user = NodeBuilder::new("user")
            .attr("jid", "111@s.whatsapp.net")
            .children([NodeBuilder::new("devices")
                .children([NodeBuilder::new("device-list")
                    .children([device(0, None), device(1, Some(1)), device(2, None)])
                    .build()])
                .build()])
            .build();

        let parsed = parse_usync_device_response(&usync_response(vec![user]));
        let devices = &parsed["111"];
        let ids: Vec<u16> = devices.iter().map(|d| d.device).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn cache_expires_after_ttl() {
        let cache = DeviceCache::new(Duration::from_secs(300));
        let now = Instant::now();
        let jid: Jid = "1@s.whatsapp.net".parse().unwrap();
        cache.insert("1", vec![jid.clone()], now);

        assert_eq!(cache.get("1", now).unwrap().len(), 1);
        assert_eq!(
            cache.get("1", now + Duration::from_secs(299)).unwrap().len(),
            1
        );
        assert!(cache.get("1", now + Duration::from_secs(301)).is_none());

        cache.insert("1", vec![jid], now);
        cache.invalidate("1");
        assert!(cache.get("1", now).is_none());
    }
}
