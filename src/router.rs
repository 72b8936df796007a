//! Pattern-dispatch of inbound stanzas.
//!
//! Reply correlation by message-tag happens before routing (see
//! [`crate::request`]). Everything else fires here: each registered
//! handler owns a [`Matcher`], and a frame is offered to handlers in
//! pattern-specificity order, coarse first.

use crate::binary::node::Node;
use crate::client::Client;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One route pattern: tag, optionally an attribute (with or without a
/// required value), optionally the first child's tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Matcher {
    pub tag: String,
    pub attr: Option<(String, Option<String>)>,
    pub first_child: Option<String>,
}

impl Matcher {
    pub fn tag(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attr: None,
            first_child: None,
        }
    }

    pub fn attr_present(tag: &str, key: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attr: Some((key.to_string(), None)),
            first_child: None,
        }
    }

    pub fn attr_equals(tag: &str, key: &str, value: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attr: Some((key.to_string(), Some(value.to_string()))),
            first_child: None,
        }
    }

    pub fn nested(tag: &str, key: &str, value: &str, first_child: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attr: Some((key.to_string(), Some(value.to_string()))),
            first_child: Some(first_child.to_string()),
        }
    }

    pub fn child(tag: &str, first_child: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attr: None,
            first_child: Some(first_child.to_string()),
        }
    }

    /// Canonical pattern key, also the registry key.
    pub fn key(&self) -> String {
        match (&self.attr, &self.first_child) {
            (None, None) => self.tag.clone(),
            (Some((k, None)), None) => format!("{},{}", self.tag, k),
            (Some((k, Some(v))), None) => format!("{},{}:{}", self.tag, k, v),
            (Some((k, Some(v))), Some(c)) => format!("{},{}:{},{}", self.tag, k, v, c),
            (None, Some(c)) => format!("{},,{}", self.tag, c),
            // Attribute presence with a child constraint has no wire
            // pattern; treat it as the presence form.
            (Some((k, None)), Some(_)) => format!("{},{}", self.tag, k),
        }
    }
}

/// The pattern keys a node matches, in emission order: coarse tag first,
/// then attribute presence, attribute equality, nested forms.
pub fn derive_keys(node: &Node) -> Vec<String> {
    let mut keys = Vec::with_capacity(2 + node.attrs.len() * 3);
    keys.push(node.tag.clone());

    let first_child_tag = node.first_child().map(|c| c.tag.as_str());

    for (attr_key, attr_value) in &node.attrs {
        keys.push(format!("{},{}", node.tag, attr_key));
        keys.push(format!("{},{}:{}", node.tag, attr_key, attr_value));
        if let Some(child) = first_child_tag {
            keys.push(format!(
                "{},{}:{},{}",
                node.tag, attr_key, attr_value, child
            ));
        }
    }
    if let Some(child) = first_child_tag {
        keys.push(format!("{},,{}", node.tag, child));
    }
    keys
}

#[async_trait]
pub trait StanzaHandler: Send + Sync {
    /// Returns whether the frame was consumed.
    async fn handle(&self, client: Arc<Client>, node: &Node) -> bool;
}

pub struct StanzaRouter {
    routes: HashMap<String, Vec<Arc<dyn StanzaHandler>>>,
}

impl StanzaRouter {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    pub fn register(&mut self, matcher: Matcher, handler: Arc<dyn StanzaHandler>) {
        self.routes.entry(matcher.key()).or_default().push(handler);
    }

    pub fn route_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    /// Offers the node to every matching handler in pattern order.
    /// Handlers run to completion sequentially on the connection task;
    /// returns whether any of them consumed the frame.
    pub async fn dispatch(&self, client: Arc<Client>, node: &Node) -> bool {
        let mut consumed = false;
        for key in derive_keys(node) {
            if let Some(handlers) = self.routes.get(&key) {
                for handler in handlers {
                    consumed |= handler.handle(client.clone(), node).await;
                }
            }
        }
        consumed
    }
}

impl Default for StanzaRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::builder::NodeBuilder;

    #[test]
    fn matcher_keys_match_pattern_grammar() {
        assert_eq!(Matcher::tag("iq").key(), "iq");
        assert_eq!(Matcher::attr_present("iq", "type").key(), "iq,type");
        assert_eq!(
            Matcher::attr_equals("iq", "type", "set").key(),
            "iq,type:set"
        );
        assert_eq!(
            Matcher::nested("iq", "type", "set", "pair-device").key(),
            "iq,type:set,pair-device"
        );
        assert_eq!(
            Matcher::child("notification", "device-list").key(),
            "notification,,device-list"
        );
    }

    #[test]
    fn derived_keys_are_ordered_coarse_to_specific() {
        let node = NodeBuilder::new("iq")
            .attr("type", "set")
            .children([NodeBuilder::new("pair-device").build()])
            .build();

        let keys = derive_keys(&node);
        assert_eq!(
            keys,
            vec![
                "iq",
                "iq,type",
                "iq,type:set",
                "iq,type:set,pair-device",
                "iq,,pair-device",
            ]
        );
    }

    #[test]
    fn derived_keys_without_children_skip_nested_forms() {
        let node = NodeBuilder::new("ack").attr("class", "message").build();
        let keys = derive_keys(&node);
        assert_eq!(keys, vec!["ack", "ack,class", "ack,class:message"]);
    }
}
