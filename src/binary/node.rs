use indexmap::IndexMap;

/// Attribute map. Insertion order is preserved because attribute order is
/// significant on the wire.
pub type Attrs = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Bytes(Vec<u8>),
    String(String),
    Nodes(Vec<Node>),
}

/// One tagged tree node of the binary stanza format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: Option<NodeContent>,
}

impl Node {
    pub fn new(tag: &str, attrs: Attrs, content: Option<NodeContent>) -> Self {
        Self {
            tag: tag.to_string(),
            attrs,
            content,
        }
    }

    pub fn children(&self) -> Option<&[Node]> {
        match &self.content {
            Some(NodeContent::Nodes(nodes)) => Some(nodes),
            _ => None,
        }
    }

    pub fn first_child(&self) -> Option<&Node> {
        self.children().and_then(|c| c.first())
    }

    pub fn attrs(&self) -> crate::binary::attrs::AttrParser<'_> {
        crate::binary::attrs::AttrParser::new(self)
    }

    /// Finds the first direct child with the given tag.
    pub fn get_optional_child(&self, tag: &str) -> Option<&Node> {
        self.children()
            .and_then(|nodes| nodes.iter().find(|node| node.tag == tag))
    }

    /// Walks a path of nested child tags.
    pub fn get_optional_child_by_tag<'a>(&'a self, tags: &[&str]) -> Option<&'a Node> {
        let mut current_node = self;
        for &tag in tags {
            current_node = current_node.get_optional_child(tag)?;
        }
        Some(current_node)
    }

    /// All direct children with the given tag.
    pub fn get_children_by_tag(&self, tag: &str) -> Vec<&Node> {
        match self.children() {
            Some(children) => children.iter().filter(|c| c.tag == tag).collect(),
            None => Vec::new(),
        }
    }

    pub fn content_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Some(NodeContent::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn content_string(&self) -> Option<std::borrow::Cow<'_, str>> {
        match &self.content {
            Some(NodeContent::String(s)) => Some(std::borrow::Cow::Borrowed(s)),
            Some(NodeContent::Bytes(b)) => std::str::from_utf8(b).ok().map(Into::into),
            _ => None,
        }
    }
}

impl std::fmt::Display for Node {
    /// XML-ish rendering for logs only; never sent on the wire.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}", self.tag)?;
        for (k, v) in &self.attrs {
            write!(f, " {k}=\"{v}\"")?;
        }
        match &self.content {
            None => write!(f, "/>"),
            Some(NodeContent::String(s)) => write!(f, ">{s}</{}>", self.tag),
            Some(NodeContent::Bytes(b)) => write!(f, "><!-- {} bytes --></{}>", b.len(), self.tag),
            Some(NodeContent::Nodes(nodes)) => {
                write!(f, ">")?;
                for node in nodes {
                    write!(f, "{node}")?;
                }
                write!(f, "</{}>", self.tag)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_lookup() {
        let node = Node {
            tag: "iq".into(),
            attrs: Attrs::new(),
            content: Some(NodeContent::Nodes(vec![
                Node {
                    tag: "list".into(),
                    attrs: Attrs::new(),
                    content: Some(NodeContent::Nodes(vec![Node {
                        tag: "user".into(),
                        ..Default::default()
                    }])),
                },
                Node {
                    tag: "count".into(),
                    ..Default::default()
                },
            ])),
        };

        assert!(node.get_optional_child("count").is_some());
        assert!(node.get_optional_child_by_tag(&["list", "user"]).is_some());
        assert!(node.get_optional_child_by_tag(&["list", "missing"]).is_none());
        assert_eq!(node.first_child().unwrap().tag, "list");
    }
}
