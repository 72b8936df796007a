use crate::binary::decoder::Decoder;
use crate::binary::encoder::Encoder;
use crate::binary::error::{BinaryError, Result};
use crate::binary::node::Node;
use std::io::Read;

/// Frame payload flag bits. Bit 1 marks a zlib-deflated node.
const FLAG_COMPRESSED: u8 = 0x02;

/// Serializes a node, prefixed with the flag byte. Outbound frames are
/// never compressed.
///
/// Free-text content should be carried as `NodeContent::Bytes`;
/// `NodeContent::String` is reserved for values that tokenize or pack,
/// and survives a round-trip only in that case.
pub fn marshal(node: &Node) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(256);
    let mut encoder = Encoder::new(&mut buf)?;
    encoder.write_node(node)?;
    Ok(buf)
}

/// Parses a flag-prefixed frame payload into a node, inflating when the
/// server sent it compressed.
pub fn unmarshal(data: &[u8]) -> Result<Node> {
    let (flag, payload) = data.split_first().ok_or(BinaryError::Eof)?;

    if flag & FLAG_COMPRESSED != 0 {
        let mut inflated = Vec::with_capacity(payload.len() * 4);
        flate2::read::ZlibDecoder::new(payload)
            .read_to_end(&mut inflated)
            .map_err(|e| BinaryError::Inflate(e.to_string()))?;
        decode_node(&inflated)
    } else {
        decode_node(payload)
    }
}

fn decode_node(payload: &[u8]) -> Result<Node> {
    let mut decoder = Decoder::new(payload);
    let node = decoder.read_node()?;
    if !decoder.is_finished() {
        log::debug!(target: "Binary", "trailing bytes after node decode");
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::builder::NodeBuilder;
    use crate::binary::node::{Attrs, Node};

    fn roundtrip(node: Node) {
        let encoded = marshal(&node).unwrap();
        let decoded = unmarshal(&encoded).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn roundtrip_plain_node() {
        roundtrip(Node::new("message", Attrs::new(), None));
    }

    #[test]
    fn roundtrip_attrs_and_bytes() {
        roundtrip(
            NodeBuilder::new("iq")
                .attr("id", "17.24-1")
                .attr("type", "result")
                .attr("from", "s.whatsapp.net")
                .bytes(vec![0u8, 1, 2, 3, 255])
                .build(),
        );
    }

    #[test]
    fn roundtrip_jid_attrs() {
        roundtrip(
            NodeBuilder::new("receipt")
                .attr("to", "1234567890@s.whatsapp.net")
                .attr("participant", "1234567890:12@s.whatsapp.net")
                .build(),
        );
    }

    #[test]
    fn roundtrip_nested_children() {
        let child = NodeBuilder::new("user")
            .attr("jid", "111@s.whatsapp.net")
            .build();
        roundtrip(
            NodeBuilder::new("usync")
                .attr("mode", "query")
                .children([
                    NodeBuilder::new("list").children([child]).build(),
                    NodeBuilder::new("query").build(),
                ])
                .build(),
        );
    }

    #[test]
    fn roundtrip_tokenized_string_content() {
        roundtrip(
            NodeBuilder::new("ping")
                .string_content("receipt")
                .build(),
        );
    }

    #[test]
    fn unmarshal_rejects_empty_input() {
        assert!(unmarshal(&[]).is_err());
    }

    #[test]
    fn unmarshal_inflates_compressed_frames() {
        use std::io::Write;
        let node = NodeBuilder::new("message")
            .attr("id", "ABCDEF")
            .bytes(vec![7u8; 64])
            .build();
        let plain = marshal(&node).unwrap();

        let mut enc =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&plain[1..]).unwrap();
        let mut compressed = vec![0x02];
        compressed.extend_from_slice(&enc.finish().unwrap());

        assert_eq!(unmarshal(&compressed).unwrap(), node);
    }
}
