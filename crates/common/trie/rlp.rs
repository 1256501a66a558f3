//! RLP encoding and decoding for trie nodes.
//!
//! Nodes are encoded the way the yellow paper prescribes for hashing:
//!  - Leaf: `[compact(partial, leaf flag), value]`
//!  - Extension: `[compact(prefix), child]`
//!  - Branch: `[child_0, ..., child_15, value]`
//!
//! Child references are 32-byte strings for hashed children, or the child's
//! own encoding embedded in place for inlined children. The same encoding is
//! used when persisting nodes.

use bytes::BufMut;
use ethereum_types::H256;
use lattice_rlp::{
    decode::{decode_bytes, RLPDecode},
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};

use crate::nibbles::Nibbles;
use crate::node::{BranchNode, ExtensionNode, LeafNode, Node};
use crate::node_hash::NodeHash;

impl RLPEncode for BranchNode {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut encoder = Encoder::new(buf);
        for child in self.choices.iter() {
            encoder = encoder.encode_field(child);
        }
        encoder.encode_bytes(&self.value).finish();
    }
}

impl RLPEncode for ExtensionNode {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_bytes(&self.prefix.encode_compact())
            .encode_field(&self.child)
            .finish();
    }
}

impl RLPEncode for LeafNode {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_bytes(&self.partial.encode_compact())
            .encode_bytes(&self.value)
            .finish();
    }
}

impl RLPEncode for Node {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            Node::Branch(n) => n.encode(buf),
            Node::Extension(n) => n.encode(buf),
            Node::Leaf(n) => n.encode(buf),
        }
    }
}

impl RLPDecode for Node {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let mut items = Vec::new();
        let mut decoder = Decoder::new(rlp)?;
        while !decoder.is_done() {
            let (item, rest) = decoder.get_encoded_item()?;
            items.push(item);
            decoder = rest;
        }
        let remaining = decoder.finish()?;

        let node = match items.len() {
            17 => {
                let mut choices = Box::new(BranchNode::EMPTY_CHOICES);
                for (choice, child) in choices.iter_mut().zip(items.iter()) {
                    *choice = decode_child(child);
                }
                let (value, _) = decode_bytes(items[16])?;
                BranchNode::new_with_value(choices, value.to_vec()).into()
            }
            2 => {
                let (compact, _) = decode_bytes(items[0])?;
                let partial = Nibbles::decode_compact(compact);
                if partial.is_leaf() {
                    let (value, _) = decode_bytes(items[1])?;
                    LeafNode::new(partial, value.to_vec()).into()
                } else {
                    ExtensionNode::new(partial, decode_child(items[1])).into()
                }
            }
            n => {
                return Err(RLPDecodeError::Custom(format!(
                    "invalid node encoding, expected 2 or 17 items, got {n}"
                )))
            }
        };
        Ok((node, remaining))
    }
}

fn decode_child(rlp: &[u8]) -> NodeHash {
    match decode_bytes(rlp) {
        Ok((hash, &[])) if hash.len() == 32 => NodeHash::from(H256::from_slice(hash)),
        Ok(([], &[])) => NodeHash::EMPTY,
        // anything else is an inlined child, keep its full encoding
        _ => NodeHash::from_encoded_raw(rlp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_roundtrip() {
        let leaf = LeafNode::new(Nibbles::from_bytes(b"key"), b"value".to_vec());
        let encoded = Node::from(leaf.clone()).encode_to_vec();
        assert_eq!(Node::decode_raw(&encoded).unwrap(), leaf.into());
    }

    #[test]
    fn extension_roundtrip() {
        let child = NodeHash::from(H256::repeat_byte(0xab));
        let ext = ExtensionNode::new(Nibbles::from_hex(vec![1, 2, 3]), child);
        let encoded = Node::from(ext.clone()).encode_to_vec();
        assert_eq!(Node::decode_raw(&encoded).unwrap(), ext.into());
    }

    #[test]
    fn branch_roundtrip_keeps_empty_slots() {
        let mut choices = Box::new(BranchNode::EMPTY_CHOICES);
        choices[3] = NodeHash::from(H256::repeat_byte(0x33));
        choices[12] = NodeHash::from(H256::repeat_byte(0xcc));
        let branch = BranchNode::new(choices);
        let encoded = Node::from(branch.clone()).encode_to_vec();
        assert_eq!(Node::decode_raw(&encoded).unwrap(), branch.into());
    }

    #[test]
    fn branch_with_inline_child_roundtrip() {
        // a small leaf encodes to less than 32 bytes and stays inlined
        let small_leaf = Node::from(LeafNode::new(
            Nibbles::from_hex(vec![2, 16]),
            b"v".to_vec(),
        ));
        let inline = small_leaf.compute_hash();
        assert!(matches!(inline, NodeHash::Inline(_)));

        let mut choices = Box::new(BranchNode::EMPTY_CHOICES);
        choices[7] = inline;
        choices[9] = NodeHash::from(H256::repeat_byte(0x99));
        let branch = BranchNode::new(choices);
        let encoded = Node::from(branch.clone()).encode_to_vec();
        assert_eq!(Node::decode_raw(&encoded).unwrap(), branch.into());
    }
}
