use crate::error::TrieError;
use crate::nibbles::Nibbles;
use crate::node_hash::NodeHash;
use crate::state::TrieState;
use crate::ValueRLP;

use super::{BranchNode, LeafNode, Node};

/// Extension node of an MPT: a shared nibble prefix followed by a reference to
/// the next node (always a branch in a canonical trie).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionNode {
    pub prefix: Nibbles,
    pub child: NodeHash,
}

impl ExtensionNode {
    pub fn new(prefix: Nibbles, child: NodeHash) -> Self {
        Self { prefix, child }
    }

    pub fn get(&self, state: &TrieState, mut path: Nibbles) -> Result<Option<ValueRLP>, TrieError> {
        if path.skip_prefix(&self.prefix) {
            let child_node = state
                .get_node(self.child, &path)?
                .ok_or(TrieError::InconsistentTree)?;
            child_node.get(state, path)
        } else {
            Ok(None)
        }
    }

    pub fn insert(
        mut self,
        state: &mut TrieState,
        mut path: Nibbles,
        value: ValueRLP,
    ) -> Result<Node, TrieError> {
        if path.skip_prefix(&self.prefix) {
            let child_node = state
                .get_node(self.child, &path)?
                .ok_or(TrieError::InconsistentTree)?;
            let child_node = child_node.insert(state, path, value)?;
            self.child = child_node.insert_self(state)?;
            Ok(self.into())
        } else {
            // paths diverge inside the prefix, split the extension around a
            // new branch at the divergence point
            let match_index = path.count_prefix(&self.prefix);
            let choice = self.prefix.at(match_index);
            let remaining_prefix = self.prefix.offset(match_index + 1);

            let branch_child = if remaining_prefix.is_empty() {
                self.child
            } else {
                Node::from(ExtensionNode::new(remaining_prefix, self.child)).insert_self(state)?
            };
            let mut choices = Box::new(BranchNode::EMPTY_CHOICES);
            choices[choice] = branch_child;
            let branch_node = BranchNode::new(choices).insert(state, path.offset(match_index), value)?;

            if match_index == 0 {
                Ok(branch_node)
            } else {
                let branch_hash = branch_node.insert_self(state)?;
                Ok(ExtensionNode::new(self.prefix.slice(0, match_index), branch_hash).into())
            }
        }
    }

    pub fn remove(
        mut self,
        state: &mut TrieState,
        mut path: Nibbles,
    ) -> Result<(Option<Node>, Option<ValueRLP>), TrieError> {
        if !path.skip_prefix(&self.prefix) {
            return Ok((Some(self.into()), None));
        }
        let child_node = state
            .get_node(self.child, &path)?
            .ok_or(TrieError::InconsistentTree)?;
        let (child_node, old_value) = child_node.remove(state, path)?;

        // an extension can only point at a branch, anything smaller gets
        // merged into this node
        let node = match child_node {
            Some(node @ Node::Branch(_)) => {
                self.child = node.insert_self(state)?;
                Some(self.into())
            }
            Some(Node::Extension(inner)) => {
                self.prefix.extend(&inner.prefix);
                self.child = inner.child;
                Some(self.into())
            }
            Some(Node::Leaf(mut leaf)) => {
                let mut partial = self.prefix;
                partial.extend(&leaf.partial);
                leaf.partial = partial;
                Some(leaf.into())
            }
            None => None,
        };
        Ok((node, old_value))
    }
}
