use crate::error::TrieError;
use crate::nibbles::Nibbles;
use crate::state::TrieState;
use crate::ValueRLP;

use super::{BranchNode, Node};

/// Leaf node of an MPT: the unshared tail of a path (including the leaf flag)
/// and the stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    pub partial: Nibbles,
    pub value: ValueRLP,
}

impl LeafNode {
    pub fn new(partial: Nibbles, value: ValueRLP) -> Self {
        Self { partial, value }
    }

    pub fn get(&self, _state: &TrieState, path: Nibbles) -> Result<Option<ValueRLP>, TrieError> {
        Ok((self.partial == path).then(|| self.value.clone()))
    }

    pub fn insert(
        mut self,
        state: &mut TrieState,
        path: Nibbles,
        value: ValueRLP,
    ) -> Result<Node, TrieError> {
        if self.partial == path {
            self.value = value;
            return Ok(self.into());
        }

        // paths diverge, split into a branch holding both values; a path
        // running out shows up as the leaf terminator nibble at the
        // divergence point, never as an exhausted length
        let match_index = path.count_prefix(&self.partial);
        let branch_node = if path.at(match_index) == 16 {
            // the new path ends at the divergence, its value goes into the branch
            let choice = self.partial.at(match_index);
            self.partial = self.partial.offset(match_index + 1);
            let mut choices = Box::new(BranchNode::EMPTY_CHOICES);
            choices[choice] = Node::from(self).insert_self(state)?;
            BranchNode::new_with_value(choices, value)
        } else if self.partial.at(match_index) == 16 {
            // the existing path ends at the divergence, its value goes into the branch
            let choice = path.at(match_index);
            let new_leaf = LeafNode::new(path.offset(match_index + 1), value);
            let mut choices = Box::new(BranchNode::EMPTY_CHOICES);
            choices[choice] = Node::from(new_leaf).insert_self(state)?;
            BranchNode::new_with_value(choices, self.value)
        } else {
            let self_choice = self.partial.at(match_index);
            let new_choice = path.at(match_index);
            self.partial = self.partial.offset(match_index + 1);
            let new_leaf = LeafNode::new(path.offset(match_index + 1), value);
            let mut choices = Box::new(BranchNode::EMPTY_CHOICES);
            choices[self_choice] = Node::from(self).insert_self(state)?;
            choices[new_choice] = Node::from(new_leaf).insert_self(state)?;
            BranchNode::new(choices)
        };

        let branch_node: Node = branch_node.into();
        if match_index == 0 {
            Ok(branch_node)
        } else {
            // the shared prefix becomes an extension on top of the branch
            let branch_hash = branch_node.insert_self(state)?;
            Ok(super::ExtensionNode::new(path.slice(0, match_index), branch_hash).into())
        }
    }

    pub fn remove(
        self,
        _state: &mut TrieState,
        path: Nibbles,
    ) -> Result<(Option<Node>, Option<ValueRLP>), TrieError> {
        Ok(if self.partial == path {
            (None, Some(self.value))
        } else {
            (Some(self.into()), None)
        })
    }
}
