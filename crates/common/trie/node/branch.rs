use crate::error::TrieError;
use crate::nibbles::Nibbles;
use crate::node_hash::NodeHash;
use crate::state::TrieState;
use crate::ValueRLP;

use super::{ExtensionNode, LeafNode, Node};

/// Branch node of an MPT: sixteen child slots (one per nibble) plus an
/// optional value for paths ending at this node.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchNode {
    pub choices: Box<[NodeHash; 16]>,
    pub value: ValueRLP,
}

impl BranchNode {
    pub const EMPTY_CHOICES: [NodeHash; 16] = [NodeHash::EMPTY; 16];

    pub fn new(choices: Box<[NodeHash; 16]>) -> Self {
        Self {
            choices,
            value: Default::default(),
        }
    }

    pub fn new_with_value(choices: Box<[NodeHash; 16]>, value: ValueRLP) -> Self {
        Self { choices, value }
    }

    pub fn get(&self, state: &TrieState, mut path: Nibbles) -> Result<Option<ValueRLP>, TrieError> {
        if let Some(choice) = path.next_choice() {
            let child_hash = self.choices[choice];
            if child_hash.is_valid() {
                let child_node = state
                    .get_node(child_hash, &path)?
                    .ok_or(TrieError::InconsistentTree)?;
                child_node.get(state, path)
            } else {
                Ok(None)
            }
        } else {
            Ok((!self.value.is_empty()).then(|| self.value.clone()))
        }
    }

    pub fn insert(
        mut self,
        state: &mut TrieState,
        mut path: Nibbles,
        value: ValueRLP,
    ) -> Result<Node, TrieError> {
        match path.next_choice() {
            Some(choice) if self.choices[choice].is_valid() => {
                let child_node = state
                    .get_node(self.choices[choice], &path)?
                    .ok_or(TrieError::InconsistentTree)?;
                let child_node = child_node.insert(state, path, value)?;
                self.choices[choice] = child_node.insert_self(state)?;
            }
            Some(choice) => {
                let new_leaf = LeafNode::new(path, value);
                self.choices[choice] = Node::from(new_leaf).insert_self(state)?;
            }
            None => {
                self.value = value;
            }
        }
        Ok(self.into())
    }

    pub fn remove(
        mut self,
        state: &mut TrieState,
        mut path: Nibbles,
    ) -> Result<(Option<Node>, Option<ValueRLP>), TrieError> {
        // absolute path of this branch, needed to locate the surviving child
        // if the branch collapses
        let branch_path = path.current();

        let old_value = match path.next_choice() {
            Some(choice) if self.choices[choice].is_valid() => {
                let child_node = state
                    .get_node(self.choices[choice], &path)?
                    .ok_or(TrieError::InconsistentTree)?;
                let (child_node, old_value) = child_node.remove(state, path)?;
                self.choices[choice] = match child_node {
                    Some(node) => node.insert_self(state)?,
                    None => NodeHash::EMPTY,
                };
                old_value
            }
            Some(_) => None,
            None => (!self.value.is_empty()).then(|| std::mem::take(&mut self.value)),
        };

        let mut surviving = None;
        let mut child_count = 0;
        for (choice, child) in self.choices.iter().enumerate() {
            if child.is_valid() {
                child_count += 1;
                surviving = Some((choice as u8, *child));
            }
        }

        // a branch with less than two children is not canonical and must be
        // replaced by a smaller node
        let new_node = match (child_count, self.value.is_empty()) {
            (0, true) => None,
            // only the branch value remains, turn it into a leaf
            (0, false) => Some(LeafNode::new(Nibbles::from_hex(vec![16]), self.value).into()),
            // a single child and no value, collapse into the child
            (1, true) => {
                let (choice, child_hash) = surviving.ok_or(TrieError::InconsistentTree)?;
                let child_path = branch_path.append_new(choice);
                let child = state
                    .get_node_at(child_hash, child_path)?
                    .ok_or(TrieError::InconsistentTree)?;
                let node = match child {
                    // branches stay referenced, an extension takes this node's place
                    Node::Branch(_) => {
                        ExtensionNode::new(Nibbles::from_hex(vec![choice]), child_hash).into()
                    }
                    Node::Extension(mut ext) => {
                        ext.prefix.prepend(choice);
                        ext.into()
                    }
                    Node::Leaf(mut leaf) => {
                        leaf.partial.prepend(choice);
                        leaf.into()
                    }
                };
                Some(node)
            }
            _ => Some(self.into()),
        };

        Ok((new_node, old_value))
    }
}
