//! # Binary Parse Trees
//!
//! A [`TreeNode`] is either a leaf carrying a word index or an internal node
//! with exactly two children. Trees come from an external parser as
//! [`RawNode`]s, which are checked once on conversion; after that the shape
//! cannot be wrong.
//!
//! Node identity is the post-order position: children before parents, left
//! before right, root last.
//!
//! ```rust
//! use rootalign_nlp::tree::{RawNode, TreeNode};
//!
//! // (cat sat)
//! let raw = RawNode::internal(vec![RawNode::leaf(1), RawNode::leaf(2)]);
//! let tree = TreeNode::try_from(raw).unwrap();
//! assert_eq!(tree.size(), 3);
//! assert_eq!(tree.to_string(), "(1 2)");
//! ```
//!
//! Every traversal here uses an explicit stack, so very deep trees do not
//! exhaust the call stack.

use crate::NlpError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A well-formed binary tree over word indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf { word_index: usize },
    Internal {
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn leaf(word_index: usize) -> Self {
        TreeNode::Leaf { word_index }
    }

    pub fn internal(left: TreeNode, right: TreeNode) -> Self {
        TreeNode::Internal {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Convert an optional parser result; `None` is an empty tree.
    pub fn from_raw(raw: Option<RawNode>) -> Result<Self, NlpError> {
        match raw {
            Some(raw) => TreeNode::try_from(raw),
            None => Err(NlpError::EmptyTree),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }

    /// Word index if this is a leaf.
    pub fn word_index(&self) -> Option<usize> {
        match self {
            TreeNode::Leaf { word_index } => Some(*word_index),
            TreeNode::Internal { .. } => None,
        }
    }

    /// Nodes in post-order.
    pub fn post_order(&self) -> PostOrder<'_> {
        PostOrder {
            stack: vec![(self, false)],
        }
    }

    /// Total number of nodes.
    pub fn size(&self) -> usize {
        self.post_order().count()
    }

    /// Word indices of the leaves, left to right.
    pub fn leaves(&self) -> Vec<usize> {
        self.post_order().filter_map(TreeNode::word_index).collect()
    }

    pub fn num_leaves(&self) -> usize {
        self.post_order().filter(|n| n.is_leaf()).count()
    }

    /// Largest word index in the tree.
    pub fn max_word_index(&self) -> usize {
        self.post_order()
            .filter_map(TreeNode::word_index)
            .max()
            .unwrap_or(0)
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((node, d)) = stack.pop() {
            deepest = deepest.max(d);
            if let TreeNode::Internal { left, right } = node {
                stack.push((left.as_ref(), d + 1));
                stack.push((right.as_ref(), d + 1));
            }
        }
        deepest
    }

    /// Fail on the first leaf (in post-order) whose index is `>= vocab_size`.
    pub fn check_indices(&self, vocab_size: usize) -> Result<(), NlpError> {
        match self
            .post_order()
            .filter_map(TreeNode::word_index)
            .find(|&i| i >= vocab_size)
        {
            Some(index) => Err(NlpError::IndexOutOfRange { index, vocab_size }),
            None => Ok(()),
        }
    }
}

/// Post-order iterator over a [`TreeNode`].
pub struct PostOrder<'a> {
    // (node, children already pushed)
    stack: Vec<(&'a TreeNode, bool)>,
}

impl<'a> Iterator for PostOrder<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, expanded)) = self.stack.pop() {
            match node {
                TreeNode::Internal { left, right } if !expanded => {
                    self.stack.push((node, true));
                    self.stack.push((right.as_ref(), false));
                    self.stack.push((left.as_ref(), false));
                }
                _ => return Some(node),
            }
        }
        None
    }
}

impl fmt::Display for TreeNode {
    /// S-expression of word indices: `((1 2) 3)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        for node in self.post_order() {
            match node {
                TreeNode::Leaf { word_index } => parts.push(word_index.to_string()),
                TreeNode::Internal { .. } => {
                    let right = parts.pop().unwrap_or_default();
                    let left = parts.pop().unwrap_or_default();
                    parts.push(format!("({} {})", left, right));
                }
            }
        }
        write!(f, "{}", parts.pop().unwrap_or_default())
    }
}

/// Untyped tree as produced by an external parser.
///
/// A node is a leaf when it has a word index and no children, and an
/// internal node when it has exactly two children and no word index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNode {
    pub word_index: Option<usize>,
    #[serde(default)]
    pub children: Vec<RawNode>,
}

impl RawNode {
    pub fn leaf(word_index: usize) -> Self {
        Self {
            word_index: Some(word_index),
            children: Vec::new(),
        }
    }

    pub fn internal(children: Vec<RawNode>) -> Self {
        Self {
            word_index: None,
            children,
        }
    }
}

impl TryFrom<RawNode> for TreeNode {
    type Error = NlpError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let mut built: Vec<TreeNode> = Vec::new();
        let mut stack = vec![(&raw, false)];

        while let Some((node, expanded)) = stack.pop() {
            match (node.word_index, node.children.len()) {
                (Some(word_index), 0) => built.push(TreeNode::leaf(word_index)),
                (Some(word_index), n) => {
                    return Err(NlpError::MalformedTree {
                        reason: format!("leaf {} also has {} children", word_index, n),
                    })
                }
                (None, 0) => {
                    return Err(NlpError::MalformedTree {
                        reason: "node has neither a word index nor children".to_string(),
                    })
                }
                (None, 2) if !expanded => {
                    stack.push((node, true));
                    stack.push((&node.children[1], false));
                    stack.push((&node.children[0], false));
                }
                (None, 2) => {
                    let (Some(right), Some(left)) = (built.pop(), built.pop()) else {
                        return Err(NlpError::MalformedTree {
                            reason: "internal node lost its children".to_string(),
                        });
                    };
                    built.push(TreeNode::internal(left, right));
                }
                (None, n) => {
                    return Err(NlpError::MalformedTree {
                        reason: format!("internal node has {} children, expected 2", n),
                    })
                }
            }
        }

        built.pop().ok_or(NlpError::EmptyTree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ((1 2) 3)
    fn sample() -> TreeNode {
        TreeNode::internal(
            TreeNode::internal(TreeNode::leaf(1), TreeNode::leaf(2)),
            TreeNode::leaf(3),
        )
    }

    #[test]
    fn test_post_order() {
        let order: Vec<String> = sample().post_order().map(|n| n.to_string()).collect();
        assert_eq!(order, vec!["1", "2", "(1 2)", "3", "((1 2) 3)"]);
    }

    #[test]
    fn test_tree_stats() {
        let t = sample();
        assert_eq!(t.size(), 5);
        assert_eq!(t.num_leaves(), 3);
        assert_eq!(t.leaves(), vec![1, 2, 3]);
        assert_eq!(t.depth(), 3);
        assert_eq!(t.max_word_index(), 3);
        assert_eq!(TreeNode::leaf(7).depth(), 1);
    }

    #[test]
    fn test_check_indices() {
        assert!(sample().check_indices(4).is_ok());
        assert_eq!(
            sample().check_indices(3),
            Err(NlpError::IndexOutOfRange {
                index: 3,
                vocab_size: 3
            })
        );
    }

    #[test]
    fn test_raw_conversion() {
        let raw = RawNode::internal(vec![
            RawNode::internal(vec![RawNode::leaf(1), RawNode::leaf(2)]),
            RawNode::leaf(3),
        ]);
        assert_eq!(TreeNode::try_from(raw).unwrap(), sample());
    }

    #[test]
    fn test_raw_wrong_arity() {
        for n in [1, 3] {
            let raw = RawNode::internal((0..n).map(RawNode::leaf).collect());
            assert!(matches!(
                TreeNode::try_from(raw),
                Err(NlpError::MalformedTree { .. })
            ));
        }
    }

    #[test]
    fn test_raw_leaf_with_children() {
        let raw = RawNode {
            word_index: Some(1),
            children: vec![RawNode::leaf(2), RawNode::leaf(3)],
        };
        assert!(matches!(
            TreeNode::try_from(raw),
            Err(NlpError::MalformedTree { .. })
        ));
    }

    #[test]
    fn test_raw_bare_node() {
        assert!(matches!(
            TreeNode::try_from(RawNode::default()),
            Err(NlpError::MalformedTree { .. })
        ));
    }

    #[test]
    fn test_empty_tree() {
        assert_eq!(TreeNode::from_raw(None), Err(NlpError::EmptyTree));
    }

    #[test]
    fn test_deep_tree_traversal() {
        // Left-leaning spine 2 000 nodes deep.
        let mut raw = RawNode::leaf(0);
        for i in 1..2_000 {
            raw = RawNode::internal(vec![raw, RawNode::leaf(i)]);
        }
        let tree = TreeNode::try_from(raw).unwrap();
        assert_eq!(tree.depth(), 2_000);
        assert_eq!(tree.num_leaves(), 2_000);
    }

    #[test]
    fn test_raw_from_json() {
        let raw: RawNode = serde_json::from_str(
            r#"{"word_index": null, "children": [{"word_index": 1}, {"word_index": 2}]}"#,
        )
        .unwrap();
        let tree = TreeNode::try_from(raw).unwrap();
        assert_eq!(tree.to_string(), "(1 2)");
    }
}
