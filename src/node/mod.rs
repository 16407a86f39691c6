//! # Node
//!
//! The universal ordered tree used as argument and return channel for every
//! Active Event and every expression.
//!
//! ```text
//! root                  path ""
//! ├── a                 path "0"
//! └── b                 path "1"
//!     ├── c: 5          path "1-0"
//!     └── c: 7          path "1-1"
//! ```
//!
//! A node owns its children outright, so a child can never have two parents;
//! attaching a subtree somewhere else means moving it or cloning it. Upward
//! navigation (parent, root, siblings) does not use stored back-references.
//! It resolves a [`NodePath`] against the tree that owns the node, which is
//! what [`Cursor`] does.

pub mod json;
mod path;
mod value;

use std::cmp::Ordering;

use thiserror::Error;

pub use path::NodePath;
pub use value::{FromValue, Opaque, Value};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Index {index} out of range for {len} children")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("No node at path '{0}'")]
    PathNotFound(NodePath),
    #[error("The root node cannot be detached from itself")]
    CannotDetachRoot,
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Cannot convert '{value}' to {target}")]
    Conversion { value: String, target: &'static str },
    #[error("Invalid node path: {0}")]
    InvalidPath(String),
}

pub type NodeResult<T> = Result<T, NodeError>;

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub name: String,
    pub value: Value,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Null,
            children: Vec::new(),
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            children: Vec::new(),
        }
    }

    /// Builder-style append.
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Appends `child` and returns a handle to it in its new position.
    pub fn add(&mut self, child: Node) -> &mut Node {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn insert(&mut self, index: usize, child: Node) -> NodeResult<()> {
        if index > self.children.len() {
            return Err(NodeError::IndexOutOfRange {
                index,
                len: self.children.len(),
            });
        }
        self.children.insert(index, child);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> NodeResult<Node> {
        if index >= self.children.len() {
            return Err(NodeError::IndexOutOfRange {
                index,
                len: self.children.len(),
            });
        }
        Ok(self.children.remove(index))
    }

    pub fn get(&self, path: &NodePath) -> Option<&Node> {
        path.indices()
            .iter()
            .try_fold(self, |node, &index| node.children.get(index))
    }

    pub fn get_mut(&mut self, path: &NodePath) -> Option<&mut Node> {
        path.indices()
            .iter()
            .try_fold(self, |node, &index| node.children.get_mut(index))
    }

    /// Unlinks the node at `path` from its parent. The returned subtree is a
    /// standalone root; later siblings shift one position to the left.
    pub fn detach(&mut self, path: &NodePath) -> NodeResult<Node> {
        let (parent, index) = match (path.parent(), path.last_index()) {
            (Some(parent), Some(index)) => (parent, index),
            _ => return Err(NodeError::CannotDetachRoot),
        };
        let parent = self
            .get_mut(&parent)
            .ok_or_else(|| NodeError::PathNotFound(path.clone()))?;
        if index >= parent.children.len() {
            return Err(NodeError::PathNotFound(path.clone()));
        }
        Ok(parent.children.remove(index))
    }

    /// Puts `node` at `path` and hands back what was there.
    pub fn replace(&mut self, path: &NodePath, node: Node) -> NodeResult<Node> {
        let slot = self
            .get_mut(path)
            .ok_or_else(|| NodeError::PathNotFound(path.clone()))?;
        Ok(std::mem::replace(slot, node))
    }

    pub fn first_child(&self) -> Option<&Node> {
        self.children.first()
    }

    pub fn last_child(&self) -> Option<&Node> {
        self.children.last()
    }

    /// First child whose name differs from `name`; used to skip the
    /// empty-named formatting nodes that statements may carry.
    pub fn first_child_not_named(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name != name)
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// First direct child matching `predicate`.
    pub fn find<P>(&self, predicate: P) -> Option<&Node>
    where
        P: Fn(&Node) -> bool,
    {
        self.children.iter().find(|c| predicate(c))
    }

    /// All direct children matching `predicate`, in order.
    pub fn find_all<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a Node> + 'a
    where
        P: Fn(&Node) -> bool + 'a,
    {
        self.children.iter().filter(move |c| predicate(c))
    }

    pub fn find_or_create(&mut self, name: &str) -> &mut Node {
        match self.children.iter().position(|c| c.name == name) {
            Some(index) => &mut self.children[index],
            None => self.add(Node::new(name)),
        }
    }

    /// Pre-order walk over this node and every descendant, paired with paths
    /// relative to this node.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![(NodePath::root(), self)],
        }
    }

    pub fn cursor(&self, path: NodePath) -> Option<Cursor<'_>> {
        self.get(&path)?;
        Some(Cursor { root: self, path })
    }

    pub fn sort(&mut self) {
        self.children.sort();
    }

    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Node, &Node) -> Ordering,
    {
        self.children.sort_by(compare);
    }

    pub fn value_as<T: FromValue>(&self) -> NodeResult<T> {
        T::from_value(&self.value)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    /// Name (ordinal), then value, then child count, then children in order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.value.compare(&other.value))
            .then_with(|| self.children.len().cmp(&other.children.len()))
            .then_with(|| {
                self.children
                    .iter()
                    .zip(other.children.iter())
                    .map(|(a, b)| a.cmp(b))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            })
    }
}

pub struct Walk<'a> {
    stack: Vec<(NodePath, &'a Node)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (NodePath, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, node) = self.stack.pop()?;
        for (index, child) in node.children.iter().enumerate().rev() {
            self.stack.push((path.child(index), child));
        }
        Some((path, node))
    }
}

/// A node seen through the tree that owns it, giving upward and sideways
/// navigation without back-references.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    root: &'a Node,
    path: NodePath,
}

impl<'a> Cursor<'a> {
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn node(&self) -> &'a Node {
        // Cursors are only built for resolvable paths over a shared borrow.
        self.root.get(&self.path).unwrap_or(self.root)
    }

    pub fn root(&self) -> Cursor<'a> {
        Cursor {
            root: self.root,
            path: NodePath::root(),
        }
    }

    pub fn parent(&self) -> Option<Cursor<'a>> {
        Some(Cursor {
            root: self.root,
            path: self.path.parent()?,
        })
    }

    pub fn next_sibling(&self) -> Option<Cursor<'a>> {
        self.sibling(1)
    }

    pub fn previous_sibling(&self) -> Option<Cursor<'a>> {
        self.sibling(-1)
    }

    fn sibling(&self, offset: isize) -> Option<Cursor<'a>> {
        let path = self.path.sibling(offset)?;
        self.root.cursor(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Node {
        Node::new("root")
            .with_child(Node::new("a"))
            .with_child(
                Node::new("b")
                    .with_child(Node::with_value("c", 5))
                    .with_child(Node::with_value("c", 7)),
            )
    }

    #[test]
    fn test_walk_is_pre_order() {
        let tree = sample();
        let names: Vec<_> = tree.walk().map(|(_, n)| n.name.clone()).collect();
        assert_eq!(names, vec!["root", "a", "b", "c", "c"]);
        let paths: Vec<_> = tree.walk().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["", "0", "1", "1-0", "1-1"]);
    }

    #[test]
    fn test_detach_leaves_standalone_subtree() {
        let mut tree = sample();
        let b = tree.detach(&NodePath::from(vec![1])).unwrap();
        assert_eq!(b.name, "b");
        assert_eq!(b.len(), 2);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.detach(&NodePath::root()), Err(NodeError::CannotDetachRoot));
        assert!(matches!(
            tree.detach(&NodePath::from(vec![4])),
            Err(NodeError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut tree = sample();
        assert!(tree.insert(2, Node::new("end")).is_ok());
        assert_eq!(
            tree.insert(9, Node::new("x")),
            Err(NodeError::IndexOutOfRange { index: 9, len: 3 })
        );
    }

    #[test]
    fn test_cursor_navigation() {
        let tree = sample();
        let c = tree.cursor(NodePath::from(vec![1, 1])).unwrap();
        assert_eq!(c.node().value, Value::from(7));
        assert_eq!(c.previous_sibling().unwrap().node().value, Value::from(5));
        assert!(c.next_sibling().is_none());
        assert_eq!(c.parent().unwrap().node().name, "b");
        assert_eq!(c.root().node().name, "root");
        assert!(c.root().parent().is_none());
    }

    #[test]
    fn test_structural_ordering() {
        let a = Node::with_value("x", 1).with_child(Node::new("k"));
        let b = Node::with_value("x", 1);
        assert!(a > b);
        assert_eq!(a.clone(), a);
        assert!(Node::new("a") < Node::new("b"));
    }

    #[test]
    fn test_clone_is_independent() {
        let tree = sample();
        let mut copy = tree.clone();
        assert_eq!(copy, tree);
        copy.children[1].children[0].value = Value::from("changed");
        copy.children[1].add(Node::new("d"));
        assert_eq!(tree.children[1].len(), 2);
        assert_eq!(tree.children[1].children[0].value, Value::from(5));
        assert_ne!(copy, tree);
    }

    fn arb_node() -> impl proptest::strategy::Strategy<Value = Node> {
        use proptest::prelude::*;
        let leaf = ("[a-c]{0,2}", any::<i64>()).prop_map(|(name, v)| Node::with_value(name, v));
        leaf.prop_recursive(3, 24, 4, |inner| {
            ("[a-c]{1,2}", prop::collection::vec(inner, 0..4))
                .prop_map(|(name, children)| Node::new(name).with_children(children))
        })
    }

    proptest::proptest! {
        #[test]
        fn prop_mutating_a_clone_never_touches_the_source(tree in arb_node()) {
            let before = tree.clone();
            let mut copy = tree.clone();
            for (path, _) in before.walk() {
                if let Some(node) = copy.get_mut(&path) {
                    node.value = Value::from("mutated");
                    node.add(Node::new("extra"));
                }
            }
            proptest::prop_assert_eq!(&tree, &before);
            proptest::prop_assert_eq!(tree.walk().count(), before.walk().count());
        }
    }

    #[test]
    fn test_find_only_direct_children() {
        let tree = sample();
        assert!(tree.find(|n| n.name == "c").is_none());
        assert_eq!(tree.find_all(|n| n.name.len() == 1).count(), 2);
        assert_eq!(tree.first_child_not_named("a").unwrap().name, "b");
    }
}
