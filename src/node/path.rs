use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::NodeError;

/// Positional address of a node: the child indices walked from the root.
///
/// The empty path addresses the root itself. Paths order lexicographically,
/// which is document (pre-order) order: a parent sorts before its children and
/// an earlier sibling's subtree sorts before a later sibling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Index of this node inside its parent; `None` for the root.
    pub fn last_index(&self) -> Option<usize> {
        self.0.last().copied()
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn child(&self, index: usize) -> NodePath {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    /// Path of the sibling `offset` positions away, if the index stays non-negative.
    pub fn sibling(&self, offset: isize) -> Option<NodePath> {
        let last = isize::try_from(self.last_index()?).ok()?.checked_add(offset)?;
        let last = usize::try_from(last).ok()?;
        let mut indices = self.0.clone();
        if let Some(slot) = indices.last_mut() {
            *slot = last;
        }
        Some(Self(indices))
    }

    pub fn is_ancestor_of(&self, other: &NodePath) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }

    /// Re-roots `other` (which lives under `self`) so it becomes relative to `self`.
    pub fn relative(&self, other: &NodePath) -> Option<NodePath> {
        if other.0.starts_with(&self.0) {
            Some(Self(other.0[self.0.len()..].to_vec()))
        } else {
            None
        }
    }

    pub fn join(&self, other: &NodePath) -> NodePath {
        let mut indices = self.0.clone();
        indices.extend_from_slice(&other.0);
        Self(indices)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", parts.join("-"))
    }
}

impl FromStr for NodePath {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        trimmed
            .split('-')
            .map(|part| {
                part.parse::<usize>()
                    .map_err(|_| NodeError::InvalidPath(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl From<Vec<usize>> for NodePath {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}
