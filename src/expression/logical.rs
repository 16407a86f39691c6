use std::collections::HashSet;

use super::iterator::{Paths, Step};
use crate::node::{Node, NodePath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LogicalKind {
    /// `|`: union, left results first.
    Or,
    /// `&`: left results also present on the right.
    And,
    /// `^`: results present on exactly one side.
    Xor,
    /// `!`: left results absent on the right.
    Not,
}

impl LogicalKind {
    pub fn from_delimiter(c: char) -> Option<Self> {
        match c {
            '|' => Some(LogicalKind::Or),
            '&' => Some(LogicalKind::And),
            '^' => Some(LogicalKind::Xor),
            '!' => Some(LogicalKind::Not),
            _ => None,
        }
    }

    fn combine(&self, left: Vec<NodePath>, right: Vec<NodePath>) -> Vec<NodePath> {
        let right_set: HashSet<&NodePath> = right.iter().collect();
        match self {
            LogicalKind::Or => {
                let mut seen: HashSet<NodePath> = left.iter().cloned().collect();
                let mut combined = left;
                for path in right {
                    if seen.insert(path.clone()) {
                        combined.push(path);
                    }
                }
                combined
            }
            LogicalKind::And => left.into_iter().filter(|p| right_set.contains(p)).collect(),
            LogicalKind::Not => left.into_iter().filter(|p| !right_set.contains(p)).collect(),
            LogicalKind::Xor => {
                let left_set: HashSet<&NodePath> = left.iter().collect();
                let mut combined: Vec<NodePath> =
                    left.iter().filter(|p| !right_set.contains(p)).cloned().collect();
                combined.extend(right.iter().filter(|p| !left_set.contains(p)).cloned());
                combined
            }
        }
    }
}

/// A chain of steps joined to the running result by a logical operator.
#[derive(Debug, Clone)]
pub struct Logical {
    pub kind: LogicalKind,
    pub steps: Vec<Step>,
}

/// The steps of one `( ... )` level, or of the whole expression.
///
/// Every logical starts from the same input: the group's upstream sequence,
/// or the start node at the top level.
#[derive(Debug, Clone)]
pub struct Group {
    pub logicals: Vec<Logical>,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            logicals: vec![Logical {
                kind: LogicalKind::Or,
                steps: Vec::new(),
            }],
        }
    }
}

impl Group {
    pub fn push_step(&mut self, step: Step) {
        if let Some(logical) = self.logicals.last_mut() {
            logical.steps.push(step);
        }
    }

    pub fn push_logical(&mut self, kind: LogicalKind) {
        self.logicals.push(Logical {
            kind,
            steps: Vec::new(),
        });
    }

    pub fn evaluate<'a>(&'a self, root: &'a Node, input: Paths<'a>) -> Paths<'a> {
        if let [only] = self.logicals.as_slice() {
            return Box::new(unique(chain(&only.steps, root, input)));
        }
        let seed: Vec<NodePath> = input.collect();
        let mut result = Vec::new();
        for logical in &self.logicals {
            let right: Vec<NodePath> =
                chain(&logical.steps, root, Box::new(seed.clone().into_iter())).collect();
            result = logical.kind.combine(result, right);
        }
        Box::new(result.into_iter())
    }
}

fn chain<'a>(steps: &'a [Step], root: &'a Node, input: Paths<'a>) -> Paths<'a> {
    steps.iter().fold(input, |paths, step| step.apply(root, paths))
}

fn unique<'a>(paths: Paths<'a>) -> impl Iterator<Item = NodePath> + 'a {
    let mut seen = HashSet::new();
    paths.filter(move |path| seen.insert(path.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(indices: &[usize]) -> Vec<NodePath> {
        indices.iter().map(|i| NodePath::from(vec![*i])).collect()
    }

    #[test]
    fn test_combine() {
        let left = paths(&[0, 1, 2]);
        let right = paths(&[2, 3]);
        assert_eq!(LogicalKind::Or.combine(left.clone(), right.clone()), paths(&[0, 1, 2, 3]));
        assert_eq!(LogicalKind::And.combine(left.clone(), right.clone()), paths(&[2]));
        assert_eq!(LogicalKind::Not.combine(left.clone(), right.clone()), paths(&[0, 1]));
        assert_eq!(LogicalKind::Xor.combine(left, right), paths(&[0, 1, 3]));
    }
}
