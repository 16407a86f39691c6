use std::collections::HashSet;

use regex::Regex;

use super::logical::Group;
use crate::node::{Node, NodePath, Value};

/// Lazy stream of node positions flowing from one step to the next.
pub type Paths<'a> = Box<dyn Iterator<Item = NodePath> + 'a>;

/// A compiled regex step plus the `d` (distinct) flag.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    pub regex: Regex,
    pub distinct: bool,
}

#[derive(Debug, Clone)]
pub enum ValueMatcher {
    /// Compares the value's string form.
    Text(String),
    /// Compares with natural value ordering after a `=:type:` conversion.
    Typed(Value),
}

impl ValueMatcher {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ValueMatcher::Text(text) => value.to_string() == *text,
            ValueMatcher::Typed(expected) => !value.is_null() && value == expected,
        }
    }
}

/// One step of a compiled expression. Each step pulls paths from its
/// upstream and yields zero or more paths downstream.
#[derive(Debug, Clone)]
pub enum Step {
    /// `..`
    Root,
    /// `*`
    Children,
    /// `**`: every upstream node, then its descendants, pre-order.
    Flatten,
    /// `.`
    Parent,
    /// `..name`: nearest ancestor with that name.
    NamedAncestor(String),
    /// Children with exactly this name. `//` produces the empty name.
    Named(String),
    /// `"/regex/flags"` against child names.
    NameRegex(RegexMatcher),
    /// Child at a position.
    Numbered(usize),
    /// `[start,end]` or `start-end` over upstream positions, end exclusive.
    Range { start: Option<usize>, end: Option<usize> },
    /// `%n`: upstream positions 0, n, 2n...
    Modulo(usize),
    /// `+n` / `-n`
    Sibling(isize),
    /// `<`: previous node in document order.
    ShiftLeft,
    /// `>`: next node in document order.
    ShiftRight,
    /// `=value` / `=:type:value`: filters upstream nodes by value.
    Valued(ValueMatcher),
    /// `="/regex/flags"` against upstream values.
    ValueRegex(RegexMatcher),
    /// `#`: follows a node whose value is a path into the same tree.
    Reference,
    /// `( ... )`
    Group(Group),
}

impl Step {
    pub fn apply<'a>(&'a self, root: &'a Node, input: Paths<'a>) -> Paths<'a> {
        match self {
            Step::Root => Box::new(input.take(1).map(|_| NodePath::root())),
            Step::Children => Box::new(input.flat_map(move |path| {
                let len = root.get(&path).map(|n| n.len()).unwrap_or(0);
                (0..len).map(move |i| path.child(i))
            })),
            Step::Flatten => Box::new(input.flat_map(move |path| {
                root.get(&path)
                    .into_iter()
                    .flat_map(|node| node.walk())
                    .map(move |(relative, _)| path.join(&relative))
            })),
            Step::Parent => Box::new(input.filter_map(|path| path.parent())),
            Step::NamedAncestor(name) => Box::new(input.filter_map(move |path| {
                let mut current = path.parent();
                while let Some(candidate) = current {
                    if root.get(&candidate).is_some_and(|n| n.name == *name) {
                        return Some(candidate);
                    }
                    current = candidate.parent();
                }
                None
            })),
            Step::Named(name) => Box::new(input.flat_map(move |path| {
                children_where(root, path, move |child| child.name == *name)
            })),
            Step::NameRegex(matcher) => {
                let mut seen = HashSet::new();
                Box::new(
                    input
                        .flat_map(move |path| {
                            children_where(root, path, move |child| {
                                matcher.regex.is_match(&child.name)
                            })
                        })
                        .filter(move |path| {
                            !matcher.distinct
                                || root.get(path).is_some_and(|n| seen.insert(n.name.clone()))
                        }),
                )
            }
            Step::Numbered(index) => Box::new(input.filter_map(move |path| {
                let child = path.child(*index);
                root.get(&child).map(|_| child)
            })),
            Step::Range { start, end } => {
                let start = start.unwrap_or(0);
                let skipped = input.skip(start);
                match end {
                    Some(end) => Box::new(skipped.take(end.saturating_sub(start))),
                    None => Box::new(skipped),
                }
            }
            Step::Modulo(n) => Box::new(
                input
                    .enumerate()
                    .filter(move |(i, _)| i % n == 0)
                    .map(|(_, path)| path),
            ),
            Step::Sibling(offset) => Box::new(input.filter_map(move |path| {
                let sibling = path.sibling(*offset)?;
                root.get(&sibling).map(|_| sibling)
            })),
            Step::ShiftLeft => Box::new(input.filter_map(move |path| previous_in_document(root, &path))),
            Step::ShiftRight => Box::new(input.filter_map(move |path| next_in_document(root, &path))),
            Step::Valued(matcher) => Box::new(
                input.filter(move |path| root.get(path).is_some_and(|n| matcher.matches(&n.value))),
            ),
            Step::ValueRegex(matcher) => {
                let mut seen = HashSet::new();
                Box::new(input.filter(move |path| {
                    let Some(node) = root.get(path) else {
                        return false;
                    };
                    if node.value.is_null() {
                        return false;
                    }
                    let text = node.value.to_string();
                    matcher.regex.is_match(&text) && (!matcher.distinct || seen.insert(text))
                }))
            }
            Step::Reference => Box::new(input.filter_map(move |path| match &root.get(&path)?.value {
                Value::Path(target) => root.get(target).map(|_| target.clone()),
                _ => None,
            })),
            Step::Group(group) => group.evaluate(root, input),
        }
    }
}

fn children_where<'a, P>(root: &'a Node, path: NodePath, predicate: P) -> impl Iterator<Item = NodePath> + 'a
where
    P: Fn(&Node) -> bool + 'a,
{
    root.get(&path)
        .into_iter()
        .flat_map(|node| node.children.iter().enumerate())
        .filter(move |&(_, child)| predicate(child))
        .map(move |(i, _)| path.child(i))
}

fn previous_in_document(root: &Node, path: &NodePath) -> Option<NodePath> {
    let index = path.last_index()?;
    if index == 0 {
        return path.parent();
    }
    let mut current = path.sibling(-1)?;
    while let Some(node) = root.get(&current) {
        if node.is_empty() {
            break;
        }
        current = current.child(node.len() - 1);
    }
    Some(current)
}

fn next_in_document(root: &Node, path: &NodePath) -> Option<NodePath> {
    if root.get(path).is_some_and(|n| !n.is_empty()) {
        return Some(path.child(0));
    }
    let mut current = path.clone();
    loop {
        let sibling = current.sibling(1)?;
        if root.get(&sibling).is_some() {
            return Some(sibling);
        }
        current = current.parent()?;
    }
}
