//! # Conditions
//!
//! Boolean statements written as nodes, used by `if`/`while` style events.
//!
//! ```text
//! if: {"$expr": "/../name?value"}     statement value: left-hand side
//!   =: "Thomas"                          comparison operator and right-hand side
//!   and: {"$expr": "/../age?value"}    nested: binds tighter than siblings
//!     >: 18
//!   or: true                             any following sibling `or`
//!   lambda                               body, when not a simple exist
//! ```
//!
//! The operator is the name of the first non-empty-named child (`=`, `!=`,
//! `>`, `<`, `>=`, `<=`). Without one, the statement is an existence test,
//! negated when its value is `"!"`. A statement whose value is null uses its
//! first child as an Active Event and tests the value it leaves behind.
//!
//! `and`/`or` nodes are found as children of a statement and as siblings
//! following it. They are read once into a [`BoolExpr`] tree and evaluated
//! with short-circuiting:
//!
//! ```text
//! result = (test && nested and && sibling and) || nested or || sibling or
//! ```

use std::cmp::Ordering;

use thiserror::Error;
use tracing::debug;

use crate::{
    event::ApplicationContext,
    expression::{Expression, MatchType},
    node::{Node, NodePath, Value},
    InternalResult,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("No statement at path '{0}'")]
    StatementNotFound(NodePath),
    #[error("'!' at '{0}' has nothing to negate")]
    MissingOperand(NodePath),
}

pub type ConditionResult<T> = Result<T, ConditionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum Operator {
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = ">=")]
    GreaterOrEqual,
    #[strum(serialize = "<=")]
    LessOrEqual,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "exist")]
    Exist,
}

impl Operator {
    fn comparison(name: &str) -> Option<Self> {
        match name.parse::<Operator>() {
            Ok(Operator::Not | Operator::Exist) | Err(_) => None,
            Ok(op) => Some(op),
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Equal => ordering == Ordering::Equal,
            Operator::NotEqual => ordering != Ordering::Equal,
            Operator::Greater => ordering == Ordering::Greater,
            Operator::Less => ordering == Ordering::Less,
            Operator::GreaterOrEqual => ordering != Ordering::Less,
            Operator::LessOrEqual => ordering != Ordering::Greater,
            Operator::Not | Operator::Exist => false,
        }
    }
}

/// Names that never act as an event operand or body statement.
fn is_reserved(name: &str) -> bool {
    name.is_empty()
        || name.starts_with('_')
        || name == "and"
        || name == "or"
        || name.starts_with("lambda")
        || Operator::comparison(name).is_some()
}

#[derive(Debug, Clone)]
pub enum Operand {
    Constant(Value),
    /// Evaluated relative to the node that carries it.
    Expression { expression: Expression, at: NodePath },
    /// Raised by name with the node as arguments; its value afterwards counts.
    Event(NodePath),
}

impl Operand {
    fn of_value(node: &Node, path: &NodePath) -> Self {
        match &node.value {
            Value::Expression(expression) => Operand::Expression {
                expression: expression.clone(),
                at: path.clone(),
            },
            other => Operand::Constant(other.clone()),
        }
    }

    /// A statement's own operand: its value, or its first ordinary child as an
    /// event when the value is null.
    fn of_statement(node: &Node, path: &NodePath) -> Self {
        if node.value.is_null() {
            if let Some(index) = node.children.iter().position(|c| !c.name.is_empty()) {
                if !is_reserved(&node.children[index].name) {
                    return Operand::Event(path.child(index));
                }
            }
        }
        Self::of_value(node, path)
    }

    /// What `!` negates: the first child itself, raised as an event when it
    /// carries no value.
    fn of_negated(node: &Node, path: &NodePath) -> Self {
        if node.value.is_null() && !is_reserved(&node.name) {
            return Operand::Event(path.clone());
        }
        Self::of_value(node, path)
    }

    fn raise(ctx: &ApplicationContext, tree: &mut Node, path: &NodePath) -> InternalResult<Value> {
        let Some(name) = tree.get(path).map(|n| n.name.clone()) else {
            return Ok(Value::Null);
        };
        ctx.raise_at(&name, tree, path)?;
        Ok(tree.get(path).map(|n| n.value.clone()).unwrap_or_default())
    }

    fn exists(&self, ctx: &ApplicationContext, tree: &mut Node) -> InternalResult<bool> {
        match self {
            Operand::Constant(value) => Ok(truthy(value)),
            Operand::Event(path) => Ok(truthy(&Self::raise(ctx, tree, path)?)),
            Operand::Expression { expression, at } => {
                let matched = expression.evaluate_at(tree, at)?;
                if matched.is_empty() {
                    return Ok(false);
                }
                Ok(match matched.match_type {
                    MatchType::Name => matched
                        .values()
                        .next()
                        .is_some_and(|v| !v.to_string().is_empty()),
                    MatchType::Value => matched.values().next().is_some_and(|v| !v.is_null()),
                    MatchType::Count | MatchType::Path | MatchType::Node => true,
                })
            }
        }
    }

    fn resolve(&self, ctx: &ApplicationContext, tree: &mut Node) -> InternalResult<Value> {
        match self {
            Operand::Constant(value) => Ok(value.clone()),
            Operand::Event(path) => Self::raise(ctx, tree, path),
            Operand::Expression { expression, at } => {
                let matched = expression.evaluate_at(tree, at)?;
                if matched.match_type == MatchType::Count {
                    return Ok(Value::from(matched.count()));
                }
                let mut values: Vec<Value> = matched.values().cloned().collect();
                Ok(match values.len() {
                    0 => Value::Null,
                    1 => values.remove(0),
                    // Several matches compare element by element.
                    _ => Value::NodeList(
                        values
                            .into_iter()
                            .map(|value| Node::with_value("", value))
                            .collect(),
                    ),
                })
            }
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Boolean(b) => *b,
        _ => true,
    }
}

#[derive(Debug, Clone)]
pub struct Test {
    pub operator: Operator,
    pub lhs: Operand,
    pub rhs: Option<Operand>,
}

impl Test {
    fn parse(tree: &Node, path: &NodePath) -> ConditionResult<Self> {
        let node = tree
            .get(path)
            .ok_or_else(|| ConditionError::StatementNotFound(path.clone()))?;
        let first = node
            .children
            .iter()
            .position(|c| !c.name.is_empty())
            .map(|i| (i, &node.children[i]));
        if let Some((index, child)) = first {
            if let Some(operator) = Operator::comparison(&child.name) {
                return Ok(Self {
                    operator,
                    lhs: Operand::of_value(node, path),
                    rhs: Some(Operand::of_value(child, &path.child(index))),
                });
            }
        }
        if node.value.as_str() == Some("!") {
            let child = node
                .first_child()
                .ok_or_else(|| ConditionError::MissingOperand(path.clone()))?;
            return Ok(Self {
                operator: Operator::Not,
                lhs: Operand::of_negated(child, &path.child(0)),
                rhs: None,
            });
        }
        Ok(Self {
            operator: Operator::Exist,
            lhs: Operand::of_statement(node, path),
            rhs: None,
        })
    }

    fn evaluate(&self, ctx: &ApplicationContext, tree: &mut Node) -> InternalResult<bool> {
        match (self.operator, &self.rhs) {
            (Operator::Exist, _) => self.lhs.exists(ctx, tree),
            (Operator::Not, _) => Ok(!self.lhs.exists(ctx, tree)?),
            (operator, Some(rhs)) => {
                let lhs = self.lhs.resolve(ctx, tree)?;
                let rhs = rhs.resolve(ctx, tree)?;
                Ok(operator.holds(lhs.compare(&rhs)))
            }
            (_, None) => Ok(false),
        }
    }
}

/// A statement tree read into explicit boolean structure.
#[derive(Debug, Clone)]
pub enum BoolExpr {
    Test(Test),
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
}

impl BoolExpr {
    pub fn evaluate(&self, ctx: &ApplicationContext, tree: &mut Node) -> InternalResult<bool> {
        match self {
            BoolExpr::Test(test) => test.evaluate(ctx, tree),
            BoolExpr::And(parts) => {
                for part in parts {
                    if !part.evaluate(ctx, tree)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            BoolExpr::Or(parts) => {
                for part in parts {
                    if part.evaluate(ctx, tree)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn build(tree: &Node, path: &NodePath, root: &NodePath) -> ConditionResult<Self> {
        let node = tree
            .get(path)
            .ok_or_else(|| ConditionError::StatementNotFound(path.clone()))?;
        let first = first_ordinary_child(node, path);
        let sibling = if path == root { None } else { next_sibling(tree, path) };

        let mut all = vec![BoolExpr::Test(Test::parse(tree, path)?)];
        for start in [first.clone(), sibling.clone()] {
            if let Some(next) = find_next(tree, start, "and") {
                all.push(Self::build(tree, &next, root)?);
            }
        }
        let mut any = vec![collapse(all, BoolExpr::And)];
        for start in [first, sibling] {
            if let Some(next) = find_next(tree, start, "or") {
                any.push(Self::build(tree, &next, root)?);
            }
        }
        Ok(collapse(any, BoolExpr::Or))
    }
}

fn collapse(mut parts: Vec<BoolExpr>, wrap: fn(Vec<BoolExpr>) -> BoolExpr) -> BoolExpr {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        wrap(parts)
    }
}

fn first_ordinary_child(node: &Node, path: &NodePath) -> Option<NodePath> {
    node.children
        .iter()
        .position(|c| !c.name.is_empty())
        .map(|i| path.child(i))
}

fn next_sibling(tree: &Node, path: &NodePath) -> Option<NodePath> {
    let sibling = path.sibling(1)?;
    tree.get(&sibling).map(|_| sibling)
}

/// `and` must be the node itself or its next sibling; `or` may be any
/// following sibling.
fn find_next(tree: &Node, start: Option<NodePath>, kind: &str) -> Option<NodePath> {
    let start = start?;
    if tree.get(&start)?.name == kind {
        return Some(start);
    }
    let mut current = next_sibling(tree, &start);
    while let Some(path) = current {
        if tree.get(&path).is_some_and(|n| n.name == kind) {
            return Some(path);
        }
        if kind != "or" {
            return None;
        }
        current = next_sibling(tree, &path);
    }
    None
}

/// A parsed statement, ready to evaluate against the tree it was read from.
#[derive(Debug, Clone)]
pub struct Condition {
    statement: NodePath,
    expr: BoolExpr,
    simple_exist: bool,
    body: Vec<NodePath>,
}

impl Condition {
    pub fn parse(tree: &Node, statement: &NodePath) -> ConditionResult<Self> {
        let node = tree
            .get(statement)
            .ok_or_else(|| ConditionError::StatementNotFound(statement.clone()))?;
        let expr = BoolExpr::build(tree, statement, statement)?;

        let first = first_ordinary_child(node, statement);
        let has_lambda = node.children.iter().any(|c| c.name.starts_with("lambda"));
        let is_exist = matches!(
            &expr,
            BoolExpr::Test(Test {
                operator: Operator::Exist,
                ..
            })
        );
        let simple_exist = is_exist
            && !has_lambda
            && find_next(tree, first.clone(), "and").is_none()
            && find_next(tree, first, "or").is_none();

        let event_operand = match &expr {
            BoolExpr::Test(Test {
                lhs: Operand::Event(path),
                ..
            }) => Some(path.clone()),
            _ => None,
        };
        let body = node
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                if simple_exist {
                    !is_reserved(&c.name)
                } else {
                    c.name.starts_with("lambda")
                }
            })
            .map(|(i, _)| statement.child(i))
            .filter(|p| Some(p) != event_operand.as_ref())
            .collect();

        Ok(Self {
            statement: statement.clone(),
            expr,
            simple_exist,
            body,
        })
    }

    pub fn evaluate(&self, ctx: &ApplicationContext, tree: &mut Node) -> InternalResult<bool> {
        let result = self.expr.evaluate(ctx, tree)?;
        debug!("condition at '{}' evaluated to {}", self.statement, result);
        Ok(result)
    }

    /// Bare existence test with no combinators and no `lambda` children;
    /// callers run the statement's own children as the branch body.
    pub fn is_simple_exist(&self) -> bool {
        self.simple_exist
    }

    /// Nodes to execute when the condition holds: the statement's ordinary
    /// children for a simple exist, its `lambda*` children otherwise.
    pub fn body(&self) -> &[NodePath] {
        &self.body
    }

    pub fn expr(&self) -> &BoolExpr {
        &self.expr
    }
}
