//! # Expressions
//!
//! A path language over [`Node`] trees. An expression is compiled once into a
//! chain of iterator steps and can then be evaluated any number of times;
//! every evaluation walks the live tree again.
//!
//! ```text
//!   /*/c?value
//!   │ │ │ └── projection: what each match yields (node|name|value|path|count)
//!   │ │ └──── children named "c"
//!   │ └────── all children
//!   └──────── step separator
//! ```
//!
//! Steps:
//!
//! | token            | meaning                                            |
//! |------------------|----------------------------------------------------|
//! | `..`             | root of the tree                                   |
//! | `*` / `**`       | children / self and every descendant (pre-order)   |
//! | `.` / `..name`   | parent / nearest ancestor named `name`             |
//! | `name`, `\*`     | children with that name (`\` escapes)              |
//! | `"/re/flags"`    | children whose name matches a regex                |
//! | `3`              | child at index 3                                   |
//! | `[2,5]`, `2-5`   | upstream items 2, 3 and 4                          |
//! | `%2`             | every second upstream item                         |
//! | `+1`, `-`, `<`, `>` | sibling offsets, previous/next in document order |
//! | `=text`, `=:int:5`, `="/re/"` | keep upstream nodes by value          |
//! | `#`              | follow a node whose value is a path                |
//!
//! Steps may be combined with `|` (or), `&` (and), `^` (xor) and `!` (not),
//! and grouped with parentheses: `/..(/a|/b)/*?name`. A `/` directly before
//! a delimiter stands for the empty name, as in `//` or `/a/?node`.
//!
//! An expression held by a node may contain `{0}`, `{1}`, ... placeholders.
//! [`Expression::format`] fills them from that node's `""` children before
//! evaluation, so `/[{0},{1}]?name` with children `"": 1` and `"": 3` becomes
//! `/[1,3]?name`. Until formatted, a step with a placeholder is a plain name.
//!
//! Evaluation is lazy. Each step is an iterator pulling from the one before
//! it, so a plain step chain evaluated with `?count` never collects the
//! matched nodes. Logical groups are the exception: they dedupe their
//! results and keep every matched path in a set.

mod iterator;
mod logical;
mod matches;
mod tokenizer;

use std::{fmt, str::FromStr, sync::Arc};

use regex::RegexBuilder;
use thiserror::Error;
use tracing::{debug, trace};

use crate::node::{Node, NodePath, Value};
use iterator::{Paths, RegexMatcher, Step, ValueMatcher};
use logical::{Group, LogicalKind};
use tokenizer::{tokenize, Token};

pub use matches::{Match, MatchEntity, MatchType, Projection, ValueType};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Syntax error in expression '{expression}': {message}")]
    Syntax { expression: String, message: String },
    #[error("Invalid regular expression '{token}' in expression '{expression}': {message}")]
    Regex {
        expression: String,
        token: String,
        message: String,
    },
    #[error("Cannot convert '{value}' to {target} in expression '{expression}'")]
    Cast {
        expression: String,
        value: String,
        target: String,
    },
    #[error("Cannot assign through expression '{expression}': {message}")]
    Assign { expression: String, message: String },
}

pub type ExpressionResult<T> = Result<T, ExpressionError>;

struct Compiled {
    source: String,
    group: Group,
    projection: Projection,
}

/// A compiled, immutable expression. Cloning is cheap.
#[derive(Clone)]
pub struct Expression {
    inner: Arc<Compiled>,
}

impl Expression {
    #[tracing::instrument(level = "debug")]
    pub fn parse(source: &str) -> ExpressionResult<Self> {
        let compiled = Parser::new(source).parse()?;
        debug!(
            "compiled expression '{}' as {}",
            source, compiled.projection.match_type
        );
        Ok(Self {
            inner: Arc::new(compiled),
        })
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn match_type(&self) -> MatchType {
        self.inner.projection.match_type
    }

    pub fn projection(&self) -> &Projection {
        &self.inner.projection
    }

    /// Lazily yields the paths of matched nodes. A `start` that does not
    /// resolve inside `root` yields nothing.
    pub fn paths<'a>(&'a self, root: &'a Node, start: &NodePath) -> Paths<'a> {
        if root.get(start).is_none() {
            return Box::new(std::iter::empty());
        }
        self.inner
            .group
            .evaluate(root, Box::new(std::iter::once(start.clone())))
    }

    pub fn evaluate(&self, root: &Node, start: &NodePath) -> ExpressionResult<Match> {
        Match::collect(
            self.source(),
            root,
            &self.inner.projection,
            self.paths(root, start),
        )
    }

    pub fn count(&self, root: &Node, start: &NodePath) -> usize {
        self.paths(root, start).count()
    }

    /// Substitutes each `{n}` with the n-th `""` child of the node at `at`
    /// and compiles the result. Without placeholders or parameters the
    /// expression is returned as it is.
    ///
    /// A parameter holding an expression contributes its matched values
    /// (formatted with its own `""` children first), a string parameter is
    /// itself formatted with its `""` children, anything else is used as text.
    pub fn format(&self, root: &Node, at: &NodePath) -> ExpressionResult<Expression> {
        if !has_placeholder(self.source()) {
            return Ok(self.clone());
        }
        let formatted = format_text(self.source(), root, at)?;
        if formatted == self.source() {
            return Ok(self.clone());
        }
        trace!("formatted '{}' into '{}'", self.source(), formatted);
        Expression::parse(&formatted)
    }

    /// [`Expression::format`] followed by [`Expression::evaluate`], for an
    /// expression held by the node at `at`.
    pub fn evaluate_at(&self, root: &Node, at: &NodePath) -> ExpressionResult<Match> {
        self.format(root, at)?.evaluate(root, at)
    }

    /// Writes `value` into every match according to the projection: `?name`
    /// renames, `?value` sets values, `?node` replaces matched nodes with a
    /// copy of a node value or removes them when `value` is null.
    ///
    /// Returns how many nodes were touched.
    pub fn assign(&self, root: &mut Node, start: &NodePath, value: Value) -> ExpressionResult<usize> {
        let mut paths: Vec<NodePath> = self.paths(root, start).collect();
        // Deepest and latest first, so earlier paths stay valid while removing.
        paths.sort_by(|a, b| b.cmp(a));
        let fail = |message: String| ExpressionError::Assign {
            expression: self.source().to_string(),
            message,
        };
        match self.match_type() {
            MatchType::Name => {
                let name = value.to_string();
                for path in &paths {
                    if let Some(node) = root.get_mut(path) {
                        node.name = name.clone();
                    }
                }
            }
            MatchType::Value => {
                for path in &paths {
                    if let Some(node) = root.get_mut(path) {
                        node.value = value.clone();
                    }
                }
            }
            MatchType::Node => match &value {
                Value::Null => {
                    for path in &paths {
                        root.detach(path).map_err(|e| fail(e.to_string()))?;
                    }
                }
                Value::Node(replacement) => {
                    for path in &paths {
                        root.replace(path, replacement.as_ref().clone())
                            .map_err(|e| fail(e.to_string()))?;
                    }
                }
                other => {
                    return Err(fail(format!(
                        "a {} value cannot replace a node",
                        other.type_name()
                    )))
                }
            },
            other => return Err(fail(format!("?{} results are read-only", other))),
        }
        Ok(paths.len())
    }
}

/// Whether `text` holds a `{n}` placeholder.
fn has_placeholder(text: &str) -> bool {
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        rest = &rest[open + 1..];
        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        if digits > 0 && rest[digits..].starts_with('}') {
            return true;
        }
    }
    false
}

fn format_text(template: &str, root: &Node, at: &NodePath) -> ExpressionResult<String> {
    let Some(node) = root.get(at) else {
        return Ok(template.to_string());
    };
    let parameters: Vec<NodePath> = node
        .children
        .iter()
        .enumerate()
        .filter(|(_, c)| c.name.is_empty())
        .map(|(i, _)| at.child(i))
        .collect();
    let mut text = template.to_string();
    for (index, parameter) in parameters.iter().enumerate() {
        let placeholder = format!("{{{}}}", index);
        if !text.contains(&placeholder) {
            continue;
        }
        let Some(param) = root.get(parameter) else {
            continue;
        };
        let replacement = match &param.value {
            Value::Expression(expression) => expression.evaluate_at(root, parameter)?.single().to_string(),
            Value::String(inner) => format_text(inner, root, parameter)?,
            other => other.to_string(),
        };
        text = text.replace(&placeholder, &replacement);
    }
    Ok(text)
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expression({})", self.source())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source())
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.source() == other.source()
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::parse(s)
    }
}

struct Parser<'s> {
    source: &'s str,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        Self { source }
    }

    fn syntax(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            expression: self.source.to_string(),
            message: message.into(),
        }
    }

    fn parse(&self) -> ExpressionResult<Compiled> {
        let tokens = tokenize(self.source)?;
        let mut groups: Vec<Group> = vec![Group::default()];
        let mut previous: Option<&Token> = None;
        let mut projection = None;

        for (index, token) in tokens.iter().enumerate() {
            if previous.is_some_and(|p| p.is('?')) {
                let Token::Segment { text, quoted: None } = token else {
                    return Err(self.syntax("expected a type declaration after '?'"));
                };
                if index + 1 != tokens.len() {
                    return Err(self.syntax("unexpected tokens after the type declaration"));
                }
                projection = Some(Projection::parse(self.source, text)?);
                break;
            }
            if previous.is_none() && !token.is('/') && !token.is('?') {
                return Err(self.syntax("missing iterator declaration, expressions start with '/'"));
            }
            let after_slash = previous.is_some_and(|p| p.is('/'));
            let current = groups
                .last_mut()
                .ok_or_else(|| self.syntax("unbalanced groups"))?;
            match token {
                Token::Delimiter('/') | Token::Delimiter('?') => {
                    if after_slash {
                        current.push_step(Step::Named(String::new()));
                    }
                }
                Token::Delimiter('(') => {
                    if after_slash {
                        current.push_step(Step::Named(String::new()));
                    }
                    groups.push(Group::default());
                }
                Token::Delimiter(')') => {
                    if after_slash {
                        current.push_step(Step::Named(String::new()));
                    }
                    if groups.len() < 2 {
                        return Err(self.syntax("closing ')' has no matching '('"));
                    }
                    if let Some(closed) = groups.pop() {
                        if let Some(parent) = groups.last_mut() {
                            parent.push_step(Step::Group(closed));
                        }
                    }
                }
                Token::Delimiter(c) => {
                    if after_slash {
                        current.push_step(Step::Named(String::new()));
                    }
                    let kind = LogicalKind::from_delimiter(*c)
                        .ok_or_else(|| self.syntax(format!("unexpected '{}'", c)))?;
                    current.push_logical(kind);
                }
                Token::Segment { text, quoted } => {
                    let step = self.parse_step(text, quoted.as_deref())?;
                    current.push_step(step);
                }
            }
            previous = Some(token);
        }

        if groups.len() > 1 {
            return Err(self.syntax("group was not closed, missing ')'"));
        }
        let projection =
            projection.ok_or_else(|| self.syntax("missing type declaration, e.g. '?node'"))?;
        let group = groups.pop().unwrap_or_default();
        Ok(Compiled {
            source: self.source.to_string(),
            group,
            projection,
        })
    }

    fn parse_step(&self, text: &str, quoted: Option<&str>) -> ExpressionResult<Step> {
        // unformatted placeholder, kept as a plain name
        if has_placeholder(text) || quoted.is_some_and(has_placeholder) {
            return Ok(Step::Named(format!("{}{}", text, quoted.unwrap_or_default())));
        }
        if let Some(literal) = quoted {
            return match text {
                "" if literal.starts_with('/') => Ok(Step::NameRegex(self.parse_regex(literal)?)),
                "" => Ok(Step::Named(literal.to_string())),
                "=" if literal.starts_with('/') => Ok(Step::ValueRegex(self.parse_regex(literal)?)),
                _ if text.starts_with('=') => self.parse_value(&text[1..], Some(literal)),
                _ => Err(self.syntax(format!("unexpected string literal after '{}'", text))),
            };
        }
        match text {
            ".." => return Ok(Step::Root),
            "*" => return Ok(Step::Children),
            "**" => return Ok(Step::Flatten),
            "." => return Ok(Step::Parent),
            "#" => return Ok(Step::Reference),
            "<" => return Ok(Step::ShiftLeft),
            ">" => return Ok(Step::ShiftRight),
            _ => {}
        }
        if let Some(rest) = text.strip_prefix('=') {
            self.parse_value(rest, None)
        } else if text.starts_with('[') {
            self.parse_range(text)
        } else if let Some(name) = text.strip_prefix("..") {
            Ok(Step::NamedAncestor(name.to_string()))
        } else if let Some(n) = text.strip_prefix('%') {
            match n.trim().parse::<usize>() {
                Ok(n) if n > 0 => Ok(Step::Modulo(n)),
                _ => Err(self.syntax(format!(
                    "modulo token '{}' expects a positive integer",
                    text
                ))),
            }
        } else if text.starts_with('+') || text.starts_with('-') {
            self.parse_sibling(text)
        } else if let Some(name) = text.strip_prefix('\\') {
            Ok(Step::Named(name.to_string()))
        } else if let Ok(index) = text.parse::<usize>() {
            Ok(Step::Numbered(index))
        } else if let Some((start, end)) = numeric_pair(text) {
            self.range(text, Some(start), Some(end))
        } else {
            Ok(Step::Named(text.to_string()))
        }
    }

    fn parse_value(&self, rest: &str, literal: Option<&str>) -> ExpressionResult<Step> {
        let Some(typed) = rest.strip_prefix(':') else {
            let text = match literal {
                Some(literal) if rest.is_empty() => literal.to_string(),
                Some(_) => return Err(self.syntax(format!("unexpected string literal after '={}'", rest))),
                None => rest.to_string(),
            };
            return Ok(Step::Valued(ValueMatcher::Text(text)));
        };
        let (type_name, inline) = typed
            .split_once(':')
            .ok_or_else(|| self.syntax(format!("unterminated type declaration in '={}'", rest)))?;
        let value_type = ValueType::from_str(type_name)
            .map_err(|_| self.syntax(format!("unknown value type '{}'", type_name)))?;
        let raw = match literal {
            Some(literal) if inline.is_empty() => literal,
            Some(_) => return Err(self.syntax(format!("unexpected string literal after '={}'", rest))),
            None => inline,
        };
        let value = value_type
            .parse_literal(raw)
            .map_err(|e| self.syntax(format!("invalid {} literal '{}': {}", value_type, raw, e)))?;
        Ok(Step::Valued(ValueMatcher::Typed(value)))
    }

    fn parse_range(&self, text: &str) -> ExpressionResult<Step> {
        let inner = text
            .strip_prefix('[')
            .and_then(|t| t.trim_end().strip_suffix(']'))
            .ok_or_else(|| self.syntax(format!("range token '{}' has no closing ']'", text)))?;
        let (start, end) = inner
            .split_once(',')
            .ok_or_else(|| self.syntax(format!("range token '{}' needs a ',' between its bounds", text)))?;
        let bound = |s: &str| -> ExpressionResult<Option<usize>> {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<usize>()
                .map(Some)
                .map_err(|_| self.syntax(format!("range token '{}' expects integer bounds", text)))
        };
        self.range(text, bound(start)?, bound(end)?)
    }

    fn range(&self, text: &str, start: Option<usize>, end: Option<usize>) -> ExpressionResult<Step> {
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Err(self.syntax(format!(
                    "range token '{}': end must be larger than start",
                    text
                )));
            }
        }
        Ok(Step::Range { start, end })
    }

    fn parse_sibling(&self, text: &str) -> ExpressionResult<Step> {
        let (sign, digits) = text.split_at(1);
        let offset = if digits.is_empty() {
            1
        } else {
            digits.parse::<isize>().map_err(|_| {
                self.syntax(format!("sibling token '{}' expects an integer offset", text))
            })?
        };
        Ok(Step::Sibling(if sign == "+" { offset } else { -offset }))
    }

    fn parse_regex(&self, literal: &str) -> ExpressionResult<RegexMatcher> {
        let regex_error = |message: String| ExpressionError::Regex {
            expression: self.source.to_string(),
            token: literal.to_string(),
            message,
        };
        let close = literal
            .rfind('/')
            .filter(|i| *i > 0)
            .ok_or_else(|| regex_error("missing '/' at end of regex".to_string()))?;
        let pattern = &literal[1..close];
        let mut builder = RegexBuilder::new(pattern);
        let mut distinct = false;
        for flag in literal[close + 1..].chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'w' => {
                    builder.ignore_whitespace(true);
                }
                'd' => distinct = true,
                // compiled, ecma, right-to-left, culture-invariant
                'c' | 'e' | 'r' | 'l' => {}
                other => return Err(regex_error(format!("'{}' is not a recognized regex option", other))),
            }
        }
        let regex = builder.build().map_err(|e| regex_error(e.to_string()))?;
        Ok(RegexMatcher { regex, distinct })
    }
}

/// `2-5` style range shorthand.
fn numeric_pair(text: &str) -> Option<(usize, usize)> {
    let (start, end) = text.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}
