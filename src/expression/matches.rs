use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::{ExpressionError, ExpressionResult};
use crate::node::{FromValue, Node, NodePath, Value};

/// What an expression yields for every matched node, selected by the `?type`
/// suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MatchType {
    Node,
    Name,
    Value,
    Path,
    Count,
}

/// Target of a `=:type:` value match or a `?value.type` cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Int,
    Float,
    Bool,
    String,
    Date,
    Path,
}

impl ValueType {
    pub fn convert(&self, value: &Value) -> Result<Value, crate::node::NodeError> {
        Ok(match self {
            ValueType::Int => Value::Integer(i64::from_value(value)?),
            ValueType::Float => Value::Float(f64::from_value(value)?),
            ValueType::Bool => Value::Boolean(bool::from_value(value)?),
            ValueType::String => Value::String(String::from_value(value)?),
            ValueType::Date => Value::DateTime(DateTime::<Utc>::from_value(value)?),
            ValueType::Path => Value::Path(NodePath::from_value(value)?),
        })
    }

    pub fn parse_literal(&self, literal: &str) -> Result<Value, crate::node::NodeError> {
        self.convert(&Value::String(literal.to_string()))
    }
}

/// The projection suffix: match type plus optional cast.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub match_type: MatchType,
    pub cast: Option<ValueType>,
}

impl Projection {
    pub fn parse(expression: &str, token: &str) -> ExpressionResult<Self> {
        let syntax = |message: String| ExpressionError::Syntax {
            expression: expression.to_string(),
            message,
        };
        let (kind, cast) = match token.split_once('.') {
            Some((kind, cast)) => (kind, Some(cast)),
            None => (token, None),
        };
        let match_type = MatchType::from_str(kind.trim())
            .map_err(|_| syntax(format!("type declaration '{}' is not valid", token)))?;
        let cast = cast
            .map(|c| {
                ValueType::from_str(c.trim())
                    .map_err(|_| syntax(format!("unknown conversion type '{}'", c)))
            })
            .transpose()?;
        Ok(Self { match_type, cast })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchEntity {
    /// Where the matched node lives in the evaluated tree.
    pub path: NodePath,
    /// The projected value: name as a string, the node's value, its path, or
    /// a detached copy of the node.
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub match_type: MatchType,
    pub entities: Vec<MatchEntity>,
    count: usize,
}

impl Match {
    pub(crate) fn collect(
        expression: &str,
        root: &Node,
        projection: &Projection,
        paths: impl Iterator<Item = NodePath>,
    ) -> ExpressionResult<Self> {
        if projection.match_type == MatchType::Count {
            return Ok(Self {
                match_type: MatchType::Count,
                entities: Vec::new(),
                count: paths.count(),
            });
        }
        let mut entities = Vec::new();
        for path in paths {
            let Some(node) = root.get(&path) else {
                continue;
            };
            let value = match projection.match_type {
                MatchType::Name => Value::String(node.name.clone()),
                MatchType::Value => node.value.clone(),
                MatchType::Path => Value::Path(path.clone()),
                MatchType::Node | MatchType::Count => Value::Node(Box::new(node.clone())),
            };
            let value = match projection.cast {
                Some(cast) if !value.is_null() => {
                    cast.convert(&value).map_err(|_| ExpressionError::Cast {
                        expression: expression.to_string(),
                        value: value.to_string(),
                        target: cast.to_string(),
                    })?
                }
                _ => value,
            };
            entities.push(MatchEntity { path, value });
        }
        Ok(Self {
            match_type: projection.match_type,
            count: entities.len(),
            entities,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entities.iter().map(|e| &e.value)
    }

    pub fn paths(&self) -> impl Iterator<Item = &NodePath> {
        self.entities.iter().map(|e| &e.path)
    }

    /// Collapses the match into one value: the count, the single projected
    /// value, or for several values their concatenated string forms.
    pub fn single(&self) -> Value {
        if self.match_type == MatchType::Count {
            return Value::from(self.count);
        }
        match self.entities.as_slice() {
            [] => Value::Null,
            [only] => only.value.clone(),
            many => Value::String(many.iter().map(|e| e.value.to_string()).collect()),
        }
    }
}
