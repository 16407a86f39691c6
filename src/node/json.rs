//! JSON boundary for node trees.
//!
//! A node is `{"name": ..., "value": ..., "children": [...]}`; `value` and
//! `children` may be omitted. Scalars map to their JSON counterparts, other
//! value types use a single-key tagged object:
//! `{"$expr": "/*?name"}`, `{"$date": "2024-01-01T00:00:00Z"}`,
//! `{"$path": "0-1"}`, `{"$bytes": [1, 2]}`, `{"$node": {...}}`,
//! `{"$nodes": [...]}`.

use serde_json::{json, Map};

use super::{Node, NodePath, Value};
use crate::{expression::Expression, Error, InternalResult};

pub fn to_json(node: &Node) -> serde_json::Value {
    let mut object = Map::new();
    object.insert("name".to_string(), json!(node.name));
    if !node.value.is_null() {
        object.insert("value".to_string(), value_to_json(&node.value));
    }
    if !node.children.is_empty() {
        let children: Vec<_> = node.children.iter().map(to_json).collect();
        object.insert("children".to_string(), serde_json::Value::Array(children));
    }
    serde_json::Value::Object(object)
}

pub fn from_json(json: &serde_json::Value) -> InternalResult<Node> {
    let object = json
        .as_object()
        .ok_or_else(|| Error::internal(format!("Expected a node object, got {}", json)))?;
    let name = match object.get("name") {
        Some(serde_json::Value::String(s)) => s.clone(),
        None | Some(serde_json::Value::Null) => String::new(),
        Some(other) => return Err(Error::internal(format!("Node name must be a string: {}", other))),
    };
    let value = match object.get("value") {
        Some(v) => value_from_json(v)?,
        None => Value::Null,
    };
    let children = match object.get("children") {
        Some(serde_json::Value::Array(items)) => {
            items.iter().map(from_json).collect::<InternalResult<Vec<_>>>()?
        }
        None => Vec::new(),
        Some(other) => return Err(Error::internal(format!("Node children must be an array: {}", other))),
    };
    Ok(Node {
        name,
        value,
        children,
    })
}

pub fn from_str(s: &str) -> InternalResult<Node> {
    let json: serde_json::Value = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse node json: {}", e)))?;
    from_json(&json)
}

pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::String(s) => json!(s),
        Value::Integer(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Boolean(b) => json!(b),
        Value::DateTime(d) => json!({ "$date": d.to_rfc3339() }),
        Value::Bytes(bytes) => json!({ "$bytes": bytes }),
        Value::Path(path) => json!({ "$path": path.to_string() }),
        Value::Node(node) => json!({ "$node": to_json(node) }),
        Value::NodeList(nodes) => {
            json!({ "$nodes": nodes.iter().map(to_json).collect::<Vec<_>>() })
        }
        Value::Expression(expression) => json!({ "$expr": expression.source() }),
        // Host objects do not cross the boundary.
        Value::Opaque(opaque) => json!(format!("[{}]", opaque.type_name())),
    }
}

pub fn value_from_json(json: &serde_json::Value) -> InternalResult<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(_) => {
            return Err(Error::internal(
                "Arrays are not node values; use children or {\"$nodes\": [...]}",
            ))
        }
        serde_json::Value::Object(object) => tagged_value(object)?,
    })
}

fn tagged_value(object: &Map<String, serde_json::Value>) -> InternalResult<Value> {
    let (tag, inner) = match object.iter().next() {
        Some(entry) if object.len() == 1 => entry,
        _ => return Err(Error::internal("Tagged values must have exactly one key")),
    };
    let text = || {
        inner
            .as_str()
            .ok_or_else(|| Error::internal(format!("{} expects a string", tag)))
    };
    match tag.as_str() {
        "$expr" => Ok(Value::Expression(Expression::parse(text()?)?)),
        "$date" => {
            let date = chrono::DateTime::parse_from_rfc3339(text()?)
                .map_err(|e| Error::internal(format!("Invalid date: {}", e)))?;
            Ok(Value::DateTime(date.with_timezone(&chrono::Utc)))
        }
        "$path" => Ok(Value::Path(text()?.parse::<NodePath>()?)),
        "$bytes" => {
            let bytes: Vec<u8> = serde_json::from_value(inner.clone())
                .map_err(|e| Error::internal(format!("Invalid bytes: {}", e)))?;
            Ok(Value::Bytes(bytes))
        }
        "$node" => Ok(Value::Node(Box::new(from_json(inner)?))),
        "$nodes" => match inner {
            serde_json::Value::Array(items) => Ok(Value::NodeList(
                items.iter().map(from_json).collect::<InternalResult<Vec<_>>>()?,
            )),
            _ => Err(Error::internal("$nodes expects an array")),
        },
        other => Err(Error::internal(format!("Unknown value tag: {}", other))),
    }
}
