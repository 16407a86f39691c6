//! Active Events defined at runtime from lambda bodies.
//!
//! ```text
//! set-event: greet                 store the children as the body of 'greet'
//!   set: {"$expr": "/..?value"}
//!     src: "hello"
//!
//! greet                            raised like any other event; the body runs
//!                                  on its own copy, the value and nodes it
//!                                  appended are handed back
//! ```
//!
//! Bodies live in one table shared by every context and thread. The
//! table is only touched to store, remove or copy a body, never while one
//! is executing, so bodies can define, delete and raise other events.

use dashmap::DashMap;
use lazy_static::lazy_static;
use tracing::{debug, trace};

use super::{argument_names, execute};
use crate::{
    event::{is_valid_event_name, ActiveEventArgs, ApplicationContext, HandlerResult},
    expression::MatchType,
    node::{Node, NodePath, Value},
    Error,
};

lazy_static! {
    static ref GLOBAL_EVENTS: DynamicEvents = DynamicEvents::default();
}

/// Event name to lambda body.
#[derive(Debug, Default)]
pub struct DynamicEvents {
    events: DashMap<String, Node>,
}

impl DynamicEvents {
    pub fn global() -> &'static DynamicEvents {
        &GLOBAL_EVENTS
    }

    /// Stores `body`'s children under `name`, replacing an earlier body.
    pub fn define(&self, name: &str, body: Vec<Node>) {
        self.events
            .insert(name.to_string(), Node::new(name).with_children(body));
    }

    pub fn delete(&self, name: &str) -> bool {
        self.events.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    /// A copy of the body, so no entry stays borrowed while it runs.
    pub fn body(&self, name: &str) -> Option<Node> {
        self.events.get(name).map(|entry| entry.value().clone())
    }

    /// Defined names containing any of `filters` (all names when empty), sorted.
    pub fn names(&self, filters: &[String]) -> Vec<String> {
        let mut names: Vec<String> = self
            .events
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| matches_any(name, filters))
            .collect();
        names.sort();
        names
    }
}

fn matches_any(name: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|f| name.contains(f.as_str()))
}

/// `set-event: name` stores the children as the event's body. Without
/// children the event is removed.
pub(super) fn on_set_event(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    let name = match &args.args()?.value {
        Value::Expression(expression) => expression.evaluate_at(args.tree(), &path)?.single(),
        other => other.clone(),
    }
    .to_string();
    if !is_valid_event_name(&name) || name.starts_with('_') {
        return Err(Error::lambda(
            format!("'{}' cannot be used as an event name", name),
            &path,
        ));
    }
    if ctx.has_handlers(&name) {
        return Err(Error::lambda(
            format!("'{}' is already handled by a loaded module", name),
            &path,
        ));
    }

    let body = args.args()?.children.clone();
    if body.is_empty() {
        DynamicEvents::global().delete(&name);
        debug!("removed dynamic event '{}'", name);
    } else {
        debug!("defined dynamic event '{}' ({} statements)", name, body.len());
        DynamicEvents::global().define(&name, body);
    }
    Ok(())
}

pub(super) fn on_delete_events(_: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    for name in argument_names(args.tree(), &path)? {
        if DynamicEvents::global().delete(&name) {
            debug!("removed dynamic event '{}'", name);
        }
    }
    Ok(())
}

/// Replaces the arguments with one child per matching event, holding a copy
/// of its body.
pub(super) fn on_get_events(_: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    let filters = argument_names(args.tree(), &path)?;
    let store = DynamicEvents::global();
    let found: Vec<Node> = if filters.is_empty() {
        Vec::new()
    } else {
        store
            .names(&filters)
            .iter()
            .filter_map(|name| store.body(name))
            .collect()
    };
    let node = args.args_mut()?;
    node.value = Value::Null;
    node.children = found;
    Ok(())
}

/// Replaces the arguments with `dynamic: name` and `static: name` children,
/// optionally filtered by substring. Names starting with `_` are private.
pub(super) fn on_list_events(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    let filters = argument_names(args.tree(), &path)?;
    let node = args.args_mut()?;
    let given = !node.value.is_null();
    node.value = Value::Null;
    node.children.clear();
    // a filter expression that matched nothing lists nothing
    if given && filters.is_empty() {
        return Ok(());
    }

    let public = |name: &String| !name.starts_with('_');
    let dynamic = DynamicEvents::global().names(&filters);
    let statics = ctx
        .active_events()
        .into_iter()
        .filter(|name| matches_any(name, &filters));
    node.children = dynamic
        .into_iter()
        .filter(public)
        .map(|name| Node::with_value("dynamic", name))
        .chain(statics.filter(public).map(|name| Node::with_value("static", name)))
        .collect();
    Ok(())
}

/// Catch-all that runs the body stored under the raised name, if any.
///
/// The body executes as the root of its own tree. The caller's children
/// are appended after it, then whatever the caller's value yields (nodes as
/// they are, other values under `""`). Afterwards the caller keeps only the
/// nodes the body appended, and the value the body left on its root.
pub(super) fn on_dynamic(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let Some(mut lambda) = DynamicEvents::global().body(args.name()) else {
        return Ok(());
    };
    let path = args.path().clone();
    let passed = match &args.args()?.value {
        Value::Null => Vec::new(),
        Value::Expression(expression) => {
            let matched = expression.evaluate_at(args.tree(), &path)?;
            if expression.match_type() == MatchType::Count {
                vec![Node::with_value("", matched.single())]
            } else {
                matched.values().map(as_argument).collect()
            }
        }
        other => vec![as_argument(other)],
    };

    let node = args.args_mut()?;
    lambda.children.append(&mut node.children);
    lambda.children.extend(passed);
    let before = lambda.len();
    trace!("running dynamic event '{}' with {} nodes", lambda.name, before);

    execute(ctx, &mut lambda, &NodePath::root())?;

    let node = args.args_mut()?;
    node.children = lambda.children.split_off(before.min(lambda.len()));
    node.value = lambda.value;
    Ok(())
}

fn as_argument(value: &Value) -> Node {
    match value {
        Value::Node(node) => node.as_ref().clone(),
        other => Node::with_value("", other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_define_replace_and_delete() {
        let store = DynamicEvents::default();
        store.define("unit.a", vec![Node::new("x")]);
        store.define("unit.a", vec![Node::new("y"), Node::new("z")]);
        store.define("unit.b", vec![Node::new("x")]);
        assert_eq!(store.body("unit.a").unwrap().len(), 2);
        assert_eq!(store.names(&[]), vec!["unit.a", "unit.b"]);
        assert_eq!(store.names(&["b".to_string()]), vec!["unit.b"]);
        assert!(store.delete("unit.a"));
        assert!(!store.delete("unit.a"));
        assert!(!store.contains("unit.a"));
    }

    #[test]
    fn test_node_values_are_passed_as_nodes() {
        assert_eq!(as_argument(&Value::from(Node::with_value("k", 1))), Node::with_value("k", 1));
        assert_eq!(as_argument(&Value::from(3)), Node::with_value("", 3));
    }
}
