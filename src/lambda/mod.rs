//! # Lambda
//!
//! Control-flow keywords as ordinary Active Events. A lambda is any node
//! whose children are statements; executing it raises each statement by its
//! name with the statement node as arguments.
//!
//! ```text
//! eval
//!   _data: 5                       skipped, data only
//!   set: {"$expr": "/../_data?value"}
//!     src: 7
//!   if: {"$expr": "/../_data?value"}
//!     =: 7
//!     lambda
//!       log.info: "seven"
//! ```
//!
//! | Event     | Arguments                                            |
//! |-----------|------------------------------------------------------|
//! | `eval`    | statements as children                               |
//! | `if`      | condition statement, body                            |
//! | `else-if` | like `if`, skipped once its chain ran a branch       |
//! | `else`    | body, runs when no earlier branch of the chain ran   |
//! | `while`   | condition statement, body; re-read every iteration   |
//! | `set`     | destination expression, `src` child                  |
//! | `fork`    | statements, run on a copy in a worker thread         |
//! | `wait`    | timeout ms (optional), statements containing `fork`  |
//! | `lock`    | lock name(s), statements                             |
//!
//! `set-event`, `delete-events`, `get-events` and `list-events` manage
//! events whose handlers are lambda bodies, see [`DynamicEvents`].
//!
//! Expressions in keyword values, `src` values and conditions are formatted
//! with the `""` children of the node holding them before use, see
//! [`Expression::format`](crate::Expression::format).

mod branching;
mod events;
mod threads;

pub use events::DynamicEvents;

use tracing::trace;

use crate::{
    event::{ActiveEventArgs, ApplicationContext, HandlerResult, Module},
    node::{Node, NodePath, Value},
    Error,
};

pub const MODULE_NAME: &str = "lambda";

/// All built-in keywords as one loadable module.
pub fn module() -> Module {
    Module::builder(MODULE_NAME)
        .event("eval", on_eval)
        .event("set", on_set)
        .event("if", branching::on_if)
        .event("else-if", branching::on_else_if)
        .event("else", branching::on_else)
        .event("while", branching::on_while)
        .event("fork", threads::on_fork)
        .event("wait", threads::on_wait)
        .event("lock", threads::on_lock)
        .event("set-event", events::on_set_event)
        .event("delete-events", events::on_delete_events)
        .event("get-events", events::on_get_events)
        .event("list-events", events::on_list_events)
        .catch_all(events::on_dynamic)
        .build()
}

/// Statements are named; `_`-prefixed nodes carry data.
pub fn is_statement(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('_')
}

/// Raises every statement child of the node at `path`, in order.
///
/// The child list is re-read after every statement, so statements may add
/// siblings that run later in the same pass.
pub fn execute(ctx: &ApplicationContext, tree: &mut Node, path: &NodePath) -> HandlerResult {
    let _block = branching::BlockScope::enter();
    let mut index = 0;
    loop {
        let Some(name) = tree
            .get(path)
            .and_then(|node| node.children.get(index))
            .map(|child| child.name.clone())
        else {
            return Ok(());
        };
        if is_statement(&name) {
            let statement = path.child(index);
            trace!("executing '{}' at '{}'", name, statement);
            ctx.raise_at(&name, tree, &statement)?;
        }
        index += 1;
    }
}

fn on_eval(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    execute(ctx, args.tree_mut(), &path)
}

/// `set`'s value picks the destination; the `src` child supplies what is
/// written. Without `src`, `?value` destinations are nulled and `?node`
/// destinations removed.
fn on_set(_: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    let destination = match &args.args()?.value {
        Value::Expression(expression) => expression.format(args.tree(), &path)?,
        other => {
            return Err(Error::lambda(
                format!("'set' needs an expression as destination, got {}", other.type_name()),
                &path,
            ))
        }
    };
    let source = source_value(args.tree(), &path)?;
    let touched = destination.assign(args.tree_mut(), &path, source)?;
    trace!("'set' at '{}' touched {} nodes", path, touched);
    Ok(())
}

/// Names given to a keyword: every value its expression yields, or its
/// constant value followed by the values of its `""` children. An
/// expression takes the `""` children as its format parameters instead.
pub(crate) fn argument_names(tree: &Node, path: &NodePath) -> Result<Vec<String>, Error> {
    let Some(node) = tree.get(path) else {
        return Ok(Vec::new());
    };
    let mut names: Vec<String> = match &node.value {
        Value::Null => Vec::new(),
        Value::Expression(expression) => {
            return Ok(expression
                .evaluate_at(tree, path)?
                .values()
                .map(|v| v.to_string())
                .collect())
        }
        other => vec![other.to_string()],
    };
    names.extend(
        node.children
            .iter()
            .filter(|c| c.name.is_empty() && !c.value.is_null())
            .map(|c| c.value.to_string()),
    );
    Ok(names)
}

fn source_value(tree: &Node, path: &NodePath) -> Result<Value, Error> {
    let Some(index) = tree
        .get(path)
        .and_then(|node| node.children.iter().position(|c| c.name == "src"))
    else {
        return Ok(Value::Null);
    };
    let src_path = path.child(index);
    let Some(src) = tree.get(&src_path) else {
        return Ok(Value::Null);
    };
    Ok(match &src.value {
        Value::Expression(expression) => expression.evaluate_at(tree, &src_path)?.single(),
        Value::Null => src
            .first_child()
            .map(|child| Value::from(child.clone()))
            .unwrap_or_default(),
        other => other.clone(),
    })
}
