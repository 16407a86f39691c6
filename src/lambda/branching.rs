use std::cell::RefCell;

use tracing::debug;

use super::execute;
use crate::{
    condition::Condition,
    event::{ActiveEventArgs, ApplicationContext, HandlerResult},
    node::{Node, NodePath},
    Error,
};

thread_local! {
    /// Last `if`/`else-if` outcome of each block executing on this thread,
    /// innermost last.
    static BRANCHES: RefCell<Vec<Option<Branch>>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone)]
struct Branch {
    statement: NodePath,
    taken: bool,
}

/// Opens a fresh branch record for a block of statements; closed on drop.
pub(super) struct BlockScope;

impl BlockScope {
    pub(super) fn enter() -> Self {
        BRANCHES.with(|frames| frames.borrow_mut().push(None));
        BlockScope
    }
}

impl Drop for BlockScope {
    fn drop(&mut self) {
        BRANCHES.with(|frames| frames.borrow_mut().pop());
    }
}

fn record(statement: &NodePath, taken: bool) {
    BRANCHES.with(|frames| {
        if let Some(frame) = frames.borrow_mut().last_mut() {
            *frame = Some(Branch {
                statement: statement.clone(),
                taken,
            });
        }
    });
}

/// Whether the chain ending at `previous` already ran one of its branches.
fn chain_taken(previous: &NodePath) -> bool {
    BRANCHES.with(|frames| {
        matches!(
            frames.borrow().last(),
            Some(Some(branch)) if branch.statement == *previous && branch.taken
        )
    })
}

/// `else-if` and `else` must directly follow an `if` or `else-if`.
fn previous_branch(tree: &Node, path: &NodePath, keyword: &str) -> Result<NodePath, Error> {
    path.sibling(-1)
        .filter(|previous| {
            tree.get(previous)
                .is_some_and(|n| n.name == "if" || n.name == "else-if")
        })
        .ok_or_else(|| {
            Error::lambda(
                format!("'{}' must follow an 'if' or 'else-if'", keyword),
                path,
            )
        })
}

pub(super) fn on_if(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    branch(ctx, args.tree_mut(), &path)
}

pub(super) fn on_else_if(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    let previous = previous_branch(args.tree(), &path, "else-if")?;
    if chain_taken(&previous) {
        record(&path, true);
        return Ok(());
    }
    branch(ctx, args.tree_mut(), &path)
}

/// Runs `lambda*` children when there are any, otherwise its own statements.
pub(super) fn on_else(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    let previous = previous_branch(args.tree(), &path, "else")?;
    let taken = chain_taken(&previous);
    record(&path, true);
    if taken {
        return Ok(());
    }
    let lambdas: Vec<NodePath> = args
        .args()?
        .children
        .iter()
        .enumerate()
        .filter(|(_, c)| c.name.starts_with("lambda"))
        .map(|(i, _)| path.child(i))
        .collect();
    if lambdas.is_empty() {
        return execute(ctx, args.tree_mut(), &path);
    }
    for lambda in &lambdas {
        execute(ctx, args.tree_mut(), lambda)?;
    }
    Ok(())
}

fn branch(ctx: &ApplicationContext, tree: &mut Node, path: &NodePath) -> HandlerResult {
    let condition = Condition::parse(tree, path)?;
    let taken = condition.evaluate(ctx, tree)?;
    record(path, taken);
    if taken {
        run_body(ctx, tree, &condition)?;
    }
    Ok(())
}

pub(super) fn on_while(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    let mut iterations = 0usize;
    loop {
        // The body may rewrite the statement, so it is read again each round.
        let condition = Condition::parse(args.tree(), &path)?;
        if !condition.evaluate(ctx, args.tree_mut())? {
            break;
        }
        run_body(ctx, args.tree_mut(), &condition)?;
        iterations += 1;
    }
    debug!("'while' at '{}' ran {} times", path, iterations);
    Ok(())
}

fn run_body(ctx: &ApplicationContext, tree: &mut Node, condition: &Condition) -> HandlerResult {
    let _block = BlockScope::enter();
    for statement in condition.body() {
        if condition.is_simple_exist() {
            let Some(name) = tree.get(statement).map(|n| n.name.clone()) else {
                continue;
            };
            if super::is_statement(&name) {
                ctx.raise_at(&name, tree, statement)?;
            }
        } else {
            execute(ctx, tree, statement)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lambda::tests::context, node::Value, Expression};
    use pretty_assertions::assert_eq;

    fn expr(source: &str) -> Value {
        Value::Expression(Expression::parse(source).unwrap())
    }

    #[test]
    fn test_if_with_lambda_body() {
        let ctx = context();
        let mut tree = Node::new("eval").with_child(
            Node::with_value("if", 3)
                .with_child(Node::with_value(">", 2))
                .with_child(Node::new("lambda").with_child(Node::new("test.append"))),
        );
        ctx.raise("eval", &mut tree).unwrap();
        let lambda = &tree.children[0].children[1];
        assert_eq!(lambda.children[0].children, vec![Node::new("appended")]);
    }

    #[test]
    fn test_if_simple_exist_runs_own_children() {
        let ctx = context();
        let mut tree = Node::new("eval")
            .with_child(Node::with_value("if", "yes").with_child(Node::new("test.append")))
            .with_child(Node::new("if").with_child(Node::new("_data")));
        ctx.raise("eval", &mut tree).unwrap();
        assert_eq!(tree.children[0].children[0].len(), 1);
        assert!(tree.children[1].children[0].is_empty());
    }

    fn chain(value: i64) -> Node {
        let set_ran = |tag: &str| {
            Node::with_value("set", expr("/../_ran?value")).with_child(Node::with_value("src", tag))
        };
        Node::new("eval")
            .with_child(Node::with_value("_x", value))
            .with_child(Node::new("_ran"))
            .with_child(
                Node::with_value("if", expr("/../_x?value"))
                    .with_child(Node::with_value("=", 1))
                    .with_child(Node::new("lambda").with_child(set_ran("if"))),
            )
            .with_child(
                Node::with_value("else-if", expr("/../_x?value"))
                    .with_child(Node::with_value("=", 2))
                    .with_child(Node::new("lambda").with_child(set_ran("else-if"))),
            )
            .with_child(Node::new("else").with_child(set_ran("else")))
    }

    #[test]
    fn test_first_matching_branch_runs() {
        let ctx = context();
        for (value, expected) in [(1, "if"), (2, "else-if"), (3, "else")] {
            let mut tree = chain(value);
            ctx.raise("eval", &mut tree).unwrap();
            assert_eq!(tree.children[1].value, Value::from(expected), "x = {}", value);
        }
    }

    #[test]
    fn test_nested_if_does_not_leak_into_outer_chain() {
        let ctx = context();
        // the outer if is taken, its body holds an if that is not
        let mut tree = Node::new("eval")
            .with_child(
                Node::with_value("if", true).with_child(
                    Node::new("lambda").with_child(
                        Node::with_value("if", false).with_child(Node::new("test.append")),
                    ),
                ),
            )
            .with_child(Node::new("else").with_child(Node::new("test.append")));
        ctx.raise("eval", &mut tree).unwrap();
        assert!(tree.children[1].children[0].is_empty());
    }

    #[test]
    fn test_while_counts_down() {
        let ctx = context();
        let mut tree = Node::new("eval")
            .with_child(
                Node::new("_items")
                    .with_child(Node::new("a"))
                    .with_child(Node::new("b"))
                    .with_child(Node::new("c")),
            )
            .with_child(
                Node::with_value("while", expr("/../_items/*?count"))
                    .with_child(Node::with_value(">", 0))
                    .with_child(
                        Node::new("lambda").with_child(Node::with_value("set", expr("/../_items/0?node"))),
                    ),
            );
        ctx.raise("eval", &mut tree).unwrap();
        assert!(tree.children[0].is_empty());
    }
}
