use std::{cell::RefCell, time::Duration};

use tracing::debug;

use super::{argument_names, execute};
use crate::{
    event::{ActiveEventArgs, ApplicationContext, HandlerResult},
    node::Value,
    threading::{self, NamedLocks, Worker},
    Error,
};

thread_local! {
    /// Workers forked inside each `wait` currently running on this thread,
    /// innermost last.
    static WAIT_SCOPES: RefCell<Vec<Vec<Worker>>> = const { RefCell::new(Vec::new()) };
}

/// Runs a copy of the `fork` node's statements on a new thread. Outside a
/// `wait`, the worker is detached.
pub(super) fn on_fork(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let lambda = args.args()?.clone();
    let workers = threading::fork(ctx, vec![lambda], &ctx.config().threading)?;
    WAIT_SCOPES.with(|scopes| match scopes.borrow_mut().last_mut() {
        Some(scope) => scope.extend(workers),
        None => debug!("fork outside of 'wait', {} worker detached", workers.len()),
    });
    Ok(())
}

pub(super) fn on_wait(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    let timeout = match &args.args()?.value {
        Value::Null => ctx.config().threading.wait_timeout,
        Value::Integer(ms) if *ms >= 0 => Some(Duration::from_millis(*ms as u64)),
        other => {
            return Err(Error::lambda(
                format!("'wait' expects a timeout in milliseconds, got '{}'", other),
                &path,
            ))
        }
    };

    WAIT_SCOPES.with(|scopes| scopes.borrow_mut().push(Vec::new()));
    let executed = execute(ctx, args.tree_mut(), &path);
    let workers = WAIT_SCOPES
        .with(|scopes| scopes.borrow_mut().pop())
        .unwrap_or_default();
    executed?;

    let outcome = threading::wait(workers, timeout);
    if outcome.timed_out() {
        debug!(
            "'wait' at '{}' left {} workers running",
            path,
            outcome.pending.len()
        );
    }
    outcome.into_nodes()?;
    Ok(())
}

/// Executes the statements while holding write locks on every name given,
/// either as the value or as values of `""` children.
pub(super) fn on_lock(ctx: &ApplicationContext, args: &mut ActiveEventArgs<'_>) -> HandlerResult {
    let path = args.path().clone();
    let names = argument_names(args.tree(), &path)?;
    if names.is_empty() {
        return Err(Error::lambda("'lock' needs at least one lock name", &path));
    }

    let order = ctx.config().threading.lock_order;
    NamedLocks::global().with_write(&names, order, || execute(ctx, args.tree_mut(), &path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{Loader, Module},
        lambda,
        node::{Node, NodePath},
    };
    use pretty_assertions::assert_eq;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn counting_context(counter: Arc<AtomicUsize>) -> ApplicationContext {
        let mut loader = Loader::default();
        loader.load(lambda::module()).unwrap();
        loader
            .load(
                Module::builder("test")
                    .event("test.count", move |_: &ApplicationContext, _: &mut ActiveEventArgs<'_>| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .event("test.sleep", |_: &ApplicationContext, args: &mut ActiveEventArgs<'_>| {
                        let ms = args.args()?.value.as_i64().unwrap_or(0);
                        std::thread::sleep(Duration::from_millis(ms as u64));
                        Ok(())
                    })
                    .build(),
            )
            .unwrap();
        loader.create_context().unwrap()
    }

    #[test]
    fn test_wait_joins_forks_and_leaves_tree_alone() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctx = counting_context(counter.clone());
        let fork = Node::new("fork").with_child(Node::new("test.count"));
        let mut tree = Node::new("eval").with_child(
            Node::new("wait")
                .with_child(fork.clone())
                .with_child(fork.clone())
                .with_child(fork),
        );
        let before = tree.clone();
        ctx.raise("eval", &mut tree).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(tree, before);
    }

    #[test]
    fn test_wait_rejects_bad_timeout() {
        let ctx = counting_context(Arc::new(AtomicUsize::new(0)));
        let mut tree = Node::new("eval").with_child(Node::with_value("wait", "soon"));
        assert!(matches!(
            ctx.raise("eval", &mut tree),
            Err(Error::Lambda { path, .. }) if path == NodePath::from(vec![0])
        ));
    }

    #[test]
    fn test_wait_timeout_returns_early() {
        let ctx = counting_context(Arc::new(AtomicUsize::new(0)));
        let mut tree = Node::new("eval").with_child(
            Node::with_value("wait", 10)
                .with_child(Node::new("fork").with_child(Node::with_value("test.sleep", 500))),
        );
        let started = std::time::Instant::now();
        ctx.raise("eval", &mut tree).unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_lock_runs_body() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctx = counting_context(counter.clone());
        let mut tree = Node::new("eval").with_child(
            Node::with_value("lock", "lambda.test-lock")
                .with_child(Node::with_value("", "lambda.test-lock-2"))
                .with_child(Node::new("test.count")),
        );
        ctx.raise("eval", &mut tree).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let mut tree = Node::new("eval").with_child(Node::new("lock"));
        assert!(ctx.raise("eval", &mut tree).is_err());
    }
}
