mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::{Duration, Instant},
};

use active_events::{
    config::{LockOrder, ThreadingConfig},
    threading::{self, NamedLocks, ThreadingError},
    ActiveEventArgs, ApplicationContext, Error, Module, Node,
};
use common::context_with;
use pretty_assertions::assert_eq;

fn worker_module() -> Module {
    Module::builder("test")
        .event("test.append", |_: &ApplicationContext, args: &mut ActiveEventArgs<'_>| {
            args.args_mut()?.add(Node::new("appended"));
            Ok(())
        })
        .event("test.sleep", |_: &ApplicationContext, args: &mut ActiveEventArgs<'_>| {
            let ms = args.args()?.value.as_i64().unwrap_or(0);
            thread::sleep(Duration::from_millis(ms as u64));
            Ok(())
        })
        .event("test.panic", |_: &ApplicationContext, _: &mut ActiveEventArgs<'_>| {
            panic!("worker gave up")
        })
        .build()
}

#[test]
fn test_forked_workers_never_touch_the_parent_tree() {
    let ctx = context_with(vec![worker_module()]);
    let parent = Node::new("parent")
        .with_child(Node::new("lambda").with_child(Node::new("test.append")))
        .with_child(Node::new("lambda").with_child(Node::new("test.append")))
        .with_child(Node::new("lambda").with_child(Node::new("test.append")));
    let before = parent.clone();

    let workers = threading::fork(&ctx, parent.children.clone(), &ThreadingConfig::default()).unwrap();
    assert_eq!(workers.len(), 3);
    let outcome = threading::wait(workers, None);
    assert!(!outcome.timed_out());
    let results = outcome.into_nodes().unwrap();

    assert_eq!(parent, before);
    for result in results {
        assert_eq!(result.children[0].children, vec![Node::new("appended")]);
    }
}

#[test]
fn test_wait_budget_spans_all_workers() {
    let ctx = context_with(vec![worker_module()]);
    let lambdas: Vec<Node> = (0..3)
        .map(|_| Node::new("lambda").with_child(Node::with_value("test.sleep", 300)))
        .collect();
    let workers = threading::fork(&ctx, lambdas, &ThreadingConfig::default()).unwrap();

    let started = Instant::now();
    let outcome = threading::wait(workers, Some(Duration::from_millis(50)));
    let elapsed = started.elapsed();

    assert!(outcome.timed_out());
    assert_eq!(outcome.pending.len(), 3);
    // One shared deadline, not 50ms per worker.
    assert!(elapsed < Duration::from_millis(140), "waited {:?}", elapsed);
}

#[test]
fn test_worker_panic_is_reported() {
    let ctx = context_with(vec![worker_module()]);
    let config = ThreadingConfig {
        worker_name_prefix: "panicky".to_string(),
        ..ThreadingConfig::default()
    };
    let workers = threading::fork(&ctx, vec![Node::new("lambda").with_child(Node::new("test.panic"))], &config).unwrap();
    assert!(workers[0].name().starts_with("panicky-"));
    let outcome = threading::wait(workers, None);
    match outcome.into_nodes() {
        Err(Error::Threading(ThreadingError::WorkerPanicked { worker })) => {
            assert!(worker.starts_with("panicky-"))
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

fn contend(first: [&'static str; 2], second: [&'static str; 2], order: LockOrder) -> usize {
    let locks = Arc::new(NamedLocks::new());
    let counter = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [first, second]
        .into_iter()
        .map(|names| {
            let locks = locks.clone();
            let counter = counter.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..200 {
                    locks.with_write(&names, order, || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    counter.load(Ordering::SeqCst)
}

#[test]
fn test_same_order_locking_completes() {
    assert_eq!(contend(["x", "y"], ["x", "y"], LockOrder::AsRequested), 400);
}

#[test]
fn test_sorted_order_makes_opposite_requests_safe() {
    assert_eq!(contend(["x", "y"], ["y", "x"], LockOrder::Sorted), 400);
}

#[test]
fn test_global_registry_is_shared() {
    let a = NamedLocks::global() as *const NamedLocks;
    let b = NamedLocks::global() as *const NamedLocks;
    assert_eq!(a, b);
    let value = NamedLocks::global().with_read(&["threading-test"], LockOrder::AsRequested, || 7);
    assert_eq!(value, 7);
}
