//! # Threading
//!
//! Forked workers and named locks.
//!
//! ```text
//! parent thread                     worker threads
//! ─────────────                     ──────────────
//! fork(ctx, [a, b, c]) ──clone──►   "eval" on a   (owns its node)
//!                      ──clone──►   "eval" on b
//!                      ──clone──►   "eval" on c
//! wait(workers, 500ms)  ◄─done───   ...
//!   └─ one deadline for all joins
//! ```
//!
//! A worker never sees the parent's tree; each one owns the node it was
//! handed and returns it when done.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    config::{LockOrder, ThreadingConfig},
    event::ApplicationContext,
    node::Node,
    InternalResult,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThreadingError {
    #[error("Worker '{worker}' panicked")]
    WorkerPanicked { worker: String },
    #[error("Failed to spawn worker '{worker}': {message}")]
    Spawn { worker: String, message: String },
}

pub type ThreadingResult<T> = Result<T, ThreadingError>;

static WORKER_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct Completion {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Completion {
    fn finish(&self) {
        *self.done.lock() = true;
        self.signal.notify_all();
    }

    /// `None` waits until done.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut done = self.done.lock();
        match timeout {
            None => {
                while !*done {
                    self.signal.wait(&mut done);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*done {
                    if self.signal.wait_until(&mut done, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *done
    }
}

/// Marks the worker finished even when its handler panics.
struct FinishOnDrop(Arc<Completion>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// A running forked lambda.
pub struct Worker {
    name: String,
    handle: JoinHandle<InternalResult<Node>>,
    completion: Arc<Completion>,
}

impl Worker {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        *self.completion.done.lock()
    }

    /// Blocks until the worker is done and returns the node it ran on.
    pub fn join(self) -> InternalResult<Node> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(ThreadingError::WorkerPanicked { worker: self.name }.into()),
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Starts one worker per lambda. Each worker raises `config.fork_event` on a
/// clone of `ctx` with its own lambda as arguments.
pub fn fork(
    ctx: &ApplicationContext,
    lambdas: Vec<Node>,
    config: &ThreadingConfig,
) -> ThreadingResult<Vec<Worker>> {
    lambdas
        .into_iter()
        .map(|mut lambda| {
            let name = format!(
                "{}-{}",
                config.worker_name_prefix,
                WORKER_SEQUENCE.fetch_add(1, Ordering::Relaxed)
            );
            let completion = Arc::new(Completion::default());
            let guard = FinishOnDrop(completion.clone());
            let ctx = ctx.clone();
            let event = config.fork_event.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let _guard = guard;
                    ctx.raise(&event, &mut lambda)?;
                    Ok(lambda)
                })
                .map_err(|e| ThreadingError::Spawn {
                    worker: name.clone(),
                    message: e.to_string(),
                })?;
            debug!("forked worker '{}'", name);
            Ok(Worker {
                name,
                handle,
                completion,
            })
        })
        .collect()
}

/// What [`wait`] got back before its budget ran out.
#[derive(Debug)]
pub struct WaitOutcome {
    /// Joined workers with their results, in the order they were passed in.
    pub finished: Vec<(String, InternalResult<Node>)>,
    /// Workers still running when the budget ran out. Dropping them detaches
    /// the threads.
    pub pending: Vec<Worker>,
}

impl WaitOutcome {
    pub fn timed_out(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The finished nodes, or the first worker error.
    pub fn into_nodes(self) -> InternalResult<Vec<Node>> {
        self.finished.into_iter().map(|(_, result)| result).collect()
    }
}

/// Joins `workers` one after the other. With a timeout, every join only gets
/// what is left of the overall budget.
pub fn wait(workers: Vec<Worker>, timeout: Option<Duration>) -> WaitOutcome {
    let started = Instant::now();
    let mut outcome = WaitOutcome {
        finished: Vec::with_capacity(workers.len()),
        pending: Vec::new(),
    };
    for worker in workers {
        let remaining = timeout.map(|t| t.saturating_sub(started.elapsed()));
        if worker.completion.wait(remaining) {
            let name = worker.name.clone();
            trace!("joined worker '{}'", name);
            outcome.finished.push((name, worker.join()));
        } else {
            outcome.pending.push(worker);
        }
    }
    if outcome.timed_out() {
        warn!(
            "wait timed out after {:?} with {} workers still running",
            started.elapsed(),
            outcome.pending.len()
        );
    }
    outcome
}

lazy_static! {
    static ref GLOBAL_LOCKS: NamedLocks = NamedLocks::new();
}

/// Read/write locks looked up by name, created on first use.
///
/// Several names are taken one inside the other and released in reverse.
/// Locks are not reentrant: taking a name already held by the same thread
/// blocks forever.
#[derive(Default)]
pub struct NamedLocks {
    registry: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by the `lock` event.
    pub fn global() -> &'static NamedLocks {
        &GLOBAL_LOCKS
    }

    fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        self.registry
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn with_write<S: AsRef<str>, T>(&self, names: &[S], order: LockOrder, f: impl FnOnce() -> T) -> T {
        let names = ordered(names, order);
        self.nested(&names, true, f)
    }

    pub fn with_read<S: AsRef<str>, T>(&self, names: &[S], order: LockOrder, f: impl FnOnce() -> T) -> T {
        let names = ordered(names, order);
        self.nested(&names, false, f)
    }

    fn nested<T>(&self, names: &[String], exclusive: bool, f: impl FnOnce() -> T) -> T {
        let Some((first, rest)) = names.split_first() else {
            return f();
        };
        let lock = self.lock_for(first);
        if exclusive {
            let _guard = lock.write();
            trace!("write lock '{}' taken", first);
            self.nested(rest, exclusive, f)
        } else {
            let _guard = lock.read();
            trace!("read lock '{}' taken", first);
            self.nested(rest, exclusive, f)
        }
    }
}

/// Duplicates are dropped, keeping the first occurrence.
fn ordered<S: AsRef<str>>(names: &[S], order: LockOrder) -> Vec<String> {
    let mut result: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !result.iter().any(|n| n == name.as_ref()) {
            result.push(name.as_ref().to_string());
        }
    }
    if order == LockOrder::Sorted {
        result.sort();
    }
    result
}
