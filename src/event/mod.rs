//! # Active Events
//!
//! Named, dynamically dispatched events. Every operation in the runtime is an
//! event raised by name with a [`Node`] as its argument and result channel.
//!
//! ## Overview
//!
//! ```text
//!            Module::builder("x")            Listener types
//!              .event("x.load", f)             (per-instance state)
//!                     │                               │
//!                     ▼                               ▼
//!            ┌──────────────────────────────────────────────┐
//!            │ Loader: static table + declared listener types│
//!            └──────────────────────────────────────────────┘
//!                     │ create_context() snapshots the table
//!                     ▼
//!            ┌──────────────────────────────────────────────┐
//!            │ ApplicationContext                            │
//!            │   static handlers   (immutable, shared)       │
//!            │   instance handlers (register_listener)       │
//!            └──────────────────────────────────────────────┘
//!                     │ raise("x.load", &mut node)
//!                     ▼
//!            static handlers → instance handlers → catch-all
//! ```
//!
//! ## Dispatch rules
//!
//! - Raising a name nobody handles is a no-op.
//! - Every handler for a name runs, in registration order; all of them see
//!   the same node and cooperate on it.
//! - Handlers may raise further events. There is no cycle detection.
//! - Errors returned by a handler propagate out of `raise` unchanged.

mod context;
mod loader;

use thiserror::Error;

use crate::node::{Node, NodePath};
use crate::InternalResult;

pub use context::{ApplicationContext, ContextTicket};
pub(crate) use loader::is_valid_event_name;
pub use loader::{Listener, ListenerEvent, Loader, LoaderError, LoaderResult, Module, ModuleBuilder};

pub type HandlerResult = InternalResult<()>;

/// Signature every Active Event handler has.
pub type Handler =
    std::sync::Arc<dyn Fn(&ApplicationContext, &mut ActiveEventArgs<'_>) -> HandlerResult + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Type '{type_name}' declares no Active Events in any loaded module")]
    UnknownListenerType { type_name: &'static str },
    #[error("Instance of '{type_name}' is not registered on this context")]
    UnregisteredInstance { type_name: &'static str },
    #[error("Arguments of '{event}' not found at path '{path}'")]
    ArgsNotFound { event: String, path: NodePath },
    #[error("Receiver of '{event}' is not a '{type_name}'")]
    ReceiverMismatch {
        event: String,
        type_name: &'static str,
    },
}

pub type EventResult<T> = Result<T, EventError>;

/// What a handler receives: the event name and the argument node.
///
/// The argument node lives inside a larger tree (`tree` at `path`), so a
/// handler can look at parents and siblings, and can raise events for nodes
/// elsewhere in the same tree.
pub struct ActiveEventArgs<'a> {
    name: &'a str,
    tree: &'a mut Node,
    path: NodePath,
}

impl<'a> ActiveEventArgs<'a> {
    pub(crate) fn new(name: &'a str, tree: &'a mut Node, path: NodePath) -> Self {
        Self { name, tree, path }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn args(&self) -> EventResult<&Node> {
        self.tree.get(&self.path).ok_or_else(|| self.not_found())
    }

    pub fn args_mut(&mut self) -> EventResult<&mut Node> {
        match self.tree.get_mut(&self.path) {
            Some(node) => Ok(node),
            None => Err(EventError::ArgsNotFound {
                event: self.name.to_string(),
                path: self.path.clone(),
            }),
        }
    }

    pub fn tree(&self) -> &Node {
        &*self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Node {
        &mut *self.tree
    }

    fn not_found(&self) -> EventError {
        EventError::ArgsNotFound {
            event: self.name.to_string(),
            path: self.path.clone(),
        }
    }
}
