//! # Active Events
//!
//! A convention-based event dispatch runtime over a generic node tree, with a
//! path-query language for locating, filtering and mutating nodes.
//!
//! ## Building Blocks
//!
//! ### 1. The Node Tree
//! Every argument and every result is a [`node::Node`]: a name, a dynamically
//! typed [`node::Value`] and ordered children.
//! - Tree structure and positional paths ([`node`])
//! - JSON boundary for external collaborators ([`node::json`])
//!
//! ### 2. Dispatch
//! Modules register handlers under event names; contexts raise events by name.
//! - Module loading and context creation ([`event::Loader`])
//! - Per-context dispatch and listener registration ([`event::ApplicationContext`])
//!
//! ### 3. Queries
//! - Path expressions such as `/*/c?value` ([`expression`])
//! - Boolean statements built on expressions ([`condition`])
//!
//! ### 4. Execution
//! - Built-in control-flow events: `eval`, `if`, `while`, `set` ([`lambda`])
//! - Forked workers, waiting and named locks ([`threading`])
//!
//! ## Execution Flow
//!
//! ```text
//! caller → context.raise(name, node) → static → instance → catch-all handlers
//!                                         │
//!                                         ├── expressions resolve paths in the tree
//!                                         ├── conditions decide branches
//!                                         └── handlers raise further events
//! ```

pub mod condition;
pub mod config;
pub mod error;
pub mod event;
pub mod expression;
pub mod lambda;
pub mod node;
pub mod threading;

// Re-exports
pub use error::*;
pub use event::{ActiveEventArgs, ApplicationContext, HandlerResult, Loader, Module};
pub use expression::Expression;
pub use node::{Node, NodePath, Value};
