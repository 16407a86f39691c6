use thiserror::Error;

use crate::condition::ConditionError;
use crate::event::{EventError, LoaderError};
use crate::expression::ExpressionError;
use crate::node::{NodeError, NodePath};
use crate::threading::ThreadingError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),
    // dispatch
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),
    // evaluation
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
    #[error("Condition error: {0}")]
    Condition(#[from] ConditionError),
    #[error("Threading error: {0}")]
    Threading(#[from] ThreadingError),

    /// Raised by a handler about a specific node of its arguments.
    #[error("{message} (at node '{path}')")]
    Lambda { message: String, path: NodePath },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }

    pub fn lambda<S: Into<String>>(message: S, path: &NodePath) -> Self {
        Error::Lambda {
            message: message.into(),
            path: path.clone(),
        }
    }
}
