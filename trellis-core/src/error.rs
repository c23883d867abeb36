//! Error types for the reactive core.
//!
//! Three families of failure exist:
//!
//! - [`EvalError`]: a binding's expression failed to evaluate. Recoverable and
//!   isolated to the observer that ran it.
//! - [`StructuralError`]: a scope or output-medium contract was violated.
//!   These are programmer errors and are returned to the caller.
//! - [`ReactiveError::ObserverPanicked`]: a run panicked inside a scheduler
//!   tick. The tick loop catches it and moves on.

use thiserror::Error;

use crate::reactive::{ObserverId, ScopeId};

/// Result alias used across the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// An expression evaluator failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("evaluation failed{}: {message}", expression.as_ref().map(|e| format!(" in `{e}`")).unwrap_or_default())]
pub struct EvalError {
    /// Human readable reason.
    pub message: String,
    /// The expression being evaluated, when known.
    pub expression: Option<String>,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expression: None,
        }
    }

    /// Attach the source expression to the error.
    pub fn in_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

/// Violations of the owning-scope or output-medium contracts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("unknown scope {0}")]
    UnknownScope(ScopeId),

    #[error("scope {0} has been destroyed")]
    ScopeDestroyed(ScopeId),

    #[error("scope {0} is already mounted")]
    AlreadyMounted(ScopeId),

    #[error("scope {0} is not mounted")]
    NotMounted(ScopeId),

    #[error("content is not a recognized child of the output medium")]
    UnknownContent,

    #[error("anchor is detached from the output medium")]
    Detached,

    #[error("duplicate correlation id `{0}` in keyed list")]
    DuplicateCorrelationId(String),

    #[error("keyed list source is not a collection: {0}")]
    NotACollection(String),
}

/// Umbrella error for the crate.
#[derive(Debug, Error)]
pub enum ReactiveError {
    #[error(transparent)]
    Evaluation(#[from] EvalError),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("observer {observer} panicked: {message}")]
    ObserverPanicked {
        observer: ObserverId,
        message: String,
    },

    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl ReactiveError {
    /// Whether the error is confined to a single binding and safe to log and skip.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReactiveError::Evaluation(_) | ReactiveError::ObserverPanicked { .. }
        )
    }
}
