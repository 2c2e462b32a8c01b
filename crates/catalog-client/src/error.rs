use catalog_types::{FeedbackScores, ValidationError};
use thiserror::Error;

use crate::engine::{EngineState, TransitionError};
use crate::fee::QuoteFailure;
use crate::transport::TransportError;

/// Runtime failures of an operation or a refresh. Each one is surfaced to the
/// user exactly once and followed by a reset to `Idle`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error(transparent)]
    QuoteFailure(#[from] QuoteFailure),
    #[error("submission failed: {cause}")]
    SubmissionFailure { cause: TransportError },
    #[error("could not resolve address of `{description}`: {reason}")]
    ResolutionFailure { description: String, reason: String },
    #[error("no target selected")]
    NoTargetSelected,
    #[error("no recipient selected")]
    MissingRecipient,
    #[error("feedback scores out of range: {scores:?}")]
    InvalidScores { scores: FeedbackScores },
    #[error("invalid operation argument: {0}")]
    Encoding(#[from] ValidationError),
    #[error("query {query} failed: {source}")]
    QueryFailure {
        query: &'static str,
        #[source]
        source: TransportError,
    },
}

/// Errors returned by the engine's public entry points.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("an operation is already outstanding (state {state:?})")]
    Busy { state: EngineState },
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("accept is unavailable: quoted cost is not below the balance")]
    AcceptUnavailable,
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl EngineError {
    /// True for caller contract violations, as opposed to runtime failures.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, Self::Operation(_))
    }

    pub fn operation(&self) -> Option<&OperationError> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }
}
