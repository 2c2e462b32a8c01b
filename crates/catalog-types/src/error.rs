//! Validation errors for identifiers and on-ledger text encoding.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid length for {kind}: expected {expected}, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("text `{text}` is {len} bytes, the ledger stores at most {max}")]
    TextTooLong {
        text: String,
        len: usize,
        max: usize,
    },
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("{0}")]
    Message(String),
}
