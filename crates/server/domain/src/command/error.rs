//! Errors raised while resolving persisted commands and deriving keys.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandTypeError {
    #[error("Cannot resolve command type '{type_id}': no such type is registered")]
    Unresolvable { type_id: String },

    #[error("Payload for '{type_id}' could not be decoded: {message}")]
    Deserialization { type_id: String, message: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdempotencyError {
    #[error("Correlation id must not be the nil UUID")]
    NilCorrelationId,
}
