use thiserror::Error;

/// Malformed input at the event-log or registry boundary.
///
/// Kept separate from transient failures so the stream consumer can tell a
/// poison message from something worth redelivering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
    #[error("invalid sink config: {0}")]
    InvalidConfig(String),
    #[error("unknown exporter backend `{0}`")]
    UnknownBackend(String),
    #[error("invalid health state `{0}`")]
    InvalidState(String),
}
