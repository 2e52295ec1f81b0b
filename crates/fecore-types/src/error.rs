use thiserror::Error;

/// The core error taxonomy (SPEC_FULL.md §7). HTTP-status mapping lives in
/// `fecore-api`, which is the only crate allowed to know about status codes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("capacity exhausted for {kind} replicas")]
    CapacityExhausted { kind: &'static str },

    #[error("network namespace pool exhausted")]
    NetNsExhausted,

    #[error("backend error: {0}")]
    BackendError(String),

    #[error("can't reach service for '{0}'")]
    UpstreamUnreachable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
