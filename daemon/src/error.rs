//! Error taxonomy for the daemon-side orchestration. Wraps the wire-level
//! `CatchpointError` from `catchsync-common` and adds the policy-relevant
//! kinds from the design: invariant violations caught only once rows are
//! actually flowing through staging, label mismatches, transient storage
//! failures the orchestrator may retry, and cooperative cancellation.

use catchsync_common::{catchpoint::CatchpointError as WireError, serializer::ReaderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatchpointError {
    /// Header missing/duplicated, bad section order, corrupted decode.
    #[error("invalid catchpoint file: {0}")]
    InvalidFile(String),

    /// Wire-level decode failure, folded into `InvalidFile` at the
    /// component boundary that first observes it.
    #[error("malformed record: {0}")]
    Decode(#[from] ReaderError),

    /// Per-account resource totals mismatch, unexpected address after a
    /// partial delivery, duplicate hash inserted into the trie.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Recomputed label does not match the advertised label.
    #[error("catchpoint hash mismatch: expected {expected}, computed {computed}")]
    LabelMismatch { expected: String, computed: String },

    /// Underlying transaction failed; the orchestrator may retry the whole
    /// session without restarting the network.
    #[error("transient storage error: {0}")]
    TransientStorage(String),

    /// Cooperative cancellation was requested. Not reported to the user as
    /// a failure, but surfaced distinctly so callers don't misreport it.
    #[error("cancelled")]
    Cancelled,

    /// File header carries a version this consumer does not know.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
}

impl From<WireError> for CatchpointError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Decode(e) => CatchpointError::Decode(e),
            WireError::UnsupportedVersion(v) => CatchpointError::UnsupportedVersion(v),
            other => CatchpointError::InvalidFile(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CatchpointError {
    fn from(err: std::io::Error) -> Self {
        CatchpointError::TransientStorage(err.to_string())
    }
}

impl From<rocksdb::Error> for CatchpointError {
    fn from(err: rocksdb::Error) -> Self {
        CatchpointError::TransientStorage(err.to_string())
    }
}

impl CatchpointError {
    /// Terminal errors discard staging and return the state machine to
    /// `Inactive`; transient ones may be retried by the orchestrator as-is.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CatchpointError::TransientStorage(_) | CatchpointError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CatchpointError>;
