use thiserror::Error;

use crate::serializer::ReaderError;

/// Error taxonomy for the catchpoint wire format. Parse errors and
/// structural invariant violations are terminal for the encoding
/// representation itself; policy around retrying a session lives in the
/// daemon crate's `CatchpointError`, which wraps these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatchpointError {
    #[error("malformed record: {0}")]
    Decode(#[from] ReaderError),

    #[error("unsupported file version {0}")]
    UnsupportedVersion(u8),

    #[error("key exceeds MAX_KV_KEY_LEN: {len} > {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("value exceeds MAX_KV_VALUE_LEN: {len} > {max}")]
    ValueTooLong { len: usize, max: usize },
}
