use thiserror::Error;

// Small shared error type for helpers that don't warrant their own enum
// (serializer::ReaderError, crypto::CryptoError and catchpoint::CatchpointError
// cover their respective modules).
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("invalid length: got {got}, expected {expected}")]
    InvalidLength { got: usize, expected: usize },
}
