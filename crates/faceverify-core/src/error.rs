use thiserror::Error;

/// Faults raised by the verification pipeline.
///
/// "No face found" and "no match" are not errors; they are reported through
/// [`Decision`](crate::Decision) on the outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// Malformed or unsupported image, or an unreadable file.
    #[error("decode error: {0}")]
    Decode(String),
    /// Caller precondition violated (bad threshold, mismatched embeddings).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Model or runtime fault during location or encoding.
    #[error("processing error: {0}")]
    Processing(String),
}

impl VerifyError {
    /// True for faults caused by the caller's input rather than the backend.
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, VerifyError::Decode(_) | VerifyError::InvalidInput(_))
    }
}

impl From<crate::detector::DetectorError> for VerifyError {
    fn from(err: crate::detector::DetectorError) -> Self {
        VerifyError::Processing(err.to_string())
    }
}

impl From<crate::recognizer::RecognizerError> for VerifyError {
    fn from(err: crate::recognizer::RecognizerError) -> Self {
        VerifyError::Processing(err.to_string())
    }
}
