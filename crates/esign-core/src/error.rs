use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// A conditional update lost against a concurrent writer, or a uniqueness rule fired.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Document rendering errors. None of these leave an artifact behind.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("contract {0} not found")]
    ContractNotFound(String),

    #[error("contract data incomplete: {0}")]
    MissingData(String),

    #[error("rendering timed out after {0}s")]
    Timeout(u64),

    #[error("signature image could not be embedded: {0}")]
    Raster(String),

    #[error("stored signature image is unusable: {0}")]
    Image(#[from] ImageError),

    #[error("pdf encoding failed: {0}")]
    Encode(String),

    #[error("artifact io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("contract lookup failed: {0}")]
    Directory(#[from] DirectoryError),
}

/// Signature image intake errors.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("{0}")]
    Payload(String),

    #[error("undecodable base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("empty image")]
    Empty,

    #[error("image exceeds {0} bytes")]
    TooLarge(usize),

    #[error("unsupported image format, expected PNG or JPEG")]
    UnsupportedFormat,

    #[error("unsupported {0}")]
    Unsupported(String),

    #[error("unsupported image dimensions {width}x{height}")]
    Dimensions { width: u32, height: u32 },

    #[error("malformed image: {0}")]
    Malformed(String),
}

/// Contract data lookup errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("contract directory unavailable: {0}")]
    Unavailable(String),

    #[error("contract directory returned malformed data: {0}")]
    Malformed(String),
}

/// Contract/connection lifecycle transition errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("state transition rejected: {0}")]
    Rejected(String),

    #[error("state sync unavailable: {0}")]
    Unavailable(String),
}

/// Notification delivery errors.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification rejected by sink: {0}")]
    Rejected(String),

    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

/// Signing pipeline errors.
///
/// Everything up to `ResendNotAllowed` is a deterministic business outcome carrying enough
/// detail for the caller to act. `Render`, `Storage` and `SigningInProgress` are transient:
/// no partial state is committed on those paths and the whole operation may be retried.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("contract {contract_id} already has an unsigned signing session")]
    DuplicateSession { contract_id: String },

    #[error("signing session {session_id} is already signed")]
    AlreadySigned { session_id: String },

    #[error("no signature has been captured for this session")]
    SignatureMissing,

    #[error("invalid signature image: {0}")]
    InvalidSignatureImage(#[from] ImageError),

    #[error("invalid token, {remaining_attempts} attempt(s) remaining")]
    InvalidToken { remaining_attempts: u32 },

    #[error("token expired at {expired_at}")]
    TokenExpired { expired_at: DateTime<Utc> },

    #[error("maximum of {max_attempts} token attempts reached, request a new token")]
    AttemptsExceeded { max_attempts: u32 },

    #[error("token resend not allowed: token valid until {token_expires_at}, {remaining_attempts} attempt(s) remaining")]
    ResendNotAllowed {
        token_expires_at: DateTime<Utc>,
        remaining_attempts: u32,
    },

    #[error("no document available for signing session {session_id}")]
    DocumentUnavailable { session_id: String },

    #[error("signing session {session_id} is being signed by another request")]
    SigningInProgress { session_id: String },

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SigningError {
    /// Infrastructure failures that are safe to retry as a whole operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Render(_) | Self::Storage(_) | Self::SigningInProgress { .. }
        )
    }

    pub(crate) fn from_render(err: RenderError) -> Self {
        match err {
            RenderError::ContractNotFound(id) => Self::NotFound(format!("contract {id}")),
            other => Self::Render(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_are_not_transient() {
        assert!(!SigningError::SignatureMissing.is_transient());
        assert!(!SigningError::InvalidToken {
            remaining_attempts: 2
        }
        .is_transient());
        assert!(SigningError::Storage(StorageError::Backend("down".into())).is_transient());
        assert!(SigningError::Render(RenderError::Timeout(30)).is_transient());
    }

    #[test]
    fn missing_contract_during_render_is_not_found() {
        let err = SigningError::from_render(RenderError::ContractNotFound("C1".into()));
        assert!(matches!(err, SigningError::NotFound(ref what) if what == "contract C1"));
    }

    #[test]
    fn invalid_token_message_carries_only_remaining_attempts() {
        let err = SigningError::InvalidToken {
            remaining_attempts: 1,
        };
        assert_eq!(err.to_string(), "invalid token, 1 attempt(s) remaining");
    }
}
