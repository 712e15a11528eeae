//! Payment error taxonomy
//!
//! Every failure inside the notification pipeline is converted into one of
//! these variants at its origin; nothing deeper than the processor is allowed
//! to surface an unclassified error to the HTTP boundary.

use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    /// Shared-secret check failed. Fatal per-request, 401-class.
    #[error("webhook authentication rejected")]
    AuthRejected,

    /// The canonical payment (or merchant order) could not be read from the
    /// provider. Recoverable: the sender should re-deliver.
    #[error("payment {0} could not be fetched from the provider")]
    PaymentNotFetched(String),

    /// Approved payment with no usable subscriber email anywhere. Logged for
    /// manual reconciliation, not retried.
    #[error("no usable subscriber email on payment {payment_id}")]
    UnresolvedIdentity { payment_id: String },

    /// Malformed external_reference. Never fatal: resolution falls back to
    /// provider metadata.
    #[error("invalid correlation token: {0}")]
    InvalidCorrelationToken(String),

    /// The provider rejected our request (4xx), e.g. malformed back-urls.
    #[error("provider rejected request: {0}")]
    InvalidRequest(String),

    /// The provider was unreachable or answered 5xx.
    #[error("provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// True when the sender should re-deliver the notification later.
    pub fn warrants_retry(&self) -> bool {
        matches!(self, PaymentError::PaymentNotFetched(_))
    }
}
