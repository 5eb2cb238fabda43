use crate::types::{CollectStatus, OrderRef};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Network, DNS or TLS failure reaching the provider, or a 200 response
    /// whose body does not decode.
    #[cfg(feature = "client")]
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-200 status.
    #[error("{operation} failed with status {status}: {body}")]
    Provider {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// A provider call did not finish within its per-call budget.
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("no session for order {0}")]
    NotFound(OrderRef),

    /// An identity was requested for an order that has not completed.
    #[error("order {order_ref} is not complete ({status:?})")]
    NotComplete {
        order_ref: OrderRef,
        status: CollectStatus,
    },

    #[error("token error: {0}")]
    Token(#[from] TokenError),

    #[error("invalid personal number: {0}")]
    InvalidPersonalNumber(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The account directory could not answer an existence check.
    #[error("account directory error: {0}")]
    Directory(String),
}

/// Failures issuing or validating signed identity tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TokenError {
    #[error("service cannot create tokens, missing signing key")]
    MissingKey,

    #[error("token has unexpected signing method")]
    SigningMethodMismatch,

    #[error("token has expired")]
    Expired,

    #[error("token is not valid: {0}")]
    Invalid(String),
}

impl From<pasetors::errors::Error> for TokenError {
    fn from(e: pasetors::errors::Error) -> Self {
        use pasetors::errors::{ClaimValidationError, Error as PasetoError};

        // pasetors checks `exp` against the wall clock even with `valid_at` disabled.
        if matches!(e, PasetoError::ClaimValidation(ClaimValidationError::Exp)) {
            return Self::Expired;
        }
        Self::Invalid(e.to_string())
    }
}
