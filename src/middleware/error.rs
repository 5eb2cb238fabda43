use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::{Error, TokenError};
use crate::types::{HintCode, OrderRef};

/// Errors surfaced by the BankID routes and the [`VerifiedIdentity`](super::VerifiedIdentity) extractor.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No bearer token on the request.
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Token expired")]
    TokenExpired,

    /// Token present but rejected (bad signature, wrong issuer or purpose).
    #[error("Token rejected: {0}")]
    Forbidden(TokenError),

    #[error("Session not found")]
    NotFound(OrderRef),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An account already exists for a personal number that must be new.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The order finished without identifying the user.
    #[error("Authentication failed: {hint_code}")]
    Failed {
        order_ref: OrderRef,
        hint_code: HintCode,
        message_id: Option<&'static str>,
    },

    /// The provider rejected a call or could not be reached.
    #[error("Identification provider error: {0}")]
    Upstream(String),

    #[error("Identification provider timed out: {0}")]
    Timeout(String),

    /// Account directory or token signing failed.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureBody<'a> {
    order_ref: &'a OrderRef,
    hint_code: &'a HintCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<&'static str>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated | Self::TokenExpired => {
                (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
            }
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()).into_response(),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()).into_response(),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
            Self::Conflict(_) => (StatusCode::CONFLICT, self.to_string()).into_response(),
            Self::Failed {
                ref order_ref,
                ref hint_code,
                message_id,
            } => (
                StatusCode::UNAUTHORIZED,
                Json(FailureBody {
                    order_ref,
                    hint_code,
                    message_id,
                }),
            )
                .into_response(),
            Self::Upstream(_) => {
                tracing::warn!(error = %self, "Identification provider call failed");
                (StatusCode::BAD_GATEWAY, "Identification provider error").into_response()
            }
            Self::Timeout(_) => {
                tracing::warn!(error = %self, "Identification provider call timed out");
                (StatusCode::GATEWAY_TIMEOUT, "Identification provider timed out").into_response()
            }
            Self::Internal(_) | Self::Config(_) => {
                tracing::error!(error = %self, "BankID internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => Self::TokenExpired,
            TokenError::MissingKey => Self::Internal(e.to_string()),
            other => Self::Forbidden(other),
        }
    }
}

impl From<Error> for AuthError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(order_ref) => Self::NotFound(order_ref),
            Error::InvalidPersonalNumber(_) => Self::BadRequest(e.to_string()),
            Error::Provider { status: 400, .. } => Self::BadRequest(e.to_string()),
            Error::Provider { .. } | Error::Transport(_) => Self::Upstream(e.to_string()),
            Error::Timeout(_) => Self::Timeout(e.to_string()),
            Error::Config(msg) => Self::Config(msg),
            // Minting failures are ours, not the caller's.
            Error::Token(_) | Error::Directory(_) | Error::NotComplete { .. } => {
                Self::Internal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (AuthError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (AuthError::TokenExpired, StatusCode::UNAUTHORIZED),
            (
                AuthError::Forbidden(TokenError::SigningMethodMismatch),
                StatusCode::FORBIDDEN,
            ),
            (AuthError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AuthError::Conflict("exists".into()), StatusCode::CONFLICT),
            (AuthError::Upstream("503".into()), StatusCode::BAD_GATEWAY),
            (AuthError::Timeout("collect".into()), StatusCode::GATEWAY_TIMEOUT),
            (AuthError::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn provider_errors_map_by_status() {
        let bad_input = Error::Provider {
            operation: "auth",
            status: 400,
            body: "invalidParameters".into(),
        };
        assert!(matches!(AuthError::from(bad_input), AuthError::BadRequest(_)));

        let outage = Error::Provider {
            operation: "auth",
            status: 503,
            body: "maintenance".into(),
        };
        assert!(matches!(AuthError::from(outage), AuthError::Upstream(_)));
        assert!(matches!(
            AuthError::from(Error::Timeout("auth")),
            AuthError::Timeout(_)
        ));
    }

    #[test]
    fn token_errors_split_between_401_and_403() {
        assert!(matches!(
            AuthError::from(TokenError::Expired),
            AuthError::TokenExpired
        ));
        assert!(matches!(
            AuthError::from(TokenError::Invalid("bad".into())),
            AuthError::Forbidden(_)
        ));
        assert!(matches!(
            AuthError::from(TokenError::SigningMethodMismatch),
            AuthError::Forbidden(_)
        ));
    }
}
