use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use time::OffsetDateTime;

use super::error::AuthError;
use crate::identity::IdentityClaims;
use crate::personal_number::PersonalNumber;
use crate::token::TokenService;

/// Identity proven by a bearer token minted after a completed BankID order.
///
/// Use as an Axum extractor in login and signup handlers. Any state that can
/// hand out an `Arc<TokenService>` via [`FromRef`] works. Rejects with
/// `401 Unauthorized` when the token is missing or expired and with
/// `403 Forbidden` when it fails verification.
///
/// # Example
///
/// ```rust,ignore
/// async fn signup(identity: VerifiedIdentity, Json(form): Json<SignupForm>) -> impl IntoResponse {
///     create_user(identity.national_id.as_str(), &identity.given_name, form).await
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub national_id: PersonalNumber,
    pub given_name: String,
    pub surname: String,
    pub expires_at: OffsetDateTime,
}

impl<S> FromRequestParts<S> for VerifiedIdentity
where
    S: Send + Sync,
    Arc<TokenService>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AuthError::Unauthenticated)?;

        let tokens = Arc::<TokenService>::from_ref(state);
        let verified = tokens
            .validate::<IdentityClaims>(bearer.token())
            .inspect_err(|e| tracing::debug!(error = %e, "Identity token rejected"))?;

        Ok(Self {
            national_id: verified.claims.national_id,
            given_name: verified.claims.given_name,
            surname: verified.claims.surname,
            expires_at: verified.registered.expires_at,
        })
    }
}
