use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::error::{Error, TokenError};
use crate::personal_number::PersonalNumber;
use crate::token::TokenService;
use crate::types::{CollectResponse, CollectStatus};

/// How long a minted identity token stays valid.
pub const IDENTITY_TOKEN_VALIDITY: Duration = Duration::minutes(30);

/// Consumer-provided lookup into the application's user store.
///
/// Existence check only; the bridge never creates accounts.
///
/// # Example
///
/// ```rust,ignore
/// impl AccountDirectory for MyAppState {
///     async fn account_exists(
///         &self,
///         national_id: &PersonalNumber,
///     ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
///         Ok(self.repo.find_by_ssn(national_id.as_str()).await?.is_some())
///     }
/// }
/// ```
pub trait AccountDirectory: Send + Sync + 'static {
    fn account_exists(
        &self,
        national_id: &PersonalNumber,
    ) -> impl Future<Output = Result<bool, Box<dyn std::error::Error + Send + Sync>>> + Send;
}

/// Identity attributes carried inside the signed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClaims {
    #[serde(rename = "nationalID")]
    pub national_id: PersonalNumber,
    pub given_name: String,
    pub surname: String,
}

/// Result of a completed identification, ready to hand to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityAssertion {
    pub national_id: PersonalNumber,
    pub given_name: String,
    pub surname: String,
    pub token: String,
    pub account_exists: bool,
}

/// Turns a completed order into a verifiable identity token.
pub struct IdentityBridge<D> {
    tokens: Arc<TokenService>,
    directory: Arc<D>,
    validity: Duration,
}

// Manual Clone: avoid derive adding a `D: Clone` bound.
impl<D> Clone for IdentityBridge<D> {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
            directory: self.directory.clone(),
            validity: self.validity,
        }
    }
}

impl<D: AccountDirectory> IdentityBridge<D> {
    #[must_use]
    pub fn new(tokens: Arc<TokenService>, directory: D) -> Self {
        Self {
            tokens,
            directory: Arc::new(directory),
            validity: IDENTITY_TOKEN_VALIDITY,
        }
    }

    #[must_use]
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    #[must_use]
    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Normalizes the verified personal number, checks for an existing
    /// account and mints a token. Persists nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::NotComplete`] unless the order completed with user data
    /// - [`Error::InvalidPersonalNumber`] if the provider's number is malformed
    /// - [`Error::Directory`] if the existence check fails
    /// - [`Error::Token`] if signing fails
    pub async fn verify(&self, result: &CollectResponse) -> Result<IdentityAssertion, Error> {
        let user = match (&result.status, &result.completion_data) {
            (CollectStatus::Complete, Some(data)) => &data.user,
            (status, _) => {
                return Err(Error::NotComplete {
                    order_ref: result.order_ref.clone(),
                    status: *status,
                });
            }
        };

        let claims = IdentityClaims {
            national_id: PersonalNumber::normalize(&user.personal_number)?,
            given_name: user.given_name.clone(),
            surname: user.surname.clone(),
        };

        let account_exists = self.account_exists(&claims.national_id).await?;
        let token = self.mint(&claims)?;

        tracing::info!(order_ref = %result.order_ref, account_exists, "Identity verified");

        Ok(IdentityAssertion {
            national_id: claims.national_id,
            given_name: claims.given_name,
            surname: claims.surname,
            token,
            account_exists,
        })
    }

    /// Existence check against the account directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Directory`] if the lookup fails.
    pub async fn account_exists(&self, national_id: &PersonalNumber) -> Result<bool, Error> {
        self.directory
            .account_exists(national_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Account lookup failed");
                Error::Directory(e.to_string())
            })
    }

    /// Signs `claims` for the configured validity window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if the service cannot sign.
    pub fn mint(&self, claims: &IdentityClaims) -> Result<String, Error> {
        Ok(self.tokens.new_token(claims, self.validity)?)
    }

    /// Verifies an identity token and returns its claims.
    ///
    /// The token is a bearer credential: it validates any number of times
    /// within its window.
    ///
    /// # Errors
    ///
    /// See [`TokenService::validate`].
    pub fn validate(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        Ok(self.tokens.validate::<IdentityClaims>(token)?.claims)
    }
}
