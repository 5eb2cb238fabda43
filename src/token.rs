use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::{AsymmetricPublicKey, AsymmetricSecretKey, SymmetricKey};
use pasetors::token::UntrustedToken;
use pasetors::version4::V4;
use pasetors::{Local, Public, local, public};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::error::TokenError;

const LOCAL_HEADER: &str = "v4.local.";
const PUBLIC_HEADER: &str = "v4.public.";

/// Which PASETO purpose a service signs and accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMethod {
    /// `v4.local`: symmetric, authenticated encryption with a shared secret.
    Local,
    /// `v4.public`: Ed25519 signatures.
    Public,
}

impl SigningMethod {
    fn header(self) -> &'static str {
        match self {
            Self::Local => LOCAL_HEADER,
            Self::Public => PUBLIC_HEADER,
        }
    }
}

/// Key material for a [`TokenService`].
pub enum TokenKey {
    Symmetric(SymmetricKey<V4>),
    Asymmetric {
        /// Absent for services that only verify tokens.
        secret: Option<AsymmetricSecretKey<V4>>,
        public: AsymmetricPublicKey<V4>,
    },
}

impl TokenKey {
    /// Derives a 32-byte v4.local key from a shared secret of any length.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::MissingKey`] if `secret` is empty.
    pub fn from_secret(secret: &str) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingKey);
        }
        let digest = Sha256::digest(secret.as_bytes());
        Ok(Self::Symmetric(SymmetricKey::<V4>::from(digest.as_slice())?))
    }

    /// Parses a hex-encoded Ed25519 secret key (64 bytes: seed followed by
    /// the public key). The public half is taken from the same bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Invalid`] if the hex or the key length is wrong.
    pub fn from_private_key_hex(secret_key_hex: &str) -> Result<Self, TokenError> {
        let bytes = decode_hex_key(secret_key_hex, 64)?;
        Ok(Self::Asymmetric {
            secret: Some(AsymmetricSecretKey::<V4>::from(&bytes)?),
            public: AsymmetricPublicKey::<V4>::from(&bytes[32..])?,
        })
    }

    /// Parses a hex-encoded Ed25519 public key (32 bytes) for a verify-only service.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Invalid`] if the hex or the key length is wrong.
    pub fn from_public_key_hex(public_key_hex: &str) -> Result<Self, TokenError> {
        let bytes = decode_hex_key(public_key_hex, 32)?;
        Ok(Self::Asymmetric {
            secret: None,
            public: AsymmetricPublicKey::<V4>::from(&bytes)?,
        })
    }

    fn method(&self) -> SigningMethod {
        match self {
            Self::Symmetric(_) => SigningMethod::Local,
            Self::Asymmetric { .. } => SigningMethod::Public,
        }
    }
}

fn decode_hex_key(key_hex: &str, expected_len: usize) -> Result<Vec<u8>, TokenError> {
    let bytes =
        hex::decode(key_hex.trim()).map_err(|e| TokenError::Invalid(format!("invalid hex: {e}")))?;
    if bytes.len() != expected_len {
        return Err(TokenError::Invalid(format!(
            "invalid key length: expected {expected_len}, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Registered claims stamped on every token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredClaims {
    pub issuer: String,
    pub issued_at: OffsetDateTime,
    pub not_before: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// A token that passed signature, issuer and validity checks.
#[derive(Debug, Clone)]
pub struct VerifiedToken<C> {
    pub registered: RegisteredClaims,
    pub claims: C,
}

/// Issues and validates short-lived PASETO v4 assertions.
pub struct TokenService {
    issuer: String,
    key: TokenKey,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("method", &self.key.method())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, serde::Deserialize)]
struct Empty {}

impl TokenService {
    /// Creates the service and runs [`health_check`](Self::health_check).
    ///
    /// # Errors
    ///
    /// Returns the health check's error if a sign/verify round-trip fails.
    pub fn new(issuer: impl Into<String>, key: TokenKey) -> Result<Self, TokenError> {
        let service = Self {
            issuer: issuer.into(),
            key,
        };
        service.health_check()?;
        Ok(service)
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn method(&self) -> SigningMethod {
        self.key.method()
    }

    /// Whether this service holds a signing key.
    #[must_use]
    pub fn can_sign(&self) -> bool {
        !matches!(self.key, TokenKey::Asymmetric { secret: None, .. })
    }

    /// Round-trips an empty one-minute token. Verify-only services pass
    /// trivially since there is nothing to sign with.
    ///
    /// # Errors
    ///
    /// Returns whatever issuing or validating the probe token fails with.
    pub fn health_check(&self) -> Result<(), TokenError> {
        if !self.can_sign() {
            return Ok(());
        }
        let token = self.new_token(&Empty {}, Duration::minutes(1))?;
        self.validate::<Empty>(&token).map(|_| ())
    }

    /// Signs `claim` with `iss`, `iat`, `nbf` and `exp` stamped from now.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::MissingKey`] without a signing key, or
    /// [`TokenError::Invalid`] if `claim` does not serialize to a JSON object
    /// or uses a registered claim name.
    pub fn new_token<C: Serialize>(
        &self,
        claim: &C,
        validity: Duration,
    ) -> Result<String, TokenError> {
        self.new_token_at(claim, validity, OffsetDateTime::now_utc())
    }

    /// Like [`new_token`](Self::new_token) with an explicit issue time.
    ///
    /// # Errors
    ///
    /// See [`new_token`](Self::new_token).
    pub fn new_token_at<C: Serialize>(
        &self,
        claim: &C,
        validity: Duration,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        if !self.can_sign() {
            return Err(TokenError::MissingKey);
        }

        let issued_at = now
            .replace_nanosecond(0)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        let mut claims = Claims::new()?;
        claims.issuer(&self.issuer)?;
        claims.issued_at(&format_time(issued_at)?)?;
        claims.not_before(&format_time(issued_at)?)?;
        claims.expiration(&format_time(issued_at + validity)?)?;

        let custom = serde_json::to_value(claim).map_err(|e| TokenError::Invalid(e.to_string()))?;
        let JsonValue::Object(fields) = custom else {
            return Err(TokenError::Invalid("claim must be a JSON object".into()));
        };
        for (name, value) in fields {
            claims.add_additional(&name, value)?;
        }

        let token = match &self.key {
            TokenKey::Symmetric(key) => local::encrypt(key, &claims, None, None)?,
            TokenKey::Asymmetric {
                secret: Some(secret),
                ..
            } => public::sign(secret, &claims, None, None)?,
            TokenKey::Asymmetric { secret: None, .. } => return Err(TokenError::MissingKey),
        };
        Ok(token)
    }

    /// Verifies `token` and decodes its custom claims into `C`.
    ///
    /// # Errors
    ///
    /// - [`TokenError::SigningMethodMismatch`] if the token uses the other purpose
    /// - [`TokenError::Expired`] once `exp` has passed
    /// - [`TokenError::Invalid`] for anything else (format, signature, issuer, `nbf`, payload)
    pub fn validate<C: DeserializeOwned>(&self, token: &str) -> Result<VerifiedToken<C>, TokenError> {
        self.validate_at(token, OffsetDateTime::now_utc())
    }

    /// Like [`validate`](Self::validate) against an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn validate_at<C: DeserializeOwned>(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<VerifiedToken<C>, TokenError> {
        let expected = self.method().header();
        if !token.starts_with(expected) {
            return if token.starts_with(LOCAL_HEADER) || token.starts_with(PUBLIC_HEADER) {
                Err(TokenError::SigningMethodMismatch)
            } else {
                Err(TokenError::Invalid("invalid token format".into()))
            };
        }

        // `nbf` and `exp` are checked below against `now`; pasetors still
        // rejects tokens past `exp` on the wall clock.
        let mut rules = ClaimsValidationRules::new();
        rules.disable_valid_at();
        rules.validate_issuer_with(&self.issuer);

        let trusted = match &self.key {
            TokenKey::Symmetric(key) => {
                let untrusted = UntrustedToken::<Local, V4>::try_from(token)?;
                local::decrypt(key, &untrusted, &rules, None, None)?
            }
            TokenKey::Asymmetric { public: key, .. } => {
                let untrusted = UntrustedToken::<Public, V4>::try_from(token)?;
                public::verify(key, &untrusted, &rules, None, None)?
            }
        };

        let payload = trusted
            .payload_claims()
            .ok_or_else(|| TokenError::Invalid("missing payload".into()))?
            .to_string()?;
        let json: JsonValue =
            serde_json::from_str(&payload).map_err(|e| TokenError::Invalid(e.to_string()))?;

        let registered = RegisteredClaims {
            issuer: string_claim(&json, "iss")?.to_owned(),
            issued_at: time_claim(&json, "iat")?,
            not_before: time_claim(&json, "nbf")?,
            expires_at: time_claim(&json, "exp")?,
        };

        if now >= registered.expires_at {
            return Err(TokenError::Expired);
        }
        if now < registered.not_before {
            return Err(TokenError::Invalid("token not yet valid".into()));
        }

        let claims = serde_json::from_value(json).map_err(|e| TokenError::Invalid(e.to_string()))?;
        Ok(VerifiedToken { registered, claims })
    }
}

fn format_time(t: OffsetDateTime) -> Result<String, TokenError> {
    t.format(&Rfc3339)
        .map_err(|e| TokenError::Invalid(e.to_string()))
}

fn string_claim<'a>(json: &'a JsonValue, name: &str) -> Result<&'a str, TokenError> {
    json.get(name)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| TokenError::Invalid(format!("missing claim: {name}")))
}

fn time_claim(json: &JsonValue, name: &str) -> Result<OffsetDateTime, TokenError> {
    OffsetDateTime::parse(string_claim(json, name)?, &Rfc3339)
        .map_err(|e| TokenError::Invalid(format!("{name}: {e}")))
}
