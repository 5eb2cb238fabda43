use std::time::Duration;

use url::Url;

use super::error::AuthError;
use crate::client::{BankIdClient, ProviderConfig};
use crate::identity::IDENTITY_TOKEN_VALIDITY;
use crate::provider::{PollPolicy, Provider};
use crate::token::{TokenKey, TokenService};

/// Route and lifecycle settings shared by config and runtime state.
#[derive(Debug, Clone)]
pub(crate) struct BankIdSettings {
    pub(crate) route_prefix: String,
    pub(crate) session_ttl: Duration,
    pub(crate) sweep_interval: Duration,
    pub(crate) poll_policy: PollPolicy,
    pub(crate) synchronous_policy: PollPolicy,
    pub(crate) token_validity: time::Duration,
}

impl BankIdSettings {
    fn defaults() -> Self {
        Self {
            route_prefix: "/bankid".into(),
            session_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            poll_policy: PollPolicy::default(),
            synchronous_policy: PollPolicy::synchronous(),
            token_validity: IDENTITY_TOKEN_VALIDITY,
        }
    }
}

/// BankID route configuration.
///
/// Required collaborators (`provider`, `tokens`) are constructor parameters.
///
/// Use [`from_env()`](BankIdAuthConfig::from_env) for convention-based setup,
/// or [`new()`](BankIdAuthConfig::new) with `with_*` methods for full control.
pub struct BankIdAuthConfig<P = BankIdClient> {
    pub(super) provider: P,
    pub(super) tokens: TokenService,
    pub(super) settings: BankIdSettings,
}

impl<P: Provider> BankIdAuthConfig<P> {
    #[must_use]
    pub fn new(provider: P, tokens: TokenService) -> Self {
        Self {
            provider,
            tokens,
            settings: BankIdSettings::defaults(),
        }
    }

    /// Path prefix for every route (default `/bankid`).
    #[must_use]
    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.route_prefix = prefix.into();
        self
    }

    /// How long finished sessions stay readable (default 10 minutes).
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.settings.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, every: Duration) -> Self {
        self.settings.sweep_interval = every;
        self
    }

    #[must_use]
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.settings.poll_policy = policy;
        self
    }

    /// Budget for the server-to-server `token` route.
    #[must_use]
    pub fn with_synchronous_policy(mut self, policy: PollPolicy) -> Self {
        self.settings.synchronous_policy = policy;
        self
    }

    #[must_use]
    pub fn with_token_validity(mut self, validity: time::Duration) -> Self {
        self.settings.token_validity = validity;
        self
    }

    #[must_use]
    pub fn route_prefix(&self) -> &str {
        &self.settings.route_prefix
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }
}

impl BankIdAuthConfig<BankIdClient> {
    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `TOKEN_ISSUER`: issuer written into and required from every token
    /// - one of `TOKEN_SECRET` (v4.local) or `TOKEN_PRIVATE_KEY_HEX` /
    ///   `TOKEN_PUBLIC_KEY_HEX` (v4.public)
    ///
    /// # Optional env vars
    /// - `BANKID_BASE_URL`: provider base URL (default: test environment)
    /// - `BANKID_CERT_PATH` / `BANKID_CERT_PASS`: PKCS#12 client identity
    /// - `BANKID_CA_PATH`: PEM root certificate
    /// - `BANKID_INSECURE`: `"1"` or `"true"` skips server certificate checks
    /// - `BANKID_ROUTE_PREFIX`: default `/bankid`
    /// - `BANKID_SESSION_TTL_SECS`: default 600
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let mut provider = ProviderConfig::new();

        if let Some(url) = var("BANKID_BASE_URL") {
            let url: Url = url
                .parse()
                .map_err(|e| AuthError::Config(format!("BANKID_BASE_URL: {e}")))?;
            provider = provider.with_base_url(url);
        }
        if let Some(path) = var("BANKID_CERT_PATH") {
            provider = provider.with_identity(path, var("BANKID_CERT_PASS").unwrap_or_default());
        }
        if let Some(path) = var("BANKID_CA_PATH") {
            provider = provider.with_root_ca(path);
        }
        let insecure = matches!(var("BANKID_INSECURE").as_deref(), Some("1" | "true"));
        if insecure {
            tracing::warn!("BANKID_INSECURE is set, provider certificates are not verified");
        }
        provider = provider.with_insecure(insecure);

        let client = BankIdClient::new(provider).map_err(|e| AuthError::Config(e.to_string()))?;
        let tokens = token_service_from(&var)?;

        let mut config = Self::new(client, tokens);

        if let Some(prefix) = var("BANKID_ROUTE_PREFIX") {
            config = config.with_route_prefix(prefix);
        }
        if let Some(ttl) = var("BANKID_SESSION_TTL_SECS") {
            let secs: u64 = ttl
                .parse()
                .map_err(|e| AuthError::Config(format!("BANKID_SESSION_TTL_SECS: {e}")))?;
            config = config.with_session_ttl(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn token_service_from(var: &impl Fn(&str) -> Option<String>) -> Result<TokenService, AuthError> {
    let issuer =
        var("TOKEN_ISSUER").ok_or_else(|| AuthError::Config("TOKEN_ISSUER is required".into()))?;

    let key = match (
        var("TOKEN_SECRET"),
        var("TOKEN_PRIVATE_KEY_HEX"),
        var("TOKEN_PUBLIC_KEY_HEX"),
    ) {
        (Some(secret), _, _) => TokenKey::from_secret(&secret),
        (None, Some(private), _) => TokenKey::from_private_key_hex(&private),
        (None, None, Some(public)) => TokenKey::from_public_key_hex(&public),
        (None, None, None) => {
            return Err(AuthError::Config(
                "TOKEN_SECRET or TOKEN_PRIVATE_KEY_HEX / TOKEN_PUBLIC_KEY_HEX is required".into(),
            ));
        }
    }
    .map_err(|e| AuthError::Config(format!("token key: {e}")))?;

    TokenService::new(issuer, key).map_err(|e| AuthError::Config(format!("token service: {e}")))
}
