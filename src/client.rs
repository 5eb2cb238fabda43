use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use url::Url;

use crate::error::Error;
use crate::provider::{self, PollPolicy, Provider};
use crate::types::{AuthRequest, AuthResponse, CollectResponse, OrderRef};

/// Provider test environment.
pub const TEST_BASE_URL: &str = "https://appapi2.test.bankid.com";

const API_VERSION: &str = "v6.0";

/// Connection settings for the relying-party API.
///
/// ```rust,ignore
/// use bankid_auth::ProviderConfig;
///
/// let config = ProviderConfig::new()
///     .with_identity("certs/rp.p12", "qwerty123")
///     .with_root_ca("certs/test.crt");
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub struct ProviderConfig {
    pub(crate) base_url: Url,
    pub(crate) identity_path: Option<PathBuf>,
    pub(crate) identity_password: String,
    pub(crate) root_ca_path: Option<PathBuf>,
    pub(crate) insecure: bool,
    pub(crate) timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url.as_str())
            .field("identity_path", &self.identity_path)
            .field("root_ca_path", &self.root_ca_path)
            .field("insecure", &self.insecure)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderConfig {
    /// Test environment, no client identity, 30 second timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: TEST_BASE_URL.parse().expect("valid default URL"),
            identity_path: None,
            identity_password: String::new(),
            root_ca_path: None,
            insecure: false,
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: Url) -> Self {
        self.base_url = url;
        self
    }

    /// PKCS#12 bundle holding the relying-party certificate and key.
    #[must_use]
    pub fn with_identity(mut self, path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        self.identity_path = Some(path.into());
        self.identity_password = password.into();
        self
    }

    /// PEM root certificate the provider's server certificate chains to.
    /// Replaces the system trust store when set.
    #[must_use]
    pub fn with_root_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_ca_path = Some(path.into());
        self
    }

    /// Skip server certificate verification. Local development only.
    #[must_use]
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_http(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.insecure);

        if let Some(path) = &self.identity_path {
            let der = read_file(path, "client identity")?;
            let identity = reqwest::Identity::from_pkcs12_der(&der, &self.identity_password)
                .map_err(|e| Error::Config(format!("invalid client identity: {e}")))?;
            builder = builder.identity(identity);
        }

        if let Some(path) = &self.root_ca_path {
            let pem = read_file(path, "root CA")?;
            let ca = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::Config(format!("invalid root CA: {e}")))?;
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(ca);
        }

        builder
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))
    }
}

fn read_file(path: &std::path::Path, what: &str) -> Result<Vec<u8>, Error> {
    std::fs::read(path)
        .map_err(|e| Error::Config(format!("cannot read {what} {}: {e}", path.display())))
}

#[derive(Debug, Clone)]
struct Endpoints {
    auth: Url,
    collect: Url,
    cancel: Url,
}

impl Endpoints {
    fn new(base: &Url) -> Result<Self, Error> {
        let endpoint = |name: &str| -> Result<Url, Error> {
            let mut url = base.clone();
            url.path_segments_mut()
                .map_err(|()| Error::Config(format!("base URL cannot be a base: {base}")))?
                .pop_if_empty()
                .extend(["rp", API_VERSION, name]);
            Ok(url)
        };
        Ok(Self {
            auth: endpoint("auth")?,
            collect: endpoint("collect")?,
            cancel: endpoint("cancel")?,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderBody<'a> {
    order_ref: &'a OrderRef,
}

/// HTTPS client for the relying-party API, authenticated with the
/// relying party's client certificate.
#[derive(Debug, Clone)]
pub struct BankIdClient {
    endpoints: Endpoints,
    http: reqwest::Client,
}

impl BankIdClient {
    /// Loads the TLS material named in `config` and builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a certificate file cannot be read or
    /// parsed, or the base URL is unusable.
    pub fn new(config: ProviderConfig) -> Result<Self, Error> {
        Ok(Self {
            endpoints: Endpoints::new(&config.base_url)?,
            http: config.build_http()?,
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Starts an order and collects it until it finishes, see
    /// [`provider::try_authenticate`].
    ///
    /// # Errors
    ///
    /// Returns the first transport, provider or timeout error.
    pub async fn try_authenticate(
        &self,
        request: &AuthRequest,
        policy: &PollPolicy,
    ) -> Result<CollectResponse, Error> {
        provider::try_authenticate(self, request, policy).await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        let response = self.http.post(url.clone()).json(body).send().await?;
        Self::ensure_success(response, operation).await
    }

    /// Only `200 OK` counts as success; anything else becomes [`Error::Provider`].
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status() == reqwest::StatusCode::OK {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(operation, status, body = %body, "Provider call rejected");
        Err(Error::Provider {
            operation,
            status,
            body,
        })
    }
}

impl Provider for BankIdClient {
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResponse, Error> {
        let response = self.post(&self.endpoints.auth, request, "auth").await?;
        Ok(response.json::<AuthResponse>().await?)
    }

    async fn collect(&self, order_ref: &OrderRef) -> Result<CollectResponse, Error> {
        let response = self
            .post(&self.endpoints.collect, &OrderBody { order_ref }, "collect")
            .await?;
        Ok(response.json::<CollectResponse>().await?)
    }

    async fn cancel(&self, order_ref: &OrderRef) -> Result<(), Error> {
        self.post(&self.endpoints.cancel, &OrderBody { order_ref }, "cancel")
            .await?;
        Ok(())
    }
}
