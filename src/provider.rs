use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::types::{AuthRequest, AuthResponse, CollectResponse, OrderRef};

/// The identification provider's relying-party API.
///
/// [`BankIdClient`](crate::client::BankIdClient) talks to the real service;
/// tests plug in scripted fakes.
pub trait Provider: Send + Sync + 'static {
    /// Starts an authentication order.
    fn authenticate(
        &self,
        request: &AuthRequest,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    /// Fetches the current status of an order.
    fn collect(
        &self,
        order_ref: &OrderRef,
    ) -> impl Future<Output = Result<CollectResponse, Error>> + Send;

    /// Cancels an order on the provider side.
    fn cancel(&self, order_ref: &OrderRef) -> impl Future<Output = Result<(), Error>> + Send;
}

impl<T: Provider> Provider for Arc<T> {
    fn authenticate(
        &self,
        request: &AuthRequest,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send {
        (**self).authenticate(request)
    }

    fn collect(
        &self,
        order_ref: &OrderRef,
    ) -> impl Future<Output = Result<CollectResponse, Error>> + Send {
        (**self).collect(order_ref)
    }

    fn cancel(&self, order_ref: &OrderRef) -> impl Future<Output = Result<(), Error>> + Send {
        (**self).cancel(order_ref)
    }
}

/// Cadence and budget for collecting an order's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Upper bound for a single provider call.
    pub call_timeout: Duration,
}

impl Default for PollPolicy {
    /// 14 polls two seconds apart, finishing before the provider's own
    /// 30 second order lifetime.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 14,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl PollPolicy {
    /// Budget for [`try_authenticate`]: up to 15 collects two seconds apart.
    #[must_use]
    pub fn synchronous() -> Self {
        Self {
            max_attempts: 15,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

/// Starts an order and collects it synchronously until it leaves `pending`
/// or the attempt budget runs out.
///
/// Used by server-to-server callers that already know the personal number
/// and do not show a QR code. Exhausting the budget is not an error: the
/// last (still pending) snapshot is returned.
///
/// # Errors
///
/// Returns the first provider, transport or timeout error encountered.
pub async fn try_authenticate<P: Provider>(
    provider: &P,
    request: &AuthRequest,
    policy: &PollPolicy,
) -> Result<CollectResponse, Error> {
    let order = bounded(policy.call_timeout, "auth", provider.authenticate(request)).await?;
    let mut last = CollectResponse::pending(order.order_ref.clone());

    for attempt in 1..=policy.max_attempts {
        last = bounded(
            policy.call_timeout,
            "collect",
            provider.collect(&order.order_ref),
        )
        .await?;

        tracing::debug!(
            order_ref = %order.order_ref,
            attempt,
            status = ?last.status,
            hint_code = %last.hint_code,
            "Collected order status"
        );

        if last.status.is_terminal() {
            break;
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Ok(last)
}

/// Applies a per-call deadline to a provider future.
pub(crate) async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| Error::Timeout(operation))?
}
