//! In-flight authentication orders and their background polling.
//!
//! [`Orchestrator::start`] asks the provider for a new order, stores it and
//! spawns one poll task for it. The task collects the order status every
//! [`PollPolicy::interval`] until the order completes, fails, is canceled,
//! or the attempt budget runs out (which cancels the order). Web handlers
//! only ever read the stored snapshot, so [`collect`](Orchestrator::collect)
//! and [`qr`](Orchestrator::qr) are cheap enough for tight client polling.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::Error;
use crate::provider::{self, PollPolicy, Provider, bounded};
use crate::qr;
use crate::session::{AuthSession, Recorded, SessionStore};
use crate::types::{AuthRequest, CollectResponse, CollectStatus, HintCode, OrderRef};

/// What the browser needs to show the first QR frame or hand off to the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedOrder {
    pub order_ref: OrderRef,
    pub qr_data: String,
    pub auto_start_token: String,
}

/// What a polling QR client should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrState {
    /// Stop showing the QR code; the order was canceled or timed out.
    Canceled,
    /// Stop showing the QR code and proceed.
    Complete,
    /// Stop showing the QR code and show an error.
    Failed(HintCode),
    /// Keep refreshing: the current animated payload.
    Pending(String),
}

/// Snapshot plus the local cancel marker, read under one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderStatus {
    pub result: CollectResponse,
    pub canceled: bool,
}

/// Owns the session table and every order's poll task.
pub struct Orchestrator<P> {
    provider: Arc<P>,
    store: Arc<SessionStore>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    policy: PollPolicy,
    synchronous_policy: PollPolicy,
}

// Manual Clone: avoid derive adding a `P: Clone` bound.
impl<P> Clone for Orchestrator<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            store: self.store.clone(),
            tasks: self.tasks.clone(),
            shutdown: self.shutdown.clone(),
            policy: self.policy,
            synchronous_policy: self.synchronous_policy,
        }
    }
}

impl<P: Provider> Orchestrator<P> {
    #[must_use]
    pub fn new(provider: P, policy: PollPolicy) -> Self {
        Self {
            provider: Arc::new(provider),
            store: Arc::new(SessionStore::default()),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            policy,
            synchronous_policy: PollPolicy::synchronous().with_call_timeout(policy.call_timeout),
        }
    }

    /// Override the budget used by [`try_authenticate`](Self::try_authenticate).
    #[must_use]
    pub fn with_synchronous_policy(mut self, policy: PollPolicy) -> Self {
        self.synchronous_policy = policy;
        self
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Starts an order and begins polling it in the background.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Surfaces the provider's error; no session is created in that case.
    pub async fn start(&self, request: AuthRequest) -> Result<StartedOrder, Error> {
        let order = bounded(
            self.policy.call_timeout,
            "auth",
            self.provider.authenticate(&request),
        )
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Starting authentication order failed"))?;

        let order_time = OffsetDateTime::now_utc();
        let started = StartedOrder {
            order_ref: order.order_ref.clone(),
            qr_data: qr::generate_at(
                &order.qr_start_token,
                &order.qr_start_secret,
                order_time,
                order_time,
            ),
            auto_start_token: order.auto_start_token.clone(),
        };

        let session = AuthSession::new(order, request.end_user_ip, order_time);
        let poll_cancel = session.poll_cancel();
        if let Some(previous) = self.store.insert(session) {
            tracing::warn!(order_ref = %started.order_ref, "Replacing existing session with the same order reference");
            previous.poll_cancel().cancel();
        }

        self.tasks.spawn(poll_order(
            self.provider.clone(),
            self.store.clone(),
            self.policy,
            started.order_ref.clone(),
            poll_cancel,
        ));

        tracing::info!(order_ref = %started.order_ref, "Authentication order started");
        Ok(started)
    }

    /// Last status snapshot written by the poll task. Never calls the provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown orders.
    pub fn collect(&self, order_ref: &OrderRef) -> Result<CollectResponse, Error> {
        self.store
            .get(order_ref)
            .map(|s| s.collect_result)
            .ok_or_else(|| Error::NotFound(order_ref.clone()))
    }

    /// Tells a QR client whether to keep animating, and with what payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown orders.
    pub fn qr(&self, order_ref: &OrderRef) -> Result<QrState, Error> {
        let session = self
            .store
            .get(order_ref)
            .ok_or_else(|| Error::NotFound(order_ref.clone()))?;

        if session.canceled {
            return Ok(QrState::Canceled);
        }
        Ok(match session.collect_result.status {
            CollectStatus::Complete => QrState::Complete,
            CollectStatus::Failed => QrState::Failed(session.collect_result.hint_code),
            CollectStatus::Pending => QrState::Pending(qr::generate(
                &session.qr_start_token,
                session.qr_start_secret(),
                session.order_time,
            )),
        })
    }

    /// Like [`collect`](Self::collect), but also reports a local cancel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown orders.
    pub fn status(&self, order_ref: &OrderRef) -> Result<OrderStatus, Error> {
        self.store
            .get(order_ref)
            .map(|s| OrderStatus {
                canceled: s.canceled,
                result: s.collect_result,
            })
            .ok_or_else(|| Error::NotFound(order_ref.clone()))
    }

    /// Marks the order canceled and stops its poll task. Idempotent; a
    /// snapshot collected earlier stays readable through [`collect`](Self::collect).
    ///
    /// The provider is not notified; see [`provider_cancel`](Self::provider_cancel).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown orders.
    pub fn cancel(&self, order_ref: &OrderRef) -> Result<(), Error> {
        if self.store.cancel(order_ref) {
            tracing::debug!(order_ref = %order_ref, "Authentication order canceled");
            Ok(())
        } else {
            Err(Error::NotFound(order_ref.clone()))
        }
    }

    /// Cancels the order on the provider side.
    ///
    /// # Errors
    ///
    /// Surfaces the provider's error.
    pub async fn provider_cancel(&self, order_ref: &OrderRef) -> Result<(), Error> {
        bounded(
            self.policy.call_timeout,
            "cancel",
            self.provider.cancel(order_ref),
        )
        .await
    }

    /// Server-to-server flow without a QR code: start an order and collect
    /// it synchronously. Does not touch the session table.
    ///
    /// # Errors
    ///
    /// See [`provider::try_authenticate`].
    pub async fn try_authenticate(&self, request: &AuthRequest) -> Result<CollectResponse, Error> {
        provider::try_authenticate(self.provider.as_ref(), request, &self.synchronous_policy).await
    }

    /// Removes terminal sessions older than `ttl`. Returns how many were dropped.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let removed = self.store.sweep(ttl, Instant::now());
        if removed > 0 {
            tracing::debug!(removed, "Evicted finished authentication sessions");
        }
        removed
    }

    /// Runs [`sweep`](Self::sweep) every `every` until [`shutdown`](Self::shutdown).
    pub fn spawn_sweeper(&self, every: Duration, ttl: Duration) {
        let this = self.clone();
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = this.shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        this.sweep(ttl);
                    }
                }
            }
        });
    }

    /// Number of sessions in the table.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    /// Number of live background tasks (poll loops and sweeper).
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Stops every background task and waits for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.store.cancel_all_polls();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

async fn poll_order<P: Provider>(
    provider: Arc<P>,
    store: Arc<SessionStore>,
    policy: PollPolicy,
    order_ref: OrderRef,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for attempt in 1..=policy.max_attempts {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(order_ref = %order_ref, "Polling stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        match store.get(&order_ref) {
            Some(session) if !session.canceled => {}
            _ => return,
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = bounded(policy.call_timeout, "collect", provider.collect(&order_ref)) => result,
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(order_ref = %order_ref, attempt, error = %e, "Collect failed, retrying on next tick");
                continue;
            }
        };

        let status = response.status;
        match store.record_collect(&order_ref, response) {
            Recorded::Stored { terminal: true } => {
                tracing::info!(order_ref = %order_ref, status = ?status, "Authentication order finished");
                return;
            }
            Recorded::Stored { terminal: false } => {}
            Recorded::Ignored | Recorded::Missing => return,
        }
    }

    if store.expire_pending(&order_ref) {
        tracing::info!(
            order_ref = %order_ref,
            attempts = policy.max_attempts,
            "Authentication order timed out"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personal_number::PersonalNumber;
    use crate::test_support::{FakeProvider, KARL, completed};
    use std::collections::HashSet;

    fn orchestrator(provider: FakeProvider) -> Orchestrator<FakeProvider> {
        Orchestrator::new(provider, PollPolicy::default())
    }

    async fn settle(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn qr_flow_until_complete() {
        let provider = FakeProvider::new();
        provider.next_order_refs(["abc"]);
        provider.script_collect(["pending", "complete"]);
        let orch = orchestrator(provider);

        let started = orch.start(AuthRequest::new("1.2.3.4")).await.unwrap();
        assert_eq!(started.order_ref.as_str(), "abc");
        assert_eq!(started.auto_start_token, "auto-abc");
        assert!(started.qr_data.starts_with("bankid.abc.0."));

        let order_ref = OrderRef::from("abc");
        match orch.qr(&order_ref).unwrap() {
            QrState::Pending(payload) => assert!(payload.starts_with("bankid.abc.")),
            other => panic!("expected a QR payload, got {other:?}"),
        }
        assert_eq!(orch.collect(&order_ref).unwrap().status, CollectStatus::Pending);

        settle(3).await;
        assert_eq!(orch.provider().collect_calls(), 1);
        assert_eq!(orch.collect(&order_ref).unwrap().hint_code.as_str(), "outstandingTransaction");

        settle(2).await;
        assert_eq!(orch.collect(&order_ref).unwrap(), completed(order_ref.clone()));
        assert_eq!(orch.qr(&order_ref).unwrap(), QrState::Complete);

        settle(30).await;
        assert_eq!(orch.provider().collect_calls(), 2);
        assert_eq!(orch.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_until_budget_runs_out_cancels() {
        let orch = orchestrator(FakeProvider::new());
        let started = orch.start(AuthRequest::new("1.2.3.4")).await.unwrap();

        settle(27).await;
        assert!(matches!(orch.qr(&started.order_ref).unwrap(), QrState::Pending(_)));

        settle(3).await;
        assert_eq!(orch.provider().collect_calls(), 14);
        assert_eq!(orch.qr(&started.order_ref).unwrap(), QrState::Canceled);
        assert_eq!(
            orch.collect(&started.order_ref).unwrap().status,
            CollectStatus::Pending
        );
        assert_eq!(orch.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_orders_stop_polling() {
        let provider = FakeProvider::new();
        provider.script_collect(["failed", "complete"]);
        let orch = orchestrator(provider);
        let started = orch.start(AuthRequest::new("1.2.3.4")).await.unwrap();

        settle(10).await;
        assert_eq!(orch.provider().collect_calls(), 1);
        assert_eq!(
            orch.qr(&started.order_ref).unwrap(),
            QrState::Failed("userCancel".into())
        );
        assert_eq!(
            orch.collect(&started.order_ref).unwrap().status,
            CollectStatus::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_collect_errors_are_retried() {
        let provider = FakeProvider::new();
        provider.fail_collects(3);
        provider.script_collect(["complete"]);
        let orch = orchestrator(provider);
        let started = orch.start(AuthRequest::new("1.2.3.4")).await.unwrap();

        settle(7).await;
        assert_eq!(orch.provider().collect_calls(), 3);
        assert!(matches!(orch.qr(&started.order_ref).unwrap(), QrState::Pending(_)));

        settle(2).await;
        assert_eq!(orch.provider().collect_calls(), 4);
        assert_eq!(orch.qr(&started.order_ref).unwrap(), QrState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_polling_immediately() {
        let orch = orchestrator(FakeProvider::new());
        let started = orch.start(AuthRequest::new("1.2.3.4")).await.unwrap();

        orch.cancel(&started.order_ref).unwrap();
        orch.cancel(&started.order_ref).unwrap();
        assert_eq!(orch.qr(&started.order_ref).unwrap(), QrState::Canceled);

        settle(1).await;
        assert_eq!(orch.active_tasks(), 0);

        settle(30).await;
        assert_eq!(orch.provider().collect_calls(), 0);
        for _ in 0..3 {
            assert_eq!(
                orch.collect(&started.order_ref).unwrap().status,
                CollectStatus::Pending
            );
            assert_eq!(orch.qr(&started.order_ref).unwrap(), QrState::Canceled);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_complete_keeps_the_result() {
        let provider = FakeProvider::new();
        provider.script_collect(["complete"]);
        let orch = orchestrator(provider);
        let started = orch.start(AuthRequest::new("1.2.3.4")).await.unwrap();

        settle(3).await;
        orch.cancel(&started.order_ref).unwrap();

        assert_eq!(orch.qr(&started.order_ref).unwrap(), QrState::Canceled);
        assert_eq!(
            orch.collect(&started.order_ref).unwrap(),
            completed(started.order_ref.clone())
        );
        let status = orch.status(&started.order_ref).unwrap();
        assert!(status.canceled);
        assert_eq!(status.result.status, CollectStatus::Complete);
    }

    #[tokio::test]
    async fn unknown_orders_are_not_found() {
        let orch = orchestrator(FakeProvider::new());
        let unknown = OrderRef::from("missing");

        assert!(matches!(orch.collect(&unknown), Err(Error::NotFound(_))));
        assert!(matches!(orch.qr(&unknown), Err(Error::NotFound(_))));
        assert!(matches!(orch.cancel(&unknown), Err(Error::NotFound(_))));
        assert!(matches!(orch.status(&unknown), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_start_creates_no_session() {
        let provider = FakeProvider::new();
        provider.fail_auth();
        let orch = orchestrator(provider);

        let err = orch.start(AuthRequest::new("1.2.3.4")).await.unwrap_err();
        assert!(matches!(err, Error::Provider { status: 400, .. }));
        assert_eq!(orch.provider().auth_calls(), 1);
        assert_eq!(orch.session_count(), 0);
        assert_eq!(orch.active_tasks(), 0);
    }

    #[tokio::test]
    async fn personal_number_is_forwarded() {
        let orch = orchestrator(FakeProvider::new());
        let pnr: PersonalNumber = KARL.parse().unwrap();
        orch.start(AuthRequest::new("1.2.3.4").with_personal_number(pnr.clone()))
            .await
            .unwrap();

        let sent = orch.provider().last_request().unwrap();
        assert_eq!(sent.personal_number, Some(pnr));
        assert_eq!(sent.end_user_ip, "1.2.3.4");
        orch.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_are_isolated() {
        let orch = orchestrator(FakeProvider::new());

        let starts = (0..16).map(|i| {
            let orch = orch.clone();
            tokio::spawn(async move { orch.start(AuthRequest::new(format!("10.0.0.{i}"))).await })
        });
        let started: Vec<StartedOrder> = futures::future::join_all(starts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let refs: HashSet<_> = started.iter().map(|s| s.order_ref.clone()).collect();
        assert_eq!(refs.len(), 16);
        assert_eq!(orch.session_count(), 16);

        for order in &started {
            let session = orch.store.get(&order.order_ref).unwrap();
            assert_eq!(session.qr_start_token, order.order_ref.as_str());
            assert_eq!(session.qr_start_secret(), format!("secret-{}", order.order_ref));
            assert_eq!(session.auto_start_token, order.auto_start_token);
            assert!(order.qr_data.starts_with(&format!("bankid.{}.", order.order_ref)));
        }

        let ips: HashSet<_> = started
            .iter()
            .map(|o| orch.store.get(&o.order_ref).unwrap().end_user_ip)
            .collect();
        assert_eq!(ips.len(), 16);

        orch.shutdown().await;
        assert_eq!(orch.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_an_order_replaces_its_poll_task() {
        let provider = FakeProvider::new();
        provider.next_order_refs(["abc", "abc"]);
        let orch = orchestrator(provider);

        orch.start(AuthRequest::new("1.2.3.4")).await.unwrap();
        let first = orch.store.get(&"abc".into()).unwrap().poll_cancel();
        orch.start(AuthRequest::new("1.2.3.4")).await.unwrap();

        assert!(first.is_cancelled());
        settle(1).await;
        assert_eq!(orch.active_tasks(), 1);
        assert_eq!(orch.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_finished_sessions() {
        let provider = FakeProvider::new();
        provider.script_collect(["complete"]);
        let orch = orchestrator(provider);
        let done = orch.start(AuthRequest::new("1.2.3.4")).await.unwrap();
        orch.spawn_sweeper(Duration::from_secs(60), Duration::from_secs(300));

        settle(3).await;
        let waiting = orch.start(AuthRequest::new("1.2.3.4")).await.unwrap();
        orch.cancel(&waiting.order_ref).unwrap();

        settle(299).await;
        assert!(matches!(orch.collect(&done.order_ref), Err(Error::NotFound(_))));
        assert!(orch.collect(&waiting.order_ref).is_ok());

        settle(60).await;
        assert!(matches!(orch.collect(&waiting.order_ref), Err(Error::NotFound(_))));
        assert_eq!(orch.session_count(), 0);

        orch.shutdown().await;
        assert_eq!(orch.active_tasks(), 0);
    }

    #[tokio::test]
    async fn provider_cancel_is_forwarded() {
        let orch = orchestrator(FakeProvider::new());
        orch.provider_cancel(&"abc".into()).await.unwrap();
        assert_eq!(orch.provider().cancel_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn try_authenticate_leaves_the_table_alone() {
        let provider = FakeProvider::new();
        provider.script_collect(["pending", "complete"]);
        let orch = orchestrator(provider);

        let result = orch
            .try_authenticate(&AuthRequest::new("1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(result.status, CollectStatus::Complete);
        assert_eq!(orch.session_count(), 0);
    }
}
