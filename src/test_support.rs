//! Scripted collaborators shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Error;
use crate::identity::AccountDirectory;
use crate::personal_number::PersonalNumber;
use crate::provider::Provider;
use crate::types::{
    AuthRequest, AuthResponse, CollectResponse, CollectStatus, CompletionData, CompletionUser,
    OrderRef,
};

pub(crate) const KARL: &str = "198112189876";

/// Provider fake. Order references are `order-1`, `order-2`, ... unless
/// queued with [`FakeProvider::next_order_refs`]; `qrStartToken` equals the
/// order reference.
#[derive(Default)]
pub(crate) struct FakeProvider {
    order_refs: Mutex<VecDeque<String>>,
    script: Mutex<VecDeque<&'static str>>,
    issued: AtomicU32,
    auth_calls: AtomicU32,
    collect_calls: AtomicU32,
    cancel_calls: AtomicU32,
    collect_failures: AtomicU32,
    fail_auth: AtomicBool,
    collect_delay: Mutex<Option<Duration>>,
    last_request: Mutex<Option<AuthRequest>>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_order_refs<const N: usize>(&self, refs: [&str; N]) {
        self.order_refs
            .lock()
            .extend(refs.iter().map(|r| (*r).to_owned()));
    }

    /// Queues collect outcomes (`pending`, `complete`, `failed`). Once the
    /// script runs dry every collect answers `pending`.
    pub(crate) fn script_collect<const N: usize>(&self, statuses: [&'static str; N]) {
        self.script.lock().extend(statuses);
    }

    pub(crate) fn fail_collects(&self, n: u32) {
        self.collect_failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_auth(&self) {
        self.fail_auth.store(true, Ordering::SeqCst);
    }

    pub(crate) fn delay_collects(&self, delay: Duration) {
        *self.collect_delay.lock() = Some(delay);
    }

    pub(crate) fn auth_calls(&self) -> u32 {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn collect_calls(&self) -> u32 {
        self.collect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_calls(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<AuthRequest> {
        self.last_request.lock().clone()
    }
}

pub(crate) fn completed(order_ref: OrderRef) -> CollectResponse {
    CollectResponse {
        order_ref,
        status: CollectStatus::Complete,
        hint_code: Default::default(),
        completion_data: Some(CompletionData {
            user: CompletionUser {
                personal_number: KARL.into(),
                name: "Karl Karlsson".into(),
                given_name: "Karl".into(),
                surname: "Karlsson".into(),
            },
            ..Default::default()
        }),
    }
}

impl Provider for FakeProvider {
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResponse, Error> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(Error::Provider {
                operation: "auth",
                status: 400,
                body: r#"{"errorCode":"invalidParameters"}"#.into(),
            });
        }

        let order_ref = self.order_refs.lock().pop_front().unwrap_or_else(|| {
            format!("order-{}", self.issued.fetch_add(1, Ordering::SeqCst) + 1)
        });
        Ok(AuthResponse {
            order_ref: OrderRef(order_ref.clone()),
            auto_start_token: format!("auto-{order_ref}"),
            qr_start_token: order_ref.clone(),
            qr_start_secret: format!("secret-{order_ref}"),
        })
    }

    async fn collect(&self, order_ref: &OrderRef) -> Result<CollectResponse, Error> {
        let delay = *self.collect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.collect_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .collect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Provider {
                operation: "collect",
                status: 503,
                body: "maintenance".into(),
            });
        }

        let next = self.script.lock().pop_front().unwrap_or("pending");
        let mut response = CollectResponse::pending(order_ref.clone());
        match next {
            "complete" => response = completed(order_ref.clone()),
            "failed" => {
                response.status = CollectStatus::Failed;
                response.hint_code = "userCancel".into();
            }
            _ => response.hint_code = "outstandingTransaction".into(),
        }
        Ok(response)
    }

    async fn cancel(&self, _order_ref: &OrderRef) -> Result<(), Error> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Account directory fake backed by a set of personal numbers.
#[derive(Default)]
pub(crate) struct InMemoryDirectory {
    known: Mutex<HashSet<String>>,
    broken: AtomicBool,
}

impl InMemoryDirectory {
    pub(crate) fn with_accounts<const N: usize>(ids: [&str; N]) -> Self {
        let directory = Self::default();
        directory
            .known
            .lock()
            .extend(ids.iter().map(|id| (*id).to_owned()));
        directory
    }

    pub(crate) fn broken() -> Self {
        let directory = Self::default();
        directory.broken.store(true, Ordering::SeqCst);
        directory
    }
}

impl AccountDirectory for InMemoryDirectory {
    async fn account_exists(
        &self,
        national_id: &PersonalNumber,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        Ok(self.known.lock().contains(national_id.as_str()))
    }
}
