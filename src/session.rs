use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{AuthResponse, CollectResponse, OrderRef};

/// One in-flight authentication order.
#[derive(Clone)]
pub(crate) struct AuthSession {
    pub(crate) order_ref: OrderRef,
    pub(crate) qr_start_token: String,
    qr_start_secret: String,
    /// Epoch for the QR time offset.
    pub(crate) order_time: OffsetDateTime,
    pub(crate) end_user_ip: String,
    pub(crate) auto_start_token: String,
    pub(crate) collect_result: CollectResponse,
    pub(crate) canceled: bool,
    started: Instant,
    poll_cancel: CancellationToken,
}

impl AuthSession {
    pub(crate) fn new(order: AuthResponse, end_user_ip: String, order_time: OffsetDateTime) -> Self {
        Self {
            collect_result: CollectResponse::pending(order.order_ref.clone()),
            order_ref: order.order_ref,
            qr_start_token: order.qr_start_token,
            qr_start_secret: order.qr_start_secret,
            order_time,
            end_user_ip,
            auto_start_token: order.auto_start_token,
            canceled: false,
            started: Instant::now(),
            poll_cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn qr_start_secret(&self) -> &str {
        &self.qr_start_secret
    }

    /// Trips when the order is canceled or evicted.
    pub(crate) fn poll_cancel(&self) -> CancellationToken {
        self.poll_cancel.clone()
    }

    /// No further transitions once canceled, completed or failed.
    pub(crate) fn is_terminal(&self) -> bool {
        self.canceled || self.collect_result.status.is_terminal()
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("order_ref", &self.order_ref)
            .field("order_time", &self.order_time)
            .field("end_user_ip", &self.end_user_ip)
            .field("status", &self.collect_result.status)
            .field("canceled", &self.canceled)
            .finish_non_exhaustive()
    }
}

/// Outcome of writing a collect snapshot into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recorded {
    /// Stored; `terminal` tells whether polling should stop.
    Stored { terminal: bool },
    /// The session was already canceled or terminal; nothing changed.
    Ignored,
    Missing,
}

/// Session table keyed by order reference, guarded by a single lock.
///
/// Every mutation is a read-modify-write under that lock, so a poll update
/// and an explicit cancel can never overwrite each other.
#[derive(Debug, Default)]
pub(crate) struct SessionStore {
    sessions: Mutex<HashMap<OrderRef, AuthSession>>,
}

impl SessionStore {
    pub(crate) fn get(&self, order_ref: &OrderRef) -> Option<AuthSession> {
        self.sessions.lock().get(order_ref).cloned()
    }

    /// Inserts a session, returning any session it replaced.
    pub(crate) fn insert(&self, session: AuthSession) -> Option<AuthSession> {
        self.sessions
            .lock()
            .insert(session.order_ref.clone(), session)
    }

    /// Writes a collect snapshot unless the session is already terminal.
    pub(crate) fn record_collect(&self, order_ref: &OrderRef, response: CollectResponse) -> Recorded {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(order_ref) else {
            return Recorded::Missing;
        };
        if session.is_terminal() {
            return Recorded::Ignored;
        }
        let terminal = response.status.is_terminal();
        session.collect_result = response;
        Recorded::Stored { terminal }
    }

    /// Marks a session canceled (idempotent) and trips its poll token.
    /// Returns `false` for unknown orders.
    pub(crate) fn cancel(&self, order_ref: &OrderRef) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(order_ref) {
            Some(session) => {
                session.canceled = true;
                session.poll_cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels a session only if it is still pending. Returns whether it did.
    pub(crate) fn expire_pending(&self, order_ref: &OrderRef) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(order_ref) {
            Some(session) if !session.is_terminal() => {
                session.canceled = true;
                true
            }
            _ => false,
        }
    }

    /// Drops terminal sessions started more than `ttl` before `now`.
    pub(crate) fn sweep(&self, ttl: Duration, now: Instant) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !(s.is_terminal() && now.saturating_duration_since(s.started) >= ttl));
        before - sessions.len()
    }

    /// Trips every session's poll token.
    pub(crate) fn cancel_all_polls(&self) {
        for session in self.sessions.lock().values() {
            session.poll_cancel.cancel();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}
