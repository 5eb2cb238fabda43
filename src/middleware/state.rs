use std::sync::Arc;

use axum::extract::FromRef;

use crate::identity::{AccountDirectory, IdentityBridge};
use crate::orchestrator::Orchestrator;
use crate::token::TokenService;

/// Shared state for the BankID route handlers.
pub(super) struct BankIdState<P, D> {
    pub(super) orchestrator: Orchestrator<P>,
    pub(super) bridge: IdentityBridge<D>,
}

// Manual Clone: avoid derive adding `P: Clone, D: Clone` bounds.
impl<P, D> Clone for BankIdState<P, D> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            bridge: self.bridge.clone(),
        }
    }
}

// Lets `VerifiedIdentity` run inside the BankID router too.
impl<P, D: AccountDirectory> FromRef<BankIdState<P, D>> for Arc<TokenService> {
    fn from_ref(state: &BankIdState<P, D>) -> Self {
        state.bridge.tokens().clone()
    }
}
