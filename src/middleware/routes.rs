use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use super::config::BankIdAuthConfig;
use super::error::AuthError;
use super::render;
use super::state::BankIdState;
use super::types::{OrderBody, StartBody, TokenBody};
use crate::identity::{AccountDirectory, IdentityAssertion, IdentityBridge};
use crate::orchestrator::{Orchestrator, QrState, StartedOrder};
use crate::personal_number::PersonalNumber;
use crate::provider::Provider;
use crate::types::{AuthRequest, CollectResponse, CollectStatus};

/// Create the BankID router.
///
/// Spawns the session sweeper, so it must be called inside a Tokio runtime.
pub fn bankid_routes<P, D>(config: BankIdAuthConfig<P>, accounts: D) -> Router
where
    P: Provider,
    D: AccountDirectory,
{
    let settings = config.settings;
    let prefix = settings.route_prefix.trim_end_matches('/').to_owned();

    let orchestrator = Orchestrator::new(config.provider, settings.poll_policy)
        .with_synchronous_policy(settings.synchronous_policy);
    orchestrator.spawn_sweeper(settings.sweep_interval, settings.session_ttl);

    let bridge = IdentityBridge::new(Arc::new(config.tokens), accounts)
        .with_validity(settings.token_validity);

    let state = BankIdState {
        orchestrator,
        bridge,
    };

    Router::new()
        .route(&format!("{prefix}/start"), post(start::<P, D>))
        .route(&format!("{prefix}/collect"), post(collect::<P, D>))
        .route(&format!("{prefix}/qrcode"), post(qrcode::<P, D>))
        .route(&format!("{prefix}/cancel"), post(cancel::<P, D>))
        .route(&format!("{prefix}/identity"), post(identity::<P, D>))
        .route(&format!("{prefix}/token"), post(token::<P, D>))
        .with_state(state)
}

// ── Start ──────────────────────────────────────────────────────────

async fn start<P: Provider, D: AccountDirectory>(
    State(state): State<BankIdState<P, D>>,
    headers: HeaderMap,
    Json(body): Json<StartBody>,
) -> Result<Json<StartedOrder>, AuthError> {
    let end_user_ip = body
        .end_user_ip
        .filter(|ip| !ip.trim().is_empty())
        .or_else(|| extract_client_ip(&headers))
        .ok_or_else(|| AuthError::BadRequest("endUserIp is required".into()))?;

    let mut request = AuthRequest::new(end_user_ip);
    if let Some(raw) = body.personal_number.filter(|p| !p.trim().is_empty()) {
        request = request.with_personal_number(PersonalNumber::normalize(&raw)?);
    }

    Ok(Json(state.orchestrator.start(request).await?))
}

// ── Polling ────────────────────────────────────────────────────────

async fn collect<P: Provider, D: AccountDirectory>(
    State(state): State<BankIdState<P, D>>,
    Json(body): Json<OrderBody>,
) -> Result<Json<CollectResponse>, AuthError> {
    Ok(Json(state.orchestrator.collect(&body.order_ref)?))
}

async fn qrcode<P: Provider, D: AccountDirectory>(
    State(state): State<BankIdState<P, D>>,
    Json(body): Json<OrderBody>,
) -> Result<Response, AuthError> {
    let response = match state.orchestrator.qr(&body.order_ref)? {
        QrState::Canceled => StatusCode::NO_CONTENT.into_response(),
        QrState::Complete => StatusCode::OK.into_response(),
        QrState::Failed(_) => StatusCode::UNAUTHORIZED.into_response(),
        QrState::Pending(data) => (
            StatusCode::ACCEPTED,
            [(CONTENT_TYPE, "image/png")],
            render::qr_png(&data)?,
        )
            .into_response(),
    };
    Ok(response)
}

async fn cancel<P: Provider, D: AccountDirectory>(
    State(state): State<BankIdState<P, D>>,
    Json(body): Json<OrderBody>,
) -> Result<StatusCode, AuthError> {
    state.orchestrator.cancel(&body.order_ref)?;
    Ok(StatusCode::OK)
}

// ── Identity ───────────────────────────────────────────────────────

async fn identity<P: Provider, D: AccountDirectory>(
    State(state): State<BankIdState<P, D>>,
    Json(body): Json<OrderBody>,
) -> Result<Response, AuthError> {
    let status = state.orchestrator.status(&body.order_ref)?;

    // A complete snapshot outlives a later cancel.
    match status.result.status {
        CollectStatus::Pending if status.canceled => Ok(StatusCode::NO_CONTENT.into_response()),
        CollectStatus::Pending => Ok(StatusCode::ACCEPTED.into_response()),
        CollectStatus::Failed => Err(failure(status.result)),
        CollectStatus::Complete => {
            let assertion = state.bridge.verify(&status.result).await?;
            Ok(Json(assertion).into_response())
        }
    }
}

async fn token<P: Provider, D: AccountDirectory>(
    State(state): State<BankIdState<P, D>>,
    Json(body): Json<TokenBody>,
) -> Result<Json<IdentityAssertion>, AuthError> {
    let national_id = PersonalNumber::normalize(&body.personal_number)?;

    if body.distinct && state.bridge.account_exists(&national_id).await? {
        tracing::info!("Refusing identity token, account already exists");
        return Err(AuthError::Conflict(
            "an account already exists for this personal number".into(),
        ));
    }

    let request = AuthRequest::new(body.end_user_ip).with_personal_number(national_id);
    let result = state.orchestrator.try_authenticate(&request).await?;

    match result.status {
        CollectStatus::Complete => Ok(Json(state.bridge.verify(&result).await?)),
        CollectStatus::Failed => Err(failure(result)),
        CollectStatus::Pending => Err(AuthError::Timeout(format!(
            "order {} still pending",
            result.order_ref
        ))),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn failure(result: CollectResponse) -> AuthError {
    let message_id = result.user_message_id();
    tracing::info!(
        order_ref = %result.order_ref,
        hint_code = %result.hint_code,
        message_id = message_id.unwrap_or_default(),
        "Authentication order failed"
    );
    AuthError::Failed {
        order_ref: result.order_ref,
        hint_code: result.hint_code,
        message_id,
    }
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
}
