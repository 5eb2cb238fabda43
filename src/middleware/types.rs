use serde::Deserialize;

use crate::types::OrderRef;

/// Body of `POST {prefix}/start`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StartBody {
    /// Falls back to `X-Forwarded-For` / `X-Real-IP` when absent.
    #[serde(default)]
    pub(super) end_user_ip: Option<String>,
    #[serde(default)]
    pub(super) personal_number: Option<String>,
}

/// Body of `collect`, `qrcode`, `cancel` and `identity`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OrderBody {
    pub(super) order_ref: OrderRef,
}

/// Body of `POST {prefix}/token`, the server-to-server flow.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TokenBody {
    pub(super) personal_number: String,
    pub(super) end_user_ip: String,
    /// Refuse with 409 when an account already exists for the number.
    #[serde(default)]
    pub(super) distinct: bool,
}
