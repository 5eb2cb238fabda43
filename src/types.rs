use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::personal_number::PersonalNumber;

/// Provider-issued order reference (primary key of an authentication session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct OrderRef(pub String);

impl OrderRef {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrderRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Optional constraints forwarded to the provider with an `auth` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_reader: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificate_policies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_code: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_number: Option<PersonalNumber>,
}

/// Body of the provider `auth` call.
///
/// Leaving `personal_number` empty starts the "any device" flow, where the
/// user identifies themselves by scanning the QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AuthRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_number: Option<PersonalNumber>,
    pub end_user_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<Requirement>,
}

impl AuthRequest {
    #[must_use]
    pub fn new(end_user_ip: impl Into<String>) -> Self {
        Self {
            personal_number: None,
            end_user_ip: end_user_ip.into(),
            requirement: None,
        }
    }

    #[must_use]
    pub fn with_personal_number(mut self, personal_number: PersonalNumber) -> Self {
        self.personal_number = Some(personal_number);
        self
    }

    #[must_use]
    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirement = Some(requirement);
        self
    }
}

/// Provider answer to `auth`. The QR secrets stay inside the process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub order_ref: OrderRef,
    pub auto_start_token: String,
    pub qr_start_token: String,
    pub qr_start_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollectStatus {
    #[default]
    Pending,
    Complete,
    Failed,
}

impl CollectStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Provider hint code, e.g. `outstandingTransaction` or `userCancel`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, From)]
#[serde(transparent)]
pub struct HintCode(pub String);

impl HintCode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for HintCode {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionUser {
    pub personal_number: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub surname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionDevice {
    #[serde(default)]
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionCert {
    #[serde(default)]
    pub not_before: String,
    #[serde(default)]
    pub not_after: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionData {
    pub user: CompletionUser,
    #[serde(default)]
    pub device: CompletionDevice,
    #[serde(default)]
    pub cert: CompletionCert,
    #[serde(default)]
    pub bank_id_issue_date: Option<String>,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub ocsp_response: String,
}

/// Status snapshot returned by the provider `collect` call.
///
/// The same shape is handed out by the orchestrator to polling clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectResponse {
    pub order_ref: OrderRef,
    pub status: CollectStatus,
    #[serde(default, skip_serializing_if = "HintCode::is_empty")]
    pub hint_code: HintCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_data: Option<CompletionData>,
}

impl CollectResponse {
    /// Initial snapshot for an order that has not been collected yet.
    #[must_use]
    pub fn pending(order_ref: OrderRef) -> Self {
        Self {
            order_ref,
            status: CollectStatus::Pending,
            hint_code: HintCode::default(),
            completion_data: None,
        }
    }

    /// Recommended user message identifier (`RFA*`) for the current status.
    #[must_use]
    pub fn user_message_id(&self) -> Option<&'static str> {
        match (self.status, self.hint_code.as_str()) {
            (CollectStatus::Complete, _) => None,
            (CollectStatus::Pending, "outstandingTransaction" | "noClient") => Some("RFA1"),
            (CollectStatus::Pending, "userMrtd") => Some("RFA23"),
            (CollectStatus::Pending, "userCallConfirm") => Some("RFA24"),
            (CollectStatus::Pending, "userSign") => Some("RFA9"),
            (CollectStatus::Pending, "started") => Some("RFA15"),
            (CollectStatus::Pending, _) => Some("RFA21"),
            (CollectStatus::Failed, "expiredTransaction") => Some("RFA8"),
            (CollectStatus::Failed, "certificateErr") => Some("RFA16"),
            (CollectStatus::Failed, "userCancel") => Some("RFA6"),
            (CollectStatus::Failed, "cancelled") => Some("RFA3"),
            (CollectStatus::Failed, "startFailed") => Some("RFA17"),
            (CollectStatus::Failed, "userDeclinedCall") => Some("RFA4"),
            (CollectStatus::Failed, _) => Some("RFA22"),
        }
    }
}
