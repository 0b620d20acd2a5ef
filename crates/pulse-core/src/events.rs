use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events pushed over the live feed. Wire shape is `{"type": ..., "data": ...}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FeedEvent {
    /// Sent once per session, immediately after admission, so the client can
    /// confirm end-to-end delivery rather than just a TCP connect.
    Connected(StatusPayload),

    /// Periodic liveness probe. Successful delivery is the only liveness
    /// signal the server relies on.
    Heartbeat(StatusPayload),

    Verification(BusinessPayload),
    StatusChange(BusinessPayload),
    NewScan(BusinessPayload),

    Error(ErrorPayload),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Payload for business events (verification, status change, badge scan).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BusinessPayload {
    pub registration_id: String,
    pub full_name: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub message: String,
}

impl FeedEvent {
    pub fn connected(message: impl Into<String>) -> Self {
        Self::Connected(StatusPayload {
            message: Some(message.into()),
            timestamp: Utc::now(),
        })
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat(StatusPayload {
            message: None,
            timestamp: Utc::now(),
        })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Heartbeat(_) => "heartbeat",
            Self::Verification(_) => "verification",
            Self::StatusChange(_) => "status_change",
            Self::NewScan(_) => "new_scan",
            Self::Error(_) => "error",
        }
    }
}

/// Raw wire form of a feed event.
///
/// Clients deserialize into this first so an event type they don't recognize
/// is ignored rather than a parse failure (forward compatibility).
#[derive(Clone, Debug, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl WireEvent {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.event_type == "heartbeat"
    }
}
