//! Realtime wire messages
//!
//! Every frame is a JSON envelope `{"type": ..., "payload": ...}`.

use crate::credentials::Audience;
use crate::dashboard::{
    AttendanceStats, DashboardSnapshot, LeaderboardEntry, LiveFeedEntry, PublicFeedEntry,
    PublicLeaderboardEntry, PublicSnapshot,
};
use crate::error::Error;
use crate::models::{ClassId, SchoolId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One recorded tap plus the refreshed school views
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEvent {
    pub school_id: SchoolId,
    /// Class of the student, used for class-filtered members
    pub class_id: Option<ClassId>,
    pub attendance: LiveFeedEntry,
    pub stats: AttendanceStats,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// `AttendanceEvent` as shown on public displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicAttendanceEvent {
    pub attendance: PublicFeedEntry,
    pub stats: AttendanceStats,
    pub leaderboard: Vec<PublicLeaderboardEntry>,
}

impl AttendanceEvent {
    pub fn public(&self) -> PublicAttendanceEvent {
        PublicAttendanceEvent {
            attendance: self.attendance.public(),
            stats: self.stats.clone(),
            leaderboard: self.leaderboard.iter().map(LeaderboardEntry::public).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Full(AttendanceEvent),
    Public(PublicAttendanceEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SnapshotPayload {
    Full(DashboardSnapshot),
    Public(PublicSnapshot),
}

impl SnapshotPayload {
    pub fn for_audience(snapshot: DashboardSnapshot, audience: Audience) -> Self {
        match audience {
            Audience::Dashboard => Self::Full(snapshot),
            Audience::PublicDisplay => Self::Public(snapshot.public()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectedPayload {
    pub connection_id: Uuid,
    pub school_id: SchoolId,
    pub audience: Audience,
    pub class_id: Option<ClassId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribedPayload {
    /// Effective filter, `None` = whole school
    pub class_id: Option<ClassId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PongPayload {
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub error_code: String,
    pub message: String,
}

impl From<&Error> for ErrorPayload {
    fn from(e: &Error) -> Self {
        Self {
            error_code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Server -> client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    Connected(ConnectedPayload),
    Subscribed(SubscribedPayload),
    Pong(PongPayload),
    AttendanceEvent(EventPayload),
    RefreshData(SnapshotPayload),
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Subscribed(_) => "subscribed",
            Self::Pong(_) => "pong",
            Self::AttendanceEvent(_) => "attendance_event",
            Self::RefreshData(_) => "refresh_data",
            Self::Error(_) => "error",
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            error_code: code.to_string(),
            message: message.into(),
        })
    }
}

/// Client -> server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Ping,
    /// `class_id: None` clears the filter
    Subscribe { class_id: Option<ClassId> },
    Refresh,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Default, Deserialize)]
struct SubscribeRequest {
    #[serde(default)]
    class_id: Option<ClassId>,
}

impl ClientMessage {
    /// Parse a text frame; payload is optional for ping/refresh
    pub fn parse(text: &str) -> Result<Self, Error> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| Error::Validation(format!("invalid message envelope: {}", e)))?;

        match envelope.kind.as_str() {
            "ping" => Ok(Self::Ping),
            "refresh" => Ok(Self::Refresh),
            "subscribe" => {
                let request = if envelope.payload.is_null() {
                    SubscribeRequest::default()
                } else {
                    serde_json::from_value::<SubscribeRequest>(envelope.payload)
                        .map_err(|e| Error::Validation(format!("invalid subscribe payload: {}", e)))?
                };
                Ok(Self::Subscribe {
                    class_id: request.class_id,
                })
            }
            other => Err(Error::Validation(format!("unknown message type '{}'", other))),
        }
    }
}
