//! Shared models and types
//!
//! Types used by more than one component (policy, recorder, dashboard,
//! realtime) live here to avoid circular dependencies.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// School identifier
pub type SchoolId = u64;
/// Student identifier
pub type StudentId = u64;
/// Class identifier
pub type ClassId = u64;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub db_connected: bool,
    pub realtime_connections: u64,
    pub realtime_dropped_messages: u64,
}

/// Attendance status of one student-day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    OnTime,
    Late,
    VeryLate,
    Absent,
    Sick,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTime => "on_time",
            Self::Late => "late",
            Self::VeryLate => "very_late",
            Self::Absent => "absent",
            Self::Sick => "sick",
            Self::Excused => "excused",
        }
    }

    /// Statuses that count as physically present for the day
    pub fn is_present(&self) -> bool {
        matches!(self, Self::OnTime | Self::Late | Self::VeryLate)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "on_time" => Ok(Self::OnTime),
            "late" => Ok(Self::Late),
            "very_late" => Ok(Self::VeryLate),
            "absent" => Ok(Self::Absent),
            "sick" => Ok(Self::Sick),
            "excused" => Ok(Self::Excused),
            other => Err(Error::Parse(format!("unknown attendance status '{}'", other))),
        }
    }
}

/// How a record was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceMethod {
    Rfid,
    Manual,
}

impl AttendanceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rfid => "rfid",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for AttendanceMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rfid" => Ok(Self::Rfid),
            "manual" => Ok(Self::Manual),
            other => Err(Error::Parse(format!("unknown attendance method '{}'", other))),
        }
    }
}

/// Student as seen by the attendance core (read-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub id: StudentId,
    pub school_id: SchoolId,
    pub class_id: Option<ClassId>,
    pub class_name: Option<String>,
    pub name: String,
    pub is_active: bool,
}
