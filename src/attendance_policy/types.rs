//! Attendance policy data types
//!
//! Per-school settings as stored, the validated policy derived from them,
//! and the concrete window for one calendar date.

use crate::error::{Error, Result};
use crate::models::{AttendanceStatus, SchoolId};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Default window start (07:00)
pub const DEFAULT_WINDOW_START: (u32, u32) = (7, 0);
/// Default window end (17:00)
pub const DEFAULT_WINDOW_END: (u32, u32) = (17, 0);
/// Minutes after start before an arrival counts as late
pub const DEFAULT_LATE_THRESHOLD_MIN: u32 = 15;
/// Minutes after start before an arrival counts as very late
pub const DEFAULT_VERY_LATE_THRESHOLD_MIN: u32 = 30;

/// Raw `school_settings` row. Times are `HH:MM` strings.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SchoolSettings {
    pub school_id: SchoolId,
    pub attendance_start_time: String,
    pub attendance_end_time: String,
    pub attendance_late_threshold: i32,
    pub attendance_very_late_threshold: i32,
}

/// Validated attendance policy for a school
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttendancePolicy {
    pub window_start: NaiveTime,
    pub late_threshold_min: u32,
    pub very_late_threshold_min: u32,
    pub window_end: NaiveTime,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            window_start: hm(DEFAULT_WINDOW_START),
            late_threshold_min: DEFAULT_LATE_THRESHOLD_MIN,
            very_late_threshold_min: DEFAULT_VERY_LATE_THRESHOLD_MIN,
            window_end: hm(DEFAULT_WINDOW_END),
        }
    }
}

fn hm((h, m): (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

/// Parse a wall-clock `HH:MM` value
pub fn parse_clock(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| Error::Validation(format!("'{}' is not a HH:MM time", value)))
}

impl TryFrom<&SchoolSettings> for AttendancePolicy {
    type Error = Error;

    fn try_from(settings: &SchoolSettings) -> Result<Self> {
        let window_start = parse_clock(&settings.attendance_start_time)?;
        let window_end = parse_clock(&settings.attendance_end_time)?;

        let late = u32::try_from(settings.attendance_late_threshold).map_err(|_| {
            Error::Validation("attendance_late_threshold must be non-negative".to_string())
        })?;
        let very_late = u32::try_from(settings.attendance_very_late_threshold).map_err(|_| {
            Error::Validation("attendance_very_late_threshold must be non-negative".to_string())
        })?;

        if very_late < late {
            return Err(Error::Validation(format!(
                "very-late threshold ({}) is below late threshold ({})",
                very_late, late
            )));
        }
        if window_end <= window_start {
            return Err(Error::Validation(format!(
                "window end {} is not after start {}",
                window_end, window_start
            )));
        }

        Ok(Self {
            window_start,
            late_threshold_min: late,
            very_late_threshold_min: very_late,
            window_end,
        })
    }
}

impl AttendancePolicy {
    /// Anchor the policy to a calendar date
    pub fn window_on(&self, date: NaiveDate) -> AttendanceWindow {
        let start = date.and_time(self.window_start);
        AttendanceWindow {
            start,
            late_at: start + Duration::minutes(i64::from(self.late_threshold_min)),
            very_late_at: start + Duration::minutes(i64::from(self.very_late_threshold_min)),
            end: date.and_time(self.window_end),
        }
    }
}

/// Attendance window for one school-day, in school-local wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttendanceWindow {
    pub start: NaiveDateTime,
    pub late_at: NaiveDateTime,
    pub very_late_at: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl AttendanceWindow {
    /// Arrival timeliness. Both thresholds are inclusive upper bounds.
    pub fn classify(&self, arrival: NaiveDateTime) -> AttendanceStatus {
        if arrival <= self.late_at {
            AttendanceStatus::OnTime
        } else if arrival <= self.very_late_at {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::VeryLate
        }
    }

    /// Whether `at` falls inside [start, end]
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        at >= self.start && at <= self.end
    }
}
