//! Attendance data types
//!
//! Storage rows, the per-day state machine and request/response DTOs for
//! taps and manual entries.

use crate::attendance_policy::AttendanceWindow;
use crate::error::{Error, Result};
use crate::models::{AttendanceMethod, AttendanceStatus, ClassId, SchoolId, Student, StudentId};
use std::collections::BTreeMap;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ========================================
// Storage
// ========================================

/// Raw `attendances` row (status/method stored as VARCHAR)
#[derive(Debug, Clone, FromRow)]
pub struct AttendanceRow {
    pub id: u64,
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub status: String,
    pub method: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// One student-day of attendance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: u64,
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub status: AttendanceStatus,
    pub method: AttendanceMethod,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<AttendanceRow> for AttendanceRecord {
    type Error = Error;

    fn try_from(row: AttendanceRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            student_id: row.student_id,
            date: row.date,
            check_in_time: row.check_in_time,
            check_out_time: row.check_out_time,
            status: row.status.parse()?,
            method: row.method.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert payload for a new student-day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendance {
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub status: AttendanceStatus,
    pub method: AttendanceMethod,
}

// ========================================
// Per-day state machine
// ========================================

/// State of one (student, date) pair.
///
/// Storage keeps nullable check-in/check-out columns; this is the explicit
/// view of what those columns mean. `CheckedOut` is terminal for the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayState {
    /// No row yet
    NoRecord,
    /// Row without any clock time (manual absent/sick/excused entry)
    Unstamped(AttendanceRecord),
    /// Arrived, not yet left
    CheckedIn {
        record: AttendanceRecord,
        check_in: NaiveDateTime,
    },
    /// Day completed
    CheckedOut(AttendanceRecord),
}

impl DayState {
    pub fn of(existing: Option<AttendanceRecord>) -> Self {
        match existing {
            None => Self::NoRecord,
            Some(record) => match (record.check_in_time, record.check_out_time) {
                (_, Some(_)) => Self::CheckedOut(record),
                (Some(check_in), None) => Self::CheckedIn { record, check_in },
                (None, None) => Self::Unstamped(record),
            },
        }
    }
}

/// What a tap does to the day, decided before anything is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapPlan {
    /// Insert a fresh record with this check-in
    CheckIn { status: AttendanceStatus },
    /// Stamp a check-in onto an existing unstamped row
    StampCheckIn {
        record: AttendanceRecord,
        status: AttendanceStatus,
    },
    /// Close the day on an existing checked-in row
    CheckOut { record: AttendanceRecord },
    /// Nothing to write
    AlreadyCompleted { record: AttendanceRecord },
}

/// Decide the transition for a tap at `at` (school-local time)
pub fn plan_tap(state: DayState, at: NaiveDateTime, window: &AttendanceWindow) -> Result<TapPlan> {
    match state {
        DayState::NoRecord => Ok(TapPlan::CheckIn {
            status: window.classify(at),
        }),
        DayState::Unstamped(record) => Ok(TapPlan::StampCheckIn {
            record,
            status: window.classify(at),
        }),
        DayState::CheckedIn { record, check_in } => {
            if at < check_in {
                return Err(Error::CheckOutBeforeCheckIn {
                    check_in,
                    check_out: at,
                });
            }
            Ok(TapPlan::CheckOut { record })
        }
        DayState::CheckedOut(record) => Ok(TapPlan::AlreadyCompleted { record }),
    }
}

// ========================================
// Tap DTOs
// ========================================

/// Direction of a recorded tap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapDirection {
    CheckIn,
    CheckOut,
    AlreadyCompleted,
}

impl TapDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIn => "check_in",
            Self::CheckOut => "check_out",
            Self::AlreadyCompleted => "already_completed",
        }
    }
}

/// RFID tap from a reader device
#[derive(Debug, Clone, Deserialize)]
pub struct TapRequest {
    /// Device API key
    #[serde(alias = "api_key")]
    pub credential: String,
    /// RFID tag read from the card
    #[serde(alias = "rfid_code")]
    pub tag: String,
    /// Device clock; server time when absent
    #[serde(default)]
    pub timestamp: Option<DateTime<FixedOffset>>,
}

/// Result of a tap
#[derive(Debug, Clone, Serialize)]
pub struct TapOutcome {
    pub success: bool,
    pub student_id: StudentId,
    pub student_name: String,
    pub class_id: Option<ClassId>,
    pub class_name: Option<String>,
    pub direction: TapDirection,
    /// Arrival timeliness, reported on check-in only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
    pub time: NaiveDateTime,
    pub message: String,
}

impl TapOutcome {
    pub(crate) fn new(student: &Student, direction: TapDirection, time: NaiveDateTime) -> Self {
        let message = match direction {
            TapDirection::CheckIn => "Check-in recorded",
            TapDirection::CheckOut => "Check-out recorded",
            TapDirection::AlreadyCompleted => "Student has already checked out today",
        };
        Self {
            success: direction != TapDirection::AlreadyCompleted,
            student_id: student.id,
            student_name: student.name.clone(),
            class_id: student.class_id,
            class_name: student.class_name.clone(),
            direction,
            status: None,
            time,
            message: message.to_string(),
        }
    }

    pub(crate) fn with_status(mut self, status: AttendanceStatus) -> Self {
        self.status = Some(status);
        self
    }
}

// ========================================
// Manual entry DTOs
// ========================================

/// Manual attendance entry (fallback when the reader is down)
#[derive(Debug, Clone, Deserialize)]
pub struct ManualAttendanceRequest {
    pub student_id: StudentId,
    /// YYYY-MM-DD
    pub date: String,
    /// HH:MM
    #[serde(default)]
    pub check_in_time: Option<String>,
    /// HH:MM
    #[serde(default)]
    pub check_out_time: Option<String>,
    /// Only absent / sick / excused; arrivals are classified from the time
    #[serde(default)]
    pub status: Option<AttendanceStatus>,
}

/// Bulk manual entry for one date
#[derive(Debug, Clone, Deserialize)]
pub struct BulkManualAttendanceRequest {
    /// YYYY-MM-DD
    pub date: String,
    pub attendances: Vec<BulkManualAttendanceItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkManualAttendanceItem {
    pub student_id: StudentId,
    #[serde(default)]
    pub check_in_time: Option<String>,
    #[serde(default)]
    pub check_out_time: Option<String>,
    #[serde(default)]
    pub status: Option<AttendanceStatus>,
}

impl BulkManualAttendanceItem {
    pub(crate) fn into_request(self, date: &str) -> ManualAttendanceRequest {
        ManualAttendanceRequest {
            student_id: self.student_id,
            date: date.to_string(),
            check_in_time: self.check_in_time,
            check_out_time: self.check_out_time,
            status: self.status,
        }
    }
}

/// Persisted record as returned to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceView {
    pub id: u64,
    pub student_id: StudentId,
    pub student_name: String,
    pub class_id: Option<ClassId>,
    pub class_name: Option<String>,
    pub date: NaiveDate,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub status: AttendanceStatus,
    pub method: AttendanceMethod,
}

impl AttendanceView {
    pub fn new(record: &AttendanceRecord, student: &Student) -> Self {
        Self {
            id: record.id,
            student_id: record.student_id,
            student_name: student.name.clone(),
            class_id: student.class_id,
            class_name: student.class_name.clone(),
            date: record.date,
            check_in_time: record.check_in_time,
            check_out_time: record.check_out_time,
            status: record.status,
            method: record.method,
        }
    }
}

/// Bulk result: successful items only, failures are logged and counted
#[derive(Debug, Clone, Serialize)]
pub struct BulkManualOutcome {
    pub recorded: Vec<AttendanceView>,
    pub skipped: usize,
}

/// `YYYY-MM-DD`
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("invalid date '{}', expected YYYY-MM-DD", value)))
}

// ========================================
// Read queries
// ========================================

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// `attendances` joined with the student and class
#[derive(Debug, Clone, FromRow)]
pub struct AttendanceViewRow {
    pub id: u64,
    pub student_id: StudentId,
    pub student_name: String,
    pub class_id: Option<ClassId>,
    pub class_name: Option<String>,
    pub date: NaiveDate,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub status: String,
    pub method: String,
}

impl TryFrom<AttendanceViewRow> for AttendanceView {
    type Error = Error;

    fn try_from(row: AttendanceViewRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            student_id: row.student_id,
            student_name: row.student_name,
            class_id: row.class_id,
            class_name: row.class_name,
            date: row.date,
            check_in_time: row.check_in_time,
            check_out_time: row.check_out_time,
            status: row.status.parse()?,
            method: row.method.parse()?,
        })
    }
}

/// Record filter, always scoped to one school by the caller.
/// Results are ordered by date (newest first) then student name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceQuery {
    pub student_id: Option<StudentId>,
    pub class_id: Option<ClassId>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<AttendanceStatus>,
    pub method: Option<AttendanceMethod>,
}

impl AttendanceQuery {
    /// Everything recorded on one day
    pub fn on(date: NaiveDate) -> Self {
        Self {
            from: Some(date),
            to: Some(date),
            ..Self::default()
        }
    }

    pub fn matches(&self, view: &AttendanceView) -> bool {
        self.student_id.map_or(true, |id| view.student_id == id)
            && self.class_id.map_or(true, |id| view.class_id == Some(id))
            && self.from.map_or(true, |d| view.date >= d)
            && self.to.map_or(true, |d| view.date <= d)
            && self.status.map_or(true, |s| view.status == s)
            && self.method.map_or(true, |m| view.method == m)
    }
}

/// 1-based page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.filter(|p| *p > 0).unwrap_or(1),
            page_size: page_size
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .min(MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

/// Query string of the attendance list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttendanceFilter {
    pub student_id: Option<StudentId>,
    pub class_id: Option<ClassId>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<String>,
    pub method: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl AttendanceFilter {
    pub fn parse(&self) -> Result<(AttendanceQuery, PageRequest)> {
        let query = AttendanceQuery {
            student_id: self.student_id,
            class_id: self.class_id,
            from: non_empty(&self.start_date).map(parse_date).transpose()?,
            to: non_empty(&self.end_date).map(parse_date).transpose()?,
            status: non_empty(&self.status)
                .map(str::parse::<AttendanceStatus>)
                .transpose()?,
            method: non_empty(&self.method)
                .map(str::parse::<AttendanceMethod>)
                .transpose()?,
        };
        Ok((query, PageRequest::new(self.page, self.page_size)))
    }
}

/// `?start_date=&end_date=` of the per-student history
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// `?date=`, today when absent
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(page: PageRequest, total: u64) -> Self {
        Self {
            page: page.page,
            page_size: page.page_size,
            total,
            total_pages: total.div_ceil(u64::from(page.page_size)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceList {
    pub attendances: Vec<AttendanceView>,
    pub pagination: Pagination,
}

/// Status tally over a set of records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub total_count: u64,
    pub on_time: u64,
    pub late: u64,
    pub very_late: u64,
    pub absent: u64,
    pub sick: u64,
    pub excused: u64,
}

impl AttendanceSummary {
    pub fn add(&mut self, status: AttendanceStatus) {
        self.total_count += 1;
        let slot = match status {
            AttendanceStatus::OnTime => &mut self.on_time,
            AttendanceStatus::Late => &mut self.late,
            AttendanceStatus::VeryLate => &mut self.very_late,
            AttendanceStatus::Absent => &mut self.absent,
            AttendanceStatus::Sick => &mut self.sick,
            AttendanceStatus::Excused => &mut self.excused,
        };
        *slot += 1;
    }

    pub fn of<'a>(views: impl IntoIterator<Item = &'a AttendanceView>) -> Self {
        let mut summary = Self::default();
        for view in views {
            summary.add(view.status);
        }
        summary
    }
}

/// One class on one day
#[derive(Debug, Clone, Serialize)]
pub struct ClassAttendance {
    pub class_id: ClassId,
    pub class_name: Option<String>,
    pub date: NaiveDate,
    pub summary: AttendanceSummary,
    pub attendances: Vec<AttendanceView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassSummary {
    pub class_id: Option<ClassId>,
    pub class_name: Option<String>,
    pub summary: AttendanceSummary,
}

/// Whole school on one day
#[derive(Debug, Clone, Serialize)]
pub struct SchoolAttendanceSummary {
    pub school_id: SchoolId,
    pub date: NaiveDate,
    pub summary: AttendanceSummary,
    pub by_class: Vec<ClassSummary>,
}

/// Per-class tallies ordered by class id; students without a class come last
pub fn summarize_by_class(views: &[AttendanceView]) -> Vec<ClassSummary> {
    let mut classes: BTreeMap<(bool, Option<ClassId>), ClassSummary> = BTreeMap::new();
    for view in views {
        classes
            .entry((view.class_id.is_none(), view.class_id))
            .or_insert_with(|| ClassSummary {
                class_id: view.class_id,
                class_name: view.class_name.clone(),
                summary: AttendanceSummary::default(),
            })
            .summary
            .add(view.status);
    }
    classes.into_values().collect()
}
