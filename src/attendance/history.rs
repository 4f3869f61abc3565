//! Attendance history
//!
//! Read-only queries over persisted records for staff dashboards. Every
//! query is scoped to the caller's school.

use super::types::*;
use super::AttendanceStore;
use crate::error::{Error, Result};
use crate::models::{ClassId, SchoolId, StudentId};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;

/// AttendanceHistory instance
pub struct AttendanceHistory<S> {
    store: S,
    timezone: Tz,
}

impl<S: AttendanceStore> AttendanceHistory<S> {
    /// Create new AttendanceHistory
    pub fn new(store: S, timezone: Tz) -> Self {
        Self { store, timezone }
    }

    /// Current school-local date
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Explicit `YYYY-MM-DD`, today when blank
    pub fn resolve_date(&self, value: Option<&str>) -> Result<NaiveDate> {
        match value.map(str::trim) {
            None | Some("") => Ok(self.today()),
            Some(v) => parse_date(v),
        }
    }

    /// One record by id
    pub async fn get(&self, school_id: SchoolId, id: u64) -> Result<AttendanceView> {
        self.store
            .find_view(school_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("attendance {}", id)))
    }

    /// A student's records over an optional inclusive date range
    pub async fn student_history(
        &self,
        school_id: SchoolId,
        student_id: StudentId,
        range: &DateRangeQuery,
    ) -> Result<Vec<AttendanceView>> {
        let from = range.start_date.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let to = range.end_date.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let from = from.map(parse_date).transpose()?;
        let to = to.map(parse_date).transpose()?;
        if let (Some(from), Some(to)) = (from, to) {
            if to < from {
                return Err(Error::Validation(format!(
                    "end_date {} is before start_date {}",
                    to, from
                )));
            }
        }

        self.store
            .find_student_by_id(student_id)
            .await?
            .filter(|s| s.school_id == school_id)
            .ok_or_else(|| Error::StudentNotFound(format!("student {}", student_id)))?;

        let query = AttendanceQuery {
            student_id: Some(student_id),
            from,
            to,
            ..AttendanceQuery::default()
        };
        self.store.query_views(school_id, &query, None).await
    }

    /// Every record of a class on one day
    pub async fn class_day(&self, school_id: SchoolId, class_id: ClassId, date: NaiveDate) -> Result<ClassAttendance> {
        let query = AttendanceQuery {
            class_id: Some(class_id),
            ..AttendanceQuery::on(date)
        };
        let attendances = self.store.query_views(school_id, &query, None).await?;

        Ok(ClassAttendance {
            class_id,
            class_name: attendances.iter().find_map(|v| v.class_name.clone()),
            date,
            summary: AttendanceSummary::of(&attendances),
            attendances,
        })
    }

    /// School-wide tally for one day, split per class
    pub async fn school_summary(&self, school_id: SchoolId, date: NaiveDate) -> Result<SchoolAttendanceSummary> {
        let views = self
            .store
            .query_views(school_id, &AttendanceQuery::on(date), None)
            .await?;

        Ok(SchoolAttendanceSummary {
            school_id,
            date,
            summary: AttendanceSummary::of(&views),
            by_class: summarize_by_class(&views),
        })
    }

    /// Filtered, paginated listing
    pub async fn list(&self, school_id: SchoolId, filter: &AttendanceFilter) -> Result<AttendanceList> {
        let (query, page) = filter.parse()?;
        let (total, attendances) = tokio::try_join!(
            self.store.count_views(school_id, &query),
            self.store.query_views(school_id, &query, Some(page)),
        )?;

        tracing::debug!(
            school_id = school_id,
            total = total,
            page = page.page,
            "Listed attendance records"
        );

        Ok(AttendanceList {
            attendances,
            pagination: Pagination::new(page, total),
        })
    }
}
