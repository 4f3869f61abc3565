//! Dashboard repository
//!
//! Aggregate reads over `attendances` joined with the active roster.

use super::types::{ArrivalRow, FeedRow, LiveFeedEntry, StatusCount};
use super::DashboardStore;
use crate::error::Result;
use crate::models::{AttendanceStatus, ClassId, SchoolId};
use chrono::NaiveDate;
use sqlx::MySqlPool;

/// Dashboard repository for database operations
#[derive(Clone)]
pub struct DashboardRepository {
    pool: MySqlPool,
}

impl DashboardRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Count active students of a school (optionally one class)
    pub async fn count_students(&self, school_id: SchoolId, class_id: Option<ClassId>) -> Result<u64> {
        let mut sql =
            String::from("SELECT COUNT(*) FROM students WHERE school_id = ? AND is_active = TRUE");
        if class_id.is_some() {
            sql.push_str(" AND class_id = ?");
        }

        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(school_id);
        if let Some(class_id) = class_id {
            query = query.bind(class_id);
        }
        let count = query.fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    /// Status histogram for a day
    pub async fn status_counts(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
    ) -> Result<Vec<StatusCount>> {
        let mut sql = String::from(
            r#"
            SELECT a.status, COUNT(*)
            FROM attendances a
            JOIN students s ON s.id = a.student_id
            WHERE s.school_id = ? AND a.date = ?
            "#,
        );
        if class_id.is_some() {
            sql.push_str(" AND s.class_id = ?");
        }
        sql.push_str(" GROUP BY a.status");

        let mut query = sqlx::query_as::<_, (String, i64)>(&sql)
            .bind(school_id)
            .bind(date);
        if let Some(class_id) = class_id {
            query = query.bind(class_id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut counts = Vec::with_capacity(rows.len());
        for (status, count) in rows {
            match status.parse::<AttendanceStatus>() {
                Ok(status) => counts.push(StatusCount {
                    status,
                    count: count.max(0) as u64,
                }),
                Err(e) => {
                    tracing::warn!(status = %status, error = %e, "Skipping unknown attendance status");
                }
            }
        }
        Ok(counts)
    }

    /// Most recent check-ins of a day, newest first
    pub async fn recent_feed(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: u32,
    ) -> Result<Vec<LiveFeedEntry>> {
        let mut sql = String::from(
            r#"
            SELECT a.id, a.student_id, s.name AS student_name, s.class_id,
                   c.name AS class_name, a.check_in_time, a.status
            FROM attendances a
            JOIN students s ON s.id = a.student_id
            LEFT JOIN classes c ON c.id = s.class_id
            WHERE s.school_id = ? AND a.date = ? AND a.check_in_time IS NOT NULL
            "#,
        );
        if class_id.is_some() {
            sql.push_str(" AND s.class_id = ?");
        }
        sql.push_str(" ORDER BY a.check_in_time DESC, a.id DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, FeedRow>(&sql)
            .bind(school_id)
            .bind(date);
        if let Some(class_id) = class_id {
            query = query.bind(class_id);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        rows.into_iter().map(LiveFeedEntry::try_from).collect()
    }

    /// Earliest on_time check-ins of a day
    pub async fn on_time_arrivals(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: u32,
    ) -> Result<Vec<ArrivalRow>> {
        let mut sql = String::from(
            r#"
            SELECT a.student_id, s.name AS student_name, c.name AS class_name,
                   a.check_in_time, a.status
            FROM attendances a
            JOIN students s ON s.id = a.student_id
            LEFT JOIN classes c ON c.id = s.class_id
            WHERE s.school_id = ? AND a.date = ?
              AND a.check_in_time IS NOT NULL AND a.status = 'on_time'
            "#,
        );
        if class_id.is_some() {
            sql.push_str(" AND s.class_id = ?");
        }
        sql.push_str(" ORDER BY a.check_in_time ASC, a.student_id ASC LIMIT ?");

        let mut query = sqlx::query_as::<_, ArrivalRow>(&sql)
            .bind(school_id)
            .bind(date);
        if let Some(class_id) = class_id {
            query = query.bind(class_id);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;
        Ok(rows)
    }
}

impl DashboardStore for DashboardRepository {
    async fn count_active_students(&self, school_id: SchoolId, class_id: Option<ClassId>) -> Result<u64> {
        self.count_students(school_id, class_id).await
    }

    async fn aggregate_status_counts(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
    ) -> Result<Vec<StatusCount>> {
        self.status_counts(school_id, class_id, date).await
    }

    async fn recent_check_ins(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: u32,
    ) -> Result<Vec<LiveFeedEntry>> {
        self.recent_feed(school_id, class_id, date, limit).await
    }

    async fn earliest_on_time(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: u32,
    ) -> Result<Vec<ArrivalRow>> {
        self.on_time_arrivals(school_id, class_id, date, limit).await
    }
}
