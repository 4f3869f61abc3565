//! Attendance repository
//!
//! MySQL access for `attendances` plus read-only student lookups and the
//! joined record listings.
//! `(student_id, date)` is a UNIQUE key; a racing duplicate insert surfaces
//! as `Error::Conflict`.

use super::types::{
    AttendanceQuery, AttendanceRecord, AttendanceRow, AttendanceView, AttendanceViewRow, NewAttendance,
    PageRequest,
};
use super::AttendanceStore;
use crate::error::{Error, Result};
use crate::models::{SchoolId, Student, StudentId};
use chrono::{Local, NaiveDate};
use sqlx::MySqlPool;

const STUDENT_COLUMNS: &str = r#"
    SELECT s.id, s.school_id, s.class_id, c.name AS class_name, s.name, s.is_active
    FROM students s
    LEFT JOIN classes c ON c.id = s.class_id
"#;

const ATTENDANCE_COLUMNS: &str = r#"
    SELECT id, student_id, date, check_in_time, check_out_time,
           status, method, created_at, updated_at
    FROM attendances
"#;

const VIEW_COLUMNS: &str = r#"
    SELECT a.id, a.student_id, s.name AS student_name, s.class_id, c.name AS class_name,
           a.date, a.check_in_time, a.check_out_time, a.status, a.method
    FROM attendances a
    JOIN students s ON s.id = a.student_id
    LEFT JOIN classes c ON c.id = s.class_id
"#;

/// `AND` clauses for the optional filters, bound in field order
fn filter_clause(query: &AttendanceQuery) -> String {
    let mut sql = String::new();
    if query.student_id.is_some() {
        sql.push_str(" AND a.student_id = ?");
    }
    if query.class_id.is_some() {
        sql.push_str(" AND s.class_id = ?");
    }
    if query.from.is_some() {
        sql.push_str(" AND a.date >= ?");
    }
    if query.to.is_some() {
        sql.push_str(" AND a.date <= ?");
    }
    if query.status.is_some() {
        sql.push_str(" AND a.status = ?");
    }
    if query.method.is_some() {
        sql.push_str(" AND a.method = ?");
    }
    sql
}

/// Attendance repository for database operations
#[derive(Clone)]
pub struct AttendanceRepository {
    pool: MySqlPool,
}

impl AttendanceRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get student by RFID tag
    pub async fn get_student_by_rfid(&self, rfid_code: &str) -> Result<Option<Student>> {
        let sql = format!("{} WHERE s.rfid_code = ?", STUDENT_COLUMNS);
        let student = sqlx::query_as::<_, Student>(&sql)
            .bind(rfid_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(student)
    }

    /// Get student by ID
    pub async fn get_student(&self, student_id: StudentId) -> Result<Option<Student>> {
        let sql = format!("{} WHERE s.id = ?", STUDENT_COLUMNS);
        let student = sqlx::query_as::<_, Student>(&sql)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(student)
    }

    /// Get attendance by ID
    pub async fn get_by_id(&self, id: u64) -> Result<Option<AttendanceRecord>> {
        let sql = format!("{} WHERE id = ?", ATTENDANCE_COLUMNS);
        let row = sqlx::query_as::<_, AttendanceRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AttendanceRecord::try_from).transpose()
    }

    /// Get the student's record for a date
    pub async fn get_by_student_and_date(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        let sql = format!("{} WHERE student_id = ? AND date = ?", ATTENDANCE_COLUMNS);
        let row = sqlx::query_as::<_, AttendanceRow>(&sql)
            .bind(student_id)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AttendanceRecord::try_from).transpose()
    }

    /// Insert a new student-day
    pub async fn insert(&self, new: &NewAttendance) -> Result<AttendanceRecord> {
        let now = Local::now().naive_local();
        let result = sqlx::query(
            r#"
            INSERT INTO attendances
                (student_id, date, check_in_time, check_out_time, status, method, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.student_id)
        .bind(new.date)
        .bind(new.check_in_time)
        .bind(new.check_out_time)
        .bind(new.status.as_str())
        .bind(new.method.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_insert(e, "attendance for student and date"))?;

        let id = result.last_insert_id();
        self.get_by_id(id)
            .await?
            .ok_or_else(|| Error::Database(format!("attendance {} vanished after insert", id)))
    }

    /// Write times, status and method of an existing record
    pub async fn save(&self, record: &AttendanceRecord) -> Result<AttendanceRecord> {
        let result = sqlx::query(
            r#"
            UPDATE attendances
            SET check_in_time = ?, check_out_time = ?, status = ?, method = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(record.check_in_time)
        .bind(record.check_out_time)
        .bind(record.status.as_str())
        .bind(record.method.as_str())
        .bind(Local::now().naive_local())
        .bind(record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("attendance {}", record.id)));
        }

        self.get_by_id(record.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("attendance {}", record.id)))
    }

    /// Get a record with its student, scoped to a school
    pub async fn get_view(&self, school_id: SchoolId, id: u64) -> Result<Option<AttendanceView>> {
        let sql = format!("{} WHERE a.id = ? AND s.school_id = ?", VIEW_COLUMNS);
        let row = sqlx::query_as::<_, AttendanceViewRow>(&sql)
            .bind(id)
            .bind(school_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AttendanceView::try_from).transpose()
    }

    /// List records of a school matching the filters
    pub async fn list_views(
        &self,
        school_id: SchoolId,
        filter: &AttendanceQuery,
        page: Option<PageRequest>,
    ) -> Result<Vec<AttendanceView>> {
        let mut sql = format!("{} WHERE s.school_id = ?", VIEW_COLUMNS);
        sql.push_str(&filter_clause(filter));
        sql.push_str(" ORDER BY a.date DESC, s.name ASC, a.id ASC");
        if page.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
        }

        let mut query = sqlx::query_as::<_, AttendanceViewRow>(&sql).bind(school_id);
        if let Some(student_id) = filter.student_id {
            query = query.bind(student_id);
        }
        if let Some(class_id) = filter.class_id {
            query = query.bind(class_id);
        }
        if let Some(from) = filter.from {
            query = query.bind(from);
        }
        if let Some(to) = filter.to {
            query = query.bind(to);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(method) = filter.method {
            query = query.bind(method.as_str());
        }
        if let Some(page) = page {
            query = query.bind(page.page_size).bind(page.offset());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(AttendanceView::try_from).collect()
    }

    /// Count records of a school matching the filters
    pub async fn count(&self, school_id: SchoolId, filter: &AttendanceQuery) -> Result<u64> {
        let mut sql = String::from(
            r#"
            SELECT COUNT(*)
            FROM attendances a
            JOIN students s ON s.id = a.student_id
            WHERE s.school_id = ?
            "#,
        );
        sql.push_str(&filter_clause(filter));

        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(school_id);
        if let Some(student_id) = filter.student_id {
            query = query.bind(student_id);
        }
        if let Some(class_id) = filter.class_id {
            query = query.bind(class_id);
        }
        if let Some(from) = filter.from {
            query = query.bind(from);
        }
        if let Some(to) = filter.to {
            query = query.bind(to);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(method) = filter.method {
            query = query.bind(method.as_str());
        }

        let count = query.fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

impl AttendanceStore for AttendanceRepository {
    async fn find_student_by_rfid(&self, rfid_code: &str) -> Result<Option<Student>> {
        self.get_student_by_rfid(rfid_code).await
    }

    async fn find_student_by_id(&self, student_id: StudentId) -> Result<Option<Student>> {
        self.get_student(student_id).await
    }

    async fn find_by_student_and_date(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        self.get_by_student_and_date(student_id, date).await
    }

    async fn create(&self, new: &NewAttendance) -> Result<AttendanceRecord> {
        self.insert(new).await
    }

    async fn update(&self, record: &AttendanceRecord) -> Result<AttendanceRecord> {
        self.save(record).await
    }

    async fn find_view(&self, school_id: SchoolId, id: u64) -> Result<Option<AttendanceView>> {
        self.get_view(school_id, id).await
    }

    async fn query_views(
        &self,
        school_id: SchoolId,
        query: &AttendanceQuery,
        page: Option<PageRequest>,
    ) -> Result<Vec<AttendanceView>> {
        self.list_views(school_id, query, page).await
    }

    async fn count_views(&self, school_id: SchoolId, query: &AttendanceQuery) -> Result<u64> {
        self.count(school_id, query).await
    }
}
