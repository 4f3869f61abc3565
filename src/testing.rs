//! In-memory collaborators for unit tests

use crate::attendance::{
    AttendanceQuery, AttendanceRecord, AttendanceStore, AttendanceView, NewAttendance, PageRequest,
};
use crate::attendance_policy::{PolicySource, SchoolSettings};
use crate::credentials::{ClientScope, CredentialValidator, DeviceScope};
use crate::dashboard::{ArrivalRow, DashboardStore, LiveFeedEntry, StatusCount};
use crate::attendance::TapDirection;
use crate::error::{Error, Result};
use crate::models::{AttendanceStatus, ClassId, SchoolId, Student, StudentId};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    settings: HashMap<SchoolId, SchoolSettings>,
    fail_settings: bool,
    students: HashMap<StudentId, Student>,
    rfid: HashMap<String, StudentId>,
    records: Vec<AttendanceRecord>,
    next_id: u64,
    competing_insert: Option<NewAttendance>,
    devices: HashMap<String, DeviceScope>,
    tokens: HashMap<String, ClientScope>,
}

impl Inner {
    fn insert(&mut self, new: &NewAttendance) -> Result<AttendanceRecord> {
        if self
            .records
            .iter()
            .any(|r| r.student_id == new.student_id && r.date == new.date)
        {
            return Err(Error::Conflict(
                "attendance for student and date already exists".to_string(),
            ));
        }
        self.next_id += 1;
        let stamp = new
            .check_in_time
            .or(new.check_out_time)
            .unwrap_or_else(|| midnight(new.date));
        let record = AttendanceRecord {
            id: self.next_id,
            student_id: new.student_id,
            date: new.date,
            check_in_time: new.check_in_time,
            check_out_time: new.check_out_time,
            status: new.status,
            method: new.method,
            created_at: stamp,
            updated_at: stamp,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn in_scope(&self, student_id: StudentId, school_id: SchoolId, class_id: Option<ClassId>) -> Option<&Student> {
        self.students
            .get(&student_id)
            .filter(|s| s.school_id == school_id)
            .filter(|s| class_id.is_none() || s.class_id == class_id)
    }

    fn views(&self, school_id: SchoolId) -> Vec<AttendanceView> {
        let mut views: Vec<AttendanceView> = self
            .records
            .iter()
            .filter_map(|r| {
                let student = self.in_scope(r.student_id, school_id, None)?;
                Some(AttendanceView::new(r, student))
            })
            .collect();
        views.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| a.student_name.cmp(&b.student_name))
                .then_with(|| a.id.cmp(&b.id))
        });
        views
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap_or_default()
}

/// Shared in-memory store; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn put_settings(&self, settings: SchoolSettings) {
        self.lock().settings.insert(settings.school_id, settings);
    }

    pub fn fail_settings_reads(&self) {
        self.lock().fail_settings = true;
    }

    pub fn add_student(
        &self,
        id: StudentId,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        name: &str,
        rfid_code: &str,
    ) {
        let mut inner = self.lock();
        inner.students.insert(
            id,
            Student {
                id,
                school_id,
                class_id,
                class_name: class_id.map(|c| format!("class-{}", c)),
                name: name.to_string(),
                is_active: true,
            },
        );
        inner.rfid.insert(rfid_code.to_string(), id);
    }

    pub fn deactivate_student(&self, id: StudentId) {
        if let Some(s) = self.lock().students.get_mut(&id) {
            s.is_active = false;
        }
    }

    pub fn add_device(&self, api_key: &str, device_id: u64, school_id: SchoolId) {
        self.lock().devices.insert(
            api_key.to_string(),
            DeviceScope {
                device_id,
                school_id,
            },
        );
    }

    pub fn add_token(&self, token: &str, scope: ClientScope) {
        self.lock().tokens.insert(token.to_string(), scope);
    }

    /// Next `create` loses a race against this row
    pub fn race_next_create(&self, competing: NewAttendance) {
        self.lock().competing_insert = Some(competing);
    }

    pub fn record_for(&self, student_id: StudentId, date: NaiveDate) -> Option<AttendanceRecord> {
        self.lock()
            .records
            .iter()
            .find(|r| r.student_id == student_id && r.date == date)
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }
}

impl PolicySource for MemoryStore {
    async fn load_settings(&self, school_id: SchoolId) -> Result<Option<SchoolSettings>> {
        let inner = self.lock();
        if inner.fail_settings {
            return Err(Error::Database("settings table unavailable".to_string()));
        }
        Ok(inner.settings.get(&school_id).cloned())
    }
}

impl AttendanceStore for MemoryStore {
    async fn find_student_by_rfid(&self, rfid_code: &str) -> Result<Option<Student>> {
        let inner = self.lock();
        Ok(inner
            .rfid
            .get(rfid_code)
            .and_then(|id| inner.students.get(id))
            .cloned())
    }

    async fn find_student_by_id(&self, student_id: StudentId) -> Result<Option<Student>> {
        Ok(self.lock().students.get(&student_id).cloned())
    }

    async fn find_by_student_and_date(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        Ok(self.record_for(student_id, date))
    }

    async fn create(&self, new: &NewAttendance) -> Result<AttendanceRecord> {
        let mut inner = self.lock();
        if let Some(competing) = inner.competing_insert.take() {
            inner.insert(&competing)?;
        }
        inner.insert(new)
    }

    async fn update(&self, record: &AttendanceRecord) -> Result<AttendanceRecord> {
        let mut inner = self.lock();
        let slot = inner
            .records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| Error::NotFound(format!("attendance {}", record.id)))?;
        *slot = record.clone();
        Ok(record.clone())
    }

    async fn find_view(&self, school_id: SchoolId, id: u64) -> Result<Option<AttendanceView>> {
        Ok(self.lock().views(school_id).into_iter().find(|v| v.id == id))
    }

    async fn query_views(
        &self,
        school_id: SchoolId,
        query: &AttendanceQuery,
        page: Option<PageRequest>,
    ) -> Result<Vec<AttendanceView>> {
        let matching = self
            .lock()
            .views(school_id)
            .into_iter()
            .filter(|v| query.matches(v));
        Ok(match page {
            Some(page) => matching
                .skip(page.offset() as usize)
                .take(page.page_size as usize)
                .collect(),
            None => matching.collect(),
        })
    }

    async fn count_views(&self, school_id: SchoolId, query: &AttendanceQuery) -> Result<u64> {
        Ok(self
            .lock()
            .views(school_id)
            .iter()
            .filter(|v| query.matches(v))
            .count() as u64)
    }
}

impl DashboardStore for MemoryStore {
    async fn count_active_students(&self, school_id: SchoolId, class_id: Option<ClassId>) -> Result<u64> {
        let inner = self.lock();
        Ok(inner
            .students
            .values()
            .filter(|s| s.is_active && s.school_id == school_id)
            .filter(|s| class_id.is_none() || s.class_id == class_id)
            .count() as u64)
    }

    async fn aggregate_status_counts(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
    ) -> Result<Vec<StatusCount>> {
        let inner = self.lock();
        let mut counts: HashMap<AttendanceStatus, u64> = HashMap::new();
        for r in inner.records.iter().filter(|r| r.date == date) {
            if inner.in_scope(r.student_id, school_id, class_id).is_some() {
                *counts.entry(r.status).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect())
    }

    async fn recent_check_ins(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: u32,
    ) -> Result<Vec<LiveFeedEntry>> {
        let inner = self.lock();
        let mut feed: Vec<LiveFeedEntry> = inner
            .records
            .iter()
            .filter(|r| r.date == date)
            .filter_map(|r| {
                let student = inner.in_scope(r.student_id, school_id, class_id)?;
                Some(LiveFeedEntry {
                    id: r.id,
                    student_id: r.student_id,
                    student_name: student.name.clone(),
                    class_id: student.class_id,
                    class_name: student.class_name.clone(),
                    time: r.check_in_time?,
                    status: r.status,
                    direction: TapDirection::CheckIn,
                })
            })
            .collect();
        feed.sort_by(|a, b| b.time.cmp(&a.time));
        feed.truncate(limit as usize);
        Ok(feed)
    }

    async fn earliest_on_time(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: u32,
    ) -> Result<Vec<ArrivalRow>> {
        let inner = self.lock();
        let mut rows: Vec<ArrivalRow> = inner
            .records
            .iter()
            .filter(|r| r.date == date && r.status == AttendanceStatus::OnTime)
            .filter_map(|r| {
                let student = inner.in_scope(r.student_id, school_id, class_id)?;
                Some(ArrivalRow {
                    student_id: r.student_id,
                    student_name: student.name.clone(),
                    class_name: student.class_name.clone(),
                    check_in_time: r.check_in_time?,
                    status: r.status.as_str().to_string(),
                })
            })
            .collect();
        rows.sort_by(|a, b| a.check_in_time.cmp(&b.check_in_time));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

impl CredentialValidator for MemoryStore {
    async fn validate_device_key(&self, api_key: &str) -> Result<DeviceScope> {
        self.lock()
            .devices
            .get(api_key)
            .copied()
            .ok_or_else(|| Error::InvalidCredential("unknown or inactive device".to_string()))
    }

    async fn authorize_client(&self, token: &str) -> Result<ClientScope> {
        self.lock()
            .tokens
            .get(token)
            .copied()
            .ok_or_else(|| Error::Unauthorized("unknown token".to_string()))
    }
}
