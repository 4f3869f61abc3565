//! Attendance Recorder
//!
//! Turns taps and manual entries into persisted day-state transitions.

use super::types::*;
use super::AttendanceStore;
use crate::attendance_policy::{parse_clock, PolicyResolver, PolicySource};
use crate::credentials::{non_blank, CredentialValidator};
use crate::error::{Error, Result};
use crate::event_dispatch::{AttendanceNotifier, AttendanceRecorded};
use crate::models::{AttendanceMethod, AttendanceStatus, SchoolId, Student};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use chrono_tz::Tz;

/// AttendanceRecorder instance
pub struct AttendanceRecorder<S, V, P> {
    store: S,
    validator: V,
    policy: PolicyResolver<P>,
    notifier: AttendanceNotifier,
    timezone: Tz,
}

impl<S, V, P> AttendanceRecorder<S, V, P>
where
    S: AttendanceStore,
    V: CredentialValidator,
    P: PolicySource,
{
    /// Create new AttendanceRecorder
    pub fn new(
        store: S,
        validator: V,
        policy: PolicyResolver<P>,
        notifier: AttendanceNotifier,
        timezone: Tz,
    ) -> Self {
        Self {
            store,
            validator,
            policy,
            notifier,
            timezone,
        }
    }

    /// School-local wall clock for a device timestamp (now when absent).
    /// Truncated to whole seconds, the precision of the stored columns.
    pub fn local_time(&self, timestamp: Option<DateTime<FixedOffset>>) -> NaiveDateTime {
        let local = match timestamp {
            Some(ts) => ts.with_timezone(&self.timezone).naive_local(),
            None => Utc::now().with_timezone(&self.timezone).naive_local(),
        };
        local.trunc_subsecs(0)
    }

    // ========================================
    // RFID taps
    // ========================================

    /// Record an RFID tap from a reader device
    pub async fn record_tap(&self, request: TapRequest) -> Result<TapOutcome> {
        let credential = non_blank(&request.credential, "credential")?;
        let tag = non_blank(&request.tag, "tag")?;

        let device = self.validator.validate_device_key(credential).await?;

        let student = self
            .store
            .find_student_by_rfid(tag)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| Error::StudentNotFound(format!("no active student for tag {}", tag)))?;

        if student.school_id != device.school_id {
            tracing::warn!(
                device_id = device.device_id,
                device_school_id = device.school_id,
                student_id = student.id,
                student_school_id = student.school_id,
                "Device tapped a card from another school"
            );
            return Err(Error::InvalidCredential(
                "device is not registered to the student's school".to_string(),
            ));
        }

        let at = self.local_time(request.timestamp);
        self.tap_student(&student, at).await
    }

    /// Apply a tap at school-local time `at` for a resolved student
    pub async fn tap_student(&self, student: &Student, at: NaiveDateTime) -> Result<TapOutcome> {
        let date = at.date();
        let existing = self.store.find_by_student_and_date(student.id, date).await?;

        let (record, direction) = match self.apply_tap(student, existing, at).await {
            Err(Error::Conflict(_)) => {
                // Lost the insert race to a concurrent tap: apply against the winner's row
                tracing::info!(student_id = student.id, date = %date, "Concurrent tap created the record, re-reading");
                let existing = self.store.find_by_student_and_date(student.id, date).await?;
                self.apply_tap(student, existing, at).await?
            }
            other => other?,
        };

        let time = match direction {
            TapDirection::AlreadyCompleted => record.check_out_time.unwrap_or(at),
            _ => at,
        };
        let mut outcome = TapOutcome::new(student, direction, time);
        if direction == TapDirection::CheckIn {
            outcome = outcome.with_status(record.status);
        }

        tracing::info!(
            student_id = student.id,
            school_id = student.school_id,
            direction = direction.as_str(),
            status = %record.status,
            time = %time,
            "Tap recorded"
        );

        if direction != TapDirection::AlreadyCompleted {
            self.notifier.notify(AttendanceRecorded {
                school_id: student.school_id,
                student: student.clone(),
                record,
                direction,
                time,
            });
        }

        Ok(outcome)
    }

    async fn apply_tap(
        &self,
        student: &Student,
        existing: Option<AttendanceRecord>,
        at: NaiveDateTime,
    ) -> Result<(AttendanceRecord, TapDirection)> {
        let window = self.policy.resolve_window(student.school_id, at.date()).await;
        if !window.contains(at) {
            tracing::debug!(student_id = student.id, time = %at, "Tap outside attendance window");
        }

        match plan_tap(DayState::of(existing), at, &window)? {
            TapPlan::CheckIn { status } => {
                let record = self
                    .store
                    .create(&NewAttendance {
                        student_id: student.id,
                        date: at.date(),
                        check_in_time: Some(at),
                        check_out_time: None,
                        status,
                        method: AttendanceMethod::Rfid,
                    })
                    .await?;
                Ok((record, TapDirection::CheckIn))
            }
            TapPlan::StampCheckIn { mut record, status } => {
                record.check_in_time = Some(at);
                record.status = status;
                record.method = AttendanceMethod::Rfid;
                let record = self.store.update(&record).await?;
                Ok((record, TapDirection::CheckIn))
            }
            TapPlan::CheckOut { mut record } => {
                record.check_out_time = Some(at);
                let record = self.store.update(&record).await?;
                Ok((record, TapDirection::CheckOut))
            }
            TapPlan::AlreadyCompleted { record } => Ok((record, TapDirection::AlreadyCompleted)),
        }
    }

    // ========================================
    // Manual entry
    // ========================================

    /// Create or amend a student-day by hand
    pub async fn record_manual(
        &self,
        school_id: SchoolId,
        request: ManualAttendanceRequest,
    ) -> Result<AttendanceView> {
        if request.student_id == 0 {
            return Err(Error::Validation("student_id is required".to_string()));
        }
        let date = parse_date(&request.date)?;
        let check_in = parse_time_on(date, request.check_in_time.as_deref())?;
        let check_out = parse_time_on(date, request.check_out_time.as_deref())?;
        ensure_order(check_in, check_out)?;

        if let Some(status) = request.status {
            if status.is_present() {
                return Err(Error::Validation(format!(
                    "status {} is derived from check_in_time and cannot be set directly",
                    status
                )));
            }
            if check_in.is_some() {
                return Err(Error::Validation(format!(
                    "status {} cannot be combined with a check-in time",
                    status
                )));
            }
        }

        let student = self
            .store
            .find_student_by_id(request.student_id)
            .await?
            .filter(|s| s.is_active && s.school_id == school_id)
            .ok_or_else(|| Error::StudentNotFound(format!("student {}", request.student_id)))?;

        let entry = ManualEntry {
            date,
            check_in,
            check_out,
            status: request.status,
        };

        let existing = self.store.find_by_student_and_date(student.id, date).await?;
        let record = match self.apply_manual(&student, existing, &entry).await {
            Err(Error::Conflict(_)) => {
                let existing = self.store.find_by_student_and_date(student.id, date).await?;
                self.apply_manual(&student, existing, &entry).await?
            }
            other => other?,
        };

        tracing::info!(
            student_id = student.id,
            school_id = school_id,
            date = %date,
            status = %record.status,
            "Manual attendance recorded"
        );

        let transition = match (check_in, check_out) {
            (Some(t), _) => Some((TapDirection::CheckIn, t)),
            (None, Some(t)) => Some((TapDirection::CheckOut, t)),
            (None, None) => None,
        };
        if let Some((direction, time)) = transition {
            self.notifier.notify(AttendanceRecorded {
                school_id,
                student: student.clone(),
                record: record.clone(),
                direction,
                time,
            });
        }

        Ok(AttendanceView::new(&record, &student))
    }

    async fn apply_manual(
        &self,
        student: &Student,
        existing: Option<AttendanceRecord>,
        entry: &ManualEntry,
    ) -> Result<AttendanceRecord> {
        let window = self.policy.resolve_window(student.school_id, entry.date).await;

        match existing {
            None => {
                let status = match entry.check_in {
                    Some(t) => window.classify(t),
                    None => entry.status.unwrap_or(AttendanceStatus::Absent),
                };
                self.store
                    .create(&NewAttendance {
                        student_id: student.id,
                        date: entry.date,
                        check_in_time: entry.check_in,
                        check_out_time: entry.check_out,
                        status,
                        method: AttendanceMethod::Manual,
                    })
                    .await
            }
            Some(mut record) => {
                if let Some(t) = entry.check_in {
                    record.check_in_time = Some(t);
                    record.status = window.classify(t);
                }
                if let Some(t) = entry.check_out {
                    record.check_out_time = Some(t);
                }
                if let Some(status) = entry.status {
                    if record.check_in_time.is_some() {
                        return Err(Error::Validation(format!(
                            "student already checked in, cannot mark {}",
                            status
                        )));
                    }
                    record.status = status;
                }
                ensure_order(record.check_in_time, record.check_out_time)?;
                record.method = AttendanceMethod::Manual;
                self.store.update(&record).await
            }
        }
    }

    /// Apply a batch of manual entries for one date; failed items are
    /// logged and skipped
    pub async fn record_bulk_manual(
        &self,
        school_id: SchoolId,
        request: BulkManualAttendanceRequest,
    ) -> Result<BulkManualOutcome> {
        parse_date(&request.date)?;

        let total = request.attendances.len();
        let mut recorded = Vec::with_capacity(total);
        let mut skipped = 0;

        for item in request.attendances {
            let student_id = item.student_id;
            match self
                .record_manual(school_id, item.into_request(&request.date))
                .await
            {
                Ok(view) => recorded.push(view),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        student_id = student_id,
                        school_id = school_id,
                        error_code = e.code(),
                        error = %e,
                        "Skipping bulk manual attendance item"
                    );
                }
            }
        }

        tracing::info!(
            school_id = school_id,
            date = %request.date,
            total = total,
            recorded = recorded.len(),
            skipped = skipped,
            "Bulk manual attendance processed"
        );

        Ok(BulkManualOutcome { recorded, skipped })
    }
}

/// Parsed manual entry
struct ManualEntry {
    date: NaiveDate,
    check_in: Option<NaiveDateTime>,
    check_out: Option<NaiveDateTime>,
    status: Option<AttendanceStatus>,
}

/// `HH:MM` on `date`; blank counts as absent
fn parse_time_on(date: NaiveDate, value: Option<&str>) -> Result<Option<NaiveDateTime>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => Ok(Some(date.and_time(parse_clock(v)?))),
    }
}

fn ensure_order(check_in: Option<NaiveDateTime>, check_out: Option<NaiveDateTime>) -> Result<()> {
    match (check_in, check_out) {
        (Some(check_in), Some(check_out)) if check_out < check_in => {
            Err(Error::CheckOutBeforeCheckIn { check_in, check_out })
        }
        _ => Ok(()),
    }
}
