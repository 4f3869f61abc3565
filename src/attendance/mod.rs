//! Attendance Recorder
//!
//! ## Responsibilities
//!
//! - Tap state machine per (student, date):
//!   `NoRecord -> CheckedIn -> CheckedOut`, a third tap is `already_completed`
//! - Arrival classification (on_time / late / very_late) via the school policy
//! - Manual and bulk manual entry for when readers are down
//! - Hand-off of every committed transition to the dispatch stage
//! - Read side: single records, student history, class and school days,
//!   filtered paginated listing
//!
//! Storage enforces one row per (student, date). A duplicate insert from a
//! concurrent tap is resolved by re-reading the row once.

mod history;
mod repository;
mod service;
mod types;

pub use history::AttendanceHistory;
pub use repository::AttendanceRepository;
pub use service::AttendanceRecorder;
pub use types::*;

use crate::error::Result;
use crate::models::{SchoolId, Student, StudentId};
use chrono::NaiveDate;
use std::future::Future;
use std::sync::Arc;

/// Attendance persistence
pub trait AttendanceStore: Send + Sync {
    fn find_student_by_rfid(&self, rfid_code: &str) -> impl Future<Output = Result<Option<Student>>> + Send;

    fn find_student_by_id(&self, student_id: StudentId) -> impl Future<Output = Result<Option<Student>>> + Send;

    fn find_by_student_and_date(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Option<AttendanceRecord>>> + Send;

    /// Insert; `Error::Conflict` when the (student, date) row already exists
    fn create(&self, new: &NewAttendance) -> impl Future<Output = Result<AttendanceRecord>> + Send;

    fn update(&self, record: &AttendanceRecord) -> impl Future<Output = Result<AttendanceRecord>> + Send;

    /// Record with its student, None unless the student belongs to `school_id`
    fn find_view(&self, school_id: SchoolId, id: u64) -> impl Future<Output = Result<Option<AttendanceView>>> + Send;

    /// Matching records, newest date first then student name
    fn query_views(
        &self,
        school_id: SchoolId,
        query: &AttendanceQuery,
        page: Option<PageRequest>,
    ) -> impl Future<Output = Result<Vec<AttendanceView>>> + Send;

    fn count_views(&self, school_id: SchoolId, query: &AttendanceQuery) -> impl Future<Output = Result<u64>> + Send;
}

impl<T: AttendanceStore> AttendanceStore for Arc<T> {
    fn find_student_by_rfid(&self, rfid_code: &str) -> impl Future<Output = Result<Option<Student>>> + Send {
        (**self).find_student_by_rfid(rfid_code)
    }

    fn find_student_by_id(&self, student_id: StudentId) -> impl Future<Output = Result<Option<Student>>> + Send {
        (**self).find_student_by_id(student_id)
    }

    fn find_by_student_and_date(
        &self,
        student_id: StudentId,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Option<AttendanceRecord>>> + Send {
        (**self).find_by_student_and_date(student_id, date)
    }

    fn create(&self, new: &NewAttendance) -> impl Future<Output = Result<AttendanceRecord>> + Send {
        (**self).create(new)
    }

    fn update(&self, record: &AttendanceRecord) -> impl Future<Output = Result<AttendanceRecord>> + Send {
        (**self).update(record)
    }

    fn find_view(&self, school_id: SchoolId, id: u64) -> impl Future<Output = Result<Option<AttendanceView>>> + Send {
        (**self).find_view(school_id, id)
    }

    fn query_views(
        &self,
        school_id: SchoolId,
        query: &AttendanceQuery,
        page: Option<PageRequest>,
    ) -> impl Future<Output = Result<Vec<AttendanceView>>> + Send {
        (**self).query_views(school_id, query, page)
    }

    fn count_views(&self, school_id: SchoolId, query: &AttendanceQuery) -> impl Future<Output = Result<u64>> + Send {
        (**self).count_views(school_id, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance_policy::PolicyResolver;
    use crate::error::Error;
    use crate::event_dispatch::{AttendanceNotifier, AttendanceRecorded};
    use crate::models::{AttendanceMethod, AttendanceStatus};
    use crate::testing::MemoryStore;
    use chrono::{DateTime, FixedOffset, NaiveDateTime};
    use tokio::sync::mpsc;

    type TestRecorder = AttendanceRecorder<MemoryStore, MemoryStore, MemoryStore>;

    const KEY: &str = "reader-key-1";

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn jakarta(h: u32, m: u32) -> Option<DateTime<FixedOffset>> {
        Some(
            DateTime::parse_from_rfc3339(&format!("2025-03-10T{:02}:{:02}:00+07:00", h, m)).unwrap(),
        )
    }

    fn setup() -> (MemoryStore, TestRecorder, mpsc::Receiver<AttendanceRecorded>) {
        let store = MemoryStore::new();
        store.add_device(KEY, 100, 1);
        store.add_student(7, 1, Some(3), "Sari", "TAG-7");
        store.add_student(8, 1, Some(3), "Budi", "TAG-8");
        store.add_student(9, 2, None, "Elsewhere", "TAG-9");
        let (notifier, rx) = AttendanceNotifier::channel(16);
        let recorder = AttendanceRecorder::new(
            store.clone(),
            store.clone(),
            PolicyResolver::new(store.clone()),
            notifier,
            chrono_tz::Asia::Jakarta,
        );
        (store, recorder, rx)
    }

    fn tap(tag: &str, timestamp: Option<DateTime<FixedOffset>>) -> TapRequest {
        TapRequest {
            credential: KEY.to_string(),
            tag: tag.to_string(),
            timestamp,
        }
    }

    fn manual(student_id: u64, check_in: Option<&str>, check_out: Option<&str>) -> ManualAttendanceRequest {
        ManualAttendanceRequest {
            student_id,
            date: "2025-03-10".to_string(),
            check_in_time: check_in.map(str::to_string),
            check_out_time: check_out.map(str::to_string),
            status: None,
        }
    }

    // ========================================
    // Taps
    // ========================================

    #[tokio::test]
    async fn test_first_tap_classifies_arrival() {
        for (h, m, expected) in [
            (7, 10, AttendanceStatus::OnTime),
            (7, 20, AttendanceStatus::Late),
            (7, 45, AttendanceStatus::VeryLate),
        ] {
            let (store, recorder, _rx) = setup();
            let outcome = recorder.record_tap(tap("TAG-7", jakarta(h, m))).await.unwrap();
            assert_eq!(outcome.direction, TapDirection::CheckIn);
            assert_eq!(outcome.status, Some(expected));
            assert!(outcome.success);
            assert_eq!(store.record_for(7, day()).unwrap().status, expected);
        }
    }

    #[tokio::test]
    async fn test_tap_sequence_check_in_out_completed() {
        let (store, recorder, _rx) = setup();

        let first = recorder.record_tap(tap("TAG-7", jakarta(7, 5))).await.unwrap();
        assert_eq!(first.direction, TapDirection::CheckIn);

        let second = recorder.record_tap(tap("TAG-7", jakarta(15, 0))).await.unwrap();
        assert_eq!(second.direction, TapDirection::CheckOut);
        assert_eq!(second.status, None);
        let after_checkout = store.record_for(7, day()).unwrap();
        assert_eq!(after_checkout.check_out_time, Some(at(15, 0)));
        assert_eq!(after_checkout.status, AttendanceStatus::OnTime);

        let third = recorder.record_tap(tap("TAG-7", jakarta(16, 0))).await.unwrap();
        assert_eq!(third.direction, TapDirection::AlreadyCompleted);
        assert!(!third.success);
        assert_eq!(third.time, at(15, 0));
        assert_eq!(store.record_for(7, day()).unwrap(), after_checkout);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_tap_before_recorded_check_in_rejected() {
        let (store, recorder, _rx) = setup();
        recorder.record_tap(tap("TAG-7", jakarta(7, 5))).await.unwrap();

        let err = recorder.record_tap(tap("TAG-7", jakarta(6, 50))).await.unwrap_err();
        assert!(matches!(err, Error::CheckOutBeforeCheckIn { .. }));
        assert_eq!(store.record_for(7, day()).unwrap().check_out_time, None);
    }

    #[tokio::test]
    async fn test_timestamp_converted_to_school_time() {
        let (store, recorder, _rx) = setup();
        let utc = DateTime::parse_from_rfc3339("2025-03-10T00:10:00Z").ok();
        let outcome = recorder.record_tap(tap("TAG-7", utc)).await.unwrap();
        assert_eq!(outcome.time, at(7, 10));
        assert_eq!(outcome.status, Some(AttendanceStatus::OnTime));
        assert!(store.record_for(7, day()).is_some());
    }

    #[tokio::test]
    async fn test_sub_second_taps_are_truncated() {
        let (store, recorder, _rx) = setup();
        let first = DateTime::parse_from_rfc3339("2025-03-10T07:05:00.600+07:00").ok();
        let second = DateTime::parse_from_rfc3339("2025-03-10T07:05:00.400+07:00").ok();

        let check_in = recorder.record_tap(tap("TAG-7", first)).await.unwrap();
        assert_eq!(check_in.time, at(7, 5));

        // Same stored second, so this is a check-out and not a reversal
        let check_out = recorder.record_tap(tap("TAG-7", second)).await.unwrap();
        assert_eq!(check_out.direction, TapDirection::CheckOut);

        let record = store.record_for(7, day()).unwrap();
        assert_eq!(record.check_in_time, Some(at(7, 5)));
        assert_eq!(record.check_out_time, Some(at(7, 5)));
    }

    #[tokio::test]
    async fn test_missing_timestamp_uses_now() {
        let (_store, recorder, _rx) = setup();
        let outcome = recorder.record_tap(tap("TAG-7", None)).await.unwrap();
        assert_eq!(outcome.direction, TapDirection::CheckIn);
        let now = recorder.local_time(None);
        assert!((now - outcome.time).num_seconds().abs() < 60);
    }

    #[tokio::test]
    async fn test_tap_rejections() {
        let (store, recorder, _rx) = setup();

        let mut bad_key = tap("TAG-7", jakarta(7, 0));
        bad_key.credential = "nope".to_string();
        assert!(matches!(
            recorder.record_tap(bad_key).await,
            Err(Error::InvalidCredential(_))
        ));

        assert!(matches!(
            recorder.record_tap(tap("  ", jakarta(7, 0))).await,
            Err(Error::Validation(_))
        ));

        assert!(matches!(
            recorder.record_tap(tap("UNKNOWN", jakarta(7, 0))).await,
            Err(Error::StudentNotFound(_))
        ));

        // Card from another school
        assert!(matches!(
            recorder.record_tap(tap("TAG-9", jakarta(7, 0))).await,
            Err(Error::InvalidCredential(_))
        ));

        store.deactivate_student(8);
        assert!(matches!(
            recorder.record_tap(tap("TAG-8", jakarta(7, 0))).await,
            Err(Error::StudentNotFound(_))
        ));

        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_tap_stamps_unstamped_manual_row() {
        let (store, recorder, _rx) = setup();
        let mut sick = manual(7, None, None);
        sick.status = Some(AttendanceStatus::Sick);
        recorder.record_manual(1, sick).await.unwrap();

        let outcome = recorder.record_tap(tap("TAG-7", jakarta(7, 20))).await.unwrap();
        assert_eq!(outcome.direction, TapDirection::CheckIn);
        let record = store.record_for(7, day()).unwrap();
        assert_eq!(record.status, AttendanceStatus::Late);
        assert_eq!(record.method, AttendanceMethod::Rfid);
        assert_eq!(record.check_in_time, Some(at(7, 20)));
    }

    #[tokio::test]
    async fn test_concurrent_insert_is_resolved_by_re_read() {
        let (store, recorder, _rx) = setup();
        store.race_next_create(NewAttendance {
            student_id: 7,
            date: day(),
            check_in_time: Some(at(7, 4)),
            check_out_time: None,
            status: AttendanceStatus::OnTime,
            method: AttendanceMethod::Rfid,
        });

        let outcome = recorder.record_tap(tap("TAG-7", jakarta(7, 5))).await.unwrap();
        assert_eq!(outcome.direction, TapDirection::CheckOut);
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.record_for(7, day()).unwrap().check_in_time, Some(at(7, 4)));
    }

    #[tokio::test]
    async fn test_transitions_are_dispatched() {
        let (_store, recorder, mut rx) = setup();
        recorder.record_tap(tap("TAG-7", jakarta(7, 5))).await.unwrap();
        recorder.record_tap(tap("TAG-7", jakarta(15, 0))).await.unwrap();
        recorder.record_tap(tap("TAG-7", jakarta(16, 0))).await.unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.direction, TapDirection::CheckIn);
        assert_eq!(first.school_id, 1);
        assert_eq!(rx.try_recv().unwrap().direction, TapDirection::CheckOut);
        // already_completed changes nothing
        assert!(rx.try_recv().is_err());
    }

    // ========================================
    // Manual entry
    // ========================================

    #[tokio::test]
    async fn test_manual_entry_creates_classified_record() {
        let (_store, recorder, _rx) = setup();
        let view = recorder.record_manual(1, manual(7, Some("07:20"), None)).await.unwrap();
        assert_eq!(view.status, AttendanceStatus::Late);
        assert_eq!(view.method, AttendanceMethod::Manual);
        assert_eq!(view.check_in_time, Some(at(7, 20)));
        assert_eq!(view.class_name.as_deref(), Some("class-3"));
    }

    #[tokio::test]
    async fn test_manual_without_times_is_absent() {
        let (_store, recorder, mut rx) = setup();
        let view = recorder.record_manual(1, manual(7, None, Some(""))).await.unwrap();
        assert_eq!(view.status, AttendanceStatus::Absent);
        assert_eq!(view.check_out_time, None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_manual_check_out_before_check_in_rejected() {
        let (store, recorder, _rx) = setup();
        let err = recorder
            .record_manual(1, manual(7, Some("07:05"), Some("06:50")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CheckOutBeforeCheckIn { .. }));
        assert_eq!(store.record_count(), 0);

        // Amending an existing check-in with an earlier check-out
        recorder.record_manual(1, manual(7, Some("07:05"), None)).await.unwrap();
        let err = recorder
            .record_manual(1, manual(7, None, Some("06:50")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CheckOutBeforeCheckIn { .. }));
    }

    #[tokio::test]
    async fn test_manual_amend_keeps_one_record() {
        let (store, recorder, _rx) = setup();
        recorder.record_tap(tap("TAG-7", jakarta(7, 40))).await.unwrap();

        let view = recorder
            .record_manual(1, manual(7, Some("07:00"), Some("14:00")))
            .await
            .unwrap();
        assert_eq!(view.status, AttendanceStatus::OnTime);
        assert_eq!(view.check_out_time, Some(at(14, 0)));
        assert_eq!(view.method, AttendanceMethod::Manual);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_manual_status_rules() {
        let (_store, recorder, _rx) = setup();

        let mut excused = manual(7, None, None);
        excused.status = Some(AttendanceStatus::Excused);
        assert_eq!(
            recorder.record_manual(1, excused).await.unwrap().status,
            AttendanceStatus::Excused
        );

        let mut forced = manual(8, None, None);
        forced.status = Some(AttendanceStatus::OnTime);
        assert!(matches!(recorder.record_manual(1, forced).await, Err(Error::Validation(_))));

        let mut mixed = manual(8, Some("07:00"), None);
        mixed.status = Some(AttendanceStatus::Sick);
        assert!(matches!(recorder.record_manual(1, mixed).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_manual_rejects_bad_input_and_foreign_students() {
        let (_store, recorder, _rx) = setup();

        let mut bad_date = manual(7, None, None);
        bad_date.date = "10/03/2025".to_string();
        assert!(matches!(recorder.record_manual(1, bad_date).await, Err(Error::Validation(_))));

        assert!(matches!(
            recorder.record_manual(1, manual(7, Some("7am"), None)).await,
            Err(Error::Validation(_))
        ));

        assert!(matches!(
            recorder.record_manual(1, manual(9, Some("07:00"), None)).await,
            Err(Error::StudentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bulk_manual_skips_failed_items() {
        let (store, recorder, _rx) = setup();
        store.add_student(10, 1, None, "C", "TAG-10");
        store.add_student(11, 1, None, "D", "TAG-11");

        let item = |student_id: u64, check_in: &str| BulkManualAttendanceItem {
            student_id,
            check_in_time: Some(check_in.to_string()),
            check_out_time: None,
            status: None,
        };
        let request = BulkManualAttendanceRequest {
            date: "2025-03-10".to_string(),
            attendances: vec![
                item(7, "07:00"),
                item(8, "07:20"),
                item(999, "07:00"),
                item(10, "07:40"),
                item(11, "06:55"),
            ],
        };

        let outcome = recorder.record_bulk_manual(1, request).await.unwrap();
        assert_eq!(outcome.recorded.len(), 4);
        assert_eq!(outcome.skipped, 1);
        let ids: Vec<_> = outcome.recorded.iter().map(|v| v.student_id).collect();
        assert_eq!(ids, vec![7, 8, 10, 11]);
        assert_eq!(store.record_count(), 4);
    }

    #[tokio::test]
    async fn test_bulk_manual_requires_valid_date() {
        let (_store, recorder, _rx) = setup();
        let request = BulkManualAttendanceRequest {
            date: "".to_string(),
            attendances: vec![],
        };
        assert!(matches!(
            recorder.record_bulk_manual(1, request).await,
            Err(Error::Validation(_))
        ));
    }
}
