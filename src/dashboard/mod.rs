//! Dashboard Aggregator
//!
//! ## Responsibilities
//!
//! - Live feed: most recent check-ins of the day, newest first
//! - Stats: on_time / late / very_late / absent counts and percentage
//! - Leaderboard: earliest on_time arrivals, ranked
//!
//! Every view is recomputed from storage on request. Used both by the REST
//! endpoints and by the broadcast worker after each recorded tap.

mod repository;
mod types;

pub use repository::DashboardRepository;
pub use types::*;

use crate::error::Result;
use crate::models::{ClassId, SchoolId};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::sync::Arc;

/// Upper bound for any requested `limit`
pub const MAX_LIMIT: u32 = 100;

/// Aggregate reads needed by the dashboard
pub trait DashboardStore: Send + Sync {
    fn count_active_students(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn aggregate_status_counts(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Vec<StatusCount>>> + Send;

    fn recent_check_ins(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<LiveFeedEntry>>> + Send;

    fn earliest_on_time(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<ArrivalRow>>> + Send;
}

impl<T: DashboardStore> DashboardStore for Arc<T> {
    fn count_active_students(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
    ) -> impl Future<Output = Result<u64>> + Send {
        (**self).count_active_students(school_id, class_id)
    }

    fn aggregate_status_counts(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Vec<StatusCount>>> + Send {
        (**self).aggregate_status_counts(school_id, class_id, date)
    }

    fn recent_check_ins(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<LiveFeedEntry>>> + Send {
        (**self).recent_check_ins(school_id, class_id, date, limit)
    }

    fn earliest_on_time(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<ArrivalRow>>> + Send {
        (**self).earliest_on_time(school_id, class_id, date, limit)
    }
}

/// DashboardAggregator instance
pub struct DashboardAggregator<D> {
    store: D,
    timezone: Tz,
    feed_limit: u32,
    leaderboard_limit: u32,
}

impl<D: DashboardStore> DashboardAggregator<D> {
    /// Create new DashboardAggregator
    pub fn new(store: D, timezone: Tz, feed_limit: u32, leaderboard_limit: u32) -> Self {
        Self {
            store,
            timezone,
            feed_limit: feed_limit.clamp(1, MAX_LIMIT),
            leaderboard_limit: leaderboard_limit.clamp(1, MAX_LIMIT),
        }
    }

    /// Current school-local date
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Most recent check-ins, newest first
    pub async fn live_feed(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: Option<u32>,
    ) -> Result<Vec<LiveFeedEntry>> {
        let limit = Self::clamp(limit, self.feed_limit);
        let mut feed = self
            .store
            .recent_check_ins(school_id, class_id, date, limit)
            .await?;
        feed.sort_by(|a, b| b.time.cmp(&a.time).then(b.id.cmp(&a.id)));
        feed.truncate(limit as usize);
        Ok(feed)
    }

    /// Daily statistics
    pub async fn stats(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
    ) -> Result<AttendanceStats> {
        let (total, counts) = tokio::try_join!(
            self.store.count_active_students(school_id, class_id),
            self.store.aggregate_status_counts(school_id, class_id, date),
        )?;
        Ok(derive_stats(total, &counts))
    }

    /// Earliest on_time arrivals
    pub async fn leaderboard(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
        limit: Option<u32>,
    ) -> Result<Vec<LeaderboardEntry>> {
        let limit = Self::clamp(limit, self.leaderboard_limit);
        let arrivals = self
            .store
            .earliest_on_time(school_id, class_id, date, limit)
            .await?;
        Ok(rank_leaderboard(arrivals, limit as usize))
    }

    /// Feed, stats and leaderboard with default limits
    pub async fn snapshot(
        &self,
        school_id: SchoolId,
        class_id: Option<ClassId>,
        date: NaiveDate,
    ) -> Result<DashboardSnapshot> {
        let (feed, stats, leaderboard) = tokio::try_join!(
            self.live_feed(school_id, class_id, date, None),
            self.stats(school_id, class_id, date),
            self.leaderboard(school_id, class_id, date, None),
        )?;
        Ok(DashboardSnapshot {
            date,
            feed,
            stats,
            leaderboard,
        })
    }

    fn clamp(requested: Option<u32>, default: u32) -> u32 {
        requested.unwrap_or(default).clamp(1, MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::{AttendanceStore, NewAttendance};
    use crate::models::{AttendanceMethod, AttendanceStatus};
    use crate::testing::MemoryStore;
    use chrono::NaiveDateTime;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    async fn check_in(store: &MemoryStore, student_id: u64, time: NaiveDateTime, status: AttendanceStatus) {
        store
            .create(&NewAttendance {
                student_id,
                date: day(),
                check_in_time: Some(time),
                check_out_time: None,
                status,
                method: AttendanceMethod::Rfid,
            })
            .await
            .unwrap();
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_student(1, 1, Some(10), "Adi", "T1");
        store.add_student(2, 1, Some(10), "Budi", "T2");
        store.add_student(3, 1, Some(20), "Citra", "T3");
        store.add_student(4, 1, Some(20), "Dewi", "T4");
        store.add_student(5, 2, None, "Other school", "T5");
        check_in(&store, 1, at(7, 20), AttendanceStatus::Late).await;
        check_in(&store, 2, at(6, 50), AttendanceStatus::OnTime).await;
        check_in(&store, 3, at(7, 5), AttendanceStatus::OnTime).await;
        check_in(&store, 5, at(6, 0), AttendanceStatus::OnTime).await;
        store
    }

    fn aggregator(store: MemoryStore) -> DashboardAggregator<MemoryStore> {
        DashboardAggregator::new(store, chrono_tz::Asia::Jakarta, 20, 10)
    }

    #[tokio::test]
    async fn test_live_feed_newest_first() {
        let dash = aggregator(seeded().await);
        let feed = dash.live_feed(1, None, day(), None).await.unwrap();
        let ids: Vec<_> = feed.iter().map(|e| e.student_id).collect();
        assert_eq!(ids, vec![1, 3, 2]);

        let feed = dash.live_feed(1, None, day(), Some(1)).await.unwrap();
        assert_eq!(feed.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_for_school_and_class() {
        let dash = aggregator(seeded().await);
        let stats = dash.stats(1, None, day()).await.unwrap();
        assert_eq!(stats.total_students, 4);
        assert_eq!(stats.present, 3);
        assert_eq!(stats.late, 1);
        assert_eq!(stats.absent, 1);
        assert!((stats.percentage - 75.0).abs() < 1e-9);

        let class_stats = dash.stats(1, Some(20), day()).await.unwrap();
        assert_eq!(class_stats.total_students, 2);
        assert_eq!(class_stats.present, 1);
        assert_eq!(class_stats.absent, 1);
    }

    #[tokio::test]
    async fn test_leaderboard_excludes_late_and_other_schools() {
        let dash = aggregator(seeded().await);
        let board = dash.leaderboard(1, None, day(), None).await.unwrap();
        let ids: Vec<_> = board.iter().map(|e| e.student_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(board[0].rank, 1);
    }

    #[tokio::test]
    async fn test_snapshot_on_empty_school() {
        let dash = aggregator(MemoryStore::new());
        let snapshot = dash.snapshot(9, None, day()).await.unwrap();
        assert!(snapshot.feed.is_empty());
        assert!(snapshot.leaderboard.is_empty());
        assert_eq!(snapshot.stats.percentage, 0.0);
        assert_eq!(snapshot.stats.absent, 0);
    }
}
