//! Dashboard view types
//!
//! Derived views only: nothing here is persisted.

use crate::attendance::TapDirection;
use crate::error::{Error, Result};
use crate::models::{AttendanceStatus, ClassId, StudentId};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of the live feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveFeedEntry {
    /// Attendance record ID
    pub id: u64,
    pub student_id: StudentId,
    pub student_name: String,
    pub class_id: Option<ClassId>,
    pub class_name: Option<String>,
    pub time: NaiveDateTime,
    pub status: AttendanceStatus,
    #[serde(rename = "type")]
    pub direction: TapDirection,
}

/// Feed row as read from storage (check-ins of the day)
#[derive(Debug, Clone, FromRow)]
pub struct FeedRow {
    pub id: u64,
    pub student_id: StudentId,
    pub student_name: String,
    pub class_id: Option<ClassId>,
    pub class_name: Option<String>,
    pub check_in_time: NaiveDateTime,
    pub status: String,
}

impl TryFrom<FeedRow> for LiveFeedEntry {
    type Error = Error;

    fn try_from(row: FeedRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            student_id: row.student_id,
            student_name: row.student_name,
            class_id: row.class_id,
            class_name: row.class_name,
            time: row.check_in_time,
            status: row.status.parse()?,
            direction: TapDirection::CheckIn,
        })
    }
}

/// Status histogram row for one school-day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCount {
    pub status: AttendanceStatus,
    pub count: u64,
}

/// Daily attendance statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceStats {
    pub total_students: u64,
    /// on_time + late + very_late
    pub present: u64,
    pub on_time: u64,
    pub late: u64,
    pub very_late: u64,
    /// Active students not (yet) present; never negative
    pub absent: u64,
    pub percentage: f64,
}

/// Earliest-arrival candidate
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ArrivalRow {
    pub student_id: StudentId,
    pub student_name: String,
    pub class_name: Option<String>,
    pub check_in_time: NaiveDateTime,
    pub status: String,
}

/// Leaderboard position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based
    pub rank: u32,
    pub student_id: StudentId,
    pub student_name: String,
    pub class_name: Option<String>,
    pub arrival_time: NaiveDateTime,
}

/// Feed, stats and leaderboard in one response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub date: NaiveDate,
    pub feed: Vec<LiveFeedEntry>,
    pub stats: AttendanceStats,
    pub leaderboard: Vec<LeaderboardEntry>,
}

// ========================================
// Public display projections
// ========================================

/// Feed row without identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicFeedEntry {
    pub student_name: String,
    pub class_name: Option<String>,
    pub time: NaiveDateTime,
    pub status: AttendanceStatus,
    #[serde(rename = "type")]
    pub direction: TapDirection,
}

/// Leaderboard row without identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicLeaderboardEntry {
    pub rank: u32,
    pub student_name: String,
    pub class_name: Option<String>,
    pub arrival_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicSnapshot {
    pub date: NaiveDate,
    pub feed: Vec<PublicFeedEntry>,
    pub stats: AttendanceStats,
    pub leaderboard: Vec<PublicLeaderboardEntry>,
}

impl LiveFeedEntry {
    pub fn public(&self) -> PublicFeedEntry {
        PublicFeedEntry {
            student_name: self.student_name.clone(),
            class_name: self.class_name.clone(),
            time: self.time,
            status: self.status,
            direction: self.direction,
        }
    }
}

impl LeaderboardEntry {
    pub fn public(&self) -> PublicLeaderboardEntry {
        PublicLeaderboardEntry {
            rank: self.rank,
            student_name: self.student_name.clone(),
            class_name: self.class_name.clone(),
            arrival_time: self.arrival_time,
        }
    }
}

impl DashboardSnapshot {
    pub fn public(&self) -> PublicSnapshot {
        PublicSnapshot {
            date: self.date,
            feed: self.feed.iter().map(LiveFeedEntry::public).collect(),
            stats: self.stats.clone(),
            leaderboard: self.leaderboard.iter().map(LeaderboardEntry::public).collect(),
        }
    }
}

/// `?class_id=&limit=` on the dashboard endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardQuery {
    pub class_id: Option<ClassId>,
    pub limit: Option<u32>,
}

/// Stats derived from the active roster size and the day's status histogram
pub fn derive_stats(total_students: u64, counts: &[StatusCount]) -> AttendanceStats {
    let mut stats = AttendanceStats {
        total_students,
        present: 0,
        on_time: 0,
        late: 0,
        very_late: 0,
        absent: 0,
        percentage: 0.0,
    };

    for c in counts {
        match c.status {
            AttendanceStatus::OnTime => stats.on_time += c.count,
            AttendanceStatus::Late => stats.late += c.count,
            AttendanceStatus::VeryLate => stats.very_late += c.count,
            AttendanceStatus::Absent | AttendanceStatus::Sick | AttendanceStatus::Excused => {}
        }
    }

    stats.present = stats.on_time + stats.late + stats.very_late;
    stats.absent = total_students.saturating_sub(stats.present);
    if total_students > 0 {
        stats.percentage = stats.present as f64 / total_students as f64 * 100.0;
    }
    stats
}

/// Earliest on_time arrivals, ascending, ranked from 1
pub fn rank_leaderboard(arrivals: Vec<ArrivalRow>, limit: usize) -> Vec<LeaderboardEntry> {
    let mut on_time: Vec<ArrivalRow> = arrivals
        .into_iter()
        .filter(|a| a.status.parse::<AttendanceStatus>().ok() == Some(AttendanceStatus::OnTime))
        .collect();
    on_time.sort_by(|a, b| {
        a.check_in_time
            .cmp(&b.check_in_time)
            .then(a.student_id.cmp(&b.student_id))
    });

    on_time
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, a)| LeaderboardEntry {
            rank: i as u32 + 1,
            student_id: a.student_id,
            student_name: a.student_name,
            class_name: a.class_name,
            arrival_time: a.check_in_time,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn arrival(id: StudentId, h: u32, m: u32, status: &str) -> ArrivalRow {
        ArrivalRow {
            student_id: id,
            student_name: format!("student-{}", id),
            class_name: Some("7A".to_string()),
            check_in_time: at(h, m),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_stats_counts_and_percentage() {
        let counts = [
            StatusCount { status: AttendanceStatus::OnTime, count: 6 },
            StatusCount { status: AttendanceStatus::Late, count: 2 },
            StatusCount { status: AttendanceStatus::VeryLate, count: 1 },
            StatusCount { status: AttendanceStatus::Sick, count: 1 },
        ];
        let stats = derive_stats(12, &counts);
        assert_eq!(stats.present, 9);
        assert_eq!(stats.on_time, 6);
        assert_eq!(stats.absent, 3);
        assert!((stats.percentage - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_with_no_students_has_zero_percentage() {
        let stats = derive_stats(0, &[]);
        assert_eq!(stats.absent, 0);
        assert_eq!(stats.percentage, 0.0);
    }

    #[test]
    fn test_absent_never_negative() {
        // Records for students deactivated later in the day
        let counts = [StatusCount { status: AttendanceStatus::OnTime, count: 5 }];
        let stats = derive_stats(3, &counts);
        assert_eq!(stats.absent, 0);
    }

    #[test]
    fn test_leaderboard_only_on_time_ascending() {
        let board = rank_leaderboard(
            vec![
                arrival(1, 7, 9, "on_time"),
                arrival(2, 6, 45, "on_time"),
                arrival(3, 6, 30, "late"),
                arrival(4, 7, 40, "very_late"),
                arrival(5, 6, 50, "on_time"),
            ],
            10,
        );
        let ids: Vec<_> = board.iter().map(|e| e.student_id).collect();
        assert_eq!(ids, vec![2, 5, 1]);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[2].rank, 3);
    }

    #[test]
    fn test_leaderboard_respects_limit() {
        let arrivals = (1..=5).map(|i| arrival(i, 6, i as u32, "on_time")).collect();
        assert_eq!(rank_leaderboard(arrivals, 2).len(), 2);
    }

    #[test]
    fn test_public_snapshot_has_no_student_ids() {
        let snapshot = DashboardSnapshot {
            date: at(0, 0).date(),
            feed: vec![LiveFeedEntry {
                id: 10,
                student_id: 1,
                student_name: "Sari".to_string(),
                class_id: Some(2),
                class_name: Some("7A".to_string()),
                time: at(7, 5),
                status: AttendanceStatus::OnTime,
                direction: TapDirection::CheckIn,
            }],
            stats: derive_stats(1, &[StatusCount { status: AttendanceStatus::OnTime, count: 1 }]),
            leaderboard: rank_leaderboard(vec![arrival(1, 7, 5, "on_time")], 10),
        };
        let json = serde_json::to_value(snapshot.public()).unwrap();
        assert!(json["feed"][0].get("student_id").is_none());
        assert!(json["feed"][0].get("id").is_none());
        assert!(json["leaderboard"][0].get("student_id").is_none());
        assert_eq!(json["feed"][0]["type"], "check_in");
        assert_eq!(json["feed"][0]["student_name"], "Sari");
    }
}
