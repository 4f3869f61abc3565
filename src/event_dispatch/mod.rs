//! Event dispatch: persist, then notify
//!
//! The recorder pushes an [`AttendanceRecorded`] into a bounded channel and
//! returns. A [`BroadcastWorker`] drains the channel, recomputes stats and
//! leaderboard, and hands the event to the realtime hub. A full channel
//! drops the notification; the write has already succeeded.

use crate::attendance::{AttendanceRecord, TapDirection};
use crate::dashboard::{DashboardAggregator, DashboardStore, LiveFeedEntry};
use crate::error::Result;
use crate::models::{SchoolId, Student};
use crate::realtime_hub::{AttendanceEvent, RealtimeHub};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// A committed attendance transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecorded {
    pub school_id: SchoolId,
    pub student: Student,
    pub record: AttendanceRecord,
    pub direction: TapDirection,
    /// Time of the transition (check-in or check-out)
    pub time: NaiveDateTime,
}

impl AttendanceRecorded {
    fn feed_entry(&self) -> LiveFeedEntry {
        LiveFeedEntry {
            id: self.record.id,
            student_id: self.student.id,
            student_name: self.student.name.clone(),
            class_id: self.student.class_id,
            class_name: self.student.class_name.clone(),
            time: self.time,
            status: self.record.status,
            direction: self.direction,
        }
    }
}

/// Producer side, held by the recorder
#[derive(Clone)]
pub struct AttendanceNotifier {
    tx: mpsc::Sender<AttendanceRecorded>,
}

impl AttendanceNotifier {
    /// Notifier plus the receiver for a [`BroadcastWorker`]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AttendanceRecorded>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Hand off without waiting
    pub fn notify(&self, event: AttendanceRecorded) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    student_id = event.student.id,
                    school_id = event.school_id,
                    "Dispatch queue full, dropping attendance notification"
                );
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!(
                    student_id = event.student.id,
                    "Dispatch worker stopped, dropping attendance notification"
                );
            }
        }
    }
}

/// Consumer side: builds and broadcasts `AttendanceEvent`s
pub struct BroadcastWorker<D> {
    dashboard: Arc<DashboardAggregator<D>>,
    hub: Arc<RealtimeHub>,
}

impl<D: DashboardStore + 'static> BroadcastWorker<D> {
    /// Create new BroadcastWorker
    pub fn new(dashboard: Arc<DashboardAggregator<D>>, hub: Arc<RealtimeHub>) -> Self {
        Self { dashboard, hub }
    }

    /// Build the broadcast payload for one transition (school-wide views)
    pub async fn build_event(&self, recorded: &AttendanceRecorded) -> Result<AttendanceEvent> {
        let date = recorded.record.date;
        let (stats, leaderboard) = tokio::try_join!(
            self.dashboard.stats(recorded.school_id, None, date),
            self.dashboard.leaderboard(recorded.school_id, None, date, None),
        )?;

        Ok(AttendanceEvent {
            school_id: recorded.school_id,
            class_id: recorded.student.class_id,
            attendance: recorded.feed_entry(),
            stats,
            leaderboard,
        })
    }

    /// Process one transition. Failures are logged, never propagated.
    pub async fn handle(&self, recorded: AttendanceRecorded) {
        if self.hub.school_connection_count(recorded.school_id).await == 0 {
            tracing::debug!(school_id = recorded.school_id, "No listeners, skipping broadcast");
            return;
        }

        match self.build_event(&recorded).await {
            Ok(event) => {
                self.hub.broadcast(&event).await;
            }
            Err(e) => {
                tracing::error!(
                    school_id = recorded.school_id,
                    student_id = recorded.student.id,
                    error = %e,
                    "Failed to build attendance event"
                );
            }
        }
    }

    /// Start draining the dispatch channel
    pub fn start(self: Arc<Self>, mut rx: mpsc::Receiver<AttendanceRecorded>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Broadcast worker started");
            while let Some(recorded) = rx.recv().await {
                self.handle(recorded).await;
            }
            tracing::info!("Broadcast worker stopped");
        })
    }
}
