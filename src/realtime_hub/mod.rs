//! RealtimeHub - WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - Membership: live connections grouped by school, each with an optional
//!   class filter and an audience (dashboard / public display)
//! - Fan-out of attendance events to matching members
//! - Liveness: members that stop answering are evicted
//!
//! Every member owns a bounded outbound queue. A full queue drops the message
//! for that member only; `broadcast` never waits on a slow consumer.
//! Dropping a member's sender closes its queue, which ends its writer task.
//! Eviction also fires the member's eviction signal so a session stuck on a
//! stalled transport still tears down.

pub mod session;
mod types;

pub use types::*;

use crate::credentials::{Audience, ClientScope};
use crate::models::{ClassId, SchoolId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Identifies a registered member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberHandle {
    pub id: Uuid,
    pub school_id: SchoolId,
    pub audience: Audience,
}

/// Registered connection
struct Member {
    audience: Audience,
    class_filter: Option<ClassId>,
    tx: mpsc::Sender<String>,
    last_seen: Instant,
    evicted: Arc<Notify>,
}

impl Member {
    fn wants(&self, class_id: Option<ClassId>) -> bool {
        match self.class_filter {
            None => true,
            Some(filter) => class_id == Some(filter),
        }
    }
}

/// Result of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    schools: RwLock<HashMap<SchoolId, HashMap<Uuid, Member>>>,
    connection_count: AtomicU64,
    dropped_count: AtomicU64,
    queue_capacity: usize,
}

impl RealtimeHub {
    /// Create new RealtimeHub with per-member queue capacity
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            schools: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new member for an authorized scope
    pub async fn register(&self, scope: &ClientScope) -> (MemberHandle, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let member = Member {
            audience: scope.audience,
            class_filter: scope.class_id,
            tx,
            last_seen: Instant::now(),
            evicted: Arc::new(Notify::new()),
        };

        {
            let mut schools = self.schools.write().await;
            schools.entry(scope.school_id).or_default().insert(id, member);
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            connection_id = %id,
            school_id = scope.school_id,
            audience = scope.audience.as_str(),
            "Client connected"
        );

        (
            MemberHandle {
                id,
                school_id: scope.school_id,
                audience: scope.audience,
            },
            rx,
        )
    }

    /// Unregister a member. Safe to call more than once.
    pub async fn unregister(&self, handle: &MemberHandle) {
        let mut schools = self.schools.write().await;
        let removed = match schools.get_mut(&handle.school_id) {
            Some(members) => {
                let removed = members.remove(&handle.id).is_some();
                if members.is_empty() {
                    schools.remove(&handle.school_id);
                }
                removed
            }
            None => false,
        };

        if removed {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %handle.id, school_id = handle.school_id, "Client disconnected");
        }
    }

    /// Deliver an attendance event to every matching member of its school
    pub async fn broadcast(&self, event: &AttendanceEvent) -> DeliveryReport {
        let full = ServerMessage::AttendanceEvent(EventPayload::Full(event.clone()));
        let full_json = match serde_json::to_string(&full) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize attendance event");
                return DeliveryReport::default();
            }
        };
        let mut public_json: Option<String> = None;

        let mut report = DeliveryReport::default();
        let schools = self.schools.read().await;
        let Some(members) = schools.get(&event.school_id) else {
            tracing::debug!(school_id = event.school_id, "No clients for school");
            return report;
        };

        for (id, member) in members.iter().filter(|(_, m)| m.wants(event.class_id)) {
            let json = match member.audience {
                Audience::Dashboard => full_json.clone(),
                Audience::PublicDisplay => {
                    if public_json.is_none() {
                        let public = ServerMessage::AttendanceEvent(EventPayload::Public(event.public()));
                        match serde_json::to_string(&public) {
                            Ok(j) => public_json = Some(j),
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to serialize public event");
                                continue;
                            }
                        }
                    }
                    public_json.clone().unwrap_or_default()
                }
            };

            if self.deliver(id, &member.tx, json) {
                report.delivered += 1;
            } else {
                report.dropped += 1;
            }
        }

        tracing::debug!(
            school_id = event.school_id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast attendance event"
        );

        report
    }

    /// Queue a message for one member. Returns false when dropped or gone.
    pub async fn send_to(&self, handle: &MemberHandle, message: &ServerMessage) -> bool {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return false;
            }
        };

        let schools = self.schools.read().await;
        match schools.get(&handle.school_id).and_then(|m| m.get(&handle.id)) {
            Some(member) => self.deliver(&handle.id, &member.tx, json),
            None => false,
        }
    }

    fn deliver(&self, id: &Uuid, tx: &mpsc::Sender<String>, json: String) -> bool {
        match tx.try_send(json) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(connection_id = %id, "Outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %id, "Outbound queue closed");
                false
            }
        }
    }

    /// Replace a member's class filter
    pub async fn set_class_filter(&self, handle: &MemberHandle, class_id: Option<ClassId>) -> bool {
        let mut schools = self.schools.write().await;
        match schools
            .get_mut(&handle.school_id)
            .and_then(|m| m.get_mut(&handle.id))
        {
            Some(member) => {
                member.class_filter = class_id;
                true
            }
            None => false,
        }
    }

    /// Current class filter of a member
    pub async fn class_filter(&self, handle: &MemberHandle) -> Option<ClassId> {
        let schools = self.schools.read().await;
        schools
            .get(&handle.school_id)
            .and_then(|m| m.get(&handle.id))
            .and_then(|m| m.class_filter)
    }

    /// Record inbound activity (pong or any client frame)
    pub async fn mark_alive(&self, handle: &MemberHandle) {
        let mut schools = self.schools.write().await;
        if let Some(member) = schools
            .get_mut(&handle.school_id)
            .and_then(|m| m.get_mut(&handle.id))
        {
            member.last_seen = Instant::now();
        }
    }

    /// Signal fired when the member is evicted. None once it is gone.
    pub async fn eviction_signal(&self, handle: &MemberHandle) -> Option<Arc<Notify>> {
        let schools = self.schools.read().await;
        schools
            .get(&handle.school_id)
            .and_then(|m| m.get(&handle.id))
            .map(|m| m.evicted.clone())
    }

    /// Remove members silent for longer than `timeout`
    pub async fn evict_stale(&self, timeout: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        let mut evicted = Vec::new();

        let mut schools = self.schools.write().await;
        for (school_id, members) in schools.iter_mut() {
            members.retain(|id, member| {
                let alive = now.duration_since(member.last_seen) <= timeout;
                if !alive {
                    tracing::warn!(
                        connection_id = %id,
                        school_id = *school_id,
                        "No pong within timeout, evicting client"
                    );
                    // Permit is stored, the session may not be waiting yet
                    member.evicted.notify_one();
                    evicted.push(*id);
                }
                alive
            });
        }
        schools.retain(|_, members| !members.is_empty());

        if !evicted.is_empty() {
            self.connection_count
                .fetch_sub(evicted.len() as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Periodically evict stale members
    pub fn start_liveness_monitor(self: Arc<Self>, check_interval: Duration, timeout: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                check_interval_sec = check_interval.as_secs(),
                timeout_sec = timeout.as_secs(),
                "Liveness monitor started"
            );
            let mut ticker = tokio::time::interval(check_interval);
            loop {
                ticker.tick().await;
                self.evict_stale(timeout).await;
            }
        })
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Members currently registered for a school
    pub async fn school_connection_count(&self, school_id: SchoolId) -> usize {
        self.schools
            .read()
            .await
            .get(&school_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Messages dropped on full queues since start
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }
}
