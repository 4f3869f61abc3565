//! API Routes

use axum::{
    routing::{get, post},
    Router,
};

use super::{attendance_routes, realtime_routes};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Attendance
        .route("/api/attendance/tap", post(attendance_routes::record_tap))
        .route("/api/attendance/manual", post(attendance_routes::record_manual))
        .route("/api/attendance/manual/bulk", post(attendance_routes::record_bulk_manual))
        .route("/api/attendance", get(attendance_routes::list_attendance))
        .route("/api/attendance/summary", get(attendance_routes::school_summary))
        .route("/api/attendance/student/:student_id", get(attendance_routes::student_attendance))
        .route("/api/attendance/class/:class_id", get(attendance_routes::class_attendance))
        .route("/api/attendance/:id", get(attendance_routes::get_attendance))
        // Dashboard snapshots (REST fallback)
        .route("/api/realtime/live-feed", get(realtime_routes::live_feed))
        .route("/api/realtime/stats", get(realtime_routes::stats))
        .route("/api/realtime/leaderboard", get(realtime_routes::leaderboard))
        // WebSocket
        .route("/api/ws/attendance", get(realtime_routes::websocket_handler))
        .with_state(state)
}
