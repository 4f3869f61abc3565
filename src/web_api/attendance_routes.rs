//! Attendance API Routes
//!
//! RFID taps from reader devices, manual entry and record queries from
//! staff dashboards.

use super::auth::{authorize, TokenQuery};
use crate::attendance::{
    AttendanceFilter, AttendanceList, AttendanceView, BulkManualAttendanceRequest, BulkManualOutcome,
    ClassAttendance, DateQuery, DateRangeQuery, ManualAttendanceRequest, SchoolAttendanceSummary,
    TapOutcome, TapRequest,
};
use crate::models::{ClassId, StudentId};
use crate::error::Result;
use crate::models::ApiResponse;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};

/// POST /api/attendance/tap
/// Device-authenticated by the key in the body
pub async fn record_tap(
    State(state): State<AppState>,
    Json(request): Json<TapRequest>,
) -> Result<Json<ApiResponse<TapOutcome>>> {
    let outcome = state.recorder.record_tap(request).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// POST /api/attendance/manual
pub async fn record_manual(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(request): Json<ManualAttendanceRequest>,
) -> Result<Json<ApiResponse<AttendanceView>>> {
    let scope = authorize(&state.credentials, &headers, &query).await?;
    scope.require_dashboard()?;

    let view = state.recorder.record_manual(scope.school_id, request).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// POST /api/attendance/manual/bulk
pub async fn record_bulk_manual(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(request): Json<BulkManualAttendanceRequest>,
) -> Result<Json<ApiResponse<BulkManualOutcome>>> {
    let scope = authorize(&state.credentials, &headers, &query).await?;
    scope.require_dashboard()?;

    let outcome = state
        .recorder
        .record_bulk_manual(scope.school_id, request)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// GET /api/attendance
pub async fn list_attendance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Query(filter): Query<AttendanceFilter>,
) -> Result<Json<ApiResponse<AttendanceList>>> {
    let scope = authorize(&state.credentials, &headers, &token).await?;
    scope.require_dashboard()?;

    let list = state.history.list(scope.school_id, &filter).await?;
    Ok(Json(ApiResponse::success(list)))
}

/// GET /api/attendance/:id
pub async fn get_attendance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<AttendanceView>>> {
    let scope = authorize(&state.credentials, &headers, &token).await?;
    scope.require_dashboard()?;

    let view = state.history.get(scope.school_id, id).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// GET /api/attendance/student/:student_id
pub async fn student_attendance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Query(range): Query<DateRangeQuery>,
    Path(student_id): Path<StudentId>,
) -> Result<Json<ApiResponse<Vec<AttendanceView>>>> {
    let scope = authorize(&state.credentials, &headers, &token).await?;
    scope.require_dashboard()?;

    let views = state
        .history
        .student_history(scope.school_id, student_id, &range)
        .await?;
    Ok(Json(ApiResponse::success(views)))
}

/// GET /api/attendance/class/:class_id
pub async fn class_attendance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Query(query): Query<DateQuery>,
    Path(class_id): Path<ClassId>,
) -> Result<Json<ApiResponse<ClassAttendance>>> {
    let scope = authorize(&state.credentials, &headers, &token).await?;
    scope.require_dashboard()?;

    let date = state.history.resolve_date(query.date.as_deref())?;
    let day = state.history.class_day(scope.school_id, class_id, date).await?;
    Ok(Json(ApiResponse::success(day)))
}

/// GET /api/attendance/summary
pub async fn school_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Query(query): Query<DateQuery>,
) -> Result<Json<ApiResponse<SchoolAttendanceSummary>>> {
    let scope = authorize(&state.credentials, &headers, &token).await?;
    scope.require_dashboard()?;

    let date = state.history.resolve_date(query.date.as_deref())?;
    let summary = state.history.school_summary(scope.school_id, date).await?;
    Ok(Json(ApiResponse::success(summary)))
}
