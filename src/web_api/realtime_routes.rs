//! Realtime API Routes
//!
//! REST snapshots for initial load and the attendance WebSocket.

use super::auth::{authorize, TokenQuery};
use crate::credentials::{Audience, ClientScope};
use crate::dashboard::{
    AttendanceStats, DashboardQuery, LeaderboardEntry, LiveFeedEntry, PublicFeedEntry,
    PublicLeaderboardEntry,
};
use crate::error::Result;
use crate::models::ApiResponse;
use crate::realtime_hub::session::{self, Frame, SessionConfig};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use futures::{future, SinkExt, StreamExt};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum FeedView {
    Full(Vec<LiveFeedEntry>),
    Public(Vec<PublicFeedEntry>),
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LeaderboardView {
    Full(Vec<LeaderboardEntry>),
    Public(Vec<PublicLeaderboardEntry>),
}

#[derive(Debug, Serialize)]
pub struct LiveFeedResponse {
    pub date: NaiveDate,
    pub feed: FeedView,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub date: NaiveDate,
    pub stats: AttendanceStats,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub date: NaiveDate,
    pub leaderboard: LeaderboardView,
}

/// GET /api/realtime/live-feed
pub async fn live_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<ApiResponse<LiveFeedResponse>>> {
    let scope = authorize(&state.credentials, &headers, &token).await?;
    let date = state.dashboard.today();
    let feed = state
        .dashboard
        .live_feed(scope.school_id, scope.effective_class(query.class_id), date, query.limit)
        .await?;

    let feed = match scope.audience {
        Audience::Dashboard => FeedView::Full(feed),
        Audience::PublicDisplay => FeedView::Public(feed.iter().map(LiveFeedEntry::public).collect()),
    };
    Ok(Json(ApiResponse::success(LiveFeedResponse { date, feed })))
}

/// GET /api/realtime/stats
pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<ApiResponse<StatsResponse>>> {
    let scope = authorize(&state.credentials, &headers, &token).await?;
    let date = state.dashboard.today();
    let stats = state
        .dashboard
        .stats(scope.school_id, scope.effective_class(query.class_id), date)
        .await?;
    Ok(Json(ApiResponse::success(StatsResponse { date, stats })))
}

/// GET /api/realtime/leaderboard
pub async fn leaderboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<ApiResponse<LeaderboardResponse>>> {
    let scope = authorize(&state.credentials, &headers, &token).await?;
    let date = state.dashboard.today();
    let board = state
        .dashboard
        .leaderboard(scope.school_id, scope.effective_class(query.class_id), date, query.limit)
        .await?;

    let leaderboard = match scope.audience {
        Audience::Dashboard => LeaderboardView::Full(board),
        Audience::PublicDisplay => {
            LeaderboardView::Public(board.iter().map(LeaderboardEntry::public).collect())
        }
    };
    Ok(Json(ApiResponse::success(LeaderboardResponse { date, leaderboard })))
}

// ========================================
// WebSocket Handler
// ========================================

/// GET /api/ws/attendance
/// Authenticated at upgrade; a rejected client gets an `error` message
/// and a close frame
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(token): Query<TokenQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let scope = authorize(&state.credentials, &headers, &token).await;
    ws.on_upgrade(move |socket| handle_websocket(socket, state, scope))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState, scope: Result<ClientScope>) {
    let (sender, receiver) = socket.split();

    let sink = sender.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let stream = receiver.filter_map(|result| future::ready(to_frame(result)));

    match scope {
        Ok(scope) => {
            session::run_session(
                state.realtime.clone(),
                state.dashboard.clone(),
                scope,
                sink,
                stream,
                SessionConfig {
                    ping_interval: state.config.ws_ping_interval,
                },
            )
            .await;
        }
        Err(e) => {
            tracing::warn!(error_code = e.code(), error = %e, "WebSocket handshake rejected");
            session::reject(sink, &e).await;
        }
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}

fn to_frame(result: std::result::Result<Message, axum::Error>) -> Option<Frame> {
    match result {
        Ok(Message::Text(text)) => Some(Frame::Text(text)),
        Ok(Message::Ping(data)) => Some(Frame::Ping(data)),
        Ok(Message::Pong(data)) => Some(Frame::Pong(data)),
        Ok(Message::Close(_)) => Some(Frame::Close),
        Ok(Message::Binary(_)) => None,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket error");
            Some(Frame::Close)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_mapping() {
        assert_eq!(to_frame(Ok(Message::Text("hi".to_string()))), Some(Frame::Text("hi".to_string())));
        assert_eq!(to_frame(Ok(Message::Binary(vec![1]))), None);
        assert_eq!(to_frame(Ok(Message::Close(None))), Some(Frame::Close));
        assert!(matches!(to_message(Frame::Close), Message::Close(None)));
        assert!(matches!(to_message(Frame::Ping(vec![])), Message::Ping(_)));
    }
}
