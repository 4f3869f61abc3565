//! Attendance Server Library
//!
//! RFID school attendance with live dashboards.
//!
//! ## Architecture
//!
//! 1. AttendancePolicy - per-school window and arrival classification
//! 2. Attendance - tap state machine, manual entry
//! 3. Dashboard - live feed, stats, leaderboard
//! 4. EventDispatch - persist-then-notify hand-off
//! 5. RealtimeHub - WebSocket membership and fan-out
//! 6. Credentials - device keys, access tokens
//! 7. WebAPI - REST and WebSocket endpoints
//!
//! ## Design Principles
//!
//! - Storage is the source of truth; every view is recomputed from it
//! - A slow or failed broadcast never fails a write

pub mod attendance;
pub mod attendance_policy;
pub mod credentials;
pub mod dashboard;
pub mod error;
pub mod event_dispatch;
pub mod models;
pub mod realtime_hub;
pub mod state;
pub mod web_api;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use state::AppState;
