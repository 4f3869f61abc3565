//! Attendance Policy Resolver
//!
//! ## Responsibilities
//!
//! - Resolve the attendance window (start, late, very-late, end) for a
//!   school on a given date
//! - Fall back to fixed defaults when settings are missing, malformed or
//!   unreadable, so arrival classification is always computable
//!
//! Read-only: settings are written by the settings backend.

mod repository;
mod types;

pub use repository::SettingsRepository;
pub use types::*;

use crate::error::Result;
use crate::models::SchoolId;
use chrono::NaiveDate;
use std::future::Future;
use std::sync::Arc;

/// Source of per-school settings
pub trait PolicySource: Send + Sync {
    fn load_settings(
        &self,
        school_id: SchoolId,
    ) -> impl Future<Output = Result<Option<SchoolSettings>>> + Send;
}

impl<T: PolicySource> PolicySource for Arc<T> {
    fn load_settings(
        &self,
        school_id: SchoolId,
    ) -> impl Future<Output = Result<Option<SchoolSettings>>> + Send {
        (**self).load_settings(school_id)
    }
}

/// PolicyResolver instance
pub struct PolicyResolver<P> {
    source: P,
}

impl<P: PolicySource> PolicyResolver<P> {
    /// Create new PolicyResolver
    pub fn new(source: P) -> Self {
        Self { source }
    }

    /// Effective policy for a school. Never fails.
    pub async fn resolve_policy(&self, school_id: SchoolId) -> AttendancePolicy {
        match self.source.load_settings(school_id).await {
            Ok(Some(settings)) => match AttendancePolicy::try_from(&settings) {
                Ok(policy) => policy,
                Err(e) => {
                    tracing::warn!(
                        school_id = school_id,
                        error = %e,
                        "Malformed attendance settings, using defaults"
                    );
                    AttendancePolicy::default()
                }
            },
            Ok(None) => {
                tracing::debug!(school_id = school_id, "No attendance settings, using defaults");
                AttendancePolicy::default()
            }
            Err(e) => {
                tracing::warn!(
                    school_id = school_id,
                    error = %e,
                    "Failed to load attendance settings, using defaults"
                );
                AttendancePolicy::default()
            }
        }
    }

    /// Window for `school_id` on `date`
    pub async fn resolve_window(&self, school_id: SchoolId, date: NaiveDate) -> AttendanceWindow {
        self.resolve_policy(school_id).await.window_on(date)
    }
}
