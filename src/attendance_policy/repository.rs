//! Policy repository
//!
//! Reads `school_settings` rows. Writes belong to the settings backend.

use super::types::SchoolSettings;
use super::PolicySource;
use crate::error::Result;
use crate::models::SchoolId;
use sqlx::MySqlPool;

/// Settings repository for database operations
#[derive(Clone)]
pub struct SettingsRepository {
    pool: MySqlPool,
}

impl SettingsRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get attendance settings for a school
    pub async fn get_school_settings(&self, school_id: SchoolId) -> Result<Option<SchoolSettings>> {
        let settings = sqlx::query_as::<_, SchoolSettings>(
            r#"
            SELECT school_id, attendance_start_time, attendance_end_time,
                   attendance_late_threshold, attendance_very_late_threshold
            FROM school_settings
            WHERE school_id = ?
            "#,
        )
        .bind(school_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(settings)
    }
}

impl PolicySource for SettingsRepository {
    async fn load_settings(&self, school_id: SchoolId) -> Result<Option<SchoolSettings>> {
        self.get_school_settings(school_id).await
    }
}
