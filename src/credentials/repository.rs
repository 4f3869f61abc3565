//! Credential repository
//!
//! Looks up device API keys and client access tokens. Issuing and revoking
//! them belongs to the admin backend.

use super::types::{AccessTokenRow, ClientScope, DeviceRow, DeviceScope};
use super::CredentialValidator;
use crate::error::{Error, Result};
use chrono::Utc;
use sqlx::MySqlPool;

/// Credential repository for database operations
#[derive(Clone)]
pub struct CredentialRepository {
    pool: MySqlPool,
}

impl CredentialRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get device by API key
    pub async fn get_device_by_key(&self, api_key: &str) -> Result<Option<DeviceRow>> {
        let device = sqlx::query_as::<_, DeviceRow>(
            "SELECT id, school_id, is_active FROM devices WHERE api_key = ?",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    /// Get access token row
    pub async fn get_token(&self, token: &str) -> Result<Option<AccessTokenRow>> {
        let row = sqlx::query_as::<_, AccessTokenRow>(
            r#"
            SELECT school_id, audience, class_id, is_active, expires_at
            FROM access_tokens
            WHERE token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn touch_device(&self, device_id: u64) {
        if let Err(e) = sqlx::query("UPDATE devices SET last_seen_at = ? WHERE id = ?")
            .bind(Utc::now().naive_utc())
            .bind(device_id)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(device_id = device_id, error = %e, "Failed to update device last_seen_at");
        }
    }

    async fn touch_token(&self, token: &str) {
        if let Err(e) = sqlx::query("UPDATE access_tokens SET last_used_at = ? WHERE token = ?")
            .bind(Utc::now().naive_utc())
            .bind(token)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(error = %e, "Failed to update token last_used_at");
        }
    }
}

impl CredentialValidator for CredentialRepository {
    async fn validate_device_key(&self, api_key: &str) -> Result<DeviceScope> {
        let device = self
            .get_device_by_key(api_key)
            .await?
            .filter(|d| d.is_active)
            .ok_or_else(|| Error::InvalidCredential("unknown or inactive device".to_string()))?;

        self.touch_device(device.id).await;

        Ok(DeviceScope {
            device_id: device.id,
            school_id: device.school_id,
        })
    }

    async fn authorize_client(&self, token: &str) -> Result<ClientScope> {
        let row = self
            .get_token(token)
            .await?
            .ok_or_else(|| Error::Unauthorized("unknown token".to_string()))?;

        let scope = row.scope_at(Utc::now().naive_utc())?;
        self.touch_token(token).await;
        Ok(scope)
    }
}
