//! Credential types

use crate::error::{Error, Result};
use crate::models::{ClassId, SchoolId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// School scope of an RFID reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceScope {
    pub device_id: u64,
    pub school_id: SchoolId,
}

/// Who is watching a dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Authenticated school staff
    Dashboard,
    /// Unattended display screen (no student identifiers)
    PublicDisplay,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::PublicDisplay => "public_display",
        }
    }
}

impl FromStr for Audience {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dashboard" => Ok(Self::Dashboard),
            "public_display" => Ok(Self::PublicDisplay),
            other => Err(Error::Parse(format!("unknown token audience '{}'", other))),
        }
    }
}

/// Authorized reader of realtime data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientScope {
    pub school_id: SchoolId,
    pub audience: Audience,
    /// Token pinned to one class
    pub class_id: Option<ClassId>,
}

impl ClientScope {
    pub fn dashboard(school_id: SchoolId) -> Self {
        Self {
            school_id,
            audience: Audience::Dashboard,
            class_id: None,
        }
    }

    pub fn public_display(school_id: SchoolId) -> Self {
        Self {
            school_id,
            audience: Audience::PublicDisplay,
            class_id: None,
        }
    }

    /// Staff-only operations (manual entry)
    pub fn require_dashboard(&self) -> Result<()> {
        match self.audience {
            Audience::Dashboard => Ok(()),
            Audience::PublicDisplay => Err(Error::Forbidden(
                "display tokens are read-only".to_string(),
            )),
        }
    }

    /// Class filter to apply, the pinned class wins over a requested one
    pub fn effective_class(&self, requested: Option<ClassId>) -> Option<ClassId> {
        self.class_id.or(requested)
    }
}

/// `devices` row
#[derive(Debug, Clone, FromRow)]
pub struct DeviceRow {
    pub id: u64,
    pub school_id: SchoolId,
    pub is_active: bool,
}

/// `access_tokens` row
#[derive(Debug, Clone, FromRow)]
pub struct AccessTokenRow {
    pub school_id: SchoolId,
    pub audience: String,
    pub class_id: Option<ClassId>,
    pub is_active: bool,
    pub expires_at: Option<NaiveDateTime>,
}

impl AccessTokenRow {
    /// Scope granted by this token at `now` (UTC)
    pub fn scope_at(&self, now: NaiveDateTime) -> Result<ClientScope> {
        if !self.is_active {
            return Err(Error::Unauthorized("token revoked".to_string()));
        }
        if matches!(self.expires_at, Some(exp) if exp <= now) {
            return Err(Error::Unauthorized("token expired".to_string()));
        }
        let audience = self
            .audience
            .parse()
            .map_err(|_| Error::Unauthorized("token audience not recognised".to_string()))?;
        Ok(ClientScope {
            school_id: self.school_id,
            audience,
            class_id: self.class_id,
        })
    }
}
