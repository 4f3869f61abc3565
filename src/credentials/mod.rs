//! Credentials
//!
//! Device API keys (RFID readers) and client access tokens (dashboards and
//! public displays), each resolved to a school scope.

mod repository;
mod types;

pub use repository::CredentialRepository;
pub use types::*;

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;

/// Validates presented credentials
pub trait CredentialValidator: Send + Sync {
    /// Device key -> school scope, `InvalidCredential` when rejected
    fn validate_device_key(&self, api_key: &str) -> impl Future<Output = Result<DeviceScope>> + Send;

    /// Client token -> realtime/dashboard scope, `Unauthorized` when rejected
    fn authorize_client(&self, token: &str) -> impl Future<Output = Result<ClientScope>> + Send;
}

impl<T: CredentialValidator> CredentialValidator for Arc<T> {
    fn validate_device_key(&self, api_key: &str) -> impl Future<Output = Result<DeviceScope>> + Send {
        (**self).validate_device_key(api_key)
    }

    fn authorize_client(&self, token: &str) -> impl Future<Output = Result<ClientScope>> + Send {
        (**self).authorize_client(token)
    }
}

/// Reject blank credentials before touching storage
pub fn non_blank<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} is required", what)));
    }
    Ok(trimmed)
}
