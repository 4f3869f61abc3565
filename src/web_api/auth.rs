//! Client token extraction

use crate::credentials::{ClientScope, CredentialValidator};
use crate::error::{Error, Result};
use axum::http::{header, HeaderMap};
use serde::Deserialize;

/// `?token=` for clients that cannot set headers (WebSocket, displays)
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Bearer header wins over the query parameter
pub fn client_token(headers: &HeaderMap, query_token: Option<&str>) -> Result<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    bearer
        .or_else(|| query_token.map(str::trim).filter(|t| !t.is_empty()))
        .map(str::to_string)
        .ok_or_else(|| Error::Unauthorized("missing access token".to_string()))
}

/// Resolve the caller's scope
pub async fn authorize<V: CredentialValidator>(
    credentials: &V,
    headers: &HeaderMap,
    query: &TokenQuery,
) -> Result<ClientScope> {
    let token = client_token(headers, query.token.as_deref())?;
    credentials.authorize_client(&token).await
}
