//! Caller authentication
//!
//! Every metered route requires `Authorization: Bearer <key>`. The key
//! resolves to an [`Identity`] whose organization bounds what the caller may
//! query.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use spendgate_common::SpendgateError;
use std::collections::HashMap;

use crate::error::ApiError;
use crate::AppState;

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub organization_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
        }
    }
}

/// Resolves API keys to identities
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, api_key: &str) -> Option<Identity>;
}

/// Fixed key table
#[derive(Debug, Clone, Default)]
pub struct StaticKeyAuthenticator {
    keys: HashMap<String, Identity>,
}

impl StaticKeyAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, api_key: impl Into<String>, identity: Identity) -> Self {
        self.keys.insert(api_key.into(), identity);
        self
    }

    /// Parse `key=user@org` entries separated by commas
    pub fn parse(table: &str) -> Result<Self, SpendgateError> {
        let mut auth = Self::new();
        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, principal) = entry
                .split_once('=')
                .ok_or_else(|| invalid_entry(entry))?;
            let (user, org) = principal
                .split_once('@')
                .ok_or_else(|| invalid_entry(entry))?;
            if key.is_empty() || user.is_empty() || org.is_empty() {
                return Err(invalid_entry(entry));
            }
            auth = auth.with_key(key, Identity::new(user, org));
        }
        Ok(auth)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn invalid_entry(entry: &str) -> SpendgateError {
    // Report the principal only; never echo the key
    let principal = entry.split_once('=').map(|(_, p)| p).unwrap_or("<malformed>");
    SpendgateError::Config(format!("invalid API key entry for '{principal}', expected key=user@org"))
}

#[async_trait]
impl Authenticator for StaticKeyAuthenticator {
    async fn authenticate(&self, api_key: &str) -> Option<Identity> {
        self.keys.get(api_key).cloned()
    }
}

/// Bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Extractor resolving the caller before any handler logic runs
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            ApiError::from(SpendgateError::Authentication("missing bearer token".into()))
        })?;

        state
            .auth
            .authenticate(token)
            .await
            .map(Authenticated)
            .ok_or_else(|| SpendgateError::Authentication("unknown API key".into()).into())
    }
}
