// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read-only view of the session, isolating the engine from the auth subsystem.
//!
//! The engine never issues or validates tokens. It asks an [`AuthProvider`]
//! whether someone is signed in and who, and attaches whatever token the
//! provider hands out to remote requests. Provider failures are never fatal:
//! [`AuthBridge`] logs them and answers "not signed in".

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use crate::config::SyncConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("auth provider unavailable: {0}")]
    Unavailable(String),
}

/// The signed-in user, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), email: None, display_name: None }
    }
}

/// A linked account (e.g. an OAuth identity) when no user profile is loaded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedAccount {
    pub id: String,
    pub provider: Option<String>,
}

/// Session surface the engine consumes.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn is_authenticated(&self) -> Result<bool, AuthError>;
    async fn auth_token(&self) -> Result<Option<String>, AuthError>;
    async fn authenticated_user(&self) -> Result<Option<AuthenticatedUser>, AuthError>;
    async fn authenticated_account(&self) -> Result<Option<AuthenticatedAccount>, AuthError>;
    async fn clear_auth_state(&self) -> Result<(), AuthError>;
}

#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
    user: Option<AuthenticatedUser>,
    account: Option<AuthenticatedAccount>,
}

/// In-process [`AuthProvider`] for hosts that manage the session themselves.
#[derive(Debug, Default)]
pub struct SessionAuth {
    session: RwLock<Session>,
}

impl SessionAuth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(&self, token: impl Into<String>, user: AuthenticatedUser) {
        let mut session = self.session.write();
        session.token = Some(token.into());
        session.user = Some(user);
    }

    pub fn link_account(&self, account: AuthenticatedAccount) {
        self.session.write().account = Some(account);
    }

    pub fn logout(&self) {
        *self.session.write() = Session::default();
    }
}

#[async_trait]
impl AuthProvider for SessionAuth {
    async fn is_authenticated(&self) -> Result<bool, AuthError> {
        let session = self.session.read();
        Ok(session.token.is_some() && (session.user.is_some() || session.account.is_some()))
    }

    async fn auth_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.session.read().token.clone())
    }

    async fn authenticated_user(&self) -> Result<Option<AuthenticatedUser>, AuthError> {
        Ok(self.session.read().user.clone())
    }

    async fn authenticated_account(&self) -> Result<Option<AuthenticatedAccount>, AuthError> {
        Ok(self.session.read().account.clone())
    }

    async fn clear_auth_state(&self) -> Result<(), AuthError> {
        self.logout();
        Ok(())
    }
}

/// Where and how remote requests are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub base_url: String,
    pub auth_header_name: String,
}

impl From<&SyncConfig> for EndpointConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            auth_header_name: config.auth_header_name.clone(),
        }
    }
}

pub struct AuthBridge {
    provider: Arc<dyn AuthProvider>,
    endpoint: RwLock<EndpointConfig>,
}

impl AuthBridge {
    pub fn new(provider: Arc<dyn AuthProvider>, endpoint: EndpointConfig) -> Self {
        Self { provider, endpoint: RwLock::new(endpoint) }
    }

    pub fn from_config(provider: Arc<dyn AuthProvider>, config: &SyncConfig) -> Self {
        Self::new(provider, EndpointConfig::from(config))
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        self.endpoint.read().base_url.clone()
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.endpoint.write().base_url = base_url.into();
    }

    #[must_use]
    pub fn auth_header_name(&self) -> String {
        self.endpoint.read().auth_header_name.clone()
    }

    pub fn set_auth_header_name(&self, name: impl Into<String>) {
        self.endpoint.write().auth_header_name = name.into();
    }

    /// Apply endpoint values from a fresh config, if they changed.
    pub fn update_endpoint(&self, endpoint: EndpointConfig) {
        let mut current = self.endpoint.write();
        if *current != endpoint {
            *current = endpoint;
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        match self.provider.is_authenticated().await {
            Ok(authenticated) => authenticated,
            Err(e) => {
                warn!(error = %e, "Auth provider failed, treating session as signed out");
                false
            }
        }
    }

    pub async fn auth_token(&self) -> Option<String> {
        self.provider.auth_token().await.unwrap_or_else(|e| {
            warn!(error = %e, "Auth provider failed to supply a token");
            None
        })
    }

    /// `(header name, header value)` for remote requests, if there is a token.
    pub async fn auth_header(&self) -> Option<(String, String)> {
        let token = self.auth_token().await?;
        Some((self.auth_header_name(), format!("Bearer {}", token)))
    }

    /// Id of the signed-in user, falling back to the linked account id.
    pub async fn authenticated_identity(&self) -> Option<String> {
        match self.provider.authenticated_user().await {
            Ok(Some(user)) if !user.id.trim().is_empty() => return Some(user.id),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Auth provider failed to supply the user"),
        }

        match self.provider.authenticated_account().await {
            Ok(Some(account)) if !account.id.trim().is_empty() => Some(account.id),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Auth provider failed to supply the account");
                None
            }
        }
    }

    pub async fn clear_auth_state(&self) {
        if let Err(e) = self.provider.clear_auth_state().await {
            warn!(error = %e, "Auth provider failed to clear its state");
        }
    }
}
