use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::credentials::{CredentialStore, StoredSession, TokenPair, UserProfile};
use crate::api::{ApiRequest, HttpError, Transport};

/// What session observers see.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    SignedOut,
    SignedIn(Option<UserProfile>),
}

/// Session operations the gateway depends on.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Drop the local session and notify observers. Never fails locally.
    async fn logout(&self);

    /// Exchange the stored refresh token for a new pair and store it.
    async fn refresh_access_token(&self) -> Result<TokenPair, HttpError>;
}

/// Absolute URLs of the auth endpoints.
#[derive(Debug, Clone)]
pub struct SessionEndpoints {
    pub login: Url,
    pub refresh: Url,
    pub logout: Url,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    user: UserProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Session service backed by the back-office auth endpoints.
///
/// `transport` must be the bare network transport, not the authenticating
/// gateway: refresh failures are handled by the gateway itself.
pub struct HttpSessionService {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    endpoints: SessionEndpoints,
    state: watch::Sender<SessionState>,
}

impl HttpSessionService {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        endpoints: SessionEndpoints,
    ) -> Self {
        let initial = if store.access_token().is_some() {
            SessionState::SignedIn(store.user())
        } else {
            SessionState::SignedOut
        };
        let (state, _) = watch::channel(initial);

        Self {
            transport,
            store,
            endpoints,
            state,
        }
    }

    /// Authenticate with username and password and store the new session
    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile> {
        let request = ApiRequest::post(self.endpoints.login.clone())
            .json(&LoginRequest { username, password })?;

        let response = self
            .transport
            .send(request)
            .await
            .context("Failed to send login request")?;
        let login: LoginResponse = response.json().context("Failed to parse login response")?;

        let tokens = TokenPair {
            access_token: login.access_token,
            refresh_token: login.refresh_token,
        };
        self.store
            .save(StoredSession::new(tokens, Some(login.user.clone())))
            .context("Failed to store session")?;

        info!(user = %login.user.username, "Signed in");
        self.state
            .send_replace(SessionState::SignedIn(Some(login.user.clone())));
        Ok(login.user)
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::SignedIn(_))
    }

    /// Best-effort server-side revocation of the refresh token.
    async fn revoke(&self, refresh_token: &str) {
        let request = match ApiRequest::post(self.endpoints.logout.clone())
            .json(&RefreshRequest { refresh_token })
        {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Skipping token revocation");
                return;
            }
        };
        if let Err(e) = self.transport.send(request).await {
            debug!(error = %e, "Token revocation failed");
        }
    }
}

#[async_trait]
impl SessionService for HttpSessionService {
    async fn logout(&self) {
        if let Some(refresh_token) = self.store.refresh_token() {
            self.revoke(&refresh_token).await;
        }
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
        info!("Signed out");
        self.state.send_replace(SessionState::SignedOut);
    }

    async fn refresh_access_token(&self) -> Result<TokenPair, HttpError> {
        let refresh_token = self
            .store
            .refresh_token()
            .ok_or_else(|| HttpError::Unauthorized {
                url: self.endpoints.refresh.to_string(),
            })?;

        let request = ApiRequest::post(self.endpoints.refresh.clone()).json(&RefreshRequest {
            refresh_token: &refresh_token,
        })?;
        let response = self.transport.send(request).await?;
        let tokens: TokenPair = response.json()?;

        if let Err(e) = self.store.set_tokens(tokens.clone()) {
            warn!(error = %e, "Failed to persist refreshed tokens");
        }
        info!("Access token refreshed");
        self.state.send_replace(SessionState::SignedIn(self.store.user()));
        Ok(tokens)
    }
}
