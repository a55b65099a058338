//! OAuth session bookkeeping
//!
//! A [`Session`] owns the access/refresh token pair, persists it to the
//! tokens file, and keeps exactly one proactive refresh timer alive. The
//! interactive authorization flow happens elsewhere; the session only
//! receives the resulting [`TokenGrant`].
//!
//! Remote calls never read the session directly. They go through
//! [`TokenProvider`], which [`StaticToken`] also implements for tests and
//! the `--token` override.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::storage::Storage;

/// Shortest delay before a proactive refresh fires.
pub const MIN_REFRESH_DELAY: Duration = Duration::from_secs(5);
/// Persisted tokens closer than this to expiry are refreshed on startup.
pub const STARTUP_REFRESH_WINDOW: Duration = Duration::from_secs(60);

/// Identity fields read from the access token payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Claims {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Decode the (unverified) payload segment of a JWT.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let raw: RawClaims = serde_json::from_slice(&bytes).ok()?;
    Some(Claims {
        name: raw
            .name
            .filter(|name| !name.is_empty())
            .or(raw.preferred_username),
        email: raw.email,
    })
}

/// Source of bearer tokens for the remote client.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn current_token(&self) -> Option<SecretString>;

    /// Obtain a fresh token, if this provider can.
    async fn refresh(&self) -> Result<Option<SecretString>>;

    fn claims(&self) -> Option<Claims> {
        self.current_token()
            .and_then(|token| decode_claims(token.expose_secret()))
    }
}

/// A fixed token that never changes.
pub struct StaticToken(SecretString);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    fn current_token(&self) -> Option<SecretString> {
        Some(self.0.clone())
    }

    async fn refresh(&self) -> Result<Option<SecretString>> {
        Ok(None)
    }
}

/// Token endpoint response (or an externally obtained grant).
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Lifetime of the access token in seconds
    pub expires_in: u64,
}

impl TokenGrant {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
            expires_in,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

impl From<TokenResponse> for TokenGrant {
    fn from(resp: TokenResponse) -> Self {
        TokenGrant::new(resp.access_token, resp.refresh_token, resp.expires_in)
    }
}

/// On-disk form of the session.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTokens {
    access_token: String,
    refresh_token: String,
    /// Unix epoch milliseconds
    expires_at: i64,
}

#[derive(Default)]
struct SessionState {
    access_token: Option<SecretString>,
    refresh_token: Option<SecretString>,
    expires_at: Option<DateTime<Utc>>,
}

/// Summary of the current session, safe to print.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub authenticated: bool,
    pub expires_at: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

type TokenListener = Arc<dyn Fn(Option<&SecretString>) + Send + Sync>;

struct SessionInner {
    state: Mutex<SessionState>,
    tokens_file: PathBuf,
    storage: Storage,
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    refresh_margin: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    listeners: Mutex<Vec<TokenListener>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

/// Owned OAuth session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(storage: Storage, settings: &Settings) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState::default()),
                tokens_file: storage.tokens_file(),
                storage,
                http: reqwest::Client::new(),
                token_url: settings.auth.token_url.clone(),
                client_id: settings.auth.client_id.clone(),
                refresh_margin: settings.refresh_margin(),
                timer: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Restore a persisted session. Returns whether a usable session exists.
    pub async fn init(&self) -> Result<bool> {
        let stored: Option<StoredTokens> = match self.inner.storage.read_json(&self.inner.tokens_file) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "discarding unreadable token file");
                self.inner.storage.remove(&self.inner.tokens_file)?;
                None
            }
        };
        let Some(stored) = stored else {
            return Ok(false);
        };

        let expires_at = Utc
            .timestamp_millis_opt(stored.expires_at)
            .single()
            .unwrap_or_else(Utc::now);
        {
            let mut state = self.inner.state.lock();
            state.access_token = Some(SecretString::from(stored.access_token));
            state.refresh_token = Some(SecretString::from(stored.refresh_token));
            state.expires_at = Some(expires_at);
        }

        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if remaining < STARTUP_REFRESH_WINDOW {
            return match self.refresh_session().await {
                Ok(_) => {
                    info!("session restored via token refresh");
                    Ok(true)
                }
                Err(err) => {
                    warn!(error = %err, "failed to restore session");
                    self.clear()?;
                    Ok(false)
                }
            };
        }

        debug!(remaining_secs = remaining.as_secs(), "session restored from disk");
        self.schedule_refresh(remaining);
        self.notify();
        Ok(true)
    }

    /// Install a grant obtained by an external authorization flow.
    pub fn login(&self, grant: TokenGrant) -> Result<()> {
        self.install(grant)?;
        info!("session established");
        Ok(())
    }

    /// Exchange the refresh token for a new grant.
    pub async fn refresh_session(&self) -> Result<SecretString> {
        let refresh_token = self
            .inner
            .state
            .lock()
            .refresh_token
            .clone()
            .ok_or(Error::NotAuthenticated)?;

        let grant = self.request_refresh(&refresh_token).await?;
        let access = grant.access_token.clone();
        self.install(grant)?;
        Ok(access)
    }

    async fn request_refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.inner.client_id.as_str()),
            ("refresh_token", refresh_token.expose_secret()),
        ];
        let resp = self
            .inner
            .http
            .post(&self.inner.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| Error::TokenRefresh(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "token endpoint rejected refresh");
            return Err(Error::TokenRefresh(format!("{} {}", status.as_u16(), body)));
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|err| Error::TokenRefresh(format!("failed to parse token response: {err}")))?;
        Ok(parsed.into())
    }

    /// Drop the session everywhere.
    pub fn logout(&self) -> Result<()> {
        self.clear()?;
        info!("logged out");
        Ok(())
    }

    /// Register a listener for token changes (`None` after logout).
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(Option<&SecretString>) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().push(Arc::new(listener));
    }

    pub fn is_authenticated(&self) -> bool {
        let state = self.inner.state.lock();
        match (&state.access_token, state.expires_at) {
            (Some(_), Some(expires_at)) => expires_at > Utc::now(),
            _ => false,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().expires_at
    }

    pub fn status(&self) -> SessionStatus {
        let claims = self.claims().unwrap_or_default();
        SessionStatus {
            authenticated: self.is_authenticated(),
            expires_at: self.expires_at().map(|at| at.to_rfc3339()),
            name: claims.name,
            email: claims.email,
        }
    }

    /// Whether a refresh timer is currently pending.
    pub fn refresh_pending(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn install(&self, grant: TokenGrant) -> Result<()> {
        let expires_at = i64::try_from(grant.expires_in)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "token lifetime of {}s is out of range",
                    grant.expires_in
                ))
            })?;
        let stored = StoredTokens {
            access_token: grant.access_token.expose_secret().to_string(),
            refresh_token: grant.refresh_token.expose_secret().to_string(),
            expires_at: expires_at.timestamp_millis(),
        };
        {
            let mut state = self.inner.state.lock();
            state.access_token = Some(grant.access_token);
            state.refresh_token = Some(grant.refresh_token);
            state.expires_at = Some(expires_at);
        }
        self.schedule_refresh(Duration::from_secs(grant.expires_in));
        self.inner.storage.write_json(&self.inner.tokens_file, &stored)?;
        self.notify();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if let Some(handle) = self.inner.timer.lock().take() {
            handle.abort();
        }
        *self.inner.state.lock() = SessionState::default();
        self.inner.storage.remove(&self.inner.tokens_file)?;
        self.notify();
        Ok(())
    }

    /// Replace any pending timer with one firing `margin` before expiry.
    fn schedule_refresh(&self, expires_in: Duration) {
        let delay = expires_in
            .saturating_sub(self.inner.refresh_margin)
            .max(MIN_REFRESH_DELAY);
        debug!(delay_secs = delay.as_secs(), "scheduling token refresh");

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Session { inner }.proactive_refresh().await;
            }
        });

        if let Some(previous) = self.inner.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn proactive_refresh(self) {
        let refresh_token = self.inner.state.lock().refresh_token.clone();
        let result = match refresh_token {
            Some(token) => self.request_refresh(&token).await,
            None => Err(Error::NotAuthenticated),
        };
        let outcome = result.and_then(|grant| self.install(grant));
        if let Err(err) = outcome {
            warn!(error = %err, "proactive token refresh failed");
            // The timer being cleared is the one running this task.
            self.inner.timer.lock().take();
            *self.inner.state.lock() = SessionState::default();
            if let Err(err) = self.inner.storage.remove(&self.inner.tokens_file) {
                warn!(error = %err, "failed to remove token file");
            }
            self.notify();
        }
    }

    fn notify(&self) {
        let token = self.inner.state.lock().access_token.clone();
        let listeners: Vec<TokenListener> = self.inner.listeners.lock().clone();
        for listener in listeners {
            listener(token.as_ref());
        }
    }
}

#[async_trait]
impl TokenProvider for Session {
    fn current_token(&self) -> Option<SecretString> {
        self.inner.state.lock().access_token.clone()
    }

    async fn refresh(&self) -> Result<Option<SecretString>> {
        self.refresh_session().await.map(Some)
    }
}
